// Validation traits

use girder_core::FieldError;

/// Trait for validatable types
///
/// Implemented by request DTOs checked by
/// [`ValidationPipe`](crate::ValidationPipe).
pub trait Validate {
    /// Validate the value and return every failure, not just the first
    fn validate(&self) -> Result<(), Vec<FieldError>>;
}

/// Collects the failures of a batch of checks.
///
/// ```
/// use girder_validation::{collect_errors, MinLength, NotEmpty};
///
/// let name = "al";
/// let errors = collect_errors([
///     NotEmpty::validate(name, "name"),
///     MinLength(3).validate(name, "name"),
/// ]);
/// assert_eq!(errors.unwrap_err().len(), 1);
/// ```
pub fn collect_errors<I>(results: I) -> Result<(), Vec<FieldError>>
where
    I: IntoIterator<Item = Result<(), FieldError>>,
{
    let errors: Vec<FieldError> = results.into_iter().filter_map(Result::err).collect();
    if errors.is_empty() { Ok(()) } else { Err(errors) }
}
