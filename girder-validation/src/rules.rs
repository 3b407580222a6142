// Validation rules builder

use girder_core::FieldError;
use std::sync::Arc;

type ValidatorFn = Arc<dyn Fn(&str, &str) -> Result<(), FieldError> + Send + Sync>;

/// Ordered list of string checks for one field.
#[derive(Clone)]
pub struct ValidationRules {
    validators: Vec<ValidatorFn>,
    field: String,
}

impl ValidationRules {
    pub fn for_field(field: impl Into<String>) -> Self {
        Self {
            validators: Vec::new(),
            field: field.into(),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn add<F>(mut self, validator: F) -> Self
    where
        F: Fn(&str, &str) -> Result<(), FieldError> + Send + Sync + 'static,
    {
        self.validators.push(Arc::new(validator));
        self
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    /// Same rules, reported under another field name
    pub fn rename(mut self, field: impl Into<String>) -> Self {
        self.field = field.into();
        self
    }

    /// Run every rule and collect all failures.
    pub fn validate(&self, value: &str) -> Result<(), Vec<FieldError>> {
        let errors: Vec<FieldError> = self
            .validators
            .iter()
            .filter_map(|validator| validator(value, &self.field).err())
            .collect();

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

impl std::fmt::Debug for ValidationRules {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationRules")
            .field("field", &self.field)
            .field("rules", &self.validators.len())
            .finish()
    }
}
