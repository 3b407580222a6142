// Built-in parameter pipes

use crate::{Validate, ValidationRules};
use async_trait::async_trait;
use girder_core::{ArgumentMetadata, Error, FieldError, Pipe, ValidationErrors};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::marker::PhantomData;
use tracing::debug;

fn reject(meta: &ArgumentMetadata<'_>, message: &str, constraint: &str, value: &Value) -> Error {
    let shown = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    FieldError::new(meta.name(), message)
        .with_constraint(constraint)
        .with_value(shown)
        .into()
}

/// Parses a string argument into a JSON integer.
pub struct ParseIntPipe;

#[async_trait]
impl Pipe for ParseIntPipe {
    async fn transform(&self, value: Value, meta: &ArgumentMetadata<'_>) -> Result<Value, Error> {
        if value.is_i64() || value.is_u64() {
            return Ok(value);
        }
        value
            .as_str()
            .and_then(|s| s.trim().parse::<i64>().ok())
            .map(Value::from)
            .ok_or_else(|| reject(meta, "must be an integer", "isInt", &value))
    }
}

/// Parses a string argument into a JSON number.
pub struct ParseFloatPipe;

#[async_trait]
impl Pipe for ParseFloatPipe {
    async fn transform(&self, value: Value, meta: &ArgumentMetadata<'_>) -> Result<Value, Error> {
        if value.is_number() {
            return Ok(value);
        }
        value
            .as_str()
            .and_then(|s| s.trim().parse::<f64>().ok())
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| reject(meta, "must be a number", "isNumber", &value))
    }
}

/// Accepts `true`/`false`/`1`/`0`.
pub struct ParseBoolPipe;

#[async_trait]
impl Pipe for ParseBoolPipe {
    async fn transform(&self, value: Value, meta: &ArgumentMetadata<'_>) -> Result<Value, Error> {
        if value.is_boolean() {
            return Ok(value);
        }
        let parsed = value
            .as_str()
            .map(|s| s.trim().to_ascii_lowercase())
            .and_then(|s| match s.as_str() {
                "true" | "1" => Some(true),
                "false" | "0" => Some(false),
                _ => None,
            });
        parsed
            .map(Value::Bool)
            .ok_or_else(|| reject(meta, "must be a boolean", "isBoolean", &value))
    }
}

/// Requires a number strictly greater than zero. Run after a parse pipe.
pub struct PositivePipe;

#[async_trait]
impl Pipe for PositivePipe {
    async fn transform(&self, value: Value, meta: &ArgumentMetadata<'_>) -> Result<Value, Error> {
        match value.as_f64() {
            Some(n) if n > 0.0 => Ok(value),
            Some(_) => Err(reject(meta, "must be a positive number", "isPositive", &value)),
            None => Err(reject(meta, "must be a number", "isNumber", &value)),
        }
    }
}

/// Substitutes a default for a missing argument.
pub struct DefaultValuePipe(pub Value);

impl DefaultValuePipe {
    pub fn new(default: impl Into<Value>) -> Self {
        Self(default.into())
    }
}

#[async_trait]
impl Pipe for DefaultValuePipe {
    async fn transform(&self, value: Value, _meta: &ArgumentMetadata<'_>) -> Result<Value, Error> {
        Ok(if value.is_null() { self.0.clone() } else { value })
    }
}

/// Trims surrounding whitespace from string arguments.
pub struct TrimPipe;

#[async_trait]
impl Pipe for TrimPipe {
    async fn transform(&self, value: Value, _meta: &ArgumentMetadata<'_>) -> Result<Value, Error> {
        Ok(match value {
            Value::String(s) => Value::String(s.trim().to_string()),
            other => other,
        })
    }
}

/// Runs string rules against the argument. Failures are reported under the
/// argument's name.
pub struct RulesPipe {
    rules: ValidationRules,
}

impl RulesPipe {
    pub fn new(rules: ValidationRules) -> Self {
        Self { rules }
    }
}

#[async_trait]
impl Pipe for RulesPipe {
    async fn transform(&self, value: Value, meta: &ArgumentMetadata<'_>) -> Result<Value, Error> {
        let Some(text) = value.as_str() else {
            return Err(reject(meta, "must be a string", "isString", &value));
        };
        match self.rules.clone().rename(meta.name()).validate(text) {
            Ok(()) => Ok(value),
            Err(errors) => Err(Error::Validation(ValidationErrors::new(errors))),
        }
    }
}

/// Deserializes the argument into `T` and runs its [`Validate`] impl.
///
/// The argument passes through unchanged when it is valid; the handler
/// deserializes it again with `Args::get`.
pub struct ValidationPipe<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> ValidationPipe<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for ValidationPipe<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T> Pipe for ValidationPipe<T>
where
    T: DeserializeOwned + Validate + Send + 'static,
{
    async fn transform(&self, value: Value, meta: &ArgumentMetadata<'_>) -> Result<Value, Error> {
        let parsed: T = match serde_json::from_value(value.clone()) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(argument = meta.name(), error = %e, "Argument does not match its DTO");
                return Err(FieldError::new(meta.name(), e.to_string())
                    .with_constraint("type")
                    .into());
            }
        };
        match parsed.validate() {
            Ok(()) => Ok(value),
            Err(errors) => {
                debug!(argument = meta.name(), failures = errors.len(), "DTO validation failed");
                Err(Error::Validation(ValidationErrors::new(errors)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use girder_core::ParamSource;
    use serde::Deserialize;
    use serde_json::json;

    fn meta(key: &str) -> ArgumentMetadata<'_> {
        ArgumentMetadata {
            index: 0,
            source: ParamSource::Path,
            key: Some(key),
        }
    }

    fn field_of(error: Error) -> (String, String) {
        match error {
            Error::Validation(errors) => (
                errors.errors[0].field.clone(),
                errors.errors[0].constraint.clone(),
            ),
            other => panic!("expected a validation error, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_parse_int() {
        assert_eq!(ParseIntPipe.transform(json!("42"), &meta("id")).await.unwrap(), json!(42));
        assert_eq!(ParseIntPipe.transform(json!(-3), &meta("id")).await.unwrap(), json!(-3));

        let err = ParseIntPipe.transform(json!("4x"), &meta("id")).await.unwrap_err();
        assert_eq!(field_of(err), ("id".to_string(), "isInt".to_string()));
        assert!(ParseIntPipe.transform(Value::Null, &meta("id")).await.is_err());
    }

    #[tokio::test]
    async fn test_parse_float_and_bool() {
        assert_eq!(
            ParseFloatPipe.transform(json!("2.5"), &meta("ratio")).await.unwrap(),
            json!(2.5)
        );
        assert_eq!(
            ParseBoolPipe.transform(json!("TRUE"), &meta("flag")).await.unwrap(),
            json!(true)
        );
        assert_eq!(
            ParseBoolPipe.transform(json!("0"), &meta("flag")).await.unwrap(),
            json!(false)
        );
        assert!(ParseBoolPipe.transform(json!("maybe"), &meta("flag")).await.is_err());
    }

    #[tokio::test]
    async fn test_positive() {
        assert_eq!(PositivePipe.transform(json!(5), &meta("id")).await.unwrap(), json!(5));

        let err = PositivePipe.transform(json!(-1), &meta("id")).await.unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert_eq!(field_of(err), ("id".to_string(), "isPositive".to_string()));
    }

    #[tokio::test]
    async fn test_default_and_trim() {
        let pipe = DefaultValuePipe::new(1);
        assert_eq!(pipe.transform(Value::Null, &meta("page")).await.unwrap(), json!(1));
        assert_eq!(pipe.transform(json!("3"), &meta("page")).await.unwrap(), json!("3"));

        assert_eq!(TrimPipe.transform(json!("  ada "), &meta("name")).await.unwrap(), json!("ada"));
        assert_eq!(TrimPipe.transform(json!(7), &meta("name")).await.unwrap(), json!(7));
    }

    #[tokio::test]
    async fn test_rules_pipe_reports_argument_name() {
        let pipe = RulesPipe::new(ValidationRules::for_field("value").add(crate::IsEmail::validate));
        assert!(pipe.transform(json!("a@b.io"), &meta("email")).await.is_ok());

        let err = pipe.transform(json!("nope"), &meta("email")).await.unwrap_err();
        assert_eq!(field_of(err), ("email".to_string(), "isEmail".to_string()));
    }

    #[derive(Deserialize)]
    struct CreateUser {
        name: String,
    }

    impl Validate for CreateUser {
        fn validate(&self) -> Result<(), Vec<FieldError>> {
            crate::collect_errors([crate::MinLength(2).validate(&self.name, "name")])
        }
    }

    #[tokio::test]
    async fn test_validation_pipe() {
        let pipe = ValidationPipe::<CreateUser>::new();

        let valid = json!({"name": "ada"});
        assert_eq!(pipe.transform(valid.clone(), &meta("body")).await.unwrap(), valid);

        let err = pipe.transform(json!({"name": "a"}), &meta("body")).await.unwrap_err();
        assert_eq!(field_of(err), ("name".to_string(), "minLength".to_string()));

        let err = pipe.transform(json!({"nom": "ada"}), &meta("body")).await.unwrap_err();
        assert_eq!(field_of(err), ("body".to_string(), "type".to_string()));
    }
}
