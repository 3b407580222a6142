// Error types for the Girder framework

use crate::token::format_path;
use crate::{HttpMethod, Lifetime, Token};
use http::StatusCode;
use std::fmt;
use thiserror::Error;

/// Boxed error returned by factories, handlers and teardown hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    // Build-time errors. Any of these aborts startup.
    #[error("Unknown provider: `{token}`{}", required_by_suffix(.required_by))]
    UnknownProvider {
        token: Token,
        required_by: Option<Token>,
    },

    #[error("Circular dependency: {}", format_path(.path))]
    CircularDependency { path: Vec<Token> },

    #[error(
        "Module `{consumer}` consumes `{token}` from module `{producer}`, which does not export it"
    )]
    ModuleExportViolation {
        consumer: Token,
        producer: Token,
        token: Token,
    },

    #[error("Module `{module}` exports `{token}`, which it neither provides nor imports")]
    InvalidExport { module: Token, token: Token },

    #[error("Unknown module: `{module}`{}", imported_by_suffix(.imported_by))]
    UnknownModule {
        module: Token,
        imported_by: Option<Token>,
    },

    #[error("Route conflict: {method} {pattern} is declared by both `{existing}` and `{duplicate}`")]
    RouteConflict {
        method: HttpMethod,
        pattern: String,
        existing: String,
        duplicate: String,
    },

    #[error("Invalid route `{pattern}`: {reason}")]
    InvalidRoute { pattern: String, reason: String },

    #[error(
        "Scope violation: {lifetime} provider `{token}` depends on request-scoped `{dependency}`"
    )]
    ScopeViolation {
        token: Token,
        lifetime: Lifetime,
        dependency: Token,
    },

    // Resolution errors
    #[error("Failed to construct `{token}`: {source}")]
    Constructor {
        token: Token,
        #[source]
        source: BoxError,
    },

    #[error("Request-scoped provider `{token}` resolved outside of a request")]
    MissingRequestScope { token: Token },

    #[error("Provider `{token}` is not a {expected}")]
    TypeMismatch { token: Token, expected: &'static str },

    // Request-time errors
    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Handler error: {0}")]
    Handler(#[source] BoxError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Teardown of `{token}` failed: {source}")]
    Teardown {
        token: Token,
        #[source]
        source: BoxError,
    },
}

fn required_by_suffix(required_by: &Option<Token>) -> String {
    match required_by {
        Some(owner) => format!(" (required by `{}`)", owner),
        None => String::new(),
    }
}

fn imported_by_suffix(imported_by: &Option<Token>) -> String {
    match imported_by {
        Some(owner) => format!(" (imported by `{}`)", owner),
        None => String::new(),
    }
}

impl Error {
    /// Wrap any error raised by user code inside a handler or interceptor.
    pub fn handler<E>(error: E) -> Self
    where
        E: Into<BoxError>,
    {
        Error::Handler(error.into())
    }

    /// Raise an arbitrary HTTP status from user code.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Error::Http {
            status,
            message: message.into(),
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::NotFound(_) => StatusCode::NOT_FOUND.as_u16(),
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED.as_u16(),
            Error::Forbidden(_) => StatusCode::FORBIDDEN.as_u16(),
            Error::Validation(_) | Error::BadRequest(_) => StatusCode::BAD_REQUEST.as_u16(),
            Error::Http { status, .. } => *status,

            // Default to 500 for everything raised by the framework itself
            _ => StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
        }
    }

    /// Whether this error belongs to the build-time taxonomy and must halt boot.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::UnknownProvider { .. }
                | Error::CircularDependency { .. }
                | Error::ModuleExportViolation { .. }
                | Error::InvalidExport { .. }
                | Error::UnknownModule { .. }
                | Error::RouteConflict { .. }
                | Error::InvalidRoute { .. }
                | Error::ScopeViolation { .. }
        )
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }

    /// Message safe to show to clients.
    ///
    /// Server errors never leak their internals through this method.
    pub fn public_message(&self) -> String {
        match self {
            Error::NotFound(msg)
            | Error::Unauthorized(msg)
            | Error::Forbidden(msg)
            | Error::BadRequest(msg) => msg.clone(),
            Error::Validation(errors) if !errors.is_empty() => errors.to_string(),
            Error::Validation(_) => "Validation failed".to_string(),
            Error::Http { status, message } if *status < 500 => message.clone(),
            _ => "Internal server error".to_string(),
        }
    }
}

/// Validation error for a single field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Field or parameter name that failed validation
    pub field: String,

    /// Error message
    pub message: String,

    /// Validation constraint that failed
    pub constraint: String,

    /// Value that failed validation (optional)
    pub value: Option<String>,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            constraint: "custom".to_string(),
            value: None,
        }
    }

    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraint = constraint.into();
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Collection of field-level validation errors
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    pub errors: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn new(errors: Vec<FieldError>) -> Self {
        Self { errors }
    }

    /// A collection holding one error.
    pub fn single(error: FieldError) -> Self {
        Self::new(vec![error])
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn add(&mut self, error: FieldError) {
        self.errors.push(error);
    }

    /// Get errors for a specific field
    pub fn field_errors(&self, field: &str) -> Vec<&FieldError> {
        self.errors.iter().filter(|e| e.field == field).collect()
    }

    /// Convert to JSON representation
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Array(
            self.errors
                .iter()
                .map(|e| {
                    serde_json::json!({
                        "field": e.field,
                        "message": e.message,
                        "constraint": e.constraint,
                        "value": e.value,
                    })
                })
                .collect(),
        )
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        f.write_str(&joined)
    }
}

impl From<Vec<FieldError>> for ValidationErrors {
    fn from(errors: Vec<FieldError>) -> Self {
        Self::new(errors)
    }
}

impl From<FieldError> for Error {
    fn from(error: FieldError) -> Self {
        Error::Validation(ValidationErrors::single(error))
    }
}

impl From<ValidationErrors> for Error {
    fn from(errors: ValidationErrors) -> Self {
        Error::Validation(errors)
    }
}
