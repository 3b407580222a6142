// Built-in field validators

use girder_core::FieldError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt::Display;

static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$")
        .expect("email pattern is valid")
});

static URL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://[^\s/$.?#].[^\s]*$").expect("url pattern is valid"));

static UUID_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .expect("uuid pattern is valid")
});

static ALPHANUMERIC_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9]+$").expect("alphanumeric pattern is valid"));

// String validators

/// Rejects empty or whitespace-only strings
pub struct NotEmpty;

impl NotEmpty {
    pub fn validate(value: &str, field: &str) -> Result<(), FieldError> {
        if value.trim().is_empty() {
            Err(FieldError::new(field, format!("{field} should not be empty")).with_constraint("notEmpty"))
        } else {
            Ok(())
        }
    }
}

/// Minimum length in characters
pub struct MinLength(pub usize);

impl MinLength {
    pub fn validate(&self, value: &str, field: &str) -> Result<(), FieldError> {
        if value.chars().count() < self.0 {
            Err(
                FieldError::new(field, format!("{field} must be at least {} characters", self.0))
                    .with_constraint("minLength")
                    .with_value(value),
            )
        } else {
            Ok(())
        }
    }
}

/// Maximum length in characters
pub struct MaxLength(pub usize);

impl MaxLength {
    pub fn validate(&self, value: &str, field: &str) -> Result<(), FieldError> {
        if value.chars().count() > self.0 {
            Err(
                FieldError::new(field, format!("{field} must be at most {} characters", self.0))
                    .with_constraint("maxLength")
                    .with_value(value),
            )
        } else {
            Ok(())
        }
    }
}

pub struct IsEmail;

impl IsEmail {
    pub fn validate(value: &str, field: &str) -> Result<(), FieldError> {
        matches_pattern(&EMAIL_REGEX, value, field, "must be a valid email", "isEmail")
    }
}

pub struct IsUrl;

impl IsUrl {
    pub fn validate(value: &str, field: &str) -> Result<(), FieldError> {
        matches_pattern(&URL_REGEX, value, field, "must be a valid URL", "isUrl")
    }
}

pub struct IsUuid;

impl IsUuid {
    pub fn validate(value: &str, field: &str) -> Result<(), FieldError> {
        matches_pattern(&UUID_REGEX, value, field, "must be a valid UUID", "isUuid")
    }
}

pub struct IsAlphanumeric;

impl IsAlphanumeric {
    pub fn validate(value: &str, field: &str) -> Result<(), FieldError> {
        matches_pattern(
            &ALPHANUMERIC_REGEX,
            value,
            field,
            "must contain only letters and numbers",
            "isAlphanumeric",
        )
    }
}

fn matches_pattern(
    regex: &Regex,
    value: &str,
    field: &str,
    message: &str,
    constraint: &str,
) -> Result<(), FieldError> {
    if regex.is_match(value) {
        Ok(())
    } else {
        Err(FieldError::new(field, format!("{field} {message}"))
            .with_constraint(constraint)
            .with_value(value))
    }
}

// Number validators

/// Inclusive lower bound
pub struct Min<T>(pub T);

impl<T: PartialOrd + Display> Min<T> {
    pub fn validate(&self, value: T, field: &str) -> Result<(), FieldError> {
        if value < self.0 {
            Err(FieldError::new(field, format!("{field} must be at least {}", self.0))
                .with_constraint("min")
                .with_value(value.to_string()))
        } else {
            Ok(())
        }
    }
}

/// Inclusive upper bound
pub struct Max<T>(pub T);

impl<T: PartialOrd + Display> Max<T> {
    pub fn validate(&self, value: T, field: &str) -> Result<(), FieldError> {
        if value > self.0 {
            Err(FieldError::new(field, format!("{field} must be at most {}", self.0))
                .with_constraint("max")
                .with_value(value.to_string()))
        } else {
            Ok(())
        }
    }
}

/// Inclusive range
pub struct InRange<T> {
    pub min: T,
    pub max: T,
}

impl<T: PartialOrd + Display> InRange<T> {
    pub fn validate(&self, value: T, field: &str) -> Result<(), FieldError> {
        if value >= self.min && value <= self.max {
            Ok(())
        } else {
            Err(FieldError::new(
                field,
                format!("{field} must be between {} and {}", self.min, self.max),
            )
            .with_constraint("inRange")
            .with_value(value.to_string()))
        }
    }
}

/// Strictly greater than zero
pub struct IsPositive;

impl IsPositive {
    pub fn validate<T: PartialOrd + Default + Display>(value: T, field: &str) -> Result<(), FieldError> {
        if value > T::default() {
            Ok(())
        } else {
            Err(FieldError::new(field, format!("{field} must be a positive number"))
                .with_constraint("isPositive")
                .with_value(value.to_string()))
        }
    }
}
