// Guards for route protection

use crate::{Error, RequestContext};
use async_trait::async_trait;

/// Guard trait for protecting routes
///
/// Guards run strictly in declared order, controller-level before
/// method-level. Returning `Ok(false)` rejects with 403; returning an error
/// rejects with that error when it is a 401 or 403, and with 403 otherwise.
/// Either way no later guard runs.
#[async_trait]
pub trait Guard: Send + Sync {
    /// Determine if the request can proceed
    async fn can_activate(&self, ctx: &RequestContext) -> Result<bool, Error>;
}

/// Bearer token extracted by [`AuthorizationHeaderGuard`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerToken(pub String);

/// Authenticated identity, attached by an authentication guard and read by
/// [`RolesGuard`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub subject: String,
    pub roles: Vec<String>,
}

impl Principal {
    pub fn new(subject: impl Into<String>, roles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            subject: subject.into(),
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

type TokenValidator = Box<dyn Fn(&str) -> Option<Principal> + Send + Sync>;

/// Requires an `Authorization: Bearer <token>` header.
///
/// On success the token is attached to the context as a [`BearerToken`],
/// plus a [`Principal`] when a validator is configured.
#[derive(Default)]
pub struct AuthorizationHeaderGuard {
    validator: Option<TokenValidator>,
}

impl AuthorizationHeaderGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the token to a principal; `None` rejects with 401.
    pub fn with_validator<F>(validator: F) -> Self
    where
        F: Fn(&str) -> Option<Principal> + Send + Sync + 'static,
    {
        Self {
            validator: Some(Box::new(validator)),
        }
    }
}

#[async_trait]
impl Guard for AuthorizationHeaderGuard {
    async fn can_activate(&self, ctx: &RequestContext) -> Result<bool, Error> {
        let header = ctx
            .header("authorization")
            .ok_or_else(|| Error::Unauthorized("Missing authorization header".to_string()))?;

        let token = header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Unauthorized("Invalid authorization header".to_string()))?;

        if let Some(validator) = &self.validator {
            let principal = validator(token)
                .ok_or_else(|| Error::Unauthorized("Invalid token".to_string()))?;
            ctx.insert(principal);
        }
        ctx.insert(BearerToken(token.to_string()));
        Ok(true)
    }
}

/// Requires a known API key in a header (`x-api-key` by default).
pub struct ApiKeyGuard {
    header: String,
    valid_keys: Vec<String>,
}

impl ApiKeyGuard {
    pub fn new(keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            header: "x-api-key".to_string(),
            valid_keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    pub fn header(mut self, name: &str) -> Self {
        self.header = name.to_ascii_lowercase();
        self
    }
}

#[async_trait]
impl Guard for ApiKeyGuard {
    async fn can_activate(&self, ctx: &RequestContext) -> Result<bool, Error> {
        let api_key = ctx
            .header(&self.header)
            .ok_or_else(|| Error::Unauthorized("Missing API key".to_string()))?;

        if self.valid_keys.contains(api_key) {
            Ok(true)
        } else {
            Err(Error::Forbidden("Invalid API key".to_string()))
        }
    }
}

/// Role-based guard
///
/// Passes when the [`Principal`] attached by an earlier guard holds any of
/// the required roles.
pub struct RolesGuard {
    required_roles: Vec<String>,
}

impl RolesGuard {
    pub fn new(roles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            required_roles: roles.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl Guard for RolesGuard {
    async fn can_activate(&self, ctx: &RequestContext) -> Result<bool, Error> {
        let principal = ctx
            .get::<Principal>()
            .ok_or_else(|| Error::Unauthorized("Not authenticated".to_string()))?;

        Ok(self
            .required_roles
            .iter()
            .any(|role| principal.has_role(role)))
    }
}

/// Guard backed by a closure
pub struct FnGuard<F>
where
    F: Fn(&RequestContext) -> Result<bool, Error> + Send + Sync,
{
    predicate: F,
}

impl<F> FnGuard<F>
where
    F: Fn(&RequestContext) -> Result<bool, Error> + Send + Sync,
{
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

#[async_trait]
impl<F> Guard for FnGuard<F>
where
    F: Fn(&RequestContext) -> Result<bool, Error> + Send + Sync,
{
    async fn can_activate(&self, ctx: &RequestContext) -> Result<bool, Error> {
        (self.predicate)(ctx)
    }
}
