// Pipes validate and transform one extracted handler argument

use crate::{Error, ParamSource};
use async_trait::async_trait;
use serde_json::Value;

/// Describes the argument a pipe is transforming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgumentMetadata<'a> {
    /// Position in the handler's argument list
    pub index: usize,
    pub source: ParamSource,
    /// Path/query/header name or body field, if the binding has one
    pub key: Option<&'a str>,
}

impl ArgumentMetadata<'_> {
    /// Name used in validation errors: the key, or the source for whole-body
    /// and whole-query bindings.
    pub fn name(&self) -> &str {
        self.key.unwrap_or(self.source.as_str())
    }
}

/// Pipe trait
///
/// Receives the raw extracted value (a JSON string for path, query and
/// header values, `null` when absent) and returns the value handed to the
/// next pipe or the handler. Any client error returned here rejects the
/// request with 400 naming the argument.
#[async_trait]
pub trait Pipe: Send + Sync {
    async fn transform(&self, value: Value, meta: &ArgumentMetadata<'_>) -> Result<Value, Error>;
}

/// Pipe backed by a closure
pub struct FnPipe<F>
where
    F: Fn(Value, &ArgumentMetadata<'_>) -> Result<Value, Error> + Send + Sync,
{
    transform: F,
}

impl<F> FnPipe<F>
where
    F: Fn(Value, &ArgumentMetadata<'_>) -> Result<Value, Error> + Send + Sync,
{
    pub fn new(transform: F) -> Self {
        Self { transform }
    }
}

#[async_trait]
impl<F> Pipe for FnPipe<F>
where
    F: Fn(Value, &ArgumentMetadata<'_>) -> Result<Value, Error> + Send + Sync,
{
    async fn transform(&self, value: Value, meta: &ArgumentMetadata<'_>) -> Result<Value, Error> {
        (self.transform)(value, meta)
    }
}
