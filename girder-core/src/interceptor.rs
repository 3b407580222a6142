// Interceptors wrapping handler execution

use crate::routing::Binding;
use crate::{Error, HttpResponse, RequestContext};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::fmt;
use std::time::Instant;
use tracing::{info, warn};

/// Continuation handed to an interceptor.
///
/// Calling [`Next::run`] executes every inner interceptor, the pipe stage
/// and the handler, and yields their combined result. An interceptor that
/// never calls it short-circuits the request with its own response.
pub struct Next<'a> {
    ctx: &'a RequestContext,
    remaining: &'a [Binding<dyn Interceptor>],
}

impl<'a> Next<'a> {
    pub(crate) fn new(ctx: &'a RequestContext, remaining: &'a [Binding<dyn Interceptor>]) -> Self {
        Self { ctx, remaining }
    }

    /// Run the rest of the pipeline.
    pub fn run(self) -> BoxFuture<'a, Result<HttpResponse, Error>> {
        crate::dispatcher::run_chain(self.ctx, self.remaining)
    }

    /// Number of interceptors still to run inside this one.
    pub fn depth(&self) -> usize {
        self.remaining.len()
    }
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next").field("depth", &self.depth()).finish()
    }
}

/// Interceptor trait for request/response transformation
///
/// Interceptors nest: the first one declared wraps all the others, the pipe
/// stage and the handler. Code before `next.run()` runs on the way in, code
/// after it on the way out, and an error raised by anything inside can be
/// caught and translated here.
#[async_trait]
pub trait Interceptor: Send + Sync {
    async fn intercept(&self, ctx: &RequestContext, next: Next<'_>) -> Result<HttpResponse, Error>;
}

/// Logs each request's outcome and latency.
pub struct LoggingInterceptor;

#[async_trait]
impl Interceptor for LoggingInterceptor {
    async fn intercept(&self, ctx: &RequestContext, next: Next<'_>) -> Result<HttpResponse, Error> {
        let start = Instant::now();
        let result = next.run().await;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        let route = ctx.route();
        match &result {
            Ok(response) => info!(
                method = %route.method,
                pattern = %route.pattern,
                status = response.status,
                elapsed_ms,
                "Request handled"
            ),
            Err(e) => warn!(
                method = %route.method,
                pattern = %route.pattern,
                status = e.status_code(),
                error = %e,
                elapsed_ms,
                "Request failed"
            ),
        }
        result
    }
}

/// Adds an `x-response-time` header with the inner pipeline's latency.
pub struct TimingInterceptor;

#[async_trait]
impl Interceptor for TimingInterceptor {
    async fn intercept(&self, _ctx: &RequestContext, next: Next<'_>) -> Result<HttpResponse, Error> {
        let start = Instant::now();
        let response = next.run().await?;
        let elapsed = start.elapsed();
        Ok(response.with_header(
            "x-response-time",
            format!("{:.3}ms", elapsed.as_secs_f64() * 1000.0),
        ))
    }
}

/// Transform interceptor for modifying successful responses
pub struct TransformInterceptor<F>
where
    F: Fn(HttpResponse) -> HttpResponse + Send + Sync,
{
    transform: F,
}

impl<F> TransformInterceptor<F>
where
    F: Fn(HttpResponse) -> HttpResponse + Send + Sync,
{
    pub fn new(transform: F) -> Self {
        Self { transform }
    }
}

#[async_trait]
impl<F> Interceptor for TransformInterceptor<F>
where
    F: Fn(HttpResponse) -> HttpResponse + Send + Sync,
{
    async fn intercept(&self, _ctx: &RequestContext, next: Next<'_>) -> Result<HttpResponse, Error> {
        let response = next.run().await?;
        Ok((self.transform)(response))
    }
}

/// Translates errors raised inside it.
///
/// The closure receives every error from the inner pipeline and returns
/// either a replacement response or the (possibly different) error to keep
/// propagating.
pub struct CatchInterceptor<F>
where
    F: Fn(Error) -> Result<HttpResponse, Error> + Send + Sync,
{
    handler: F,
}

impl<F> CatchInterceptor<F>
where
    F: Fn(Error) -> Result<HttpResponse, Error> + Send + Sync,
{
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl<F> Interceptor for CatchInterceptor<F>
where
    F: Fn(Error) -> Result<HttpResponse, Error> + Send + Sync,
{
    async fn intercept(&self, _ctx: &RequestContext, next: Next<'_>) -> Result<HttpResponse, Error> {
        next.run().await.or_else(|e| (self.handler)(e))
    }
}
