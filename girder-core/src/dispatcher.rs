// Request dispatch: guard -> interceptor -> pipe -> handler -> interceptor

use crate::handler::{Arg, Args, HandlerCall};
use crate::routing::{Binding, CompiledParam, parse_query};
use crate::{
    ArgumentMetadata, CompiledRouteTable, Container, Error, FieldError, HttpMethod, HttpRequest,
    HttpResponse, Interceptor, Next, ParamBinding, ParamSource, RequestContext, Result,
    ValidationErrors,
};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use http::StatusCode;
use serde_json::{Map, Value, json};
use std::any::Any;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{Instrument, debug, error, info_span, warn};
use uuid::Uuid;

static NULL: Value = Value::Null;

/// Knobs for turning errors into responses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOptions {
    /// Add the full error chain as `"detail"` to error bodies. Development only.
    pub expose_error_details: bool,
}

/// Executes requests against one compiled route table.
///
/// Immutable once built; an application swaps in a new dispatcher on
/// reload rather than mutating this one.
pub struct RequestDispatcher {
    table: Arc<CompiledRouteTable>,
    container: Container,
    options: DispatchOptions,
}

impl RequestDispatcher {
    pub fn new(table: Arc<CompiledRouteTable>, container: Container, options: DispatchOptions) -> Self {
        Self {
            table,
            container,
            options,
        }
    }

    pub fn table(&self) -> &Arc<CompiledRouteTable> {
        &self.table
    }

    pub fn container(&self) -> &Container {
        &self.container
    }

    pub fn options(&self) -> DispatchOptions {
        self.options
    }

    /// Run one request through the pipeline.
    ///
    /// Never fails: every error, panics included, is rendered as a JSON
    /// error response.
    pub async fn dispatch(&self, request: HttpRequest) -> HttpResponse {
        let request_id = Uuid::new_v4();
        let span = info_span!(
            "request",
            request_id = %request_id,
            method = %request.method,
            path = %request.path,
        );

        async move {
            let outcome = AssertUnwindSafe(self.process(request_id, request))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(Error::Internal(panic_message(panic))));

            match outcome {
                Ok(response) => {
                    debug!(status = response.status, "Request completed");
                    response
                }
                Err(e) => self.render_error(&e),
            }
        }
        .instrument(span)
        .await
    }

    /// Like [`dispatch`](Self::dispatch), but gives up when `abort`
    /// completes first. Request-scoped instances are released either way.
    pub async fn dispatch_cancellable<F>(&self, request: HttpRequest, abort: F) -> Option<HttpResponse>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            response = self.dispatch(request) => Some(response),
            _ = abort => {
                debug!("Request cancelled");
                None
            }
        }
    }

    /// Render an error as `{"statusCode", "error", "message"}`.
    pub fn render_error(&self, error: &Error) -> HttpResponse {
        let status = error.status_code();
        if error.is_server_error() {
            error!(status, error = %error, "Request failed");
        } else {
            debug!(status, error = %error, "Request rejected");
        }

        let reason = StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("Error");
        let mut body = json!({
            "statusCode": status,
            "error": reason,
            "message": error.public_message(),
        });
        if let Error::Validation(errors) = error {
            body["errors"] = errors.to_json();
        }
        if self.options.expose_error_details {
            body["detail"] = Value::String(error_chain(error));
        }

        HttpResponse::new(status)
            .with_json(&body)
            .unwrap_or_else(|_| HttpResponse::new(status))
    }

    async fn process(&self, id: Uuid, mut request: HttpRequest) -> Result<HttpResponse> {
        if let Some(index) = request.path.find('?') {
            let query = request.path.split_off(index);
            request.query_params.extend(parse_query(&query[1..]));
        }

        let not_found = |request: &HttpRequest| {
            Error::NotFound(format!("Cannot {} {}", request.method, request.path))
        };
        let method = HttpMethod::from_str(&request.method).ok_or_else(|| not_found(&request))?;
        let matched = self
            .table
            .lookup(method, &request.path)
            .ok_or_else(|| not_found(&request))?;
        request.path_params = matched.params;

        let ctx = RequestContext::new(
            id,
            Arc::new(request),
            matched.route,
            self.container.create_scope(),
        );

        let result = if ctx.compiled().is_fast_path() {
            invoke_handler(&ctx).await
        } else {
            run_pipeline(&ctx).await
        };

        let failures = ctx.scope().close();
        if !failures.is_empty() {
            debug!(count = failures.len(), "Request scope released with teardown failures");
        }
        result
    }
}

async fn run_pipeline(ctx: &RequestContext) -> Result<HttpResponse> {
    for binding in ctx.compiled().guards() {
        let guard = binding.get(ctx.scope())?;
        match guard.can_activate(ctx).await {
            Ok(true) => {}
            Ok(false) => return Err(Error::Forbidden("Forbidden resource".to_string())),
            Err(e @ (Error::Unauthorized(_) | Error::Forbidden(_))) => return Err(e),
            Err(Error::Http { status, message }) if status == 401 || status == 403 => {
                return Err(Error::Http { status, message });
            }
            Err(e) => {
                warn!(error = %e, "Guard raised an unexpected error");
                return Err(Error::Forbidden("Forbidden resource".to_string()));
            }
        }
    }

    run_chain(ctx, ctx.compiled().interceptors()).await
}

/// Run `remaining` interceptors around the handler.
pub(crate) fn run_chain<'a>(
    ctx: &'a RequestContext,
    remaining: &'a [Binding<dyn Interceptor>],
) -> BoxFuture<'a, Result<HttpResponse>> {
    Box::pin(async move {
        match remaining.split_first() {
            Some((first, rest)) => {
                let interceptor = first.get(ctx.scope())?;
                interceptor.intercept(ctx, Next::new(ctx, rest)).await
            }
            None => invoke_handler(ctx).await,
        }
    })
}

async fn invoke_handler(ctx: &RequestContext) -> Result<HttpResponse> {
    let route = ctx.compiled();
    let mut body = None;
    let mut args = Vec::with_capacity(route.param_count());

    for (index, param) in route.params().iter().enumerate() {
        let arg = match param.binding.source {
            ParamSource::RawRequest => Arg::RawRequest(ctx.request_arc()),
            ParamSource::RawResponse => Arg::RawResponse(ctx.response().clone()),
            _ => {
                let raw = extract_value(ctx.request(), &param.binding, &mut body)?;
                Arg::Value(apply_pipes(ctx, param, index, raw).await?)
            }
        };
        args.push(arg);
    }

    let controller = route.controller(ctx.scope())?;
    let response = (route.handler())(HandlerCall {
        token: route.token().clone(),
        controller,
        args: Args::new(args),
    })
    .await?;

    Ok(ctx.response().apply(response))
}

fn extract_value(request: &HttpRequest, binding: &ParamBinding, body: &mut Option<Value>) -> Result<Value> {
    let key = binding.key.as_deref();
    Ok(match binding.source {
        ParamSource::Path => lookup_or_all(&request.path_params, key, |k| request.param(k)),
        ParamSource::Query => lookup_or_all(&request.query_params, key, |k| request.query(k)),
        ParamSource::Header => lookup_or_all(&request.headers, key, |k| request.header(k)),
        ParamSource::Body => {
            if body.is_none() {
                *body = Some(parse_body(request)?);
            }
            let parsed = body.as_ref().unwrap_or(&NULL);
            match key {
                Some(field) => parsed.get(field).cloned().unwrap_or(Value::Null),
                None => parsed.clone(),
            }
        }
        ParamSource::RawRequest | ParamSource::RawResponse => Value::Null,
    })
}

fn lookup_or_all<'r>(
    all: &HashMap<String, String>,
    key: Option<&str>,
    get: impl Fn(&str) -> Option<&'r String>,
) -> Value {
    match key {
        Some(key) => get(key).map_or(Value::Null, |v| Value::String(v.clone())),
        None => Value::Object(
            all.iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect::<Map<_, _>>(),
        ),
    }
}

fn parse_body(request: &HttpRequest) -> Result<Value> {
    if request.body.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(&request.body)
        .map_err(|e| Error::BadRequest(format!("Invalid JSON body: {e}")))
}

async fn apply_pipes(
    ctx: &RequestContext,
    param: &CompiledParam,
    index: usize,
    mut value: Value,
) -> Result<Value> {
    let meta = ArgumentMetadata {
        index,
        source: param.binding.source,
        key: param.binding.key.as_deref(),
    };
    for binding in &param.pipes {
        let pipe = binding.get(ctx.scope())?;
        value = pipe
            .transform(value, &meta)
            .await
            .map_err(|e| into_validation(e, meta.name()))?;
    }
    Ok(value)
}

/// Pipe failures become validation errors naming the argument. Server
/// errors (a pipe that failed to construct, say) keep their 5xx status.
fn into_validation(error: Error, name: &str) -> Error {
    match error {
        Error::Validation(mut errors) => {
            for field_error in &mut errors.errors {
                if field_error.field.is_empty() {
                    field_error.field = name.to_string();
                }
            }
            if errors.is_empty() {
                errors.add(FieldError::new(name, "Validation failed"));
            }
            Error::Validation(errors)
        }
        e if e.is_server_error() => e,
        e => Error::Validation(ValidationErrors::single(
            FieldError::new(name, e.public_message()).with_constraint("pipe"),
        )),
    }
}

fn error_chain(error: &Error) -> String {
    let mut detail = error.to_string();
    let mut source = StdError::source(error);
    while let Some(cause) = source {
        detail.push_str(": ");
        detail.push_str(&cause.to_string());
        source = StdError::source(cause);
    }
    detail
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("handler panicked: {message}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher(options: DispatchOptions) -> RequestDispatcher {
        RequestDispatcher::new(
            Arc::new(CompiledRouteTable::default()),
            Container::empty(),
            options,
        )
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let response = dispatcher(DispatchOptions::default())
            .dispatch(HttpRequest::new("GET", "/missing?x=1"))
            .await;
        assert_eq!(response.status, 404);
        let body: Value = response.body_json().unwrap();
        assert_eq!(body["statusCode"], 404);
        assert_eq!(body["error"], "Not Found");
        assert_eq!(body["message"], "Cannot GET /missing");
    }

    #[tokio::test]
    async fn test_unknown_verb_is_404() {
        let response = dispatcher(DispatchOptions::default())
            .dispatch(HttpRequest::new("BREW", "/coffee"))
            .await;
        assert_eq!(response.status, 404);
    }

    #[test]
    fn test_server_error_hides_detail_unless_exposed() {
        let error = Error::Constructor {
            token: "Db".into(),
            source: "connection refused".into(),
        };

        let hidden: Value = dispatcher(DispatchOptions::default())
            .render_error(&error)
            .body_json()
            .unwrap();
        assert_eq!(hidden["message"], "Internal server error");
        assert!(hidden.get("detail").is_none());

        let exposed: Value = dispatcher(DispatchOptions {
            expose_error_details: true,
        })
        .render_error(&error)
        .body_json()
        .unwrap();
        assert!(
            exposed["detail"]
                .as_str()
                .unwrap()
                .contains("connection refused")
        );
    }

    #[test]
    fn test_validation_body_lists_errors() {
        let error = Error::from(FieldError::new("id", "must be positive").with_constraint("positive"));
        let response = dispatcher(DispatchOptions::default()).render_error(&error);
        assert_eq!(response.status, 400);
        let body: Value = response.body_json().unwrap();
        assert_eq!(body["errors"][0]["field"], "id");
        assert_eq!(body["message"], "id: must be positive");
    }

    #[test]
    fn test_into_validation() {
        let named = into_validation(Error::BadRequest("not a number".into()), "id");
        match named {
            Error::Validation(errors) => {
                assert_eq!(errors.errors[0].field, "id");
                assert_eq!(errors.errors[0].message, "not a number");
            }
            other => panic!("unexpected error: {other}"),
        }

        let filled = into_validation(
            Error::Validation(ValidationErrors::single(FieldError::new("", "bad"))),
            "page",
        );
        assert!(matches!(filled, Error::Validation(ref e) if e.errors[0].field == "page"));

        let server = into_validation(Error::Internal("boom".into()), "id");
        assert_eq!(server.status_code(), 500);
    }

    #[test]
    fn test_extract_values() {
        let mut request = HttpRequest::new("POST", "/")
            .with_header("X-Trace", "t-1")
            .with_body(r#"{"name":"ada","age":36}"#);
        request.path_params.insert("id".into(), "7".into());
        request.query_params.insert("page".into(), "2".into());

        let mut body = None;
        let value = |binding: ParamBinding, body: &mut Option<Value>| {
            extract_value(&request, &binding, body).unwrap()
        };

        assert_eq!(value(ParamBinding::path("id"), &mut body), json!("7"));
        assert_eq!(value(ParamBinding::query("missing"), &mut body), Value::Null);
        assert_eq!(value(ParamBinding::query_all(), &mut body), json!({"page": "2"}));
        assert_eq!(value(ParamBinding::header("x-trace"), &mut body), json!("t-1"));
        assert_eq!(value(ParamBinding::body_field("age"), &mut body), json!(36));
        assert_eq!(value(ParamBinding::body(), &mut body)["name"], "ada");
    }

    #[test]
    fn test_invalid_body_is_bad_request() {
        let request = HttpRequest::new("POST", "/").with_body("{not json");
        let err = extract_value(&request, &ParamBinding::body(), &mut None).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }
}
