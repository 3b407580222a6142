// Handler invocation with positionally bound arguments

use crate::{Error, HttpRequest, HttpResponse, Instance, ResponseDraft, Token};
use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// Type-erased route handler.
///
/// Receives the controller instance and the extracted, pipe-transformed
/// arguments in declaration order.
pub type HandlerFn = Arc<dyn Fn(HandlerCall) -> BoxFuture<'static, Result<HttpResponse, Error>> + Send + Sync>;

/// One handler invocation.
pub struct HandlerCall {
    /// Token the controller was resolved from
    pub token: Token,
    pub controller: Instance,
    pub args: Args,
}

/// A single bound argument.
#[derive(Debug, Clone)]
pub enum Arg {
    /// Path, query, header or body value after pipes
    Value(Value),
    RawRequest(Arc<HttpRequest>),
    RawResponse(ResponseDraft),
}

/// Positional handler arguments.
#[derive(Debug, Clone, Default)]
pub struct Args {
    values: Vec<Arg>,
}

impl Args {
    pub fn new(values: Vec<Arg>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The raw JSON value at `index`.
    pub fn value(&self, index: usize) -> Result<&Value, Error> {
        match self.values.get(index) {
            Some(Arg::Value(value)) => Ok(value),
            Some(_) => Err(Error::Internal(format!(
                "argument #{index} is a raw binding, not a value"
            ))),
            None => Err(missing(index, self.values.len())),
        }
    }

    /// Deserialize the argument at `index`.
    ///
    /// A value that does not fit `T` is the client's fault and maps to 400.
    pub fn get<T: DeserializeOwned>(&self, index: usize) -> Result<T, Error> {
        let value = self.value(index)?;
        T::deserialize(value)
            .map_err(|e| Error::BadRequest(format!("argument #{index}: {e}")))
    }

    pub fn request(&self, index: usize) -> Result<Arc<HttpRequest>, Error> {
        match self.values.get(index) {
            Some(Arg::RawRequest(request)) => Ok(request.clone()),
            Some(_) => Err(Error::Internal(format!(
                "argument #{index} is not the raw request"
            ))),
            None => Err(missing(index, self.values.len())),
        }
    }

    pub fn response(&self, index: usize) -> Result<ResponseDraft, Error> {
        match self.values.get(index) {
            Some(Arg::RawResponse(draft)) => Ok(draft.clone()),
            Some(_) => Err(Error::Internal(format!(
                "argument #{index} is not the raw response"
            ))),
            None => Err(missing(index, self.values.len())),
        }
    }
}

fn missing(index: usize, len: usize) -> Error {
    Error::Internal(format!("handler asked for argument #{index}, route binds {len}"))
}

/// Build a [`HandlerFn`] for a controller of type `C`.
///
/// ```
/// use girder_core::{handler, Args, HttpResponse};
/// use std::sync::Arc;
///
/// struct UsersController;
///
/// impl UsersController {
///     async fn show(&self, id: u64) -> Result<HttpResponse, girder_core::Error> {
///         HttpResponse::json(&serde_json::json!({ "id": id }))
///     }
/// }
///
/// let show = handler(|c: Arc<UsersController>, args: Args| async move {
///     c.show(args.get(0)?).await
/// });
/// ```
pub fn handler<C, F, Fut>(f: F) -> HandlerFn
where
    C: Send + Sync + 'static,
    F: Fn(Arc<C>, Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HttpResponse, Error>> + Send + 'static,
{
    Arc::new(move |call: HandlerCall| -> BoxFuture<'static, Result<HttpResponse, Error>> {
        match call.controller.downcast::<C>() {
            Some(controller) => Box::pin(f(controller, call.args)),
            None => {
                let error = Error::TypeMismatch {
                    token: call.token,
                    expected: std::any::type_name::<C>(),
                };
                Box::pin(async move { Err(error) })
            }
        }
    })
}
