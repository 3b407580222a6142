//! Testing utilities for Girder applications.
//!
//! - [`TestAppBuilder`] compiles modules with provider overrides
//! - [`TestClient`] dispatches requests in-process
//! - [`MockService`] records calls on test doubles
//! - assertion helpers with readable failure output
//!
//! ```
//! use girder_core::{Args, ControllerBuilder, HttpResponse, ModuleBuilder, RouteBuilder};
//! use girder_testing::*;
//! use std::sync::Arc;
//!
//! struct Hello;
//!
//! # tokio_test::block_on(async {
//! let app = TestAppBuilder::new(
//!     ModuleBuilder::new("AppModule").controller(
//!         ControllerBuilder::new("Hello", |_| Ok(Hello)).route(
//!             RouteBuilder::get("/hello", "hello")
//!                 .to(|_: Arc<Hello>, _: Args| async { Ok(HttpResponse::ok().with_body("Hello!")) }),
//!         ),
//!     ),
//! )
//! .build()
//! .unwrap();
//!
//! let response = app.client().get("/hello").await;
//! assert_status(&response, 200);
//! assert_eq!(response.text(), "Hello!");
//! # });
//! ```

mod assertions;
mod mock;
mod test_app;
mod test_client;

pub use assertions::*;
pub use mock::*;
pub use test_app::*;
pub use test_client::*;
