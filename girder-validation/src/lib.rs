//! Parameter pipes and field validators for Girder.
//!
//! Pipes are registered as providers and attached to handler arguments by
//! token; they run after guards and interceptors, before the handler. A
//! failing pipe rejects the request with 400 and names the argument.
//!
//! # Examples
//!
//! ## Parsing and checking a path parameter
//!
//! ```
//! use girder_core::{Args, ControllerBuilder, HttpResponse, ModuleBuilder, ParamBinding, ProviderDescriptor, RouteBuilder};
//! use girder_validation::{ParseIntPipe, PositivePipe};
//! use std::sync::Arc;
//!
//! struct Users;
//!
//! let module = ModuleBuilder::new("UsersModule")
//!     .provider(ProviderDescriptor::pipe("ParseIntPipe", |_| Ok(ParseIntPipe)))
//!     .provider(ProviderDescriptor::pipe("PositivePipe", |_| Ok(PositivePipe)))
//!     .controller(
//!         ControllerBuilder::new("Users", |_| Ok(Users)).route(
//!             RouteBuilder::get("/users/:id", "show")
//!                 .param(ParamBinding::path("id").pipe("ParseIntPipe").pipe("PositivePipe"))
//!                 .to(|_: Arc<Users>, args: Args| async move {
//!                     let id: i64 = args.get(0)?;
//!                     Ok(HttpResponse::ok().with_body(id.to_string()))
//!                 }),
//!         ),
//!     );
//! # let _ = module;
//! ```
//!
//! ## Validating a DTO
//!
//! ```
//! use girder_core::FieldError;
//! use girder_validation::{collect_errors, IsEmail, MinLength, NotEmpty, Validate};
//!
//! struct UserInput {
//!     name: String,
//!     email: String,
//! }
//!
//! impl Validate for UserInput {
//!     fn validate(&self) -> Result<(), Vec<FieldError>> {
//!         collect_errors([
//!             NotEmpty::validate(&self.name, "name"),
//!             MinLength(3).validate(&self.name, "name"),
//!             IsEmail::validate(&self.email, "email"),
//!         ])
//!     }
//! }
//!
//! let input = UserInput {
//!     name: "John".to_string(),
//!     email: "john@example.com".to_string(),
//! };
//! assert!(input.validate().is_ok());
//! ```

mod pipes;
mod rules;
mod traits;
mod validators;

pub use girder_core::{FieldError, ValidationErrors};
pub use pipes::*;
pub use rules::*;
pub use traits::*;
pub use validators::*;
