//! A small routing and request/response layer on top of hyper.
//!
//! Declare routes with `{name}` placeholders, attach async handlers per method, and
//! let the [`Server`] run every request on its own task:
//!
//! ```no_run
//! use http::StatusCode;
//! use micro_api::router::{Router, get, post};
//! use micro_api::{HandlerResult, RequestContext, Server, handler_fn};
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct NewUser {
//!     name: String,
//! }
//!
//! async fn get_user(ctx: &mut RequestContext) -> HandlerResult {
//!     let id = ctx.path_param("id").unwrap_or_default().to_owned();
//!     ctx.respond(StatusCode::OK, &serde_json::json!({ "id": id }))?;
//!     Ok(())
//! }
//!
//! async fn create_user(ctx: &mut RequestContext) -> HandlerResult {
//!     let user: NewUser = ctx.receive().await?;
//!     ctx.respond_text(StatusCode::CREATED, format!("created {}", user.name))?;
//!     Ok(())
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let router = Router::builder()
//!         .route("/users", post(handler_fn(create_user)))
//!         .route("/users/{id}", get(handler_fn(get_user)))
//!         .build()?;
//!
//!     Server::builder()
//!         .address("127.0.0.1:8080")
//!         .router(router)
//!         .build()?
//!         .run(async { tokio::signal::ctrl_c().await.unwrap_or_default() })
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! Routes are matched in registration order and the first matching pattern wins.
//! Errors returned by handlers, and panics, never reach the connection: the
//! [`Dispatcher`] answers them with a JSON `{"error": "..."}` body.

mod body;
mod config;
mod dispatcher;
mod error;
mod fn_trait;
mod handler;
mod request;
mod responder;
mod server;

pub mod multipart;
pub mod router;

pub use body::{BoxError, RequestBody, ResponseBody, full_body, request_body};
pub use config::{DEFAULT_MAX_BODY_SIZE, DEFAULT_MAX_CONCURRENT_REQUESTS, DEFAULT_PORT, ServerConfig};
pub use dispatcher::Dispatcher;
pub use error::RequestError;
pub use fn_trait::HandlerFn;
pub use handler::{FnHandler, HandlerResult, RequestHandler, handler_fn};
pub use multipart::{FormField, FormFields};
pub use request::RequestContext;
pub use router::{PathParams, Router};
pub use server::{Server, ServerBuilder, ServerError, ServerHandle};
