//! Routing requests to handlers.
//!
//! Routes are kept in registration order and tried one after another; the first
//! pattern that matches the path wins, even if a later pattern would match too.
//! Once a pattern matched, the request is either handled by that route's handler
//! for the method, or rejected with `405 Method Not Allowed`.
//!
//! ```no_run
//! # use micro_api::{HandlerResult, RequestContext, handler_fn};
//! # use micro_api::router::{Router, get, post};
//! # async fn list_users(_: &mut RequestContext) -> HandlerResult { Ok(()) }
//! # async fn create_user(_: &mut RequestContext) -> HandlerResult { Ok(()) }
//! # async fn get_user(_: &mut RequestContext) -> HandlerResult { Ok(()) }
//! let router = Router::builder()
//!     .route("/users", get(handler_fn(list_users)).post(handler_fn(create_user)))
//!     .route("/users/{id}", get(handler_fn(get_user)))
//!     .build()
//!     .unwrap();
//! ```

pub mod path;

pub use path::{PathParams, PathPattern, PatternError};

use crate::handler::RequestHandler;
use http::{Method, StatusCode};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::trace;

type BoxedHandler = Arc<dyn RequestHandler>;

/// An ordered list of routes.
pub struct Router {
    routes: Vec<Route>,
}

struct Route {
    pattern: PathPattern,
    handlers: HashMap<Method, BoxedHandler>,
}

/// A successful lookup: the handler to run and the parameters taken from the path.
pub struct RouteMatch<'router> {
    handler: &'router BoxedHandler,
    params: PathParams,
    pattern: &'router PathPattern,
}

/// Why a request could not be routed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("no route matches {path}")]
    NotFound { path: String },

    #[error("method {method} is not allowed for {path}")]
    MethodNotAllowed { method: Method, path: String, allowed: Vec<Method> },
}

impl RouteError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RouteError::NotFound { .. } => StatusCode::NOT_FOUND,
            RouteError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
        }
    }

    /// The message sent to the client in the error body.
    pub fn client_message(&self) -> &'static str {
        match self {
            RouteError::NotFound { .. } => "Not Found",
            RouteError::MethodNotAllowed { .. } => "Method Not Allowed",
        }
    }
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    /// Finds the handler for `method` on `path`.
    ///
    /// Only the first route whose pattern matches is considered. If it has no handler
    /// for `method` the lookup fails with [`RouteError::MethodNotAllowed`] rather than
    /// falling through to later routes.
    pub fn resolve(&self, path: &str, method: &Method) -> Result<RouteMatch<'_>, RouteError> {
        let (route, params) = self
            .routes
            .iter()
            .find_map(|route| route.pattern.extract(path).map(|params| (route, params)))
            .ok_or_else(|| RouteError::NotFound { path: path.to_owned() })?;

        trace!(pattern = %route.pattern, path, "route matched");

        match route.handlers.get(method) {
            Some(handler) => Ok(RouteMatch { handler, params, pattern: &route.pattern }),
            None => Err(RouteError::MethodNotAllowed {
                method: method.clone(),
                path: path.to_owned(),
                allowed: route.allowed_methods(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// The registered patterns, in matching order.
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(|route| route.pattern.as_str())
    }
}

impl Route {
    fn allowed_methods(&self) -> Vec<Method> {
        let mut methods = self.handlers.keys().cloned().collect::<Vec<_>>();
        methods.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        methods
    }
}

impl<'router> RouteMatch<'router> {
    pub fn handler(&self) -> &'router dyn RequestHandler {
        &**self.handler
    }

    pub(crate) fn shared_handler(&self) -> BoxedHandler {
        Arc::clone(self.handler)
    }

    pub fn params(&self) -> &PathParams {
        &self.params
    }

    pub fn into_params(self) -> PathParams {
        self.params
    }

    pub fn pattern(&self) -> &'router PathPattern {
        self.pattern
    }
}

/// Collects routes and compiles their patterns.
pub struct RouterBuilder {
    entries: Vec<(String, MethodRouter)>,
}

impl RouterBuilder {
    fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Adds the handlers of `method_router` under `pattern`.
    ///
    /// A pattern that was already added keeps its position; the new handlers are merged
    /// into it and replace existing handlers for the same method.
    pub fn route(mut self, pattern: impl Into<String>, method_router: MethodRouter) -> Self {
        self.insert(pattern.into(), method_router);
        self
    }

    /// Registers a single handler, for callers that build the table in a loop.
    pub fn add_route<H: RequestHandler + 'static>(
        &mut self,
        pattern: impl Into<String>,
        method: Method,
        handler: H,
    ) -> &mut Self {
        self.insert(pattern.into(), MethodRouter::new().on(method, handler));
        self
    }

    /// Mounts every route of `routes` below `prefix`.
    ///
    /// A nested route `/` maps to the prefix itself.
    pub fn nest(mut self, prefix: &str, routes: RouterBuilder) -> Self {
        let prefix = prefix.trim_end_matches('/');
        for (pattern, method_router) in routes.entries {
            let joined = match pattern.as_str() {
                "/" | "" if !prefix.is_empty() => prefix.to_owned(),
                _ => format!("{prefix}{pattern}"),
            };
            self.insert(joined, method_router);
        }
        self
    }

    /// Compiles every pattern, failing on the first one that is invalid.
    pub fn build(self) -> Result<Router, PatternError> {
        let routes = self
            .entries
            .into_iter()
            .map(|(pattern, method_router)| {
                Ok(Route { pattern: PathPattern::compile(pattern)?, handlers: method_router.handlers })
            })
            .collect::<Result<Vec<_>, PatternError>>()?;

        Ok(Router { routes })
    }

    fn insert(&mut self, pattern: String, method_router: MethodRouter) {
        match self.entries.iter_mut().find(|(existing, _)| *existing == pattern) {
            Some((_, existing)) => existing.handlers.extend(method_router.handlers),
            None => self.entries.push((pattern, method_router)),
        }
    }
}

/// The handlers of one route, keyed by method.
#[derive(Default)]
pub struct MethodRouter {
    handlers: HashMap<Method, BoxedHandler>,
}

impl MethodRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles `method` with `handler`, replacing any handler set before for it.
    pub fn on<H: RequestHandler + 'static>(mut self, method: Method, handler: H) -> Self {
        self.handlers.insert(method, Arc::new(handler));
        self
    }
}

macro_rules! method_router {
    ($method:ident, $method_const:ident) => {
        pub fn $method<H: RequestHandler + 'static>(handler: H) -> MethodRouter {
            MethodRouter::new().on(Method::$method_const, handler)
        }

        impl MethodRouter {
            pub fn $method<H: RequestHandler + 'static>(self, handler: H) -> Self {
                self.on(Method::$method_const, handler)
            }
        }
    };
}

method_router!(get, GET);
method_router!(post, POST);
method_router!(put, PUT);
method_router!(delete, DELETE);
method_router!(patch, PATCH);
method_router!(head, HEAD);
method_router!(options, OPTIONS);

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.routes.iter().map(|route| (route.pattern.as_str(), route.allowed_methods())))
            .finish()
    }
}

impl fmt::Debug for RouteMatch<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteMatch").field("pattern", &self.pattern.as_str()).field("params", &self.params).finish()
    }
}

impl fmt::Debug for RouterBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.iter().map(|(pattern, method_router)| (pattern, method_router))).finish()
    }
}

impl fmt::Debug for MethodRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}
