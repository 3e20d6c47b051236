//! The single point where a request meets its handler.
//!
//! The dispatcher resolves the route, runs the handler on its own task and turns
//! every failure on the way into an error response, so each request gets exactly
//! one response no matter how its handler ends:
//!
//! | outcome                                | response                                      |
//! |----------------------------------------|-----------------------------------------------|
//! | no pattern matches                     | 404 `{"error": "Not Found"}`                  |
//! | pattern matches, method does not       | 405 `{"error": "Method Not Allowed"}` + Allow |
//! | context construction fails             | the error's status and message                |
//! | handler returns an error               | 500 `{"error": "Internal Server Error: …"}`   |
//! | handler panics                         | 500                                           |
//! | handler returns without responding     | 500                                           |

use crate::body::{BoxError, RequestBody, ResponseBody};
use crate::config::ServerConfig;
use crate::router::{RouteError, Router};
use crate::{RequestContext, responder};
use http::header::ALLOW;
use http::{HeaderValue, Request, Response, StatusCode};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};

/// Routes requests and runs their handlers with a bound on concurrency.
#[derive(Debug)]
pub struct Dispatcher {
    router: Arc<Router>,
    limiter: Arc<Semaphore>,
    tasks: TaskTracker,
    max_body_size: usize,
}

impl Dispatcher {
    pub fn new(router: Router, config: &ServerConfig) -> Self {
        Self {
            router: Arc::new(router),
            limiter: Arc::new(Semaphore::new(config.max_concurrent_requests)),
            tasks: TaskTracker::new(),
            max_body_size: config.max_body_size,
        }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Handles one request and returns its response.
    ///
    /// The handler runs on a spawned task, so a panic is contained there and
    /// answered with `500` instead of tearing down the connection. The task keeps
    /// running when the returned future is dropped; [`Self::wait`] waits for it.
    pub async fn dispatch(&self, request: Request<RequestBody>) -> Response<ResponseBody> {
        let method = request.method().clone();
        let path = request.uri().path().to_owned();

        let (handler, params) = match self.router.resolve(&path, &method) {
            Ok(matched) => (matched.shared_handler(), matched.into_params()),
            Err(e) => {
                debug!(%method, path = %path, cause = %e, "route not resolved");
                return route_error_response(&e);
            }
        };

        let Ok(permit) = Arc::clone(&self.limiter).acquire_owned().await else {
            return responder::error(StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable");
        };

        let max_body_size = self.max_body_size;
        let task = self.tasks.spawn(async move {
            let _permit = permit;

            let mut ctx = match RequestContext::new(request, params, max_body_size).await {
                Ok(ctx) => ctx,
                Err(e) => {
                    warn!(cause = %e, "failed to build request context");
                    return responder::error(e.status_code(), e.to_string());
                }
            };

            let result = handler.invoke(&mut ctx).await;
            complete(ctx.take_response(), result)
        });

        match task.await {
            Ok(response) => {
                debug!(%method, path = %path, status = response.status().as_u16(), "request dispatched");
                response
            }
            Err(e) => {
                error!(%method, path = %path, cause = %e, "handler task failed");
                responder::error(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error: handler panicked")
            }
        }
    }

    /// Stops handing out permits; requests still waiting for one get `503`.
    pub(crate) fn close(&self) {
        self.limiter.close();
        self.tasks.close();
    }

    /// Waits for every handler task after [`Self::close`].
    pub(crate) async fn wait(&self) {
        self.tasks.wait().await;
    }
}

fn complete(response: Option<Response<ResponseBody>>, result: Result<(), BoxError>) -> Response<ResponseBody> {
    match (response, result) {
        (Some(response), Ok(())) => response,
        (Some(response), Err(e)) => {
            warn!(cause = %e, "handler failed after responding, sending the committed response");
            response
        }
        (None, Err(e)) => handler_error_response(e.as_ref()),
        (None, Ok(())) => {
            error!("handler completed without a response");
            responder::error(StatusCode::INTERNAL_SERVER_ERROR, "handler completed without a response")
        }
    }
}

fn handler_error_response(e: &(dyn std::error::Error + Send + Sync + 'static)) -> Response<ResponseBody> {
    error!(cause = %e, "handler failed");
    responder::error(StatusCode::INTERNAL_SERVER_ERROR, format!("Internal Server Error: {e}"))
}

fn route_error_response(e: &RouteError) -> Response<ResponseBody> {
    let mut response = responder::error(e.status_code(), e.client_message());
    if let RouteError::MethodNotAllowed { allowed, .. } = e {
        let allow = allowed.iter().map(|method| method.as_str()).collect::<Vec<_>>().join(", ");
        if let Ok(value) = HeaderValue::from_str(&allow) {
            response.headers_mut().insert(ALLOW, value);
        }
    }
    response
}
