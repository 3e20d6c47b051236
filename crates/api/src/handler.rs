use crate::RequestContext;
use crate::body::BoxError;
use crate::fn_trait::HandlerFn;
use async_trait::async_trait;
use std::fmt;

/// What a handler returns: `Ok` once it has written its response, or the error that
/// stopped it.
pub type HandlerResult = Result<(), BoxError>;

/// Handles one request by writing a response into the context.
///
/// Errors are not written by the handler itself; they propagate to the dispatcher,
/// which turns them into an error response.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn invoke(&self, ctx: &mut RequestContext) -> HandlerResult;
}

/// a `HandlerFn` holder which represents any async fn taking `&mut RequestContext`
pub struct FnHandler<F> {
    f: F,
}

impl<F> FnHandler<F>
where
    F: for<'ctx> HandlerFn<'ctx>,
{
    fn new(f: F) -> Self {
        Self { f }
    }
}

pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: for<'ctx> HandlerFn<'ctx>,
{
    FnHandler::new(f)
}

#[async_trait]
impl<F> RequestHandler for FnHandler<F>
where
    F: for<'ctx> HandlerFn<'ctx> + Send + Sync,
{
    async fn invoke(&self, ctx: &mut RequestContext) -> HandlerResult {
        self.f.call(ctx).await
    }
}

impl<F> fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler").field("fn", &std::any::type_name::<F>()).finish()
    }
}
