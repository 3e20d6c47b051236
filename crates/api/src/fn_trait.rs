use crate::RequestContext;
use crate::handler::HandlerResult;

/// Represents an async function that borrows the request context for the duration of
/// its future.
///
/// The lifetime is a parameter of the trait rather than of the function, so a plain
/// `async fn(&mut RequestContext) -> HandlerResult` implements `for<'ctx> HandlerFn<'ctx>`
/// even though the future it returns is a different type for every borrow:
///```no_run
/// # use micro_api::{HandlerResult, RequestContext};
/// # use http::StatusCode;
/// async fn health(ctx: &mut RequestContext) -> HandlerResult {
///     ctx.respond_text(StatusCode::OK, "ok")?;
///     Ok(())
/// }
///```
pub trait HandlerFn<'ctx>: Send + Sync {
    type Future: Future<Output = HandlerResult> + Send + 'ctx;

    fn call(&self, ctx: &'ctx mut RequestContext) -> Self::Future;
}

impl<'ctx, Func, Fut> HandlerFn<'ctx> for Func
where
    Func: Fn(&'ctx mut RequestContext) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'ctx,
{
    type Future = Fut;

    #[inline]
    fn call(&self, ctx: &'ctx mut RequestContext) -> Self::Future {
        (self)(ctx)
    }
}

#[cfg(test)]
mod tests {
    use crate::fn_trait::HandlerFn;
    use crate::handler::HandlerResult;
    use crate::RequestContext;
    use http::StatusCode;

    fn assert_is_handler_fn<F: for<'ctx> HandlerFn<'ctx>>(_f: F) {
        //noop
    }

    async fn noop(_ctx: &mut RequestContext) -> HandlerResult {
        Ok(())
    }

    async fn respond(ctx: &mut RequestContext) -> HandlerResult {
        ctx.respond_text(StatusCode::OK, "ok")?;
        Ok(())
    }

    async fn receive(ctx: &mut RequestContext) -> HandlerResult {
        let value: serde_json::Value = ctx.receive().await?;
        ctx.respond(StatusCode::OK, &value)?;
        Ok(())
    }

    #[test]
    fn test_fn_is_handler_fn() {
        assert_is_handler_fn(noop);
        assert_is_handler_fn(respond);
        assert_is_handler_fn(receive);
    }
}
