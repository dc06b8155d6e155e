//! Update handlers and middlewares that wrap them.
//!
//! A middleware is a plain function that takes the next handler and returns
//! a new handler. The chain is composed once at construction time.

use crate::ctx::Ctx;
use crate::observability::catch_panic;
use crate::prelude::*;
use futures::future::BoxFuture;
use futures::prelude::*;
use std::sync::Arc;
use teloxide::types::Update;
use teloxide::Bot;

pub(crate) type Handler = Arc<dyn Fn(Ctx, Bot, Update) -> BoxFuture<'static, ()> + Send + Sync>;

pub(crate) type Middleware = fn(Handler) -> Handler;

/// Applies the middlewares so that the first one in the list is the outermost
pub(crate) fn compose(middlewares: &[Middleware], handler: Handler) -> Handler {
    middlewares
        .iter()
        .rev()
        .fold(handler, |next, middleware| middleware(next))
}

pub(crate) fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Ctx, Bot, Update) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |ctx, bot, update| f(ctx, bot, update).boxed())
}

/// Default handler that receives every update
pub(crate) async fn handle_update(_ctx: Ctx, _bot: Bot, update: Update) {
    info!(update = ?update, "Handling update");
}

/// Contains panics of the next handler. The panic is logged and the update
/// is dropped.
pub(crate) fn recover(next: Handler) -> Handler {
    handler(move |ctx: Ctx, bot, update| {
        let next = next.clone();
        async move {
            let Err(report) = catch_panic(async { next(ctx.clone(), bot, update).await }).await
            else {
                return;
            };

            // Prefer the context of the panic site, it has more attributes
            let ctx = report.ctx.as_ref().unwrap_or(&ctx);

            ctx.in_scope(|| {
                error!(
                    error = report.message.as_str(),
                    location = report.location.as_deref(),
                    stack = %report.backtrace,
                    "Update handler panicked, the update is dropped",
                );
            });
        }
    })
}

/// Makes the id of the update show up in every log record of the next handler
pub(crate) fn attach_update_id(next: Handler) -> Handler {
    handler(move |ctx: Ctx, bot, update: Update| {
        let ctx = ctx.with_attr("update_id", update.id);
        ctx.clone().scope(next(ctx, bot, update))
    })
}
