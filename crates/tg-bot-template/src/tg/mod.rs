//! Telegram bot client and the update processing loop

mod middleware;

use crate::app::BotRunner;
use crate::ctx::{Attr, Ctx};
use crate::observability::Logger;
use crate::prelude::*;
use crate::{ErrorKind, Result};
use async_trait::async_trait;
use middleware::Handler;
use std::convert::Infallible;
use std::fmt;
use std::time::Duration;
use teloxide::dispatching::Dispatcher;
use teloxide::requests::{Request, Requester};
use teloxide::types::Update;
use teloxide::Bot;

/// How often to retry the shutdown request if the dispatcher isn't running yet
const SHUTDOWN_RETRY_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone)]
pub struct Config {
    pub token: String,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config").field("token", &"<redacted>").finish()
    }
}

pub struct Telegram {
    bot: Bot,
    logger: Logger,
    handler: Handler,

    /// Attributes that every update context starts with
    base_attrs: Vec<Attr>,
}

impl Telegram {
    pub fn new(cfg: &crate::Config, logger: Logger) -> Result<Self> {
        let client = teloxide::net::default_reqwest_settings()
            .build()
            .map_err(err_ctx!(ErrorKind::HttpClient))?;

        let bot = Bot::with_client(cfg.tg.token.clone(), client);

        let handler = middleware::compose(
            &[middleware::recover, middleware::attach_update_id],
            middleware::handler(middleware::handle_update),
        );

        Ok(Self {
            bot,
            logger,
            handler,
            base_attrs: vec![Attr::new("component", "telegram")],
        })
    }

    /// Receives updates until the `ctx` is cancelled
    pub async fn start(&self, ctx: Ctx) -> Result {
        let ctx = ctx.with_attrs(self.base_attrs.iter().cloned());
        self.logger
            .scope(ctx.clone().scope(self.dispatch(ctx)))
            .await
    }

    async fn dispatch(&self, ctx: Ctx) -> Result {
        // The dispatcher panics if it can't fetch the bot's info, so a bad
        // token or an unreachable API has to be detected beforehand
        let me = self
            .bot
            .get_me()
            .send()
            .await
            .map_err(err_ctx!(ErrorKind::Tg))?;

        let handler = self.handler.clone();
        let logger = self.logger.clone();
        let update_ctx = ctx.clone();

        let endpoint = dptree::endpoint(move |bot: Bot, update: Update| {
            let fut = handler(update_ctx.clone(), bot, update);
            let fut = logger.scope(fut);
            async move {
                fut.await;
                Ok::<_, Infallible>(())
            }
        });

        let mut dispatcher = Dispatcher::builder(self.bot.clone(), endpoint)
            // We don't handle all possible updates, so to suppress the warning
            // about unhandled ones we have a noop default handler here
            .default_handler(|_| std::future::ready(()))
            .build();

        let token = dispatcher.shutdown_token();

        // The shutdown future isn't awaited, `dispatch` returns once it's done
        let request_shutdown = move || token.shutdown().is_ok();

        let watcher = tokio::spawn(
            self.logger
                .scope(ctx.clone().scope(shutdown_on_cancel(ctx, request_shutdown))),
        );

        info!(bot_id = me.user.id.0, "Starting telegram bot");

        dispatcher.dispatch().await;

        watcher.abort();

        info!("Bot stopped");

        Ok(())
    }
}

/// Waits for the cancellation and then requests the shutdown until it is
/// accepted. The request is rejected while the dispatcher isn't running yet.
async fn shutdown_on_cancel(ctx: Ctx, mut request_shutdown: impl FnMut() -> bool) {
    ctx.cancelled().await;

    info!("Shutting down telegram bot");

    while !request_shutdown() {
        tokio::time::sleep(SHUTDOWN_RETRY_INTERVAL).await;
    }
}

#[async_trait]
impl BotRunner for Telegram {
    async fn start(&self, ctx: Ctx) -> Result {
        Telegram::start(self, ctx).await
    }
}
