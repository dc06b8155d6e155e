use crate::ctx::Ctx;
use crate::observability::{Logger, LoggerConfig};
use crate::prelude::*;
use crate::{Config, Result};
use async_trait::async_trait;

/// Something that receives and processes updates until the context is cancelled
#[async_trait]
pub trait BotRunner: Send + Sync {
    async fn start(&self, ctx: Ctx) -> Result;
}

/// The assembled application. The constructors of its dependencies are
/// passed in explicitly, so there is no global state to set up.
pub struct App<B> {
    logger: Logger,
    bot: B,
}

impl<B: BotRunner> App<B> {
    pub fn new(
        mut cfg: Config,
        new_logger: impl FnOnce(LoggerConfig) -> Logger,
        new_bot: impl FnOnce(&Config, Logger) -> Result<B>,
    ) -> Result<Self> {
        // The logger config may own a custom writer, so it's moved out
        let logger = new_logger(std::mem::take(&mut cfg.logging));

        let bot = match new_bot(&cfg, logger.clone()) {
            Ok(bot) => bot,
            Err(err) => {
                // Best effort, the construction error is more important
                let _ = logger.close();
                return Err(err);
            }
        };

        Ok(Self { logger, bot })
    }

    /// Blocks until the bot stops
    pub async fn run(&self, ctx: Ctx) -> Result {
        self.bot.start(ctx).await
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Releases the resources held by the logger. Failures are only logged.
    pub fn close(self) {
        if let Err(err) = self.logger.close() {
            self.logger.in_scope(|| {
                warn!(err = tracing_err(&err), "Failed to close the logger");
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::logging::test_util::Capture;
    use crate::{tg, ConfigError, ErrorKind};
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct FakeBot {
        logger: Logger,
        started: Arc<AtomicBool>,
    }

    #[async_trait]
    impl BotRunner for FakeBot {
        async fn start(&self, ctx: Ctx) -> Result {
            self.started.store(true, Ordering::SeqCst);
            self.logger
                .scope(ctx.scope(async { info!("fake bot started") }))
                .await;
            Ok(())
        }
    }

    fn config() -> Config {
        Config {
            tg: tg::Config {
                token: "123456:TEST".to_owned(),
            },
            logging: LoggerConfig {
                level: "debug".to_owned(),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn bot_receives_the_injected_logger() {
        let capture = Capture::default();
        let started = Arc::new(AtomicBool::new(false));

        let app = App::new(
            config(),
            |cfg| {
                assert_eq!(cfg.level, "debug");
                capture.json_logger()
            },
            |_cfg, logger| {
                Ok(FakeBot {
                    logger,
                    started: started.clone(),
                })
            },
        )
        .unwrap();

        app.run(Ctx::background().with_attr("component", "fake"))
            .await
            .unwrap();

        app.logger().in_scope(|| info!("from the app"));
        app.close();

        assert!(started.load(Ordering::SeqCst));

        let lines = capture.lines();
        assert_eq!(lines.len(), 2, "{lines:#?}");
        assert!(lines[0].contains(r#""component":"fake""#), "{}", lines[0]);
        assert!(lines[1].contains(r#""msg":"from the app""#), "{}", lines[1]);
    }

    #[test]
    fn bot_construction_error_is_propagated() {
        let capture = Capture::default();

        let result = App::<FakeBot>::new(
            config(),
            |_| capture.json_logger(),
            |_, _| {
                Err(err!(ConfigError::MissingRequired {
                    var: crate::config::BOT_TOKEN_VAR
                }))
            },
        );

        let err = result.err().unwrap();
        assert_matches!(
            err.kind(),
            ErrorKind::Config {
                source: ConfigError::MissingRequired { .. }
            }
        );
    }
}
