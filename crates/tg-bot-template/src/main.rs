use futures::prelude::*;
use std::panic::AssertUnwindSafe;
use std::process::ExitCode;
use tg_bot_template::util::ErrorExt;
use tg_bot_template::{tracing_err, App, Config, Ctx, Logger, Telegram};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    println!("Starting bot app...");

    if dotenvy::dotenv().is_err() {
        eprintln!("Dotenv config was not found, ignoring this...")
    }

    let cfg = match Config::load() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("Failed to load config: {}", err.display_chain());
            return ExitCode::FAILURE;
        }
    };

    tg_bot_template::init_panic_hook();

    let cancel = CancellationToken::new();
    let ctx = Ctx::with_cancellation(cancel.clone());

    let app = match App::new(cfg, Logger::new, Telegram::new) {
        Ok(app) => app,
        Err(err) => {
            eprintln!("Failed to create the app: {}", err.display_chain());
            return ExitCode::FAILURE;
        }
    };

    let logger = app.logger().clone();

    tokio::spawn(logger.scope(async move {
        shutdown_signal().await;
        cancel.cancel();
    }));

    let result = AssertUnwindSafe(logger.scope(app.run(ctx)))
        .catch_unwind()
        .await;

    let exit_code = match result {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(err)) => {
            logger.in_scope(|| {
                error!(
                    err = tracing_err(&err),
                    err_id = err.id(),
                    "Exitting with an error..."
                );
            });
            ExitCode::FAILURE
        }
        Err(_) => {
            // The panic itself is already logged by the panic hook
            logger.in_scope(|| error!("Exitting due to a panic..."));
            ExitCode::FAILURE
        }
    };

    logger.in_scope(|| info!("application stopped"));

    app.close();

    exit_code
}

/// Resolves on the first SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(err = tracing_err(&err), "Failed to wait for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(err = tracing_err(&err), "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Ctrl+C received, shutting down..."),
        () = terminate => info!("SIGTERM received, shutting down..."),
    }
}
