//! Panic hook and the recovery scope used to contain panics of update handlers.

use crate::ctx::Ctx;
use crate::prelude::*;
use crate::util::panic_message;
use futures::prelude::*;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::panic::AssertUnwindSafe;
use std::sync::Once;

tokio::task_local! {
    /// Present only inside of [`catch_panic`]. The panic hook stores the
    /// report here instead of logging it.
    static RECOVERY_SLOT: RefCell<Option<PanicReport>>;
}

/// Everything we know about a panic that was caught
#[derive(Debug)]
pub struct PanicReport {
    pub message: String,
    pub location: Option<String>,
    pub backtrace: Backtrace,

    /// The ambient context at the moment of the panic, if there was any
    pub ctx: Option<Ctx>,
}

/// Installs the panic hook once per process. The previous hook is preserved
/// and called for panics that happen outside of [`catch_panic`].
pub fn init_panic_hook() {
    static INIT: Once = Once::new();
    INIT.call_once(install_panic_hook);
}

fn install_panic_hook() {
    let current_hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |panic_info| {
        let report = PanicReport {
            message: panic_message(panic_info.payload()).to_owned(),
            location: panic_info.location().map(|location| {
                format!(
                    "{}:{}:{}",
                    location.file(),
                    location.line(),
                    location.column()
                )
            }),
            backtrace: Backtrace::force_capture(),
            ctx: Ctx::try_current(),
        };

        let mut report = Some(report);

        // Inside of the recovery scope the report is taken by `catch_panic`
        let _ = RECOVERY_SLOT.try_with(|slot| *slot.borrow_mut() = report.take());

        let Some(report) = report else {
            return;
        };

        // It's super-important to call the default panic hook, otherwise
        // we may not see it in the logs at all, because the panic may
        // happen inside of `tracing` logging system itself.
        // See the footgun: https://github.com/rust-itertools/itertools/issues/667
        current_hook(panic_info);

        let span_trace = tracing_error::SpanTrace::capture();

        error!(
            target: "panic",
            thread = std::thread::current().name(),
            location = report.location,
            span_trace = %span_trace,
            backtrace = format_args!("\n{}", report.backtrace),
            "{}",
            report.message,
        );
    }));
}

/// Polls the future until it completes or panics. The panic is not
/// propagated, it is returned as a report instead.
///
/// If the panic hook wasn't installed with [`init_panic_hook`], the backtrace
/// is captured at the point where the panic was caught and there is no
/// information about the ambient context of the panic site.
pub async fn catch_panic<F: Future>(fut: F) -> Result<F::Output, PanicReport> {
    let fut = async {
        let result = AssertUnwindSafe(fut).catch_unwind().await;
        result.map_err(|payload| {
            RECOVERY_SLOT
                .with(|slot| slot.take())
                .unwrap_or_else(|| PanicReport {
                    message: panic_message(payload.as_ref()).to_owned(),
                    location: None,
                    backtrace: Backtrace::force_capture(),
                    ctx: None,
                })
        })
    };

    RECOVERY_SLOT.scope(RefCell::new(None), fut).await
}
