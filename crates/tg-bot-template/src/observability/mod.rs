pub(crate) mod logging;
pub(crate) mod panic;

pub use self::logging::{tracing_err, Level, Logger, LoggerConfig, OutputTarget, DEFAULT_LOG_FILE};
pub use self::panic::{catch_panic, init_panic_hook, PanicReport};
