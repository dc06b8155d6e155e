mod format;
mod formatting;
mod rotating;

use derivative::Derivative;
use format::RecordFormat;
use futures::prelude::*;
use rotating::{FileSink, RotatingFile};
use std::io;
use std::path::PathBuf;
use tracing::instrument::{WithDispatch, WithSubscriber};
use tracing::Dispatch;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;

pub use formatting::tracing_err;

pub(crate) mod prelude {
    pub(crate) use super::formatting::tracing_err;

    // We don't care if some of the imports here are not used. They may be used
    // at some point. It's just convenient not to import them manually all the
    // time a new logging macro is needed.
    #[allow(unused_imports)]
    pub(crate) use tracing::{debug, error, info, trace, warn};
}

/// Path of the log file when the output is `file`, but no path was given
pub const DEFAULT_LOG_FILE: &str = "logs/app.log";

/// Minimal severity of the records that pass through the logger
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, strum::EnumString, strum::Display,
)]
#[strum(serialize_all = "lowercase")]
pub enum Level {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl Level {
    /// Never fails. Everything after `#` is considered a comment, the case
    /// and the surrounding whitespace are ignored. Unknown values fall back
    /// to [`Level::Info`].
    pub fn parse_lenient(input: &str) -> Level {
        let input = input.to_lowercase();
        let input = input.split('#').next().unwrap_or_default().trim();
        input.parse().unwrap_or_default()
    }
}

impl From<Level> for LevelFilter {
    fn from(level: Level) -> Self {
        match level {
            Level::Debug => LevelFilter::DEBUG,
            Level::Info => LevelFilter::INFO,
            Level::Warn => LevelFilter::WARN,
            Level::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::EnumString, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum OutputTarget {
    #[default]
    Stdout,
    Stderr,
    File,
}

impl OutputTarget {
    /// Case-insensitive. Unknown and empty values fall back to [`OutputTarget::Stdout`].
    pub fn parse_lenient(input: &str) -> OutputTarget {
        input.trim().to_lowercase().parse().unwrap_or_default()
    }
}

#[derive(Derivative, Default)]
#[derivative(Debug)]
pub struct LoggerConfig {
    /// One of `debug`, `info`, `warn`, `error`, see [`Level::parse_lenient`]
    pub level: String,

    /// One of `stdout`, `stderr`, `file`, see [`OutputTarget::parse_lenient`]
    pub output: String,

    /// Used only when the output is `file`. Defaults to [`DEFAULT_LOG_FILE`].
    pub file: Option<PathBuf>,

    pub json: bool,

    /// Adds `source=file:line` of the call site to every record
    pub add_source: bool,

    /// Overrides [`LoggerConfig::output`] if set
    #[derivative(Debug = "ignore")]
    pub writer: Option<BoxMakeWriter>,
}

/// The sink selected from [`LoggerConfig::output`] when there is no custom writer
#[derive(Debug, Clone, PartialEq, Eq)]
enum SinkTarget {
    Stdout,
    Stderr,
    File(PathBuf),
}

impl SinkTarget {
    fn from_config(cfg: &LoggerConfig) -> Self {
        match OutputTarget::parse_lenient(&cfg.output) {
            OutputTarget::Stdout => Self::Stdout,
            OutputTarget::Stderr => Self::Stderr,
            OutputTarget::File => {
                let path = cfg
                    .file
                    .clone()
                    .filter(|path| !path.as_os_str().is_empty())
                    .unwrap_or_else(|| DEFAULT_LOG_FILE.into());
                Self::File(path)
            }
        }
    }

    fn open(self) -> (BoxMakeWriter, Option<FileSink>) {
        match self {
            Self::Stdout => (BoxMakeWriter::new(io::stdout), None),
            Self::Stderr => (BoxMakeWriter::new(io::stderr), None),
            Self::File(path) => {
                let sink = FileSink::new(RotatingFile::new(path));
                let writer = sink.clone();
                (BoxMakeWriter::new(move || writer.clone()), Some(sink))
            }
        }
    }
}

/// Structured logger. Cloning it is cheap, all clones write to the same sink.
///
/// The logger is not installed globally. Code that logs must run under
/// [`Logger::in_scope`] or [`Logger::scope`].
#[derive(Clone)]
pub struct Logger {
    dispatch: Dispatch,

    /// Set only when the sink is a file
    closer: Option<FileSink>,
}

impl Logger {
    /// Never fails. Invalid values in the config fall back to their defaults.
    pub fn new(mut cfg: LoggerConfig) -> Self {
        let level = Level::parse_lenient(&cfg.level);

        let (writer, closer) = match cfg.writer.take() {
            Some(writer) => (writer, None),
            None => SinkTarget::from_config(&cfg).open(),
        };

        let format = RecordFormat {
            json: cfg.json,
            add_source: cfg.add_source,
        };

        let fmt = tracing_subscriber::fmt::layer()
            .event_format(format)
            .with_writer(writer)
            .with_filter(LevelFilter::from(level));

        let subscriber = tracing_subscriber::registry()
            .with(fmt)
            .with(tracing_error::ErrorLayer::default());

        Self {
            dispatch: Dispatch::new(subscriber),
            closer,
        }
    }

    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    /// Runs the closure with this logger receiving all of its records
    pub fn in_scope<R>(&self, f: impl FnOnce() -> R) -> R {
        tracing::dispatcher::with_default(self.dispatch(), f)
    }

    /// Makes this logger receive all records emitted during every poll of the future
    pub fn scope<F: Future>(&self, fut: F) -> WithDispatch<F> {
        fut.with_subscriber(self.dispatch().clone())
    }

    /// Releases the log file if there is one. Can be called any number of
    /// times. The next write after closing reopens the file.
    pub fn close(&self) -> io::Result<()> {
        match &self.closer {
            Some(file) => file.close(),
            None => Ok(()),
        }
    }

    #[cfg(test)]
    pub(crate) fn is_file_backed(&self) -> bool {
        self.closer.is_some()
    }
}
