use std::fmt;
use thiserror::Error as ThisError;

pub type Result<T> = std::result::Result<T, Error>;

type BoxedSource = Box<dyn std::error::Error + Send + Sync + 'static>;

// Aliased so the derive does not treat the field as a std backtrace to provide.
type Trace = backtrace::Backtrace;

/// Application level error carried up to the binary.
///
/// Domain crates keep their own `thiserror` enums and convert into this
/// type at the command boundary.
#[derive(ThisError)]
#[error("{msg}")]
pub struct Error {
    msg: String,
    #[source]
    source: Option<BoxedSource>,
    trace: Trace,
}

impl Error {
    pub fn new(msg: &str) -> Self {
        Self {
            msg: msg.to_string(),
            source: None,
            trace: Trace::new_unresolved(),
        }
    }

    pub fn with_source(msg: &str, source: BoxedSource) -> Self {
        Self {
            msg: msg.to_string(),
            source: Some(source),
            trace: Trace::new_unresolved(),
        }
    }

    pub fn message(&self) -> &str {
        &self.msg
    }

    /// Resolve symbols lazily; capturing is cheap, resolving is not.
    pub fn backtrace(&self) -> backtrace::Backtrace {
        let mut bt = self.trace.clone();
        bt.resolve();
        bt
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg)?;
        if let Some(source) = &self.source {
            write!(f, "\n  caused by: {}", source)?;
        }
        if cfg!(debug_assertions) {
            write!(f, "\n{:?}", self.backtrace())?;
        }
        Ok(())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::with_source("I/O error", Box::new(err))
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::with_source("Configuration error", Box::new(err))
    }
}

impl From<log::SetLoggerError> for Error {
    fn from(err: log::SetLoggerError) -> Self {
        Error::with_source("Failed to install logger", Box::new(err))
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::new(&format!("Configuration lock poisoned: {}", err))
    }
}
