use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Machine-readable classification of every failure the pipeline reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Ingest,
    NotFound,
    Validation,
    Export,
    Storage,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Ingest => "ingest",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Validation => "validation",
            ErrorKind::Export => "export",
            ErrorKind::Storage => "storage",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// The video could not be opened or decoded.
    #[error("ingest failed: {0}")]
    Ingest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    /// Export preconditions were not met, or writing the tree failed.
    /// `created` lists the directories the failed export had created; they
    /// are removed on a best-effort basis, so check which still exist.
    #[error("export failed: {message}")]
    Export {
        message: String,
        created: Vec<PathBuf>,
    },

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Ingest(_) => ErrorKind::Ingest,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Validation(_) => ErrorKind::Validation,
            Error::Export { .. } => ErrorKind::Export,
            Error::Storage(_) | Error::Io { .. } => ErrorKind::Storage,
        }
    }

    pub fn export(message: impl Into<String>) -> Self {
        Error::Export {
            message: message.into(),
            created: Vec::new(),
        }
    }

    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Attach a human-readable context to an `io::Result`.
pub trait IoContext<T> {
    fn context<C: Into<String>>(self, context: C) -> Result<T>;
    fn with_context<C: Into<String>, F: FnOnce() -> C>(self, f: F) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn context<C: Into<String>>(self, context: C) -> Result<T> {
        self.map_err(|source| Error::io(context, source))
    }

    fn with_context<C: Into<String>, F: FnOnce() -> C>(self, f: F) -> Result<T> {
        self.map_err(|source| Error::io(f(), source))
    }
}
