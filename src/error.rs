use std::fmt;

/// The three fatal error kinds a queue operation can surface.
///
/// All three are fatal to the operation that raised them; `Topic::pop` with
/// `ignore_error = true` is the only place that swallows them.
#[derive(Debug)]
pub enum Error {
    /// A required filesystem call (open/read/write/seek/rename/flock/...)
    /// failed for a recoverable-but-surfaced reason.
    Io(std::io::Error),
    /// An on-disk structural invariant was violated: an index file whose
    /// size isn't a multiple of 4, a sequence mismatch in a record header,
    /// a CRC mismatch, or a `partitionIndex` entry with no matching `.dat`.
    FileError(&'static str),
    /// A directory could not be created, or a sentinel wait (`lock`,
    /// `delayRebuild`, `<topic>.lock`) exceeded its retry budget.
    CreateFailed(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "io error: {err}"),
            Error::FileError(msg) => write!(f, "file error: {msg}"),
            Error::CreateFailed(msg) => write!(f, "create failed: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::Io(value)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
