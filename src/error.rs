use std::fmt::Display;

/// Errors surfaced by the storage engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// Persisted data failed a checksum, magic, or structural check.
    Corruption(String),
    /// An underlying filesystem operation failed.
    Io(String),
    /// The caller passed something unusable, e.g. an empty key.
    InvalidArgument(String),
    /// The database was written by an incompatible configuration.
    NotSupported(String),
    /// The advisory database lock could not be acquired.
    LockFailure(String),
    /// A previous background failure poisoned the database. Sticky until
    /// the database is closed.
    Background(String),
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Corruption(msg) => write!(f, "corruption: {msg}"),
            Error::Io(msg) => write!(f, "io error: {msg}"),
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Error::NotSupported(msg) => write!(f, "not supported: {msg}"),
            Error::LockFailure(msg) => write!(f, "lock failure: {msg}"),
            Error::Background(msg) => write!(f, "background error: {msg}"),
        }
    }
}

/// A stratadb Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::Io(err.to_string())
    }
}

/// Constructs an Error::Corruption from a format string.
#[macro_export]
macro_rules! corrupt {
    ($($args:tt)*) => { $crate::error::Error::Corruption(format!($($args)*)) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = Error::Corruption("bad block".to_string());
        assert_eq!(err.to_string(), "corruption: bad block");

        let err = Error::LockFailure("held by pid 42".to_string());
        assert_eq!(err.to_string(), "lock failure: held by pid 42");
    }

    #[test]
    fn test_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
