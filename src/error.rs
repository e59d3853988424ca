use std::error::Error;
use std::fmt;
use std::io;

/// Errors raised by a [`StorageEngine`](crate::StorageEngine).
#[derive(Debug)]
pub enum StorageError {
    /// The file (or a component of its path) does not exist.
    FileNotFound(String),
    /// An underlying I/O error occurred.
    Io(io::Error),
    /// The stream was destroyed before it completed.
    Aborted,
    /// A write was attempted on a stream that has already terminated.
    StreamClosed,
    /// A byte range with `end < start` was requested.
    InvalidRange { start: u64, end: u64 },
    /// The remote storage backend reported an error.
    Backend(Box<dyn Error + Send + Sync>),
    /// The storage engine is misconfigured.
    Config(String),
}

impl StorageError {
    /// Wraps a backend specific error.
    pub fn backend<E>(err: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        StorageError::Backend(Box::new(err))
    }

    /// Returns true if this error signals a missing file.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::FileNotFound(_))
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::FileNotFound(path) => write!(f, "file not found: '{path}'"),
            StorageError::Io(e) => write!(f, "I/O error: {e}"),
            StorageError::Aborted => write!(f, "stream was destroyed"),
            StorageError::StreamClosed => write!(f, "stream is closed"),
            StorageError::InvalidRange { start, end } => {
                write!(f, "invalid byte range {start}..={end}")
            }
            StorageError::Backend(e) => write!(f, "storage backend error: {e}"),
            StorageError::Config(msg) => write!(f, "storage configuration error: {msg}"),
        }
    }
}

impl Error for StorageError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StorageError::Io(e) => Some(e),
            StorageError::Backend(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::Io(err)
    }
}

/// Errors raised while reading or writing tabular data.
#[derive(Debug)]
pub enum TabularError {
    /// The storage engine failed.
    Storage(StorageError),
    /// The file length is not a whole number of rows, or a decoded row was truncated.
    CorruptedFile { path: String, reason: String },
    /// A row did not have the number of values fixed for the table.
    ColumnMismatch { expected: usize, actual: usize },
    /// A row without any values was written.
    EmptyRow,
    /// A row range outside `0..num_rows` was requested.
    OutOfBounds { start: u64, end: u64, num_rows: u64 },
    /// The stream was destroyed by an earlier error.
    Destroyed,
}

impl TabularError {
    /// Returns true if the underlying file does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, TabularError::Storage(e) if e.is_not_found())
    }

    pub(crate) fn corrupted(path: &str, reason: impl Into<String>) -> Self {
        TabularError::CorruptedFile {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for TabularError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TabularError::Storage(e) => write!(f, "{e}"),
            TabularError::CorruptedFile { path, reason } => {
                write!(f, "corrupted file '{path}': {reason}")
            }
            TabularError::ColumnMismatch { expected, actual } => write!(
                f,
                "number of values ({actual}) does not match number of columns ({expected})"
            ),
            TabularError::EmptyRow => write!(f, "cannot write empty row"),
            TabularError::OutOfBounds {
                start,
                end,
                num_rows,
            } => write!(
                f,
                "row range {start}..{end} is out of bounds for a table with {num_rows} rows"
            ),
            TabularError::Destroyed => write!(f, "row stream was destroyed"),
        }
    }
}

impl Error for TabularError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TabularError::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StorageError> for TabularError {
    fn from(err: StorageError) -> Self {
        TabularError::Storage(err)
    }
}

impl From<io::Error> for TabularError {
    fn from(err: io::Error) -> Self {
        TabularError::Storage(StorageError::Io(err))
    }
}
