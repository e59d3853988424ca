use std::error::Error;
use std::fmt;

use tabula::TabularError;

/// Errors raised by the LTTB decimators.
#[derive(Debug)]
pub enum LttbError {
    /// The threshold is 1 or 2. A decimated series needs at least three points.
    InvalidThreshold { threshold: usize },
    /// No column pairs were selected.
    EmptySelection,
    /// The source ended before `data_length` rows were read.
    UnexpectedEndOfData { expected: usize, received: usize },
    /// A row had a different number of values than the first row.
    InconsistentRow { expected: usize, actual: usize },
    /// A selected column does not exist in the rows.
    ColumnOutOfRange { column: usize, row_len: usize },
    /// The row source failed.
    Source(Box<dyn Error + Send + Sync>),
}

impl LttbError {
    pub fn from_source<E>(err: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        LttbError::Source(Box::new(err))
    }
}

impl fmt::Display for LttbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LttbError::InvalidThreshold { threshold } => {
                write!(f, "threshold must be greater than 2, got {threshold}")
            }
            LttbError::EmptySelection => write!(f, "at least one column pair must be selected"),
            LttbError::UnexpectedEndOfData { expected, received } => write!(
                f,
                "unexpected end of data: expected {expected} rows, received {received}"
            ),
            LttbError::InconsistentRow { expected, actual } => write!(
                f,
                "inconsistent data: row has {actual} values, expected {expected}"
            ),
            LttbError::ColumnOutOfRange { column, row_len } => {
                write!(f, "column {column} is out of range for rows of length {row_len}")
            }
            LttbError::Source(e) => write!(f, "row source failed: {e}"),
        }
    }
}

impl Error for LttbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            LttbError::Source(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<TabularError> for LttbError {
    fn from(err: TabularError) -> Self {
        LttbError::from_source(err)
    }
}
