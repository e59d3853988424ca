//! Row-major binary tables.
//!
//! A table file is a plain sequence of rows, each made of `num_columns` little-endian `f64`
//! values. There is no header: the column count is supplied by the caller and the row count is
//! derived from the file size.

use std::fmt;
use std::sync::Arc;

use futures_util::stream::BoxStream;

use crate::TabularError;
use crate::storage::{ReadOptions, ReadStreamOptions, StorageEngine};
use crate::stream::through;

pub mod codec;
mod writer;

pub use codec::{BYTES_PER_VALUE, RowAccumulator, RowDecoder, RowEncoder};
pub use writer::RowWriter;

/// One row of a table.
pub type Row = Vec<f64>;

/// A stream of decoded rows.
pub type RowStream = BoxStream<'static, Result<Row, TabularError>>;

/// Row count of a table, derived from its file size when it was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowCount {
    /// The file does not exist.
    Missing,
    /// The file holds this many complete rows.
    Rows(u64),
    /// The file size is not a multiple of the row width.
    Corrupted { file_size: u64, row_width: u64 },
}

impl RowCount {
    fn from_size(file_size: u64, num_columns: usize) -> Self {
        let row_width = (num_columns * BYTES_PER_VALUE) as u64;
        if row_width == 0 {
            return RowCount::Rows(0);
        }
        if file_size % row_width != 0 {
            return RowCount::Corrupted {
                file_size,
                row_width,
            };
        }
        RowCount::Rows(file_size / row_width)
    }
}

/// A table stored through a [`StorageEngine`].
///
/// Opening a table computes its row count once. Row reads use that count for bounds checks, so
/// a table that is rewritten after opening must be opened again.
#[derive(Clone)]
pub struct TabularData {
    engine: Arc<dyn StorageEngine>,
    path: String,
    num_columns: usize,
    row_count: RowCount,
}

impl fmt::Debug for TabularData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TabularData")
            .field("path", &self.path)
            .field("num_columns", &self.num_columns)
            .field("row_count", &self.row_count)
            .finish()
    }
}

impl TabularData {
    /// Opens the table at `path`.
    ///
    /// Does not fail if the file is missing or its size is not a whole number of rows; row
    /// access on such a table fails instead.
    pub async fn open(
        engine: Arc<dyn StorageEngine>,
        path: impl Into<String>,
        num_columns: usize,
    ) -> Result<Self, TabularError> {
        let path = path.into();
        let row_count = match engine.size(&path).await {
            Ok(size) => RowCount::from_size(size, num_columns),
            Err(e) if e.is_not_found() => RowCount::Missing,
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            engine,
            path,
            num_columns,
            row_count,
        })
    }

    /// Returns a stream that decodes the rows of `path`.
    ///
    /// A table with zero columns yields no rows.
    pub fn create_read_stream(engine: &dyn StorageEngine, path: &str, num_columns: usize) -> RowStream {
        if num_columns == 0 {
            return Box::pin(futures_util::stream::empty());
        }
        let bytes = engine.create_read_stream(path, ReadStreamOptions::default());
        through(bytes, RowDecoder::new(path, num_columns))
    }

    /// Returns a writer that creates (or replaces) the table at `path`.
    ///
    /// If `num_columns` is `None` it is taken from the first row. Must be called from within a
    /// Tokio runtime.
    pub fn create_write_stream(
        engine: &dyn StorageEngine,
        path: &str,
        num_columns: Option<usize>,
    ) -> RowWriter {
        RowWriter::new(engine.create_write_stream(path), num_columns)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn num_columns(&self) -> usize {
        self.num_columns
    }

    pub fn engine(&self) -> &Arc<dyn StorageEngine> {
        &self.engine
    }

    pub fn row_count(&self) -> RowCount {
        self.row_count
    }

    /// Returns the number of rows, or -1 if the file does not exist.
    pub fn num_rows(&self) -> Result<i64, TabularError> {
        match self.row_count {
            RowCount::Missing => Ok(-1),
            RowCount::Rows(n) => Ok(n as i64),
            RowCount::Corrupted {
                file_size,
                row_width,
            } => Err(self.corrupted_size(file_size, row_width)),
        }
    }

    fn corrupted_size(&self, file_size: u64, row_width: u64) -> TabularError {
        TabularError::corrupted(
            &self.path,
            format!("size of {file_size} bytes is not a multiple of the row width of {row_width} bytes"),
        )
    }

    fn existing_rows(&self) -> Result<u64, TabularError> {
        match self.row_count {
            RowCount::Missing => Err(crate::StorageError::FileNotFound(self.path.clone()).into()),
            RowCount::Rows(n) => Ok(n),
            RowCount::Corrupted {
                file_size,
                row_width,
            } => Err(self.corrupted_size(file_size, row_width)),
        }
    }

    /// Byte offset of the first value of `row`.
    fn byte_offset(&self, row: u64) -> u64 {
        row * (self.num_columns * BYTES_PER_VALUE) as u64
    }

    /// Reads the rows `start..end` with a single read.
    pub async fn rows(&self, start: u64, end: u64) -> Result<Vec<Row>, TabularError> {
        let num_rows = self.existing_rows()?;
        if num_rows == 0 {
            return Ok(Vec::new());
        }
        if start >= end || end > num_rows {
            return Err(TabularError::OutOfBounds {
                start,
                end,
                num_rows,
            });
        }

        let position = self.byte_offset(start);
        let length = (self.byte_offset(end) - position) as usize;
        let result = self
            .engine
            .read(&self.path, ReadOptions::range(position, length))
            .await?;
        if result.bytes_read != length {
            return Err(TabularError::corrupted(
                &self.path,
                format!("expected {length} bytes at offset {position}, read {}", result.bytes_read),
            ));
        }

        Ok(result
            .bytes()
            .chunks_exact(self.num_columns * BYTES_PER_VALUE)
            .map(codec::decode_values)
            .collect())
    }

    /// Reads a single row.
    pub async fn row(&self, index: u64) -> Result<Row, TabularError> {
        let num_rows = self.existing_rows()?;
        let out_of_bounds = |end| TabularError::OutOfBounds {
            start: index,
            end,
            num_rows,
        };
        let end = index.checked_add(1).ok_or_else(|| out_of_bounds(index))?;
        self.rows(index, end).await?.pop().ok_or_else(|| out_of_bounds(end))
    }

    /// Reads every row into memory.
    pub async fn read_all(&self) -> Result<Vec<Row>, TabularError> {
        let num_rows = self.existing_rows()?;
        if num_rows == 0 {
            return Ok(Vec::new());
        }
        self.rows(0, num_rows).await
    }

    /// Returns a new stream over every row of the table.
    pub fn stream(&self) -> RowStream {
        Self::create_read_stream(self.engine.as_ref(), &self.path, self.num_columns)
    }

    /// Returns a writer that replaces the table's contents.
    pub fn writer(&self) -> RowWriter {
        Self::create_write_stream(self.engine.as_ref(), &self.path, Some(self.num_columns))
    }
}
