//! Decimation of stored tables.

use futures_util::stream::BoxStream;
use tabula::{StorageError, TabularData, TabularError};

use crate::batch::decimate_row_stream;
use crate::bucket::{ColumnPair, Point};
use crate::streaming::lttb_stream;
use crate::LttbError;

fn row_count(table: &TabularData) -> Result<usize, LttbError> {
    match table.num_rows()? {
        n if n < 0 => Err(TabularError::from(StorageError::FileNotFound(table.path().to_string())).into()),
        n => Ok(n as usize),
    }
}

/// Decimates every row of `table` to `threshold` points per column pair.
pub async fn decimate_table(
    table: &TabularData,
    threshold: usize,
    pairs: &[ColumnPair],
) -> Result<Vec<Vec<Point>>, LttbError> {
    let data_length = row_count(table)?;
    decimate_row_stream(table.stream(), data_length, threshold, pairs).await
}

/// Returns a lazy stream of the decimated points of one column pair of `table`.
pub fn stream_table(
    table: &TabularData,
    threshold: usize,
    pair: ColumnPair,
) -> Result<BoxStream<'static, Result<Point, LttbError>>, LttbError> {
    let data_length = row_count(table)?;
    Ok(lttb_stream(table.stream(), data_length, threshold, pair))
}
