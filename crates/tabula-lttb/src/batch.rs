//! LTTB over a known number of rows, for any number of column pairs at once.
//!
//! All pairs share the same bucket boundaries. Each pair keeps its own previously selected point
//! and output series.

use std::error::Error;

use futures_util::Stream;
use tabula::Row;

use crate::LttbError;
use crate::bucket::{Buckets, ColumnPair, Plan, Point, RowShape, select};
use crate::source::RowPuller;

/// Output series, one per column pair.
struct Selection<'p> {
    pairs: &'p [ColumnPair],
    outputs: Vec<Vec<Point>>,
}

impl<'p> Selection<'p> {
    fn new(pairs: &'p [ColumnPair], capacity: usize) -> Self {
        Self {
            pairs,
            outputs: pairs.iter().map(|_| Vec::with_capacity(capacity)).collect(),
        }
    }

    /// Emits the row unchanged for every pair.
    fn push_row(&mut self, row: &[f64]) {
        for (pair, output) in self.pairs.iter().zip(&mut self.outputs) {
            output.push(pair.point(row));
        }
    }

    /// Emits the point of `bucket` that spans the largest triangle with the previously selected
    /// point and the average of `next`.
    fn select_bucket<R: AsRef<[f64]>>(&mut self, bucket: &[R], next: &[R]) {
        for (pair, output) in self.pairs.iter().zip(&mut self.outputs) {
            let Some(&previous) = output.last() else {
                continue;
            };
            let average = [column_mean(next, pair.x), column_mean(next, pair.y)];
            let candidates = bucket.iter().map(|row| pair.point(row.as_ref()));
            if let Some(point) = select(previous, average, candidates) {
                output.push(point);
            }
        }
    }

    /// Emits the last row of the tail bucket.
    fn push_last<R: AsRef<[f64]>>(&mut self, tail: &[R]) {
        if let Some(row) = tail.last() {
            self.push_row(row.as_ref());
        }
    }
}

fn column_mean<R: AsRef<[f64]>>(rows: &[R], column: usize) -> f64 {
    let mut sum = 0.0;
    for row in rows {
        sum += row.as_ref()[column];
    }
    sum / rows.len() as f64
}

fn output_len(plan: Plan, data_length: usize) -> usize {
    match plan {
        Plan::PassThrough => data_length,
        Plan::Decimate(buckets) => buckets.threshold(),
    }
}

/// Decimates materialised rows to `threshold` points per column pair.
///
/// A threshold of 0, or one that is not smaller than the number of rows, returns every row
/// projected onto each pair.
pub fn decimate<R: AsRef<[f64]>>(
    rows: &[R],
    threshold: usize,
    pairs: &[ColumnPair],
) -> Result<Vec<Vec<Point>>, LttbError> {
    let plan = Plan::new(rows.len(), threshold)?;
    if pairs.is_empty() {
        return Err(LttbError::EmptySelection);
    }
    let mut shape = RowShape::default();
    for row in rows {
        shape.check(row.as_ref(), pairs)?;
    }

    let mut selection = Selection::new(pairs, output_len(plan, rows.len()));
    match plan {
        Plan::PassThrough => {
            for row in rows {
                selection.push_row(row.as_ref());
            }
        }
        Plan::Decimate(buckets) => {
            selection.push_row(rows[0].as_ref());
            for i in 1..buckets.threshold() - 1 {
                selection.select_bucket(&rows[buckets.range(i - 1)], &rows[buckets.range(i)]);
            }
            selection.push_last(&rows[buckets.range(buckets.threshold() - 2)]);
        }
    }
    Ok(selection.outputs)
}

/// Decimates materialised rows for a single column pair.
pub fn decimate_pair<R: AsRef<[f64]>>(
    rows: &[R],
    threshold: usize,
    pair: ColumnPair,
) -> Result<Vec<Point>, LttbError> {
    let mut outputs = decimate(rows, threshold, &[pair])?;
    Ok(outputs.pop().unwrap_or_default())
}

/// Decimates the first `data_length` rows of `source` to `threshold` points per column pair.
///
/// Rows are pulled one bucket ahead, so at most two buckets are held in memory. Fails with
/// [`LttbError::UnexpectedEndOfData`] if the source ends early. Rows after the first
/// `data_length` are not read.
pub async fn decimate_row_stream<S, E>(
    source: S,
    data_length: usize,
    threshold: usize,
    pairs: &[ColumnPair],
) -> Result<Vec<Vec<Point>>, LttbError>
where
    S: Stream<Item = Result<Row, E>>,
    E: Error + Send + Sync + 'static,
{
    let plan = Plan::new(data_length, threshold)?;
    if pairs.is_empty() {
        return Err(LttbError::EmptySelection);
    }

    let mut rows = RowPuller::new(source, data_length, pairs.to_vec());
    let mut selection = Selection::new(pairs, output_len(plan, data_length));
    match plan {
        Plan::PassThrough => {
            while !rows.exhausted() {
                selection.push_row(&rows.next().await?);
            }
        }
        Plan::Decimate(buckets) => decimate_buckets(&mut rows, buckets, &mut selection).await?,
    }
    Ok(selection.outputs)
}

async fn decimate_buckets<S, E>(
    rows: &mut RowPuller<S>,
    buckets: Buckets,
    selection: &mut Selection<'_>,
) -> Result<(), LttbError>
where
    S: Stream<Item = Result<Row, E>>,
    E: Error + Send + Sync + 'static,
{
    selection.push_row(&rows.next().await?);

    let mut next = rows.take(buckets.len(0)).await?;
    for i in 1..buckets.threshold() - 1 {
        let following = rows.take(buckets.len(i)).await?;
        let current = std::mem::replace(&mut next, following);
        selection.select_bucket(&current, &next);
    }
    selection.push_last(&next);
    Ok(())
}

/// Decimates a row stream for a single column pair.
pub async fn decimate_row_stream_pair<S, E>(
    source: S,
    data_length: usize,
    threshold: usize,
    pair: ColumnPair,
) -> Result<Vec<Point>, LttbError>
where
    S: Stream<Item = Result<Row, E>>,
    E: Error + Send + Sync + 'static,
{
    let mut outputs = decimate_row_stream(source, data_length, threshold, &[pair]).await?;
    Ok(outputs.pop().unwrap_or_default())
}
