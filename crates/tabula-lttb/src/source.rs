use std::error::Error;
use std::pin::Pin;

use futures_util::{Stream, StreamExt};
use tabula::Row;

use crate::LttbError;
use crate::bucket::{ColumnPair, RowShape};

/// Pulls exactly `expected` rows from a row stream, validating each one.
pub(crate) struct RowPuller<S> {
    source: Pin<Box<S>>,
    pairs: Vec<ColumnPair>,
    shape: RowShape,
    expected: usize,
    received: usize,
}

impl<S, E> RowPuller<S>
where
    S: Stream<Item = Result<Row, E>>,
    E: Error + Send + Sync + 'static,
{
    pub(crate) fn new(source: S, expected: usize, pairs: Vec<ColumnPair>) -> Self {
        Self {
            source: Box::pin(source),
            pairs,
            shape: RowShape::default(),
            expected,
            received: 0,
        }
    }

    pub(crate) fn exhausted(&self) -> bool {
        self.received >= self.expected
    }

    /// Returns the next row. Fails if the source ends early.
    pub(crate) async fn next(&mut self) -> Result<Row, LttbError> {
        match self.source.next().await {
            Some(Ok(row)) => {
                self.shape.check(&row, &self.pairs)?;
                self.received += 1;
                Ok(row)
            }
            Some(Err(e)) => Err(LttbError::from_source(e)),
            None => Err(LttbError::UnexpectedEndOfData {
                expected: self.expected,
                received: self.received,
            }),
        }
    }

    /// Returns the next `count` rows.
    pub(crate) async fn take(&mut self, count: usize) -> Result<Vec<Row>, LttbError> {
        let mut rows = Vec::with_capacity(count);
        for _ in 0..count {
            rows.push(self.next().await?);
        }
        Ok(rows)
    }
}
