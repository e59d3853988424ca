use crate::TabularError;
use crate::stream::ByteSink;

use super::codec::RowEncoder;

/// Writes rows to a storage write stream.
///
/// An invalid row destroys the writer and the underlying stream, so a file with mismatched rows
/// is never committed.
pub struct RowWriter {
    encoder: RowEncoder,
    sink: ByteSink,
    destroyed: bool,
}

impl RowWriter {
    pub(crate) fn new(sink: ByteSink, num_columns: Option<usize>) -> Self {
        Self {
            encoder: RowEncoder::new(num_columns),
            sink,
            destroyed: false,
        }
    }

    /// Number of values per row, once known.
    pub fn num_columns(&self) -> Option<usize> {
        self.encoder.num_columns()
    }

    /// Queues a row. Returns `Ok(false)` when the caller should wait for [`ready`](Self::ready).
    pub fn write(&mut self, row: &[f64]) -> Result<bool, TabularError> {
        if self.destroyed {
            return Err(TabularError::Destroyed);
        }
        match self.encoder.encode(row) {
            Ok(bytes) => Ok(self.sink.write(bytes)?),
            Err(e) => {
                self.destroy();
                Err(e)
            }
        }
    }

    /// Queues a row and waits for backpressure to clear.
    pub async fn send(&mut self, row: &[f64]) -> Result<(), TabularError> {
        if !self.write(row)? {
            self.ready().await;
        }
        Ok(())
    }

    /// Waits until the underlying stream accepts more data.
    pub async fn ready(&self) {
        self.sink.ready().await
    }

    /// Ends the stream and waits until every row has been committed.
    pub async fn finish(self) -> Result<(), TabularError> {
        if self.destroyed {
            return Err(TabularError::Destroyed);
        }
        self.sink.finish().await?;
        Ok(())
    }

    /// Discards the stream.
    pub fn destroy(&mut self) {
        if !self.destroyed {
            self.destroyed = true;
            self.sink.destroy();
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}
