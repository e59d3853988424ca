use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};

use super::Row;
use crate::TabularError;
use crate::stream::Stage;

/// Number of bytes in one encoded value.
pub const BYTES_PER_VALUE: usize = 8;

/// Decodes consecutive little-endian `f64` values.
pub fn decode_values(bytes: &[u8]) -> Row {
    bytes
        .chunks_exact(BYTES_PER_VALUE)
        .map(|chunk| {
            let mut raw = [0u8; BYTES_PER_VALUE];
            raw.copy_from_slice(chunk);
            f64::from_le_bytes(raw)
        })
        .collect()
}

/// Appends `values` to `out` as little-endian `f64`s.
pub fn encode_values(values: &[f64], out: &mut BytesMut) {
    out.reserve(values.len() * BYTES_PER_VALUE);
    for value in values {
        out.extend_from_slice(&value.to_le_bytes());
    }
}

/// Reassembles rows from byte chunks of arbitrary length.
///
/// Bytes are appended to an internal buffer and whole rows are consumed from its front. The
/// consumed prefix is only compacted away once it makes up at least half of the buffer.
#[derive(Debug)]
pub struct RowAccumulator {
    buffer: Vec<u8>,
    consumed: usize,
    row_width: usize,
}

impl RowAccumulator {
    pub fn new(num_columns: usize) -> Self {
        Self {
            buffer: Vec::new(),
            consumed: 0,
            row_width: num_columns * BYTES_PER_VALUE,
        }
    }

    /// Appends a chunk.
    pub fn push(&mut self, chunk: &[u8]) {
        if self.consumed > 0 && self.consumed * 2 >= self.buffer.len() {
            self.buffer.drain(..self.consumed);
            self.consumed = 0;
        }
        self.buffer.extend_from_slice(chunk);
    }

    /// Removes and decodes the next complete row, if one is buffered.
    pub fn next_row(&mut self) -> Option<Row> {
        if self.row_width == 0 || self.buffered() < self.row_width {
            return None;
        }
        let start = self.consumed;
        self.consumed += self.row_width;
        Some(decode_values(&self.buffer[start..self.consumed]))
    }

    /// Number of bytes that have not been consumed as rows yet.
    pub fn buffered(&self) -> usize {
        self.buffer.len() - self.consumed
    }
}

/// Stage that turns byte chunks into rows.
///
/// Fails with [`TabularError::CorruptedFile`] if the input ends in the middle of a row.
pub struct RowDecoder {
    accumulator: RowAccumulator,
    path: String,
}

impl RowDecoder {
    pub fn new(path: impl Into<String>, num_columns: usize) -> Self {
        Self {
            accumulator: RowAccumulator::new(num_columns),
            path: path.into(),
        }
    }
}

impl Stage for RowDecoder {
    type Input = Bytes;
    type Output = Row;
    type Error = TabularError;

    fn process(&mut self, chunk: Bytes, out: &mut VecDeque<Row>) -> Result<(), TabularError> {
        self.accumulator.push(&chunk);
        while let Some(row) = self.accumulator.next_row() {
            out.push_back(row);
        }
        Ok(())
    }

    fn finish(&mut self, _out: &mut VecDeque<Row>) -> Result<(), TabularError> {
        match self.accumulator.buffered() {
            0 => Ok(()),
            leftover => Err(TabularError::corrupted(
                &self.path,
                format!("{leftover} trailing bytes do not form a complete row"),
            )),
        }
    }
}

/// Stage that turns rows into bytes.
///
/// The number of columns is either fixed up front or taken from the first row; every row must
/// then have exactly that many values.
#[derive(Debug, Default)]
pub struct RowEncoder {
    num_columns: Option<usize>,
}

impl RowEncoder {
    pub fn new(num_columns: Option<usize>) -> Self {
        Self { num_columns }
    }

    pub fn num_columns(&self) -> Option<usize> {
        self.num_columns
    }

    /// Encodes one row.
    pub fn encode(&mut self, row: &[f64]) -> Result<Bytes, TabularError> {
        if row.is_empty() {
            return Err(TabularError::EmptyRow);
        }
        let expected = *self.num_columns.get_or_insert(row.len());
        if row.len() != expected {
            return Err(TabularError::ColumnMismatch {
                expected,
                actual: row.len(),
            });
        }
        let mut out = BytesMut::with_capacity(row.len() * BYTES_PER_VALUE);
        encode_values(row, &mut out);
        Ok(out.freeze())
    }
}

impl Stage for RowEncoder {
    type Input = Row;
    type Output = Bytes;
    type Error = TabularError;

    fn process(&mut self, row: Row, out: &mut VecDeque<Bytes>) -> Result<(), TabularError> {
        out.push_back(self.encode(&row)?);
        Ok(())
    }
}
