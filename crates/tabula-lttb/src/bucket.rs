//! Bucket layout and triangle geometry shared by the batch and streaming decimators.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::LttbError;

/// An `[x, y]` pair.
pub type Point = [f64; 2];

/// Indices of the x and y columns of one series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnPair {
    pub x: usize,
    pub y: usize,
}

impl ColumnPair {
    pub const fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }

    pub(crate) fn point(self, row: &[f64]) -> Point {
        [row[self.x], row[self.y]]
    }

    pub(crate) fn check(self, row_len: usize) -> Result<(), LttbError> {
        for column in [self.x, self.y] {
            if column >= row_len {
                return Err(LttbError::ColumnOutOfRange { column, row_len });
            }
        }
        Ok(())
    }
}

impl Default for ColumnPair {
    fn default() -> Self {
        Self { x: 0, y: 1 }
    }
}

/// Bucket boundaries for decimating `data_length` rows to `threshold` points.
///
/// The first and last rows are kept as is. The interior is split into `threshold - 2` buckets
/// whose size is `every = (data_length - 2) / (threshold - 2)`. Bucket `i` covers the rows
/// `floor(i * every) + 1 .. floor((i + 1) * every) + 1`, clamped to `data_length`. Bucket
/// `threshold - 2` is the tail that ends with the last row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Buckets {
    data_length: usize,
    threshold: usize,
    every: f64,
}

impl Buckets {
    pub(crate) fn threshold(&self) -> usize {
        self.threshold
    }

    /// Rows covered by bucket `i`.
    pub(crate) fn range(&self, i: usize) -> Range<usize> {
        let start = (i as f64 * self.every).floor() as usize + 1;
        let end = ((i + 1) as f64 * self.every).floor() as usize + 1;
        start..end.min(self.data_length)
    }

    pub(crate) fn len(&self, i: usize) -> usize {
        let range = self.range(i);
        range.end.saturating_sub(range.start)
    }
}

/// How a series of `data_length` rows is reduced to `threshold` points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Plan {
    /// Every row is emitted.
    PassThrough,
    Decimate(Buckets),
}

impl Plan {
    /// A threshold of 0, or one that is not smaller than the data, keeps every row.
    pub(crate) fn new(data_length: usize, threshold: usize) -> Result<Self, LttbError> {
        match threshold {
            1 | 2 => Err(LttbError::InvalidThreshold { threshold }),
            0 => Ok(Plan::PassThrough),
            t if t >= data_length => Ok(Plan::PassThrough),
            t => Ok(Plan::Decimate(Buckets {
                data_length,
                threshold: t,
                every: (data_length - 2) as f64 / (t - 2) as f64,
            })),
        }
    }
}

/// Area of the triangle spanned by the previously selected point `a`, the candidate `b` and the
/// next bucket's average `c`.
pub(crate) fn triangle_area(a: Point, b: Point, c: Point) -> f64 {
    ((a[0] - c[0]) * (b[1] - a[1]) - (a[0] - b[0]) * (c[1] - a[1])).abs() * 0.5
}

/// Returns the point of `candidates` with the largest triangle area. Ties keep the earlier point.
///
/// Areas that are NaN never win, and if no area is comparable the first candidate is returned.
/// `None` only for an empty bucket.
pub(crate) fn select<I>(previous: Point, average: Point, candidates: I) -> Option<Point>
where
    I: IntoIterator<Item = Point>,
{
    let mut candidates = candidates.into_iter().peekable();
    let mut best = *candidates.peek()?;
    let mut max_area = f64::NEG_INFINITY;
    for candidate in candidates {
        let area = triangle_area(previous, candidate, average);
        if area > max_area {
            max_area = area;
            best = candidate;
        }
    }
    Some(best)
}

/// Enforces that all rows have the length of the first one.
#[derive(Debug, Default)]
pub(crate) struct RowShape {
    width: Option<usize>,
}

impl RowShape {
    /// Checks `row`. The first row fixes the width and is validated against `pairs`.
    pub(crate) fn check(&mut self, row: &[f64], pairs: &[ColumnPair]) -> Result<(), LttbError> {
        match self.width {
            Some(expected) if expected != row.len() => Err(LttbError::InconsistentRow {
                expected,
                actual: row.len(),
            }),
            Some(_) => Ok(()),
            None => {
                for pair in pairs {
                    pair.check(row.len())?;
                }
                self.width = Some(row.len());
                Ok(())
            }
        }
    }
}
