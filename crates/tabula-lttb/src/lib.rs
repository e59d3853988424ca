//! # tabula-lttb
//!
//! Largest-Triangle-Three-Buckets decimation for tabula row streams.
//!
//! LTTB reduces a series of points to a fixed number of points while keeping its visual shape.
//! The first and last points are always kept. The rows in between are split into equally sized
//! buckets and from each bucket the point that spans the largest triangle with the previously
//! selected point and the average of the next bucket is kept.
//!
//! Two forms are provided:
//!
//! - **Batch** ([`decimate`], [`decimate_row_stream`]): decimates many x/y column pairs at once
//!   over a known number of rows. All pairs share bucket boundaries.
//! - **Streaming** ([`lttb_stream`]): turns a row stream into a lazy stream of points for one
//!   pair.
//!
//! Both forms produce identical output for the same input.
//!
//! ## Quick Start
//!
//! ```rust
//! use tabula_lttb::{decimate_pair, ColumnPair};
//!
//! let rows: Vec<Vec<f64>> = (0..10)
//!     .map(|x| vec![f64::from(x), [2.0, 4.0, 6.0, 8.0][x as usize % 4]])
//!     .collect();
//!
//! let points = decimate_pair(&rows, 5, ColumnPair::default()).unwrap();
//! assert_eq!(points.len(), 5);
//! assert_eq!(points[0], [0.0, 2.0]);
//! assert_eq!(points[4], [9.0, 4.0]);
//! ```
//!
//! ## Thresholds
//!
//! A threshold of 0, or one that is not smaller than the number of rows, skips decimation and
//! returns every row projected onto the selected columns. Thresholds of 1 and 2 are rejected
//! with [`LttbError::InvalidThreshold`].
//!
//! See <https://skemman.is/bitstream/1946/15343/3/SS_MSthesis.pdf>.

#![deny(clippy::all, clippy::pedantic)]
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod batch;
mod bucket;
mod error;
pub mod integration;
mod source;
pub mod streaming;

pub use batch::{decimate, decimate_pair, decimate_row_stream, decimate_row_stream_pair};
pub use bucket::{ColumnPair, Point};
pub use error::LttbError;
pub use integration::{decimate_table, stream_table};
pub use streaming::lttb_stream;
