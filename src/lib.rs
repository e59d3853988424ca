//! # tabula
//!
//! Fixed-width binary tables of 64-bit floats, stored through pluggable storage engines.
//!
//! A table is a header-less sequence of rows. Every row holds the same number of little-endian
//! `f64` values, so the row count follows from the file size and any row range maps to one byte
//! range:
//!
//! ```text
//! byte_offset(row) = row * num_columns * 8
//! ```
//!
//! ## Storage engines
//!
//! [`StorageEngine`] abstracts over where the bytes live:
//!
//! - [`FileSystemStorageEngine`] stores files below a local directory and pools file handles,
//!   closing them after an idle timeout.
//! - `S3StorageEngine` (feature `s3`, on by default) stores objects in an S3 compatible
//!   bucket and can presign download and upload links.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tabula::{FileSystemStorageEngine, StorageEngine, TabularData};
//!
//! # async fn run() -> Result<(), tabula::TabularError> {
//! let engine: Arc<dyn StorageEngine> = Arc::new(FileSystemStorageEngine::new("/tmp/tables"));
//!
//! let mut writer = TabularData::create_write_stream(engine.as_ref(), "sensor.bin", None);
//! for i in 0..100 {
//!     writer.send(&[f64::from(i), f64::from(i * i)]).await?;
//! }
//! writer.finish().await?;
//!
//! let table = TabularData::open(engine, "sensor.bin", 2).await?;
//! assert_eq!(table.num_rows()?, 100);
//! assert_eq!(table.row(3).await?, vec![3.0, 9.0]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Streams
//!
//! Reads and writes can be streamed. Read streams yield [`Bytes`](bytes::Bytes) chunks of
//! arbitrary length, which [`RowDecoder`] reassembles into rows. Write streams are
//! [`ByteSink`]s that report backpressure from `write` and expose the drain signal as
//! [`ByteSink::ready`]. The [`stream`] module has the small typed pipeline toolkit these are
//! built from.

#![deny(clippy::all, clippy::pedantic)]
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::new_without_default,
    clippy::return_self_not_must_use
)]

mod error;
pub mod storage;
pub mod stream;
pub mod tabular;

pub use error::{StorageError, TabularError};
#[cfg(feature = "s3")]
pub use storage::{PresignOptions, S3Config, S3StorageEngine};
pub use storage::{
    ByteStream, FileHandlePool, FileSystemStorageEngine, FileSystemStorageEngineBuilder,
    ReadOptions, ReadResult, ReadStreamOptions, StorageEngine, join_path,
};
pub use stream::{ByteSink, ChunkWriter, Stage, tee, through};
pub use tabular::{Row, RowAccumulator, RowCount, RowDecoder, RowEncoder, RowStream, RowWriter, TabularData};
