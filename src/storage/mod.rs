//! Byte addressable storage engines.
//!
//! A [`StorageEngine`] reads and writes whole files, byte ranges and byte streams addressed by a
//! plain forward-slash separated path. Two engines are provided:
//!
//! - [`FileSystemStorageEngine`] stores files below a local directory and keeps recently used
//!   file handles open in a [`FileHandlePool`].
//! - `S3StorageEngine` (feature `s3`) stores objects in an S3 compatible bucket, reads byte
//!   ranges with `Range` requests and writes large files with multipart uploads.
//!
//! Operations on a missing path fail with [`StorageError::FileNotFound`]. Request style calls
//! return it directly, stream style calls yield it as the stream's error item (read streams) or
//! from [`ByteSink::finish`] (write streams).

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;

use crate::StorageError;
use crate::stream::ByteSink;

pub(crate) mod file_handle_pool;
pub(crate) mod filesystem;
#[cfg(feature = "s3")]
pub(crate) mod object_store;

pub use file_handle_pool::FileHandlePool;
pub use filesystem::{FileSystemStorageEngine, FileSystemStorageEngineBuilder};
#[cfg(feature = "s3")]
pub use object_store::{PresignOptions, S3Config, S3StorageEngine};

/// Number of bytes read by [`StorageEngine::read`] when neither a length nor a buffer is given.
pub const DEFAULT_READ_LENGTH: usize = 16 * 1024;

/// A stream of byte chunks. Chunk boundaries are arbitrary.
pub type ByteStream = BoxStream<'static, Result<Bytes, StorageError>>;

/// Options for [`StorageEngine::read`].
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// Byte offset to start reading from.
    pub position: u64,
    /// Number of bytes to read. Defaults to the buffer length, or [`DEFAULT_READ_LENGTH`].
    pub length: Option<usize>,
    /// Buffer to read into. It is grown if it is shorter than `length`.
    pub buffer: Option<Vec<u8>>,
}

impl ReadOptions {
    /// Reads `length` bytes starting at `position`.
    pub fn range(position: u64, length: usize) -> Self {
        Self {
            position,
            length: Some(length),
            buffer: None,
        }
    }

    /// Returns the buffer to read into, sized to hold the requested number of bytes, and that
    /// number.
    pub(crate) fn into_buffer(self) -> (Vec<u8>, usize) {
        let length = self
            .length
            .or_else(|| self.buffer.as_ref().map(Vec::len))
            .unwrap_or(DEFAULT_READ_LENGTH);
        let mut buffer = self.buffer.unwrap_or_default();
        if buffer.len() < length {
            buffer.resize(length, 0);
        }
        (buffer, length)
    }
}

/// Result of [`StorageEngine::read`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResult {
    /// The buffer that was read into. Only the first `bytes_read` bytes are meaningful.
    pub buffer: Vec<u8>,
    /// Number of bytes actually read. Less than requested when the end of the file was reached.
    pub bytes_read: usize,
}

impl ReadResult {
    /// The bytes that were read.
    pub fn bytes(&self) -> &[u8] {
        &self.buffer[..self.bytes_read]
    }
}

/// Options for [`StorageEngine::create_read_stream`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadStreamOptions {
    /// First byte to read (inclusive). Defaults to 0.
    pub start: Option<u64>,
    /// Last byte to read (inclusive). Defaults to the end of the file.
    pub end: Option<u64>,
    /// Amount of data the stream reads ahead before waiting for the consumer.
    ///
    /// This is a threshold, not a chunk size guarantee: consumers must tolerate chunks of any
    /// length.
    pub high_water_mark: Option<usize>,
}

impl ReadStreamOptions {
    pub(crate) fn validate(&self) -> Result<(), StorageError> {
        match (self.start, self.end) {
            (Some(start), Some(end)) if end < start => Err(StorageError::InvalidRange { start, end }),
            _ => Ok(()),
        }
    }
}

/// Basic I/O operations on named files.
///
/// Methods that operate on existing files fail with [`StorageError::FileNotFound`] if the file
/// does not exist.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Replaces the contents of `path` with `contents`, creating the file if needed.
    async fn write(&self, path: &str, contents: Bytes) -> Result<(), StorageError>;

    /// Reads a byte range of `path`.
    async fn read(&self, path: &str, options: ReadOptions) -> Result<ReadResult, StorageError>;

    /// Returns a stream over the bytes of `path`, optionally restricted to a byte range.
    ///
    /// The stream does not touch the storage until it is first polled. A missing file is
    /// reported as the stream's first (and only) item.
    fn create_read_stream(&self, path: &str, options: ReadStreamOptions) -> ByteStream;

    /// Returns a sink that writes a new file at `path`.
    ///
    /// Must be called from within a Tokio runtime. The file is complete once
    /// [`ByteSink::finish`] resolves.
    fn create_write_stream(&self, path: &str) -> ByteSink;

    /// Returns the size of the file in bytes.
    async fn size(&self, path: &str) -> Result<u64, StorageError>;

    /// Returns true if the file exists.
    async fn exists(&self, path: &str) -> Result<bool, StorageError>;

    /// Deletes the file.
    async fn remove(&self, path: &str) -> Result<(), StorageError>;

    /// Moves the file at `old_path` to `new_path`.
    async fn rename(&self, old_path: &str, new_path: &str) -> Result<(), StorageError>;

    /// Reads the entire file into memory.
    async fn read_file(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let mut stream = self.create_read_stream(path, ReadStreamOptions::default());
        let mut contents = Vec::new();
        while let Some(chunk) = stream.next().await {
            contents.extend_from_slice(&chunk?);
        }
        Ok(contents)
    }
}

/// Joins path segments with forward slashes, skipping empty segments.
pub fn join_path<S: AsRef<str>>(segments: &[S]) -> String {
    segments
        .iter()
        .map(AsRef::as_ref)
        .map(|s| s.trim_matches('/'))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_options_length_defaults() {
        let (buffer, length) = ReadOptions::default().into_buffer();
        assert_eq!(length, DEFAULT_READ_LENGTH);
        assert_eq!(buffer.len(), DEFAULT_READ_LENGTH);

        let (buffer, length) = ReadOptions {
            buffer: Some(vec![0; 10]),
            ..Default::default()
        }
        .into_buffer();
        assert_eq!(length, 10);
        assert_eq!(buffer.len(), 10);

        let (buffer, length) = ReadOptions {
            position: 0,
            length: Some(32),
            buffer: Some(vec![0; 4]),
        }
        .into_buffer();
        assert_eq!(length, 32);
        assert_eq!(buffer.len(), 32);
    }

    #[test]
    fn test_invalid_range_is_rejected() {
        let options = ReadStreamOptions {
            start: Some(10),
            end: Some(9),
            high_water_mark: None,
        };
        assert!(matches!(
            options.validate(),
            Err(StorageError::InvalidRange { start: 10, end: 9 })
        ));
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path(&["a", "b/", "/c"]), "a/b/c");
        assert_eq!(join_path(&["", "x"]), "x");
    }
}
