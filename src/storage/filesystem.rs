use std::fs::File;
use std::io;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use super::file_handle_pool::{FileHandlePool, OpenMode};
use super::{ByteStream, ReadOptions, ReadResult, ReadStreamOptions, StorageEngine};
use crate::StorageError;
use crate::stream::{ByteSink, ChunkWriter};

/// Default time an unused file handle stays open.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(1000);
/// Default read-ahead of read streams.
pub const DEFAULT_HIGH_WATER_MARK: usize = 64 * 1024;
/// Default queue limit of write streams.
pub const DEFAULT_WRITE_HIGH_WATER_MARK: usize = 16 * 1024;
/// Default maximum number of pooled file handles.
pub const DEFAULT_POOL_SIZE: usize = 256;

/// Builder for a [`FileSystemStorageEngine`].
#[derive(Debug, Clone)]
pub struct FileSystemStorageEngineBuilder {
    idle_timeout: Duration,
    pool_size: usize,
    high_water_mark: usize,
    write_high_water_mark: usize,
}

impl FileSystemStorageEngineBuilder {
    pub fn new() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            pool_size: DEFAULT_POOL_SIZE,
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            write_high_water_mark: DEFAULT_WRITE_HIGH_WATER_MARK,
        }
    }

    /// Sets how long an unused file handle stays open.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Sets the maximum number of pooled file handles.
    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Sets the chunk size used by read streams that do not specify one.
    pub fn high_water_mark(mut self, bytes: usize) -> Self {
        self.high_water_mark = bytes;
        self
    }

    /// Sets the queue limit of write streams.
    pub fn write_high_water_mark(mut self, bytes: usize) -> Self {
        self.write_high_water_mark = bytes;
        self
    }

    /// Creates an engine rooted at `directory`. The directory is not created.
    pub fn open(self, directory: impl Into<PathBuf>) -> FileSystemStorageEngine {
        FileSystemStorageEngine {
            directory: directory.into(),
            pool: Arc::new(FileHandlePool::new(self.idle_timeout, self.pool_size)),
            high_water_mark: self.high_water_mark.max(1),
            write_high_water_mark: self.write_high_water_mark,
        }
    }
}

impl Default for FileSystemStorageEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Stores files below a local directory.
///
/// Positional reads share pooled file handles, so reading many small ranges of the same file
/// does not reopen it each time. Cloning the engine is cheap and shares the pool.
#[derive(Clone)]
pub struct FileSystemStorageEngine {
    directory: PathBuf,
    pool: Arc<FileHandlePool>,
    high_water_mark: usize,
    write_high_water_mark: usize,
}

impl FileSystemStorageEngine {
    /// Creates an engine rooted at `directory` with default settings.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self::builder().open(directory)
    }

    pub fn builder() -> FileSystemStorageEngineBuilder {
        FileSystemStorageEngineBuilder::new()
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Resolves a storage path against the engine's directory.
    pub fn full_path(&self, path: &str) -> PathBuf {
        self.directory.join(path.trim_start_matches('/'))
    }

    pub fn pool(&self) -> &FileHandlePool {
        &self.pool
    }

    /// Appends `contents` to `path`, creating the file if needed.
    pub async fn append(&self, path: &str, contents: Bytes) -> Result<(), StorageError> {
        let full_path = self.full_path(path);
        let handle = self
            .pool
            .acquire(&full_path, OpenMode::Append)
            .await
            .map_err(|e| not_found(e, path))?;
        let file = handle.shared();
        tokio::task::spawn_blocking(move || (&*file).write_all(&contents))
            .await
            .map_err(io::Error::other)?
            .map_err(|e| not_found(e, path))
    }

    /// Reads a byte range counted from the end of the file.
    ///
    /// `options.position` is the distance from the end of the file to the last byte read. The
    /// returned bytes are in reverse order.
    pub async fn read_reverse(
        &self,
        path: &str,
        options: ReadOptions,
    ) -> Result<ReadResult, StorageError> {
        let size = self.size(path).await?;
        let offset = options.position;
        let (buffer, length) = options.into_buffer();
        if offset >= size {
            return Ok(ReadResult {
                buffer,
                bytes_read: 0,
            });
        }

        let length = length.min((size - offset) as usize);
        let position = size - offset - length as u64;
        let mut result = self
            .read(
                path,
                ReadOptions {
                    position,
                    length: Some(length),
                    buffer: Some(buffer),
                },
            )
            .await?;
        result.buffer[..result.bytes_read].reverse();
        Ok(result)
    }

    /// Returns a stream over the bytes of `path` from the last byte to the first.
    pub fn create_reverse_read_stream(&self, path: &str) -> ByteStream {
        let engine = self.clone();
        let path = path.to_string();
        let chunk_size = self.high_water_mark;

        stream::unfold(Some(0u64), move |offset| {
            let engine = engine.clone();
            let path = path.clone();
            async move {
                let offset = offset?;
                match engine
                    .read_reverse(&path, ReadOptions::range(offset, chunk_size))
                    .await
                {
                    Ok(result) if result.bytes_read == 0 => None,
                    Ok(mut result) => {
                        let next = offset + result.bytes_read as u64;
                        result.buffer.truncate(result.bytes_read);
                        Some((Ok(Bytes::from(result.buffer)), Some(next)))
                    }
                    Err(e) => Some((Err(e), None)),
                }
            }
        })
        .boxed()
    }
}

#[async_trait]
impl StorageEngine for FileSystemStorageEngine {
    async fn write(&self, path: &str, contents: Bytes) -> Result<(), StorageError> {
        let full_path = self.full_path(path);
        self.pool.evict(&full_path);
        tokio::fs::write(&full_path, contents)
            .await
            .map_err(|e| not_found(e, path))
    }

    async fn read(&self, path: &str, options: ReadOptions) -> Result<ReadResult, StorageError> {
        let position = options.position;
        let (mut buffer, length) = options.into_buffer();
        if length == 0 {
            return Ok(ReadResult {
                buffer,
                bytes_read: 0,
            });
        }

        let handle = self
            .pool
            .acquire(&self.full_path(path), OpenMode::Read)
            .await
            .map_err(|e| not_found(e, path))?;
        let file = handle.shared();
        let (buffer, bytes_read) = tokio::task::spawn_blocking(move || {
            let bytes_read = read_at(&file, &mut buffer[..length], position)?;
            Ok::<_, io::Error>((buffer, bytes_read))
        })
        .await
        .map_err(io::Error::other)??;
        drop(handle);

        Ok(ReadResult { buffer, bytes_read })
    }

    fn create_read_stream(&self, path: &str, options: ReadStreamOptions) -> ByteStream {
        if let Err(e) = options.validate() {
            return stream::once(async move { Err(e) }).boxed();
        }

        let state = ReadStreamState {
            path: path.to_string(),
            full_path: self.full_path(path),
            file: None,
            position: options.start.unwrap_or(0),
            end: options.end.map(|end| end.saturating_add(1)),
            chunk_size: options.high_water_mark.unwrap_or(self.high_water_mark).max(1),
        };

        stream::unfold(Some(state), |state| async move {
            let mut state = state?;
            match state.next_chunk().await {
                Ok(Some(chunk)) => Some((Ok(chunk), Some(state))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
        .boxed()
    }

    fn create_write_stream(&self, path: &str) -> ByteSink {
        let full_path = self.full_path(path);
        self.pool.evict(&full_path);
        ByteSink::spawn(
            FileChunkWriter {
                path: path.to_string(),
                full_path,
                file: None,
            },
            self.write_high_water_mark,
        )
    }

    async fn size(&self, path: &str) -> Result<u64, StorageError> {
        let metadata = tokio::fs::metadata(self.full_path(path))
            .await
            .map_err(|e| not_found(e, path))?;
        Ok(metadata.len())
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        match tokio::fs::metadata(self.full_path(path)).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, path: &str) -> Result<(), StorageError> {
        let full_path = self.full_path(path);
        self.pool.evict(&full_path);
        tokio::fs::remove_file(&full_path)
            .await
            .map_err(|e| not_found(e, path))
    }

    async fn rename(&self, old_path: &str, new_path: &str) -> Result<(), StorageError> {
        let from = self.full_path(old_path);
        let to = self.full_path(new_path);
        self.pool.evict(&from);
        self.pool.evict(&to);
        tokio::fs::rename(&from, &to)
            .await
            .map_err(|e| not_found(e, old_path))
    }
}

fn not_found(err: io::Error, path: &str) -> StorageError {
    if err.kind() == io::ErrorKind::NotFound {
        StorageError::FileNotFound(path.to_string())
    } else {
        StorageError::Io(err)
    }
}

struct ReadStreamState {
    path: String,
    full_path: PathBuf,
    file: Option<tokio::fs::File>,
    position: u64,
    // Exclusive
    end: Option<u64>,
    chunk_size: usize,
}

impl ReadStreamState {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, StorageError> {
        let want = match self.end {
            Some(end) if self.position >= end => return Ok(None),
            Some(end) => self.chunk_size.min((end - self.position) as usize),
            None => self.chunk_size,
        };

        if self.file.is_none() {
            let mut file = tokio::fs::File::open(&self.full_path)
                .await
                .map_err(|e| not_found(e, &self.path))?;
            if self.position > 0 {
                file.seek(io::SeekFrom::Start(self.position)).await?;
            }
            self.file = Some(file);
        }
        let Some(file) = self.file.as_mut() else {
            return Ok(None);
        };

        let mut buffer = vec![0u8; want];
        let mut filled = 0;
        while filled < want {
            let n = file.read(&mut buffer[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            return Ok(None);
        }
        buffer.truncate(filled);
        self.position += filled as u64;
        Ok(Some(Bytes::from(buffer)))
    }
}

/// Writes the chunks of a write stream to a new file.
struct FileChunkWriter {
    path: String,
    full_path: PathBuf,
    file: Option<tokio::fs::File>,
}

impl FileChunkWriter {
    async fn file(&mut self) -> Result<&mut tokio::fs::File, StorageError> {
        if self.file.is_none() {
            let file = tokio::fs::File::create(&self.full_path)
                .await
                .map_err(|e| not_found(e, &self.path))?;
            self.file = Some(file);
        }
        self.file.as_mut().ok_or(StorageError::StreamClosed)
    }
}

#[async_trait]
impl ChunkWriter for FileChunkWriter {
    async fn write_chunk(&mut self, chunk: Bytes) -> Result<(), StorageError> {
        self.file().await?.write_all(&chunk).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), StorageError> {
        let file = self.file().await?;
        file.flush().await?;
        self.file = None;
        Ok(())
    }

    async fn abort(&mut self) {
        if let Some(mut file) = self.file.take() {
            let _ = file.flush().await;
        }
        #[cfg(feature = "logging")]
        log::debug!("write stream to '{}' was aborted", self.path);
    }
}

/// Reads into `buf` at `offset` until it is full or the end of the file is reached.
#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;

    let mut filled = 0;
    while filled < buf.len() {
        match file.read_at(&mut buf[filled..], offset + filled as u64) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Reads into `buf` at `offset` until it is full or the end of the file is reached.
#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;

    let mut filled = 0;
    while filled < buf.len() {
        match file.seek_read(&mut buf[filled..], offset + filled as u64) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
