use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::StorageError;

/// Destination of the chunks written to a [`ByteSink`].
///
/// Chunks are delivered in order from a single task. Exactly one of `close` or `abort` is called
/// at the end, unless `write_chunk` or `close` itself failed.
#[async_trait]
pub trait ChunkWriter: Send + 'static {
    /// Writes one chunk.
    async fn write_chunk(&mut self, chunk: Bytes) -> Result<(), StorageError>;

    /// Commits everything written so far.
    async fn close(&mut self) -> Result<(), StorageError>;

    /// Discards the write. Errors are ignored.
    async fn abort(&mut self) {}
}

struct Shared {
    pending: AtomicUsize,
    closed: AtomicBool,
    drained: Notify,
}

impl Shared {
    fn signal(&self) {
        self.drained.notify_waiters();
    }
}

/// A writable byte stream with backpressure.
///
/// Chunks are handed to a background task that feeds them to a [`ChunkWriter`]. [`write`]
/// reports when more than `high_water_mark` bytes are waiting, after which callers should wait
/// for [`ready`] before writing more. [`finish`] commits the stream and resolves once every
/// chunk has been written; [`destroy`] discards it.
///
/// Dropping a sink without calling [`finish`] destroys it.
///
/// [`write`]: ByteSink::write
/// [`ready`]: ByteSink::ready
/// [`finish`]: ByteSink::finish
/// [`destroy`]: ByteSink::destroy
pub struct ByteSink {
    tx: Option<mpsc::UnboundedSender<Bytes>>,
    abort: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<Result<(), StorageError>>>,
    shared: Arc<Shared>,
    high_water_mark: usize,
    destroyed: bool,
}

impl ByteSink {
    /// Spawns the task driving `writer`. Must be called from within a Tokio runtime.
    pub fn spawn<W: ChunkWriter>(writer: W, high_water_mark: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (abort_tx, abort_rx) = oneshot::channel();
        let shared = Arc::new(Shared {
            pending: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            drained: Notify::new(),
        });
        let task = tokio::spawn(pump(writer, rx, abort_rx, Arc::clone(&shared)));
        Self {
            tx: Some(tx),
            abort: Some(abort_tx),
            task: Some(task),
            shared,
            high_water_mark,
            destroyed: false,
        }
    }

    /// Queues a chunk.
    ///
    /// Returns `Ok(false)` if the queued data now exceeds the high water mark. The chunk is
    /// queued either way.
    pub fn write(&mut self, chunk: Bytes) -> Result<bool, StorageError> {
        if self.destroyed {
            return Err(StorageError::Aborted);
        }
        let tx = self.tx.as_ref().ok_or(StorageError::StreamClosed)?;
        let len = chunk.len();
        let pending = self.shared.pending.fetch_add(len, Ordering::SeqCst) + len;
        if tx.send(chunk).is_err() {
            // The writer task has already stopped
            self.shared.pending.fetch_sub(len, Ordering::SeqCst);
            return Err(StorageError::StreamClosed);
        }
        Ok(pending < self.high_water_mark)
    }

    /// Waits until the queued data has drained below the high water mark.
    pub async fn ready(&self) {
        loop {
            let mut notified = std::pin::pin!(self.shared.drained.notified());
            notified.as_mut().enable();
            if self.is_ready() {
                return;
            }
            notified.await;
        }
    }

    /// Queues a chunk and waits for the queue to drain if it is over the high water mark.
    pub async fn send(&mut self, chunk: Bytes) -> Result<(), StorageError> {
        if !self.write(chunk)? {
            self.ready().await;
        }
        Ok(())
    }

    fn is_ready(&self) -> bool {
        let pending = self.shared.pending.load(Ordering::SeqCst);
        pending == 0 || pending < self.high_water_mark || self.shared.closed.load(Ordering::SeqCst)
    }

    /// Number of bytes queued but not yet written.
    pub fn pending_bytes(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    pub fn high_water_mark(&self) -> usize {
        self.high_water_mark
    }

    /// Ends the stream and waits until all queued chunks have been committed.
    pub async fn finish(mut self) -> Result<(), StorageError> {
        if self.destroyed {
            return Err(StorageError::Aborted);
        }
        // Keep the abort sender alive until the task is done, dropping it would not abort
        // but would wake the task needlessly.
        let abort = self.abort.take();
        self.tx = None;
        let result = match self.task.take() {
            Some(task) => match task.await {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => Err(StorageError::Aborted),
                Err(e) => Err(StorageError::Io(std::io::Error::other(e))),
            },
            None => Err(StorageError::StreamClosed),
        };
        drop(abort);
        result
    }

    /// Discards the stream. Queued chunks that have not been written yet are dropped.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.tx = None;
        if let Some(abort) = self.abort.take() {
            let _ = abort.send(());
        }
    }

    /// Discards the stream and waits for the writer to clean up.
    pub async fn abort(mut self) {
        self.destroy();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}

impl Drop for ByteSink {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.destroy();
        }
    }
}

async fn pump<W: ChunkWriter>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    mut abort_rx: oneshot::Receiver<()>,
    shared: Arc<Shared>,
) -> Result<(), StorageError> {
    let mut abort_pending = true;
    let result = loop {
        tokio::select! {
            biased;
            signal = &mut abort_rx, if abort_pending => {
                if signal.is_ok() {
                    writer.abort().await;
                    break Err(StorageError::Aborted);
                }
                abort_pending = false;
            }
            chunk = rx.recv() => match chunk {
                Some(chunk) => {
                    let len = chunk.len();
                    let written = writer.write_chunk(chunk).await;
                    shared.pending.fetch_sub(len, Ordering::SeqCst);
                    shared.signal();
                    if let Err(e) = written {
                        writer.abort().await;
                        break Err(e);
                    }
                }
                None => break writer.close().await,
            },
        }
    };

    #[cfg(feature = "logging")]
    if let Err(e) = &result {
        log::debug!("write stream ended with error: {e}");
    }

    shared.closed.store(true, Ordering::SeqCst);
    shared.signal();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorded {
        chunks: Vec<Bytes>,
        closed: bool,
        aborted: bool,
    }

    struct RecordingWriter {
        log: Arc<Mutex<Recorded>>,
        delay: Duration,
        fail_on: Option<usize>,
    }

    #[async_trait]
    impl ChunkWriter for RecordingWriter {
        async fn write_chunk(&mut self, chunk: Bytes) -> Result<(), StorageError> {
            tokio::time::sleep(self.delay).await;
            let mut log = self.log.lock().unwrap();
            if Some(log.chunks.len()) == self.fail_on {
                return Err(StorageError::Io(std::io::Error::other("disk full")));
            }
            log.chunks.push(chunk);
            Ok(())
        }

        async fn close(&mut self) -> Result<(), StorageError> {
            self.log.lock().unwrap().closed = true;
            Ok(())
        }

        async fn abort(&mut self) {
            self.log.lock().unwrap().aborted = true;
        }
    }

    fn recording(delay: Duration, fail_on: Option<usize>) -> (RecordingWriter, Arc<Mutex<Recorded>>) {
        let log = Arc::new(Mutex::new(Recorded::default()));
        let writer = RecordingWriter {
            log: Arc::clone(&log),
            delay,
            fail_on,
        };
        (writer, log)
    }

    #[tokio::test]
    async fn test_finish_commits_all_chunks_in_order() {
        let (writer, log) = recording(Duration::ZERO, None);
        let mut sink = ByteSink::spawn(writer, 1024);

        for i in 0..10u8 {
            sink.send(Bytes::from(vec![i; 3])).await.unwrap();
        }
        sink.finish().await.unwrap();

        let log = log.lock().unwrap();
        assert!(log.closed);
        assert!(!log.aborted);
        assert_eq!(log.chunks.len(), 10);
        assert_eq!(log.chunks[7].as_ref(), &[7, 7, 7]);
    }

    #[tokio::test]
    async fn test_write_reports_backpressure() {
        let (writer, _log) = recording(Duration::from_millis(20), None);
        let mut sink = ByteSink::spawn(writer, 8);

        assert!(sink.write(Bytes::from_static(b"1234")).unwrap());
        assert!(!sink.write(Bytes::from_static(b"56789")).unwrap());

        sink.ready().await;
        assert!(sink.pending_bytes() < 8);
        sink.finish().await.unwrap();
    }

    #[tokio::test]
    async fn test_destroy_aborts_writer() {
        let (writer, log) = recording(Duration::from_millis(5), None);
        let mut sink = ByteSink::spawn(writer, 1024);
        sink.write(Bytes::from_static(b"abc")).unwrap();
        sink.destroy();

        assert!(matches!(
            sink.write(Bytes::from_static(b"def")),
            Err(StorageError::Aborted)
        ));
        sink.abort().await;

        let log = log.lock().unwrap();
        assert!(log.aborted);
        assert!(!log.closed);
    }

    #[tokio::test]
    async fn test_writer_error_is_reported_by_finish() {
        let (writer, log) = recording(Duration::ZERO, Some(1));
        let mut sink = ByteSink::spawn(writer, 1024);
        sink.send(Bytes::from_static(b"a")).await.unwrap();
        sink.send(Bytes::from_static(b"b")).await.unwrap();

        // Give the writer a chance to fail before more data is queued
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(matches!(
            sink.write(Bytes::from_static(b"c")),
            Err(StorageError::StreamClosed)
        ));
        sink.ready().await;

        let err = sink.finish().await.unwrap_err();
        assert!(err.to_string().contains("disk full"));
        assert!(log.lock().unwrap().aborted);
    }

    #[tokio::test]
    async fn test_dropping_unfinished_sink_aborts() {
        let (writer, log) = recording(Duration::ZERO, None);
        let mut sink = ByteSink::spawn(writer, 1024);
        sink.write(Bytes::from_static(b"abc")).unwrap();
        drop(sink);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let log = log.lock().unwrap();
        assert!(!log.closed);
    }
}
