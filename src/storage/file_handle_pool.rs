use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// How a pooled file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum OpenMode {
    Read,
    Append,
}

impl OpenMode {
    fn open(self, path: &Path) -> io::Result<File> {
        match self {
            OpenMode::Read => OpenOptions::new().read(true).open(path),
            OpenMode::Append => OpenOptions::new().append(true).create(true).open(path),
        }
    }
}

struct HandleState {
    file: Option<Arc<File>>,
    ref_count: usize,
    // Bumped on every acquire so a pending idle close can tell it is stale.
    generation: u64,
    last_used: Instant,
}

/// A file handle shared by all concurrent users of one path.
///
/// The underlying file is opened on first use and closed once it has not been used for the
/// idle timeout. Acquiring the handle again before the timeout fires keeps the file open.
struct ReusableFileHandle {
    path: PathBuf,
    mode: OpenMode,
    idle_timeout: Duration,
    state: Mutex<HandleState>,
}

impl ReusableFileHandle {
    fn new(path: PathBuf, mode: OpenMode, idle_timeout: Duration) -> Self {
        Self {
            path,
            mode,
            idle_timeout,
            state: Mutex::new(HandleState {
                file: None,
                ref_count: 0,
                generation: 0,
                last_used: Instant::now(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HandleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn acquire(self: &Arc<Self>) -> io::Result<PooledFile> {
        // Fast path: the file is already open
        {
            let mut state = self.lock();
            if let Some(file) = state.file.clone() {
                return Ok(self.checkout(&mut state, file));
            }
        }

        // Open the file without holding the lock
        let path = self.path.clone();
        let mode = self.mode;
        let file = tokio::task::spawn_blocking(move || mode.open(&path))
            .await
            .map_err(io::Error::other)??;

        let mut state = self.lock();

        // Double-check: another task might have opened the file while we were waiting
        let file = match state.file.clone() {
            Some(existing) => existing,
            None => {
                let file = Arc::new(file);
                state.file = Some(file.clone());
                file
            }
        };
        Ok(self.checkout(&mut state, file))
    }

    fn checkout(self: &Arc<Self>, state: &mut HandleState, file: Arc<File>) -> PooledFile {
        state.ref_count += 1;
        state.generation += 1;
        state.last_used = Instant::now();
        PooledFile {
            file,
            handle: Arc::clone(self),
        }
    }

    fn release(self: &Arc<Self>) {
        let mut state = self.lock();
        state.ref_count = state.ref_count.saturating_sub(1);
        state.last_used = Instant::now();
        if state.ref_count > 0 {
            return;
        }

        let generation = state.generation;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let handle = Arc::clone(self);
                runtime.spawn(async move {
                    tokio::time::sleep(handle.idle_timeout).await;
                    handle.close_if_idle(generation);
                });
            }
            // No runtime to schedule the timer on
            Err(_) => state.file = None,
        }
    }

    fn close_if_idle(&self, generation: u64) {
        let mut state = self.lock();
        if state.ref_count == 0 && state.generation == generation && state.file.take().is_some() {
            #[cfg(feature = "logging")]
            log::trace!("closed idle file handle for {}", self.path.display());
        }
    }

    fn is_idle(&self) -> bool {
        self.lock().ref_count == 0
    }

    fn is_open(&self) -> bool {
        self.lock().file.is_some()
    }

    fn last_used(&self) -> Instant {
        self.lock().last_used
    }
}

/// A checked out file handle. The handle is released when this guard is dropped.
pub(crate) struct PooledFile {
    file: Arc<File>,
    handle: Arc<ReusableFileHandle>,
}

impl PooledFile {
    /// Returns a shared reference to the file that can be moved into a blocking task.
    pub(crate) fn shared(&self) -> Arc<File> {
        Arc::clone(&self.file)
    }
}

impl Deref for PooledFile {
    type Target = File;

    fn deref(&self) -> &File {
        &self.file
    }
}

impl Drop for PooledFile {
    fn drop(&mut self) {
        self.handle.release();
    }
}

type PoolKey = (PathBuf, OpenMode);

/// Keeps recently used file handles open between reads.
///
/// Every path gets one reusable handle per open mode. A handle closes its file after it has been
/// idle for `idle_timeout`. When the pool holds `max_size` handles the least recently used idle
/// handle is dropped before a new one is added; handles that are in use are never dropped, so the
/// pool may temporarily exceed `max_size`.
pub struct FileHandlePool {
    idle_timeout: Duration,
    max_size: usize,
    entries: Mutex<HashMap<PoolKey, Arc<ReusableFileHandle>>>,
}

impl FileHandlePool {
    /// Creates a new file handle pool.
    ///
    /// # Arguments
    ///
    /// * `idle_timeout` - How long an unused file stays open
    /// * `max_size` - Maximum number of handles to keep
    pub fn new(idle_timeout: Duration, max_size: usize) -> Self {
        Self {
            idle_timeout,
            max_size,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PoolKey, Arc<ReusableFileHandle>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Checks out the handle for `path`, opening the file if it is not open.
    pub(crate) async fn acquire(&self, path: &Path, mode: OpenMode) -> io::Result<PooledFile> {
        let handle = {
            let mut entries = self.lock();
            let key = (path.to_path_buf(), mode);
            match entries.get(&key) {
                Some(handle) => Arc::clone(handle),
                None => {
                    if entries.len() >= self.max_size {
                        Self::evict_lru(&mut entries);
                    }
                    let handle = Arc::new(ReusableFileHandle::new(
                        key.0.clone(),
                        mode,
                        self.idle_timeout,
                    ));
                    entries.insert(key, Arc::clone(&handle));
                    handle
                }
            }
        };
        handle.acquire().await
    }

    /// Forgets the handles for `path` so the next access opens the file again.
    ///
    /// Callers that still hold a checked out file keep using the old descriptor.
    pub fn evict(&self, path: &Path) {
        let mut entries = self.lock();
        entries.retain(|(entry_path, _), _| entry_path != path);
    }

    /// Returns the number of handles in the pool.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if the pool has no handles.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of handles whose file is currently open.
    pub fn open_files(&self) -> usize {
        self.lock().values().filter(|handle| handle.is_open()).count()
    }

    /// Returns the maximum pool size.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Returns how long an unused file stays open.
    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Drops the least recently used idle handle, if any.
    fn evict_lru(entries: &mut HashMap<PoolKey, Arc<ReusableFileHandle>>) {
        let lru = entries
            .iter()
            .filter(|(_, handle)| handle.is_idle())
            .min_by_key(|(_, handle)| handle.last_used())
            .map(|(key, _)| key.clone());

        if let Some(key) = lru {
            entries.remove(&key);
        }
    }
}
