//! Destination collaborators that receive transfer chunks.
//!
//! The core only needs four operations: open an artifact, write chunks to
//! it, close it, and delete it after a cancel. [`FileSink`] stores artifacts
//! under a root directory; [`MemorySink`] keeps them in process and can
//! inject failures.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::io::AsyncWriteExt;

/// Errors raised by a sink.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid artifact path: {0}")]
    InvalidPath(String),

    #[error("handle already closed")]
    Closed,

    #[error("rejected by sink: {0}")]
    Rejected(String),
}

/// Boxed future returned by sink operations.
pub type SinkFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SinkError>> + Send + 'a>>;

/// A destination store for transfer artifacts.
pub trait Sink: Send + Sync {
    /// Creates (or truncates) the artifact `name` and returns a writer for it.
    fn open<'a>(&'a self, name: &'a str) -> SinkFuture<'a, Box<dyn SinkHandle>>;

    /// Removes the artifact `name`. Removing a missing artifact succeeds.
    fn delete<'a>(&'a self, name: &'a str) -> SinkFuture<'a, ()>;

    /// Reports whether the artifact `name` exists.
    fn exists<'a>(&'a self, name: &'a str) -> SinkFuture<'a, bool>;
}

/// An open artifact.
pub trait SinkHandle: Send {
    fn write_chunk<'a>(&'a mut self, data: &'a [u8]) -> SinkFuture<'a, ()>;

    /// Flushes and releases the artifact. Writes after close fail with
    /// [`SinkError::Closed`].
    fn close(&mut self) -> SinkFuture<'_, ()>;
}

fn check_artifact_name(name: &str) -> Result<(), SinkError> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !name.contains('\\') => Ok(()),
        _ => Err(SinkError::InvalidPath(name.to_string())),
    }
}

// ---------------------------------------------------------------------------
// FileSink
// ---------------------------------------------------------------------------

/// Stores artifacts as files directly under `root`.
#[derive(Debug, Clone)]
pub struct FileSink {
    root: PathBuf,
}

impl FileSink {
    /// The root directory is created lazily on the first open.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Full path of the artifact `name`.
    pub fn artifact_path(&self, name: &str) -> Result<PathBuf, SinkError> {
        check_artifact_name(name)?;
        Ok(self.root.join(name))
    }
}

impl Sink for FileSink {
    fn open<'a>(&'a self, name: &'a str) -> SinkFuture<'a, Box<dyn SinkHandle>> {
        Box::pin(async move {
            let path = self.artifact_path(name)?;
            tokio::fs::create_dir_all(&self.root).await?;
            let file = tokio::fs::File::create(&path).await?;
            tracing::debug!(path = %path.display(), "opened artifact");
            Ok(Box::new(FileHandle { file: Some(file) }) as Box<dyn SinkHandle>)
        })
    }

    fn delete<'a>(&'a self, name: &'a str) -> SinkFuture<'a, ()> {
        Box::pin(async move {
            let path = self.artifact_path(name)?;
            match tokio::fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn exists<'a>(&'a self, name: &'a str) -> SinkFuture<'a, bool> {
        Box::pin(async move {
            let path = self.artifact_path(name)?;
            Ok(tokio::fs::try_exists(&path).await?)
        })
    }
}

struct FileHandle {
    file: Option<tokio::fs::File>,
}

impl SinkHandle for FileHandle {
    fn write_chunk<'a>(&'a mut self, data: &'a [u8]) -> SinkFuture<'a, ()> {
        Box::pin(async move {
            let file = self.file.as_mut().ok_or(SinkError::Closed)?;
            file.write_all(data).await?;
            Ok(())
        })
    }

    fn close(&mut self) -> SinkFuture<'_, ()> {
        Box::pin(async move {
            let mut file = self.file.take().ok_or(SinkError::Closed)?;
            file.flush().await?;
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// MemorySink
// ---------------------------------------------------------------------------

/// In-process sink keyed by artifact name.
///
/// Clones share the same store, so a test can keep one clone for
/// inspection and hand another to the registry.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    state: Arc<Mutex<MemoryState>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    artifacts: HashMap<String, Vec<u8>>,
    fail_open: Option<String>,
    fail_after_writes: Option<usize>,
    fail_close: Option<String>,
    writes: usize,
    open_handles: usize,
}

fn lock(state: &Mutex<MemoryState>) -> MutexGuard<'_, MemoryState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent open fail with `message`.
    pub fn fail_open(&self, message: impl Into<String>) {
        lock(&self.state).fail_open = Some(message.into());
    }

    /// Lets `n` more chunk writes succeed, then rejects the rest.
    pub fn fail_after_writes(&self, n: usize) {
        let mut state = lock(&self.state);
        state.fail_after_writes = Some(state.writes + n);
    }

    /// Makes every subsequent close fail with `message`. The handle is
    /// released either way.
    pub fn fail_close(&self, message: impl Into<String>) {
        lock(&self.state).fail_close = Some(message.into());
    }

    /// Copy of the bytes stored under `name`.
    pub fn contents(&self, name: &str) -> Option<Vec<u8>> {
        lock(&self.state).artifacts.get(name).cloned()
    }

    /// Total successful chunk writes across all artifacts.
    pub fn write_count(&self) -> usize {
        lock(&self.state).writes
    }

    /// Handles opened and not yet closed.
    pub fn open_handles(&self) -> usize {
        lock(&self.state).open_handles
    }

    pub fn artifact_names(&self) -> Vec<String> {
        lock(&self.state).artifacts.keys().cloned().collect()
    }
}

impl Sink for MemorySink {
    fn open<'a>(&'a self, name: &'a str) -> SinkFuture<'a, Box<dyn SinkHandle>> {
        Box::pin(async move {
            check_artifact_name(name)?;
            let mut state = lock(&self.state);
            if let Some(msg) = &state.fail_open {
                return Err(SinkError::Rejected(msg.clone()));
            }
            state.artifacts.insert(name.to_string(), Vec::new());
            state.open_handles += 1;
            Ok(Box::new(MemoryHandle {
                state: Arc::clone(&self.state),
                name: name.to_string(),
                closed: false,
            }) as Box<dyn SinkHandle>)
        })
    }

    fn delete<'a>(&'a self, name: &'a str) -> SinkFuture<'a, ()> {
        Box::pin(async move {
            lock(&self.state).artifacts.remove(name);
            Ok(())
        })
    }

    fn exists<'a>(&'a self, name: &'a str) -> SinkFuture<'a, bool> {
        Box::pin(async move { Ok(lock(&self.state).artifacts.contains_key(name)) })
    }
}

struct MemoryHandle {
    state: Arc<Mutex<MemoryState>>,
    name: String,
    closed: bool,
}

impl SinkHandle for MemoryHandle {
    fn write_chunk<'a>(&'a mut self, data: &'a [u8]) -> SinkFuture<'a, ()> {
        Box::pin(async move {
            if self.closed {
                return Err(SinkError::Closed);
            }
            let mut state = lock(&self.state);
            if state.fail_after_writes.is_some_and(|limit| state.writes >= limit) {
                return Err(SinkError::Rejected("write limit reached".into()));
            }
            let Some(buf) = state.artifacts.get_mut(&self.name) else {
                return Err(SinkError::Rejected(format!("{} was deleted", self.name)));
            };
            buf.extend_from_slice(data);
            state.writes += 1;
            Ok(())
        })
    }

    fn close(&mut self) -> SinkFuture<'_, ()> {
        Box::pin(async move {
            if self.closed {
                return Err(SinkError::Closed);
            }
            self.closed = true;
            let mut state = lock(&self.state);
            state.open_handles -= 1;
            match &state.fail_close {
                Some(msg) => Err(SinkError::Rejected(msg.clone())),
                None => Ok(()),
            }
        })
    }
}
