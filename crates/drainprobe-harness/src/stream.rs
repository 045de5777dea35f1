//! Append-only log buffer fed by a log-follow process.

use std::sync::{Arc, Mutex, MutexGuard};

/// Shared, append-only byte buffer.
///
/// The follower appends, assertions read. Cloning yields another handle to
/// the same buffer.
#[derive(Debug, Clone, Default)]
pub struct LogBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        // A panicking writer cannot leave a partially appended slice behind,
        // so the data is still usable.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn append(&self, bytes: &[u8]) {
        self.lock().extend_from_slice(bytes);
    }

    /// Append one line, adding the trailing newline.
    pub fn append_line(&self, line: &str) {
        let mut buf = self.lock();
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of everything received so far.
    pub fn contents(&self) -> Vec<u8> {
        self.lock().clone()
    }

    pub fn contains(&self, token: &str) -> bool {
        find(&self.lock(), token.as_bytes(), 0).is_some()
    }
}

/// Position of `needle` in `haystack[from..]`, as an absolute offset.
pub(crate) fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() {
        return Some(from.min(haystack.len()));
    }
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|pos| pos + from)
}

/// Incremental substring search over a [`LogBuffer`].
///
/// Each call only looks at bytes appended since the previous call, keeping
/// `token.len() - 1` bytes of overlap so a token split across two appends is
/// still found.
#[derive(Debug)]
pub struct TokenScanner<'a> {
    buffer: &'a LogBuffer,
    token: &'a str,
    scanned: usize,
}

impl<'a> TokenScanner<'a> {
    pub fn new(buffer: &'a LogBuffer, token: &'a str) -> Self {
        Self {
            buffer,
            token,
            scanned: 0,
        }
    }

    pub fn found(&mut self) -> bool {
        let data = self.buffer.lock();
        let overlap = self.token.len().saturating_sub(1);
        let from = self.scanned.saturating_sub(overlap);
        let hit = find(&data, self.token.as_bytes(), from).is_some();
        self.scanned = data.len();
        hit
    }
}

type Closer = Box<dyn FnOnce() + Send>;

/// A followed log stream: the buffer plus whatever keeps it fed.
///
/// Dropping the stream closes it.
pub struct LogStream {
    app: String,
    buffer: LogBuffer,
    closer: Option<Closer>,
}

impl LogStream {
    pub fn new(app: impl Into<String>, buffer: LogBuffer, closer: impl FnOnce() + Send + 'static) -> Self {
        Self {
            app: app.into(),
            buffer,
            closer: Some(Box::new(closer)),
        }
    }

    /// A stream with nothing to stop, for buffers fed in-process.
    pub fn detached(app: impl Into<String>, buffer: LogBuffer) -> Self {
        Self {
            app: app.into(),
            buffer,
            closer: None,
        }
    }

    pub fn app(&self) -> &str {
        &self.app
    }

    pub fn buffer(&self) -> &LogBuffer {
        &self.buffer
    }

    /// Stop following. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(closer) = self.closer.take() {
            tracing::debug!(app = %self.app, "closing log stream");
            closer();
        }
    }
}

impl Drop for LogStream {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for LogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStream")
            .field("app", &self.app)
            .field("buffered", &self.buffer.len())
            .field("open", &self.closer.is_some())
            .finish()
    }
}
