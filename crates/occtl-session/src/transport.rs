//! Byte transports.
//!
//! A [`Transport`] moves raw bytes to and from the controller. The session
//! never blocks on it: `read_available` returns whatever has arrived, possibly
//! nothing, and pacing between polls goes through [`Transport::wait_readable`].
//!
//! [`MemoryTransport`] is an in-memory transport driven through a cloneable
//! [`MemoryHandle`], used to script device traffic in tests.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

/// Raw byte I/O to a controller.
pub trait Transport: Send {
    /// Write all of `bytes`.
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Return the bytes received since the last call. Never blocks; an empty
    /// vector means nothing has arrived.
    fn read_available(&mut self) -> io::Result<Vec<u8>>;

    /// Release the underlying resource. Calling it again has no effect.
    fn close(&mut self);

    /// Whether the transport is usable.
    fn is_open(&self) -> bool {
        true
    }

    /// Pause for up to `timeout` while waiting for more bytes.
    fn wait_readable(&mut self, timeout: Duration) {
        std::thread::sleep(timeout);
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        (**self).write(bytes)
    }

    fn read_available(&mut self) -> io::Result<Vec<u8>> {
        (**self).read_available()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn wait_readable(&mut self, timeout: Duration) {
        (**self).wait_readable(timeout)
    }
}

// ============================================================================
// In-memory Transport
// ============================================================================

#[derive(Debug, Default)]
struct MemoryState {
    /// Deliveries queued for the session. Each read returns one entry.
    incoming: VecDeque<Vec<u8>>,
    written: Vec<Vec<u8>>,
    fail_reads: Option<io::ErrorKind>,
    fail_writes: Option<io::ErrorKind>,
    refuse_open: bool,
    close_count: u32,
    reads: u32,
    waits: u32,
}

/// In-memory transport for tests and dry runs.
///
/// Each [`MemoryHandle::push_incoming`] call is one delivery; a read returns
/// exactly one delivery, so tests control chunk boundaries precisely.
/// `wait_readable` returns immediately.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
}

/// Test-side view of a [`MemoryTransport`].
#[derive(Debug, Clone)]
pub struct MemoryHandle {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport and the handle that drives it.
    pub fn pair() -> (MemoryTransport, MemoryHandle) {
        let transport = MemoryTransport::new();
        let handle = transport.handle();
        (transport, handle)
    }

    pub fn handle(&self) -> MemoryHandle {
        MemoryHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl MemoryHandle {
    /// Queue one delivery. An empty delivery makes one read come back empty.
    pub fn push_incoming(&self, bytes: impl Into<Vec<u8>>) {
        self.state.lock().incoming.push_back(bytes.into());
    }

    /// Queue `bytes` split at the given offsets.
    pub fn push_chunked(&self, bytes: &[u8], cuts: &[usize]) {
        let mut start = 0;
        let mut state = self.state.lock();
        for &cut in cuts.iter().chain(std::iter::once(&bytes.len())) {
            let cut = cut.clamp(start, bytes.len());
            state.incoming.push_back(bytes[start..cut].to_vec());
            start = cut;
        }
    }

    /// Deliveries not yet read by the session.
    pub fn pending_incoming(&self) -> usize {
        self.state.lock().incoming.len()
    }

    /// Every write the session made, in order.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state.lock().written.clone()
    }

    /// Every write concatenated.
    pub fn written_bytes(&self) -> Vec<u8> {
        self.state.lock().written.concat()
    }

    pub fn clear_written(&self) {
        self.state.lock().written.clear();
    }

    /// Make every following read fail with `kind`.
    pub fn fail_reads(&self, kind: io::ErrorKind) {
        self.state.lock().fail_reads = Some(kind);
    }

    /// Make every following write fail with `kind`.
    pub fn fail_writes(&self, kind: io::ErrorKind) {
        self.state.lock().fail_writes = Some(kind);
    }

    /// Report the transport as not open, so `connect` refuses it.
    pub fn refuse_open(&self) {
        self.state.lock().refuse_open = true;
    }

    /// How many times `close` was called.
    pub fn close_count(&self) -> u32 {
        self.state.lock().close_count
    }

    pub fn read_count(&self) -> u32 {
        self.state.lock().reads
    }

    pub fn wait_count(&self) -> u32 {
        self.state.lock().waits
    }
}

impl Transport for MemoryTransport {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock();
        if let Some(kind) = state.fail_writes {
            return Err(io::Error::new(kind, "memory transport write failure"));
        }
        state.written.push(bytes.to_vec());
        Ok(())
    }

    fn read_available(&mut self) -> io::Result<Vec<u8>> {
        let mut state = self.state.lock();
        state.reads += 1;
        if let Some(kind) = state.fail_reads {
            return Err(io::Error::new(kind, "memory transport read failure"));
        }
        Ok(state.incoming.pop_front().unwrap_or_default())
    }

    fn close(&mut self) {
        self.state.lock().close_count += 1;
    }

    fn is_open(&self) -> bool {
        !self.state.lock().refuse_open
    }

    fn wait_readable(&mut self, _timeout: Duration) {
        self.state.lock().waits += 1;
    }
}
