//! Helpers shared by the test suites in this crate: a logger initializer
//! and an in-memory loopback transport so the codec and state machine can
//! be exercised without a live server.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::Once;

use crate::byte_stream::ByteStream;
use crate::error::Fallible;

static INIT: Once = Once::new();

/// Initializes the global logger with `env_logger`, but just once per
/// process.
pub fn setup_logger() {
    INIT.call_once(|| {
        env_logger::Builder::from_default_env().is_test(true).init();
    });
}

/// An in-memory [`ByteStream`] whose writes and reads share one FIFO
/// buffer: what one side writes, a read on the same instance consumes.
/// Useful for scripting a server's replies ahead of time in a test.
pub struct LoopbackStream {
    buf: VecDeque<u8>,
    closed: bool,
}

impl LoopbackStream {
    pub fn new() -> Self {
        LoopbackStream {
            buf: VecDeque::new(),
            closed: false,
        }
    }

    /// Pre-loads bytes that a subsequent `read` will return, as if a peer
    /// had already sent them.
    pub fn feed(&mut self, bytes: &[u8]) { self.buf.extend(bytes.iter().copied()); }
}

impl Default for LoopbackStream {
    fn default() -> Self { Self::new() }
}

impl Read for LoopbackStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed {
            return Ok(0);
        }
        let n = std::cmp::min(buf.len(), self.buf.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.buf.pop_front().unwrap();
        }
        Ok(n)
    }
}

impl Write for LoopbackStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "stream closed"));
        }
        self.buf.extend(buf.iter().copied());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> { Ok(()) }
}

impl ByteStream for LoopbackStream {
    fn close(&mut self) -> Fallible<()> {
        self.closed = true;
        Ok(())
    }
}
