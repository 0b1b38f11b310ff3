//! Fixed-size read/write buffering over a delegate [`ByteStream`] (§4.2).

use std::io::{self, Read, Write};

use crate::byte_stream::ByteStream;
use crate::error::Fallible;

/// Wraps a delegate stream with optional read and write buffers.
///
/// Either buffer may be zero-sized (meaning "no buffering on this side"),
/// but not both — a `BufferingStream` with neither buffer would be a
/// pointless indirection over the delegate.
pub struct BufferingStream<S> {
    delegate: S,
    read_buf: Vec<u8>,
    read_pos: usize,
    read_cap: usize,
    write_buf: Vec<u8>,
    write_cap: usize,
}

impl<S: ByteStream> BufferingStream<S> {
    pub fn new(delegate: S, read_cap: usize, write_cap: usize) -> Self {
        assert!(
            read_cap > 0 || write_cap > 0,
            "BufferingStream requires at least one non-zero buffer"
        );
        BufferingStream {
            delegate,
            read_buf: Vec::new(),
            read_pos: 0,
            read_cap,
            write_buf: Vec::with_capacity(write_cap),
            write_cap,
        }
    }

    fn read_buffered_len(&self) -> usize { self.read_buf.len() - self.read_pos }

    fn refill(&mut self) -> io::Result<usize> {
        let mut tmp = vec![0u8; self.read_cap];
        let n = self.delegate.read(&mut tmp)?;
        tmp.truncate(n);
        self.read_buf = tmp;
        self.read_pos = 0;
        Ok(n)
    }
}

impl<S: ByteStream> Read for BufferingStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.read_buffered_len() > 0 {
            let available = self.read_buffered_len();
            let n = available.min(buf.len());
            buf[..n].copy_from_slice(&self.read_buf[self.read_pos..self.read_pos + n]);
            self.read_pos += n;
            return Ok(n);
        }

        if self.read_cap == 0 || buf.len() >= self.read_cap {
            return self.delegate.read(buf);
        }

        let n = self.refill()?;
        if n == 0 {
            return Ok(0);
        }
        let take = n.min(buf.len());
        buf[..take].copy_from_slice(&self.read_buf[..take]);
        self.read_pos = take;
        Ok(take)
    }
}

impl<S: ByteStream> Write for BufferingStream<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.write_cap == 0 {
            return self.delegate.write(buf);
        }

        if self.write_buf.len() + buf.len() > self.write_cap {
            self.flush()?;
        }

        if buf.len() >= self.write_cap {
            return self.delegate.write(buf);
        }

        self.write_buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.write_buf.is_empty() {
            let mut written = 0;
            while written < self.write_buf.len() {
                let n = self.delegate.write(&self.write_buf[written..])?;
                if n == 0 {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "delegate returned 0"));
                }
                written += n;
            }
            self.write_buf.clear();
        }
        self.delegate.flush()
    }
}

impl<S: ByteStream> ByteStream for BufferingStream<S> {
    fn close(&mut self) -> Fallible<()> {
        self.flush()?;
        self.delegate.close()
    }
}
