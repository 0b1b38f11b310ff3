//! Bolt chunk framing over a delegate [`ByteStream`] (§4.3, binary format
//! authoritative).
//!
//! ```text
//! chunk = u16-big-endian length (1..=65535) || <length> payload bytes
//! msg   = chunk+ || u16 0x0000
//! ```
//!
//! A `ChunkingStream` frames exactly one logical message: [`MessageCodec`]
//! constructs one per outgoing/incoming message over the connection's
//! long-lived buffered socket and calls [`ChunkingStream::finish`] once the
//! message is fully written. It never closes the delegate itself; the
//! connection owns the socket's lifetime.
//!
//! [`MessageCodec`]: crate::message_codec::MessageCodec

use std::cmp;
use std::io::{self, Read, Write};

use byteorder::{BigEndian, ByteOrder};

use crate::byte_stream::ByteStream;
use crate::error::{Error, ErrorKind, Fallible};

enum ReadState {
    /// Next bytes off the wire are a u16 chunk length.
    NeedLength,
    /// `remaining` payload bytes of the current chunk are still unread.
    InChunk(usize),
    /// The zero-length terminator was consumed; reads return 0 until
    /// [`ChunkingStream::begin_receive`] is called.
    Ended,
    /// A short read corrupted framing; sticky until the stream is replaced.
    Errored,
}

pub struct ChunkingStream<S> {
    delegate: S,
    min_chunk: usize,
    max_chunk: usize,
    write_staging: Vec<u8>,
    sent_any: bool,
    finished: bool,
    read_state: ReadState,
    length_scratch: [u8; 2],
    length_scratch_filled: usize,
}

impl<S: ByteStream> ChunkingStream<S> {
    pub fn new(delegate: S, min_chunk: usize, max_chunk: usize) -> Self {
        assert!(min_chunk <= max_chunk, "min_chunk must be <= max_chunk");
        assert!(max_chunk >= 1 && max_chunk <= 0xFFFF, "max_chunk out of range");
        ChunkingStream {
            delegate,
            min_chunk,
            max_chunk,
            write_staging: Vec::with_capacity(min_chunk),
            sent_any: false,
            finished: false,
            read_state: ReadState::NeedLength,
            length_scratch: [0; 2],
            length_scratch_filled: 0,
        }
    }

    pub fn get_ref(&self) -> &S { &self.delegate }

    pub fn get_mut(&mut self) -> &mut S { &mut self.delegate }

    pub fn into_inner(self) -> S { self.delegate }

    /// Resets the read half so the next [`Read::read`] starts a fresh
    /// message. Must be called after a previous message hit `Ended`.
    pub fn begin_receive(&mut self) {
        self.read_state = ReadState::NeedLength;
        self.length_scratch_filled = 0;
    }

    /// True once the zero-length terminator has been observed for the
    /// current incoming message.
    pub fn is_message_complete(&self) -> bool { matches!(self.read_state, ReadState::Ended) }

    fn emit_chunk(&mut self, payload: &[u8]) -> Fallible<()> {
        debug_assert!(payload.len() <= self.max_chunk);
        let mut header = [0u8; 2];
        BigEndian::write_u16(&mut header, payload.len() as u16);
        crate::byte_stream::write_all(&mut self.delegate, &header)?;
        crate::byte_stream::write_all(&mut self.delegate, payload)?;
        self.sent_any = true;
        Ok(())
    }

    fn emit_terminator(&mut self) -> Fallible<()> {
        crate::byte_stream::write_all(&mut self.delegate, &[0u8, 0u8])
    }

    /// Ends the current outgoing message: flushes any staged bytes as a
    /// final short chunk, always writes the zero-length terminator, then
    /// flushes the delegate. Idempotent.
    pub fn finish(&mut self) -> Fallible<()> {
        if self.finished {
            return Ok(());
        }
        if !self.write_staging.is_empty() {
            let staged = std::mem::replace(&mut self.write_staging, Vec::new());
            for slice in staged.chunks(self.max_chunk) {
                self.emit_chunk(slice)?;
            }
        }
        self.emit_terminator()?;
        self.delegate.flush()?;
        self.finished = true;
        Ok(())
    }

    fn write_pending(&mut self, data: &[u8]) -> Fallible<()> {
        for slice in data.chunks(self.max_chunk) {
            self.emit_chunk(slice)?;
        }
        Ok(())
    }
}

impl<S: ByteStream> Write for ChunkingStream<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let pending = self.write_staging.len() + buf.len();
        if self.min_chunk == 0 || pending >= self.min_chunk {
            if self.write_staging.is_empty() {
                self.write_pending(buf).map_err(to_io_error)?;
            } else {
                let mut combined =
                    Vec::with_capacity(self.write_staging.len() + buf.len());
                combined.extend_from_slice(&self.write_staging);
                combined.extend_from_slice(buf);
                self.write_staging.clear();
                self.write_pending(&combined).map_err(to_io_error)?;
            }
        } else {
            self.write_staging.extend_from_slice(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> { self.delegate.flush() }
}

impl<S: ByteStream> Read for ChunkingStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            match self.read_state {
                ReadState::Errored => {
                    return Err(io::Error::new(io::ErrorKind::Other, "chunk framing broken"));
                }
                ReadState::Ended => return Ok(0),
                ReadState::NeedLength => {
                    while self.length_scratch_filled < 2 {
                        let n = self
                            .delegate
                            .read(&mut self.length_scratch[self.length_scratch_filled..])?;
                        if n == 0 {
                            self.read_state = ReadState::Errored;
                            return Err(io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                "short read on chunk length",
                            ));
                        }
                        self.length_scratch_filled += n;
                    }
                    let length = BigEndian::read_u16(&self.length_scratch) as usize;
                    self.length_scratch_filled = 0;
                    if length == 0 {
                        self.read_state = ReadState::Ended;
                        return Ok(0);
                    }
                    self.read_state = ReadState::InChunk(length);
                }
                ReadState::InChunk(remaining) => {
                    let to_read = cmp::min(remaining, buf.len());
                    let n = self.delegate.read(&mut buf[..to_read])?;
                    if n == 0 {
                        self.read_state = ReadState::Errored;
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "short read on chunk payload",
                        ));
                    }
                    let remaining = remaining - n;
                    self.read_state = if remaining == 0 {
                        ReadState::NeedLength
                    } else {
                        ReadState::InChunk(remaining)
                    };
                    return Ok(n);
                }
            }
        }
    }
}

impl<S: ByteStream> ByteStream for ChunkingStream<S> {
    /// Ends the current message (see [`finish`](Self::finish)). Does not
    /// cascade to the delegate: a `ChunkingStream` never owns the
    /// connection's socket.
    fn close(&mut self) -> Fallible<()> { self.finish() }
}

fn to_io_error(e: Error) -> io::Error {
    match e.kind() {
        ErrorKind::ConnectionClosed => {
            io::Error::new(io::ErrorKind::ConnectionAborted, e.to_string())
        }
        _ => io::Error::new(io::ErrorKind::Other, e.to_string()),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_utils::LoopbackStream;

    fn roundtrip(payload: &[u8], min_chunk: usize, max_chunk: usize) {
        let mut writer = ChunkingStream::new(LoopbackStream::new(), min_chunk, max_chunk);
        writer.write_all(payload).unwrap();
        writer.finish().unwrap();
        let mut stream = writer.into_inner();

        let mut reader = ChunkingStream::new(LoopbackStream::new(), min_chunk, max_chunk);
        // Move the bytes the writer produced onto the reader's delegate.
        let mut raw = Vec::new();
        stream.read_to_end(&mut raw).unwrap();
        reader.get_mut().feed(&raw);

        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, payload);
        assert!(reader.is_message_complete());
    }

    #[test]
    fn empty_payload_still_emits_terminator() {
        roundtrip(b"", 0, 100);
    }

    #[test]
    fn payload_smaller_than_max_chunk() {
        roundtrip(b"hello, world", 0, 100);
    }

    #[test]
    fn payload_spanning_multiple_chunks() {
        let payload = vec![7u8; 250];
        roundtrip(&payload, 0, 100);
    }

    #[test]
    fn payload_roundtrips_at_max_chunk_boundary() {
        let payload = vec![3u8; 0xFFFF * 2 + 10];
        roundtrip(&payload, 0, 0xFFFF);
    }

    #[test]
    fn min_chunk_staging_still_roundtrips() {
        roundtrip(b"short writes accumulate before flushing", 16, 64);
    }

    #[test]
    fn terminator_is_a_zero_length_chunk() {
        let mut writer = ChunkingStream::new(LoopbackStream::new(), 0, 100);
        writer.write_all(b"x").unwrap();
        writer.finish().unwrap();
        let mut stream = writer.into_inner();
        let mut raw = Vec::new();
        stream.read_to_end(&mut raw).unwrap();
        assert_eq!(&raw[raw.len() - 2..], &[0x00, 0x00]);
    }

    #[test]
    fn finish_is_idempotent() {
        let mut writer = ChunkingStream::new(LoopbackStream::new(), 0, 100);
        writer.write_all(b"x").unwrap();
        writer.finish().unwrap();
        writer.finish().unwrap();
        let mut stream = writer.into_inner();
        let mut raw = Vec::new();
        stream.read_to_end(&mut raw).unwrap();
        // One data chunk plus one terminator; finishing twice must not
        // duplicate either.
        assert_eq!(raw, vec![0x00, 0x01, b'x', 0x00, 0x00]);
    }

    #[test]
    fn short_read_on_chunk_payload_is_sticky_errored() {
        let mut reader = ChunkingStream::new(LoopbackStream::new(), 0, 100);
        reader.get_mut().feed(&[0x00, 0x05, b'a', b'b']); // declares 5 bytes, delivers 2
        let mut buf = [0u8; 5];
        assert!(reader.read(&mut buf[..2]).is_ok());
        assert!(reader.read(&mut buf[..1]).is_err());
        assert!(reader.read(&mut buf[..1]).is_err());
    }
}
