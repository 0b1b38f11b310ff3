//! The Bolt v1 handshake: magic preamble, candidate versions, agreed
//! version (§4.6 "Handshake", §6 "Wire protocol").

use byteorder::{BigEndian, ByteOrder};
use log::{debug, trace};

use crate::byte_stream::{read_all, write_all, ByteStream};
use crate::error::{Error, ErrorKind, Fallible};

const MAGIC_PREAMBLE: [u8; 4] = [0x60, 0x60, 0xB0, 0x17];
const CANDIDATE_VERSIONS: [u32; 4] = [1, 0, 0, 0];

/// Writes the preamble and candidate versions, then reads back the
/// server's agreed version. Returns it, or `ProtocolNegotiationFailed` if
/// the server offered nothing this client understands.
pub fn negotiate(stream: &mut dyn ByteStream) -> Fallible<u32> {
    trace!("writing handshake preamble and candidate versions");
    write_all(stream, &MAGIC_PREAMBLE)?;
    let mut versions = [0u8; 16];
    for (i, v) in CANDIDATE_VERSIONS.iter().enumerate() {
        BigEndian::write_u32(&mut versions[i * 4..i * 4 + 4], *v);
    }
    write_all(stream, &versions)?;
    stream.flush()?;

    let mut agreed_raw = [0u8; 4];
    read_all(stream, &mut agreed_raw)?;
    let agreed = BigEndian::read_u32(&agreed_raw);

    if agreed == 0 || !CANDIDATE_VERSIONS.contains(&agreed) {
        return Err(Error::with_context(
            ErrorKind::ProtocolNegotiationFailed,
            format!("server agreed to unsupported version {}", agreed),
        ));
    }
    debug!("negotiated protocol version {}", agreed);
    Ok(agreed)
}
