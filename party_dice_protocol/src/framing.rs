// Length-delimited framing for protocol messages.
//
// Each frame is a 4-byte big-endian length followed by the payload. The
// payload is JSON produced by the `send_frame`/`recv_frame` helpers, but
// `write_message`/`read_message` only move bytes so they stay usable with any
// encoding.
//
// Lobby snapshots are the largest frames the coordinator sends and stay well
// under a few kilobytes, so `MAX_MESSAGE_SIZE` is a tight 1 MiB.

use std::io::{self, Read, Write};

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Frames larger than this are refused in both directions.
pub const MAX_MESSAGE_SIZE: u32 = 1024 * 1024;

/// Write one frame and flush.
pub fn write_message<W: Write>(writer: &mut W, msg: &[u8]) -> io::Result<()> {
    let size = msg.len();
    let len = u32::try_from(size)
        .ok()
        .filter(|len| *len <= MAX_MESSAGE_SIZE)
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("frame too large: {size} bytes (max {MAX_MESSAGE_SIZE})"),
            )
        })?;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(msg)?;
    writer.flush()
}

/// Read one frame.
///
/// A stream closed before or inside a frame yields `UnexpectedEof`; an
/// oversized length prefix yields `InvalidData` without allocating.
pub fn read_message<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_MESSAGE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {len} bytes (max {MAX_MESSAGE_SIZE})"),
        ));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Serialize `msg` as JSON and write it as one frame.
pub fn send_frame<W: Write, T: Serialize>(writer: &mut W, msg: &T) -> io::Result<()> {
    let json = serde_json::to_vec(msg).map_err(io::Error::other)?;
    write_message(writer, &json)
}

/// Read one frame and decode it from JSON. Malformed JSON is `InvalidData`.
pub fn recv_frame<R: Read, T: DeserializeOwned>(reader: &mut R) -> io::Result<T> {
    let bytes = read_message(reader)?;
    serde_json::from_slice(&bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
