//! Length-prefixed framing for the MalmoEnv wire protocol.
//!
//! Every message on the wire is a 4-byte **big-endian** `u32` length prefix
//! followed by that many bytes of payload. Payloads are opaque here; the
//! protocol layer gives them meaning.
//!
//! # Wire format
//!
//! ```text
//! +----------------+------------------+
//! | Length (4B BE) | Payload          |
//! +----------------+------------------+
//! ```

use std::io::{self, Read, Write};

use malmo_core::transport::Transport;

/// Largest frame accepted in either direction (64 MiB).
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

fn too_large(size: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("frame of {size} bytes exceeds {MAX_FRAME_SIZE}"),
    )
}

/// Write one length-prefixed frame and flush.
///
/// # Errors
///
/// Returns an `io::Error` if the payload exceeds [`MAX_FRAME_SIZE`] or if
/// writing or flushing fails.
pub fn write_frame<W: Write + ?Sized>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(too_large(payload.len()));
    }
    let len = u32::try_from(payload.len()).map_err(|_| too_large(payload.len()))?;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(payload)?;
    writer.flush()
}

/// Read one length-prefixed frame.
///
/// # Errors
///
/// Returns an `io::Error` if the stream ends before a whole frame is read or
/// the announced length exceeds [`MAX_FRAME_SIZE`].
pub fn read_frame<R: Read + ?Sized>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(too_large(len));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(payload)
}

// ---------------------------------------------------------------------------
// FramedStream
// ---------------------------------------------------------------------------

/// [`Transport`] over any byte stream using length-prefixed frames.
#[derive(Debug)]
pub struct FramedStream<S> {
    stream: S,
}

impl<S> FramedStream<S> {
    pub const fn new(stream: S) -> Self {
        Self { stream }
    }

    pub const fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: Read + Write + Send> Transport for FramedStream<S> {
    fn send(&mut self, payload: &[u8]) -> io::Result<()> {
        write_frame(&mut self.stream, payload)
    }

    fn receive(&mut self) -> io::Result<Vec<u8>> {
        read_frame(&mut self.stream)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn length_prefix_is_big_endian() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"<Peek/>").unwrap();
        assert_eq!(&buf[..4], &[0, 0, 0, 7]);
        assert_eq!(&buf[4..], b"<Peek/>");
    }

    #[test]
    fn empty_frame_is_valid() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &[]).unwrap();
        assert_eq!(buf, vec![0, 0, 0, 0]);

        let mut cursor = Cursor::new(buf);
        assert!(read_frame(&mut cursor).unwrap().is_empty());
    }

    #[test]
    fn multiple_frames_in_sequence() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &[1, 2, 3]).unwrap();
        write_frame(&mut buf, b"tk0").unwrap();

        let mut cursor = Cursor::new(buf);
        assert_eq!(read_frame(&mut cursor).unwrap(), vec![1, 2, 3]);
        assert_eq!(read_frame(&mut cursor).unwrap(), b"tk0");
        let err = read_frame(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn truncated_payload_is_an_error() {
        let mut cursor = Cursor::new(vec![0, 0, 0, 5, 1, 2]);
        let err = read_frame(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn oversized_length_is_rejected() {
        let fake_len = (u32::try_from(MAX_FRAME_SIZE).unwrap() + 1).to_be_bytes();
        let mut cursor = Cursor::new(fake_len.to_vec());
        let err = read_frame(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn framed_stream_is_a_transport() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"status").unwrap();

        let mut stream = FramedStream::new(Cursor::new(buf));
        assert_eq!(stream.receive().unwrap(), b"status");

        let mut out = FramedStream::new(Cursor::new(Vec::new()));
        out.send(b"<Status/>").unwrap();
        let written = out.into_inner().into_inner();
        assert_eq!(&written[..4], &[0, 0, 0, 9]);
    }
}
