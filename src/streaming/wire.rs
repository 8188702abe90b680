//! Wire framing for the client-facing snapshot protocol
//!
//! Every message in both directions is a 4-byte big-endian length prefix
//! followed by that many bytes of UTF-8 JSON:
//!
//! ```text
//! ┌──────────────────┬─────────────────────┐
//! │ Length (4 bytes) │ JSON payload        │
//! │ Big-endian u32   │ (variable size)     │
//! └──────────────────┴─────────────────────┘
//! ```
//!
//! Frames larger than 1MB are rejected and the connection is closed. A read
//! timeout before the first prefix byte is not an error; a timeout in the
//! middle of a frame is retried so that payloads spanning multiple socket
//! reads reassemble correctly.

use crate::error::{Error, Result};
use std::io::{Read, Write};

/// Maximum accepted frame payload
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Write one length-prefixed frame
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<()> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(Error::Protocol(format!(
            "frame too large: {} bytes",
            payload.len()
        )));
    }
    writer.write_all(&(payload.len() as u32).to_be_bytes())?;
    writer.write_all(payload)?;
    writer.flush()?;
    Ok(())
}

/// Read one length-prefixed frame.
///
/// Returns `Ok(None)` when the read timed out before any prefix byte
/// arrived; `Err(Io)` with `UnexpectedEof` means the peer hung up.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read(&mut len_buf) {
        Ok(0) => {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed",
            )))
        }
        Ok(n) => {
            // Partial prefix: finish it, retrying across timeouts
            read_exact_retrying(reader, &mut len_buf[n..])?;
        }
        Err(ref e)
            if e.kind() == std::io::ErrorKind::WouldBlock
                || e.kind() == std::io::ErrorKind::TimedOut =>
        {
            return Ok(None)
        }
        Err(e) => return Err(Error::Io(e)),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(Error::Protocol(format!("frame too large: {} bytes", len)));
    }

    let mut payload = vec![0u8; len];
    read_exact_retrying(reader, &mut payload)?;
    Ok(Some(payload))
}

/// `read_exact` that rides out read timeouts mid-frame
fn read_exact_retrying<R: Read>(reader: &mut R, mut buf: &mut [u8]) -> Result<()> {
    while !buf.is_empty() {
        match reader.read(buf) {
            Ok(0) => {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed mid-frame",
                )))
            }
            Ok(n) => buf = &mut buf[n..],
            Err(ref e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut
                    || e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(Error::Io(e)),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Reader that hands out data in fixed-size chunks to simulate frames
    /// spanning multiple socket reads
    struct ChunkedReader {
        data: Vec<u8>,
        pos: usize,
        chunk: usize,
    }

    impl Read for ChunkedReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.data.len() {
                return Ok(0);
            }
            let n = self.chunk.min(buf.len()).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    fn frame_bytes(payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        write_frame(&mut out, payload).unwrap();
        out
    }

    #[test]
    fn test_round_trip() {
        let payload = br#"{"frequency": 2}"#;
        let bytes = frame_bytes(payload);
        let mut cursor = Cursor::new(bytes);
        let decoded = read_frame(&mut cursor).unwrap().unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_round_trip_empty_payload() {
        let bytes = frame_bytes(b"");
        let mut cursor = Cursor::new(bytes);
        let decoded = read_frame(&mut cursor).unwrap().unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_frame_spanning_multiple_reads() {
        let payload: Vec<u8> = (0..1000u32).flat_map(|i| i.to_be_bytes()).collect();
        let mut reader = ChunkedReader {
            data: frame_bytes(&payload),
            pos: 0,
            chunk: 3,
        };
        let decoded = read_frame(&mut reader).unwrap().unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_eof_reports_disconnect() {
        let mut cursor = Cursor::new(Vec::new());
        match read_frame(&mut cursor) {
            Err(Error::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof),
            other => panic!("expected EOF error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(MAX_FRAME_LEN as u32 + 1).to_be_bytes());
        let mut cursor = Cursor::new(bytes);
        assert!(matches!(
            read_frame(&mut cursor),
            Err(Error::Protocol(_))
        ));

        let huge = vec![0u8; MAX_FRAME_LEN + 1];
        let mut out = Vec::new();
        assert!(matches!(
            write_frame(&mut out, &huge),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_truncated_frame_is_eof() {
        let mut bytes = frame_bytes(b"hello");
        bytes.truncate(bytes.len() - 2);
        let mut cursor = Cursor::new(bytes);
        assert!(matches!(read_frame(&mut cursor), Err(Error::Io(_))));
    }
}
