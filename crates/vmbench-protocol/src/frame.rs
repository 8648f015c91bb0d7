//! Length-prefixed framing and connection handshake.
//!
//! Frames are a 4-byte big-endian u32 length followed by that many payload
//! bytes. The framing layer is payload-agnostic; [`send_message`] and
//! [`recv_message`] layer JSON on top.
//!
//! Oversized frames are rejected as a protocol violation on both send and
//! receive. A frame is never silently truncated.

use std::io::{Read, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::MAX_FRAME_SIZE;

/// Frame header size in bytes.
pub const HEADER_SIZE: usize = 4;

/// Maximum length of a handshake line, including the terminating newline.
/// Anything longer is a protocol violation.
const MAX_HANDSHAKE_LINE: usize = 64;

/// Errors from framing, handshake, and message codec operations.
#[derive(Debug)]
pub enum FrameError {
    /// The peer closed the connection mid-header or mid-payload.
    Closed,
    /// The declared frame length exceeds [`MAX_FRAME_SIZE`].
    TooLarge {
        /// Declared payload length.
        len: u32,
    },
    /// The handshake reply was not an `OK` line.
    HandshakeRejected {
        /// The reply line received from the peer.
        reply: String,
    },
    /// Underlying I/O failure.
    Io(std::io::Error),
    /// Payload was not valid JSON for the expected type.
    Json(serde_json::Error),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::Closed => write!(f, "connection closed by peer"),
            FrameError::TooLarge { len } => {
                write!(f, "frame size {} exceeds maximum {}", len, MAX_FRAME_SIZE)
            }
            FrameError::HandshakeRejected { reply } => {
                write!(f, "handshake rejected: {}", reply.trim_end())
            }
            FrameError::Io(e) => write!(f, "i/o error: {}", e),
            FrameError::Json(e) => write!(f, "json codec error: {}", e),
        }
    }
}

impl std::error::Error for FrameError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FrameError::Io(e) => Some(e),
            FrameError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for FrameError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            FrameError::Closed
        } else {
            FrameError::Io(e)
        }
    }
}

impl From<serde_json::Error> for FrameError {
    fn from(e: serde_json::Error) -> Self {
        FrameError::Json(e)
    }
}

/// Write one frame: 4-byte big-endian length header, then the payload.
///
/// The header and payload are flushed together so the peer never observes
/// a header without its payload.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<(), FrameError> {
    if payload.len() > MAX_FRAME_SIZE as usize {
        return Err(FrameError::TooLarge {
            len: payload.len() as u32,
        });
    }
    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(payload)?;
    writer.flush()?;
    Ok(())
}

/// Read one frame and return its payload.
///
/// Reads exactly [`HEADER_SIZE`] header bytes, validates the declared
/// length against [`MAX_FRAME_SIZE`], then reads exactly that many payload
/// bytes. EOF at any point maps to [`FrameError::Closed`].
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>, FrameError> {
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header)?;

    let len = u32::from_be_bytes(header);
    if len > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge { len });
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload)?;
    Ok(payload)
}

/// Serialize a value as JSON and send it as one frame.
pub fn send_message<W: Write, T: Serialize>(writer: &mut W, message: &T) -> Result<(), FrameError> {
    let payload = serde_json::to_vec(message)?;
    write_frame(writer, &payload)
}

/// Receive one frame and deserialize its JSON payload.
pub fn recv_message<R: Read, T: DeserializeOwned>(reader: &mut R) -> Result<T, FrameError> {
    let payload = read_frame(reader)?;
    Ok(serde_json::from_slice(&payload)?)
}

/// Read one newline-terminated handshake line, byte at a time.
///
/// Reading byte-wise keeps the line protocol from consuming bytes that
/// belong to the framed stream that follows. The line length is capped;
/// exceeding the cap is a protocol violation.
pub fn read_line<R: Read>(reader: &mut R) -> Result<String, FrameError> {
    let mut line = Vec::with_capacity(16);
    let mut byte = [0u8; 1];
    loop {
        reader.read_exact(&mut byte)?;
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
        if line.len() >= MAX_HANDSHAKE_LINE {
            return Err(FrameError::TooLarge {
                len: line.len() as u32,
            });
        }
    }
    Ok(String::from_utf8_lossy(&line).into_owned())
}

/// Perform the client side of the connection handshake.
///
/// Sends `CONNECT <port>\n` and reads one reply line. Any reply that does
/// not start with `OK` is a rejection.
pub fn client_handshake<S: Read + Write>(stream: &mut S, port: u32) -> Result<(), FrameError> {
    stream.write_all(format!("CONNECT {}\n", port).as_bytes())?;
    stream.flush()?;

    let reply = read_line(stream)?;
    if reply.starts_with("OK") {
        Ok(())
    } else {
        Err(FrameError::HandshakeRejected { reply })
    }
}

/// Perform the server side of the connection handshake.
///
/// Reads one request line; accepts with `OK\n` when it is `CONNECT <port>`
/// for the expected port, otherwise replies `ERROR\n` and returns an error
/// so the caller drops the connection.
pub fn server_handshake<S: Read + Write>(stream: &mut S, expected_port: u32) -> Result<(), FrameError> {
    let line = read_line(stream)?;
    let accepted = matches!(
        line.split_whitespace().collect::<Vec<_>>().as_slice(),
        ["CONNECT", port] if port.parse::<u32>() == Ok(expected_port)
    );

    if accepted {
        stream.write_all(b"OK\n")?;
        stream.flush()?;
        Ok(())
    } else {
        stream.write_all(b"ERROR\n")?;
        stream.flush()?;
        Err(FrameError::HandshakeRejected { reply: line })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn frame_roundtrip() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"hello").unwrap();

        let mut cursor = Cursor::new(buf);
        let payload = read_frame(&mut cursor).unwrap();
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn frame_roundtrip_empty_payload() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"").unwrap();
        assert_eq!(buf.len(), HEADER_SIZE);

        let mut cursor = Cursor::new(buf);
        let payload = read_frame(&mut cursor).unwrap();
        assert!(payload.is_empty());
    }

    #[test]
    fn header_is_big_endian() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &[0u8; 258]).unwrap();
        assert_eq!(&buf[..HEADER_SIZE], &[0, 0, 1, 2]);
    }

    #[test]
    fn read_rejects_oversized_header() {
        let len = MAX_FRAME_SIZE + 1;
        let mut data = len.to_be_bytes().to_vec();
        data.extend_from_slice(b"junk");

        let mut cursor = Cursor::new(data);
        match read_frame(&mut cursor) {
            Err(FrameError::TooLarge { len: got }) => assert_eq!(got, len),
            other => panic!("expected TooLarge, got {:?}", other),
        }
    }

    #[test]
    fn read_reports_closed_on_truncated_payload() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"hello world").unwrap();
        buf.truncate(buf.len() - 3);

        let mut cursor = Cursor::new(buf);
        match read_frame(&mut cursor) {
            Err(FrameError::Closed) => {}
            other => panic!("expected Closed, got {:?}", other),
        }
    }

    #[test]
    fn read_reports_closed_on_empty_stream() {
        let mut cursor = Cursor::new(Vec::new());
        match read_frame(&mut cursor) {
            Err(FrameError::Closed) => {}
            other => panic!("expected Closed, got {:?}", other),
        }
    }

    #[test]
    fn message_roundtrip() {
        let request = crate::JobRequest {
            code: "int main() { return 0; }".into(),
            lang: "cpp".into(),
            compiler: "g++".into(),
            opts: "-O2".into(),
        };

        let mut buf = Vec::new();
        send_message(&mut buf, &request).unwrap();

        let mut cursor = Cursor::new(buf);
        let back: crate::JobRequest = recv_message(&mut cursor).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn recv_rejects_invalid_json() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"not json").unwrap();

        let mut cursor = Cursor::new(buf);
        let result: Result<crate::JobRequest, _> = recv_message(&mut cursor);
        assert!(matches!(result, Err(FrameError::Json(_))));
    }

    #[test]
    fn read_line_stops_at_newline() {
        let mut cursor = Cursor::new(b"OK\nleftover".to_vec());
        assert_eq!(read_line(&mut cursor).unwrap(), "OK");

        // The bytes after the newline are untouched.
        let mut rest = Vec::new();
        cursor.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"leftover");
    }

    #[test]
    fn read_line_caps_length() {
        let mut cursor = Cursor::new(vec![b'x'; 500]);
        assert!(matches!(
            read_line(&mut cursor),
            Err(FrameError::TooLarge { .. })
        ));
    }

    struct Duplex {
        read: Cursor<Vec<u8>>,
        written: Vec<u8>,
    }

    impl Read for Duplex {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.read.read(buf)
        }
    }

    impl Write for Duplex {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.written.write(buf)
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn client_handshake_accepts_ok_reply() {
        let mut stream = Duplex {
            read: Cursor::new(b"OK\n".to_vec()),
            written: Vec::new(),
        };
        client_handshake(&mut stream, 5000).unwrap();
        assert_eq!(stream.written, b"CONNECT 5000\n");
    }

    #[test]
    fn client_handshake_rejects_error_reply() {
        let mut stream = Duplex {
            read: Cursor::new(b"ERROR\n".to_vec()),
            written: Vec::new(),
        };
        assert!(matches!(
            client_handshake(&mut stream, 5000),
            Err(FrameError::HandshakeRejected { .. })
        ));
    }

    #[test]
    fn server_handshake_accepts_expected_port() {
        let mut stream = Duplex {
            read: Cursor::new(b"CONNECT 5000\n".to_vec()),
            written: Vec::new(),
        };
        server_handshake(&mut stream, 5000).unwrap();
        assert_eq!(stream.written, b"OK\n");
    }

    #[test]
    fn server_handshake_rejects_wrong_port() {
        let mut stream = Duplex {
            read: Cursor::new(b"CONNECT 9999\n".to_vec()),
            written: Vec::new(),
        };
        assert!(server_handshake(&mut stream, 5000).is_err());
        assert_eq!(stream.written, b"ERROR\n");
    }

    #[test]
    fn server_handshake_rejects_garbage() {
        let mut stream = Duplex {
            read: Cursor::new(b"GET / HTTP/1.1\n".to_vec()),
            written: Vec::new(),
        };
        assert!(server_handshake(&mut stream, 5000).is_err());
        assert_eq!(stream.written, b"ERROR\n");
    }
}
