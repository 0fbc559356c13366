//! Minimal WebSocket framing: encode unmasked server frames, decode masked
//! client frames (RFC 6455 §5). No fragmentation support — every message
//! this hub sends or expects fits in a single frame, and a fragmented
//! client frame is rejected rather than reassembled.

use std::io::{self, Read, Write};

/// An opcode as it appears in a WebSocket frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// `0x1` — a text payload.
    Text,
    /// `0x8` — connection close.
    Close,
    /// `0x9` — ping.
    Ping,
    /// `0xA` — pong.
    Pong,
}

impl Opcode {
    const fn as_u8(self) -> u8 {
        match self {
            Self::Text => 0x1,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
        }
    }

    const fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x1 => Some(Self::Text),
            0x8 => Some(Self::Close),
            0x9 => Some(Self::Ping),
            0xA => Some(Self::Pong),
            _ => None,
        }
    }
}

/// A decoded client frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Which kind of frame this is.
    pub opcode: Opcode,
    /// The unmasked payload.
    pub payload: Vec<u8>,
}

/// Writes a single unmasked text frame (server → client frames are never
/// masked per RFC 6455).
pub fn write_text<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    write_frame(writer, Opcode::Text, payload)
}

/// Writes a close frame with an empty payload.
pub fn write_close<W: Write>(writer: &mut W) -> io::Result<()> {
    write_frame(writer, Opcode::Close, &[])
}

/// Writes a pong frame echoing `payload` (RFC 6455 §5.5.3).
pub fn write_pong<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    write_frame(writer, Opcode::Pong, payload)
}

fn write_frame<W: Write>(writer: &mut W, opcode: Opcode, payload: &[u8]) -> io::Result<()> {
    let len = payload.len();
    let mut header = [0u8; 10];
    header[0] = 0x80 | opcode.as_u8(); // FIN + opcode, never masked from the server

    let header_len = if len < 126 {
        header[1] = len as u8;
        2
    } else if u16::try_from(len).is_ok() {
        header[1] = 126;
        header[2..4].copy_from_slice(&(len as u16).to_be_bytes());
        4
    } else {
        header[1] = 127;
        header[2..10].copy_from_slice(&(len as u64).to_be_bytes());
        10
    };

    writer.write_all(&header[..header_len])?;
    writer.write_all(payload)?;
    writer.flush()
}

/// Maximum payload this reader accepts, guarding against a peer claiming an
/// unreasonable frame length before any bytes have arrived.
const MAX_FRAME_LEN: u64 = 16 * 1024 * 1024;

/// Reads and decodes one client frame (always masked per RFC 6455 §5.1:
/// "a client MUST mask all frames").
///
/// # Errors
///
/// Returns an I/O error on a short read, an unsupported/fragmented opcode,
/// an unmasked client frame, or a payload exceeding [`MAX_FRAME_LEN`].
pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<Frame> {
    let mut header = [0u8; 2];
    reader.read_exact(&mut header)?;

    let fin = header[0] & 0x80 != 0;
    let opcode_bits = header[0] & 0x0F;
    let masked = header[1] & 0x80 != 0;
    let mut len = u64::from(header[1] & 0x7F);

    if !fin {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "fragmented frames are not supported",
        ));
    }
    if !masked {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "client frame must be masked",
        ));
    }

    let opcode = Opcode::from_u8(opcode_bits)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "unsupported opcode"))?;

    if len == 126 {
        let mut ext = [0u8; 2];
        reader.read_exact(&mut ext)?;
        len = u64::from(u16::from_be_bytes(ext));
    } else if len == 127 {
        let mut ext = [0u8; 8];
        reader.read_exact(&mut ext)?;
        len = u64::from_be_bytes(ext);
    }
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "frame too large"));
    }

    let mut mask = [0u8; 4];
    reader.read_exact(&mut mask)?;

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload)?;
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }

    Ok(Frame { opcode, payload })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask_client_frame(opcode: Opcode, payload: &[u8], mask: [u8; 4]) -> Vec<u8> {
        let mut out = vec![0x80 | opcode.as_u8()];
        let len = payload.len();
        assert!(len < 126, "test helper only supports short payloads");
        out.push(0x80 | len as u8);
        out.extend_from_slice(&mask);
        for (i, b) in payload.iter().enumerate() {
            out.push(b ^ mask[i % 4]);
        }
        out
    }

    #[test]
    fn write_text_frame_is_unmasked_with_fin_set() {
        let mut buf = Vec::new();
        write_text(&mut buf, b"hello").unwrap();
        assert_eq!(buf[0], 0x81);
        assert_eq!(buf[1], 5);
        assert_eq!(&buf[2..], b"hello");
    }

    #[test]
    fn write_frame_uses_extended_length_for_large_payloads() {
        let payload = vec![0u8; 200];
        let mut buf = Vec::new();
        write_text(&mut buf, &payload).unwrap();
        assert_eq!(buf[1], 126);
        assert_eq!(u16::from_be_bytes([buf[2], buf[3]]), 200);
    }

    #[test]
    fn read_frame_unmasks_client_payload() {
        let raw = mask_client_frame(Opcode::Text, b"ping-me", [0x11, 0x22, 0x33, 0x44]);
        let mut cursor = std::io::Cursor::new(raw);
        let frame = read_frame(&mut cursor).unwrap();
        assert_eq!(frame.opcode, Opcode::Text);
        assert_eq!(frame.payload, b"ping-me");
    }

    #[test]
    fn read_frame_rejects_unmasked_client_frame() {
        let raw = vec![0x81, 0x05, b'h', b'e', b'l', b'l', b'o'];
        let mut cursor = std::io::Cursor::new(raw);
        assert!(read_frame(&mut cursor).is_err());
    }

    #[test]
    fn read_frame_rejects_fragmented_frame() {
        let raw = vec![0x01, 0x80, 0, 0, 0, 0]; // FIN=0, opcode=Text, masked, len=0
        let mut cursor = std::io::Cursor::new(raw);
        assert!(read_frame(&mut cursor).is_err());
    }

    #[test]
    fn read_frame_rejects_oversized_length() {
        let mut raw = vec![0x81, 0xFF, 0, 0, 0, 0, 0, 0, 0, 0]; // 64-bit extended len
        raw[2..10].copy_from_slice(&(MAX_FRAME_LEN + 1).to_be_bytes());
        let mut cursor = std::io::Cursor::new(raw);
        assert!(read_frame(&mut cursor).is_err());
    }

    #[test]
    fn roundtrip_close_and_pong() {
        let mut buf = Vec::new();
        write_close(&mut buf).unwrap();
        assert_eq!(buf, vec![0x88, 0x00]);

        let mut buf = Vec::new();
        write_pong(&mut buf, b"abc").unwrap();
        assert_eq!(buf[0], 0x8A);
    }
}
