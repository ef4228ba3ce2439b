use bytes::{Buf, Bytes, BytesMut};

use crate::socket::consts::{ENCRYPTED_FLAG, FRAME_LENGTH_SIZE, FRAME_MAX_SIZE};
use crate::socket::error::{Result, SocketError};

/// One wire frame: a 3-byte header (encrypted flag + 20-bit length) and the
/// body it describes.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub encrypted: bool,
    pub body: Bytes,
}

/// Accumulates raw transport bytes and yields complete frames. A short read
/// leaves the buffer untouched, so the decoder can be fed one byte at a
/// time.
#[derive(Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    pub fn next_frame(&mut self) -> Option<Frame> {
        if self.buffer.len() < FRAME_LENGTH_SIZE {
            return None;
        }

        let header = &self.buffer[..FRAME_LENGTH_SIZE];
        let encrypted = header[0] & ENCRYPTED_FLAG != 0;
        let frame_len = (((header[0] & 0x0F) as usize) << 16)
            | ((header[1] as usize) << 8)
            | (header[2] as usize);

        if self.buffer.len() < FRAME_LENGTH_SIZE + frame_len {
            return None;
        }

        self.buffer.advance(FRAME_LENGTH_SIZE);
        let body = self.buffer.split_to(frame_len).freeze();
        Some(Frame { encrypted, body })
    }
}

/// Frames a body for the wire, optionally prefixed by the connection
/// prologue (sent once, before the first frame).
pub fn encode_frame(body: &[u8], encrypted: bool, prologue: Option<&[u8]>) -> Result<Vec<u8>> {
    if body.len() > FRAME_MAX_SIZE {
        return Err(SocketError::FrameTooLarge {
            max: FRAME_MAX_SIZE,
            got: body.len(),
        });
    }

    let prologue_len = prologue.map_or(0, <[u8]>::len);
    let mut out = Vec::with_capacity(prologue_len + FRAME_LENGTH_SIZE + body.len());
    if let Some(prologue) = prologue {
        out.extend_from_slice(prologue);
    }

    let len = body.len() as u32;
    let mut first = ((len >> 16) & 0x0F) as u8;
    if encrypted {
        first |= ENCRYPTED_FLAG;
    }
    out.push(first);
    out.push((len >> 8) as u8);
    out.push(len as u8);
    out.extend_from_slice(body);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_roundtrip() {
        let framed = encode_frame(b"payload", false, None).unwrap();
        let mut decoder = FrameDecoder::new();
        decoder.feed(&framed);
        let frame = decoder.next_frame().unwrap();
        assert!(!frame.encrypted);
        assert_eq!(&frame.body[..], b"payload");
        assert!(decoder.next_frame().is_none());
    }

    #[test]
    fn test_encrypted_flag() {
        let framed = encode_frame(&[0u8; 16], true, None).unwrap();
        assert_eq!(framed[0] & ENCRYPTED_FLAG, ENCRYPTED_FLAG);
        let mut decoder = FrameDecoder::new();
        decoder.feed(&framed);
        assert!(decoder.next_frame().unwrap().encrypted);
    }

    #[test]
    fn test_byte_at_a_time_feeding() {
        let first = encode_frame(b"one", false, None).unwrap();
        let second = encode_frame(b"second frame", true, None).unwrap();
        let stream: Vec<u8> = first.into_iter().chain(second).collect();

        let mut decoder = FrameDecoder::new();
        let mut frames = Vec::new();
        for byte in stream {
            decoder.feed(&[byte]);
            while let Some(frame) = decoder.next_frame() {
                frames.push(frame);
            }
        }
        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0].body[..], b"one");
        assert_eq!(&frames[1].body[..], b"second frame");
        assert!(frames[1].encrypted);
    }

    #[test]
    fn test_prologue_prefix() {
        let framed = encode_frame(b"x", false, Some(&b"WA\x05"[..])).unwrap();
        assert_eq!(&framed[..3], b"WA\x05");
        assert_eq!(framed[3..6], [0, 0, 1]);
    }

    #[test]
    fn test_oversize_body_rejected() {
        let body = vec![0u8; FRAME_MAX_SIZE + 1];
        assert!(matches!(
            encode_frame(&body, false, None),
            Err(SocketError::FrameTooLarge { .. })
        ));
    }
}
