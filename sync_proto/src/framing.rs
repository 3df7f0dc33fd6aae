//! Length-prefixed framing: a little-endian `u32` byte count followed by the
//! payload.

use crate::DecodeError;

pub const FRAME_HEADER_LEN: usize = 4;

pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let len = payload.len() as u32;
    let mut buffer = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    buffer.extend_from_slice(&len.to_le_bytes());
    buffer.extend_from_slice(payload);
    buffer
}

pub fn frame_text(frame: Vec<u8>) -> Result<String, DecodeError> {
    Ok(String::from_utf8(frame)?)
}

/// Reassembles frames from a byte stream that may deliver partial reads.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    max_frame_len: usize,
}

impl FrameDecoder {
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_frame_len,
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, DecodeError> {
        if self.buffer.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }
        let mut header = [0u8; FRAME_HEADER_LEN];
        header.copy_from_slice(&self.buffer[..FRAME_HEADER_LEN]);
        let len = u32::from_le_bytes(header) as usize;
        if len > self.max_frame_len {
            return Err(DecodeError::FrameTooLarge {
                len,
                max: self.max_frame_len,
            });
        }
        let end = FRAME_HEADER_LEN + len;
        if self.buffer.len() < end {
            return Ok(None);
        }
        let frame = self.buffer[FRAME_HEADER_LEN..end].to_vec();
        self.buffer.drain(..end);
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reassembles_split_frames() {
        let mut bytes = encode_frame(b"first");
        bytes.extend(encode_frame(b"second"));

        let mut decoder = FrameDecoder::new(1024);
        decoder.extend(&bytes[..7]);
        assert_eq!(decoder.next_frame().unwrap(), None);
        decoder.extend(&bytes[7..]);
        assert_eq!(decoder.next_frame().unwrap().as_deref(), Some(&b"first"[..]));
        assert_eq!(decoder.next_frame().unwrap().as_deref(), Some(&b"second"[..]));
        assert_eq!(decoder.next_frame().unwrap(), None);
        assert_eq!(decoder.buffered_len(), 0);
    }

    #[test]
    fn rejects_oversized_frame() {
        let mut decoder = FrameDecoder::new(4);
        decoder.extend(&encode_frame(b"too long"));
        assert!(matches!(
            decoder.next_frame(),
            Err(DecodeError::FrameTooLarge { len: 8, max: 4 })
        ));
    }

    #[test]
    fn empty_payload_is_a_frame() {
        let mut decoder = FrameDecoder::new(16);
        decoder.extend(&encode_frame(b""));
        assert_eq!(decoder.next_frame().unwrap(), Some(Vec::new()));
    }

    #[test]
    fn frame_text_rejects_invalid_utf8() {
        assert!(matches!(
            frame_text(vec![0xff, 0xfe]),
            Err(DecodeError::InvalidUtf8(_))
        ));
        assert_eq!(frame_text(b"ok".to_vec()).unwrap(), "ok");
    }
}
