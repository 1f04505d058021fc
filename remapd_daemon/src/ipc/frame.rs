//! IPC message frame.
//!
//! Both directions use the same little-endian record:
//!
//! ```text
//! type : u32    RELOAD=1 BIND=2 LAYER_LISTEN=3 SUCCESS=4 FAIL=5
//! sz   : u32    payload length, at most MAX_MESSAGE_SIZE
//! data : byte[sz]
//! ```

use std::io::{self, Read, Write};

/// Upper bound on a frame payload.
pub const MAX_MESSAGE_SIZE: usize = 4096;

pub const MSG_RELOAD: u32 = 1;
pub const MSG_BIND: u32 = 2;
pub const MSG_LAYER_LISTEN: u32 = 3;
pub const MSG_SUCCESS: u32 = 4;
pub const MSG_FAIL: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: u32,
    pub data: Vec<u8>,
}

impl Frame {
    /// Builds a frame, truncating oversized payloads to the wire limit.
    pub fn new(kind: u32, data: &[u8]) -> Self {
        let len = data.len().min(MAX_MESSAGE_SIZE);
        Self {
            kind,
            data: data[..len].to_vec(),
        }
    }

    pub fn success() -> Self {
        Self::new(MSG_SUCCESS, &[])
    }

    pub fn fail(msg: &str) -> Self {
        Self::new(MSG_FAIL, msg.as_bytes())
    }

    /// Reads one frame, failing on short reads or an oversized length
    /// field.
    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let mut header = [0u8; 8];
        r.read_exact(&mut header)?;
        let kind = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let sz = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
        if sz > MAX_MESSAGE_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "oversized IPC payload",
            ));
        }
        let mut data = vec![0u8; sz];
        r.read_exact(&mut data)?;
        Ok(Self { kind, data })
    }

    /// Writes the frame as one buffer so a well-behaved peer never sees a
    /// torn header.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let mut buf = Vec::with_capacity(8 + self.data.len());
        buf.extend_from_slice(&self.kind.to_le_bytes());
        buf.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.data);
        w.write_all(&buf)
    }

    /// Payload as UTF-8 text, if it is valid.
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trips_through_a_buffer() {
        let frame = Frame::new(MSG_BIND, b"a = b");
        let mut buf = Vec::new();
        frame.write_to(&mut buf).expect("write failed");
        assert_eq!(buf.len(), 8 + 5);

        let back = Frame::read_from(&mut Cursor::new(buf)).expect("read failed");
        assert_eq!(back, frame);
        assert_eq!(back.payload_str(), Some("a = b"));
    }

    #[test]
    fn empty_payload_round_trips() {
        let mut buf = Vec::new();
        Frame::success().write_to(&mut buf).expect("write failed");
        let back = Frame::read_from(&mut Cursor::new(buf)).expect("read failed");
        assert_eq!(back.kind, MSG_SUCCESS);
        assert!(back.data.is_empty());
    }

    #[test]
    fn rejects_oversized_length_field() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&MSG_BIND.to_le_bytes());
        buf.extend_from_slice(&(MAX_MESSAGE_SIZE as u32 + 1).to_le_bytes());
        let err = Frame::read_from(&mut Cursor::new(buf)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn truncated_stream_is_an_error() {
        let frame = Frame::new(MSG_BIND, b"a = b");
        let mut buf = Vec::new();
        frame.write_to(&mut buf).expect("write failed");
        buf.truncate(10);
        assert!(Frame::read_from(&mut Cursor::new(buf)).is_err());
    }

    #[test]
    fn oversized_payload_is_truncated_at_construction() {
        let big = vec![b'x'; MAX_MESSAGE_SIZE + 100];
        let frame = Frame::new(MSG_BIND, &big);
        assert_eq!(frame.data.len(), MAX_MESSAGE_SIZE);
    }

    #[test]
    fn fail_frame_carries_the_message() {
        let frame = Frame::fail("no such layer");
        assert_eq!(frame.kind, MSG_FAIL);
        assert_eq!(frame.payload_str(), Some("no such layer"));
    }
}
