use bytes::BytesMut;

use super::{FrameError, Head, Kind, StreamId, HEADER_LEN};

const SIZE_INCREMENT_MASK: u32 = 1 << 31;

/// A WINDOW_UPDATE frame (RFC 7540 §6.9): grants additional flow-control
/// credit on a stream, or on the connection as a whole when `stream_id` is 0.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct WindowUpdate {
    stream_id: StreamId,
    size_increment: u32,
}

impl WindowUpdate {
    pub fn new(stream_id: StreamId, size_increment: u32) -> WindowUpdate {
        WindowUpdate {
            stream_id,
            size_increment,
        }
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn size_increment(&self) -> u32 {
        self.size_increment
    }

    pub fn load(head: Head, payload: &[u8]) -> Result<WindowUpdate, FrameError> {
        if payload.len() != 4 {
            return Err(FrameError::InvalidPayloadLength);
        }
        let raw = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let size_increment = raw & !SIZE_INCREMENT_MASK;
        if size_increment == 0 {
            return Err(FrameError::InvalidWindowUpdateValue);
        }
        Ok(WindowUpdate {
            stream_id: head.stream_id(),
            size_increment,
        })
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        let head = Head::new(Kind::WindowUpdate, 0, self.stream_id);
        let mut header = [0u8; HEADER_LEN];
        head.encode_len(4, &mut header);
        dst.extend_from_slice(&header);
        dst.extend_from_slice(&self.size_increment.to_be_bytes());
    }
}
