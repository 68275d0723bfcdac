use bytes::BytesMut;

use super::{FrameError, Head, Kind, Reason, StreamId, HEADER_LEN};

/// A RST_STREAM frame (RFC 7540 §6.4): abruptly terminates a single stream.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct RstStream {
    stream_id: StreamId,
    error_code: Reason,
}

impl RstStream {
    pub fn new(stream_id: StreamId, error_code: Reason) -> RstStream {
        RstStream {
            stream_id,
            error_code,
        }
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn reason(&self) -> Reason {
        self.error_code
    }

    pub fn load(head: Head, payload: &[u8]) -> Result<RstStream, FrameError> {
        if payload.len() != 4 {
            return Err(FrameError::InvalidPayloadLength);
        }
        if head.stream_id().is_zero() {
            return Err(FrameError::InvalidStreamId);
        }
        let code = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
        Ok(RstStream {
            stream_id: head.stream_id(),
            error_code: code.into(),
        })
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        let head = Head::new(Kind::Reset, 0, self.stream_id);
        let mut header = [0u8; HEADER_LEN];
        head.encode_len(4, &mut header);
        dst.extend_from_slice(&header);
        dst.extend_from_slice(&self.error_code.as_u32().to_be_bytes());
    }
}
