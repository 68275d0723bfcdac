use bytes::{Bytes, BytesMut};

use super::{FrameError, Head, Kind, Reason, StreamId, HEADER_LEN};

/// A GOAWAY frame (RFC 7540 §6.8): the peer is shutting the connection down
/// cleanly and has processed every stream up to `last_stream_id`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct GoAway {
    last_stream_id: StreamId,
    error_code: Reason,
    debug_data: Bytes,
}

impl GoAway {
    pub fn new(last_stream_id: StreamId, error_code: Reason) -> GoAway {
        GoAway {
            last_stream_id,
            error_code,
            debug_data: Bytes::new(),
        }
    }

    pub fn last_stream_id(&self) -> StreamId {
        self.last_stream_id
    }

    pub fn reason(&self) -> Reason {
        self.error_code
    }

    pub fn debug_data(&self) -> &Bytes {
        &self.debug_data
    }

    pub fn load(payload: &[u8]) -> Result<GoAway, FrameError> {
        if payload.len() < 8 {
            return Err(FrameError::InvalidPayloadLength);
        }
        let last_stream_id = StreamId::parse(&payload[0..4]);
        let error_code = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
        Ok(GoAway {
            last_stream_id,
            error_code: error_code.into(),
            debug_data: Bytes::copy_from_slice(&payload[8..]),
        })
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        let head = Head::new(Kind::GoAway, 0, StreamId::ZERO);
        let payload_len = 8 + self.debug_data.len();
        let mut header = [0u8; HEADER_LEN];
        head.encode_len(payload_len, &mut header);
        dst.extend_from_slice(&header);
        let mut stream_id_buf = [0u8; 4];
        self.last_stream_id.encode(&mut stream_id_buf);
        dst.extend_from_slice(&stream_id_buf);
        dst.extend_from_slice(&self.error_code.as_u32().to_be_bytes());
        dst.extend_from_slice(&self.debug_data);
    }
}
