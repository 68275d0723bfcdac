use bytes::BytesMut;

use super::{FrameError, Head, Kind, StreamId, HEADER_LEN};

const ACK_FLAG: u8 = 0x1;

/// A PING frame (RFC 7540 §6.7): an 8-byte opaque payload, echoed back on ACK.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Ping {
    ack: bool,
    payload: [u8; 8],
}

impl Ping {
    pub fn new(payload: [u8; 8]) -> Ping {
        Ping {
            ack: false,
            payload,
        }
    }

    pub fn pong(payload: [u8; 8]) -> Ping {
        Ping { ack: true, payload }
    }

    pub fn is_ack(&self) -> bool {
        self.ack
    }

    pub fn payload(&self) -> &[u8; 8] {
        &self.payload
    }

    pub fn load(head: Head, payload: &[u8]) -> Result<Ping, FrameError> {
        if payload.len() != 8 {
            return Err(FrameError::BadFrameSize);
        }
        if !head.stream_id().is_zero() {
            return Err(FrameError::InvalidStreamId);
        }
        let mut buf = [0u8; 8];
        buf.copy_from_slice(payload);
        Ok(Ping {
            ack: head.flag() & ACK_FLAG == ACK_FLAG,
            payload: buf,
        })
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        let head = Head::new(
            Kind::Ping,
            if self.ack { ACK_FLAG } else { 0 },
            StreamId::ZERO,
        );
        let mut header = [0u8; HEADER_LEN];
        head.encode_len(8, &mut header);
        dst.extend_from_slice(&header);
        dst.extend_from_slice(&self.payload);
    }
}
