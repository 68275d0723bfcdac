use bytes::BytesMut;

use super::{FrameError, Head, Kind, StreamId, HEADER_LEN};

const STREAM_ID_MASK: u32 = 1 << 31;

/// A PRIORITY frame (RFC 7540 §6.3): advisory stream prioritization.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Priority {
    stream_id: StreamId,
    dependency: StreamDependency,
}

/// The 5-byte dependency payload shared by PRIORITY and the priority
/// fields that may be present on a HEADERS frame.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct StreamDependency {
    dependency_id: StreamId,
    /// Exposed in [0, 255], though the wire format encodes [1, 256].
    weight: u8,
    is_exclusive: bool,
}

impl Priority {
    pub fn new(stream_id: StreamId, dependency: StreamDependency) -> Self {
        Priority {
            stream_id,
            dependency,
        }
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn dependency(&self) -> &StreamDependency {
        &self.dependency
    }

    pub fn load(head: Head, payload: &[u8]) -> Result<Self, FrameError> {
        let dependency = StreamDependency::load(payload)?;
        if dependency.dependency_id() == head.stream_id() {
            return Err(FrameError::InvalidStreamId);
        }
        Ok(Priority {
            stream_id: head.stream_id(),
            dependency,
        })
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        let head = Head::new(Kind::Priority, 0, self.stream_id);
        let mut header = [0u8; HEADER_LEN];
        head.encode_len(5, &mut header);
        dst.extend_from_slice(&header);
        self.dependency.encode(dst);
    }
}

impl StreamDependency {
    pub fn new(dependency_id: StreamId, weight: u8, is_exclusive: bool) -> Self {
        StreamDependency {
            dependency_id,
            weight,
            is_exclusive,
        }
    }

    pub fn load(src: &[u8]) -> Result<Self, FrameError> {
        if src.len() != 5 {
            return Err(FrameError::InvalidPayloadLength);
        }
        let raw = u32::from_be_bytes([src[0], src[1], src[2], src[3]]);
        let is_exclusive = raw & STREAM_ID_MASK == STREAM_ID_MASK;
        let dependency_id = StreamId::new(raw);
        let weight = src[4];
        Ok(StreamDependency::new(dependency_id, weight, is_exclusive))
    }

    pub fn dependency_id(&self) -> StreamId {
        self.dependency_id
    }

    pub fn weight(&self) -> u8 {
        self.weight
    }

    pub fn is_exclusive(&self) -> bool {
        self.is_exclusive
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        let mut dependency_id = self.dependency_id.as_u32();
        if self.is_exclusive {
            dependency_id |= STREAM_ID_MASK;
        }
        dst.extend_from_slice(&dependency_id.to_be_bytes());
        dst.extend_from_slice(&[self.weight]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_dependency_round_trips() {
        let mut buf = bytes::BytesMut::new();
        let dependency = StreamDependency::new(StreamId::ZERO, 201, false);
        dependency.encode(&mut buf);
        let decoded = StreamDependency::load(&buf).unwrap();
        assert_eq!(decoded, dependency);
    }

    #[test]
    fn priority_frame_round_trips() {
        let dependency = StreamDependency::new(StreamId::ZERO, 16, true);
        let priority = Priority::new(StreamId::new(3), dependency);
        let mut buf = bytes::BytesMut::new();
        priority.encode(&mut buf);

        let head = Head::parse(&buf[..HEADER_LEN]);
        let decoded = Priority::load(head, &buf[HEADER_LEN..]).unwrap();
        assert_eq!(decoded.stream_id(), StreamId::new(3));
        assert_eq!(decoded.dependency(), &dependency);
    }
}
