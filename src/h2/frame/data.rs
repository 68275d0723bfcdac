use bytes::{Bytes, BytesMut};

use super::{FrameError, Head, Kind, StreamId, HEADER_LEN};

const END_STREAM: u8 = 0x1;
const PADDED: u8 = 0x8;

/// A DATA frame (RFC 7540 §6.1).
#[derive(Eq, PartialEq)]
pub struct Data {
    stream_id: StreamId,
    data: Bytes,
    flags: u8,
    pad_len: Option<u8>,
}

impl Data {
    pub fn new(stream_id: StreamId, payload: Bytes) -> Data {
        Data {
            stream_id,
            data: payload,
            flags: 0,
            pad_len: None,
        }
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn payload(&self) -> &Bytes {
        &self.data
    }

    pub fn into_payload(self) -> Bytes {
        self.data
    }

    pub fn is_end_stream(&self) -> bool {
        self.flags & END_STREAM == END_STREAM
    }

    pub fn set_end_stream(&mut self, end: bool) {
        if end {
            self.flags |= END_STREAM;
        } else {
            self.flags &= !END_STREAM;
        }
    }

    pub fn load(head: Head, mut payload: Bytes) -> Result<Data, FrameError> {
        let is_padded = head.flag() & PADDED == PADDED;
        let pad_len = if is_padded {
            if payload.is_empty() {
                return Err(FrameError::TooMuchPadding);
            }
            let len = payload[0] as usize;
            payload = payload.slice(1..);
            if len > payload.len() {
                return Err(FrameError::TooMuchPadding);
            }
            payload.truncate(payload.len() - len);
            Some(len as u8)
        } else {
            None
        };

        Ok(Data {
            stream_id: head.stream_id(),
            data: payload,
            flags: head.flag() & END_STREAM,
            pad_len,
        })
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        let head = Head::new(Kind::Data, self.flags, self.stream_id);
        let mut header = [0u8; HEADER_LEN];
        head.encode_len(self.data.len(), &mut header);
        dst.extend_from_slice(&header);
        dst.extend_from_slice(&self.data);
    }
}

impl std::fmt::Debug for Data {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Data")
            .field("stream_id", &self.stream_id)
            .field("len", &self.data.len())
            .field("end_stream", &self.is_end_stream())
            .field("pad_len", &self.pad_len)
            .finish()
    }
}
