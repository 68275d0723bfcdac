use bytes::{Bytes, BytesMut};
use http::{HeaderMap, Method, StatusCode, Uri};

use crate::h2::hpack;

use super::{FrameError, Head, Kind, Priority, StreamDependency, StreamId, HEADER_LEN};

const END_STREAM: u8 = 0x1;
pub(crate) const END_HEADERS: u8 = 0x4;
const PADDED: u8 = 0x8;
const PRIORITY_FLAG: u8 = 0x20;

pub(crate) fn is_end_headers(flag: u8) -> bool {
    flag & END_HEADERS == END_HEADERS
}

/// The pseudo-headers carried at the front of a request or response header
/// block (RFC 7540 §8.1.2.3/§8.1.2.4).
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Pseudo {
    pub method: Option<Method>,
    pub scheme: Option<Bytes>,
    pub authority: Option<Bytes>,
    pub path: Option<Bytes>,
    pub status: Option<StatusCode>,
}

impl Pseudo {
    pub fn request(method: Method, uri: &Uri) -> Pseudo {
        Pseudo {
            method: Some(method),
            scheme: uri.scheme_str().map(|s| Bytes::copy_from_slice(s.as_bytes())),
            authority: uri
                .authority()
                .map(|a| Bytes::copy_from_slice(a.as_str().as_bytes())),
            path: Some(Bytes::copy_from_slice(
                uri.path_and_query()
                    .map(|pq| pq.as_str())
                    .unwrap_or("/")
                    .as_bytes(),
            )),
            status: None,
        }
    }

    pub fn response(status: StatusCode) -> Pseudo {
        Pseudo {
            status: Some(status),
            ..Pseudo::default()
        }
    }
}

/// A HEADERS frame, with its CONTINUATION continuations already merged
/// (RFC 7540 §6.2, §6.10).
#[derive(Debug, Eq, PartialEq)]
pub struct Headers {
    stream_id: StreamId,
    pseudo: Pseudo,
    fields: HeaderMap,
    flags: u8,
    stream_dependency: Option<StreamDependency>,
}

impl Headers {
    pub fn request(stream_id: StreamId, pseudo: Pseudo, fields: HeaderMap) -> Headers {
        Headers {
            stream_id,
            pseudo,
            fields,
            flags: 0,
            stream_dependency: None,
        }
    }

    pub fn trailers(stream_id: StreamId, fields: HeaderMap) -> Headers {
        Headers {
            stream_id,
            pseudo: Pseudo::default(),
            fields,
            flags: END_STREAM,
            stream_dependency: None,
        }
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn pseudo(&self) -> &Pseudo {
        &self.pseudo
    }

    pub fn fields(&self) -> &HeaderMap {
        &self.fields
    }

    pub fn into_parts(self) -> (Pseudo, HeaderMap) {
        (self.pseudo, self.fields)
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

    pub fn set_priority(&mut self, dependency: StreamDependency) {
        self.stream_dependency = Some(dependency);
    }

    /// Decodes a (possibly CONTINUATION-joined) header block fragment.
    ///
    /// Only valid when the HEADERS frame alone carries `END_HEADERS`; a
    /// header block split across CONTINUATION frames must be reassembled by
    /// [`split_header_block`]/[`decode_header_block`] instead, since HPACK
    /// decoding requires the complete block in one pass (RFC 7540 §6.2).
    pub fn load(
        head: Head,
        payload: Bytes,
        decoder: &mut hpack::Decoder,
    ) -> Result<(Headers, bool), FrameError> {
        let parts = split_header_block(head, payload)?;
        let end_headers = parts.end_headers;
        let headers = decode_header_block(
            head.stream_id(),
            parts.end_stream,
            parts.stream_dependency,
            &parts.block,
            decoder,
        )?;
        Ok((headers, end_headers))
    }

    /// Encodes this header block, splitting into HEADERS + CONTINUATION
    /// frames if the encoded block exceeds `max_frame_size`.
    pub fn encode(
        &self,
        encoder: &mut hpack::Encoder,
        max_frame_size: usize,
        dst: &mut BytesMut,
    ) {
        let mut block = BytesMut::new();
        self.encode_pseudo(encoder, &mut block);
        let headers: Vec<hpack::Header> = self
            .fields
            .iter()
            .map(|(name, value)| {
                hpack::Header::new(
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).to_string(),
                )
            })
            .collect();
        encoder.encode(headers.iter(), &mut block);

        let mut remaining = block.freeze();
        let mut first = true;
        loop {
            let take = remaining.len().min(max_frame_size);
            let chunk = remaining.split_to(take);
            let end_headers = remaining.is_empty();

            let kind = if first { Kind::Headers } else { Kind::Continuation };
            let mut flags = 0u8;
            if first && self.is_end_stream() {
                flags |= END_STREAM;
            }
            if end_headers {
                flags |= END_HEADERS;
            }

            let head = Head::new(kind, flags, self.stream_id);
            let mut header = [0u8; HEADER_LEN];
            head.encode_len(chunk.len(), &mut header);
            dst.extend_from_slice(&header);
            dst.extend_from_slice(&chunk);

            first = false;
            if end_headers {
                break;
            }
        }
    }

    fn encode_pseudo(&self, encoder: &mut hpack::Encoder, dst: &mut BytesMut) {
        let mut pseudo_headers = Vec::new();
        if let Some(ref status) = self.pseudo.status {
            pseudo_headers.push(hpack::Header::new(":status", status.as_str()));
        }
        if let Some(ref method) = self.pseudo.method {
            pseudo_headers.push(hpack::Header::new(":method", method.as_str()));
        }
        if let Some(ref scheme) = self.pseudo.scheme {
            pseudo_headers.push(hpack::Header::new(
                ":scheme",
                String::from_utf8_lossy(scheme).to_string(),
            ));
        }
        if let Some(ref authority) = self.pseudo.authority {
            pseudo_headers.push(hpack::Header::new(
                ":authority",
                String::from_utf8_lossy(authority).to_string(),
            ));
        }
        if let Some(ref path) = self.pseudo.path {
            pseudo_headers.push(hpack::Header::new(
                ":path",
                String::from_utf8_lossy(path).to_string(),
            ));
        }
        encoder.encode(pseudo_headers.iter(), dst);
    }
}

/// The padding/priority-stripped remainder of a HEADERS frame: the raw
/// HPACK block fragment plus the bits that only the first frame of a
/// (possibly CONTINUATION-joined) header block carries.
pub(crate) struct HeaderBlockParts {
    pub block: Bytes,
    pub stream_dependency: Option<StreamDependency>,
    pub end_stream: bool,
    pub end_headers: bool,
}

/// Strips a HEADERS frame's PADDED/PRIORITY prefix without touching HPACK.
/// Used by the live dispatch loop so CONTINUATION frames can be collected
/// before the header block is decoded as a single unit.
pub(crate) fn split_header_block(
    head: Head,
    mut payload: Bytes,
) -> Result<HeaderBlockParts, FrameError> {
    if head.stream_id().is_zero() {
        return Err(FrameError::InvalidStreamId);
    }

    if head.flag() & PADDED == PADDED {
        if payload.is_empty() {
            return Err(FrameError::TooMuchPadding);
        }
        let pad_len = payload[0] as usize;
        payload = payload.slice(1..);
        if pad_len > payload.len() {
            return Err(FrameError::TooMuchPadding);
        }
        payload.truncate(payload.len() - pad_len);
    }

    let stream_dependency = if head.flag() & PRIORITY_FLAG == PRIORITY_FLAG {
        if payload.len() < 5 {
            return Err(FrameError::InvalidPayloadLength);
        }
        let dependency = StreamDependency::load(&payload[..5])?;
        payload = payload.slice(5..);
        Some(dependency)
    } else {
        None
    };

    Ok(HeaderBlockParts {
        block: payload,
        stream_dependency,
        end_stream: head.flag() & END_STREAM == END_STREAM,
        end_headers: is_end_headers(head.flag()),
    })
}

/// HPACK-decodes a complete header block (HEADERS payload plus any
/// CONTINUATION payloads already concatenated onto it) into a [`Headers`].
pub(crate) fn decode_header_block(
    stream_id: StreamId,
    end_stream: bool,
    stream_dependency: Option<StreamDependency>,
    block: &[u8],
    decoder: &mut hpack::Decoder,
) -> Result<Headers, FrameError> {
    let mut pseudo = Pseudo::default();
    let mut fields = HeaderMap::new();
    let mut seen_regular_header = false;

    decoder.decode(&mut std::io::Cursor::new(block), |h| {
        if h.name.starts_with(':') {
            if seen_regular_header {
                return; // pseudo-header after a regular header: caller validates via MalformedMessage below
            }
            match h.name.as_str() {
                ":method" => pseudo.method = Method::from_bytes(h.value.as_bytes()).ok(),
                ":scheme" => pseudo.scheme = Some(Bytes::from(h.value)),
                ":authority" => pseudo.authority = Some(Bytes::from(h.value)),
                ":path" => pseudo.path = Some(Bytes::from(h.value)),
                ":status" => pseudo.status = StatusCode::from_bytes(h.value.as_bytes()).ok(),
                _ => {}
            }
        } else {
            seen_regular_header = true;
            if let (Ok(name), Ok(value)) = (
                http::header::HeaderName::from_bytes(h.name.as_bytes()),
                http::header::HeaderValue::from_bytes(h.value.as_bytes()),
            ) {
                fields.append(name, value);
            }
        }
    })?;

    Ok(Headers {
        stream_id,
        pseudo,
        fields,
        flags: if end_stream { END_STREAM | END_HEADERS } else { END_HEADERS },
        stream_dependency,
    })
}

/// A CONTINUATION frame (RFC 7540 §6.10): a raw header block fragment,
/// merged into the owning [`Headers`]/[`PushPromise`] by the frame reader
/// before it is ever handed to a caller.
#[derive(Debug, Eq, PartialEq)]
pub struct Continuation {
    stream_id: StreamId,
    payload: Bytes,
}

impl Continuation {
    pub fn load(head: Head, payload: Bytes) -> Result<(Continuation, bool), FrameError> {
        if head.stream_id().is_zero() {
            return Err(FrameError::InvalidStreamId);
        }
        let end_headers = head.flag() & END_HEADERS == END_HEADERS;
        Ok((
            Continuation {
                stream_id: head.stream_id(),
                payload,
            },
            end_headers,
        ))
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}

/// A PUSH_PROMISE frame (RFC 7540 §6.6). Server push is out of scope for
/// this crate's client-side core; this type exists so a received
/// PUSH_PROMISE can be parsed and immediately refused per spec.md §4.4's
/// "no server push" note, rather than treated as a malformed frame.
#[derive(Debug, Eq, PartialEq)]
pub struct PushPromise {
    stream_id: StreamId,
    promised_id: StreamId,
    pseudo: Pseudo,
    fields: HeaderMap,
}

impl PushPromise {
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn promised_id(&self) -> StreamId {
        self.promised_id
    }

    pub fn load(
        head: Head,
        mut payload: Bytes,
        decoder: &mut hpack::Decoder,
    ) -> Result<(PushPromise, bool), FrameError> {
        if head.flag() & PADDED == PADDED {
            let pad_len = payload[0] as usize;
            payload = payload.slice(1..);
            payload.truncate(payload.len() - pad_len);
        }
        if payload.len() < 4 {
            return Err(FrameError::InvalidPayloadLength);
        }
        let promised_id = StreamId::parse(&payload[..4]);
        payload = payload.slice(4..);

        let mut pseudo = Pseudo::default();
        let mut fields = HeaderMap::new();
        decoder.decode(&mut std::io::Cursor::new(payload.as_ref()), |h| {
            if h.name.starts_with(':') {
                match h.name.as_str() {
                    ":method" => pseudo.method = Method::from_bytes(h.value.as_bytes()).ok(),
                    ":scheme" => pseudo.scheme = Some(Bytes::from(h.value)),
                    ":authority" => pseudo.authority = Some(Bytes::from(h.value)),
                    ":path" => pseudo.path = Some(Bytes::from(h.value)),
                    _ => {}
                }
            } else if let (Ok(name), Ok(value)) = (
                http::header::HeaderName::from_bytes(h.name.as_bytes()),
                http::header::HeaderValue::from_bytes(h.value.as_bytes()),
            ) {
                fields.append(name, value);
            }
        })?;

        let end_headers = head.flag() & END_HEADERS == END_HEADERS;
        Ok((
            PushPromise {
                stream_id: head.stream_id(),
                promised_id,
                pseudo,
                fields,
            },
            end_headers,
        ))
    }
}
