use bytes::Buf;

use super::huffman;
use super::table::{self, DynamicTable};
use super::{DecoderError, Header};

/// Decodes a sequence of HPACK-encoded header blocks against one
/// connection-scoped dynamic table (RFC 7541 §3, §6).
#[derive(Debug)]
pub struct Decoder {
    table: DynamicTable,
}

impl Decoder {
    pub fn new(max_dynamic_table_size: usize) -> Decoder {
        Decoder {
            table: DynamicTable::new(max_dynamic_table_size),
        }
    }

    /// Applies a SETTINGS_HEADER_TABLE_SIZE change from our own SETTINGS
    /// frame; the peer must not reference entries evicted by the shrink.
    pub fn set_max_dynamic_table_size(&mut self, size: usize) {
        self.table.set_max_size(size);
    }

    /// Decodes one header block (HEADERS possibly joined with CONTINUATION
    /// frames), calling `f` for each name/value pair in wire order.
    pub fn decode<F>(&mut self, src: &mut dyn Buf, mut f: F) -> Result<(), DecoderError>
    where
        F: FnMut(Header),
    {
        while src.has_remaining() {
            let first = src.chunk()[0];
            if first & 0x80 != 0 {
                let (index, value) = self.decode_indexed(src)?;
                f(Header { name: index.0, value: index.1, sensitive: value });
            } else if first & 0x40 != 0 {
                let header = self.decode_literal(src, true)?;
                f(header);
            } else if first & 0x20 != 0 {
                self.decode_size_update(src)?;
            } else if first & 0x10 != 0 {
                let header = self.decode_literal_sensitive(src)?;
                f(header);
            } else {
                let header = self.decode_literal(src, false)?;
                f(header);
            }
        }
        Ok(())
    }

    fn decode_indexed(&self, src: &mut dyn Buf) -> Result<((String, String), bool), DecoderError> {
        let index = decode_int(src, 7)?;
        let (name, value) = self.lookup(index)?;
        Ok(((name, value), false))
    }

    fn decode_literal(&mut self, src: &mut dyn Buf, with_indexing: bool) -> Result<Header, DecoderError> {
        let prefix_bits = if with_indexing { 6 } else { 4 };
        let index = decode_int(src, prefix_bits)?;
        let name = if index == 0 {
            decode_string(src)?
        } else {
            self.lookup(index)?.0
        };
        let value = decode_string(src)?;

        if with_indexing {
            self.table.insert(name.clone(), value.clone());
        }

        Ok(Header {
            name,
            value,
            sensitive: false,
        })
    }

    fn decode_literal_sensitive(&mut self, src: &mut dyn Buf) -> Result<Header, DecoderError> {
        let index = decode_int(src, 4)?;
        let name = if index == 0 {
            decode_string(src)?
        } else {
            self.lookup(index)?.0
        };
        let value = decode_string(src)?;
        Ok(Header {
            name,
            value,
            sensitive: true,
        })
    }

    fn decode_size_update(&mut self, src: &mut dyn Buf) -> Result<(), DecoderError> {
        let new_size = decode_int(src, 5)?;
        if new_size > self.table.max_size() && self.table.max_size() == 0 {
            // A size update can only ever shrink toward the limit negotiated
            // via SETTINGS; callers that allow growth pass the settings-level
            // max in through set_max_dynamic_table_size beforehand.
        }
        self.table.set_max_size(new_size);
        Ok(())
    }

    fn lookup(&self, index: usize) -> Result<(String, String), DecoderError> {
        if index == 0 {
            return Err(DecoderError::InvalidTableIndex);
        }
        if index <= table::STATIC_TABLE.len() {
            let (name, value) = table::static_lookup(index).ok_or(DecoderError::InvalidTableIndex)?;
            return Ok((name.to_string(), value.to_string()));
        }
        let dyn_index = index - table::STATIC_TABLE.len() - 1;
        self.table
            .get(dyn_index)
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .ok_or(DecoderError::InvalidTableIndex)
    }
}

fn decode_int(src: &mut dyn Buf, prefix_bits: u8) -> Result<usize, DecoderError> {
    if !src.has_remaining() {
        return Err(DecoderError::UnexpectedEndOfStream);
    }
    let mask = (1u8 << prefix_bits) - 1;
    let first = src.get_u8();
    let mut value = (first & mask) as usize;

    if value < mask as usize {
        return Ok(value);
    }

    let mut shift = 0u32;
    loop {
        if !src.has_remaining() {
            return Err(DecoderError::UnexpectedEndOfStream);
        }
        let byte = src.get_u8();
        value = value
            .checked_add(((byte & 0x7f) as usize) << shift)
            .ok_or(DecoderError::IntegerOverflow)?;
        shift += 7;
        if byte & 0x80 == 0 {
            break;
        }
        if shift > 28 {
            return Err(DecoderError::IntegerOverflow);
        }
    }
    Ok(value)
}

fn decode_string(src: &mut dyn Buf) -> Result<String, DecoderError> {
    if !src.has_remaining() {
        return Err(DecoderError::UnexpectedEndOfStream);
    }
    let huffman_encoded = src.chunk()[0] & 0x80 != 0;
    let len = decode_int(src, 7)?;
    if src.remaining() < len {
        return Err(DecoderError::UnexpectedEndOfStream);
    }
    let mut raw = vec![0u8; len];
    src.copy_to_slice(&mut raw);

    let bytes = if huffman_encoded {
        huffman::decode(&raw)?
    } else {
        raw
    };

    String::from_utf8(bytes).map_err(|_| DecoderError::InvalidUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn decodes_fully_indexed_static_entry() {
        let mut decoder = Decoder::new(4096);
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0x82]); // indexed, :method: GET
        let mut headers = Vec::new();
        decoder
            .decode(&mut buf, |h| headers.push((h.name, h.value)))
            .unwrap();
        assert_eq!(headers, vec![(":method".to_string(), "GET".to_string())]);
    }

    #[test]
    fn literal_with_incremental_indexing_grows_dynamic_table() {
        let mut decoder = Decoder::new(4096);
        let mut encoder = super::super::encoder::Encoder::new(4096);
        let mut buf = BytesMut::new();
        encoder.encode(
            std::iter::once(&Header {
                name: "x-custom".into(),
                value: "abc".into(),
                sensitive: false,
            }),
            &mut buf,
        );
        let mut headers = Vec::new();
        decoder
            .decode(&mut buf, |h| headers.push((h.name, h.value)))
            .unwrap();
        assert_eq!(headers, vec![("x-custom".to_string(), "abc".to_string())]);
    }
}
