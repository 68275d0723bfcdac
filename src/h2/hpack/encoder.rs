use bytes::{BufMut, BytesMut};

use super::huffman;
use super::table::{self, DynamicTable, ENTRY_OVERHEAD};
use super::Header;

/// Encodes header lists against one connection-scoped dynamic table.
///
/// Every new header not already fully indexed is emitted as "literal with
/// incremental indexing" (RFC 7541 §6.2.1), mirroring what most HTTP/2
/// client implementations do for request headers: favor compression on
/// subsequent requests on the same connection over a smaller one-shot frame.
#[derive(Debug)]
pub struct Encoder {
    table: DynamicTable,
}

impl Encoder {
    pub fn new(max_dynamic_table_size: usize) -> Encoder {
        Encoder {
            table: DynamicTable::new(max_dynamic_table_size),
        }
    }

    /// Applies a peer SETTINGS_HEADER_TABLE_SIZE change, queuing a dynamic
    /// table size update to be emitted at the start of the next header block.
    pub fn set_max_dynamic_table_size(&mut self, size: usize) -> bool {
        let shrinking = size < self.table.max_size();
        self.table.set_max_size(size);
        shrinking
    }

    pub fn encode<'a, I>(&mut self, headers: I, dst: &mut BytesMut)
    where
        I: IntoIterator<Item = &'a Header>,
    {
        for header in headers {
            self.encode_one(header, dst);
        }
    }

    fn encode_one(&mut self, header: &Header, dst: &mut BytesMut) {
        if let Some((index, full_match)) = self.index_of(&header.name, &header.value) {
            if full_match {
                encode_int(index, 0x80, 7, dst);
                return;
            }
            if header.sensitive {
                encode_int(index, 0x10, 4, dst);
            } else {
                encode_int(index, 0x40, 6, dst);
                self.table.insert(header.name.clone(), header.value.clone());
            }
            encode_string(&header.value, dst);
            return;
        }

        if header.sensitive {
            encode_int(0, 0x10, 4, dst);
        } else {
            encode_int(0, 0x40, 6, dst);
        }
        encode_string(&header.name, dst);
        encode_string(&header.value, dst);
        if !header.sensitive {
            self.table.insert(header.name.clone(), header.value.clone());
        }
    }

    fn index_of(&self, name: &str, value: &str) -> Option<(usize, bool)> {
        if let Some((index, full)) = table::static_index_of(name, Some(value)) {
            return Some((index, full));
        }
        if let Some((index, full)) = self.table.index_of(name, Some(value)) {
            return Some((table::STATIC_TABLE.len() + index + 1, full));
        }
        None
    }

    /// The size a header would add to the dynamic table if inserted, per
    /// RFC 7541 §4.1 (used by callers sizing outgoing HEADERS frames).
    pub fn entry_size(name: &str, value: &str) -> usize {
        name.len() + value.len() + ENTRY_OVERHEAD
    }
}

fn encode_int(value: usize, prefix_flags: u8, prefix_bits: u8, dst: &mut BytesMut) {
    let max_prefix = (1u8 << prefix_bits) - 1;
    if value < max_prefix as usize {
        dst.put_u8(prefix_flags | value as u8);
        return;
    }

    dst.put_u8(prefix_flags | max_prefix);
    let mut remaining = value - max_prefix as usize;
    while remaining >= 128 {
        dst.put_u8(((remaining % 128) | 0x80) as u8);
        remaining /= 128;
    }
    dst.put_u8(remaining as u8);
}

fn encode_string(value: &str, dst: &mut BytesMut) {
    let raw = value.as_bytes();
    let huffman_len = huffman::encoded_len(raw);

    if huffman_len < raw.len() {
        encode_int(huffman_len, 0x80, 7, dst);
        huffman::encode(raw, dst);
    } else {
        encode_int(raw.len(), 0, 7, dst);
        dst.extend_from_slice(raw);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fully_indexed_static_entry_is_one_byte() {
        let mut encoder = Encoder::new(4096);
        let header = Header {
            name: ":method".into(),
            value: "GET".into(),
            sensitive: false,
        };
        let mut buf = BytesMut::new();
        encoder.encode(std::iter::once(&header), &mut buf);
        assert_eq!(buf.as_ref(), &[0x82]);
    }

    #[test]
    fn repeated_custom_header_becomes_fully_indexed_on_dynamic_table() {
        let mut encoder = Encoder::new(4096);
        let header = Header {
            name: "x-request-id".into(),
            value: "abc-123".into(),
            sensitive: false,
        };
        let mut first = BytesMut::new();
        encoder.encode(std::iter::once(&header), &mut first);
        let mut second = BytesMut::new();
        encoder.encode(std::iter::once(&header), &mut second);
        // Second encoding should be the short fully-indexed form.
        assert!(second.len() < first.len());
        assert_eq!(second[0] & 0x80, 0x80);
    }
}
