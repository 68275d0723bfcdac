//! HPACK's static table (RFC 7541 Appendix A) and the bounded, evicting
//! dynamic table (RFC 7541 §2.3.2, §4).

use std::collections::VecDeque;

/// The 61 static table entries, 1-indexed on the wire (index 0 is unused).
pub static STATIC_TABLE: [(&str, &str); 61] = [
    (":authority", ""),
    (":method", "GET"),
    (":method", "POST"),
    (":path", "/"),
    (":path", "/index.html"),
    (":scheme", "http"),
    (":scheme", "https"),
    (":status", "200"),
    (":status", "204"),
    (":status", "206"),
    (":status", "304"),
    (":status", "400"),
    (":status", "404"),
    (":status", "500"),
    ("accept-charset", ""),
    ("accept-encoding", "gzip, deflate"),
    ("accept-language", ""),
    ("accept-ranges", ""),
    ("accept", ""),
    ("access-control-allow-origin", ""),
    ("age", ""),
    ("allow", ""),
    ("authorization", ""),
    ("cache-control", ""),
    ("content-disposition", ""),
    ("content-encoding", ""),
    ("content-language", ""),
    ("content-length", ""),
    ("content-location", ""),
    ("content-range", ""),
    ("content-type", ""),
    ("cookie", ""),
    ("date", ""),
    ("etag", ""),
    ("expect", ""),
    ("expires", ""),
    ("from", ""),
    ("host", ""),
    ("if-match", ""),
    ("if-modified-since", ""),
    ("if-none-match", ""),
    ("if-range", ""),
    ("if-unmodified-since", ""),
    ("last-modified", ""),
    ("link", ""),
    ("location", ""),
    ("max-forwards", ""),
    ("proxy-authenticate", ""),
    ("proxy-authorization", ""),
    ("range", ""),
    ("referer", ""),
    ("refresh", ""),
    ("retry-after", ""),
    ("server", ""),
    ("set-cookie", ""),
    ("strict-transport-security", ""),
    ("transfer-encoding", ""),
    ("user-agent", ""),
    ("vary", ""),
    ("via", ""),
    ("www-authenticate", ""),
];

/// Per-entry bookkeeping overhead counted against a table's size limit
/// (RFC 7541 §4.1): 32 bytes, to account for the cost of maintaining each
/// entry as a linked-list node in a real implementation.
pub const ENTRY_OVERHEAD: usize = 32;

pub fn static_lookup(index: usize) -> Option<(&'static str, &'static str)> {
    STATIC_TABLE.get(index.checked_sub(1)?).copied()
}

pub fn static_index_of(name: &str, value: Option<&str>) -> Option<(usize, bool)> {
    let mut name_only: Option<usize> = None;
    for (i, &(n, v)) in STATIC_TABLE.iter().enumerate() {
        if n == name {
            if let Some(value) = value {
                if v == value {
                    return Some((i + 1, true));
                }
            }
            name_only.get_or_insert(i + 1);
        }
    }
    name_only.map(|i| (i, false))
}

#[derive(Debug, Clone)]
struct DynamicEntry {
    name: String,
    value: String,
}

impl DynamicEntry {
    fn size(&self) -> usize {
        self.name.len() + self.value.len() + ENTRY_OVERHEAD
    }
}

/// The bounded, FIFO-evicting dynamic table shared by a connection's HPACK
/// encoder or decoder. New entries are inserted at the front (wire index 62);
/// the oldest entries are evicted from the back once `size()` would exceed
/// `max_size`.
#[derive(Debug, Clone)]
pub struct DynamicTable {
    entries: VecDeque<DynamicEntry>,
    size: usize,
    max_size: usize,
}

impl DynamicTable {
    pub fn new(max_size: usize) -> DynamicTable {
        DynamicTable {
            entries: VecDeque::new(),
            size: 0,
            max_size,
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Applies a dynamic table size update (RFC 7541 §6.3), evicting entries
    /// until the new, possibly smaller, limit is respected.
    pub fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
        self.evict_to_fit();
    }

    pub fn insert(&mut self, name: String, value: String) {
        let entry = DynamicEntry { name, value };
        let entry_size = entry.size();
        self.entries.push_front(entry);
        self.size += entry_size;
        self.evict_to_fit();
    }

    pub fn get(&self, index: usize) -> Option<(&str, &str)> {
        self.entries
            .get(index)
            .map(|e| (e.name.as_str(), e.value.as_str()))
    }

    pub fn index_of(&self, name: &str, value: Option<&str>) -> Option<(usize, bool)> {
        let mut name_only: Option<usize> = None;
        for (i, entry) in self.entries.iter().enumerate() {
            if entry.name == name {
                if let Some(value) = value {
                    if entry.value == value {
                        return Some((i, true));
                    }
                }
                name_only.get_or_insert(i);
            }
        }
        name_only.map(|i| (i, false))
    }

    fn evict_to_fit(&mut self) {
        while self.size > self.max_size {
            match self.entries.pop_back() {
                Some(evicted) => self.size -= evicted.size(),
                None => {
                    self.size = 0;
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_table_status_200_at_index_8() {
        assert_eq!(static_lookup(8), Some((":status", "200")));
    }

    #[test]
    fn dynamic_table_evicts_oldest_first() {
        let mut table = DynamicTable::new(ENTRY_OVERHEAD * 2 + 10);
        table.insert("a".into(), "1".into());
        table.insert("b".into(), "2".into());
        // Entry size is 1 + 1 + 32 = 34 each; two fit, a third evicts "a".
        table.insert("c".into(), "3".into());
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(0), Some(("c", "3")));
    }

    #[test]
    fn shrinking_max_size_evicts() {
        let mut table = DynamicTable::new(1024);
        table.insert("name".into(), "value".into());
        table.set_max_size(0);
        assert!(table.is_empty());
    }
}
