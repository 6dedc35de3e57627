//! Key/value metadata block appended after a demo's frame stream
//!
//! The block is a flat sequence of `key\0value\0` pairs in insertion order.
//! Setting an existing key removes the old pair and appends the new one.

use log::warn;

pub const DEFAULT_META_CAPACITY: usize = 16 * 1024;

#[derive(Debug, Clone)]
pub struct MetadataStore {
    data: Vec<u8>,
    capacity: usize,
}

impl MetadataStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Empties the buffer, returning the size of what remains
    pub fn clear(&mut self) -> usize {
        self.data.clear();
        self.data.len()
    }

    /// Sets `key` to `value`, returning false when the pair does not fit
    pub fn set(&mut self, key: &str, value: &str) -> bool {
        if key.is_empty() || key.contains('\0') || value.contains('\0') {
            warn!("Rejected demo metadata key {:?}", key);
            return false;
        }

        self.remove(key);

        let needed = key.len() + value.len() + 2;
        if self.data.len() + needed > self.capacity {
            warn!("Demo metadata full, dropping key {}", key);
            return false;
        }

        self.data.extend_from_slice(key.as_bytes());
        self.data.push(0);
        self.data.extend_from_slice(value.as_bytes());
        self.data.push(0);
        true
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    /// Iterates key/value pairs in stored order
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        parse_pairs(&self.data)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Rebuilds a store from a metadata block read back from a demo file
    pub fn parse(bytes: &[u8]) -> Self {
        let mut store = Self::new(bytes.len().max(DEFAULT_META_CAPACITY));
        for (key, value) in parse_pairs(bytes) {
            store.set(key, value);
        }
        store
    }

    fn remove(&mut self, key: &str) {
        let mut offset = 0;
        while offset < self.data.len() {
            let Some(pair_len) = pair_length(&self.data[offset..]) else {
                self.data.truncate(offset);
                return;
            };
            let key_end = offset + key_length(&self.data[offset..]);
            if &self.data[offset..key_end] == key.as_bytes() {
                self.data.drain(offset..offset + pair_len);
                return;
            }
            offset += pair_len;
        }
    }
}

impl Default for MetadataStore {
    fn default() -> Self {
        Self::new(DEFAULT_META_CAPACITY)
    }
}

fn key_length(bytes: &[u8]) -> usize {
    bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len())
}

/// Length of the pair at the start of `bytes` including both terminators
fn pair_length(bytes: &[u8]) -> Option<usize> {
    let key_end = bytes.iter().position(|b| *b == 0)?;
    let value_end = bytes[key_end + 1..].iter().position(|b| *b == 0)?;
    Some(key_end + 1 + value_end + 1)
}

fn parse_pairs(bytes: &[u8]) -> impl Iterator<Item = (&str, &str)> {
    let mut fields = bytes.split(|b| *b == 0);
    std::iter::from_fn(move || loop {
        let key = fields.next()?;
        let value = fields.next()?;
        if key.is_empty() {
            continue;
        }
        if let (Ok(key), Ok(value)) = (std::str::from_utf8(key), std::str::from_utf8(value)) {
            return Some((key, value));
        }
    })
}
