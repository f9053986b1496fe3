use std::cmp::Ordering;

/// Total order over fixed-width index keys.
pub trait KeyComparator: Send + Sync {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;
}

/// Keys holding a little-endian `i64` in their first 8 bytes.
pub struct IntegerComparator;

impl IntegerComparator {
    /// Encodes `value` as an 8-byte key.
    pub fn key(value: i64) -> [u8; 8] {
        value.to_le_bytes()
    }
}

impl KeyComparator for IntegerComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match (a.get(..8), b.get(..8)) {
            (Some(a8), Some(b8)) => {
                let a_val = i64::from_le_bytes(a8.try_into().unwrap_or([0; 8]));
                let b_val = i64::from_le_bytes(b8.try_into().unwrap_or([0; 8]));
                a_val.cmp(&b_val)
            }
            _ => a.len().cmp(&b.len()),
        }
    }
}

/// Lexicographic byte order.
pub struct BytewiseComparator;

impl KeyComparator for BytewiseComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}
