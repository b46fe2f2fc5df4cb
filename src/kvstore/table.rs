//! Table namespacing on top of a flat key space.
//!
//! A table prefixes every key with `"<name>/"`, so `iter_prefix(table.prefix())`
//! enumerates exactly one table.

/// Key namespace inside a [`KvStore`](super::KvStore).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    name: &'static str,
    prefix: Vec<u8>,
}

impl Table {
    /// Create a table namespace. `name` must not contain `/`.
    pub fn new(name: &'static str) -> Self {
        debug_assert!(!name.contains('/'), "table names must not contain '/'");
        let mut prefix = Vec::with_capacity(name.len() + 1);
        prefix.extend_from_slice(name.as_bytes());
        prefix.push(b'/');
        Self { name, prefix }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// Full store key for a table-local key.
    pub fn key(&self, local: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.prefix.len() + local.len());
        key.extend_from_slice(&self.prefix);
        key.extend_from_slice(local);
        key
    }

    /// Table-local part of a store key, or `None` if the key belongs elsewhere.
    pub fn strip<'k>(&self, key: &'k [u8]) -> Option<&'k [u8]> {
        key.strip_prefix(self.prefix.as_slice())
    }
}

/// Smallest byte string greater than every string starting with `prefix`.
///
/// Returns `None` when no such bound exists (empty prefix or all `0xff`),
/// meaning the scan is unbounded above.
pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < 0xff {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_key_and_strip() {
        let table = Table::new("chunks");
        assert_eq!(table.prefix(), b"chunks/");
        assert_eq!(table.key(&[1, 2]), b"chunks/\x01\x02".to_vec());
        assert_eq!(table.strip(b"chunks/\x01\x02"), Some(&[1u8, 2][..]));
        assert_eq!(table.strip(b"relay-blob/\x01"), None);
    }

    #[test]
    fn test_tables_do_not_overlap() {
        let a = Table::new("relay");
        let b = Table::new("relay-blob");
        assert!(!b.key(b"x").starts_with(a.prefix()));
    }

    #[test]
    fn test_prefix_successor() {
        assert_eq!(prefix_successor(b"ab"), Some(b"ac".to_vec()));
        assert_eq!(prefix_successor(&[0x01, 0xff]), Some(vec![0x02]));
        assert_eq!(prefix_successor(&[0xff, 0xff]), None);
        assert_eq!(prefix_successor(&[]), None);
    }
}
