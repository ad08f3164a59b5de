//! # Memtable
//!
//! An in-memory, sorted, mutable write buffer: the first point of contact
//! for every write before it reaches an on-disk SSTable.
//!
//! ## Key properties
//! - **Sorted order**: entries iterate in ascending key order (required for
//!   SSTable flush).
//! - **Encoded values**: the map stores [`codec::EncodedValue`] wire bytes,
//!   so tombstones and regular writes share one representation end to end.
//! - **Byte budget**: each memtable has a fixed size limit; the engine
//!   rotates to a fresh memtable (and WAL) when a write no longer fits.
//! - **WAL binding**: every memtable remembers the [`FileMetadata`] of the
//!   WAL file that made its contents durable, so the log can be deleted
//!   once the memtable is flushed.
//!
//! ## Ordered-map seam
//!
//! The memtable only needs point insert/get and an in-order iterator, so
//! the backing structure is the [`SortedMap`] capability trait. The default
//! is [`BTreeSortedMap`]; a skiplist or ART drops in without touching the
//! engine.
//!
//! ## Example
//! ```rust
//! use memtable::Memtable;
//! use storage::{FileKind, FileMetadata};
//!
//! let mut m = Memtable::new(4096, FileMetadata::new(0, FileKind::Log));
//! m.insert(b"hello", b"world");
//! assert_eq!(m.get(b"hello").unwrap().value(), b"world");
//!
//! m.insert_tombstone(b"hello");
//! assert!(m.get(b"hello").unwrap().is_tombstone());
//! ```

use std::collections::BTreeMap;

use codec::{encode, EncodedValue, OpKind};
use storage::FileMetadata;

/// Ordered byte-string map capability required by the memtable.
///
/// Implementations must provide O(log n) point operations and iterate in
/// ascending key order.
pub trait SortedMap: Default {
    fn insert(&mut self, key: Vec<u8>, value: Vec<u8>);

    fn get(&self, key: &[u8]) -> Option<&[u8]>;

    /// In-order traversal of `(key, value)` pairs.
    fn iter(&self) -> Box<dyn Iterator<Item = (&[u8], &[u8])> + '_>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The default [`SortedMap`]: a `BTreeMap` over owned byte strings.
#[derive(Debug, Default)]
pub struct BTreeSortedMap {
    map: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl SortedMap for BTreeSortedMap {
    fn insert(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.map.insert(key, value);
    }

    fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.map.get(key).map(Vec::as_slice)
    }

    fn iter(&self) -> Box<dyn Iterator<Item = (&[u8], &[u8])> + '_> {
        Box::new(self.map.iter().map(|(k, v)| (k.as_slice(), v.as_slice())))
    }

    fn len(&self) -> usize {
        self.map.len()
    }
}

/// A bounded, sorted write buffer bound to one WAL file.
#[derive(Debug)]
pub struct Memtable<M: SortedMap = BTreeSortedMap> {
    map: M,
    size_used: usize,
    size_limit: usize,
    wal_meta: FileMetadata,
}

impl Memtable<BTreeSortedMap> {
    /// Creates an empty memtable with the given byte budget, bound to the
    /// WAL file identified by `wal_meta`.
    pub fn new(size_limit: usize, wal_meta: FileMetadata) -> Self {
        Self::with_map(BTreeSortedMap::default(), size_limit, wal_meta)
    }
}

impl<M: SortedMap> Memtable<M> {
    /// Creates a memtable over a caller-supplied [`SortedMap`].
    pub fn with_map(map: M, size_limit: usize, wal_meta: FileMetadata) -> Self {
        Self {
            map,
            size_used: 0,
            size_limit,
            wal_meta,
        }
    }

    /// Whether a write of `key`/`value` fits the remaining budget.
    ///
    /// The +1 accounts for the operation tag byte of the encoded value.
    pub fn has_room_for_write(&self, key: &[u8], value: &[u8]) -> bool {
        key.len() + value.len() + 1 <= self.size_limit.saturating_sub(self.size_used)
    }

    /// Stores `value` for `key`, replacing any previous entry.
    pub fn insert(&mut self, key: &[u8], value: &[u8]) {
        self.map.insert(key.to_vec(), encode(OpKind::Set, value));
        self.size_used += key.len() + value.len() + 1;
    }

    /// Records a deletion marker for `key`. It shadows older values both
    /// here and in any SSTable during reads.
    pub fn insert_tombstone(&mut self, key: &[u8]) {
        self.map.insert(key.to_vec(), encode(OpKind::Delete, &[]));
        self.size_used += 1;
    }

    /// Looks up `key`, returning the decoded entry (tombstones included).
    /// `None` means this memtable knows nothing about the key.
    pub fn get(&self, key: &[u8]) -> Option<EncodedValue> {
        self.map.get(key).and_then(EncodedValue::parse)
    }

    /// In-order traversal of `(key, encoded_value)` byte pairs, tombstones
    /// included. This is the SSTable flush source.
    pub fn iter(&self) -> Box<dyn Iterator<Item = (&[u8], &[u8])> + '_> {
        self.map.iter()
    }

    /// Approximate bytes used so far (keys + payloads + tag bytes).
    pub fn size(&self) -> usize {
        self.size_used
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Metadata of the WAL file holding this memtable's durable records.
    pub fn wal_file(&self) -> &FileMetadata {
        &self.wal_meta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::FileKind;

    fn log_meta() -> FileMetadata {
        FileMetadata::new(0, FileKind::Log)
    }

    fn table(limit: usize) -> Memtable {
        Memtable::new(limit, log_meta())
    }

    // -------------------- Basic CRUD --------------------

    #[test]
    fn insert_and_get_single_key() {
        let mut m = table(4096);
        m.insert(b"k1", b"v1");
        assert_eq!(m.len(), 1);
        assert_eq!(m.get(b"k1"), Some(EncodedValue::Set(b"v1".to_vec())));
    }

    #[test]
    fn insert_overwrites() {
        let mut m = table(4096);
        m.insert(b"k1", b"v1");
        m.insert(b"k1", b"v2");
        assert_eq!(m.get(b"k1").unwrap().value(), b"v2");
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn get_missing_key_returns_none() {
        let m = table(4096);
        assert!(m.get(b"nonexistent").is_none());
    }

    #[test]
    fn tombstone_shadows_value() {
        let mut m = table(4096);
        m.insert(b"k1", b"v1");
        m.insert_tombstone(b"k1");
        let entry = m.get(b"k1").unwrap();
        assert!(entry.is_tombstone());
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn tombstone_for_unknown_key() {
        let mut m = table(4096);
        m.insert_tombstone(b"ghost");
        assert!(m.get(b"ghost").unwrap().is_tombstone());
    }

    #[test]
    fn insert_after_tombstone_resurrects() {
        let mut m = table(4096);
        m.insert(b"k", b"v1");
        m.insert_tombstone(b"k");
        m.insert(b"k", b"v2");
        assert_eq!(m.get(b"k").unwrap().value(), b"v2");
    }

    // -------------------- Edge cases --------------------

    #[test]
    fn empty_key_and_value() {
        let mut m = table(4096);
        m.insert(b"", b"");
        assert_eq!(m.get(b""), Some(EncodedValue::Set(Vec::new())));
    }

    #[test]
    fn binary_key_and_value() {
        let mut m = table(4096);
        let key = vec![0x00, 0xFF, 0x80, 0x01];
        let val = vec![0xDE, 0xAD, 0xBE, 0xEF];
        m.insert(&key, &val);
        assert_eq!(m.get(&key).unwrap().value(), val.as_slice());
    }

    // -------------------- Size budget --------------------

    #[test]
    fn size_counts_key_payload_and_tag() {
        let mut m = table(4096);
        // key "ab" (2) + value "ccc" (3) + tag (1) = 6
        m.insert(b"ab", b"ccc");
        assert_eq!(m.size(), 6);
    }

    #[test]
    fn tombstone_adds_one_byte() {
        let mut m = table(4096);
        m.insert_tombstone(b"key");
        assert_eq!(m.size(), 1);
    }

    #[test]
    fn has_room_respects_limit() {
        let mut m = table(10);
        assert!(m.has_room_for_write(b"abc", b"def")); // 3+3+1 = 7 <= 10
        m.insert(b"abc", b"def");
        assert!(!m.has_room_for_write(b"abc", b"def")); // 7 > 3 remaining
        assert!(m.has_room_for_write(b"x", b"y")); // 3 <= 3
    }

    #[test]
    fn has_room_exact_fit() {
        let m = table(5);
        assert!(m.has_room_for_write(b"ab", b"cd")); // 2+2+1 == 5
        assert!(!m.has_room_for_write(b"ab", b"cde"));
    }

    // -------------------- Iterator ordering --------------------

    #[test]
    fn iter_yields_sorted_keys() {
        let mut m = table(4096);
        m.insert(b"c", b"3");
        m.insert(b"a", b"1");
        m.insert(b"b", b"2");

        let keys: Vec<&[u8]> = m.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"a".as_slice(), b"b".as_slice(), b"c".as_slice()]);
    }

    #[test]
    fn iter_yields_encoded_values() {
        let mut m = table(4096);
        m.insert(b"a", b"1");
        m.insert_tombstone(b"b");

        let entries: Vec<(Vec<u8>, EncodedValue)> = m
            .iter()
            .map(|(k, v)| (k.to_vec(), EncodedValue::parse(v).unwrap()))
            .collect();
        assert_eq!(entries[0].1, EncodedValue::Set(b"1".to_vec()));
        assert!(entries[1].1.is_tombstone());
    }

    #[test]
    fn iter_empty_memtable() {
        let m = table(4096);
        assert_eq!(m.iter().count(), 0);
        assert!(m.is_empty());
    }

    // -------------------- WAL binding --------------------

    #[test]
    fn remembers_wal_file() {
        let meta = FileMetadata::new(9, FileKind::Log);
        let m = Memtable::new(4096, meta.clone());
        assert_eq!(m.wal_file(), &meta);
    }

    // -------------------- Custom SortedMap --------------------

    /// A deliberately naive ordered map, to show the seam works.
    #[derive(Default)]
    struct VecSortedMap {
        entries: Vec<(Vec<u8>, Vec<u8>)>,
    }

    impl SortedMap for VecSortedMap {
        fn insert(&mut self, key: Vec<u8>, value: Vec<u8>) {
            match self.entries.binary_search_by(|(k, _)| k.as_slice().cmp(&key)) {
                Ok(i) => self.entries[i].1 = value,
                Err(i) => self.entries.insert(i, (key, value)),
            }
        }

        fn get(&self, key: &[u8]) -> Option<&[u8]> {
            self.entries
                .binary_search_by(|(k, _)| k.as_slice().cmp(key))
                .ok()
                .map(|i| self.entries[i].1.as_slice())
        }

        fn iter(&self) -> Box<dyn Iterator<Item = (&[u8], &[u8])> + '_> {
            Box::new(self.entries.iter().map(|(k, v)| (k.as_slice(), v.as_slice())))
        }

        fn len(&self) -> usize {
            self.entries.len()
        }
    }

    #[test]
    fn alternate_sorted_map_backend() {
        let mut m: Memtable<VecSortedMap> =
            Memtable::with_map(VecSortedMap::default(), 4096, log_meta());
        m.insert(b"b", b"2");
        m.insert(b"a", b"1");
        m.insert_tombstone(b"c");

        assert_eq!(m.get(b"a").unwrap().value(), b"1");
        let keys: Vec<&[u8]> = m.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"a".as_slice(), b"b".as_slice(), b"c".as_slice()]);
    }
}
