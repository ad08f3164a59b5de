//! Prefix-compressed block building and searching.
//!
//! A block body is a run of sorted entries partitioned into chunks. The
//! first entry of a chunk stores its key in full; the rest store only the
//! suffix past their common prefix with that first key. Chunk start
//! offsets (restart points) are collected while writing and appended as a
//! trailer, giving readers binary-search anchors:
//!
//! ```text
//! entry+ | restart_offsets (u32 LE each) | u32 num_restarts | u32 block_len
//! ```

use byteorder::{ByteOrder, LittleEndian};
use codec::{get_uvarint, put_uvarint};

use crate::format::FOOTER_SIZE;
use crate::Error;

/// Accumulates sorted `(key, value)` entries into a block body.
///
/// Data blocks restart every 16 entries; the index block restarts on every
/// entry so its keys are never prefix-compressed. Keys must be added in
/// non-decreasing order; the writer does not check.
pub(crate) struct BlockWriter {
    buf: Vec<u8>,
    offsets: Vec<u32>,
    curr_offset: u32,
    next_offset: u32,
    chunk_size: usize,
    num_entries: usize,
    prefix_key: Option<Vec<u8>>,
    track_offsets: bool,
}

impl BlockWriter {
    pub(crate) fn new(chunk_size: usize, track_offsets: bool) -> Self {
        Self {
            buf: Vec::new(),
            offsets: Vec::new(),
            curr_offset: 0,
            next_offset: 0,
            chunk_size,
            num_entries: 0,
            prefix_key: None,
            track_offsets,
        }
    }

    /// Appends one entry and returns the number of bytes it used.
    pub(crate) fn add(&mut self, key: &[u8], val: &[u8]) -> usize {
        let shared = self.shared_prefix_len(key);
        let before = self.buf.len();
        put_uvarint(&mut self.buf, shared as u64);
        put_uvarint(&mut self.buf, (key.len() - shared) as u64);
        put_uvarint(&mut self.buf, val.len() as u64);
        self.buf.extend_from_slice(&key[shared..]);
        self.buf.extend_from_slice(val);
        let written = self.buf.len() - before;

        self.num_entries += 1;
        self.next_offset += written as u32;
        if self.num_entries == self.chunk_size {
            // Chunk complete: record its start and begin a fresh one.
            self.offsets.push(self.curr_offset);
            self.curr_offset = self.next_offset;
            self.num_entries = 0;
            self.prefix_key = None;
        }
        written
    }

    /// Common prefix with the current chunk's first key. The first entry
    /// of a chunk becomes that key and shares nothing.
    fn shared_prefix_len(&mut self, key: &[u8]) -> usize {
        match &self.prefix_key {
            None => {
                self.prefix_key = Some(key.to_vec());
                0
            }
            Some(prefix) => prefix
                .iter()
                .zip(key)
                .take_while(|(a, b)| a == b)
                .count(),
        }
    }

    /// Flushes the tail chunk and appends the restart trailer. The buffer
    /// then holds a complete block body; restart state is cleared.
    pub(crate) fn finish(&mut self) {
        debug_assert!(self.track_offsets, "trailer-less writers never finish");
        if self.prefix_key.is_some() {
            self.offsets.push(self.curr_offset);
        }
        let num_restarts = self.offsets.len() as u32;
        let mut word = [0u8; 4];
        for &offset in &self.offsets {
            LittleEndian::write_u32(&mut word, offset);
            self.buf.extend_from_slice(&word);
        }
        LittleEndian::write_u32(&mut word, num_restarts);
        self.buf.extend_from_slice(&word);
        // Total block length: entries + restart array + this trailer word
        // pair.
        LittleEndian::write_u32(&mut word, self.buf.len() as u32 + 4);
        self.buf.extend_from_slice(&word);

        self.offsets.clear();
        self.curr_offset = 0;
        self.next_offset = 0;
        self.num_entries = 0;
        self.prefix_key = None;
    }

    /// The block bytes written so far (a full body only after `finish`).
    pub(crate) fn data(&self) -> &[u8] {
        &self.buf
    }

    /// Clears everything, ready to build the next block.
    pub(crate) fn reset(&mut self) {
        self.buf.clear();
        self.offsets.clear();
        self.curr_offset = 0;
        self.next_offset = 0;
        self.num_entries = 0;
        self.prefix_key = None;
    }
}

/// Which restart position a [`BlockReader::search`] returns.
#[derive(Debug, Clone, Copy)]
pub(crate) enum SearchBound {
    /// First restart whose key is strictly greater than the search key.
    /// Data-block usage: the preceding chunk is the only one that can
    /// contain the key.
    FirstGreater,
    /// First restart whose key is greater than or equal to the search key.
    /// Index-block usage: that entry's data block covers the key.
    FirstGreaterOrEqual,
}

/// Zero-copy view over a finished block body.
///
/// Returned key/value slices borrow the block buffer; callers must not
/// hold them across a buffer reuse.
pub(crate) struct BlockReader<'a> {
    buf: &'a [u8],
    offsets: &'a [u8],
    num_restarts: usize,
}

impl<'a> BlockReader<'a> {
    /// Builds a reader by parsing the trailer footer in `buf`'s last
    /// 8 bytes.
    pub(crate) fn from_block(buf: &'a [u8]) -> Result<Self, Error> {
        if buf.len() < FOOTER_SIZE {
            return Err(Error::Corrupt("block too small for trailer"));
        }
        let (num_restarts, _block_len) =
            crate::format::parse_footer(&buf[buf.len() - FOOTER_SIZE..]);
        let offsets_end = buf.len() - FOOTER_SIZE;
        let offsets_start = offsets_end
            .checked_sub(num_restarts * 4)
            .ok_or(Error::Corrupt("restart count exceeds block"))?;
        Ok(Self {
            buf,
            offsets: &buf[offsets_start..offsets_end],
            num_restarts,
        })
    }

    pub(crate) fn num_restarts(&self) -> usize {
        self.num_restarts
    }

    /// Byte offset where the chunk at `pos` starts. `pos == num_restarts`
    /// yields the end of the entry region, so it bounds the final chunk.
    pub(crate) fn restart_offset(&self, pos: usize) -> usize {
        if pos == self.num_restarts {
            self.buf.len() - FOOTER_SIZE - 4 * self.num_restarts
        } else {
            LittleEndian::read_u32(&self.offsets[pos * 4..pos * 4 + 4]) as usize
        }
    }

    /// Parses the restart entry at `pos` into `(key, value)`. Restart
    /// entries always store their key in full.
    pub(crate) fn fetch_at(&self, pos: usize) -> (&'a [u8], &'a [u8]) {
        let mut off = self.restart_offset(pos);
        let (shared, n) = get_uvarint(&self.buf[off..]);
        debug_assert_eq!(shared, 0, "restart entries share no prefix");
        off += n;
        let (key_len, n) = get_uvarint(&self.buf[off..]);
        off += n;
        let (val_len, n) = get_uvarint(&self.buf[off..]);
        off += n;
        let key = &self.buf[off..off + key_len as usize];
        off += key_len as usize;
        let val = &self.buf[off..off + val_len as usize];
        (key, val)
    }

    pub(crate) fn key_at(&self, pos: usize) -> &'a [u8] {
        self.fetch_at(pos).0
    }

    pub(crate) fn val_at(&self, pos: usize) -> &'a [u8] {
        self.fetch_at(pos).1
    }

    /// The raw entry bytes of the chunk anchored at restart `pos`.
    pub(crate) fn chunk(&self, pos: usize) -> &'a [u8] {
        &self.buf[self.restart_offset(pos)..self.restart_offset(pos + 1)]
    }

    /// Binary search over restart keys. Returns `num_restarts` when no
    /// qualifying restart exists.
    pub(crate) fn search(&self, search_key: &[u8], bound: SearchBound) -> usize {
        let (mut low, mut high) = (0, self.num_restarts);
        while low < high {
            let mid = (low + high) / 2;
            let restart_key = self.key_at(mid);
            let advance = match bound {
                SearchBound::FirstGreater => search_key >= restart_key,
                SearchBound::FirstGreaterOrEqual => search_key > restart_key,
            };
            if advance {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        low
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(n: usize) -> Vec<(Vec<u8>, Vec<u8>)> {
        (0..n)
            .map(|i| {
                (
                    format!("key{i:04}").into_bytes(),
                    format!("value{i:04}").into_bytes(),
                )
            })
            .collect()
    }

    fn build_block(chunk_size: usize, entries: &[(Vec<u8>, Vec<u8>)]) -> Vec<u8> {
        let mut w = BlockWriter::new(chunk_size, true);
        for (k, v) in entries {
            w.add(k, v);
        }
        w.finish();
        w.data().to_vec()
    }

    /// Decode every entry of a block, reconstructing prefix-compressed
    /// keys chunk by chunk.
    fn decode_block(block: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        let r = BlockReader::from_block(block).unwrap();
        let mut out = Vec::new();
        for pos in 0..r.num_restarts() {
            let chunk = r.chunk(pos);
            let mut off = 0;
            let mut key = Vec::new();
            loop {
                let (shared, n) = get_uvarint(&chunk[off..]);
                if n == 0 {
                    break;
                }
                off += n;
                let (unshared, n) = get_uvarint(&chunk[off..]);
                off += n;
                let (val_len, n) = get_uvarint(&chunk[off..]);
                off += n;
                key.truncate(shared as usize);
                key.extend_from_slice(&chunk[off..off + unshared as usize]);
                off += unshared as usize;
                let val = chunk[off..off + val_len as usize].to_vec();
                off += val_len as usize;
                out.push((key.clone(), val));
            }
        }
        out
    }

    #[test]
    fn roundtrip_preserves_entries_and_order() {
        let input = entries(50);
        let block = build_block(16, &input);
        assert_eq!(decode_block(&block), input);
    }

    #[test]
    fn restart_every_chunk_size_entries() {
        // Exactly one chunk at 16 entries, a second restart at the 17th.
        let block = build_block(16, &entries(16));
        let r = BlockReader::from_block(&block).unwrap();
        assert_eq!(r.num_restarts(), 1);

        let block = build_block(16, &entries(17));
        let r = BlockReader::from_block(&block).unwrap();
        assert_eq!(r.num_restarts(), 2);
        // The 17th entry anchors the second chunk with its full key.
        assert_eq!(r.key_at(1), b"key0016");
    }

    #[test]
    fn index_style_block_restarts_every_entry() {
        let block = build_block(1, &entries(5));
        let r = BlockReader::from_block(&block).unwrap();
        assert_eq!(r.num_restarts(), 5);
        for (i, (k, v)) in entries(5).iter().enumerate() {
            assert_eq!(r.key_at(i), k.as_slice());
            assert_eq!(r.val_at(i), v.as_slice());
        }
    }

    #[test]
    fn trailer_records_block_length() {
        let block = build_block(16, &entries(3));
        let (num_restarts, block_len) =
            crate::format::parse_footer(&block[block.len() - FOOTER_SIZE..]);
        assert_eq!(num_restarts, 1);
        assert_eq!(block_len, block.len());
    }

    #[test]
    fn final_chunk_is_bounded_by_entry_region_end() {
        let block = build_block(4, &entries(10));
        let r = BlockReader::from_block(&block).unwrap();
        assert_eq!(r.num_restarts(), 3);
        let end = r.restart_offset(3);
        assert_eq!(end, block.len() - FOOTER_SIZE - 4 * 3);
        // The final chunk's bytes decode to the trailing two entries.
        assert!(r.chunk(2).len() < end);
    }

    #[test]
    fn search_first_greater_locates_containing_chunk() {
        // Chunks of 4: restarts at key0000, key0004, key0008.
        let block = build_block(4, &entries(12));
        let r = BlockReader::from_block(&block).unwrap();

        // A key inside the middle chunk: first strictly-greater restart
        // is key0008, so the caller scans chunk 1.
        assert_eq!(r.search(b"key0005", SearchBound::FirstGreater), 2);
        // Exact restart key still lands past its own restart.
        assert_eq!(r.search(b"key0004", SearchBound::FirstGreater), 2);
        // Before everything.
        assert_eq!(r.search(b"key0000", SearchBound::FirstGreater), 1);
        assert_eq!(r.search(b"aaa", SearchBound::FirstGreater), 0);
        // Past everything.
        assert_eq!(r.search(b"zzz", SearchBound::FirstGreater), 3);
    }

    #[test]
    fn search_first_greater_or_equal_for_index_blocks() {
        let block = build_block(1, &entries(3));
        let r = BlockReader::from_block(&block).unwrap();

        assert_eq!(r.search(b"key0000", SearchBound::FirstGreaterOrEqual), 0);
        assert_eq!(r.search(b"key0000a", SearchBound::FirstGreaterOrEqual), 1);
        assert_eq!(r.search(b"key0002", SearchBound::FirstGreaterOrEqual), 2);
        // Greater than the largest key: no restart qualifies.
        assert_eq!(r.search(b"key9999", SearchBound::FirstGreaterOrEqual), 3);
    }

    #[test]
    fn prefix_compression_saves_shared_bytes() {
        // 32 keys sharing a 10-byte prefix, two chunks of 16: only the two
        // restart keys carry the prefix in full.
        let input: Vec<(Vec<u8>, Vec<u8>)> = (0..32)
            .map(|i| {
                (
                    format!("accusantium{i:03}").into_bytes(),
                    b"v".to_vec(),
                )
            })
            .collect();
        let block = build_block(16, &input);

        let naive: usize = input
            .iter()
            .map(|(k, v)| 1 + k.len() + 1 + v.len() + 1)
            .sum();
        let entry_bytes = block.len() - FOOTER_SIZE - 2 * 4;
        let saved = naive - entry_bytes;
        // "accusantium" is shared by all 32; 30 non-restart entries skip at
        // least those 10 bytes (they actually share more).
        assert!(saved >= 10 * 30, "saved only {saved} bytes");

        assert_eq!(decode_block(&block), input);
    }

    #[test]
    fn reset_clears_all_state() {
        let mut w = BlockWriter::new(16, true);
        w.add(b"a", b"1");
        w.finish();
        w.reset();
        assert!(w.data().is_empty());

        // A fresh block built after reset is identical to a first block.
        w.add(b"b", b"2");
        w.finish();
        let block = w.data().to_vec();
        assert_eq!(decode_block(&block), vec![(b"b".to_vec(), b"2".to_vec())]);
    }

    #[test]
    fn rejects_block_smaller_than_trailer() {
        assert!(matches!(
            BlockReader::from_block(&[0u8; 4]),
            Err(Error::Corrupt(_))
        ));
    }

    #[test]
    fn empty_key_and_value_entries() {
        let mut w = BlockWriter::new(16, true);
        w.add(b"", b"");
        w.add(b"k", b"");
        w.finish();
        let block = w.data().to_vec();
        assert_eq!(
            decode_block(&block),
            vec![(Vec::new(), Vec::new()), (b"k".to_vec(), Vec::new())]
        );
    }
}
