use std::cmp::Ordering;
use std::fs::File;
use std::io;

use codec::{get_uvarint, EncodedValue};

use crate::block::{BlockReader, SearchBound};
use crate::format::{parse_block_handle, parse_footer, FOOTER_SIZE, MAX_BLOCK_SIZE};
use crate::Error;

/// Point lookups against one SSTable file.
///
/// [`open`](SSTableReader::open) only stats the file. Each
/// [`get`](SSTableReader::get) performs at most three positioned reads:
/// the footer, the index block, and the one data block that can contain
/// the key (two reads when the index already rules the key out).
///
/// Scratch buffers are reused across calls, so returned values are copied
/// out; nothing borrows the reader after `get` returns.
pub struct SSTableReader {
    file: File,
    file_size: u64,
    /// Raw bytes read from disk: the index block, then the compressed
    /// data block.
    block_buf: Vec<u8>,
    /// Decompressed data block.
    data_buf: Vec<u8>,
    decompressor: snap::raw::Decoder,
    /// Candidate key reconstructed during the chunk scan. Kept separate
    /// from the block buffer so reconstruction never aliases the bytes
    /// being parsed.
    key_scratch: Vec<u8>,
}

impl SSTableReader {
    /// Records the file size; no other I/O happens until the first `get`.
    pub fn open(file: File) -> Result<Self, Error> {
        let file_size = file.metadata()?.len();
        Ok(Self {
            file,
            file_size,
            block_buf: Vec::with_capacity(MAX_BLOCK_SIZE),
            data_buf: Vec::new(),
            decompressor: snap::raw::Decoder::new(),
            key_scratch: Vec::new(),
        })
    }

    /// Looks up `search_key`, returning its encoded entry (tombstones
    /// included) or [`Error::KeyNotFound`].
    pub fn get(&mut self, search_key: &[u8]) -> Result<EncodedValue, Error> {
        if self.file_size < FOOTER_SIZE as u64 {
            return Err(Error::Corrupt("file smaller than footer"));
        }

        // Phase 1: footer locates the index block.
        let mut footer = [0u8; FOOTER_SIZE];
        read_exact_at(&self.file, &mut footer, self.file_size - FOOTER_SIZE as u64)?;
        let (_num_restarts, index_len) = parse_footer(&footer);
        if index_len as u64 > self.file_size {
            return Err(Error::Corrupt("index length exceeds file"));
        }

        // Phase 2: index block names the data block that can hold the key.
        self.block_buf.resize(index_len, 0);
        read_exact_at(
            &self.file,
            &mut self.block_buf,
            self.file_size - index_len as u64,
        )?;
        let index = BlockReader::from_block(&self.block_buf)?;
        let pos = index.search(search_key, SearchBound::FirstGreaterOrEqual);
        if pos >= index.num_restarts() {
            // Larger than the largest key in this table.
            return Err(Error::KeyNotFound);
        }
        let entry = EncodedValue::parse(index.val_at(pos))
            .ok_or(Error::Corrupt("unparsable index entry"))?;
        let (data_offset, data_len) =
            parse_block_handle(entry.value()).ok_or(Error::Corrupt("bad block handle"))?;

        // Phase 3: fetch and decompress that data block, then narrow to
        // one chunk.
        self.block_buf.resize(data_len as usize, 0);
        read_exact_at(&self.file, &mut self.block_buf, data_offset as u64)?;
        let decompressed_len = snap::raw::decompress_len(&self.block_buf)?;
        self.data_buf.resize(decompressed_len, 0);
        self.decompressor
            .decompress(&self.block_buf, &mut self.data_buf)?;

        let data = BlockReader::from_block(&self.data_buf)?;
        let chunk_pos = data.search(search_key, SearchBound::FirstGreater);
        if chunk_pos == 0 {
            // Precedes the block's first restart key: cannot be present.
            return Err(Error::KeyNotFound);
        }
        let chunk = data.chunk(chunk_pos - 1);
        sequential_search_chunk(chunk, search_key, &mut self.key_scratch)
    }
}

/// Walks one chunk in order, reconstructing each prefix-compressed key
/// into `key_scratch` until the search key is found or passed.
fn sequential_search_chunk(
    chunk: &[u8],
    search_key: &[u8],
    key_scratch: &mut Vec<u8>,
) -> Result<EncodedValue, Error> {
    key_scratch.clear();
    let mut off = 0;
    loop {
        let (shared, n) = get_uvarint(&chunk[off..]);
        if n == 0 {
            break; // chunk exhausted
        }
        off += n;
        let (unshared, n) = get_uvarint(&chunk[off..]);
        if n == 0 {
            break;
        }
        off += n;
        let (val_len, n) = get_uvarint(&chunk[off..]);
        if n == 0 {
            break;
        }
        off += n;

        let key_end = off + unshared as usize;
        let val_end = key_end + val_len as usize;
        if val_end > chunk.len() {
            return Err(Error::Corrupt("entry overruns chunk"));
        }

        // Candidate key = shared prefix of the chunk's anchor + suffix.
        // Keys are sorted, so each entry shares at most as much as the one
        // before it and the scratch prefix stays valid.
        key_scratch.truncate(shared as usize);
        key_scratch.extend_from_slice(&chunk[off..key_end]);

        match search_key.cmp(key_scratch.as_slice()) {
            Ordering::Equal => {
                return EncodedValue::parse(&chunk[key_end..val_end])
                    .ok_or(Error::Corrupt("unparsable entry value"));
            }
            Ordering::Less => break, // sorted: it cannot appear later
            Ordering::Greater => off = val_end,
        }
    }
    Err(Error::KeyNotFound)
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "failed to fill whole buffer",
                ))
            }
            Ok(n) => {
                let rest = buf;
                buf = &mut rest[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
