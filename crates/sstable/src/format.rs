//! SSTable binary format constants and small parse/encode helpers.
//!
//! The file footer is the **last 8 bytes**:
//!
//! ```text
//! [num_restarts_of_index: u32 LE][index_block_length: u32 LE]
//! ```
//!
//! which is exactly the trailer footer the index block writes for itself,
//! so locating the index block needs no extra bookkeeping.

use byteorder::{ByteOrder, LittleEndian};

/// Size of a block trailer footer and of the file footer: two u32s.
pub const FOOTER_SIZE: usize = 8;

/// Target size of a data block before compression.
pub const MAX_BLOCK_SIZE: usize = 4096;

/// A data block is flushed once it holds more than this many entry bytes
/// (90% of the target, leaving headroom for the trailer).
pub(crate) const BLOCK_FLUSH_LEN: usize = MAX_BLOCK_SIZE * 9 / 10;

/// Entries per chunk (restart interval) in data blocks.
pub(crate) const DATA_RESTART_INTERVAL: usize = 16;

/// Index blocks store every key in full: one entry per chunk.
pub(crate) const INDEX_RESTART_INTERVAL: usize = 1;

/// Parses a trailer footer into `(num_restarts, block_length)`.
pub(crate) fn parse_footer(footer: &[u8]) -> (usize, usize) {
    let num_restarts = LittleEndian::read_u32(&footer[..4]) as usize;
    let block_len = LittleEndian::read_u32(&footer[4..8]) as usize;
    (num_restarts, block_len)
}

/// Encodes an index entry payload locating one data block.
pub(crate) fn encode_block_handle(offset: u32, len: u32) -> [u8; 8] {
    let mut buf = [0u8; 8];
    LittleEndian::write_u32(&mut buf[..4], offset);
    LittleEndian::write_u32(&mut buf[4..], len);
    buf
}

/// Decodes an index entry payload back into `(offset, len)`.
pub(crate) fn parse_block_handle(buf: &[u8]) -> Option<(u32, u32)> {
    if buf.len() != 8 {
        return None;
    }
    Some((
        LittleEndian::read_u32(&buf[..4]),
        LittleEndian::read_u32(&buf[4..]),
    ))
}
