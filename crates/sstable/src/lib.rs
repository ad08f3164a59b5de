//! # SSTable: Sorted String Table
//!
//! Immutable, on-disk storage files for the engine. When a memtable fills
//! up it is flushed to an SSTable; once written the file is never modified
//! again, only read and (outside this crate) eventually dropped.
//!
//! ## File layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │ DATA BLOCK (snappy-compressed)                              │
//! │ DATA BLOCK (snappy-compressed)                              │
//! │ ...                                                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │ INDEX BLOCK (uncompressed)                                  │
//! │   one entry per data block:                                 │
//! │   key = largest key of the block                            │
//! │   value = encoded (u32 offset | u32 compressed length)      │
//! ├─────────────────────────────────────────────────────────────┤
//! │ FOOTER (last 8 bytes)                                       │
//! │   u32 num_restarts_of_index | u32 index_block_length        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every block body shares one shape: prefix-compressed entries grouped
//! into chunks of up to 16 (data) or exactly 1 (index) entries, followed
//! by a trailer of restart offsets. An entry is
//! `uvarint shared | uvarint unshared | uvarint val_len | suffix | value`;
//! the first entry of each chunk stores its key in full and anchors the
//! binary search. All integers are little-endian. The index block's own
//! trailer doubles as the file footer.
//!
//! A point lookup costs at most three positioned reads: footer, index
//! block, one data block.

use std::io;
use thiserror::Error;

mod block;
mod format;
mod reader;
mod writer;

pub use format::{FOOTER_SIZE, MAX_BLOCK_SIZE};
pub use reader::SSTableReader;
pub use writer::SSTableWriter;

#[derive(Debug, Error)]
pub enum Error {
    /// The key is not present in this table. Callers fall through to the
    /// next (older) table; matching is structural, never on the message.
    #[error("key not found")]
    KeyNotFound,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("corrupt sstable: {0}")]
    Corrupt(&'static str),
    #[error("block decompression failed: {0}")]
    Decompress(#[from] snap::Error),
}
