//! Write-ahead log with a fixed-size, chunked block format.
//!
//! The log is a sequence of 4096-byte blocks. Each block holds one or more
//! chunks of the form `u16 payload_len | u8 chunk_type | payload`; a record
//! too large for the space left in a block is split across blocks with the
//! type sequence `FULL` or `FIRST MIDDLE* LAST`. Every chunk write is
//! followed by an fsync, so a record that was acknowledged is durable even
//! if the process dies immediately afterwards. The last block of a file may
//! be short; the reader treats that as the expected shape of a crash.

use byteorder::{ByteOrder, LittleEndian};
use std::fs::File;
use std::io::{self, Read, Write};

use codec::{encode, get_uvarint, put_uvarint, EncodedValue, OpKind};
use thiserror::Error;

/// Size of one WAL block. Chunks never cross a block boundary.
pub const BLOCK_SIZE: usize = 4096;

/// Chunk header: u16 payload length + u8 chunk type.
const HEADER_SIZE: usize = 3;

const CHUNK_FULL: u8 = 1;
const CHUNK_FIRST: u8 = 2;
const CHUNK_MIDDLE: u8 = 3;
const CHUNK_LAST: u8 = 4;

#[derive(Debug, Error)]
pub enum WalError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("truncated record")]
    Truncated,
    #[error("corrupt record")]
    Corrupt,
}

/// Appends records to a WAL file, fsyncing after every chunk.
///
/// Record payloads are `uvarint key_len | uvarint val_len | key |
/// encoded_value`, where the encoded value carries the operation tag.
pub struct WalWriter {
    file: File,
    block: [u8; BLOCK_SIZE],
    offset: usize,
    scratch: Vec<u8>,
}

impl WalWriter {
    pub fn new(file: File) -> Self {
        Self {
            file,
            block: [0u8; BLOCK_SIZE],
            offset: 0,
            scratch: Vec::new(),
        }
    }

    /// Logs a `SET` of `key` to `val`. Durable once this returns `Ok`.
    pub fn record_insertion(&mut self, key: &[u8], val: &[u8]) -> Result<(), WalError> {
        let encoded = encode(OpKind::Set, val);
        self.record(key, &encoded)
    }

    /// Logs a tombstone for `key`. Durable once this returns `Ok`.
    pub fn record_deletion(&mut self, key: &[u8]) -> Result<(), WalError> {
        let encoded = encode(OpKind::Delete, &[]);
        self.record(key, &encoded)
    }

    fn record(&mut self, key: &[u8], encoded_val: &[u8]) -> Result<(), WalError> {
        self.scratch.clear();
        put_uvarint(&mut self.scratch, key.len() as u64);
        put_uvarint(&mut self.scratch, encoded_val.len() as u64);
        self.scratch.extend_from_slice(key);
        self.scratch.extend_from_slice(encoded_val);

        let mut written = 0;
        let mut chunk = 0;
        while written < self.scratch.len() {
            // Not even a header fits: seal this block and start a new one.
            if self.offset + HEADER_SIZE >= BLOCK_SIZE {
                self.seal_block()?;
            }
            let available = BLOCK_SIZE - self.offset - HEADER_SIZE;
            let fit = available.min(self.scratch.len() - written);
            let last = written + fit == self.scratch.len();

            let start = self.offset;
            LittleEndian::write_u16(&mut self.block[start..start + 2], fit as u16);
            self.block[start + 2] = match (chunk == 0, last) {
                (true, true) => CHUNK_FULL,
                (true, false) => CHUNK_FIRST,
                (false, true) => CHUNK_LAST,
                (false, false) => CHUNK_MIDDLE,
            };
            self.block[start + HEADER_SIZE..start + HEADER_SIZE + fit]
                .copy_from_slice(&self.scratch[written..written + fit]);
            self.offset = start + HEADER_SIZE + fit;

            self.file.write_all(&self.block[start..self.offset])?;
            self.file.sync_all()?;

            written += fit;
            chunk += 1;
        }
        Ok(())
    }

    /// Zero-pads the rest of the current block and persists the padding.
    fn seal_block(&mut self) -> Result<(), WalError> {
        if self.offset < BLOCK_SIZE {
            self.block[self.offset..].fill(0);
            self.file.write_all(&self.block[self.offset..])?;
            self.file.sync_all()?;
        }
        self.offset = 0;
        Ok(())
    }

    /// Seals the trailing block and releases the file. A writer that never
    /// recorded anything leaves an empty file behind.
    pub fn close(mut self) -> Result<(), WalError> {
        if self.offset > 0 {
            self.seal_block()?;
        }
        Ok(())
    }
}

/// Sequentially reassembles records from a WAL file (or any byte stream).
pub struct WalReader<R: Read> {
    file: R,
    block: [u8; BLOCK_SIZE],
    block_len: usize,
    offset: usize,
    started: bool,
    scratch: Vec<u8>,
}

impl<R: Read> WalReader<R> {
    pub fn new(file: R) -> Self {
        Self {
            file,
            block: [0u8; BLOCK_SIZE],
            block_len: 0,
            offset: 0,
            started: false,
            scratch: Vec::new(),
        }
    }

    /// Reads up to one block. A short read means this is the file's last
    /// block (an unsealed tail after a crash). Returns false at EOF.
    fn load_next_block(&mut self) -> io::Result<bool> {
        let mut n = 0;
        while n < BLOCK_SIZE {
            match self.file.read(&mut self.block[n..]) {
                Ok(0) => break,
                Ok(m) => n += m,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        self.block_len = n;
        self.offset = 0;
        Ok(n > 0)
    }

    /// Returns the next `(key, value)` record, or `None` at end of log.
    ///
    /// A record whose continuation chunks were lost to a crash is dropped
    /// silently: the WAL's durable prefix ends at the last complete record.
    pub fn next(&mut self) -> Result<Option<(Vec<u8>, EncodedValue)>, WalError> {
        if !self.started {
            self.started = true;
            if !self.load_next_block()? {
                return Ok(None);
            }
        }
        self.scratch.clear();
        loop {
            // Sealed or exhausted block: whatever comes next lives in the
            // following block.
            if self.block_len.saturating_sub(self.offset) < HEADER_SIZE {
                if !self.load_next_block()? {
                    return Ok(None);
                }
                continue;
            }

            let start = self.offset;
            let data_len = LittleEndian::read_u16(&self.block[start..start + 2]) as usize;
            let chunk_type = self.block[start + 2];

            // Zero padding written by a close-time seal.
            if chunk_type == 0 {
                self.offset = self.block_len;
                continue;
            }

            let data_start = start + HEADER_SIZE;
            let data_end = data_start + data_len;
            if data_end > self.block_len {
                return Err(WalError::Truncated);
            }
            self.scratch.extend_from_slice(&self.block[data_start..data_end]);
            self.offset = data_end;

            match chunk_type {
                CHUNK_FULL | CHUNK_LAST => break,
                CHUNK_FIRST | CHUNK_MIDDLE => {
                    // Continuation always starts in the next block.
                    if !self.load_next_block()? {
                        return Ok(None);
                    }
                }
                _ => return Err(WalError::Corrupt),
            }
        }
        self.parse_record()
    }

    fn parse_record(&self) -> Result<Option<(Vec<u8>, EncodedValue)>, WalError> {
        let (key_len, n) = get_uvarint(&self.scratch);
        if n == 0 {
            return Err(WalError::Corrupt);
        }
        let (val_len, m) = get_uvarint(&self.scratch[n..]);
        if m == 0 {
            return Err(WalError::Corrupt);
        }
        let key_start = n + m;
        let key_end = key_start + key_len as usize;
        let val_end = key_end + val_len as usize;
        if val_end > self.scratch.len() {
            return Err(WalError::Corrupt);
        }
        let key = self.scratch[key_start..key_end].to_vec();
        let val =
            EncodedValue::parse(&self.scratch[key_end..val_end]).ok_or(WalError::Corrupt)?;
        Ok(Some((key, val)))
    }
}
