use std::fs::File;
use std::io::{BufWriter, Write};

use codec::{encode, OpKind};
use memtable::{Memtable, SortedMap};

use crate::block::BlockWriter;
use crate::format::{
    encode_block_handle, BLOCK_FLUSH_LEN, DATA_RESTART_INTERVAL, INDEX_RESTART_INTERVAL,
};
use crate::Error;

/// Streams sorted entries into an immutable SSTable file.
///
/// Entries accumulate in a data block; when the block nears the 4 KiB
/// target it is snappy-compressed and written out, and the index block
/// gains an entry mapping the block's largest key to its file position.
/// [`finish`](SSTableWriter::finish) flushes the tail block, appends the
/// index block (whose trailer doubles as the file footer), and fsyncs.
pub struct SSTableWriter {
    out: BufWriter<File>,
    data_block: BlockWriter,
    index_block: BlockWriter,
    offset: u32,
    pending: usize,
    last_key: Vec<u8>,
    compressor: snap::raw::Encoder,
}

impl SSTableWriter {
    pub fn new(file: File) -> Self {
        Self {
            out: BufWriter::new(file),
            data_block: BlockWriter::new(DATA_RESTART_INTERVAL, true),
            index_block: BlockWriter::new(INDEX_RESTART_INTERVAL, true),
            offset: 0,
            pending: 0,
            last_key: Vec::new(),
            compressor: snap::raw::Encoder::new(),
        }
    }

    /// Appends one `(key, encoded_value)` entry. Keys must arrive in
    /// ascending order; the memtable iterator guarantees this.
    pub fn add(&mut self, key: &[u8], encoded_val: &[u8]) -> Result<(), Error> {
        let written = self.data_block.add(key, encoded_val);
        self.pending += written;
        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        if self.pending > BLOCK_FLUSH_LEN {
            self.flush_data_block()?;
        }
        Ok(())
    }

    /// Compresses and writes the pending data block, recording its
    /// position under its largest key in the index block.
    fn flush_data_block(&mut self) -> Result<(), Error> {
        if self.pending == 0 {
            return Ok(());
        }
        self.data_block.finish();
        let compressed = self.compressor.compress_vec(self.data_block.data())?;
        self.out.write_all(&compressed)?;

        let handle = encode_block_handle(self.offset, compressed.len() as u32);
        self.index_block.add(&self.last_key, &encode(OpKind::Set, &handle));

        self.offset += compressed.len() as u32;
        self.data_block.reset();
        self.pending = 0;
        Ok(())
    }

    /// Drains a memtable (tombstones included) into the table and
    /// finishes the file.
    pub fn write_memtable<M: SortedMap>(mut self, mem: &Memtable<M>) -> Result<(), Error> {
        for (key, encoded_val) in mem.iter() {
            self.add(key, encoded_val)?;
        }
        self.finish()
    }

    /// Writes the index block and makes the file durable.
    pub fn finish(mut self) -> Result<(), Error> {
        self.flush_data_block()?;
        self.index_block.finish();
        self.out.write_all(self.index_block.data())?;
        self.out.flush()?;
        self.out.get_ref().sync_all()?;
        Ok(())
    }
}
