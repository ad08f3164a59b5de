//! The engine loop: WAL-ordered writes, memtable rotation, threshold
//! flushes, and newest-to-oldest reads across memtables and SSTables.

use std::path::Path;

use codec::EncodedValue;
use memtable::Memtable;
use sstable::{SSTableReader, SSTableWriter};
use storage::{FileMetadata, Provider};
use thiserror::Error;
use tracing::{debug, info};
use wal::{WalError, WalReader, WalWriter};

/// Byte budget of one memtable; a write that does not fit rotates to a
/// fresh memtable and WAL.
pub const MEMTABLE_SIZE_LIMIT: usize = 4 << 10;

/// Once the queued memtables hold more than this many bytes, all but the
/// mutable one are flushed to SSTables.
pub const MEMTABLE_FLUSH_THRESHOLD: usize = 8 << 10;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The key does not exist, or its newest surviving entry is a
    /// tombstone; callers cannot tell the difference.
    #[error("key not found")]
    KeyNotFound,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Wal(#[from] WalError),
    #[error(transparent)]
    Sstable(#[from] sstable::Error),
}

/// A single-writer LSM key-value store over one data directory.
///
/// Writes go to the WAL first (fsynced), then to the mutable memtable.
/// Reads scan memtables newest to oldest, then SSTables newest to oldest;
/// the first hit wins, which is what makes overwrites and deletes visible
/// without rewriting older tables.
pub struct Engine {
    provider: Provider,
    /// Memtables ordered oldest first; the last one is mutable, the rest
    /// are frozen and awaiting flush.
    queue: Vec<Memtable>,
    /// Flushed tables, oldest first.
    ssts: Vec<FileMetadata>,
    wal: WalWriter,
    wal_meta: FileMetadata,
}

impl Engine {
    /// Opens (or creates) the store in `dir`, replaying any WAL files left
    /// by a previous process into fresh SSTables.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, EngineError> {
        let mut provider = Provider::open(dir)?;

        let mut ssts = Vec::new();
        let mut logs = Vec::new();
        for fm in provider.list()? {
            if fm.is_sstable() {
                ssts.push(fm);
            } else {
                logs.push(fm);
            }
        }

        for log in &logs {
            Self::replay_log(&mut provider, &mut ssts, log)?;
        }

        let wal_meta = provider.prepare_new_log();
        let wal = WalWriter::new(provider.open_for_writing(&wal_meta)?);
        let mutable = Memtable::new(MEMTABLE_SIZE_LIMIT, wal_meta.clone());

        info!(
            sstables = ssts.len(),
            replayed_logs = logs.len(),
            "engine opened"
        );
        Ok(Self {
            provider,
            queue: vec![mutable],
            ssts,
            wal,
            wal_meta,
        })
    }

    /// Rebuilds the records of one WAL file into memtables and flushes
    /// them straight back out as SSTables.
    ///
    /// Replay memtables all share the log's metadata; the log is deleted
    /// once per flush, which the provider tolerates.
    fn replay_log(
        provider: &mut Provider,
        ssts: &mut Vec<FileMetadata>,
        log: &FileMetadata,
    ) -> Result<(), EngineError> {
        let file = provider.open_for_reading(log)?;
        let mut reader = WalReader::new(file);
        let mut replayed = vec![Memtable::new(MEMTABLE_SIZE_LIMIT, log.clone())];

        let mut records = 0usize;
        while let Some((key, val)) = reader.next()? {
            if !replayed
                .last()
                .expect("replay queue is never empty")
                .has_room_for_write(&key, val.value())
            {
                replayed.push(Memtable::new(MEMTABLE_SIZE_LIMIT, log.clone()));
            }
            let mem = replayed.last_mut().expect("replay queue is never empty");
            match val {
                EncodedValue::Set(v) => mem.insert(&key, &v),
                EncodedValue::Delete => mem.insert_tombstone(&key),
            }
            records += 1;
        }
        debug!(log = log.file_num(), records, "replayed wal");

        for mem in replayed {
            if mem.is_empty() {
                // Nothing durable in this stretch (empty log); just drop it.
                provider.delete(log)?;
                continue;
            }
            Self::flush_one(provider, ssts, &mem)?;
        }
        Ok(())
    }

    /// Stores `val` under `key`. Durable once this returns `Ok`.
    pub fn set(&mut self, key: &[u8], val: &[u8]) -> Result<(), EngineError> {
        self.wal.record_insertion(key, val)?;
        self.prep_memtable_for_write(key, val)?;
        self.mutable_mut().insert(key, val);
        self.maybe_schedule_flush()
    }

    /// Deletes `key` by recording a tombstone. Durable once this returns
    /// `Ok`.
    pub fn delete(&mut self, key: &[u8]) -> Result<(), EngineError> {
        self.wal.record_deletion(key)?;
        self.prep_memtable_for_write(key, &[])?;
        self.mutable_mut().insert_tombstone(key);
        self.maybe_schedule_flush()
    }

    /// Returns the newest value written for `key`, or
    /// [`EngineError::KeyNotFound`] if it was never set or was deleted.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>, EngineError> {
        for (i, mem) in self.queue.iter().enumerate().rev() {
            if let Some(entry) = mem.get(key) {
                return match entry {
                    EncodedValue::Delete => {
                        debug!(memtable = i, "tombstone hit");
                        Err(EngineError::KeyNotFound)
                    }
                    EncodedValue::Set(v) => Ok(v),
                };
            }
        }

        for meta in self.ssts.iter().rev() {
            let file = self.provider.open_for_reading(meta)?;
            let mut reader = SSTableReader::open(file)?;
            match reader.get(key) {
                Err(sstable::Error::KeyNotFound) => continue,
                Err(e) => return Err(e.into()),
                Ok(EncodedValue::Delete) => {
                    debug!(sst = meta.file_num(), "tombstone hit");
                    return Err(EngineError::KeyNotFound);
                }
                Ok(EncodedValue::Set(v)) => {
                    debug!(sst = meta.file_num(), "sstable hit");
                    return Ok(v);
                }
            }
        }

        Err(EngineError::KeyNotFound)
    }

    /// Seals the active WAL and shuts the engine down. Queued memtables
    /// are not flushed; their WALs replay them on the next open.
    pub fn close(self) -> Result<(), EngineError> {
        self.wal.close()?;
        Ok(())
    }

    fn mutable_mut(&mut self) -> &mut Memtable {
        self.queue.last_mut().expect("queue always holds the mutable memtable")
    }

    /// Rotates WAL and memtable if the pending write does not fit.
    fn prep_memtable_for_write(&mut self, key: &[u8], val: &[u8]) -> Result<(), EngineError> {
        let mutable = self.queue.last().expect("queue always holds the mutable memtable");
        if !mutable.has_room_for_write(key, val) {
            self.rotate_wal()?;
            self.rotate_memtable();
        }
        Ok(())
    }

    fn rotate_wal(&mut self) -> Result<(), EngineError> {
        let meta = self.provider.prepare_new_log();
        let writer = WalWriter::new(self.provider.open_for_writing(&meta)?);
        let old = std::mem::replace(&mut self.wal, writer);
        self.wal_meta = meta;
        old.close()?;
        Ok(())
    }

    fn rotate_memtable(&mut self) {
        debug!(
            wal = self.wal_meta.file_num(),
            frozen = self.queue.len(),
            "rotated memtable"
        );
        self.queue
            .push(Memtable::new(MEMTABLE_SIZE_LIMIT, self.wal_meta.clone()));
    }

    /// Flushes the frozen memtables once their combined size crosses the
    /// threshold. Runs inline: the write that tipped the scale pays for
    /// the flush.
    fn maybe_schedule_flush(&mut self) -> Result<(), EngineError> {
        let total: usize = self.queue.iter().map(Memtable::size).sum();
        if total > MEMTABLE_FLUSH_THRESHOLD {
            self.flush_memtables()?;
        }
        Ok(())
    }

    /// Writes every memtable but the mutable one to an SSTable, oldest
    /// first, then deletes their WAL files.
    fn flush_memtables(&mut self) -> Result<(), EngineError> {
        let frozen = self.queue.len() - 1;
        for mem in self.queue.drain(..frozen) {
            Self::flush_one(&mut self.provider, &mut self.ssts, &mem)?;
        }
        Ok(())
    }

    fn flush_one(
        provider: &mut Provider,
        ssts: &mut Vec<FileMetadata>,
        mem: &Memtable,
    ) -> Result<(), EngineError> {
        let meta = provider.prepare_new_sstable();
        let file = provider.open_for_writing(&meta)?;
        SSTableWriter::new(file).write_memtable(mem)?;
        info!(
            sst = meta.file_num(),
            entries = mem.len(),
            bytes = mem.size(),
            "flushed memtable"
        );
        ssts.push(meta);
        provider.delete(mem.wal_file())?;
        Ok(())
    }

    /// Number of SSTables currently readable.
    pub fn sstable_count(&self) -> usize {
        self.ssts.len()
    }
}
