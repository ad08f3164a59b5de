//! File naming, enumeration, and lifecycle for the data directory.
//!
//! Every on-disk file the engine owns is identified by a monotonically
//! increasing file number and a kind: `NNNNNN.sst` for SSTables,
//! `NNNNNN.log` for write-ahead logs. The [`Provider`] hands out fresh
//! numbers, opens files for reading or writing, and deletes them; it never
//! interprets file contents.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// What a data-directory file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    SSTable,
    Log,
}

impl FileKind {
    fn extension(self) -> &'static str {
        match self {
            FileKind::SSTable => "sst",
            FileKind::Log => "log",
        }
    }
}

/// Identity of one engine-owned file: its number and kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    file_num: u64,
    kind: FileKind,
}

impl FileMetadata {
    pub fn new(file_num: u64, kind: FileKind) -> Self {
        Self { file_num, kind }
    }

    pub fn file_num(&self) -> u64 {
        self.file_num
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    pub fn is_sstable(&self) -> bool {
        self.kind == FileKind::SSTable
    }

    pub fn is_log(&self) -> bool {
        self.kind == FileKind::Log
    }

    /// The on-disk name, e.g. `000042.sst`.
    pub fn filename(&self) -> String {
        format!("{:06}.{}", self.file_num, self.kind.extension())
    }
}

/// Parses `NNNNNN.sst` / `NNNNNN.log`; anything else is a foreign file.
fn classify(name: &str) -> Option<FileMetadata> {
    let (stem, ext) = name.rsplit_once('.')?;
    let kind = match ext {
        "sst" => FileKind::SSTable,
        "log" => FileKind::Log,
        _ => return None,
    };
    let file_num = stem.parse::<u64>().ok()?;
    Some(FileMetadata::new(file_num, kind))
}

/// Allocates file numbers and opens/deletes files in one data directory.
///
/// The directory is assumed exclusively owned; no locking is performed.
pub struct Provider {
    dir: PathBuf,
    next_file_num: u64,
}

impl Provider {
    /// Opens (creating if needed) the data directory and seeds the file
    /// number counter with `max(existing) + 1`, or 0 for an empty
    /// directory.
    pub fn open<P: AsRef<Path>>(dir: P) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let mut provider = Self {
            dir,
            next_file_num: 0,
        };
        if let Some(max) = provider.list()?.iter().map(FileMetadata::file_num).max() {
            provider.next_file_num = max + 1;
        }
        Ok(provider)
    }

    /// Enumerates engine-owned files, sorted by file number. Foreign files
    /// are ignored.
    pub fn list(&self) -> io::Result<Vec<FileMetadata>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            if let Some(fm) = name.to_str().and_then(classify) {
                files.push(fm);
            }
        }
        files.sort_by_key(FileMetadata::file_num);
        Ok(files)
    }

    /// Allocates metadata for a new SSTable. Does not create the file.
    pub fn prepare_new_sstable(&mut self) -> FileMetadata {
        self.prepare(FileKind::SSTable)
    }

    /// Allocates metadata for a new WAL file. Does not create the file.
    pub fn prepare_new_log(&mut self) -> FileMetadata {
        self.prepare(FileKind::Log)
    }

    fn prepare(&mut self, kind: FileKind) -> FileMetadata {
        let fm = FileMetadata::new(self.next_file_num, kind);
        self.next_file_num += 1;
        fm
    }

    pub fn open_for_writing(&self, fm: &FileMetadata) -> io::Result<File> {
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(self.path_of(fm))
    }

    pub fn open_for_reading(&self, fm: &FileMetadata) -> io::Result<File> {
        File::open(self.path_of(fm))
    }

    /// Unlinks the file. Deleting a file that is already gone is not an
    /// error; replay memtables sharing one WAL rely on this.
    pub fn delete(&self, fm: &FileMetadata) -> io::Result<()> {
        match fs::remove_file(self.path_of(fm)) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    fn path_of(&self, fm: &FileMetadata) -> PathBuf {
        self.dir.join(fm.filename())
    }
}
