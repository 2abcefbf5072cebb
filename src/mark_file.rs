use crate::config::FsyncLevel;
use crate::error::ElectionError;
use crate::NULL_VALUE;
use bytes::{Buf, BufMut, BytesMut};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

const MARK_FILE_MAGIC: u32 = 0x636c_6d66;
const MARK_FILE_VERSION: u32 = 1;
const MARK_FILE_LENGTH: usize = 16;

/// Small persistent record of the latest candidate term, so a vote cast
/// just before a crash cannot be cast again in the same term.
///
/// Persistence is a write-then-force pair: `update_candidate_term_id`
/// stages the new term and `force` makes it durable. The election always
/// forces before emitting a vote in the new term.
pub trait ClusterMarkFile {
    fn candidate_term_id(&self) -> i64;

    /// Record a new candidate term. Not durable until `force`.
    fn update_candidate_term_id(&mut self, candidate_term_id: i64) -> Result<(), ElectionError>;

    fn force(&mut self, level: FsyncLevel) -> Result<(), ElectionError>;
}

/// File-backed mark file holding a fixed-layout record: magic, version,
/// candidate term.
pub struct FileMarkFile {
    file: File,
    candidate_term_id: i64,
}

impl FileMarkFile {
    pub fn open(path: &Path) -> Result<FileMarkFile, ElectionError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        let candidate_term_id = if data.len() >= MARK_FILE_LENGTH {
            let mut buf = &data[..];
            let magic = buf.get_u32();
            let version = buf.get_u32();
            if magic != MARK_FILE_MAGIC {
                return Err(ElectionError::Storage(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("bad mark file magic {:#x}", magic),
                )));
            }
            if version != MARK_FILE_VERSION {
                return Err(ElectionError::Storage(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unsupported mark file version {}", version),
                )));
            }
            buf.get_i64()
        } else {
            let mut mark_file = FileMarkFile {
                file,
                candidate_term_id: NULL_VALUE,
            };
            mark_file.write_record(NULL_VALUE)?;
            return Ok(mark_file);
        };

        Ok(FileMarkFile {
            file,
            candidate_term_id,
        })
    }

    fn write_record(&mut self, candidate_term_id: i64) -> Result<(), ElectionError> {
        let mut buf = BytesMut::with_capacity(MARK_FILE_LENGTH);
        buf.put_u32(MARK_FILE_MAGIC);
        buf.put_u32(MARK_FILE_VERSION);
        buf.put_i64(candidate_term_id);

        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&buf)?;
        self.candidate_term_id = candidate_term_id;
        Ok(())
    }
}

impl ClusterMarkFile for FileMarkFile {
    fn candidate_term_id(&self) -> i64 {
        self.candidate_term_id
    }

    fn update_candidate_term_id(&mut self, candidate_term_id: i64) -> Result<(), ElectionError> {
        self.write_record(candidate_term_id)
    }

    fn force(&mut self, level: FsyncLevel) -> Result<(), ElectionError> {
        match level {
            FsyncLevel::None => Ok(()),
            FsyncLevel::Data => Ok(self.file.sync_data()?),
            FsyncLevel::All => Ok(self.file.sync_all()?),
        }
    }
}

/// In-memory mark file that tracks what a crash would have preserved and
/// can fail a forced number of `force` calls, so durability ordering is
/// testable.
pub struct MemoryMarkFile {
    candidate_term_id: i64,
    durable_candidate_term_id: i64,
    force_failures: usize,
}

impl MemoryMarkFile {
    pub fn new() -> MemoryMarkFile {
        MemoryMarkFile {
            candidate_term_id: NULL_VALUE,
            durable_candidate_term_id: NULL_VALUE,
            force_failures: 0,
        }
    }

    pub fn with_candidate_term_id(candidate_term_id: i64) -> MemoryMarkFile {
        MemoryMarkFile {
            candidate_term_id,
            durable_candidate_term_id: candidate_term_id,
            force_failures: 0,
        }
    }

    /// Make the next `count` calls to `force` fail, simulating a crash
    /// between the write and the flush.
    pub fn fail_next_forces(&mut self, count: usize) {
        self.force_failures = count;
    }

    /// The candidate term a restart would observe.
    pub fn durable_candidate_term_id(&self) -> i64 {
        self.durable_candidate_term_id
    }
}

impl Default for MemoryMarkFile {
    fn default() -> MemoryMarkFile {
        MemoryMarkFile::new()
    }
}

impl ClusterMarkFile for MemoryMarkFile {
    fn candidate_term_id(&self) -> i64 {
        self.candidate_term_id
    }

    fn update_candidate_term_id(&mut self, candidate_term_id: i64) -> Result<(), ElectionError> {
        self.candidate_term_id = candidate_term_id;
        Ok(())
    }

    fn force(&mut self, _level: FsyncLevel) -> Result<(), ElectionError> {
        if self.force_failures > 0 {
            self.force_failures -= 1;
            return Err(ElectionError::Storage(io::Error::new(
                io::ErrorKind::Other,
                "injected force failure",
            )));
        }
        self.durable_candidate_term_id = self.candidate_term_id;
        Ok(())
    }
}
