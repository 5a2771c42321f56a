//! Container writer and reader.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::config::SyncStrategy;
use crate::error::Result;
use crate::PackError;

use super::{BufferedSink, END_MARKER, HEADER_SIZE, MAGIC, RECORD_PREFIX_SIZE, VERSION};

// =============================================================================
// Position
// =============================================================================

/// Where a framed record lives inside a container
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    pub offset: u64,
    pub length: u64,
}

impl Position {
    /// Encoded size inside an index value
    pub const ENCODED_LEN: usize = 16;

    pub fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    /// Encode as an index value: offset (8, LE) + length (8, LE)
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::ENCODED_LEN);
        out.extend_from_slice(&self.offset.to_le_bytes());
        out.extend_from_slice(&self.length.to_le_bytes());
        out
    }

    /// Decode an index value
    pub fn from_bytes(value: &[u8]) -> Result<Self> {
        if value.len() != Self::ENCODED_LEN {
            return Err(PackError::Corruption(format!(
                "position value must be {} bytes, got {}",
                Self::ENCODED_LEN,
                value.len()
            )));
        }
        let mut offset = [0u8; 8];
        let mut length = [0u8; 8];
        offset.copy_from_slice(&value[0..8]);
        length.copy_from_slice(&value[8..16]);
        Ok(Self {
            offset: u64::from_le_bytes(offset),
            length: u64::from_le_bytes(length),
        })
    }
}

// =============================================================================
// Writer
// =============================================================================

/// Result of finishing a container
#[derive(Debug, Clone)]
pub struct FinishedContainer {
    /// Where the bytes were written
    pub path: PathBuf,
    /// Lowercase hex BLAKE3 of every byte in the file
    pub name: String,
    /// Total file size
    pub size: u64,
    pub record_count: u64,
}

/// Appends framed records to a new container file
pub struct ContainerWriter {
    path: PathBuf,
    sink: BufferedSink<File>,
    record_count: u64,
}

impl ContainerWriter {
    /// Create a new container; fails if `path` already exists
    ///
    /// Writes the header immediately.
    pub fn create(path: &Path, buffer_size: usize) -> Result<Self> {
        let file = OpenOptions::new().write(true).create_new(true).open(path)?;

        let mut sink = BufferedSink::new(file, buffer_size);
        sink.write_all(MAGIC)?;
        sink.write_all(&VERSION.to_le_bytes())?;

        Ok(Self {
            path: path.to_path_buf(),
            sink,
            record_count: 0,
        })
    }

    /// Append a payload as a new record
    pub fn add_bytes_record(&mut self, payload: &[u8]) -> Result<Position> {
        let len = u32::try_from(payload.len()).map_err(|_| {
            PackError::Serialization(format!("record of {} bytes is too large", payload.len()))
        })?;

        let crc = crc32fast::hash(payload);
        let offset = self.sink.position();

        self.sink.write_all(&len.to_le_bytes())?;
        self.sink.write_all(&crc.to_le_bytes())?;
        self.sink.write_all(payload)?;
        self.record_count += 1;

        Ok(Position::new(offset, RECORD_PREFIX_SIZE + payload.len() as u64))
    }

    /// Append an already-framed record verbatim (compaction copies)
    pub fn add_raw_record(&mut self, raw: &[u8]) -> Result<Position> {
        let payload_len = framed_payload_len(raw)?;
        if RECORD_PREFIX_SIZE + payload_len as u64 != raw.len() as u64 {
            return Err(PackError::Corruption(format!(
                "framed record length {} does not match prefix {}",
                raw.len(),
                payload_len
            )));
        }

        let offset = self.sink.position();
        self.sink.write_all(raw)?;
        self.record_count += 1;

        Ok(Position::new(offset, raw.len() as u64))
    }

    /// Push buffered records to the file so readers can see them
    pub fn flush(&mut self) -> Result<()> {
        self.sink.flush_buffer()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    /// Bytes written so far, header included
    pub fn size(&self) -> u64 {
        self.sink.position()
    }

    /// Write the end marker, flush, and compute the content name
    pub fn finish(mut self, sync: SyncStrategy) -> Result<FinishedContainer> {
        self.sink.write_all(END_MARKER)?;
        let size = self.sink.position();
        let (file, hash) = self.sink.finish()?;
        if sync == SyncStrategy::Always {
            file.sync_all()?;
        }

        Ok(FinishedContainer {
            path: self.path,
            name: hash.to_hex().to_string(),
            size,
            record_count: self.record_count,
        })
    }

    /// Drop the container and delete its file
    pub fn abandon(self) -> Result<()> {
        let path = self.path;
        drop(self.sink);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// =============================================================================
// Reader
// =============================================================================

/// Random-access reader for container files (finished or still being staged)
pub struct ContainerReader {
    path: PathBuf,
    file: BufReader<File>,
    size: u64,
    /// Offset the buffered reader sits at; `None` after a failed read
    cursor: Option<u64>,
}

impl ContainerReader {
    /// Open a container and validate its header
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let size = file.metadata()?.len();

        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header).map_err(|_| {
            PackError::Corruption(format!("container {} has no header", path.display()))
        })?;

        if &header[0..4] != MAGIC {
            return Err(PackError::Corruption(format!(
                "Invalid container magic: expected PACK, got {:?}",
                &header[0..4]
            )));
        }

        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != VERSION {
            return Err(PackError::Corruption(format!(
                "Unsupported container version: {}",
                version
            )));
        }

        Ok(Self {
            path: path.to_path_buf(),
            file: BufReader::new(file),
            size,
            cursor: Some(HEADER_SIZE),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Read the framed bytes at `position`
    pub fn read_raw(&mut self, position: Position) -> Result<Bytes> {
        if position.offset < HEADER_SIZE
            || position.length < RECORD_PREFIX_SIZE
            || position.offset.saturating_add(position.length) > self.size
        {
            return Err(PackError::Corruption(format!(
                "position {}+{} outside container {} ({} bytes)",
                position.offset,
                position.length,
                self.path.display(),
                self.size
            )));
        }

        match self.cursor {
            Some(cursor) if cursor == position.offset => {}
            // Relative seeks keep the buffer when the target is already in it
            Some(cursor) => self.file.seek_relative(position.offset as i64 - cursor as i64)?,
            None => {
                self.file.seek(SeekFrom::Start(position.offset))?;
            }
        }
        self.cursor = None;

        let mut raw = vec![0u8; position.length as usize];
        self.file.read_exact(&mut raw)?;
        self.cursor = Some(position.offset + position.length);
        Ok(Bytes::from(raw))
    }

    /// Scatter read: framed bytes for each position, in request order
    ///
    /// Callers that sort positions by offset get one forward pass over the file;
    /// adjacent records are served from the read buffer without seeking.
    pub fn readv(&mut self, positions: &[Position]) -> Result<Vec<Bytes>> {
        positions.iter().map(|&p| self.read_raw(p)).collect()
    }

    /// Read and verify one record, returning its payload
    pub fn read_record(&mut self, position: Position) -> Result<Bytes> {
        let raw = self.read_raw(position)?;
        parse_record(&raw, position.offset)
    }
}

/// Verify a framed record and return its payload
pub(crate) fn parse_record(raw: &Bytes, offset: u64) -> Result<Bytes> {
    let payload_len = framed_payload_len(raw)? as usize;
    let prefix = RECORD_PREFIX_SIZE as usize;
    if raw.len() != prefix + payload_len {
        return Err(PackError::Corruption(format!(
            "record at {} is {} bytes, prefix says {}",
            offset,
            raw.len(),
            prefix + payload_len
        )));
    }

    let stored_crc = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
    let payload = raw.slice(prefix..);
    if crc32fast::hash(&payload) != stored_crc {
        return Err(PackError::ChecksumMismatch { offset });
    }
    Ok(payload)
}

fn framed_payload_len(raw: &[u8]) -> Result<u32> {
    if (raw.len() as u64) < RECORD_PREFIX_SIZE {
        return Err(PackError::Corruption(format!(
            "framed record too short: {} bytes",
            raw.len()
        )));
    }
    Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}
