//! Archive data source with memory mapping support

use crate::error::{CpkError, Result};
use memmap2::{Mmap, MmapOptions};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Largest file we try to map
const MAX_MAP_SIZE: u64 = 2 * 1024 * 1024 * 1024;

/// Backing storage for one opened archive.
///
/// Both variants are cheap to clone; streams keep their own clone so they
/// stay valid while the archive is shared across threads.
#[derive(Debug, Clone)]
pub(crate) enum ArchiveSource {
    Mapped(Arc<Mmap>),
    /// Fallback when mapping is disabled or fails; reads seek under the lock
    File(Arc<Mutex<File>>),
}

impl ArchiveSource {
    /// Open the archive file once and return the source with its length.
    #[allow(unsafe_code)]
    pub fn open(path: &Path, use_memory_mapping: bool) -> Result<(Self, u64)> {
        let file = File::open(path).map_err(|e| CpkError::io(path, e))?;
        let size = file.metadata().map_err(|e| CpkError::io(path, e))?.len();

        debug!("Opening archive: {:?} (size: {} bytes)", path, size);

        if use_memory_mapping && size > 0 && size < MAX_MAP_SIZE {
            // SAFETY: the map is read-only and game data packages are not
            // modified while mounted.
            match unsafe { MmapOptions::new().map(&file) } {
                Ok(mmap) => {
                    debug!("Memory-mapped archive {:?}", path);
                    return Ok((Self::Mapped(Arc::new(mmap)), size));
                }
                Err(e) => {
                    debug!("Failed to memory-map {:?}, using file reader: {}", path, e);
                }
            }
        }

        Ok((Self::File(Arc::new(Mutex::new(file))), size))
    }

    pub fn is_memory_mapped(&self) -> bool {
        matches!(self, Self::Mapped(_))
    }

    /// Read `length` bytes at `offset`. The caller checks bounds.
    pub fn read_at(&self, offset: u64, length: usize) -> io::Result<Vec<u8>> {
        match self {
            Self::Mapped(mmap) => {
                let start = usize::try_from(offset).map_err(io::Error::other)?;
                mmap.get(start..start + length)
                    .map(<[u8]>::to_vec)
                    .ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))
            }
            Self::File(file) => {
                let mut file = file.lock();
                file.seek(SeekFrom::Start(offset))?;
                let mut buffer = vec![0u8; length];
                file.read_exact(&mut buffer)?;
                Ok(buffer)
            }
        }
    }
}

#[derive(Debug)]
enum StreamSource {
    Archive { source: ArchiveSource, base: u64 },
    Owned(Vec<u8>),
}

/// Seekable reader over one entry's uncompressed bytes.
///
/// Every stream has its own cursor, so several streams over the same entry
/// (or archive) can be read concurrently.
#[derive(Debug)]
pub struct EntryStream {
    source: StreamSource,
    len: u64,
    pos: u64,
}

impl EntryStream {
    /// Stream over a stored (uncompressed) region of the archive
    pub(crate) fn stored(source: ArchiveSource, base: u64, len: u64) -> Self {
        Self {
            source: StreamSource::Archive { source, base },
            len,
            pos: 0,
        }
    }

    /// Stream over bytes already decompressed into memory
    pub(crate) fn owned(data: Vec<u8>) -> Self {
        let len = data.len() as u64;
        Self {
            source: StreamSource::Owned(data),
            len,
            pos: 0,
        }
    }

    /// Total number of readable bytes
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Read the remainder of the stream into a vector.
    pub fn into_bytes(mut self) -> io::Result<Vec<u8>> {
        if let StreamSource::Owned(data) = &mut self.source
            && self.pos == 0
        {
            return Ok(std::mem::take(data));
        }
        let mut out = Vec::with_capacity(self.len.saturating_sub(self.pos) as usize);
        self.read_to_end(&mut out)?;
        Ok(out)
    }
}

impl Read for EntryStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.len.saturating_sub(self.pos);
        let n = (buf.len() as u64).min(remaining) as usize;
        if n == 0 {
            return Ok(0);
        }

        match &self.source {
            StreamSource::Owned(data) => {
                let start = self.pos as usize;
                buf[..n].copy_from_slice(&data[start..start + n]);
            }
            StreamSource::Archive {
                source: ArchiveSource::Mapped(mmap),
                base,
            } => {
                let start = (base + self.pos) as usize;
                let chunk = mmap
                    .get(start..start + n)
                    .ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))?;
                buf[..n].copy_from_slice(chunk);
            }
            StreamSource::Archive {
                source: ArchiveSource::File(file),
                base,
            } => {
                let mut file = file.lock();
                file.seek(SeekFrom::Start(base + self.pos))?;
                file.read_exact(&mut buf[..n])?;
            }
        }

        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for EntryStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.len.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            )
        })?;
        // Seeking past the end is allowed; reads there return 0 bytes.
        self.pos = target;
        Ok(target)
    }
}
