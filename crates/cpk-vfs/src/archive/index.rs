//! Parsed directory table of one CPK archive

use super::header::{CPK_LABEL, CPK_VERSION, CpkHeader, HEADER_SIZE, TableRecord};
use super::lzo;
use super::reader::{ArchiveSource, EntryStream};
use crate::codepage::CodePage;
use crate::config::VfsConfig;
use crate::crc::CrcHash;
use crate::error::{CpkError, Result};
use crate::path;
use binrw::BinRead;
use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

/// One file stored in an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Normalized virtual path
    pub path: String,
    /// Name bytes exactly as stored, without the NUL terminator
    pub raw_name: Vec<u8>,
    /// Lookup key: CRC of the UTF-8 virtual path
    pub key: u32,
    /// CRC the archive declares for this record
    pub declared_crc: u32,
    pub offset: u64,
    pub packed_size: u32,
    /// Uncompressed size
    pub size: u32,
    pub compressed: bool,
}

/// Index of a single opened archive.
///
/// Owns the archive's file handle (or memory map). Immutable once opened.
#[derive(Debug)]
pub struct ArchiveIndex {
    path: PathBuf,
    header: CpkHeader,
    file_len: u64,
    code_page: CodePage,
    source: ArchiveSource,
    /// Entries bucketed by lookup key. Distinct paths may share a key.
    entries: HashMap<u32, Vec<ArchiveEntry>>,
    len: usize,
}

/// A live record with its decoded name
struct NamedRecord {
    record: TableRecord,
    name: String,
    raw_name: Vec<u8>,
}

impl ArchiveIndex {
    /// Open and index an archive.
    pub fn open(path: impl AsRef<Path>, config: &VfsConfig, crc: &CrcHash) -> Result<Self> {
        let path = path.as_ref();
        let (source, file_len) = ArchiveSource::open(path, config.use_memory_mapping)?;

        let header = read_header(path, &source, file_len)?;
        let records = read_table(path, &source, &header, file_len)?;
        let named = decode_names(path, &source, records, config.code_page)?;

        let mut resolver = PathResolver::new(path, &named);
        let mut entries: HashMap<u32, Vec<ArchiveEntry>> = HashMap::with_capacity(named.len());
        let mut len = 0usize;

        for rec in named.values().filter(|r| r.record.is_file()) {
            let full = resolver.resolve(rec.record.crc)?;
            let virtual_path = path::normalize(&full);
            if virtual_path.is_empty() {
                return Err(CpkError::corrupt(
                    path,
                    format!("record 0x{:08x} has an empty path", rec.record.crc),
                ));
            }

            if config.verify_crc {
                verify_declared_crc(path, crc, config.code_page, &virtual_path, rec.record.crc)?;
            }

            if !rec.record.is_compressed() && rec.record.origin_size > rec.record.packed_size {
                return Err(CpkError::corrupt(
                    path,
                    format!(
                        "stored entry {virtual_path} claims {} bytes but holds {}",
                        rec.record.origin_size, rec.record.packed_size
                    ),
                ));
            }

            let entry = ArchiveEntry {
                key: crc.compute_str(&virtual_path),
                path: virtual_path,
                raw_name: rec.raw_name.clone(),
                declared_crc: rec.record.crc,
                offset: u64::from(rec.record.start_pos),
                packed_size: rec.record.packed_size,
                size: rec.record.origin_size,
                compressed: rec.record.is_compressed(),
            };

            trace!(
                "Entry {}: key={:08x}, offset={:x}, packed={}, size={}",
                entry.path, entry.key, entry.offset, entry.packed_size, entry.size
            );

            let bucket = entries.entry(entry.key).or_default();
            if bucket.iter().any(|existing| existing.path == entry.path) {
                return Err(CpkError::corrupt(
                    path,
                    format!("path {} is stored more than once", entry.path),
                ));
            }
            if let Some(existing) = bucket.first() {
                trace!(
                    "{} shares key 0x{:08x} with {}",
                    entry.path, entry.key, existing.path
                );
            }
            bucket.push(entry);
            len += 1;
        }

        if len as u64 > u64::from(header.file_num) {
            warn!(
                "Archive {:?} header declares {} files but holds {}",
                path,
                header.file_num,
                len
            );
        }

        debug!(
            "Indexed {:?}: {} entries (code page {}, mapped: {})",
            path,
            len,
            config.code_page,
            source.is_memory_mapped()
        );

        Ok(Self {
            path: path.to_path_buf(),
            header,
            file_len,
            code_page: config.code_page,
            source,
            entries,
            len,
        })
    }

    /// Path of the archive file on disk
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &CpkHeader {
        &self.header
    }

    /// Physical length of the archive file
    pub fn file_len(&self) -> u64 {
        self.file_len
    }

    /// Code page the entry names were decoded with
    pub fn code_page(&self) -> CodePage {
        self.code_page
    }

    pub fn is_memory_mapped(&self) -> bool {
        self.source.is_memory_mapped()
    }

    /// Number of file entries
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over all file entries (unordered)
    pub fn entries(&self) -> impl Iterator<Item = &ArchiveEntry> {
        self.entries.values().flatten()
    }

    /// Entries sharing one lookup key, usually zero or one
    pub fn bucket(&self, key: u32) -> &[ArchiveEntry] {
        self.entries.get(&key).map(Vec::as_slice).unwrap_or_default()
    }

    /// Iterate over every non-empty bucket with its key
    pub(crate) fn buckets(&self) -> impl Iterator<Item = (u32, &[ArchiveEntry])> {
        self.entries
            .iter()
            .map(|(key, bucket)| (*key, bucket.as_slice()))
    }

    /// Find an entry by lookup key and normalized path
    pub fn get(&self, key: u32, normalized: &str) -> Option<&ArchiveEntry> {
        self.bucket(key).iter().find(|entry| entry.path == normalized)
    }

    /// Find an entry by virtual path. The path is normalized first.
    pub fn lookup(&self, virtual_path: &str, crc: &CrcHash) -> Option<&ArchiveEntry> {
        let normalized = path::normalize(virtual_path);
        self.get(crc.compute_str(&normalized), &normalized)
    }

    /// Open a seekable stream over an entry's uncompressed bytes.
    ///
    /// Stored entries stream straight from the archive; compressed entries
    /// are decompressed into memory first.
    pub fn open_entry(&self, entry: &ArchiveEntry) -> Result<EntryStream> {
        if !entry.compressed {
            return Ok(EntryStream::stored(
                self.source.clone(),
                entry.offset,
                u64::from(entry.size),
            ));
        }

        let packed = self
            .source
            .read_at(entry.offset, entry.packed_size as usize)
            .map_err(|e| CpkError::io(&self.path, e))?;
        let data = lzo::decompress(&packed, entry.size as usize).map_err(|e| {
            CpkError::Decompression {
                path: self.path.clone(),
                reason: format!("{}: {e}", entry.path),
            }
        })?;
        Ok(EntryStream::owned(data))
    }

    /// Read an entry's uncompressed bytes.
    pub fn read_entry(&self, entry: &ArchiveEntry) -> Result<Vec<u8>> {
        self.open_entry(entry)?
            .into_bytes()
            .map_err(|e| CpkError::io(&self.path, e))
    }
}

fn read_header(path: &Path, source: &ArchiveSource, file_len: u64) -> Result<CpkHeader> {
    if file_len < HEADER_SIZE as u64 {
        return Err(CpkError::format(
            path,
            format!("file is {file_len} bytes, shorter than the {HEADER_SIZE} byte header"),
        ));
    }

    let bytes = source
        .read_at(0, HEADER_SIZE)
        .map_err(|e| CpkError::io(path, e))?;
    let header = CpkHeader::read(&mut Cursor::new(bytes))
        .map_err(|e| CpkError::format(path, format!("unreadable header: {e}")))?;

    if header.label != CPK_LABEL {
        return Err(CpkError::format(
            path,
            format!("bad label 0x{:08x}", header.label),
        ));
    }
    if header.version != CPK_VERSION {
        return Err(CpkError::format(
            path,
            format!("unsupported version {}", header.version),
        ));
    }
    if header.size_of_header as usize != HEADER_SIZE {
        return Err(CpkError::format(
            path,
            format!("unexpected header size 0x{:x}", header.size_of_header),
        ));
    }

    trace!(
        "CPK header: table_start={:x}, data_start={:x}, max_files={}, files={}",
        header.table_start, header.data_start, header.max_file_num, header.file_num
    );

    Ok(header)
}

fn read_table(
    path: &Path,
    source: &ArchiveSource,
    header: &CpkHeader,
    file_len: u64,
) -> Result<Vec<TableRecord>> {
    let (start, end) = header.table_range();
    if end > file_len {
        return Err(CpkError::format(
            path,
            format!("directory table 0x{start:x}..0x{end:x} extends past end of file ({file_len} bytes)"),
        ));
    }

    let bytes = source
        .read_at(start, (end - start) as usize)
        .map_err(|e| CpkError::io(path, e))?;
    let mut cursor = Cursor::new(bytes);

    let mut records = Vec::new();
    for _ in 0..header.max_file_num {
        let record = TableRecord::read(&mut cursor)
            .map_err(|e| CpkError::format(path, format!("unreadable table record: {e}")))?;
        if !record.is_live() {
            continue;
        }
        if record.end_offset() > file_len {
            return Err(CpkError::corrupt(
                path,
                format!(
                    "record 0x{:08x} spans 0x{:x}..0x{:x}, past end of file ({file_len} bytes)",
                    record.crc,
                    record.start_pos,
                    record.end_offset()
                ),
            ));
        }
        records.push(record);
    }

    Ok(records)
}

fn decode_names(
    path: &Path,
    source: &ArchiveSource,
    records: Vec<TableRecord>,
    code_page: CodePage,
) -> Result<HashMap<u32, NamedRecord>> {
    let mut named = HashMap::with_capacity(records.len());

    for record in records {
        let block = source
            .read_at(record.name_offset(), record.extra_info_size as usize)
            .map_err(|e| CpkError::io(path, e))?;
        let raw_len = block.iter().position(|&b| b == 0).unwrap_or(block.len());
        let raw_name = block[..raw_len].to_vec();

        let name = code_page
            .decode(&raw_name)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                CpkError::corrupt(
                    path,
                    format!(
                        "record 0x{:08x} has a name that is empty or invalid in code page {code_page}",
                        record.crc
                    ),
                )
            })?
            .into_owned();

        if named
            .insert(
                record.crc,
                NamedRecord {
                    record,
                    name,
                    raw_name,
                },
            )
            .is_some()
        {
            return Err(CpkError::corrupt(
                path,
                format!("duplicate record crc 0x{:08x}", record.crc),
            ));
        }
    }

    Ok(named)
}

fn verify_declared_crc(
    path: &Path,
    crc: &CrcHash,
    code_page: CodePage,
    virtual_path: &str,
    declared: u32,
) -> Result<()> {
    let archive_form = path::to_archive_form(virtual_path);
    let bytes = code_page.encode(&archive_form).ok_or_else(|| {
        CpkError::corrupt(
            path,
            format!("{virtual_path} cannot be encoded in code page {code_page}"),
        )
    })?;
    let actual = crc.compute(&bytes);
    if actual != declared {
        return Err(CpkError::corrupt(
            path,
            format!("{virtual_path}: declared crc 0x{declared:08x}, computed 0x{actual:08x}"),
        ));
    }
    Ok(())
}

/// Rebuilds full paths from parent links, memoizing directories.
struct PathResolver<'a> {
    archive: &'a Path,
    records: &'a HashMap<u32, NamedRecord>,
    resolved: HashMap<u32, String>,
}

impl<'a> PathResolver<'a> {
    fn new(archive: &'a Path, records: &'a HashMap<u32, NamedRecord>) -> Self {
        Self {
            archive,
            records,
            resolved: HashMap::new(),
        }
    }

    fn resolve(&mut self, crc: u32) -> Result<String> {
        // Walk up until the root or an already resolved ancestor
        let mut chain = Vec::new();
        let mut current = crc;
        let mut prefix = String::new();

        loop {
            if let Some(known) = self.resolved.get(&current) {
                prefix.clone_from(known);
                break;
            }
            let rec = self.records.get(&current).ok_or_else(|| {
                CpkError::corrupt(
                    self.archive,
                    format!(
                        "record 0x{:08x} references missing parent 0x{current:08x}",
                        chain.last().copied().unwrap_or(crc)
                    ),
                )
            })?;
            if chain.len() > self.records.len() {
                return Err(CpkError::corrupt(
                    self.archive,
                    format!("parent chain of record 0x{crc:08x} forms a cycle"),
                ));
            }
            chain.push(current);
            if rec.record.parent_crc == 0 {
                break;
            }
            current = rec.record.parent_crc;
        }

        for &link in chain.iter().rev() {
            let name = &self.records[&link].name;
            prefix = path::join(&prefix, name);
            if self.records[&link].record.is_dir() {
                self.resolved.insert(link, prefix.clone());
            }
        }

        Ok(prefix)
    }
}
