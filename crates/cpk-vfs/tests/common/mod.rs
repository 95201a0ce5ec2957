//! Builds CPK packages on disk for integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use binrw::BinWriterExt;
use cpk_vfs::CodePage;
use cpk_vfs::CrcHash;
use cpk_vfs::archive::header::{CpkHeader, HEADER_SIZE, TableRecord, flags};
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

enum Payload {
    Dir,
    Stored(Vec<u8>),
    Compressed { packed: Vec<u8>, origin_size: u32 },
}

struct Node {
    /// Path as given, with `/` separators
    path: String,
    payload: Payload,
    deleted: bool,
}

/// Position of one record inside the built package
#[derive(Debug, Clone, Copy)]
pub struct RecordLayout {
    pub table_offset: usize,
    pub start_pos: u32,
    pub packed_size: u32,
}

/// In-memory CPK package builder.
pub struct CpkBuilder {
    code_page: CodePage,
    crc: CrcHash,
    nodes: Vec<Node>,
    spare_slots: u32,
}

impl CpkBuilder {
    pub fn new(code_page: CodePage) -> Self {
        Self {
            code_page,
            crc: CrcHash::initialized(),
            nodes: Vec::new(),
            spare_slots: 2,
        }
    }

    /// Add an uncompressed file, creating its parent directories.
    pub fn file(mut self, path: &str, data: &[u8]) -> Self {
        self.add(path, Payload::Stored(data.to_vec()), false);
        self
    }

    /// Add a file stored as an LZO1X literal stream.
    pub fn compressed_file(mut self, path: &str, data: &[u8]) -> Self {
        let packed = lzo_literals(data);
        self.add(
            path,
            Payload::Compressed {
                packed,
                origin_size: data.len() as u32,
            },
            false,
        );
        self
    }

    /// Add a file with a hand-made compressed stream.
    pub fn raw_compressed_file(mut self, path: &str, packed: &[u8], origin_size: u32) -> Self {
        self.add(
            path,
            Payload::Compressed {
                packed: packed.to_vec(),
                origin_size,
            },
            false,
        );
        self
    }

    /// Add a record flagged as deleted.
    pub fn deleted_file(mut self, path: &str, data: &[u8]) -> Self {
        self.add(path, Payload::Stored(data.to_vec()), true);
        self
    }

    fn add(&mut self, path: &str, payload: Payload, deleted: bool) {
        let segments: Vec<&str> = path.split('/').collect();
        for depth in 1..segments.len() {
            let dir = segments[..depth].join("/");
            if !self
                .nodes
                .iter()
                .any(|n| matches!(n.payload, Payload::Dir) && n.path.eq_ignore_ascii_case(&dir))
            {
                self.nodes.push(Node {
                    path: dir,
                    payload: Payload::Dir,
                    deleted: false,
                });
            }
        }
        self.nodes.push(Node {
            path: path.to_string(),
            payload,
            deleted,
        });
    }

    /// CRC the package declares for a path
    pub fn declared_crc(&self, path: &str) -> u32 {
        let archive_form = path.to_ascii_lowercase().replace('/', "\\");
        let bytes = self.code_page.encode(&archive_form).unwrap();
        self.crc.compute(&bytes)
    }

    /// Serialize the package. Returns the bytes and each node's layout, in
    /// insertion order (directories before the files that created them).
    pub fn build_with_layout(&self) -> (Vec<u8>, Vec<(String, RecordLayout)>) {
        let max_files = self.nodes.len() as u32 + self.spare_slots;
        let live = self.nodes.iter().filter(|n| !n.deleted).count() as u32;
        let header = CpkHeader::new(max_files, live).unwrap();

        let mut records = Vec::new();
        let mut layout = Vec::new();
        let mut data = Vec::new();
        let data_start = header.data_start as usize;

        for (i, node) in self.nodes.iter().enumerate() {
            let name = node.path.rsplit('/').next().unwrap();
            let mut name_bytes = self.code_page.encode(name).unwrap().into_owned();
            name_bytes.push(0);

            let parent_crc = node
                .path
                .rsplit_once('/')
                .map_or(0, |(parent, _)| self.declared_crc(parent));

            let (mut record_flags, body, origin_size) = match &node.payload {
                Payload::Dir => (flags::DIR | flags::NOT_COMPRESSED, Vec::new(), 0),
                Payload::Stored(bytes) => (
                    flags::FILE | flags::NOT_COMPRESSED,
                    bytes.clone(),
                    bytes.len() as u32,
                ),
                Payload::Compressed {
                    packed,
                    origin_size,
                } => (flags::FILE, packed.clone(), *origin_size),
            };
            if node.deleted {
                record_flags |= flags::DELETED;
            }

            let start_pos = (data_start + data.len()) as u32;
            let record = TableRecord {
                crc: self.declared_crc(&node.path),
                flags: record_flags,
                parent_crc,
                start_pos,
                packed_size: body.len() as u32,
                origin_size,
                extra_info_size: name_bytes.len() as u32,
            };
            data.extend_from_slice(&body);
            data.extend_from_slice(&name_bytes);

            layout.push((
                node.path.clone(),
                RecordLayout {
                    table_offset: HEADER_SIZE + i * TableRecord::SIZE,
                    start_pos,
                    packed_size: record.packed_size,
                },
            ));
            records.push(record);
        }

        let mut cursor = Cursor::new(Vec::new());
        cursor.write_le(&header).unwrap();
        for record in &records {
            cursor.write_le(record).unwrap();
        }
        for _ in 0..self.spare_slots {
            cursor.write_le(&TableRecord::default()).unwrap();
        }
        let mut bytes = cursor.into_inner();
        assert_eq!(bytes.len(), data_start);
        bytes.extend_from_slice(&data);

        (bytes, layout)
    }

    pub fn build(&self) -> Vec<u8> {
        self.build_with_layout().0
    }

    /// Write the package to `root/relative`, creating directories.
    pub fn write_to(&self, root: &Path, relative: &str) -> PathBuf {
        let path = root.join(relative);
        write_bytes(&path, &self.build());
        path
    }
}

pub fn write_bytes(path: &Path, bytes: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, bytes).unwrap();
}

/// Overwrite a little-endian `u32` field of a table record.
pub fn patch_record_field(bytes: &mut [u8], layout: &RecordLayout, field: usize, value: u32) {
    let offset = layout.table_offset + field * 4;
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Field indices of a table record
pub mod field {
    pub const CRC: usize = 0;
    pub const FLAGS: usize = 1;
    pub const PARENT_CRC: usize = 2;
    pub const START_POS: usize = 3;
    pub const PACKED_SIZE: usize = 4;
    pub const ORIGIN_SIZE: usize = 5;
    pub const EXTRA_INFO_SIZE: usize = 6;
}

/// Encode `data` as a literal-only LZO1X stream.
pub fn lzo_literals(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 8);
    let len = data.len();
    if len == 0 {
        // nothing but the terminator
    } else if len <= 238 {
        out.push((len + 17) as u8);
        out.extend_from_slice(data);
    } else {
        // Literal run instruction 0 with an extended length
        let mut rest = len - 18;
        out.push(0);
        while rest > 255 {
            out.push(0);
            rest -= 255;
        }
        out.push(rest as u8);
        out.extend_from_slice(data);
    }
    out.extend_from_slice(&[0x11, 0x00, 0x00]);
    out
}

/// Deterministic test payload
pub fn payload(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}
