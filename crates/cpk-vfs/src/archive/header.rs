//! CPK header and directory table records
//!
//! ## Layout (all fields little-endian `u32`)
//!
//! ```text
//! 0x00  label              0x1A545352
//! 0x04  version            1
//! 0x08  table_start        offset of the directory table
//! 0x0C  data_start         offset of the first data block
//! 0x10  max_file_num       number of table slots
//! 0x14  file_num           number of live entries
//! 0x18  is_formatted
//! 0x1C  size_of_header     0x80
//! 0x20  valid_table_num
//! 0x24  max_table_num
//! 0x28  fragment_num
//! 0x2C  package_size
//! 0x30  reserved[20]
//! ```
//!
//! The table holds `max_file_num` records of [`TableRecord::SIZE`] bytes.
//! Each record's name lives in its extra-info block, directly after the
//! record's packed data.

use binrw::{BinRead, BinWrite};

/// Header label (`"RST\x1A"` read as a little-endian word)
pub const CPK_LABEL: u32 = 0x1A54_5352;

/// The only format version in use
pub const CPK_VERSION: u32 = 1;

/// Size of the fixed header in bytes
pub const HEADER_SIZE: usize = 0x80;

/// Record flag bits
pub mod flags {
    pub const FILE: u32 = 0x1;
    pub const DIR: u32 = 0x2;
    pub const LARGE_FILE: u32 = 0x4;
    pub const DELETED: u32 = 0x10;
    pub const NOT_COMPRESSED: u32 = 0x1_0000;
}

/// Fixed-size archive header.
#[derive(BinRead, BinWrite, Debug, Clone, PartialEq, Eq)]
#[brw(little)]
pub struct CpkHeader {
    pub label: u32,
    pub version: u32,
    pub table_start: u32,
    pub data_start: u32,
    pub max_file_num: u32,
    pub file_num: u32,
    pub is_formatted: u32,
    pub size_of_header: u32,
    pub valid_table_num: u32,
    pub max_table_num: u32,
    pub fragment_num: u32,
    pub package_size: u32,
    pub reserved: [u32; 20],
}

impl CpkHeader {
    /// Header for a package with `max_file_num` table slots directly after
    /// the header. `None` when the table would not fit a 32-bit offset.
    pub fn new(max_file_num: u32, file_num: u32) -> Option<Self> {
        let table_start = HEADER_SIZE as u32;
        let data_start = max_file_num
            .checked_mul(TableRecord::SIZE as u32)?
            .checked_add(table_start)?;
        Some(Self {
            label: CPK_LABEL,
            version: CPK_VERSION,
            table_start,
            data_start,
            max_file_num,
            file_num,
            is_formatted: 1,
            size_of_header: HEADER_SIZE as u32,
            valid_table_num: file_num,
            max_table_num: max_file_num,
            fragment_num: 0,
            package_size: 0,
            reserved: [0; 20],
        })
    }

    /// Byte range covered by the directory table
    pub fn table_range(&self) -> (u64, u64) {
        let start = u64::from(self.table_start);
        let len = u64::from(self.max_file_num) * TableRecord::SIZE as u64;
        (start, start + len)
    }
}

/// One directory table slot.
#[derive(BinRead, BinWrite, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[brw(little)]
pub struct TableRecord {
    /// CRC of the full lowercase path as stored in the archive
    pub crc: u32,
    pub flags: u32,
    /// CRC of the parent directory, 0 for top-level records
    pub parent_crc: u32,
    pub start_pos: u32,
    pub packed_size: u32,
    pub origin_size: u32,
    pub extra_info_size: u32,
}

impl TableRecord {
    pub const SIZE: usize = 28;

    /// Live file or directory record
    pub fn is_live(&self) -> bool {
        self.flags & (flags::FILE | flags::DIR) != 0 && self.flags & flags::DELETED == 0
    }

    pub fn is_dir(&self) -> bool {
        self.flags & flags::DIR != 0
    }

    pub fn is_file(&self) -> bool {
        self.flags & flags::FILE != 0 && !self.is_dir()
    }

    pub fn is_compressed(&self) -> bool {
        self.flags & flags::NOT_COMPRESSED == 0
    }

    /// Offset of the name block
    pub fn name_offset(&self) -> u64 {
        u64::from(self.start_pos) + u64::from(self.packed_size)
    }

    /// End of the record's physical footprint (data plus name block)
    pub fn end_offset(&self) -> u64 {
        self.name_offset() + u64::from(self.extra_info_size)
    }
}
