//! CRC hashing used for CPK lookup keys
//!
//! The table is built once per hasher by [`CrcHash::init`]. The same hasher is
//! shared (behind an `Arc`) by every archive mounted into a file system.

use std::sync::OnceLock;

/// Generator polynomial (MSB-first, no reflection)
const POLYNOMIAL: u32 = 0x04C1_1DB7;

/// Table-driven CRC over byte sequences.
#[derive(Debug, Default)]
pub struct CrcHash {
    table: OnceLock<[u32; 256]>,
}

impl CrcHash {
    /// Create a hasher without a lookup table. Call [`init`](Self::init)
    /// before hashing.
    pub const fn new() -> Self {
        Self {
            table: OnceLock::new(),
        }
    }

    /// Create a hasher with its table already built.
    pub fn initialized() -> Self {
        let crc = Self::new();
        crc.init();
        crc
    }

    /// Build the lookup table. Calling this again is a no-op.
    pub fn init(&self) {
        self.table.get_or_init(build_table);
    }

    pub fn is_initialized(&self) -> bool {
        self.table.get().is_some()
    }

    /// Hash a byte sequence.
    ///
    /// The first four bytes seed the register, so inputs of up to four bytes
    /// hash to their own big-endian value. Empty input hashes to 0.
    ///
    /// # Panics
    ///
    /// Panics if [`init`](Self::init) has not been called.
    #[allow(clippy::panic)]
    pub fn compute(&self, data: &[u8]) -> u32 {
        let Some(table) = self.table.get() else {
            panic!("CrcHash::compute called before CrcHash::init");
        };

        if data.is_empty() {
            return 0;
        }

        let seed_len = data.len().min(4);
        let mut crc = data[..seed_len]
            .iter()
            .fold(0u32, |acc, &b| (acc << 8) | u32::from(b));
        crc = !crc;

        for &b in &data[seed_len..] {
            crc = ((crc << 8) | u32::from(b)) ^ table[(crc >> 24) as usize];
        }

        !crc
    }

    /// Hash the UTF-8 bytes of a string.
    pub fn compute_str(&self, s: &str) -> u32 {
        self.compute(s.as_bytes())
    }
}

fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    for (i, slot) in table.iter_mut().enumerate() {
        let mut c = (i as u32) << 24;
        for _ in 0..8 {
            c = if c & 0x8000_0000 != 0 {
                (c << 1) ^ POLYNOMIAL
            } else {
                c << 1
            };
        }
        *slot = c;
    }
    table
}
