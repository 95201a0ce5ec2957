//! LZO1X decompression for packed CPK entries
//!
//! Instruction ranges (first byte of each instruction):
//!
//! - `0..=15`   literal run, or a short match right after literals
//! - `16..=31`  long-distance match (M4), also carries the end-of-stream marker
//! - `32..=63`  medium match (M3)
//! - `64..=255` short match (M2)
//!
//! The stream ends with `0x11 0x00 0x00`.

use std::fmt;

/// Decompression failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LzoError {
    InputOverrun,
    OutputOverrun,
    LookbehindOverrun,
    /// Stream ended without the terminator, or output length differs
    Truncated { expected: usize, actual: usize },
}

impl fmt::Display for LzoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InputOverrun => write!(f, "input overrun"),
            Self::OutputOverrun => write!(f, "output overrun"),
            Self::LookbehindOverrun => write!(f, "match distance before start of output"),
            Self::Truncated { expected, actual } => {
                write!(f, "expected {expected} bytes of output, produced {actual}")
            }
        }
    }
}

impl std::error::Error for LzoError {}

struct Input<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Input<'_> {
    fn byte(&mut self) -> Result<u8, LzoError> {
        let b = *self.data.get(self.pos).ok_or(LzoError::InputOverrun)?;
        self.pos += 1;
        Ok(b)
    }

    fn u16_le(&mut self) -> Result<usize, LzoError> {
        let lo = self.byte()?;
        let hi = self.byte()?;
        Ok(usize::from(u16::from_le_bytes([lo, hi])))
    }

    /// Run-length extension: each zero byte adds 255, the final byte plus
    /// `base` completes the length.
    fn extended_len(&mut self, base: usize) -> Result<usize, LzoError> {
        let mut len = 0usize;
        loop {
            let b = self.byte()?;
            if b != 0 {
                return Ok(len + base + usize::from(b));
            }
            len += 255;
        }
    }

    fn slice(&mut self, len: usize) -> Result<&[u8], LzoError> {
        let end = self.pos.checked_add(len).ok_or(LzoError::InputOverrun)?;
        let s = self.data.get(self.pos..end).ok_or(LzoError::InputOverrun)?;
        self.pos = end;
        Ok(s)
    }
}

fn copy_literals(
    input: &mut Input<'_>,
    out: &mut Vec<u8>,
    len: usize,
    limit: usize,
) -> Result<(), LzoError> {
    if out.len() + len > limit {
        return Err(LzoError::OutputOverrun);
    }
    out.extend_from_slice(input.slice(len)?);
    Ok(())
}

fn copy_match(out: &mut Vec<u8>, distance: usize, len: usize, limit: usize) -> Result<(), LzoError> {
    if distance == 0 || distance > out.len() {
        return Err(LzoError::LookbehindOverrun);
    }
    if out.len() + len > limit {
        return Err(LzoError::OutputOverrun);
    }
    let start = out.len() - distance;
    // Byte-wise: source and destination may overlap
    for i in 0..len {
        let b = out[start + i];
        out.push(b);
    }
    Ok(())
}

/// Decompress an LZO1X stream into exactly `expected_len` bytes.
pub fn decompress(src: &[u8], expected_len: usize) -> Result<Vec<u8>, LzoError> {
    let mut out = Vec::with_capacity(expected_len);
    let mut input = Input { data: src, pos: 0 };

    // 0: no literals pending, 1..=3: short literal run, 4: long literal run
    let mut state = 0usize;

    if let Some(&first) = src.first()
        && first > 17
    {
        input.pos = 1;
        let len = usize::from(first - 17);
        copy_literals(&mut input, &mut out, len, expected_len)?;
        state = len.min(4);
    }

    loop {
        let inst = usize::from(input.byte()?);

        let (distance, len, next_state) = if inst >= 64 {
            // M2: 3..=8 bytes, distance up to 2 KiB
            let len = (inst >> 5) + 1;
            let distance = (usize::from(input.byte()?) << 3) + ((inst >> 2) & 0x7) + 1;
            (distance, len, inst & 0x3)
        } else if inst >= 32 {
            // M3: distance up to 16 KiB
            let mut len = (inst & 0x1F) + 2;
            if len == 2 {
                len = input.extended_len(31 + 2)?;
            }
            let word = input.u16_le()?;
            ((word >> 2) + 1, len, word & 0x3)
        } else if inst >= 16 {
            // M4: distance 16 KiB..48 KiB, or end of stream
            let mut len = (inst & 0x7) + 2;
            if len == 2 {
                len = input.extended_len(7 + 2)?;
            }
            let word = input.u16_le()?;
            let distance = ((inst & 0x8) << 11) + (word >> 2);
            if distance == 0 {
                break;
            }
            (distance + 0x4000, len, word & 0x3)
        } else if state == 0 {
            // Literal run of 3 or more bytes
            let mut len = inst + 3;
            if len == 3 {
                len = input.extended_len(15 + 3)?;
            }
            copy_literals(&mut input, &mut out, len, expected_len)?;
            state = 4;
            continue;
        } else if state == 4 {
            // M1 after a long literal run: 3 bytes, distance 2049..=3072
            let distance = (inst >> 2) + (usize::from(input.byte()?) << 2) + 2049;
            (distance, 3, inst & 0x3)
        } else {
            // M1 after a short literal run: 2 bytes, distance up to 1 KiB
            let distance = (inst >> 2) + (usize::from(input.byte()?) << 2) + 1;
            (distance, 2, inst & 0x3)
        };

        copy_match(&mut out, distance, len, expected_len)?;
        copy_literals(&mut input, &mut out, next_state, expected_len)?;
        state = next_state;
    }

    if out.len() == expected_len {
        Ok(out)
    } else {
        Err(LzoError::Truncated {
            expected: expected_len,
            actual: out.len(),
        })
    }
}
