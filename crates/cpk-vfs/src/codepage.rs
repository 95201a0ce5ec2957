//! Code pages used for CPK entry names
//!
//! Entry names are stored as raw bytes in the archive's legacy encoding.
//! The code page is chosen per mount session, not per archive.

use crate::error::{CpkError, Result};
use encoding_rs::{BIG5, Encoding, GBK, UTF_8};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// Numeric code page selecting the name decoding table.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum CodePage {
    /// Simplified Chinese (GBK), code page 936
    #[default]
    Gbk,
    /// Traditional Chinese (Big5), code page 950
    Big5,
    /// UTF-8, code page 65001
    Utf8,
}

impl CodePage {
    pub const GBK_ID: u32 = 936;
    pub const BIG5_ID: u32 = 950;
    pub const UTF8_ID: u32 = 65001;

    /// Resolve a numeric code page identifier.
    pub fn from_id(id: u32) -> Result<Self> {
        match id {
            Self::GBK_ID => Ok(Self::Gbk),
            Self::BIG5_ID => Ok(Self::Big5),
            Self::UTF8_ID => Ok(Self::Utf8),
            other => Err(CpkError::UnsupportedCodePage(other)),
        }
    }

    pub const fn id(self) -> u32 {
        match self {
            Self::Gbk => Self::GBK_ID,
            Self::Big5 => Self::BIG5_ID,
            Self::Utf8 => Self::UTF8_ID,
        }
    }

    fn encoding(self) -> &'static Encoding {
        match self {
            Self::Gbk => GBK,
            Self::Big5 => BIG5,
            Self::Utf8 => UTF_8,
        }
    }

    /// Decode raw name bytes. Stops at the first NUL byte.
    ///
    /// Returns `None` if the bytes are not valid in this code page.
    pub fn decode<'a>(self, raw: &'a [u8]) -> Option<Cow<'a, str>> {
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        let (text, had_errors) = self
            .encoding()
            .decode_without_bom_handling(&raw[..end]);
        if had_errors { None } else { Some(text) }
    }

    /// Encode text back into this code page.
    ///
    /// Returns `None` if a character cannot be represented.
    pub fn encode<'a>(self, text: &'a str) -> Option<Cow<'a, [u8]>> {
        let (bytes, _, had_errors) = self.encoding().encode(text);
        if had_errors { None } else { Some(bytes) }
    }
}

impl TryFrom<u32> for CodePage {
    type Error = CpkError;

    fn try_from(id: u32) -> Result<Self> {
        Self::from_id(id)
    }
}

impl From<CodePage> for u32 {
    fn from(code_page: CodePage) -> Self {
        code_page.id()
    }
}

impl fmt::Display for CodePage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}
