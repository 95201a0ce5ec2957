//! CPK archive parsing and entry access

pub mod header;
mod index;
mod lzo;
mod reader;

pub use header::{CpkHeader, TableRecord};
pub use index::{ArchiveEntry, ArchiveIndex};
pub use lzo::LzoError;
pub use reader::EntryStream;
