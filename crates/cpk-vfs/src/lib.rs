//! Read-only virtual file system over CPK game data packages.
//!
//! CPK packages bundle the data files of PAL3-era game clients. Each package
//! carries a fixed header, a directory table keyed by CRC, and entry names in
//! a legacy code page (GBK or Big5). This crate indexes those packages and
//! composes any number of them into a single case-insensitive namespace.
//!
//! - [`CrcHash`]: table-driven CRC used for lookup keys
//! - [`ArchiveIndex`]: one parsed package
//! - [`VirtualFileSystem`]: the composite mount table
//! - [`MountOrchestrator`]: mounts a game folder on a background worker
//!
//! # Example
//!
//! ```rust,no_run
//! use cpk_vfs::{CrcHash, GameVariant, MountOrchestrator, MountRequest, VfsConfig};
//! use std::sync::Arc;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let orchestrator = MountOrchestrator::new(Arc::new(CrcHash::initialized()));
//! let request = MountRequest::for_game("/games/pal3", GameVariant::Pal3, VfsConfig::default());
//!
//! let task = orchestrator.spawn(request);
//! let vfs = task.wait()?;
//!
//! for path in vfs.list_entries("basedata/ui/") {
//!     println!("{path}");
//! }
//! let data = vfs.read("basedata/cbdata/pal3.ini")?;
//! # let _ = data;
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod codepage;
pub mod config;
pub mod crc;
pub mod error;
pub mod mount;
pub mod path;
pub mod vfs;

pub use archive::{ArchiveEntry, ArchiveIndex, EntryStream};
pub use codepage::CodePage;
pub use config::{CollisionPolicy, GameVariant, MountRequest, VfsConfig};
pub use crc::CrcHash;
pub use error::{CpkError, OrchestratorError, Result};
pub use mount::{MountOrchestrator, MountResult, MountTask};
pub use vfs::VirtualFileSystem;
