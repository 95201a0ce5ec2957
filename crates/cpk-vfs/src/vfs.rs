//! Composite mount table over several CPK archives

use crate::archive::{ArchiveEntry, ArchiveIndex, EntryStream};
use crate::codepage::CodePage;
use crate::config::{CollisionPolicy, VfsConfig};
use crate::crc::CrcHash;
use crate::error::{CpkError, Result};
use crate::path;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace};

/// One visible path: an entry inside a key bucket of a mounted archive
#[derive(Debug, Clone, Copy)]
struct Slot {
    archive: usize,
    position: usize,
}

impl Slot {
    fn entry<'a>(&self, archives: &'a [Arc<ArchiveIndex>], key: u32) -> Option<&'a ArchiveEntry> {
        archives.get(self.archive)?.bucket(key).get(self.position)
    }
}

#[derive(Debug, Default)]
struct MountTable {
    archives: Vec<Arc<ArchiveIndex>>,
    /// Visible slots per lookup key; distinct paths may share a key
    by_key: HashMap<u32, Vec<Slot>>,
}

impl MountTable {
    fn resolve(&self, key: u32, normalized: &str) -> Option<(&Arc<ArchiveIndex>, &ArchiveEntry)> {
        self.by_key.get(&key)?.iter().find_map(|slot| {
            let entry = slot.entry(&self.archives, key)?;
            let archive = self.archives.get(slot.archive)?;
            (entry.path == normalized).then_some((archive, entry))
        })
    }

    fn visible_entries(&self) -> impl Iterator<Item = &ArchiveEntry> {
        self.by_key
            .iter()
            .flat_map(|(key, slots)| slots.iter().map(move |slot| (*key, slot)))
            .filter_map(|(key, slot)| slot.entry(&self.archives, key))
    }

    fn is_mounted(&self, path: &Path) -> bool {
        self.archives.iter().any(|a| a.path() == path)
    }
}

/// Read-only file system over every mounted archive.
///
/// Paths are case-insensitive and accept either separator. Lookups take a
/// shared lock; mounting takes the exclusive lock only for the merge, so a
/// file system that is already in use can still receive late mounts.
#[derive(Debug)]
pub struct VirtualFileSystem {
    root: PathBuf,
    config: VfsConfig,
    crc: Arc<CrcHash>,
    table: RwLock<MountTable>,
}

impl VirtualFileSystem {
    /// Create an empty file system rooted at `root`.
    ///
    /// The hasher is initialized here if the caller has not done so.
    pub fn new(root: impl Into<PathBuf>, config: VfsConfig, crc: Arc<CrcHash>) -> Self {
        crc.init();
        Self {
            root: root.into(),
            config,
            crc,
            table: RwLock::new(MountTable::default()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &VfsConfig {
        &self.config
    }

    pub fn crc(&self) -> &Arc<CrcHash> {
        &self.crc
    }

    /// Mount an archive relative to the root, decoding names with the
    /// configured code page.
    pub fn mount(&self, archive: impl AsRef<Path>) -> Result<()> {
        self.mount_with_code_page(archive, self.config.code_page)
    }

    /// Mount an archive with an explicit code page.
    ///
    /// Either every entry of the archive becomes visible or none does.
    /// Mounting a file that is already mounted fails with
    /// [`CpkError::AlreadyMounted`].
    pub fn mount_with_code_page(&self, archive: impl AsRef<Path>, code_page: CodePage) -> Result<()> {
        let full_path = self.root.join(archive.as_ref());

        if self.table.read().is_mounted(&full_path) {
            return Err(CpkError::AlreadyMounted(full_path));
        }

        let config = self.config.clone().with_code_page(code_page);
        let index = Arc::new(ArchiveIndex::open(&full_path, &config, &self.crc)?);

        let mut guard = self.table.write();
        // Another thread may have mounted the same file while we parsed
        if guard.is_mounted(&full_path) {
            return Err(CpkError::AlreadyMounted(full_path));
        }

        let MountTable { archives, by_key } = &mut *guard;
        let archive_id = archives.len();
        archives.push(Arc::clone(&index));
        let archives: &[Arc<ArchiveIndex>] = archives;

        let mut overridden = 0usize;
        for (key, bucket) in index.buckets() {
            let slots = by_key.entry(key).or_default();
            for (position, entry) in bucket.iter().enumerate() {
                let slot = Slot {
                    archive: archive_id,
                    position,
                };
                let shadowed = slots.iter().position(|existing| {
                    existing
                        .entry(archives, key)
                        .is_some_and(|e| e.path == entry.path)
                });

                match shadowed {
                    Some(i) => {
                        if self.config.collision_policy == CollisionPolicy::LastMountedWins {
                            slots[i] = slot;
                            overridden += 1;
                        }
                    }
                    None => {
                        if !slots.is_empty() {
                            trace!("{} shares key 0x{:08x} with another path", entry.path, key);
                        }
                        slots.push(slot);
                    }
                }
            }
        }

        debug!(
            "Mounted {:?}: {} entries, {} overriding earlier archives ({} visible paths total)",
            full_path,
            index.len(),
            overridden,
            by_key.values().map(Vec::len).sum::<usize>()
        );

        Ok(())
    }

    /// Whether `path` resolves to a file in any mounted archive.
    pub fn exists(&self, path: &str) -> bool {
        self.entry(path).is_some()
    }

    /// Metadata of the entry `path` resolves to.
    pub fn entry(&self, path: &str) -> Option<ArchiveEntry> {
        let normalized = path::normalize(path);
        let key = self.crc.compute_str(&normalized);
        self.table
            .read()
            .resolve(key, &normalized)
            .map(|(_, entry)| entry.clone())
    }

    /// Sorted virtual paths starting with `prefix`. An empty prefix lists
    /// everything.
    ///
    /// The iterator owns a snapshot taken when this is called; call again to
    /// restart or to observe later mounts.
    pub fn list_entries(&self, prefix: &str) -> impl Iterator<Item = String> + use<> {
        let prefix = path::normalize_prefix(prefix);
        let table = self.table.read();

        let mut paths: Vec<String> = table
            .visible_entries()
            .filter(|entry| entry.path.starts_with(&prefix))
            .map(|entry| entry.path.clone())
            .collect();
        drop(table);

        paths.sort_unstable();
        paths.into_iter()
    }

    /// Open a seekable stream over an entry's contents.
    ///
    /// Each call returns an independent cursor.
    pub fn open_read(&self, path: &str) -> Result<EntryStream> {
        let normalized = path::normalize(path);
        let key = self.crc.compute_str(&normalized);

        let (archive, entry) = {
            let table = self.table.read();
            let (archive, entry) = table
                .resolve(key, &normalized)
                .ok_or_else(|| CpkError::NotFound(normalized.clone()))?;
            (Arc::clone(archive), entry.clone())
        };

        archive.open_entry(&entry)
    }

    /// Read an entry's full contents.
    pub fn read(&self, path: &str) -> Result<Vec<u8>> {
        let stream = self.open_read(path)?;
        stream
            .into_bytes()
            .map_err(|e| CpkError::io(path::normalize(path), e))
    }

    /// Archive files in mount order
    pub fn mounted_archives(&self) -> Vec<PathBuf> {
        self.table
            .read()
            .archives
            .iter()
            .map(|a| a.path().to_path_buf())
            .collect()
    }

    /// Number of distinct visible paths
    pub fn len(&self) -> usize {
        self.table.read().by_key.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().by_key.is_empty()
    }
}
