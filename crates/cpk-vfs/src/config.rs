//! Mount configuration and game data layout

use crate::codepage::CodePage;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Which archive wins when two mounted archives provide the same path.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// Later mounts override earlier ones (patch / DLC semantics)
    #[default]
    LastMountedWins,
    /// The first archive providing a path keeps it
    FirstMountedWins,
}

/// Configuration shared by every archive mounted into one file system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VfsConfig {
    /// Code page used to decode entry names
    pub code_page: CodePage,

    /// Resolution of cross-archive path collisions
    pub collision_policy: CollisionPolicy,

    /// Memory-map archives (falls back to file reads when mapping fails)
    pub use_memory_mapping: bool,

    /// Check each record's declared CRC against its rebuilt path
    pub verify_crc: bool,
}

impl Default for VfsConfig {
    fn default() -> Self {
        Self {
            code_page: CodePage::Gbk,
            collision_policy: CollisionPolicy::LastMountedWins,
            use_memory_mapping: true,
            verify_crc: false,
        }
    }
}

impl VfsConfig {
    pub fn new(code_page: CodePage) -> Self {
        Self {
            code_page,
            ..Default::default()
        }
    }

    #[must_use]
    pub const fn with_code_page(mut self, code_page: CodePage) -> Self {
        self.code_page = code_page;
        self
    }

    #[must_use]
    pub const fn with_collision_policy(mut self, policy: CollisionPolicy) -> Self {
        self.collision_policy = policy;
        self
    }

    /// Enable or disable memory-mapped archive access
    #[must_use]
    pub const fn with_memory_mapping(mut self, enable: bool) -> Self {
        self.use_memory_mapping = enable;
        self
    }

    /// Enable or disable declared CRC verification
    #[must_use]
    pub const fn with_crc_verification(mut self, enable: bool) -> Self {
        self.verify_crc = enable;
        self
    }
}

/// Game build whose data folder is being mounted.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameVariant {
    #[default]
    Pal3,
    Pal3A,
}

/// Base data archive, relative to the game root
pub const BASE_DATA_ARCHIVE: &str = "basedata/basedata.cpk";
/// Music archive, relative to the game root
pub const MUSIC_ARCHIVE: &str = "music/music.cpk";
/// Directory holding one archive per scene
pub const SCENE_DIR: &str = "scene";
/// Extra archives shipped only with PAL3A
pub const PAL3A_EXTRA_ARCHIVES: [&str; 2] = ["basedata/scn.cpk", "basedata/sce.cpk"];

impl GameVariant {
    /// Ordered list of archives to mount for this build.
    ///
    /// Base data, then music, then every `*.cpk` in the scene directory in
    /// case-insensitive name order, then the variant's extra archives.
    /// A missing scene directory contributes nothing.
    pub fn default_archives(self, root: &Path) -> Vec<PathBuf> {
        let mut archives = vec![PathBuf::from(BASE_DATA_ARCHIVE), PathBuf::from(MUSIC_ARCHIVE)];
        archives.extend(scene_archives(root));
        if self == Self::Pal3A {
            archives.extend(PAL3A_EXTRA_ARCHIVES.iter().map(PathBuf::from));
        }
        archives
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pal3 => "pal3",
            Self::Pal3A => "pal3a",
        }
    }
}

fn scene_archives(root: &Path) -> Vec<PathBuf> {
    let Ok(dir) = std::fs::read_dir(root.join(SCENE_DIR)) else {
        return Vec::new();
    };

    let mut names: Vec<String> = dir
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| {
            Path::new(name)
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("cpk"))
        })
        .collect();
    names.sort_by_key(|name| name.to_lowercase());

    names
        .into_iter()
        .map(|name| Path::new(SCENE_DIR).join(name))
        .collect()
}

impl fmt::Display for GameVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GameVariant {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pal3" => Ok(Self::Pal3),
            "pal3a" => Ok(Self::Pal3A),
            other => Err(format!("unknown game variant: {other}")),
        }
    }
}

/// One mount attempt: a root folder and the archives to mount from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRequest {
    pub root: PathBuf,
    /// Archive paths relative to `root`, mounted in this order
    pub archives: Vec<PathBuf>,
    pub config: VfsConfig,
}

impl MountRequest {
    pub fn new(
        root: impl Into<PathBuf>,
        archives: impl IntoIterator<Item = impl Into<PathBuf>>,
        config: VfsConfig,
    ) -> Self {
        Self {
            root: root.into(),
            archives: archives.into_iter().map(Into::into).collect(),
            config,
        }
    }

    /// Request for a game folder using the variant's default archive list
    pub fn for_game(root: impl Into<PathBuf>, variant: GameVariant, config: VfsConfig) -> Self {
        let root = root.into();
        let archives = variant.default_archives(&root);
        Self {
            root,
            archives,
            config,
        }
    }

    /// Same request with a numeric code page
    pub fn with_code_page_id(mut self, code_page: u32) -> Result<Self> {
        self.config.code_page = CodePage::from_id(code_page)?;
        Ok(self)
    }

    pub(crate) fn archive_path(&self, archive: &Path) -> PathBuf {
        self.root.join(archive)
    }
}
