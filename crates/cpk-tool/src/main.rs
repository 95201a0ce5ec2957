//! cpk-tool: inspect PAL3 / PAL3A game data folders.
//!
//! Mounts the game's CPK packages the same way the game does and answers
//! questions about the resulting virtual file system.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cpk_vfs::{
    CodePage, CrcHash, GameVariant, MountOrchestrator, MountRequest, VfsConfig, VirtualFileSystem,
};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(
    name = "cpk-tool",
    about = "Inspect CPK game data packages through a virtual file system",
    version
)]
struct Cli {
    /// Game data folder; repeat to try several folders in order
    #[arg(long, env = "CPK_ROOT", value_delimiter = ',', required = true)]
    root: Vec<PathBuf>,

    /// Code page of entry names (936 = GBK, 950 = Big5)
    #[arg(long, env = "CPK_CODE_PAGE", default_value_t = CodePage::GBK_ID)]
    code_page: u32,

    /// Game build, selects the default archive list
    #[arg(long, default_value = "pal3")]
    variant: GameVariant,

    /// Mount these archives (relative to the root) instead of the defaults
    #[arg(long = "archive")]
    archives: Vec<PathBuf>,

    /// Read archives with plain file I/O instead of memory mapping
    #[arg(long)]
    no_mmap: bool,

    /// Verify each record's declared CRC while indexing
    #[arg(long)]
    verify_crc: bool,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List virtual paths, optionally under a prefix
    List { prefix: Option<String> },

    /// Check whether a virtual path exists
    Exists { path: String },

    /// Write an entry's contents to a file or stdout
    Extract {
        path: String,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show mounted archives and entry counts
    Info,
}

#[derive(Debug, Serialize)]
struct MountInfo {
    root: PathBuf,
    code_page: u32,
    archives: Vec<PathBuf>,
    entries: usize,
}

impl Cli {
    fn config(&self) -> Result<VfsConfig> {
        let code_page = CodePage::from_id(self.code_page)?;
        Ok(VfsConfig::new(code_page)
            .with_memory_mapping(!self.no_mmap)
            .with_crc_verification(self.verify_crc))
    }

    /// Builds the mount request for each candidate root as it is tried
    fn request_builder(&self) -> Result<impl FnMut(PathBuf) -> MountRequest + Send + use<>> {
        let config = self.config()?;
        let variant = self.variant;
        let archives = self.archives.clone();
        Ok(move |root: PathBuf| {
            if archives.is_empty() {
                MountRequest::for_game(root, variant, config.clone())
            } else {
                MountRequest::new(root, archives.clone(), config.clone())
            }
        })
    }
}

async fn mount(cli: &Cli) -> Result<VirtualFileSystem> {
    let orchestrator = MountOrchestrator::new(Arc::new(CrcHash::initialized()));
    let roots = cli.root.clone();
    let request_for = cli.request_builder()?;

    tokio::task::spawn_blocking(move || orchestrator.mount_first_available(roots, request_for))
        .await
        .context("mount worker failed")?
        .context("no usable game data folder")
}

fn run(cli: &Cli, vfs: &VirtualFileSystem, out: &mut impl Write) -> Result<bool> {
    match &cli.command {
        Command::List { prefix } => {
            let paths: Vec<String> = vfs.list_entries(prefix.as_deref().unwrap_or("")).collect();
            if cli.json {
                serde_json::to_writer_pretty(&mut *out, &paths)?;
                writeln!(out)?;
            } else {
                for path in paths {
                    writeln!(out, "{path}")?;
                }
            }
        }
        Command::Exists { path } => {
            let exists = vfs.exists(path);
            if cli.json {
                writeln!(out, "{}", serde_json::json!({ "path": path, "exists": exists }))?;
            } else {
                writeln!(out, "{}", if exists { "yes" } else { "no" })?;
            }
            return Ok(exists);
        }
        Command::Extract { path, output } => {
            let data = vfs
                .read(path)
                .with_context(|| format!("failed to read {path}"))?;
            match output {
                Some(file) => {
                    std::fs::write(file, &data)
                        .with_context(|| format!("failed to write {}", file.display()))?;
                    tracing::info!("Extracted {} ({} bytes) to {:?}", path, data.len(), file);
                }
                None => out.write_all(&data)?,
            }
        }
        Command::Info => {
            let info = MountInfo {
                root: vfs.root().to_path_buf(),
                code_page: vfs.config().code_page.id(),
                archives: vfs.mounted_archives(),
                entries: vfs.len(),
            };
            if cli.json {
                serde_json::to_writer_pretty(&mut *out, &info)?;
                writeln!(out)?;
            } else {
                writeln!(out, "root:      {}", info.root.display())?;
                writeln!(out, "code page: {}", info.code_page)?;
                writeln!(out, "entries:   {}", info.entries)?;
                for archive in &info.archives {
                    writeln!(out, "  {}", archive.display())?;
                }
            }
        }
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let vfs = mount(&cli).await?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let ok = run(&cli, &vfs, &mut out)?;
    out.flush()?;

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
