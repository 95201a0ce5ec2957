//! Integration tests for background mounting

#![allow(clippy::unwrap_used, clippy::panic)]

mod common;

use common::{CpkBuilder, payload};
use cpk_vfs::{
    CodePage, CpkError, CrcHash, GameVariant, MountOrchestrator, MountRequest, OrchestratorError,
    VfsConfig,
};
use pretty_assertions::assert_eq;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

fn orchestrator() -> MountOrchestrator {
    MountOrchestrator::new(Arc::new(CrcHash::initialized()))
}

fn game_folder() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    CpkBuilder::new(CodePage::Gbk)
        .file("sys/config.bin", &payload(128, 1))
        .write_to(dir.path(), "basedata/basedata.cpk");
    CpkBuilder::new(CodePage::Gbk)
        .file("bgm/intro.snd", &payload(4096, 2))
        .write_to(dir.path(), "music/music.cpk");
    dir
}

fn request(root: &Path) -> MountRequest {
    MountRequest::new(
        root,
        ["basedata/basedata.cpk", "music/music.cpk"],
        VfsConfig::default(),
    )
}

#[test]
fn test_spawn_and_wait() {
    let dir = game_folder();
    let task = orchestrator().spawn(request(dir.path()));
    assert_eq!(task.root(), dir.path());

    let vfs = task.wait().unwrap();
    assert!(vfs.exists("sys/config.bin"));
    assert!(vfs.exists("bgm/intro.snd"));
    assert_eq!(vfs.read("sys/config.bin").unwrap().len(), 128);
    assert_eq!(vfs.read("bgm/intro.snd").unwrap().len(), 4096);
    assert_eq!(vfs.root(), dir.path());
}

#[test]
fn test_poll_yields_result_once() {
    let dir = game_folder();
    let mut task = orchestrator().spawn(request(dir.path()));

    let result = loop {
        if let Some(result) = task.poll() {
            break result;
        }
        thread::sleep(Duration::from_millis(1));
    };

    assert!(task.is_finished());
    assert!(result.unwrap().exists("bgm/intro.snd"));
    assert!(task.poll().is_none());
    assert!(matches!(task.wait(), Err(OrchestratorError::Runtime(_))));
}

#[test]
fn test_missing_root_names_first_archive() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("does-not-exist");

    let err = orchestrator().spawn(request(&root)).wait().unwrap_err();
    match &err {
        OrchestratorError::Archive { archive, source } => {
            assert_eq!(archive, &PathBuf::from("basedata/basedata.cpk"));
            assert!(matches!(source, CpkError::Io { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("basedata/basedata.cpk"));
}

#[test]
fn test_mounting_stops_at_first_failure() {
    let dir = tempfile::tempdir().unwrap();
    CpkBuilder::new(CodePage::Gbk)
        .file("sys/config.bin", b"x")
        .write_to(dir.path(), "basedata/basedata.cpk");
    common::write_bytes(&dir.path().join("music/music.cpk"), b"not a cpk");
    CpkBuilder::new(CodePage::Gbk)
        .file("scene/q01.sce", b"y")
        .write_to(dir.path(), "scene/q01.cpk");

    let request = MountRequest::new(
        dir.path(),
        ["basedata/basedata.cpk", "music/music.cpk", "scene/q01.cpk"],
        VfsConfig::default(),
    );
    let err = orchestrator().mount_all(&request).unwrap_err();
    assert_eq!(err.archive(), Some(Path::new("music/music.cpk")));
    match err {
        OrchestratorError::Archive { source, .. } => assert!(source.is_archive_damage()),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_begin_replaces_pending_attempt() {
    let bad = tempfile::tempdir().unwrap();
    let good = game_folder();
    let mut orchestrator = orchestrator();

    assert!(orchestrator.poll().is_none());
    orchestrator.begin(request(bad.path()));
    orchestrator.begin(request(good.path()));
    assert!(orchestrator.is_busy());

    let result = loop {
        if let Some(result) = orchestrator.poll() {
            break result;
        }
        thread::sleep(Duration::from_millis(1));
    };
    let vfs = result.unwrap();
    assert_eq!(vfs.root(), good.path());
    assert!(!orchestrator.is_busy());
    assert!(orchestrator.poll().is_none());
}

#[test]
fn test_retry_with_next_root() {
    let bad = tempfile::tempdir().unwrap();
    let good = game_folder();

    let mut tried = Vec::new();
    let vfs = orchestrator()
        .mount_first_available(
            [bad.path().to_path_buf(), good.path().to_path_buf()],
            |root| {
                tried.push(root.clone());
                request(&root)
            },
        )
        .unwrap();
    assert_eq!(vfs.root(), good.path());
    assert!(vfs.exists("sys/config.bin"));
    assert_eq!(tried, vec![bad.path().to_path_buf(), good.path().to_path_buf()]);

    let err = orchestrator()
        .mount_first_available([bad.path().to_path_buf()], |root| request(&root))
        .unwrap_err();
    assert_eq!(err.archive(), Some(Path::new("basedata/basedata.cpk")));
}

#[test]
fn test_retry_reads_scene_list_of_each_root() {
    // The first root has a scene archive but no music package
    let partial = tempfile::tempdir().unwrap();
    CpkBuilder::new(CodePage::Gbk)
        .file("sys/config.bin", b"partial")
        .write_to(partial.path(), "basedata/basedata.cpk");
    CpkBuilder::new(CodePage::Gbk)
        .file("m01/m01.nav", b"m01")
        .write_to(partial.path(), "scene/m01.cpk");

    let full = game_folder();
    CpkBuilder::new(CodePage::Gbk)
        .file("q01/q01.nav", b"q01")
        .write_to(full.path(), "scene/q01.cpk");
    CpkBuilder::new(CodePage::Gbk)
        .file("q02/q02.nav", b"q02")
        .write_to(full.path(), "scene/q02.cpk");

    let vfs = orchestrator()
        .mount_first_available(
            [partial.path().to_path_buf(), full.path().to_path_buf()],
            |root| MountRequest::for_game(root, GameVariant::Pal3, VfsConfig::default()),
        )
        .unwrap();

    assert_eq!(vfs.root(), full.path());
    assert_eq!(
        vfs.mounted_archives(),
        vec![
            full.path().join("basedata/basedata.cpk"),
            full.path().join("music/music.cpk"),
            full.path().join("scene/q01.cpk"),
            full.path().join("scene/q02.cpk"),
        ]
    );
    assert_eq!(vfs.read("q01/q01.nav").unwrap(), b"q01");
    assert_eq!(vfs.read("q02/q02.nav").unwrap(), b"q02");
    assert!(!vfs.exists("m01/m01.nav"));
}

#[test]
fn test_game_variant_layout() {
    let dir = game_folder();
    CpkBuilder::new(CodePage::Gbk)
        .file("q02/q02.nav", b"q02")
        .write_to(dir.path(), "scene/Q02.cpk");
    CpkBuilder::new(CodePage::Gbk)
        .file("q01/q01.nav", b"q01")
        .write_to(dir.path(), "scene/q01.cpk");

    let pal3 = MountRequest::for_game(dir.path(), GameVariant::Pal3, VfsConfig::default());
    let vfs = orchestrator().mount_all(&pal3).unwrap();
    assert_eq!(
        vfs.mounted_archives(),
        vec![
            dir.path().join("basedata/basedata.cpk"),
            dir.path().join("music/music.cpk"),
            dir.path().join("scene/q01.cpk"),
            dir.path().join("scene/Q02.cpk"),
        ]
    );
    assert_eq!(vfs.read("q02/q02.nav").unwrap(), b"q02");

    // PAL3A additionally needs its scn / sce archives
    let pal3a = MountRequest::for_game(dir.path(), GameVariant::Pal3A, VfsConfig::default());
    let err = orchestrator().mount_all(&pal3a).unwrap_err();
    assert_eq!(err.archive(), Some(Path::new("basedata/scn.cpk")));
}

#[test]
fn test_code_page_reaches_every_archive() {
    let dir = tempfile::tempdir().unwrap();
    CpkBuilder::new(CodePage::Big5)
        .file("sys/中文.txt", b"big5")
        .write_to(dir.path(), "basedata/basedata.cpk");
    CpkBuilder::new(CodePage::Big5)
        .file("bgm/中文.mp3", b"music")
        .write_to(dir.path(), "music/music.cpk");

    let request = request(dir.path()).with_code_page_id(950).unwrap();
    let vfs = orchestrator().mount_all(&request).unwrap();
    assert_eq!(vfs.config().code_page, CodePage::Big5);
    assert!(vfs.exists("sys/中文.txt"));
    assert!(vfs.exists("bgm/中文.mp3"));

    assert!(matches!(
        request.with_code_page_id(1252),
        Err(CpkError::UnsupportedCodePage(1252))
    ));
}

#[tokio::test]
async fn test_mount_all_async() {
    let dir = game_folder();
    let vfs = orchestrator()
        .mount_all_async(request(dir.path()))
        .await
        .unwrap();
    assert_eq!(vfs.list_entries("").count(), 2);

    let missing = dir.path().join("missing");
    let err = orchestrator()
        .mount_all_async(request(&missing))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Archive { .. }));
}

#[test]
fn test_shared_vfs_across_threads() {
    let dir = game_folder();
    let vfs = Arc::new(orchestrator().mount_all(&request(dir.path())).unwrap());

    let handles: Vec<_> = (0..4u8)
        .map(|_| {
            let vfs = Arc::clone(&vfs);
            thread::spawn(move || vfs.read("bgm/intro.snd").unwrap())
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), payload(4096, 2));
    }
}
