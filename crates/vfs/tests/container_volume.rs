//! Container volumes driven end-to-end through a process exec transport.
//!
//! The transport runs each command vector with `env`, so the "container" is
//! the test host and its root is a scratch directory. This exercises the
//! real `ls` parser, the shell write scripts and the streaming download.

#![cfg(unix)]

use std::fs;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use vfs::target::ContainerTarget;
use vfs::{
    BackendKind, ChunkRange, ContainerBackend, ContainerOptions, ExecRunner, ProcessExec, Volume,
    VolumeLayout,
};

fn container_volume(root: &TempDir) -> Volume {
    let transport = Arc::new(ProcessExec::new("env", Vec::new()));
    let runner = ExecRunner::new(transport).with_deadline(Duration::from_secs(30));
    let backend = ContainerBackend::new(runner, ContainerOptions::default());
    let target = ContainerTarget {
        pod: "web-0".to_string(),
        namespace: "prod".to_string(),
        ..Default::default()
    };
    Volume::new(
        "container-vol",
        VolumeLayout::container(&target, &root.path().to_string_lossy()),
        Box::new(backend),
    )
}

#[test]
fn test_root_and_listing() {
    let root = TempDir::new().unwrap();
    fs::create_dir(root.path().join("logs")).unwrap();
    fs::write(root.path().join("app.conf"), "listen 80\n").unwrap();
    fs::write(root.path().join("with space.txt"), "x").unwrap();

    let volume = container_volume(&root);
    assert_eq!(volume.kind(), BackendKind::ContainerExec);

    let info = volume.root_info();
    assert_eq!(info.name, "web-0");
    assert!(info.is_directory);

    let mut entries = volume.list("/");
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["app.conf", "logs", "with space.txt"]);
    assert_eq!(entries[0].size, 10);
    assert!(!entries[0].is_directory);
    assert!(entries[1].is_directory);
    assert!(entries[0].modified_at > 0);
}

#[test]
fn test_stat_missing_is_not_found() {
    let root = TempDir::new().unwrap();
    let volume = container_volume(&root);
    assert!(volume.stat("/nothing-here").unwrap_err().is_not_found());
    assert!(volume.list("/nothing-here").is_empty());
}

#[test]
fn test_symlinks_are_listed_as_files() {
    let root = TempDir::new().unwrap();
    fs::create_dir(root.path().join("real")).unwrap();
    std::os::unix::fs::symlink(root.path().join("real"), root.path().join("alias")).unwrap();

    let volume = container_volume(&root);
    let entries = volume.list("/");
    let alias = entries.iter().find(|e| e.name == "alias").unwrap();
    assert!(!alias.is_directory);
}

#[test]
fn test_upload_then_download() {
    let root = TempDir::new().unwrap();
    let volume = container_volume(&root);

    let entry = volume
        .upload_file("/", "nested/dir", "hello.txt", &mut &b"hello container"[..])
        .unwrap();
    assert_eq!(entry.name, "hello.txt");
    assert_eq!(entry.size, 15);
    assert_eq!(
        fs::read(root.path().join("nested/dir/hello.txt")).unwrap(),
        b"hello container"
    );

    let mut out = String::new();
    volume
        .open("/nested/dir/hello.txt")
        .unwrap()
        .read_to_string(&mut out)
        .unwrap();
    assert_eq!(out, "hello container");
}

#[test]
fn test_download_of_empty_file_ends_immediately() {
    let root = TempDir::new().unwrap();
    fs::write(root.path().join("empty"), "").unwrap();
    let volume = container_volume(&root);

    let mut out = Vec::new();
    volume.open("/empty").unwrap().read_to_end(&mut out).unwrap();
    assert!(out.is_empty());
}

#[test]
fn test_chunked_upload_in_container() {
    let root = TempDir::new().unwrap();
    let volume = container_volume(&root);

    let first = vec![b'a'; 4096];
    let second = vec![b'b'; 4096];
    let range = |offset| ChunkRange {
        offset,
        length: 4096,
        total_size: 8192,
    };
    volume
        .upload_chunk(11, "/", "", "big.bin", range(0), &mut &first[..])
        .unwrap();
    volume
        .upload_chunk(11, "/", "", "big.bin", range(4096), &mut &second[..])
        .unwrap();
    let merged = volume.merge_chunk(11, 2, "/", "", "big.bin").unwrap();
    assert_eq!(merged.size, 8192);

    let content = fs::read(root.path().join("big.bin")).unwrap();
    assert_eq!(&content[..4096], &first[..]);
    assert_eq!(&content[4096..], &second[..]);
}

#[test]
fn test_make_rename_remove() {
    let root = TempDir::new().unwrap();
    let volume = container_volume(&root);

    volume.make_dir("/", "work").unwrap();
    volume.make_file("/work", "notes.md").unwrap();
    let renamed = volume.rename("/work/notes.md", "final.md").unwrap();
    assert_eq!(renamed.name, "final.md");
    assert!(root.path().join("work/final.md").exists());

    volume.remove("/work").unwrap();
    assert!(!root.path().join("work").exists());
}

#[test]
fn test_rename_onto_directory_fails() {
    let root = TempDir::new().unwrap();
    fs::create_dir(root.path().join("logs")).unwrap();
    fs::write(root.path().join("a.txt"), "a").unwrap();
    let volume = container_volume(&root);

    assert!(volume.rename("/a.txt", "logs").is_err());
    assert!(root.path().join("a.txt").exists());
    assert!(!root.path().join("logs/a.txt").exists());
}

#[test]
fn test_search_is_unsupported() {
    let root = TempDir::new().unwrap();
    let volume = container_volume(&root);
    assert!(matches!(
        volume.search("/", "x").unwrap_err(),
        vfs::VfsError::Unsupported(_)
    ));
}
