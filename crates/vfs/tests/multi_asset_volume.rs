//! Volumes over a multi-asset root.
//!
//! Each asset is a rooted local backend standing in for its remote session.

use std::fs;

use tempfile::TempDir;
use vfs::{
    asset_folder_name, hash, AssetFolder, AssetRecord, FileBackend, LocalBackend,
    MultiAssetBackend, VfsError, Volume, VolumeLayout,
};

fn asset(id: &str, hostname: &str) -> AssetRecord {
    AssetRecord {
        id: id.to_string(),
        hostname: hostname.to_string(),
        ..Default::default()
    }
}

fn folder(record: &AssetRecord, dir: &TempDir) -> AssetFolder {
    let root = dir.path().to_string_lossy().into_owned();
    AssetFolder::new(
        asset_folder_name(record),
        Box::new(move || Ok(Box::new(LocalBackend::rooted(root.clone())) as Box<dyn FileBackend>)),
    )
}

#[test]
fn test_all_assets_root_lists_one_folder_per_asset() {
    let web = TempDir::new().unwrap();
    let db = TempDir::new().unwrap();
    fs::write(web.path().join("index.html"), "<html>").unwrap();

    let backend = MultiAssetBackend::new(vec![
        folder(&asset("a1", "dc1/web-01"), &web),
        folder(&asset("a2", "db-01"), &db),
    ]);
    let volume = Volume::new("multi", VolumeLayout::all_assets(), Box::new(backend));

    let root = volume.root_info();
    assert_eq!(root.name, "Home");
    assert!(!root.can_write);

    let entries = volume.list("/");
    let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["db-01", "dc1_web-01"]);
    assert!(entries.iter().all(|e| e.is_directory));
    assert_eq!(entries[1].hash, hash::hash_path("multi", "/dc1_web-01"));

    let inside = volume.list("/dc1_web-01");
    assert_eq!(inside[0].name, "index.html");
    assert_eq!(inside[0].parent_hash, hash::hash_path("multi", "/dc1_web-01"));
}

#[test]
fn test_asset_volume_is_based_at_its_folder() {
    let web = TempDir::new().unwrap();
    fs::create_dir(web.path().join("conf")).unwrap();
    let record = asset("a1", "dc1/web-01");

    let layout = VolumeLayout::asset(&record);
    assert_eq!(layout.base_path, "/dc1_web-01");
    let backend = MultiAssetBackend::new(vec![folder(&record, &web)]);
    let volume = Volume::new("single", layout, Box::new(backend));

    assert_eq!(volume.root_info().name, "dc1_web-01");
    let names: Vec<String> = volume.list("/").into_iter().map(|e| e.name).collect();
    assert_eq!(names, vec!["conf"]);

    let entry = volume
        .upload_file("/conf", "", "app.ini", &mut &b"[main]"[..])
        .unwrap();
    assert_eq!(entry.hash, hash::hash_path("single", "/conf/app.ini"));
    assert_eq!(fs::read_to_string(web.path().join("conf/app.ini")).unwrap(), "[main]");

    // `..` stays inside the asset.
    assert_eq!(volume.stat("/../conf/app.ini").unwrap().size, 6);
    assert!(matches!(volume.remove("/"), Err(VfsError::InvalidPath(_))));
}
