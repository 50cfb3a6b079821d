use std::fs;

use freezefs_core::builder::TreeBuilder;
use freezefs_core::deploy::Overwrite;
use freezefs_core::{FrozenModule, FsError, OnImport, Vfs};

fn leaked_image(target: &str) -> &'static [u8] {
    leaked_image_built(target, 1_700_000_000)
}

fn leaked_image_built(target: &str, built_unix: i64) -> &'static [u8] {
    let mut b = TreeBuilder::new(true, 10, 9).unwrap();
    b.add_file("config/app.toml", b"name = \"demo\"\n".to_vec()).unwrap();
    b.add_file("index.html", "<p>frozen</p>\n".repeat(50).into_bytes()).unwrap();
    let (bytes, _) = b.finish(target, built_unix).unwrap();
    Box::leak(bytes.into_boxed_slice())
}

#[test]
fn on_load_mounts_once() {
    let module = FrozenModule::new(leaked_image("/www"), "/www", OnImport::Mount, Overwrite::Never, true);
    let vfs = Vfs::new();
    module.on_load(&vfs).unwrap();
    assert!(vfs.is_mounted("/www"));
    assert_eq!(vfs.listdir("/www").unwrap(), vec!["config", "index.html"]);

    vfs.umount("/www").unwrap();
    module.on_load(&vfs).unwrap();
    assert!(!vfs.is_mounted("/www"));
}

#[test]
fn explicit_mount_and_umount() {
    let module = FrozenModule::new(leaked_image("/www"), "/www", OnImport::NoAction, Overwrite::Never, true);
    let vfs = Vfs::new();
    module.on_load(&vfs).unwrap();
    assert!(vfs.mount_points().is_empty());

    module.mount(&vfs, Some("/alt"), true).unwrap();
    // remounting the same image is accepted
    module.mount(&vfs, Some("/alt"), true).unwrap();
    assert_eq!(vfs.stat("/alt/config/app.toml").unwrap().size, 14);
    module.umount(&vfs, Some("/alt"), true).unwrap();
    assert!(matches!(module.umount(&vfs, Some("/alt"), true), Err(FsError::NotMounted(_))));

    assert_eq!(module.version().unwrap(), 1);
    assert_eq!(module.date_frozen().unwrap().len(), 19);
}

#[test]
fn umount_leaves_another_images_mount_alone() {
    let a = FrozenModule::new(leaked_image_built("/m", 1_700_000_000), "/m", OnImport::NoAction, Overwrite::Never, true);
    let b = FrozenModule::new(leaked_image_built("/m", 1_700_000_001), "/m", OnImport::NoAction, Overwrite::Never, true);
    let vfs = Vfs::new();
    b.mount(&vfs, None, true).unwrap();
    assert!(matches!(a.mount(&vfs, None, true), Err(FsError::AlreadyMounted(_))));

    assert!(matches!(a.umount(&vfs, None, true), Err(FsError::NotMounted(_))));
    assert!(vfs.is_mounted("/m"));
    b.umount(&vfs, None, true).unwrap();
    assert!(!vfs.is_mounted("/m"));
}

#[test]
fn on_load_deploys_to_target() {
    let td = tempfile::tempdir().unwrap();
    let target = td.path().join("site");
    let target_str: &'static str = Box::leak(target.to_string_lossy().into_owned().into_boxed_str());
    let module = FrozenModule::new(leaked_image("/site"), target_str, OnImport::Deploy, Overwrite::Never, true);
    module.on_load(&Vfs::new()).unwrap();
    assert_eq!(fs::read_to_string(target.join("config/app.toml")).unwrap(), "name = \"demo\"\n");
    assert_eq!(fs::read_to_string(target.join("index.html")).unwrap(), "<p>frozen</p>\n".repeat(50));

    // the idempotency guard keeps local edits
    fs::write(target.join("index.html"), "changed").unwrap();
    let report = module.deploy(None, true).unwrap();
    assert!(report.nothing_copied);
    assert_eq!(fs::read_to_string(target.join("index.html")).unwrap(), "changed");
}

#[test]
fn corrupt_embedded_image_fails_on_use() {
    let garbage: &'static [u8] = b"not an image at all, just bytes";
    let module = FrozenModule::new(garbage, "/x", OnImport::Mount, Overwrite::Never, true);
    assert!(matches!(module.image(), Err(FsError::CorruptImage(_))));
    assert!(module.on_load(&Vfs::new()).is_err());
}
