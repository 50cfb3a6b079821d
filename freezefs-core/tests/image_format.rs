use std::sync::Arc;

use freezefs_core::builder::TreeBuilder;
use freezefs_core::format::{self, IndexLimits, HEADER_LEN};
use freezefs_core::{FileSystem, FrozenFs, FsError, Image};

fn sample_bytes() -> Vec<u8> {
    let mut b = TreeBuilder::new(true, 12, 6).unwrap();
    b.add_file("docs/a.txt", "alpha ".repeat(300).into_bytes()).unwrap();
    b.add_file("docs/b.txt", b"beta".to_vec()).unwrap();
    b.add_folder("empty").unwrap();
    b.finish("/frozen", 1_650_000_000).unwrap().0
}

fn is_corrupt(bytes: Vec<u8>) -> bool {
    matches!(Image::from_vec(bytes), Err(FsError::CorruptImage(_)))
}

#[test]
fn header_fields_survive() {
    let image = Image::from_vec(sample_bytes()).unwrap();
    let h = image.header();
    assert_eq!(h.version, format::FORMAT_VERSION);
    assert_eq!(h.target, "/frozen");
    assert_eq!(h.built_unix, 1_650_000_000);
    assert!(image.has_compressed_files());
    assert!(image.verify_payload().is_ok());
    assert_eq!(image.tree().file_count(), 2);
    assert_eq!(image.tree().entry_count(), 4);
    // local time rendering, so only the shape is fixed
    let d = image.date_frozen();
    assert_eq!(d.len(), 19);
    assert_eq!(&d[4..5], "/");
    assert_eq!(&d[13..14], ":");
}

#[test]
fn damaged_images_are_rejected() {
    let good = sample_bytes();

    let mut bad_magic = good.clone();
    bad_magic[0] = b'X';
    assert!(is_corrupt(bad_magic));

    let mut bad_version = good.clone();
    bad_version[9] = 2;
    assert!(is_corrupt(bad_version));

    let mut bad_index = good.clone();
    let at = HEADER_LEN + "/frozen".len() + 3;
    bad_index[at] ^= 0x55;
    assert!(is_corrupt(bad_index));

    assert!(is_corrupt(good[..good.len() - 1].to_vec()));
    assert!(is_corrupt(good[..HEADER_LEN - 1].to_vec()));
    assert!(is_corrupt(Vec::new()));
}

#[test]
fn payload_damage_shows_up_on_verify_or_read() {
    let mut bytes = sample_bytes();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    let image = Image::from_vec(bytes).unwrap();
    assert!(matches!(image.verify_payload(), Err(FsError::CorruptImage(_))));
    // b.txt is the last stored file and is too short to compress
    let fs = FrozenFs::new(image);
    let mut f = fs.open("/docs/b.txt", "rb").unwrap().into_binary().unwrap();
    assert_ne!(f.read_to_end().unwrap(), b"beta");
}

#[test]
fn index_limits_apply() {
    let bytes = sample_bytes();
    let tight = IndexLimits { max_entries: 3, ..Default::default() };
    assert!(matches!(Image::parse(Arc::new(bytes.clone()), &tight), Err(FsError::CorruptImage(_))));
    let tiny = IndexLimits { max_index_bytes: 8, ..Default::default() };
    assert!(matches!(Image::parse(Arc::new(bytes), &tiny), Err(FsError::CorruptImage(_))));
}

#[test]
fn static_bytes_are_read_in_place() {
    let leaked: &'static [u8] = Box::leak(sample_bytes().into_boxed_slice());
    let image = Image::from_static(leaked).unwrap();
    let fs = FrozenFs::new(image.clone());
    let mut f = fs.open("docs/a.txt", "rb").unwrap().into_binary().unwrap();
    assert_eq!(f.read_to_end().unwrap(), "alpha ".repeat(300).into_bytes());
    assert_eq!(image.id(), Image::from_static(leaked).unwrap().id());
}
