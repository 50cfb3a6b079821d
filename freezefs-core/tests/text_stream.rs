use std::sync::Arc;

use freezefs_core::builder::TreeBuilder;
use freezefs_core::text::TextFile;
use freezefs_core::{EngineConfig, FileSystem, FrozenFs, FsError, Image};
use proptest::prelude::*;

fn fs_with(files: &[(&str, &[u8])], compress: bool, decode_buffer: usize) -> FrozenFs {
    let mut b = TreeBuilder::new(compress, 9, 9).unwrap();
    for (path, data) in files {
        b.add_file(path, data.to_vec()).unwrap();
    }
    let (bytes, _) = b.finish("/t", 0).unwrap();
    let cfg = EngineConfig::default().with_decode_buffer(decode_buffer).unwrap();
    FrozenFs::with_config(Image::from_vec(bytes).unwrap(), cfg)
}

fn open_text(fs: &FrozenFs, path: &str) -> TextFile {
    fs.open(path, "r").unwrap().into_text().unwrap()
}

fn read_in_steps(f: &mut TextFile, n: usize) -> String {
    let mut out = String::new();
    loop {
        let s = f.read(n).unwrap();
        if s.is_empty() {
            return out;
        }
        // never more than n bytes plus the tail of one codepoint
        assert!(s.len() <= n + 3, "read({n}) returned {} bytes", s.len());
        out.push_str(&s);
    }
}

fn mixed_text() -> String {
    let mut s = String::new();
    for i in 0..40 {
        s.push_str(&format!("line {i}: grüße, 東京, ¡olé! 😀\n"));
    }
    s
}

#[test]
fn every_read_size_reproduces_compressed_text() {
    let text = mixed_text();
    let fs = fs_with(&[("m.txt", text.as_bytes())], true, 400);
    assert!(fs.image().tree().walk().any(|id| fs.image().tree().node(id).file().map_or(false, |m| m.compressed)));
    for n in 1..=text.len() + 1 {
        let mut f = open_text(&fs, "m.txt");
        assert_eq!(read_in_steps(&mut f, n), text, "read size {n}");
    }
}

#[test]
fn small_decode_buffer_matches_default() {
    let text = mixed_text();
    for cap in [16, 17, 64, 400] {
        let fs = fs_with(&[("m.txt", text.as_bytes())], true, cap);
        let mut f = open_text(&fs, "m.txt");
        assert_eq!(f.decode_buffer_capacity(), cap);
        assert_eq!(f.read_all().unwrap(), text);
        let f = open_text(&fs, "m.txt");
        let lines: Vec<String> = f.map(|l| l.unwrap()).collect();
        assert_eq!(lines.len(), 40);
        assert_eq!(lines.concat(), text);
    }
}

#[test]
fn codepoint_split_across_reads() {
    let fs = fs_with(&[("e.txt", "x😀y".as_bytes()), ("a.txt", "aé".as_bytes())], false, 16);

    let mut f = open_text(&fs, "e.txt");
    assert_eq!(f.read(2).unwrap(), "x😀");
    assert_eq!(f.read(2).unwrap(), "y");
    assert_eq!(f.read(2).unwrap(), "");

    let mut f = open_text(&fs, "e.txt");
    assert_eq!(f.read(1).unwrap(), "x");
    assert_eq!(f.read(1).unwrap(), "😀");
    assert_eq!(f.position(), 5);

    let mut f = open_text(&fs, "a.txt");
    assert_eq!(f.read(1).unwrap(), "a");
    assert_eq!(f.read(1).unwrap(), "é");
    assert_eq!(f.read(1).unwrap(), "");
}

#[test]
fn malformed_utf8_is_invalid_data() {
    let bad: &[u8] = b"ok\xff\xfe tail";
    let truncated: &[u8] = b"abc\xe6\x9d";
    let fs = fs_with(&[("bad.txt", bad), ("cut.txt", truncated)], false, 16);

    let mut f = open_text(&fs, "bad.txt");
    let err = f.read_all().unwrap_err();
    assert!(matches!(err, FsError::InvalidData(2)));

    let mut f = open_text(&fs, "cut.txt");
    assert_eq!(f.read(3).unwrap(), "abc");
    assert!(matches!(f.read(3), Err(FsError::InvalidData(_))));
}

#[test]
fn readline_then_raw_bytes() {
    let fs = fs_with(&[("l.txt", b"first\nsecond\nthird")], false, 16);
    let mut f = open_text(&fs, "l.txt");
    assert_eq!(f.readline().unwrap(), "first\n");
    let mut buf = [0u8; 3];
    assert_eq!(f.readinto(&mut buf).unwrap(), 3);
    assert_eq!(&buf, b"sec");
    assert_eq!(f.readlines().unwrap(), vec!["ond\n".to_string(), "third".to_string()]);
    assert_eq!(f.readline().unwrap(), "");
    f.close();
    assert!(matches!(f.read(1), Err(FsError::Closed)));
}

#[test]
fn decode_buffer_minimum_enforced() {
    assert!(EngineConfig::default().with_decode_buffer(15).is_err());
    assert!(EngineConfig::default().with_decode_buffer(16).is_ok());
}

#[test]
fn handles_are_independent() {
    let text = mixed_text();
    let fs = Arc::new(fs_with(&[("m.txt", text.as_bytes())], true, 32));
    let mut a = open_text(&fs, "m.txt");
    let mut b = open_text(&fs, "m.txt");
    let first = a.read(10).unwrap();
    assert_eq!(b.read_all().unwrap(), text);
    let rest = a.read_all().unwrap();
    assert_eq!(first + &rest, text);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn chunked_reads_concatenate_to_the_file(
        text in "\\PC{0,300}",
        n in 1usize..64,
        cap in 16usize..80,
        compress in any::<bool>(),
    ) {
        let fs = fs_with(&[("p.txt", text.as_bytes())], compress, cap);
        let mut f = open_text(&fs, "p.txt");
        prop_assert_eq!(read_in_steps(&mut f, n), text);
    }
}
