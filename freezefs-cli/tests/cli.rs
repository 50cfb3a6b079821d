use assert_cmd::prelude::*;
use assert_fs::prelude::*;
use predicates::prelude::*;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::process::Command;

fn write_random(path: &std::path::Path, bytes: usize, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let data: Vec<u8> = (0..bytes).map(|_| rng.gen()).collect();
    std::fs::write(path, data).unwrap();
}

fn sample_folder(td: &assert_fs::TempDir) -> assert_fs::fixture::ChildPath {
    let data = td.child("data");
    data.create_dir_all().unwrap();
    data.child("a.txt").write_str("hi\n").unwrap();
    data.child("sub").create_dir_all().unwrap();
    data.child("sub/b.bin").write_binary(&[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
    data.child("sub/notes.md").write_str(&"frozen notes\n".repeat(100)).unwrap();
    write_random(data.child("sub/noise.bin").path(), 2048, 11);
    data
}

#[test]
fn build_inspect_ls_cat_extract() {
    let td = assert_fs::TempDir::new().unwrap();
    let data = sample_folder(&td);

    Command::cargo_bin("freezefs")
        .unwrap()
        .current_dir(td.path())
        .args(["build", "data", "frozen_data.rs", "--compress", "--image", "data.img"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    td.child("frozen_data.rs")
        .assert(predicate::str::contains("pub static IMAGE: &[u8] = &["))
        .assert(predicate::str::contains("pub const TARGET: &str = \"/data\";"))
        .assert(predicate::str::contains("OnImport::Mount, Overwrite::Never, false"));
    td.child("data.img").assert(predicate::path::exists());

    Command::cargo_bin("freezefs")
        .unwrap()
        .current_dir(td.path())
        .args(["inspect", "data.img"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"target\": \"/data\""))
        .stdout(predicate::str::contains("\"payload_ok\": true"))
        .stdout(predicate::str::contains("\"compressed_files\": true"));

    Command::cargo_bin("freezefs")
        .unwrap()
        .current_dir(td.path())
        .args(["ls", "data.img", "/", "--recursive"])
        .assert()
        .success()
        .stdout(predicate::str::contains("a.txt"))
        .stdout(predicate::str::contains("sub/"))
        .stdout(predicate::str::contains("sub/b.bin"));

    Command::cargo_bin("freezefs")
        .unwrap()
        .current_dir(td.path())
        .args(["cat", "data.img", "/a.txt"])
        .assert()
        .success()
        .stdout("hi\n");

    Command::cargo_bin("freezefs")
        .unwrap()
        .current_dir(td.path())
        .args(["extract", "data.img", "out", "--silent"])
        .assert()
        .success();
    for rel in ["a.txt", "sub/b.bin", "sub/notes.md", "sub/noise.bin"] {
        let want = std::fs::read(data.child(rel).path()).unwrap();
        let got = std::fs::read(td.child("out").child(rel).path()).unwrap();
        assert_eq!(want, got, "{rel}");
    }
}

#[test]
fn cat_of_missing_file_fails() {
    let td = assert_fs::TempDir::new().unwrap();
    sample_folder(&td);
    Command::cargo_bin("freezefs")
        .unwrap()
        .current_dir(td.path())
        .args(["build", "data", "mod_a.rs", "--silent", "--image", "a.img"])
        .assert()
        .success();
    Command::cargo_bin("freezefs")
        .unwrap()
        .current_dir(td.path())
        .args(["cat", "a.img", "/nope.txt"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no such file"));
}

#[test]
fn build_rejects_bad_arguments() {
    let td = assert_fs::TempDir::new().unwrap();
    sample_folder(&td);
    let cases: &[&[&str]] = &[
        &["build", "missing", "out.rs"],
        &["build", "data", "out.txt"],
        &["build", "data", "out.rs", "--target", "relative"],
        &["build", "data", "out.rs", "--target", "/trailing/"],
        &["build", "data", "data.rs"],
        &["build", "data", "out.rs", "--target", "/x/out"],
        &["build", "data", "out.rs", "--wbits", "15"],
        &["build", "data", "out.rs", "--level", "10"],
        &["build", "data", "out.rs", "--on-import", "explode"],
    ];
    for args in cases {
        Command::cargo_bin("freezefs")
            .unwrap()
            .current_dir(td.path())
            .args(*args)
            .assert()
            .failure();
    }
    td.child("out.rs").assert(predicate::path::missing());
}

#[test]
fn corrupt_image_is_reported() {
    let td = assert_fs::TempDir::new().unwrap();
    td.child("junk.img").write_binary(&[0u8; 100]).unwrap();
    Command::cargo_bin("freezefs")
        .unwrap()
        .current_dir(td.path())
        .args(["inspect", "junk.img"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("corrupt image"));
}
