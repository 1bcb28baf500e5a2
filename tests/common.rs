#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use walkdir::WalkDir;

pub fn sfmf() -> Command {
    let mut cmd = Command::cargo_bin(env!("CARGO_PKG_NAME")).unwrap();
    cmd.arg("-vv");
    cmd
}

/// Packs `in_dir` into `out_dir` with the given (blob, pack, avg) KiB knobs.
pub fn run_pack(in_dir: &Path, out_dir: &Path, kbs: (u32, u32, u32)) {
    let meta = out_dir.with_extension("meta");
    fs::write(&meta, b"test snapshot\n").expect("Couldn't write metadata file");

    sfmf()
        .arg("pack")
        .arg(in_dir)
        .arg(out_dir)
        .arg(&meta)
        .arg(kbs.0.to_string())
        .arg(kbs.1.to_string())
        .arg(kbs.2.to_string())
        .assert()
        .success();
}

/// Runs `sfmf unpack`; `extra` holds flags and donor directories, which
/// all come after the two required positionals.
pub fn run_unpack(manifest: &Path, out_dir: &Path, extra: &[&str]) -> assert_cmd::assert::Assert {
    let mut cmd = sfmf();
    cmd.arg("unpack").arg(manifest).arg(out_dir);
    for arg in extra {
        cmd.arg(arg);
    }
    cmd.assert()
}

/// Deterministic incompressible bytes, so tests can steer payloads away
/// from the embedded tier without a rand dependency.
pub fn noise(len: usize, seed: u64) -> Vec<u8> {
    let mut x = seed.wrapping_add(0x9e3779b97f4a7c15);
    (0..len)
        .map(|_| {
            x = x
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (x >> 33) as u8
        })
        .collect()
}

pub fn files_with_extension(dir: &Path, ext: &str) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = fs::read_dir(dir)
        .expect("Couldn't read dir")
        .map(|de| de.expect("Couldn't read dir entry").path())
        .filter(|p| p.extension().map(|e| e == ext).unwrap_or(false))
        .collect();
    found.sort();
    found
}

/// Compares two trees entry by entry: kinds, contents, symlink targets,
/// permission bits, and whole-second mtimes must all match, and neither
/// side may have anything the other lacks.
pub fn assert_trees_match(original: &Path, restored: &Path) {
    assert_tree_covers(original, restored, true);
    // And nothing extra materialized.
    assert_tree_covers(restored, original, false);
}

fn assert_tree_covers(from: &Path, to: &Path, check_attributes: bool) {
    for entry in WalkDir::new(from) {
        let entry = entry.expect("couldn't walk dir");
        let rel = entry.path().strip_prefix(from).unwrap();
        let other = to.join(rel);

        let want = entry.path().symlink_metadata().unwrap();
        let got = other
            .symlink_metadata()
            .unwrap_or_else(|_| panic!("{} is missing", other.display()));

        let want_type = want.file_type();
        let got_type = got.file_type();
        assert_eq!(
            want_type,
            got_type,
            "entry type differs for {}",
            rel.display()
        );

        if !check_attributes {
            continue;
        }

        if want_type.is_file() {
            assert_eq!(
                fs::read(entry.path()).unwrap(),
                fs::read(&other).unwrap(),
                "contents differ for {}",
                rel.display()
            );
        } else if want_type.is_symlink() {
            assert_eq!(
                fs::read_link(entry.path()).unwrap(),
                fs::read_link(&other).unwrap(),
                "symlink target differs for {}",
                rel.display()
            );
        }

        if !want_type.is_symlink() {
            assert_eq!(
                want.mode() & 0o7777,
                got.mode() & 0o7777,
                "mode differs for {}",
                rel.display()
            );
        }
        assert_eq!(
            want.mtime(),
            got.mtime(),
            "mtime differs for {}",
            rel.display()
        );
    }
}
