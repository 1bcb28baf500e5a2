mod common;

use std::fs;
use std::os::unix::fs::{PermissionsExt, symlink};
use std::path::Path;

use anyhow::Result;
use nix::sys::stat::{Mode, lutimes};
use nix::sys::time::TimeVal;

use common::*;

fn set_old_mtime(path: &Path, mtime: i64) {
    let tv = TimeVal::new(mtime, 0);
    lutimes(path, &tv, &tv).expect("couldn't set mtime");
}

/// The smallest interesting snapshot: a directory with one 5-byte file.
/// Everything lands embedded in the manifest; no sidecars at all.
#[test]
fn minimal_tree() -> Result<()> {
    let scratch = tempfile::tempdir()?;
    let src = scratch.path().join("src");
    fs::create_dir(&src)?;
    fs::write(src.join("hello"), b"hello")?;

    let repo = scratch.path().join("repo");
    run_pack(&src, &repo, (64, 4, 16));

    assert!(repo.join("manifest.sfmf").is_file());
    assert!(files_with_extension(&repo, "pack").is_empty());
    assert!(files_with_extension(&repo, "blob").is_empty());

    let out = scratch.path().join("out");
    run_unpack(&repo.join("manifest.sfmf"), &out, &[]).success();
    assert_trees_match(&src, &out);
    Ok(())
}

/// A tree exercising every unprivileged entry kind, with stale mtimes so
/// the deferred directory timestamps actually have something to preserve.
#[test]
fn rich_tree() -> Result<()> {
    let scratch = tempfile::tempdir()?;
    let src = scratch.path().join("src");
    fs::create_dir(&src)?;

    fs::write(src.join("empty"), b"")?;
    fs::write(src.join("hello"), b"hello there, snapshot")?;
    symlink("hello", src.join("link"))?;
    symlink("nowhere", src.join("dangling"))?;
    nix::unistd::mkfifo(&src.join("pipe"), Mode::from_bits_truncate(0o644))?;

    fs::write(src.join("exec"), b"#!/bin/sh\nexit 0\n")?;
    fs::set_permissions(src.join("exec"), fs::Permissions::from_mode(0o755))?;

    fs::create_dir_all(src.join("sub/nested"))?;
    fs::write(src.join("sub/data"), b"all work and no play ".repeat(200))?;
    fs::write(src.join("sub/nested/deep"), b"down here")?;

    // Backdate things (directories last - creating children above already
    // touched them once).
    set_old_mtime(&src.join("hello"), 1_000_000_000);
    set_old_mtime(&src.join("link"), 1_000_000_100);
    set_old_mtime(&src.join("sub/nested"), 1_000_000_200);
    set_old_mtime(&src.join("sub"), 1_000_000_300);
    set_old_mtime(&src, 1_000_000_400);

    let repo = scratch.path().join("repo");
    run_pack(&src, &repo, (64, 4, 16));

    let out = scratch.path().join("out");
    run_unpack(&repo.join("manifest.sfmf"), &out, &[]).success();
    assert_trees_match(&src, &out);
    Ok(())
}

/// Byte-identical artifacts from two packs of the same tree.
#[test]
fn packing_is_deterministic() -> Result<()> {
    let scratch = tempfile::tempdir()?;
    let src = scratch.path().join("src");
    fs::create_dir_all(src.join("d"))?;
    fs::write(src.join("a"), b"some file contents here")?;
    fs::write(src.join("d/b"), b"other contents ".repeat(100))?;
    // Incompressible and over the budget, so at least one pack exists.
    fs::write(src.join("big"), noise(3000, 7))?;

    let first = scratch.path().join("first");
    let second = scratch.path().join("second");
    run_pack(&src, &first, (1, 4, 16));
    run_pack(&src, &second, (1, 4, 16));

    assert_eq!(
        fs::read(first.join("manifest.sfmf"))?,
        fs::read(second.join("manifest.sfmf"))?
    );

    let first_packs = files_with_extension(&first, "pack");
    let second_packs = files_with_extension(&second, "pack");
    assert!(!first_packs.is_empty());
    assert_eq!(
        first_packs
            .iter()
            .map(|p| p.file_name().unwrap().to_owned())
            .collect::<Vec<_>>(),
        second_packs
            .iter()
            .map(|p| p.file_name().unwrap().to_owned())
            .collect::<Vec<_>>()
    );
    for (a, b) in first_packs.iter().zip(&second_packs) {
        assert_eq!(fs::read(a)?, fs::read(b)?);
    }
    Ok(())
}

/// dump-manifest and dump-pack can read back what pack wrote.
#[test]
fn dump_smoke() -> Result<()> {
    let scratch = tempfile::tempdir()?;
    let src = scratch.path().join("src");
    fs::create_dir(&src)?;
    fs::write(src.join("tiny"), b"tiny")?;
    // Big enough to stay out of the manifest, small enough to get packed.
    fs::write(src.join("packable"), noise(3000, 42))?;

    let repo = scratch.path().join("repo");
    run_pack(&src, &repo, (1, 64, 64));

    sfmf()
        .arg("dump-manifest")
        .arg(repo.join("manifest.sfmf"))
        .assert()
        .success()
        .stdout(predicates::str::contains("/tiny"))
        .stdout(predicates::str::contains("==== Entries ===="));

    let packs = files_with_extension(&repo, "pack");
    assert_eq!(packs.len(), 1);
    sfmf()
        .arg("dump-pack")
        .arg(&packs[0])
        .assert()
        .success()
        .stdout(predicates::str::contains("Packed items: 1"));
    Ok(())
}
