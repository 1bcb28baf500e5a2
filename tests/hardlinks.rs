mod common;

use std::fs;
use std::os::unix::fs::MetadataExt;

use anyhow::Result;

use common::*;

/// Two names for one inode come back as two names for one inode.
#[test]
fn hardlinks_share_an_inode() -> Result<()> {
    let scratch = tempfile::tempdir()?;
    let src = scratch.path().join("src");
    fs::create_dir(&src)?;
    fs::write(src.join("a.txt"), noise(10 * 1024, 1))?;
    fs::hard_link(src.join("a.txt"), src.join("b.txt"))?;

    let repo = scratch.path().join("repo");
    run_pack(&src, &repo, (64, 64, 64));

    let out = scratch.path().join("out");
    run_unpack(&repo.join("manifest.sfmf"), &out, &[]).success();
    assert_trees_match(&src, &out);

    let a = out.join("a.txt").metadata()?;
    let b = out.join("b.txt").metadata()?;
    assert_eq!(a.ino(), b.ino());
    assert_eq!(a.nlink(), 2);
    Ok(())
}

/// Three hardlinked names collapse to one stored payload and relink on the
/// way out, even though the middle name is itself a duplicate.
#[test]
fn hardlink_chains_relink() -> Result<()> {
    let scratch = tempfile::tempdir()?;
    let src = scratch.path().join("src");
    fs::create_dir(&src)?;
    fs::write(src.join("first"), noise(4096, 2))?;
    fs::hard_link(src.join("first"), src.join("second"))?;
    fs::hard_link(src.join("first"), src.join("third"))?;

    let repo = scratch.path().join("repo");
    run_pack(&src, &repo, (64, 64, 64));

    let out = scratch.path().join("out");
    run_unpack(&repo.join("manifest.sfmf"), &out, &[]).success();

    let first = out.join("first").metadata()?;
    assert_eq!(first.nlink(), 3);
    assert_eq!(out.join("second").metadata()?.ino(), first.ino());
    assert_eq!(out.join("third").metadata()?.ino(), first.ino());
    Ok(())
}

/// Identical contents in distinct inodes: stored once, restored as two
/// separate files.
#[test]
fn duplicate_contents_stay_separate_files() -> Result<()> {
    let scratch = tempfile::tempdir()?;
    let src = scratch.path().join("src");
    fs::create_dir(&src)?;
    let contents = noise(2048, 3);
    fs::write(src.join("one"), &contents)?;
    fs::write(src.join("two"), &contents)?;

    let repo = scratch.path().join("repo");
    run_pack(&src, &repo, (64, 64, 64));

    let out = scratch.path().join("out");
    run_unpack(&repo.join("manifest.sfmf"), &out, &[]).success();
    assert_trees_match(&src, &out);

    let one = out.join("one").metadata()?;
    let two = out.join("two").metadata()?;
    assert_ne!(one.ino(), two.ino());
    assert_eq!(one.nlink(), 1);
    assert_eq!(fs::read(out.join("one"))?, fs::read(out.join("two"))?);
    Ok(())
}
