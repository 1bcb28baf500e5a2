mod common;

use std::fs;

use anyhow::Result;
use predicates::prelude::*;

use common::*;

/// Offline unpack succeeds when a donor tree holds the payload the
/// missing sidecar would have provided - found by size, then by a lazily
/// computed hash.
#[test]
fn donors_substitute_for_downloads() -> Result<()> {
    let scratch = tempfile::tempdir()?;
    let src = scratch.path().join("src");
    fs::create_dir(&src)?;
    let big = noise(50 * 1024, 5);
    fs::write(src.join("big"), &big)?;
    fs::write(src.join("small"), b"small fry")?;

    let repo = scratch.path().join("repo");
    run_pack(&src, &repo, (8, 4, 16));

    // Remove the standalone sidecar; downloads can't save us now.
    let blobs = files_with_extension(&repo, "blob");
    assert_eq!(blobs.len(), 1);
    fs::remove_file(&blobs[0])?;

    // Same bytes, different name, plus decoys of other sizes.
    let donor = scratch.path().join("donor");
    fs::create_dir(&donor)?;
    fs::write(donor.join("renamed-payload"), &big)?;
    fs::write(donor.join("wrong-size"), noise(10 * 1024, 6))?;
    fs::write(donor.join("also-wrong"), b"nope")?;

    let out = scratch.path().join("out");
    run_unpack(
        &repo.join("manifest.sfmf"),
        &out,
        &["--offline", donor.to_str().unwrap()],
    )
    .success();
    assert_trees_match(&src, &out);
    Ok(())
}

/// Without the donor, the same offline unpack has nowhere to turn.
#[test]
fn offline_without_donors_fails() -> Result<()> {
    let scratch = tempfile::tempdir()?;
    let src = scratch.path().join("src");
    fs::create_dir(&src)?;
    fs::write(src.join("big"), noise(50 * 1024, 5))?;

    let repo = scratch.path().join("repo");
    run_pack(&src, &repo, (8, 4, 16));
    let blobs = files_with_extension(&repo, "blob");
    fs::remove_file(&blobs[0])?;

    let out = scratch.path().join("out");
    run_unpack(&repo.join("manifest.sfmf"), &out, &["--offline"])
        .failure()
        .stderr(predicate::str::contains("offline"));
    Ok(())
}

/// A persistent cache seeded by a download-only run makes a later offline
/// unpack work with no donors at all.
#[test]
fn download_only_seeds_a_reusable_cache() -> Result<()> {
    let scratch = tempfile::tempdir()?;
    let src = scratch.path().join("src");
    fs::create_dir(&src)?;
    fs::write(src.join("big"), noise(50 * 1024, 9))?;
    fs::write(src.join("small"), b"also here")?;

    let repo = scratch.path().join("repo");
    run_pack(&src, &repo, (8, 4, 16));

    let cache = scratch.path().join("cache");
    let cache_arg = format!("--cache={}", cache.display());
    let out = scratch.path().join("out");

    run_unpack(&repo.join("manifest.sfmf"), &out, &["--download", &cache_arg]).success();
    // Download-only wrote nothing to the output tree.
    assert!(!out.exists());
    // But the sidecar is cached now.
    assert_eq!(files_with_extension(&cache, "blob").len(), 1);

    // Pull the rug: no repo sidecars, offline, cache only.
    for blob in files_with_extension(&repo, "blob") {
        fs::remove_file(blob)?;
    }
    run_unpack(
        &repo.join("manifest.sfmf"),
        &out,
        &["--offline", &cache_arg],
    )
    .success();
    assert_trees_match(&src, &out);
    Ok(())
}
