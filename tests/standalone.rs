mod common;

use std::fs;

use anyhow::Result;
use predicates::prelude::*;

use common::*;

/// A file over the pack ceiling becomes its own `<hash>.blob` sidecar and
/// is referenced by neither the embedded-blob index nor any pack.
#[test]
fn large_files_go_standalone() -> Result<()> {
    let scratch = tempfile::tempdir()?;
    let src = scratch.path().join("src");
    fs::create_dir(&src)?;
    fs::write(src.join("tiny"), b"tiny")?;
    // Incompressible, so its stored form can't duck under the ceiling.
    let big = noise(50 * 1024, 4);
    fs::write(src.join("big"), &big)?;

    let repo = scratch.path().join("repo");
    // Pack ceiling of 4 KiB: "big" must be served standalone.
    run_pack(&src, &repo, (8, 4, 16));

    let blobs = files_with_extension(&repo, "blob");
    assert_eq!(blobs.len(), 1);
    // Compression didn't help, so the sidecar is the file verbatim.
    assert_eq!(fs::read(&blobs[0])?, big);
    assert!(files_with_extension(&repo, "pack").is_empty());

    // The manifest indexes it nowhere; the unpacker falls back to the
    // sidecar download by naming convention alone.
    sfmf()
        .arg("dump-manifest")
        .arg(repo.join("manifest.sfmf"))
        .assert()
        .success()
        .stdout(predicate::str::contains("Packs: 0"))
        .stdout(predicate::str::contains("Blobs: 1"));

    let out = scratch.path().join("out");
    run_unpack(&repo.join("manifest.sfmf"), &out, &[]).success();
    assert_trees_match(&src, &out);
    Ok(())
}
