use std::fs;

use anyhow::{Context, Result, ensure};
use camino::Utf8PathBuf;
use clap::Parser;
use tracing::*;

use crate::file_util::nice_size;
use crate::plan;
use crate::walk;
use crate::writer;

/// Pack a directory tree into a manifest plus payload sidecars.
#[derive(Debug, Parser)]
pub struct Args {
    /// Path to source tree
    in_dir: Utf8PathBuf,

    /// Output directory
    out_dir: Utf8PathBuf,

    /// Textfile with metadata
    meta_file: Utf8PathBuf,

    /// Maximum total size for embedded blobs (in KiB)
    blob_upper_kb: u32,

    /// Maximum size for files to be packed (in KiB)
    pack_upper_kb: u32,

    /// Average target size of pack files (in KiB)
    avg_pack_kb: u32,
}

pub fn run(args: Args) -> Result<()> {
    ensure!(
        args.avg_pack_kb >= args.pack_upper_kb,
        "Average pack size ({}) is smaller than upper pack limit ({})",
        args.avg_pack_kb,
        args.pack_upper_kb
    );

    info!(
        "Configuration:\n\
         \x20  Input directory:   {}\n\
         \x20  Output directory:  {}\n\
         \x20  Metadata file:     {}\n\
         \x20  Total blob size:   {} KiB\n\
         \x20  Max pack size:     {} KiB\n\
         \x20  Average pack size: {} KiB",
        args.in_dir,
        args.out_dir,
        args.meta_file,
        args.blob_upper_kb,
        args.pack_upper_kb,
        args.avg_pack_kb
    );

    // The metadata blob is the file's contents, NUL-terminated.
    let mut metadata = fs::read(&args.meta_file)
        .with_context(|| format!("Couldn't read {}", args.meta_file))?;
    info!("Read metadata: {} bytes", metadata.len());
    metadata.push(0);

    fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("Couldn't create {}", args.out_dir))?;

    // 1. List all files, plus their hash and zsize.
    let mut files = walk::walk_tree(
        &args.in_dir,
        &walk::WalkOptions {
            compute_hashes: true,
            ignore_unsupported: false,
        },
    )?;
    ensure!(!files.is_empty(), "Nothing to pack in {}", args.in_dir);
    info!("{} entries to consider", files.len());

    // 2. Mark duplicate contents and hardlinks.
    plan::mark_duplicates(&mut files);

    // 3. Find the embed cutoff that fills (but doesn't bust) the budget.
    let blob_cutoff = plan::find_cutoff(&files, args.blob_upper_kb as u64 * 1024)?;
    info!(
        "Will include files < {} KiB ({} bytes)",
        blob_cutoff / 1024,
        blob_cutoff
    );

    // 4. Sort payloads into the three storage tiers.
    let buckets = plan::bucketize(&files, blob_cutoff, args.pack_upper_kb * 1024);
    info!(
        "Stats: {} included, {} packed, {} unpacked",
        buckets.included.len(),
        buckets.packed.len(),
        buckets.unpacked.len()
    );

    // 5. Bin-pack the middle tier.
    let mut packs = plan::assign_packs(&buckets.packed, args.avg_pack_kb * 1024);
    info!("Need {} packs a {} KiB", packs.len(), args.avg_pack_kb);

    // 6. Write the payload sidecars, then the manifest that indexes them.
    writer::write_blob_sidecars(&buckets.unpacked, &args.out_dir)?;
    for pack in &mut packs {
        writer::write_pack(pack, &args.out_dir, &metadata)?;
    }
    writer::write_manifest(
        &args.out_dir,
        &metadata,
        &args.in_dir,
        &files,
        &packs,
        &buckets.included,
    )?;

    let payload_total: u64 = buckets
        .included
        .iter()
        .chain(&buckets.packed)
        .chain(&buckets.unpacked)
        .map(|e| e.min_size() as u64)
        .sum();
    info!(
        "Packed {} of payload into {}/manifest.sfmf",
        nice_size(payload_total),
        args.out_dir
    );
    Ok(())
}
