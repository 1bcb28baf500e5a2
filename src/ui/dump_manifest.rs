use anyhow::Result;
use camino::Utf8PathBuf;
use clap::Parser;

use crate::manifest::Manifest;

/// Print a manifest's header, indices, and entry table.
#[derive(Debug, Parser)]
pub struct Args {
    /// Manifest file to inspect
    manifest: Utf8PathBuf,
}

pub fn run(args: Args) -> Result<()> {
    let (manifest, _fh) = Manifest::from_file(&args.manifest)?;

    println!(
        "File header:\n\
         \x20 Version: {}\n\
         \x20 Metadata size: {} bytes\n\
         \x20 Filename table size: {} bytes\n\
         \x20 Entries: {}\n\
         \x20 Packs: {}\n\
         \x20 Blobs: {}\n",
        crate::manifest::CURRENT_VERSION,
        manifest.header.metadata_size,
        manifest.header.filename_table_size,
        manifest.header.entries_length,
        manifest.header.packs_length,
        manifest.header.blobs_length
    );

    println!("==== Metadata ====");
    println!(
        "{}",
        String::from_utf8_lossy(&manifest.metadata).trim_end_matches('\0')
    );
    println!("==== Metadata ====\n");

    println!("==== Entries ====");
    for entry in &manifest.entries {
        let hash = if entry.hash.size > 0 {
            entry.hash.to_string()
        } else {
            "-".to_owned()
        };
        println!(
            "[{}] {:06o} {:5}:{:5} ({}) {} ({} bytes / {} zbytes)",
            entry.kind.as_char(),
            entry.mode,
            entry.uid,
            entry.gid,
            hash,
            manifest.entry_path(entry)?,
            entry.hash.size,
            entry.zsize
        );
    }
    println!("==== Entries ====\n");

    println!("==== Pack entries ====");
    for (i, pack) in manifest.packs.iter().enumerate() {
        println!(
            "Pack {i} ({}), {} bytes: {} entries @ offset {}",
            pack.hash, pack.hash.size, pack.count, pack.offset
        );
        for hash in &manifest.pack_hashes[i] {
            println!("  {hash} ({} bytes)", hash.size);
        }
    }
    println!("==== Pack entries ====\n");

    println!("==== Blob entries ====");
    for (i, blob) in manifest.blobs.iter().enumerate() {
        println!(
            "Blob {i} ({}): {} bytes @ offset {} (flags {:#x})",
            blob.hash, blob.size, blob.offset, blob.flags
        );
    }
    println!("==== Blob entries ====");
    Ok(())
}
