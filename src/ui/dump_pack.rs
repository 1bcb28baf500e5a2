use std::fs::File;
use std::io::BufReader;

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::Parser;

use crate::packfile;

/// Print a pack file's header and blob index.
#[derive(Debug, Parser)]
pub struct Args {
    /// Pack file to inspect
    pack: Utf8PathBuf,
}

pub fn run(args: Args) -> Result<()> {
    let fh = File::open(&args.pack).with_context(|| format!("Couldn't open {}", args.pack))?;
    let (header, metadata, blobs) = packfile::read_index(&mut BufReader::new(fh))
        .with_context(|| format!("Couldn't parse {}", args.pack))?;

    println!(
        "File header:\n\
         \x20 Version: {}\n\
         \x20 Metadata size: {} bytes\n\
         \x20 Packed items: {}\n",
        packfile::CURRENT_VERSION,
        header.metadata_size,
        header.blobs_length
    );

    println!("==== Metadata ====");
    println!("{}", String::from_utf8_lossy(&metadata).trim_end_matches('\0'));
    println!("==== Metadata ====\n");

    for (i, blob) in blobs.iter().enumerate() {
        println!(" == Item {i} ==");
        println!("  Hash: {}", blob.hash);
        println!("  Size: {} bytes ({} uncompressed)", blob.size, blob.hash.size);
        println!("  Offset: {}", blob.offset);
        println!("  Flags: {:#x}", blob.flags);
    }
    Ok(())
}
