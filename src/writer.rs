//! Emits the snapshot artifacts: standalone blob sidecars, pack files,
//! and finally the manifest that ties them together.

use std::fs::{self, File};
use std::io::BufWriter;
use std::io::prelude::*;

use anyhow::{Context, Result, ensure};
use camino::Utf8Path;
use tracing::*;

use crate::cleanup::Guard;
use crate::hashing::{HASH_WIRE_SIZE, HashKind};
use crate::manifest::{
    BLOB_FLAG_ZCOMPRESSED, BLOB_ENTRY_SIZE, BlobEntry, FILE_ENTRY_SIZE, FileEntry, FileKind,
    HEADER_SIZE, Header, PACK_ENTRY_SIZE, PackEntry,
};
use crate::packfile;
use crate::plan::PackBin;
use crate::stream::{self, Transform};
use crate::walk::SourceEntry;

fn payload_transform(entry: &SourceEntry) -> Transform {
    if entry.is_compressed() {
        Transform::Compress
    } else {
        Transform::Copy
    }
}

fn payload_flags(entry: &SourceEntry) -> u32 {
    if entry.is_compressed() {
        BLOB_FLAG_ZCOMPRESSED
    } else {
        0
    }
}

/// Streams one entry's payload into `w`, checking that it produces exactly
/// the number of bytes we measured during enumeration.
fn write_payload<W: Write>(entry: &SourceEntry, w: &mut W) -> Result<()> {
    let fh = File::open(&entry.path).with_context(|| format!("Couldn't open {}", entry.path))?;
    let written = stream::transfer(fh, w, payload_transform(entry))?;
    ensure!(
        written == entry.min_size() as u64,
        "{} changed while packing (expected {} payload bytes, wrote {written})",
        entry.path,
        entry.min_size()
    );
    Ok(())
}

/// Writes each oversized file as its own `<hex-hash>.blob` sidecar.
pub fn write_blob_sidecars(unpacked: &[SourceEntry], out_dir: &Utf8Path) -> Result<()> {
    for entry in unpacked {
        let dest = out_dir.join(format!("{}.blob", entry.hash));
        debug!("Writing full blob for {} to {dest}", entry.path);

        let mut fh = BufWriter::new(
            File::create(&dest).with_context(|| format!("Couldn't create {dest}"))?,
        );
        write_payload(entry, &mut fh)?;
        fh.flush()?;
    }
    Ok(())
}

/// Writes one pack file and fills in the bin's `packfile_hash`.
///
/// The pack is assembled as `pack.tmp` and only renamed to its final
/// `<hex-hash>.pack` name once it's complete and hashed, so a partial file
/// can never be mistaken for a finished pack.
pub fn write_pack(bin: &mut PackBin, out_dir: &Utf8Path, metadata: &[u8]) -> Result<()> {
    let header = packfile::Header {
        metadata_size: metadata.len() as u32,
        blobs_length: bin.files.len() as u32,
    };
    info!("Putting {} files into this pack", header.blobs_length);

    let tmp = out_dir.join("pack.tmp");
    let mut tmp_guard = Guard::new(|| {
        let _ = fs::remove_file(out_dir.join("pack.tmp"));
    });

    let mut fh =
        BufWriter::new(File::create(&tmp).with_context(|| format!("Couldn't create {tmp}"))?);
    header.write_to(&mut fh)?;
    fh.write_all(metadata)?;

    // The index gives absolute offsets, so payloads start right after it.
    let mut blob_offset =
        packfile::HEADER_SIZE + header.metadata_size + header.blobs_length * BLOB_ENTRY_SIZE;
    for entry in &bin.files {
        assert_eq!(entry.kind, FileKind::Regular);
        let size = entry.min_size();
        BlobEntry {
            hash: entry.hash,
            flags: payload_flags(entry),
            offset: blob_offset,
            size,
        }
        .write_to(&mut fh)?;
        blob_offset += size;
    }

    for entry in &bin.files {
        debug!(
            "Packing file {} (zcompress={})",
            entry.path,
            entry.is_compressed()
        );
        write_payload(entry, &mut fh)?;
    }

    let fh = fh.into_inner().context("Couldn't flush pack.tmp")?;
    fh.sync_all()?;
    drop(fh);

    // The finished pack is content-addressed by its own bytes; hash it and
    // give it its real name. The hash's size field is the download size.
    bin.packfile_hash = stream::hash_file(&tmp, Transform::Copy)?;

    let dest = out_dir.join(format!("{}.pack", bin.packfile_hash));
    info!("Renaming: {tmp} -> {dest}");
    fs::rename(&tmp, &dest).with_context(|| format!("Couldn't rename {tmp} to {dest}"))?;
    tmp_guard.disarm();
    Ok(())
}

/// The name an entry is stored under: its path relative to the source
/// root, with a leading slash. The root itself is stored as `"/"`.
fn stored_name(root: &Utf8Path, path: &Utf8Path) -> Result<String> {
    if path == root {
        return Ok("/".to_owned());
    }
    let rel = path
        .strip_prefix(root)
        .with_context(|| format!("{path} isn't under {root}"))?;
    Ok(format!("/{rel}"))
}

/// Writes the manifest: header, metadata, filename table, the three entry
/// arrays, each pack's content-hash run, and the embedded blob payloads.
pub fn write_manifest(
    out_dir: &Utf8Path,
    metadata: &[u8],
    source_root: &Utf8Path,
    files: &[SourceEntry],
    packs: &[PackBin],
    included: &[SourceEntry],
) -> Result<()> {
    debug!("writing manifest with {} entries", files.len());
    debug!("will attach {} entries to manifest directly", included.len());

    let names = files
        .iter()
        .map(|entry| stored_name(source_root, &entry.path))
        .collect::<Result<Vec<_>>>()?;
    let filename_table_size: u32 = names.iter().map(|name| name.len() as u32 + 1).sum();

    let header = Header {
        metadata_size: metadata.len() as u32,
        filename_table_size,
        entries_length: files.len() as u32,
        packs_length: packs.len() as u32,
        blobs_length: included.len() as u32,
    };

    let dest = out_dir.join("manifest.sfmf");
    let mut fh =
        BufWriter::new(File::create(&dest).with_context(|| format!("Couldn't create {dest}"))?);

    header.write_to(&mut fh)?;
    fh.write_all(metadata)?;

    for name in &names {
        fh.write_all(name.as_bytes())?;
        fh.write_all(&[0])?;
    }

    let mut filename_offset = 0u32;
    for (entry, name) in files.iter().zip(&names) {
        debug_assert!(entry.hash.kind != HashKind::Lazy);
        let is_hardlink = entry.duplicate && entry.hardlink_index.is_some();

        let kind = match entry.kind {
            FileKind::Regular if is_hardlink => FileKind::Hardlink,
            k => k,
        };
        let dev = if is_hardlink {
            // The dev slot holds the index of the entry we link to.
            entry.hardlink_index.unwrap() as u32
        } else {
            match entry.kind {
                FileKind::CharDevice | FileKind::BlockDevice => entry.rdev as u32,
                _ => 0,
            }
        };

        FileEntry {
            kind,
            mode: entry.mode,
            uid: entry.uid,
            gid: entry.gid,
            mtime: entry.mtime as u64,
            dev,
            zsize: entry.zsize,
            hash: entry.hash,
            filename_offset,
        }
        .write_to(&mut fh)?;
        filename_offset += name.len() as u32 + 1;
    }

    // Everything past the fixed-width arrays: pack hash runs, then blobs.
    let mut offset = HEADER_SIZE
        + header.metadata_size
        + header.filename_table_size
        + header.entries_length * FILE_ENTRY_SIZE
        + header.packs_length * PACK_ENTRY_SIZE
        + header.blobs_length * BLOB_ENTRY_SIZE;

    for bin in packs {
        PackEntry {
            hash: bin.packfile_hash,
            offset,
            count: bin.files.len() as u32,
        }
        .write_to(&mut fh)?;
        offset += bin.files.len() as u32 * HASH_WIRE_SIZE as u32;
    }

    for entry in included {
        let size = entry.min_size();
        BlobEntry {
            hash: entry.hash,
            flags: payload_flags(entry),
            offset,
            size,
        }
        .write_to(&mut fh)?;
        offset += size;
    }

    for bin in packs {
        for entry in &bin.files {
            entry.hash.write_to(&mut fh)?;
        }
    }

    for entry in included {
        if entry.kind == FileKind::Symlink {
            // Symlink targets are embedded as-is; there's no sense
            // deflating a path string.
            let target = entry
                .path
                .read_link_utf8()
                .with_context(|| format!("Couldn't read symlink {}", entry.path))?;
            debug!("Writing symlink: '{target}'");
            fh.write_all(target.as_str().as_bytes())?;
        } else {
            assert_eq!(entry.kind, FileKind::Regular);
            write_payload(entry, &mut fh)?;
        }
    }

    fh.flush().with_context(|| format!("Couldn't write {dest}"))?;
    Ok(())
}
