//! Tree walking - enumerate a source directory into typed entries with
//! stat info, content hashes, and compressed sizes.

use std::io;
use std::os::unix::fs::{FileTypeExt, MetadataExt};

use anyhow::{Context, Result, bail, ensure};
use camino::{Utf8Path, Utf8PathBuf};
use tracing::*;

use crate::hashing::{ContentHash, HashKind};
use crate::manifest::FileKind;
use crate::stream;

/// One enumerated filesystem entry, before classification.
///
/// `duplicate` and `hardlink_index` start cleared; the dedup pass fills
/// them in later.
#[derive(Debug, Clone)]
pub struct SourceEntry {
    /// Where the entry lives on disk (not its name in the manifest).
    pub path: Utf8PathBuf,
    pub kind: FileKind,
    /// Permission bits only; the kind carries the type.
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub mtime: i64,
    pub size: u64,
    pub rdev: u64,
    pub ino: u64,
    pub hash: ContentHash,
    /// Deflated size, 0 if never measured.
    pub zsize: u32,
    pub duplicate: bool,
    pub hardlink_index: Option<usize>,
}

impl SourceEntry {
    /// The smaller of the entry's stored forms: its compressed size if
    /// compressing actually helped, its plain size otherwise.
    pub fn min_size(&self) -> u32 {
        let size = self.size as u32;
        if self.zsize > 0 && self.zsize < size {
            self.zsize
        } else {
            size
        }
    }

    /// Whether this entry's payload would be stored deflated.
    pub fn is_compressed(&self) -> bool {
        self.zsize > 0 && self.zsize < self.size as u32
    }
}

#[derive(Debug, Default, Clone)]
pub struct WalkOptions {
    /// Hash regular files during the walk. When off, they're marked
    /// [`HashKind::Lazy`] and hashed on demand (donor scanning does this -
    /// most donors are never even size-matched).
    pub compute_hashes: bool,
    /// Skip file types the format can't represent instead of failing.
    /// Donor scanning sets this; the packer doesn't.
    pub ignore_unsupported: bool,
}

/// Enumerates `root` and everything under it in pre-order,
/// sorting each directory's children for a deterministic walk.
pub fn walk_tree(root: &Utf8Path, opts: &WalkOptions) -> Result<Vec<SourceEntry>> {
    let mut list = Vec::new();
    extend_tree(&mut list, root, opts)?;
    Ok(list)
}

/// Appends another tree to an existing enumeration
/// (the unpacker lists all donor directories into one list).
pub fn extend_tree(
    list: &mut Vec<SourceEntry>,
    root: &Utf8Path,
    opts: &WalkOptions,
) -> Result<()> {
    let is_dir = append_entry(list, root, opts)?;
    if !is_dir {
        return Ok(());
    }

    let mut children = root
        .read_dir_utf8()
        .with_context(|| format!("Couldn't list {root}"))?
        .map(|entry| entry.map(|e| e.into_path()))
        .collect::<io::Result<Vec<Utf8PathBuf>>>()
        .with_context(|| format!("Failed iterating {root}"))?;
    children.sort();

    for child in children {
        extend_tree(list, &child, opts)?;
    }
    Ok(())
}

/// Stats and classifies one path, returning whether it's a directory
/// (i.e. whether the caller should recurse).
fn append_entry(list: &mut Vec<SourceEntry>, path: &Utf8Path, opts: &WalkOptions) -> Result<bool> {
    let meta = path
        .symlink_metadata()
        .with_context(|| format!("Couldn't stat {path}"))?;
    let file_type = meta.file_type();

    let kind = if file_type.is_symlink() {
        FileKind::Symlink
    } else if file_type.is_dir() {
        FileKind::Directory
    } else if file_type.is_file() {
        FileKind::Regular
    } else if file_type.is_char_device() {
        FileKind::CharDevice
    } else if file_type.is_block_device() {
        FileKind::BlockDevice
    } else if file_type.is_fifo() {
        FileKind::Fifo
    } else if file_type.is_socket() {
        warn!("socket {path} (ignoring)");
        return Ok(false);
    } else if opts.ignore_unsupported {
        warn!("Unsupported type for {path}");
        return Ok(false);
    } else {
        bail!("Unsupported type for {path}");
    };

    let mut entry = SourceEntry {
        path: path.to_owned(),
        kind,
        mode: meta.mode() & 0o7777,
        uid: meta.uid(),
        gid: meta.gid(),
        mtime: meta.mtime(),
        size: meta.size(),
        rdev: meta.rdev(),
        ino: meta.ino(),
        hash: ContentHash::default(),
        zsize: 0,
        duplicate: false,
        hardlink_index: None,
    };

    match kind {
        FileKind::Regular if entry.size > 0 => {
            if opts.compute_hashes {
                ensure!(
                    entry.size <= u32::MAX as u64,
                    "{path} is too large for the format"
                );
                let (hash, zsize) = stream::hash_and_zsize(path)?;
                entry.hash = hash;
                entry.zsize = zsize;
            } else {
                entry.hash = ContentHash::lazy(entry.size as u32);
            }
        }
        FileKind::Symlink => {
            // Symlink targets are hashed up front either way;
            // they're a single readlink(), not a file read.
            let target = path
                .read_link_utf8()
                .with_context(|| format!("Couldn't read symlink {path}"))?;
            entry.hash = ContentHash::of_bytes(target.as_str().as_bytes());
            entry.zsize = 0;
        }
        _ => (),
    }

    list.push(entry);
    Ok(kind == FileKind::Directory)
}

/// Fills in a lazily-deferred hash (and compressed size) for a donor file.
pub fn compute_hash(entry: &mut SourceEntry) -> Result<()> {
    debug_assert!(entry.hash.kind == HashKind::Lazy);
    let (hash, zsize) = stream::hash_and_zsize(&entry.path)?;
    entry.hash = hash;
    entry.zsize = zsize;
    Ok(())
}
