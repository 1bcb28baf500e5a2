//! The materializer: walks the manifest in order and recreates the tree,
//! verifying every written file against its recorded hash.
//!
//! Ordering does all the heavy lifting here. Entries are strictly
//! sequential, so a hardlink's source always exists before the link, and
//! the [`DirStack`] can settle directory mtimes once their subtrees are
//! done.

use std::fs::{self, File};
use std::io::SeekFrom;
use std::io::prelude::*;
use std::os::unix::fs::{PermissionsExt, lchown, symlink};

use anyhow::{Context, Result, ensure};
use camino::{Utf8Path, Utf8PathBuf};
use nix::sys::stat::{Mode, SFlag, mknod};
use nix::unistd::mkfifo;
use tracing::*;

use crate::dirstack::DirStack;
use crate::fetch::{Cache, Supplier};
use crate::file_util::set_mtime;
use crate::hashing::ContentHash;
use crate::manifest::{BLOB_FLAG_ZCOMPRESSED, FileEntry, FileKind, Manifest};
use crate::packfile;
use crate::progress::Progress;
use crate::resolve::{BlobLocation, Resolver};
use crate::stream::{self, Transform};

/// The sidecar filename a pack is fetched under.
pub fn pack_name(hash: &ContentHash) -> String {
    format!("{hash}.pack")
}

/// The sidecar filename a standalone blob is fetched under.
pub fn blob_name(hash: &ContentHash) -> String {
    format!("{hash}.blob")
}

#[derive(Debug, Clone, Default)]
pub struct RestoreOptions {
    pub output_dir: Utf8PathBuf,
    /// Fetch everything into the cache, but don't write the tree.
    pub download_only: bool,
    /// Never fetch; donors and the cache have to cover everything.
    pub offline: bool,
}

pub struct Restorer<'a> {
    manifest: &'a Manifest,
    /// The open manifest file, for reading embedded blob payloads.
    reader: &'a mut File,
    resolver: Resolver<'a>,
    supplier: &'a dyn Supplier,
    cache: &'a mut Cache,
    progress: &'a mut Progress,
    opts: RestoreOptions,
    locations: Vec<BlobLocation>,
}

impl<'a> Restorer<'a> {
    pub fn new(
        manifest: &'a Manifest,
        reader: &'a mut File,
        resolver: Resolver<'a>,
        supplier: &'a dyn Supplier,
        cache: &'a mut Cache,
        progress: &'a mut Progress,
        opts: RestoreOptions,
    ) -> Self {
        Self {
            manifest,
            reader,
            resolver,
            supplier,
            cache,
            progress,
            opts,
            locations: Vec::new(),
        }
    }

    /// How many progress steps a run with these options comprises.
    pub fn step_count(opts: &RestoreOptions) -> u32 {
        let mut steps = 3;
        if opts.offline {
            steps -= 1;
        }
        if opts.download_only {
            steps -= 1;
        }
        steps
    }

    /// Runs the configured phases: classify, download, write.
    pub fn run(&mut self) -> Result<()> {
        self.classify()?;
        if !self.opts.offline {
            self.download()?;
        }
        if !self.opts.download_only {
            self.materialize()?;
        }
        Ok(())
    }

    fn target_path(&self, stored: &str) -> Utf8PathBuf {
        // Stored paths carry a leading slash ("/" is the tree root),
        // so plain concatenation lands inside the output directory.
        Utf8PathBuf::from(format!("{}{}", self.opts.output_dir, stored))
    }

    /// Resolves every entry to a payload location up front.
    fn classify(&mut self) -> Result<()> {
        self.progress.next_step("Classifying entries");
        let manifest = self.manifest;

        for (i, entry) in manifest.entries.iter().enumerate() {
            self.progress.poll()?;
            let stored = manifest.entry_path(entry)?;
            self.progress.entry(stored, i);

            if entry.kind == FileKind::Hardlink {
                // The back-reference must point at an earlier regular file.
                let source = entry.dev as usize;
                ensure!(
                    source < i,
                    "Hardlink {stored} points forward (entry {source})"
                );
                ensure!(
                    manifest.entries[source].kind == FileKind::Regular,
                    "Hardlink {stored} points at a non-file entry"
                );
            }

            let location = self.resolver.resolve(entry)?;
            self.locations.push(location);

            let info = match location {
                BlobLocation::Included(_) => "INCLUDED",
                BlobLocation::Local(_) => "FILECOPY",
                BlobLocation::Packed(_) => "DOWNPACK",
                BlobLocation::Standalone => "DOWNBLOB",
                BlobLocation::Empty => "ZEROBYTE",
                BlobLocation::Hardlink => "HARDLINK",
            };
            let hash = if entry.hash.size > 0 {
                entry.hash.to_string()
            } else {
                "-".repeat(40)
            };
            debug!(
                "[{}] {:06o} {:6}:{:6} ({:.10}, {}) ({:9} b, {:9} z) {}",
                entry.kind.as_char(),
                entry.mode,
                entry.uid,
                entry.gid,
                hash,
                info,
                entry.hash.size,
                entry.zsize,
                self.target_path(stored),
            );
        }
        Ok(())
    }

    /// Fetches every pack and standalone blob the tree will need.
    fn download(&mut self) -> Result<()> {
        self.progress.next_step("Downloading requirements");
        let manifest = self.manifest;

        for (i, entry) in manifest.entries.iter().enumerate() {
            self.progress.poll()?;
            self.progress.entry(manifest.entry_path(entry)?, i);

            if entry.kind != FileKind::Regular {
                continue;
            }
            match self.locations[i] {
                BlobLocation::Packed(pack) => {
                    let pack_hash = manifest.packs[pack].hash;
                    self.cache.ensure(
                        self.supplier,
                        &pack_name(&pack_hash),
                        &pack_hash,
                        false,
                    )?;
                }
                BlobLocation::Standalone => {
                    let compressed = entry.zsize < entry.hash.size;
                    self.cache.ensure(
                        self.supplier,
                        &blob_name(&entry.hash),
                        &entry.hash,
                        compressed,
                    )?;
                }
                _ => (),
            }
        }
        Ok(())
    }

    /// Creates the tree: every entry in manifest order, then ownership,
    /// mode, and mtime.
    fn materialize(&mut self) -> Result<()> {
        self.progress.next_step("Writing files");
        let manifest = self.manifest;
        let mut dirs = DirStack::new();

        for (i, entry) in manifest.entries.iter().enumerate() {
            self.progress.poll()?;
            let stored = manifest.entry_path(entry)?;
            self.progress.entry(stored, i);

            let target = self.target_path(stored);
            self.write_entry(entry, self.locations[i], stored, &target)?;

            // Numeric owner/group first - changing the owner afterwards
            // would strip suid/sgid bits. lchown so symlinks get their own
            // ownership rather than their target's.
            lchown(target.as_std_path(), Some(entry.uid), Some(entry.gid)).with_context(|| {
                format!(
                    "Could not change owner/group of '{target}' to {}/{}",
                    entry.uid, entry.gid
                )
            })?;

            // Permissions on symlinks aren't a thing; skip them.
            if entry.kind != FileKind::Symlink {
                fs::set_permissions(&target, fs::Permissions::from_mode(entry.mode))
                    .with_context(|| {
                        format!("Could not change permission of '{target}' to {:o}", entry.mode)
                    })?;
            }

            if entry.kind == FileKind::Directory {
                // Settled only once the subtree is complete.
                dirs.push(target, entry.mtime as i64)?;
            } else {
                set_mtime(&target, entry.mtime as i64)?;
            }
        }

        dirs.finish()
    }

    fn read_included(&mut self, blob_index: usize) -> Result<Vec<u8>> {
        let blob = &self.manifest.blobs[blob_index];
        self.reader.seek(SeekFrom::Start(blob.offset as u64))?;
        let mut data = vec![0u8; blob.size as usize];
        self.reader
            .read_exact(&mut data)
            .context("Couldn't read embedded blob from manifest")?;
        Ok(data)
    }

    fn write_entry(
        &mut self,
        entry: &FileEntry,
        location: BlobLocation,
        stored: &str,
        target: &Utf8Path,
    ) -> Result<()> {
        match entry.kind {
            FileKind::Directory => match fs::create_dir(target) {
                Ok(()) => Ok(()),
                // The output directory itself may already exist.
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && stored == "/" => Ok(()),
                Err(e) => Err(e).with_context(|| format!("Failed to create '{target}'")),
            },
            FileKind::Regular => self.write_regular(entry, location, target),
            FileKind::Symlink => {
                // The packer always embeds symlink targets, uncompressed.
                let blob_index = match location {
                    BlobLocation::Included(i) => i,
                    other => anyhow::bail!("Symlink {target} has its target in {other:?}"),
                };
                ensure!(
                    !self.manifest.blobs[blob_index].is_compressed(),
                    "Symlink target for {target} is stored compressed"
                );
                let data = self.read_included(blob_index)?;
                let link_target = std::str::from_utf8(&data)
                    .with_context(|| format!("Symlink target for {target} isn't UTF-8"))?
                    .to_owned();
                symlink(&link_target, target)
                    .with_context(|| format!("Failed to create '{target}'"))
            }
            FileKind::CharDevice | FileKind::BlockDevice => {
                let kind = if entry.kind == FileKind::CharDevice {
                    SFlag::S_IFCHR
                } else {
                    SFlag::S_IFBLK
                };
                mknod(
                    target.as_std_path(),
                    kind,
                    Mode::from_bits_truncate(entry.mode),
                    entry.dev as nix::libc::dev_t,
                )
                .with_context(|| format!("Failed to create '{target}'"))
            }
            FileKind::Fifo => mkfifo(target.as_std_path(), Mode::from_bits_truncate(0o644))
                .with_context(|| format!("Failed to create '{target}'")),
            FileKind::Hardlink => {
                let source = &self.manifest.entries[entry.dev as usize];
                let source_path = self.target_path(self.manifest.entry_path(source)?);
                fs::hard_link(&source_path, target).with_context(|| {
                    format!("Failed to create '{target}' (from '{source_path}')")
                })
            }
        }
    }

    fn write_regular(
        &mut self,
        entry: &FileEntry,
        location: BlobLocation,
        target: &Utf8Path,
    ) -> Result<()> {
        let mut out =
            File::create(target).with_context(|| format!("Failed to create '{target}'"))?;

        match location {
            BlobLocation::Empty => (),
            BlobLocation::Included(blob_index) => {
                let compressed = self.manifest.blobs[blob_index].is_compressed();
                let data = self.read_included(blob_index)?;
                let transform = if compressed {
                    Transform::Decompress
                } else {
                    Transform::Copy
                };
                stream::transfer(data.as_slice(), &mut out, transform)?;
            }
            BlobLocation::Local(donor_index) => {
                let donor = &self.resolver.donor(donor_index).path;
                debug!("Copying: {donor} -> {target}");
                let fh = File::open(donor).with_context(|| format!("Couldn't open {donor}"))?;
                stream::transfer(fh, &mut out, Transform::Copy)?;
            }
            BlobLocation::Packed(pack) => {
                let pack_hash = self.manifest.packs[pack].hash;
                let path =
                    self.cache
                        .ensure(self.supplier, &pack_name(&pack_hash), &pack_hash, false)?;
                let (data, flags) = packfile::extract_blob(&path, &entry.hash)?
                    .with_context(|| format!("Pack {pack_hash} doesn't contain {}", entry.hash))?;
                let transform = if flags & BLOB_FLAG_ZCOMPRESSED != 0 {
                    Transform::Decompress
                } else {
                    Transform::Copy
                };
                stream::transfer(data.as_slice(), &mut out, transform)?;
            }
            BlobLocation::Standalone => {
                let compressed = entry.zsize < entry.hash.size;
                let path = self.cache.ensure(
                    self.supplier,
                    &blob_name(&entry.hash),
                    &entry.hash,
                    compressed,
                )?;
                let transform = if compressed {
                    Transform::Decompress
                } else {
                    Transform::Copy
                };
                let fh = File::open(&path).with_context(|| format!("Couldn't open {path}"))?;
                stream::transfer(fh, &mut out, transform)?;
            }
            BlobLocation::Hardlink => unreachable!("hardlinks don't reach write_regular"),
        }
        drop(out);

        // Whatever the payload's route here, the bytes on disk must hash
        // to what the manifest promised.
        if location != BlobLocation::Empty {
            let written = stream::hash_file(target, Transform::Copy)?;
            ensure!(
                written.matches(&entry.hash),
                "File failed hash check: {target}, got: {written}"
            );
        }
        Ok(())
    }
}
