//! Finding each manifest entry's payload: embedded in the manifest itself,
//! in a caller-supplied donor tree, inside a referenced pack, or - failing
//! all of those - as a standalone blob download.

use anyhow::Result;
use tracing::*;

use crate::hashing::HashKind;
use crate::manifest::{FileEntry, FileKind, Manifest};
use crate::walk::{self, SourceEntry};

/// Where one entry's bytes come from.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BlobLocation {
    /// Embedded blob at this index of the manifest's blob array.
    Included(usize),
    /// A donor file at this index of the donor list.
    Local(usize),
    /// Inside the pack at this index of the manifest's pack array.
    Packed(usize),
    /// Fetchable as `<hex-hash>.blob`.
    Standalone,
    /// Zero-length file; no payload anywhere.
    Empty,
    /// The entry links to an earlier entry instead of carrying bytes.
    Hardlink,
}

/// Resolves content hashes to payload locations, first hit wins.
///
/// Owns the donor list because matching mutates it: donors are enumerated
/// with lazy hashes, and we only pay for a real hash the first time a
/// donor's size matches something we're looking for.
pub struct Resolver<'a> {
    manifest: &'a Manifest,
    donors: Vec<SourceEntry>,
}

impl<'a> Resolver<'a> {
    pub fn new(manifest: &'a Manifest, donors: Vec<SourceEntry>) -> Self {
        Self { manifest, donors }
    }

    pub fn donor(&self, index: usize) -> &SourceEntry {
        &self.donors[index]
    }

    pub fn resolve(&mut self, entry: &FileEntry) -> Result<BlobLocation> {
        // Hardlinks don't carry a payload at all, and zero-byte files
        // don't need one found.
        if entry.kind == FileKind::Hardlink {
            return Ok(BlobLocation::Hardlink);
        }
        if entry.hash.size == 0 {
            return Ok(BlobLocation::Empty);
        }

        // 1. Embedded in the manifest?
        if let Some(i) = self
            .manifest
            .blobs
            .iter()
            .position(|blob| blob.hash.matches(&entry.hash))
        {
            return Ok(BlobLocation::Included(i));
        }

        // 2. In a donor tree? Size has to match before we'll spend a read
        //    hashing anything.
        for i in 0..self.donors.len() {
            let donor = &self.donors[i];
            if donor.hash.size != entry.hash.size {
                continue;
            }
            match donor.hash.kind {
                HashKind::Lazy => {
                    debug!("Lazily calculating file hash: {}", donor.path);
                    walk::compute_hash(&mut self.donors[i])?;
                }
                HashKind::Sha1 => (),
                HashKind::Unknown => continue,
            }
            if self.donors[i].hash.matches(&entry.hash) {
                return Ok(BlobLocation::Local(i));
            }
        }

        // 3. In one of the referenced packs?
        for (i, hashes) in self.manifest.pack_hashes.iter().enumerate() {
            if hashes.iter().any(|hash| hash.matches(&entry.hash)) {
                return Ok(BlobLocation::Packed(i));
            }
        }

        // 4. Nowhere closer - it'll have to be downloaded on its own.
        Ok(BlobLocation::Standalone)
    }
}
