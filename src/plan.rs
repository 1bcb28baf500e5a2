//! Classification: duplicate and hardlink detection, the adaptive blob
//! cutoff search, bucket assignment, and first-fit bin packing.

use anyhow::{Result, ensure};
use tracing::*;

use crate::hashing::ContentHash;
use crate::manifest::FileKind;
use crate::walk::SourceEntry;

fn has_payload(entry: &SourceEntry) -> bool {
    entry.size > 0 && matches!(entry.kind, FileKind::Regular | FileKind::Symlink)
}

/// Marks later entries whose contents match an earlier one, and records
/// hardlink back-references for entries sharing an inode.
///
/// Already-marked duplicates are *not* skipped: a file may deduplicate
/// against one entry by contents and still hardlink a different, later
/// entry by inode, so every pair has to be seen. The back-reference
/// itself always names the first entry of the inode, which is the one
/// materialized as a real file.
pub fn mark_duplicates(files: &mut [SourceEntry]) {
    let mut savings: u64 = 0;

    for i in 0..files.len() {
        if !has_payload(&files[i]) {
            continue;
        }
        let (head, tail) = files.split_at_mut(i + 1);
        let a = &head[i];

        for b in tail.iter_mut() {
            if !has_payload(b) {
                continue;
            }
            if !a.hash.matches(&b.hash) {
                continue;
            }

            if !b.duplicate {
                info!("Marking as dup: {} ({} bytes)", b.path, b.min_size());
                savings += b.size;
                b.duplicate = true;
            }

            if a.ino == b.ino && b.hardlink_index.is_none() {
                info!("Found hard link: {} <-> {} (storing reference)", a.path, b.path);
                // Only regular files can share an inode here. The recorded
                // index is the first entry of the inode, which is always
                // smaller than ours and never itself a hardlink, so at
                // extraction time the source file already exists.
                assert_eq!(b.kind, FileKind::Regular);
                b.hardlink_index = Some(i);
            }
        }
    }

    info!("Savings of dup elimination: {savings} bytes");
}

/// Sum of stored sizes if everything smaller than `cutoff` were embedded.
fn included_sum(files: &[SourceEntry], cutoff: u32) -> u64 {
    let mut sum: u64 = 0;
    for entry in files {
        let size = entry.size as u32;
        if entry.zsize > 0 && entry.zsize < size && entry.zsize < cutoff {
            sum += entry.zsize as u64;
        } else if size < cutoff {
            sum += size as u64;
        }
    }
    sum
}

/// Bisects for the largest cutoff whose embedded-blob total still fits in
/// `blob_budget_bytes`.
///
/// The sum is monotone in the cutoff, so a dozen-odd halvings of the search
/// width pin it down; the loop ends once the width reaches 1.
pub fn find_cutoff(files: &[SourceEntry], blob_budget_bytes: u64) -> Result<u32> {
    let mut min_size = u32::MAX;
    let mut max_size = 0u32;
    for entry in files {
        min_size = min_size.min(entry.min_size());
        max_size = max_size.max(entry.size as u32).max(entry.zsize);
    }

    ensure!(
        min_size < max_size,
        "Can't search for a blob cutoff in [{min_size}, {max_size}]"
    );

    let mut center = ((min_size as u64 + max_size as u64) / 2) as u32;
    let mut width = (max_size - min_size) / 2;
    // Best fit is the largest center that stayed under budget.
    let mut best_fit = 0u32;

    while width > 1 {
        let sum = included_sum(files, center);
        trace!("for cutoff {center} bytes got size: {sum} bytes (want {blob_budget_bytes} bytes)");

        width /= 2;
        if sum > blob_budget_bytes {
            center -= width;
        } else if sum < blob_budget_bytes {
            best_fit = best_fit.max(center);
            center += width;
        }
    }

    Ok(best_fit)
}

/// Where each payload-bearing entry ends up.
#[derive(Debug, Default)]
pub struct Buckets {
    /// Embedded in the manifest itself (everything small, plus all symlinks).
    pub included: Vec<SourceEntry>,
    /// Bundled into pack files.
    pub packed: Vec<SourceEntry>,
    /// Served as standalone blob sidecars.
    pub unpacked: Vec<SourceEntry>,
}

/// Sorts non-duplicate payload entries into the three storage tiers.
///
/// Duplicates contribute nothing; their bytes come from the canonical
/// entry's placement.
pub fn bucketize(files: &[SourceEntry], blob_cutoff: u32, mut pack_upper: u32) -> Buckets {
    if pack_upper <= blob_cutoff {
        pack_upper = blob_cutoff + 1;
        info!(
            "Correcting pack upper bytes limit to {} KiB (blob cutoff size is {} KiB)",
            pack_upper / 1024,
            blob_cutoff / 1024
        );
    }

    info!("Bucketizing file list...");

    let mut buckets = Buckets::default();
    for entry in files {
        let size = entry.min_size();

        if entry.duplicate || size == 0 {
            continue;
        }
        if !matches!(entry.kind, FileKind::Regular | FileKind::Symlink) {
            continue;
        }

        if entry.kind == FileKind::Symlink || size < blob_cutoff {
            // Small enough to embed directly
            // (symlink targets are always embedded).
            buckets.included.push(entry.clone());
        } else if size < pack_upper {
            buckets.packed.push(entry.clone());
        } else {
            buckets.unpacked.push(entry.clone());
        }
    }
    buckets
}

/// One pack in the making: the files assigned to it and their summed
/// stored size. The hash is filled in once the pack file is written.
#[derive(Debug)]
pub struct PackBin {
    pub files: Vec<SourceEntry>,
    pub size: u32,
    pub packfile_hash: ContentHash,
}

/// First-fit bin packing in enumeration order: each entry goes into the
/// first pack with room, or opens a new one.
pub fn assign_packs(packed: &[SourceEntry], avg_pack_bytes: u32) -> Vec<PackBin> {
    let mut bins: Vec<PackBin> = Vec::new();

    for entry in packed {
        let size = entry.min_size();
        match bins
            .iter_mut()
            .find(|bin| bin.size + size <= avg_pack_bytes)
        {
            Some(bin) => {
                bin.files.push(entry.clone());
                bin.size += size;
            }
            None => bins.push(PackBin {
                files: vec![entry.clone()],
                size,
                packfile_hash: ContentHash::default(),
            }),
        }
    }

    bins
}
