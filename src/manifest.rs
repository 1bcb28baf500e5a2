//! The manifest container (`.sfmf`): one file describing a whole tree,
//! with small payloads embedded after the indices.
//!
//! All integers are big-endian and every struct is 4-byte aligned.
//! Layout, in file order:
//!
//! - header
//! - metadata (NUL-terminated textual blob)
//! - filename table (concatenated NUL-terminated paths)
//! - file entries
//! - pack entries
//! - blob entries
//! - per-pack content hash runs
//! - embedded blob payloads

use std::fs::File;
use std::io::prelude::*;
use std::io::SeekFrom;

use anyhow::{Context, Result, bail, ensure};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use camino::Utf8Path;

use crate::hashing::{ContentHash, HASH_WIRE_SIZE};

/// `"SFMF"`
pub const MAGIC: u32 = 0x5346_4d46;

pub const CURRENT_VERSION: u32 = 1;

pub const HEADER_SIZE: u32 = 28;
pub const FILE_ENTRY_SIZE: u32 = 64;
pub const PACK_ENTRY_SIZE: u32 = 36;
pub const BLOB_ENTRY_SIZE: u32 = 40;

/// Blob payload bytes are deflated.
pub const BLOB_FLAG_ZCOMPRESSED: u32 = 1 << 0;

/// What kind of filesystem entry a [`FileEntry`] describes.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FileKind {
    Directory,
    Regular,
    Symlink,
    CharDevice,
    Fifo,
    Hardlink,
    BlockDevice,
}

impl FileKind {
    pub fn from_wire(raw: u32) -> Result<Self> {
        Ok(match raw {
            1 => FileKind::Directory,
            2 => FileKind::Regular,
            3 => FileKind::Symlink,
            4 => FileKind::CharDevice,
            5 => FileKind::Fifo,
            6 => FileKind::Hardlink,
            7 => FileKind::BlockDevice,
            t => bail!("Unknown file entry type {t}"),
        })
    }

    pub fn to_wire(self) -> u32 {
        match self {
            FileKind::Directory => 1,
            FileKind::Regular => 2,
            FileKind::Symlink => 3,
            FileKind::CharDevice => 4,
            FileKind::Fifo => 5,
            FileKind::Hardlink => 6,
            FileKind::BlockDevice => 7,
        }
    }

    /// `ls`-style type character, for listings.
    pub fn as_char(self) -> char {
        match self {
            FileKind::Directory => 'd',
            FileKind::Regular => 'f',
            FileKind::Symlink => 's',
            FileKind::CharDevice => 'c',
            FileKind::Fifo => 'p',
            FileKind::Hardlink => 'h',
            FileKind::BlockDevice => 'b',
        }
    }
}

/// Counts and sizes of everything that follows the manifest header.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct Header {
    pub metadata_size: u32,
    pub filename_table_size: u32,
    pub entries_length: u32,
    pub packs_length: u32,
    pub blobs_length: u32,
}

impl Header {
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_u32::<BigEndian>(MAGIC)?;
        w.write_u32::<BigEndian>(CURRENT_VERSION)?;
        w.write_u32::<BigEndian>(self.metadata_size)?;
        w.write_u32::<BigEndian>(self.filename_table_size)?;
        w.write_u32::<BigEndian>(self.entries_length)?;
        w.write_u32::<BigEndian>(self.packs_length)?;
        w.write_u32::<BigEndian>(self.blobs_length)?;
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let magic = r.read_u32::<BigEndian>()?;
        ensure!(magic == MAGIC, "Wrong magic bytes for manifest ({magic:#010x})");
        let version = r.read_u32::<BigEndian>()?;
        ensure!(
            version == CURRENT_VERSION,
            "Unsupported manifest version {version} (expected {CURRENT_VERSION})"
        );
        Ok(Self {
            metadata_size: r.read_u32::<BigEndian>()?,
            filename_table_size: r.read_u32::<BigEndian>()?,
            entries_length: r.read_u32::<BigEndian>()?,
            packs_length: r.read_u32::<BigEndian>()?,
            blobs_length: r.read_u32::<BigEndian>()?,
        })
    }
}

/// One filesystem entry.
///
/// `dev` is overloaded: for char/block devices it's the host's rdev value,
/// for hardlinks it's the index of the earlier entry sharing the inode,
/// and it's zero for everything else.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FileEntry {
    pub kind: FileKind,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub mtime: u64,
    pub dev: u32,
    pub zsize: u32,
    pub hash: ContentHash,
    pub filename_offset: u32,
}

impl FileEntry {
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_u32::<BigEndian>(self.kind.to_wire())?;
        w.write_u32::<BigEndian>(self.mode)?;
        w.write_u32::<BigEndian>(self.uid)?;
        w.write_u32::<BigEndian>(self.gid)?;
        w.write_u64::<BigEndian>(self.mtime)?;
        w.write_u32::<BigEndian>(self.dev)?;
        w.write_u32::<BigEndian>(self.zsize)?;
        self.hash.write_to(w)?;
        w.write_u32::<BigEndian>(self.filename_offset)?;
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        Ok(Self {
            kind: FileKind::from_wire(r.read_u32::<BigEndian>()?)?,
            mode: r.read_u32::<BigEndian>()?,
            uid: r.read_u32::<BigEndian>()?,
            gid: r.read_u32::<BigEndian>()?,
            mtime: r.read_u64::<BigEndian>()?,
            dev: r.read_u32::<BigEndian>()?,
            zsize: r.read_u32::<BigEndian>()?,
            hash: ContentHash::read_from(r)?,
            filename_offset: r.read_u32::<BigEndian>()?,
        })
    }
}

/// References one external pack file by the hash of its bytes.
///
/// `offset` points at this pack's run of [`ContentHash`]es inside the
/// manifest; the run lists which files live in the pack.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PackEntry {
    pub hash: ContentHash,
    pub offset: u32,
    pub count: u32,
}

impl PackEntry {
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        self.hash.write_to(w)?;
        w.write_u32::<BigEndian>(self.offset)?;
        w.write_u32::<BigEndian>(self.count)?;
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        Ok(Self {
            hash: ContentHash::read_from(r)?,
            offset: r.read_u32::<BigEndian>()?,
            count: r.read_u32::<BigEndian>()?,
        })
    }
}

/// One embedded (or packed) payload: where its bytes sit and how they're
/// stored. `offset` is an absolute file offset; `size` is the stored length.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BlobEntry {
    pub hash: ContentHash,
    pub flags: u32,
    pub offset: u32,
    pub size: u32,
}

impl BlobEntry {
    pub fn is_compressed(&self) -> bool {
        self.flags & BLOB_FLAG_ZCOMPRESSED != 0
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        self.hash.write_to(w)?;
        w.write_u32::<BigEndian>(self.flags)?;
        w.write_u32::<BigEndian>(self.offset)?;
        w.write_u32::<BigEndian>(self.size)?;
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        Ok(Self {
            hash: ContentHash::read_from(r)?,
            flags: r.read_u32::<BigEndian>()?,
            offset: r.read_u32::<BigEndian>()?,
            size: r.read_u32::<BigEndian>()?,
        })
    }
}

/// A fully-parsed manifest: everything except the embedded blob payloads,
/// which stay on disk and are read by offset when needed.
#[derive(Debug, Default)]
pub struct Manifest {
    pub header: Header,
    pub metadata: Vec<u8>,
    pub filename_table: Vec<u8>,
    pub entries: Vec<FileEntry>,
    pub packs: Vec<PackEntry>,
    pub blobs: Vec<BlobEntry>,
    /// One hash run per pack, in pack order.
    pub pack_hashes: Vec<Vec<ContentHash>>,
}

impl Manifest {
    /// Parses a manifest, leaving the file handle positioned arbitrarily.
    /// `file_len` bounds the length-consistency check.
    pub fn read<R: Read + Seek>(r: &mut R, file_len: u64) -> Result<Self> {
        let header = Header::read_from(r)?;

        // All the fixed-width regions, the hash runs, and the payloads have
        // to fit in the file. Catch truncation before we start seeking.
        let fixed = HEADER_SIZE as u64
            + header.metadata_size as u64
            + header.filename_table_size as u64
            + header.entries_length as u64 * FILE_ENTRY_SIZE as u64
            + header.packs_length as u64 * PACK_ENTRY_SIZE as u64
            + header.blobs_length as u64 * BLOB_ENTRY_SIZE as u64;
        ensure!(
            fixed <= file_len,
            "Manifest is truncated: indices need {fixed} bytes, file has {file_len}"
        );

        let mut metadata = vec![0u8; header.metadata_size as usize];
        r.read_exact(&mut metadata)?;

        let mut filename_table = vec![0u8; header.filename_table_size as usize];
        r.read_exact(&mut filename_table)?;

        let mut entries = Vec::with_capacity(header.entries_length as usize);
        for _ in 0..header.entries_length {
            entries.push(FileEntry::read_from(r)?);
        }

        let mut packs = Vec::with_capacity(header.packs_length as usize);
        for _ in 0..header.packs_length {
            packs.push(PackEntry::read_from(r)?);
        }

        let mut blobs = Vec::with_capacity(header.blobs_length as usize);
        for _ in 0..header.blobs_length {
            blobs.push(BlobEntry::read_from(r)?);
        }

        let payload = packs
            .iter()
            .map(|p| p.count as u64 * HASH_WIRE_SIZE as u64)
            .sum::<u64>()
            + blobs.iter().map(|b| b.size as u64).sum::<u64>();
        ensure!(
            fixed + payload <= file_len,
            "Manifest is truncated: payloads need {} bytes, file has {file_len}",
            fixed + payload
        );

        let mut pack_hashes = Vec::with_capacity(packs.len());
        for pack in &packs {
            r.seek(SeekFrom::Start(pack.offset as u64))?;
            let mut hashes = Vec::with_capacity(pack.count as usize);
            for _ in 0..pack.count {
                hashes.push(ContentHash::read_from(r)?);
            }
            pack_hashes.push(hashes);
        }

        Ok(Self {
            header,
            metadata,
            filename_table,
            entries,
            packs,
            blobs,
            pack_hashes,
        })
    }

    /// Opens and parses a manifest, returning the parsed view plus the open
    /// file for later payload reads.
    pub fn from_file(path: &Utf8Path) -> Result<(Self, File)> {
        let mut fh = File::open(path).with_context(|| format!("Couldn't open {path}"))?;
        let file_len = fh.metadata()?.len();
        let manifest =
            Self::read(&mut fh, file_len).with_context(|| format!("Couldn't parse {path}"))?;
        Ok((manifest, fh))
    }

    /// Looks up the NUL-terminated path starting at the given table offset.
    pub fn path_at(&self, offset: u32) -> Result<&str> {
        let table = &self.filename_table;
        let start = offset as usize;
        ensure!(start < table.len(), "Filename offset {offset} out of range");
        let end = table[start..]
            .iter()
            .position(|&b| b == 0)
            .map(|nul| start + nul)
            .context("Unterminated filename table entry")?;
        std::str::from_utf8(&table[start..end]).context("Filename table entry isn't UTF-8")
    }

    /// The stored path of the given entry.
    pub fn entry_path(&self, entry: &FileEntry) -> Result<&str> {
        self.path_at(entry.filename_offset)
    }
}
