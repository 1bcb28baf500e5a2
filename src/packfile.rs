//! The pack container (`.sfpf`): many small-to-medium payloads bundled
//! into one download.
//!
//! Layout, in file order: header, metadata, blob index, concatenated
//! payloads. Same conventions as the manifest - big-endian, 4-byte aligned.

use std::fs::File;
use std::io::prelude::*;
use std::io::{BufReader, SeekFrom};

use anyhow::{Context, Result, ensure};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use camino::Utf8Path;

use crate::hashing::ContentHash;
use crate::manifest::BlobEntry;

/// `"SFPF"`
pub const MAGIC: u32 = 0x5346_5046;

pub const CURRENT_VERSION: u32 = 1;

pub const HEADER_SIZE: u32 = 16;

#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct Header {
    pub metadata_size: u32,
    pub blobs_length: u32,
}

impl Header {
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_u32::<BigEndian>(MAGIC)?;
        w.write_u32::<BigEndian>(CURRENT_VERSION)?;
        w.write_u32::<BigEndian>(self.metadata_size)?;
        w.write_u32::<BigEndian>(self.blobs_length)?;
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let magic = r.read_u32::<BigEndian>()?;
        ensure!(magic == MAGIC, "Wrong magic bytes for pack ({magic:#010x})");
        let version = r.read_u32::<BigEndian>()?;
        ensure!(
            version == CURRENT_VERSION,
            "Unsupported pack version {version} (expected {CURRENT_VERSION})"
        );
        Ok(Self {
            metadata_size: r.read_u32::<BigEndian>()?,
            blobs_length: r.read_u32::<BigEndian>()?,
        })
    }
}

/// Reads everything up front of the payloads: header, metadata, blob index.
pub fn read_index<R: Read>(r: &mut R) -> Result<(Header, Vec<u8>, Vec<BlobEntry>)> {
    let header = Header::read_from(r)?;

    let mut metadata = vec![0u8; header.metadata_size as usize];
    r.read_exact(&mut metadata)?;

    let mut blobs = Vec::with_capacity(header.blobs_length as usize);
    for _ in 0..header.blobs_length {
        blobs.push(BlobEntry::read_from(r)?);
    }

    Ok((header, metadata, blobs))
}

/// Pulls a single payload out of a pack file by content hash.
///
/// Returns the stored bytes and the blob's flags (which say whether those
/// bytes are deflated), or `None` if the pack doesn't contain the hash.
pub fn extract_blob(path: &Utf8Path, hash: &ContentHash) -> Result<Option<(Vec<u8>, u32)>> {
    let fh = File::open(path).with_context(|| format!("Couldn't open {path}"))?;
    let mut r = BufReader::new(fh);
    let (_header, _metadata, blobs) =
        read_index(&mut r).with_context(|| format!("Couldn't parse {path}"))?;

    for entry in &blobs {
        if entry.hash.matches(hash) {
            r.seek(SeekFrom::Start(entry.offset as u64))?;
            let mut data = vec![0u8; entry.size as usize];
            r.read_exact(&mut data)
                .with_context(|| format!("Couldn't read blob {hash} from {path}"))?;
            return Ok(Some((data, entry.flags)));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod test {
    use super::*;

    use std::io::Write as _;

    use crate::manifest::BLOB_FLAG_ZCOMPRESSED;

    #[test]
    fn header_round_trip() -> Result<()> {
        let header = Header {
            metadata_size: 9,
            blobs_length: 2,
        };
        let mut buf = Vec::new();
        header.write_to(&mut buf)?;
        assert_eq!(buf.len(), HEADER_SIZE as usize);
        assert_eq!(&buf[0..4], b"SFPF");
        assert_eq!(Header::read_from(&mut buf.as_slice())?, header);
        Ok(())
    }

    #[test]
    fn extracts_payloads_by_hash() -> Result<()> {
        let first = b"first payload".to_vec();
        let second = b"second, slightly longer payload".to_vec();

        let metadata = b"test pack\0";
        let header = Header {
            metadata_size: metadata.len() as u32,
            blobs_length: 2,
        };

        let index_end =
            HEADER_SIZE + header.metadata_size + 2 * crate::manifest::BLOB_ENTRY_SIZE;
        let entries = [
            BlobEntry {
                hash: ContentHash::of_bytes(&first),
                flags: 0,
                offset: index_end,
                size: first.len() as u32,
            },
            BlobEntry {
                hash: ContentHash::of_bytes(&second),
                flags: 0,
                offset: index_end + first.len() as u32,
                size: second.len() as u32,
            },
        ];

        let mut buf = Vec::new();
        header.write_to(&mut buf)?;
        buf.write_all(metadata)?;
        for entry in &entries {
            entry.write_to(&mut buf)?;
        }
        buf.write_all(&first)?;
        buf.write_all(&second)?;

        let dir = tempfile::tempdir()?;
        let path = dir.path().join("test.pack");
        std::fs::write(&path, &buf)?;
        let path = Utf8Path::from_path(&path).unwrap();

        let (data, flags) = extract_blob(path, &entries[1].hash)?.unwrap();
        assert_eq!(data, second);
        assert_eq!(flags & BLOB_FLAG_ZCOMPRESSED, 0);

        let (data, _) = extract_blob(path, &entries[0].hash)?.unwrap();
        assert_eq!(data, first);

        assert!(extract_blob(path, &ContentHash::of_bytes(b"absent"))?.is_none());
        Ok(())
    }
}
