//! Content hashes - a SHA-1 digest plus the uncompressed payload size.

use std::fmt;
use std::io;
use std::io::prelude::*;

use anyhow::{Result, bail, ensure};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use data_encoding::HEXLOWER;
use sha1::{Digest, Sha1};

/// Digest length of the only hash the format speaks.
pub const DIGEST_SIZE: usize = 20;

/// Serialized size of a [`ContentHash`]: size + hashtype + digest.
pub const HASH_WIRE_SIZE: usize = 4 + 4 + DIGEST_SIZE;

/// How (or whether) a [`ContentHash`]'s digest was produced.
///
/// `Lazy` is a runtime-only marker for donor files whose size we know from
/// `stat()` but whose digest we haven't computed yet. It is never written
/// to disk.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum HashKind {
    /// No digest - empty files and entries without payloads.
    Unknown,
    Sha1,
    Lazy,
}

impl HashKind {
    fn from_wire(raw: u32) -> Result<Self> {
        match raw {
            0 => Ok(HashKind::Unknown),
            1 => Ok(HashKind::Sha1),
            t => bail!("Unsupported hash type {t}"),
        }
    }

    fn to_wire(self) -> u32 {
        match self {
            HashKind::Unknown => 0,
            HashKind::Sha1 => 1,
            HashKind::Lazy => 2,
        }
    }
}

/// The size and SHA-1 digest of one payload's uncompressed bytes.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ContentHash {
    /// Uncompressed size in bytes (not the digest size!)
    pub size: u32,
    pub kind: HashKind,
    pub digest: [u8; DIGEST_SIZE],
}

impl Default for ContentHash {
    fn default() -> Self {
        Self {
            size: 0,
            kind: HashKind::Unknown,
            digest: [0; DIGEST_SIZE],
        }
    }
}

impl ContentHash {
    /// Hashes the given bytes in one go.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self {
            size: bytes.len() as u32,
            kind: HashKind::Sha1,
            digest: Sha1::digest(bytes).into(),
        }
    }

    /// A size-only hash for a file we haven't read yet.
    pub fn lazy(size: u32) -> Self {
        Self {
            size,
            kind: HashKind::Lazy,
            digest: [0; DIGEST_SIZE],
        }
    }

    /// Content equality: both hashes must actually be SHA-1 digests,
    /// and both size and digest bytes must match.
    pub fn matches(&self, other: &ContentHash) -> bool {
        self.kind == HashKind::Sha1
            && other.kind == HashKind::Sha1
            && self.size == other.size
            && self.digest == other.digest
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        // Lazy hashes are an in-memory marker only.
        debug_assert!(self.kind != HashKind::Lazy);
        w.write_u32::<BigEndian>(self.size)?;
        w.write_u32::<BigEndian>(self.kind.to_wire())?;
        w.write_all(&self.digest)
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let size = r.read_u32::<BigEndian>()?;
        let kind = HashKind::from_wire(r.read_u32::<BigEndian>()?)?;
        let mut digest = [0u8; DIGEST_SIZE];
        r.read_exact(&mut digest)?;
        Ok(Self { size, kind, digest })
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", HEXLOWER.encode(&self.digest))
    }
}

impl std::str::FromStr for ContentHash {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = HEXLOWER.decode(s.as_bytes())?;
        ensure!(bytes.len() == DIGEST_SIZE, "Expected a hex SHA-1 digest");
        let mut digest = [0u8; DIGEST_SIZE];
        digest.copy_from_slice(&bytes);
        Ok(Self {
            size: 0,
            kind: HashKind::Sha1,
            digest,
        })
    }
}

/// Wraps a reader, hashing and counting everything read through it.
pub struct HashingReader<R> {
    inner: R,
    hasher: Sha1,
    count: u64,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha1::new(),
            count: 0,
        }
    }

    pub fn finalize(self) -> (ContentHash, R) {
        let hash = ContentHash {
            size: self.count as u32,
            kind: HashKind::Sha1,
            digest: self.hasher.finalize().into(),
        };
        (hash, self.inner)
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = self.inner.read(buf)?;
        self.hasher.update(&buf[..count]);
        self.count += count as u64;
        Ok(count)
    }
}

/// Wraps a writer, hashing and counting everything written through it.
pub struct HashingWriter<W> {
    inner: W,
    hasher: Sha1,
    count: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha1::new(),
            count: 0,
        }
    }

    pub fn finalize(self) -> (ContentHash, W) {
        let hash = ContentHash {
            size: self.count as u32,
            kind: HashKind::Sha1,
            digest: self.hasher.finalize().into(),
        };
        (hash, self.inner)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let count = self.inner.write(buf)?;
        self.hasher.update(&buf[..count]);
        self.count += count as u64;
        Ok(count)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
