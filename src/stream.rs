//! Byte pipelines: fixed-size block transfers with optional zlib transforms
//! and a tee that taps the uncompressed stream.
//!
//! This is how we get a file's SHA-1 *and* its compressed size in a single
//! pass, with no temporary file: the file feeds a [`TeeReader`] whose tap
//! hashes the plain bytes, while the deflate transform downstream feeds a
//! counting sink.

use std::fs::File;
use std::io;
use std::io::prelude::*;

use anyhow::{Context, Result};
use camino::Utf8Path;
use flate2::Compression;
use flate2::read::{ZlibDecoder, ZlibEncoder};
use tracing::*;

use crate::hashing::{ContentHash, HashingReader, HashingWriter};

/// Transfers move this many bytes at a time.
pub const BUFFER_SIZE: usize = 64 * 1024;

/// What happens to bytes on their way from source to sink.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Transform {
    Copy,
    Compress,
    Decompress,
}

/// Block-copies everything from `r` to `w`, returning the bytes written.
fn pipe<R: Read + ?Sized, W: Write + ?Sized>(r: &mut R, w: &mut W) -> io::Result<u64> {
    let mut buf = [0u8; BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let len = r.read(&mut buf)?;
        if len == 0 {
            return Ok(total);
        }
        w.write_all(&buf[..len])?;
        total += len as u64;
    }
}

/// Runs the source through the given transform into the sink,
/// returning the number of bytes the sink saw.
///
/// Short reads are fine; the zlib transforms flush their trailing output
/// before EOF is reported. A malformed compressed stream is a hard error.
pub fn transfer<R: Read, W: Write + ?Sized>(
    mut r: R,
    w: &mut W,
    transform: Transform,
) -> Result<u64> {
    let written = match transform {
        Transform::Copy => pipe(&mut r, w)?,
        Transform::Compress => pipe(&mut ZlibEncoder::new(r, Compression::default()), w)?,
        Transform::Decompress => pipe(&mut ZlibDecoder::new(r), w)
            .context("Decompression of zlib stream failed")?,
    };
    Ok(written)
}

/// Fans one source out to two consumers: whoever reads this also feeds
/// every byte to the tap. The tap must not fall behind - it's a writer,
/// so it can't.
pub struct TeeReader<R, W> {
    inner: R,
    tap: W,
}

impl<R: Read, W: Write> TeeReader<R, W> {
    pub fn new(inner: R, tap: W) -> Self {
        Self { inner, tap }
    }

    pub fn into_tap(self) -> W {
        self.tap
    }
}

impl<R: Read, W: Write> Read for TeeReader<R, W> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = self.inner.read(buf)?;
        self.tap.write_all(&buf[..count])?;
        Ok(count)
    }
}

/// One pass over a file: the SHA-1 of its bytes and the length those bytes
/// deflate to.
pub fn hash_and_zsize(path: &Utf8Path) -> Result<(ContentHash, u32)> {
    let fh = File::open(path).with_context(|| format!("Couldn't open {path}"))?;
    let mut tee = TeeReader::new(fh, HashingWriter::new(io::sink()));
    let zsize = transfer(&mut tee, &mut io::sink(), Transform::Compress)?;
    let zsize =
        u32::try_from(zsize).with_context(|| format!("{path} is too large for the format"))?;
    let (hash, _) = tee.into_tap().finalize();
    Ok((hash, zsize))
}

/// Hashes a file's contents, optionally inflating them first.
///
/// The returned hash's size is the number of (uncompressed) bytes hashed.
pub fn hash_file(path: &Utf8Path, transform: Transform) -> Result<ContentHash> {
    let fh = File::open(path).with_context(|| format!("Couldn't open {path}"))?;
    let hash = match transform {
        Transform::Copy => {
            let mut r = HashingReader::new(fh);
            pipe(&mut r, &mut io::sink())?;
            r.finalize().0
        }
        Transform::Decompress => {
            let mut r = HashingReader::new(ZlibDecoder::new(fh));
            pipe(&mut r, &mut io::sink())
                .with_context(|| format!("Decompression of {path} failed"))?;
            r.finalize().0
        }
        Transform::Compress => {
            let mut r = HashingReader::new(ZlibEncoder::new(fh, Compression::default()));
            pipe(&mut r, &mut io::sink())?;
            r.finalize().0
        }
    };
    Ok(hash)
}

/// Checks a file on disk against an expected hash,
/// inflating it first if it's stored compressed.
///
/// An unreadable or malformed file counts as a mismatch - callers use this
/// to decide whether a cached payload is stale, and a payload that doesn't
/// even inflate is certainly that.
pub fn verify_file(expected: &ContentHash, path: &Utf8Path, compressed: bool) -> bool {
    let transform = if compressed {
        Transform::Decompress
    } else {
        Transform::Copy
    };
    debug!("Checking file hash of {path} (expecting {expected})");
    match hash_file(path, transform) {
        Ok(got) if got.matches(expected) => {
            debug!("File passed hash check: {path}");
            true
        }
        Ok(got) => {
            warn!("File failed hash check: {path}, got: {got}");
            false
        }
        Err(err) => {
            warn!("Couldn't hash {path}: {err:#}");
            false
        }
    }
}
