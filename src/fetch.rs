//! Sourcing payload sidecars: a byte-stream supplier keyed by filename,
//! and the local cache directory fetched files land in.
//!
//! The supplier is deliberately dumb - give it a sidecar name, get bytes.
//! Anything that can produce the bytes (a directory next to the manifest,
//! an HTTP client, a test fixture) can stand behind it.

use std::fs::{self, File};
use std::io::Write;

use anyhow::{Context, Result, ensure};
use camino::Utf8PathBuf;
use tracing::*;

use crate::cleanup::Guard;
use crate::hashing::ContentHash;
use crate::stream::{self, Transform};

/// Produces payload sidecars (`<hex>.pack` / `<hex>.blob`) by name.
pub trait Supplier {
    /// Streams the named sidecar into `dest`.
    fn fetch(&self, name: &str, dest: &mut dyn Write) -> Result<()>;

    /// Where the named sidecar would come from, for logging.
    fn locate(&self, name: &str) -> String;
}

/// Serves sidecars from a local directory
/// (normally the one the manifest itself lives in).
pub struct DirectorySupplier {
    base: Utf8PathBuf,
}

impl DirectorySupplier {
    pub fn new<P: Into<Utf8PathBuf>>(base: P) -> Self {
        Self { base: base.into() }
    }
}

impl Supplier for DirectorySupplier {
    fn fetch(&self, name: &str, dest: &mut dyn Write) -> Result<()> {
        let src = self.base.join(name);
        let fh = File::open(&src).with_context(|| format!("Couldn't open {src}"))?;
        stream::transfer(fh, dest, Transform::Copy)?;
        Ok(())
    }

    fn locate(&self, name: &str) -> String {
        self.base.join(name).into_string()
    }
}

/// The per-run cache of fetched sidecars.
///
/// A scratch cache lives in a temp directory and disappears with it;
/// a persistent cache (`-C`) keeps its files so later runs can reuse them
/// after re-verification.
pub struct Cache {
    dir: Utf8PathBuf,
    /// Scratch caches hold their tempdir so dropping the cache scrubs it.
    _temp: Option<tempfile::TempDir>,
    offline: bool,
    verified: Vec<String>,
    fetched: Vec<(String, u64)>,
}

impl Cache {
    pub fn persistent(dir: Utf8PathBuf, offline: bool) -> Result<Self> {
        fs::create_dir_all(&dir).with_context(|| format!("Couldn't create {dir}"))?;
        Ok(Self {
            dir,
            _temp: None,
            offline,
            verified: Vec::new(),
            fetched: Vec::new(),
        })
    }

    pub fn scratch(offline: bool) -> Result<Self> {
        let temp = tempfile::Builder::new()
            .prefix("sfmf-cache-")
            .tempdir()
            .context("Couldn't create cache directory")?;
        let dir = Utf8PathBuf::from_path_buf(temp.path().to_owned())
            .map_err(|p| anyhow::anyhow!("Cache path {} isn't UTF-8", p.display()))?;
        Ok(Self {
            dir,
            _temp: Some(temp),
            offline,
            verified: Vec::new(),
            fetched: Vec::new(),
        })
    }

    pub fn path_of(&self, name: &str) -> Utf8PathBuf {
        self.dir.join(name)
    }

    /// Makes sure the named sidecar sits verified in the cache and returns
    /// its path.
    ///
    /// A cached copy that fails verification is assumed stale and deleted,
    /// then fetched anew; a fetched copy that fails verification is deleted
    /// and the whole operation fails. Offline mode turns any needed fetch
    /// into an error.
    pub fn ensure(
        &mut self,
        supplier: &dyn Supplier,
        name: &str,
        expected: &ContentHash,
        compressed: bool,
    ) -> Result<Utf8PathBuf> {
        let dest = self.path_of(name);

        if dest.exists() {
            if self.verified.iter().any(|v| v == name) {
                // Already checked this one earlier in the run.
                return Ok(dest);
            }
            if stream::verify_file(expected, &dest, compressed) {
                self.verified.push(name.to_owned());
                return Ok(dest);
            }
            warn!("Deleting {dest}, as checksum does not match.");
            fs::remove_file(&dest).with_context(|| format!("Couldn't remove {dest}"))?;
        }

        ensure!(
            !self.offline,
            "Need to fetch {}, but offline mode was requested",
            supplier.locate(name)
        );

        info!("Fetching: {}", supplier.locate(name));

        // If the fetch dies half-way (or verification fails below), the
        // partial file must not linger to poison the next run.
        let partial = dest.clone();
        let mut partial_guard = Guard::new(move || {
            let _ = fs::remove_file(&partial);
        });

        let mut fh = File::create(&dest).with_context(|| format!("Couldn't create {dest}"))?;
        supplier
            .fetch(name, &mut fh)
            .with_context(|| format!("Couldn't fetch {name}"))?;
        fh.sync_all()?;
        drop(fh);

        ensure!(
            stream::verify_file(expected, &dest, compressed),
            "{name} failed verification after fetch (corrupt file?)"
        );
        partial_guard.disarm();

        let len = dest.metadata()?.len();
        self.fetched.push((name.to_owned(), len));
        self.verified.push(name.to_owned());
        Ok(dest)
    }

    /// What this run actually downloaded: (name, bytes) pairs.
    pub fn fetched(&self) -> &[(String, u64)] {
        &self.fetched
    }
}
