use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::Parser;
use console::Term;
use tracing::*;

use crate::fetch::{Cache, DirectorySupplier};
use crate::file_util::nice_size;
use crate::manifest::Manifest;
use crate::progress::{CancelFlag, Observer, Progress};
use crate::resolve::Resolver;
use crate::restore::{RestoreOptions, Restorer};
use crate::walk;

/// Fetch, verify, and unpack a manifest into a directory.
#[derive(Debug, Parser)]
pub struct Args {
    /// Show progress meter
    #[clap(short, long)]
    progress: bool,

    /// Download only, do not unpack
    #[clap(short, long)]
    download: bool,

    /// Do not try to download anything
    #[clap(short = 'D', long)]
    offline: bool,

    /// Use DIR as persistent local cache
    #[clap(short = 'C', long = "cache", name = "DIR")]
    cache: Option<Utf8PathBuf>,

    /// Manifest file to unpack
    manifest: Utf8PathBuf,

    /// Output directory
    output_dir: Utf8PathBuf,

    /// Local directories for sourcing blobs (optional)
    donors: Vec<Utf8PathBuf>,
}

pub fn run(args: Args) -> Result<()> {
    let cancel = CancelFlag::default();
    let mut progress = Progress::new(cancel.clone());
    if args.progress {
        progress.add_observer(Box::new(ConsoleObserver {
            term: Term::stderr(),
        }));
    }

    let opts = RestoreOptions {
        output_dir: args.output_dir.clone(),
        download_only: args.download,
        offline: args.offline,
    };
    let total_steps = 2 + Restorer::step_count(&opts);
    progress.set_shape(total_steps, 0);

    progress.next_step("Reading manifest file");
    let (manifest, mut manifest_fh) = Manifest::from_file(&args.manifest)?;
    info!(
        "File header:\n\
         \x20 Version: {}\n\
         \x20 Metadata size: {} bytes\n\
         \x20 Filename table size: {} bytes\n\
         \x20 Entries: {}\n\
         \x20 Packs: {}\n\
         \x20 Blobs: {}",
        crate::manifest::CURRENT_VERSION,
        manifest.header.metadata_size,
        manifest.header.filename_table_size,
        manifest.header.entries_length,
        manifest.header.packs_length,
        manifest.header.blobs_length
    );
    debug!(
        "Metadata: {}",
        String::from_utf8_lossy(&manifest.metadata).trim_end_matches('\0')
    );
    progress.set_shape(total_steps, manifest.entries.len());

    progress.next_step("Indexing local files");
    let mut donors = Vec::new();
    for dir in &args.donors {
        walk::extend_tree(
            &mut donors,
            dir,
            &walk::WalkOptions {
                compute_hashes: false,
                ignore_unsupported: true,
            },
        )
        .with_context(|| format!("Couldn't index donor directory {dir}"))?;
    }
    info!("Got local files: {}", donors.len());

    // Sidecars come from wherever the manifest itself lives.
    let base = match args.manifest.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent.to_owned(),
        _ => Utf8PathBuf::from("."),
    };
    let supplier = DirectorySupplier::new(base);
    let mut cache = match args.cache {
        Some(dir) => Cache::persistent(dir, args.offline)?,
        None => Cache::scratch(args.offline)?,
    };

    let resolver = Resolver::new(&manifest, donors);
    let mut restorer = Restorer::new(
        &manifest,
        &mut manifest_fh,
        resolver,
        &supplier,
        &mut cache,
        &mut progress,
        opts,
    );
    restorer.run()?;
    drop(restorer);

    progress.finish();

    info!("==== Download Summary ====");
    let mut total = 0u64;
    for (name, size) in cache.fetched() {
        info!(" {:>10}  {}", nice_size(*size), name);
        total += size;
    }
    info!("TOTAL DOWNLOAD: {}", nice_size(total));
    Ok(())
}

struct ConsoleObserver {
    term: Term,
}

impl Observer for ConsoleObserver {
    fn update(&mut self, label: &str, percent: f32, phase: Option<&str>) {
        let _ = self.term.clear_line();
        let line = format!("{percent:5.1}% {label}");
        // Phase changes get their own line; per-entry ticks redraw in place.
        let _ = if phase.is_some() {
            self.term.write_line(&line)
        } else {
            self.term.write_str(&line)
        };
    }
}
