use anyhow::Result;
use clap::Parser;
use tracing_subscriber::filter::LevelFilter;

use sfmf::ui;

#[derive(Debug, Parser)]
#[clap(version, about = "Pack and unpack content-addressed tree snapshots")]
struct Args {
    /// Verbosity (-v, -vv, -vvv, etc.)
    #[clap(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[clap(subcommand)]
    subcommand: Subcommand,
}

#[derive(Debug, clap::Subcommand)]
enum Subcommand {
    Pack(ui::pack::Args),
    Unpack(ui::unpack::Args),
    DumpManifest(ui::dump_manifest::Args),
    DumpPack(ui::dump_pack::Args),
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(args.verbose);

    match args.subcommand {
        Subcommand::Pack(p) => ui::pack::run(p),
        Subcommand::Unpack(u) => ui::unpack::run(u),
        Subcommand::DumpManifest(d) => ui::dump_manifest::run(d),
        Subcommand::DumpPack(d) => ui::dump_pack::run(d),
    }
}

/// Send tracing messages to stderr, keeping stdout for the dump commands.
fn init_logger(verbosity: u8) {
    let level = match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}
