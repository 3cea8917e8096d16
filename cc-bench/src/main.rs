use std::panic;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::info;

use cc_bench::config::{Protocol, RunConfig};
use cc_bench::{scheduler, trace};

#[derive(Debug, Parser)]
#[command(author, version, about = "Concurrency-control protocol benchmark driver")]
struct Args {
    /// Configuration file path (JSON), layered under built-in defaults.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Which CC protocol to run.
    #[arg(long, value_enum)]
    protocol: Option<ProtocolArg>,

    /// Worker thread count.
    #[arg(short = 'w', long)]
    workers: Option<u32>,

    /// Run duration in seconds.
    #[arg(short = 'd', long)]
    duration_secs: Option<u64>,

    /// Number of distinct logical keys in the benchmark table.
    #[arg(long)]
    key_space: Option<u64>,

    /// Directory backing the ring-allocator data files.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum ProtocolArg {
    Tpl,
    OccNuma,
    Romulus,
    Courier,
    CourierSave,
}

impl From<ProtocolArg> for Protocol {
    fn from(value: ProtocolArg) -> Self {
        match value {
            ProtocolArg::Tpl => Protocol::Tpl,
            ProtocolArg::OccNuma => Protocol::OccNuma,
            ProtocolArg::Romulus => Protocol::Romulus,
            ProtocolArg::Courier => Protocol::Courier,
            ProtocolArg::CourierSave => Protocol::CourierSave,
        }
    }
}

fn main() -> Result<()> {
    setup_panic_hooks();

    let args = Args::parse();
    let mut cfg = RunConfig::load(args.config.as_deref())?;
    if let Some(protocol) = args.protocol {
        cfg.protocol = protocol.into();
    }
    if let Some(workers) = args.workers {
        cfg.workers = workers;
    }
    if let Some(duration_secs) = args.duration_secs {
        cfg.duration_secs = duration_secs;
    }
    if let Some(key_space) = args.key_space {
        cfg.key_space = key_space;
    }
    if !args.log_level.is_empty() {
        cfg.log_level = args.log_level.clone();
    }

    let _guards = trace::init_logging(&cfg.log_dir, &cfg.log_level)?;
    info!("cc-bench starting: {:?}", cfg);

    let data_dir = args.data_dir.unwrap_or_else(|| std::env::temp_dir().join("cc-bench"));
    info!("ring allocator data directory: {}", data_dir.display());

    let summary = scheduler::run(&cfg, &data_dir)?;
    summary.report();

    Ok(())
}

fn setup_panic_hooks() {
    let meta = human_panic::Metadata {
        version: env!("CARGO_PKG_VERSION").into(),
        name: env!("CARGO_PKG_NAME").into(),
        authors: env!("CARGO_PKG_AUTHORS").replace(':', ", ").into(),
        homepage: env!("CARGO_PKG_HOMEPAGE").into(),
    };

    let default_hook = panic::take_hook();
    if std::env::var("RUST_BACKTRACE").is_err() {
        panic::set_hook(Box::new(move |info| {
            default_hook(info);
            let file_path = human_panic::handle_dump(&meta, info);
            human_panic::print_msg(file_path, &meta).expect("human-panic: failed to print error message");
        }));
    }
}
