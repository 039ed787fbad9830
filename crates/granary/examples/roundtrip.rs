//! Writes a batch of records, then reads them back three ways.
//!
//! # Usage
//!
//! ```bash
//! # Write 1000 records into a throwaway directory
//! cargo run --example roundtrip
//!
//! # Keep the dataset around and write more on the next run
//! cargo run --example roundtrip -- --path /tmp/granary-demo --records 500
//! ```

use std::process;

use granary::{Dataset, DatasetConfig, DatasetError, Mode, Whence};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

struct DemoConfig {
    path: Option<String>,
    records: u64,
}

fn parse_args() -> DemoConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = DemoConfig {
        path: None,
        records: 1000,
    };
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--path" => {
                i += 1;
                if i < args.len() {
                    config.path = Some(args[i].clone());
                }
            }
            "--records" => {
                i += 1;
                if i < args.len() {
                    config.records = args[i].parse().unwrap_or(1000);
                }
            }
            other => {
                eprintln!("Unknown argument: {other}");
                eprintln!("Usage: roundtrip [--path DIR] [--records N]");
                process::exit(1);
            }
        }
        i += 1;
    }
    config
}

fn run(config: &DemoConfig, root: &std::path::Path) -> Result<(), DatasetError> {
    let geometry = DatasetConfig::new().with_trunk_size(1 << 16);
    let mut dataset = Dataset::open_with(root, Mode::Write, geometry)?;
    let first = dataset.size();

    for i in 0..config.records {
        let line = format!("record {} of this run", first + i);
        dataset.write(line.as_bytes())?;
    }
    dataset.flush()?;
    info!(written = config.records, total = dataset.size(), "flushed");

    // Sequential scan from the start.
    dataset.seek(Whence::Start(0))?;
    let mut bytes = 0u64;
    while dataset.tell() < dataset.size() {
        bytes += dataset.read()?.len() as u64;
    }
    info!(records = dataset.size(), bytes, "scanned");

    // Tail the last three records.
    dataset.seek(Whence::End(3))?;
    while dataset.tell() < dataset.size() {
        let index = dataset.tell();
        let record = dataset.read()?;
        info!(index, text = %String::from_utf8_lossy(&record), "tail");
    }

    // One positioned read through the middle.
    let middle = dataset.size() / 2;
    let record = dataset.pread(middle)?;
    info!(index = middle, len = record.len(), "pread");
    drop(record);

    dataset.close()
}

fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".parse().expect("valid filter")))
        .with(fmt::layer())
        .init();

    let config = parse_args();
    let result = match &config.path {
        Some(path) => run(&config, std::path::Path::new(path)),
        None => {
            let dir = tempfile::tempdir().expect("create temp dir");
            run(&config, dir.path())
        }
    };
    if let Err(err) = result {
        eprintln!("roundtrip failed: {err}");
        process::exit(1);
    }
}
