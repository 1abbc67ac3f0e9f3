// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tfr_loader_core::yielder::ParsedRandomizedYielder;
use tfr_loader_core::{
    DataType, FixedLenFeature, FileByteSource, RecordReader, TensorBuffer, TensorShape,
    WorkerPool,
};
use tracing::info;

/// tfr-cli – inspect and decode TFR-framed record files.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Increase verbosity (-v: info, -vv: debug, -vvv: trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Report entry count, data size and total size for one or more files.
    Inspect {
        /// TFR files to scan.
        files: Vec<std::path::PathBuf>,
    },
    /// Print each record's length as it's read, stopping at the first
    /// corrupted frame.
    Dump {
        file: std::path::PathBuf,
        /// Stop after this many records (default: all).
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Shuffle-read and decode fixed-length int64/float features, printing
    /// the shape of each resulting batch.
    Decode {
        files: Vec<std::path::PathBuf>,
        #[arg(long, default_value_t = 1)]
        seed: u64,
        #[arg(long, default_value_t = 0)]
        epoch: u64,
        #[arg(long, default_value_t = 1024)]
        shuffle_buffer: usize,
        #[arg(long, default_value_t = 32)]
        batch_size: usize,
        /// Feature spec as `name:dtype:dim,dim,...` (dtype is int64 or
        /// float), repeatable.
        #[arg(long = "feature")]
        features: Vec<String>,
        /// Decode batches using the worker pool instead of serially.
        #[arg(long)]
        parallel: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(format!("tfr_loader_core={level},tfr_cli={level}"))
        .init();

    info!("tfr-cli v{} starting", env!("CARGO_PKG_VERSION"));

    match args.command {
        Commands::Inspect { files } => inspect(&files),
        Commands::Dump { file, limit } => dump(&file, limit),
        Commands::Decode {
            files,
            seed,
            epoch,
            shuffle_buffer,
            batch_size,
            features,
            parallel,
        } => decode(files, seed, epoch, shuffle_buffer, batch_size, &features, parallel),
    }
}

fn inspect(files: &[std::path::PathBuf]) -> Result<()> {
    for path in files {
        let source = FileByteSource::open(path)
            .with_context(|| format!("opening {}", path.display()))?;
        let mut reader = RecordReader::new(source);
        let meta = reader
            .get_metadata()
            .with_context(|| format!("scanning {}", path.display()))?;
        println!(
            "{}: entries={} data_size={} file_size={}",
            path.display(),
            meta.entries,
            meta.data_size,
            meta.file_size
        );
    }
    Ok(())
}

fn dump(path: &std::path::PathBuf, limit: Option<usize>) -> Result<()> {
    let source =
        FileByteSource::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut reader = RecordReader::new(source);
    let mut count = 0usize;
    while limit.map_or(true, |l| count < l) {
        match reader.next().with_context(|| format!("reading record {count}"))? {
            Some(record) => {
                println!("record {count}: {} bytes", record.len());
                count += 1;
            }
            None => break,
        }
    }
    println!("{count} records read");
    Ok(())
}

fn parse_feature_spec(spec: &str) -> Result<FixedLenFeature> {
    let mut parts = spec.splitn(3, ':');
    let name = parts
        .next()
        .with_context(|| format!("feature spec '{spec}' is missing a name"))?;
    let dtype = parts
        .next()
        .with_context(|| format!("feature spec '{spec}' is missing a dtype"))?;
    let dims = parts
        .next()
        .with_context(|| format!("feature spec '{spec}' is missing a shape"))?;

    let dtype = match dtype {
        "int64" => DataType::Int64,
        "float" => DataType::Float,
        other => anyhow::bail!("unsupported dtype '{other}' in feature spec '{spec}'"),
    };
    let shape: Result<Vec<usize>, _> = dims.split(',').map(|d| d.parse::<usize>()).collect();
    let shape = shape.with_context(|| format!("invalid shape in feature spec '{spec}'"))?;

    Ok(FixedLenFeature::new(name, TensorShape::new(shape), dtype))
}

fn decode(
    files: Vec<std::path::PathBuf>,
    seed: u64,
    epoch: u64,
    shuffle_buffer: usize,
    batch_size: usize,
    feature_specs: &[String],
    parallel: bool,
) -> Result<()> {
    let features = feature_specs
        .iter()
        .map(|s| parse_feature_spec(s))
        .collect::<Result<Vec<_>>>()?;
    if features.is_empty() {
        anyhow::bail!("decode requires at least one --feature spec");
    }

    let mut yielder = ParsedRandomizedYielder::new(files, seed, epoch, shuffle_buffer, features);
    let mut pool = parallel.then(|| WorkerPool::new(8));

    let mut batch_index = 0usize;
    loop {
        let batch = match &mut pool {
            Some(pool) => yielder.next_n_parallel(pool, batch_size)?,
            None => yielder.next_n(batch_size)?,
        };
        let batch = match batch {
            Some(b) => b,
            None => break,
        };
        print!("batch {batch_index}:");
        for buf in &batch {
            let len = match buf {
                TensorBuffer::Int64(v) => v.len(),
                TensorBuffer::Float(v) => v.len(),
                TensorBuffer::Uint8(v) => v.len(),
                TensorBuffer::Bytes(v) => v.len(),
            };
            print!(" {:?}[{len}]", buf.dtype());
        }
        println!();
        batch_index += 1;
    }
    println!("{batch_index} batches decoded");
    Ok(())
}
