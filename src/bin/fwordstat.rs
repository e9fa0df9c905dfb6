use std::fs;
use std::io::{self, BufWriter, Read};
use std::path::Path;
use std::process;
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use wordstat_rs::common::io::{ConcatReader, open_noatime, read_file_mut};
use wordstat_rs::common::io_error_msg;
use wordstat_rs::count::{DEFAULT_BATCH_SIZE, count_bytes};
use wordstat_rs::{Context, Error, Format, Options, SortKey, run};

#[derive(Parser)]
#[command(
    name = "fwordstat",
    version,
    about = "Count word frequencies in FILEs (or standard input)"
)]
struct Cli {
    /// Print only the N most frequent entries (0 prints all)
    #[arg(short = 'k', long = "top", value_name = "N", default_value_t = 0)]
    top: usize,

    /// Drop words seen fewer than N times
    #[arg(long = "min", value_name = "N", default_value_t = 1)]
    min: u64,

    /// Order entries by: word, count
    #[arg(long = "sort", value_name = "KEY", default_value = "word")]
    sort: SortKey,

    /// Output format: text, json
    #[arg(long = "format", value_name = "FMT", default_value = "text")]
    format: Format,

    /// Number of counting workers
    #[arg(long = "workers", value_name = "N", default_value_t = 1)]
    workers: usize,

    /// Words per batch handed to a worker
    #[arg(long = "batch-size", value_name = "N", default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Load the whole input into memory before counting
    #[arg(long = "buffered")]
    buffered: bool,

    /// Fail if the input is larger than N bytes
    #[arg(long = "max-bytes", value_name = "N")]
    max_bytes: Option<u64>,

    /// Give up after SECS seconds
    #[arg(long = "timeout", value_name = "SECS")]
    timeout: Option<f64>,

    /// Files to count (reads stdin if none given, or for "-")
    files: Vec<String>,
}

impl Cli {
    fn options(&self) -> Options {
        Options {
            k: self.top,
            min: self.min,
            sort_by: self.sort,
            format: self.format,
            workers: self.workers,
            batch_size: self.batch_size,
            buffered: self.buffered,
            max_bytes: self.max_bytes,
        }
    }

    fn context(&self) -> Result<Context> {
        let ctx = Context::new();
        match self.timeout {
            None => Ok(ctx),
            Some(secs) => match Duration::try_from_secs_f64(secs) {
                Ok(timeout) if !timeout.is_zero() => Ok(ctx.with_timeout(timeout)),
                _ => bail!("invalid timeout '{secs}' (must be > 0)"),
            },
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn open_input(name: &str) -> Result<Box<dyn Read>> {
    if name == "-" {
        return Ok(Box::new(io::stdin().lock()));
    }
    let file =
        open_noatime(Path::new(name)).map_err(|e| anyhow!("{}: {}", name, io_error_msg(&e)))?;
    Ok(Box::new(file))
}

fn check_limit(len: u64, opts: &Options) -> Result<()> {
    match opts.max_bytes {
        Some(limit) if len > limit => Err(Error::InputTooLarge { limit }.into()),
        _ => Ok(()),
    }
}

/// `--buffered` over one regular file: count the loaded copy in place.
fn count_regular_file(ctx: &Context, path: &str, len: u64, opts: &Options) -> Result<()> {
    opts.validate()?;
    check_limit(len, opts)?;
    ctx.check()?;
    let mut data =
        read_file_mut(Path::new(path)).map_err(|e| anyhow!("{}: {}", path, io_error_msg(&e)))?;
    // the file may have grown since it was stat'ed
    check_limit(data.len() as u64, opts)?;
    debug!(path, bytes = data.len(), "loaded file");
    let counts = count_bytes(ctx, &mut data)?;
    let mut out = BufWriter::new(io::stdout().lock());
    run::report(&mut out, counts, opts)?;
    Ok(())
}

fn try_main(cli: &Cli) -> Result<()> {
    let opts = cli.options();
    let ctx = cli.context()?;

    if opts.buffered && cli.files.len() == 1 && cli.files[0] != "-" {
        let path = &cli.files[0];
        let metadata =
            fs::metadata(path).map_err(|e| anyhow!("{}: {}", path, io_error_msg(&e)))?;
        // Pipes and devices have no size up front; they go through the
        // limited, cancellable reader below like any other stream.
        if metadata.is_file() {
            return count_regular_file(&ctx, path, metadata.len(), &opts);
        }
    }

    let input: Box<dyn Read> = if cli.files.is_empty() {
        Box::new(io::stdin().lock())
    } else {
        let parts = cli
            .files
            .iter()
            .map(String::as_str)
            .map(open_input)
            .collect::<Result<Vec<_>>>()?;
        Box::new(ConcatReader::new(parts))
    };

    let mut out = BufWriter::new(io::stdout().lock());
    run::run_ctx(&ctx, input, &mut out, &opts)?;
    Ok(())
}

fn main() {
    wordstat_rs::common::reset_sigpipe();
    let cli = Cli::parse();
    init_tracing();

    if let Err(e) = try_main(&cli) {
        eprintln!("fwordstat: {e}");
        process::exit(1);
    }
}
