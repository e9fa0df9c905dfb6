use std::io::{BufReader, Read, Write};

use tracing::debug;

use crate::common::io::{ContextReader, LimitedReader};
use crate::context::Context;
use crate::count::{
    self, CountMap, DEFAULT_BATCH_SIZE, DEFAULT_QUEUE_DEPTH, ShardConfig, Strategy,
};
use crate::error::{Error, Result};
use crate::report::{
    Format, SortKey, build_entries, filter_min_in_place, sort_entries, truncate_top,
    write_report,
};

/// Everything a wordstat run needs besides its input and output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// Print at most this many entries; 0 prints all.
    pub k: usize,
    /// Drop words seen fewer times than this.
    pub min: u64,
    pub sort_by: SortKey,
    pub format: Format,
    /// Counting workers; 1 counts on the calling thread.
    pub workers: usize,
    /// Words per shard batch; 0 means the default.
    pub batch_size: usize,
    /// Read all input into memory and count the buffer directly.
    pub buffered: bool,
    /// Fail with `InputTooLarge` once more than this many bytes are read.
    pub max_bytes: Option<u64>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            k: 0,
            min: 1,
            sort_by: SortKey::Word,
            format: Format::Text,
            workers: 1,
            batch_size: DEFAULT_BATCH_SIZE,
            buffered: false,
            max_bytes: None,
        }
    }
}

impl Options {
    pub fn validate(&self) -> Result<()> {
        if self.workers < 1 {
            return Err(Error::Config(format!(
                "invalid workers={} (must be >= 1)",
                self.workers
            )));
        }
        if self.min < 1 {
            return Err(Error::Config(format!(
                "invalid min={} (must be >= 1)",
                self.min
            )));
        }
        Ok(())
    }

    /// The counting strategy these options select.
    pub fn strategy(&self) -> Strategy {
        if self.buffered {
            Strategy::Buffered
        } else if self.workers <= 1 {
            Strategy::Sequential
        } else {
            Strategy::Sharded(ShardConfig {
                workers: self.workers,
                batch_size: self.batch_size,
                queue_depth: DEFAULT_QUEUE_DEPTH,
            })
        }
    }
}

/// Count `input` with the strategy selected by `opts`, applying the input
/// size limit if one is set.
///
/// The context is checked before every read, so cancellation is seen even
/// in the middle of a token that spans many buffers.
pub fn count_input<R: Read>(ctx: &Context, input: R, opts: &Options) -> Result<CountMap> {
    let strategy = opts.strategy();
    let input = ContextReader::new(ctx, input);
    match opts.max_bytes {
        Some(limit) => count_with(ctx, LimitedReader::new(input, limit), &strategy),
        None => count_with(ctx, input, &strategy),
    }
}

fn count_with<R: Read>(ctx: &Context, input: R, strategy: &Strategy) -> Result<CountMap> {
    match strategy {
        // read_to_end buffers anyway; skip the BufReader copy
        Strategy::Buffered => count::count_reader_buffered(ctx, input),
        _ => count::count(ctx, BufReader::new(input), strategy),
    }
}

/// Write the report for an already counted map.
pub fn report<W: Write>(out: &mut W, counts: CountMap, opts: &Options) -> Result<()> {
    let mut entries = build_entries(counts);
    filter_min_in_place(&mut entries, opts.min);
    sort_entries(&mut entries, opts.sort_by);
    truncate_top(&mut entries, opts.k);
    debug!(entries = entries.len(), format = %opts.format, "writing report");
    write_report(out, &entries, opts.format)?;
    out.flush().map_err(Error::Write)
}

/// Validate, count, filter, sort, truncate and render.
/// Nothing is written unless counting succeeds.
pub fn run_ctx<R: Read, W: Write>(
    ctx: &Context,
    input: R,
    out: &mut W,
    opts: &Options,
) -> Result<()> {
    opts.validate()?;
    let counts = count_input(ctx, input, opts)?;
    report(out, counts, opts)
}

/// [`run_ctx`] with a background context.
pub fn run<R: Read, W: Write>(input: R, out: &mut W, opts: &Options) -> Result<()> {
    run_ctx(&Context::background(), input, out, opts)
}

