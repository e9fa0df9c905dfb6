//! Sharded concurrent counter.
//!
//! ```text
//! driver: tokenize → fnv1a(word) % N → pending batch[i] ─┐
//!                                                       │ bounded queue (depth D)
//! worker 0 ◀────────────────────────────────────────────┤
//! worker 1 ◀────────────────────────────────────────────┤  each worker owns one map
//! worker N-1 ◀──────────────────────────────────────────┘
//!                        drained batches ──▶ BatchPool ──▶ driver
//! ```
//!
//! Identical words always hash to the same shard, so the per-shard maps have
//! disjoint keys and need no locking. The driver closes every queue and joins
//! every worker before it looks at any map, on success and failure alike.

use std::io::BufRead;
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, TrySendError, select};
use tracing::{debug, trace};

use super::CountMap;
use super::sequential::count_sequential;
use super::tokenize::Tokenizer;
use crate::context::Context;
use crate::error::{Error, Result};

/// Batch size used when the configured one is zero.
pub const DEFAULT_BATCH_SIZE: usize = 1024;

/// Batches each shard queue holds before the driver blocks.
pub const DEFAULT_QUEUE_DEPTH: usize = 8;

/// Tunables for [`count_sharded`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardConfig {
    /// Number of shards (and worker threads). `<= 1` means count sequentially.
    pub workers: usize,
    /// Words per batch. Zero falls back to [`DEFAULT_BATCH_SIZE`].
    pub batch_size: usize,
    /// Capacity of each shard queue, in batches. Must be at least 1.
    pub queue_depth: usize,
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            workers: thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            batch_size: DEFAULT_BATCH_SIZE,
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}

impl ShardConfig {
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            ..Self::default()
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_queue_depth(mut self, queue_depth: usize) -> Self {
        self.queue_depth = queue_depth;
        self
    }

    #[inline]
    pub fn effective_batch_size(&self) -> usize {
        if self.batch_size == 0 {
            DEFAULT_BATCH_SIZE
        } else {
            self.batch_size
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue_depth == 0 {
            return Err(Error::Config("queue depth must be >= 1".to_string()));
        }
        Ok(())
    }
}

/// 32-bit FNV-1a.
#[inline]
pub fn fnv1a_32(bytes: &[u8]) -> u32 {
    let mut h: u32 = 0x811c_9dc5;
    for &b in bytes {
        h ^= b as u32;
        h = h.wrapping_mul(0x0100_0193);
    }
    h
}

#[inline]
fn shard_index(word: &str, shards: usize) -> usize {
    (fnv1a_32(word.as_bytes()) % shards as u32) as usize
}

type Batch = Vec<String>;

/// Free list of cleared batches, shared by the driver and all workers.
struct BatchPool {
    free: Mutex<Vec<Batch>>,
    batch_size: usize,
}

impl BatchPool {
    fn new(batch_size: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            batch_size,
        }
    }

    fn get(&self) -> Batch {
        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(self.batch_size))
    }

    fn put(&self, mut batch: Batch) {
        batch.clear();
        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(batch);
    }
}

/// Count words with `config.workers` shard workers and merge the result.
///
/// Produces exactly the map [`count_sequential`] would for the same input.
/// On a read error or cancellation no partial map is returned, and no worker
/// outlives the call.
pub fn count_sharded<R: BufRead>(
    ctx: &Context,
    reader: R,
    config: &ShardConfig,
) -> Result<CountMap> {
    if config.workers <= 1 {
        debug!(workers = config.workers, "single worker, counting sequentially");
        return count_sequential(ctx, reader);
    }
    config.validate()?;
    ctx.check()?;

    let workers = config.workers;
    let batch_size = config.effective_batch_size();
    let pool = BatchPool::new(batch_size);
    debug!(
        workers,
        batch_size,
        queue_depth = config.queue_depth,
        "starting shard workers"
    );

    thread::scope(|s| {
        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for shard in 0..workers {
            let (tx, rx) = crossbeam_channel::bounded::<Batch>(config.queue_depth);
            let pool = &pool;
            // On failure the senders already created drop when this closure
            // returns, so the running workers exit before the scope joins them.
            let handle = thread::Builder::new()
                .name(format!("wordstat-shard-{shard}"))
                .spawn_scoped(s, move || drain_shard(rx, pool))
                .map_err(Error::Spawn)?;
            senders.push(tx);
            handles.push(handle);
        }

        let driven = drive(ctx, reader, &senders, &pool, batch_size);

        // Closing the queues is what stops the workers.
        drop(senders);
        let mut maps = Vec::with_capacity(workers);
        let mut panicked = None;
        for (shard, handle) in handles.into_iter().enumerate() {
            match handle.join() {
                Ok(map) => maps.push(map),
                Err(_) => {
                    panicked.get_or_insert(shard);
                }
            }
        }
        debug!(ok = driven.is_ok(), "shard workers joined");

        driven?;
        if let Some(shard) = panicked {
            return Err(Error::WorkerPanicked { shard });
        }
        Ok(merge(maps))
    })
}

/// Worker loop: count every word of every batch until the queue closes.
fn drain_shard(rx: Receiver<Batch>, pool: &BatchPool) -> CountMap {
    let mut counts = CountMap::new();
    for mut batch in rx.iter() {
        for word in batch.drain(..) {
            *counts.entry(word).or_insert(0) += 1;
        }
        pool.put(batch);
    }
    counts
}

/// Driver loop: tokenize, route, batch and hand off. Returns at end of input
/// after flushing every pending batch, or at the first error.
fn drive<R: BufRead>(
    ctx: &Context,
    reader: R,
    senders: &[Sender<Batch>],
    pool: &BatchPool,
    batch_size: usize,
) -> Result<()> {
    let shards = senders.len();
    let deadline = ctx.deadline_channel();
    let mut pending: Vec<Batch> = (0..shards).map(|_| pool.get()).collect();
    let mut tokens = Tokenizer::new(reader);

    loop {
        ctx.check()?;
        let Some(word) = tokens.next_word()? else {
            break;
        };
        let idx = shard_index(&word, shards);
        pending[idx].push(word);
        if pending[idx].len() >= batch_size {
            let batch = std::mem::replace(&mut pending[idx], pool.get());
            hand_off(ctx, &deadline, &senders[idx], idx, batch)?;
        }
    }

    for (idx, batch) in pending.into_iter().enumerate() {
        if batch.is_empty() {
            continue;
        }
        hand_off(ctx, &deadline, &senders[idx], idx, batch)?;
    }
    Ok(())
}

/// Send one batch to a shard queue, blocking while the queue is full unless
/// the context is cancelled or its deadline passes first.
fn hand_off(
    ctx: &Context,
    deadline: &Receiver<Instant>,
    tx: &Sender<Batch>,
    shard: usize,
    batch: Batch,
) -> Result<()> {
    ctx.check()?;
    let batch = match tx.try_send(batch) {
        Ok(()) => return Ok(()),
        // A queue only disconnects when its worker has died.
        Err(TrySendError::Disconnected(_)) => return Err(Error::WorkerPanicked { shard }),
        Err(TrySendError::Full(batch)) => batch,
    };

    trace!(shard, "shard queue full, waiting");
    select! {
        send(tx, batch) -> res => res.map_err(|_| Error::WorkerPanicked { shard }),
        recv(ctx.done()) -> _ => Err(Error::Canceled),
        recv(deadline) -> _ => Err(Error::DeadlineExceeded),
    }
}

/// Sum shard maps into one, reusing the largest as the accumulator.
pub(crate) fn merge(mut maps: Vec<CountMap>) -> CountMap {
    let Some(largest) = (0..maps.len()).max_by_key(|&i| maps[i].len()) else {
        return CountMap::new();
    };
    let mut out = maps.swap_remove(largest);
    out.reserve(maps.iter().map(|m| m.len()).sum());
    for map in maps {
        for (word, count) in map {
            *out.entry(word).or_insert(0) += count;
        }
    }
    debug!(distinct = out.len(), "shard maps merged");
    out
}
