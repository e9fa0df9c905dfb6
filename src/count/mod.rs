mod buffered;
mod sequential;
mod sharded;
mod tokenize;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::io::BufRead;

use tracing::debug;

use crate::context::Context;
use crate::error::Result;

pub use self::buffered::{count_bytes, count_reader_buffered};
pub use self::sequential::{CANCEL_CHECK_INTERVAL, count_sequential, count_words};
pub use self::sharded::{
    DEFAULT_BATCH_SIZE, DEFAULT_QUEUE_DEPTH, ShardConfig, count_sharded, fnv1a_32,
};
pub use self::tokenize::{
    BOM, Normalized, Tokenizer, is_space, normalize, normalize_word, read_words,
};

/// Word → occurrence count. No ordering.
pub type CountMap = HashMap<String, u64>;

/// Which counting path to take. All of them produce the same map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Sequential,
    Sharded(ShardConfig),
    Buffered,
}

/// Count `reader` with the chosen strategy.
pub fn count<R: BufRead>(ctx: &Context, reader: R, strategy: &Strategy) -> Result<CountMap> {
    debug!(?strategy, "counting");
    match strategy {
        Strategy::Sequential => count_sequential(ctx, reader),
        Strategy::Sharded(config) => count_sharded(ctx, reader, config),
        Strategy::Buffered => count_reader_buffered(ctx, reader),
    }
}

/// Add one occurrence of `token`.
/// Borrowed ASCII tokens only allocate a key on a miss.
#[inline]
pub(crate) fn bump(counts: &mut CountMap, token: Normalized<'_>) {
    match token {
        Normalized::Empty => {}
        Normalized::Ascii(word) => match counts.get_mut(word) {
            Some(c) => *c += 1,
            None => {
                counts.insert(word.to_owned(), 1);
            }
        },
        Normalized::Unicode(word) => *counts.entry(word).or_insert(0) += 1,
    }
}
