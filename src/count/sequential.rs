use std::io::BufRead;

use tracing::debug;

use super::tokenize::Tokenizer;
use super::{CountMap, bump};
use crate::context::Context;
use crate::error::Result;

/// How many tokens the sequential counter processes between context checks.
pub const CANCEL_CHECK_INTERVAL: usize = 65536;

/// Count words on the calling thread with a single map.
///
/// ASCII words are looked up straight out of the tokenizer's word buffer;
/// a key is only allocated the first time a word is seen.
pub fn count_sequential<R: BufRead>(ctx: &Context, reader: R) -> Result<CountMap> {
    ctx.check()?;

    let mut tokens = Tokenizer::new(reader);
    let mut counts = CountMap::new();
    let mut until_check = CANCEL_CHECK_INTERVAL;

    while let Some(token) = tokens.next_token()? {
        bump(&mut counts, token);
        until_check -= 1;
        if until_check == 0 {
            ctx.check()?;
            until_check = CANCEL_CHECK_INTERVAL;
        }
    }

    debug!(distinct = counts.len(), "sequential count finished");
    Ok(counts)
}

/// Count an already tokenized list of words, normalizing each one.
pub fn count_words<S: AsRef<str>>(words: &[S]) -> CountMap {
    let mut counts = CountMap::new();
    let mut raw = Vec::with_capacity(64);
    for word in words {
        raw.clear();
        raw.extend_from_slice(word.as_ref().as_bytes());
        bump(&mut counts, super::tokenize::normalize(&mut raw));
    }
    counts
}
