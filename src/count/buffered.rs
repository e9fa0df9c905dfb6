use std::io::Read;

use tracing::debug;

use super::tokenize::{is_space, normalize};
use super::{CountMap, bump};
use crate::common::io::ContextReader;
use crate::context::Context;
use crate::error::{Error, Result};

/// Bytes scanned between context checks in [`count_bytes`].
const SCAN_CHECK_STRIDE: usize = 64 * 1024;

/// Read the whole input into memory, then count it with [`count_bytes`].
///
/// The caller is responsible for bounding the input size (for example with
/// [`LimitedReader`](crate::common::io::LimitedReader)); this function keeps
/// everything resident.
pub fn count_reader_buffered<R: Read>(ctx: &Context, reader: R) -> Result<CountMap> {
    let mut data = Vec::new();
    ContextReader::new(ctx, reader)
        .read_to_end(&mut data)
        .map_err(|e| Error::read("read all", e))?;
    debug!(bytes = data.len(), "buffered input loaded");
    count_bytes(ctx, &mut data)
}

/// Count words directly in a mutable buffer.
///
/// ASCII tokens are case-folded in place and looked up through a `&str`
/// view into `data`; only a first-seen word is copied into an owned key.
/// The buffer is left with its ASCII tokens lower-cased.
pub fn count_bytes(ctx: &Context, data: &mut [u8]) -> Result<CountMap> {
    ctx.check()?;

    let mut counts = CountMap::new();
    let len = data.len();
    let mut i = 0;
    let mut next_check = SCAN_CHECK_STRIDE;

    while i < len {
        if i >= next_check {
            ctx.check()?;
            next_check = i + SCAN_CHECK_STRIDE;
        }
        while i < len && is_space(data[i]) {
            i += 1;
        }
        if i >= len {
            break;
        }
        let start = i;
        while i < len && !is_space(data[i]) {
            i += 1;
        }
        bump(&mut counts, normalize(&mut data[start..i]));
    }

    debug!(distinct = counts.len(), "buffered count finished");
    Ok(counts)
}
