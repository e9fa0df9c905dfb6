use std::cmp::Ordering;
use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::count::CountMap;
use crate::error::{Error, Result};

/// Entries above this count are sorted on the rayon pool.
const PARALLEL_SORT_THRESHOLD: usize = 10_000;

/// One line of the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub word: String,
    pub count: u64,
}

impl Entry {
    pub fn new(word: impl Into<String>, count: u64) -> Self {
        Self {
            word: word.into(),
            count,
        }
    }
}

/// Report ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    /// Word ascending.
    #[default]
    Word,
    /// Count descending, then word ascending.
    Count,
}

impl FromStr for SortKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "word" => Ok(SortKey::Word),
            "count" => Ok(SortKey::Count),
            other => Err(Error::Config(format!(
                "invalid sort {other:?} (use word|count)"
            ))),
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SortKey::Word => "word",
            SortKey::Count => "count",
        })
    }
}

/// Report rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    /// `word count` per line.
    #[default]
    Text,
    /// JSON array of `{"word", "count"}` objects.
    Json,
}

impl FromStr for Format {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" | "text" => Ok(Format::Text),
            "json" => Ok(Format::Json),
            other => Err(Error::Config(format!(
                "invalid format {other:?} (use text|json)"
            ))),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Format::Text => "text",
            Format::Json => "json",
        })
    }
}

pub fn build_entries(counts: CountMap) -> Vec<Entry> {
    counts
        .into_iter()
        .map(|(word, count)| Entry { word, count })
        .collect()
}

/// Keep entries seen at least `min` times. `min <= 1` keeps everything
/// and returns the input as is.
pub fn filter_min(entries: Vec<Entry>, min: u64) -> Vec<Entry> {
    if min <= 1 {
        return entries;
    }
    entries.into_iter().filter(|e| e.count >= min).collect()
}

/// Same as [`filter_min`] without giving up the Vec.
pub fn filter_min_in_place(entries: &mut Vec<Entry>, min: u64) {
    if min > 1 {
        entries.retain(|e| e.count >= min);
    }
}

#[inline]
fn compare(key: SortKey, a: &Entry, b: &Entry) -> Ordering {
    match key {
        SortKey::Word => a.word.cmp(&b.word),
        SortKey::Count => b.count.cmp(&a.count).then_with(|| a.word.cmp(&b.word)),
    }
}

/// Sort in report order. Words are unique, so an unstable sort is deterministic.
pub fn sort_entries(entries: &mut [Entry], key: SortKey) {
    if entries.len() > PARALLEL_SORT_THRESHOLD {
        entries.par_sort_unstable_by(|a, b| compare(key, a, b));
    } else {
        entries.sort_unstable_by(|a, b| compare(key, a, b));
    }
}

/// Keep the first `k` entries. `k == 0` keeps all.
pub fn truncate_top(entries: &mut Vec<Entry>, k: usize) {
    if k > 0 {
        entries.truncate(k);
    }
}

/// Render `entries` in order.
pub fn write_report<W: Write>(out: &mut W, entries: &[Entry], format: Format) -> Result<()> {
    match format {
        Format::Text => write_text(out, entries).map_err(Error::Write),
        Format::Json => write_json(out, entries).map_err(Error::Write),
    }
}

fn write_text<W: Write>(out: &mut W, entries: &[Entry]) -> io::Result<()> {
    let mut num = itoa::Buffer::new();
    for e in entries {
        out.write_all(e.word.as_bytes())?;
        out.write_all(b" ")?;
        out.write_all(num.format(e.count).as_bytes())?;
        out.write_all(b"\n")?;
    }
    Ok(())
}

fn write_json<W: Write>(out: &mut W, entries: &[Entry]) -> io::Result<()> {
    serde_json::to_writer(&mut *out, entries)?;
    out.write_all(b"\n")
}
