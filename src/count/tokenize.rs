use std::io::{self, BufRead};

use crate::error::{Error, Result};

/// Whitespace lookup table: C locale `isspace()`.
/// Space, tab, newline, CR, form feed, vertical tab. Nothing else separates words.
const fn make_ws_table() -> [bool; 256] {
    let mut t = [false; 256];
    t[0x09] = true; // \t  horizontal tab
    t[0x0A] = true; // \n  newline
    t[0x0B] = true; // \v  vertical tab
    t[0x0C] = true; // \f  form feed
    t[0x0D] = true; // \r  carriage return
    t[0x20] = true; //     space
    t
}

const WS_TABLE: [bool; 256] = make_ws_table();

/// UTF-8 byte-order mark.
pub const BOM: &[u8] = b"\xEF\xBB\xBF";

#[inline(always)]
pub fn is_space(b: u8) -> bool {
    WS_TABLE[b as usize]
}

/// A normalized token.
///
/// ASCII tokens are folded in place and borrowed from the raw buffer so the
/// caller can look them up without allocating; non-ASCII tokens have to be
/// decoded and lower-cased into a fresh `String` anyway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalized<'a> {
    /// Nothing left once the BOM is stripped. Never counted.
    Empty,
    Ascii(&'a str),
    Unicode(String),
}

impl Normalized<'_> {
    pub fn into_owned(self) -> Option<String> {
        match self {
            Normalized::Empty => None,
            Normalized::Ascii(s) => Some(s.to_owned()),
            Normalized::Unicode(s) => Some(s),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Normalized::Empty => None,
            Normalized::Ascii(s) => Some(s),
            Normalized::Unicode(s) => Some(s),
        }
    }
}

#[inline]
fn strip_bom(raw: &mut [u8]) -> &mut [u8] {
    if raw.starts_with(BOM) {
        &mut raw[BOM.len()..]
    } else {
        raw
    }
}

/// True when `raw` normalizes to nothing: a bare BOM, or a BOM followed by
/// the decoded BOM character.
#[inline]
fn is_blank(raw: &[u8]) -> bool {
    let rest = raw.strip_prefix(BOM).unwrap_or(raw);
    rest.is_empty() || rest == BOM
}

/// Normalize one raw whitespace-delimited token.
///
/// A leading BOM is dropped. All-ASCII tokens get `A-Z` folded to `a-z` in
/// place. Anything containing a byte >= 0x80 is decoded (invalid sequences
/// become U+FFFD), loses one more leading U+FEFF if present, and is
/// lower-cased with Unicode rules.
pub fn normalize(raw: &mut [u8]) -> Normalized<'_> {
    let raw = strip_bom(raw);
    if raw.is_empty() {
        return Normalized::Empty;
    }
    if raw.is_ascii() {
        raw.make_ascii_lowercase();
        // SAFETY: every byte is < 0x80, so the slice is valid UTF-8.
        return Normalized::Ascii(unsafe { std::str::from_utf8_unchecked(raw) });
    }

    let decoded = String::from_utf8_lossy(raw);
    let text = decoded.strip_prefix('\u{feff}').unwrap_or(&decoded);
    if text.is_empty() {
        return Normalized::Empty;
    }
    Normalized::Unicode(text.to_lowercase())
}

/// Normalize an already split word.
pub fn normalize_word(word: &str) -> Option<String> {
    let mut raw = word.as_bytes().to_vec();
    normalize(&mut raw).into_owned()
}

/// Streaming whitespace tokenizer over a `BufRead`.
///
/// Holds at most one raw word at a time; the reader's own buffer does the
/// rest. Each call continues from wherever the reader currently is.
pub struct Tokenizer<R> {
    reader: R,
    word: Vec<u8>,
}

impl<R: BufRead> Tokenizer<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            word: Vec::with_capacity(64),
        }
    }

    /// The reader, positioned just past the delimiter of the last word.
    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Next normalized token, borrowed from the tokenizer's word buffer.
    /// Tokens that normalize to nothing are skipped.
    pub fn next_token(&mut self) -> Result<Option<Normalized<'_>>> {
        loop {
            if !self.gather_raw()? {
                return Ok(None);
            }
            if !is_blank(&self.word) {
                break;
            }
        }
        Ok(Some(normalize(&mut self.word)))
    }

    /// Next normalized word as an owned `String`.
    pub fn next_word(&mut self) -> Result<Option<String>> {
        loop {
            match self.next_token()? {
                None => return Ok(None),
                Some(token) => {
                    if let Some(word) = token.into_owned() {
                        return Ok(Some(word));
                    }
                }
            }
        }
    }

    /// Collect the next maximal non-whitespace run into `self.word`.
    /// Returns false at end of input with nothing gathered.
    fn gather_raw(&mut self) -> Result<bool> {
        self.word.clear();

        loop {
            let buf = match self.reader.fill_buf() {
                Ok(buf) => buf,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::read("read word", e)),
            };
            if buf.is_empty() {
                return Ok(false);
            }
            match buf.iter().position(|&b| !is_space(b)) {
                Some(i) => {
                    self.reader.consume(i);
                    break;
                }
                None => {
                    let n = buf.len();
                    self.reader.consume(n);
                }
            }
        }

        loop {
            let buf = match self.reader.fill_buf() {
                Ok(buf) => buf,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.word.clear();
                    return Err(Error::read("read word", e));
                }
            };
            if buf.is_empty() {
                return Ok(true);
            }
            match buf.iter().position(|&b| is_space(b)) {
                Some(i) => {
                    self.word.extend_from_slice(&buf[..i]);
                    // the delimiter goes too
                    self.reader.consume(i + 1);
                    return Ok(true);
                }
                None => {
                    self.word.extend_from_slice(buf);
                    let n = buf.len();
                    self.reader.consume(n);
                }
            }
        }
    }
}

impl<R: BufRead> Iterator for Tokenizer<R> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_word().transpose()
    }
}

/// Tokenize a whole input into a Vec of normalized words.
pub fn read_words<R: BufRead>(reader: R) -> Result<Vec<String>> {
    Tokenizer::new(reader).collect()
}
