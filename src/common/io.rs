use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read};
use std::ops::{Deref, DerefMut};
use std::path::Path;

#[cfg(target_os = "linux")]
use std::sync::atomic::{AtomicBool, Ordering};

use memmap2::{MmapMut, MmapOptions};

use crate::context::Context;

/// A whole input held in memory and writable in place.
/// Either a private copy-on-write mapping or an owned Vec.
pub enum InputData {
    Mmap(MmapMut),
    Owned(Vec<u8>),
}

impl Deref for InputData {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            InputData::Mmap(m) => m,
            InputData::Owned(v) => v,
        }
    }
}

impl DerefMut for InputData {
    fn deref_mut(&mut self) -> &mut [u8] {
        match self {
            InputData::Mmap(m) => m,
            InputData::Owned(v) => v,
        }
    }
}

/// Files below this size are read() into a Vec; mmap setup costs more than
/// it saves for them.
const MMAP_THRESHOLD: u64 = 1024 * 1024;

/// After the first EPERM we never try O_NOATIME again.
#[cfg(target_os = "linux")]
static NOATIME_SUPPORTED: AtomicBool = AtomicBool::new(true);

/// Open a file with O_NOATIME on Linux to avoid atime inode writes.
#[cfg(target_os = "linux")]
pub fn open_noatime(path: &Path) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    if NOATIME_SUPPORTED.load(Ordering::Relaxed) {
        match fs::OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NOATIME)
            .open(path)
        {
            Ok(f) => return Ok(f),
            Err(ref e) if e.raw_os_error() == Some(libc::EPERM) => {
                // O_NOATIME requires file ownership or CAP_FOWNER
                NOATIME_SUPPORTED.store(false, Ordering::Relaxed);
            }
            Err(e) => return Err(e),
        }
    }
    File::open(path)
}

#[cfg(not(target_os = "linux"))]
pub fn open_noatime(path: &Path) -> io::Result<File> {
    File::open(path)
}

/// Load a file as one mutable buffer for the buffered counter.
///
/// Large regular files get a private (MAP_PRIVATE) mapping: in-place case
/// folding dirties only the touched pages and never reaches the file.
/// Everything else is read into an exact-size Vec.
pub fn read_file_mut(path: &Path) -> io::Result<InputData> {
    let file = open_noatime(path)?;
    let metadata = file.metadata()?;
    let len = metadata.len();

    if !metadata.file_type().is_file() {
        let mut buf = Vec::new();
        let mut reader = file;
        reader.read_to_end(&mut buf)?;
        return Ok(InputData::Owned(buf));
    }
    if len == 0 {
        return Ok(InputData::Owned(Vec::new()));
    }

    if len >= MMAP_THRESHOLD {
        // SAFETY: private mapping; writes go to anonymous copies of the pages.
        // Concurrent truncation of the file by another process is outside
        // what any mmap user can guard against.
        if let Ok(mmap) = unsafe { MmapOptions::new().map_copy(&file) } {
            #[cfg(target_os = "linux")]
            {
                let _ = mmap.advise(memmap2::Advice::Sequential);
            }
            return Ok(InputData::Mmap(mmap));
        }
        // mmap failed, fall through to read
    }

    let mut buf = vec![0u8; len as usize];
    let n = read_full(&mut &file, &mut buf)?;
    buf.truncate(n);
    Ok(InputData::Owned(buf))
}

/// Read as many bytes as possible into buf, retrying on partial reads.
#[inline]
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match reader.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

/// Payload of the error a [`LimitedReader`] returns once its limit is crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputLimitExceeded {
    pub limit: u64,
}

impl fmt::Display for InputLimitExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "input exceeds {} bytes", self.limit)
    }
}

impl std::error::Error for InputLimitExceeded {}

/// Reader that allows at most `limit` bytes through and fails (rather than
/// silently truncating like `Read::take`) when the source has more.
pub struct LimitedReader<R> {
    inner: R,
    limit: u64,
    remaining: u64,
}

impl<R: Read> LimitedReader<R> {
    pub fn new(inner: R, limit: u64) -> Self {
        Self {
            inner,
            limit,
            remaining: limit,
        }
    }
}

impl<R: Read> Read for LimitedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.remaining == 0 {
            // Probe for one more byte: EOF means the input fit exactly.
            let mut probe = [0u8; 1];
            return match self.inner.read(&mut probe)? {
                0 => Ok(0),
                _ => Err(io::Error::other(InputLimitExceeded { limit: self.limit })),
            };
        }
        let max = buf.len().min(self.remaining.min(usize::MAX as u64) as usize);
        let n = self.inner.read(&mut buf[..max])?;
        self.remaining -= n as u64;
        Ok(n)
    }
}

/// Reader that checks a [`Context`] before every read and fails with the
/// cancellation cause once the context is done.
pub struct ContextReader<'a, R> {
    ctx: &'a Context,
    inner: R,
}

impl<'a, R: Read> ContextReader<'a, R> {
    pub fn new(ctx: &'a Context, inner: R) -> Self {
        Self { ctx, inner }
    }
}

impl<R: Read> Read for ContextReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(cause) = self.ctx.cause() {
            return Err(io::Error::other(cause));
        }
        self.inner.read(buf)
    }
}

/// Concatenates several inputs, inserting `\n` between consecutive parts so
/// the last word of one part never merges with the first word of the next.
pub struct ConcatReader<'a> {
    parts: Vec<Box<dyn Read + 'a>>,
    current: usize,
    separator_pending: bool,
}

impl<'a> ConcatReader<'a> {
    pub fn new(parts: Vec<Box<dyn Read + 'a>>) -> Self {
        Self {
            parts,
            current: 0,
            separator_pending: false,
        }
    }
}

impl Read for ConcatReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.separator_pending {
                self.separator_pending = false;
                buf[0] = b'\n';
                return Ok(1);
            }
            let Some(part) = self.parts.get_mut(self.current) else {
                return Ok(0);
            };
            match part.read(buf)? {
                0 => {
                    self.current += 1;
                    self.separator_pending = self.current < self.parts.len();
                }
                n => return Ok(n),
            }
        }
    }
}
