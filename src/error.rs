use std::io;

use crate::common::io::InputLimitExceeded;
use crate::context::CancelCause;

/// Errors produced by the counting core and the report pipeline.
///
/// Every error is fatal to the call that produced it: no counter ever returns
/// a partial map together with an error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The caller cancelled the context.
    #[error("context canceled")]
    Canceled,

    /// The context deadline passed before counting finished.
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// The input source failed with something other than end-of-stream.
    #[error("{stage}: {source}")]
    Read {
        stage: &'static str,
        #[source]
        source: io::Error,
    },

    /// The input was larger than the configured byte limit.
    #[error("input exceeds {limit} bytes")]
    InputTooLarge { limit: u64 },

    /// Invalid options or tunables, rejected before any work starts.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A shard worker thread could not be started.
    #[error("spawn counting worker: {0}")]
    Spawn(#[source] io::Error),

    /// A shard worker thread panicked; its partial map is lost.
    #[error("counting worker for shard {shard} panicked")]
    WorkerPanicked { shard: usize },

    /// Writing the rendered report failed.
    #[error("write report: {0}")]
    Write(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for `Canceled` and `DeadlineExceeded`.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Canceled | Error::DeadlineExceeded)
    }

    /// Wrap an I/O error from the input side with the stage that failed.
    ///
    /// Errors raised by [`ContextReader`](crate::common::io::ContextReader) and
    /// [`LimitedReader`](crate::common::io::LimitedReader) carry a typed payload
    /// and are unwrapped back into `Canceled`/`DeadlineExceeded` and
    /// `InputTooLarge`.
    pub(crate) fn read(stage: &'static str, source: io::Error) -> Self {
        if let Some(inner) = source.get_ref() {
            if let Some(cause) = inner.downcast_ref::<CancelCause>() {
                return (*cause).into();
            }
            if let Some(exceeded) = inner.downcast_ref::<InputLimitExceeded>() {
                return Error::InputTooLarge {
                    limit: exceeded.limit,
                };
            }
        }
        Error::Read { stage, source }
    }
}
