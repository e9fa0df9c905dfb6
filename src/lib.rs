/// Use mimalloc as the global allocator.
/// Counting allocates one small String per distinct word.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod common;
pub mod context;
pub mod count;
pub mod error;
pub mod report;
pub mod run;

pub use context::Context;
pub use count::{CountMap, Strategy};
pub use error::{Error, Result};
pub use report::{Entry, Format, SortKey};
pub use run::{Options, run, run_ctx};
