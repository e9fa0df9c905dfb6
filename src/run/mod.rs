mod core;


pub use self::core::{Options, count_input, report, run, run_ctx};
