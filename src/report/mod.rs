mod core;


pub use self::core::{
    Entry, Format, SortKey, build_entries, filter_min, filter_min_in_place, sort_entries,
    truncate_top, write_report,
};
