pub mod materialize;
pub mod page_cache;
