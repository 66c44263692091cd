mod env;
mod hex;
mod indexer;
mod log;

pub use indexer::start_indexing;
