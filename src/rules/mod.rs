//! Rule fetching, synchronization, and bypass-list merging

pub mod bypass;
pub mod fetcher;
pub mod sync;

pub use fetcher::{FetcherConfig, RuleFetcher};
pub use sync::SyncEngine;
