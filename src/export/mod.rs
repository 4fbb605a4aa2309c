//! The export pipeline: discovery, fetching, flattening, and the processing loop.

pub mod fetcher;
pub mod pager;
pub mod record;
pub mod runner;

pub use fetcher::{FetchError, ItemFetcher};
pub use pager::{DiscoveredIds, DiscoveryError, discover_all_ids};
pub use record::{CSV_COLUMNS, ConversationRecord};
pub use runner::{ProcessOptions, ProcessStats, connect, run_discovery, run_processing};
