pub mod circuit;
pub mod entities;
pub mod fetch;
pub mod normalize;
pub mod categorize;
pub mod scheduler;
pub mod sources;
pub mod stats;

pub use fetch::{FeedFetcher, FetchOutcome, RawEntry};
pub use normalize::Normalizer;
pub use scheduler::Poller;
pub use stats::PollerStats;
