pub mod collections;
pub mod memory;
pub mod retry;
pub mod store;

pub use collections::{
    Articles, CostLog, DeadLetters, FeedStates, Notifications, Stories, SummaryAudit,
};
pub use memory::MemoryStore;
pub use retry::update_with_etag_retry;
pub use store::{ChangeStream, DocumentStore, Etag, QueryFilter};

/// Collection names. Change-stream leases are named per consumer, so two
/// consumers of the same collection never share a checkpoint.
pub mod names {
    pub const ARTICLES: &str = "articles";
    pub const STORIES: &str = "stories";
    pub const FEED_POLL_STATES: &str = "feed_poll_states";
    pub const NOTIFICATIONS: &str = "notifications";
    pub const DEAD_LETTERS: &str = "dead_letters";
    pub const COST_LOG: &str = "cost_log";
    pub const SUMMARY_AUDIT: &str = "summary_audit";
}
