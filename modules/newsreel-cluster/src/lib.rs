pub mod consumer;
pub mod engine;
pub mod similarity;
pub mod topic;

#[cfg(test)]
mod engine_tests;

pub use consumer::{ClusterConsumer, CLUSTERING_LEASE};
pub use engine::{handle_article, ClusterDeps, ClusterOutcome};
pub use similarity::title_similarity;
pub use topic::{dominant_topic, topic_conflict};
