pub mod batch;
pub mod orchestrator;
pub mod synthesis;


pub use batch::BatchSummarizer;
pub use orchestrator::{
    is_urgent, needs_synthesis, synthesize_story, Summarizer, SummarizerDeps, SUMMARIZER_LEASE,
};
pub use synthesis::{SynthesisOutput, KEEP_CURRENT};
