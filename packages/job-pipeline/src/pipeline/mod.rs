//! Pipeline stages: read, classify, govern, write, orchestrate.

pub mod classifier;
pub mod governor;
pub mod orchestrator;
pub mod prompts;
pub mod reader;
pub mod rules;
pub mod writer;

pub use classifier::{Classifier, ExtractionOutcome};
pub use self::governor::RateGovernor;
pub use orchestrator::Pipeline;
pub use reader::{ChannelReader, MessageStream};
pub use rules::{Candidate, RuleEngine, RuleOutcome};
pub use writer::BatchedWriter;
