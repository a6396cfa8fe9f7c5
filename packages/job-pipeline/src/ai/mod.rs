//! AI implementations of the [`JobExtractor`](crate::traits::extractor::JobExtractor) trait.

mod openai;

pub use openai::{parse_extraction_response, OpenAiExtractor};
