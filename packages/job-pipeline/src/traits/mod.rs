//! Core trait abstractions for the job pipeline.
//!
//! These traits define the boundaries to the external collaborators: the
//! messaging platform, the AI extractor and the persistent store.

pub mod extractor;
pub mod store;
pub mod transport;
