//! Channel transport implementations.
//!
//! - `ExportTransport` - reads Telegram Desktop JSON history exports
//!
//! Test code uses [`MockTransport`](crate::testing::MockTransport).

pub mod export;

pub use export::ExportTransport;
