//! Media data model and per-client mailbox (SPEC_FULL.md §3, §4.5).

pub mod frame;
pub mod mailbox;

pub use frame::Frame;
pub use mailbox::{AudioChunk, Mailbox, SAMPLES_PER_CHUNK, SAMPLE_RATE};
