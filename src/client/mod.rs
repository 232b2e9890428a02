//! The client half of the protocol (SPEC_FULL.md §4.8, §4.11): joins a running
//! server, uploads captured video/audio, and renders the composited `AsciiFrame`
//! stream to the terminal.

pub mod capture;
pub mod playback;
pub mod session;
pub mod terminal;

pub use session::{run, JoinConfig};
