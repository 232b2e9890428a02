//! Audio codec boundary (SPEC_FULL.md §4.7, REDESIGN FLAGS): the mixer talks to an
//! `OpusCodec` trait object rather than a concrete encoder, so it compiles and runs
//! its tests without a system libopus when the `opus-codec` feature is disabled.

pub mod opus;

pub use opus::{new_codec, CodecError, OpusCodec};
