//! nayru-core — Pure types, text preparation, and WAV codec.
//!
//! No async runtime, no I/O, no platform dependencies. Consumers that only
//! need status snapshots and config types can depend on this crate without
//! pulling in tokio or rodio.

pub mod text_prep;
pub mod types;
pub mod wav;
