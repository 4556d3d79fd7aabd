//! # ringout-core
//!
//! Real-time audio output driver built on a power-of-two frame ring.
//!
//! ## Architecture
//!
//! ```text
//! producer ── write() ──► FrameRing ──► drain thread ──► AudioSink::submit (blocking)
//!                          ▲      │
//!                    write_pos  read_pos
//! ```
//!
//! The producer never waits on the drain thread. The drain thread is paced
//! only by the sink's blocking submit call, and falls back to a silence
//! chunk whenever less than one chunk of audio is ready.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod buffering;
pub mod config;
pub mod drain;
pub mod driver;
pub mod error;
pub mod events;
pub mod frame;
pub mod sink;

// Convenience re-exports for downstream crates
pub use config::DriverConfig;
pub use driver::{free_driver, AudioDriver, DrainState, RingOutDriver};
pub use error::DriverError;
pub use events::{DriverStatus, DriverStatusEvent};
pub use sink::{AudioSink, CpalSink, NullSink, SinkHandle, WavSink};
