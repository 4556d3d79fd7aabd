//! Hardware sink abstraction.
//!
//! The `AudioSink` trait is the drain thread's only view of the output device.
//! `submit` must block until the device has accepted the chunk: that call is
//! the drain loop's sole pacing source, there is no other clock.

pub mod device;
pub mod null;
pub mod wav;

pub use device::{list_output_devices, CpalSink, DeviceInfo};
pub use null::NullSink;
pub use wav::WavSink;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;

/// Contract for output devices fed by the drain thread.
pub trait AudioSink: Send + 'static {
    /// Claim the output channel. Called on the drain thread before the first
    /// chunk of each run.
    ///
    /// # Errors
    /// A failed reservation ends the drain thread without submitting anything.
    fn reserve(&mut self, _chunk_frames: usize, _sample_rate: u32) -> Result<()> {
        Ok(())
    }

    /// Hand one chunk of packed stereo frames to the device, blocking until it
    /// is accepted.
    fn submit(&mut self, frames: &[u32]) -> Result<()>;

    /// Give the output channel back. Called on the drain thread when it exits.
    fn release(&mut self) {}
}

/// Shared handle to any `AudioSink` implementor.
///
/// The drain thread holds the lock for as long as it runs, so the sink
/// outlives restarts of the thread without being rebuilt.
#[derive(Clone)]
pub struct SinkHandle(pub Arc<Mutex<dyn AudioSink>>);

impl SinkHandle {
    /// Wrap any `AudioSink` in a `SinkHandle`.
    pub fn new<S: AudioSink>(sink: S) -> Self {
        Self(Arc::new(Mutex::new(sink)))
    }

    /// Wrap a sink the caller keeps a typed handle to (e.g. to inspect it in tests).
    pub fn from_shared<S: AudioSink>(sink: Arc<Mutex<S>>) -> Self {
        Self(sink)
    }
}

impl std::fmt::Debug for SinkHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkHandle").finish_non_exhaustive()
    }
}
