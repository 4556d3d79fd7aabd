//! `NullSink` — discards audio at real-time pace.
//!
//! Stands in for hardware when no device is wanted (soak runs, CI). Each
//! `submit` sleeps for the chunk's playback time so the drain loop keeps the
//! cadence it would have against a real device.

use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::config::chunk_duration;
use crate::error::Result;
use crate::sink::AudioSink;

#[derive(Debug, Default)]
pub struct NullSink {
    sample_rate: u32,
    /// When false, submits return immediately (useful for unpaced tests).
    paced: bool,
    frames_submitted: u64,
    reservations: u32,
}

impl NullSink {
    /// A sink that sleeps one chunk duration per submit.
    pub fn paced() -> Self {
        Self {
            paced: true,
            ..Self::default()
        }
    }

    /// A sink that accepts chunks immediately.
    pub fn unpaced() -> Self {
        Self::default()
    }

    /// Total frames accepted across all runs.
    pub fn frames_submitted(&self) -> u64 {
        self.frames_submitted
    }

    /// How many times the channel has been reserved.
    pub fn reservations(&self) -> u32 {
        self.reservations
    }
}

impl AudioSink for NullSink {
    fn reserve(&mut self, chunk_frames: usize, sample_rate: u32) -> Result<()> {
        self.sample_rate = sample_rate;
        self.reservations += 1;
        debug!(chunk_frames, sample_rate, "NullSink reserved");
        Ok(())
    }

    fn submit(&mut self, frames: &[u32]) -> Result<()> {
        self.frames_submitted += frames.len() as u64;
        if self.paced {
            let period = if self.sample_rate == 0 {
                Duration::from_millis(1)
            } else {
                chunk_duration(frames.len(), self.sample_rate)
            };
            thread::sleep(period);
        }
        Ok(())
    }
}
