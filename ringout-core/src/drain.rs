//! Drain loop run on the dedicated output thread.
//!
//! ## Per iteration
//!
//! ```text
//! 1. Snapshot read_pos (own cursor) and acquire-load write_pos
//! 2. available = (write - read) & mask
//! 3. available <  threshold → submit the silence chunk, read_pos unchanged
//!    available >= threshold → gather one chunk at read_pos, submit it,
//!                             then publish read_pos + chunk
//! 4. Loop while `running`
//! ```
//!
//! `AudioSink::submit` blocks until the device takes the chunk, and that is
//! the only thing pacing the loop. There is no sleep on the normal path.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::thread;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info, info_span, warn};

use crate::buffering::{chunk::SilenceChunk, FrameRing};
use crate::config::chunk_duration;
use crate::events::{DriverStatus, DriverStatusEvent};
use crate::sink::{AudioSink, SinkHandle};

/// Counters shared between the producer, the drain thread and observers.
///
/// Purely observational: nothing in the driver reads them to make decisions.
#[derive(Debug, Default)]
pub struct DrainDiagnostics {
    pub frames_written: AtomicUsize,
    pub chunks_emitted: AtomicUsize,
    pub silence_chunks: AtomicUsize,
    pub sink_errors: AtomicUsize,
}

impl DrainDiagnostics {
    pub fn reset(&self) {
        self.frames_written.store(0, Ordering::Relaxed);
        self.chunks_emitted.store(0, Ordering::Relaxed);
        self.silence_chunks.store(0, Ordering::Relaxed);
        self.sink_errors.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            frames_written: self.frames_written.load(Ordering::Relaxed),
            chunks_emitted: self.chunks_emitted.load(Ordering::Relaxed),
            silence_chunks: self.silence_chunks.load(Ordering::Relaxed),
            sink_errors: self.sink_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub frames_written: usize,
    pub chunks_emitted: usize,
    pub silence_chunks: usize,
    pub sink_errors: usize,
}

/// What a single drain iteration handed to the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// One chunk of buffered audio; the read cursor advanced.
    Audio,
    /// Underrun: the silence chunk; the read cursor did not move.
    Silence,
    /// The sink rejected the chunk; the read cursor did not move.
    SinkError,
}

/// Consumer half of the driver: owns the read cursor for the life of one thread.
pub struct Drainer {
    ring: Arc<FrameRing>,
    silence: Arc<SilenceChunk>,
    diagnostics: Arc<DrainDiagnostics>,
    threshold_frames: usize,
    /// One chunk of gathered audio, allocated once per thread.
    scratch: Vec<u32>,
}

impl Drainer {
    pub fn new(
        ring: Arc<FrameRing>,
        silence: Arc<SilenceChunk>,
        diagnostics: Arc<DrainDiagnostics>,
        threshold_frames: usize,
    ) -> Self {
        let chunk_frames = silence.len();
        Self {
            ring,
            silence,
            diagnostics,
            threshold_frames: threshold_frames.max(chunk_frames),
            scratch: vec![0; chunk_frames],
        }
    }

    pub fn chunk_frames(&self) -> usize {
        self.scratch.len()
    }

    /// Run exactly one iteration of the drain loop against `sink`.
    pub fn drain_once(&mut self, sink: &mut dyn AudioSink) -> DrainOutcome {
        let read = self.ring.read_cursor();
        let write = self.ring.write_cursor();
        let available = self.ring.available_to_read(read, write);

        if available < self.threshold_frames {
            if let Err(e) = sink.submit(self.silence.frames()) {
                return self.sink_failed(e);
            }
            self.diagnostics
                .silence_chunks
                .fetch_add(1, Ordering::Relaxed);
            return DrainOutcome::Silence;
        }

        self.ring.copy_out(read, &mut self.scratch);
        if let Err(e) = sink.submit(&self.scratch) {
            return self.sink_failed(e);
        }
        self.ring.commit_read(read.wrapping_add(self.scratch.len()));
        self.diagnostics
            .chunks_emitted
            .fetch_add(1, Ordering::Relaxed);
        DrainOutcome::Audio
    }

    fn sink_failed(&self, e: crate::error::DriverError) -> DrainOutcome {
        let count = self.diagnostics.sink_errors.fetch_add(1, Ordering::Relaxed) + 1;
        // Log the first failure and then every 100th so a dead device does not flood the log.
        if count == 1 || count % 100 == 0 {
            warn!(error = %e, sink_errors = count, "sink rejected chunk");
        }
        DrainOutcome::SinkError
    }
}

/// All context the drain thread needs, passed as one struct so the spawn closure stays tidy.
pub struct DrainContext {
    pub drainer: Drainer,
    pub sink: SinkHandle,
    pub running: Arc<AtomicBool>,
    pub sample_rate: u32,
    pub status: Arc<Mutex<DriverStatus>>,
    pub status_tx: broadcast::Sender<DriverStatusEvent>,
}

/// Run the drain loop until `ctx.running` becomes false.
pub fn run(mut ctx: DrainContext) {
    let chunk_frames = ctx.drainer.chunk_frames();
    let span = info_span!("drain", chunk_frames, sample_rate = ctx.sample_rate);
    let _enter = span.enter();

    // Held for the whole run.
    let mut sink = ctx.sink.0.lock();

    if let Err(e) = sink.reserve(chunk_frames, ctx.sample_rate) {
        error!("failed to reserve output channel: {e}");
        ctx.running.store(false, Ordering::Release);
        *ctx.status.lock() = DriverStatus::Error;
        let _ = ctx.status_tx.send(DriverStatusEvent {
            status: DriverStatus::Error,
            detail: Some(e.to_string()),
        });
        return;
    }
    info!("drain thread started");

    let error_backoff = chunk_duration(chunk_frames, ctx.sample_rate);

    while ctx.running.load(Ordering::Acquire) {
        if ctx.drainer.drain_once(&mut *sink) == DrainOutcome::SinkError {
            // The failed submit did not block, so keep the device's cadence by hand.
            thread::sleep(error_backoff);
        }
    }

    sink.release();

    let snap = ctx.drainer.diagnostics.snapshot();
    debug!(
        chunks_emitted = snap.chunks_emitted,
        silence_chunks = snap.silence_chunks,
        sink_errors = snap.sink_errors,
        "drain thread exiting"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DriverError, Result};

    /// Records every chunk it is handed.
    #[derive(Default)]
    struct RecordingSink {
        chunks: Vec<Vec<u32>>,
        fail: bool,
    }

    impl AudioSink for RecordingSink {
        fn submit(&mut self, frames: &[u32]) -> Result<()> {
            if self.fail {
                return Err(DriverError::Sink("unplugged".into()));
            }
            self.chunks.push(frames.to_vec());
            Ok(())
        }
    }

    fn drainer(capacity: usize, chunk: usize, threshold: usize) -> (Arc<FrameRing>, Drainer) {
        let ring = Arc::new(FrameRing::new(capacity).unwrap());
        let drainer = Drainer::new(
            Arc::clone(&ring),
            Arc::new(SilenceChunk::new(chunk).unwrap()),
            Arc::new(DrainDiagnostics::default()),
            threshold,
        );
        (ring, drainer)
    }

    #[test]
    fn buffered_audio_drains_in_two_chunks() {
        let (ring, mut drainer) = drainer(8192, 512, 512);
        let mut sink = RecordingSink::default();
        ring.write(&[0x1234_5678; 1024]);

        assert_eq!(drainer.drain_once(&mut sink), DrainOutcome::Audio);
        assert_eq!(ring.read_cursor(), 512);
        assert_eq!(ring.readable(), 512);

        assert_eq!(drainer.drain_once(&mut sink), DrainOutcome::Audio);
        assert_eq!(ring.read_cursor(), 1024);
        assert_eq!(ring.readable(), 0);

        assert_eq!(sink.chunks.len(), 2);
        assert!(sink
            .chunks
            .iter()
            .all(|c| c.len() == 512 && c.iter().all(|&f| f == 0x1234_5678)));
    }

    #[test]
    fn empty_ring_emits_exact_silence() {
        let (ring, mut drainer) = drainer(8192, 512, 512);
        let mut sink = RecordingSink::default();

        assert_eq!(drainer.drain_once(&mut sink), DrainOutcome::Silence);
        assert_eq!(sink.chunks, vec![vec![0u32; 512]]);
        assert_eq!(ring.read_cursor(), 0);
    }

    #[test]
    fn partial_chunk_is_held_back() {
        let (ring, mut drainer) = drainer(1024, 64, 64);
        let mut sink = RecordingSink::default();
        ring.write(&[7; 63]);

        assert_eq!(drainer.drain_once(&mut sink), DrainOutcome::Silence);
        assert_eq!(ring.read_cursor(), 0);
        assert_eq!(ring.readable(), 63);

        ring.write(&[7]);
        assert_eq!(drainer.drain_once(&mut sink), DrainOutcome::Audio);
        assert_eq!(sink.chunks[1], vec![7; 64]);
    }

    #[test]
    fn higher_threshold_waits_for_more_chunks() {
        let (ring, mut drainer) = drainer(1024, 64, 128);
        let mut sink = RecordingSink::default();
        ring.write(&[1; 100]);

        assert_eq!(drainer.drain_once(&mut sink), DrainOutcome::Silence);
        ring.write(&[1; 28]);
        assert_eq!(drainer.drain_once(&mut sink), DrainOutcome::Audio);
        assert_eq!(ring.readable(), 64);
    }

    #[test]
    fn chunk_gathers_across_wrap() {
        let (ring, mut drainer) = drainer(16, 8, 8);
        let mut sink = RecordingSink::default();
        ring.write(&[0; 12]);
        ring.commit_read(12);

        let input: Vec<u32> = (1..=8).collect();
        ring.write(&input);
        assert_eq!(drainer.drain_once(&mut sink), DrainOutcome::Audio);
        assert_eq!(sink.chunks[0], input);
        assert_eq!(ring.read_cursor(), 4);
    }

    #[test]
    fn sink_error_keeps_read_cursor() {
        let (ring, mut drainer) = drainer(1024, 64, 64);
        let mut sink = RecordingSink {
            fail: true,
            ..RecordingSink::default()
        };
        ring.write(&[3; 64]);

        assert_eq!(drainer.drain_once(&mut sink), DrainOutcome::SinkError);
        assert_eq!(ring.read_cursor(), 0);
        assert_eq!(drainer.diagnostics.snapshot().sink_errors, 1);

        sink.fail = false;
        assert_eq!(drainer.drain_once(&mut sink), DrainOutcome::Audio);
        assert_eq!(sink.chunks[0], vec![3; 64]);
    }

    #[test]
    fn diagnostics_count_each_outcome() {
        let (ring, mut drainer) = drainer(1024, 64, 64);
        let mut sink = RecordingSink::default();
        drainer.drain_once(&mut sink);
        ring.write(&[1; 64]);
        drainer.drain_once(&mut sink);

        let snap = drainer.diagnostics.snapshot();
        assert_eq!(snap.silence_chunks, 1);
        assert_eq!(snap.chunks_emitted, 1);

        drainer.diagnostics.reset();
        assert_eq!(drainer.diagnostics.snapshot().chunks_emitted, 0);
    }
}
