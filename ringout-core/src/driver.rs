//! `RingOutDriver` — driver interface and drain-thread lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! RingOutDriver::init()   → ring allocated, drain thread spawned, state = Running
//!     └─► stop()          → running=false, bounded join, state = Stopped
//!         └─► start()     → fresh drain thread, state = Running
//!             └─► free()  → running=false, bounded join, ring released
//! ```
//!
//! The state lives in an explicit [`DrainState`] guarded by a mutex, so the
//! check and the transition happen under one lock. Calling `start`/`stop` in
//! the wrong state returns an error and changes nothing.
//!
//! ## Bounded join
//!
//! `stop` and `free` wait at most `join_timeout` for the drain thread, which
//! may be parked inside a blocking `AudioSink::submit`. A thread that overruns
//! is not killed. It keeps its own `Arc`s to the ring and sink, so memory
//! stays valid until it exits, and `start` refuses to spawn a second thread
//! until it has.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::{
    buffering::{chunk::SilenceChunk, FrameRing},
    config::DriverConfig,
    drain::{self, DiagnosticsSnapshot, DrainContext, DrainDiagnostics, Drainer},
    error::{DriverError, Result},
    events::{DriverStatus, DriverStatusEvent},
    frame::{frames_from_bytes, pack_stereo},
    sink::SinkHandle,
};

/// Identifier reported by [`AudioDriver::ident`].
pub const DRIVER_IDENT: &str = "ringout";

/// Broadcast channel capacity for status events.
const BROADCAST_CAP: usize = 64;

/// Frames staged on the stack per ring write when decoding bytes or samples.
const STAGE_FRAMES: usize = 256;

/// The operations the surrounding audio subsystem calls on an output driver.
///
/// Construction and teardown are inherent to each driver
/// (see [`RingOutDriver::init`] and [`RingOutDriver::free`]).
pub trait AudioDriver: Send + Sync {
    /// Short fixed identifier for this driver.
    fn ident(&self) -> &'static str;

    /// Queue interleaved packed-stereo frames given as raw bytes.
    ///
    /// Returns the number of frames accepted. Never waits on the drain thread.
    fn write(&self, buf: &[u8]) -> usize;

    /// Halt the drain thread (bounded wait).
    fn stop(&self) -> Result<()>;

    /// Spawn a fresh drain thread after a `stop`.
    fn start(&self) -> Result<()>;

    /// Whether the drain loop has been asked to keep running. Cheap and possibly stale.
    fn alive(&self) -> bool;

    /// Record the caller's non-blocking preference.
    fn set_nonblocking(&self, enabled: bool);

    /// Whether the driver takes f32 samples. This driver only takes packed `i16` stereo.
    fn uses_float_samples(&self) -> bool {
        false
    }

    /// Free ring capacity, in frames.
    fn write_available(&self) -> usize;

    /// Total ring capacity, in frames.
    fn buffer_size(&self) -> usize;
}

/// Lifecycle state of the drain thread as seen by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainState {
    Running,
    Stopped,
}

/// Lives on the drain thread's stack. Dropping it disconnects the exit
/// channel, and on a panic it also clears `running` so `alive()` stops
/// reporting a dead thread.
struct ExitGuard {
    running: Arc<AtomicBool>,
    _exit_tx: Sender<()>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.running.store(false, Ordering::Release);
        }
    }
}

struct Lifecycle {
    state: DrainState,
    /// Current drain thread, or one that overran its stop timeout.
    thread: Option<DrainThread>,
}

struct DrainThread {
    handle: JoinHandle<()>,
    /// Never sent on; disconnects when the thread's closure returns or unwinds.
    exited: Receiver<()>,
}

impl DrainThread {
    /// Wait up to `timeout` for the thread to finish. Returns whether it did.
    fn wait_exit(&self, timeout: Duration) -> bool {
        match self.exited.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => false,
        }
    }

    fn has_exited(&self) -> bool {
        self.handle.is_finished() || self.wait_exit(Duration::ZERO)
    }

    fn join(self) -> Result<()> {
        self.handle.join().map_err(|_| DriverError::DrainPanicked)
    }
}

/// Ring-buffer audio output driver.
///
/// `RingOutDriver` is `Send + Sync`: the producer calls `write*` from its own
/// thread while control calls may come from another. Only one thread should
/// write at a time; the ring is single-producer.
pub struct RingOutDriver {
    config: DriverConfig,
    ring: Arc<FrameRing>,
    silence: Arc<SilenceChunk>,
    sink: SinkHandle,
    /// `true` while the drain loop should keep iterating.
    running: Arc<AtomicBool>,
    /// Stored for interface compatibility; `write` does not consult it.
    nonblocking: AtomicBool,
    lifecycle: Mutex<Lifecycle>,
    status: Arc<Mutex<DriverStatus>>,
    status_tx: broadcast::Sender<DriverStatusEvent>,
    diagnostics: Arc<DrainDiagnostics>,
    destroyed: bool,
}

impl RingOutDriver {
    /// Allocate the ring and silence chunk and spawn the drain thread.
    ///
    /// `config.device` and `config.latency_ms` are hints for the sink and host;
    /// the driver itself does not use them.
    ///
    /// # Errors
    /// - `DriverError::InvalidConfig` for an unusable ring geometry.
    /// - `DriverError::Allocation` if storage cannot be reserved.
    /// - `DriverError::Io` if the drain thread cannot be spawned.
    pub fn init(mut config: DriverConfig, sink: SinkHandle) -> Result<Self> {
        config.normalize();
        config.validate()?;

        let ring = Arc::new(FrameRing::new(config.capacity_frames)?);
        let silence = Arc::new(SilenceChunk::new(config.chunk_frames)?);
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);

        let driver = Self {
            config,
            ring,
            silence,
            sink,
            running: Arc::new(AtomicBool::new(false)),
            nonblocking: AtomicBool::new(false),
            lifecycle: Mutex::new(Lifecycle {
                state: DrainState::Stopped,
                thread: None,
            }),
            status: Arc::new(Mutex::new(DriverStatus::Stopped)),
            status_tx,
            diagnostics: Arc::new(DrainDiagnostics::default()),
            destroyed: false,
        };

        {
            let mut lifecycle = driver.lifecycle.lock();
            driver.launch(&mut lifecycle)?;
        }

        info!(
            capacity_frames = driver.config.capacity_frames,
            chunk_frames = driver.config.chunk_frames,
            sample_rate = driver.config.sample_rate,
            "driver initialised"
        );
        Ok(driver)
    }

    /// Stop the drain thread (bounded wait) and release the driver.
    ///
    /// A drain thread that does not exit in time is detached; it holds its own
    /// references to the ring and sink and drops them when it finishes.
    pub fn free(mut self) {
        self.teardown();
    }

    /// Queue packed stereo frames. Returns the number of frames accepted.
    pub fn write_frames(&self, frames: &[u32]) -> usize {
        let written = self.ring.write(frames);
        self.diagnostics
            .frames_written
            .fetch_add(written, Ordering::Relaxed);
        written
    }

    /// Queue interleaved `[l, r, l, r, ...]` samples. A trailing odd sample is ignored.
    ///
    /// Returns the number of frames accepted.
    pub fn write_interleaved(&self, samples: &[i16]) -> usize {
        self.write_staged(samples.chunks_exact(2).map(|lr| pack_stereo(lr[0], lr[1])))
    }

    fn write_staged(&self, frames: impl Iterator<Item = u32>) -> usize {
        let mut stage = [0u32; STAGE_FRAMES];
        let mut filled = 0;
        let mut total = 0;
        for frame in frames {
            stage[filled] = frame;
            filled += 1;
            if filled == STAGE_FRAMES {
                total += self.write_frames(&stage);
                filled = 0;
            }
        }
        if filled > 0 {
            total += self.write_frames(&stage[..filled]);
        }
        total
    }

    /// Whether the caller asked for non-blocking writes. Writes never block either way.
    pub fn is_nonblocking(&self) -> bool {
        self.nonblocking.load(Ordering::Relaxed)
    }

    /// Lifecycle state as tracked by the controller.
    pub fn state(&self) -> DrainState {
        self.lifecycle.lock().state
    }

    /// Frames currently buffered and not yet drained.
    pub fn buffered_frames(&self) -> usize {
        self.ring.readable()
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Current driver status (snapshot).
    pub fn status(&self) -> DriverStatus {
        *self.status.lock()
    }

    /// Subscribe to live status change events.
    pub fn subscribe_status(&self) -> broadcast::Receiver<DriverStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Snapshot of drain counters for observability.
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    /// Spawn a drain thread. Caller holds the lifecycle lock and has checked
    /// that no previous thread is alive.
    fn launch(&self, lifecycle: &mut Lifecycle) -> Result<()> {
        self.diagnostics.reset();
        self.running.store(true, Ordering::Release);

        let ctx = DrainContext {
            drainer: Drainer::new(
                Arc::clone(&self.ring),
                Arc::clone(&self.silence),
                Arc::clone(&self.diagnostics),
                self.config.threshold_frames(),
            ),
            sink: self.sink.clone(),
            running: Arc::clone(&self.running),
            sample_rate: self.config.sample_rate,
            status: Arc::clone(&self.status),
            status_tx: self.status_tx.clone(),
        };
        let (exit_tx, exited) = bounded::<()>(0);

        // Published before the spawn so a failed sink reservation on the new
        // thread cannot be overwritten by this Running event.
        self.set_status(DriverStatus::Running, None);

        let spawned = std::thread::Builder::new()
            .name("ringout-drain".into())
            .spawn(move || {
                let _exit_guard = ExitGuard {
                    running: Arc::clone(&ctx.running),
                    _exit_tx: exit_tx,
                };
                drain::run(ctx);
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.running.store(false, Ordering::Release);
                self.set_status(DriverStatus::Stopped, Some(e.to_string()));
                error!("failed to spawn drain thread: {e}");
                return Err(e.into());
            }
        };

        lifecycle.thread = Some(DrainThread { handle, exited });
        lifecycle.state = DrainState::Running;
        Ok(())
    }

    fn teardown(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;

        let timeout = self.config.join_timeout();
        self.running.store(false, Ordering::Release);

        let lifecycle = self.lifecycle.get_mut();
        lifecycle.state = DrainState::Stopped;
        if let Some(thread) = lifecycle.thread.take() {
            if thread.wait_exit(timeout) {
                if thread.join().is_err() {
                    error!("drain thread panicked before teardown");
                }
            } else {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "drain thread still inside the sink at teardown; detaching it"
                );
            }
        }

        self.set_status(DriverStatus::Destroyed, None);
        info!("driver freed");
    }

    fn set_status(&self, new_status: DriverStatus, detail: Option<String>) {
        *self.status.lock() = new_status;
        let _ = self.status_tx.send(DriverStatusEvent {
            status: new_status,
            detail,
        });
    }
}

impl AudioDriver for RingOutDriver {
    fn ident(&self) -> &'static str {
        DRIVER_IDENT
    }

    fn write(&self, buf: &[u8]) -> usize {
        self.write_staged(frames_from_bytes(buf))
    }

    /// A drain thread that panicked is reaped and logged; the driver still
    /// ends up stopped and the call succeeds.
    ///
    /// # Errors
    /// `DriverError::NotRunning` if already stopped.
    fn stop(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state == DrainState::Stopped {
            return Err(DriverError::NotRunning);
        }

        lifecycle.state = DrainState::Stopped;
        self.running.store(false, Ordering::Release);
        self.set_status(DriverStatus::Stopped, None);

        let timeout = self.config.join_timeout();
        if let Some(thread) = lifecycle.thread.take() {
            if thread.wait_exit(timeout) {
                match thread.join() {
                    Ok(()) => info!("drain thread stopped"),
                    Err(e) => error!("drain thread had already died: {e}"),
                }
            } else {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "drain thread did not exit within timeout; leaving it to finish"
                );
                lifecycle.thread = Some(thread);
            }
        }
        Ok(())
    }

    /// # Errors
    /// - `DriverError::AlreadyRunning` if the drain thread is running.
    /// - `DriverError::DrainStillActive` if a previous thread overran its stop
    ///   timeout and has not exited yet.
    /// - `DriverError::DrainPanicked` if reaping the previous thread revealed
    ///   a panic. The next `start` proceeds normally.
    /// - `DriverError::Io` if the thread cannot be spawned.
    fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state == DrainState::Running {
            return Err(DriverError::AlreadyRunning);
        }

        if let Some(previous) = lifecycle.thread.take() {
            if !previous.has_exited() {
                lifecycle.thread = Some(previous);
                return Err(DriverError::DrainStillActive);
            }
            previous.join()?;
        }

        self.launch(&mut lifecycle)?;
        info!("drain thread restarted");
        Ok(())
    }

    fn alive(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn set_nonblocking(&self, enabled: bool) {
        self.nonblocking.store(enabled, Ordering::Relaxed);
        debug!(enabled, "nonblocking flag set (writes never block)");
    }

    fn write_available(&self) -> usize {
        self.ring.writable()
    }

    fn buffer_size(&self) -> usize {
        self.ring.capacity()
    }
}

impl Drop for RingOutDriver {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for RingOutDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingOutDriver")
            .field("config", &self.config)
            .field("ring", &self.ring)
            .field("running", &self.running.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Free a driver if there is one. `None` is a no-op.
pub fn free_driver(driver: Option<RingOutDriver>) {
    if let Some(driver) = driver {
        driver.free();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::NullSink;

    fn test_config() -> DriverConfig {
        DriverConfig {
            capacity_frames: 1024,
            chunk_frames: 64,
            sample_rate: 48_000,
            ..DriverConfig::default()
        }
    }

    #[test]
    fn reports_fixed_interface_values() {
        let driver = RingOutDriver::init(test_config(), SinkHandle::new(NullSink::paced())).unwrap();
        assert_eq!(driver.ident(), "ringout");
        assert!(!driver.uses_float_samples());
        assert_eq!(driver.buffer_size(), 1024);
        assert_eq!(driver.state(), DrainState::Running);
        assert!(driver.alive());
        driver.free();
    }

    #[test]
    fn nonblocking_flag_is_stored_only() {
        let driver = RingOutDriver::init(test_config(), SinkHandle::new(NullSink::paced())).unwrap();
        driver.stop().unwrap();
        driver.set_nonblocking(true);
        assert!(driver.is_nonblocking());
        // Writes behave the same: accepted in full, no waiting.
        assert_eq!(driver.write_frames(&[1; 100]), 100);
        assert_eq!(driver.write_available(), 1024 - 100);
        driver.free();
    }

    #[test]
    fn byte_write_packs_native_endian_frames() {
        let driver = RingOutDriver::init(test_config(), SinkHandle::new(NullSink::paced())).unwrap();
        driver.stop().unwrap();

        let mut bytes = Vec::new();
        for f in 0..300u32 {
            bytes.extend_from_slice(&f.to_ne_bytes());
        }
        bytes.push(0xFF);

        assert_eq!(driver.write(&bytes), 300);
        assert_eq!(driver.buffered_frames(), 300);
        assert_eq!(driver.diagnostics_snapshot().frames_written, 300);

        let mut out = vec![0u32; 300];
        driver.ring.copy_out(0, &mut out);
        assert_eq!(out, (0..300).collect::<Vec<u32>>());
        driver.free();
    }

    #[test]
    fn interleaved_write_packs_pairs() {
        let driver = RingOutDriver::init(test_config(), SinkHandle::new(NullSink::paced())).unwrap();
        driver.stop().unwrap();

        assert_eq!(driver.write_interleaved(&[1, -1, 2, -2, 3]), 2);
        let mut out = [0u32; 2];
        driver.ring.copy_out(0, &mut out);
        assert_eq!(out, [pack_stereo(1, -1), pack_stereo(2, -2)]);
        driver.free();
    }

    #[test]
    fn invalid_config_is_rejected_before_allocation() {
        let config = DriverConfig {
            capacity_frames: 1000,
            ..DriverConfig::default()
        };
        let err = RingOutDriver::init(config, SinkHandle::new(NullSink::paced())).unwrap_err();
        assert!(matches!(err, DriverError::InvalidConfig(_)));
    }

    #[test]
    fn free_none_is_noop() {
        free_driver(None);
    }
}
