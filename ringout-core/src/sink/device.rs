//! Output device sink via the cpal backend.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS), while an `AudioSink` has to move onto the drain thread. `CpalSink`
//! therefore never holds the stream itself: `reserve` spawns a small stream
//! thread that opens the device, plays, and parks until `release` tells it to
//! drop the stream. A sync oneshot channel carries open errors back to
//! `reserve`.
//!
//! Chunks travel to the output callback through an SPSC `ringbuf` of f32
//! samples sized for a few chunks. `submit` blocks while that ring is too full
//! to take the chunk and is woken by a tick the callback sends after each
//! period, which gives the drain thread the same blocking hand-off a hardware
//! DMA queue would.

use serde::{Deserialize, Serialize};

use crate::frame::frame_to_f32;

/// Metadata about an audio output device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Human-readable device name reported by the OS.
    pub name: String,
    /// Whether this is the system default output device.
    pub is_default: bool,
}

/// Chunks of headroom between `submit` and the output callback.
#[cfg_attr(not(feature = "audio-cpal"), allow(dead_code))]
const BRIDGE_CHUNKS: usize = 3;

/// Channels written to the device; frames are packed stereo.
#[cfg_attr(not(feature = "audio-cpal"), allow(dead_code))]
const OUTPUT_CHANNELS: usize = 2;

/// Expand packed frames into interleaved f32 samples, replacing `out`'s contents.
#[cfg_attr(not(feature = "audio-cpal"), allow(dead_code))]
fn frames_to_interleaved(frames: &[u32], out: &mut Vec<f32>) {
    out.clear();
    out.extend(frames.iter().flat_map(|&f| frame_to_f32(f)));
}

#[cfg(feature = "audio-cpal")]
mod backend {
    use std::thread::JoinHandle;
    use std::time::Duration;

    use cpal::{
        traits::{DeviceTrait, HostTrait, StreamTrait},
        FromSample, Sample, SampleFormat, SampleRate, SizedSample, StreamConfig,
    };
    use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
    use ringbuf::{
        traits::{Consumer, Observer, Producer, Split},
        HeapCons, HeapProd, HeapRb,
    };
    use tracing::{debug, error, info, warn};

    use super::{frames_to_interleaved, DeviceInfo, BRIDGE_CHUNKS, OUTPUT_CHANNELS};
    use crate::error::{DriverError, Result};
    use crate::sink::AudioSink;

    /// How long `submit` waits for the callback before declaring the stream stalled.
    const STALL_TIMEOUT: Duration = Duration::from_secs(2);

    /// Sink that plays chunks on a cpal output device.
    pub struct CpalSink {
        preferred_device: Option<String>,
        active: Option<ActiveStream>,
        scratch: Vec<f32>,
    }

    /// Handles to a running stream thread. Everything here is `Send`.
    struct ActiveStream {
        producer: HeapProd<f32>,
        drained_rx: Receiver<()>,
        shutdown_tx: Sender<()>,
        thread: JoinHandle<()>,
    }

    impl CpalSink {
        /// Sink for the named output device, or the default device when `None`
        /// or when no device of that name exists.
        pub fn new(preferred_device: Option<String>) -> Self {
            Self {
                preferred_device,
                active: None,
                scratch: Vec::new(),
            }
        }

        fn stop_stream(&mut self) {
            if let Some(active) = self.active.take() {
                drop(active.shutdown_tx);
                if active.thread.join().is_err() {
                    error!("cpal stream thread panicked");
                }
                debug!("output stream released");
            }
        }
    }

    impl AudioSink for CpalSink {
        fn reserve(&mut self, chunk_frames: usize, sample_rate: u32) -> Result<()> {
            self.stop_stream();

            let ring = HeapRb::<f32>::new(chunk_frames * OUTPUT_CHANNELS * BRIDGE_CHUNKS);
            let (producer, consumer) = ring.split();
            let (drained_tx, drained_rx) = bounded::<()>(1);
            let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
            let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<()>>();
            let preferred = self.preferred_device.clone();

            let thread = std::thread::Builder::new()
                .name("ringout-cpal".into())
                .spawn(move || {
                    let stream =
                        match open_stream(preferred.as_deref(), sample_rate, consumer, drained_tx)
                        {
                            Ok(s) => s,
                            Err(e) => {
                                let _ = open_tx.send(Err(e));
                                return;
                            }
                        };
                    let _ = open_tx.send(Ok(()));
                    // Park until release() drops the sender; the stream drops on this thread.
                    let _ = shutdown_rx.recv();
                    drop(stream);
                })?;

            match open_rx.recv() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    let _ = thread.join();
                    return Err(e);
                }
                Err(_) => {
                    let _ = thread.join();
                    return Err(DriverError::AudioStream(
                        "cpal stream thread died before opening the device".into(),
                    ));
                }
            }

            self.scratch = Vec::with_capacity(chunk_frames * OUTPUT_CHANNELS);
            self.active = Some(ActiveStream {
                producer,
                drained_rx,
                shutdown_tx,
                thread,
            });
            Ok(())
        }

        fn submit(&mut self, frames: &[u32]) -> Result<()> {
            let active = self.active.as_mut().ok_or_else(|| {
                DriverError::Sink("submit called before the output stream was reserved".into())
            })?;

            let needed = frames.len() * OUTPUT_CHANNELS;
            if needed > active.producer.capacity().get() {
                return Err(DriverError::Sink(format!(
                    "chunk of {} frames exceeds the output bridge",
                    frames.len()
                )));
            }

            while active.producer.vacant_len() < needed {
                match active.drained_rx.recv_timeout(STALL_TIMEOUT) {
                    Ok(()) => {}
                    Err(RecvTimeoutError::Timeout) => {
                        return Err(DriverError::Sink("output stream stalled".into()))
                    }
                    Err(RecvTimeoutError::Disconnected) => {
                        return Err(DriverError::AudioStream("output stream closed".into()))
                    }
                }
            }

            frames_to_interleaved(frames, &mut self.scratch);
            let pushed = active.producer.push_slice(&self.scratch);
            if pushed < self.scratch.len() {
                warn!(
                    dropped = self.scratch.len() - pushed,
                    "output bridge shrank under submit"
                );
            }
            Ok(())
        }

        fn release(&mut self) {
            self.stop_stream();
        }
    }

    impl Drop for CpalSink {
        fn drop(&mut self) {
            self.stop_stream();
        }
    }

    fn select_device(host: &cpal::Host, preferred: Option<&str>) -> Result<cpal::Device> {
        if let Some(preferred_name) = preferred {
            match host.output_devices() {
                Ok(mut devices) => {
                    let found = devices.find(|device| {
                        device
                            .name()
                            .map(|name| name == preferred_name)
                            .unwrap_or(false)
                    });
                    if let Some(device) = found {
                        return Ok(device);
                    }
                    warn!(
                        "preferred output device '{}' not found, falling back",
                        preferred_name
                    );
                }
                Err(e) => {
                    warn!("failed to list output devices while resolving preference: {e}");
                }
            }
        }

        if let Some(default) = host.default_output_device() {
            return Ok(default);
        }

        let mut devices = host
            .output_devices()
            .map_err(|e| DriverError::AudioDevice(e.to_string()))?;
        let fallback = devices.next().ok_or(DriverError::NoDefaultOutputDevice)?;
        warn!("no default output device, falling back to first available output");
        Ok(fallback)
    }

    fn open_stream(
        preferred: Option<&str>,
        sample_rate: u32,
        consumer: HeapCons<f32>,
        drained_tx: Sender<()>,
    ) -> Result<cpal::Stream> {
        let host = cpal::default_host();
        let device = select_device(&host, preferred)?;

        info!(
            device = device.name().unwrap_or_default().as_str(),
            sample_rate, "opening output device"
        );

        let supported = device
            .default_output_config()
            .map_err(|e| DriverError::AudioDevice(e.to_string()))?;

        let config = StreamConfig {
            channels: OUTPUT_CHANNELS as u16,
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = match supported.sample_format() {
            SampleFormat::F32 => build_stream::<f32>(&device, &config, consumer, drained_tx),
            SampleFormat::I16 => build_stream::<i16>(&device, &config, consumer, drained_tx),
            SampleFormat::U16 => build_stream::<u16>(&device, &config, consumer, drained_tx),
            fmt => {
                return Err(DriverError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }?;

        stream
            .play()
            .map_err(|e| DriverError::AudioStream(e.to_string()))?;
        Ok(stream)
    }

    fn build_stream<T>(
        device: &cpal::Device,
        config: &StreamConfig,
        mut consumer: HeapCons<f32>,
        drained_tx: Sender<()>,
    ) -> Result<cpal::Stream>
    where
        T: SizedSample + FromSample<f32>,
    {
        device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    for sample in data.iter_mut() {
                        // Shortfall plays as silence rather than stalling the device.
                        *sample = T::from_sample(consumer.try_pop().unwrap_or(0.0));
                    }
                    let _ = drained_tx.try_send(());
                },
                |err| error!("audio stream error: {err}"),
                None,
            )
            .map_err(|e| DriverError::AudioStream(e.to_string()))
    }

    /// List all available audio output devices on the system.
    ///
    /// Returns an empty `Vec` if no devices exist.
    pub fn list_output_devices() -> Vec<DeviceInfo> {
        let host = cpal::default_host();
        let default_name = host.default_output_device().and_then(|d| d.name().ok());

        match host.output_devices() {
            Ok(devices) => {
                let mut list = devices
                    .enumerate()
                    .map(|(idx, device)| {
                        let name = device
                            .name()
                            .unwrap_or_else(|_| format!("Output Device {}", idx + 1));
                        let is_default = default_name.as_deref() == Some(name.as_str());
                        DeviceInfo { name, is_default }
                    })
                    .collect::<Vec<_>>();
                list.sort_by_key(|d| (!d.is_default, d.name.to_ascii_lowercase()));
                list
            }
            Err(e) => {
                warn!("failed to enumerate output devices: {e}");
                default_name
                    .map(|name| {
                        vec![DeviceInfo {
                            name,
                            is_default: true,
                        }]
                    })
                    .unwrap_or_default()
            }
        }
    }
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
mod backend {
    use super::DeviceInfo;
    use crate::error::{DriverError, Result};
    use crate::sink::AudioSink;

    pub struct CpalSink {
        _preferred_device: Option<String>,
    }

    impl CpalSink {
        pub fn new(preferred_device: Option<String>) -> Self {
            Self {
                _preferred_device: preferred_device,
            }
        }
    }

    impl AudioSink for CpalSink {
        fn reserve(&mut self, _chunk_frames: usize, _sample_rate: u32) -> Result<()> {
            Err(DriverError::AudioStream(
                "compiled without audio-cpal feature".into(),
            ))
        }

        fn submit(&mut self, _frames: &[u32]) -> Result<()> {
            Err(DriverError::AudioStream(
                "compiled without audio-cpal feature".into(),
            ))
        }
    }

    pub fn list_output_devices() -> Vec<DeviceInfo> {
        vec![]
    }
}

pub use backend::{list_output_devices, CpalSink};
