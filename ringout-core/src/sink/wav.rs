//! `WavSink` — records every submitted chunk to a 16-bit stereo WAV file.
//!
//! By default submits return at once, so the drain loop runs flat out and
//! writes underrun silence as fast as it can; use [`WavSink::paced`] to sleep
//! one chunk duration per submit the way a device would. Either way the file
//! holds exactly what the drain thread emitted.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::thread;

use hound::{SampleFormat, WavSpec, WavWriter};
use tracing::{error, info};

use crate::config::chunk_duration;
use crate::error::{DriverError, Result};
use crate::frame::unpack_stereo;
use crate::sink::AudioSink;

pub struct WavSink {
    path: PathBuf,
    writer: Option<WavWriter<BufWriter<File>>>,
    frames_written: u64,
    sample_rate: u32,
    paced: bool,
}

impl WavSink {
    /// Sink writing to `path`. The file is created on the first `reserve`,
    /// truncating any previous contents; later reservations append.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            writer: None,
            frames_written: 0,
            sample_rate: 0,
            paced: false,
        }
    }

    /// Sleep for each chunk's playback time after writing it.
    pub fn paced(mut self) -> Self {
        self.paced = true;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Flush the header and close the file. Safe to call more than once.
    pub fn finalize(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
            info!(
                path = %self.path.display(),
                frames = self.frames_written,
                "WAV capture finalized"
            );
        }
        Ok(())
    }
}

impl AudioSink for WavSink {
    fn reserve(&mut self, _chunk_frames: usize, sample_rate: u32) -> Result<()> {
        self.sample_rate = sample_rate;
        if self.writer.is_some() {
            return Ok(());
        }

        let spec = WavSpec {
            channels: 2,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let writer = if self.frames_written == 0 {
            WavWriter::create(&self.path, spec)?
        } else {
            let writer = WavWriter::append(&self.path)?;
            if writer.spec().sample_rate != sample_rate {
                return Err(DriverError::Sink(format!(
                    "{} was recorded at {} Hz, cannot append at {} Hz",
                    self.path.display(),
                    writer.spec().sample_rate,
                    sample_rate
                )));
            }
            writer
        };
        self.writer = Some(writer);
        Ok(())
    }

    fn submit(&mut self, frames: &[u32]) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| DriverError::Sink("WAV sink used before reserve".into()))?;

        for &frame in frames {
            let (l, r) = unpack_stereo(frame);
            writer.write_sample(l)?;
            writer.write_sample(r)?;
        }
        self.frames_written += frames.len() as u64;
        if self.paced {
            thread::sleep(chunk_duration(frames.len(), self.sample_rate));
        }
        Ok(())
    }

    fn release(&mut self) {
        if let Err(e) = self.finalize() {
            error!("failed to finalize WAV capture: {e}");
        }
    }
}

impl Drop for WavSink {
    fn drop(&mut self) {
        if let Err(e) = self.finalize() {
            error!("failed to finalize WAV capture on drop: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::pack_stereo;

    fn temp_wav(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("ringout-wav-{}-{name}.wav", std::process::id()))
    }

    #[test]
    fn writes_interleaved_pcm() {
        let path = temp_wav("basic");
        let mut sink = WavSink::new(&path);
        sink.reserve(2, 22_050).unwrap();
        sink.submit(&[pack_stereo(1, -1), pack_stereo(300, -300)])
            .unwrap();
        sink.release();

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().sample_rate, 22_050);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![1, -1, 300, -300]);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn second_reservation_appends() {
        let path = temp_wav("append");
        let mut sink = WavSink::new(&path);
        sink.reserve(1, 8_000).unwrap();
        sink.submit(&[pack_stereo(7, 7)]).unwrap();
        sink.release();
        sink.reserve(1, 8_000).unwrap();
        sink.submit(&[pack_stereo(9, 9)]).unwrap();
        sink.release();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.len(), 4);
        assert_eq!(sink.frames_written(), 2);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn submit_before_reserve_fails() {
        let mut sink = WavSink::new(temp_wav("unreserved"));
        assert!(matches!(sink.submit(&[0]), Err(DriverError::Sink(_))));
    }
}
