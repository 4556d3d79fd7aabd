//! Driver configuration (JSON file, camelCase keys).

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::buffering::DEFAULT_CAPACITY;
use crate::error::{DriverError, Result};

/// Frames handed to the sink per drain iteration.
pub const DEFAULT_CHUNK_FRAMES: usize = 512;

/// Bounded wait for the drain thread on stop/free.
pub const DEFAULT_JOIN_TIMEOUT_MS: u64 = 100;

const JOIN_TIMEOUT_ENV: &str = "RINGOUT_JOIN_TIMEOUT_MS";

/// Configuration for `RingOutDriver`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct DriverConfig {
    /// Output device name hint. The core ignores it; `CpalSink` uses it to pick a device.
    pub device: Option<String>,
    /// Output sample rate (Hz). Default: 44100.
    pub sample_rate: u32,
    /// Latency hint (ms). Accepted for interface compatibility, unused by the core.
    pub latency_ms: u32,
    /// Ring capacity in frames. Must be a power of two. Default: 8192.
    pub capacity_frames: usize,
    /// Frames per drain iteration. Default: 512.
    pub chunk_frames: usize,
    /// Whole chunks that must be buffered before audio (rather than silence)
    /// is submitted. Default: 1.
    pub underrun_threshold_chunks: usize,
    /// Upper bound on how long stop/free wait for the drain thread. Default: 100.
    pub join_timeout_ms: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: 44_100,
            latency_ms: 64,
            capacity_frames: DEFAULT_CAPACITY,
            chunk_frames: DEFAULT_CHUNK_FRAMES,
            underrun_threshold_chunks: 1,
            join_timeout_ms: DEFAULT_JOIN_TIMEOUT_MS,
        }
    }
}

impl DriverConfig {
    /// Clamp numeric fields into supported ranges and tidy the device name.
    ///
    /// Structural problems (capacity not a power of two, chunk larger than the
    /// ring) are left for [`validate`](Self::validate) to report.
    pub fn normalize(&mut self) {
        self.sample_rate = self.sample_rate.clamp(8_000, 192_000);
        self.latency_ms = self.latency_ms.clamp(1, 2_000);
        self.underrun_threshold_chunks = self.underrun_threshold_chunks.clamp(1, 16);
        self.join_timeout_ms = self.join_timeout_ms.clamp(1, 5_000);
        self.device = self
            .device
            .as_ref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
    }

    /// Check the ring geometry.
    ///
    /// # Errors
    /// `DriverError::InvalidConfig` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.capacity_frames == 0 || !self.capacity_frames.is_power_of_two() {
            return Err(DriverError::InvalidConfig(format!(
                "capacityFrames must be a non-zero power of two, got {}",
                self.capacity_frames
            )));
        }
        if self.chunk_frames == 0 {
            return Err(DriverError::InvalidConfig(
                "chunkFrames must be greater than zero".into(),
            ));
        }
        if self.threshold_frames() > self.capacity_frames {
            return Err(DriverError::InvalidConfig(format!(
                "chunkFrames × underrunThresholdChunks ({}) exceeds capacityFrames ({})",
                self.threshold_frames(),
                self.capacity_frames
            )));
        }
        Ok(())
    }

    /// Buffered frames required before the drain thread submits audio.
    pub fn threshold_frames(&self) -> usize {
        self.chunk_frames
            .saturating_mul(self.underrun_threshold_chunks.max(1))
    }

    /// Join timeout, honouring the `RINGOUT_JOIN_TIMEOUT_MS` override.
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(join_timeout_override().unwrap_or(self.join_timeout_ms))
    }

    /// Real-time length of one chunk at the configured sample rate.
    pub fn chunk_duration(&self) -> Duration {
        chunk_duration(self.chunk_frames, self.sample_rate)
    }
}

/// Real-time length of `frames` frames at `sample_rate`.
pub fn chunk_duration(frames: usize, sample_rate: u32) -> Duration {
    Duration::from_secs_f64(frames as f64 / sample_rate.max(1) as f64)
}

fn join_timeout_override() -> Option<u64> {
    static OVERRIDE: OnceLock<Option<u64>> = OnceLock::new();
    *OVERRIDE.get_or_init(|| {
        std::env::var(JOIN_TIMEOUT_ENV)
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(|v| v.clamp(1, 5_000))
    })
}

pub fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ringout")
            .join("config.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(|h| PathBuf::from(h).join(".config"))
                    .unwrap_or_else(|| PathBuf::from("."))
            })
            .join("ringout")
            .join("config.json")
    }
}

/// Load and normalise a config file. A missing file yields the defaults.
///
/// # Errors
/// `DriverError::Io` if the file exists but cannot be read,
/// `DriverError::Config` if it is not valid JSON.
pub fn load_config(path: &Path) -> Result<DriverConfig> {
    let mut config = match fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str::<DriverConfig>(&raw)?,
        Err(e) if e.kind() == ErrorKind::NotFound => DriverConfig::default(),
        Err(e) => return Err(e.into()),
    };
    config.normalize();
    Ok(config)
}

pub fn save_config(path: &Path, config: &DriverConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("ringout-config-{}-{name}", std::process::id()))
            .join("config.json")
    }

    #[test]
    fn defaults_are_valid() {
        let config = DriverConfig::default();
        config.validate().unwrap();
        assert_eq!(config.capacity_frames, 8192);
        assert_eq!(config.chunk_frames, 512);
        assert_eq!(config.threshold_frames(), 512);
    }

    #[test]
    fn rejects_bad_geometry() {
        let mut config = DriverConfig {
            capacity_frames: 6000,
            ..DriverConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(DriverError::InvalidConfig(_))
        ));

        config.capacity_frames = 1024;
        config.chunk_frames = 0;
        assert!(config.validate().is_err());

        config.chunk_frames = 512;
        config.underrun_threshold_chunks = 4;
        assert!(config.validate().is_err());
    }

    #[test]
    fn normalize_clamps_and_trims() {
        let mut config = DriverConfig {
            device: Some("   ".into()),
            sample_rate: 1,
            underrun_threshold_chunks: 0,
            join_timeout_ms: 0,
            ..DriverConfig::default()
        };
        config.normalize();
        assert_eq!(config.device, None);
        assert_eq!(config.sample_rate, 8_000);
        assert_eq!(config.underrun_threshold_chunks, 1);
        assert_eq!(config.join_timeout_ms, 1);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: DriverConfig =
            serde_json::from_str(r#"{"chunkFrames": 256, "device": "USB DAC"}"#).unwrap();
        assert_eq!(config.chunk_frames, 256);
        assert_eq!(config.device.as_deref(), Some("USB DAC"));
        assert_eq!(config.capacity_frames, 8192);
    }

    #[test]
    fn missing_file_loads_defaults() {
        let config = load_config(&temp_path("missing")).unwrap();
        assert_eq!(config, DriverConfig::default());
    }

    #[test]
    fn save_then_load_preserves_fields() {
        let path = temp_path("save");
        let config = DriverConfig {
            sample_rate: 48_000,
            chunk_frames: 1024,
            ..DriverConfig::default()
        };
        save_config(&path, &config).unwrap();
        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded, config);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let path = temp_path("malformed");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(load_config(&path), Err(DriverError::Config(_))));
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn chunk_duration_matches_sample_rate() {
        let d = chunk_duration(441, 44_100);
        assert!((d.as_secs_f64() - 0.010).abs() < 1e-6, "duration={d:?}");
    }
}
