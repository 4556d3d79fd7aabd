//! Soak test: feed a sine tone through the driver for a while and report
//! the drain counters as JSON.

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use ringout_core::{
    config::{default_config_path, load_config},
    drain::DiagnosticsSnapshot,
    AudioDriver, CpalSink, NullSink, RingOutDriver, SinkHandle, WavSink,
};
use serde::Serialize;
use tracing::info;

const BLOCK_FRAMES: usize = 256;
const TONE_HZ: f32 = 440.0;
const TONE_AMPLITUDE: f32 = 0.25;

#[derive(Debug)]
enum SinkChoice {
    Null,
    Wav(PathBuf),
    Device,
}

#[derive(Debug)]
struct Args {
    seconds: u64,
    sink: SinkChoice,
    config: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Report {
    seconds: f64,
    sink: String,
    sample_rate: u32,
    capacity_frames: usize,
    chunk_frames: usize,
    diagnostics: DiagnosticsSnapshot,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("ringout_core=info")),
        )
        .init();

    if let Err(e) = run() {
        eprintln!("soak failed: {e:#}");
        std::process::exit(1);
    }
}

fn parse_args() -> anyhow::Result<Args> {
    let mut seconds = 5u64;
    let mut sink = SinkChoice::Null;
    let mut config = None;

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--seconds" => {
                let v = it.next().context("missing value for --seconds")?;
                seconds = v
                    .parse::<u64>()
                    .context("invalid value for --seconds")?
                    .clamp(1, 3_600);
            }
            "--wav" => {
                let v = it.next().context("missing value for --wav")?;
                sink = SinkChoice::Wav(PathBuf::from(v));
            }
            "--device" => sink = SinkChoice::Device,
            "--config" => {
                let v = it.next().context("missing value for --config")?;
                config = Some(PathBuf::from(v));
            }
            "--help" | "-h" => {
                println!(
                    "Usage: cargo run -p ringout-core --bin ringout-soak -- \\
  [--seconds <n>] [--wav <file.wav> | --device] [--config <file.json>]"
                );
                std::process::exit(0);
            }
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }

    Ok(Args {
        seconds,
        sink,
        config,
    })
}

fn run() -> anyhow::Result<()> {
    let args = parse_args()?;
    let config_path = args.config.unwrap_or_else(default_config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let (sink, sink_name) = match &args.sink {
        SinkChoice::Null => (SinkHandle::new(NullSink::paced()), "null".to_string()),
        SinkChoice::Wav(path) => (
            SinkHandle::new(WavSink::new(path).paced()),
            format!("wav:{}", path.display()),
        ),
        SinkChoice::Device => (
            SinkHandle::new(CpalSink::new(config.device.clone())),
            "device".to_string(),
        ),
    };

    let driver = RingOutDriver::init(config, sink)?;
    let sample_rate = driver.config().sample_rate;
    info!(seconds = args.seconds, sink = %sink_name, "soak started");

    let mut phase = 0f32;
    let step = TONE_HZ * std::f32::consts::TAU / sample_rate as f32;
    let mut block = [0i16; BLOCK_FRAMES * 2];

    let started = Instant::now();
    let run_for = Duration::from_secs(args.seconds);
    while started.elapsed() < run_for {
        if driver.write_available() <= BLOCK_FRAMES {
            thread::sleep(Duration::from_millis(1));
            continue;
        }
        for pair in block.chunks_exact_mut(2) {
            let s = (phase.sin() * TONE_AMPLITUDE * i16::MAX as f32) as i16;
            pair[0] = s;
            pair[1] = s;
            phase = (phase + step) % std::f32::consts::TAU;
        }
        driver.write_interleaved(&block);
    }

    driver.stop()?;
    let report = Report {
        seconds: started.elapsed().as_secs_f64(),
        sink: sink_name,
        sample_rate,
        capacity_frames: driver.buffer_size(),
        chunk_frames: driver.config().chunk_frames,
        diagnostics: driver.diagnostics_snapshot(),
    };
    driver.free();

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
