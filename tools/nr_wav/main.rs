//! Offline WAV denoiser.
//!
//! ```text
//! nr_wav <input.wav> <output.wav> [--config settings.json] [--hold]
//! ```
//! Each channel runs through its own engine. The first `training_demand` samples of the file
//! must be noise only. The output is 32-bit float and shorter than the input by the engine's
//! one-hop latency.

use anyhow::{bail, Context, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use lmmse_nr::activity::ConstantActivity;
use lmmse_nr::dsp::{NoiseReductionEngine, NoiseReductionSettings};
use log::info;
use std::path::PathBuf;

const BLOCK_FRAMES: usize = 4096;

struct Args {
    input: PathBuf,
    output: PathBuf,
    config: Option<PathBuf>,
    hold: bool,
}

fn parse_args() -> Result<Args> {
    let mut positional = Vec::new();
    let mut config = None;
    let mut hold = false;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let path = args.next().context("--config needs a path")?;
                config = Some(PathBuf::from(path));
            }
            "--hold" => hold = true,
            _ => positional.push(PathBuf::from(arg)),
        }
    }
    if positional.len() != 2 {
        bail!("usage: nr_wav <input.wav> <output.wav> [--config settings.json] [--hold]");
    }
    let output = positional.pop().context("missing output path")?;
    let input = positional.pop().context("missing input path")?;
    Ok(Args {
        input,
        output,
        config,
        hold,
    })
}

fn read_samples(reader: WavReader<std::io::BufReader<std::fs::File>>) -> Result<Vec<f32>> {
    let spec = reader.spec();
    match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to decode float samples"),
        SampleFormat::Int => {
            let scale = 1.0 / (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<std::result::Result<Vec<_>, _>>()
                .context("failed to decode integer samples")
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    lmmse_nr::debug::init_logger();

    let args = parse_args()?;
    let settings = match &args.config {
        Some(path) => NoiseReductionSettings::from_json_file(path)
            .with_context(|| format!("failed to load settings '{}'", path.display()))?,
        None => NoiseReductionSettings::default(),
    };

    let reader = WavReader::open(&args.input)
        .with_context(|| format!("failed to open '{}'", args.input.display()))?;
    let spec = reader.spec();
    let channels = spec.channels as usize;
    if channels == 0 {
        bail!("'{}' has no channels", args.input.display());
    }
    let sample_rate = spec.sample_rate as f32;
    let interleaved = read_samples(reader)?;
    info!(
        "{}: {} Hz, {} channel(s), {} frames",
        args.input.display(),
        spec.sample_rate,
        channels,
        interleaved.len() / channels
    );

    let mut demand = 0;
    let mut outputs = Vec::with_capacity(channels);
    for ch in 0..channels {
        let mut engine = NoiseReductionEngine::new(
            sample_rate,
            settings.clone(),
            Box::new(ConstantActivity::new(0.0)),
        )
        .context("failed to create noise reduction engine")?;
        engine.set_hold(args.hold);
        demand = engine.config().training_demand;

        let channel: Vec<f32> = interleaved.iter().skip(ch).step_by(channels).copied().collect();
        let mut out = Vec::with_capacity(channel.len());
        for block in channel.chunks(BLOCK_FRAMES) {
            engine.process(block, &mut out);
            lmmse_nr::debug::drain_to_log();
        }
        let snapshot = engine.snapshot();
        info!(
            "channel {}: {} samples out, {}",
            ch,
            out.len(),
            serde_json::to_string(&snapshot)?
        );
        outputs.push(out);
    }

    let frames = outputs.iter().map(Vec::len).min().unwrap_or(0);
    if frames == 0 {
        bail!(
            "input too short: the first {} samples per channel are needed to learn the noise",
            demand
        );
    }

    let out_spec = WavSpec {
        channels: spec.channels,
        sample_rate: spec.sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(&args.output, out_spec)
        .with_context(|| format!("failed to create '{}'", args.output.display()))?;
    for i in 0..frames {
        for out in &outputs {
            writer.write_sample(out[i])?;
        }
    }
    writer.finalize().context("failed to finalize output WAV")?;
    info!("wrote {} frames to {}", frames, args.output.display());
    Ok(())
}
