//! Demo binary: pushes a file (or synthetic data) chunk by chunk through the
//! reference pipeline with the adaptive tuner attached and reports what the
//! tuner converged on.
//!
//! Set `BTUNE_TRACE=1` (or pass `--trace`) to watch every step.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};

use btune::config::{Behaviour, BtuneConfig, PerfMode, RepeatMode};
use btune::features::synth_arange;
use btune::pipeline::{process_chunk, Cctx, Dctx};
use btune::Btune;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PerfModeArg {
    Comp,
    Decomp,
    Balanced,
    Auto,
}

impl From<PerfModeArg> for PerfMode {
    fn from(v: PerfModeArg) -> PerfMode {
        match v {
            PerfModeArg::Comp => PerfMode::Comp,
            PerfModeArg::Decomp => PerfMode::Decomp,
            PerfModeArg::Balanced => PerfMode::Balanced,
            PerfModeArg::Auto => PerfMode::Auto,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SyntheticArg {
    /// All-zero chunks (special-chunk path).
    Zeros,
    /// Integer ramp chunks.
    Arange,
    /// Partly repetitive, partly noisy chunks.
    Mixed,
}

/// Adaptive compression-parameter tuner demo.
#[derive(Debug, Parser)]
#[command(name = "btune", version, about)]
struct Args {
    /// Input file split into chunks; omit to use synthetic data.
    input: Option<PathBuf>,

    /// Synthetic data generator used when no input file is given.
    #[arg(long, value_enum, default_value = "mixed")]
    synthetic: SyntheticArg,

    /// Number of synthetic chunks to feed.
    #[arg(long, default_value_t = 64)]
    nchunks: usize,

    /// Chunk size in KiB.
    #[arg(long, default_value_t = 256)]
    chunk_kb: usize,

    /// Element width in bytes.
    #[arg(long, default_value_t = 4)]
    typesize: usize,

    /// Speed/ratio trade-off: 0.0 = speed, 1.0 = ratio.
    #[arg(long, default_value_t = 0.5)]
    tradeoff: f64,

    #[arg(long, value_enum, default_value = "comp")]
    perf_mode: PerfModeArg,

    /// Directory with classifier artifacts; enables inference.
    #[arg(long)]
    models_dir: Option<PathBuf>,

    /// Chunks answered by inference (-1 = all, 0 = none).
    #[arg(long, default_value_t = 0)]
    use_inference: i32,

    /// Print the per-step trace.
    #[arg(long)]
    trace: bool,
}

fn synthesize(kind: SyntheticArg, n: usize, typesize: usize, index: usize) -> Vec<u8> {
    match kind {
        SyntheticArg::Zeros => vec![0u8; n],
        SyntheticArg::Arange => synth_arange(n, typesize),
        SyntheticArg::Mixed => (0..n)
            .map(|i| {
                let x = i + index * 7919;
                if x % 64 < 48 {
                    (x / 97) as u8
                } else {
                    (x.wrapping_mul(2654435761)) as u8
                }
            })
            .collect(),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    if args.trace {
        std::env::set_var(btune::config::ENV_TRACE, "1");
    }
    let chunk_size = args.chunk_kb * 1024;
    if chunk_size == 0 {
        bail!("chunk size must be positive");
    }

    let chunks: Vec<Vec<u8>> = match &args.input {
        Some(path) => {
            let data = std::fs::read(path)
                .with_context(|| format!("reading {}", path.display()))?;
            if data.is_empty() {
                bail!("{} is empty", path.display());
            }
            data.chunks(chunk_size).map(<[u8]>::to_vec).collect()
        }
        None => (0..args.nchunks.max(1))
            .map(|i| synthesize(args.synthetic, chunk_size, args.typesize, i))
            .collect(),
    };

    let config = BtuneConfig {
        perf_mode: args.perf_mode.into(),
        tradeoff: args.tradeoff,
        behaviour: Behaviour {
            nwaits_before_readapt: 0,
            nsofts_before_hard: 3,
            nhards_before_stop: 3,
            repeat_mode: RepeatMode::Stop,
        },
        use_inference: args.use_inference,
        models_dir: args.models_dir.clone(),
        ..BtuneConfig::default()
    };

    let mut cctx = Cctx::new(args.typesize);
    let mut dctx = Dctx::new();
    Btune::attach(config, &mut cctx);

    let started = Instant::now();
    let mut in_bytes = 0usize;
    let mut out_bytes = 0usize;
    for chunk in &chunks {
        let compressed = process_chunk(&mut cctx, &mut dctx, chunk)
            .context("pipeline failed while compressing a chunk")?;
        in_bytes += chunk.len();
        // Probe-only proposals produce no bytes; count the reported size.
        out_bytes += compressed.len().max(cctx.output_bytes);
    }
    let elapsed = started.elapsed().as_secs_f64();

    println!(
        "chunks: {}   in: {:.2} MB   out: {:.2} MB   ratio: {:.2}x   wall: {:.2}s",
        chunks.len(),
        in_bytes as f64 / 1e6,
        out_bytes as f64 / 1e6,
        in_bytes as f64 / out_bytes.max(1) as f64,
        elapsed,
    );
    Ok(())
}
