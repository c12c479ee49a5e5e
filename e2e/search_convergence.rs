//! End-to-end search behaviour through the real pipeline.
//!
//! These tests attach a tuner to a compression context, stream chunks
//! through the reference pipeline, and check what the search converged on:
//! band-restricted codecs, capped levels, state coverage, and the terminal
//! STOP state.

use std::time::Instant;

use btune::config::{Behaviour, BtuneConfig, PerfMode, RepeatMode};
use btune::pipeline::{compress_chunk, Cctx, Dctx};
use btune::{Btune, Codec, Tuner};

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn config(tradeoff: f64, perf: PerfMode, behaviour: Behaviour) -> BtuneConfig {
    BtuneConfig {
        tradeoff,
        perf_mode: perf,
        behaviour,
        ..BtuneConfig::default()
    }
}

fn behaviour(nwaits: u32, nsofts: u32, nhards: u32) -> Behaviour {
    Behaviour {
        nwaits_before_readapt: nwaits,
        nsofts_before_hard: nsofts,
        nhards_before_stop: nhards,
        repeat_mode: RepeatMode::Stop,
    }
}

/// Partly repetitive, partly noisy chunk; different per index so the stream
/// is not degenerate.
fn mixed_chunk(n: usize, index: usize) -> Vec<u8> {
    (0..n)
        .map(|i| {
            let x = i + index * 7919;
            if x % 64 < 48 {
                (x / 97) as u8
            } else {
                x.wrapping_mul(2654435761) as u8
            }
        })
        .collect()
}

/// One full tuner step: proposal, compression, update.
fn step(tuner: &mut Btune, cctx: &mut Cctx, dctx: &mut Dctx, src: &[u8]) {
    tuner.next_blocksize(cctx);
    tuner.next_cparams(cctx, Some(dctx), src);
    cctx.nthreads = cctx.new_nthreads.max(1);
    dctx.nthreads = dctx.new_nthreads.max(1);
    let started = Instant::now();
    compress_chunk(cctx, src).expect("pipeline compress");
    tuner.update(cctx, Some(dctx), started.elapsed().as_secs_f64());
}

// ─────────────────────────────────────────────────────────────────────────────
// High-ratio trade-off: dictionary codecs, capped levels, terminal STOP
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn high_ratio_run_converges_on_dictionary_codecs() {
    let mut cctx = Cctx::new(4);
    let mut dctx = Dctx::new();
    let mut tuner = Btune::new(config(0.9, PerfMode::Comp, behaviour(0, 5, 1)), &cctx);

    for i in 0..600 {
        if tuner.stopped() {
            break;
        }
        let chunk = mixed_chunk(64 * 1024, i);
        step(&mut tuner, &mut cctx, &mut dctx, &chunk);
        let codec = Codec::from_id(cctx.compcode).expect("registered codec");
        assert!(
            matches!(codec, Codec::Zstd | Codec::Zlib),
            "out-of-band codec {} proposed",
            codec.name()
        );
    }

    assert!(tuner.stopped(), "search still in {}", tuner.state_name());
    assert!(tuner.best().clevel <= 6);
    assert!(matches!(tuner.best().compcode, Codec::Zstd | Codec::Zlib));
}

// ─────────────────────────────────────────────────────────────────────────────
// Balanced run: many hard cycles, every major state visited
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn balanced_run_visits_all_major_states_then_stops() {
    let mut cctx = Cctx::new(4);
    let mut dctx = Dctx::new();
    let mut tuner = Btune::new(config(0.5, PerfMode::Balanced, behaviour(0, 5, 11)), &cctx);

    let mut visited = std::collections::BTreeSet::new();
    for i in 0..4000 {
        if tuner.stopped() {
            break;
        }
        let chunk = mixed_chunk(32 * 1024, i % 7);
        tuner.next_blocksize(&mut cctx);
        tuner.next_cparams(&mut cctx, Some(&mut dctx), &chunk);
        visited.insert(tuner.state_name());
        cctx.nthreads = cctx.new_nthreads.max(1);
        dctx.nthreads = dctx.new_nthreads.max(1);
        let started = Instant::now();
        compress_chunk(&mut cctx, &chunk).expect("pipeline compress");
        tuner.update(&mut cctx, Some(&mut dctx), started.elapsed().as_secs_f64());
    }

    assert!(tuner.stopped(), "search still in {}", tuner.state_name());
    assert!(visited.contains("CODEC_FILTER"));
    assert!(visited.contains("CLEVEL"));
    // THREADS only has room to move on a multi-core host.
    if num_cpus::get() > 1 {
        assert!(visited.contains("THREADS"), "THREADS never proposed");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pure-speed trade-off: fast codec, low levels
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn speed_tradeoff_settles_on_fast_parameters() {
    let mut cctx = Cctx::new(4);
    let mut dctx = Dctx::new();
    let mut tuner = Btune::new(config(0.0, PerfMode::Comp, behaviour(0, 3, 2)), &cctx);

    for i in 0..600 {
        if tuner.stopped() {
            break;
        }
        let chunk = mixed_chunk(128 * 1024, i);
        step(&mut tuner, &mut cctx, &mut dctx, &chunk);
    }

    assert!(tuner.stopped());
    // BLOSCLZ has no backend here, so LZ4 is the admissible fast codec.
    assert_eq!(tuner.best().compcode, Codec::Lz4);
    assert!(tuner.best().clevel <= 3);
}

// ─────────────────────────────────────────────────────────────────────────────
// Once stopped, proposals and updates are no-ops
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn stopped_tuner_repeats_the_winner() {
    let mut cctx = Cctx::new(4);
    let mut dctx = Dctx::new();
    let mut tuner = Btune::new(config(0.5, PerfMode::Comp, behaviour(0, 1, 1)), &cctx);

    let chunk = mixed_chunk(64 * 1024, 1);
    for _ in 0..400 {
        if tuner.stopped() {
            break;
        }
        step(&mut tuner, &mut cctx, &mut dctx, &chunk);
    }
    assert!(tuner.stopped());

    let best_before = tuner.best().clone();
    for _ in 0..10 {
        step(&mut tuner, &mut cctx, &mut dctx, &chunk);
        assert_eq!(cctx.compcode, best_before.compcode.id());
        assert_eq!(cctx.clevel, best_before.clevel);
    }
    assert_eq!(tuner.best().score, best_before.score);
}
