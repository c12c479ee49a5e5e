//! End-to-end pipeline integrity while the tuner is live: every chunk the
//! tuner ever proposes parameters for must decompress back to its source,
//! and degenerate chunks must short-circuit without disturbing the search.

use btune::config::{Behaviour, BtuneConfig, PerfMode, RepeatMode};
use btune::pipeline::{decompress_chunk, process_chunk, Cctx, Dctx, CHUNK_HEADER_LEN};
use btune::Btune;

fn config(tradeoff: f64, perf: PerfMode) -> BtuneConfig {
    BtuneConfig {
        tradeoff,
        perf_mode: perf,
        behaviour: Behaviour {
            nwaits_before_readapt: 1,
            nsofts_before_hard: 2,
            nhards_before_stop: 2,
            repeat_mode: RepeatMode::Stop,
        },
        ..BtuneConfig::default()
    }
}

fn mixed_chunk(n: usize, index: usize) -> Vec<u8> {
    (0..n)
        .map(|i| {
            let x = i + index * 104_729;
            if x % 48 < 32 {
                (x / 61) as u8
            } else {
                x.wrapping_mul(2654435761) as u8
            }
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Every tuned chunk roundtrips
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn tuned_stream_roundtrips_under_every_tradeoff() {
    for tradeoff in [0.0, 0.5, 1.0] {
        let mut cctx = Cctx::new(4);
        let mut dctx = Dctx::new();
        Btune::attach(config(tradeoff, PerfMode::Comp), &mut cctx);

        for i in 0..120 {
            let chunk = mixed_chunk(96 * 1024, i);
            let compressed =
                process_chunk(&mut cctx, &mut dctx, &chunk).expect("pipeline compress");
            let back = decompress_chunk(&compressed, dctx.nthreads).expect("decompress");
            assert_eq!(back, chunk, "tradeoff {tradeoff}, chunk {i}");
        }
    }
}

#[test]
fn tuned_stream_roundtrips_in_balanced_mode() {
    let mut cctx = Cctx::new(8);
    let mut dctx = Dctx::new();
    Btune::attach(config(0.5, PerfMode::Balanced), &mut cctx);

    for i in 0..80 {
        let chunk = mixed_chunk(128 * 1024, i);
        let compressed = process_chunk(&mut cctx, &mut dctx, &chunk).expect("pipeline compress");
        let back = decompress_chunk(&compressed, dctx.nthreads).expect("decompress");
        assert_eq!(back, chunk, "chunk {i}");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Special chunks: all zeros collapse to a bare header, forever
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn zero_chunks_stay_special_for_the_whole_stream() {
    let mut cctx = Cctx::new(4);
    let mut dctx = Dctx::new();
    Btune::attach(config(0.5, PerfMode::Comp), &mut cctx);

    let zeros = vec![0u8; 1 << 20];
    for _ in 0..30 {
        let compressed = process_chunk(&mut cctx, &mut dctx, &zeros).expect("pipeline compress");
        assert_eq!(compressed.len(), CHUNK_HEADER_LEN);
        assert!(cctx.output_bytes <= cctx.header_overhead + cctx.typesize);
        assert_eq!(decompress_chunk(&compressed, 1).expect("decompress"), zeros);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// The tuner never proposes parameters the pipeline cannot execute
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn proposals_always_name_registered_codecs() {
    for perf in [PerfMode::Comp, PerfMode::Decomp, PerfMode::Balanced] {
        for tradeoff in [0.1, 0.5, 0.9] {
            let mut cctx = Cctx::new(4);
            let mut dctx = Dctx::new();
            Btune::attach(config(tradeoff, perf), &mut cctx);
            for i in 0..40 {
                let chunk = mixed_chunk(32 * 1024, i);
                process_chunk(&mut cctx, &mut dctx, &chunk)
                    .unwrap_or_else(|e| panic!("{} / {tradeoff}: {e}", cctx.compcode));
            }
        }
    }
}
