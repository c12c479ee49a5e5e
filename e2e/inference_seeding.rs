//! End-to-end inference: classifier-driven proposals for the first chunks,
//! then majority-vote seeding of the search.

use std::path::Path;
use std::time::Instant;

use btune::config::{Behaviour, BtuneConfig, PerfMode, RepeatMode};
use btune::features::FEATURE_NAMES;
use btune::pipeline::{compress_chunk, Cctx, Dctx};
use btune::{Btune, Codec, Filter, SplitMode, Tuner};

// ─────────────────────────────────────────────────────────────────────────────
// Model fixtures
// ─────────────────────────────────────────────────────────────────────────────

/// Writes a classifier that always votes for category 0:
/// (lz4, shuffle, clevel 3, always).
fn write_constant_model(dir: &Path) {
    let metadata = serde_json::json!({
        "features": FEATURE_NAMES,
        "means": [1.0, 0.0, 0.0, 4.0, 65536.0],
        "stds": [1.0, 1.0, 1.0, 2.0, 32768.0],
        "categories": [
            {"codec": "lz4", "filter": "shuffle", "clevel": 3, "splitmode": "always"},
            {"codec": "zstd", "filter": "bitshuffle", "clevel": 5, "splitmode": "never"},
        ],
    });
    let model = serde_json::json!({
        "weights": [
            [0.0, 0.0, 0.0, 0.0, 0.0],
            [0.0, 0.0, 0.0, 0.0, 0.0],
        ],
        "bias": [1.0, 0.0],
    });
    std::fs::write(dir.join("metadata.json"), metadata.to_string()).unwrap();
    std::fs::write(dir.join("model.json"), model.to_string()).unwrap();
}

fn inference_config(models_dir: &Path, use_inference: i32) -> BtuneConfig {
    BtuneConfig {
        tradeoff: 0.5,
        perf_mode: PerfMode::Comp,
        behaviour: Behaviour {
            nwaits_before_readapt: 0,
            nsofts_before_hard: 2,
            nhards_before_stop: 1,
            repeat_mode: RepeatMode::Stop,
        },
        models_dir: Some(models_dir.to_path_buf()),
        use_inference,
        ..BtuneConfig::default()
    }
}

fn chunk(n: usize, index: usize) -> Vec<u8> {
    (0..n).map(|i| ((i + index * 13) / 32) as u8).collect()
}

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
// First k chunks from the model, then seeded search
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn first_chunks_come_from_the_model() {
    let dir = tempfile::tempdir().unwrap();
    write_constant_model(dir.path());

    let mut cctx = Cctx::new(4);
    let mut dctx = Dctx::new();
    let mut tuner = Btune::new(inference_config(dir.path(), 3), &cctx);

    for i in 0..3 {
        let data = chunk(32 * 1024, i);
        step(&mut tuner, &mut cctx, &mut dctx, &data);
        // Every proposal is the predicted tuple.
        assert_eq!(cctx.compcode, Codec::Lz4.id());
        assert_eq!(cctx.clevel, 3);
        assert_eq!(cctx.splitmode, SplitMode::Always);
        assert_eq!(
            cctx.filters[cctx.filters.len() - 1],
            Filter::Shuffle.id()
        );
    }
    assert_eq!(tuner.predictions_made(), 3);
    // Inference chunks never crown a winner.
    assert!(!tuner.best().is_measured());
}

#[test]
fn fourth_proposal_seeds_search_with_majority_tuple() {
    let dir = tempfile::tempdir().unwrap();
    write_constant_model(dir.path());

    let mut cctx = Cctx::new(4);
    let mut dctx = Dctx::new();
    let mut tuner = Btune::new(inference_config(dir.path(), 3), &cctx);

    for i in 0..3 {
        let data = chunk(32 * 1024, i);
        step(&mut tuner, &mut cctx, &mut dctx, &data);
    }

    // The 4th proposal comes from the search, restricted to the majority
    // tuple's codec and filter, with the level bracket around the vote.
    let data = chunk(32 * 1024, 3);
    step(&mut tuner, &mut cctx, &mut dctx, &data);
    assert_eq!(tuner.predictions_made(), 3, "inference ran past its budget");
    assert_eq!(cctx.compcode, Codec::Lz4.id());
    assert_eq!(cctx.filters[cctx.filters.len() - 1], Filter::Shuffle.id());
    assert!((2..=4).contains(&cctx.clevel));
    assert_eq!(cctx.splitmode, SplitMode::Always);
    // The first measured chunk seeds the winner.
    assert!(tuner.best().is_measured());
    assert_eq!(tuner.best().compcode, Codec::Lz4);

    // From here on the search only walks the seeded sets.
    for i in 4..60 {
        if tuner.stopped() {
            break;
        }
        let data = chunk(32 * 1024, i);
        step(&mut tuner, &mut cctx, &mut dctx, &data);
        assert_eq!(cctx.compcode, Codec::Lz4.id());
        assert!((2..=4).contains(&cctx.clevel) || cctx.clevel == 0);
    }
}

#[test]
fn inference_every_chunk_never_switches_to_search() {
    let dir = tempfile::tempdir().unwrap();
    write_constant_model(dir.path());

    let mut cctx = Cctx::new(4);
    let mut dctx = Dctx::new();
    let mut tuner = Btune::new(inference_config(dir.path(), -1), &cctx);

    for i in 0..20 {
        let data = chunk(32 * 1024, i);
        step(&mut tuner, &mut cctx, &mut dctx, &data);
        assert_eq!(cctx.compcode, Codec::Lz4.id());
        assert_eq!(cctx.clevel, 3);
    }
    assert_eq!(tuner.predictions_made(), 20);
    assert!(!tuner.best().is_measured());
}

#[test]
fn missing_models_dir_falls_back_to_search() {
    let dir = tempfile::tempdir().unwrap(); // no artifacts inside

    let mut cctx = Cctx::new(4);
    let mut dctx = Dctx::new();
    let mut tuner = Btune::new(inference_config(dir.path(), 3), &cctx);

    let data = chunk(32 * 1024, 0);
    step(&mut tuner, &mut cctx, &mut dctx, &data);
    assert_eq!(tuner.predictions_made(), 0);
    // Search proposals, not model output: the first measured chunk wins.
    assert!(tuner.best().is_measured());
}
