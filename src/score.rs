//! Scoring and the improvement oracle.
//!
//! A score is the estimated wall time to move one chunk through the system:
//! measured compression and decompression seconds plus the seconds needed to
//! push the compressed bytes over the reference link. Lower is better. The
//! oracle then decides whether a candidate measurement beats the incumbent
//! under the configured speed/ratio trade-off.

use crate::config::{Band, PerfMode};

/// Combined cost in seconds. `bandwidth` is in KB/s, matching the
/// configuration surface; the trace banner is the only place that speaks
/// GB/s.
pub fn score(perf_mode: PerfMode, ctime: f64, cbytes: usize, dtime: f64, bandwidth: f64) -> f64 {
    let reduced = cbytes as f64 / 1024.0;
    let transfer = reduced / bandwidth;
    match perf_mode {
        PerfMode::Comp => ctime + transfer,
        PerfMode::Decomp => transfer + dtime,
        PerfMode::Balanced | PerfMode::Auto => ctime + transfer + dtime,
    }
}

/// Achieved compression ratio.
pub fn cratio(sourcesize: usize, cbytes: usize) -> f64 {
    if cbytes == 0 {
        return 0.0;
    }
    sourcesize as f64 / cbytes as f64
}

/// Has the candidate improved on the incumbent?
///
/// `score_coef` is `best.score / candidate.score` (above 1.0 the candidate is
/// faster) and `cratio_coef` is `candidate.cratio / best.cratio` (above 1.0
/// the candidate packs tighter). Each band accepts a different region of the
/// (speed gain, ratio gain) plane; ties improve nothing.
pub fn has_improved(band: Band, score_coef: f64, cratio_coef: f64) -> bool {
    let s = score_coef;
    let cr = cratio_coef;
    match band {
        Band::LowCr => {
            (cr > 1.0 && s > 1.0)
                || (cr > 0.5 && s > 2.0)
                || (cr > 0.67 && s > 1.3)
                || (cr > 2.0 && s > 0.7)
        }
        Band::Balanced => {
            (cr > 1.0 && s > 1.0) || (cr > 1.1 && s > 0.8) || (cr > 1.3 && s > 0.5)
        }
        Band::HighCr => cr > 1.0,
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
