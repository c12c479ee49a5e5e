//! One-line-per-step trace rendering.
//!
//! Enabled by `BTUNE_TRACE`; a banner with the session settings is printed
//! once, then every tuner step appends one fixed-width row. Output goes to
//! stdout so it can be piped next to the application's own logging.

use crate::config::BtuneConfig;
use crate::cparams::Cparams;
use crate::search::{Readapt, State, Winner};

/// Column header, also the width reference for [`render_line`].
pub const TRACE_HEADER: &str = "|    Codec   |   Filter   | Split | C.Level | Blocksize | Shufflesize | C.Threads | D.Threads |    Score   |  C.Ratio  |    State     | Readapt | Winner |";

/// Session banner. The bandwidth is shown in GB/s for readability even
/// though the score works in KB/s.
pub fn render_banner(config: &BtuneConfig) -> String {
    let gb_s = config.bandwidth / (1024.0 * 1024.0);
    format!(
        "Btune tracing: perf_mode={} tradeoff={:.2} bandwidth={:.2} GB/s inference={}\n{}",
        config.perf_mode.name(),
        config.tradeoff,
        gb_s,
        config.use_inference,
        TRACE_HEADER,
    )
}

/// One step row for the given candidate and verdict.
pub fn render_line(cp: &Cparams, state: State, readapt: Readapt, winner: Winner) -> String {
    format!(
        "| {:>10} | {:>10} | {:>5} | {:>7} | {:>9} | {:>11} | {:>9} | {:>9} | {:>10.3e} | {:>9.2} | {:>12} | {:>7} | {:>6} |",
        cp.compcode.name(),
        cp.filter.name(),
        cp.splitmode.name(),
        cp.clevel,
        cp.blocksize,
        cp.shufflesize,
        cp.nthreads_comp,
        cp.nthreads_decomp,
        cp.score,
        cp.cratio,
        state.name(),
        readapt.name(),
        winner.symbol(),
    )
}

/// Row for a chunk handled by the inference front-end.
pub fn render_inference_line(category: usize, cp: &Cparams) -> String {
    format!(
        "Inference category={} codec={} filter={} clevel={} splitmode={}",
        category,
        cp.compcode.name(),
        cp.filter.name(),
        cp.clevel,
        cp.splitmode.name(),
    )
}

// ── Tests ────────────────────────────────────────────────────────────────────
