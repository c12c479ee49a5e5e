//! Tuner configuration: performance mode, speed/ratio trade-off, behaviour
//! counters and environment-variable overrides.
//!
//! The configuration is immutable after [`crate::tuner::Btune`] is attached
//! to a context; the only mutation path is [`BtuneConfig::with_env_overrides`],
//! applied exactly once at init. Invalid values are never fatal: they are
//! clamped or replaced by the default and reported through `log::warn!`.

use std::path::PathBuf;

// ── Environment variable names ───────────────────────────────────────────────

pub const ENV_TRADEOFF: &str = "BTUNE_TRADEOFF";
pub const ENV_PERF_MODE: &str = "BTUNE_PERF_MODE";
pub const ENV_MODELS_DIR: &str = "BTUNE_MODELS_DIR";
pub const ENV_USE_INFERENCE: &str = "BTUNE_USE_INFERENCE";
pub const ENV_TRACE: &str = "BTUNE_TRACE";

// ── Performance mode ─────────────────────────────────────────────────────────

/// Which measured times enter the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerfMode {
    /// Compression time plus transfer time.
    Comp,
    /// Transfer time plus decompression time.
    Decomp,
    /// All three terms.
    Balanced,
    /// No explicit preference; scored like [`PerfMode::Balanced`].
    Auto,
}

impl PerfMode {
    pub fn name(self) -> &'static str {
        match self {
            PerfMode::Comp => "COMP",
            PerfMode::Decomp => "DECOMP",
            PerfMode::Balanced => "BALANCED",
            PerfMode::Auto => "AUTO",
        }
    }

    /// Parses the spelling accepted by `BTUNE_PERF_MODE`.
    pub fn from_name(s: &str) -> Option<PerfMode> {
        match s.to_ascii_uppercase().as_str() {
            "COMP" => Some(PerfMode::Comp),
            "DECOMP" => Some(PerfMode::Decomp),
            "BALANCED" => Some(PerfMode::Balanced),
            "AUTO" => Some(PerfMode::Auto),
            _ => None,
        }
    }

    /// True when the score needs a decompression-time measurement.
    pub fn needs_dtime(self) -> bool {
        !matches!(self, PerfMode::Comp)
    }
}

// ── Trade-off band ───────────────────────────────────────────────────────────

/// The three trade-off bands. Band membership decides the admissible codec
/// set, the compression-level caps and the improvement predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Band {
    /// `tradeoff <= 1/3`: favour speed.
    LowCr,
    /// `1/3 < tradeoff <= 2/3`.
    Balanced,
    /// `tradeoff > 2/3`: favour ratio.
    HighCr,
}

impl Band {
    pub fn from_tradeoff(tradeoff: f64) -> Band {
        if tradeoff <= 1.0 / 3.0 {
            Band::LowCr
        } else if tradeoff <= 2.0 / 3.0 {
            Band::Balanced
        } else {
            Band::HighCr
        }
    }
}

// ── Behaviour ────────────────────────────────────────────────────────────────

/// What happens once the configured readapt cycles are exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatMode {
    /// Restart the full soft/wait/hard cycle.
    RepeatAll,
    /// Keep running soft readapts only.
    RepeatSoft,
    /// Stop tuning; keep emitting the winner.
    Stop,
}

/// Cadence of the search: how many waiting chunks separate readapts, how many
/// soft readapts run per hard one, and how many hard readapts run in total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Behaviour {
    pub nwaits_before_readapt: u32,
    pub nsofts_before_hard: u32,
    pub nhards_before_stop: u32,
    pub repeat_mode: RepeatMode,
}

impl Default for Behaviour {
    fn default() -> Self {
        Behaviour {
            nwaits_before_readapt: 1,
            nsofts_before_hard: 5,
            nhards_before_stop: 10,
            repeat_mode: RepeatMode::Stop,
        }
    }
}

// ── Configuration ────────────────────────────────────────────────────────────

/// Reference bandwidth of a 10 Gb/s link, in KB/s. The score converts stored
/// bytes into transfer seconds with this figure when none is supplied.
pub const BANDWIDTH_10GBPS_KB_S: f64 = 1_250_000.0;

/// Complete tuner configuration. Defaults match an interactive workload on a
/// fast link; every field can be overridden programmatically and a subset via
/// environment variables (see [`BtuneConfig::with_env_overrides`]).
#[derive(Debug, Clone)]
pub struct BtuneConfig {
    pub perf_mode: PerfMode,
    /// 0.0 = all speed, 1.0 = all ratio.
    pub tradeoff: f64,
    /// Reference I/O bandwidth in KB/s.
    pub bandwidth: f64,
    pub behaviour: Behaviour,
    /// Seed the winner from the parameters already present on the context.
    pub cparams_hint: bool,
    /// −1 = every chunk, 0 = never, k > 0 = first k chunks.
    pub use_inference: i32,
    pub models_dir: Option<PathBuf>,
}

impl Default for BtuneConfig {
    fn default() -> Self {
        BtuneConfig {
            perf_mode: PerfMode::Comp,
            tradeoff: 0.5,
            bandwidth: BANDWIDTH_10GBPS_KB_S,
            behaviour: Behaviour::default(),
            cparams_hint: false,
            use_inference: 0,
            models_dir: None,
        }
    }
}

impl BtuneConfig {
    pub fn band(&self) -> Band {
        Band::from_tradeoff(self.tradeoff)
    }

    /// Applies the `BTUNE_*` environment overrides and sanitises the result.
    /// Unparseable or out-of-range values keep the configured setting and are
    /// reported as warnings.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(raw) = std::env::var(ENV_TRADEOFF) {
            match raw.trim().parse::<f64>() {
                Ok(v) => self.tradeoff = v,
                Err(_) => log::warn!("ignoring {}={:?}: not a float", ENV_TRADEOFF, raw),
            }
        }
        if let Ok(raw) = std::env::var(ENV_PERF_MODE) {
            match PerfMode::from_name(&raw) {
                Some(mode) => self.perf_mode = mode,
                None => log::warn!("ignoring {}={:?}: unknown perf mode", ENV_PERF_MODE, raw),
            }
        }
        if let Ok(raw) = std::env::var(ENV_MODELS_DIR) {
            if !raw.is_empty() {
                self.models_dir = Some(PathBuf::from(raw));
            }
        }
        if let Ok(raw) = std::env::var(ENV_USE_INFERENCE) {
            match raw.trim().parse::<i32>() {
                Ok(v) => self.use_inference = v,
                Err(_) => log::warn!("ignoring {}={:?}: not an integer", ENV_USE_INFERENCE, raw),
            }
        }
        self.sanitise()
    }

    /// Clamps out-of-range values. Never fails.
    pub fn sanitise(mut self) -> Self {
        if !self.tradeoff.is_finite() || !(0.0..=1.0).contains(&self.tradeoff) {
            let clamped = if self.tradeoff.is_finite() {
                self.tradeoff.clamp(0.0, 1.0)
            } else {
                0.5
            };
            log::warn!(
                "tradeoff {} out of [0, 1]; clamped to {}",
                self.tradeoff,
                clamped
            );
            self.tradeoff = clamped;
        }
        if !self.bandwidth.is_finite() || self.bandwidth <= 0.0 {
            log::warn!(
                "bandwidth {} not positive; using {} KB/s",
                self.bandwidth,
                BANDWIDTH_10GBPS_KB_S
            );
            self.bandwidth = BANDWIDTH_10GBPS_KB_S;
        }
        if self.use_inference < -1 {
            self.use_inference = -1;
        }
        self
    }
}

/// True when `BTUNE_TRACE` is set to anything at all.
pub fn trace_enabled() -> bool {
    std::env::var_os(ENV_TRACE).is_some()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_edges() {
        assert_eq!(Band::from_tradeoff(0.0), Band::LowCr);
        assert_eq!(Band::from_tradeoff(1.0 / 3.0), Band::LowCr);
        assert_eq!(Band::from_tradeoff(0.34), Band::Balanced);
        assert_eq!(Band::from_tradeoff(2.0 / 3.0), Band::Balanced);
        assert_eq!(Band::from_tradeoff(0.67), Band::HighCr);
        assert_eq!(Band::from_tradeoff(1.0), Band::HighCr);
    }

    #[test]
    fn perf_mode_parsing() {
        assert_eq!(PerfMode::from_name("comp"), Some(PerfMode::Comp));
        assert_eq!(PerfMode::from_name("DECOMP"), Some(PerfMode::Decomp));
        assert_eq!(PerfMode::from_name("Balanced"), Some(PerfMode::Balanced));
        assert_eq!(PerfMode::from_name("fastest"), None);
    }

    #[test]
    fn auto_needs_dtime() {
        assert!(PerfMode::Auto.needs_dtime());
        assert!(PerfMode::Decomp.needs_dtime());
        assert!(!PerfMode::Comp.needs_dtime());
    }

    #[test]
    fn sanitise_clamps_tradeoff() {
        let cfg = BtuneConfig {
            tradeoff: 1.7,
            ..BtuneConfig::default()
        }
        .sanitise();
        assert_eq!(cfg.tradeoff, 1.0);

        let cfg = BtuneConfig {
            tradeoff: f64::NAN,
            ..BtuneConfig::default()
        }
        .sanitise();
        assert_eq!(cfg.tradeoff, 0.5);
    }

    #[test]
    fn sanitise_rejects_nonpositive_bandwidth() {
        let cfg = BtuneConfig {
            bandwidth: 0.0,
            ..BtuneConfig::default()
        }
        .sanitise();
        assert_eq!(cfg.bandwidth, BANDWIDTH_10GBPS_KB_S);
    }

    // One sequential test for all environment overrides: the variables are
    // process-global, so concurrent mutation would race.
    #[test]
    fn env_overrides_apply_and_reject_nonsense() {
        std::env::set_var(ENV_TRADEOFF, "0.9");
        std::env::set_var(ENV_PERF_MODE, "DECOMP");
        std::env::set_var(ENV_USE_INFERENCE, "3");
        let cfg = BtuneConfig::default().with_env_overrides();
        assert_eq!(cfg.tradeoff, 0.9);
        assert_eq!(cfg.perf_mode, PerfMode::Decomp);
        assert_eq!(cfg.use_inference, 3);

        std::env::set_var(ENV_TRADEOFF, "speedy");
        std::env::set_var(ENV_PERF_MODE, "fastest");
        let cfg = BtuneConfig::default().with_env_overrides();
        assert_eq!(cfg.tradeoff, 0.5);
        assert_eq!(cfg.perf_mode, PerfMode::Comp);

        std::env::remove_var(ENV_TRADEOFF);
        std::env::remove_var(ENV_PERF_MODE);
        std::env::remove_var(ENV_USE_INFERENCE);
        let cfg = BtuneConfig::default().with_env_overrides();
        assert_eq!(cfg.tradeoff, 0.5);
        assert_eq!(cfg.perf_mode, PerfMode::Comp);
    }

    #[test]
    fn default_behaviour() {
        let b = Behaviour::default();
        assert_eq!(b.nsofts_before_hard, 5);
        assert_eq!(b.nhards_before_stop, 10);
        assert_eq!(b.repeat_mode, RepeatMode::Stop);
    }
}
