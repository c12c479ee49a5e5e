//! Adaptive compression-parameter tuning for block-based pipelines.
//!
//! For every chunk a pipeline compresses, the tuner proposes a parameter
//! tuple (codec, filter, split mode, compression level, shuffle lane width
//! and thread counts), observes the achieved ratio and timings, and refines
//! later proposals toward the configured speed/ratio trade-off.
//!
//! Two subsystems cooperate:
//!
//! * an exploratory [search](crate::search) state machine that sweeps the
//!   parameter space in hard and soft readapt cycles, and
//! * an [inference](crate::inference) front-end that, when per-dataset
//!   classifier artifacts are available, answers the first chunks directly
//!   from a model and then seeds the search with its majority vote.
//!
//! The crate also ships a reference [pipeline](crate::pipeline) (contexts,
//! codec registry, filters, chunk format) so the tuner can be exercised end
//! to end, plus a small demo binary.

pub mod config;
pub mod cparams;
pub mod entropy;
pub mod features;
pub mod inference;
pub mod pipeline;
pub mod score;
pub mod search;
pub mod trace;
pub mod tuner;

/// Tuner configuration surface.
pub use config::{Band, Behaviour, BtuneConfig, PerfMode, RepeatMode};
/// Candidate tuple vocabulary.
pub use cparams::{Codec, Cparams, Filter, SplitMode};
/// Entropy probe, also usable standalone.
pub use entropy::{estimated_cratio, ENTROPY_PROBE_ID};
/// The tuner and the plug-in contract it implements.
pub use tuner::{Btune, Tuner};

/// Reference pipeline entry points.
pub use pipeline::{compress_chunk, decompress_chunk, process_chunk, Cctx, Dctx};
