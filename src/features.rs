//! Chunk feature extraction for the inference front-end.
//!
//! The feature vector is intentionally cheap: one entropy-probe pass over
//! the chunk plus two reference speeds measured once per tuner on synthetic
//! chunks of the same size. The reference speeds go through the regular
//! pipeline compress path with the probe codec selected, so they include the
//! same dispatch overhead a real chunk pays.

use std::time::Instant;

use crate::entropy;
use crate::pipeline::codecs::{register_entropy_probe, CodecRegistry};
use crate::pipeline::{compress_chunk, Cctx};

pub const NUM_FEATURES: usize = 5;

/// Names in vector order; model metadata must declare the same layout.
pub const FEATURE_NAMES: [&str; NUM_FEATURES] = [
    "entropy_cratio",
    "zeros_speed",
    "arange_speed",
    "typesize",
    "chunksize",
];

#[derive(Debug, Clone, Copy)]
pub struct Features {
    pub entropy_cratio: f64,
    /// Probe throughput over an all-zeros chunk, bytes per second.
    pub zeros_speed: f64,
    /// Probe throughput over a synthetic ramp chunk, bytes per second.
    pub arange_speed: f64,
    pub typesize: f64,
    pub chunksize: f64,
}

impl Features {
    pub fn as_array(&self) -> [f64; NUM_FEATURES] {
        [
            self.entropy_cratio,
            self.zeros_speed,
            self.arange_speed,
            self.typesize,
            self.chunksize,
        ]
    }
}

/// Lazily measured reference speeds, owned by the tuner and reused for every
/// later chunk.
#[derive(Debug, Default)]
pub struct RefSpeeds {
    zeros: Option<f64>,
    arange: Option<f64>,
}

/// Synthetic ramp of `n` bytes: consecutive integers of width `typesize`,
/// little endian.
pub fn synth_arange(n: usize, typesize: usize) -> Vec<u8> {
    let typesize = typesize.clamp(1, 8);
    let mut out = Vec::with_capacity(n);
    let mut value: u64 = 0;
    while out.len() < n {
        let bytes = value.to_le_bytes();
        let take = typesize.min(n - out.len());
        out.extend_from_slice(&bytes[..take]);
        value = value.wrapping_add(1);
    }
    out
}

/// One probe pass through the pipeline, timed. Returns bytes per second.
fn probe_speed(buf: &[u8]) -> f64 {
    register_entropy_probe(CodecRegistry::global());
    let mut cctx = Cctx::new(1);
    cctx.compcode = entropy::ENTROPY_PROBE_ID;
    let started = Instant::now();
    let _ = compress_chunk(&mut cctx, buf);
    let secs = started.elapsed().as_secs_f64().max(1e-9);
    buf.len() as f64 / secs
}

/// Computes the feature vector for `src`, measuring the reference speeds on
/// first use.
pub fn extract(src: &[u8], typesize: usize, speeds: &mut RefSpeeds) -> Features {
    let zeros_speed = *speeds
        .zeros
        .get_or_insert_with(|| probe_speed(&vec![0u8; src.len().max(1)]));
    let arange_speed = *speeds
        .arange
        .get_or_insert_with(|| probe_speed(&synth_arange(src.len().max(1), typesize)));
    Features {
        entropy_cratio: entropy::estimated_cratio(src),
        zeros_speed,
        arange_speed,
        typesize: typesize.max(1) as f64,
        chunksize: src.len() as f64,
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arange_has_expected_shape() {
        let v = synth_arange(16, 4);
        assert_eq!(v.len(), 16);
        assert_eq!(&v[..8], &[0, 0, 0, 0, 1, 0, 0, 0]);
    }

    #[test]
    fn arange_handles_ragged_tail() {
        assert_eq!(synth_arange(7, 4).len(), 7);
        assert_eq!(synth_arange(0, 4).len(), 0);
    }

    #[test]
    fn reference_speeds_are_cached() {
        let mut speeds = RefSpeeds::default();
        let data = vec![42u8; 32 * 1024];
        let a = extract(&data, 4, &mut speeds);
        let b = extract(&data, 4, &mut speeds);
        assert_eq!(a.zeros_speed, b.zeros_speed);
        assert_eq!(a.arange_speed, b.arange_speed);
        assert!(a.zeros_speed > 0.0);
    }

    #[test]
    fn vector_layout_matches_names() {
        let mut speeds = RefSpeeds::default();
        let data = vec![0u8; 4096];
        let f = extract(&data, 8, &mut speeds);
        let arr = f.as_array();
        assert_eq!(arr.len(), FEATURE_NAMES.len());
        assert_eq!(arr[3], 8.0);
        assert_eq!(arr[4], 4096.0);
        assert!(arr[0] >= 30.0); // zeros chunk
    }
}
