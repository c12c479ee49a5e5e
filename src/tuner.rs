//! The tuner itself: the plug-in record the pipeline drives once per chunk.
//!
//! Call order per chunk is fixed: [`Tuner::next_blocksize`], then
//! [`Tuner::next_cparams`], then the pipeline compresses, then
//! [`Tuner::update`] with the measured compression time. All work is
//! synchronous on the pipeline thread; dropping the tuner (or calling
//! [`crate::pipeline::Cctx::detach_tuner`]) releases everything it owns.

use std::time::Instant;

use crate::config::{self, BtuneConfig};
use crate::cparams::{capped_clevel, Codec, Cparams};
use crate::features::{self, RefSpeeds};
use crate::inference::{Classifier, ModelError, PredictionHistogram};
use crate::pipeline::codecs::{register_entropy_probe, CodecRegistry};
use crate::pipeline::{self, Cctx, Dctx};
use crate::score;
use crate::search::{Measurement, SearchCore};
use crate::trace;

// ── Plug-in contract ─────────────────────────────────────────────────────────

/// The operations a compression pipeline drives. One tuner instance belongs
/// to exactly one compression context; release is RAII.
pub trait Tuner {
    /// Chance to adjust the block size before a chunk. The adaptive tuner
    /// folds block size into its candidate tuples instead, so this is a
    /// no-op for it.
    fn next_blocksize(&mut self, cctx: &mut Cctx);

    /// Proposes parameters for the chunk in `src` by mutating the context.
    fn next_cparams(&mut self, cctx: &mut Cctx, dctx: Option<&mut Dctx>, src: &[u8]);

    /// Records the outcome of compressing the proposed chunk.
    fn update(&mut self, cctx: &mut Cctx, dctx: Option<&mut Dctx>, ctime: f64);
}

// ── Btune ────────────────────────────────────────────────────────────────────

/// Adaptive tuner state. Owned by one compression context; never shared.
pub struct Btune {
    config: BtuneConfig,
    search: SearchCore,
    classifier: Option<Classifier>,
    histogram: PredictionHistogram,
    /// Chunks still eligible for inference; −1 means every chunk.
    inference_count: i64,
    inference_ended: bool,
    ref_speeds: RefSpeeds,
    trace: bool,
    awaiting_update: bool,
    last_prediction: Option<usize>,
    current: Cparams,
}

impl Btune {
    /// Builds a tuner for `cctx`: applies environment overrides, registers
    /// the entropy probe codec, and loads classifier artifacts when a models
    /// directory is configured. Never fails; a missing or broken model only
    /// disables inference.
    pub fn new(config: BtuneConfig, cctx: &Cctx) -> Btune {
        let config = config.with_env_overrides();
        register_entropy_probe(CodecRegistry::global());

        let trace = config::trace_enabled();
        if trace {
            println!("{}", trace::render_banner(&config));
        }

        let classifier = if config.use_inference != 0 {
            match &config.models_dir {
                Some(dir) => match Classifier::load(dir) {
                    Ok(clf) => Some(clf),
                    Err(err @ ModelError::EmptyMetadata) => {
                        log::info!("{err}");
                        None
                    }
                    Err(err @ ModelError::Missing(_)) => {
                        log::trace!("{err}");
                        None
                    }
                    Err(err) => {
                        log::info!("inference disabled: {err}");
                        None
                    }
                },
                None => None,
            }
        } else {
            None
        };
        let inference_count = if classifier.is_some() {
            config.use_inference as i64
        } else {
            0
        };
        let histogram =
            PredictionHistogram::new(classifier.as_ref().map_or(0, Classifier::ncategories));

        let seed = if config.cparams_hint {
            Some(seed_from_ctx(cctx))
        } else {
            None
        };
        let max_threads = num_cpus::get().max(1);
        let search = SearchCore::new(&config, max_threads, cctx.typesize, seed);
        let current = search.next_cparams().clone();

        Btune {
            config,
            search,
            classifier,
            histogram,
            inference_count,
            inference_ended: false,
            ref_speeds: RefSpeeds::default(),
            trace,
            awaiting_update: false,
            last_prediction: None,
            current,
        }
    }

    /// Builds a tuner and installs it on the context.
    pub fn attach(config: BtuneConfig, cctx: &mut Cctx) {
        let tuner = Btune::new(config, cctx);
        cctx.tuner = Some(Box::new(tuner));
    }

    pub fn config(&self) -> &BtuneConfig {
        &self.config
    }

    /// The incumbent winning tuple.
    pub fn best(&self) -> &Cparams {
        &self.search.best
    }

    pub fn stopped(&self) -> bool {
        self.search.stopped()
    }

    pub fn state_name(&self) -> &'static str {
        self.search.state.name()
    }

    /// How many chunks were answered by the inference front-end so far.
    pub fn predictions_made(&self) -> u32 {
        self.histogram.total()
    }

    /// Once inference is exhausted, the majority vote narrows the search.
    fn maybe_seed_from_histogram(&mut self) {
        if self.inference_ended || self.histogram.total() == 0 {
            return;
        }
        self.inference_ended = true;
        let winner = self
            .histogram
            .most_predicted()
            .and_then(|cat| self.classifier.as_ref()?.category(cat)?.resolve());
        if let Some(p) = winner {
            self.search
                .seed_from_inference(p.codec, p.filter, p.clevel, p.splitmode);
        }
    }

    fn apply_to_ctx(&self, cctx: &mut Cctx, dctx: Option<&mut Dctx>) {
        let cp = &self.current;
        cctx.compcode = cp.compcode.id();
        cp.filter
            .fill_slots(cctx.typesize, &mut cctx.filters, &mut cctx.filters_meta);
        cctx.splitmode = cp.splitmode;
        cctx.clevel = cp.clevel;
        cctx.blocksize = cp.blocksize;
        cctx.shufflesize = cp.shufflesize;
        cctx.new_nthreads = cp.nthreads_comp;
        if let Some(dctx) = dctx {
            dctx.new_nthreads = cp.nthreads_decomp;
        }
    }
}

fn seed_from_ctx(cctx: &Cctx) -> Cparams {
    let codec = Codec::from_id(cctx.compcode).unwrap_or(Codec::Lz4);
    let mut cp = Cparams::unmeasured(codec, cctx.effective_filter(), cctx.typesize);
    cp.clevel = cctx.clevel.clamp(1, 9);
    cp.splitmode = cctx.splitmode;
    cp.blocksize = cctx.blocksize;
    cp.shufflesize = cctx.shufflesize.max(1);
    cp.nthreads_comp = cctx.nthreads.max(1);
    cp.nthreads_decomp = cctx.nthreads.max(1);
    cp
}

impl Tuner for Btune {
    fn next_blocksize(&mut self, _cctx: &mut Cctx) {}

    fn next_cparams(&mut self, cctx: &mut Cctx, dctx: Option<&mut Dctx>, src: &[u8]) {
        if self.awaiting_update {
            log::warn!("next_cparams called twice without an update in between");
        }
        self.awaiting_update = true;
        self.last_prediction = None;

        if let (true, Some(clf)) = (self.inference_count != 0, self.classifier.as_ref()) {
            let feats = features::extract(src, cctx.typesize, &mut self.ref_speeds);
            let cat = clf.predict(&feats);
            self.histogram.record(cat);
            match clf.category(cat).and_then(|c| c.resolve()) {
                Some(p) => {
                    if self.inference_count > 0 {
                        self.inference_count -= 1;
                    }
                    self.last_prediction = Some(cat);
                    let mut cp = self.search.best.clone();
                    cp.compcode = p.codec;
                    cp.filter = p.filter;
                    cp.clevel = capped_clevel(p.codec, self.config.band(), p.clevel);
                    cp.splitmode = p.splitmode;
                    self.current = cp;
                    self.apply_to_ctx(cctx, dctx);
                    return;
                }
                None => {
                    log::warn!("model category {cat} names unknown parameters; inference off");
                    self.classifier = None;
                    self.inference_count = 0;
                }
            }
        }

        self.maybe_seed_from_histogram();
        self.current = self.search.next_cparams().clone();
        self.apply_to_ctx(cctx, dctx);
    }

    fn update(&mut self, cctx: &mut Cctx, dctx: Option<&mut Dctx>, ctime: f64) {
        if !self.awaiting_update {
            log::warn!("update without a preceding next_cparams; step ignored");
            return;
        }
        self.awaiting_update = false;

        // Inference chunks bypass the search entirely.
        if let Some(cat) = self.last_prediction.take() {
            if self.trace {
                println!("{}", trace::render_inference_line(cat, &self.current));
            }
            return;
        }
        if self.search.stopped() {
            return;
        }

        let cbytes = cctx.output_bytes;
        let srcsize = cctx.srcsize;

        // Decompression is only timed when the mode scores it and the
        // pipeline kept a compressed copy around.
        let mut dtime = 0.0;
        let mut failed = false;
        if self.config.perf_mode.needs_dtime() {
            if let Some(chunk) = &cctx.last_compressed {
                let nthreads = dctx.map_or(1, |d| d.nthreads.max(1));
                let started = Instant::now();
                match pipeline::decompress_chunk(chunk, nthreads) {
                    Ok(_) => dtime = started.elapsed().as_secs_f64(),
                    Err(err) => {
                        log::warn!("measurement decompression failed: {err}");
                        failed = true;
                    }
                }
            }
        }

        let special = cbytes <= cctx.header_overhead + cctx.typesize;
        let m = Measurement {
            score: score::score(self.config.perf_mode, ctime, cbytes, dtime, self.config.bandwidth),
            cratio: score::cratio(srcsize, cbytes),
            ctime,
            dtime,
            special,
            failed,
        };

        let state = self.search.state;
        let readapt = self.search.readapt_from;
        let winner = self.search.update(&m);

        if self.trace {
            let mut cp = self.current.clone();
            cp.score = m.score;
            cp.cratio = m.cratio;
            println!("{}", trace::render_line(&cp, state, readapt, winner));
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
