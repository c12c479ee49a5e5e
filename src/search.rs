//! Exploratory search over the compression-parameter space.
//!
//! The search is a state machine cycling CODEC_FILTER, SHUFFLE_SIZE,
//! THREADS, CLEVEL and MEMCPY, separated by WAITING periods and terminated
//! by STOP. A hard readapt walks the whole cycle with a coarse step; a soft
//! readapt only refines the compression level. Every probed candidate is
//! scored by the caller and either replaces the incumbent winner or steers
//! the walk direction.

use crate::config::{Band, Behaviour, BtuneConfig, PerfMode, RepeatMode};
use crate::cparams::{capped_clevel, Codec, Cparams, Filter, SplitMode, MAX_SHUFFLE};
use crate::pipeline::codecs::CodecRegistry;
use crate::score;

pub const SOFT_STEP: usize = 1;
pub const HARD_STEP: usize = 2;

// ── Vocabulary ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    CodecFilter,
    ShuffleSize,
    Threads,
    Clevel,
    Memcpy,
    Waiting,
    Stop,
}

impl State {
    pub fn name(self) -> &'static str {
        match self {
            State::CodecFilter => "CODEC_FILTER",
            State::ShuffleSize => "SHUFFLE_SIZE",
            State::Threads => "THREADS",
            State::Clevel => "CLEVEL",
            State::Memcpy => "MEMCPY",
            State::Waiting => "WAITING",
            State::Stop => "STOP",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readapt {
    Hard,
    Soft,
    Wait,
}

impl Readapt {
    pub fn name(self) -> &'static str {
        match self {
            Readapt::Hard => "HARD",
            Readapt::Soft => "SOFT",
            Readapt::Wait => "WAIT",
        }
    }
}

/// Per-step verdict shown in the trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    Improved,
    NotImproved,
    Special,
}

impl Winner {
    pub fn symbol(self) -> char {
        match self {
            Winner::Improved => 'W',
            Winner::NotImproved => '-',
            Winner::Special => 'S',
        }
    }
}

/// What the pipeline measured for the candidate that was just used.
#[derive(Debug, Clone, Copy)]
pub struct Measurement {
    pub score: f64,
    pub cratio: f64,
    pub ctime: f64,
    pub dtime: f64,
    /// Compressed to (almost) nothing; the step says nothing about params.
    pub special: bool,
    /// The pipeline failed mid-measurement; the step is uninformative.
    pub failed: bool,
}

// ── Band-derived candidate sets ──────────────────────────────────────────────

pub(crate) fn codecs_for(band: Band, perf: PerfMode, registry: &CodecRegistry) -> Vec<Codec> {
    let wanted: &[Codec] = match band {
        Band::HighCr => &[Codec::Zstd, Codec::Zlib],
        Band::Balanced => &[Codec::Lz4, Codec::BloscLz],
        Band::LowCr => {
            if perf == PerfMode::Decomp {
                &[Codec::Lz4, Codec::Lz4Hc]
            } else {
                &[Codec::Lz4]
            }
        }
    };
    let mut out: Vec<Codec> = wanted
        .iter()
        .copied()
        .filter(|c| registry.contains(c.id()))
        .collect();
    if out.is_empty() {
        log::warn!("no admissible codec for this trade-off; using any registered backend");
        out = [Codec::Zstd, Codec::Zlib, Codec::Lz4, Codec::BloscLz, Codec::Lz4Hc]
            .iter()
            .copied()
            .filter(|c| registry.contains(c.id()))
            .collect();
    }
    if out.is_empty() {
        out.push(Codec::Lz4);
    }
    out
}

pub(crate) fn filters_for(band: Band) -> Vec<Filter> {
    match band {
        Band::LowCr => vec![Filter::NoFilter, Filter::Shuffle],
        Band::Balanced => vec![Filter::NoFilter, Filter::Shuffle, Filter::BitShuffle],
        Band::HighCr => vec![Filter::Shuffle, Filter::BitShuffle, Filter::ByteDelta],
    }
}

pub(crate) fn clevels_for(band: Band) -> Vec<u8> {
    match band {
        Band::LowCr => vec![1, 2, 3],
        Band::Balanced => (1..=9).collect(),
        Band::HighCr => (1..=6).collect(),
    }
}

fn nearest_index(levels: &[u8], clevel: u8) -> usize {
    levels
        .iter()
        .enumerate()
        .min_by_key(|(_, &l)| (l as i32 - clevel as i32).abs())
        .map(|(i, _)| i)
        .unwrap_or(0)
}

// ── Search core ──────────────────────────────────────────────────────────────

pub(crate) struct SearchCore {
    pub band: Band,
    pub perf: PerfMode,
    pub behaviour: Behaviour,
    pub cparams_hint: bool,
    pub max_threads: usize,
    pub base_split: SplitMode,

    pub codecs: Vec<Codec>,
    pub filters: Vec<Filter>,
    pub split_variants: Vec<SplitMode>,
    pub clevels: Vec<u8>,
    pub clevel_index: usize,

    pub state: State,
    pub readapt_from: Readapt,
    pub step_size: usize,
    pub threads_for_comp: bool,

    pub nsofts: u32,
    pub nhards: u32,
    pub nwaitings: u32,
    pub steps_count: u64,
    pub aux_index: usize,
    pub rep_index: u32,
    pub is_repeating: bool,
    state_flipped: bool,
    in_hard: bool,

    pub best: Cparams,
    pub aux_cparams: Cparams,
}

impl SearchCore {
    pub fn new(
        config: &BtuneConfig,
        max_threads: usize,
        typesize: usize,
        seed: Option<Cparams>,
    ) -> SearchCore {
        let band = config.band();
        let registry = CodecRegistry::global();
        let codecs = codecs_for(band, config.perf_mode, registry);
        let filters = filters_for(band);
        let clevels = clevels_for(band);

        let mut behaviour = config.behaviour;
        if !config.cparams_hint {
            // The first hard cycle only seeds the winner; grant one extra.
            behaviour.nhards_before_stop = behaviour.nhards_before_stop.saturating_add(1);
        }

        let best = seed.unwrap_or_else(|| {
            let mut cp = Cparams::unmeasured(codecs[0], filters[0], typesize);
            cp.clevel = capped_clevel(cp.compcode, band, clevels[clevels.len() / 2]);
            cp
        });

        let mut core = SearchCore {
            band,
            perf: config.perf_mode,
            behaviour,
            cparams_hint: config.cparams_hint,
            max_threads: max_threads.max(1),
            base_split: SplitMode::Auto,
            codecs,
            filters,
            split_variants: vec![SplitMode::Auto],
            clevels,
            clevel_index: 0,
            state: State::Waiting,
            readapt_from: Readapt::Wait,
            step_size: HARD_STEP,
            threads_for_comp: true,
            nsofts: 0,
            nhards: 0,
            nwaitings: 0,
            steps_count: 0,
            aux_index: 0,
            rep_index: 0,
            is_repeating: false,
            state_flipped: false,
            in_hard: false,
            aux_cparams: best.clone(),
            best,
        };
        core.clevel_index = nearest_index(&core.clevels, core.best.clevel);
        core.start_next_readapt();
        core
    }

    /// The parameters to use for the next chunk.
    pub fn next_cparams(&self) -> &Cparams {
        match self.state {
            State::Waiting | State::Stop => &self.best,
            _ => &self.aux_cparams,
        }
    }

    pub fn stopped(&self) -> bool {
        self.state == State::Stop
    }

    /// Narrows the candidate sets to the tuple inference voted for and
    /// restarts the exploration from a fresh hard cycle.
    pub fn seed_from_inference(
        &mut self,
        codec: Codec,
        filter: Filter,
        clevel: u8,
        splitmode: SplitMode,
    ) {
        let clevel = capped_clevel(codec, self.band, clevel.max(1));
        self.codecs = vec![codec];
        self.filters = vec![filter];
        self.clevels = match self.perf {
            PerfMode::Decomp => vec![clevel],
            _ => {
                let lo = clevel.saturating_sub(1).max(1);
                let hi = (clevel + 1).min(9);
                (lo..=hi).collect()
            }
        };
        self.base_split = splitmode;
        self.best.compcode = codec;
        self.best.filter = filter;
        self.best.clevel = clevel;
        self.best.splitmode = splitmode;
        self.clevel_index = nearest_index(&self.clevels, clevel);
        if !self.stopped() {
            self.begin_hard();
        }
    }

    // ── Readapt orchestration ────────────────────────────────────────────

    fn begin_hard(&mut self) {
        self.readapt_from = Readapt::Hard;
        self.in_hard = true;
        // The final hard refines instead of leaping.
        self.step_size = if self.nhards + 1 >= self.behaviour.nhards_before_stop {
            SOFT_STEP
        } else {
            HARD_STEP
        };
        self.threads_for_comp = self.perf != PerfMode::Decomp;
        self.enter_state(State::CodecFilter);
    }

    fn begin_soft(&mut self) {
        self.readapt_from = Readapt::Soft;
        self.in_hard = false;
        self.step_size = SOFT_STEP;
        self.enter_state(State::Clevel);
    }

    fn begin_wait(&mut self) {
        self.readapt_from = Readapt::Wait;
        self.nwaitings = 0;
        self.state = State::Waiting;
    }

    fn start_next_readapt(&mut self) {
        let b = self.behaviour;
        if self.nhards >= b.nhards_before_stop {
            self.apply_repeat_policy();
        } else if self.nhards > 0 && b.nsofts_before_hard > 0 && self.nsofts < b.nsofts_before_hard
        {
            self.begin_soft();
        } else {
            self.begin_hard();
        }
    }

    fn apply_repeat_policy(&mut self) {
        let b = self.behaviour;
        match b.repeat_mode {
            RepeatMode::Stop => self.state = State::Stop,
            RepeatMode::RepeatSoft => {
                if b.nsofts_before_hard > 0 {
                    self.is_repeating = true;
                    self.begin_soft();
                } else {
                    self.state = State::Stop;
                }
            }
            RepeatMode::RepeatAll => {
                self.is_repeating = true;
                self.rep_index += 1;
                self.nhards = 0;
                self.nsofts = 0;
                if b.nsofts_before_hard > 0 {
                    self.begin_soft();
                } else if b.nwaits_before_readapt > 0 {
                    self.begin_wait();
                } else if b.nhards_before_stop > 0 {
                    self.begin_hard();
                } else {
                    self.state = State::Stop;
                }
            }
        }
    }

    fn complete_readapt(&mut self) {
        self.state = State::Waiting;
        let b = self.behaviour;
        match self.readapt_from {
            Readapt::Hard => {
                self.nhards += 1;
                self.nsofts = 0;
                if self.nhards >= b.nhards_before_stop {
                    self.apply_repeat_policy();
                } else if b.nsofts_before_hard > 0 {
                    self.begin_soft();
                } else if b.nwaits_before_readapt > 0 {
                    self.begin_wait();
                } else {
                    self.begin_hard();
                }
            }
            Readapt::Soft => {
                self.nsofts += 1;
                let hards_done = self.nhards >= b.nhards_before_stop;
                if !hards_done {
                    if self.nsofts >= b.nsofts_before_hard {
                        if b.nwaits_before_readapt > 0 {
                            self.begin_wait();
                        } else {
                            self.begin_hard();
                        }
                    } else {
                        self.begin_soft();
                    }
                } else {
                    match b.repeat_mode {
                        RepeatMode::Stop => self.state = State::Stop,
                        _ if self.cparams_hint && b.nhards_before_stop == 0 => {
                            self.state = State::Stop
                        }
                        RepeatMode::RepeatSoft | RepeatMode::RepeatAll => {
                            if b.nwaits_before_readapt > 0 {
                                self.begin_wait();
                            } else {
                                self.begin_soft();
                            }
                        }
                    }
                }
            }
            Readapt::Wait => {
                // A wait is not a readapt; nothing completes here.
                log::error!("readapt completion while waiting; stopping the tuner");
                self.state = State::Stop;
            }
        }
    }

    fn waiting_step(&mut self) {
        self.nwaitings += 1;
        if self.nwaitings >= self.behaviour.nwaits_before_readapt {
            self.nwaitings = 0;
            let b = self.behaviour;
            if self.nhards >= b.nhards_before_stop {
                match b.repeat_mode {
                    RepeatMode::Stop => self.state = State::Stop,
                    RepeatMode::RepeatSoft => {
                        if b.nsofts_before_hard > 0 {
                            self.begin_soft();
                        } else {
                            self.state = State::Stop;
                        }
                    }
                    RepeatMode::RepeatAll => self.begin_hard(),
                }
            } else if self.nhards > 0
                && b.nsofts_before_hard > 0
                && self.nsofts < b.nsofts_before_hard
            {
                self.begin_soft();
            } else {
                self.begin_hard();
            }
        }
    }

    // ── State entry and chaining ─────────────────────────────────────────

    fn enter_state(&mut self, s: State) {
        self.state = s;
        self.state_flipped = false;
        self.aux_index = 0;
        match s {
            State::CodecFilter => {
                self.split_variants = match self.base_split {
                    SplitMode::Auto => vec![SplitMode::Always, SplitMode::Never],
                    fixed => vec![fixed],
                };
                self.aux_cparams = self.codec_filter_candidate(0);
            }
            State::ShuffleSize => {
                if !self.best.filter.is_shuffling() {
                    return self.leave_state();
                }
                let dir = self.best.increasing_shuffle;
                if let Some(cp) = self.shuffle_candidate(dir) {
                    self.aux_cparams = cp;
                } else if let Some(cp) = self.shuffle_candidate(!dir) {
                    self.best.increasing_shuffle = !dir;
                    self.aux_cparams = cp;
                } else {
                    return self.leave_state();
                }
            }
            State::Threads => {
                if self.max_threads <= 1 {
                    return self.leave_state();
                }
                let dir = self.best.increasing_nthreads;
                if let Some(cp) = self.thread_candidate(dir) {
                    self.aux_cparams = cp;
                } else if let Some(cp) = self.thread_candidate(!dir) {
                    self.best.increasing_nthreads = !dir;
                    self.aux_cparams = cp;
                } else {
                    return self.leave_state();
                }
            }
            State::Clevel => {
                let dir = self.best.increasing_clevel;
                if let Some((i, cp)) = self.clevel_candidate(dir) {
                    self.clevel_index = i;
                    self.aux_cparams = cp;
                } else if let Some((i, cp)) = self.clevel_candidate(!dir) {
                    self.best.increasing_clevel = !dir;
                    self.clevel_index = i;
                    self.aux_cparams = cp;
                } else {
                    // Nothing to move (a pinned level): re-measure the winner
                    // so the readapt still consumes exactly one chunk and the
                    // transition chain stays bounded.
                    self.aux_cparams = self.best.clone();
                }
            }
            State::Memcpy => {
                let mut cp = self.best.clone();
                cp.clevel = 0;
                self.aux_cparams = cp;
            }
            State::Waiting | State::Stop => {}
        }
    }

    fn leave_state(&mut self) {
        match self.state {
            State::CodecFilter => self.enter_state(State::ShuffleSize),
            State::ShuffleSize => self.enter_state(State::Threads),
            State::Threads => {
                let tune_decomp_next = self.threads_for_comp
                    && self.perf.needs_dtime()
                    && self.perf != PerfMode::Decomp;
                if tune_decomp_next {
                    self.threads_for_comp = false;
                    self.enter_state(State::Threads);
                } else {
                    self.enter_state(State::Clevel);
                }
            }
            State::Clevel => {
                if self.in_hard && self.band == Band::LowCr {
                    self.enter_state(State::Memcpy);
                } else {
                    self.complete_readapt();
                }
            }
            State::Memcpy => self.complete_readapt(),
            State::Waiting | State::Stop => {}
        }
    }

    // ── Candidate construction ───────────────────────────────────────────

    fn codec_filter_candidate(&self, i: usize) -> Cparams {
        let ns = self.split_variants.len().max(1);
        let nf = self.filters.len().max(1);
        let codec = self.codecs[(i / (nf * ns)) % self.codecs.len()];
        let filter = self.filters[(i / ns) % nf];
        let split = self.split_variants[i % ns];
        let mut cp = self.best.clone();
        cp.compcode = codec;
        cp.filter = filter;
        cp.splitmode = split;
        cp.clevel = capped_clevel(codec, self.band, cp.clevel.max(1));
        cp
    }

    fn shuffle_candidate(&self, increasing: bool) -> Option<Cparams> {
        let min = self.best.filter.min_shufflesize();
        let cur = self
            .best
            .shufflesize
            .clamp(min, MAX_SHUFFLE)
            .next_power_of_two()
            .min(MAX_SHUFFLE);
        let next = if increasing { cur * 2 } else { cur / 2 };
        if next < min || next > MAX_SHUFFLE || next == self.best.shufflesize {
            return None;
        }
        let mut cp = self.best.clone();
        cp.shufflesize = next;
        Some(cp)
    }

    fn thread_candidate(&self, increasing: bool) -> Option<Cparams> {
        let cur = if self.threads_for_comp {
            self.best.nthreads_comp
        } else {
            self.best.nthreads_decomp
        };
        let next = if increasing {
            cur + 1
        } else {
            cur.checked_sub(1)?
        };
        if next < 1 || next > self.max_threads {
            return None;
        }
        let mut cp = self.best.clone();
        if self.threads_for_comp {
            cp.nthreads_comp = next;
        } else {
            cp.nthreads_decomp = next;
        }
        Some(cp)
    }

    fn clevel_candidate(&self, increasing: bool) -> Option<(usize, Cparams)> {
        let base = nearest_index(&self.clevels, self.best.clevel);
        let next = if increasing {
            let i = base + self.step_size;
            if i >= self.clevels.len() {
                return None;
            }
            i
        } else {
            base.checked_sub(self.step_size)?
        };
        let mut cp = self.best.clone();
        cp.clevel = capped_clevel(cp.compcode, self.band, self.clevels[next]);
        if cp.clevel == self.best.clevel {
            return None;
        }
        Some((next, cp))
    }

    // ── Measurement intake ───────────────────────────────────────────────

    /// Records one measurement for the candidate emitted by
    /// [`SearchCore::next_cparams`] and advances the machine.
    pub fn update(&mut self, m: &Measurement) -> Winner {
        self.steps_count += 1;
        match self.state {
            State::Stop => return Winner::NotImproved,
            State::Waiting => {
                if self.readapt_from == Readapt::Wait {
                    self.waiting_step();
                }
                return Winner::NotImproved;
            }
            _ => {}
        }

        if m.special {
            self.advance(false);
            return Winner::Special;
        }
        if m.failed || !(m.score > 0.0) || !(m.cratio > 0.0) {
            self.advance(false);
            return Winner::NotImproved;
        }

        self.aux_cparams.score = m.score;
        self.aux_cparams.cratio = m.cratio;
        self.aux_cparams.ctime = m.ctime;
        self.aux_cparams.dtime = m.dtime;

        let improved = if !self.best.is_measured() {
            true
        } else if self.state == State::Threads {
            // Only the tuned time axis counts here.
            if self.threads_for_comp {
                m.ctime < self.best.ctime
            } else {
                m.dtime < self.best.dtime
            }
        } else {
            let score_coef = self.best.score / m.score;
            let cratio_coef = m.cratio / self.best.cratio;
            score::has_improved(self.band, score_coef, cratio_coef)
        };

        if improved {
            // Direction flags live on the winner; carry them over.
            let flags = (
                self.best.increasing_clevel,
                self.best.increasing_block,
                self.best.increasing_shuffle,
                self.best.increasing_nthreads,
            );
            self.best = self.aux_cparams.clone();
            self.best.increasing_clevel = flags.0;
            self.best.increasing_block = flags.1;
            self.best.increasing_shuffle = flags.2;
            self.best.increasing_nthreads = flags.3;
        }

        self.advance(improved);
        if improved {
            Winner::Improved
        } else {
            Winner::NotImproved
        }
    }

    fn advance(&mut self, improved: bool) {
        self.aux_index += 1;
        match self.state {
            State::CodecFilter => {
                let combos =
                    self.codecs.len() * self.filters.len() * self.split_variants.len();
                if self.aux_index < combos {
                    self.aux_cparams = self.codec_filter_candidate(self.aux_index);
                } else {
                    self.leave_state();
                }
            }
            State::ShuffleSize => self.step_axis(improved, Axis::Shuffle),
            State::Threads => self.step_axis(improved, Axis::Threads),
            State::Clevel => self.step_axis(improved, Axis::Clevel),
            State::Memcpy => self.leave_state(),
            State::Waiting | State::Stop => {}
        }
    }

    fn step_axis(&mut self, improved: bool, axis: Axis) {
        let dir = self.axis_dir(axis);
        if improved {
            match self.axis_candidate(axis, dir) {
                Some(cp) => self.aux_cparams = cp,
                None => {
                    // Walked into the boundary: flip for the next visit.
                    self.set_axis_dir(axis, !dir);
                    self.leave_state();
                }
            }
        } else if self.aux_index == 1 && !self.state_flipped {
            // First step of this visit went nowhere: try the other way.
            self.state_flipped = true;
            self.set_axis_dir(axis, !dir);
            match self.axis_candidate(axis, !dir) {
                Some(cp) => self.aux_cparams = cp,
                None => self.leave_state(),
            }
        } else {
            self.leave_state();
        }
    }

    fn axis_dir(&self, axis: Axis) -> bool {
        match axis {
            Axis::Shuffle => self.best.increasing_shuffle,
            Axis::Threads => self.best.increasing_nthreads,
            Axis::Clevel => self.best.increasing_clevel,
        }
    }

    fn set_axis_dir(&mut self, axis: Axis, dir: bool) {
        match axis {
            Axis::Shuffle => self.best.increasing_shuffle = dir,
            Axis::Threads => self.best.increasing_nthreads = dir,
            Axis::Clevel => self.best.increasing_clevel = dir,
        }
    }

    fn axis_candidate(&mut self, axis: Axis, dir: bool) -> Option<Cparams> {
        match axis {
            Axis::Shuffle => self.shuffle_candidate(dir),
            Axis::Threads => self.thread_candidate(dir),
            Axis::Clevel => {
                let (i, cp) = self.clevel_candidate(dir)?;
                self.clevel_index = i;
                Some(cp)
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Axis {
    Shuffle,
    Threads,
    Clevel,
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn config(tradeoff: f64, perf: PerfMode) -> BtuneConfig {
        BtuneConfig {
            tradeoff,
            perf_mode: perf,
            behaviour: Behaviour {
                nwaits_before_readapt: 0,
                nsofts_before_hard: 2,
                nhards_before_stop: 1,
                repeat_mode: RepeatMode::Stop,
            },
            ..BtuneConfig::default()
        }
    }

    fn measurement(score: f64, cratio: f64) -> Measurement {
        Measurement {
            score,
            cratio,
            ctime: score / 2.0,
            dtime: score / 2.0,
            special: false,
            failed: false,
        }
    }

    /// Drives the core with a fixed measurement until it stops or the step
    /// limit runs out.
    fn drive_constant(core: &mut SearchCore, m: Measurement, max_steps: usize) -> usize {
        let mut steps = 0;
        while !core.stopped() && steps < max_steps {
            let _ = core.next_cparams();
            core.update(&m);
            steps += 1;
        }
        steps
    }

    #[test]
    fn first_measured_candidate_seeds_best() {
        let mut core = SearchCore::new(&config(0.5, PerfMode::Comp), 4, 4, None);
        assert!(!core.best.is_measured());
        let cp = core.next_cparams().clone();
        let w = core.update(&measurement(1.0, 2.0));
        assert_eq!(w, Winner::Improved);
        assert!(core.best.is_measured());
        assert_eq!(core.best.compcode, cp.compcode);
        assert_eq!(core.best.filter, cp.filter);
    }

    #[test]
    fn hard_cycle_starts_with_codec_filter() {
        let core = SearchCore::new(&config(0.5, PerfMode::Comp), 4, 4, None);
        assert_eq!(core.state, State::CodecFilter);
        assert_eq!(core.readapt_from, Readapt::Hard);
        // The seeding hard still leaps; only the final one refines.
        assert_eq!(core.step_size, HARD_STEP);
    }

    #[test]
    fn codec_filter_enumerates_both_split_variants() {
        let mut core = SearchCore::new(&config(0.5, PerfMode::Comp), 1, 4, None);
        let mut seen = Vec::new();
        let combos = core.codecs.len() * core.filters.len() * 2;
        for _ in 0..combos {
            assert_eq!(core.state, State::CodecFilter);
            let cp = core.next_cparams();
            seen.push((cp.compcode, cp.filter, cp.splitmode));
            core.update(&measurement(10.0, 1.01));
        }
        assert_eq!(seen.len(), combos);
        assert!(seen.iter().any(|(_, _, s)| *s == SplitMode::Always));
        assert!(seen.iter().any(|(_, _, s)| *s == SplitMode::Never));
        // All distinct combinations were proposed.
        let mut dedup = seen.clone();
        dedup.sort_by_key(|(c, f, s)| (c.id(), f.id(), s.name()));
        dedup.dedup();
        assert_eq!(dedup.len(), seen.len());
    }

    #[test]
    fn high_band_restricts_codecs() {
        let core = SearchCore::new(&config(0.9, PerfMode::Comp), 4, 4, None);
        assert!(core
            .codecs
            .iter()
            .all(|c| matches!(c, Codec::Zstd | Codec::Zlib)));
        assert!(core.clevels.iter().all(|&l| l <= 6));
    }

    #[test]
    fn low_band_prefers_lz4_and_adds_hc_for_decomp() {
        let core = SearchCore::new(&config(0.1, PerfMode::Comp), 4, 4, None);
        assert_eq!(core.codecs, vec![Codec::Lz4]);
        // LZ4HC has no backend in this runtime, so it is silently omitted.
        let core = SearchCore::new(&config(0.1, PerfMode::Decomp), 4, 4, None);
        assert_eq!(core.codecs, vec![Codec::Lz4]);
    }

    #[test]
    fn decomp_mode_tunes_decompression_threads_only() {
        let mut core = SearchCore::new(&config(0.1, PerfMode::Decomp), 8, 4, None);
        assert!(!core.threads_for_comp);
        let mut comp_threads_seen = std::collections::BTreeSet::new();
        for _ in 0..200 {
            if core.stopped() {
                break;
            }
            if core.state == State::Threads {
                comp_threads_seen.insert(core.next_cparams().nthreads_comp);
            }
            core.update(&measurement(5.0, 1.5));
        }
        assert!(comp_threads_seen.len() <= 1);
    }

    #[test]
    fn threads_state_judges_time_axis_only() {
        let mut core = SearchCore::new(&config(0.5, PerfMode::Comp), 8, 4, None);
        // Walk to the THREADS state with a constant measurement.
        while core.state != State::Threads && !core.stopped() {
            core.update(&measurement(4.0, 2.0));
        }
        assert_eq!(core.state, State::Threads);
        let before = core.best.nthreads_comp;
        let probed = core.next_cparams().nthreads_comp;
        assert_ne!(probed, before);
        // Worse score but better ctime: still an improvement here.
        let m = Measurement {
            score: 100.0,
            cratio: 0.5,
            ctime: core.best.ctime / 2.0,
            dtime: 0.0,
            special: false,
            failed: false,
        };
        assert_eq!(core.update(&m), Winner::Improved);
        assert_eq!(core.best.nthreads_comp, probed);
    }

    #[test]
    fn special_chunks_never_touch_best() {
        let mut core = SearchCore::new(&config(0.5, PerfMode::Comp), 4, 4, None);
        let special = Measurement {
            score: 0.001,
            cratio: 10_000.0,
            ctime: 0.0,
            dtime: 0.0,
            special: true,
            failed: false,
        };
        for _ in 0..50 {
            if core.stopped() {
                break;
            }
            assert_eq!(core.update(&special), Winner::Special);
            assert!(!core.best.is_measured());
        }
    }

    #[test]
    fn failed_measurements_leave_best_alone() {
        let mut core = SearchCore::new(&config(0.5, PerfMode::Comp), 4, 4, None);
        core.update(&measurement(1.0, 2.0));
        let snapshot = core.best.clone();
        let failed = Measurement {
            score: 0.0001,
            cratio: 99.0,
            ctime: 0.0,
            dtime: 0.0,
            special: false,
            failed: true,
        };
        core.update(&failed);
        assert_eq!(core.best.score, snapshot.score);
        assert_eq!(core.best.compcode, snapshot.compcode);
    }

    #[test]
    fn constant_stream_converges_to_stop() {
        let mut core = SearchCore::new(&config(0.5, PerfMode::Comp), 2, 4, None);
        let steps = drive_constant(&mut core, measurement(3.0, 1.5), 10_000);
        assert!(core.stopped(), "still in {:?} after {steps} steps", core.state);
        // Once stopped, updates are no-ops.
        let snapshot = core.best.clone();
        for _ in 0..5 {
            assert_eq!(core.update(&measurement(0.001, 50.0)), Winner::NotImproved);
        }
        assert_eq!(core.best.score, snapshot.score);
        assert_eq!(core.best.clevel, snapshot.clevel);
    }

    #[test]
    fn repeat_soft_keeps_refining() {
        let mut cfg = config(0.5, PerfMode::Comp);
        cfg.behaviour.repeat_mode = RepeatMode::RepeatSoft;
        let mut core = SearchCore::new(&cfg, 2, 4, None);
        let steps = drive_constant(&mut core, measurement(3.0, 1.5), 5_000);
        assert_eq!(steps, 5_000, "REPEAT_SOFT must never stop");
        assert!(core.is_repeating);
        assert_eq!(core.readapt_from, Readapt::Soft);
    }

    #[test]
    fn repeat_all_restarts_hard_cycles() {
        let mut cfg = config(0.5, PerfMode::Comp);
        cfg.behaviour.repeat_mode = RepeatMode::RepeatAll;
        cfg.behaviour.nsofts_before_hard = 1;
        let mut core = SearchCore::new(&cfg, 2, 4, None);
        let steps = drive_constant(&mut core, measurement(3.0, 1.5), 5_000);
        assert_eq!(steps, 5_000, "REPEAT_ALL must never stop");
        assert!(core.rep_index > 0);
    }

    #[test]
    fn waits_are_counted_between_cycles() {
        let mut cfg = config(0.5, PerfMode::Comp);
        cfg.behaviour.nsofts_before_hard = 0;
        cfg.behaviour.nwaits_before_readapt = 3;
        cfg.behaviour.nhards_before_stop = 2;
        let mut core = SearchCore::new(&cfg, 1, 4, None);
        let mut waited = 0;
        for _ in 0..2_000 {
            if core.stopped() {
                break;
            }
            if core.state == State::Waiting && core.readapt_from == Readapt::Wait {
                waited += 1;
            }
            core.update(&measurement(3.0, 1.5));
        }
        assert!(core.stopped());
        assert!(waited >= 3, "saw only {waited} waiting chunks");
    }

    #[test]
    fn best_score_monotone_across_improvements() {
        let mut core = SearchCore::new(&config(0.5, PerfMode::Comp), 4, 4, None);
        let mut last_accepted = f64::INFINITY;
        let mut improvements = 0;
        let mut score = 16.0;
        let mut cratio = 1.5;
        for _ in 0..100 {
            if core.stopped() {
                break;
            }
            let in_threads = core.state == State::Threads;
            let m = measurement(score, cratio);
            let w = core.update(&m);
            if w == Winner::Improved && !in_threads {
                assert!(m.score <= last_accepted, "accepted a worse score");
                last_accepted = m.score;
                improvements += 1;
            }
            // Strictly improving stream: faster and tighter every chunk.
            score *= 0.9;
            cratio *= 1.05;
        }
        assert!(improvements > 1);
    }

    #[test]
    fn max_ratio_tradeoff_never_worsens_cratio() {
        let mut core = SearchCore::new(&config(1.0, PerfMode::Comp), 4, 4, None);
        // The achieved ratio is a deterministic function of the candidate
        // parameters (as in a real pipeline); timings are pseudo-random.
        let mut state = 0x1234_5678_9abc_def0u64;
        for _ in 0..500 {
            if core.stopped() {
                break;
            }
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let cp = core.next_cparams();
            let cratio = 1.0
                + cp.clevel as f64 / 2.0
                + cp.filter.id() as f64 * 0.3
                + cp.compcode.id() as f64 * 0.1;
            let score = 1.0 + (state % 37) as f64 / 10.0;
            let before = core.best.cratio;
            core.update(&measurement(score, cratio));
            assert!(
                core.best.cratio >= before,
                "cratio regressed from {before} to {}",
                core.best.cratio
            );
        }
    }

    #[test]
    fn clevel_direction_flips_on_failed_first_step() {
        let mut cfg = config(0.5, PerfMode::Comp);
        cfg.behaviour.nsofts_before_hard = 1;
        let mut core = SearchCore::new(&cfg, 1, 4, None);
        // Finish the hard cycle with a flat stream, landing in a soft readapt.
        while core.readapt_from != Readapt::Soft && !core.stopped() {
            core.update(&measurement(3.0, 1.5));
        }
        assert_eq!(core.state, State::Clevel);
        let first = core.next_cparams().clevel;
        let dir_before = core.best.increasing_clevel;
        core.update(&measurement(1000.0, 0.01)); // clearly worse
        if core.state == State::Clevel {
            let second = core.next_cparams().clevel;
            assert_ne!(first, second, "flip must move the other way");
            assert_ne!(core.best.increasing_clevel, dir_before);
        }
    }

    #[test]
    fn memcpy_probed_only_in_speed_band() {
        let mut low = SearchCore::new(&config(0.1, PerfMode::Comp), 1, 4, None);
        let mut saw_memcpy = false;
        for _ in 0..500 {
            if low.stopped() {
                break;
            }
            saw_memcpy |= low.state == State::Memcpy;
            low.update(&measurement(3.0, 1.5));
        }
        assert!(saw_memcpy);

        let mut high = SearchCore::new(&config(0.9, PerfMode::Comp), 1, 4, None);
        for _ in 0..500 {
            if high.stopped() {
                break;
            }
            assert_ne!(high.state, State::Memcpy);
            high.update(&measurement(3.0, 1.5));
        }
    }

    #[test]
    fn inference_seed_restricts_the_search() {
        let mut core = SearchCore::new(&config(0.5, PerfMode::Comp), 4, 4, None);
        core.seed_from_inference(Codec::Lz4, Filter::Shuffle, 5, SplitMode::Never);
        assert_eq!(core.codecs, vec![Codec::Lz4]);
        assert_eq!(core.filters, vec![Filter::Shuffle]);
        assert_eq!(core.clevels, vec![4, 5, 6]);
        assert_eq!(core.state, State::CodecFilter);
        // Only the predicted split variant is enumerated.
        assert_eq!(core.split_variants, vec![SplitMode::Never]);
    }

    #[test]
    fn inference_seed_pins_level_for_decomp() {
        let mut core = SearchCore::new(&config(0.5, PerfMode::Decomp), 4, 4, None);
        core.seed_from_inference(Codec::Lz4, Filter::Shuffle, 7, SplitMode::Auto);
        assert_eq!(core.clevels, vec![7]);
    }

    #[test]
    fn shuffle_size_stays_power_of_two() {
        let mut cfg = config(0.5, PerfMode::Comp);
        cfg.cparams_hint = true;
        let seed = Cparams::unmeasured(Codec::Lz4, Filter::Shuffle, 4);
        let mut core = SearchCore::new(&cfg, 2, 4, Some(seed));
        let mut visited = false;
        for _ in 0..2_000 {
            if core.stopped() {
                break;
            }
            let cp = core.next_cparams().clone();
            if core.state == State::ShuffleSize {
                visited = true;
                assert!(cp.shufflesize.is_power_of_two());
                assert!(cp.shufflesize <= MAX_SHUFFLE);
                assert!(cp.shufflesize >= cp.filter.min_shufflesize());
            }
            // Accept the first probe of each shuffling combo so the winner
            // keeps a shuffling filter and SHUFFLE_SIZE stays reachable.
            let cratio = if cp.filter.is_shuffling() { 3.0 } else { 1.2 };
            core.update(&measurement(3.0, cratio));
        }
        assert!(visited, "SHUFFLE_SIZE was never entered");
    }

    #[test]
    fn hint_skips_the_seeding_hard() {
        let mut cfg = config(0.5, PerfMode::Comp);
        cfg.cparams_hint = true;
        let seed = Cparams::unmeasured(Codec::Lz4, Filter::Shuffle, 4);
        let core = SearchCore::new(&cfg, 2, 4, Some(seed));
        assert_eq!(core.behaviour.nhards_before_stop, 1);
        let cfg = config(0.5, PerfMode::Comp);
        let core = SearchCore::new(&cfg, 2, 4, None);
        assert_eq!(core.behaviour.nhards_before_stop, 2);
    }
}
