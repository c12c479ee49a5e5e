//! Candidate parameter tuples and the codec / filter / split-mode vocabulary
//! shared between the search engine, the inference front-end and the pipeline
//! contexts.

use crate::config::Band;

/// Number of filter slots a compression context carries.
pub const MAX_FILTERS: usize = 6;

/// Smallest and largest shuffle lane widths the search will propose, in bytes.
pub const MIN_SHUFFLE: usize = 2;
pub const MIN_BITSHUFFLE: usize = 1;
pub const MAX_SHUFFLE: usize = 16;

/// Compression levels are always within this range; 0 is reserved for the
/// store-only probe of the MEMCPY search state.
pub const MIN_CLEVEL: u8 = 1;
pub const MAX_CLEVEL: u8 = 9;

// ── Codec ────────────────────────────────────────────────────────────────────

/// A named entry in the pipeline codec table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    BloscLz,
    Lz4,
    Lz4Hc,
    Zlib,
    Zstd,
}

impl Codec {
    /// Stable wire/table id.
    pub const fn id(self) -> u8 {
        match self {
            Codec::BloscLz => 0,
            Codec::Lz4 => 1,
            Codec::Lz4Hc => 2,
            Codec::Zlib => 4,
            Codec::Zstd => 5,
        }
    }

    pub fn from_id(id: u8) -> Option<Codec> {
        match id {
            0 => Some(Codec::BloscLz),
            1 => Some(Codec::Lz4),
            2 => Some(Codec::Lz4Hc),
            4 => Some(Codec::Zlib),
            5 => Some(Codec::Zstd),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Codec::BloscLz => "blosclz",
            Codec::Lz4 => "lz4",
            Codec::Lz4Hc => "lz4hc",
            Codec::Zlib => "zlib",
            Codec::Zstd => "zstd",
        }
    }

    pub fn from_name(s: &str) -> Option<Codec> {
        match s.to_ascii_lowercase().as_str() {
            "blosclz" => Some(Codec::BloscLz),
            "lz4" => Some(Codec::Lz4),
            "lz4hc" => Some(Codec::Lz4Hc),
            "zlib" => Some(Codec::Zlib),
            "zstd" => Some(Codec::Zstd),
            _ => None,
        }
    }

    /// Fast byte-oriented codecs benefit from per-lane splitting; the
    /// dictionary codecs prefer whole blocks. Decides `SplitMode::Auto`.
    pub fn splits_by_default(self) -> bool {
        matches!(self, Codec::BloscLz | Codec::Lz4 | Codec::Lz4Hc)
    }
}

// ── Filter ───────────────────────────────────────────────────────────────────

/// Pre-transform applied before the codec sees the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Filter {
    NoFilter,
    Shuffle,
    BitShuffle,
    ByteDelta,
}

impl Filter {
    pub const fn id(self) -> u8 {
        match self {
            Filter::NoFilter => 0,
            Filter::Shuffle => 1,
            Filter::BitShuffle => 2,
            Filter::ByteDelta => 3,
        }
    }

    pub fn from_id(id: u8) -> Option<Filter> {
        match id {
            0 => Some(Filter::NoFilter),
            1 => Some(Filter::Shuffle),
            2 => Some(Filter::BitShuffle),
            3 => Some(Filter::ByteDelta),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Filter::NoFilter => "nofilter",
            Filter::Shuffle => "shuffle",
            Filter::BitShuffle => "bitshuffle",
            Filter::ByteDelta => "bytedelta",
        }
    }

    pub fn from_name(s: &str) -> Option<Filter> {
        match s.to_ascii_lowercase().as_str() {
            "nofilter" | "none" => Some(Filter::NoFilter),
            "shuffle" => Some(Filter::Shuffle),
            "bitshuffle" => Some(Filter::BitShuffle),
            "bytedelta" => Some(Filter::ByteDelta),
            _ => None,
        }
    }

    /// True for the filters that reorder bytes by lane and therefore expose a
    /// tunable lane width.
    pub fn is_shuffling(self) -> bool {
        matches!(self, Filter::Shuffle | Filter::BitShuffle)
    }

    /// Smallest admissible shuffle lane for this filter.
    pub fn min_shufflesize(self) -> usize {
        match self {
            Filter::BitShuffle => MIN_BITSHUFFLE,
            _ => MIN_SHUFFLE,
        }
    }

    /// Writes this filter into the slot convention used by the contexts: a
    /// single filter occupies the last slot, and BYTEDELTA additionally puts
    /// SHUFFLE in the slot before it with the typesize as its meta.
    pub fn fill_slots(self, typesize: usize, slots: &mut [u8; MAX_FILTERS], meta: &mut [u8; MAX_FILTERS]) {
        *slots = [0; MAX_FILTERS];
        *meta = [0; MAX_FILTERS];
        slots[MAX_FILTERS - 1] = self.id();
        match self {
            Filter::ByteDelta => {
                slots[MAX_FILTERS - 2] = Filter::Shuffle.id();
                meta[MAX_FILTERS - 1] = typesize.min(u8::MAX as usize) as u8;
            }
            Filter::Shuffle | Filter::BitShuffle => {
                meta[MAX_FILTERS - 1] = typesize.min(u8::MAX as usize) as u8;
            }
            Filter::NoFilter => {}
        }
    }
}

// ── Split mode ───────────────────────────────────────────────────────────────

/// Whether chunk blocks are split per type-size lane before compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SplitMode {
    /// Codec decides (see [`Codec::splits_by_default`]).
    Auto,
    Always,
    Never,
}

impl SplitMode {
    pub fn name(self) -> &'static str {
        match self {
            SplitMode::Auto => "auto",
            SplitMode::Always => "always",
            SplitMode::Never => "never",
        }
    }

    pub fn from_name(s: &str) -> Option<SplitMode> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Some(SplitMode::Auto),
            "always" | "always_split" => Some(SplitMode::Always),
            "never" | "never_split" => Some(SplitMode::Never),
            _ => None,
        }
    }

    /// Resolves `Auto` against the codec preference.
    pub fn resolve(self, codec: Codec) -> bool {
        match self {
            SplitMode::Always => true,
            SplitMode::Never => false,
            SplitMode::Auto => codec.splits_by_default(),
        }
    }
}

// ── Level capping ────────────────────────────────────────────────────────────

/// Applies the per-band level caps: the dictionary codecs are limited to
/// level 3 in the balanced band and level 6 in the high-ratio band, and ZSTD
/// level 9 is rewritten to 8 everywhere.
pub fn capped_clevel(codec: Codec, band: Band, clevel: u8) -> u8 {
    let mut level = clevel.min(MAX_CLEVEL);
    if matches!(codec, Codec::Zstd | Codec::Zlib) {
        match band {
            Band::Balanced => level = level.min(3),
            Band::HighCr => level = level.min(6),
            Band::LowCr => {}
        }
    }
    if codec == Codec::Zstd && level == 9 {
        level = 8;
    }
    level
}

// ── Candidate tuple ──────────────────────────────────────────────────────────

/// One full set of tunable parameters plus the measurements recorded for it.
/// The search keeps two of these: the incumbent winner and the candidate
/// currently being probed.
#[derive(Debug, Clone)]
pub struct Cparams {
    pub compcode: Codec,
    pub filter: Filter,
    pub splitmode: SplitMode,
    pub clevel: u8,
    /// 0 lets the pipeline choose.
    pub blocksize: usize,
    pub shufflesize: usize,
    pub nthreads_comp: usize,
    pub nthreads_decomp: usize,

    // Direction of travel for the stepping search states. Exactly one of
    // these governs motion in any given state.
    pub increasing_clevel: bool,
    pub increasing_block: bool,
    pub increasing_shuffle: bool,
    pub increasing_nthreads: bool,

    // Measurements for the chunk this tuple was last used on.
    pub score: f64,
    pub cratio: f64,
    pub ctime: f64,
    pub dtime: f64,
}

impl Cparams {
    /// A never-measured tuple: infinite score so the first real measurement
    /// always wins.
    pub fn unmeasured(codec: Codec, filter: Filter, typesize: usize) -> Cparams {
        Cparams {
            compcode: codec,
            filter,
            splitmode: SplitMode::Auto,
            clevel: 5,
            blocksize: 0,
            shufflesize: typesize.max(1),
            nthreads_comp: 1,
            nthreads_decomp: 1,
            increasing_clevel: true,
            increasing_block: true,
            increasing_shuffle: true,
            increasing_nthreads: true,
            score: f64::INFINITY,
            cratio: 0.0,
            ctime: 0.0,
            dtime: 0.0,
        }
    }

    /// True once a measurement has been recorded.
    pub fn is_measured(&self) -> bool {
        self.score.is_finite()
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_id_roundtrip() {
        for codec in [Codec::BloscLz, Codec::Lz4, Codec::Lz4Hc, Codec::Zlib, Codec::Zstd] {
            assert_eq!(Codec::from_id(codec.id()), Some(codec));
            assert_eq!(Codec::from_name(codec.name()), Some(codec));
        }
        assert_eq!(Codec::from_id(99), None);
    }

    #[test]
    fn filter_slot_convention_single() {
        let mut slots = [0u8; MAX_FILTERS];
        let mut meta = [0u8; MAX_FILTERS];
        Filter::Shuffle.fill_slots(4, &mut slots, &mut meta);
        assert_eq!(slots[MAX_FILTERS - 1], Filter::Shuffle.id());
        assert_eq!(meta[MAX_FILTERS - 1], 4);
        assert!(slots[..MAX_FILTERS - 1].iter().all(|&s| s == 0));
    }

    #[test]
    fn filter_slot_convention_bytedelta() {
        let mut slots = [0u8; MAX_FILTERS];
        let mut meta = [0u8; MAX_FILTERS];
        Filter::ByteDelta.fill_slots(8, &mut slots, &mut meta);
        assert_eq!(slots[MAX_FILTERS - 1], Filter::ByteDelta.id());
        assert_eq!(slots[MAX_FILTERS - 2], Filter::Shuffle.id());
        assert_eq!(meta[MAX_FILTERS - 1], 8);
    }

    #[test]
    fn split_auto_resolution() {
        assert!(SplitMode::Auto.resolve(Codec::Lz4));
        assert!(!SplitMode::Auto.resolve(Codec::Zstd));
        assert!(SplitMode::Always.resolve(Codec::Zstd));
        assert!(!SplitMode::Never.resolve(Codec::Lz4));
    }

    #[test]
    fn clevel_caps_by_band() {
        assert_eq!(capped_clevel(Codec::Zstd, Band::Balanced, 9), 3);
        assert_eq!(capped_clevel(Codec::Zlib, Band::HighCr, 9), 6);
        assert_eq!(capped_clevel(Codec::Zstd, Band::LowCr, 9), 8);
        assert_eq!(capped_clevel(Codec::Lz4, Band::HighCr, 9), 9);
        assert_eq!(capped_clevel(Codec::Zstd, Band::HighCr, 5), 5);
    }

    #[test]
    fn unmeasured_tuple_always_loses() {
        let cp = Cparams::unmeasured(Codec::Lz4, Filter::Shuffle, 4);
        assert!(!cp.is_measured());
        assert!(cp.score.is_infinite());
        assert_eq!(cp.shufflesize, 4);
    }
}
