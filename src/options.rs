//! Compression options and level presets.
//!
//! All tunables live in one flat [`CompressOptions`] record with validated
//! builder setters; defaults come from a table indexed by compression level
//! (1..=12), with a second table for the `high_compression` variant.
//! Parameters are read once per frame: changing options between frames is
//! supported, changing them mid-frame is not.

use crate::error::{Error, Result};
use crate::model::LzmaProperties;

/// Smallest supported dictionary (2^20).
pub const DICT_LOG_MIN: u32 = 20;

/// Largest supported dictionary (2^30).
pub const DICT_LOG_MAX: u32 = 30;

/// Frame properties encode `dict_log - 11`.
pub const DICT_LOG_BIAS: u32 = 11;

/// Valid chain-log range for the match-finder refinement threshold.
pub const CHAIN_LOG_MIN: u32 = 4;
pub const CHAIN_LOG_MAX: u32 = 14;

/// Valid search-depth range.
pub const SEARCH_DEPTH_MIN: u32 = 6;
pub const SEARCH_DEPTH_MAX: u32 = 254;

/// Valid fast-length range.
pub const FAST_LENGTH_MIN: u32 = 6;
pub const FAST_LENGTH_MAX: u32 = 273;

/// Valid worker-buffer log range; values below the minimum are refused.
pub const BUFFER_LOG_MIN: u32 = 4;
pub const BUFFER_LOG_MAX: u32 = 10;

/// Valid block-size log range (0 means "dictionary size").
pub const BLOCK_SIZE_LOG_MIN: u32 = 16;
pub const BLOCK_SIZE_LOG_MAX: u32 = 30;

/// Highest compression level.
pub const LEVEL_MAX: u32 = 12;

/// Highest level in the high-compression table.
pub const HIGH_LEVEL_MAX: u32 = 10;

/// Parsing strategy, in increasing effort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Strategy {
    /// Greedy longest-match selection.
    Fast,
    /// Price-compared selection with a one-step lazy lookahead.
    #[default]
    Normal,
    /// Forward dynamic program over a bounded lookahead window.
    Best,
}

impl Strategy {
    /// Lookahead window of the optimal parser for this strategy/level.
    pub(crate) fn lookahead(self, level: u32) -> u32 {
        match self {
            Strategy::Fast => 32,
            Strategy::Normal => if level >= 6 { 64 } else { 32 },
            Strategy::Best => match level {
                0..=8 => 128,
                _ => 273,
            },
        }
    }
}

#[derive(Clone, Copy)]
struct LevelParams {
    dict_log: u32,
    chain_log: u32,
    search_depth: u32,
    fast_length: u32,
    overlap_fraction: u32,
    strategy: Strategy,
}

const fn lp(
    dict_log: u32,
    chain_log: u32,
    search_depth: u32,
    fast_length: u32,
    overlap_fraction: u32,
    strategy: Strategy,
) -> LevelParams {
    LevelParams {
        dict_log,
        chain_log,
        search_depth,
        fast_length,
        overlap_fraction,
        strategy,
    }
}

/// Default parameters per compression level 1..=12.
const LEVELS: [LevelParams; 12] = [
    lp(20, 7, 20, 32, 1, Strategy::Fast),
    lp(20, 7, 28, 32, 1, Strategy::Fast),
    lp(21, 8, 36, 32, 1, Strategy::Fast),
    lp(22, 8, 42, 32, 2, Strategy::Normal),
    lp(23, 9, 48, 48, 2, Strategy::Normal),
    lp(24, 9, 64, 64, 2, Strategy::Normal),
    lp(25, 10, 96, 96, 2, Strategy::Best),
    lp(26, 10, 128, 128, 2, Strategy::Best),
    lp(26, 11, 160, 192, 4, Strategy::Best),
    lp(27, 12, 200, 273, 4, Strategy::Best),
    lp(27, 12, 254, 273, 4, Strategy::Best),
    lp(28, 14, 254, 273, 4, Strategy::Best),
];

/// High-compression variants for levels 1..=10: deeper searches and the
/// best-path parser at every level.
const HIGH_LEVELS: [LevelParams; 10] = [
    lp(21, 9, 42, 64, 2, Strategy::Best),
    lp(22, 10, 64, 96, 2, Strategy::Best),
    lp(23, 10, 96, 128, 2, Strategy::Best),
    lp(24, 11, 128, 160, 4, Strategy::Best),
    lp(25, 11, 160, 192, 4, Strategy::Best),
    lp(26, 12, 200, 273, 4, Strategy::Best),
    lp(27, 12, 254, 273, 4, Strategy::Best),
    lp(28, 13, 254, 273, 4, Strategy::Best),
    lp(29, 14, 254, 273, 8, Strategy::Best),
    lp(30, 14, 254, 273, 8, Strategy::Best),
];

/// Frame-level properties carried in the first byte of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameProps {
    /// log2 of the dictionary size.
    pub dict_log: u32,
    /// Whether an XXH64 trailer follows the terminator.
    pub do_hash: bool,
}

impl FrameProps {
    const HASH_BIT: u8 = 0x80;

    /// Encodes to the wire byte: `log2(D) - 11` plus the hash flag.
    pub fn to_byte(self) -> u8 {
        (self.dict_log - DICT_LOG_BIAS) as u8 | if self.do_hash { Self::HASH_BIT } else { 0 }
    }

    /// Decodes the wire byte; the size class must lie in `0..=19`.
    pub fn from_byte(byte: u8) -> Result<Self> {
        let class = (byte & !Self::HASH_BIT) as u32;
        if class > DICT_LOG_MAX - DICT_LOG_BIAS {
            return Err(Error::CorruptionDetected);
        }
        Ok(Self {
            dict_log: class + DICT_LOG_BIAS,
            do_hash: byte & Self::HASH_BIT != 0,
        })
    }

    /// Dictionary size in bytes.
    pub fn dict_size(self) -> usize {
        1usize << self.dict_log
    }
}

/// Flat, validated compression configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressOptions {
    level: u32,
    dict_log: u32,
    overlap_fraction: u32,
    chain_log: u32,
    search_depth: u32,
    fast_length: u32,
    lc: u32,
    lp: u32,
    pb: u32,
    strategy: Strategy,
    high_compression: bool,
    divide_and_conquer: bool,
    do_xxhash: bool,
    block_size_log: u32,
    nb_threads: usize,
    buffer_log: u32,
}

impl Default for CompressOptions {
    fn default() -> Self {
        Self::with_level(6)
    }
}

impl CompressOptions {
    /// Creates options for a compression level; out-of-range levels clamp
    /// to `1..=12`.
    pub fn with_level(level: u32) -> Self {
        let level = level.clamp(1, LEVEL_MAX);
        let params = LEVELS[(level - 1) as usize];
        Self {
            level,
            dict_log: params.dict_log,
            overlap_fraction: params.overlap_fraction,
            chain_log: params.chain_log,
            search_depth: params.search_depth,
            fast_length: params.fast_length,
            lc: 3,
            lp: 0,
            pb: 2,
            strategy: params.strategy,
            high_compression: false,
            divide_and_conquer: true,
            do_xxhash: true,
            block_size_log: 0,
            nb_threads: 0,
            buffer_log: 8,
        }
    }

    /// Switches to the high-compression preset table (levels clamp to
    /// `1..=10`), or back to the standard table.
    pub fn high_compression(mut self, enable: bool) -> Self {
        self.high_compression = enable;
        let (level, params) = if enable {
            let level = self.level.clamp(1, HIGH_LEVEL_MAX);
            (level, HIGH_LEVELS[(level - 1) as usize])
        } else {
            (self.level, LEVELS[(self.level - 1) as usize])
        };
        self.level = level;
        self.dict_log = params.dict_log;
        self.overlap_fraction = params.overlap_fraction;
        self.chain_log = params.chain_log;
        self.search_depth = params.search_depth;
        self.fast_length = params.fast_length;
        self.strategy = params.strategy;
        self
    }

    /// Sets the dictionary size as a power of two (`20..=30`).
    pub fn dictionary_log(mut self, dict_log: u32) -> Result<Self> {
        if !(DICT_LOG_MIN..=DICT_LOG_MAX).contains(&dict_log) {
            return Err(Error::ParameterOutOfBound);
        }
        self.dict_log = dict_log;
        Ok(self)
    }

    /// Sets the fraction (in 1/16ths) of the dictionary carried between
    /// blocks (`0..=15`).
    pub fn overlap_fraction(mut self, fraction: u32) -> Result<Self> {
        if fraction > 15 {
            return Err(Error::ParameterOutOfBound);
        }
        self.overlap_fraction = fraction;
        Ok(self)
    }

    /// Sets the match-finder chain log (`4..=14`).
    pub fn chain_log(mut self, chain_log: u32) -> Result<Self> {
        if !(CHAIN_LOG_MIN..=CHAIN_LOG_MAX).contains(&chain_log) {
            return Err(Error::ParameterOutOfBound);
        }
        self.chain_log = chain_log;
        Ok(self)
    }

    /// Sets the match-finder depth cap (`6..=254`).
    pub fn search_depth(mut self, depth: u32) -> Result<Self> {
        if !(SEARCH_DEPTH_MIN..=SEARCH_DEPTH_MAX).contains(&depth) {
            return Err(Error::ParameterOutOfBound);
        }
        self.search_depth = depth;
        Ok(self)
    }

    /// Sets the early-accept match length (`6..=273`).
    pub fn fast_length(mut self, len: u32) -> Result<Self> {
        if !(FAST_LENGTH_MIN..=FAST_LENGTH_MAX).contains(&len) {
            return Err(Error::ParameterOutOfBound);
        }
        self.fast_length = len;
        Ok(self)
    }

    /// Sets the literal context bits (`0..=4`, with `lc + lp <= 4`).
    pub fn literal_ctx_bits(mut self, lc: u32) -> Result<Self> {
        if lc > 4 {
            return Err(Error::ParameterOutOfBound);
        }
        if lc + self.lp > 4 {
            return Err(Error::LclpMaxExceeded);
        }
        self.lc = lc;
        Ok(self)
    }

    /// Sets the literal position bits (`0..=4`, with `lc + lp <= 4`).
    pub fn literal_pos_bits(mut self, lp: u32) -> Result<Self> {
        if lp > 4 {
            return Err(Error::ParameterOutOfBound);
        }
        if self.lc + lp > 4 {
            return Err(Error::LclpMaxExceeded);
        }
        self.lp = lp;
        Ok(self)
    }

    /// Sets the position bits (`0..=4`).
    pub fn pos_bits(mut self, pb: u32) -> Result<Self> {
        if pb > 4 {
            return Err(Error::ParameterOutOfBound);
        }
        self.pb = pb;
        Ok(self)
    }

    /// Sets the parsing strategy.
    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Toggles the recursive match-finder refinement.
    pub fn divide_and_conquer(mut self, enable: bool) -> Self {
        self.divide_and_conquer = enable;
        self
    }

    /// Toggles the XXH64 frame trailer.
    pub fn do_xxhash(mut self, enable: bool) -> Self {
        self.do_xxhash = enable;
        self
    }

    /// Sets the block size as a power of two (`16..=30`), or 0 to use the
    /// dictionary size.
    pub fn block_size_log(mut self, log: u32) -> Result<Self> {
        if log != 0 && !(BLOCK_SIZE_LOG_MIN..=BLOCK_SIZE_LOG_MAX).contains(&log) {
            return Err(Error::ParameterOutOfBound);
        }
        self.block_size_log = log;
        Ok(self)
    }

    /// Sets the worker count; 0 means single-threaded inline execution.
    pub fn nb_threads(mut self, threads: usize) -> Result<Self> {
        if threads > 512 {
            return Err(Error::ParameterOutOfBound);
        }
        self.nb_threads = threads;
        Ok(self)
    }

    /// Sets the per-worker output buffer size log. Values below the
    /// implementation minimum of 4 are refused rather than silently raised.
    pub fn buffer_log(mut self, log: u32) -> Result<Self> {
        if !(BUFFER_LOG_MIN..=BUFFER_LOG_MAX).contains(&log) {
            return Err(Error::ParameterOutOfBound);
        }
        self.buffer_log = log;
        Ok(self)
    }

    /// Checks cross-field constraints; called once per frame start.
    pub fn validate(&self) -> Result<()> {
        LzmaProperties::new(self.lc, self.lp, self.pb).validate()
    }

    // ----- accessors ---------------------------------------------------

    /// The level this record was derived from.
    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn dict_log_value(&self) -> u32 {
        self.dict_log
    }

    /// Dictionary size in bytes.
    pub fn dict_size(&self) -> usize {
        1usize << self.dict_log
    }

    /// Overlap carried between blocks, in bytes.
    pub fn overlap_size(&self) -> usize {
        (self.dict_size() >> 4) * self.overlap_fraction as usize
    }

    /// Block partition size in bytes.
    pub fn block_size(&self) -> usize {
        if self.block_size_log == 0 {
            self.dict_size()
        } else {
            1usize << self.block_size_log
        }
    }

    pub fn chain_log_value(&self) -> u32 {
        self.chain_log
    }

    pub fn search_depth_value(&self) -> u32 {
        self.search_depth
    }

    pub fn fast_length_value(&self) -> u32 {
        self.fast_length
    }

    pub fn strategy_value(&self) -> Strategy {
        self.strategy
    }

    pub fn divide_and_conquer_value(&self) -> bool {
        self.divide_and_conquer
    }

    pub fn do_xxhash_value(&self) -> bool {
        self.do_xxhash
    }

    pub fn nb_threads_value(&self) -> usize {
        self.nb_threads
    }

    pub fn buffer_log_value(&self) -> u32 {
        self.buffer_log
    }

    /// Parser lookahead window for this configuration.
    pub(crate) fn lookahead(&self) -> u32 {
        self.strategy.lookahead(self.level)
    }

    /// Per-worker output buffer capacity in bytes.
    pub(crate) fn worker_buffer_size(&self) -> usize {
        1usize << (self.buffer_log + 10)
    }

    /// LZMA literal/position properties for chunk headers.
    pub fn lzma_props(&self) -> LzmaProperties {
        LzmaProperties::new(self.lc, self.lp, self.pb)
    }

    /// Frame-level properties.
    pub fn frame_props(&self) -> FrameProps {
        FrameProps {
            dict_log: self.dict_log,
            do_hash: self.do_xxhash,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_level_6() {
        let opts = CompressOptions::default();
        assert_eq!(opts.level(), 6);
        assert_eq!(opts.dict_size(), 1 << 24);
        assert_eq!(opts.strategy_value(), Strategy::Normal);
        assert!(opts.do_xxhash_value());
    }

    #[test]
    fn test_levels_clamp() {
        assert_eq!(CompressOptions::with_level(0).level(), 1);
        assert_eq!(CompressOptions::with_level(99).level(), LEVEL_MAX);
    }

    #[test]
    fn test_level_table_monotone() {
        for window in LEVELS.windows(2) {
            assert!(window[0].dict_log <= window[1].dict_log);
            assert!(window[0].search_depth <= window[1].search_depth);
            assert!(window[0].strategy <= window[1].strategy);
        }
    }

    #[test]
    fn test_high_compression_reconfigures() {
        let opts = CompressOptions::with_level(3).high_compression(true);
        assert_eq!(opts.strategy_value(), Strategy::Best);
        assert!(opts.search_depth_value() >= 96);

        let high12 = CompressOptions::with_level(12).high_compression(true);
        assert_eq!(high12.level(), HIGH_LEVEL_MAX);
    }

    #[test]
    fn test_setter_ranges() {
        let opts = CompressOptions::default();
        assert_eq!(
            opts.clone().dictionary_log(19).unwrap_err(),
            Error::ParameterOutOfBound
        );
        assert_eq!(
            opts.clone().dictionary_log(31).unwrap_err(),
            Error::ParameterOutOfBound
        );
        assert_eq!(
            opts.clone().overlap_fraction(16).unwrap_err(),
            Error::ParameterOutOfBound
        );
        assert_eq!(
            opts.clone().search_depth(255).unwrap_err(),
            Error::ParameterOutOfBound
        );
        assert_eq!(
            opts.clone().fast_length(5).unwrap_err(),
            Error::ParameterOutOfBound
        );
        assert_eq!(
            opts.clone().block_size_log(8).unwrap_err(),
            Error::ParameterOutOfBound
        );
        assert!(opts.clone().block_size_log(0).is_ok());
        assert!(opts.clone().dictionary_log(26).is_ok());
    }

    #[test]
    fn test_buffer_log_below_minimum_refused() {
        let opts = CompressOptions::default();
        assert_eq!(
            opts.clone().buffer_log(3).unwrap_err(),
            Error::ParameterOutOfBound
        );
        assert!(opts.buffer_log(BUFFER_LOG_MIN).is_ok());
    }

    #[test]
    fn test_lclp_constraint() {
        let opts = CompressOptions::default();
        // lc defaults to 3, so lp=2 breaks the budget.
        assert_eq!(
            opts.clone().literal_pos_bits(2).unwrap_err(),
            Error::LclpMaxExceeded
        );
        let ok = opts.clone().literal_ctx_bits(0).unwrap();
        assert!(ok.literal_pos_bits(4).is_ok());
        assert_eq!(
            opts.literal_ctx_bits(5).unwrap_err(),
            Error::ParameterOutOfBound
        );
    }

    #[test]
    fn test_overlap_size() {
        let opts = CompressOptions::with_level(6)
            .dictionary_log(20)
            .unwrap()
            .overlap_fraction(4)
            .unwrap();
        assert_eq!(opts.overlap_size(), (1 << 20) / 4);
    }

    #[test]
    fn test_frame_props_round_trip() {
        for dict_log in DICT_LOG_MIN..=DICT_LOG_MAX {
            for do_hash in [false, true] {
                let props = FrameProps { dict_log, do_hash };
                let parsed = FrameProps::from_byte(props.to_byte()).unwrap();
                assert_eq!(parsed, props);
            }
        }
    }

    #[test]
    fn test_frame_props_rejects_bad_class() {
        // Size class 20 would be 2^31.
        assert_eq!(
            FrameProps::from_byte(20).unwrap_err(),
            Error::CorruptionDetected
        );
        assert!(FrameProps::from_byte(19).is_ok());
        assert!(FrameProps::from_byte(0x80 | 9).is_ok());
    }

    #[test]
    fn test_lzma_props_byte() {
        let opts = CompressOptions::default();
        assert_eq!(opts.lzma_props().to_byte(), 0x5D);
    }
}
