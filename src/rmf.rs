//! Radix match-finder for fast-LZMA2 compression.
//!
//! The finder indexes one dictionary block at a time. Every position carries
//! a 32-bit link to the next older position sharing its 2-byte prefix, plus
//! a one-byte cached match-length hint; a 65536-entry head table anchors the
//! newest position of each prefix bucket.
//!
//! # Build / query split
//!
//! [`RadixMatchFinder::build`] runs in two passes:
//!
//! 1. **Bucketing** sorts positions into per-prefix chains. Links strictly
//!    decrease along a chain and end at a sentinel. The parallel build
//!    splits positions into contiguous worker ranges with private head/tail
//!    tables, then stitches the per-prefix chains serially.
//! 2. **Refinement** walks each chain and fills the length hints, either in
//!    one linear sweep or by recursive halving (`divide_and_conquer`), both
//!    yielding identical hints.
//!
//! Queries are read-only; encoding never runs concurrently with a build.
//!
//! # Hints
//!
//! `hint[p]` caches the common-prefix length between `p` and its link
//! target, saturated at [`HINT_MAX`] (0 = not computed). Linked positions
//! share a 2-byte prefix, so a computed hint is always at least 2, and the
//! query walk combines hints with the ultrametric property of prefix
//! lengths to avoid re-comparing bytes it already knows about.

use crate::model::{MATCH_LEN_MAX, MATCH_LEN_MIN};

/// Sentinel terminating every chain.
const NULL_LINK: u32 = u32::MAX;

/// Number of 2-byte-prefix buckets.
const HASH_SIZE: usize = 1 << 16;

/// Saturation value of the cached length hints (6 significant bits).
pub const HINT_MAX: u8 = 63;

/// Default chain traversal cap.
pub const DEFAULT_SEARCH_DEPTH: u32 = 254;

/// A match found by the radix match-finder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match {
    /// Distance back in the dictionary (1-indexed).
    pub offset: u32,
    /// Length of the match in bytes.
    pub length: u32,
}

impl Match {
    /// Creates a new match.
    #[inline]
    pub fn new(offset: u32, length: u32) -> Self {
        Self { offset, length }
    }
}

/// Radix match-finder over one dictionary block.
pub struct RadixMatchFinder {
    /// Newest position per 2-byte prefix.
    head: Vec<u32>,
    /// Link to the next older position with the same prefix, one per byte.
    table: Vec<u32>,
    /// Cached common-prefix length toward the link target.
    hints: Vec<u8>,
    /// Number of indexed bytes.
    data_len: usize,
    /// Distance cap for reported matches.
    dict_size: usize,
    /// Chain traversal cap per query.
    search_depth: u32,
    /// Chains longer than this recurse during refinement.
    dnc_threshold: usize,
    /// Recursive refinement toggle.
    divide_and_conquer: bool,
}

impl std::fmt::Debug for RadixMatchFinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RadixMatchFinder")
            .field("dict_size", &self.dict_size)
            .field("search_depth", &self.search_depth)
            .field("data_len", &self.data_len)
            .field("divide_and_conquer", &self.divide_and_conquer)
            .finish()
    }
}

#[inline]
fn prefix2(data: &[u8], pos: usize) -> usize {
    ((data[pos] as usize) << 8) | data[pos + 1] as usize
}

/// Extends a known common prefix of `len` bytes between `a < b`, capped.
#[inline]
fn extend_match(data: &[u8], a: usize, b: usize, mut len: u32, max_len: u32) -> u32 {
    while len < max_len && data[a + len as usize] == data[b + len as usize] {
        len += 1;
    }
    len
}

impl RadixMatchFinder {
    /// Creates a match-finder for the given dictionary size and depth cap.
    pub fn new(dict_size: usize, search_depth: u32) -> Self {
        Self {
            head: vec![NULL_LINK; HASH_SIZE],
            table: Vec::new(),
            hints: Vec::new(),
            data_len: 0,
            dict_size,
            search_depth: search_depth.max(4),
            dnc_threshold: 1 << 9,
            divide_and_conquer: true,
        }
    }

    /// Configures the refinement pass.
    ///
    /// `chain_log` sets the recursion threshold (`1 << chain_log` cells);
    /// with `divide_and_conquer` off the refinement is a single sweep.
    pub fn set_refinement(&mut self, chain_log: u32, divide_and_conquer: bool) {
        self.dnc_threshold = 1usize << chain_log;
        self.divide_and_conquer = divide_and_conquer;
    }

    /// Returns the dictionary size.
    pub fn dict_size(&self) -> usize {
        self.dict_size
    }

    /// Returns the chain traversal cap.
    pub fn search_depth(&self) -> u32 {
        self.search_depth
    }

    /// Drops the index, keeping allocations for the next block.
    pub fn reset(&mut self) {
        self.table.clear();
        self.hints.clear();
        self.data_len = 0;
        self.head.fill(NULL_LINK);
    }

    /// Builds the index for one block, single-threaded.
    pub fn build(&mut self, data: &[u8]) {
        self.prepare(data.len());
        if data.len() < MATCH_LEN_MIN as usize {
            return;
        }

        // Bucketing pass: newest-first chains per 2-byte prefix.
        for pos in 0..data.len() - 1 {
            let h = prefix2(data, pos);
            self.table[pos] = self.head[h];
            self.head[h] = pos as u32;
        }

        self.refine_all(data, 0..HASH_SIZE, None);
    }

    /// Builds the index using a rayon pool, splitting positions into
    /// contiguous worker ranges.
    #[cfg(feature = "parallel")]
    pub fn build_parallel(&mut self, data: &[u8], pool: &rayon::ThreadPool, jobs: usize) {
        use rayon::prelude::*;

        let positions = data.len().saturating_sub(1);
        if jobs <= 1 || positions < 1 << 17 {
            self.build(data);
            return;
        }
        self.prepare(data.len());

        let range_len = positions.div_ceil(jobs);

        // Bucketing pass: each worker links only inside its own contiguous
        // range and records per-prefix head/tail, so there are no
        // cross-worker writes.
        struct RangeHeads {
            head: Vec<u32>,
            tail: Vec<u32>,
        }

        let table = &mut self.table[..positions];
        let heads: Vec<RangeHeads> = pool.install(|| {
            table
                .par_chunks_mut(range_len)
                .enumerate()
                .map(|(index, links)| {
                    let start = index * range_len;
                    let mut local = RangeHeads {
                        head: vec![NULL_LINK; HASH_SIZE],
                        tail: vec![NULL_LINK; HASH_SIZE],
                    };
                    for (offset, link) in links.iter_mut().enumerate() {
                        let pos = start + offset;
                        let h = prefix2(data, pos);
                        *link = local.head[h];
                        if local.head[h] == NULL_LINK {
                            local.tail[h] = pos as u32;
                        }
                        local.head[h] = pos as u32;
                    }
                    local
                })
                .collect()
        });

        // Serial stitch: connect each range's oldest cell to the newest
        // cell of the ranges before it.
        for range in &heads {
            for h in 0..HASH_SIZE {
                let tail = range.tail[h];
                if tail != NULL_LINK {
                    self.table[tail as usize] = self.head[h];
                    self.head[h] = range.head[h];
                }
            }
        }

        self.refine_parallel(data, pool, jobs);
    }

    fn prepare(&mut self, len: usize) {
        self.data_len = len;
        self.head.fill(NULL_LINK);
        self.table.clear();
        self.table.resize(len, NULL_LINK);
        self.hints.clear();
        self.hints.resize(len, 0);
    }

    /// Refinement pass over a range of buckets.
    ///
    /// When `sink` is given, computed hints are appended to it instead of
    /// written in place (used by the parallel build's scatter step).
    fn refine_all(
        &mut self,
        data: &[u8],
        buckets: std::ops::Range<usize>,
        mut sink: Option<&mut Vec<(u32, u8)>>,
    ) {
        let mut chain: Vec<u32> = Vec::new();
        for h in buckets {
            let mut cell = self.head[h];
            if cell == NULL_LINK {
                continue;
            }
            chain.clear();
            let mut depth = 0;
            while cell != NULL_LINK && depth < self.search_depth {
                chain.push(cell);
                cell = self.table[cell as usize];
                depth += 1;
            }
            if chain.len() < 2 && cell == NULL_LINK {
                continue;
            }
            // Include the first cell past the depth cap so the last refined
            // cell still gets its hint.
            if cell != NULL_LINK {
                chain.push(cell);
            }

            if self.divide_and_conquer {
                Self::refine_chain_dnc(
                    data,
                    &chain,
                    self.dnc_threshold,
                    &mut self.hints,
                    &mut sink,
                );
            } else {
                for pair in chain.windows(2) {
                    let hint = Self::pair_hint(data, pair[1], pair[0]);
                    Self::store_hint(&mut self.hints, pair[0], hint, &mut sink);
                }
            }
        }
    }

    /// Recursive refinement: halve the chain until it fits the threshold.
    fn refine_chain_dnc(
        data: &[u8],
        chain: &[u32],
        threshold: usize,
        hints: &mut [u8],
        sink: &mut Option<&mut Vec<(u32, u8)>>,
    ) {
        if chain.len() <= threshold.max(2) {
            for pair in chain.windows(2) {
                let hint = Self::pair_hint(data, pair[1], pair[0]);
                Self::store_hint(hints, pair[0], hint, sink);
            }
            return;
        }
        let mid = chain.len() / 2;
        Self::refine_chain_dnc(data, &chain[..=mid], threshold, hints, sink);
        Self::refine_chain_dnc(data, &chain[mid..], threshold, hints, sink);
    }

    #[inline]
    fn pair_hint(data: &[u8], older: u32, newer: u32) -> u8 {
        // Same bucket, so at least the 2-byte prefix matches. The cap at the
        // block tail keeps the hint exact: a value below HINT_MAX is always
        // the true common-prefix length.
        let cap = (data.len() - newer as usize).min(HINT_MAX as usize) as u32;
        let len = extend_match(data, older as usize, newer as usize, 2, cap);
        len as u8
    }

    #[inline]
    fn store_hint(hints: &mut [u8], pos: u32, hint: u8, sink: &mut Option<&mut Vec<(u32, u8)>>) {
        match sink {
            Some(out) => out.push((pos, hint)),
            None => hints[pos as usize] = hint,
        }
    }

    /// Parallel refinement: buckets are independent, so each task refines a
    /// stripe of prefixes and the hints are scattered serially afterwards.
    #[cfg(feature = "parallel")]
    fn refine_parallel(&mut self, data: &[u8], pool: &rayon::ThreadPool, jobs: usize) {
        use rayon::prelude::*;

        let stripe = HASH_SIZE.div_ceil(jobs.max(1));
        let head = &self.head;
        let table = &self.table;
        let search_depth = self.search_depth;
        let threshold = self.dnc_threshold;
        let dnc = self.divide_and_conquer;

        let batches: Vec<Vec<(u32, u8)>> = pool.install(|| {
            (0..HASH_SIZE)
                .into_par_iter()
                .step_by(stripe)
                .map(|first| {
                    let mut out = Vec::new();
                    let mut chain: Vec<u32> = Vec::new();
                    for h in first..(first + stripe).min(HASH_SIZE) {
                        let mut cell = head[h];
                        if cell == NULL_LINK {
                            continue;
                        }
                        chain.clear();
                        let mut depth = 0;
                        while cell != NULL_LINK && depth < search_depth {
                            chain.push(cell);
                            cell = table[cell as usize];
                            depth += 1;
                        }
                        if cell != NULL_LINK {
                            chain.push(cell);
                        }
                        if chain.len() < 2 {
                            continue;
                        }
                        if dnc {
                            let mut sink = Some(&mut out);
                            Self::refine_chain_dnc(data, &chain, threshold, &mut [], &mut sink);
                        } else {
                            for pair in chain.windows(2) {
                                let hint = Self::pair_hint(data, pair[1], pair[0]);
                                out.push((pair[0], hint));
                            }
                        }
                    }
                    out
                })
                .collect()
        });

        for batch in batches {
            for (pos, hint) in batch {
                self.hints[pos as usize] = hint;
            }
        }
    }

    /// Emits matches at `pos` with strictly increasing lengths.
    ///
    /// The chain is walked nearest-first, so the shortest distance for a
    /// given length is reported first. Lengths start at 2 and saturate at
    /// the block tail or [`MATCH_LEN_MAX`]; the walk stops at the depth cap,
    /// the end of the chain, or the dictionary-size distance cap.
    pub fn find_matches(&self, data: &[u8], pos: usize, out: &mut Vec<Match>) {
        out.clear();
        if pos >= self.data_len || data.len().saturating_sub(pos) < MATCH_LEN_MIN as usize {
            return;
        }
        let max_len = (data.len() - pos).min(MATCH_LEN_MAX as usize) as u32;

        let mut best = MATCH_LEN_MIN - 1;
        let mut cand = self.table[pos];
        // Exact common-prefix length between `pos` and the current
        // candidate; (value, exact) pending verification.
        let first_hint = self.hints[pos];
        let mut carried = match first_hint {
            0 => (0u32, false),
            HINT_MAX => (HINT_MAX as u32, false),
            exact => (exact as u32, true),
        };

        for _ in 0..self.search_depth {
            if cand == NULL_LINK {
                break;
            }
            let cand_pos = cand as usize;
            let dist = pos - cand_pos;
            if dist > self.dict_size {
                break;
            }

            let (floor, exact) = carried;
            let lcp = if exact {
                floor.min(max_len)
            } else {
                extend_match(data, cand_pos, pos, floor.min(max_len), max_len)
            };

            if lcp > best {
                out.push(Match::new(dist as u32, lcp));
                best = lcp;
                if best >= max_len {
                    break;
                }
            }

            // Derive the next candidate's prefix length from this cell's
            // hint: prefix lengths are an ultrametric, so when the two
            // legs differ the minimum is exact.
            let link_hint = self.hints[cand_pos];
            cand = self.table[cand_pos];
            carried = match link_hint {
                0 => (0, false),
                HINT_MAX => {
                    if lcp < HINT_MAX as u32 {
                        (lcp, true)
                    } else {
                        (HINT_MAX as u32, false)
                    }
                }
                h => {
                    let h = h as u32;
                    if h < lcp {
                        (h, true)
                    } else if lcp < h {
                        (lcp, true)
                    } else {
                        (lcp, false)
                    }
                }
            };
        }
    }

    /// Returns the longest match at `pos`, if any.
    ///
    /// `scratch` avoids a per-call allocation; the result is the last entry
    /// of the increasing-length list.
    pub fn best_match(&self, data: &[u8], pos: usize, scratch: &mut Vec<Match>) -> Option<Match> {
        self.find_matches(data, pos, scratch);
        scratch.last().copied()
    }
}
