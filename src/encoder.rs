//! LZMA2 slice encoder.
//!
//! A slice is the unit of parallel encoding: a sub-range of one block whose
//! output is an independently decodable sequence of LZMA2 chunks. The first
//! chunk of every slice performs a state reset (with properties), so slice
//! outputs can be concatenated in input order with no other coupling.
//!
//! The encoder walks the slice left to right, chooses operations with the
//! configured parser, and closes a chunk when its decoded size approaches
//! the 2^16 cap, when the packed payload approaches its cap, or at the
//! slice end. Whenever the range-coded form would not beat the raw bytes,
//! the chunk is emitted uncompressed instead and the next compressed chunk
//! resets the coder state.
//!
//! Parser choice affects ratio only: any operation sequence the parsers
//! emit is a valid LZMA2 op stream, so round-trip correctness never depends
//! on parse quality.

use log::debug;

use crate::chunk::{
    self, CHUNK_PACKED_MAX, CHUNK_UNPACKED_MAX, COMPRESSED_HEADER_LEN, ResetMode,
    UNCOMPRESSED_HEADER_LEN,
};
use crate::model::{LzmaModel, MATCH_LEN_MAX, MATCH_LEN_MIN, NUM_REPS, State};
use crate::options::{CompressOptions, Strategy};
use crate::price::{self, PRICE_REFRESH_INTERVAL, PriceCache};
use crate::range_enc::RangeEncoder;
use crate::rmf::{Match, RadixMatchFinder};

/// Packed budget left in a chunk before it closes (headroom for one op).
const PACKED_MARGIN: usize = 400;

/// Distance cap for accepting a length-2 match in the greedy parser.
const SHORT_MATCH_DIST_MAX: u32 = 512;

/// One parsed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Literal,
    /// Normal match; `dist` is 0-indexed.
    Match { dist: u32, len: u32 },
    /// Rep match of length >= 2.
    Rep { index: usize, len: u32 },
    /// One byte at the rep0 distance.
    ShortRep,
}

impl Op {
    fn len(self) -> u32 {
        match self {
            Op::Literal | Op::ShortRep => 1,
            Op::Match { len, .. } | Op::Rep { len, .. } => len,
        }
    }
}

/// Statistics about an encoded slice.
#[derive(Debug, Clone, Copy, Default)]
pub struct EncodeStats {
    /// Number of literal operations.
    pub literals: u64,
    /// Number of match and rep operations.
    pub matches: u64,
    /// Bytes covered by matches and reps.
    pub matched_bytes: u64,
}

impl EncodeStats {
    /// Accumulates another slice's counters.
    pub fn merge(&mut self, other: &EncodeStats) {
        self.literals += other.literals;
        self.matches += other.matches;
        self.matched_bytes += other.matched_bytes;
    }

    /// Fraction of output bytes covered by matches.
    pub fn match_ratio(&self) -> f64 {
        let total = self.literals + self.matched_bytes;
        if total == 0 {
            0.0
        } else {
            self.matched_bytes as f64 / total as f64
        }
    }
}

/// One node of the forward parse lattice.
#[derive(Debug, Clone, Copy)]
struct Node {
    price: u32,
    state: State,
    reps: [u32; NUM_REPS],
    from: u32,
    op: Op,
}

impl Node {
    fn unreached() -> Self {
        Self {
            price: u32::MAX,
            state: State::new(),
            reps: [0; NUM_REPS],
            from: 0,
            op: Op::Literal,
        }
    }
}

/// Encodes one slice of a block into `out`.
///
/// `data` is the whole block buffer (overlap prefix included); the slice
/// covers `start..end`. `global_base` is the frame-global position of
/// `data[0]`, used for position-dependent contexts. `first_of_frame` marks
/// the slice that must open the frame with a dictionary reset.
pub(crate) fn encode_slice(
    data: &[u8],
    rmf: &RadixMatchFinder,
    opts: &CompressOptions,
    global_base: u64,
    start: usize,
    end: usize,
    first_of_frame: bool,
    out: &mut Vec<u8>,
) -> EncodeStats {
    let mut enc = SliceEncoder::new(data, rmf, opts, global_base);
    enc.run(start, end, first_of_frame, out);
    debug!(
        "slice {}..{} encoded: {} literals, {} matches",
        start, end, enc.stats.literals, enc.stats.matches
    );
    enc.stats
}

struct SliceEncoder<'a> {
    data: &'a [u8],
    rmf: &'a RadixMatchFinder,
    opts: &'a CompressOptions,
    model: LzmaModel,
    cache: PriceCache,
    ops_since_refresh: u32,
    lookahead: u32,
    matches: Vec<Match>,
    nodes: Vec<Node>,
    window_ops: Vec<Op>,
    global_base: u64,
    stats: EncodeStats,
}

impl<'a> SliceEncoder<'a> {
    fn new(
        data: &'a [u8],
        rmf: &'a RadixMatchFinder,
        opts: &'a CompressOptions,
        global_base: u64,
    ) -> Self {
        let model = LzmaModel::new(opts.lzma_props());
        let cache = PriceCache::new(&model);
        let lookahead = opts.lookahead();
        Self {
            data,
            rmf,
            opts,
            model,
            cache,
            ops_since_refresh: 0,
            lookahead,
            matches: Vec::with_capacity(64),
            nodes: Vec::new(),
            window_ops: Vec::with_capacity(lookahead as usize + 1),
            global_base,
            stats: EncodeStats::default(),
        }
    }

    fn run(&mut self, start: usize, end: usize, first_of_frame: bool, out: &mut Vec<u8>) {
        let props_byte = self.opts.lzma_props().to_byte();
        let mut dict_reset_pending = first_of_frame;
        let mut state_reset_pending = true;
        let mut pos = start;

        while pos < end {
            if state_reset_pending {
                self.model.reset();
                self.cache.refresh(&self.model);
                self.ops_since_refresh = 0;
            }

            let chunk_start = pos;
            let chunk_cap = (end - chunk_start).min(CHUNK_UNPACKED_MAX);
            let mut rc = RangeEncoder::with_capacity(self.opts.worker_buffer_size().min(1 << 16));

            while pos < chunk_start + chunk_cap {
                let unpacked_left = chunk_start + chunk_cap - pos;
                if unpacked_left < MATCH_LEN_MAX as usize && pos + unpacked_left < end {
                    // Not enough room for a worst-case op; close the chunk
                    // unless the slice itself ends inside the window.
                    break;
                }
                if rc.pending_len() >= CHUNK_PACKED_MAX - PACKED_MARGIN {
                    break;
                }

                let max_len = unpacked_left.min(MATCH_LEN_MAX as usize) as u32;
                self.parse(pos, max_len);
                for i in 0..self.window_ops.len() {
                    if rc.pending_len() >= CHUNK_PACKED_MAX - PACKED_MARGIN {
                        break;
                    }
                    let op = self.window_ops[i];
                    self.apply_op(&mut rc, op, pos);
                    pos += op.len() as usize;
                }

                self.ops_since_refresh += self.window_ops.len() as u32;
                if self.ops_since_refresh >= PRICE_REFRESH_INTERVAL {
                    self.cache.refresh(&self.model);
                    self.ops_since_refresh = 0;
                }
            }

            let unpacked = pos - chunk_start;
            debug_assert!(unpacked > 0 && unpacked <= CHUNK_UNPACKED_MAX);
            let payload = rc.finish();

            if payload.len() + COMPRESSED_HEADER_LEN + 1 >= unpacked + UNCOMPRESSED_HEADER_LEN {
                chunk::write_uncompressed_chunk(out, &self.data[chunk_start..pos], dict_reset_pending);
                // The model adapted to ops the decoder will never see.
                state_reset_pending = true;
            } else {
                let reset = if dict_reset_pending {
                    ResetMode::DictStateProps
                } else if state_reset_pending {
                    ResetMode::StateProps
                } else {
                    ResetMode::None
                };
                chunk::write_compressed_chunk(out, &payload, unpacked, reset, props_byte);
                state_reset_pending = false;
            }
            dict_reset_pending = false;
        }
    }

    // ----- op application ---------------------------------------------

    fn apply_op(&mut self, rc: &mut RangeEncoder, op: Op, pos: usize) {
        let gpos = self.global_base + pos as u64;
        match op {
            Op::Literal => {
                let byte = self.data[pos];
                let prev_byte = if pos > 0 { self.data[pos - 1] } else { 0 };
                let match_byte = if self.model.state.is_literal() {
                    0
                } else {
                    self.data[pos - self.model.reps[0] as usize - 1]
                };
                self.model.encode_literal(rc, gpos, prev_byte, byte, match_byte);
                self.stats.literals += 1;
            }
            Op::Match { dist, len } => {
                self.model.encode_match(rc, dist, len, gpos);
                self.stats.matches += 1;
                self.stats.matched_bytes += len as u64;
            }
            Op::Rep { index, len } => {
                self.model.encode_rep(rc, index, len, gpos);
                self.stats.matches += 1;
                self.stats.matched_bytes += len as u64;
            }
            Op::ShortRep => {
                self.model.encode_short_rep(rc, gpos);
                self.stats.matches += 1;
                self.stats.matched_bytes += 1;
            }
        }
    }

    // ----- parsing -----------------------------------------------------

    /// Fills `window_ops` with the operations to emit at `pos`.
    fn parse(&mut self, pos: usize, max_len: u32) {
        self.window_ops.clear();
        if max_len < MATCH_LEN_MIN {
            self.window_ops.push(Op::Literal);
            return;
        }
        match self.opts.strategy_value() {
            Strategy::Fast => self.parse_greedy(pos, max_len),
            Strategy::Normal | Strategy::Best => self.parse_window(pos, max_len),
        }
    }

    /// Length of the match at rep distance `index`, capped at `max_len`.
    fn rep_len(&self, reps: &[u32; NUM_REPS], pos: usize, index: usize, max_len: u32) -> u32 {
        let dist = reps[index] as usize + 1;
        if dist > pos {
            return 0;
        }
        let src = pos - dist;
        let mut len = 0u32;
        while len < max_len && self.data[src + len as usize] == self.data[pos + len as usize] {
            len += 1;
        }
        len
    }

    /// Greedy selection: take the longest of the best rep and the best
    /// normal match, with a mild preference for reps.
    fn parse_greedy(&mut self, pos: usize, max_len: u32) {
        let reps = self.model.reps;
        let mut best_rep_len = 0u32;
        let mut best_rep_index = 0usize;
        for index in 0..NUM_REPS {
            let len = self.rep_len(&reps, pos, index, max_len);
            if len > best_rep_len {
                best_rep_len = len;
                best_rep_index = index;
            }
        }

        let best = self
            .rmf
            .best_match(self.data, pos, &mut self.matches)
            .unwrap_or(Match::new(0, 0));
        // The match-finder bounds lengths by the block, not the slice; clamp
        // before deciding so neither branch can cross the slice end.
        let best_len = best.length.min(max_len);

        // A rep almost as long as the match wins: it needs no distance bits.
        if best_rep_len >= MATCH_LEN_MIN && best_rep_len + 2 >= best_len {
            self.window_ops.push(Op::Rep {
                index: best_rep_index,
                len: best_rep_len,
            });
            return;
        }
        if best_len >= MATCH_LEN_MIN
            && (best_len > MATCH_LEN_MIN || best.offset <= SHORT_MATCH_DIST_MAX)
        {
            self.window_ops.push(Op::Match {
                dist: best.offset - 1,
                len: best_len,
            });
            return;
        }
        // A length-1 rep is never cheaper than a literal here.
        self.window_ops.push(Op::Literal);
    }

    fn short_rep_possible(&self, reps: &[u32; NUM_REPS], pos: usize) -> bool {
        let dist = reps[0] as usize + 1;
        dist <= pos && self.data[pos - dist] == self.data[pos]
    }

    /// Forward dynamic program over a bounded window: one lattice node per
    /// position, keeping the cheapest arrival, then backtrack.
    fn parse_window(&mut self, pos: usize, max_len: u32) {
        let fast_length = self.opts.fast_length_value();

        // Long matches skip the lattice entirely.
        let best = self.rmf.best_match(self.data, pos, &mut self.matches);
        if let Some(m) = best {
            if m.length >= fast_length {
                self.window_ops.push(Op::Match {
                    dist: m.offset - 1,
                    len: m.length.min(max_len),
                });
                return;
            }
        }
        let reps = self.model.reps;
        for index in 0..NUM_REPS {
            let len = self.rep_len(&reps, pos, index, max_len);
            if len >= fast_length {
                self.window_ops.push(Op::Rep { index, len });
                return;
            }
        }

        let window = (self.lookahead).min(max_len) as usize;
        if window < 2 {
            self.window_ops.push(Op::Literal);
            return;
        }

        self.nodes.clear();
        self.nodes.resize(window + 1, Node::unreached());
        self.nodes[0] = Node {
            price: 0,
            state: self.model.state,
            reps: self.model.reps,
            from: 0,
            op: Op::Literal,
        };

        for i in 0..window {
            if self.nodes[i].price == u32::MAX {
                continue;
            }
            let node = self.nodes[i];
            let here = pos + i;
            let gpos = self.global_base + here as u64;
            let pos_state = self.model.pos_state(gpos);
            let cap = (window - i) as u32;

            // Literal edge.
            let prev_byte = if here > 0 { self.data[here - 1] } else { 0 };
            let match_byte = if node.state.is_literal() {
                0
            } else {
                self.data[here - node.reps[0] as usize - 1]
            };
            let lit_price = node.price
                + price::literal_price(
                    &self.model,
                    node.state,
                    gpos,
                    prev_byte,
                    self.data[here],
                    match_byte,
                );
            if lit_price < self.nodes[i + 1].price {
                let mut state = node.state;
                state.update_literal();
                self.nodes[i + 1] = Node {
                    price: lit_price,
                    state,
                    reps: node.reps,
                    from: i as u32,
                    op: Op::Literal,
                };
            }

            // Short rep edge.
            if !node.state.is_literal() && self.short_rep_possible(&node.reps, here) {
                let price = node.price + self.cache.short_rep_price(node.state, pos_state);
                if price < self.nodes[i + 1].price {
                    let mut state = node.state;
                    state.update_short_rep();
                    self.nodes[i + 1] = Node {
                        price,
                        state,
                        reps: node.reps,
                        from: i as u32,
                        op: Op::ShortRep,
                    };
                }
            }

            // Rep edges: the maximal length per rep distance.
            for index in 0..NUM_REPS {
                let len = self.rep_len(&node.reps, here, index, cap);
                if len < MATCH_LEN_MIN {
                    continue;
                }
                let price = node.price + self.cache.rep_price(node.state, pos_state, index, len);
                let target = i + len as usize;
                if price < self.nodes[target].price {
                    let mut state = node.state;
                    state.update_long_rep();
                    let mut reps = node.reps;
                    let d = reps[index];
                    for k in (1..=index).rev() {
                        reps[k] = reps[k - 1];
                    }
                    reps[0] = d;
                    self.nodes[target] = Node {
                        price,
                        state,
                        reps,
                        from: i as u32,
                        op: Op::Rep { index, len },
                    };
                }
            }

            // Match edges: each length class reported by the match-finder.
            let mut scratch = std::mem::take(&mut self.matches);
            self.rmf.find_matches(self.data, here, &mut scratch);
            for m in &scratch {
                let len = m.length.min(cap);
                if len < MATCH_LEN_MIN {
                    continue;
                }
                let dist = m.offset - 1;
                let price = node.price
                    + self
                        .cache
                        .match_price(&self.model, node.state, pos_state, dist, len);
                let target = i + len as usize;
                if price < self.nodes[target].price {
                    let mut state = node.state;
                    state.update_match();
                    let reps = [dist, node.reps[0], node.reps[1], node.reps[2]];
                    self.nodes[target] = Node {
                        price,
                        state,
                        reps,
                        from: i as u32,
                        op: Op::Match { dist, len },
                    };
                }
            }
            self.matches = scratch;
        }

        // Backtrack from the window end; literal edges guarantee it was
        // reached.
        let mut at = window;
        while at > 0 {
            let node = self.nodes[at];
            self.window_ops.push(node.op);
            at = node.from as usize;
        }
        self.window_ops.reverse();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkHeader;
    use crate::options::CompressOptions;
    use crate::rmf::DEFAULT_SEARCH_DEPTH;

    fn encode_all(data: &[u8], opts: &CompressOptions) -> Vec<u8> {
        let mut rmf = RadixMatchFinder::new(opts.dict_size(), DEFAULT_SEARCH_DEPTH);
        rmf.build(data);
        let mut out = Vec::new();
        encode_slice(data, &rmf, opts, 0, 0, data.len(), true, &mut out);
        out
    }

    fn walk_chunks(frame_body: &[u8]) -> (usize, usize) {
        // Returns (chunk count, total unpacked) while checking framing.
        let mut offset = 0;
        let mut chunks = 0;
        let mut unpacked_total = 0;
        loop {
            if offset == frame_body.len() {
                return (chunks, unpacked_total);
            }
            let (header, len) = ChunkHeader::parse(&frame_body[offset..]).unwrap();
            offset += len;
            match header {
                ChunkHeader::EndOfFrame => panic!("unexpected terminator inside slice output"),
                ChunkHeader::Uncompressed { unpacked_size, .. } => {
                    offset += unpacked_size;
                    unpacked_total += unpacked_size;
                }
                ChunkHeader::Compressed {
                    unpacked_size,
                    packed_size,
                    ..
                } => {
                    offset += packed_size;
                    unpacked_total += unpacked_size;
                }
            }
            chunks += 1;
            assert!(offset <= frame_body.len(), "chunk overruns the buffer");
        }
    }

    #[test]
    fn test_empty_slice_produces_nothing() {
        let opts = CompressOptions::with_level(1);
        let data = b"abc";
        let mut rmf = RadixMatchFinder::new(opts.dict_size(), 32);
        rmf.build(data);
        let mut out = Vec::new();
        encode_slice(data, &rmf, &opts, 0, 1, 1, false, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_first_chunk_resets_dictionary() {
        let opts = CompressOptions::with_level(3);
        let data = b"repeat repeat repeat repeat repeat repeat";
        let out = encode_all(data, &opts);
        let (header, _) = ChunkHeader::parse(&out).unwrap();
        match header {
            ChunkHeader::Compressed { reset, props, .. } => {
                assert_eq!(reset, ResetMode::DictStateProps);
                assert_eq!(props, Some(0x5D));
            }
            ChunkHeader::Uncompressed { reset_dict, .. } => assert!(reset_dict),
            ChunkHeader::EndOfFrame => panic!("empty output"),
        }
    }

    #[test]
    fn test_slice_output_covers_input() {
        for level in [1u32, 4, 7] {
            let opts = CompressOptions::with_level(level);
            let data: Vec<u8> = (0..200_000u32).map(|i| (i * 31 % 251) as u8).collect();
            let out = encode_all(&data, &opts);
            let (chunks, unpacked) = walk_chunks(&out);
            assert!(chunks >= 3, "expected multiple chunks, got {chunks}");
            assert_eq!(unpacked, data.len());
        }
    }

    #[test]
    fn test_incompressible_data_falls_back_to_raw_chunks() {
        let opts = CompressOptions::with_level(2);
        let mut seed = 0x1234_5678u32;
        let data: Vec<u8> = (0..100_000)
            .map(|_| {
                seed = seed.wrapping_mul(1103515245).wrapping_add(12345);
                (seed >> 17) as u8
            })
            .collect();
        let out = encode_all(&data, &opts);
        let (_, unpacked) = walk_chunks(&out);
        assert_eq!(unpacked, data.len());
        // Raw chunks bound the expansion to the per-chunk header overhead.
        assert!(out.len() <= data.len() + data.len() / 1000 + 64);
    }

    #[test]
    fn test_compressible_data_shrinks() {
        let opts = CompressOptions::with_level(6);
        let data = b"the quick brown fox jumps over the lazy dog. ".repeat(500);
        let out = encode_all(&data, &opts);
        let (_, unpacked) = walk_chunks(&out);
        assert_eq!(unpacked, data.len());
        assert!(
            out.len() < data.len() / 4,
            "periodic text should compress well: {} vs {}",
            out.len(),
            data.len()
        );
    }

    #[test]
    fn test_greedy_match_clamped_at_slice_end() {
        // Periodic data has a near-maximal match at every position, so an
        // unclamped greedy pick near the slice tail would run past `end`
        // and the next slice would re-encode bytes this one already covered.
        let opts = CompressOptions::with_level(1);
        let data: Vec<u8> = b"abcd".iter().copied().cycle().take(200_000).collect();
        let mut rmf = RadixMatchFinder::new(opts.dict_size(), 32);
        rmf.build(&data);

        let boundary = 100_000;
        let mut head = Vec::new();
        encode_slice(&data, &rmf, &opts, 0, 0, boundary, true, &mut head);
        let (_, unpacked_head) = walk_chunks(&head);
        assert_eq!(unpacked_head, boundary);

        let mut tail = Vec::new();
        encode_slice(&data, &rmf, &opts, 0, boundary, data.len(), false, &mut tail);
        let (_, unpacked_tail) = walk_chunks(&tail);
        assert_eq!(unpacked_tail, data.len() - boundary);
    }

    #[test]
    fn test_stats_track_ops() {
        let opts = CompressOptions::with_level(4);
        let data = b"abcabcabcabcabcabcabcabc";
        let mut rmf = RadixMatchFinder::new(opts.dict_size(), 32);
        rmf.build(data);
        let mut out = Vec::new();
        let stats = encode_slice(data, &rmf, &opts, 0, 0, data.len(), true, &mut out);
        assert!(stats.literals >= 3);
        assert!(stats.matches >= 1);
        assert!(stats.match_ratio() > 0.5);
    }

    #[test]
    fn test_op_len() {
        assert_eq!(Op::Literal.len(), 1);
        assert_eq!(Op::ShortRep.len(), 1);
        assert_eq!(Op::Match { dist: 4, len: 9 }.len(), 9);
        assert_eq!(Op::Rep { index: 2, len: 5 }.len(), 5);
    }
}
