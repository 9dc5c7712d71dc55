//! Bit-price approximation for parser decisions.
//!
//! Prices approximate `-log2(probability)` in 1/16-bit units. The table is
//! built once at compile time by the squaring method, so a 50% counter
//! prices at ~16 and the approximation stays within a fraction of a bit
//! across the counter range.
//!
//! [`PriceCache`] snapshots the composite decision prices (match/rep
//! choices, length tables, distance slots) from a live model; the encoder
//! refreshes it every [`PRICE_REFRESH_INTERVAL`] operations, so parser
//! prices lag the adaptive counters by a bounded amount by design.

use crate::model::{
    DIST_ALIGN_BITS, DIST_ALIGN_SIZE, DIST_SLOT_BITS, DIST_SLOTS, END_POS_MODEL_INDEX, LEN_LOW_BITS,
    LEN_LOW_SYMBOLS, LEN_MID_BITS, LEN_MID_SYMBOLS, LengthModel, LzmaModel, MATCH_LEN_MAX,
    MATCH_LEN_MIN, NUM_STATES, POS_STATES_MAX, START_POS_MODEL_INDEX, State, get_dist_slot,
};
use crate::range_enc::BIT_MODEL_TOTAL;

/// Price of one whole bit (fixed-point scale).
pub const PRICE_ONE_BIT: u32 = 1 << PRICE_SCALE_BITS;

/// Fixed-point fractional bits in every price value.
pub const PRICE_SCALE_BITS: u32 = 4;

/// Parser operations between price-table refreshes.
pub const PRICE_REFRESH_INTERVAL: u32 = 4096;

/// Probabilities are reduced to this many table entries.
const NUM_MOVE_REDUCING_BITS: u32 = 4;

const PROB_PRICES_LEN: usize = (BIT_MODEL_TOTAL >> NUM_MOVE_REDUCING_BITS) as usize;

/// `-log2(prob / 2048)` in 1/16-bit units, indexed by `prob >> 4`.
static PROB_PRICES: [u32; PROB_PRICES_LEN] = build_prob_prices();

const fn build_prob_prices() -> [u32; PROB_PRICES_LEN] {
    let mut prices = [0u32; PROB_PRICES_LEN];
    // Four squarings extract 4 fractional bits of the logarithm.
    let mut i: u32 = (1 << NUM_MOVE_REDUCING_BITS) / 2;
    while i < BIT_MODEL_TOTAL {
        let mut w: u64 = i as u64;
        let mut bit_count: u32 = 0;
        let mut j = 0;
        while j < PRICE_SCALE_BITS {
            w = w * w;
            bit_count <<= 1;
            while w >= 1 << 16 {
                w >>= 1;
                bit_count += 1;
            }
            j += 1;
        }
        prices[(i >> NUM_MOVE_REDUCING_BITS) as usize] =
            (11 << PRICE_SCALE_BITS) - 15 - bit_count;
        i += 1 << NUM_MOVE_REDUCING_BITS;
    }
    prices
}

/// Price of encoding `bit` against an adaptive probability.
#[inline]
pub fn get_price(prob: u16, bit: u32) -> u32 {
    let p = prob as u32 ^ (bit.wrapping_neg() & (BIT_MODEL_TOTAL - 1));
    PROB_PRICES[(p >> NUM_MOVE_REDUCING_BITS) as usize]
}

/// Price of a 0 bit.
#[inline]
pub fn get_price_0(prob: u16) -> u32 {
    PROB_PRICES[(prob as u32 >> NUM_MOVE_REDUCING_BITS) as usize]
}

/// Price of a 1 bit.
#[inline]
pub fn get_price_1(prob: u16) -> u32 {
    PROB_PRICES[((prob as u32 ^ (BIT_MODEL_TOTAL - 1)) >> NUM_MOVE_REDUCING_BITS) as usize]
}

/// Price of `count` direct (unmodeled) bits.
#[inline]
pub fn direct_bits_price(count: u32) -> u32 {
    count << PRICE_SCALE_BITS
}

/// Price of a bit-tree symbol, most significant bit first.
pub fn bit_tree_price(probs: &[u16], num_bits: u32, symbol: u32) -> u32 {
    let mut price = 0u32;
    let mut m = 1u32;
    let mut i = num_bits;
    while i > 0 {
        i -= 1;
        let bit = (symbol >> i) & 1;
        price += get_price(probs[m as usize], bit);
        m = (m << 1) | bit;
    }
    price
}

/// Price of a reverse bit-tree symbol, least significant bit first.
pub fn bit_tree_reverse_price(probs: &[u16], num_bits: u32, symbol: u32) -> u32 {
    let mut price = 0u32;
    let mut m = 1u32;
    for i in 0..num_bits {
        let bit = (symbol >> i) & 1;
        price += get_price(probs[m as usize], bit);
        m = (m << 1) | bit;
    }
    price
}

/// Price of a length symbol straight from a live length model.
pub fn length_price(len_model: &LengthModel, len: u32, pos_state: usize) -> u32 {
    let l = len - MATCH_LEN_MIN;
    if l < LEN_LOW_SYMBOLS as u32 {
        get_price_0(len_model.choice) + bit_tree_price(&len_model.low[pos_state], LEN_LOW_BITS, l)
    } else if l < (LEN_LOW_SYMBOLS + LEN_MID_SYMBOLS) as u32 {
        get_price_1(len_model.choice)
            + get_price_0(len_model.choice2)
            + bit_tree_price(
                &len_model.mid[pos_state],
                LEN_MID_BITS,
                l - LEN_LOW_SYMBOLS as u32,
            )
    } else {
        get_price_1(len_model.choice)
            + get_price_1(len_model.choice2)
            + bit_tree_price(
                &len_model.high,
                crate::model::LEN_HIGH_BITS,
                l - (LEN_LOW_SYMBOLS + LEN_MID_SYMBOLS) as u32,
            )
    }
}

/// Price of a literal at `pos`, including the `is_match = 0` decision bit.
pub fn literal_price(
    model: &LzmaModel,
    state: State,
    pos: u64,
    prev_byte: u8,
    byte: u8,
    match_byte: u8,
) -> u32 {
    let pos_state = model.pos_state(pos);
    let mut price = get_price_0(model.is_match[state.value()][pos_state]);
    let probs = &model.literal[model.lit_context(pos, prev_byte)];

    if state.is_literal() {
        let mut symbol = 1usize;
        for i in (0..8).rev() {
            let bit = ((byte >> i) & 1) as u32;
            price += get_price(probs[symbol], bit);
            symbol = (symbol << 1) | bit as usize;
        }
    } else {
        let mut symbol = 1usize;
        let mut matched = true;
        for i in (0..8).rev() {
            let bit = ((byte >> i) & 1) as u32;
            if matched {
                let match_bit = ((match_byte >> i) & 1) as usize;
                price += get_price(probs[0x100 + (match_bit << 8) + symbol], bit);
                matched = match_bit == bit as usize;
            } else {
                price += get_price(probs[symbol], bit);
            }
            symbol = (symbol << 1) | bit as usize;
        }
    }
    price
}

/// Cached composite prices, refreshed from the live model periodically.
#[derive(Debug, Clone)]
pub struct PriceCache {
    /// `is_match = 1` price per (state, pos_state).
    match_bit: [[u32; POS_STATES_MAX]; NUM_STATES],
    /// `is_rep = 0` after a match bit.
    rep0_choice: [u32; NUM_STATES],
    /// `is_rep = 1` after a match bit.
    rep_choice: [u32; NUM_STATES],
    rep_g0: [u32; NUM_STATES],
    rep_g0_not: [u32; NUM_STATES],
    rep_g1: [u32; NUM_STATES],
    rep_g1_not: [u32; NUM_STATES],
    rep_g2: [u32; NUM_STATES],
    rep_g2_not: [u32; NUM_STATES],
    rep0_long: [[u32; POS_STATES_MAX]; NUM_STATES],
    rep0_short: [[u32; POS_STATES_MAX]; NUM_STATES],
    /// Slot-tree prices per length class.
    dist_slot: [[u32; DIST_SLOTS]; 4],
    /// Align-tree prices for large distances.
    align: [u32; DIST_ALIGN_SIZE],
    /// Length prices, `[pos_state][len - 2]`, for both length coders.
    match_len: Vec<[u32; (MATCH_LEN_MAX - MATCH_LEN_MIN + 1) as usize]>,
    rep_len: Vec<[u32; (MATCH_LEN_MAX - MATCH_LEN_MIN + 1) as usize]>,
    num_pos_states: usize,
}

impl PriceCache {
    /// Builds a cache snapshotting the given model.
    pub fn new(model: &LzmaModel) -> Self {
        let num_pos_states = model.props().num_pos_states();
        let len_table = vec![[0u32; (MATCH_LEN_MAX - MATCH_LEN_MIN + 1) as usize]; num_pos_states];
        let mut cache = Self {
            match_bit: [[0; POS_STATES_MAX]; NUM_STATES],
            rep0_choice: [0; NUM_STATES],
            rep_choice: [0; NUM_STATES],
            rep_g0: [0; NUM_STATES],
            rep_g0_not: [0; NUM_STATES],
            rep_g1: [0; NUM_STATES],
            rep_g1_not: [0; NUM_STATES],
            rep_g2: [0; NUM_STATES],
            rep_g2_not: [0; NUM_STATES],
            rep0_long: [[0; POS_STATES_MAX]; NUM_STATES],
            rep0_short: [[0; POS_STATES_MAX]; NUM_STATES],
            dist_slot: [[0; DIST_SLOTS]; 4],
            align: [0; DIST_ALIGN_SIZE],
            match_len: len_table.clone(),
            rep_len: len_table,
            num_pos_states,
        };
        cache.refresh(model);
        cache
    }

    /// Recomputes all cached prices from the model's current counters.
    pub fn refresh(&mut self, model: &LzmaModel) {
        for st in 0..NUM_STATES {
            for ps in 0..self.num_pos_states {
                self.match_bit[st][ps] = get_price_1(model.is_match[st][ps]);
                self.rep0_long[st][ps] = get_price_1(model.is_rep0_long[st][ps]);
                self.rep0_short[st][ps] = get_price_0(model.is_rep0_long[st][ps]);
            }
            self.rep0_choice[st] = get_price_0(model.is_rep[st]);
            self.rep_choice[st] = get_price_1(model.is_rep[st]);
            self.rep_g0[st] = get_price_1(model.is_rep_g0[st]);
            self.rep_g0_not[st] = get_price_0(model.is_rep_g0[st]);
            self.rep_g1[st] = get_price_1(model.is_rep_g1[st]);
            self.rep_g1_not[st] = get_price_0(model.is_rep_g1[st]);
            self.rep_g2[st] = get_price_1(model.is_rep_g2[st]);
            self.rep_g2_not[st] = get_price_0(model.is_rep_g2[st]);
        }

        for len_state in 0..4 {
            for slot in 0..DIST_SLOTS as u32 {
                self.dist_slot[len_state][slot as usize] =
                    bit_tree_price(&model.distance.slot[len_state], DIST_SLOT_BITS, slot);
            }
        }
        for sym in 0..DIST_ALIGN_SIZE as u32 {
            self.align[sym as usize] =
                bit_tree_reverse_price(&model.distance.align, DIST_ALIGN_BITS, sym);
        }

        for ps in 0..self.num_pos_states {
            for len in MATCH_LEN_MIN..=MATCH_LEN_MAX {
                self.match_len[ps][(len - MATCH_LEN_MIN) as usize] =
                    length_price(&model.match_len, len, ps);
                self.rep_len[ps][(len - MATCH_LEN_MIN) as usize] =
                    length_price(&model.rep_len, len, ps);
            }
        }
    }

    /// Price of a normal match, complete with decision bits and distance.
    pub fn match_price(
        &self,
        model: &LzmaModel,
        state: State,
        pos_state: usize,
        dist: u32,
        len: u32,
    ) -> u32 {
        let st = state.value();
        self.match_bit[st][pos_state]
            + self.rep0_choice[st]
            + self.match_len[pos_state][(len - MATCH_LEN_MIN) as usize]
            + self.distance_price(model, dist, len)
    }

    /// Price of a rep match of length >= 2.
    pub fn rep_price(&self, state: State, pos_state: usize, rep_index: usize, len: u32) -> u32 {
        let st = state.value();
        let mut price = self.match_bit[st][pos_state] + self.rep_choice[st];
        match rep_index {
            0 => price += self.rep_g0_not[st] + self.rep0_long[st][pos_state],
            1 => price += self.rep_g0[st] + self.rep_g1_not[st],
            2 => price += self.rep_g0[st] + self.rep_g1[st] + self.rep_g2_not[st],
            _ => price += self.rep_g0[st] + self.rep_g1[st] + self.rep_g2[st],
        }
        price + self.rep_len[pos_state][(len - MATCH_LEN_MIN) as usize]
    }

    /// Price of a short rep (single byte at rep0).
    pub fn short_rep_price(&self, state: State, pos_state: usize) -> u32 {
        let st = state.value();
        self.match_bit[st][pos_state]
            + self.rep_choice[st]
            + self.rep_g0_not[st]
            + self.rep0_short[st][pos_state]
    }

    /// Distance price: cached slot tree plus live footer bits.
    pub fn distance_price(&self, model: &LzmaModel, dist: u32, len: u32) -> u32 {
        let len_state = ((len - MATCH_LEN_MIN).min(3)) as usize;
        let slot = get_dist_slot(dist);
        let mut price = self.dist_slot[len_state][slot as usize];

        if slot >= START_POS_MODEL_INDEX as u32 {
            let footer_bits = (slot >> 1) - 1;
            let base = (2 | (slot & 1)) << footer_bits;
            let reduced = dist - base;
            if slot < END_POS_MODEL_INDEX as u32 {
                let mut m = 1u32;
                for i in 0..footer_bits {
                    let bit = (reduced >> i) & 1;
                    let idx = (base as usize + m as usize) - slot as usize - 1;
                    price += get_price(model.distance.special[idx], bit);
                    m = (m << 1) | bit;
                }
            } else {
                price += direct_bits_price(footer_bits - DIST_ALIGN_BITS);
                price += self.align[(reduced & (DIST_ALIGN_SIZE as u32 - 1)) as usize];
            }
        }
        price
    }
}
