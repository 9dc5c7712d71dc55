//! LZMA range decoder.
//!
//! The inverse of [`crate::range_enc`]: a pure state machine over `(code,
//! range)` that consumes the range-coded payload of one chunk. The decoder
//! does not own its input; every operation receives the chunk slice so the
//! state can be parked inside a context across suspension points.
//!
//! Reading past the chunk's declared compressed length is a corruption
//! signal, never a panic.

use crate::error::{Error, Result};
use crate::range_enc::{BIT_MODEL_TOTAL, NUM_BIT_MODEL_TOTAL_BITS, NUM_MOVE_BITS, TOP_VALUE};

/// Maximum number of input bytes one decode step may need.
///
/// A worst-case symbol consumes at most 20 bytes of lookahead; callers that
/// hand the decoder less than this mid-chunk must be prepared for a
/// suspension instead of progress.
pub const REQUIRED_INPUT_MAX: usize = 20;

/// Bytes consumed by [`RangeDecoder::init`].
pub const INIT_LEN: usize = 5;

/// Range decoder state over an external chunk slice.
#[derive(Debug, Clone)]
pub struct RangeDecoder {
    range: u32,
    code: u32,
    /// Cursor into the chunk payload.
    pos: usize,
}

impl RangeDecoder {
    /// Initializes the decoder from the first five payload bytes.
    ///
    /// The first byte of a well-formed payload is always zero; anything else
    /// is corruption.
    pub fn init(chunk: &[u8]) -> Result<Self> {
        if chunk.len() < INIT_LEN {
            return Err(Error::CorruptionDetected);
        }
        if chunk[0] != 0 {
            return Err(Error::CorruptionDetected);
        }
        let code = u32::from_be_bytes([chunk[1], chunk[2], chunk[3], chunk[4]]);
        Ok(Self {
            range: 0xFFFF_FFFF,
            code,
            pos: INIT_LEN,
        })
    }

    /// Returns the number of payload bytes consumed so far.
    pub fn consumed(&self) -> usize {
        self.pos
    }

    /// Refills the range from the chunk while it is below the threshold.
    #[inline]
    fn normalize(&mut self, chunk: &[u8]) -> Result<()> {
        while self.range < TOP_VALUE {
            let byte = *chunk.get(self.pos).ok_or(Error::CorruptionDetected)?;
            self.pos += 1;
            self.range <<= 8;
            self.code = (self.code << 8) | byte as u32;
        }
        Ok(())
    }

    /// Decodes a single bit with an adaptive probability.
    #[inline]
    pub fn decode_bit(&mut self, chunk: &[u8], prob: &mut u16) -> Result<u32> {
        self.normalize(chunk)?;
        let bound = (self.range >> NUM_BIT_MODEL_TOTAL_BITS) * (*prob as u32);
        if self.code < bound {
            self.range = bound;
            *prob += ((BIT_MODEL_TOTAL - *prob as u32) >> NUM_MOVE_BITS) as u16;
            Ok(0)
        } else {
            self.range -= bound;
            self.code -= bound;
            *prob -= *prob >> NUM_MOVE_BITS;
            Ok(1)
        }
    }

    /// Decodes a bit with fixed 50% probability.
    #[inline]
    pub fn decode_direct_bit(&mut self, chunk: &[u8]) -> Result<u32> {
        self.normalize(chunk)?;
        self.range >>= 1;
        if self.code < self.range {
            Ok(0)
        } else {
            self.code -= self.range;
            Ok(1)
        }
    }

    /// Decodes `count` bits with fixed probability, most significant first.
    pub fn decode_direct_bits(&mut self, chunk: &[u8], count: u32) -> Result<u32> {
        let mut result = 0u32;
        for _ in 0..count {
            result = (result << 1) | self.decode_direct_bit(chunk)?;
        }
        Ok(result)
    }

    /// Decodes a symbol through a bit tree, most significant bit first.
    pub fn decode_bit_tree(
        &mut self,
        chunk: &[u8],
        probs: &mut [u16],
        num_bits: u32,
    ) -> Result<u32> {
        let mut m = 1usize;
        for _ in 0..num_bits {
            let bit = self.decode_bit(chunk, &mut probs[m])?;
            m = (m << 1) | bit as usize;
        }
        Ok(m as u32 - (1 << num_bits))
    }

    /// Decodes a symbol through a bit tree, least significant bit first.
    pub fn decode_bit_tree_reverse(
        &mut self,
        chunk: &[u8],
        probs: &mut [u16],
        num_bits: u32,
    ) -> Result<u32> {
        let mut m = 1usize;
        let mut result = 0u32;
        for i in 0..num_bits {
            let bit = self.decode_bit(chunk, &mut probs[m])?;
            m = (m << 1) | bit as usize;
            result |= bit << i;
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range_enc::{INITIAL_PROB, RangeEncoder};

    #[test]
    fn test_init_rejects_short_input() {
        assert_eq!(
            RangeDecoder::init(&[0, 1, 2]).unwrap_err(),
            Error::CorruptionDetected
        );
    }

    #[test]
    fn test_init_rejects_nonzero_first_byte() {
        assert_eq!(
            RangeDecoder::init(&[1, 0, 0, 0, 0, 0]).unwrap_err(),
            Error::CorruptionDetected
        );
    }

    #[test]
    fn test_bit_round_trip() {
        let bits = [0u32, 1, 1, 0, 1, 0, 0, 1, 1, 1, 0, 0, 0, 1, 0, 1];
        let mut rc = RangeEncoder::new();
        let mut prob = INITIAL_PROB;
        for &bit in &bits {
            rc.encode_bit(&mut prob, bit);
        }
        let chunk = rc.finish();

        let mut rd = RangeDecoder::init(&chunk).unwrap();
        let mut prob = INITIAL_PROB;
        for &expected in &bits {
            assert_eq!(rd.decode_bit(&chunk, &mut prob).unwrap(), expected);
        }
    }

    #[test]
    fn test_direct_bits_round_trip() {
        let values = [(0x1Au32, 5u32), (0xFFFF, 16), (0, 1), (0x12345, 20)];
        let mut rc = RangeEncoder::new();
        for &(v, n) in &values {
            rc.encode_direct_bits(v, n);
        }
        let chunk = rc.finish();

        let mut rd = RangeDecoder::init(&chunk).unwrap();
        for &(v, n) in &values {
            assert_eq!(rd.decode_direct_bits(&chunk, n).unwrap(), v);
        }
    }

    #[test]
    fn test_bit_tree_round_trip() {
        let mut rc = RangeEncoder::new();
        let mut enc_probs = [INITIAL_PROB; 64];
        let mut enc_rev = [INITIAL_PROB; 16];
        for sym in 0..32u32 {
            rc.encode_bit_tree(&mut enc_probs, 5, sym);
            rc.encode_bit_tree_reverse(&mut enc_rev, 4, sym & 15);
        }
        let chunk = rc.finish();

        let mut rd = RangeDecoder::init(&chunk).unwrap();
        let mut dec_probs = [INITIAL_PROB; 64];
        let mut dec_rev = [INITIAL_PROB; 16];
        for sym in 0..32u32 {
            assert_eq!(rd.decode_bit_tree(&chunk, &mut dec_probs, 5).unwrap(), sym);
            assert_eq!(
                rd.decode_bit_tree_reverse(&chunk, &mut dec_rev, 4).unwrap(),
                sym & 15
            );
        }
    }

    #[test]
    fn test_overrun_reports_corruption() {
        // A stream of adaptive bits, then decode far more than was encoded:
        // the decoder must hit the input limit and flag corruption rather
        // than read out of bounds.
        let mut rc = RangeEncoder::new();
        let mut prob = INITIAL_PROB;
        for _ in 0..4 {
            rc.encode_bit(&mut prob, 1);
        }
        let chunk = rc.finish();

        let mut rd = RangeDecoder::init(&chunk).unwrap();
        let mut prob = INITIAL_PROB;
        let mut result = Ok(0);
        for _ in 0..200_000 {
            result = rd.decode_bit(&chunk, &mut prob);
            if result.is_err() {
                break;
            }
        }
        assert_eq!(result.unwrap_err(), Error::CorruptionDetected);
    }
}
