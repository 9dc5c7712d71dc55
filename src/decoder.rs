//! LZMA2 frame decoder.
//!
//! [`DecompressContext`] is a resumable state machine over the frame format:
//! a frame properties byte, a sequence of chunks, a terminator, and an
//! optional XXH64 trailer. Chunk headers are parsed one byte at a time;
//! a compressed chunk's payload accumulates in a bounded internal buffer
//! (at most one chunk, 2^16 bytes) before its symbols are decoded, so the
//! decoder suspends cleanly when input runs out and when output fills,
//! preserving all state for resumption.
//!
//! The dictionary is a circular window of the frame's declared size, grown
//! lazily up to that size. Decoded bytes are delivered to the caller from
//! the window; decoding pauses when undelivered bytes would be overwritten.

use log::debug;

use crate::chunk::{CHUNK_UNPACKED_MAX, ResetMode, ctrl};
use crate::error::{Error, Result};
use crate::model::{LzmaModel, LzmaProperties, MATCH_LEN_MAX, MATCH_LEN_MIN};
use crate::options::FrameProps;
use crate::range_dec::RangeDecoder;
use crate::stream::{InBuffer, OutBuffer};
use crate::xxhash::{Xxh64State, frame_hasher};

/// Initial dictionary allocation; the window grows on demand.
const DICT_ALLOC_MIN: usize = 1 << 16;

/// Decoder stages, driven by the chunk framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    /// Expecting the frame properties byte.
    FrameHeader,
    /// Expecting a chunk control byte.
    Header,
    /// Loading the 2-byte unpacked size.
    UnpackedSize,
    /// Loading the 2-byte packed size.
    PackedSize,
    /// Loading the chunk properties byte.
    Properties,
    /// Receiving chunk payload (raw copy, or packed bytes accumulating).
    Data,
    /// Decoding a fully buffered compressed chunk; may suspend on output.
    DataCont,
    /// Loading the 8-byte XXH64 trailer.
    HashTrailer,
    /// Frame complete.
    Finished,
    /// A previous call failed; only `reset` helps.
    Error,
}

/// Decompression context, reusable across frames.
pub struct DecompressContext {
    stage: Stage,
    frame: FrameProps,

    // Current chunk.
    ctrl_byte: u8,
    field: u32,
    field_bytes: u8,
    unpacked_size: usize,
    packed_size: usize,
    reset_mode: ResetMode,
    pending_props: u8,
    chunk_buf: Vec<u8>,
    rd: Option<RangeDecoder>,
    chunk_decoded: usize,

    // Probability model.
    model: LzmaModel,
    props_seen: bool,
    dict_reset_seen: bool,
    need_state_reset: bool,

    // Dictionary window.
    dict: Vec<u8>,
    dict_size: usize,
    dict_pos: usize,
    dict_total: u64,
    uncopied: usize,

    // Integrity.
    hasher: Xxh64State,
    trailer: [u8; 8],
    trailer_len: usize,
}

impl Default for DecompressContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DecompressContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecompressContext")
            .field("stage", &self.stage)
            .field("dict_total", &self.dict_total)
            .field("uncopied", &self.uncopied)
            .finish_non_exhaustive()
    }
}

impl DecompressContext {
    /// Creates a fresh context.
    pub fn new() -> Self {
        Self {
            stage: Stage::FrameHeader,
            frame: FrameProps {
                dict_log: 20,
                do_hash: false,
            },
            ctrl_byte: 0,
            field: 0,
            field_bytes: 0,
            unpacked_size: 0,
            packed_size: 0,
            reset_mode: ResetMode::None,
            pending_props: 0,
            chunk_buf: Vec::new(),
            rd: None,
            chunk_decoded: 0,
            model: LzmaModel::new(LzmaProperties::default()),
            props_seen: false,
            dict_reset_seen: false,
            need_state_reset: false,
            dict: Vec::new(),
            dict_size: 0,
            dict_pos: 0,
            dict_total: 0,
            uncopied: 0,
            hasher: frame_hasher(),
            trailer: [0; 8],
            trailer_len: 0,
        }
    }

    /// Prepares the context for a new frame, keeping allocations.
    pub fn reset(&mut self) {
        self.stage = Stage::FrameHeader;
        self.ctrl_byte = 0;
        self.field = 0;
        self.field_bytes = 0;
        self.unpacked_size = 0;
        self.packed_size = 0;
        self.reset_mode = ResetMode::None;
        self.chunk_buf.clear();
        self.rd = None;
        self.chunk_decoded = 0;
        self.model.reset();
        self.props_seen = false;
        self.dict_reset_seen = false;
        self.need_state_reset = false;
        self.dict_pos = 0;
        self.dict_total = 0;
        self.uncopied = 0;
        self.hasher.reset(0);
        self.trailer_len = 0;
    }

    /// True once the frame terminator (and trailer) have been consumed and
    /// all output delivered.
    pub fn finished(&self) -> bool {
        self.stage == Stage::Finished && self.uncopied == 0
    }

    /// One-shot decompression into a fresh vector.
    ///
    /// The input must be exactly one frame; trailing or missing bytes
    /// report `SrcSizeWrong`.
    pub fn decompress(&mut self, src: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut input = InBuffer::new(src);
        let mut window = vec![0u8; 1 << 16];
        loop {
            let mut output = OutBuffer::new(&mut window);
            let finished = self.decompress_stream(&mut input, &mut output)?;
            let produced = output.pos;
            out.extend_from_slice(&window[..produced]);
            if finished {
                break;
            }
            if produced == 0 && input.remaining() == 0 {
                self.stage = Stage::Error;
                return Err(Error::SrcSizeWrong);
            }
        }
        if input.remaining() != 0 {
            self.stage = Stage::Error;
            return Err(Error::SrcSizeWrong);
        }
        Ok(out)
    }

    /// One-shot decompression into a caller buffer; returns the decoded
    /// length. `DstSizeTooSmall` when `dst` cannot hold the frame.
    pub fn decompress_into(&mut self, src: &[u8], dst: &mut [u8]) -> Result<usize> {
        let mut input = InBuffer::new(src);
        let mut output = OutBuffer::new(dst);
        loop {
            let before_in = input.pos;
            let before_out = output.pos;
            let finished = self.decompress_stream(&mut input, &mut output)?;
            if finished {
                if input.remaining() != 0 {
                    self.stage = Stage::Error;
                    return Err(Error::SrcSizeWrong);
                }
                return Ok(output.pos);
            }
            if input.pos == before_in && output.pos == before_out {
                self.stage = Stage::Error;
                return if output.remaining() == 0 {
                    Err(Error::DstSizeTooSmall)
                } else {
                    Err(Error::SrcSizeWrong)
                };
            }
        }
    }

    /// Streaming decompression step.
    ///
    /// Consumes from `input` and produces into `output` until one of them
    /// is exhausted or the frame ends. Returns `true` once the frame is
    /// complete and fully delivered. The call never blocks; suspended state
    /// resumes on the next call.
    pub fn decompress_stream(
        &mut self,
        input: &mut InBuffer<'_>,
        output: &mut OutBuffer<'_>,
    ) -> Result<bool> {
        if self.stage == Stage::Error {
            return Err(Error::StageWrong);
        }
        match self.run(input, output) {
            Ok(done) => Ok(done),
            Err(e) => {
                self.stage = Stage::Error;
                Err(e)
            }
        }
    }

    fn run(&mut self, input: &mut InBuffer<'_>, output: &mut OutBuffer<'_>) -> Result<bool> {
        loop {
            self.drain(output);
            match self.stage {
                Stage::FrameHeader => {
                    let Some(byte) = input.read_byte() else {
                        return Ok(false);
                    };
                    self.frame = FrameProps::from_byte(byte)?;
                    self.dict_size = self.frame.dict_size();
                    self.dict_pos = 0;
                    self.dict_total = 0;
                    if self.dict.len() > self.dict_size {
                        self.dict.truncate(self.dict_size);
                    }
                    self.hasher.reset(0);
                    debug!(
                        "frame: dict 2^{}, hash {}",
                        self.frame.dict_log, self.frame.do_hash
                    );
                    self.stage = Stage::Header;
                }
                Stage::Header => {
                    let Some(byte) = input.read_byte() else {
                        return Ok(false);
                    };
                    self.ctrl_byte = byte;
                    self.field = 0;
                    self.field_bytes = 0;
                    match byte {
                        ctrl::END_OF_FRAME => {
                            self.stage = if self.frame.do_hash {
                                self.trailer_len = 0;
                                Stage::HashTrailer
                            } else {
                                Stage::Finished
                            };
                        }
                        ctrl::UNCOMPRESSED_RESET | ctrl::UNCOMPRESSED => {
                            if byte == ctrl::UNCOMPRESSED && !self.dict_reset_seen {
                                return Err(Error::CorruptionDetected);
                            }
                            self.stage = Stage::UnpackedSize;
                        }
                        byte if ctrl::is_compressed(byte) => {
                            self.reset_mode = ResetMode::from_ctrl(byte);
                            if !self.reset_mode.resets_dict() && !self.dict_reset_seen {
                                return Err(Error::CorruptionDetected);
                            }
                            if !self.reset_mode.props_follow() && !self.props_seen {
                                return Err(Error::CorruptionDetected);
                            }
                            if self.reset_mode == ResetMode::None && self.need_state_reset {
                                return Err(Error::CorruptionDetected);
                            }
                            self.stage = Stage::UnpackedSize;
                        }
                        _ => return Err(Error::CorruptionDetected),
                    }
                }
                Stage::UnpackedSize => {
                    let Some(byte) = input.read_byte() else {
                        return Ok(false);
                    };
                    self.field = self.field << 8 | byte as u32;
                    self.field_bytes += 1;
                    if self.field_bytes == 2 {
                        let compressed = ctrl::is_compressed(self.ctrl_byte);
                        let high = if compressed {
                            ((self.ctrl_byte & ctrl::UNPACKED_HIGH_MASK) as usize) << 16
                        } else {
                            0
                        };
                        self.unpacked_size = (high | self.field as usize) + 1;
                        if self.unpacked_size > CHUNK_UNPACKED_MAX {
                            return Err(Error::CorruptionDetected);
                        }
                        self.field = 0;
                        self.field_bytes = 0;
                        if compressed {
                            self.stage = Stage::PackedSize;
                        } else {
                            // Raw copy starts immediately.
                            if self.ctrl_byte == ctrl::UNCOMPRESSED_RESET {
                                self.reset_dictionary();
                            }
                            self.chunk_decoded = 0;
                            self.stage = Stage::Data;
                        }
                    }
                }
                Stage::PackedSize => {
                    let Some(byte) = input.read_byte() else {
                        return Ok(false);
                    };
                    self.field = self.field << 8 | byte as u32;
                    self.field_bytes += 1;
                    if self.field_bytes == 2 {
                        self.packed_size = self.field as usize + 1;
                        self.field = 0;
                        self.field_bytes = 0;
                        self.chunk_buf.clear();
                        self.stage = if self.reset_mode.props_follow() {
                            Stage::Properties
                        } else {
                            Stage::Data
                        };
                    }
                }
                Stage::Properties => {
                    let Some(byte) = input.read_byte() else {
                        return Ok(false);
                    };
                    self.pending_props = byte;
                    if LzmaProperties::from_byte(byte).is_none() {
                        return Err(Error::CorruptionDetected);
                    }
                    self.stage = Stage::Data;
                }
                Stage::Data => {
                    if ctrl::is_compressed(self.ctrl_byte) {
                        // Accumulate the packed payload, then decode.
                        let need = self.packed_size - self.chunk_buf.len();
                        let take = need.min(input.remaining());
                        self.chunk_buf
                            .extend_from_slice(&input.src[input.pos..input.pos + take]);
                        input.pos += take;
                        if self.chunk_buf.len() < self.packed_size {
                            return Ok(false);
                        }
                        self.begin_compressed_chunk()?;
                        self.stage = Stage::DataCont;
                    } else {
                        let done = self.copy_uncompressed(input, output)?;
                        if !done {
                            return Ok(false);
                        }
                        self.need_state_reset = true;
                        self.stage = Stage::Header;
                    }
                }
                Stage::DataCont => {
                    let done = self.decode_chunk(output)?;
                    if !done {
                        return Ok(false);
                    }
                    self.rd = None;
                    self.chunk_buf.clear();
                    self.stage = Stage::Header;
                }
                Stage::HashTrailer => {
                    while self.trailer_len < 8 {
                        let Some(byte) = input.read_byte() else {
                            return Ok(false);
                        };
                        self.trailer[self.trailer_len] = byte;
                        self.trailer_len += 1;
                    }
                    let expected = u64::from_le_bytes(self.trailer);
                    if self.hasher.digest() != expected {
                        return Err(Error::ChecksumWrong);
                    }
                    self.stage = Stage::Finished;
                }
                Stage::Finished => {
                    return Ok(self.uncopied == 0);
                }
                Stage::Error => return Err(Error::StageWrong),
            }
        }
    }

    // ----- chunk decoding ----------------------------------------------

    fn begin_compressed_chunk(&mut self) -> Result<()> {
        match self.reset_mode {
            ResetMode::None => {}
            ResetMode::State => self.model.reset(),
            ResetMode::StateProps => {
                let props = LzmaProperties::from_byte(self.pending_props)
                    .ok_or(Error::CorruptionDetected)?;
                self.model.set_props(props);
                self.props_seen = true;
            }
            ResetMode::DictStateProps => {
                let props = LzmaProperties::from_byte(self.pending_props)
                    .ok_or(Error::CorruptionDetected)?;
                self.model.set_props(props);
                self.props_seen = true;
                self.reset_dictionary();
            }
        }
        if self.reset_mode.resets_state() {
            self.need_state_reset = false;
        }
        self.chunk_decoded = 0;
        self.rd = Some(RangeDecoder::init(&self.chunk_buf)?);
        Ok(())
    }

    fn reset_dictionary(&mut self) {
        self.dict_total = 0;
        self.dict_reset_seen = true;
    }

    /// Decodes buffered chunk symbols until the chunk or the window budget
    /// ends. Returns `true` when the chunk is fully decoded.
    fn decode_chunk(&mut self, output: &mut OutBuffer<'_>) -> Result<bool> {
        while self.chunk_decoded < self.unpacked_size {
            if self.uncopied + MATCH_LEN_MAX as usize >= self.dict_size {
                self.drain(output);
                if self.uncopied + MATCH_LEN_MAX as usize >= self.dict_size {
                    return Ok(false);
                }
            }
            self.decode_op()?;
            self.drain(output);
        }
        Ok(true)
    }

    fn decode_op(&mut self) -> Result<()> {
        let mut rd = self.rd.take().ok_or(Error::Generic)?;
        let result = self.decode_op_inner(&mut rd);
        self.rd = Some(rd);
        result
    }

    fn decode_op_inner(&mut self, rd: &mut RangeDecoder) -> Result<()> {
        let chunk = &self.chunk_buf;
        let gpos = self.dict_total;
        let pos_state = self.model.pos_state(gpos);
        let st = self.model.state.value();

        if rd.decode_bit(chunk, &mut self.model.is_match[st][pos_state])? == 0 {
            let byte = self.decode_literal(rd)?;
            self.push_byte(byte);
            self.hash_tail(1);
            self.model.state.update_literal();
            self.chunk_decoded += 1;
            return Ok(());
        }

        let (dist, len);
        if rd.decode_bit(chunk, &mut self.model.is_rep[st])? == 0 {
            // Normal match.
            let l = self.decode_length(rd, false, pos_state)?;
            let d = self.decode_distance(rd, l)?;
            self.model.reps[3] = self.model.reps[2];
            self.model.reps[2] = self.model.reps[1];
            self.model.reps[1] = self.model.reps[0];
            self.model.reps[0] = d;
            self.model.state.update_match();
            dist = d;
            len = l;
        } else if rd.decode_bit(chunk, &mut self.model.is_rep_g0[st])? == 0 {
            if rd.decode_bit(chunk, &mut self.model.is_rep0_long[st][pos_state])? == 0 {
                // Short rep: one byte at the rep0 distance.
                let d = self.model.reps[0];
                self.validate_distance(d)?;
                let byte = self.byte_back(d);
                self.push_byte(byte);
                self.hash_tail(1);
                self.model.state.update_short_rep();
                self.chunk_decoded += 1;
                return Ok(());
            }
            let l = self.decode_length(rd, true, pos_state)?;
            dist = self.model.reps[0];
            len = l;
            self.model.state.update_long_rep();
        } else {
            let d = if rd.decode_bit(chunk, &mut self.model.is_rep_g1[st])? == 0 {
                self.model.reps.swap(0, 1);
                self.model.reps[0]
            } else if rd.decode_bit(chunk, &mut self.model.is_rep_g2[st])? == 0 {
                let d = self.model.reps[2];
                self.model.reps[2] = self.model.reps[1];
                self.model.reps[1] = self.model.reps[0];
                self.model.reps[0] = d;
                d
            } else {
                let d = self.model.reps[3];
                self.model.reps[3] = self.model.reps[2];
                self.model.reps[2] = self.model.reps[1];
                self.model.reps[1] = self.model.reps[0];
                self.model.reps[0] = d;
                d
            };
            let l = self.decode_length(rd, true, pos_state)?;
            dist = d;
            len = l;
            self.model.state.update_long_rep();
        }

        self.validate_distance(dist)?;
        if self.chunk_decoded + len as usize > self.unpacked_size {
            return Err(Error::CorruptionDetected);
        }
        for _ in 0..len {
            let byte = self.byte_back(dist);
            self.push_byte(byte);
        }
        self.hash_tail(len as usize);
        self.chunk_decoded += len as usize;
        Ok(())
    }

    fn decode_literal(&mut self, rd: &mut RangeDecoder) -> Result<u8> {
        let chunk = &self.chunk_buf;
        let prev_byte = if self.dict_total > 0 {
            self.byte_back_raw(1)
        } else {
            0
        };
        let ctx = self.model.lit_context(self.dict_total, prev_byte);
        let probs = &mut self.model.literal[ctx];
        let mut symbol = 1usize;

        if self.model.state.is_literal() {
            while symbol < 0x100 {
                let bit = rd.decode_bit(chunk, &mut probs[symbol])? as usize;
                symbol = symbol << 1 | bit;
            }
        } else {
            let match_byte = {
                let dist = self.model.reps[0] as usize + 1;
                let idx = if self.dict_pos >= dist {
                    self.dict_pos - dist
                } else {
                    self.dict.len() - (dist - self.dict_pos)
                };
                self.dict[idx]
            };
            let mut matched = true;
            let mut i = 8u32;
            while symbol < 0x100 {
                i -= 1;
                if matched {
                    let match_bit = ((match_byte >> i) & 1) as usize;
                    let bit =
                        rd.decode_bit(chunk, &mut probs[0x100 + (match_bit << 8) + symbol])? as usize;
                    matched = match_bit == bit;
                    symbol = symbol << 1 | bit;
                } else {
                    let bit = rd.decode_bit(chunk, &mut probs[symbol])? as usize;
                    symbol = symbol << 1 | bit;
                }
            }
        }
        Ok((symbol & 0xFF) as u8)
    }

    fn decode_length(&mut self, rd: &mut RangeDecoder, rep: bool, pos_state: usize) -> Result<u32> {
        let chunk = &self.chunk_buf;
        let lm = if rep {
            &mut self.model.rep_len
        } else {
            &mut self.model.match_len
        };
        let len = if rd.decode_bit(chunk, &mut lm.choice)? == 0 {
            rd.decode_bit_tree(chunk, &mut lm.low[pos_state], crate::model::LEN_LOW_BITS)?
                + MATCH_LEN_MIN
        } else if rd.decode_bit(chunk, &mut lm.choice2)? == 0 {
            rd.decode_bit_tree(chunk, &mut lm.mid[pos_state], crate::model::LEN_MID_BITS)?
                + MATCH_LEN_MIN
                + crate::model::LEN_LOW_SYMBOLS as u32
        } else {
            rd.decode_bit_tree(chunk, &mut lm.high, crate::model::LEN_HIGH_BITS)?
                + MATCH_LEN_MIN
                + (crate::model::LEN_LOW_SYMBOLS + crate::model::LEN_MID_SYMBOLS) as u32
        };
        Ok(len)
    }

    fn decode_distance(&mut self, rd: &mut RangeDecoder, len: u32) -> Result<u32> {
        use crate::model::{
            DIST_ALIGN_BITS, DIST_ALIGN_SIZE, DIST_SLOT_BITS, END_POS_MODEL_INDEX,
            START_POS_MODEL_INDEX,
        };
        let chunk = &self.chunk_buf;
        let len_state = ((len - MATCH_LEN_MIN).min(3)) as usize;
        let slot = rd.decode_bit_tree(
            chunk,
            &mut self.model.distance.slot[len_state],
            DIST_SLOT_BITS,
        )?;
        if slot < START_POS_MODEL_INDEX as u32 {
            return Ok(slot);
        }

        let footer_bits = (slot >> 1) - 1;
        let base = (2 | (slot & 1)) << footer_bits;
        if slot < END_POS_MODEL_INDEX as u32 {
            let mut m = 1u32;
            let mut reduced = 0u32;
            for i in 0..footer_bits {
                let idx = (base as usize + m as usize) - slot as usize - 1;
                let bit = rd.decode_bit(chunk, &mut self.model.distance.special[idx])?;
                m = m << 1 | bit;
                reduced |= bit << i;
            }
            Ok(base + reduced)
        } else {
            let direct = rd.decode_direct_bits(chunk, footer_bits - DIST_ALIGN_BITS)?;
            let align = rd.decode_bit_tree_reverse(
                chunk,
                &mut self.model.distance.align,
                DIST_ALIGN_BITS,
            )?;
            Ok(base + (direct << DIST_ALIGN_BITS) + align)
        }
    }

    #[inline]
    fn validate_distance(&self, dist: u32) -> Result<()> {
        if (dist as u64) >= self.dict_total || dist as usize >= self.dict_size {
            return Err(Error::CorruptionDetected);
        }
        Ok(())
    }

    // ----- dictionary window -------------------------------------------

    /// Byte at a 0-indexed rep distance behind the write head.
    #[inline]
    fn byte_back(&self, dist0: u32) -> u8 {
        self.byte_back_raw(dist0 as usize + 1)
    }

    #[inline]
    fn byte_back_raw(&self, dist: usize) -> u8 {
        let idx = if self.dict_pos >= dist {
            self.dict_pos - dist
        } else {
            self.dict.len() - (dist - self.dict_pos)
        };
        self.dict[idx]
    }

    #[inline]
    fn push_byte(&mut self, byte: u8) {
        if self.dict_pos == self.dict.len() {
            if self.dict.len() < self.dict_size {
                let floor = DICT_ALLOC_MIN.min(self.dict_size);
                let new_len = (self.dict.len() * 2).max(floor).min(self.dict_size);
                self.dict.resize(new_len, 0);
            } else {
                self.dict_pos = 0;
            }
        }
        self.dict[self.dict_pos] = byte;
        self.dict_pos += 1;
        self.dict_total += 1;
        self.uncopied += 1;
    }

    /// Hashes the `n` bytes most recently written to the window.
    fn hash_tail(&mut self, n: usize) {
        if !self.frame.do_hash || n == 0 {
            return;
        }
        let len = self.dict.len();
        let end = self.dict_pos;
        if end >= n {
            self.hasher.update(&self.dict[end - n..end]);
        } else {
            let head = n - end;
            self.hasher.update(&self.dict[len - head..]);
            self.hasher.update(&self.dict[..end]);
        }
    }

    /// Copies undelivered window bytes to the caller's output.
    fn drain(&mut self, output: &mut OutBuffer<'_>) {
        while self.uncopied > 0 && output.remaining() > 0 {
            let len = self.dict.len();
            let start = if self.dict_pos >= self.uncopied {
                self.dict_pos - self.uncopied
            } else {
                len - (self.uncopied - self.dict_pos)
            };
            // Contiguous run from `start`: up to the wrap point or the head.
            let run_end = if start < self.dict_pos { self.dict_pos } else { len };
            let take = (run_end - start).min(output.remaining());
            output.dst[output.pos..output.pos + take]
                .copy_from_slice(&self.dict[start..start + take]);
            output.pos += take;
            self.uncopied -= take;
        }
    }

    /// Handles the body of an uncompressed chunk; returns `true` when the
    /// chunk is fully copied.
    fn copy_uncompressed(
        &mut self,
        input: &mut InBuffer<'_>,
        output: &mut OutBuffer<'_>,
    ) -> Result<bool> {
        while self.chunk_decoded < self.unpacked_size {
            if self.uncopied >= self.dict_size {
                self.drain(output);
                if self.uncopied >= self.dict_size {
                    return Ok(false);
                }
            }
            if input.remaining() == 0 {
                return Ok(false);
            }
            let want = self.unpacked_size - self.chunk_decoded;
            let take = want
                .min(input.remaining())
                .min(self.dict_size - self.uncopied);
            for k in 0..take {
                self.push_byte(input.src[input.pos + k]);
            }
            self.hash_tail(take);
            input.pos += take;
            self.chunk_decoded += take;
            self.drain(output);
        }
        Ok(true)
    }
}

/// Sums the declared unpacked sizes of a frame by walking its headers.
///
/// Returns `None` when the buffer is not one well-formed frame. The decoder
/// itself is never run.
pub fn find_decompressed_size(frame: &[u8]) -> Option<u64> {
    use crate::chunk::ChunkHeader;

    let props = FrameProps::from_byte(*frame.first()?).ok()?;
    let mut offset = 1usize;
    let mut total = 0u64;
    loop {
        let (header, hlen) = ChunkHeader::parse(&frame[offset..]).ok()?;
        offset += hlen;
        match header {
            ChunkHeader::EndOfFrame => {
                let trailer = if props.do_hash { 8 } else { 0 };
                if frame.len() - offset != trailer {
                    return None;
                }
                return Some(total);
            }
            ChunkHeader::Uncompressed { unpacked_size, .. } => {
                if frame.len() - offset < unpacked_size {
                    return None;
                }
                offset += unpacked_size;
                total += unpacked_size as u64;
            }
            ChunkHeader::Compressed {
                unpacked_size,
                packed_size,
                ..
            } => {
                if frame.len() - offset < packed_size {
                    return None;
                }
                offset += packed_size;
                total += unpacked_size as u64;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk;
    use crate::options::FrameProps;
    use crate::xxhash::xxh64_oneshot;

    fn raw_frame(payload: &[u8], do_hash: bool) -> Vec<u8> {
        // Frame of uncompressed chunks only.
        let mut frame = vec![
            FrameProps {
                dict_log: 20,
                do_hash,
            }
            .to_byte(),
        ];
        let mut first = true;
        for piece in payload.chunks(chunk::CHUNK_UNPACKED_MAX) {
            chunk::write_uncompressed_chunk(&mut frame, piece, first);
            first = false;
        }
        chunk::write_end_marker(&mut frame);
        if do_hash {
            frame.extend_from_slice(&xxh64_oneshot(payload, 0).to_le_bytes());
        }
        frame
    }

    #[test]
    fn test_empty_frame() {
        let frame = [FrameProps { dict_log: 20, do_hash: false }.to_byte(), 0x00];
        let mut dctx = DecompressContext::new();
        assert_eq!(dctx.decompress(&frame).unwrap(), Vec::<u8>::new());
        assert!(dctx.finished());
    }

    #[test]
    fn test_empty_frame_with_hash() {
        let frame = raw_frame(b"", true);
        let mut dctx = DecompressContext::new();
        assert_eq!(dctx.decompress(&frame).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_uncompressed_chunks_round_trip() {
        let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let frame = raw_frame(&payload, true);
        let mut dctx = DecompressContext::new();
        assert_eq!(dctx.decompress(&frame).unwrap(), payload);
    }

    #[test]
    fn test_uncompressed_first_chunk_must_reset() {
        let mut frame = vec![FrameProps { dict_log: 20, do_hash: false }.to_byte()];
        chunk::write_uncompressed_chunk(&mut frame, b"data", false);
        chunk::write_end_marker(&mut frame);
        let mut dctx = DecompressContext::new();
        assert_eq!(
            dctx.decompress(&frame).unwrap_err(),
            Error::CorruptionDetected
        );
    }

    #[test]
    fn test_truncated_input_reports_src_size() {
        let payload = vec![7u8; 5000];
        let frame = raw_frame(&payload, true);
        let mut dctx = DecompressContext::new();
        assert_eq!(
            dctx.decompress(&frame[..frame.len() - 1]).unwrap_err(),
            Error::SrcSizeWrong
        );
    }

    #[test]
    fn test_error_then_stage_wrong_until_reset() {
        let frame = raw_frame(b"abc", false);
        let mut dctx = DecompressContext::new();
        assert!(dctx.decompress(&frame[..2]).is_err());

        let mut input = InBuffer::new(&frame);
        let mut buf = [0u8; 16];
        let mut output = OutBuffer::new(&mut buf);
        assert_eq!(
            dctx.decompress_stream(&mut input, &mut output).unwrap_err(),
            Error::StageWrong
        );

        dctx.reset();
        assert_eq!(dctx.decompress(&frame).unwrap(), b"abc");
    }

    #[test]
    fn test_hash_mismatch() {
        let payload = b"integrity matters";
        let mut frame = raw_frame(payload, true);
        let len = frame.len();
        frame[len - 3] ^= 0x40;
        let mut dctx = DecompressContext::new();
        assert_eq!(dctx.decompress(&frame).unwrap_err(), Error::ChecksumWrong);
    }

    #[test]
    fn test_trailing_garbage_rejected() {
        let mut frame = raw_frame(b"abc", false);
        frame.push(0xAA);
        let mut dctx = DecompressContext::new();
        assert_eq!(dctx.decompress(&frame).unwrap_err(), Error::SrcSizeWrong);
    }

    #[test]
    fn test_decompress_into_small_dst() {
        let payload = vec![3u8; 1000];
        let frame = raw_frame(&payload, false);
        let mut dctx = DecompressContext::new();
        let mut small = vec![0u8; 100];
        assert_eq!(
            dctx.decompress_into(&frame, &mut small).unwrap_err(),
            Error::DstSizeTooSmall
        );

        dctx.reset();
        let mut exact = vec![0u8; 1000];
        assert_eq!(dctx.decompress_into(&frame, &mut exact).unwrap(), 1000);
        assert_eq!(exact, payload);
    }

    #[test]
    fn test_streaming_one_byte_at_a_time() {
        let payload: Vec<u8> = (0..70_000u32).map(|i| (i * 7 % 256) as u8).collect();
        let frame = raw_frame(&payload, true);

        let mut dctx = DecompressContext::new();
        let mut out = Vec::new();
        let mut window = [0u8; 3];
        let mut finished = false;
        for byte in &frame {
            let mut input = InBuffer::new(std::slice::from_ref(byte));
            while input.remaining() > 0 {
                let mut output = OutBuffer::new(&mut window);
                finished = dctx.decompress_stream(&mut input, &mut output).unwrap();
                let produced = output.pos;
                out.extend_from_slice(&window[..produced]);
            }
        }
        // Drain whatever is still undelivered.
        while !finished {
            let mut input = InBuffer::new(&[]);
            let mut output = OutBuffer::new(&mut window);
            finished = dctx.decompress_stream(&mut input, &mut output).unwrap();
            let produced = output.pos;
            out.extend_from_slice(&window[..produced]);
            if produced == 0 && !finished {
                panic!("decoder stalled");
            }
        }
        assert_eq!(out, payload);
    }

    #[test]
    fn test_find_decompressed_size() {
        let payload = vec![1u8; 150_000];
        let frame = raw_frame(&payload, true);
        assert_eq!(find_decompressed_size(&frame), Some(150_000));
        assert_eq!(find_decompressed_size(&frame[..frame.len() - 2]), None);
        assert_eq!(find_decompressed_size(&[0xFF]), None);

        let empty = raw_frame(b"", false);
        assert_eq!(find_decompressed_size(&empty), Some(0));
    }
}
