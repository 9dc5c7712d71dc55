//! Compression context and block orchestration.
//!
//! [`CompressContext`] owns the configuration, the worker pool and the
//! reusable per-block scratch. One-shot compression partitions the input
//! into dictionary-sized blocks (the last one shorter), carries an overlap
//! of the previous block's tail as match context, builds the radix match
//! table once per block, then encodes the block's slices on the pool and
//! concatenates their outputs in slice order. The streaming engine in
//! [`crate::stream`] drives the same frame protocol incrementally.
//!
//! Output ordering is deterministic: workers publish slice outputs into an
//! index-addressed table and the assembler appends them strictly in slice
//! order after `wait_all`, so byte order never depends on thread count.

use std::sync::Arc;
#[cfg(feature = "parallel")]
use std::sync::Mutex;

use log::debug;

use crate::chunk;
use crate::encoder::{EncodeStats, encode_slice};
use crate::error::{Error, Result};
use crate::options::CompressOptions;
#[cfg(feature = "parallel")]
use crate::pool::WorkerPool;
use crate::rmf::RadixMatchFinder;
use crate::xxhash::{Xxh64State, frame_hasher};

/// Smallest worker slice; blocks below twice this stay single-threaded.
const MIN_SLICE_LEN: usize = 1 << 16;

/// Queue slots per worker in the block pool.
const POOL_QUEUE_PER_THREAD: usize = 2;

/// Upper bound on the compressed size of `src_size` input bytes.
///
/// Covers the frame header and trailer plus the worst case of raw chunk
/// framing with slice-boundary fragmentation.
pub fn compress_bound(src_size: usize) -> usize {
    src_size + (src_size >> 8) + 64
}

/// Compression context, reusable across frames.
pub struct CompressContext {
    opts: CompressOptions,
    #[cfg(feature = "parallel")]
    pool: Option<WorkerPool>,
    rmf: Option<Arc<RadixMatchFinder>>,
    hasher: Xxh64State,
    frame_total: u64,
    stats: EncodeStats,
    poisoned: bool,
}

impl std::fmt::Debug for CompressContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressContext")
            .field("opts", &self.opts)
            .field("frame_total", &self.frame_total)
            .finish_non_exhaustive()
    }
}

impl CompressContext {
    /// Creates a context with the given options.
    ///
    /// The worker pool is created here and reused for every frame.
    pub fn new(opts: CompressOptions) -> Result<Self> {
        opts.validate()?;
        #[cfg(feature = "parallel")]
        let pool = if opts.nb_threads_value() >= 2 {
            let threads = opts.nb_threads_value();
            Some(
                WorkerPool::new(threads, threads * POOL_QUEUE_PER_THREAD)
                    .ok_or(Error::MemoryAllocation)?,
            )
        } else {
            None
        };
        Ok(Self {
            opts,
            #[cfg(feature = "parallel")]
            pool,
            rmf: None,
            hasher: frame_hasher(),
            frame_total: 0,
            stats: EncodeStats::default(),
            poisoned: false,
        })
    }

    /// Creates a context for a compression level with default options.
    pub fn with_level(level: u32) -> Result<Self> {
        Self::new(CompressOptions::with_level(level))
    }

    /// The active options.
    pub fn options(&self) -> &CompressOptions {
        &self.opts
    }

    /// Cumulative encode statistics across frames.
    pub fn stats(&self) -> EncodeStats {
        self.stats
    }

    /// Clears a previous error so the context can be reused.
    pub fn reset(&mut self) {
        self.poisoned = false;
        self.frame_total = 0;
    }

    /// One-shot compression of `src` into a fresh frame.
    pub fn compress(&mut self, src: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(compress_bound(src.len()).min(1 << 24));
        self.compress_to_fn(src, &mut |segment| {
            out.extend_from_slice(segment);
            Ok(())
        })?;
        Ok(out)
    }

    /// One-shot compression into a caller buffer; returns the frame length
    /// or `DstSizeTooSmall`.
    pub fn compress_into(&mut self, src: &[u8], dst: &mut [u8]) -> Result<usize> {
        let mut written = 0usize;
        self.compress_to_fn(src, &mut |segment| {
            if written + segment.len() > dst.len() {
                return Err(Error::DstSizeTooSmall);
            }
            dst[written..written + segment.len()].copy_from_slice(segment);
            written += segment.len();
            Ok(())
        })?;
        Ok(written)
    }

    /// Callback-mode compression: every output segment is handed to `sink`
    /// as soon as it is assembled, bypassing any internal pending buffer.
    pub fn compress_to_fn(
        &mut self,
        src: &[u8],
        sink: &mut dyn FnMut(&[u8]) -> Result<()>,
    ) -> Result<()> {
        self.guard()?;
        let result = self.compress_inner(src, sink);
        if result.is_err() {
            self.poisoned = true;
        }
        result
    }

    fn compress_inner(
        &mut self,
        src: &[u8],
        sink: &mut dyn FnMut(&[u8]) -> Result<()>,
    ) -> Result<()> {
        self.frame_begin()?;
        sink(&[self.opts.frame_props().to_byte()])?;

        let block_size = self.opts.block_size();
        let overlap = self.opts.overlap_size();
        let mut start = 0usize;
        let mut block_out = Vec::new();
        while start < src.len() {
            let end = (start + block_size).min(src.len());
            // Non-first blocks keep at least one byte of context so the
            // literal model sees the true previous byte.
            let ctx = if start == 0 { 0 } else { overlap.max(1).min(start) };
            block_out.clear();
            self.frame_block(&src[start - ctx..end], ctx, &mut block_out)?;
            sink(&block_out)?;
            start = end;
        }

        let mut tail = Vec::new();
        self.frame_end(&mut tail);
        sink(&tail)
    }

    fn guard(&self) -> Result<()> {
        if self.poisoned {
            return Err(Error::StageWrong);
        }
        Ok(())
    }

    // ----- frame protocol (shared with the streaming engine) ------------

    /// Starts a frame: validates options and resets per-frame state.
    pub(crate) fn frame_begin(&mut self) -> Result<()> {
        self.opts.validate()?;
        self.hasher.reset(0);
        self.frame_total = 0;
        Ok(())
    }

    /// Encodes one block. `data` is the block buffer whose first
    /// `overlap_len` bytes are context carried from the previous block;
    /// only the remainder is new payload.
    pub(crate) fn frame_block(
        &mut self,
        data: &[u8],
        overlap_len: usize,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        debug_assert!(overlap_len < data.len().max(1));
        if data.len() <= overlap_len {
            return Ok(());
        }
        let first_of_frame = self.frame_total == 0;
        let global_base = self.frame_total - overlap_len as u64;

        let rmf = self.build_rmf(data);
        let ranges = self.slice_ranges(overlap_len, data.len());
        debug!(
            "block: {} bytes ({} new), {} slice(s)",
            data.len(),
            data.len() - overlap_len,
            ranges.len()
        );

        let stats = self.encode_slices(data, &rmf, &ranges, global_base, first_of_frame, out)?;
        self.stats.merge(&stats);
        self.rmf = Some(rmf);

        if self.opts.do_xxhash_value() {
            self.hasher.update(&data[overlap_len..]);
        }
        self.frame_total += (data.len() - overlap_len) as u64;
        Ok(())
    }

    /// Ends the frame: terminator chunk plus the optional XXH64 trailer.
    pub(crate) fn frame_end(&mut self, out: &mut Vec<u8>) {
        chunk::write_end_marker(out);
        if self.opts.do_xxhash_value() {
            out.extend_from_slice(&self.hasher.digest().to_le_bytes());
        }
    }

    pub(crate) fn mark_poisoned(&mut self) {
        self.poisoned = true;
    }

    pub(crate) fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    // ----- block internals ---------------------------------------------

    /// Builds (or rebuilds in place) the shared match table for a block.
    fn build_rmf(&mut self, data: &[u8]) -> Arc<RadixMatchFinder> {
        let mut arc = match self.rmf.take() {
            Some(arc) => arc,
            None => Arc::new(RadixMatchFinder::new(
                self.opts.dict_size(),
                self.opts.search_depth_value(),
            )),
        };
        // The previous block's workers are done, so the Arc is unique.
        let rmf = Arc::get_mut(&mut arc).expect("match table still shared");
        rmf.set_refinement(
            self.opts.chain_log_value(),
            self.opts.divide_and_conquer_value(),
        );
        #[cfg(feature = "parallel")]
        if let Some(pool) = &self.pool {
            rmf.build_parallel(data, pool.rayon_pool(), pool.nb_threads());
            return arc;
        }
        rmf.build(data);
        arc
    }

    /// Splits the new-data region into near-equal worker slices.
    fn slice_ranges(&self, overlap_len: usize, len: usize) -> Vec<(usize, usize)> {
        let payload = len - overlap_len;
        let threads = self.opts.nb_threads_value().max(1);
        let nb_slices = threads.min(payload / MIN_SLICE_LEN).max(1);
        let per_slice = payload.div_ceil(nb_slices);
        let mut ranges = Vec::with_capacity(nb_slices);
        let mut at = overlap_len;
        while at < len {
            let end = (at + per_slice).min(len);
            ranges.push((at, end));
            at = end;
        }
        ranges
    }

    fn encode_slices(
        &self,
        data: &[u8],
        rmf: &Arc<RadixMatchFinder>,
        ranges: &[(usize, usize)],
        global_base: u64,
        first_of_frame: bool,
        out: &mut Vec<u8>,
    ) -> Result<EncodeStats> {
        #[cfg(feature = "parallel")]
        if ranges.len() > 1 {
            if let Some(pool) = &self.pool {
                return Ok(self.encode_slices_parallel(
                    pool,
                    data,
                    rmf,
                    ranges,
                    global_base,
                    first_of_frame,
                    out,
                ));
            }
        }

        let mut stats = EncodeStats::default();
        for (index, &(start, end)) in ranges.iter().enumerate() {
            let s = encode_slice(
                data,
                rmf,
                &self.opts,
                global_base,
                start,
                end,
                first_of_frame && index == 0,
                out,
            );
            stats.merge(&s);
        }
        Ok(stats)
    }

    /// Encodes slices on the pool: each worker publishes into its own slot
    /// and the assembler concatenates the slots in slice order at
    /// `wait_all`.
    #[cfg(feature = "parallel")]
    #[allow(clippy::too_many_arguments)]
    fn encode_slices_parallel(
        &self,
        pool: &WorkerPool,
        data: &[u8],
        rmf: &Arc<RadixMatchFinder>,
        ranges: &[(usize, usize)],
        global_base: u64,
        first_of_frame: bool,
        out: &mut Vec<u8>,
    ) -> EncodeStats {
        let block: Arc<Vec<u8>> = Arc::new(data.to_vec());
        let results: Arc<Mutex<Vec<Option<(Vec<u8>, EncodeStats)>>>> =
            Arc::new(Mutex::new(vec![None; ranges.len()]));
        let buffer_size = self.opts.worker_buffer_size();

        for (index, &(start, end)) in ranges.iter().enumerate() {
            let block = Arc::clone(&block);
            let rmf = Arc::clone(rmf);
            let results = Arc::clone(&results);
            let opts = self.opts.clone();
            pool.submit(Box::new(move || {
                let mut slice_out = Vec::with_capacity(buffer_size);
                let stats = encode_slice(
                    &block,
                    &rmf,
                    &opts,
                    global_base,
                    start,
                    end,
                    first_of_frame && index == 0,
                    &mut slice_out,
                );
                results.lock().unwrap()[index] = Some((slice_out, stats));
            }));
        }
        pool.wait_all();

        let mut stats = EncodeStats::default();
        let mut slots = results.lock().unwrap();
        for slot in slots.iter_mut() {
            let (bytes, s) = slot.take().expect("worker slot not published");
            out.extend_from_slice(&bytes);
            stats.merge(&s);
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{DecompressContext, find_decompressed_size};

    fn round_trip(data: &[u8], opts: CompressOptions) -> Vec<u8> {
        let mut cctx = CompressContext::new(opts).unwrap();
        let frame = cctx.compress(data).unwrap();
        let mut dctx = DecompressContext::new();
        let restored = dctx.decompress(&frame).unwrap();
        assert_eq!(restored.len(), data.len());
        assert_eq!(restored, data, "round trip mismatch");
        frame
    }

    fn lcg_bytes(n: usize, mut seed: u32, zero_run: usize) -> Vec<u8> {
        let mut data = Vec::with_capacity(n);
        while data.len() < n {
            seed = seed.wrapping_mul(1103515245).wrapping_add(12345);
            if (seed >> 28) as usize % 7 == 0 {
                let run = zero_run.min(n - data.len());
                data.extend(std::iter::repeat_n(0u8, run));
            } else {
                data.push((seed >> 18) as u8);
            }
        }
        data
    }

    #[test]
    fn test_empty_input_minimal_frame() {
        let frame = round_trip(b"", CompressOptions::with_level(1));
        // props + terminator + 8-byte hash
        assert_eq!(frame.len(), 10);
        assert_eq!(find_decompressed_size(&frame), Some(0));
    }

    #[test]
    fn test_hundred_zeros_level_1() {
        let data = [0u8; 100];
        let frame = round_trip(&data, CompressOptions::with_level(1));
        assert!(frame.len() < 40, "zeros should shrink, got {}", frame.len());
    }

    #[test]
    fn test_text_round_trip_all_strategies() {
        let data = b"it was the best of times, it was the worst of times. ".repeat(300);
        for level in [1u32, 4, 7, 10] {
            round_trip(&data, CompressOptions::with_level(level));
        }
    }

    #[test]
    fn test_periodic_inputs() {
        for period in [b"ab".to_vec(), b"wxyz".to_vec()] {
            let data: Vec<u8> = period.iter().copied().cycle().take(100_003).collect();
            round_trip(&data, CompressOptions::with_level(5));
        }
    }

    #[test]
    fn test_random_input_round_trip() {
        let data = lcg_bytes(300_000, 7, 0);
        let frame = round_trip(&data, CompressOptions::with_level(3));
        // Incompressible input stays within the documented bound.
        assert!(frame.len() <= compress_bound(data.len()));
    }

    #[test]
    fn test_mixed_compressibility_multi_block() {
        // Several blocks with a small dictionary to exercise overlap.
        let data = lcg_bytes((1 << 20) + (1 << 19), 1234, 200);
        let opts = CompressOptions::with_level(4)
            .dictionary_log(20)
            .unwrap()
            .overlap_fraction(4)
            .unwrap();
        let frame = round_trip(&data, opts);
        assert_eq!(find_decompressed_size(&frame), Some(3 << 20));
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn test_threaded_output_matches_input_order() {
        let data = lcg_bytes(2 << 20, 42, 150);
        for threads in [0usize, 1, 2, 4] {
            let opts = CompressOptions::with_level(2)
                .dictionary_log(20)
                .unwrap()
                .nb_threads(threads)
                .unwrap();
            round_trip(&data, opts);
        }
    }

    #[test]
    fn test_no_hash_frame() {
        let data = b"hash-free frame".repeat(100);
        let opts = CompressOptions::with_level(2).do_xxhash(false);
        let frame = round_trip(&data, opts);
        assert_eq!(find_decompressed_size(&frame), Some(data.len() as u64));
    }

    #[test]
    fn test_compress_into() {
        let data = b"buffer-to-buffer".repeat(64);
        let mut cctx = CompressContext::with_level(3).unwrap();
        let mut dst = vec![0u8; compress_bound(data.len())];
        let n = cctx.compress_into(&data, &mut dst).unwrap();
        let mut dctx = DecompressContext::new();
        assert_eq!(dctx.decompress(&dst[..n]).unwrap(), data);
    }

    #[test]
    fn test_compress_into_too_small() {
        let data = lcg_bytes(100_000, 3, 0);
        let mut cctx = CompressContext::with_level(1).unwrap();
        let mut dst = vec![0u8; 50];
        assert_eq!(
            cctx.compress_into(&data, &mut dst).unwrap_err(),
            Error::DstSizeTooSmall
        );
        // The context fails fast until reset.
        assert_eq!(cctx.compress(&data).unwrap_err(), Error::StageWrong);
        cctx.reset();
        assert!(cctx.compress(&data).is_ok());
    }

    #[test]
    fn test_context_reuse_across_frames() {
        let mut cctx = CompressContext::with_level(3).unwrap();
        let mut dctx = DecompressContext::new();
        for round in 0..4u32 {
            let data = lcg_bytes(150_000, round, 64);
            let frame = cctx.compress(&data).unwrap();
            dctx.reset();
            assert_eq!(dctx.decompress(&frame).unwrap(), data);
        }
    }

    #[test]
    fn test_callback_segments_reassemble() {
        let data = b"callback mode emits segments in order".repeat(200);
        let mut cctx = CompressContext::with_level(4).unwrap();
        let mut collected = Vec::new();
        let mut segments = 0usize;
        cctx.compress_to_fn(&data, &mut |seg| {
            segments += 1;
            collected.extend_from_slice(seg);
            Ok(())
        })
        .unwrap();
        assert!(segments >= 3, "props, block, tail");
        let mut dctx = DecompressContext::new();
        assert_eq!(dctx.decompress(&collected).unwrap(), data);
    }

    #[test]
    fn test_custom_lclp_round_trip() {
        let data = b"literal context experiments".repeat(400);
        let opts = CompressOptions::with_level(4)
            .literal_ctx_bits(0)
            .unwrap()
            .literal_pos_bits(2)
            .unwrap()
            .pos_bits(0)
            .unwrap();
        round_trip(&data, opts);
    }

    #[test]
    fn test_stats_accumulate() {
        let mut cctx = CompressContext::with_level(3).unwrap();
        let data = b"stats ".repeat(5000);
        cctx.compress(&data).unwrap();
        let stats = cctx.stats();
        assert!(stats.matches > 0);
        assert!(stats.match_ratio() > 0.5);
    }
}
