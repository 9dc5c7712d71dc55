//! Round-trip integration tests for the one-shot API.
//!
//! These tests verify that compression and decompression are exact inverses
//! across levels, strategies, thread counts and input shapes, and that
//! frame inspection agrees with the encoder.

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

use flzma2::{
    CompressContext, CompressOptions, DecompressContext, Strategy, compress, compress_bound,
    decompress, find_decompressed_size,
};

mod common;
use common::half_compressible;

fn round_trip_with(data: &[u8], opts: CompressOptions) -> Vec<u8> {
    let mut cctx = CompressContext::new(opts).unwrap();
    let frame = cctx.compress(data).unwrap();
    assert!(
        frame.len() <= compress_bound(data.len()),
        "bound violated: {} > {}",
        frame.len(),
        compress_bound(data.len())
    );
    let mut dctx = DecompressContext::new();
    let restored = dctx.decompress(&frame).unwrap();
    assert!(dctx.finished());
    assert_eq!(restored, data, "payload mismatch");
    frame
}

// ============================================================================
// Degenerate and periodic inputs
// ============================================================================

#[test]
fn test_empty_input() {
    let frame = round_trip_with(b"", CompressOptions::with_level(1));
    assert_eq!(find_decompressed_size(&frame), Some(0));
}

#[test]
fn test_single_byte() {
    for byte in [0x00u8, 0x5A, 0xFF] {
        round_trip_with(&[byte], CompressOptions::with_level(1));
    }
}

#[test]
fn test_hundred_zeros_level_1_single_threaded() {
    let data = [0u8; 100];
    let opts = CompressOptions::with_level(1).nb_threads(0).unwrap();
    let frame = round_trip_with(&data, opts);
    assert_eq!(find_decompressed_size(&frame), Some(100));
}

#[test]
fn test_all_zero_inputs() {
    for n in [1usize, 255, 4096, 100_000] {
        let data = vec![0u8; n];
        round_trip_with(&data, CompressOptions::with_level(2));
    }
}

#[test]
fn test_periodic_repeats() {
    for (period, n) in [(2usize, 65_537usize), (4, 250_000), (3, 777)] {
        let data: Vec<u8> = (0..n).map(|i| b"abcd"[i % period]).collect();
        round_trip_with(&data, CompressOptions::with_level(4));
    }
}

// ============================================================================
// Levels, strategies, thread counts
// ============================================================================

#[test]
fn test_all_levels_on_text() {
    let data = b"Lorem ipsum dolor sit amet, consectetur adipiscing elit, \
                 sed do eiusmod tempor incididunt ut labore. "
        .repeat(200);
    for level in 1..=12u32 {
        round_trip_with(&data, CompressOptions::with_level(level));
    }
}

#[test]
fn test_explicit_strategies() {
    let data = half_compressible(400_000, 11);
    for strategy in [Strategy::Fast, Strategy::Normal, Strategy::Best] {
        let opts = CompressOptions::with_level(5).strategy(strategy);
        round_trip_with(&data, opts);
    }
}

#[test]
fn test_thread_counts() {
    let data = half_compressible(2 << 20, 23);
    for threads in [0usize, 1, 2, 4] {
        let opts = CompressOptions::with_level(2)
            .dictionary_log(20)
            .unwrap()
            .nb_threads(threads)
            .unwrap();
        round_trip_with(&data, opts);
    }
}

#[test]
fn test_high_compression_presets() {
    let data = half_compressible(300_000, 3);
    for level in [1u32, 5, 10] {
        let opts = CompressOptions::with_level(level).high_compression(true);
        round_trip_with(&data, opts);
    }
}

#[test]
fn test_divide_and_conquer_off() {
    let data = half_compressible(200_000, 17);
    let opts = CompressOptions::with_level(6).divide_and_conquer(false);
    round_trip_with(&data, opts);
}

// ============================================================================
// Spec-level scenarios
// ============================================================================

#[test]
fn test_five_mib_half_compressible_level_4() {
    let data = half_compressible(5 << 20, 42);
    assert_eq!(data.len(), 5 << 20);
    let opts = CompressOptions::with_level(4)
        .dictionary_log(21)
        .unwrap()
        .nb_threads(2)
        .unwrap();
    let frame = round_trip_with(&data, opts);
    assert_eq!(find_decompressed_size(&frame), Some(5 << 20));
    assert!(frame.len() < data.len(), "50% compressible data must shrink");
}

#[test]
fn test_random_bytes_do_not_blow_the_bound() {
    let mut rng = StdRng::seed_from_u64(99);
    let mut data = vec![0u8; 1 << 20];
    rng.fill_bytes(&mut data);
    let frame = round_trip_with(
        &data,
        CompressOptions::with_level(3).dictionary_log(20).unwrap(),
    );
    assert!(frame.len() >= data.len() / 2, "random data cannot compress");
}

#[test]
fn test_multi_block_with_overlap_variants() {
    let data = half_compressible((1 << 20) + 12_345, 7);
    for fraction in [0u32, 2, 8, 15] {
        let opts = CompressOptions::with_level(3)
            .dictionary_log(20)
            .unwrap()
            .block_size_log(18)
            .unwrap()
            .overlap_fraction(fraction)
            .unwrap();
        round_trip_with(&data, opts);
    }
}

#[test]
fn test_no_hash_roundtrip_and_size_probe() {
    let data = half_compressible(150_000, 5);
    let opts = CompressOptions::with_level(4).do_xxhash(false);
    let frame = round_trip_with(&data, opts);
    assert_eq!(find_decompressed_size(&frame), Some(data.len() as u64));
}

#[test]
fn test_lclp_variants() {
    let data = half_compressible(120_000, 31);
    let configs = [(0u32, 0u32, 0u32), (4, 0, 4), (0, 4, 2), (2, 2, 3)];
    for (lc, lp, pb) in configs {
        let opts = CompressOptions::with_level(4)
            .literal_ctx_bits(0)
            .unwrap()
            .literal_pos_bits(lp)
            .unwrap()
            .literal_ctx_bits(lc)
            .unwrap()
            .pos_bits(pb)
            .unwrap();
        round_trip_with(&data, opts);
    }
}

#[test]
fn test_convenience_functions() {
    let mut rng = StdRng::seed_from_u64(1);
    let mut data = vec![0u8; 50_000];
    for chunk in data.chunks_mut(100) {
        if rng.gen_bool(0.5) {
            rng.fill_bytes(chunk);
        }
    }
    let frame = compress(&data, 6).unwrap();
    assert_eq!(decompress(&frame).unwrap(), data);
}

#[test]
fn test_context_reuse_many_frames() {
    let mut cctx = CompressContext::with_level(2).unwrap();
    let mut dctx = DecompressContext::new();
    for seed in 0..6u64 {
        let data = half_compressible(80_000, seed);
        let frame = cctx.compress(&data).unwrap();
        dctx.reset();
        assert_eq!(dctx.decompress(&frame).unwrap(), data);
    }
}
