//! Shared helpers for the integration suites.

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

/// Deterministic test data with roughly 50% compressibility: random runs
/// interleaved with repeated motifs and zero stretches.
pub fn half_compressible(n: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut data = Vec::with_capacity(n + 256);
    let motif: Vec<u8> = (0..48u8).map(|i| i.wrapping_mul(37)).collect();
    while data.len() < n {
        match rng.gen_range(0..4u32) {
            0 => {
                let len = rng.gen_range(32..256usize);
                let start = data.len();
                data.resize(start + len, 0);
                rng.fill_bytes(&mut data[start..]);
            }
            1 => {
                let reps = rng.gen_range(2..8usize);
                for _ in 0..reps {
                    data.extend_from_slice(&motif);
                }
            }
            2 => {
                let len = rng.gen_range(16..192usize);
                data.extend(std::iter::repeat_n(rng.r#gen::<u8>(), len));
            }
            _ => {
                // Copy a window from earlier in the buffer.
                if data.len() > 512 {
                    let len = rng.gen_range(64..400usize);
                    let from = rng.gen_range(0..data.len() - len.min(data.len() - 1));
                    let copy: Vec<u8> = data[from..from + len.min(data.len() - from)].to_vec();
                    data.extend_from_slice(&copy);
                } else {
                    data.extend_from_slice(&motif);
                }
            }
        }
    }
    data.truncate(n);
    data
}
