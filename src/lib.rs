//! # flzma2
//!
//! A pure-Rust fast-LZMA2 codec.
//!
//! This crate compresses arbitrary byte streams into a self-framed LZMA2
//! container and restores them bit-exactly. Its core pieces are a
//! radix-tree-based match finder that amortizes match discovery across
//! large dictionary windows, a block-parallel pipeline that partitions
//! input among a worker pool while emitting a coherent single frame, and a
//! streaming codec with push/pull cursors, flush/end transitions and an
//! optional XXH64 integrity trailer.
//!
//! ## Quick Start
//!
//! ### One-shot
//!
//! ```rust
//! use flzma2::{compress, decompress, Result};
//!
//! fn main() -> Result<()> {
//!     let data = b"an example payload, an example payload".repeat(100);
//!     let frame = compress(&data, 6)?;
//!     assert!(frame.len() < data.len());
//!     assert_eq!(decompress(&frame)?, data);
//!     Ok(())
//! }
//! ```
//!
//! ### Tuned contexts
//!
//! Contexts own their scratch memory and worker pool, so reuse them across
//! frames:
//!
//! ```rust
//! use flzma2::{CompressContext, CompressOptions, DecompressContext, Result};
//!
//! fn main() -> Result<()> {
//!     let opts = CompressOptions::with_level(9)
//!         .dictionary_log(21)?
//!         .nb_threads(2)?;
//!     let mut cctx = CompressContext::new(opts)?;
//!     let mut dctx = DecompressContext::new();
//!
//!     for payload in [&b"first frame"[..], &b"second frame"[..]] {
//!         let frame = cctx.compress(payload)?;
//!         assert_eq!(dctx.decompress(&frame)?, payload);
//!         dctx.reset();
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ### Streaming
//!
//! The streaming API is cursor-driven and never blocks; see
//! [`CompressStream`] and [`DecompressStream`] for the flush/end protocol.
//!
//! ## Frame layout
//!
//! ```text
//! byte 0  : properties - dictionary size class (log2(D) - 11) plus a
//!           trailer flag in the top bit
//! bytes 1.. : LZMA2 chunks (compressed or stored, each <= 64 KiB decoded)
//! ...       : 0x00 terminator
//! tail      : 8-byte little-endian XXH64 digest, when enabled
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---|---|---|
//! | `parallel` | yes | worker pool, block-parallel encoding, parallel match-table builds (`rayon`, `crossbeam-channel`) |

pub mod chunk;
pub mod compress;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod model;
pub mod options;
#[cfg(feature = "parallel")]
pub mod pool;
pub mod price;
pub mod range_dec;
pub mod range_enc;
pub mod rmf;
pub mod stream;
pub mod xxhash;

pub use compress::{CompressContext, compress_bound};
pub use decoder::{DecompressContext, find_decompressed_size};
pub use encoder::EncodeStats;
pub use error::{Error, ErrorCode, Result, error_name};
pub use options::{CompressOptions, FrameProps, Strategy};
#[cfg(feature = "parallel")]
pub use pool::WorkerPool;
pub use rmf::{Match, RadixMatchFinder};
pub use stream::{CompressStream, DecompressStream, InBuffer, OutBuffer};

/// Compresses `data` at the given level into a fresh frame.
pub fn compress(data: &[u8], level: u32) -> Result<Vec<u8>> {
    CompressContext::with_level(level)?.compress(data)
}

/// Decompresses exactly one frame.
pub fn decompress(frame: &[u8]) -> Result<Vec<u8>> {
    DecompressContext::new().decompress(frame)
}
