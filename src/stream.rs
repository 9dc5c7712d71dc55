//! Streaming compression and decompression.
//!
//! Push-model cursors: the caller owns both buffers and advances `pos` past
//! whatever the codec consumed or produced. Calls never block; they return
//! when input is exhausted or output is full. Compressed bytes that did not
//! fit the caller's output stay buffered internally and must drain before
//! new input is accepted.
//!
//! ```rust
//! use flzma2::{CompressStream, DecompressStream, InBuffer, OutBuffer};
//!
//! let data = b"streaming round trip".repeat(100);
//! let mut frame = Vec::new();
//! let mut cstream = CompressStream::new(3).unwrap();
//! let mut window = [0u8; 256];
//!
//! let mut input = InBuffer::new(&data);
//! while input.remaining() > 0 {
//!     let mut output = OutBuffer::new(&mut window);
//!     cstream.compress(&mut input, &mut output).unwrap();
//!     let produced = output.pos;
//!     frame.extend_from_slice(&window[..produced]);
//! }
//! loop {
//!     let mut output = OutBuffer::new(&mut window);
//!     let left = cstream.end(&mut output).unwrap();
//!     let produced = output.pos;
//!     frame.extend_from_slice(&window[..produced]);
//!     if left == 0 {
//!         break;
//!     }
//! }
//!
//! let mut dstream = DecompressStream::new();
//! let mut restored = Vec::new();
//! let mut input = InBuffer::new(&frame);
//! loop {
//!     let mut output = OutBuffer::new(&mut window);
//!     let done = dstream.decompress(&mut input, &mut output).unwrap();
//!     let produced = output.pos;
//!     restored.extend_from_slice(&window[..produced]);
//!     if done {
//!         break;
//!     }
//! }
//! assert_eq!(restored, data);
//! ```

use crate::compress::CompressContext;
use crate::decoder::DecompressContext;
use crate::error::{Error, Result};
use crate::options::CompressOptions;

/// Caller-owned input cursor; `src[pos..]` is unconsumed.
#[derive(Debug)]
pub struct InBuffer<'a> {
    /// The input bytes.
    pub src: &'a [u8],
    /// Consumption cursor, advanced by the codec.
    pub pos: usize,
}

impl<'a> InBuffer<'a> {
    /// Wraps a slice with the cursor at the start.
    pub fn new(src: &'a [u8]) -> Self {
        Self { src, pos: 0 }
    }

    /// Unconsumed byte count.
    pub fn remaining(&self) -> usize {
        self.src.len() - self.pos
    }

    pub(crate) fn read_byte(&mut self) -> Option<u8> {
        let byte = *self.src.get(self.pos)?;
        self.pos += 1;
        Some(byte)
    }
}

/// Caller-owned output cursor; `dst[..pos]` has been produced.
#[derive(Debug)]
pub struct OutBuffer<'a> {
    /// The output buffer.
    pub dst: &'a mut [u8],
    /// Production cursor, advanced by the codec.
    pub pos: usize,
}

impl<'a> OutBuffer<'a> {
    /// Wraps a buffer with the cursor at the start.
    pub fn new(dst: &'a mut [u8]) -> Self {
        Self { dst, pos: 0 }
    }

    /// Free space left.
    pub fn remaining(&self) -> usize {
        self.dst.len() - self.pos
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamStage {
    /// Frame not started; the properties byte is emitted lazily.
    Init,
    /// Accepting input.
    Running,
    /// Terminator emitted; only draining remains.
    Ended,
}

/// Streaming compressor.
///
/// Input accumulates into a block buffer of `block_size` bytes (plus the
/// overlap retained from the previous block); full blocks are encoded
/// through the shared [`CompressContext`] frame protocol. [`flush`] forces
/// a block boundary mid-stream; [`end`] emits the terminator and optional
/// hash trailer and must be called until it returns 0.
///
/// [`flush`]: CompressStream::flush
/// [`end`]: CompressStream::end
#[derive(Debug)]
pub struct CompressStream {
    cctx: CompressContext,
    stage: StreamStage,
    /// Block buffer; the first `overlap_len` bytes are carried context.
    buf: Vec<u8>,
    overlap_len: usize,
    /// Compressed bytes not yet handed to the caller.
    pending: Vec<u8>,
    pending_pos: usize,
}

impl CompressStream {
    /// Creates a stream for a compression level.
    pub fn new(level: u32) -> Result<Self> {
        Self::with_options(CompressOptions::with_level(level))
    }

    /// Creates a stream with explicit options.
    pub fn with_options(opts: CompressOptions) -> Result<Self> {
        let cctx = CompressContext::new(opts)?;
        Ok(Self {
            cctx,
            stage: StreamStage::Init,
            buf: Vec::new(),
            overlap_len: 0,
            pending: Vec::new(),
            pending_pos: 0,
        })
    }

    /// The active options.
    pub fn options(&self) -> &CompressOptions {
        self.cctx.options()
    }

    /// Prepares the stream for a new frame.
    ///
    /// Any undelivered output from the previous frame is discarded.
    pub fn reset(&mut self) {
        self.cctx.reset();
        self.stage = StreamStage::Init;
        self.buf.clear();
        self.overlap_len = 0;
        self.pending.clear();
        self.pending_pos = 0;
    }

    /// Consumes input and produces output.
    ///
    /// Returns with input unconsumed whenever undelivered compressed bytes
    /// remain; drain them (by calling again with fresh output) before
    /// pushing more data.
    pub fn compress(&mut self, input: &mut InBuffer<'_>, output: &mut OutBuffer<'_>) -> Result<()> {
        self.guard()?;
        if self.stage == StreamStage::Ended {
            return Err(Error::StageWrong);
        }
        self.start_frame()?;
        self.drain_pending(output);
        if self.has_pending() {
            return Ok(());
        }

        while input.remaining() > 0 {
            let capacity = self.overlap_len + self.options().block_size();
            let take = input.remaining().min(capacity - self.buf.len());
            self.buf
                .extend_from_slice(&input.src[input.pos..input.pos + take]);
            input.pos += take;

            if self.buf.len() == capacity {
                self.encode_buffered_block()?;
                self.drain_pending(output);
                if self.has_pending() {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Forces a block boundary and drains pending output.
    ///
    /// A mid-stream flush emits a shorter-than-dictionary block. Returns
    /// the number of bytes still pending; call again with fresh output
    /// until it reaches 0.
    pub fn flush(&mut self, output: &mut OutBuffer<'_>) -> Result<usize> {
        self.guard()?;
        if self.stage == StreamStage::Ended {
            return Err(Error::StageWrong);
        }
        self.start_frame()?;
        self.drain_pending(output);
        if !self.has_pending() && self.buf.len() > self.overlap_len {
            self.encode_buffered_block()?;
            self.drain_pending(output);
        }
        Ok(self.pending_left())
    }

    /// Ends the frame: flushes buffered input, emits the terminator and the
    /// optional XXH64 trailer. Returns the bytes still pending; the frame
    /// is complete (and a new one may begin after [`reset`]) only once this
    /// returns 0.
    ///
    /// [`reset`]: CompressStream::reset
    pub fn end(&mut self, output: &mut OutBuffer<'_>) -> Result<usize> {
        self.guard()?;
        if self.stage != StreamStage::Ended {
            self.start_frame()?;
            self.drain_pending(output);
            if self.has_pending() {
                return Ok(self.pending_left());
            }
            if self.buf.len() > self.overlap_len {
                self.encode_buffered_block()?;
            }
            self.compact_pending();
            let mut tail = Vec::new();
            self.cctx.frame_end(&mut tail);
            self.pending.extend_from_slice(&tail);
            self.stage = StreamStage::Ended;
        }
        self.drain_pending(output);
        Ok(self.pending_left())
    }

    // ----- internals ---------------------------------------------------

    fn guard(&self) -> Result<()> {
        if self.cctx.is_poisoned() {
            return Err(Error::StageWrong);
        }
        Ok(())
    }

    fn start_frame(&mut self) -> Result<()> {
        if self.stage != StreamStage::Init {
            return Ok(());
        }
        if let Err(e) = self.cctx.frame_begin() {
            self.cctx.mark_poisoned();
            return Err(e);
        }
        self.pending.push(self.options().frame_props().to_byte());
        self.buf.reserve(self.options().block_size());
        self.stage = StreamStage::Running;
        Ok(())
    }

    /// Encodes everything buffered beyond the overlap as one block, then
    /// retains the new overlap tail.
    fn encode_buffered_block(&mut self) -> Result<()> {
        self.compact_pending();
        let mut out = std::mem::take(&mut self.pending);
        let result = self.cctx.frame_block(&self.buf, self.overlap_len, &mut out);
        self.pending = out;
        if let Err(e) = result {
            self.cctx.mark_poisoned();
            return Err(e);
        }

        let keep = self
            .options()
            .overlap_size()
            .max(1)
            .min(self.buf.len());
        let tail_start = self.buf.len() - keep;
        self.buf.copy_within(tail_start.., 0);
        self.buf.truncate(keep);
        self.overlap_len = keep;
        Ok(())
    }

    fn has_pending(&self) -> bool {
        self.pending_pos < self.pending.len()
    }

    fn pending_left(&self) -> usize {
        self.pending.len() - self.pending_pos
    }

    fn compact_pending(&mut self) {
        if self.pending_pos > 0 {
            self.pending.drain(..self.pending_pos);
            self.pending_pos = 0;
        }
    }

    fn drain_pending(&mut self, output: &mut OutBuffer<'_>) {
        let take = self.pending_left().min(output.remaining());
        if take > 0 {
            output.dst[output.pos..output.pos + take]
                .copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + take]);
            output.pos += take;
            self.pending_pos += take;
        }
        if !self.has_pending() {
            self.pending.clear();
            self.pending_pos = 0;
        }
    }
}

/// Streaming decompressor: a thin cursor-driven wrapper over
/// [`DecompressContext`].
#[derive(Debug, Default)]
pub struct DecompressStream {
    dctx: DecompressContext,
}

impl DecompressStream {
    /// Creates a stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decompresses as much as the cursors allow.
    ///
    /// Returns `true` once the frame is complete and fully delivered.
    pub fn decompress(
        &mut self,
        input: &mut InBuffer<'_>,
        output: &mut OutBuffer<'_>,
    ) -> Result<bool> {
        self.dctx.decompress_stream(input, output)
    }

    /// True once the whole frame has been delivered.
    pub fn finished(&self) -> bool {
        self.dctx.finished()
    }

    /// Prepares for a new frame.
    pub fn reset(&mut self) {
        self.dctx.reset();
    }
}
