//! LZMA2 chunk framing.
//!
//! A frame body is a sequence of self-describing chunks. The first byte of
//! each chunk selects its class:
//!
//! ```text
//! 0x00        end of frame
//! 0x01        uncompressed chunk, dictionary reset; 2-byte BE size-1; raw bytes
//! 0x02        uncompressed chunk, no reset; same size encoding
//! 0x80..=0xFF compressed chunk: bits 5..7 carry the reset mode, bits 0..4
//!             the high bits of unpacked_size-1; then 2-byte BE unpacked low,
//!             2-byte BE packed_size-1, an optional properties byte, and the
//!             range-coded payload
//! ```
//!
//! Chunks decode to at most 2^16 bytes and hold at most 2^16 packed bytes.

use crate::error::{Error, Result};

/// Maximum decoded bytes in one chunk.
pub const CHUNK_UNPACKED_MAX: usize = 1 << 16;

/// Maximum packed payload bytes in one chunk.
pub const CHUNK_PACKED_MAX: usize = 1 << 16;

/// Header length of an uncompressed chunk.
pub const UNCOMPRESSED_HEADER_LEN: usize = 3;

/// Header length of a compressed chunk, excluding the properties byte.
pub const COMPRESSED_HEADER_LEN: usize = 5;

/// Control byte values and helpers.
pub mod ctrl {
    /// End of frame marker.
    pub const END_OF_FRAME: u8 = 0x00;
    /// Uncompressed chunk, reset dictionary.
    pub const UNCOMPRESSED_RESET: u8 = 0x01;
    /// Uncompressed chunk, keep dictionary.
    pub const UNCOMPRESSED: u8 = 0x02;
    /// Compressed chunk flag (bit 7).
    pub const COMPRESSED_FLAG: u8 = 0x80;
    /// Shift of the reset-mode field.
    pub const RESET_SHIFT: u32 = 5;
    /// Mask of the high unpacked-size bits.
    pub const UNPACKED_HIGH_MASK: u8 = 0x1F;

    /// True for a compressed-chunk control byte.
    #[inline]
    pub const fn is_compressed(byte: u8) -> bool {
        byte & COMPRESSED_FLAG != 0
    }
}

/// What a compressed chunk resets before decoding begins.
///
/// Mode numbering matches the on-wire field (control bits 5..7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResetMode {
    /// Continue with the previous state, properties and dictionary.
    None = 0,
    /// Reset coder state and probabilities; keep properties and dictionary.
    State = 1,
    /// Reset state and read a fresh properties byte; keep the dictionary.
    StateProps = 2,
    /// Reset everything: dictionary, state, and properties.
    DictStateProps = 3,
}

impl ResetMode {
    /// Extracts the reset mode from a compressed control byte.
    pub fn from_ctrl(byte: u8) -> Self {
        match (byte >> ctrl::RESET_SHIFT) & 0x03 {
            0 => ResetMode::None,
            1 => ResetMode::State,
            2 => ResetMode::StateProps,
            _ => ResetMode::DictStateProps,
        }
    }

    /// True when a properties byte follows the size fields.
    pub fn props_follow(self) -> bool {
        matches!(self, ResetMode::StateProps | ResetMode::DictStateProps)
    }

    /// True when coder state and probabilities reset.
    pub fn resets_state(self) -> bool {
        self != ResetMode::None
    }

    /// True when the dictionary resets.
    pub fn resets_dict(self) -> bool {
        self == ResetMode::DictStateProps
    }
}

/// A parsed chunk header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkHeader {
    /// Frame terminator.
    EndOfFrame,
    /// Raw bytes follow.
    Uncompressed {
        /// Whether the dictionary resets before this chunk.
        reset_dict: bool,
        /// Number of raw bytes.
        unpacked_size: usize,
    },
    /// Range-coded payload follows.
    Compressed {
        /// Reset mode from the control byte.
        reset: ResetMode,
        /// Decoded size of the payload.
        unpacked_size: usize,
        /// Packed payload length.
        packed_size: usize,
        /// Properties byte, present when the mode carries one.
        props: Option<u8>,
    },
}

impl ChunkHeader {
    /// Parses one chunk header from the start of `buf`.
    ///
    /// Returns the header and its encoded length. `SrcSizeWrong` means the
    /// buffer ended inside the header; `CorruptionDetected` means the bytes
    /// cannot be a header.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize)> {
        let ctrl_byte = *buf.first().ok_or(Error::SrcSizeWrong)?;
        match ctrl_byte {
            ctrl::END_OF_FRAME => Ok((ChunkHeader::EndOfFrame, 1)),
            ctrl::UNCOMPRESSED_RESET | ctrl::UNCOMPRESSED => {
                if buf.len() < UNCOMPRESSED_HEADER_LEN {
                    return Err(Error::SrcSizeWrong);
                }
                let unpacked_size = u16::from_be_bytes([buf[1], buf[2]]) as usize + 1;
                Ok((
                    ChunkHeader::Uncompressed {
                        reset_dict: ctrl_byte == ctrl::UNCOMPRESSED_RESET,
                        unpacked_size,
                    },
                    UNCOMPRESSED_HEADER_LEN,
                ))
            }
            byte if ctrl::is_compressed(byte) => {
                let reset = ResetMode::from_ctrl(byte);
                let header_len = COMPRESSED_HEADER_LEN + usize::from(reset.props_follow());
                if buf.len() < header_len {
                    return Err(Error::SrcSizeWrong);
                }
                let high = (byte & ctrl::UNPACKED_HIGH_MASK) as usize;
                let unpacked_size = (high << 16 | u16::from_be_bytes([buf[1], buf[2]]) as usize) + 1;
                if unpacked_size > CHUNK_UNPACKED_MAX {
                    return Err(Error::CorruptionDetected);
                }
                let packed_size = u16::from_be_bytes([buf[3], buf[4]]) as usize + 1;
                let props = reset.props_follow().then(|| buf[5]);
                Ok((
                    ChunkHeader::Compressed {
                        reset,
                        unpacked_size,
                        packed_size,
                        props,
                    },
                    header_len,
                ))
            }
            _ => Err(Error::CorruptionDetected),
        }
    }
}

/// Writes one uncompressed chunk (header plus raw bytes).
///
/// `data` must be non-empty and at most [`CHUNK_UNPACKED_MAX`] bytes.
pub fn write_uncompressed_chunk(out: &mut Vec<u8>, data: &[u8], reset_dict: bool) {
    debug_assert!(!data.is_empty() && data.len() <= CHUNK_UNPACKED_MAX);
    let ctrl_byte = if reset_dict {
        ctrl::UNCOMPRESSED_RESET
    } else {
        ctrl::UNCOMPRESSED
    };
    out.push(ctrl_byte);
    out.extend_from_slice(&((data.len() - 1) as u16).to_be_bytes());
    out.extend_from_slice(data);
}

/// Writes a compressed chunk header followed by the packed payload.
pub fn write_compressed_chunk(
    out: &mut Vec<u8>,
    payload: &[u8],
    unpacked_size: usize,
    reset: ResetMode,
    props: u8,
) {
    debug_assert!(unpacked_size >= 1 && unpacked_size <= CHUNK_UNPACKED_MAX);
    debug_assert!(!payload.is_empty() && payload.len() <= CHUNK_PACKED_MAX);

    let unpacked = (unpacked_size - 1) as u32;
    let ctrl_byte =
        ctrl::COMPRESSED_FLAG | (reset as u8) << ctrl::RESET_SHIFT | (unpacked >> 16) as u8;
    out.push(ctrl_byte);
    out.extend_from_slice(&(unpacked as u16).to_be_bytes());
    out.extend_from_slice(&((payload.len() - 1) as u16).to_be_bytes());
    if reset.props_follow() {
        out.push(props);
    }
    out.extend_from_slice(payload);
}

/// Writes the frame terminator byte.
pub fn write_end_marker(out: &mut Vec<u8>) {
    out.push(ctrl::END_OF_FRAME);
}
