//! PC-6001 PSG music file loader.
//!
//! The on-disk format is a 6-byte header of little-endian 16-bit offsets
//! (channel A, B, C start addresses, relative to the file start), a
//! reserved 16-bit word, and the three channel byte-code streams packed
//! back to back. Each stream must end at its final byte with the 0xFF end
//! mark; the whole file must fit a 16-bit address space.
//!
//! ```text
//! offset 0: u16  addr_A
//! offset 2: u16  addr_B
//! offset 4: u16  addr_C
//! offset 6: u16  reserved
//! offset 8..: channel streams, 0xFF terminated
//! ```

use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Number of PSG channels a song carries.
pub const CHANNEL_COUNT: usize = 3;

/// Smallest well-formed file: 8 header bytes plus one end mark per channel.
pub const MIN_FILE_SIZE: usize = 8 + CHANNEL_COUNT;

/// Files must stay addressable with 16-bit offsets.
pub const MAX_FILE_SIZE: usize = 0xFFFF;

/// Music-stream end mark; also the final byte of every channel region.
pub const END_MARK: u8 = 0xFF;

/// Errors produced while reading or validating a music file.
#[derive(thiserror::Error, Debug)]
pub enum FormatError {
    /// Filesystem error while reading the file.
    #[error("{0}")]
    Io(#[from] std::io::Error),

    /// File smaller than the minimal header + end marks.
    #[error("too short ({len} bytes, need at least {MIN_FILE_SIZE})")]
    TooShort {
        /// Observed file size.
        len: usize,
    },

    /// File does not fit a 16-bit address space.
    #[error("too large ({len} bytes, limit {MAX_FILE_SIZE})")]
    TooLarge {
        /// Observed file size.
        len: usize,
    },

    /// Header offsets are not `8 <= A < B < C <= len`.
    #[error("invalid address layout (A={a:#06x} B={b:#06x} C={c:#06x} size={len:#06x})")]
    BadLayout {
        /// Channel A start offset.
        a: u16,
        /// Channel B start offset.
        b: u16,
        /// Channel C start offset.
        c: u16,
        /// Observed file size.
        len: usize,
    },

    /// A channel region does not end with the 0xFF end mark.
    #[error("channel {0} data has no end mark")]
    MissingEndMark(char),
}

/// Result alias for loader operations.
pub type Result<T> = std::result::Result<T, FormatError>;

/// A loaded song: three immutable channel byte-code streams.
///
/// Each stream is an owned slice ending in [`END_MARK`]; the driver keeps a
/// clone of the `Arc` for the lifetime of playback, so the song value
/// itself may be dropped once the channels are handed over.
#[derive(Debug, Clone)]
pub struct P6Song {
    channels: [Arc<[u8]>; CHANNEL_COUNT],
}

impl P6Song {
    /// Read and parse a music file from disk.
    pub fn load(path: &Path) -> Result<Self> {
        Self::parse(&fs::read(path)?)
    }

    /// Validate a raw file image and split it into channel streams.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let len = bytes.len();
        if len < MIN_FILE_SIZE {
            return Err(FormatError::TooShort { len });
        }
        if len > MAX_FILE_SIZE {
            return Err(FormatError::TooLarge { len });
        }

        let a = u16::from_le_bytes([bytes[0], bytes[1]]);
        let b = u16::from_le_bytes([bytes[2], bytes[3]]);
        let c = u16::from_le_bytes([bytes[4], bytes[5]]);
        if a < 8 || a >= b || b >= c || usize::from(c) > len {
            return Err(FormatError::BadLayout { a, b, c, len });
        }

        let bounds = [
            (usize::from(a), usize::from(b)),
            (usize::from(b), usize::from(c)),
            (usize::from(c), len),
        ];
        for (index, &(start, end)) in bounds.iter().enumerate() {
            if bytes[end - 1] != END_MARK {
                return Err(FormatError::MissingEndMark(channel_name(index)));
            }
            debug_assert!(start < end);
        }

        Ok(Self {
            channels: bounds.map(|(start, end)| Arc::from(&bytes[start..end])),
        })
    }

    /// Byte-code stream for channel `index` (0 = A, 1 = B, 2 = C).
    pub fn channel(&self, index: usize) -> Arc<[u8]> {
        Arc::clone(&self.channels[index])
    }
}

/// Display name for a channel index.
pub fn channel_name(index: usize) -> char {
    (b'A' + index as u8) as char
}
