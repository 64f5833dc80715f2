//! Control channel frames
//!
//! Every command to a card is a frame of four 32-bit words written to the
//! card's shared control port. The upper nibble of the first word selects
//! the command and bits 24..28 carry `slot + 1`, so one control channel
//! addresses up to fifteen slots.
//!
//! | Command        | Word 0                      | Word 1            | Word 2                  | Word 3            |
//! |----------------|-----------------------------|-------------------|-------------------------|-------------------|
//! | PR begin       | `0xD000BEEF \| tag`         | `0xDEADBEEF`      | `0xDEADBEEF`            | `0xBABEFACE`      |
//! | PR end         | `0xD000DEAD \| tag`         | `0xDEADBEEF`      | `0xDEADBEEF`            | `0xBABEFACE`      |
//! | Go             | `0xA0000000 \| tag`         | `0xDEADBEEF`      | `0xDEADBEEF`            | `0xDEADBEEF`      |
//! | Tie I/O        | `0xC0100000 \| tag \| size>>16` | `0xC0200000 \| tag \| size&0xFFFF` | `0xC0300001 \| tag` | `0xB0000000 \| tag` |
//!
//! Frames travel in the host's native byte order.

use bytemuck::{Pod, Zeroable};
use std::fmt;

/// Words per frame
pub const FRAME_WORDS: usize = 4;

/// Bytes per frame
pub const FRAME_BYTES: usize = FRAME_WORDS * 4;

/// Highest slot count one control channel can address
pub const MAX_SLOTS_PER_CARD: u8 = 15;

/// Padding word
pub const FILLER: u32 = 0xDEAD_BEEF;

/// Last word of both reconfiguration frames
pub const PR_TRAILER: u32 = 0xBABE_FACE;

const PR_BEGIN: u32 = 0xD000_BEEF;
const PR_END: u32 = 0xD000_DEAD;
const GO: u32 = 0xA000_0000;
const SIZE_HIGH: u32 = 0xC010_0000;
const SIZE_LOW: u32 = 0xC020_0000;
const TIE_COMMIT: u32 = 0xC030_0001;
const READY: u32 = 0xB000_0000;

/// Slot tag OR-ed into command words
#[inline]
pub const fn slot_tag(slot: u8) -> u32 {
    ((slot as u32) + 1) << 24
}

/// Kind of a host-issued control frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    PrBegin,
    PrEnd,
    Go,
    TieIo,
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PrBegin => "PR-begin",
            Self::PrEnd => "PR-end",
            Self::Go => "go",
            Self::TieIo => "tie-io",
        })
    }
}

/// One four-word control frame
#[derive(Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(transparent)]
pub struct ControlFrame(pub [u32; FRAME_WORDS]);

impl ControlFrame {
    /// Announce a partial reconfiguration of `slot`
    pub const fn pr_begin(slot: u8) -> Self {
        Self([PR_BEGIN | slot_tag(slot), FILLER, FILLER, PR_TRAILER])
    }

    /// Finish a partial reconfiguration of `slot`
    pub const fn pr_end(slot: u8) -> Self {
        Self([PR_END | slot_tag(slot), FILLER, FILLER, PR_TRAILER])
    }

    /// Trigger execution on `slot`
    pub const fn go(slot: u8) -> Self {
        Self([GO | slot_tag(slot), FILLER, FILLER, FILLER])
    }

    /// Configure the transfer size of `slot` and mark it ready
    pub const fn tie_io(slot: u8, transfer_size: u32) -> Self {
        let tag = slot_tag(slot);
        Self([
            SIZE_HIGH | tag | (transfer_size >> 16),
            SIZE_LOW | tag | (transfer_size & 0xFFFF),
            TIE_COMMIT | tag,
            READY | tag,
        ])
    }

    /// Frame words
    #[inline]
    pub const fn words(&self) -> [u32; FRAME_WORDS] {
        self.0
    }

    /// Command word recorded as the node's pending command
    ///
    /// For tie-io this is the trailing ready word, for everything else the
    /// first word.
    pub fn command_word(&self) -> u32 {
        match self.kind() {
            Some(FrameKind::TieIo) => self.0[3],
            _ => self.0[0],
        }
    }

    /// Wire bytes
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    /// Decode a frame from the first [`FRAME_BYTES`] of `bytes`
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bytes.get(..FRAME_BYTES).map(bytemuck::pod_read_unaligned)
    }

    /// Classify a host-issued frame
    pub fn kind(&self) -> Option<FrameKind> {
        let word = self.0[0];
        match word >> 28 {
            0xD if word & 0xFFFF == PR_BEGIN & 0xFFFF => Some(FrameKind::PrBegin),
            0xD if word & 0xFFFF == PR_END & 0xFFFF => Some(FrameKind::PrEnd),
            0xA => Some(FrameKind::Go),
            0xC if (word >> 20) & 0xF == 0x1 => Some(FrameKind::TieIo),
            _ => None,
        }
    }

    /// Slot addressed by the frame tag
    pub fn slot(&self) -> Option<u8> {
        match (self.0[0] >> 24) & 0xF {
            0 => None,
            tag => Some(tag as u8 - 1),
        }
    }

    /// Transfer size carried by a tie-io frame
    pub fn transfer_size(&self) -> Option<u32> {
        (self.kind() == Some(FrameKind::TieIo)).then(|| ((self.0[0] & 0xFFFF) << 16) | (self.0[1] & 0xFFFF))
    }
}

impl fmt::Debug for ControlFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.0;
        write!(f, "ControlFrame[{a:#010x}, {b:#010x}, {c:#010x}, {d:#010x}]")
    }
}
