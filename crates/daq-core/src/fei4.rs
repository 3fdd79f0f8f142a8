//! FE-I4 raw word format.
//!
//! ```text
//!  31      24 23                                    0
//! ┌──────────┬──────────────────────────────────────┐
//! │ channel  │ front-end record                     │
//! └──────────┴──────────────────────────────────────┘
//!
//! header : 1110 1001 | 0 | l1id[14:10] | bcid[9:0]
//! record : col[23:17] | row[16:8] | tot1[7:4] | tot2[3:0]
//! ```
//!
//! `tot2` belongs to the pixel one row above `row`. A ToT code of 15 means
//! "no hit".

use crate::limits::{N_COL, N_ROW};
use crate::router::ChannelId;

/// Bits compared against [`HEADER_MARKER`]
pub const HEADER_MASK: u32 = 0x00FF_0000;
/// Data-header signature in bits 23..16
pub const HEADER_MARKER: u32 = 0x00E9_0000;
/// ToT code meaning "no hit"
pub const NO_HIT: u8 = 15;
/// ToT code for a hit below the discriminator threshold
pub const SMALL_HIT: u8 = 14;

/// A decoded 24-bit front-end record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fei4Word {
    /// Data header opening a trigger
    Header {
        /// Level-1 trigger id
        l1id: u16,
        /// Bunch crossing id
        bcid: u16,
    },
    /// Data record carrying ToT codes of two vertically adjacent pixels
    Record {
        /// Column, 1..=80
        col: u16,
        /// Row of the first pixel, 1..=336
        row: u16,
        /// ToT code of (col, row)
        tot1: u8,
        /// ToT code of (col, row + 1)
        tot2: u8,
    },
    /// Neither a header nor an in-matrix data record
    Unknown(u32),
}

/// Channel id carried in bits 31..24.
pub fn channel_of(word: u32) -> ChannelId {
    word >> 24
}

/// Decode the front-end part of `word`.
pub fn decode(word: u32) -> Fei4Word {
    if word & HEADER_MASK == HEADER_MARKER {
        return Fei4Word::Header {
            l1id: ((word & 0x7C00) >> 10) as u16,
            bcid: (word & 0x3FF) as u16,
        };
    }
    let col = ((word & 0x00FE_0000) >> 17) as u16;
    let row = ((word & 0x0001_FF00) >> 8) as u16;
    if (1..=N_COL as u16).contains(&col) && (1..=N_ROW as u16).contains(&row) {
        Fei4Word::Record {
            col,
            row,
            tot1: ((word & 0xF0) >> 4) as u8,
            tot2: (word & 0xF) as u8,
        }
    } else {
        Fei4Word::Unknown(word & 0x00FF_FFFF)
    }
}

/// Build a raw data-header word for `channel`. Out-of-range ids are truncated.
pub fn encode_header(channel: ChannelId, l1id: u16, bcid: u16) -> u32 {
    (channel << 24) | HEADER_MARKER | ((u32::from(l1id) & 0x1F) << 10) | (u32::from(bcid) & 0x3FF)
}

/// Build a raw data-record word for `channel`.
///
/// `tot2` belongs to the pixel at `row + 1`.
pub fn encode_record(channel: ChannelId, col: u16, row: u16, tot1: u8, tot2: u8) -> u32 {
    (channel << 24)
        | ((u32::from(col) & 0x7F) << 17)
        | ((u32::from(row) & 0x1FF) << 8)
        | ((u32::from(tot1) & 0xF) << 4)
        | (u32::from(tot2) & 0xF)
}

/// Convert a ToT code to a ToT value for a given `HitDiscCnfg`.
///
/// Returns `None` for "no hit" and for small hits when `hit_disc_cnfg` is 0.
pub fn tot_from_code(code: u8, hit_disc_cnfg: u8) -> Option<u16> {
    match code {
        0..=13 => Some(u16::from(code) + 1 + u16::from(hit_disc_cnfg)),
        SMALL_HIT if hit_disc_cnfg > 0 => Some(u16::from(hit_disc_cnfg)),
        _ => None,
    }
}

/// Inverse of [`tot_from_code`], saturating out-of-range values.
pub fn code_from_tot(tot: u16, hit_disc_cnfg: u8) -> u8 {
    let h = u16::from(hit_disc_cnfg);
    if tot <= h {
        SMALL_HIT
    } else {
        (tot - 1 - h).min(13) as u8
    }
}
