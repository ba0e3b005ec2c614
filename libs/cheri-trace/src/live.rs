//! The record as the debug unit sends it.
//!
//! The unit shifts the record out least-significant byte first, so the 32
//! bytes read as one little-endian 256-bit value, reversed with respect to a
//! naive overlay of the on-disk structure:
//!
//! | bits     | field       |
//! |----------|-------------|
//! | 0..31    | header      |
//! | 32..63   | instruction |
//! | 64..127  | pc          |
//! | 128..191 | value1      |
//! | 192..255 | value2      |

use bilge::prelude::*;

use crate::TraceEntry;

pub const RECORD_SIZE: usize = 32;

#[bitsize(32)]
#[derive(FromBits, Copy, Clone, DebugBits, PartialEq, Eq)]
pub struct Header {
    pub valid: bool,
    pub version: u4,
    pub exception: u5,
    pub cycles: u10,
    pub branch: bool,
    pub asid: u8,
    pub spare: u3,
}

fn le_u32(raw: &[u8; RECORD_SIZE], at: usize) -> u32 {
    let mut bytes = [0; 4];
    bytes.copy_from_slice(&raw[at..at + 4]);
    u32::from_le_bytes(bytes)
}

fn le_u64(raw: &[u8; RECORD_SIZE], at: usize) -> u64 {
    let mut bytes = [0; 8];
    bytes.copy_from_slice(&raw[at..at + 8]);
    u64::from_le_bytes(bytes)
}

/// The thread id is not part of the live record and comes back as 0.
pub fn decode_live(raw: &[u8; RECORD_SIZE]) -> TraceEntry {
    let header = Header::from(le_u32(raw, 0));
    TraceEntry {
        valid: header.valid(),
        version: header.version().value(),
        exception: header.exception().value(),
        cycles: header.cycles().value(),
        instruction: le_u32(raw, 4),
        pc: le_u64(raw, 8),
        value1: le_u64(raw, 16),
        value2: le_u64(raw, 24),
        asid: header.asid(),
        thread: 0,
        branch: header.branch(),
    }
}

/// Fields wider than their slot in the header are truncated.
pub fn encode_live(entry: &TraceEntry) -> [u8; RECORD_SIZE] {
    let header = Header::new(
        entry.valid,
        u4::new(entry.version & 0xf),
        u5::new(entry.exception & 0x1f),
        u10::new(entry.cycles & 0x3ff),
        entry.branch,
        entry.asid,
        u3::new(0),
    );
    let mut raw = [0; RECORD_SIZE];
    raw[0..4].copy_from_slice(&u32::from(header).to_le_bytes());
    raw[4..8].copy_from_slice(&entry.instruction.to_le_bytes());
    raw[8..16].copy_from_slice(&entry.pc.to_le_bytes());
    raw[16..24].copy_from_slice(&entry.value1.to_le_bytes());
    raw[24..32].copy_from_slice(&entry.value2.to_le_bytes());
    raw
}
