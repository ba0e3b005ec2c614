//! Instruction trace records produced by the BERI/CHERI debug unit.
//!
//! A record is popped from the unit's trace FIFO in a packed 32-byte form
//! ([`live`]) and stored on disk in a byte-aligned big-endian form
//! ([`disk`]). Two disk versions exist; v2 files announce themselves with a
//! header record.

pub mod disk;
pub mod live;

use std::fmt::Display;

use beri_common::ExceptionCode;

pub use disk::{TraceFile, TraceFormat, TraceWriter};

/// Exception field value meaning "the instruction did not trap".
pub const NO_EXCEPTION: u8 = 31;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("trace file length {len} is not a multiple of the {record_size}-byte record size")]
    MalformedFile { len: usize, record_size: usize },
    #[error("unsupported trace file version {0}")]
    UnsupportedVersion(u8),
    #[error("trace record at offset {0} could not be parsed")]
    Parse(usize),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TraceEntry {
    pub valid: bool,
    /// Selects how `value1`/`value2` are interpreted (0..13).
    pub version: u8,
    /// 5-bit cause code, [`NO_EXCEPTION`] when nothing trapped.
    pub exception: u8,
    /// Low 10 bits of the cycle counter; see [`CycleCounter`].
    pub cycles: u16,
    pub instruction: u32,
    pub pc: u64,
    pub value1: u64,
    pub value2: u64,
    pub asid: u8,
    pub thread: u8,
    pub branch: bool,
}

impl TraceEntry {
    pub fn exception(&self) -> Option<ExceptionCode> {
        (self.exception != NO_EXCEPTION).then_some(ExceptionCode(self.exception))
    }
}

impl Display for TraceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "t{:<3} v{:<2} {:4} PC={:016x} inst={:08x} val1={:016x} val2={:016x} asid={}",
            self.thread,
            self.version,
            self.cycles,
            self.pc,
            self.instruction,
            self.value1,
            self.value2,
            self.asid,
        )?;
        if self.branch {
            f.write_str(" branch")?;
        }
        if let Some(exception) = self.exception() {
            write!(f, " EXCEPTION {exception}")?;
        }
        Ok(())
    }
}

/// Rebuilds a monotonic cycle count from the 10-bit wrapping field of
/// consecutive entries. Assumes fewer than 1024 cycles pass between two
/// entries.
#[derive(Copy, Clone, Debug, Default)]
pub struct CycleCounter {
    total: u64,
    last: Option<u16>,
}

impl CycleCounter {
    pub const WRAP: u16 = 1 << 10;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&mut self, cycles: u16) -> u64 {
        let cycles = cycles % Self::WRAP;
        match self.last {
            Some(last) => {
                let delta = (cycles + Self::WRAP - last) % Self::WRAP;
                self.total += delta as u64;
            }
            None => self.total = cycles as u64,
        }
        self.last = Some(cycles);
        self.total
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}
