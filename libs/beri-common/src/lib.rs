use std::fmt::Display;

/// Cause code reported by the CPU when an instruction traps.
///
/// The debug unit reports the MIPS `Cause.ExcCode` value (0..31). The
/// value `0xFF` is a debug-unit sentinel for an instruction it could not
/// decode.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ExceptionCode(pub u8);

impl ExceptionCode {
    pub const INVALID_OPCODE: Self = Self(0xFF);
    pub const RESERVED_INSTRUCTION: Self = Self(10);

    /// Human-readable name of the cause code.
    pub fn name(&self) -> &'static str {
        if *self == Self::INVALID_OPCODE {
            return "invalid opcode";
        }
        EXCEPTION_NAMES
            .get(self.0 as usize)
            .copied()
            .flatten()
            .unwrap_or("unknown exception")
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl From<u8> for ExceptionCode {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl Display for ExceptionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:#04x})", self.name(), self.0)
    }
}

// Index = Cause.ExcCode. `None` entries are reserved by the architecture.
const EXCEPTION_NAMES: [Option<&str>; 32] = [
    Some("interrupt"),
    Some("TLB modification"),
    Some("TLB miss on load"),
    Some("TLB miss on store"),
    Some("address error on load"),
    Some("address error on store"),
    Some("bus error on instruction fetch"),
    Some("bus error on data access"),
    Some("syscall"),
    Some("breakpoint"),
    Some("reserved instruction"),
    Some("coprocessor unusable"),
    Some("arithmetic overflow"),
    Some("trap"),
    None,
    Some("floating point"),
    None,
    None,
    Some("capability (C2E)"),
    None,
    None,
    None,
    Some("MDMX unusable"),
    Some("watch"),
    Some("machine check"),
    Some("thread"),
    Some("DSP unusable"),
    None,
    None,
    None,
    Some("cache error"),
    None,
];

/// Size of a single memory access.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AccessWidth {
    Byte,
    Half,
    Word,
    Double,
}

impl AccessWidth {
    pub const ALL: [Self; 4] = [Self::Byte, Self::Half, Self::Word, Self::Double];

    pub fn bytes(&self) -> usize {
        match self {
            AccessWidth::Byte => 1,
            AccessWidth::Half => 2,
            AccessWidth::Word => 4,
            AccessWidth::Double => 8,
        }
    }

    /// Mask selecting the bits a value of this width can carry.
    pub fn mask(&self) -> u64 {
        match self {
            AccessWidth::Double => u64::MAX,
            _ => (1u64 << (self.bytes() * 8)) - 1,
        }
    }

    /// Accesses must be naturally aligned or the CPU raises an address error.
    pub fn is_aligned(&self, address: u64) -> bool {
        address % self.bytes() as u64 == 0
    }
}

impl Display for AccessWidth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessWidth::Byte => f.write_str("byte"),
            AccessWidth::Half => f.write_str("half"),
            AccessWidth::Word => f.write_str("word"),
            AccessWidth::Double => f.write_str("double"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exception_names() {
        assert_eq!(ExceptionCode(4).name(), "address error on load");
        assert_eq!(ExceptionCode(18).name(), "capability (C2E)");
        assert_eq!(ExceptionCode(14).name(), "unknown exception");
        assert_eq!(ExceptionCode(31).name(), "unknown exception");
        assert_eq!(ExceptionCode(32).name(), "unknown exception");
        assert_eq!(ExceptionCode(0x7f).name(), "unknown exception");
        assert_eq!(ExceptionCode::INVALID_OPCODE.name(), "invalid opcode");
    }

    #[test]
    fn width_masks() {
        assert_eq!(AccessWidth::Byte.mask(), 0xff);
        assert_eq!(AccessWidth::Half.mask(), 0xffff);
        assert_eq!(AccessWidth::Word.mask(), 0xffff_ffff);
        assert_eq!(AccessWidth::Double.mask(), u64::MAX);
        assert!(AccessWidth::Word.is_aligned(0x9000_0000_0000_1004));
        assert!(!AccessWidth::Double.is_aligned(0x9000_0000_0000_1004));
    }
}
