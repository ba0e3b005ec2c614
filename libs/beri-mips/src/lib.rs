//! Just enough of a MIPS64/CHERI assembler to drive a BERI1 debug unit.
//!
//! The debug unit has no opcodes for register or memory access, so the host
//! builds a real instruction, hands it to the unit and lets the pipeline
//! execute it. Only the handful of instructions needed for that are covered.

use std::fmt::Display;

use beri_common::AccessWidth;
use bilge::prelude::*;

pub const REGISTER_COUNT: u8 = 32;

#[derive(thiserror::Error, Copy, Clone, Debug, PartialEq, Eq)]
pub enum EncodeError {
    #[error("register ${0} is out of bounds (0..31)")]
    RegisterOutOfBounds(u8),
    #[error("immediate {value} does not fit in a {bits}-bit field")]
    ImmediateOutOfBounds { value: i64, bits: u8 },
}

pub mod format {
    use super::*;

    /// Register-register format (SPECIAL opcode space).
    #[bitsize(32)]
    #[derive(FromBits, Copy, Clone, DebugBits, PartialEq, Eq)]
    pub struct RFormat {
        pub funct: u6,
        pub shamt: u5,
        pub rd: u5,
        pub rt: u5,
        pub rs: u5,
        pub opcode: u6,
    }

    /// Immediate format, used by loads, stores and `cache`.
    #[bitsize(32)]
    #[derive(FromBits, Copy, Clone, DebugBits, PartialEq, Eq)]
    pub struct IFormat {
        pub immediate: u16,
        pub rt: u5,
        pub rs: u5,
        pub opcode: u6,
    }

    /// Coprocessor format. `function` sits where `rs` would be.
    #[bitsize(32)]
    #[derive(FromBits, Copy, Clone, DebugBits, PartialEq, Eq)]
    pub struct CopFormat {
        pub sel: u3,
        pub zero: u8,
        pub rd: u5,
        pub rt: u5,
        pub function: u5,
        pub opcode: u6,
    }
}

use format::{CopFormat, IFormat, RFormat};

mod opcode {
    pub const SPECIAL: u8 = 0x00;
    pub const COP0: u8 = 0x10;
    pub const COP2: u8 = 0x12;
    pub const CACHE: u8 = 0x2f;

    pub const LBU: u8 = 0x24;
    pub const LHU: u8 = 0x25;
    pub const LWU: u8 = 0x27;
    pub const LD: u8 = 0x37;
    pub const SB: u8 = 0x28;
    pub const SH: u8 = 0x29;
    pub const SW: u8 = 0x2b;
    pub const SD: u8 = 0x3f;

    pub const FUNCT_JR: u8 = 0x08;
    pub const FUNCT_JALR: u8 = 0x09;
    pub const FUNCT_OR: u8 = 0x25;

    pub const COP_DMF: u8 = 0x01;
    pub const CAP_JALR: u8 = 0x07;
    pub const CAP_JR: u8 = 0x08;
    pub const CAP_INC_OFFSET: u8 = 0x0d;
}

/// Cache operation used to invalidate a line in the instruction cache.
pub const CACHE_OP_INVALIDATE_INSTRUCTION: u8 = 0x10;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Instruction {
    Nop,
    /// `or rd, rs, $zero`
    Move { rd: u8, rs: u8 },
    /// `lbu`, `lhu`, `lwu` or `ld`
    Load {
        width: AccessWidth,
        rt: u8,
        base: u8,
        offset: i32,
    },
    /// `sb`, `sh`, `sw` or `sd`
    Store {
        width: AccessWidth,
        rt: u8,
        base: u8,
        offset: i32,
    },
    Jr { rs: u8 },
    Jalr { rd: u8, rs: u8 },
    Cache { op: u8, base: u8, offset: i32 },
    Dmfc0 { rt: u8, rd: u8, sel: u8 },
    /// Reads a field of capability register `rd`; `sel` picks the field.
    Dmfc2 { rt: u8, rd: u8, sel: u8 },
    CMove { cd: u8, cb: u8 },
    CJr { cb: u8 },
    CJalr { cd: u8, cb: u8 },
}

fn reg(r: u8) -> Result<u5, EncodeError> {
    if r >= REGISTER_COUNT {
        return Err(EncodeError::RegisterOutOfBounds(r));
    }
    Ok(u5::new(r))
}

fn imm16(offset: i32) -> Result<u16, EncodeError> {
    i16::try_from(offset)
        .map(|v| v as u16)
        .map_err(|_| EncodeError::ImmediateOutOfBounds {
            value: offset as i64,
            bits: 16,
        })
}

fn field(value: u8, bits: u8) -> Result<u8, EncodeError> {
    if value >> bits != 0 {
        return Err(EncodeError::ImmediateOutOfBounds {
            value: value as i64,
            bits,
        });
    }
    Ok(value)
}

fn r_format(funct: u8, rd: u8, rt: u8, rs: u8) -> Result<u32, EncodeError> {
    Ok(RFormat::new(
        u6::new(funct),
        u5::new(0),
        reg(rd)?,
        reg(rt)?,
        reg(rs)?,
        u6::new(opcode::SPECIAL),
    )
    .into())
}

fn i_format(op: u8, rt: u8, rs: u8, offset: i32) -> Result<u32, EncodeError> {
    Ok(IFormat::new(imm16(offset)?, reg(rt)?, reg(rs)?, u6::new(op)).into())
}

fn cop_format(op: u8, function: u8, rt: u8, rd: u8, sel: u8) -> Result<u32, EncodeError> {
    Ok(CopFormat::new(
        u3::new(field(sel, 3)?),
        0,
        reg(rd)?,
        reg(rt)?,
        u5::new(function),
        u6::new(op),
    )
    .into())
}

fn load_opcode(width: AccessWidth) -> u8 {
    match width {
        AccessWidth::Byte => opcode::LBU,
        AccessWidth::Half => opcode::LHU,
        AccessWidth::Word => opcode::LWU,
        AccessWidth::Double => opcode::LD,
    }
}

fn store_opcode(width: AccessWidth) -> u8 {
    match width {
        AccessWidth::Byte => opcode::SB,
        AccessWidth::Half => opcode::SH,
        AccessWidth::Word => opcode::SW,
        AccessWidth::Double => opcode::SD,
    }
}

impl Instruction {
    pub fn load(width: AccessWidth, rt: u8, base: u8) -> Self {
        Self::Load {
            width,
            rt,
            base,
            offset: 0,
        }
    }

    pub fn store(width: AccessWidth, rt: u8, base: u8) -> Self {
        Self::Store {
            width,
            rt,
            base,
            offset: 0,
        }
    }

    /// Machine word for the instruction. Nothing is truncated: any operand
    /// that does not fit its field is rejected.
    pub fn encode(&self) -> Result<u32, EncodeError> {
        match *self {
            Instruction::Nop => Ok(0),
            Instruction::Move { rd, rs } => r_format(opcode::FUNCT_OR, rd, 0, rs),
            Instruction::Load {
                width,
                rt,
                base,
                offset,
            } => i_format(load_opcode(width), rt, base, offset),
            Instruction::Store {
                width,
                rt,
                base,
                offset,
            } => i_format(store_opcode(width), rt, base, offset),
            Instruction::Jr { rs } => r_format(opcode::FUNCT_JR, 0, 0, rs),
            Instruction::Jalr { rd, rs } => r_format(opcode::FUNCT_JALR, rd, 0, rs),
            Instruction::Cache { op, base, offset } => {
                i_format(opcode::CACHE, field(op, 5)?, base, offset)
            }
            Instruction::Dmfc0 { rt, rd, sel } => {
                cop_format(opcode::COP0, opcode::COP_DMF, rt, rd, sel)
            }
            Instruction::Dmfc2 { rt, rd, sel } => {
                cop_format(opcode::COP2, opcode::COP_DMF, rt, rd, sel)
            }
            Instruction::CMove { cd, cb } => {
                cop_format(opcode::COP2, opcode::CAP_INC_OFFSET, cd, cb, 0)
            }
            Instruction::CJr { cb } => cop_format(opcode::COP2, opcode::CAP_JR, 0, cb, 0),
            Instruction::CJalr { cd, cb } => cop_format(opcode::COP2, opcode::CAP_JALR, cd, cb, 0),
        }
    }

    /// Instruction as it travels on the wire: a big-endian 32-bit word.
    pub fn to_be_bytes(&self) -> Result<[u8; 4], EncodeError> {
        Ok(self.encode()?.to_be_bytes())
    }

    /// Inverse of [`Instruction::encode`] for the instructions this crate
    /// knows. Anything else yields `None`.
    pub fn decode(word: u32) -> Option<Self> {
        if word == 0 {
            return Some(Self::Nop);
        }
        let r = RFormat::from(word);
        let i = IFormat::from(word);
        let c = CopFormat::from(word);
        let offset = i.immediate() as i16 as i32;
        let base = i.rs().value();
        let rt = i.rt().value();
        let load = |width| {
            Some(Self::Load {
                width,
                rt,
                base,
                offset,
            })
        };
        let store = |width| {
            Some(Self::Store {
                width,
                rt,
                base,
                offset,
            })
        };
        match r.opcode().value() {
            opcode::SPECIAL => {
                if r.shamt().value() != 0 || r.rt().value() != 0 {
                    return None;
                }
                match (r.funct().value(), r.rd().value()) {
                    (opcode::FUNCT_OR, rd) => Some(Self::Move {
                        rd,
                        rs: r.rs().value(),
                    }),
                    (opcode::FUNCT_JR, 0) => Some(Self::Jr { rs: r.rs().value() }),
                    (opcode::FUNCT_JALR, rd) => Some(Self::Jalr {
                        rd,
                        rs: r.rs().value(),
                    }),
                    _ => None,
                }
            }
            opcode::LBU => load(AccessWidth::Byte),
            opcode::LHU => load(AccessWidth::Half),
            opcode::LWU => load(AccessWidth::Word),
            opcode::LD => load(AccessWidth::Double),
            opcode::SB => store(AccessWidth::Byte),
            opcode::SH => store(AccessWidth::Half),
            opcode::SW => store(AccessWidth::Word),
            opcode::SD => store(AccessWidth::Double),
            opcode::CACHE => Some(Self::Cache {
                op: rt,
                base,
                offset,
            }),
            op @ (opcode::COP0 | opcode::COP2) => {
                if c.zero() != 0 {
                    return None;
                }
                let (rt, rd, sel) = (c.rt().value(), c.rd().value(), c.sel().value());
                match (op, c.function().value()) {
                    (opcode::COP0, opcode::COP_DMF) => Some(Self::Dmfc0 { rt, rd, sel }),
                    (opcode::COP2, opcode::COP_DMF) => Some(Self::Dmfc2 { rt, rd, sel }),
                    (opcode::COP2, opcode::CAP_INC_OFFSET) if sel == 0 => {
                        Some(Self::CMove { cd: rt, cb: rd })
                    }
                    (opcode::COP2, opcode::CAP_JR) if sel == 0 && rt == 0 => {
                        Some(Self::CJr { cb: rd })
                    }
                    (opcode::COP2, opcode::CAP_JALR) if sel == 0 => {
                        Some(Self::CJalr { cd: rt, cb: rd })
                    }
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

fn width_suffix(width: AccessWidth, load: bool) -> &'static str {
    match (width, load) {
        (AccessWidth::Byte, true) => "lbu",
        (AccessWidth::Half, true) => "lhu",
        (AccessWidth::Word, true) => "lwu",
        (AccessWidth::Double, true) => "ld",
        (AccessWidth::Byte, false) => "sb",
        (AccessWidth::Half, false) => "sh",
        (AccessWidth::Word, false) => "sw",
        (AccessWidth::Double, false) => "sd",
    }
}

impl Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Instruction::Nop => f.write_str("nop"),
            Instruction::Move { rd, rs } => write!(f, "move ${rd}, ${rs}"),
            Instruction::Load {
                width,
                rt,
                base,
                offset,
            } => write!(f, "{} ${rt}, {offset}(${base})", width_suffix(width, true)),
            Instruction::Store {
                width,
                rt,
                base,
                offset,
            } => write!(f, "{} ${rt}, {offset}(${base})", width_suffix(width, false)),
            Instruction::Jr { rs } => write!(f, "jr ${rs}"),
            Instruction::Jalr { rd, rs } => write!(f, "jalr ${rd}, ${rs}"),
            Instruction::Cache { op, base, offset } => {
                write!(f, "cache {op:#x}, {offset}(${base})")
            }
            Instruction::Dmfc0 { rt, rd, sel } => write!(f, "dmfc0 ${rt}, ${rd}, {sel}"),
            Instruction::Dmfc2 { rt, rd, sel } => write!(f, "dmfc2 ${rt}, $c{rd}, {sel}"),
            Instruction::CMove { cd, cb } => write!(f, "cmove $c{cd}, $c{cb}"),
            Instruction::CJr { cb } => write!(f, "cjr $c{cb}"),
            Instruction::CJalr { cd, cb } => write!(f, "cjalr $c{cd}, $c{cb}"),
        }
    }
}
