//! BERI1 command set.
//!
//! Opcodes are ASCII characters. Multi-byte fields are big-endian. The unit
//! has no register or memory opcodes: those go through an instruction loaded
//! with [`load_instruction`] and run with [`execute`].

use beri_mips::Instruction;

use super::{Command, Variant};
use crate::Result;

pub mod op {
    pub const LOAD_INSTRUCTION: u8 = b'i';
    pub const LOAD_OPERAND_A: u8 = b'a';
    pub const LOAD_OPERAND_B: u8 = b'b';
    pub const EXECUTE: u8 = b'e';
    pub const REPORT_DESTINATION: u8 = b'd';
    pub const MOVE_PC_TO_DESTINATION: u8 = b'm';
    pub const SET_PC: u8 = b'c';
    pub const PAUSE: u8 = b'p';
    pub const RESUME: u8 = b'r';
    pub const RESUME_UNPIPELINED: u8 = b'R';
    pub const STEP: u8 = b's';
    pub const RESET: u8 = b'x';
    pub const LOAD_BREAKPOINT_0: u8 = b'0';
    pub const STREAM_TRACE_START: u8 = b'S';
    pub const POP_TRACE: u8 = b'u';
}

pub const EVENT_BREAKPOINT: u8 = 0xff;
/// `'E' | 0x80`
pub const EVENT_EXCEPTION: u8 = 0xc5;

/// Register slot substituted by operand A when an instruction executes.
pub const OPERAND_A: u8 = 1;
/// Register slot substituted by operand B when an instruction executes.
pub const OPERAND_B: u8 = 2;
/// Writes to `$zero` are dropped by the register file, but the unit still
/// latches the result for [`report_destination`].
pub const DESTINATION: u8 = 0;

const V: Variant = Variant::Beri1;

pub fn load_instruction(instruction: &Instruction) -> Result<Command> {
    Ok(V.command(
        "load instruction",
        op::LOAD_INSTRUCTION,
        instruction.to_be_bytes()?.to_vec(),
        0,
    ))
}

pub fn load_operand_a(value: u64) -> Command {
    V.command("load operand A", op::LOAD_OPERAND_A, V.encode_value(value, 8), 0)
}

pub fn load_operand_b(value: u64) -> Command {
    V.command("load operand B", op::LOAD_OPERAND_B, V.encode_value(value, 8), 0)
}

/// May be answered by an exception event instead of its own reply.
pub fn execute() -> Command {
    V.command("execute", op::EXECUTE, Vec::new(), 0)
}

pub fn report_destination() -> Command {
    V.command("report destination", op::REPORT_DESTINATION, Vec::new(), 8)
}

pub fn move_pc_to_destination() -> Command {
    V.command("move pc", op::MOVE_PC_TO_DESTINATION, Vec::new(), 0)
}

pub fn set_pc(address: u64) -> Command {
    V.command("set pc", op::SET_PC, V.encode_value(address, 8), 0)
}

pub fn pause() -> Command {
    V.command("pause", op::PAUSE, Vec::new(), 0)
}

pub fn resume() -> Command {
    V.command("resume", op::RESUME, Vec::new(), 0)
}

pub fn resume_unpipelined() -> Command {
    V.command("resume unpipelined", op::RESUME_UNPIPELINED, Vec::new(), 0)
}

pub fn step() -> Command {
    V.command("step", op::STEP, Vec::new(), 0)
}

pub fn reset() -> Command {
    V.command("reset", op::RESET, Vec::new(), 0)
}

/// `slot` must already be validated (0..3).
pub fn set_breakpoint(slot: u8, raw_address: u64) -> Command {
    V.command(
        "set breakpoint",
        op::LOAD_BREAKPOINT_0 + slot,
        V.encode_value(raw_address, 8),
        0,
    )
}

pub fn stream_trace_start() -> Command {
    V.command("stream trace", op::STREAM_TRACE_START, Vec::new(), 0)
}

pub fn pop_trace() -> Command {
    V.command(
        "pop trace",
        op::POP_TRACE,
        Vec::new(),
        cheri_trace::live::RECORD_SIZE,
    )
}
