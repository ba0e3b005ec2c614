//! BERI2 command set.
//!
//! Every opcode has a fixed request and reply size, so frames carry no
//! length byte. Multi-byte fields are little-endian.

use beri_common::AccessWidth;
use nom::{
    combinator::all_consuming,
    number::complete::{le_u64, le_u8},
    IResult,
};

use super::{Command, Variant};
use crate::capability::{CapabilitySnapshot, PERMISSIONS_MASK};

pub mod op {
    pub const GET_REGISTER: u8 = 0x02;
    pub const SET_REGISTER: u8 = 0x04;
    pub const GET_PC: u8 = 0x06;
    pub const SET_PC: u8 = 0x08;
    pub const LOAD_BYTE: u8 = 0x0a;
    pub const LOAD_HALF: u8 = 0x0c;
    pub const LOAD_WORD: u8 = 0x0e;
    pub const LOAD_DOUBLE: u8 = 0x10;
    pub const STORE_BYTE: u8 = 0x12;
    pub const STORE_HALF: u8 = 0x14;
    pub const STORE_WORD: u8 = 0x16;
    pub const STORE_DOUBLE: u8 = 0x18;
    pub const SET_BREAKPOINT: u8 = 0x1a;
    pub const PAUSE: u8 = 0x1c;
    pub const RESUME: u8 = 0x1e;
    pub const RESUME_UNPIPELINED: u8 = 0x20;
    pub const STEP: u8 = 0x22;
    pub const RESET: u8 = 0x24;
    pub const GET_CAPABILITY_REGISTER: u8 = 0x26;
    pub const STREAM_TRACE_START: u8 = 0x28;
    pub const POP_TRACE: u8 = 0x2a;
    pub const SET_THREAD: u8 = 0x2c;
}

pub const EVENT_BREAKPOINT: u8 = 0x2e;
pub const EVENT_EXCEPTION: u8 = 0x2f;

/// tag, unsealed, permissions, type, base, length
pub const CAPABILITY_REPLY_LEN: usize = 1 + 1 + 4 * 8;

const V: Variant = Variant::Beri2;

pub fn get_register(register: u8) -> Command {
    V.command("get register", op::GET_REGISTER, vec![register], 8)
}

pub fn set_register(register: u8, value: u64) -> Command {
    let mut payload = vec![register];
    payload.extend(V.encode_value(value, 8));
    V.command("set register", op::SET_REGISTER, payload, 0)
}

pub fn get_pc() -> Command {
    V.command("get pc", op::GET_PC, Vec::new(), 8)
}

pub fn set_pc(address: u64) -> Command {
    V.command("set pc", op::SET_PC, V.encode_value(address, 8), 0)
}

pub fn load(width: AccessWidth, address: u64) -> Command {
    let opcode = match width {
        AccessWidth::Byte => op::LOAD_BYTE,
        AccessWidth::Half => op::LOAD_HALF,
        AccessWidth::Word => op::LOAD_WORD,
        AccessWidth::Double => op::LOAD_DOUBLE,
    };
    V.command("load", opcode, V.encode_value(address, 8), width.bytes())
}

pub fn store(width: AccessWidth, address: u64, value: u64) -> Command {
    let opcode = match width {
        AccessWidth::Byte => op::STORE_BYTE,
        AccessWidth::Half => op::STORE_HALF,
        AccessWidth::Word => op::STORE_WORD,
        AccessWidth::Double => op::STORE_DOUBLE,
    };
    let mut payload = V.encode_value(address, 8);
    payload.extend(V.encode_value(value, width.bytes()));
    V.command("store", opcode, payload, 0)
}

/// `slot` must already be validated (0..3).
pub fn set_breakpoint(slot: u8, raw_address: u64) -> Command {
    let mut payload = vec![slot];
    payload.extend(V.encode_value(raw_address, 8));
    V.command("set breakpoint", op::SET_BREAKPOINT, payload, 0)
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

pub fn get_capability_register(register: u8) -> Command {
    V.command(
        "get capability register",
        op::GET_CAPABILITY_REGISTER,
        vec![register],
        CAPABILITY_REPLY_LEN,
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

pub fn set_thread(thread: u8) -> Command {
    V.command("set thread", op::SET_THREAD, vec![thread], 0)
}

fn capability(input: &[u8]) -> IResult<&[u8], CapabilitySnapshot> {
    let (input, tag) = le_u8(input)?;
    let (input, unsealed) = le_u8(input)?;
    let (input, permissions) = le_u64(input)?;
    let (input, otype) = le_u64(input)?;
    let (input, base) = le_u64(input)?;
    let (input, length) = le_u64(input)?;
    Ok((
        input,
        CapabilitySnapshot {
            tag: tag != 0,
            unsealed: unsealed != 0,
            permissions: permissions & PERMISSIONS_MASK,
            otype,
            base,
            length,
        },
    ))
}

/// The session only hands over payloads of [`CAPABILITY_REPLY_LEN`] bytes,
/// so this cannot fail on a reply that passed framing.
pub fn decode_capability(payload: &[u8]) -> Option<CapabilitySnapshot> {
    all_consuming(capability)(payload)
        .ok()
        .map(|(_, snapshot)| snapshot)
}
