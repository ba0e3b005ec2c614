//! Framing shared by both protocol variants, and the per-variant command
//! builders.
//!
//! Everything here is pure: a [`Command`] is built, encoded into bytes and
//! handed to the session, which later decodes the reply payload with the
//! same [`Variant`].

pub mod beri1;
pub mod beri2;

use beri_common::ExceptionCode;

/// Which generation of debug unit the session is talking to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum Variant {
    /// `[op][len][payload]`, big-endian, reply tag `op | 0x80`.
    #[default]
    Beri1,
    /// `[op][payload]`, little-endian, reply tag `op + 1`.
    Beri2,
}

/// What the reply to a command looks like.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ReplyShape {
    pub tag: u8,
    pub len: usize,
}

/// One request, ready to be framed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command {
    pub name: &'static str,
    pub opcode: u8,
    pub payload: Vec<u8>,
    pub reply: ReplyShape,
}

impl Variant {
    pub fn breakpoint_tag(&self) -> u8 {
        match self {
            Variant::Beri1 => beri1::EVENT_BREAKPOINT,
            Variant::Beri2 => beri2::EVENT_BREAKPOINT,
        }
    }

    pub fn exception_tag(&self) -> u8 {
        match self {
            Variant::Beri1 => beri1::EVENT_EXCEPTION,
            Variant::Beri2 => beri2::EVENT_EXCEPTION,
        }
    }

    pub fn breakpoint_event(&self) -> ReplyShape {
        ReplyShape {
            tag: self.breakpoint_tag(),
            len: 8,
        }
    }

    pub fn exception_event(&self) -> ReplyShape {
        ReplyShape {
            tag: self.exception_tag(),
            len: 1,
        }
    }

    /// BERI1 frames carry an explicit length byte after the tag.
    pub fn has_length_prefix(&self) -> bool {
        matches!(self, Variant::Beri1)
    }

    pub fn reply_tag(&self, opcode: u8) -> u8 {
        match self {
            Variant::Beri1 => opcode | 0x80,
            Variant::Beri2 => opcode.wrapping_add(1),
        }
    }

    pub(crate) fn command(
        &self,
        name: &'static str,
        opcode: u8,
        payload: Vec<u8>,
        reply_len: usize,
    ) -> Command {
        Command {
            name,
            opcode,
            payload,
            reply: ReplyShape {
                tag: self.reply_tag(opcode),
                len: reply_len,
            },
        }
    }

    pub fn encode(&self, command: &Command) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(command.payload.len() + 2);
        bytes.push(command.opcode);
        if self.has_length_prefix() {
            // BERI1 payloads are at most 32 bytes.
            debug_assert!(command.payload.len() <= 32);
            bytes.push(command.payload.len() as u8);
        }
        bytes.extend_from_slice(&command.payload);
        bytes
    }

    /// The low `width` bytes of `value` in this variant's byte order.
    pub fn encode_value(&self, value: u64, width: usize) -> Vec<u8> {
        match self {
            Variant::Beri1 => value.to_be_bytes()[8 - width..].to_vec(),
            Variant::Beri2 => value.to_le_bytes()[..width].to_vec(),
        }
    }

    /// Reads up to 8 bytes as an unsigned value in this variant's byte order.
    pub fn decode_value(&self, bytes: &[u8]) -> u64 {
        debug_assert!(bytes.len() <= 8);
        match self {
            Variant::Beri1 => bytes.iter().fold(0, |acc, &b| (acc << 8) | b as u64),
            Variant::Beri2 => bytes.iter().rev().fold(0, |acc, &b| (acc << 8) | b as u64),
        }
    }

    pub fn decode_exception(&self, payload: &[u8]) -> ExceptionCode {
        ExceptionCode(payload.first().copied().unwrap_or(0))
    }
}
