use std::num::ParseIntError;

use beri_debug::{AccessWidth, Variant};
use cheri_trace::TraceFormat;
use clap::{Parser, Subcommand, ValueEnum};
use clio::{Input, Output};

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum Protocol {
    /// Length-prefixed, big-endian; registers and memory through synthesized instructions
    Beri1,
    /// Fixed-size, little-endian; direct register and memory commands
    Beri2,
}

impl From<Protocol> for Variant {
    fn from(value: Protocol) -> Self {
        match value {
            Protocol::Beri1 => Variant::Beri1,
            Protocol::Beri2 => Variant::Beri2,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum Width {
    Byte,
    Half,
    Word,
    Double,
}

impl From<Width> for AccessWidth {
    fn from(value: Width) -> Self {
        match value {
            Width::Byte => AccessWidth::Byte,
            Width::Half => AccessWidth::Half,
            Width::Word => AccessWidth::Word,
            Width::Double => AccessWidth::Double,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// 24-byte records, no header
    V1,
    /// Header followed by 26-byte records carrying thread and ASID
    V2,
}

impl From<Format> for TraceFormat {
    fn from(value: Format) -> Self {
        match value {
            Format::V1 => TraceFormat::V1,
            Format::V2 => TraceFormat::V2,
        }
    }
}

/// Accepts decimal or `0x`-prefixed hexadecimal.
pub fn parse_u64(s: &str) -> Result<u64, ParseIntError> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16),
        None => s.replace('_', "").parse(),
    }
}

/// Hexadecimal with or without the `0x` prefix.
pub fn parse_word(s: &str) -> Result<u32, ParseIntError> {
    let hex = s.strip_prefix("0x").unwrap_or(s);
    u32::from_str_radix(hex, 16)
}

/// How to reach the debug unit.
#[derive(clap::Args, Debug)]
pub struct Connection {
    /// Debug unit socket: a TCP port on localhost, `host:port`, or the path of a UNIX socket
    #[arg(short = 's', long, env = "BERI_DEBUG_SOCKET_0")]
    pub socket: Option<String>,

    #[arg(long, value_enum, env = "BERI_DEBUG_VARIANT", default_value_t = Protocol::Beri1)]
    pub variant: Protocol,

    /// The transport cannot stop the CPU; `pause` and `resume` do nothing
    #[arg(long, default_value_t = false)]
    pub no_pause_resume: bool,

    /// Caps the number of requests in flight during batched reads
    #[arg(long)]
    pub max_pipelined: Option<usize>,

    /// Helper program that serves `--socket` (e.g. a JTAG tunnel), started before connecting and stopped on exit
    #[arg(long, env = "BERI_DEBUG_PROXY")]
    pub proxy: Option<String>,

    /// Argument passed to `--proxy`; repeat for several
    #[arg(long = "proxy-arg", requires = "proxy")]
    pub proxy_args: Vec<String>,
}

/// BERI/CHERI debug unit client
#[derive(Parser, Debug)]
pub struct Args {
    #[command(flatten)]
    pub connection: Connection,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Stop the CPU
    Pause,
    /// Resume pipelined execution
    Resume,
    /// Resume with one instruction in flight at a time
    Unpipeline,
    /// Execute one instruction (CPU must be paused)
    Step,
    Reset,
    /// Print the program counter
    Pc,
    Setpc {
        #[arg(value_parser = parse_u64)]
        address: u64,
    },
    /// Print all general-purpose registers
    Regs,
    Reg {
        register: u8,
    },
    Setreg {
        register: u8,
        #[arg(value_parser = parse_u64)]
        value: u64,
    },
    /// Print a capability register
    Capreg {
        register: u8,
    },
    Load {
        #[arg(short, long, value_enum, default_value_t = Width::Double)]
        width: Width,
        #[arg(value_parser = parse_u64)]
        address: u64,
    },
    Store {
        #[arg(short, long, value_enum, default_value_t = Width::Double)]
        width: Width,
        #[arg(value_parser = parse_u64)]
        address: u64,
        #[arg(value_parser = parse_u64)]
        value: u64,
    },
    /// Print `count` doublewords starting at `address`
    Dump {
        #[arg(value_parser = parse_u64)]
        address: u64,
        #[arg(default_value_t = 16)]
        count: usize,
    },
    /// Run one instruction given as a hexadecimal machine word (BERI1 only)
    Exec {
        #[arg(value_parser = parse_word)]
        instruction: u32,
    },
    #[command(subcommand)]
    Breakpoint(BreakpointCommand),
    /// Select the hardware thread later commands apply to (BERI2 only)
    Thread {
        thread: u8,
    },
    /// Stream the live instruction trace into a file until it goes idle
    Streamtrace {
        #[arg(short, long, value_parser)]
        output: Output,
        #[arg(long, value_enum, default_value_t = Format::V2)]
        format: Format,
        /// Empty pops in a row that end the stream
        #[arg(long, default_value_t = 100)]
        idle: usize,
    },
    /// Print a trace file; needs no debug unit
    Printtrace {
        #[arg(short, long, value_parser)]
        input: Input,
    },
    /// Discard whatever the debug unit has already sent
    Drain,
}

#[derive(Subcommand, Debug)]
pub enum BreakpointCommand {
    Set {
        slot: u8,
        #[arg(value_parser = parse_u64)]
        address: u64,
    },
    Clear {
        slot: u8,
    },
    /// Block until a breakpoint fires
    Wait,
}
