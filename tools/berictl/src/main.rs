use std::{
    io::Read,
    process::{self, ExitCode},
};

use beri_debug::{
    AccessWidth, Error, ErrorKind, ExceptionCode, Flags, Instruction, Outcome, ProxiedTransport,
    Session, SessionOptions, Target,
};
use cheri_trace::{CycleCounter, TraceFile, TraceWriter};
use clap::{CommandFactory, Parser};
use cli::{Args, BreakpointCommand, Command, Connection};
use clio::Input;

mod cli;

const EXIT_FATAL: u8 = 1;
const EXIT_USAGE: u8 = 2;
const EXIT_TRAPPED: u8 = 3;
const EXIT_RESOURCE: u8 = 4;

fn exit_code(error: &Error) -> u8 {
    match error.kind() {
        ErrorKind::Transport | ErrorKind::Desync => EXIT_FATAL,
        ErrorKind::Usage => EXIT_USAGE,
        ErrorKind::Trap => EXIT_TRAPPED,
        ErrorKind::Resource => EXIT_RESOURCE,
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    match run(args) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(exit_code(&e))
        }
    }
}

fn trapped(code: ExceptionCode) -> u8 {
    println!("trapped: {code}");
    EXIT_TRAPPED
}

fn open(args: &Connection) -> Result<Session, Error> {
    let Some(socket) = args.socket.as_deref() else {
        Args::command()
            .error(
                clap::error::ErrorKind::MissingRequiredArgument,
                "--socket (or BERI_DEBUG_SOCKET_0) is required to reach a debug unit",
            )
            .exit();
    };
    let target: Target = socket.parse().unwrap_or_else(|never| match never {});
    let options = SessionOptions {
        variant: args.variant.into(),
        flags: Flags {
            no_pause_resume: args.no_pause_resume,
        },
        max_pipelined: args.max_pipelined,
    };
    match &args.proxy {
        Some(program) => {
            let mut command = process::Command::new(program);
            command.args(&args.proxy_args);
            Session::new(ProxiedTransport::spawn(command, &target)?, options)
        }
        None => Session::connect(&target, options),
    }
}

fn print_trace(mut input: Input) -> Result<(), Error> {
    let mut bytes = Vec::new();
    input
        .read_to_end(&mut bytes)
        .map_err(cheri_trace::Error::from)?;
    let file = TraceFile::parse(&bytes)?;
    log::info!("{:?} trace with {} records", file.format, file.entries.len());

    let mut cycles = CycleCounter::new();
    for entry in &file.entries {
        let total = cycles.advance(entry.cycles);
        match Instruction::decode(entry.instruction) {
            Some(instruction) => println!("{total:>10} {entry}  {instruction}"),
            None => println!("{total:>10} {entry}"),
        }
    }
    Ok(())
}

fn run(args: Args) -> Result<u8, Error> {
    let command = match args.command {
        Command::Printtrace { input } => {
            print_trace(input)?;
            return Ok(0);
        }
        command => command,
    };

    let mut session = open(&args.connection)?;
    match command {
        Command::Pause => session.pause()?,
        Command::Resume => session.resume()?,
        Command::Unpipeline => session.unpipeline()?,
        Command::Step => session.step()?,
        Command::Reset => session.reset()?,
        Command::Pc => println!("PC = {:#018x}", session.get_pc()?),
        Command::Setpc { address } => session.set_pc(address)?,
        Command::Regs => {
            for (register, value) in session.get_registers()?.iter().enumerate() {
                println!("${register:<2} = {value:#018x}");
            }
        }
        Command::Reg { register } => {
            println!("${register} = {:#018x}", session.get_register(register)?)
        }
        Command::Setreg { register, value } => session.set_register(register, value)?,
        Command::Capreg { register } => {
            println!("$c{register}: {}", session.get_capability_register(register)?)
        }
        Command::Load { width, address } => {
            let width: AccessWidth = width.into();
            match session.load(width, address)? {
                Outcome::Done(value) => {
                    let digits = 2 * width.bytes();
                    println!("{address:#018x}: {value:#0w$x}", w = digits + 2);
                }
                Outcome::Trapped(code) => return Ok(trapped(code)),
            }
        }
        Command::Store {
            width,
            address,
            value,
        } => {
            if let Outcome::Trapped(code) = session.store(width.into(), address, value)? {
                return Ok(trapped(code));
            }
        }
        Command::Dump { address, count } => {
            let mut code = 0;
            for (i, outcome) in session.read_memory(address, count)?.into_iter().enumerate() {
                let at = address.wrapping_add(8 * i as u64);
                match outcome {
                    Outcome::Done(value) => println!("{at:#018x}: {value:#018x}"),
                    Outcome::Trapped(exception) => {
                        println!("{at:#018x}: trapped ({exception})");
                        code = EXIT_TRAPPED;
                    }
                }
            }
            return Ok(code);
        }
        Command::Exec { instruction } => {
            let Some(decoded) = Instruction::decode(instruction) else {
                Args::command()
                    .error(
                        clap::error::ErrorKind::InvalidValue,
                        format!("{instruction:#010x} is not an instruction the debug unit can run"),
                    )
                    .exit();
            };
            log::info!("Executing {decoded}");
            match session.execute(&decoded)? {
                Outcome::Done(value) => println!("{value:#018x}"),
                Outcome::Trapped(code) => return Ok(trapped(code)),
            }
        }
        Command::Breakpoint(BreakpointCommand::Set { slot, address }) => {
            session.set_breakpoint(slot, address.into())?
        }
        Command::Breakpoint(BreakpointCommand::Clear { slot }) => session.clear_breakpoint(slot)?,
        Command::Breakpoint(BreakpointCommand::Wait) => {
            let event = session.wait_breakpoint()?;
            match event.slot {
                Some(slot) => println!("breakpoint {slot} hit at {:#018x}", event.address),
                None => println!("breakpoint hit at {:#018x}", event.address),
            }
        }
        Command::Thread { thread } => session.set_thread(thread)?,
        Command::Streamtrace {
            output,
            format,
            idle,
        } => {
            let mut writer = TraceWriter::new(output, format.into())?;
            let delivered =
                session.stream_trace(idle, |entry| writer.write(&entry).map_err(Error::from))?;
            writer.finish()?;
            log::info!("Wrote {delivered} trace records");
        }
        Command::Drain => println!("{} bytes discarded", session.drain()?),
        Command::Printtrace { .. } => unreachable!("handled without a session"),
    }
    Ok(0)
}
