//! Request/reply engine shared by both protocol variants.
//!
//! Replies arrive strictly in request order, but the unit may slip a
//! breakpoint or exception event into the stream at any point. Every read
//! goes through [`Session::await_reply`], which peels those events off
//! before matching the reply the caller is waiting for.

use std::collections::VecDeque;

use beri_common::{AccessWidth, ExceptionCode};

use crate::{
    breakpoint::{BreakpointAddress, BreakpointEvent, BREAKPOINT_SLOTS},
    transport::{SocketTransport, Target, Transport},
    wire::{Command, ReplyShape},
    Error, Result, Variant,
};

/// Run state of a BERI2 pipeline, as last set through this session.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum PipelineState {
    #[default]
    Unknown,
    Paused,
    RunningPipelined,
    RunningUnpipelined,
    Streaming,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Flags {
    /// The transport cannot stop the CPU; pause and resume do nothing.
    pub no_pause_resume: bool,
}

#[derive(Copy, Clone, Debug, Default)]
pub struct SessionOptions {
    pub variant: Variant,
    pub flags: Flags,
    /// Caps the number of outstanding pipelined operations below what the
    /// transport allows.
    pub max_pipelined: Option<usize>,
}

/// Commands that together perform one operation. The reply to the last one
/// carries the result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Plan(pub Vec<Command>);

impl From<Command> for Plan {
    fn from(command: Command) -> Self {
        Self(vec![command])
    }
}

/// Kind of a pipelined operation whose replies are still on the wire.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Pipelined {
    Register,
    Load(AccessWidth),
    Store,
}

struct Outstanding {
    kind: Pipelined,
    replies: Vec<ReplyShape>,
}

/// One connection to a debug unit.
///
/// A session is single-threaded and strictly ordered: apart from the
/// explicit pipelined operations, each command is answered before the next
/// is sent. Transport failures and protocol desyncs close the session; CPU
/// exceptions and rejected calls leave it usable.
pub struct Session {
    /// `None` once the session is closed.
    transport: Option<Box<dyn Transport>>,
    variant: Variant,
    flags: Flags,
    pipeline: PipelineState,
    breakpoints: [BreakpointAddress; BREAKPOINT_SLOTS as usize],
    pending_breakpoint: Option<BreakpointEvent>,
    last_exception: Option<ExceptionCode>,
    outstanding: VecDeque<Outstanding>,
    max_pipelined: usize,
    thread: u8,
}

impl Session {
    /// Takes over `transport` and discards whatever an earlier session left
    /// unread in it.
    pub fn new(transport: impl Transport + 'static, options: SessionOptions) -> Result<Self> {
        let limit = transport.max_pipelined();
        let max_pipelined = options.max_pipelined.map_or(limit, |max| max.min(limit)).max(1);
        let mut session = Self {
            transport: Some(Box::new(transport)),
            variant: options.variant,
            flags: options.flags,
            pipeline: PipelineState::Unknown,
            breakpoints: [BreakpointAddress::Disabled; BREAKPOINT_SLOTS as usize],
            pending_breakpoint: None,
            last_exception: None,
            outstanding: VecDeque::new(),
            max_pipelined,
            thread: 0,
        };
        let drained = session.drain()?;
        if drained > 0 {
            log::info!("Discarded {drained} stale bytes");
        }
        log::debug!(
            "{:?} session, {:?}, up to {} pipelined operations",
            session.variant,
            session.flags,
            session.max_pipelined
        );
        Ok(session)
    }

    pub fn connect(target: &Target, options: SessionOptions) -> Result<Self> {
        Self::new(SocketTransport::connect(target)?, options)
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    /// Pipeline state for BERI2. BERI1 has no pipeline state.
    pub fn state(&self) -> Option<PipelineState> {
        match self.variant {
            Variant::Beri1 => None,
            Variant::Beri2 => Some(self.pipeline),
        }
    }

    pub(crate) fn pipeline(&self) -> PipelineState {
        self.pipeline
    }

    pub(crate) fn set_pipeline(&mut self, state: PipelineState) {
        if self.pipeline != state {
            log::debug!("Pipeline {:?} -> {:?}", self.pipeline, state);
        }
        self.pipeline = state;
    }

    pub fn max_pipelined(&self) -> usize {
        self.max_pipelined
    }

    /// Pipelined operations sent but not yet collected.
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    pub fn last_exception(&self) -> Option<ExceptionCode> {
        self.last_exception
    }

    pub fn current_thread(&self) -> u8 {
        self.thread
    }

    pub(crate) fn set_current_thread(&mut self, thread: u8) {
        self.thread = thread;
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_none()
    }

    /// Releases the transport, and with it any helper process.
    pub fn close(&mut self) {
        if self.transport.take().is_some() {
            log::debug!("Session closed");
        }
    }

    /// Discards input that is already available.
    pub fn drain(&mut self) -> Result<usize> {
        let transport = self.transport.as_mut().ok_or(Error::Closed)?;
        match transport.drain() {
            Ok(n) => Ok(n),
            Err(e) => Err(self.fail(Error::Read(e))),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        Ok(())
    }

    /// Closes the session on `error`, which must be fatal.
    fn fail(&mut self, error: Error) -> Error {
        debug_assert!(error.is_fatal());
        log::error!("Closing session: {error}");
        self.close();
        error
    }

    pub(crate) fn send(&mut self, command: &Command) -> Result<()> {
        let bytes = self.variant.encode(command);
        log::debug!("-> {} {:02x?}", command.name, bytes);
        let transport = self.transport.as_mut().ok_or(Error::Closed)?;
        if let Err(e) = transport.send(&bytes) {
            return Err(self.fail(Error::Send(e)));
        }
        Ok(())
    }

    /// `tag` is only used to report a reply cut short.
    fn read(&mut self, tag: Option<u8>, len: usize) -> Result<Vec<u8>> {
        let transport = self.transport.as_mut().ok_or(Error::Closed)?;
        let mut buf = vec![0; len];
        match transport.recv(&mut buf) {
            Ok(()) => Ok(buf),
            Err(e) => {
                let error = match (tag, e.kind()) {
                    (Some(tag), std::io::ErrorKind::UnexpectedEof) => Error::IncompleteData {
                        tag,
                        expected: len,
                    },
                    _ => Error::Read(e),
                };
                Err(self.fail(error))
            }
        }
    }

    /// Reads what follows a tag byte: the length prefix where the variant
    /// has one, then the payload.
    fn read_frame(&mut self, shape: ReplyShape) -> Result<Vec<u8>> {
        if self.variant.has_length_prefix() {
            let len = self.read(Some(shape.tag), 1)?[0] as usize;
            if len != shape.len {
                return Err(self.fail(Error::UnexpectedLength {
                    tag: shape.tag,
                    expected: shape.len,
                    found: len,
                }));
            }
        }
        let payload = self.read(Some(shape.tag), shape.len)?;
        log::trace!("<- {:#04x} {:02x?}", shape.tag, payload);
        Ok(payload)
    }

    /// Reads until the reply described by `expected` arrives and returns its
    /// payload.
    ///
    /// Breakpoint events seen on the way are stored for
    /// [`Session::check_breakpoint`]. An exception event ends the wait with
    /// [`Error::Exception`]. Either event is returned as a plain payload
    /// when it is itself the expected reply.
    pub(crate) fn await_reply(&mut self, expected: ReplyShape) -> Result<Vec<u8>> {
        self.ensure_open()?;
        let exception = self.variant.exception_event();
        let breakpoint = self.variant.breakpoint_event();
        loop {
            let tag = self.read(None, 1)?[0];
            if tag == exception.tag {
                let payload = self.read_frame(exception)?;
                let code = self.variant.decode_exception(&payload);
                log::debug!("<- exception {code}");
                self.last_exception = Some(code);
                if expected.tag == exception.tag {
                    return Ok(payload);
                }
                return Err(Error::Exception(code));
            }
            if tag == breakpoint.tag {
                let payload = self.read_frame(breakpoint)?;
                if expected.tag == breakpoint.tag {
                    return Ok(payload);
                }
                self.record_breakpoint(&payload);
                continue;
            }
            if tag != expected.tag {
                return Err(self.fail(Error::UnexpectedReply {
                    expected: expected.tag,
                    found: tag,
                }));
            }
            return self.read_frame(expected);
        }
    }

    /// Sends one command and waits for its reply.
    pub(crate) fn transact(&mut self, command: &Command) -> Result<Vec<u8>> {
        self.ensure_open()?;
        assert!(
            self.outstanding.is_empty(),
            "{} pipelined operation(s) must be collected before {}",
            self.outstanding.len(),
            command.name
        );
        self.send(command)?;
        self.await_reply(command.reply)
    }

    /// Runs the commands of `plan` one after another. A trap stops the plan
    /// at the command that raised it.
    pub(crate) fn run(&mut self, plan: &Plan) -> Result<Vec<u8>> {
        let mut last = Vec::new();
        for command in &plan.0 {
            last = self.transact(command)?;
        }
        Ok(last)
    }

    /// Sends every command of `plan` without waiting for replies.
    pub(crate) fn send_pipelined(&mut self, kind: Pipelined, plan: Plan) -> Result<()> {
        self.ensure_open()?;
        assert!(
            self.outstanding.len() < self.max_pipelined,
            "at most {} pipelined operations may be outstanding",
            self.max_pipelined
        );
        for command in &plan.0 {
            self.send(command)?;
        }
        self.outstanding.push_back(Outstanding {
            kind,
            replies: plan.0.iter().map(|command| command.reply).collect(),
        });
        Ok(())
    }

    /// Kind of the oldest outstanding pipelined operation.
    pub(crate) fn next_pipelined(&self) -> Result<Option<Pipelined>> {
        self.ensure_open()?;
        Ok(self.outstanding.front().map(|outstanding| outstanding.kind))
    }

    /// Collects the replies of the oldest outstanding pipelined operation.
    ///
    /// A trap replaces the reply of the command that raised it, while later
    /// commands of the same operation still answer, so all of them are read
    /// before the trap is reported.
    pub(crate) fn receive_pipelined(&mut self) -> Result<Vec<u8>> {
        self.ensure_open()?;
        let Some(outstanding) = self.outstanding.pop_front() else {
            panic!("no pipelined operation is outstanding");
        };
        let mut trapped = None;
        let mut last = Vec::new();
        for shape in outstanding.replies {
            match self.await_reply(shape) {
                Ok(payload) => last = payload,
                Err(Error::Exception(code)) => {
                    trapped.get_or_insert(code);
                }
                Err(e) => return Err(e),
            }
        }
        match trapped {
            Some(code) => Err(Error::Exception(code)),
            None => Ok(last),
        }
    }

    fn slot_of(&self, address: u64) -> Option<u8> {
        self.breakpoints
            .iter()
            .position(|b| *b == BreakpointAddress::At(address))
            .map(|slot| slot as u8)
    }

    /// A BERI2 pipeline halts when a breakpoint fires.
    fn on_breakpoint(&mut self, payload: &[u8]) -> BreakpointEvent {
        let address = self.variant.decode_value(payload);
        let event = BreakpointEvent {
            address,
            slot: self.slot_of(address),
        };
        log::debug!("<- breakpoint {:#018x} (slot {:?})", address, event.slot);
        if self.variant == Variant::Beri2 {
            self.set_pipeline(PipelineState::Paused);
        }
        event
    }

    fn record_breakpoint(&mut self, payload: &[u8]) {
        let event = self.on_breakpoint(payload);
        // Only one event is held; a second one replaces the first.
        if let Some(previous) = self.pending_breakpoint.replace(event) {
            log::warn!(
                "Breakpoint event at {:#018x} dropped before it was read",
                previous.address
            );
        }
    }

    pub(crate) fn remember_breakpoint(&mut self, slot: u8, address: BreakpointAddress) {
        self.breakpoints[slot as usize] = address;
    }

    pub(crate) fn breakpoint_slot(&self, slot: u8) -> BreakpointAddress {
        self.breakpoints[slot as usize]
    }

    /// Takes the pending breakpoint event without touching the wire.
    pub fn check_breakpoint(&mut self) -> Option<BreakpointEvent> {
        self.pending_breakpoint.take()
    }

    /// Blocks until a breakpoint fires, unless one is already pending.
    pub fn wait_breakpoint(&mut self) -> Result<BreakpointEvent> {
        if let Some(event) = self.pending_breakpoint.take() {
            return Ok(event);
        }
        self.ensure_open()?;
        assert!(
            self.outstanding.is_empty(),
            "pipelined operations must be collected before waiting for a breakpoint"
        );
        let payload = self.await_reply(self.variant.breakpoint_event())?;
        Ok(self.on_breakpoint(&payload))
    }
}
