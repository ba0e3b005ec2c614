use std::io;

use beri_common::ExceptionCode;
use beri_mips::EncodeError;

use crate::{session::PipelineState, Variant};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("cannot create a socket for {target}: {source}")]
    Socket { target: String, source: io::Error },
    #[error("cannot connect to {target}: {source}")]
    Connect { target: String, source: io::Error },
    #[error("cannot spawn {program}: {source}")]
    Spawn { program: String, source: io::Error },
    #[error("send failed: {0}")]
    Send(#[source] io::Error),
    #[error("read failed: {0}")]
    Read(#[source] io::Error),
    #[error("session is closed")]
    Closed,

    #[error("unexpected reply {found:#04x} (expected {expected:#04x})")]
    UnexpectedReply { expected: u8, found: u8 },
    #[error("reply {tag:#04x} announced {found} bytes (expected {expected})")]
    UnexpectedLength { tag: u8, expected: usize, found: usize },
    #[error("reply {tag:#04x} ended before its {expected} bytes arrived")]
    IncompleteData { tag: u8, expected: usize },

    #[error("CPU exception: {0}")]
    Exception(ExceptionCode),

    #[error("register {0} is out of bounds (0..31)")]
    RegisterOutOfBounds(u8),
    #[error("immediate {value} does not fit in a {bits}-bit field")]
    ImmediateOutOfBounds { value: i64, bits: u8 },
    #[error("breakpoint slot {0} is out of bounds (0..3)")]
    BreakpointSlotOutOfBounds(u8),
    #[error("CPU must be paused (pipeline is {0:?})")]
    NotPaused(PipelineState),
    #[error("{operation} is not supported by {variant:?}")]
    Unsupported {
        operation: &'static str,
        variant: Variant,
    },

    #[error(transparent)]
    Trace(#[from] cheri_trace::Error),
}

/// Coarse classification of an [`Error`], deciding what the caller may do
/// with the session afterwards.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The byte stream failed. The session is closed.
    Transport,
    /// Framing is lost. The session is closed.
    Desync,
    /// The CPU trapped. The session remains usable.
    Trap,
    /// The call was rejected before anything went on the wire.
    Usage,
    /// Trace files, subprocesses and other local resources.
    Resource,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Socket { .. }
            | Error::Connect { .. }
            | Error::Send(_)
            | Error::Read(_)
            | Error::Closed => ErrorKind::Transport,
            Error::UnexpectedReply { .. }
            | Error::UnexpectedLength { .. }
            | Error::IncompleteData { .. } => ErrorKind::Desync,
            Error::Exception(_) => ErrorKind::Trap,
            Error::RegisterOutOfBounds(_)
            | Error::ImmediateOutOfBounds { .. }
            | Error::BreakpointSlotOutOfBounds(_)
            | Error::NotPaused(_)
            | Error::Unsupported { .. } => ErrorKind::Usage,
            Error::Spawn { .. } | Error::Trace(_) => ErrorKind::Resource,
        }
    }

    /// True when the session that produced the error must be discarded.
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transport | ErrorKind::Desync)
    }
}

impl From<EncodeError> for Error {
    fn from(value: EncodeError) -> Self {
        match value {
            EncodeError::RegisterOutOfBounds(r) => Error::RegisterOutOfBounds(r),
            EncodeError::ImmediateOutOfBounds { value, bits } => {
                Error::ImmediateOutOfBounds { value, bits }
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Result of an operation whose trapping is an expected, reportable event
/// rather than a failure: memory accesses and instruction execution.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Outcome<T> {
    Done(T),
    Trapped(ExceptionCode),
}

impl<T> Outcome<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Done(v) => Outcome::Done(f(v)),
            Outcome::Trapped(code) => Outcome::Trapped(code),
        }
    }

    pub fn done(self) -> Option<T> {
        match self {
            Outcome::Done(v) => Some(v),
            Outcome::Trapped(_) => None,
        }
    }

    pub fn trapped(&self) -> Option<ExceptionCode> {
        match self {
            Outcome::Done(_) => None,
            Outcome::Trapped(code) => Some(*code),
        }
    }

    /// Turns a trap into [`Error::Exception`] for callers that do not
    /// expect one.
    pub fn into_result(self) -> Result<T> {
        match self {
            Outcome::Done(v) => Ok(v),
            Outcome::Trapped(code) => Err(Error::Exception(code)),
        }
    }

    /// Lifts a CPU exception out of `result`; every other error stays an
    /// error.
    pub(crate) fn from_result(result: Result<T>) -> Result<Self> {
        match result {
            Ok(v) => Ok(Outcome::Done(v)),
            Err(Error::Exception(code)) => Ok(Outcome::Trapped(code)),
            Err(e) => Err(e),
        }
    }
}
