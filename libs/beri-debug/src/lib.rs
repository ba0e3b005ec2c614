//! Client side of the BERI/CHERI debug unit protocol.
//!
//! A [`Session`] owns one [`Transport`] and speaks either protocol
//! [`Variant`] over it. Register, memory, breakpoint and trace operations
//! are methods on the session.

mod breakpoint;
mod capability;
mod commands;
mod error;
mod session;
pub mod transport;
mod variant;
pub mod wire;

pub use beri_common::{AccessWidth, ExceptionCode};
pub use beri_mips::Instruction;
pub use breakpoint::{BreakpointAddress, BreakpointEvent, BREAKPOINT_SLOTS};
pub use capability::CapabilitySnapshot;
pub use error::{Error, ErrorKind, Outcome, Result};
pub use session::{Flags, PipelineState, Session, SessionOptions};
pub use transport::{ProxiedTransport, SocketTransport, Target, Transport};
pub use wire::Variant;
