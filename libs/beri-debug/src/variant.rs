//! How each protocol variant carries out the façade's operations.
//!
//! Plain request/reply operations are described as a [`Plan`] so the
//! session can run them in order or pipeline them. Operations that need
//! several round trips or pipeline bookkeeping drive the session directly.

mod beri1;
mod beri2;

use beri_common::AccessWidth;
use beri_mips::Instruction;

use crate::{
    breakpoint::BreakpointAddress,
    capability::CapabilitySnapshot,
    session::{Plan, Session},
    Error, Result, Variant,
};

pub(crate) trait Strategy {
    fn variant(&self) -> Variant;

    fn unsupported(&self, operation: &'static str) -> Error {
        Error::Unsupported {
            operation,
            variant: self.variant(),
        }
    }

    /// Rejects operations that need a stopped CPU.
    fn require_paused(&self, _session: &Session) -> Result<()> {
        Ok(())
    }

    fn get_register(&self, register: u8) -> Result<Plan>;
    fn set_register(&self, register: u8, value: u64) -> Result<Plan>;
    fn get_pc(&self) -> Plan;
    fn set_pc(&self, address: u64) -> Plan;
    fn load(&self, width: AccessWidth, address: u64) -> Result<Plan>;
    fn store(&self, width: AccessWidth, address: u64, value: u64) -> Result<Plan>;
    fn set_breakpoint(&self, slot: u8, address: BreakpointAddress) -> Plan;
    fn pop_trace(&self) -> Plan;

    fn capability_register(
        &self,
        session: &mut Session,
        register: u8,
    ) -> Result<CapabilitySnapshot>;

    fn pause(&self, session: &mut Session) -> Result<()>;
    fn resume(&self, session: &mut Session) -> Result<()>;
    fn unpipeline(&self, session: &mut Session) -> Result<()>;
    fn step(&self, session: &mut Session) -> Result<()>;
    fn reset(&self, session: &mut Session) -> Result<()>;
    fn stream_trace_start(&self, session: &mut Session) -> Result<()>;

    fn set_thread(&self, _thread: u8) -> Result<Plan> {
        Err(self.unsupported("set thread"))
    }

    fn execute(&self, _instruction: &Instruction) -> Result<Plan> {
        Err(self.unsupported("execute"))
    }
}

impl Variant {
    pub(crate) fn strategy(&self) -> &'static dyn Strategy {
        match self {
            Variant::Beri1 => &beri1::Beri1,
            Variant::Beri2 => &beri2::Beri2,
        }
    }
}
