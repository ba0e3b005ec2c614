//! BERI2 has direct commands for everything, but tracks whether the
//! pipeline is running: state changes already in effect are not re-sent.

use beri_common::AccessWidth;

use super::Strategy;
use crate::{
    breakpoint::BreakpointAddress,
    capability::CapabilitySnapshot,
    session::{PipelineState, Plan, Session},
    wire::{beri2, Command},
    Error, Result, Variant,
};

pub(crate) struct Beri2;

fn transition(session: &mut Session, target: PipelineState, command: Command) -> Result<()> {
    if session.pipeline() == target {
        log::debug!("Pipeline already {target:?}, not sending {}", command.name);
        return Ok(());
    }
    session.transact(&command)?;
    session.set_pipeline(target);
    Ok(())
}

fn snapshot(tag: u8, reply: &[u8]) -> Result<CapabilitySnapshot> {
    beri2::decode_capability(reply).ok_or(Error::IncompleteData {
        tag,
        expected: beri2::CAPABILITY_REPLY_LEN,
    })
}

impl Strategy for Beri2 {
    fn variant(&self) -> Variant {
        Variant::Beri2
    }

    fn require_paused(&self, session: &Session) -> Result<()> {
        match session.pipeline() {
            PipelineState::Paused | PipelineState::Unknown => Ok(()),
            state => Err(Error::NotPaused(state)),
        }
    }

    fn get_register(&self, register: u8) -> Result<Plan> {
        Ok(beri2::get_register(register).into())
    }

    fn set_register(&self, register: u8, value: u64) -> Result<Plan> {
        Ok(beri2::set_register(register, value).into())
    }

    fn get_pc(&self) -> Plan {
        beri2::get_pc().into()
    }

    fn set_pc(&self, address: u64) -> Plan {
        beri2::set_pc(address).into()
    }

    fn load(&self, width: AccessWidth, address: u64) -> Result<Plan> {
        Ok(beri2::load(width, address).into())
    }

    fn store(&self, width: AccessWidth, address: u64, value: u64) -> Result<Plan> {
        Ok(beri2::store(width, address, value).into())
    }

    fn set_breakpoint(&self, slot: u8, address: BreakpointAddress) -> Plan {
        beri2::set_breakpoint(slot, address.raw()).into()
    }

    fn pop_trace(&self) -> Plan {
        beri2::pop_trace().into()
    }

    fn capability_register(
        &self,
        session: &mut Session,
        register: u8,
    ) -> Result<CapabilitySnapshot> {
        let command = beri2::get_capability_register(register);
        let reply = session.transact(&command)?;
        snapshot(command.reply.tag, &reply)
    }

    fn pause(&self, session: &mut Session) -> Result<()> {
        transition(session, PipelineState::Paused, beri2::pause())
    }

    fn resume(&self, session: &mut Session) -> Result<()> {
        transition(session, PipelineState::RunningPipelined, beri2::resume())
    }

    fn unpipeline(&self, session: &mut Session) -> Result<()> {
        transition(
            session,
            PipelineState::RunningUnpipelined,
            beri2::resume_unpipelined(),
        )
    }

    fn step(&self, session: &mut Session) -> Result<()> {
        session.transact(&beri2::step()).map(drop)
    }

    fn reset(&self, session: &mut Session) -> Result<()> {
        session.transact(&beri2::reset())?;
        session.set_pipeline(PipelineState::Unknown);
        Ok(())
    }

    fn stream_trace_start(&self, session: &mut Session) -> Result<()> {
        transition(session, PipelineState::Streaming, beri2::stream_trace_start())
    }

    fn set_thread(&self, thread: u8) -> Result<Plan> {
        Ok(beri2::set_thread(thread).into())
    }
}
