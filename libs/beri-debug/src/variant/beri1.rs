//! BERI1 has no direct register or memory access: every such operation is
//! a MIPS instruction run by the unit against its operand registers.

use beri_common::AccessWidth;
use beri_mips::Instruction;

use super::Strategy;
use crate::{
    breakpoint::BreakpointAddress,
    capability::{CapabilityField, CapabilitySnapshot},
    session::{Plan, Session},
    wire::beri1::{self, DESTINATION, OPERAND_A, OPERAND_B},
    Result, Variant,
};

pub(crate) struct Beri1;

/// Runs `instruction` and reads back what it left in the destination.
fn run_and_report(instruction: &Instruction) -> Result<Plan> {
    Ok(Plan(vec![
        beri1::load_instruction(instruction)?,
        beri1::execute(),
        beri1::report_destination(),
    ]))
}

impl Strategy for Beri1 {
    fn variant(&self) -> Variant {
        Variant::Beri1
    }

    fn get_register(&self, register: u8) -> Result<Plan> {
        run_and_report(&Instruction::Move {
            rd: DESTINATION,
            rs: register,
        })
    }

    fn set_register(&self, register: u8, value: u64) -> Result<Plan> {
        Ok(Plan(vec![
            beri1::load_operand_a(value),
            beri1::load_instruction(&Instruction::Move {
                rd: register,
                rs: OPERAND_A,
            })?,
            beri1::execute(),
        ]))
    }

    fn get_pc(&self) -> Plan {
        Plan(vec![
            beri1::move_pc_to_destination(),
            beri1::report_destination(),
        ])
    }

    fn set_pc(&self, address: u64) -> Plan {
        beri1::set_pc(address).into()
    }

    fn load(&self, width: AccessWidth, address: u64) -> Result<Plan> {
        Ok(Plan(vec![
            beri1::load_operand_a(address),
            beri1::load_instruction(&Instruction::load(width, DESTINATION, OPERAND_A))?,
            beri1::execute(),
            beri1::report_destination(),
        ]))
    }

    fn store(&self, width: AccessWidth, address: u64, value: u64) -> Result<Plan> {
        Ok(Plan(vec![
            beri1::load_operand_a(address),
            beri1::load_operand_b(value & width.mask()),
            beri1::load_instruction(&Instruction::store(width, OPERAND_B, OPERAND_A))?,
            beri1::execute(),
        ]))
    }

    fn set_breakpoint(&self, slot: u8, address: BreakpointAddress) -> Plan {
        beri1::set_breakpoint(slot, address.raw()).into()
    }

    fn pop_trace(&self) -> Plan {
        beri1::pop_trace().into()
    }

    fn capability_register(
        &self,
        session: &mut Session,
        register: u8,
    ) -> Result<CapabilitySnapshot> {
        let mut snapshot = CapabilitySnapshot::default();
        for field in CapabilityField::QUERY_ORDER {
            let plan = run_and_report(&Instruction::Dmfc2 {
                rt: DESTINATION,
                rd: register,
                sel: field.selector(),
            })?;
            let reply = session.run(&plan)?;
            snapshot.set(field, Variant::Beri1.decode_value(&reply));
        }
        Ok(snapshot)
    }

    fn pause(&self, session: &mut Session) -> Result<()> {
        session.transact(&beri1::pause()).map(drop)
    }

    fn resume(&self, session: &mut Session) -> Result<()> {
        session.transact(&beri1::resume()).map(drop)
    }

    fn unpipeline(&self, session: &mut Session) -> Result<()> {
        session.transact(&beri1::resume_unpipelined()).map(drop)
    }

    fn step(&self, session: &mut Session) -> Result<()> {
        session.transact(&beri1::step()).map(drop)
    }

    fn reset(&self, session: &mut Session) -> Result<()> {
        session.transact(&beri1::reset()).map(drop)
    }

    fn stream_trace_start(&self, session: &mut Session) -> Result<()> {
        session.transact(&beri1::stream_trace_start()).map(drop)
    }

    fn execute(&self, instruction: &Instruction) -> Result<Plan> {
        run_and_report(instruction)
    }
}
