//! Debugger-level operations on a [`Session`].
//!
//! Arguments are validated before anything is sent, so a rejected call
//! never disturbs the wire.

use beri_common::AccessWidth;
use beri_mips::{Instruction, REGISTER_COUNT};
use cheri_trace::{
    live::{decode_live, RECORD_SIZE},
    TraceEntry,
};

use crate::{
    breakpoint::{BreakpointAddress, BREAKPOINT_SLOTS},
    capability::CapabilitySnapshot,
    session::{Pipelined, Session},
    variant::Strategy,
    Error, Outcome, Result,
};

fn check_register(register: u8) -> Result<()> {
    if register >= REGISTER_COUNT {
        return Err(Error::RegisterOutOfBounds(register));
    }
    Ok(())
}

fn note_alignment(width: AccessWidth, address: u64) {
    if !width.is_aligned(address) {
        log::debug!("Unaligned {width} access at {address:#018x} will trap");
    }
}

fn check_slot(slot: u8) -> Result<()> {
    if slot >= BREAKPOINT_SLOTS {
        return Err(Error::BreakpointSlotOutOfBounds(slot));
    }
    Ok(())
}

impl Session {
    fn strategy(&self) -> &'static dyn Strategy {
        self.variant().strategy()
    }

    fn decode(&self, reply: &[u8]) -> u64 {
        self.variant().decode_value(reply)
    }

    pub fn get_register(&mut self, register: u8) -> Result<u64> {
        check_register(register)?;
        let strategy = self.strategy();
        strategy.require_paused(self)?;
        let reply = self.run(&strategy.get_register(register)?)?;
        Ok(self.decode(&reply))
    }

    pub fn set_register(&mut self, register: u8, value: u64) -> Result<()> {
        check_register(register)?;
        let strategy = self.strategy();
        strategy.require_paused(self)?;
        self.run(&strategy.set_register(register, value)?)?;
        Ok(())
    }

    /// Sends a register read without waiting for the reply. Collect it with
    /// [`Session::get_register_pipelined_response`].
    ///
    /// # Panics
    ///
    /// If [`Session::max_pipelined`] operations are already outstanding.
    pub fn get_register_pipelined_send(&mut self, register: u8) -> Result<()> {
        check_register(register)?;
        let strategy = self.strategy();
        strategy.require_paused(self)?;
        self.send_pipelined(Pipelined::Register, strategy.get_register(register)?)
    }

    /// # Panics
    ///
    /// If the oldest outstanding pipelined operation is not a register read.
    pub fn get_register_pipelined_response(&mut self) -> Result<u64> {
        match self.next_pipelined()? {
            Some(Pipelined::Register) => {}
            other => panic!("next pipelined response is {other:?}, not a register read"),
        }
        let reply = self.receive_pipelined()?;
        Ok(self.decode(&reply))
    }

    /// Reads all general-purpose registers, keeping the pipeline full.
    pub fn get_registers(&mut self) -> Result<[u64; REGISTER_COUNT as usize]> {
        let mut values = [0; REGISTER_COUNT as usize];
        let mut sent = 0;
        let mut first_error = None;
        for value in values.iter_mut() {
            while sent < REGISTER_COUNT && self.outstanding() < self.max_pipelined() {
                self.get_register_pipelined_send(sent)?;
                sent += 1;
            }
            match self.get_register_pipelined_response() {
                Ok(v) => *value = v,
                Err(e) if !e.is_fatal() => {
                    first_error.get_or_insert(e);
                }
                Err(e) => return Err(e),
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(values),
        }
    }

    pub fn get_pc(&mut self) -> Result<u64> {
        let strategy = self.strategy();
        strategy.require_paused(self)?;
        let reply = self.run(&strategy.get_pc())?;
        Ok(self.decode(&reply))
    }

    pub fn set_pc(&mut self, address: u64) -> Result<()> {
        let strategy = self.strategy();
        strategy.require_paused(self)?;
        self.run(&strategy.set_pc(address))?;
        Ok(())
    }

    /// Zero-extended value at `address`. A trapped access is not an error.
    pub fn load(&mut self, width: AccessWidth, address: u64) -> Result<Outcome<u64>> {
        let strategy = self.strategy();
        strategy.require_paused(self)?;
        note_alignment(width, address);
        let plan = strategy.load(width, address)?;
        let outcome = Outcome::from_result(self.run(&plan))?;
        Ok(outcome.map(|reply| self.decode(&reply) & width.mask()))
    }

    pub fn load_byte(&mut self, address: u64) -> Result<Outcome<u8>> {
        Ok(self.load(AccessWidth::Byte, address)?.map(|v| v as u8))
    }

    pub fn load_half(&mut self, address: u64) -> Result<Outcome<u16>> {
        Ok(self.load(AccessWidth::Half, address)?.map(|v| v as u16))
    }

    pub fn load_word(&mut self, address: u64) -> Result<Outcome<u32>> {
        Ok(self.load(AccessWidth::Word, address)?.map(|v| v as u32))
    }

    pub fn load_double(&mut self, address: u64) -> Result<Outcome<u64>> {
        self.load(AccessWidth::Double, address)
    }

    /// Writes the low `width` bytes of `value`. A trapped access is not an
    /// error.
    pub fn store(&mut self, width: AccessWidth, address: u64, value: u64) -> Result<Outcome<()>> {
        let strategy = self.strategy();
        strategy.require_paused(self)?;
        note_alignment(width, address);
        let plan = strategy.store(width, address, value)?;
        Ok(Outcome::from_result(self.run(&plan))?.map(drop))
    }

    pub fn store_byte(&mut self, address: u64, value: u8) -> Result<Outcome<()>> {
        self.store(AccessWidth::Byte, address, value.into())
    }

    pub fn store_half(&mut self, address: u64, value: u16) -> Result<Outcome<()>> {
        self.store(AccessWidth::Half, address, value.into())
    }

    pub fn store_word(&mut self, address: u64, value: u32) -> Result<Outcome<()>> {
        self.store(AccessWidth::Word, address, value.into())
    }

    pub fn store_double(&mut self, address: u64, value: u64) -> Result<Outcome<()>> {
        self.store(AccessWidth::Double, address, value)
    }

    /// # Panics
    ///
    /// If [`Session::max_pipelined`] operations are already outstanding.
    pub fn load_pipelined_send(&mut self, width: AccessWidth, address: u64) -> Result<()> {
        let strategy = self.strategy();
        strategy.require_paused(self)?;
        let plan = strategy.load(width, address)?;
        self.send_pipelined(Pipelined::Load(width), plan)
    }

    /// # Panics
    ///
    /// If the oldest outstanding pipelined operation is not a load.
    pub fn load_pipelined_response(&mut self) -> Result<Outcome<u64>> {
        let width = match self.next_pipelined()? {
            Some(Pipelined::Load(width)) => width,
            other => panic!("next pipelined response is {other:?}, not a load"),
        };
        let outcome = Outcome::from_result(self.receive_pipelined())?;
        Ok(outcome.map(|reply| self.decode(&reply) & width.mask()))
    }

    /// # Panics
    ///
    /// If [`Session::max_pipelined`] operations are already outstanding.
    pub fn store_pipelined_send(
        &mut self,
        width: AccessWidth,
        address: u64,
        value: u64,
    ) -> Result<()> {
        let strategy = self.strategy();
        strategy.require_paused(self)?;
        let plan = strategy.store(width, address, value)?;
        self.send_pipelined(Pipelined::Store, plan)
    }

    /// # Panics
    ///
    /// If the oldest outstanding pipelined operation is not a store.
    pub fn store_pipelined_response(&mut self) -> Result<Outcome<()>> {
        match self.next_pipelined()? {
            Some(Pipelined::Store) => {}
            other => panic!("next pipelined response is {other:?}, not a store"),
        }
        Ok(Outcome::from_result(self.receive_pipelined())?.map(drop))
    }

    /// Reads `count` doublewords starting at `address` with pipelined loads.
    /// Each doubleword traps independently. Addresses wrap at the top of the
    /// address space.
    pub fn read_memory(&mut self, address: u64, count: usize) -> Result<Vec<Outcome<u64>>> {
        let mut outcomes = Vec::with_capacity(count);
        let mut sent = 0;
        while outcomes.len() < count {
            while sent < count && self.outstanding() < self.max_pipelined() {
                self.load_pipelined_send(AccessWidth::Double, address.wrapping_add(8 * sent as u64))?;
                sent += 1;
            }
            outcomes.push(self.load_pipelined_response()?);
        }
        Ok(outcomes)
    }

    pub fn get_capability_register(&mut self, register: u8) -> Result<CapabilitySnapshot> {
        check_register(register)?;
        let strategy = self.strategy();
        strategy.require_paused(self)?;
        strategy.capability_register(self, register)
    }

    pub fn pause(&mut self) -> Result<()> {
        if self.flags().no_pause_resume {
            log::warn!("Transport cannot pause the CPU, ignoring pause");
            return Ok(());
        }
        self.strategy().pause(self)
    }

    pub fn resume(&mut self) -> Result<()> {
        if self.flags().no_pause_resume {
            log::warn!("Transport cannot resume the CPU, ignoring resume");
            return Ok(());
        }
        self.strategy().resume(self)
    }

    /// Resumes with one instruction in flight at a time.
    pub fn unpipeline(&mut self) -> Result<()> {
        self.strategy().unpipeline(self)
    }

    pub fn step(&mut self) -> Result<()> {
        let strategy = self.strategy();
        strategy.require_paused(self)?;
        strategy.step(self)
    }

    pub fn reset(&mut self) -> Result<()> {
        self.strategy().reset(self)
    }

    pub fn set_breakpoint(&mut self, slot: u8, address: BreakpointAddress) -> Result<()> {
        check_slot(slot)?;
        let plan = self.strategy().set_breakpoint(slot, address);
        self.run(&plan)?;
        self.remember_breakpoint(slot, address);
        Ok(())
    }

    pub fn clear_breakpoint(&mut self, slot: u8) -> Result<()> {
        self.set_breakpoint(slot, BreakpointAddress::Disabled)
    }

    /// What this session last loaded into `slot`.
    pub fn breakpoint(&self, slot: u8) -> Result<BreakpointAddress> {
        check_slot(slot)?;
        Ok(self.breakpoint_slot(slot))
    }

    pub fn stream_trace_start(&mut self) -> Result<()> {
        self.strategy().stream_trace_start(self)
    }

    /// Next buffered trace record, or `None` when the unit has none ready.
    pub fn pop_trace(&mut self) -> Result<Option<TraceEntry>> {
        let plan = self.strategy().pop_trace();
        let reply = self.run(&plan)?;
        let Ok(raw) = <[u8; RECORD_SIZE]>::try_from(reply.as_slice()) else {
            return Err(Error::IncompleteData {
                tag: plan.0[0].reply.tag,
                expected: RECORD_SIZE,
            });
        };
        let mut entry = decode_live(&raw);
        if !entry.valid {
            return Ok(None);
        }
        entry.thread = self.current_thread();
        Ok(Some(entry))
    }

    /// Starts streaming and hands every record to `sink` until `idle_limit`
    /// pops in a row come back empty. Returns the number of records handed
    /// over.
    ///
    /// An empty pop cannot tell a finished stream from a slow one.
    pub fn stream_trace(
        &mut self,
        idle_limit: usize,
        mut sink: impl FnMut(TraceEntry) -> Result<()>,
    ) -> Result<usize> {
        self.stream_trace_start()?;
        let mut delivered = 0;
        let mut idle = 0;
        while idle < idle_limit {
            match self.pop_trace()? {
                Some(entry) => {
                    idle = 0;
                    delivered += 1;
                    sink(entry)?;
                }
                None => idle += 1,
            }
        }
        log::info!("Trace stream idle after {delivered} records");
        Ok(delivered)
    }

    /// Selects the hardware thread later commands apply to.
    pub fn set_thread(&mut self, thread: u8) -> Result<()> {
        let plan = self.strategy().set_thread(thread)?;
        self.run(&plan)?;
        self.set_current_thread(thread);
        Ok(())
    }

    /// Runs one instruction on the paused CPU and reports what it left in
    /// the destination register.
    pub fn execute(&mut self, instruction: &Instruction) -> Result<Outcome<u64>> {
        let plan = self.strategy().execute(instruction)?;
        let outcome = Outcome::from_result(self.run(&plan))?;
        Ok(outcome.map(|reply| self.decode(&reply)))
    }
}

#[cfg(test)]
mod tests {
    use beri_common::ExceptionCode;
    use cheri_trace::live::encode_live;

    use super::*;
    use crate::{
        session::{Flags, PipelineState, SessionOptions},
        transport::scripted::Scripted,
        wire::{beri1, beri2, Command},
        ErrorKind, Variant,
    };

    fn session(unit: &Scripted, variant: Variant) -> Session {
        session_with(unit, variant, Flags::default())
    }

    fn session_with(unit: &Scripted, variant: Variant, flags: Flags) -> Session {
        let _ = env_logger::builder().is_test(true).try_init();
        Session::new(
            unit.clone(),
            SessionOptions {
                variant,
                flags,
                ..Default::default()
            },
        )
        .unwrap()
    }

    fn bytes(variant: Variant, commands: &[Command]) -> Vec<u8> {
        commands.iter().flat_map(|c| variant.encode(c)).collect()
    }

    fn record(pc: u64) -> [u8; RECORD_SIZE] {
        encode_live(&TraceEntry {
            valid: true,
            pc,
            instruction: 0x2402_0001,
            exception: cheri_trace::NO_EXCEPTION,
            ..Default::default()
        })
    }

    #[test]
    fn pipelined_register_reads_keep_order() {
        let v = Variant::Beri2;
        for k in [1u8, 2, 8] {
            let unit = Scripted::new();
            for r in 0..k {
                if r == k - 1 {
                    unit.breakpoint(v, 0x4000);
                }
                unit.reply(v, beri2::op::GET_REGISTER, &(0x100 + r as u64).to_le_bytes());
            }
            let mut session = session(&unit, v);
            for r in 0..k {
                session.get_register_pipelined_send(r).unwrap();
            }
            assert_eq!(session.outstanding(), k as usize);
            for r in 0..k {
                assert_eq!(session.get_register_pipelined_response().unwrap(), 0x100 + r as u64);
            }
            assert_eq!(session.outstanding(), 0);
            assert_eq!(session.check_breakpoint().unwrap().address, 0x4000);

            let expected: Vec<_> = (0..k).map(beri2::get_register).collect();
            assert_eq!(unit.sent(), bytes(v, &expected));
        }
    }

    #[test]
    #[should_panic(expected = "pipelined")]
    fn uncollected_pipeline_blocks_plain_commands() {
        let unit = Scripted::new();
        let mut session = session(&unit, Variant::Beri2);
        session.get_register_pipelined_send(1).unwrap();
        let _ = session.get_pc();
    }

    #[test]
    #[should_panic(expected = "1 pipelined operation(s) must be collected")]
    fn partly_collected_pipeline_blocks_plain_commands() {
        let v = Variant::Beri2;
        let unit = Scripted::new();
        unit.reply(v, beri2::op::GET_REGISTER, &5u64.to_le_bytes());
        let mut session = session(&unit, v);
        session.get_register_pipelined_send(1).unwrap();
        session.get_register_pipelined_send(2).unwrap();
        assert_eq!(session.get_register_pipelined_response().unwrap(), 5);
        let _ = session.get_pc();
    }

    #[test]
    #[should_panic(expected = "at most 2 pipelined")]
    fn pipeline_depth_is_bounded() {
        let unit = Scripted::new().with_max_pipelined(2);
        let mut session = session(&unit, Variant::Beri2);
        for r in 0..3 {
            session.get_register_pipelined_send(r).unwrap();
        }
    }

    #[test]
    fn pipelined_load_trap_is_isolated() {
        let v = Variant::Beri1;
        let unit = Scripted::new();
        // first load traps at execute, second succeeds
        unit.reply(v, beri1::op::LOAD_OPERAND_A, &[])
            .reply(v, beri1::op::LOAD_INSTRUCTION, &[])
            .exception(v, 4)
            .reply(v, beri1::op::REPORT_DESTINATION, &[0; 8])
            .reply(v, beri1::op::LOAD_OPERAND_A, &[])
            .reply(v, beri1::op::LOAD_INSTRUCTION, &[])
            .reply(v, beri1::op::EXECUTE, &[])
            .reply(v, beri1::op::REPORT_DESTINATION, &0xdead_beefu64.to_be_bytes());
        let mut session = session(&unit, v);

        session.load_pipelined_send(AccessWidth::Word, 0x1001).unwrap();
        session.load_pipelined_send(AccessWidth::Word, 0x1000).unwrap();
        assert_eq!(
            session.load_pipelined_response().unwrap(),
            Outcome::Trapped(ExceptionCode(4))
        );
        assert_eq!(
            session.load_pipelined_response().unwrap(),
            Outcome::Done(0xdead_beef)
        );
        assert_eq!(unit.unread(), 0);
        assert!(!session.is_closed());
    }

    #[test]
    fn pipelined_stores() {
        let v = Variant::Beri2;
        let unit = Scripted::new();
        unit.reply(v, beri2::op::STORE_HALF, &[])
            .exception(v, 5);
        let mut session = session(&unit, v);
        session.store_pipelined_send(AccessWidth::Half, 0x20, 0xabcd).unwrap();
        session.store_pipelined_send(AccessWidth::Half, 0x21, 0xabcd).unwrap();
        assert_eq!(session.store_pipelined_response().unwrap(), Outcome::Done(()));
        assert_eq!(
            session.store_pipelined_response().unwrap(),
            Outcome::Trapped(ExceptionCode(5))
        );
        assert_eq!(
            unit.sent(),
            bytes(
                v,
                &[
                    beri2::store(AccessWidth::Half, 0x20, 0xabcd),
                    beri2::store(AccessWidth::Half, 0x21, 0xabcd)
                ]
            )
        );
    }

    #[test]
    fn read_memory_refills_pipeline() {
        let v = Variant::Beri2;
        let unit = Scripted::new().with_max_pipelined(2);
        for i in 0..5u64 {
            unit.reply(v, beri2::op::LOAD_DOUBLE, &(i * 3).to_le_bytes());
        }
        let mut session = session(&unit, v);
        let outcomes = session.read_memory(0x8000, 5).unwrap();
        assert_eq!(
            outcomes,
            (0..5).map(|i| Outcome::Done(i * 3)).collect::<Vec<_>>()
        );
        let expected: Vec<_> = (0..5)
            .map(|i| beri2::load(AccessWidth::Double, 0x8000 + 8 * i))
            .collect();
        assert_eq!(unit.sent(), bytes(v, &expected));
    }

    #[test]
    fn read_memory_wraps_at_top_of_address_space() {
        let v = Variant::Beri2;
        let unit = Scripted::new();
        unit.reply(v, beri2::op::LOAD_DOUBLE, &1u64.to_le_bytes())
            .reply(v, beri2::op::LOAD_DOUBLE, &2u64.to_le_bytes());
        let mut session = session(&unit, v);
        let outcomes = session.read_memory(0xffff_ffff_ffff_fff8, 2).unwrap();
        assert_eq!(outcomes, vec![Outcome::Done(1), Outcome::Done(2)]);
        let expected = [
            beri2::load(AccessWidth::Double, 0xffff_ffff_ffff_fff8),
            beri2::load(AccessWidth::Double, 0),
        ];
        assert_eq!(unit.sent(), bytes(v, &expected));
    }

    #[test]
    fn get_registers_beri2() {
        let v = Variant::Beri2;
        let unit = Scripted::new().with_max_pipelined(4);
        for r in 0..32u64 {
            unit.reply(v, beri2::op::GET_REGISTER, &(r << 8).to_le_bytes());
        }
        let mut session = session(&unit, v);
        let registers = session.get_registers().unwrap();
        for (r, value) in registers.iter().enumerate() {
            assert_eq!(*value, (r as u64) << 8);
        }
        assert_eq!(session.outstanding(), 0);
    }

    #[test]
    fn beri1_register_goes_through_an_instruction() {
        let v = Variant::Beri1;
        let unit = Scripted::new();
        unit.reply(v, beri1::op::LOAD_INSTRUCTION, &[])
            .reply(v, beri1::op::EXECUTE, &[])
            .reply(v, beri1::op::REPORT_DESTINATION, &7u64.to_be_bytes());
        let mut session = session(&unit, v);
        assert_eq!(session.get_register(5).unwrap(), 7);

        let mut expected = vec![b'i', 4];
        expected.extend(
            Instruction::Move { rd: 0, rs: 5 }
                .to_be_bytes()
                .unwrap(),
        );
        expected.extend([b'e', 0, b'd', 0]);
        assert_eq!(unit.sent(), expected);
    }

    #[test]
    fn beri1_set_register_uses_operand_a() {
        let v = Variant::Beri1;
        let unit = Scripted::new();
        unit.reply(v, beri1::op::LOAD_OPERAND_A, &[])
            .reply(v, beri1::op::LOAD_INSTRUCTION, &[])
            .reply(v, beri1::op::EXECUTE, &[]);
        let mut session = session(&unit, v);
        session.set_register(9, 0x1234).unwrap();
        let expected = [
            beri1::load_operand_a(0x1234),
            beri1::load_instruction(&Instruction::Move { rd: 9, rs: 1 }).unwrap(),
            beri1::execute(),
        ];
        assert_eq!(unit.sent(), bytes(v, &expected));
    }

    #[test]
    fn beri1_trapped_load_skips_report() {
        let v = Variant::Beri1;
        let unit = Scripted::new();
        unit.reply(v, beri1::op::LOAD_OPERAND_A, &[])
            .reply(v, beri1::op::LOAD_INSTRUCTION, &[])
            .exception(v, 4)
            .reply(v, beri1::op::LOAD_OPERAND_A, &[])
            .reply(v, beri1::op::LOAD_INSTRUCTION, &[])
            .reply(v, beri1::op::EXECUTE, &[])
            .reply(v, beri1::op::REPORT_DESTINATION, &0x1_00ffu64.to_be_bytes());
        let mut session = session(&unit, v);

        assert_eq!(
            session.load_half(0x1001).unwrap(),
            Outcome::Trapped(ExceptionCode(4))
        );
        let sent = unit.take_sent();
        assert_eq!(sent.iter().filter(|&&b| b == b'd').count(), 0);
        assert_eq!(session.last_exception(), Some(ExceptionCode(4)));

        assert_eq!(session.load_half(0x1000).unwrap(), Outcome::Done(0x00ff));
        assert_eq!(unit.unread(), 0);
    }

    #[test]
    fn beri2_trapped_load_keeps_session() {
        let v = Variant::Beri2;
        let unit = Scripted::new();
        unit.exception(v, 4)
            .reply(v, beri2::op::LOAD_BYTE, &[0x5a]);
        let mut session = session(&unit, v);
        assert_eq!(
            session.load_word(0x1001).unwrap(),
            Outcome::Trapped(ExceptionCode(4))
        );
        assert_eq!(session.load_byte(0x1001).unwrap(), Outcome::Done(0x5a));
        assert_eq!(
            unit.sent(),
            bytes(
                v,
                &[
                    beri2::load(AccessWidth::Word, 0x1001),
                    beri2::load(AccessWidth::Byte, 0x1001)
                ]
            )
        );
    }

    #[test]
    fn beri1_stores_mask_the_value() {
        let v = Variant::Beri1;
        let unit = Scripted::new();
        unit.reply(v, beri1::op::LOAD_OPERAND_A, &[])
            .reply(v, beri1::op::LOAD_OPERAND_B, &[])
            .reply(v, beri1::op::LOAD_INSTRUCTION, &[])
            .reply(v, beri1::op::EXECUTE, &[]);
        let mut session = session(&unit, v);
        assert_eq!(
            session.store(AccessWidth::Byte, 0x40, 0x1ff).unwrap(),
            Outcome::Done(())
        );
        let expected = [
            beri1::load_operand_a(0x40),
            beri1::load_operand_b(0xff),
            beri1::load_instruction(&Instruction::store(AccessWidth::Byte, 2, 1)).unwrap(),
            beri1::execute(),
        ];
        assert_eq!(unit.sent(), bytes(v, &expected));
    }

    #[test]
    fn usage_errors_send_nothing() {
        let unit = Scripted::new();
        let mut session = session(&unit, Variant::Beri2);
        assert!(matches!(
            session.get_register(32),
            Err(Error::RegisterOutOfBounds(32))
        ));
        assert!(matches!(
            session.set_breakpoint(4, BreakpointAddress::At(0)),
            Err(Error::BreakpointSlotOutOfBounds(4))
        ));
        let error = session.get_capability_register(40).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Usage);
        assert!(unit.sent().is_empty());
        assert!(!session.is_closed());
    }

    #[test]
    fn set_thread_is_beri2_only() {
        let unit = Scripted::new();
        let mut session = session(&unit, Variant::Beri1);
        assert!(matches!(
            session.set_thread(1),
            Err(Error::Unsupported {
                variant: Variant::Beri1,
                ..
            })
        ));
        assert!(unit.sent().is_empty());
        assert_eq!(session.current_thread(), 0);
    }

    #[test]
    fn execute_is_beri1_only() {
        let unit = Scripted::new();
        let mut session = session(&unit, Variant::Beri2);
        assert!(matches!(
            session.execute(&Instruction::Nop),
            Err(Error::Unsupported { .. })
        ));
        assert!(unit.sent().is_empty());
    }

    #[test]
    fn beri1_execute() {
        let v = Variant::Beri1;
        let unit = Scripted::new();
        unit.reply(v, beri1::op::LOAD_INSTRUCTION, &[])
            .exception(v, 10);
        let mut session = session(&unit, v);
        let cache = Instruction::Cache {
            op: beri_mips::CACHE_OP_INVALIDATE_INSTRUCTION,
            base: 1,
            offset: 0,
        };
        assert_eq!(
            session.execute(&cache).unwrap(),
            Outcome::Trapped(ExceptionCode::RESERVED_INSTRUCTION)
        );
    }

    #[test]
    fn beri1_capability_register_takes_six_queries() {
        let v = Variant::Beri1;
        let unit = Scripted::new();
        // base, length, type, permissions, unsealed, tag
        for value in [0x9000_0000u64, 0x1000, 3, u64::MAX, 1, 1] {
            unit.reply(v, beri1::op::LOAD_INSTRUCTION, &[])
                .reply(v, beri1::op::EXECUTE, &[])
                .reply(v, beri1::op::REPORT_DESTINATION, &value.to_be_bytes());
        }
        let mut session = session(&unit, v);
        let snapshot = session.get_capability_register(3).unwrap();
        assert_eq!(
            snapshot,
            CapabilitySnapshot {
                tag: true,
                unsealed: true,
                permissions: crate::capability::PERMISSIONS_MASK,
                otype: 3,
                base: 0x9000_0000,
                length: 0x1000,
            }
        );

        let expected: Vec<_> = crate::capability::CapabilityField::QUERY_ORDER
            .iter()
            .flat_map(|field| {
                [
                    beri1::load_instruction(&Instruction::Dmfc2 {
                        rt: 0,
                        rd: 3,
                        sel: field.selector(),
                    })
                    .unwrap(),
                    beri1::execute(),
                    beri1::report_destination(),
                ]
            })
            .collect();
        assert_eq!(unit.sent(), bytes(v, &expected));
    }

    #[test]
    fn beri2_capability_register() {
        let v = Variant::Beri2;
        let unit = Scripted::new();
        let mut reply = vec![1, 0];
        for field in [0x7fu64, 4, 0x1000, 0x20] {
            reply.extend(field.to_le_bytes());
        }
        unit.reply(v, beri2::op::GET_CAPABILITY_REGISTER, &reply);
        let mut session = session(&unit, v);
        let snapshot = session.get_capability_register(0).unwrap();
        assert!(snapshot.tag);
        assert!(!snapshot.unsealed);
        assert_eq!(snapshot.permissions, 0x7f);
        assert_eq!(snapshot.base, 0x1000);
        assert_eq!(snapshot.length, 0x20);
    }

    #[test]
    fn beri2_state_machine() {
        let v = Variant::Beri2;
        let unit = Scripted::new();
        unit.reply(v, beri2::op::RESUME, &[])
            .reply(v, beri2::op::PAUSE, &[])
            .reply(v, beri2::op::STEP, &[])
            .reply(v, beri2::op::RESUME_UNPIPELINED, &[])
            .reply(v, beri2::op::RESET, &[]);
        let mut session = session(&unit, v);
        assert_eq!(session.state(), Some(PipelineState::Unknown));

        session.resume().unwrap();
        assert_eq!(session.state(), Some(PipelineState::RunningPipelined));
        session.resume().unwrap();
        assert!(matches!(
            session.get_register(1),
            Err(Error::NotPaused(PipelineState::RunningPipelined))
        ));
        assert!(matches!(session.step(), Err(Error::NotPaused(_))));

        session.pause().unwrap();
        session.pause().unwrap();
        assert_eq!(session.state(), Some(PipelineState::Paused));
        session.step().unwrap();
        assert_eq!(session.state(), Some(PipelineState::Paused));

        session.unpipeline().unwrap();
        assert_eq!(session.state(), Some(PipelineState::RunningUnpipelined));
        session.reset().unwrap();
        assert_eq!(session.state(), Some(PipelineState::Unknown));

        let expected = [
            beri2::resume(),
            beri2::pause(),
            beri2::step(),
            beri2::resume_unpipelined(),
            beri2::reset(),
        ];
        assert_eq!(unit.sent(), bytes(v, &expected));
        assert_eq!(unit.unread(), 0);
    }

    #[test]
    fn beri1_never_elides() {
        let v = Variant::Beri1;
        let unit = Scripted::new();
        unit.reply(v, beri1::op::PAUSE, &[])
            .reply(v, beri1::op::PAUSE, &[]);
        let mut session = session(&unit, v);
        session.pause().unwrap();
        session.pause().unwrap();
        assert_eq!(session.state(), None);
        assert_eq!(unit.sent(), vec![b'p', 0, b'p', 0]);
    }

    #[test]
    fn no_pause_resume_sends_nothing() {
        let unit = Scripted::new();
        let mut session = session_with(
            &unit,
            Variant::Beri2,
            Flags {
                no_pause_resume: true,
            },
        );
        session.pause().unwrap();
        session.resume().unwrap();
        assert!(unit.sent().is_empty());
        assert_eq!(session.state(), Some(PipelineState::Unknown));
    }

    #[test]
    fn breakpoint_slots_are_tracked() {
        let v = Variant::Beri2;
        let unit = Scripted::new();
        unit.reply(v, beri2::op::SET_BREAKPOINT, &[])
            .reply(v, beri2::op::SET_BREAKPOINT, &[]);
        let mut session = session(&unit, v);
        session.set_breakpoint(3, BreakpointAddress::At(0x1234)).unwrap();
        assert_eq!(session.breakpoint(3).unwrap(), BreakpointAddress::At(0x1234));
        session.clear_breakpoint(3).unwrap();
        assert_eq!(session.breakpoint(3).unwrap(), BreakpointAddress::Disabled);
        assert_eq!(
            &unit.sent()[10..],
            &[0x1a, 3, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]
        );
    }

    #[test]
    fn trace_entries_carry_the_thread() {
        let v = Variant::Beri2;
        let unit = Scripted::new();
        unit.reply(v, beri2::op::SET_THREAD, &[])
            .reply(v, beri2::op::POP_TRACE, &record(0x100))
            .reply(v, beri2::op::POP_TRACE, &[0; RECORD_SIZE]);
        let mut session = session(&unit, v);
        session.set_thread(3).unwrap();
        assert_eq!(session.current_thread(), 3);
        let entry = session.pop_trace().unwrap().unwrap();
        assert_eq!(entry.pc, 0x100);
        assert_eq!(entry.thread, 3);
        assert_eq!(session.pop_trace().unwrap(), None);
    }

    #[test]
    fn stream_trace_stops_when_idle() {
        let v = Variant::Beri2;
        let unit = Scripted::new();
        unit.reply(v, beri2::op::STREAM_TRACE_START, &[]);
        for pc in [Some(0x10), Some(0x14), None, Some(0x18), None, None] {
            let raw = pc.map_or([0; RECORD_SIZE], record);
            unit.reply(v, beri2::op::POP_TRACE, &raw);
        }
        let mut session = session(&unit, v);
        let mut pcs = Vec::new();
        let delivered = session
            .stream_trace(2, |entry| {
                pcs.push(entry.pc);
                Ok(())
            })
            .unwrap();
        assert_eq!(delivered, 3);
        assert_eq!(pcs, vec![0x10, 0x14, 0x18]);
        assert_eq!(session.state(), Some(PipelineState::Streaming));
        assert_eq!(unit.unread(), 0);
    }

    #[test]
    fn breakpoint_round_trip_beri1() {
        let v = Variant::Beri1;
        let x = 0x9000_0000_4000_0000u64;
        let unit = Scripted::new();
        unit.reply(v, beri1::op::PAUSE, &[])
            .reply(v, beri1::op::MOVE_PC_TO_DESTINATION, &[])
            .reply(v, beri1::op::REPORT_DESTINATION, &x.to_be_bytes())
            .reply(v, beri1::op::LOAD_BREAKPOINT_0, &[])
            .reply(v, beri1::op::RESUME, &[])
            .reply(v, beri1::op::LOAD_INSTRUCTION, &[])
            .breakpoint(v, x + 4)
            .reply(v, beri1::op::EXECUTE, &[])
            .reply(v, beri1::op::REPORT_DESTINATION, &0u64.to_be_bytes())
            .reply(v, beri1::op::LOAD_BREAKPOINT_0, &[])
            .reply(v, beri1::op::RESUME, &[]);
        let mut session = session(&unit, v);

        session.pause().unwrap();
        let pc = session.get_pc().unwrap();
        assert_eq!(pc, x);
        session.set_breakpoint(0, BreakpointAddress::At(pc + 4)).unwrap();
        session.resume().unwrap();
        assert_eq!(session.get_register(4).unwrap(), 0);

        let sent_before_wait = unit.sent().len();
        let event = session.wait_breakpoint().unwrap();
        assert_eq!(event.address, x + 4);
        assert_eq!(event.slot, Some(0));
        assert_eq!(unit.sent().len(), sent_before_wait);

        session.clear_breakpoint(0).unwrap();
        session.resume().unwrap();
        assert_eq!(unit.unread(), 0);
        assert!(!session.is_closed());
    }

    #[test]
    fn breakpoint_round_trip_beri2() {
        let v = Variant::Beri2;
        let x = 0xffff_ffff_8010_0000u64;
        let unit = Scripted::new();
        unit.reply(v, beri2::op::PAUSE, &[])
            .reply(v, beri2::op::GET_PC, &x.to_le_bytes())
            .reply(v, beri2::op::SET_BREAKPOINT, &[])
            .reply(v, beri2::op::RESUME, &[])
            .breakpoint(v, x + 4)
            .reply(v, beri2::op::POP_TRACE, &record(x))
            .reply(v, beri2::op::SET_BREAKPOINT, &[])
            .reply(v, beri2::op::RESUME, &[]);
        let mut session = session(&unit, v);

        session.pause().unwrap();
        let pc = session.get_pc().unwrap();
        session.set_breakpoint(1, BreakpointAddress::At(pc + 4)).unwrap();
        session.resume().unwrap();
        assert_eq!(session.pop_trace().unwrap().unwrap().pc, x);

        let event = session.wait_breakpoint().unwrap();
        assert_eq!(event, crate::BreakpointEvent { address: x + 4, slot: Some(1) });
        assert_eq!(session.state(), Some(PipelineState::Paused));

        session.clear_breakpoint(1).unwrap();
        unit.take_sent();
        session.resume().unwrap();
        assert_eq!(unit.take_sent(), bytes(v, &[beri2::resume()]));
        assert_eq!(session.state(), Some(PipelineState::RunningPipelined));
        assert_eq!(unit.unread(), 0);
    }
}
