/// Number of hardware breakpoint slots.
pub const BREAKPOINT_SLOTS: u8 = 4;

/// Address written into a slot to disable it.
pub const DISABLED: u64 = u64::MAX;

/// Contents of a breakpoint slot.
///
/// The all-ones address is the disabled sentinel, so `At(u64::MAX)` cannot
/// be expressed on the wire and reads back as [`BreakpointAddress::Disabled`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum BreakpointAddress {
    #[default]
    Disabled,
    At(u64),
}

impl BreakpointAddress {
    pub fn raw(&self) -> u64 {
        match *self {
            BreakpointAddress::Disabled => DISABLED,
            BreakpointAddress::At(address) => address,
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.raw() == DISABLED
    }
}

impl From<u64> for BreakpointAddress {
    fn from(raw: u64) -> Self {
        if raw == DISABLED {
            Self::Disabled
        } else {
            Self::At(raw)
        }
    }
}

/// Unsolicited notice that the CPU hit a breakpoint.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BreakpointEvent {
    pub address: u64,
    /// Slot whose address matches, if the session set one.
    pub slot: Option<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_sentinel() {
        assert_eq!(BreakpointAddress::from(u64::MAX), BreakpointAddress::Disabled);
        assert_eq!(BreakpointAddress::Disabled.raw(), u64::MAX);
        assert!(BreakpointAddress::At(u64::MAX).is_disabled());
        let real = BreakpointAddress::from(0xffff_ffff_ffff_fffe);
        assert_eq!(real, BreakpointAddress::At(0xffff_ffff_ffff_fffe));
        assert!(!real.is_disabled());
        assert_eq!(BreakpointAddress::from(real.raw()), real);
    }
}
