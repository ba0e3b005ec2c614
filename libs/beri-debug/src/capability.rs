use std::fmt::Display;

/// Permissions occupy 63 bits.
pub const PERMISSIONS_MASK: u64 = (1 << 63) - 1;

/// Fully populated view of one capability register.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CapabilitySnapshot {
    pub tag: bool,
    pub unsealed: bool,
    pub permissions: u64,
    pub otype: u64,
    pub base: u64,
    pub length: u64,
}

/// Field selector placed in the `sel` slot of `dmfc2` on BERI1.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CapabilityField {
    Permissions = 0,
    Type = 1,
    Base = 2,
    Length = 3,
    Tag = 5,
    Unsealed = 6,
}

impl CapabilityField {
    /// Order in which BERI1 queries the fields.
    pub const QUERY_ORDER: [Self; 6] = [
        Self::Base,
        Self::Length,
        Self::Type,
        Self::Permissions,
        Self::Unsealed,
        Self::Tag,
    ];

    pub fn selector(&self) -> u8 {
        *self as u8
    }
}

impl CapabilitySnapshot {
    pub(crate) fn set(&mut self, field: CapabilityField, value: u64) {
        match field {
            CapabilityField::Permissions => self.permissions = value & PERMISSIONS_MASK,
            CapabilityField::Type => self.otype = value,
            CapabilityField::Base => self.base = value,
            CapabilityField::Length => self.length = value,
            CapabilityField::Tag => self.tag = value != 0,
            CapabilityField::Unsealed => self.unsealed = value != 0,
        }
    }
}

impl Display for CapabilitySnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "t:{} u:{} perms:{:#010x} type:{:#018x} base:{:#018x} length:{:#018x}",
            self.tag as u8, self.unsealed as u8, self.permissions, self.otype, self.base, self.length
        )
    }
}
