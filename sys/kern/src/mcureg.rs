// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MCU Register Access Control Table.
//!
//! ukApps never touch a privileged MCU register directly; they ask the
//! kernel, which consults this table. Each entry authorizes an inclusive
//! range of 32-bit registers together with the bits that may be read and
//! written in them.

use ukabi::{AccessOp, McuRegisterRange};

use crate::err::ConfigError;
use crate::platform::PlatformLayout;

#[derive(Clone, Debug, Default)]
pub struct RegisterAccessTable {
    /// Authorized ranges, pairwise disjoint and sorted by first address.
    ranges: Vec<McuRegisterRange>,
    /// Register count the platform description claims the table holds.
    declared_count: Option<u32>,
    /// Range count the platform description claims the table holds.
    declared_ranges: Option<u32>,
}

impl RegisterAccessTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `range` to the table.
    pub fn authorize_range(
        &mut self,
        layout: &PlatformLayout,
        range: McuRegisterRange,
    ) -> Result<(), ConfigError> {
        let context = format!(
            "register range {:#010x}..={:#010x}",
            range.first_address, range.last_address
        );

        if range.first_address % 4 != 0 || range.last_address % 4 != 0 {
            let value = if range.first_address % 4 != 0 {
                range.first_address
            } else {
                range.last_address
            };
            return Err(ConfigError::Misaligned {
                context,
                value,
                align: 4,
            });
        }

        let Some(span) = range.span() else {
            return Err(ConfigError::OutOfRange {
                context,
                detail: "range is inverted or wraps the address space".into(),
            });
        };

        if !layout.register_spaces.iter().any(|s| s.contains(&span)) {
            return Err(ConfigError::OutOfRange {
                context,
                detail: "range is outside every register space".into(),
            });
        }

        if let Some(k) = layout.kernel_registers.iter().find(|k| k.overlaps(&span))
        {
            return Err(ConfigError::OutOfRange {
                context,
                detail: format!("range touches kernel registers at {k}"),
            });
        }

        let pos = self
            .ranges
            .partition_point(|r| r.first_address < range.first_address);
        // Since the table is sorted and disjoint, only the neighbours of the
        // insertion point can overlap.
        let neighbours = pos.saturating_sub(1)..(pos + 1).min(self.ranges.len());
        for other in &self.ranges[neighbours] {
            if let Some(other_span) = other.span() {
                if other_span.overlaps(&span) {
                    return Err(ConfigError::Overlap {
                        context,
                        block: span,
                        other: other_span,
                    });
                }
            }
        }

        self.ranges.insert(pos, range);
        Ok(())
    }

    /// Records the number of registers the table is expected to hold once
    /// fully populated; checked by the session validator.
    pub fn declare_register_count(&mut self, count: u32) {
        self.declared_count = Some(count);
    }

    pub fn declared_register_count(&self) -> Option<u32> {
        self.declared_count
    }

    /// Records the number of ranges the table is expected to hold.
    pub fn declare_range_count(&mut self, count: u32) {
        self.declared_ranges = Some(count);
    }

    pub fn declared_range_count(&self) -> Option<u32> {
        self.declared_ranges
    }

    /// Finds the authorized range containing the register at `address`.
    /// Registers are whole words, so an unaligned address names none.
    pub fn lookup(&self, address: u32) -> Option<&McuRegisterRange> {
        if address % 4 != 0 {
            return None;
        }
        let idx = self.ranges.partition_point(|r| r.first_address <= address);
        let candidate = self.ranges.get(idx.checked_sub(1)?)?;
        candidate.contains(address).then_some(candidate)
    }

    /// Decides whether touching `bits` of the register at `address` is
    /// allowed.
    ///
    /// True only if `address` falls in an authorized range (ranges are
    /// disjoint, so at most one can match) and `bits` is a subset of that
    /// range's mask for `op`.
    pub fn check_access(&self, address: u32, op: AccessOp, bits: u32) -> bool {
        self.lookup(address)
            .is_some_and(|r| r.mask(op).permits(bits))
    }

    /// Value a ukApp observes when reading `bits` of a register whose
    /// hardware value is `raw`, or `None` if the read is not allowed.
    pub fn read_value(&self, address: u32, bits: u32, raw: u32) -> Option<u32> {
        self.check_access(address, AccessOp::Read, bits)
            .then_some(raw & bits)
    }

    /// Value to store when writing `value` to `bits` of a register currently
    /// holding `current`, or `None` if the write is not allowed. Bits outside
    /// `bits` keep their current value.
    pub fn write_value(
        &self,
        address: u32,
        bits: u32,
        current: u32,
        value: u32,
    ) -> Option<u32> {
        self.check_access(address, AccessOp::Write, bits)
            .then_some((current & !bits) | (value & bits))
    }

    /// Number of registers covered by all authorized ranges.
    pub fn authorized_register_count(&self) -> u32 {
        self.ranges.iter().map(|r| r.register_count()).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &McuRegisterRange> {
        self.ranges.iter()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ukabi::RegisterMask;

    fn range(first: u32, last: u32, read: u32, write: u32) -> McuRegisterRange {
        McuRegisterRange::new(first, last, RegisterMask(read), RegisterMask(write))
    }

    fn table(ranges: &[McuRegisterRange]) -> RegisterAccessTable {
        let layout = PlatformLayout::stm32h5();
        let mut t = RegisterAccessTable::new();
        for r in ranges {
            t.authorize_range(&layout, *r).unwrap();
        }
        t
    }

    #[test]
    fn read_only_register() {
        let t = table(&[range(0x5000_0000, 0x5000_0000, 0xFFFF_FFFF, 0)]);

        assert!(!t.check_access(0x5000_0000, AccessOp::Write, 0x1));
        assert!(t.check_access(0x5000_0000, AccessOp::Read, 0xFFFF_FFFF));
        assert!(!t.check_access(0x5000_0004, AccessOp::Read, 0x1));
        // An empty write touches nothing.
        assert!(t.check_access(0x5000_0000, AccessOp::Write, 0));
    }

    #[test]
    fn partial_write_mask() {
        // RCC AHB1ENR: only some enables may be flipped.
        let t = table(&[range(0x5402_0C88, 0x5402_0C88, !0, 0x0038_D100)]);
        assert!(t.check_access(0x5402_0C88, AccessOp::Write, 0x0000_0100));
        assert!(t.check_access(0x5402_0C88, AccessOp::Write, 0x0038_0000));
        assert!(!t.check_access(0x5402_0C88, AccessOp::Write, 0x0000_0001));
    }

    #[test]
    fn lookup_across_sorted_ranges() {
        let t = table(&[
            range(0x5202_0400, 0x5202_042C, !0, !0),
            range(0x5202_0000, 0x5202_002C, !0, !0),
            range(0xE000_1000, 0xE000_1004, !0, 0x1),
        ]);
        assert_eq!(t.len(), 3);
        assert_eq!(
            t.iter().map(|r| r.first_address).collect::<Vec<_>>(),
            [0x5202_0000, 0x5202_0400, 0xE000_1000]
        );
        assert_eq!(t.lookup(0x5202_0014).map(|r| r.first_address), Some(0x5202_0000));
        assert_eq!(t.lookup(0x5202_0030), None);
        assert_eq!(t.lookup(0x5202_0428).map(|r| r.first_address), Some(0x5202_0400));
        assert_eq!(t.lookup(0x4000_0000), None);
        assert_eq!(t.authorized_register_count(), 12 + 12 + 2);
    }

    #[test]
    fn unaligned_addresses_name_no_register() {
        let t = table(&[range(0x5202_0000, 0x5202_002C, !0, !0)]);
        assert!(t.check_access(0x5202_0000, AccessOp::Read, 1));
        assert!(t.check_access(0x5202_002C, AccessOp::Read, 1));
        for addr in [0x5202_0001, 0x5202_0012, 0x5202_002D, 0x5202_002F] {
            assert_eq!(t.lookup(addr), None, "{addr:#x}");
            assert!(!t.check_access(addr, AccessOp::Read, 1), "{addr:#x}");
        }
        assert_eq!(t.read_value(0x5202_0003, 0xFF, 0x1234), None);
    }

    #[test]
    fn overlapping_range_rejected() {
        let layout = PlatformLayout::stm32h5();
        let mut t = table(&[range(0x5202_0000, 0x5202_002C, !0, !0)]);
        let err = t
            .authorize_range(&layout, range(0x5202_0028, 0x5202_0040, !0, 0))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Overlap { .. }));
        let err = t
            .authorize_range(&layout, range(0x5201_FFF0, 0x5202_0000, !0, 0))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Overlap { .. }));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn malformed_ranges_rejected() {
        let layout = PlatformLayout::stm32h5();
        let mut t = RegisterAccessTable::new();
        assert!(matches!(
            t.authorize_range(&layout, range(0x5000_0002, 0x5000_0004, !0, 0)),
            Err(ConfigError::Misaligned { value: 0x5000_0002, align: 4, .. })
        ));
        assert!(matches!(
            t.authorize_range(&layout, range(0x5000_0010, 0x5000_0000, !0, 0)),
            Err(ConfigError::OutOfRange { .. })
        ));
        // SRAM is not a register space.
        assert!(matches!(
            t.authorize_range(&layout, range(0x2000_0000, 0x2000_0000, !0, 0)),
            Err(ConfigError::OutOfRange { .. })
        ));
        // SysTick belongs to the kernel.
        assert!(matches!(
            t.authorize_range(&layout, range(0xE000_E018, 0xE000_E018, !0, 0)),
            Err(ConfigError::OutOfRange { .. })
        ));
        assert!(t.is_empty());
    }

    #[test]
    fn masked_read_and_write() {
        let t = table(&[range(0x5202_0014, 0x5202_0014, 0x0000_FFFF, 0x0000_00F0)]);
        assert_eq!(t.read_value(0x5202_0014, 0x0000_00FF, 0xABCD_1234), Some(0x34));
        assert_eq!(t.read_value(0x5202_0014, 0x0001_0000, 0xABCD_1234), None);
        assert_eq!(
            t.write_value(0x5202_0014, 0x0000_00F0, 0x0000_1234, 0x0000_00A0),
            Some(0x0000_12A4)
        );
        assert_eq!(t.write_value(0x5202_0014, 0x0000_0001, 0, 1), None);
    }
}
