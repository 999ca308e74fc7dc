// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Value types shared between the ukernel model and its configuration
//! tooling.

#![cfg_attr(not(test), no_std)]

use core::fmt;

use serde::{Deserialize, Serialize};

mod options;

pub use options::{constraints, Options};

/// A contiguous range of the physical address space.
///
/// `length` is in bytes. A well-formed block is non-empty and does not run
/// off the end of the 32-bit address space, i.e. `start + length` fits in a
/// `u32`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct AddressBlock {
    pub start: u32,
    pub length: u32,
}

impl AddressBlock {
    pub const fn new(start: u32, length: u32) -> Self {
        Self { start, length }
    }

    /// Address one past the last byte of the block, or `None` if the block
    /// wraps the address space.
    pub fn end(&self) -> Option<u32> {
        self.start.checked_add(self.length)
    }

    pub fn is_well_formed(&self) -> bool {
        self.length != 0 && self.end().is_some()
    }

    // Valid even for blocks that reach the top of the address space.
    fn end_wide(&self) -> u64 {
        u64::from(self.start) + u64::from(self.length)
    }

    /// Tests whether `self` contains the byte at `addr`.
    pub fn contains_addr(&self, addr: u32) -> bool {
        self.start <= addr && u64::from(addr) < self.end_wide()
    }

    /// Tests whether `other` lies entirely inside `self`.
    pub fn contains(&self, other: &AddressBlock) -> bool {
        self.start <= other.start && other.end_wide() <= self.end_wide()
    }

    /// Tests whether `self` and `other` share at least one byte.
    pub fn overlaps(&self, other: &AddressBlock) -> bool {
        u64::from(self.start) < other.end_wide()
            && u64::from(other.start) < self.end_wide()
    }

    /// Checks that both `start` and `length` are multiples of `align`.
    pub fn is_aligned_to(&self, align: u32) -> bool {
        align != 0 && self.start % align == 0 && self.length % align == 0
    }

    /// Checks for a power-of-two length and a start that is a multiple of it,
    /// which is what an ARMv7-M style MPU requires of a region.
    pub fn is_naturally_aligned(&self) -> bool {
        self.length.is_power_of_two() && self.start % self.length == 0
    }
}

impl fmt::Display for AddressBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#010x}, +{:#x})", self.start, self.length)
    }
}

/// Bits of a 32-bit MCU register that an accessor may touch.
#[derive(
    Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
#[repr(transparent)]
pub struct RegisterMask(pub u32);

impl RegisterMask {
    pub const NONE: Self = Self(0);
    pub const ALL: Self = Self(!0);

    pub fn bits(self) -> u32 {
        self.0
    }

    /// Checks that every bit set in `bits` is also set in this mask.
    pub fn permits(self, bits: u32) -> bool {
        bits & !self.0 == 0
    }

    /// Checks that `other` is a subset of this mask.
    pub fn covers(self, other: RegisterMask) -> bool {
        self.permits(other.0)
    }
}

/// Direction of an MCU register access.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum AccessOp {
    Read,
    Write,
}

/// An inclusive range of 32-bit MCU registers, together with the bits that
/// may be read and written in each register of the range.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct McuRegisterRange {
    /// Address of the first register of the range.
    pub first_address: u32,
    /// Address of the last register of the range (not one past it).
    pub last_address: u32,
    pub read_mask: RegisterMask,
    pub write_mask: RegisterMask,
}

impl McuRegisterRange {
    pub const fn new(
        first_address: u32,
        last_address: u32,
        read_mask: RegisterMask,
        write_mask: RegisterMask,
    ) -> Self {
        Self {
            first_address,
            last_address,
            read_mask,
            write_mask,
        }
    }

    /// Tests whether the register at `address` is in the range. Only word
    /// aligned addresses name a register.
    pub fn contains(&self, address: u32) -> bool {
        address % 4 == 0
            && self.first_address <= address
            && address <= self.last_address
    }

    /// Bits that may be read from registers of this range.
    pub fn readable(&self) -> RegisterMask {
        self.read_mask
    }

    /// Bits that may be written to registers of this range.
    pub fn writable(&self) -> RegisterMask {
        self.write_mask
    }

    pub fn mask(&self, op: AccessOp) -> RegisterMask {
        match op {
            AccessOp::Read => self.readable(),
            AccessOp::Write => self.writable(),
        }
    }

    /// Bytes covered by the range, or `None` if the range is inverted or its
    /// last register runs off the end of the address space.
    pub fn span(&self) -> Option<AddressBlock> {
        let length = self
            .last_address
            .checked_sub(self.first_address)?
            .checked_add(4)?;
        let block = AddressBlock::new(self.first_address, length);
        block.end().map(|_| block)
    }

    /// Number of registers in the range. Only meaningful for a range whose
    /// `first_address <= last_address`.
    pub fn register_count(&self) -> u32 {
        self.last_address.wrapping_sub(self.first_address) / 4 + 1
    }
}

/// Indicates priority of a ukApp.
///
/// Priorities are small numbers starting from zero. Numerically lower
/// priorities are more important, so Priority 0 is the most likely to be
/// scheduled.
///
/// There is no `PartialOrd`/`Ord`; compare with `is_more_important_than`.
#[derive(
    Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Priority(pub u8);

impl Priority {
    /// Checks if `self` is strictly more important than `other`.
    pub fn is_more_important_than(self, other: Self) -> bool {
        self.0 < other.0
    }
}

/// Index of a ukApp descriptor in the descriptor store. Declaration order in
/// the configuration decides the index.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize,
    Deserialize,
)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Asid(pub u8);

impl Asid {
    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

impl fmt::Display for Asid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ASID {}", self.0)
    }
}

/// Destination a ukApp is allowed to send IPC messages to.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum IpcTarget {
    /// A specific ukApp.
    App(Asid),
    /// Any ukApp of the session.
    Any,
}

/// Index of a peripheral interrupt line.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize,
    Deserialize,
)]
#[serde(transparent)]
#[repr(transparent)]
pub struct PirqIndex(pub u16);

/// Names a live ukProc: the process table slot it occupies plus a
/// generation number that is bumped each time the slot is reused, so that an
/// identifier held across a termination does not silently name the
/// successor.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ProcId {
    slot: u8,
    generation: u8,
}

impl ProcId {
    pub const fn for_slot_and_gen(slot: u8, generation: u8) -> Self {
        Self { slot, generation }
    }

    pub fn slot(self) -> usize {
        usize::from(self.slot)
    }

    pub fn generation(self) -> u8 {
        self.generation
    }
}

impl fmt::Display for ProcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ukProc {}.{}", self.slot, self.generation)
    }
}

/// Why a ukProc is blocked.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum BlockReason {
    /// Gave up the CPU for a delay.
    Yield,
    /// Waiting for an IPC message.
    Ipc,
    /// Waiting for an I/O completion (peripheral interrupt, DMA).
    Io,
}

/// Scheduler parameters for a healthy ukProc.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum SchedState {
    /// Could be scheduled on the CPU.
    Ready,
    /// Currently holds the CPU.
    Running,
    /// Not schedulable until its timeout elapses or the event it waits for
    /// arrives.
    Blocked(BlockReason),
}

/// How a ukProc's cleanup ended.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum CleanupOutcome {
    Completed,
    /// The cleanup quantum ran out and termination was forced.
    Overrun,
}

/// Lifecycle state of a ukProc.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ProcState {
    Healthy(SchedState),
    /// Termination was requested; the process gets at most `remaining` more
    /// systicks of CPU to release its resources.
    Cleanup { remaining: u32 },
    Terminated(CleanupOutcome),
}

impl ProcState {
    pub fn is_terminated(&self) -> bool {
        matches!(self, ProcState::Terminated(_))
    }
}

impl From<SchedState> for ProcState {
    fn from(s: SchedState) -> Self {
        Self::Healthy(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_end_rejects_wrap() {
        assert_eq!(AddressBlock::new(0x4000_0000, 0x100).end(), Some(0x4000_0100));
        assert_eq!(AddressBlock::new(0xFFFF_FF00, 0x100).end(), None);
        assert!(!AddressBlock::new(0xFFFF_FF00, 0x100).is_well_formed());
        assert!(!AddressBlock::new(0x4000_0000, 0).is_well_formed());
    }

    #[test]
    fn block_containment_and_overlap() {
        let parent = AddressBlock::new(0x5000_0000, 0x1000_0000);
        let child = AddressBlock::new(0x5402_0C00, 0x400);
        let straddle = AddressBlock::new(0x5FFF_FF00, 0x200);
        let outside = AddressBlock::new(0x6000_0000, 0x100);

        assert!(parent.contains(&child));
        assert!(!child.contains(&parent));
        assert!(parent.overlaps(&straddle));
        assert!(!parent.contains(&straddle));
        // Touching blocks do not overlap.
        assert!(!parent.overlaps(&outside));
        assert!(parent.contains_addr(0x5FFF_FFFF));
        assert!(!parent.contains_addr(0x6000_0000));
    }

    #[test]
    fn natural_alignment() {
        assert!(AddressBlock::new(0x2000_0400, 0x400).is_naturally_aligned());
        assert!(!AddressBlock::new(0x2000_0200, 0x400).is_naturally_aligned());
        assert!(!AddressBlock::new(0x2000_0000, 0x300).is_naturally_aligned());
        assert!(AddressBlock::new(0x2000_0020, 0x60).is_aligned_to(32));
        assert!(!AddressBlock::new(0x2000_0020, 0x64).is_aligned_to(32));
    }

    #[test]
    fn mask_subset() {
        let mask = RegisterMask(0x0038_D100);
        assert!(mask.permits(0x0000_0100));
        assert!(mask.permits(0));
        assert!(!mask.permits(0x0000_0001));
        assert!(RegisterMask::ALL.covers(mask));
        assert!(!RegisterMask::NONE.covers(mask));
    }

    #[test]
    fn register_range_span() {
        let gpio = McuRegisterRange::new(
            0x5202_0000,
            0x5202_002C,
            RegisterMask::ALL,
            RegisterMask::ALL,
        );
        assert_eq!(gpio.register_count(), 12);
        assert_eq!(gpio.span(), Some(AddressBlock::new(0x5202_0000, 0x30)));

        let inverted = McuRegisterRange::new(
            0x10,
            0x0,
            RegisterMask::ALL,
            RegisterMask::NONE,
        );
        assert_eq!(inverted.span(), None);
    }

    #[test]
    fn priority_ordering() {
        assert!(Priority(0).is_more_important_than(Priority(1)));
        assert!(!Priority(3).is_more_important_than(Priority(3)));
    }
}
