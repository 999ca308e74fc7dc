// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Descriptor types, used to statically define ukApp resources.

use ukabi::{
    AccessOp, AddressBlock, Asid, IpcTarget, PirqIndex, Priority, RegisterMask,
};

/// Smallest scheduling quantum a ukApp can be allocated, in systicks.
pub const QUANTUM_MIN: u32 = 1;
/// Largest scheduling quantum a ukApp can be allocated, in systicks.
pub const QUANTUM_MAX: u32 = 255;

/// Record describing a single ukApp.
///
/// Nothing here is checked on construction; `DescriptorStore::load` is what
/// decides whether a descriptor is acceptable.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UkAppDesc {
    pub name: String,
    /// Base scheduling priority.
    pub priority: Priority,
    /// Systicks of CPU the ukProc may use before it is requeued behind its
    /// peers of equal priority.
    pub quantum: u32,
    pub flags: AppFlags,
    /// ukApps this one may send IPC messages to.
    pub ipc_send_to: Vec<IpcTarget>,
    /// Peripheral interrupts the ukApp may register for.
    pub pirqs: Vec<PirqIndex>,
    pub shared_buffers: Vec<SharedBufferDesc>,
    /// Address blocks mapped into the ukApp in addition to its own code and
    /// data, typically peripheral register windows.
    pub extra_blocks: Vec<ExtraBlockDesc>,
    /// Individual MCU registers the ukApp may access through the kernel.
    pub mcu_registers: Vec<McuRegisterDesc>,
    pub dma_streams: Vec<DmaStreamDesc>,
}

impl UkAppDesc {
    /// Creates a descriptor that owns no resources.
    pub fn new(name: impl Into<String>, priority: Priority, quantum: u32) -> Self {
        Self {
            name: name.into(),
            priority,
            quantum,
            flags: AppFlags::empty(),
            ipc_send_to: Vec::new(),
            pirqs: Vec::new(),
            shared_buffers: Vec::new(),
            extra_blocks: Vec::new(),
            mcu_registers: Vec::new(),
            dma_streams: Vec::new(),
        }
    }

    pub fn may_send_to(&self, target: Asid) -> bool {
        self.ipc_send_to
            .iter()
            .any(|t| *t == IpcTarget::Any || *t == IpcTarget::App(target))
    }

    /// Looks up a shared buffer or extra block by label.
    pub fn block_labeled(&self, label: &str) -> Option<&AddressBlock> {
        self.shared_buffers
            .iter()
            .find(|b| b.label == label)
            .map(|b| &b.block)
            .or_else(|| {
                self.extra_blocks
                    .iter()
                    .find(|b| b.label == label)
                    .map(|b| &b.block)
            })
    }

    pub fn mcu_register(&self, address: u32) -> Option<&McuRegisterDesc> {
        self.mcu_registers.iter().find(|r| r.address == address)
    }

    /// Labels of every address block of the ukApp, shared buffers first.
    pub fn block_labels(&self) -> impl Iterator<Item = &str> {
        self.shared_buffers
            .iter()
            .map(|b| b.label.as_str())
            .chain(self.extra_blocks.iter().map(|b| b.label.as_str()))
    }
}

bitflags::bitflags! {
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
    #[repr(transparent)]
    pub struct AppFlags: u8 {
        /// Instantiate a ukProc for this ukApp when the scheduler starts.
        const START_AT_BOOT = 1 << 0;
    }
}

bitflags::bitflags! {
    /// Access a ukApp is given to one of its extra address blocks.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
    #[repr(transparent)]
    pub struct BlockAttributes: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXECUTE = 1 << 2;
        /// Block contains memory mapped registers.
        const DEVICE = 1 << 3;
    }
}

/// A shared buffer owned by a ukApp.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SharedBufferDesc {
    pub label: String,
    pub block: AddressBlock,
}

/// An extra address block granted to a ukApp. It must lie inside one of the
/// platform's authorized extra blocks and clear of the reserved ones.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExtraBlockDesc {
    pub label: String,
    pub attributes: BlockAttributes,
    pub block: AddressBlock,
}

/// Access a ukApp is given to one MCU register. The masks must be subsets of
/// those of the authorized range the register falls in.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct McuRegisterDesc {
    pub address: u32,
    pub read_mask: RegisterMask,
    pub write_mask: RegisterMask,
}

impl McuRegisterDesc {
    pub fn mask(&self, op: AccessOp) -> RegisterMask {
        match op {
            AccessOp::Read => self.read_mask,
            AccessOp::Write => self.write_mask,
        }
    }
}

/// A DMA stream a ukApp may program. Source and destination are given as
/// labels of the ukApp's own address blocks.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DmaStreamDesc {
    pub label: String,
    /// Hardware identifier of the DMA engine.
    pub engine: u8,
    pub source_request: u8,
    pub destination_request: u8,
    pub source_block: String,
    pub destination_block: String,
}
