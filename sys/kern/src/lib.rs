// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! ukernel resource and scheduling model.
//!
//! This is the boot-time half of a separation kernel that hosts isolated
//! ukApps: the descriptor tables that say which address blocks, MCU
//! registers, interrupts, shared buffers and DMA streams each ukApp may use,
//! the checks that decide whether a configuration is acceptable, and a
//! host-runnable model of the scheduler the resulting processes run under.
//!
//! # Design principles
//!
//! 1. Static configuration. The tables are populated once, while a `Session`
//!    is being started, and are only reachable through shared references
//!    afterwards.
//! 2. All or nothing. A batch of blocks, ranges or descriptors is either
//!    accepted as a whole or leaves the table as it was.
//! 3. Runtime state (`Scheduler`, `SharedBufferTable`) borrows the
//!    descriptors it serves rather than copying them.

pub mod addrblock;
pub mod descs;
pub mod err;
pub mod mcureg;
pub mod platform;
pub mod proc;
pub mod sched;
pub mod shbuf;
pub mod startup;
pub mod store;
pub mod time;
pub mod validate;

pub use addrblock::{AddressBlockRegistry, BlockClass, RegistryBlock};
pub use descs::{
    AppFlags, BlockAttributes, DmaStreamDesc, ExtraBlockDesc, McuRegisterDesc,
    SharedBufferDesc, UkAppDesc,
};
pub use err::{
    ConfigError, FatalError, ProcError, SchedulingTimeout, SpawnError,
    TransferError,
};
pub use mcureg::RegisterAccessTable;
pub use platform::PlatformLayout;
pub use sched::{Scheduler, SchedulingPolicy};
pub use shbuf::{Credentials, SharedBufferId, SharedBufferTable};
pub use startup::{KernelConfig, Session};
pub use store::DescriptorStore;
pub use validate::validate_session;
