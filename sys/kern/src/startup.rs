// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel startup.
//!
//! Starting a session populates the tables in dependency order: the address
//! block registry and the MCU register table first, since ukApp descriptors
//! are checked against them, then the descriptor store, then the
//! whole-session checks. The first failure stops the boot.

use ukabi::{AccessOp, Asid, McuRegisterRange, Options};

use crate::addrblock::{AddressBlockRegistry, RegistryBlock};
use crate::descs::{AppFlags, UkAppDesc};
use crate::err::{FatalError, SpawnError};
use crate::mcureg::RegisterAccessTable;
use crate::platform::PlatformLayout;
use crate::sched::Scheduler;
use crate::store::DescriptorStore;
use crate::validate;

/// Everything needed to start a session, as produced by the build-time
/// configuration.
#[derive(Clone, Debug, Default)]
pub struct KernelConfig {
    pub options: Options,
    pub layout: PlatformLayout,
    /// Platform address blocks, authorized and reserved.
    pub address_blocks: Vec<RegistryBlock>,
    /// Number of authorized blocks `address_blocks` is expected to hold.
    pub authorized_block_count: Option<u32>,
    pub register_ranges: Vec<McuRegisterRange>,
    /// Number of entries `register_ranges` is expected to hold.
    pub register_range_count: Option<u32>,
    /// Number of registers `register_ranges` is expected to cover.
    pub register_count: Option<u32>,
    pub apps: Vec<UkAppDesc>,
}

/// A started session: the validated, now immutable, kernel tables.
#[derive(Debug)]
pub struct Session {
    options: Options,
    layout: PlatformLayout,
    registry: AddressBlockRegistry,
    registers: RegisterAccessTable,
    store: DescriptorStore,
}

impl Session {
    /// Runs the boot sequence over `config`.
    pub fn start(config: KernelConfig) -> Result<Self, FatalError> {
        let KernelConfig {
            options,
            layout,
            address_blocks,
            authorized_block_count,
            register_ranges,
            register_range_count,
            register_count,
            apps,
        } = config;

        validate::check_options(&options)?;

        let mut registry = AddressBlockRegistry::new();
        registry.register(&layout, &address_blocks)?;
        if let Some(count) = authorized_block_count {
            registry.declare_authorized_count(count);
        }
        log::info!("registered {} address blocks", registry.len());

        let mut registers = RegisterAccessTable::new();
        for range in register_ranges {
            registers.authorize_range(&layout, range)?;
        }
        if let Some(count) = register_range_count {
            registers.declare_range_count(count);
        }
        if let Some(count) = register_count {
            registers.declare_register_count(count);
        }
        log::info!(
            "authorized {} MCU registers in {} ranges",
            registers.authorized_register_count(),
            registers.len()
        );

        let mut store = DescriptorStore::new();
        store.load(&options, &layout, &registry, &registers, apps)?;

        validate::validate_session(&options, &registry, &registers, &store)?;
        log::info!("session validated");

        Ok(Self {
            options,
            layout,
            registry,
            registers,
            store,
        })
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn layout(&self) -> &PlatformLayout {
        &self.layout
    }

    pub fn registry(&self) -> &AddressBlockRegistry {
        &self.registry
    }

    pub fn registers(&self) -> &RegisterAccessTable {
        &self.registers
    }

    pub fn store(&self) -> &DescriptorStore {
        &self.store
    }

    /// Creates the scheduler for this session, with a ukProc for every ukApp
    /// flagged to start at boot, and makes the first scheduling decision.
    /// The scheduler also holds the session's shared buffer table.
    pub fn scheduler(&self) -> Result<Scheduler<'_>, SpawnError> {
        let mut sched = Scheduler::new(&self.store, &self.options);
        for (asid, app) in self.store.iter() {
            if app.flags.contains(AppFlags::START_AT_BOOT) {
                sched.instantiate(asid)?;
            }
        }
        sched.schedule();
        Ok(sched)
    }

    /// Decides whether ukApp `asid` may touch `bits` of the MCU register at
    /// `address`. Both the ukApp's own descriptor and the global table have
    /// to allow it.
    pub fn check_register_access(
        &self,
        asid: Asid,
        address: u32,
        op: AccessOp,
        bits: u32,
    ) -> bool {
        let Some(app) = self.store.get(asid) else {
            return false;
        };
        app.mcu_register(address)
            .is_some_and(|reg| reg.mask(op).permits(bits))
            && self.registers.check_access(address, op, bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descs::{BlockAttributes, ExtraBlockDesc, McuRegisterDesc};
    use crate::err::ConfigError;
    use ukabi::{AddressBlock, Priority, RegisterMask, SchedState};

    fn config() -> KernelConfig {
        let mut driver = UkAppDesc::new("driver", Priority(1), 10);
        driver.flags = AppFlags::START_AT_BOOT;
        driver.extra_blocks.push(ExtraBlockDesc {
            label: "gpioa".into(),
            attributes: BlockAttributes::READ
                | BlockAttributes::WRITE
                | BlockAttributes::DEVICE,
            block: AddressBlock::new(0x5202_0000, 0x400),
        });
        driver.mcu_registers.push(McuRegisterDesc {
            address: 0x5402_0C88,
            read_mask: RegisterMask::ALL,
            write_mask: RegisterMask(0x0000_0100),
        });
        let idle = UkAppDesc::new("idle", Priority(7), 10);

        KernelConfig {
            address_blocks: vec![RegistryBlock::authorized(
                0x5200_0000,
                0x0400_0000,
            )],
            register_ranges: vec![McuRegisterRange::new(
                0x5402_0C88,
                0x5402_0C88,
                RegisterMask::ALL,
                RegisterMask(0x0038_D100),
            )],
            authorized_block_count: Some(1),
            register_range_count: Some(1),
            register_count: Some(1),
            apps: vec![driver, idle],
            ..KernelConfig::default()
        }
    }

    #[test]
    fn boots_and_starts_flagged_apps() {
        let session = Session::start(config()).unwrap();
        assert_eq!(session.store().len(), 2);

        let sched = session.scheduler().unwrap();
        let driver = sched.find(Asid(0)).unwrap();
        assert_eq!(sched.current(), Some(driver));
        assert_eq!(sched.state(driver), Some(SchedState::Running.into()));
        assert!(sched.find(Asid(1)).is_none());
    }

    #[test]
    fn register_access_needs_both_grants() {
        let session = Session::start(config()).unwrap();
        let rcc = 0x5402_0C88;
        assert!(session.check_register_access(Asid(0), rcc, AccessOp::Write, 0x100));
        // Allowed globally, but not granted to this ukApp.
        assert!(!session.check_register_access(Asid(0), rcc, AccessOp::Write, 0x1000));
        assert!(!session.check_register_access(Asid(1), rcc, AccessOp::Read, 0x1));
        assert!(!session.check_register_access(Asid(5), rcc, AccessOp::Read, 0x1));
    }

    #[test]
    fn first_failure_stops_boot() {
        let mut cfg = config();
        cfg.address_blocks.clear();
        assert!(matches!(
            Session::start(cfg),
            Err(FatalError::Config(ConfigError::OutOfRange { .. }))
        ));

        let mut cfg = config();
        cfg.register_count = Some(4);
        assert_eq!(
            Session::start(cfg).unwrap_err(),
            FatalError::RegisterCount {
                declared: 4,
                actual: 1
            }
        );

        let mut cfg = config();
        cfg.register_range_count = Some(2);
        assert_eq!(
            Session::start(cfg).unwrap_err(),
            FatalError::RegisterRangeCount {
                declared: 2,
                actual: 1
            }
        );

        let mut cfg = config();
        cfg.authorized_block_count = Some(0);
        assert_eq!(
            Session::start(cfg).unwrap_err(),
            FatalError::AuthorizedBlockCount {
                declared: 0,
                actual: 1
            }
        );

        let mut cfg = config();
        cfg.options.priority_max = 0;
        assert!(matches!(
            Session::start(cfg),
            Err(FatalError::Option { name: "priority-max", .. })
        ));
    }
}
