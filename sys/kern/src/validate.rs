// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Whole-session checks, run once every table has been populated.
//!
//! The individual tables check what they can see on their own. What is left
//! here are the option ranges and the budgets that only make sense summed
//! over every ukApp, plus a recheck of references between tables.

use ukabi::{constraints, Options};

use crate::addrblock::AddressBlockRegistry;
use crate::err::{ConfigError, FatalError};
use crate::mcureg::RegisterAccessTable;
use crate::store::DescriptorStore;

/// Checks that the populated tables describe a session that can run.
///
/// Only reads its arguments, so calling it again on the same tables gives
/// the same answer.
pub fn validate_session(
    options: &Options,
    registry: &AddressBlockRegistry,
    registers: &RegisterAccessTable,
    store: &DescriptorStore,
) -> Result<(), FatalError> {
    check_options(options)?;

    let slots = options.ukproc_count_max as usize;
    if store.len() > slots {
        return Err(FatalError::ProcSlots {
            count: store.len(),
            max: slots,
        });
    }

    let apps = store.descriptors();

    let total: usize = apps.iter().map(|d| d.shared_buffers.len()).sum();
    let max = options.shared_buffer_count_max as usize;
    if total > max {
        return Err(FatalError::SharedBufferBudget { total, max });
    }

    let total: usize = apps.iter().map(|d| d.dma_streams.len()).sum();
    let max = options.dma_instance_count_max as usize;
    if total > max {
        return Err(FatalError::DmaBudget { total, max });
    }

    let total: usize = apps.iter().map(|d| d.pirqs.len()).sum();
    let supported = options.pirq_supported_count as usize;
    if total > supported {
        return Err(FatalError::PirqBudget { total, supported });
    }

    check_declared_counts(registry, registers)?;

    for (asid, app) in store.iter() {
        for eb in &app.extra_blocks {
            if registry.authorized_parent(&eb.block).is_none() {
                return Err(ConfigError::OutOfRange {
                    context: format!("{asid} extra block `{}`", eb.label),
                    detail: "no longer inside an authorized block".into(),
                }
                .into());
            }
        }
        for reg in &app.mcu_registers {
            if registers.lookup(reg.address).is_none() {
                return Err(ConfigError::UnknownReference {
                    context: format!("{asid} MCU registers"),
                    name: format!("{:#010x}", reg.address),
                }
                .into());
            }
        }
    }

    Ok(())
}

/// Checks the table sizes the platform description declares against what
/// was actually registered.
fn check_declared_counts(
    registry: &AddressBlockRegistry,
    registers: &RegisterAccessTable,
) -> Result<(), FatalError> {
    let declared = [
        ("authorized-block-count", registry.declared_authorized_count(), 32),
        ("register-range-count", registers.declared_range_count(), 64),
        ("register-count", registers.declared_register_count(), 2048),
    ];
    for (name, value, max) in declared {
        if let Some(value) = value.filter(|&v| v > max) {
            return Err(FatalError::Option {
                name,
                value: value.into(),
                min: 0,
                max: max.into(),
            });
        }
    }

    if let Some(declared) = registry.declared_authorized_count() {
        let actual = registry.authorized_count();
        if declared as usize != actual {
            return Err(FatalError::AuthorizedBlockCount { declared, actual });
        }
    }
    if let Some(declared) = registers.declared_range_count() {
        let actual = registers.len();
        if declared as usize != actual {
            return Err(FatalError::RegisterRangeCount { declared, actual });
        }
    }
    if let Some(declared) = registers.declared_register_count() {
        let actual = registers.authorized_register_count();
        if declared != actual {
            return Err(FatalError::RegisterCount { declared, actual });
        }
    }
    Ok(())
}

/// Checks every option against the range the model supports.
pub fn check_options(options: &Options) -> Result<(), FatalError> {
    let o = options;
    // Zero means the limit is not known; the margin check below skips it.
    let call_time = match o.call_time_limit_cputick {
        0 => 1000,
        limit => limit,
    };
    let ranges: [(&'static str, u64, u64, u64); 18] = [
        (
            "ukapp-count-max",
            o.ukapp_count_max.into(),
            2,
            constraints::UKAPP_COUNT_MAX.into(),
        ),
        (
            "ukapp-name-length-max",
            o.ukapp_name_length_max.into(),
            1,
            constraints::UKAPP_NAME_LENGTH_MAX.into(),
        ),
        (
            "ukapp-ipc-send-to-count-max",
            o.ukapp_ipc_send_to_count_max.into(),
            2,
            32,
        ),
        (
            "ukapp-pirq-count-max",
            o.ukapp_pirq_count_max.into(),
            1,
            constraints::UKAPP_PIRQ_COUNT_MAX.into(),
        ),
        (
            "ukapp-shared-buffer-count-max",
            o.ukapp_shared_buffer_count_max.into(),
            1,
            32,
        ),
        (
            "ukapp-extra-block-count-max",
            o.ukapp_extra_block_count_max.into(),
            1,
            32,
        ),
        (
            "ukapp-mcu-register-count-max",
            o.ukapp_mcu_register_count_max.into(),
            1,
            32,
        ),
        (
            "ukapp-dma-stream-count-max",
            o.ukapp_dma_stream_count_max.into(),
            1,
            16,
        ),
        (
            "ukproc-count-max",
            o.ukproc_count_max.into(),
            2,
            constraints::UKPROC_COUNT_MAX.into(),
        ),
        (
            "priority-max",
            o.priority_max.into(),
            1,
            constraints::PRIORITY_CEILING.into(),
        ),
        ("cleanup-quantum", o.cleanup_quantum.into(), 2, 127),
        (
            "shared-buffer-count-max",
            o.shared_buffer_count_max.into(),
            1,
            constraints::SHARED_BUFFER_COUNT_MAX.into(),
        ),
        (
            "shared-buffer-transfer-target-max",
            o.shared_buffer_transfer_target_max.into(),
            1,
            constraints::SHARED_BUFFER_TRANSFER_TARGET_MAX.into(),
        ),
        (
            "pirq-supported-count",
            o.pirq_supported_count.into(),
            1,
            constraints::PIRQ_SUPPORTED_COUNT_MAX.into(),
        ),
        (
            "dma-instance-count-max",
            o.dma_instance_count_max.into(),
            1,
            constraints::DMA_INSTANCE_COUNT_MAX.into(),
        ),
        ("systick-period-us", o.systick_period_us.into(), 500, 1_000_000),
        ("core-clock-hz", o.core_clock_hz.into(), 1_000_000, 250_000_000),
        ("call-time-limit-cputick", call_time.into(), 1000, 1_000_000),
    ];

    for (name, value, min, max) in ranges {
        if value < min || value > max {
            return Err(FatalError::Option {
                name,
                value,
                min,
                max,
            });
        }
    }

    // Zero turns the idle watchdog off; otherwise a single idle tick must
    // not trip it.
    let idle = o.idle_duration_max;
    if idle != 0 && !(2..=100_000).contains(&idle) {
        return Err(FatalError::Option {
            name: "idle-duration-max",
            value: idle.into(),
            min: 2,
            max: 100_000,
        });
    }

    let limit = o.call_time_limit_cputick;
    if limit != 0 {
        let systick_cputick =
            u64::from(o.systick_period_us) * u64::from(o.core_clock_hz) / 1_000_000;
        if systick_cputick < 2 * u64::from(limit) {
            return Err(FatalError::CallTimeMargin {
                systick_cputick,
                limit,
            });
        }
    }

    Ok(())
}
