// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use serde::{Deserialize, Serialize};

/// Hard ceilings that no configuration may exceed, whatever the options say.
pub mod constraints {
    pub const UKAPP_COUNT_MAX: u32 = 64;
    pub const UKPROC_COUNT_MAX: u32 = 32;
    pub const PRIORITY_CEILING: u8 = 31;
    pub const UKAPP_PIRQ_COUNT_MAX: u32 = 32;
    pub const SHARED_BUFFER_COUNT_MAX: u32 = 254;
    pub const SHARED_BUFFER_TRANSFER_TARGET_MAX: u32 = 7;
    pub const DMA_INSTANCE_COUNT_MAX: u32 = 32;
    pub const UKAPP_NAME_LENGTH_MAX: u32 = 31;
    /// Interrupt lines an ARMv8-M NVIC can implement.
    pub const PIRQ_SUPPORTED_COUNT_MAX: u32 = 496;
}

/// Tunable limits and scheduling parameters of a session.
///
/// The defaults are the values used on the STM32H573 target. Counts bound
/// the number of entries in the descriptor lists; durations are in systicks
/// unless their name says otherwise.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct Options {
    /// Number of ukApp descriptors a session may declare.
    pub ukapp_count_max: u32,
    /// Longest ukApp name, in bytes.
    pub ukapp_name_length_max: u32,
    pub ukapp_ipc_send_to_count_max: u32,
    pub ukapp_pirq_count_max: u32,
    pub ukapp_shared_buffer_count_max: u32,
    pub ukapp_extra_block_count_max: u32,
    pub ukapp_mcu_register_count_max: u32,
    pub ukapp_dma_stream_count_max: u32,
    /// Number of ukProc slots in the process table.
    pub ukproc_count_max: u32,
    /// Least important priority a ukApp may be given.
    pub priority_max: u8,
    /// CPU time a terminating ukProc gets to release its resources.
    pub cleanup_quantum: u32,
    /// Longest run of consecutive idle systicks before the session is
    /// considered stuck. Zero disables the watchdog.
    pub idle_duration_max: u32,
    /// Shared buffers across all ukApps.
    pub shared_buffer_count_max: u32,
    /// Distinct ukProcs, other than its owner, that one shared buffer may be
    /// handed to over its lifetime.
    pub shared_buffer_transfer_target_max: u32,
    /// Peripheral interrupt lines implemented by the MCU.
    pub pirq_supported_count: u32,
    /// DMA streams across all ukApps.
    pub dma_instance_count_max: u32,
    pub systick_period_us: u32,
    /// Upper bound on the CPU ticks spent in one kernel call. Zero if not
    /// known, which skips the systick margin check.
    pub call_time_limit_cputick: u32,
    pub core_clock_hz: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            ukapp_count_max: 16,
            ukapp_name_length_max: 31,
            ukapp_ipc_send_to_count_max: 8,
            ukapp_pirq_count_max: 12,
            ukapp_shared_buffer_count_max: 8,
            ukapp_extra_block_count_max: 16,
            ukapp_mcu_register_count_max: 32,
            ukapp_dma_stream_count_max: 4,
            ukproc_count_max: 16,
            priority_max: 7,
            cleanup_quantum: 20,
            idle_duration_max: 1000,
            shared_buffer_count_max: 16,
            shared_buffer_transfer_target_max: 2,
            pirq_supported_count: 130,
            dma_instance_count_max: 16,
            systick_period_us: 10_000,
            call_time_limit_cputick: 150_000,
            core_clock_hz: 250_000_000,
        }
    }
}
