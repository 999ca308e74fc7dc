// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Memory-protection constraints and address map of the target MCU.

use ukabi::AddressBlock;

use crate::err::ConfigError;

/// Description of what the target's memory protection hardware can express
/// and where its peripherals live.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PlatformLayout {
    /// Granularity of block starts and lengths, in bytes.
    pub address_block_alignment: u32,
    pub address_block_size_min: u32,
    pub address_block_size_max: u32,
    pub shared_buffer_size_min: u32,
    pub shared_buffer_size_max: u32,
    /// Set on ARMv7-M style MPUs, where a region length must be a power of
    /// two and its start a multiple of its length.
    pub power_of_two_regions: bool,
    /// Parents that every registry block must lie within.
    pub peripheral_spaces: Vec<AddressBlock>,
    /// Spaces in which MCU registers may be authorized.
    pub register_spaces: Vec<AddressBlock>,
    /// Register windows the kernel keeps for itself (SysTick, MPU). No
    /// authorized register range may touch them.
    pub kernel_registers: Vec<AddressBlock>,
}

impl PlatformLayout {
    /// Layout of the STM32H573 (Cortex-M33, ARMv8-M MPU).
    pub fn stm32h5() -> Self {
        Self {
            address_block_alignment: 32,
            address_block_size_min: 0x20,
            address_block_size_max: 0x4000_0000,
            shared_buffer_size_min: 0x100,
            shared_buffer_size_max: 0x8000,
            power_of_two_regions: false,
            peripheral_spaces: vec![AddressBlock::new(0x4000_0000, 0x2000_0000)],
            register_spaces: vec![
                AddressBlock::new(0x4000_0000, 0x2000_0000),
                // Private peripheral bus: DWT, SCB, NVIC and friends.
                AddressBlock::new(0xE000_0000, 0x0010_0000),
            ],
            kernel_registers: vec![
                // SysTick
                AddressBlock::new(0xE000_E010, 0x10),
                // MPU, TYPE through MAIR1
                AddressBlock::new(0xE000_ED90, 0x38),
            ],
        }
    }

    /// Checks that `block` is well formed, aligned to the platform
    /// granularity and within `min..=max` bytes long. With `mpu_region` set
    /// the block must also be expressible as a single MPU region.
    pub(crate) fn check_block(
        &self,
        context: &str,
        block: &AddressBlock,
        min: u32,
        max: u32,
        mpu_region: bool,
    ) -> Result<(), ConfigError> {
        if !block.is_well_formed() {
            return Err(ConfigError::OutOfRange {
                context: context.to_owned(),
                detail: format!("{block} is empty or wraps the address space"),
            });
        }

        let align = self.address_block_alignment;
        if !block.is_aligned_to(align) {
            let value = if block.start % align.max(1) != 0 {
                block.start
            } else {
                block.length
            };
            return Err(ConfigError::Misaligned {
                context: context.to_owned(),
                value,
                align,
            });
        }

        if mpu_region && self.power_of_two_regions && !block.is_naturally_aligned()
        {
            return Err(ConfigError::Misaligned {
                context: context.to_owned(),
                value: block.start,
                align: block.length.checked_next_power_of_two().unwrap_or(0),
            });
        }

        if block.length < min || block.length > max {
            return Err(ConfigError::OutOfRange {
                context: context.to_owned(),
                detail: format!(
                    "length {:#x} outside {min:#x}..={max:#x}",
                    block.length
                ),
            });
        }

        Ok(())
    }
}

impl Default for PlatformLayout {
    fn default() -> Self {
        Self::stm32h5()
    }
}
