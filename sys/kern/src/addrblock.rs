// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Address Block Registry.
//!
//! The registry holds the platform's view of which parts of the peripheral
//! address space ukApps may be granted as extra blocks, and which parts are
//! reserved for the kernel even inside those. Reserved blocks are the only
//! ones allowed to intersect others, and only by nesting inside an
//! authorized block.

use core::fmt;

use ukabi::AddressBlock;

use crate::err::ConfigError;
use crate::platform::PlatformLayout;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BlockClass {
    /// May be granted to ukApps, in whole or in part.
    AuthorizedExtra,
    /// Never granted, even when it lies inside an authorized block.
    Reserved,
}

impl fmt::Display for BlockClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockClass::AuthorizedExtra => f.write_str("authorized extra"),
            BlockClass::Reserved => f.write_str("reserved"),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RegistryBlock {
    pub block: AddressBlock,
    pub class: BlockClass,
}

impl RegistryBlock {
    pub const fn authorized(start: u32, length: u32) -> Self {
        Self {
            block: AddressBlock::new(start, length),
            class: BlockClass::AuthorizedExtra,
        }
    }

    pub const fn reserved(start: u32, length: u32) -> Self {
        Self {
            block: AddressBlock::new(start, length),
            class: BlockClass::Reserved,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct AddressBlockRegistry {
    blocks: Vec<RegistryBlock>,
    /// Authorized block count the platform description claims.
    declared_authorized: Option<u32>,
}

impl AddressBlockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `blocks` to the registry.
    ///
    /// The batch is checked as a whole, against itself and against whatever
    /// was registered before. If any block is rejected nothing is added.
    pub fn register(
        &mut self,
        layout: &PlatformLayout,
        blocks: &[RegistryBlock],
    ) -> Result<(), ConfigError> {
        for (i, entry) in blocks.iter().enumerate() {
            let context = format!("{} block {i}", entry.class);
            layout.check_block(
                &context,
                &entry.block,
                layout.address_block_size_min,
                layout.address_block_size_max,
                false,
            )?;

            if !layout
                .peripheral_spaces
                .iter()
                .any(|space| space.contains(&entry.block))
            {
                return Err(ConfigError::OutOfRange {
                    context,
                    detail: format!(
                        "{} is outside the peripheral address space",
                        entry.block
                    ),
                });
            }

            for other in self.blocks.iter().chain(&blocks[..i]) {
                check_pair(&context, entry, other)?;
            }
        }

        self.blocks.extend_from_slice(blocks);
        log::debug!(
            "address block registry holds {} blocks",
            self.blocks.len()
        );
        Ok(())
    }

    /// Finds the authorized block that `block` lies within, if any.
    pub fn authorized_parent(&self, block: &AddressBlock) -> Option<&AddressBlock> {
        self.blocks
            .iter()
            .filter(|e| e.class == BlockClass::AuthorizedExtra)
            .map(|e| &e.block)
            .find(|parent| parent.contains(block))
    }

    /// Finds a reserved block that shares at least one byte with `block`.
    pub fn reserved_overlapping(
        &self,
        block: &AddressBlock,
    ) -> Option<&AddressBlock> {
        self.blocks
            .iter()
            .filter(|e| e.class == BlockClass::Reserved)
            .map(|e| &e.block)
            .find(|r| r.overlaps(block))
    }

    /// Records how many authorized blocks the registry should end up with;
    /// checked by the session validator.
    pub fn declare_authorized_count(&mut self, count: u32) {
        self.declared_authorized = Some(count);
    }

    pub fn declared_authorized_count(&self) -> Option<u32> {
        self.declared_authorized
    }

    pub fn authorized_count(&self) -> usize {
        self.blocks
            .iter()
            .filter(|e| e.class == BlockClass::AuthorizedExtra)
            .count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegistryBlock> {
        self.blocks.iter()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// Two registry blocks may only intersect when a reserved block is nested
/// entirely inside an authorized one.
fn check_pair(
    context: &str,
    entry: &RegistryBlock,
    other: &RegistryBlock,
) -> Result<(), ConfigError> {
    if !entry.block.overlaps(&other.block) {
        return Ok(());
    }

    let nested = match (entry.class, other.class) {
        (BlockClass::Reserved, BlockClass::AuthorizedExtra) => {
            other.block.contains(&entry.block)
        }
        (BlockClass::AuthorizedExtra, BlockClass::Reserved) => {
            entry.block.contains(&other.block)
        }
        _ => false,
    };

    if nested {
        Ok(())
    } else {
        Err(ConfigError::Overlap {
            context: context.to_owned(),
            block: entry.block,
            other: other.block,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn stm32h5_lists() -> Vec<RegistryBlock> {
        vec![
            RegistryBlock::authorized(0x5000_0000, 0x1000_0000),
            // RCC
            RegistryBlock::reserved(0x5402_0C00, 0x400),
            // GPIOA through GPIOI
            RegistryBlock::reserved(0x5202_0000, 0x2400),
        ]
    }

    #[test]
    fn reserved_blocks_nest_in_authorized() {
        let mut registry = AddressBlockRegistry::new();
        registry
            .register(&PlatformLayout::stm32h5(), &stm32h5_lists())
            .unwrap();
        assert_eq!(registry.len(), 3);

        let uart = AddressBlock::new(0x5000_4400, 0x400);
        assert_eq!(
            registry.authorized_parent(&uart),
            Some(&AddressBlock::new(0x5000_0000, 0x1000_0000))
        );
        assert_eq!(registry.reserved_overlapping(&uart), None);

        let gpiob = AddressBlock::new(0x5202_0400, 0x400);
        assert_eq!(
            registry.reserved_overlapping(&gpiob),
            Some(&AddressBlock::new(0x5202_0000, 0x2400))
        );
    }

    #[test]
    fn partial_overlap_rejected() {
        let mut registry = AddressBlockRegistry::new();
        let blocks = [
            RegistryBlock::authorized(0x5000_0000, 0x1000),
            RegistryBlock::reserved(0x5000_0F00, 0x200),
        ];
        let err = registry
            .register(&PlatformLayout::stm32h5(), &blocks)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Overlap { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn same_class_blocks_must_be_disjoint() {
        let layout = PlatformLayout::stm32h5();
        let mut registry = AddressBlockRegistry::new();
        registry
            .register(&layout, &[RegistryBlock::authorized(0x4000_0000, 0x1000)])
            .unwrap();

        // Nesting only helps a reserved block.
        let err = registry
            .register(&layout, &[RegistryBlock::authorized(0x4000_0100, 0x100)])
            .unwrap_err();
        assert!(matches!(err, ConfigError::Overlap { .. }));

        let err = registry
            .register(
                &layout,
                &[
                    RegistryBlock::reserved(0x4000_0100, 0x100),
                    RegistryBlock::reserved(0x4000_0180, 0x100),
                ],
            )
            .unwrap_err();
        assert!(matches!(err, ConfigError::Overlap { .. }));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn blocks_must_sit_in_peripheral_space() {
        let mut registry = AddressBlockRegistry::new();
        let err = registry
            .register(
                &PlatformLayout::stm32h5(),
                &[RegistryBlock::authorized(0x2000_0000, 0x1000)],
            )
            .unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { .. }));

        let err = registry
            .register(
                &PlatformLayout::stm32h5(),
                &[RegistryBlock::authorized(0x5FFF_F000, 0x2000)],
            )
            .unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { .. }));
    }

    #[test]
    fn misaligned_block_rejected() {
        let mut registry = AddressBlockRegistry::new();
        let err = registry
            .register(
                &PlatformLayout::stm32h5(),
                &[RegistryBlock::reserved(0x4000_0004, 0x100)],
            )
            .unwrap_err();
        assert!(matches!(err, ConfigError::Misaligned { .. }));
    }

    fn registry_block() -> impl Strategy<Value = RegistryBlock> {
        (0u32..0x40, 1u32..0x40, any::<bool>()).prop_map(|(slot, len, reserved)| {
            let block = AddressBlock::new(0x4000_0000 + slot * 0x100, len * 0x20);
            let class = if reserved {
                BlockClass::Reserved
            } else {
                BlockClass::AuthorizedExtra
            };
            RegistryBlock { block, class }
        })
    }

    proptest! {
        #[test]
        fn registered_blocks_are_disjoint_or_nested(
            batches in proptest::collection::vec(
                proptest::collection::vec(registry_block(), 1..5),
                1..4,
            )
        ) {
            let layout = PlatformLayout::stm32h5();
            let mut registry = AddressBlockRegistry::new();
            for batch in &batches {
                let before = registry.len();
                if registry.register(&layout, batch).is_err() {
                    prop_assert_eq!(registry.len(), before);
                }
            }

            let blocks: Vec<_> = registry.iter().copied().collect();
            for (i, a) in blocks.iter().enumerate() {
                for b in &blocks[i + 1..] {
                    let permitted = !a.block.overlaps(&b.block)
                        || match (a.class, b.class) {
                            (BlockClass::Reserved, BlockClass::AuthorizedExtra) => {
                                b.block.contains(&a.block)
                            }
                            (BlockClass::AuthorizedExtra, BlockClass::Reserved) => {
                                a.block.contains(&b.block)
                            }
                            _ => false,
                        };
                    prop_assert!(permitted, "{:?} vs {:?}", a, b);
                }
            }
        }
    }
}
