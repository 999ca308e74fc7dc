// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! ukApp Descriptor Store.

use std::collections::BTreeSet;

use ukabi::{Asid, IpcTarget, Options};

use crate::addrblock::AddressBlockRegistry;
use crate::descs::{UkAppDesc, QUANTUM_MAX, QUANTUM_MIN};
use crate::err::ConfigError;
use crate::mcureg::RegisterAccessTable;
use crate::platform::PlatformLayout;

/// The table of ukApp descriptors of a session. A descriptor's position in
/// the table is its `Asid`.
#[derive(Clone, Debug, Default)]
pub struct DescriptorStore {
    descs: Vec<UkAppDesc>,
}

impl DescriptorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the contents of the store with `descriptors`.
    ///
    /// Every descriptor is checked before any is committed: if one is
    /// rejected the store keeps what it held before (nothing, before the
    /// first successful load).
    pub fn load(
        &mut self,
        options: &Options,
        layout: &PlatformLayout,
        registry: &AddressBlockRegistry,
        registers: &RegisterAccessTable,
        descriptors: Vec<UkAppDesc>,
    ) -> Result<(), ConfigError> {
        check_count(
            "ukApp descriptors",
            descriptors.len(),
            options.ukapp_count_max,
        )?;

        let mut names = BTreeSet::new();
        for (index, desc) in descriptors.iter().enumerate() {
            let checker = DescChecker {
                options,
                layout,
                registry,
                registers,
                index,
                count: descriptors.len(),
                desc,
            };
            checker.check()?;

            if !names.insert(desc.name.as_str()) {
                return Err(ConfigError::DuplicateName {
                    context: "ukApp descriptors".into(),
                    name: desc.name.clone(),
                });
            }
        }

        log::info!("loaded {} ukApp descriptors", descriptors.len());
        self.descs = descriptors;
        Ok(())
    }

    pub fn get(&self, asid: Asid) -> Option<&UkAppDesc> {
        self.descs.get(asid.index())
    }

    pub fn find(&self, name: &str) -> Option<(Asid, &UkAppDesc)> {
        self.iter().find(|(_, d)| d.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Asid, &UkAppDesc)> {
        // `load` caps the table well below 256 entries.
        self.descs
            .iter()
            .enumerate()
            .map(|(i, d)| (Asid(i as u8), d))
    }

    pub fn descriptors(&self) -> &[UkAppDesc] {
        &self.descs
    }

    pub fn len(&self) -> usize {
        self.descs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descs.is_empty()
    }
}

fn check_count(context: &str, count: usize, max: u32) -> Result<(), ConfigError> {
    let max = max as usize;
    if count > max {
        return Err(ConfigError::CountMismatch {
            context: context.to_owned(),
            count,
            max,
        });
    }
    Ok(())
}

/// Checks applied to a single descriptor, with what they need to refer to.
struct DescChecker<'a> {
    options: &'a Options,
    layout: &'a PlatformLayout,
    registry: &'a AddressBlockRegistry,
    registers: &'a RegisterAccessTable,
    index: usize,
    count: usize,
    desc: &'a UkAppDesc,
}

impl DescChecker<'_> {
    fn check(&self) -> Result<(), ConfigError> {
        self.check_identity()?;
        self.check_counts()?;
        self.check_ipc()?;
        self.check_pirqs()?;
        self.check_blocks()?;
        self.check_registers()?;
        self.check_dma()
    }

    fn context(&self, what: &str) -> String {
        if what.is_empty() {
            format!("ukApp #{} `{}`", self.index, self.desc.name)
        } else {
            format!("ukApp #{} `{}` {what}", self.index, self.desc.name)
        }
    }

    fn check_identity(&self) -> Result<(), ConfigError> {
        let desc = self.desc;
        let name_max = self.options.ukapp_name_length_max as usize;
        if desc.name.is_empty() || desc.name.len() > name_max {
            return Err(ConfigError::OutOfRange {
                context: self.context("name"),
                detail: format!(
                    "name is {} bytes long, must be 1..={name_max}",
                    desc.name.len()
                ),
            });
        }

        if desc.priority.0 > self.options.priority_max {
            return Err(ConfigError::OutOfRange {
                context: self.context("priority"),
                detail: format!(
                    "priority {} is less important than the minimum {}",
                    desc.priority.0, self.options.priority_max
                ),
            });
        }

        if !(QUANTUM_MIN..=QUANTUM_MAX).contains(&desc.quantum) {
            return Err(ConfigError::OutOfRange {
                context: self.context("quantum"),
                detail: format!(
                    "quantum {} outside {QUANTUM_MIN}..={QUANTUM_MAX}",
                    desc.quantum
                ),
            });
        }

        Ok(())
    }

    fn check_counts(&self) -> Result<(), ConfigError> {
        let o = self.options;
        let d = self.desc;
        for (what, count, max) in [
            ("IPC targets", d.ipc_send_to.len(), o.ukapp_ipc_send_to_count_max),
            ("PIRQs", d.pirqs.len(), o.ukapp_pirq_count_max),
            (
                "shared buffers",
                d.shared_buffers.len(),
                o.ukapp_shared_buffer_count_max,
            ),
            (
                "extra blocks",
                d.extra_blocks.len(),
                o.ukapp_extra_block_count_max,
            ),
            (
                "MCU registers",
                d.mcu_registers.len(),
                o.ukapp_mcu_register_count_max,
            ),
            ("DMA streams", d.dma_streams.len(), o.ukapp_dma_stream_count_max),
        ] {
            check_count(&self.context(what), count, max)?;
        }
        Ok(())
    }

    fn check_ipc(&self) -> Result<(), ConfigError> {
        for target in &self.desc.ipc_send_to {
            if let IpcTarget::App(asid) = target {
                if asid.index() >= self.count || asid.index() == self.index {
                    return Err(ConfigError::UnknownReference {
                        context: self.context("IPC targets"),
                        name: asid.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn check_pirqs(&self) -> Result<(), ConfigError> {
        let supported = self.options.pirq_supported_count;
        let mut seen = BTreeSet::new();
        for pirq in &self.desc.pirqs {
            if u32::from(pirq.0) >= supported {
                return Err(ConfigError::OutOfRange {
                    context: self.context("PIRQs"),
                    detail: format!(
                        "PIRQ {} beyond the {supported} supported lines",
                        pirq.0
                    ),
                });
            }
            if !seen.insert(pirq.0) {
                return Err(ConfigError::DuplicateName {
                    context: self.context("PIRQs"),
                    name: pirq.0.to_string(),
                });
            }
        }
        Ok(())
    }

    fn check_blocks(&self) -> Result<(), ConfigError> {
        let layout = self.layout;

        let mut labels = BTreeSet::new();
        for label in self.desc.block_labels() {
            if !labels.insert(label) {
                return Err(ConfigError::DuplicateName {
                    context: self.context("address blocks"),
                    name: label.to_owned(),
                });
            }
        }

        for sb in &self.desc.shared_buffers {
            let context = self.context(&format!("shared buffer `{}`", sb.label));
            layout.check_block(
                &context,
                &sb.block,
                layout.shared_buffer_size_min,
                layout.shared_buffer_size_max,
                true,
            )?;
        }

        for eb in &self.desc.extra_blocks {
            let context = self.context(&format!("extra block `{}`", eb.label));
            layout.check_block(
                &context,
                &eb.block,
                layout.address_block_size_min,
                layout.address_block_size_max,
                true,
            )?;
            if self.registry.authorized_parent(&eb.block).is_none() {
                return Err(ConfigError::OutOfRange {
                    context,
                    detail: format!(
                        "{} is not inside an authorized extra block",
                        eb.block
                    ),
                });
            }
            if let Some(reserved) = self.registry.reserved_overlapping(&eb.block) {
                return Err(ConfigError::Overlap {
                    context,
                    block: eb.block,
                    other: *reserved,
                });
            }
        }

        Ok(())
    }

    fn check_registers(&self) -> Result<(), ConfigError> {
        for reg in &self.desc.mcu_registers {
            let context =
                self.context(&format!("MCU register {:#010x}", reg.address));
            let Some(range) = self.registers.lookup(reg.address) else {
                return Err(ConfigError::UnknownReference {
                    context,
                    name: format!("{:#010x}", reg.address),
                });
            };
            if !range.readable().covers(reg.read_mask)
                || !range.writable().covers(reg.write_mask)
            {
                return Err(ConfigError::OutOfRange {
                    context,
                    detail: format!(
                        "masks r={:#010x} w={:#010x} exceed authorized \
                         r={:#010x} w={:#010x}",
                        reg.read_mask.bits(),
                        reg.write_mask.bits(),
                        range.readable().bits(),
                        range.writable().bits(),
                    ),
                });
            }
        }
        Ok(())
    }

    fn check_dma(&self) -> Result<(), ConfigError> {
        let mut labels = BTreeSet::new();
        for stream in &self.desc.dma_streams {
            let context =
                self.context(&format!("DMA stream `{}`", stream.label));
            if !labels.insert(stream.label.as_str()) {
                return Err(ConfigError::DuplicateName {
                    context: self.context("DMA streams"),
                    name: stream.label.clone(),
                });
            }
            for label in [&stream.source_block, &stream.destination_block] {
                if self.desc.block_labeled(label).is_none() {
                    return Err(ConfigError::UnknownReference {
                        context,
                        name: label.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}
