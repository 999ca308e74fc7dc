// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Reading of `app.toml` files into kernel configurations.
//!
//! The file only has to be well-formed TOML with the expected keys to be
//! loaded here. Everything about whether the configuration is acceptable is
//! left to `ukern::Session::start`, apart from the names used to refer to
//! ukApps, which are resolved while lowering.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use serde::Deserialize;
use ukabi::{
    AddressBlock, Asid, IpcTarget, McuRegisterRange, Options, PirqIndex,
    Priority, RegisterMask,
};
use ukern::{
    AppFlags, BlockAttributes, BlockClass, DmaStreamDesc, ExtraBlockDesc,
    KernelConfig, McuRegisterDesc, PlatformLayout, RegistryBlock,
    SharedBufferDesc, UkAppDesc,
};

/// A `RawConfig` represents an `app.toml` file that has been deserialized,
/// but whose names have not been resolved yet.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawConfig {
    name: String,
    #[serde(default)]
    options: Options,
    #[serde(default)]
    platform: Platform,
    #[serde(default)]
    apps: IndexMap<String, App>,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub name: String,
    pub options: Options,
    pub platform: Platform,
    /// ukApps in declaration order, which is also ASID order.
    pub apps: IndexMap<String, App>,
    pub app_toml_path: Option<PathBuf>,
}

/// Adjustments to the built-in STM32H5 platform description.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Platform {
    pub address_block_alignment: Option<u32>,
    pub address_block_size_min: Option<u32>,
    pub address_block_size_max: Option<u32>,
    pub shared_buffer_size_min: Option<u32>,
    pub shared_buffer_size_max: Option<u32>,
    pub power_of_two_regions: Option<bool>,
    /// Blocks ukApps may be given as extra blocks.
    #[serde(default)]
    pub extra_authorized: IndexMap<String, AddressBlock>,
    /// Blocks no ukApp may be given, even inside an authorized block.
    #[serde(default)]
    pub extra_reserved: IndexMap<String, AddressBlock>,
    /// Number of `extra-authorized` entries, if the board documents it.
    pub authorized_block_count: Option<u32>,
    #[serde(default)]
    pub register_ranges: IndexMap<String, RegisterRange>,
    /// Number of `register-ranges` entries.
    pub register_range_count: Option<u32>,
    /// Number of registers covered by all of `register-ranges`.
    pub register_count: Option<u32>,
}

/// An inclusive range of MCU registers; a single register if `last` is
/// left out.
#[derive(Copy, Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RegisterRange {
    pub address: u32,
    pub last: Option<u32>,
    pub read_mask: u32,
    pub write_mask: u32,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct App {
    pub priority: u8,
    pub quantum: u32,
    #[serde(default)]
    pub start: bool,
    /// Names of the ukApps this one may send to, or `"*"` for all of them.
    #[serde(default)]
    pub ipc_send_to: Vec<String>,
    #[serde(default)]
    pub pirqs: Vec<u16>,
    #[serde(default)]
    pub shared_buffers: IndexMap<String, AddressBlock>,
    #[serde(default)]
    pub extra_blocks: IndexMap<String, ExtraBlock>,
    #[serde(default)]
    pub registers: Vec<Register>,
    #[serde(default)]
    pub dma_streams: IndexMap<String, DmaStream>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ExtraBlock {
    pub start: u32,
    pub length: u32,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Attribute {
    Read,
    Write,
    Execute,
    Device,
}

impl From<Attribute> for BlockAttributes {
    fn from(a: Attribute) -> Self {
        match a {
            Attribute::Read => BlockAttributes::READ,
            Attribute::Write => BlockAttributes::WRITE,
            Attribute::Execute => BlockAttributes::EXECUTE,
            Attribute::Device => BlockAttributes::DEVICE,
        }
    }
}

#[derive(Copy, Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Register {
    pub address: u32,
    pub read_mask: u32,
    pub write_mask: u32,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct DmaStream {
    pub engine: u8,
    pub source_request: u8,
    pub destination_request: u8,
    /// Label of one of the ukApp's shared buffers or extra blocks.
    pub source: String,
    pub destination: String,
}

impl FromStr for Config {
    type Err = anyhow::Error;

    fn from_str(text: &str) -> Result<Self> {
        let toml: RawConfig = toml::from_str(text)?;
        Ok(Config {
            name: toml.name,
            options: toml.options,
            platform: toml.platform,
            apps: toml.apps,
            app_toml_path: None,
        })
    }
}

impl Config {
    pub fn from_file(cfg: &Path) -> Result<Self> {
        let cfg_contents = std::fs::read_to_string(cfg)
            .with_context(|| format!("reading {}", cfg.display()))?;
        let mut config: Config = cfg_contents
            .parse()
            .with_context(|| format!("parsing {}", cfg.display()))?;
        config.app_toml_path = Some(cfg.to_owned());
        Ok(config)
    }

    pub fn app_name_suggestion(&self, name: &str) -> String {
        // Suggest only for very small differences
        const MAX_DISTANCE: usize = 3;

        let mut scored: Vec<_> = self
            .apps
            .keys()
            .filter_map(|s| {
                let distance = strsim::damerau_levenshtein(name, s);
                (distance <= MAX_DISTANCE).then_some((distance, s))
            })
            .collect();
        scored.sort();
        let mut out = format!("'{name}' is not a valid ukApp name.");
        if let Some((_, s)) = scored.first() {
            out.push_str(&format!(" Did you mean '{s}'?"));
        }
        out
    }

    /// ASID of the ukApp called `name`.
    pub fn asid(&self, name: &str) -> Result<Asid> {
        let (index, _, _) = self
            .apps
            .get_full(name)
            .ok_or_else(|| anyhow!(self.app_name_suggestion(name)))?;
        let index = u8::try_from(index)
            .map_err(|_| anyhow!("ukApp '{name}' is past the last ASID"))?;
        Ok(Asid(index))
    }

    pub fn layout(&self) -> PlatformLayout {
        let p = &self.platform;
        let mut layout = PlatformLayout::stm32h5();
        if let Some(v) = p.address_block_alignment {
            layout.address_block_alignment = v;
        }
        if let Some(v) = p.address_block_size_min {
            layout.address_block_size_min = v;
        }
        if let Some(v) = p.address_block_size_max {
            layout.address_block_size_max = v;
        }
        if let Some(v) = p.shared_buffer_size_min {
            layout.shared_buffer_size_min = v;
        }
        if let Some(v) = p.shared_buffer_size_max {
            layout.shared_buffer_size_max = v;
        }
        if let Some(v) = p.power_of_two_regions {
            layout.power_of_two_regions = v;
        }
        layout
    }

    /// Lowers the file into the tables a session is started from.
    pub fn kernel_config(&self) -> Result<KernelConfig> {
        let p = &self.platform;
        let address_blocks = p
            .extra_authorized
            .values()
            .map(|&block| RegistryBlock {
                block,
                class: BlockClass::AuthorizedExtra,
            })
            .chain(p.extra_reserved.values().map(|&block| RegistryBlock {
                block,
                class: BlockClass::Reserved,
            }))
            .collect();

        let register_ranges = p
            .register_ranges
            .values()
            .map(|r| {
                McuRegisterRange::new(
                    r.address,
                    r.last.unwrap_or(r.address),
                    RegisterMask(r.read_mask),
                    RegisterMask(r.write_mask),
                )
            })
            .collect();

        let apps = self
            .apps
            .iter()
            .map(|(name, app)| {
                self.lower_app(name, app)
                    .with_context(|| format!("ukApp '{name}'"))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(KernelConfig {
            options: self.options,
            layout: self.layout(),
            address_blocks,
            authorized_block_count: p.authorized_block_count,
            register_ranges,
            register_range_count: p.register_range_count,
            register_count: p.register_count,
            apps,
        })
    }

    fn lower_app(&self, name: &str, app: &App) -> Result<UkAppDesc> {
        let mut desc = UkAppDesc::new(name, Priority(app.priority), app.quantum);
        if app.start {
            desc.flags |= AppFlags::START_AT_BOOT;
        }

        desc.ipc_send_to = app
            .ipc_send_to
            .iter()
            .map(|target| match target.as_str() {
                "*" => Ok(IpcTarget::Any),
                other => self.asid(other).map(IpcTarget::App),
            })
            .collect::<Result<_>>()
            .context("resolving ipc-send-to")?;

        desc.pirqs = app.pirqs.iter().copied().map(PirqIndex).collect();

        desc.shared_buffers = app
            .shared_buffers
            .iter()
            .map(|(label, &block)| SharedBufferDesc {
                label: label.clone(),
                block,
            })
            .collect();

        desc.extra_blocks = app
            .extra_blocks
            .iter()
            .map(|(label, eb)| ExtraBlockDesc {
                label: label.clone(),
                attributes: eb
                    .attributes
                    .iter()
                    .fold(BlockAttributes::empty(), |acc, &a| {
                        acc | BlockAttributes::from(a)
                    }),
                block: AddressBlock::new(eb.start, eb.length),
            })
            .collect();

        desc.mcu_registers = app
            .registers
            .iter()
            .map(|r| McuRegisterDesc {
                address: r.address,
                read_mask: RegisterMask(r.read_mask),
                write_mask: RegisterMask(r.write_mask),
            })
            .collect();

        desc.dma_streams = app
            .dma_streams
            .iter()
            .map(|(label, s)| DmaStreamDesc {
                label: label.clone(),
                engine: s.engine,
                source_request: s.source_request,
                destination_request: s.destination_request,
                source_block: s.source.clone(),
                destination_block: s.destination.clone(),
            })
            .collect();

        log::debug!(
            "ukApp '{name}': {} shared buffers, {} extra blocks",
            desc.shared_buffers.len(),
            desc.extra_blocks.len()
        );
        Ok(desc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ukern::{FatalError, Session};

    const STM32H573_DK: &str =
        include_str!("../../../app/stm32h573-dk/app.toml");

    const MINIMAL: &str = r#"
        name = "minimal"

        [options]
        priority-max = 3

        [apps.server]
        priority = 1
        quantum = 8
        start = true

        [apps.client]
        priority = 2
        quantum = 8
        ipc-send-to = ["server"]
    "#;

    #[test]
    fn sample_board_starts() {
        let config: Config = STM32H573_DK.parse().unwrap();
        assert_eq!(config.name, "stm32h573-dk");
        assert_eq!(config.asid("attest").unwrap(), Asid(1));

        let kconfig = config.kernel_config().unwrap();
        assert_eq!(kconfig.address_blocks.len(), 4);
        assert_eq!(kconfig.register_range_count, Some(6));
        assert_eq!(kconfig.register_count, Some(17));

        let session = Session::start(kconfig).unwrap();
        assert_eq!(session.store().len(), 5);
        assert_eq!(session.registers().authorized_register_count(), 17);

        let sched = session.scheduler().unwrap();
        assert_eq!(sched.live().count(), 4);
        assert_eq!(sched.current(), sched.find(Asid(0)));
    }

    #[test]
    fn partial_options_keep_defaults() {
        let config: Config = MINIMAL.parse().unwrap();
        assert_eq!(config.options.priority_max, 3);
        assert_eq!(config.options.cleanup_quantum, 20);

        let kconfig = config.kernel_config().unwrap();
        let client = &kconfig.apps[1];
        assert_eq!(client.ipc_send_to, [IpcTarget::App(Asid(0))]);
        assert!(kconfig.apps[0].flags.contains(AppFlags::START_AT_BOOT));
        assert!(!client.flags.contains(AppFlags::START_AT_BOOT));
        Session::start(kconfig).unwrap();
    }

    #[test]
    fn unknown_keys_rejected() {
        let text = MINIMAL.replace("start = true", "strat = true");
        assert!(text.parse::<Config>().is_err());

        let text = MINIMAL.replace("priority-max", "priority-maximum");
        assert!(text.parse::<Config>().is_err());
    }

    #[test]
    fn misspelled_target_gets_suggestion() {
        let text = MINIMAL.replace(r#"["server"]"#, r#"["sever"]"#);
        let config: Config = text.parse().unwrap();
        let err = config.kernel_config().unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("ukApp 'client'"), "{msg}");
        assert!(msg.contains("Did you mean 'server'?"), "{msg}");

        assert_eq!(
            config.app_name_suggestion("zzzzzzzz"),
            "'zzzzzzzz' is not a valid ukApp name."
        );
    }

    #[test]
    fn declared_counts_are_checked() {
        let text = STM32H573_DK
            .replace("register-range-count = 6", "register-range-count = 17");
        let config: Config = text.parse().unwrap();
        let err = Session::start(config.kernel_config().unwrap()).unwrap_err();
        assert_eq!(
            err,
            FatalError::RegisterRangeCount {
                declared: 17,
                actual: 6
            }
        );

        let text = MINIMAL.replace(
            "[options]",
            "[options]\ncall-time-limit-cputick = 0\nsystick-period-us = 500",
        );
        let config: Config = text.parse().unwrap();
        assert_eq!(config.options.call_time_limit_cputick, 0);
        Session::start(config.kernel_config().unwrap()).unwrap();
    }

    #[test]
    fn session_checks_still_apply() {
        let text = MINIMAL.replace("priority = 2", "priority = 5");
        let config: Config = text.parse().unwrap();
        let err = Session::start(config.kernel_config().unwrap()).unwrap_err();
        assert!(matches!(err, FatalError::Config(_)), "{err}");
    }
}
