// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::Path;

use anyhow::{Context, Result};
use build_ukconfig::Config;
use ukern::{BlockClass, Session};

pub fn run(cfg: &Path) -> Result<()> {
    let toml = Config::from_file(cfg)?;
    let session = Session::start(toml.kernel_config()?)
        .with_context(|| format!("starting session for '{}'", toml.name))?;

    println!("{}: configuration accepted", toml.name);

    let registry = session.registry();
    let authorized = registry
        .iter()
        .filter(|b| b.class == BlockClass::AuthorizedExtra)
        .count();
    println!(
        "  address blocks: {} authorized, {} reserved",
        authorized,
        registry.len() - authorized
    );
    println!(
        "  MCU registers:  {} in {} ranges",
        session.registers().authorized_register_count(),
        session.registers().len()
    );

    let options = session.options();
    println!(
        "  ukApps:         {} of {}, {} ukProc slots",
        session.store().len(),
        options.ukapp_count_max,
        options.ukproc_count_max
    );
    for (asid, app) in session.store().iter() {
        println!(
            "    {:<4} {:<width$} priority {:<2} quantum {:<3} {} shared, {} extra, {} regs, {} dma",
            asid.0,
            app.name,
            app.priority.0,
            app.quantum,
            app.shared_buffers.len(),
            app.extra_blocks.len(),
            app.mcu_registers.len(),
            app.dma_streams.len(),
            width = options.ukapp_name_length_max as usize,
        );
    }

    Ok(())
}
