// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

mod check;
mod simulate;

#[derive(Debug, Parser)]
#[clap(
    max_term_width = 80,
    about = "extra tasks to help you work on ukernel configurations"
)]
enum Xtask {
    /// Loads a configuration and runs the full session startup over it,
    /// reporting the first problem found.
    Check {
        /// Path to the image configuration file, in TOML.
        cfg: PathBuf,
    },

    /// Starts a session from a configuration and runs its scheduler for a
    /// number of systicks, with every ukProc using all the CPU it is given.
    Simulate {
        /// Number of systicks to run for.
        #[clap(long, default_value_t = 100)]
        ticks: u64,
        /// Also instantiate these ukApps, in addition to those started at
        /// boot.
        #[clap(long)]
        start: Vec<String>,
        /// Request termination of these ukApps on the first systick. They
        /// never report cleanup done, so they run out their cleanup quantum.
        #[clap(long)]
        terminate: Vec<String>,
        /// Path to the image configuration file, in TOML.
        cfg: PathBuf,
    },
}

fn main() -> Result<()> {
    let env = env_logger::Env::default().filter_or("RUST_LOG", "info");

    env_logger::init_from_env(env);

    let xtask = Xtask::parse();

    match xtask {
        Xtask::Check { cfg } => {
            check::run(&cfg)?;
        }
        Xtask::Simulate {
            ticks,
            start,
            terminate,
            cfg,
        } => {
            simulate::run(&cfg, ticks, &start, &terminate)?;
        }
    }

    Ok(())
}
