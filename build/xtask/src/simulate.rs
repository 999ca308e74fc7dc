// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use build_ukconfig::Config;
use ukern::Session;

pub fn run(
    cfg: &Path,
    ticks: u64,
    start: &[String],
    terminate: &[String],
) -> Result<()> {
    let toml = Config::from_file(cfg)?;
    let session = Session::start(toml.kernel_config()?)
        .with_context(|| format!("starting session for '{}'", toml.name))?;
    let mut sched = session.scheduler()?;

    for name in start {
        let asid = toml.asid(name)?;
        sched
            .instantiate(asid)
            .with_context(|| format!("starting '{name}'"))?;
    }

    for name in terminate {
        let asid = toml.asid(name)?;
        let id = sched
            .find(asid)
            .ok_or_else(|| anyhow!("'{name}' has no live ukProc"))?;
        sched.request_termination(id)?;
    }

    sched.schedule();

    let mut usage = vec![0u64; session.store().len()];
    let mut idle = 0u64;
    for tick in 1..=ticks {
        let overruns = sched
            .tick()
            .with_context(|| format!("session stopped at systick {tick}"))?;
        for t in overruns {
            println!("systick {tick}: {t}");
        }
        match sched.current().and_then(|id| sched.proc(id)) {
            Some(p) => usage[p.asid().index()] += 1,
            None => idle += 1,
        }
    }

    println!("{}: {} systicks", toml.name, ticks);
    for (asid, app) in session.store().iter() {
        let state = match sched.find(asid).and_then(|id| sched.state(id)) {
            Some(s) => format!("{s:?}"),
            None => "-".to_string(),
        };
        println!(
            "  {:<width$} {:>8} systicks  {}",
            app.name,
            usage[asid.index()],
            state,
            width = session.options().ukapp_name_length_max as usize,
        );
    }
    println!(
        "  {:<width$} {:>8} systicks",
        "(idle)",
        idle,
        width = session.options().ukapp_name_length_max as usize,
    );

    Ok(())
}
