// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::env;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use serde::Deserialize;

/// Tunables, read from TOML in `$ACTION_SCHEDULER_CONFIG`, e.g.
///
/// ```toml
/// disconnect-timeout-ms = 10000
/// worker-stack-size = 1024
/// worker-priority = 40
/// ```
///
/// `worker-priority` is a CMSIS-RTOS2 `osPriority_t` value.
#[derive(Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
struct Config {
    disconnect_timeout_ms: u32,
    worker_stack_size: usize,
    worker_priority: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            disconnect_timeout_ms: 5000,
            worker_stack_size: 512,
            worker_priority: PRIORITY_ABOVE_NORMAL,
        }
    }
}

/// `osPriorityNormal` and `osPriorityAboveNormal`.
const PRIORITY_NORMAL: u8 = 24;
const PRIORITY_ABOVE_NORMAL: u8 = 32;
/// `osPriorityRealtime7`; `osPriorityISR` above it is reserved.
const PRIORITY_MAX: u8 = 55;

fn main() -> anyhow::Result<()> {
    let config: Config =
        build_util::config_or_default("ACTION_SCHEDULER_CONFIG")?;

    if config.worker_stack_size == 0 {
        anyhow::bail!("worker-stack-size must be nonzero");
    }
    if !(1..=PRIORITY_MAX).contains(&config.worker_priority) {
        anyhow::bail!(
            "worker-priority {} is outside 1..={PRIORITY_MAX}",
            config.worker_priority
        );
    }

    let out = PathBuf::from(env::var_os("OUT_DIR").context("OUT_DIR not set")?);
    let mut f = File::create(out.join("config.rs"))?;
    writeln!(
        f,
        "/// How long a reconnect waits for the disconnect to be confirmed."
    )?;
    writeln!(
        f,
        "pub const DISCONNECT_TIMEOUT_MS: u32 = {};",
        config.disconnect_timeout_ms
    )?;
    writeln!(f, "/// Stack to give the worker thread, in bytes.")?;
    writeln!(
        f,
        "pub const WORKER_STACK_SIZE: usize = {};",
        config.worker_stack_size
    )?;
    writeln!(
        f,
        "/// CMSIS-RTOS2 priority of the worker thread. Defaults to \
         `osPriorityAboveNormal`, so actions preempt ordinary application \
         threads."
    )?;
    writeln!(
        f,
        "pub const WORKER_PRIORITY: u8 = {};",
        config.worker_priority
    )?;
    writeln!(f, "/// `osPriorityNormal`, for comparison.")?;
    writeln!(f, "pub const PRIORITY_NORMAL: u8 = {PRIORITY_NORMAL};")?;
    Ok(())
}
