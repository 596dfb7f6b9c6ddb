// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Helpers shared by the build scripts in this workspace.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::env;

/// Exposes the CPU's M-profile architecture version. This isn't available in
/// rustc's standard environment.
///
/// This will set one of `cfg(armv6m)`, `cfg(armv7m)`, or `cfg(armv8m)`
/// depending on the value of the `TARGET` environment variable. Host targets
/// get none of them, which is what the host test builds want; anything else
/// that isn't an M-profile part is an error.
pub fn expose_m_profile() -> Result<()> {
    println!("cargo::rustc-check-cfg=cfg(armv6m)");
    println!("cargo::rustc-check-cfg=cfg(armv7m)");
    println!("cargo::rustc-check-cfg=cfg(armv8m)");

    let target = env::var("TARGET").context("TARGET not set")?;
    match m_profile(&target) {
        Some(profile) => {
            println!("cargo:rustc-cfg={profile}");
            Ok(())
        }
        None if target.starts_with("thumb") => {
            anyhow::bail!("don't know the M-profile of target {target}")
        }
        None => Ok(()),
    }
}

fn m_profile(target: &str) -> Option<&'static str> {
    if target.starts_with("thumbv6m") {
        Some("armv6m")
    } else if target.starts_with("thumbv7m") || target.starts_with("thumbv7em")
    {
        Some("armv7m")
    } else if target.starts_with("thumbv8m") {
        Some("armv8m")
    } else {
        None
    }
}

/// Pulls a TOML configuration out of the environment variable `var`, or uses
/// `T::default()` if the variable is missing. If it is present but fails to
/// parse, this still fails with `Err`.
pub fn config_or_default<T: DeserializeOwned + Default>(
    var: &str,
) -> Result<T> {
    // We want to emit this whether or not the env var is present, so that we'll
    // be re-run if it becomes present.
    println!("cargo:rerun-if-env-changed={var}");

    let config = match env::var(var) {
        Ok(text) => {
            println!("--- toml for ${var} ---");
            println!("{text}");
            text
        }
        Err(_) => {
            println!("--- var ${var} not present, using default ---");
            return Ok(T::default());
        }
    };
    from_toml(&config)
}

fn from_toml<T: DeserializeOwned>(text: &str) -> Result<T> {
    toml::from_str(text).context("parsing configuration TOML")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    #[serde(rename_all = "kebab-case", default)]
    struct Knobs {
        timeout_ms: u32,
        name: Option<String>,
    }

    #[test]
    fn profiles() {
        assert_eq!(m_profile("thumbv6m-none-eabi"), Some("armv6m"));
        assert_eq!(m_profile("thumbv7em-none-eabihf"), Some("armv7m"));
        assert_eq!(m_profile("thumbv8m.main-none-eabihf"), Some("armv8m"));
        assert_eq!(m_profile("x86_64-unknown-linux-gnu"), None);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let knobs: Knobs = from_toml("timeout-ms = 250").unwrap();
        assert_eq!(
            knobs,
            Knobs {
                timeout_ms: 250,
                name: None
            }
        );
    }

    #[test]
    fn bad_toml_is_an_error() {
        assert!(from_toml::<Knobs>("timeout-ms = \"soon\"").is_err());
    }
}
