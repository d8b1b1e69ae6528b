//! Controller configuration loader.
//!
//! Parses an INI-style configuration file with `configparser`. Every key
//! is optional; missing keys fall back to the firmware defaults, so a
//! missing file and an empty file behave the same.
//!
//! ```ini
//! [protocol]
//! ack_enable = true
//! limit_checks = true
//!
//! [steppers]
//! servo_poweroff_ms = 60000
//! ```

use anyhow::{anyhow, Context, Result};
use configparser::ini::Ini;
use std::path::Path;

/// `[protocol]`: wire-behavior toggles.
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// Emit `OK` acknowledgments.
    pub ack_enable: bool,
    /// Apply the range checks to `SM` commands. Disabling trades safety
    /// for command throughput; the planner still self-corrects.
    pub limit_checks: bool,
}

/// `[steppers]`: driver and servo behavior.
#[derive(Debug, Clone)]
pub struct StepperConfig {
    /// RC-servo power-off countdown reloaded by every motion command.
    pub servo_poweroff_ms: u32,
}

/// The full parsed controller configuration.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub protocol: ProtocolConfig,
    pub steppers: StepperConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            protocol: ProtocolConfig {
                ack_enable: true,
                limit_checks: true,
            },
            steppers: StepperConfig {
                servo_poweroff_ms: 60_000,
            },
        }
    }
}

impl ControllerConfig {
    /// Loads and parses the configuration file from the given path.
    pub fn load(path: &Path) -> Result<Self> {
        let mut ini = Ini::new();
        ini.load(path)
            .map_err(|e| anyhow!(e))
            .with_context(|| format!("failed to load configuration file {path:?}"))?;

        let defaults = Self::default();
        let ack_enable = ini
            .getbool("protocol", "ack_enable")
            .map_err(|e| anyhow!(e))
            .context("[protocol] ack_enable is not a boolean")?
            .unwrap_or(defaults.protocol.ack_enable);
        let limit_checks = ini
            .getbool("protocol", "limit_checks")
            .map_err(|e| anyhow!(e))
            .context("[protocol] limit_checks is not a boolean")?
            .unwrap_or(defaults.protocol.limit_checks);
        let servo_poweroff_ms = ini
            .getuint("steppers", "servo_poweroff_ms")
            .map_err(|e| anyhow!(e))
            .context("[steppers] servo_poweroff_ms is not a number")?
            .map(u32::try_from)
            .transpose()
            .context("[steppers] servo_poweroff_ms does not fit 32 bits")?
            .unwrap_or(defaults.steppers.servo_poweroff_ms);

        Ok(Self {
            protocol: ProtocolConfig {
                ack_enable,
                limit_checks,
            },
            steppers: StepperConfig { servo_poweroff_ms },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(content: &str) -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("controller-cfg-test-{}.cfg", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let path = write_temp("[protocol]\nack_enable = false\n");
        let config = ControllerConfig::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert!(!config.protocol.ack_enable);
        assert!(config.protocol.limit_checks);
        assert_eq!(config.steppers.servo_poweroff_ms, 60_000);
    }
}
