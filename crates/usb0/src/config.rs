//! usb0 backend configuration

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::driver::MAX_SLOTS;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usb0Config {
    /// Upper bound of the slot scan range. Slot 0 is reserved, so the scan
    /// covers `1..max_slots`.
    #[serde(default = "default_max_slots")]
    pub max_slots: u16,
    /// Directory holding the per-slot device nodes (device-node driver
    /// binding only).
    #[serde(default = "default_node_dir")]
    pub node_dir: PathBuf,
    /// Driver-side timeout for synchronous control requests, in
    /// milliseconds. 0 = no timeout.
    #[serde(default = "default_control_timeout_ms")]
    pub control_timeout_ms: u32,
}

fn default_max_slots() -> u16 {
    MAX_SLOTS
}

fn default_node_dir() -> PathBuf {
    PathBuf::from("/dev")
}

fn default_control_timeout_ms() -> u32 {
    5000
}

impl Default for Usb0Config {
    fn default() -> Self {
        Self {
            max_slots: default_max_slots(),
            node_dir: default_node_dir(),
            control_timeout_ms: default_control_timeout_ms(),
        }
    }
}

impl Usb0Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.max_slots < 2 || self.max_slots > MAX_SLOTS {
            return Err(anyhow!(
                "max_slots must be in 2..={} (got {})",
                MAX_SLOTS,
                self.max_slots
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Usb0Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_slots, MAX_SLOTS);
    }

    #[test]
    fn test_parse_partial_config_uses_defaults() {
        let config: Usb0Config = toml::from_str("max_slots = 16").unwrap();
        assert_eq!(config.max_slots, 16);
        assert_eq!(config.node_dir, PathBuf::from("/dev"));
        assert_eq!(config.control_timeout_ms, 5000);
    }

    #[test]
    fn test_validate_rejects_out_of_range_max_slots() {
        let config = Usb0Config {
            max_slots: 1,
            ..Usb0Config::default()
        };
        assert!(config.validate().is_err());

        let config = Usb0Config {
            max_slots: MAX_SLOTS + 1,
            ..Usb0Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usb0.toml");
        fs::write(
            &path,
            "max_slots = 32\nnode_dir = \"/dev/usb0\"\ncontrol_timeout_ms = 250\n",
        )
        .unwrap();

        let config = Usb0Config::load(&path).unwrap();
        assert_eq!(config.max_slots, 32);
        assert_eq!(config.node_dir, PathBuf::from("/dev/usb0"));
        assert_eq!(config.control_timeout_ms, 250);
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usb0.toml");
        fs::write(&path, "max_slots = 1\n").unwrap();
        assert!(Usb0Config::load(&path).is_err());
    }
}
