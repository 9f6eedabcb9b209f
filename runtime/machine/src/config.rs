//! Machine configuration
//!
//! Loaded from TOML. Every field has a default so a config file only needs
//! to name the kernel and device tree:
//!
//! ```toml
//! kernel = "kernelcache.research.iphone12b"
//! device_tree = "DeviceTree.n104ap.im4p.out"
//! ramdisk = "ramdisk.dmg"
//! cmdline = "debug=0x8 kextlog=0xfff cpus=1 rd=md0"
//! framebuffer = "on"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use t8030_boot_layout::{BootSources, LayoutConfig, BOOT_LINE_LENGTH};
use t8030_cpu::MAX_CPU;

use crate::{MachineError, Result};

/// Default guest RAM (2GB)
pub const DEFAULT_RAM_SIZE: u64 = 0x8000_0000;

pub const DEFAULT_TRUST_CACHE: &str = "trustcache.T8030";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MachineConfig {
    /// Mach-O kernel image
    pub kernel: PathBuf,

    /// Flattened XNU device tree
    pub device_tree: PathBuf,

    pub trust_cache: PathBuf,

    /// Optional ramdisk; an empty path means none
    pub ramdisk: Option<PathBuf>,

    /// Kernel command line
    pub cmdline: String,

    /// Boot framebuffer, `"on"` or `"off"`
    pub framebuffer: String,

    /// Number of application cores
    pub cpus: usize,

    /// Guest RAM in bytes
    pub ram_size: u64,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            kernel: PathBuf::new(),
            device_tree: PathBuf::new(),
            trust_cache: PathBuf::from(DEFAULT_TRUST_CACHE),
            ramdisk: None,
            cmdline: String::new(),
            framebuffer: "off".to_string(),
            cpus: 1,
            ram_size: DEFAULT_RAM_SIZE,
        }
    }
}

impl MachineConfig {
    /// Parse a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Read and parse a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| MachineError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        log::info!("Loaded machine configuration from {}", path.display());
        Ok(config)
    }

    /// Check the values that cannot be caught by deserialisation
    ///
    /// # Errors
    /// Returns `Config` for a missing kernel or device tree path, a core
    /// count outside `1..=6`, or a command line longer than 607 bytes
    pub fn validate(&self) -> Result<()> {
        if self.kernel.as_os_str().is_empty() {
            return Err(MachineError::Config("kernel image path is required".into()));
        }
        if self.device_tree.as_os_str().is_empty() {
            return Err(MachineError::Config("device tree path is required".into()));
        }
        if self.cpus == 0 || self.cpus > MAX_CPU {
            return Err(MachineError::Config(format!(
                "cpus must be between 1 and {}, got {}",
                MAX_CPU, self.cpus
            )));
        }
        if self.cmdline.len() >= BOOT_LINE_LENGTH {
            return Err(MachineError::Config(format!(
                "command line is {} bytes, limit is {}",
                self.cmdline.len(),
                BOOT_LINE_LENGTH - 1
            )));
        }
        Ok(())
    }

    /// Whether the boot framebuffer is enabled
    ///
    /// Values other than `"on"` and `"off"` are reported and treated as off.
    pub fn framebuffer_enabled(&self) -> bool {
        match self.framebuffer.as_str() {
            "on" => true,
            "off" => false,
            other => {
                log::warn!("Invalid framebuffer value '{}', expected on/off; disabling", other);
                false
            }
        }
    }

    /// Ramdisk path, treating an empty path as absent
    pub fn ramdisk_path(&self) -> Option<&Path> {
        self.ramdisk
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
    }

    pub fn boot_sources(&self) -> BootSources {
        BootSources {
            kernel: self.kernel.clone(),
            trust_cache: self.trust_cache.clone(),
            ramdisk: self.ramdisk_path().map(Path::to_path_buf),
        }
    }

    pub fn layout_config(&self) -> LayoutConfig {
        LayoutConfig {
            ram_size: self.ram_size,
            cmdline: self.cmdline.clone(),
            framebuffer: self.framebuffer_enabled(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> MachineConfig {
        MachineConfig::from_toml_str(
            r#"
            kernel = "kernelcache"
            device_tree = "devicetree"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = minimal();
        assert_eq!(config.trust_cache, PathBuf::from("trustcache.T8030"));
        assert_eq!(config.cpus, 1);
        assert_eq!(config.ram_size, 0x8000_0000);
        assert!(!config.framebuffer_enabled());
        assert!(config.ramdisk_path().is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_full_document() {
        let config = MachineConfig::from_toml_str(
            r#"
            kernel = "kernelcache"
            device_tree = "devicetree"
            trust_cache = "tc.bin"
            ramdisk = "ramdisk.dmg"
            cmdline = "debug=0x8"
            framebuffer = "on"
            cpus = 6
            ram_size = 0x100000000
            "#,
        )
        .unwrap();

        config.validate().unwrap();
        assert!(config.framebuffer_enabled());
        assert_eq!(config.ram_size, 0x1_0000_0000);
        assert_eq!(config.boot_sources().ramdisk, Some(PathBuf::from("ramdisk.dmg")));
        assert_eq!(config.layout_config().cmdline, "debug=0x8");
    }

    #[test]
    fn test_empty_ramdisk_is_none() {
        let mut config = minimal();
        config.ramdisk = Some(PathBuf::new());
        assert!(config.ramdisk_path().is_none());
        assert!(config.boot_sources().ramdisk.is_none());
    }

    #[test]
    fn test_invalid_framebuffer_value() {
        let mut config = minimal();
        config.framebuffer = "yes".to_string();
        assert!(!config.framebuffer_enabled());
        assert!(!config.layout_config().framebuffer);
    }

    #[test]
    fn test_validation() {
        let mut config = minimal();
        config.cpus = 0;
        assert!(matches!(config.validate(), Err(MachineError::Config(_))));
        config.cpus = 7;
        assert!(matches!(config.validate(), Err(MachineError::Config(_))));
        config.cpus = 6;
        config.cmdline = "c".repeat(607);
        assert!(config.validate().is_ok());
        config.cmdline.push('c');
        assert!(matches!(config.validate(), Err(MachineError::Config(_))));

        let mut config = minimal();
        config.kernel = PathBuf::new();
        assert!(matches!(config.validate(), Err(MachineError::Config(_))));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = MachineConfig::from_toml_str("kernal = \"typo\"");
        assert!(matches!(result, Err(MachineError::ConfigParse(_))));
    }
}
