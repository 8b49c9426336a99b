//! CLI configuration management

use anyhow::{Context, Result, anyhow};
use protocol::{DeviceIdentity, FrameFormat};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    pub camera: CameraSettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraSettings {
    /// USB vendor id shared by both boot states
    #[serde(default = "CameraSettings::default_vendor_id")]
    pub vendor_id: u16,
    /// Product id before firmware load
    #[serde(default = "CameraSettings::default_product_id_loader")]
    pub product_id_loader: u16,
    /// Product id after firmware load
    #[serde(default = "CameraSettings::default_product_id_camera")]
    pub product_id_camera: u16,
    /// Capture window width in pixels
    #[serde(default = "CameraSettings::default_side")]
    pub width: u32,
    /// Capture window height in pixels
    #[serde(default = "CameraSettings::default_side")]
    pub height: u32,
    /// Path to the firmware hex image; supports ~ expansion
    #[serde(default)]
    pub hex_path: Option<String>,
}

impl CameraSettings {
    fn default_vendor_id() -> u16 {
        DeviceIdentity::default().vendor_id
    }

    fn default_product_id_loader() -> u16 {
        DeviceIdentity::default().product_id_loader
    }

    fn default_product_id_camera() -> u16 {
        DeviceIdentity::default().product_id_camera
    }

    fn default_side() -> u32 {
        FrameFormat::default().width
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    pub level: String,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            camera: CameraSettings {
                vendor_id: CameraSettings::default_vendor_id(),
                product_id_loader: CameraSettings::default_product_id_loader(),
                product_id_camera: CameraSettings::default_product_id_camera(),
                width: CameraSettings::default_side(),
                height: CameraSettings::default_side(),
                hex_path: None,
            },
            log: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl CameraConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/lumascope/config.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: CameraConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("lumascope").join("config.toml")
        } else {
            PathBuf::from(".config/lumascope/config.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log.level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.log.level,
                valid_levels.join(", ")
            ));
        }

        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!(
                "Invalid window {}x{}, both sides must be non-zero",
                self.camera.width,
                self.camera.height
            ));
        }

        Ok(())
    }

    /// USB identity from the configured ids
    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity {
            vendor_id: self.camera.vendor_id,
            product_id_loader: self.camera.product_id_loader,
            product_id_camera: self.camera.product_id_camera,
        }
    }

    /// Frame geometry from the configured window
    pub fn format(&self) -> FrameFormat {
        FrameFormat::new(self.camera.width, self.camera.height)
    }

    /// Firmware image path with ~ expanded
    pub fn hex_path(&self) -> Option<PathBuf> {
        self.camera
            .hex_path
            .as_ref()
            .map(|p| PathBuf::from(shellexpand::tilde(p).as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_CONFIG: &str = r#"
[camera]
vendor_id = 0x04B4
product_id_loader = 0x8613
product_id_camera = 0x4720
width = 800
height = 600
hex_path = "~/firmware/lumascope.hex"

[log]
level = "debug"
"#;

    #[test]
    fn test_default_config_is_valid() {
        let config = CameraConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.log.level, "info");
        assert_eq!(config.identity(), DeviceIdentity::default());
        assert_eq!(config.format(), FrameFormat::default());
        assert!(config.hex_path().is_none());
    }

    #[test]
    fn test_full_config_parses() {
        let config: CameraConfig = toml::from_str(FULL_CONFIG).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.camera.vendor_id, 0x04B4);
        assert_eq!(config.format(), FrameFormat::new(800, 600));
        assert_eq!(config.log.level, "debug");

        // Tilde expands to something absolute-ish, never a literal ~.
        let hex = config.hex_path().unwrap();
        assert!(!hex.to_string_lossy().starts_with('~'));
        assert!(hex.to_string_lossy().ends_with("firmware/lumascope.hex"));
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: CameraConfig = toml::from_str(
            r#"
[camera]
width = 512
height = 512

[log]
level = "warn"
"#,
        )
        .unwrap();
        assert_eq!(config.camera.vendor_id, 0x04B4);
        assert_eq!(config.camera.product_id_loader, 0x8613);
        assert_eq!(config.format(), FrameFormat::square(512));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = CameraConfig::default();
        config.log.level = "noisy".to_string();
        assert!(config.validate().is_err());

        let mut config = CameraConfig::default();
        config.camera.width = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serialization_round_trip() {
        let config = CameraConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: CameraConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.camera.vendor_id, parsed.camera.vendor_id);
        assert_eq!(config.log.level, parsed.log.level);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = CameraConfig::default();
        config.camera.width = 256;
        config.save(&path).unwrap();

        let loaded = CameraConfig::load(Some(path)).unwrap();
        assert_eq!(loaded.camera.width, 256);
    }
}
