/// `config.rs` - runtime configuration
///
/// Loaded once at startup from a JSON file named by `SCRIPT_BRIDGE_CONFIG`.
/// Every field has a default so a partial (or missing) file is fine.
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};

pub const CONFIG_ENV: &str = "SCRIPT_BRIDGE_CONFIG";

/// Flash page granularity the script capacity must be a multiple of.
pub const STORAGE_PAGE_SIZE: usize = 0x400;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Fixed capacity of the single script buffer, in bytes.
    pub script_capacity: usize,
    /// Largest raw payload sent over the host link in one go.
    pub link_chunk_size: usize,
    /// File standing in for the reserved flash region.
    pub flash_path: PathBuf,
    pub engine: EngineConfig,
    pub hardware: HardwareConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            script_capacity: 0x4000,
            link_chunk_size: 0x200,
            flash_path: PathBuf::from("user_script.bin"),
            engine: EngineConfig::default(),
            hardware: HardwareConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on Lua heap usage. `None` leaves the allocator unbounded.
    pub memory_limit: Option<usize>,
    /// Metronomes reserved for internal use ahead of the user-visible ones.
    pub metro_reserved: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            memory_limit: None,
            metro_reserved: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    pub outputs: usize,
    pub inputs: usize,
    pub user_metros: usize,
    /// Period of the main loop tick that drives the hardware simulation.
    pub tick_ms: u64,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            outputs: 4,
            inputs: 2,
            user_metros: 8,
            tick_ms: 2,
        }
    }
}

impl BridgeConfig {
    /// Read and validate a JSON config file.
    pub fn load(path: &Path) -> BridgeResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: BridgeConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Config from the file named in `SCRIPT_BRIDGE_CONFIG`, or defaults.
    pub fn from_env() -> BridgeResult<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> BridgeResult<()> {
        if self.script_capacity == 0 || self.script_capacity % STORAGE_PAGE_SIZE != 0 {
            return Err(BridgeError::Config(format!(
                "script_capacity {} is not a non-zero multiple of {STORAGE_PAGE_SIZE}",
                self.script_capacity
            )));
        }
        // Stored scripts carry a 16-bit length.
        if self.script_capacity > u16::MAX as usize {
            return Err(BridgeError::Config(format!(
                "script_capacity {} exceeds the 16-bit length limit",
                self.script_capacity
            )));
        }
        if self.link_chunk_size == 0 {
            return Err(BridgeError::Config("link_chunk_size must be non-zero".into()));
        }
        if self.hardware.tick_ms == 0 {
            return Err(BridgeError::Config("hardware.tick_ms must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = BridgeConfig::default();
        config.validate().unwrap();
        assert_eq!(config.link_chunk_size, 512);
        assert_eq!(config.engine.metro_reserved, 2);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "link_chunk_size": 64, "engine": {{ "memory_limit": 65536 }} }}"#)
            .unwrap();
        let config = BridgeConfig::load(file.path()).unwrap();
        assert_eq!(config.link_chunk_size, 64);
        assert_eq!(config.engine.memory_limit, Some(65536));
        assert_eq!(config.engine.metro_reserved, 2);
        assert_eq!(config.script_capacity, 0x4000);
    }

    #[test]
    fn rejects_capacity_off_page_boundary() {
        let config = BridgeConfig {
            script_capacity: 1000,
            ..BridgeConfig::default()
        };
        assert!(matches!(config.validate(), Err(BridgeError::Config(_))));
    }

    #[test]
    fn rejects_capacity_beyond_length_field() {
        let config = BridgeConfig {
            script_capacity: 0x10400,
            ..BridgeConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
