//! Wallet configuration and persisted wallet state.
//!
//! [`WalletConfig`] is read once at startup: built-in defaults, then an
//! optional TOML file, then `VIGIL_*` environment variables.
//! [`WalletState`] is the mutable record the wallet carries between runs
//! (paired device, cached fee rates, sync height). It is loaded at start,
//! passed to whoever needs it, and saved on shutdown.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use vigil_core::constants::{DUST_THRESHOLD, GAP_LIMIT, Network};

use crate::coin_selection::SelectionStrategy;
use crate::error::WalletError;
use crate::fee::FeeLevel;

/// Environment variable prefix, e.g. `VIGIL_NETWORK=testnet`.
pub const ENV_PREFIX: &str = "VIGIL";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct WalletConfig {
    pub network: Network,
    /// Consecutive unused addresses scanned before a chain is considered done.
    pub gap_limit: u32,
    /// Change at or below this many satoshis is left to the miner.
    pub dust_threshold: u64,
    pub selection_strategy: SelectionStrategy,
    /// Root directory for state and label documents.
    pub data_dir: PathBuf,
    /// Log level filter string (e.g. "info", "vigil_wallet=debug").
    pub log_level: String,
}

impl Default for WalletConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vigil");

        Self {
            network: Network::Mainnet,
            gap_limit: GAP_LIMIT,
            dust_threshold: DUST_THRESHOLD,
            selection_strategy: SelectionStrategy::Fifo,
            data_dir,
            log_level: "info".to_string(),
        }
    }
}

impl WalletConfig {
    /// Load defaults, then `file` if given, then the process environment.
    pub fn load(file: Option<&Path>) -> Result<Self, WalletError> {
        Self::load_with_env(file, config::Environment::with_prefix(ENV_PREFIX))
    }

    fn load_with_env(
        file: Option<&Path>,
        env: config::Environment,
    ) -> Result<Self, WalletError> {
        let defaults = config::Config::try_from(&Self::default())
            .map_err(|e| WalletError::Config(e.to_string()))?;
        let mut builder = config::Config::builder().add_source(defaults);
        if let Some(path) = file {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }
        let config = builder
            .add_source(env.try_parsing(true))
            .build()
            .map_err(|e| WalletError::Config(e.to_string()))?;
        let loaded: Self = config
            .try_deserialize()
            .map_err(|e| WalletError::Config(e.to_string()))?;
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<(), WalletError> {
        if self.gap_limit == 0 {
            return Err(WalletError::Config("gap_limit must be at least 1".into()));
        }
        Ok(())
    }

    /// Path of the persisted [`WalletState`].
    pub fn state_path(&self) -> PathBuf {
        self.data_dir.join("state.json")
    }

    /// Directory of local label documents.
    pub fn labels_dir(&self) -> PathBuf {
        self.data_dir.join("labels")
    }
}

/// Explicit wallet state persisted between runs.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct WalletState {
    /// Identifier of the paired device, if any.
    pub device_id: Option<String>,
    pub device_label: Option<String>,
    /// Last fetched fee rates, sat/byte.
    pub fee_rates: BTreeMap<FeeLevel, u64>,
    /// Height up to which history has been fetched.
    pub sync_height: u64,
    pub labeling_enabled: bool,
}

impl WalletState {
    /// Read the state file, or defaults if there is none yet.
    pub fn load(path: &Path) -> Result<Self, WalletError> {
        match fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| WalletError::Serialization(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(WalletError::IoError(format!("{}: {e}", path.display()))),
        }
    }

    /// Write the state file via a temporary file and rename.
    pub fn save(&self, path: &Path) -> Result<(), WalletError> {
        let io_err = |e: std::io::Error| WalletError::IoError(format!("{}: {e}", path.display()));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| WalletError::Serialization(e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp).map_err(io_err)?;
        file.write_all(&json).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        fs::rename(&tmp, path).map_err(io_err)
    }

    pub fn fee_rate(&self, level: FeeLevel) -> Option<u64> {
        self.fee_rates.get(&level).copied()
    }

    /// Drop everything tied to the paired device.
    pub fn forget_device(&mut self) {
        *self = Self::default();
    }
}
