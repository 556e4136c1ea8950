//! Configuration for the keydex Directory Server
//!
//! Configuration lives in a TOML file generated by `keydex init`. The file
//! carries the hex-encoded signing and VRF secrets, so it must be readable
//! only by the service user.
//!
//! # Fields
//!
//! - `listen_addr` - HTTP listen address (default: "0.0.0.0:3001")
//! - `epoch_deadline_secs` - seconds between epoch cuts (default: 60)
//! - `hash_id` - registered tree hasher id (default: "sha3-256")
//! - `history_capacity` - retained STR snapshots (default: 1000)
//! - `signing_key` - hex-encoded Ed25519 secret
//! - `vrf_key` - hex-encoded VRF secret scalar
//! - `db_path` - optional SQLite path for epoch persistence
//! - `log_level` - logging level (default: "info")
//! - `log_json` - JSON log output (default: false)
//!
//! The config path comes from `--config`, falling back to the
//! `KEYDEX_CONFIG` environment variable and then `./keydex.toml`.

use std::env;
use std::path::{Path, PathBuf};

use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::hasher::{lookup_hasher, TreeHasher, DEFAULT_HASH_ID};
use crate::crypto::sign::KeyPair;
use crate::crypto::vrf;
use crate::pad::Policies;

/// Default config file name, also the `keydex init` output.
pub const DEFAULT_CONFIG_FILE: &str = "keydex.toml";

/// Environment variable naming an alternate config path.
pub const CONFIG_ENV_VAR: &str = "KEYDEX_CONFIG";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("cannot write {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Parse(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("refusing to overwrite existing file: {0}")]
    AlreadyExists(String),
}

fn default_listen_addr() -> String {
    "0.0.0.0:3001".to_string()
}

fn default_epoch_deadline() -> u64 {
    60
}

fn default_hash_id() -> String {
    DEFAULT_HASH_ID.to_string()
}

fn default_history_capacity() -> usize {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeydexConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Seconds between epoch cuts
    #[serde(default = "default_epoch_deadline")]
    pub epoch_deadline_secs: u64,

    /// Registered tree hasher id
    #[serde(default = "default_hash_id")]
    pub hash_id: String,

    /// How many STR snapshots to retain before evicting the oldest half
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Hex-encoded Ed25519 signing secret
    pub signing_key: String,

    /// Hex-encoded VRF secret scalar
    pub vrf_key: String,

    /// Optional SQLite path for epoch persistence
    #[serde(default)]
    pub db_path: Option<String>,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// JSON log output (recommended for production)
    #[serde(default)]
    pub log_json: bool,
}

impl KeydexConfig {
    /// Load and validate a config file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.as_ref().display().to_string(),
            source,
        })?;
        let config: Self = toml::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// The config path to use when none is given on the command line.
    pub fn default_path() -> PathBuf {
        env::var(CONFIG_ENV_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    /// Generate fresh keys and write a new config file into `dir`. Refuses
    /// to clobber an existing file.
    pub fn generate(dir: &Path) -> Result<(Self, PathBuf), ConfigError> {
        let path = dir.join(DEFAULT_CONFIG_FILE);
        if path.exists() {
            return Err(ConfigError::AlreadyExists(path.display().to_string()));
        }

        let signing_key = KeyPair::generate(&mut OsRng);
        let vrf_key = vrf::SecretKey::generate(&mut OsRng);
        let config = Self {
            listen_addr: default_listen_addr(),
            epoch_deadline_secs: default_epoch_deadline(),
            hash_id: default_hash_id(),
            history_capacity: default_history_capacity(),
            signing_key: hex::encode(signing_key.to_bytes()),
            vrf_key: hex::encode(vrf_key.to_bytes()),
            db_path: None,
            log_level: default_log_level(),
            log_json: false,
        };

        let raw = toml::to_string_pretty(&config).map_err(|e| ConfigError::Parse(e.to_string()))?;
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Write {
            path: dir.display().to_string(),
            source,
        })?;
        std::fs::write(&path, raw).map_err(|source| ConfigError::Write {
            path: path.display().to_string(),
            source,
        })?;
        Ok((config, path))
    }

    /// Validate field values and key material.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if lookup_hasher(&self.hash_id).is_none() {
            return Err(ConfigError::InvalidValue(
                "hash_id".into(),
                format!("unknown hasher: {}", self.hash_id),
            ));
        }
        if self.history_capacity < 2 {
            return Err(ConfigError::InvalidValue(
                "history_capacity".into(),
                "must be at least 2".into(),
            ));
        }
        if self.epoch_deadline_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "epoch_deadline_secs".into(),
                "must be positive".into(),
            ));
        }
        self.signing_keypair()?;
        self.vrf_secret()?;
        Ok(())
    }

    /// Decode the signing keypair.
    pub fn signing_keypair(&self) -> Result<KeyPair, ConfigError> {
        KeyPair::from_hex(&self.signing_key)
            .map_err(|e| ConfigError::InvalidValue("signing_key".into(), e.to_string()))
    }

    /// Decode the VRF secret.
    pub fn vrf_secret(&self) -> Result<vrf::SecretKey, ConfigError> {
        vrf::SecretKey::from_hex(&self.vrf_key)
            .map_err(|e| ConfigError::InvalidValue("vrf_key".into(), e.to_string()))
    }

    /// The tree hasher this config selects.
    pub fn hasher(&self) -> Result<TreeHasher, ConfigError> {
        lookup_hasher(&self.hash_id).ok_or_else(|| {
            ConfigError::InvalidValue("hash_id".into(), format!("unknown hasher: {}", self.hash_id))
        })
    }

    /// The signed policies the directory publishes. The epoch deadline is
    /// operational configuration and stays out of the signed record.
    pub fn policies(&self) -> Result<Policies, ConfigError> {
        Ok(Policies::new(self.hash_id.clone(), self.vrf_secret()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> KeydexConfig {
        let signing = KeyPair::generate(&mut OsRng);
        let vrf_key = vrf::SecretKey::generate(&mut OsRng);
        KeydexConfig {
            listen_addr: default_listen_addr(),
            epoch_deadline_secs: 60,
            hash_id: default_hash_id(),
            history_capacity: 10,
            signing_key: hex::encode(signing.to_bytes()),
            vrf_key: hex::encode(vrf_key.to_bytes()),
            db_path: None,
            log_level: "info".into(),
            log_json: false,
        }
    }

    #[test]
    fn test_toml_round_trip() {
        let config = valid_config();
        let raw = toml::to_string_pretty(&config).unwrap();
        let parsed: KeydexConfig = toml::from_str(&raw).unwrap();
        assert_eq!(parsed.signing_key, config.signing_key);
        assert_eq!(parsed.epoch_deadline_secs, 60);
        parsed.validate().unwrap();
    }

    #[test]
    fn test_defaults_fill_in() {
        let config = valid_config();
        let raw = format!(
            "signing_key = \"{}\"\nvrf_key = \"{}\"\n",
            config.signing_key, config.vrf_key
        );
        let parsed: KeydexConfig = toml::from_str(&raw).unwrap();
        assert_eq!(parsed.listen_addr, "0.0.0.0:3001");
        assert_eq!(parsed.history_capacity, 1000);
        assert!(parsed.db_path.is_none());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = valid_config();
        config.hash_id = "md5".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue(field, _)) if field == "hash_id"
        ));

        let mut config = valid_config();
        config.history_capacity = 1;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.signing_key = "zz".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_generate_writes_and_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let (config, path) = KeydexConfig::generate(dir.path()).unwrap();
        assert!(path.exists());
        config.validate().unwrap();

        let reloaded = KeydexConfig::load(&path).unwrap();
        assert_eq!(reloaded.signing_key, config.signing_key);

        assert!(matches!(
            KeydexConfig::generate(dir.path()),
            Err(ConfigError::AlreadyExists(_))
        ));
    }
}
