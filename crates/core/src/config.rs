//! Configuration management for AttestCA.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};

/// Smallest nonce length a verifier may be configured with.
pub const MIN_NONCE_LEN: usize = 20;

/// PCRs 0, 2, 4 and 7 (firmware, option ROM, boot loader, secure boot policy).
pub const DEFAULT_PCR_MASK: u32 = 0x0000_0095;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub chain: ChainConfig,
    pub challenge: ChallengeConfig,
    pub trust_store: TrustStoreConfig,
    pub logging: LoggingConfig,
}

/// Limits applied while resolving a certificate trust chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Maximum number of certificates in a resolved chain, leaf and anchor included
    pub max_depth: usize,
    /// Abort a resolution that runs longer than this
    pub timeout_ms: Option<u64>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            max_depth: 10,
            timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChallengeConfig {
    pub nonce_len: usize,
    pub default_pcr_mask: u32,
    /// How long an issued challenge stays answerable
    pub challenge_ttl_ms: u64,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            nonce_len: 32,
            default_pcr_mask: DEFAULT_PCR_MASK,
            challenge_ttl_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustStoreConfig {
    /// Directory of DER or PEM encoded CA credentials
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub json: bool,
}

impl Config {
    /// Load and validate a TOML configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_config() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.chain.max_depth == 0 {
            return Err(CoreError::Config(
                "chain.max_depth must be at least 1".to_string(),
            ));
        }
        if self.challenge.nonce_len < MIN_NONCE_LEN {
            return Err(CoreError::Config(format!(
                "challenge.nonce_len must be at least {MIN_NONCE_LEN} bytes, got {}",
                self.challenge.nonce_len
            )));
        }
        if self.challenge.default_pcr_mask == 0 {
            return Err(CoreError::Config(
                "challenge.default_pcr_mask must select at least one PCR".to_string(),
            ));
        }
        Ok(())
    }
}
