//! Core functionality for the AttestCA attestation verifier.
//!
//! This crate provides the configuration, logging and error plumbing shared
//! across the AttestCA workspace.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{
    ChainConfig, ChallengeConfig, Config, LoggingConfig, TrustStoreConfig, DEFAULT_PCR_MASK,
    MIN_NONCE_LEN,
};
pub use error::{CoreError, Result};
