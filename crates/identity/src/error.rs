//! Error types for AttestCA identity operations.
//!
//! Every failure of credential parsing, store queries, trust-chain resolution
//! and challenge construction is surfaced through [`IdentityError`]. Callers
//! that need to pick a remediation should branch on [`IdentityError::category`].

use std::path::PathBuf;
use thiserror::Error;

/// Rule violations when building an attestation challenge.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChallengeError {
    /// No nonce supplied at all
    #[error("nonce is missing")]
    MissingNonce,

    /// Nonce shorter than the minimum length
    #[error("nonce is {len} bytes, at least {min} required")]
    NonceTooShort { len: usize, min: usize },

    /// PCR mask selects no registers
    #[error("PCR mask selects no registers")]
    ZeroMask,
}

/// Errors that can occur in identity operations.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Bytes are not a well-formed X.509 certificate
    #[error("Malformed certificate from {source_name}: {reason}")]
    Parse { source_name: String, reason: String },

    /// Credential source could not be read
    #[error("Cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Attestation challenge rejected at construction
    #[error("Challenge validation failed: {0}")]
    Validation(#[from] ChallengeError),

    /// Selector predicate on a field the certificate kind does not index
    #[error("Invalid field '{field}' for {kind}: {reason}")]
    InvalidField {
        field: String,
        kind: String,
        reason: String,
    },

    /// No CA credential in the store vouches for the certificate
    #[error("Untrusted issuer for '{subject}' (authority: {authority})")]
    UntrustedIssuer { subject: String, authority: String },

    /// Resolution revisited a certificate
    #[error("Cyclic trust chain at '{subject}'")]
    CyclicChain { subject: String },

    /// Resolution exceeded the configured depth
    #[error("Trust chain longer than {max_depth} certificates")]
    ChainTooLong { max_depth: usize },

    /// Resolution aborted by its caller
    #[error("Trust chain resolution cancelled")]
    Cancelled,

    /// Resolution exceeded its time budget
    #[error("Trust chain resolution timed out after {elapsed_ms} ms")]
    ResolutionTimeout { elapsed_ms: u64 },

    /// Single-result query matched several certificates
    #[error("Expected at most one certificate, found {count}")]
    AmbiguousResult { count: usize },

    /// Certificate store failure
    #[error("Certificate store error: {0}")]
    Store(String),

    /// Report answers a challenge that was already consumed
    #[error("Replay detected for nonce {nonce}")]
    ReplayDetected { nonce: String },

    /// Report answers a challenge that was never issued or has expired
    #[error("Unknown or expired challenge for nonce {nonce}")]
    UnknownChallenge { nonce: String },

    /// Report nonce or PCR selection differs from its challenge
    #[error("Report does not answer challenge for nonce {nonce}")]
    ReportMismatch { nonce: String },

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Core errors
    #[error("Core error: {0}")]
    Core(#[from] attestca_core::CoreError),
}

/// Coarse classification of an [`IdentityError`], one per remediation path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Fix the input
    MalformedInput,
    /// Fix access to the credential source
    Unreadable,
    /// Re-provision the trust store
    UntrustedIssuer,
    /// Investigate corrupted store data or a replay
    PolicyViolation,
    /// Fix the calling code
    InvalidQuery,
    /// Caller aborted or time budget ran out
    Aborted,
    /// Collaborator failure
    StoreFailure,
}

impl IdentityError {
    pub(crate) fn parse(source_name: impl Into<String>, reason: impl ToString) -> Self {
        Self::Parse {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Parse { .. } | Self::Validation(_) | Self::Serialization(_) => {
                ErrorCategory::MalformedInput
            }
            Self::Io { .. } => ErrorCategory::Unreadable,
            Self::UntrustedIssuer { .. } | Self::UnknownChallenge { .. } => {
                ErrorCategory::UntrustedIssuer
            }
            Self::CyclicChain { .. }
            | Self::ChainTooLong { .. }
            | Self::ReplayDetected { .. }
            | Self::ReportMismatch { .. } => ErrorCategory::PolicyViolation,
            Self::InvalidField { .. } | Self::AmbiguousResult { .. } => ErrorCategory::InvalidQuery,
            Self::Cancelled | Self::ResolutionTimeout { .. } => ErrorCategory::Aborted,
            Self::Store(_) | Self::Core(_) => ErrorCategory::StoreFailure,
        }
    }
}

/// Result type for identity operations.
pub type IdentityResult<T> = Result<T, IdentityError>;
