//! Credential trust chains and attestation challenges for the AttestCA verifier.
//!
//! This crate holds the correctness-critical half of TPM remote attestation:
//! deciding whether a device's identity credential chains up to a trusted CA,
//! and issuing the nonce/PCR-mask challenge that a device's TPM quote must
//! answer.
//!
//! # Core Concepts
//!
//! - **Certificate**: immutable parsed X.509 credential, equal by DER content
//! - **CA Credential**: certificate plus its subject key identifier
//! - **Selector**: typed `field = value` query against a certificate store
//! - **Chain Resolution**: leaf-to-anchor walk over stored CA credentials
//! - **Attestation Challenge**: validated nonce and PCR selection mask
//!
//! # Security Model
//!
//! - Nonces are at least 20 bytes and are never padded or reused
//! - Report nonces are compared without short-circuiting
//! - Chains never revisit a certificate and are bounded in length
//! - Malformed data, untrusted issuers and policy violations are distinct errors

pub mod ca_credential;
pub mod certificate;
pub mod chain;
pub mod challenge;
pub mod error;
pub mod report;
pub mod selector;
pub mod store;
pub mod tracker;

pub use ca_credential::{CaCredential, SUBJECT_KEY_IDENTIFIER_FIELD, SUBJECT_KEY_IDENTIFIER_OID};
pub use certificate::{AuthorityMaterial, Certificate, CertificateData};
pub use chain::{ChainResolver, ResolvedChain, DEFAULT_MAX_DEPTH};
pub use challenge::{AttestationChallenge, DEFAULT_NONCE_LEN, MIN_NONCE_LEN};
pub use error::{ChallengeError, ErrorCategory, IdentityError, IdentityResult};
pub use report::{pcr_indices, pcr_mask_from_indices, PcrValue, ReportType, TpmReport};
pub use selector::{CertificateKind, CertificateType, Field, FieldValue, Predicates, Selector};
pub use store::{CertificateStore, MemoryCertificateStore};
pub use tracker::ChallengeTracker;
