//! Attestation challenges.
//!
//! An [`AttestationChallenge`] pairs a single-use nonce with a PCR selection
//! mask. The verifier sends it to a device, the device's TPM quotes the
//! selected PCRs over the nonce, and the verifier checks the returned
//! [`TpmReport`] against the challenge with [`AttestationChallenge::matches_report`].
//!
//! Construction never repairs its input: a short nonce or an empty mask is
//! rejected, and a retry needs a freshly generated challenge.

use std::fmt;

use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use attestca_core::ChallengeConfig;

use crate::error::{ChallengeError, IdentityResult};
use crate::report::{pcr_indices, ReportType, TpmReport};

pub use attestca_core::MIN_NONCE_LEN;

/// Nonce length used when none is configured.
pub const DEFAULT_NONCE_LEN: usize = 32;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ChallengeWire", into = "ChallengeWire")]
pub struct AttestationChallenge {
    nonce: Vec<u8>,
    pcr_mask: u32,
}

/// Wire form; a missing nonce is representable here and rejected on conversion.
#[derive(Serialize, Deserialize)]
struct ChallengeWire {
    nonce: Option<Vec<u8>>,
    pcr_mask: u32,
}

impl AttestationChallenge {
    /// Build a challenge from a caller-supplied nonce, copying it.
    pub fn new(nonce: &[u8], pcr_mask: u32) -> IdentityResult<Self> {
        Self::from_parts(Some(nonce), pcr_mask)
    }

    /// Like [`new`](Self::new) but accepts an absent nonce, which is rejected.
    pub fn from_parts(nonce: Option<&[u8]>, pcr_mask: u32) -> IdentityResult<Self> {
        Ok(Self::validated(nonce, pcr_mask)?)
    }

    fn validated(nonce: Option<&[u8]>, pcr_mask: u32) -> Result<Self, ChallengeError> {
        let Some(nonce) = nonce else {
            error!("Cannot create attestation challenge without a nonce");
            return Err(ChallengeError::MissingNonce);
        };
        if nonce.len() < MIN_NONCE_LEN {
            error!(
                len = nonce.len(),
                min = MIN_NONCE_LEN,
                "Cannot create attestation challenge with a short nonce"
            );
            return Err(ChallengeError::NonceTooShort {
                len: nonce.len(),
                min: MIN_NONCE_LEN,
            });
        }
        if pcr_mask == 0 {
            error!("Cannot create attestation challenge with an all-zero PCR mask");
            return Err(ChallengeError::ZeroMask);
        }

        debug!(
            nonce = %hex::encode(nonce),
            pcr_mask = %format!("0x{pcr_mask:08x}"),
            "Attestation challenge created"
        );
        Ok(Self {
            nonce: nonce.to_vec(),
            pcr_mask,
        })
    }

    /// Draw a `nonce_len`-byte nonce from `rng`.
    pub fn generate<R>(rng: &mut R, nonce_len: usize, pcr_mask: u32) -> IdentityResult<Self>
    where
        R: RngCore + CryptoRng + ?Sized,
    {
        if nonce_len < MIN_NONCE_LEN {
            return Err(ChallengeError::NonceTooShort {
                len: nonce_len,
                min: MIN_NONCE_LEN,
            }
            .into());
        }
        let mut nonce = vec![0u8; nonce_len];
        rng.fill_bytes(&mut nonce);
        Self::new(&nonce, pcr_mask)
    }

    /// Challenge with a fresh nonce from the operating system RNG.
    pub fn random(pcr_mask: u32) -> IdentityResult<Self> {
        Self::generate(&mut OsRng, DEFAULT_NONCE_LEN, pcr_mask)
    }

    /// Challenge for the configured nonce length and default PCR mask.
    pub fn from_config<R>(rng: &mut R, config: &ChallengeConfig) -> IdentityResult<Self>
    where
        R: RngCore + CryptoRng + ?Sized,
    {
        Self::generate(rng, config.nonce_len, config.default_pcr_mask)
    }

    /// Copy of the nonce.
    pub fn nonce(&self) -> Vec<u8> {
        self.nonce.clone()
    }

    pub fn nonce_hex(&self) -> String {
        hex::encode(&self.nonce)
    }

    pub fn pcr_mask(&self) -> u32 {
        self.pcr_mask
    }

    pub fn pcr_indices(&self) -> Vec<u8> {
        pcr_indices(self.pcr_mask)
    }

    pub fn report_type(&self) -> ReportType {
        ReportType::Tpm
    }

    /// The report echoes this nonce and includes exactly the masked PCRs.
    pub fn matches_report(&self, report: &TpmReport) -> bool {
        let nonce_matches = constant_time_eq(&self.nonce, &report.nonce);
        let selection_matches = report.pcr_mask() == Some(self.pcr_mask);
        nonce_matches & selection_matches
    }
}

impl TryFrom<ChallengeWire> for AttestationChallenge {
    type Error = ChallengeError;

    fn try_from(wire: ChallengeWire) -> Result<Self, Self::Error> {
        Self::validated(wire.nonce.as_deref(), wire.pcr_mask)
    }
}

impl From<AttestationChallenge> for ChallengeWire {
    fn from(challenge: AttestationChallenge) -> Self {
        Self {
            nonce: Some(challenge.nonce),
            pcr_mask: challenge.pcr_mask,
        }
    }
}

impl fmt::Debug for AttestationChallenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttestationChallenge")
            .field("nonce", &hex::encode(&self.nonce))
            .field("pcr_mask", &format_args!("0x{:08x}", self.pcr_mask))
            .finish()
    }
}

/// Compares every byte regardless of where the first difference is.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IdentityError;
    use crate::report::PcrValue;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn report(nonce: &[u8], indices: &[u8]) -> TpmReport {
        TpmReport {
            nonce: nonce.to_vec(),
            pcrs: indices
                .iter()
                .map(|&index| PcrValue {
                    index,
                    value: vec![0xAA; 32],
                })
                .collect(),
            signature: vec![1, 2, 3],
            timestamp: 1_700_000_000,
        }
    }

    #[test]
    fn test_accepts_minimum_nonce() {
        let challenge = AttestationChallenge::new(&[7u8; 20], 0x1).unwrap();
        assert_eq!(challenge.nonce(), vec![7u8; 20]);
        assert_eq!(challenge.pcr_mask(), 0x1);
        assert_eq!(challenge.report_type(), ReportType::Tpm);
    }

    #[test]
    fn test_rejects_short_nonce() {
        let err = AttestationChallenge::new(&[7u8; 19], 0x1).unwrap_err();
        assert!(matches!(
            err,
            IdentityError::Validation(ChallengeError::NonceTooShort { len: 19, min: 20 })
        ));
    }

    #[test]
    fn test_rejects_missing_nonce() {
        let err = AttestationChallenge::from_parts(None, 0x1).unwrap_err();
        assert!(matches!(err, IdentityError::Validation(ChallengeError::MissingNonce)));
    }

    #[test]
    fn test_rejects_zero_mask() {
        let err = AttestationChallenge::new(&[7u8; 32], 0).unwrap_err();
        assert!(matches!(err, IdentityError::Validation(ChallengeError::ZeroMask)));
    }

    #[test]
    fn test_nonce_accessor_returns_copy() {
        let challenge = AttestationChallenge::new(&[7u8; 20], 0x1).unwrap();
        let mut exposed = challenge.nonce();
        exposed[0] = 0;
        assert_eq!(challenge.nonce(), vec![7u8; 20]);
    }

    #[test]
    fn test_input_buffer_is_copied() {
        let mut input = vec![9u8; 24];
        let challenge = AttestationChallenge::new(&input, 0x3).unwrap();
        input[0] = 0;
        assert_eq!(challenge.nonce()[0], 9);
    }

    #[test]
    fn test_generate_with_seeded_rng_is_deterministic() {
        let a = AttestationChallenge::generate(&mut StdRng::seed_from_u64(42), 32, 0x95).unwrap();
        let b = AttestationChallenge::generate(&mut StdRng::seed_from_u64(42), 32, 0x95).unwrap();
        let c = AttestationChallenge::generate(&mut StdRng::seed_from_u64(43), 32, 0x95).unwrap();

        assert_eq!(a, b);
        assert_ne!(a.nonce(), c.nonce());
        assert_eq!(a.nonce().len(), 32);
    }

    #[test]
    fn test_generate_never_pads_short_length() {
        let err = AttestationChallenge::generate(&mut StdRng::seed_from_u64(1), 16, 0x95).unwrap_err();
        assert!(matches!(
            err,
            IdentityError::Validation(ChallengeError::NonceTooShort { len: 16, .. })
        ));
    }

    #[test]
    fn test_random_uses_default_length() {
        let challenge = AttestationChallenge::random(0x95).unwrap();
        assert_eq!(challenge.nonce().len(), DEFAULT_NONCE_LEN);
        assert_eq!(challenge.pcr_indices(), vec![0, 2, 4, 7]);
    }

    #[test]
    fn test_from_config() {
        let config = ChallengeConfig {
            nonce_len: 40,
            default_pcr_mask: 0x3,
            challenge_ttl_ms: 1_000,
        };
        let challenge =
            AttestationChallenge::from_config(&mut StdRng::seed_from_u64(5), &config).unwrap();
        assert_eq!(challenge.nonce().len(), 40);
        assert_eq!(challenge.pcr_mask(), 0x3);
    }

    #[test]
    fn test_matches_report() {
        let nonce = [0x5Au8; 20];
        let challenge = AttestationChallenge::new(&nonce, 0x95).unwrap();

        assert!(challenge.matches_report(&report(&nonce, &[0, 2, 4, 7])));
        assert!(challenge.matches_report(&report(&nonce, &[7, 4, 2, 0])));
    }

    #[test]
    fn test_report_with_wrong_nonce_rejected() {
        let nonce = [0x5Au8; 20];
        let challenge = AttestationChallenge::new(&nonce, 0x95).unwrap();

        let mut other = nonce;
        other[19] ^= 1;
        assert!(!challenge.matches_report(&report(&other, &[0, 2, 4, 7])));
        assert!(!challenge.matches_report(&report(&nonce[..19], &[0, 2, 4, 7])));
    }

    #[test]
    fn test_report_with_wrong_selection_rejected() {
        let nonce = [0x5Au8; 20];
        let challenge = AttestationChallenge::new(&nonce, 0x95).unwrap();

        // missing PCR 7
        assert!(!challenge.matches_report(&report(&nonce, &[0, 2, 4])));
        // extra PCR 1
        assert!(!challenge.matches_report(&report(&nonce, &[0, 1, 2, 4, 7])));
        // out of mask range
        assert!(!challenge.matches_report(&report(&nonce, &[0, 2, 4, 7, 40])));
    }

    #[test]
    fn test_serde_round_trip_and_validation() {
        let challenge = AttestationChallenge::new(&[3u8; 20], 0x95).unwrap();
        let json = serde_json::to_string(&challenge).unwrap();
        let back: AttestationChallenge = serde_json::from_str(&json).unwrap();
        assert_eq!(back, challenge);

        assert!(serde_json::from_str::<AttestationChallenge>(r#"{"nonce":null,"pcr_mask":1}"#).is_err());
        assert!(serde_json::from_str::<AttestationChallenge>(r#"{"nonce":[1,2,3],"pcr_mask":1}"#).is_err());
    }

    #[test]
    fn test_debug_shows_hex() {
        let challenge = AttestationChallenge::new(&[0xABu8; 20], 0x95).unwrap();
        let debug = format!("{challenge:?}");
        assert!(debug.contains("abababab"));
        assert!(debug.contains("0x00000095"));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
        assert!(constant_time_eq(b"", b""));
    }

    proptest! {
        #[test]
        fn short_nonces_always_rejected(
            nonce in prop::collection::vec(any::<u8>(), 0..MIN_NONCE_LEN),
            mask in any::<u32>(),
        ) {
            prop_assert!(AttestationChallenge::new(&nonce, mask).is_err());
        }

        #[test]
        fn zero_mask_always_rejected(nonce in prop::collection::vec(any::<u8>(), MIN_NONCE_LEN..64)) {
            let err = AttestationChallenge::new(&nonce, 0).unwrap_err();
            prop_assert!(matches!(err, IdentityError::Validation(ChallengeError::ZeroMask)));
        }

        #[test]
        fn valid_inputs_accepted(
            nonce in prop::collection::vec(any::<u8>(), MIN_NONCE_LEN..64),
            mask in 1u32..,
        ) {
            let challenge = AttestationChallenge::new(&nonce, mask).unwrap();
            prop_assert_eq!(challenge.nonce(), nonce);
            prop_assert_eq!(challenge.pcr_mask(), mask);
        }

        #[test]
        fn report_matches_iff_nonce_and_selection_match(
            nonce in prop::collection::vec(any::<u8>(), MIN_NONCE_LEN..40),
            mask in 1u32..,
            report_mask in any::<u32>(),
            flip in any::<bool>(),
        ) {
            let challenge = AttestationChallenge::new(&nonce, mask).unwrap();
            let mut report_nonce = nonce.clone();
            if flip {
                report_nonce[0] ^= 0xFF;
            }
            let candidate = report(&report_nonce, &pcr_indices(report_mask));
            prop_assert_eq!(
                challenge.matches_report(&candidate),
                !flip && report_mask == mask
            );
        }
    }
}
