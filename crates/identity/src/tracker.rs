//! Single-use enforcement for attestation challenges.
//!
//! The tracker remembers every challenge it issued until a report answers it
//! or its time window closes. A report consumes its challenge whether or not
//! it matches, so the same nonce can never be answered twice. Answered and
//! expired nonces are kept for the life of the tracker, so a nonce is never
//! accepted twice either.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::{CryptoRng, RngCore};
use tracing::{info, warn};

use attestca_core::ChallengeConfig;

use crate::challenge::AttestationChallenge;
use crate::error::{IdentityError, IdentityResult};
use crate::report::TpmReport;

#[derive(Debug)]
struct Outstanding {
    challenge: AttestationChallenge,
    issued_at: Instant,
}

/// Why a nonce can no longer be answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Spent {
    Answered,
    Expired,
}

#[derive(Debug, Default)]
struct TrackerState {
    outstanding: HashMap<Vec<u8>, Outstanding>,
    consumed: HashMap<Vec<u8>, Spent>,
}

impl TrackerState {
    /// Retire outstanding challenges older than `ttl`.
    fn expire(&mut self, ttl: Duration) -> usize {
        let expired: Vec<Vec<u8>> = self
            .outstanding
            .iter()
            .filter(|(_, entry)| entry.issued_at.elapsed() >= ttl)
            .map(|(nonce, _)| nonce.clone())
            .collect();
        for nonce in &expired {
            self.outstanding.remove(nonce);
            self.consumed.insert(nonce.clone(), Spent::Expired);
        }
        expired.len()
    }
}

#[derive(Debug)]
pub struct ChallengeTracker {
    ttl: Duration,
    nonce_len: usize,
    default_pcr_mask: u32,
    state: Mutex<TrackerState>,
}

impl ChallengeTracker {
    pub fn new(config: &ChallengeConfig) -> Self {
        Self {
            ttl: Duration::from_millis(config.challenge_ttl_ms),
            nonce_len: config.nonce_len,
            default_pcr_mask: config.default_pcr_mask,
            state: Mutex::new(TrackerState::default()),
        }
    }

    /// Generate and record a challenge for `pcr_mask` (or the configured
    /// default mask).
    pub fn issue<R>(&self, rng: &mut R, pcr_mask: Option<u32>) -> IdentityResult<AttestationChallenge>
    where
        R: RngCore + CryptoRng + ?Sized,
    {
        let challenge = AttestationChallenge::generate(
            rng,
            self.nonce_len,
            pcr_mask.unwrap_or(self.default_pcr_mask),
        )?;
        self.track(challenge.clone())?;
        Ok(challenge)
    }

    /// Record an externally built challenge. A nonce that is already
    /// outstanding, was answered or has expired is refused.
    pub fn track(&self, challenge: AttestationChallenge) -> IdentityResult<()> {
        let nonce = challenge.nonce();
        let mut state = self.lock()?;
        state.expire(self.ttl);
        if state.outstanding.contains_key(&nonce) || state.consumed.contains_key(&nonce) {
            warn!(nonce = %challenge.nonce_hex(), "Refusing to reuse nonce");
            return Err(IdentityError::ReplayDetected {
                nonce: challenge.nonce_hex(),
            });
        }
        state.outstanding.insert(
            nonce,
            Outstanding {
                challenge,
                issued_at: Instant::now(),
            },
        );
        Ok(())
    }

    /// Consume the challenge answered by `report` and check the report
    /// against it.
    pub fn verify_report(&self, report: &TpmReport) -> IdentityResult<AttestationChallenge> {
        let nonce_hex = hex::encode(&report.nonce);
        let mut state = self.lock()?;
        state.expire(self.ttl);

        let Some(entry) = state.outstanding.remove(&report.nonce) else {
            match state.consumed.get(&report.nonce) {
                Some(Spent::Answered) => {
                    warn!(nonce = %nonce_hex, "Replayed attestation report");
                    return Err(IdentityError::ReplayDetected { nonce: nonce_hex });
                }
                Some(Spent::Expired) => {
                    warn!(nonce = %nonce_hex, "Report arrived after challenge expired");
                }
                None => warn!(nonce = %nonce_hex, "Report for unknown challenge"),
            }
            return Err(IdentityError::UnknownChallenge { nonce: nonce_hex });
        };
        state.consumed.insert(report.nonce.clone(), Spent::Answered);
        drop(state);

        if !entry.challenge.matches_report(report) {
            warn!(
                nonce = %nonce_hex,
                expected = ?entry.challenge.pcr_indices(),
                included = ?report.included_pcrs(),
                "Report does not answer its challenge"
            );
            return Err(IdentityError::ReportMismatch { nonce: nonce_hex });
        }

        info!(nonce = %nonce_hex, "Attestation report accepted");
        Ok(entry.challenge)
    }

    /// Retire expired challenges now; returns how many expired. Their nonces
    /// stay refused.
    pub fn prune(&self) -> IdentityResult<usize> {
        let expired = self.lock()?.expire(self.ttl);
        if expired > 0 {
            info!(expired, "Expired attestation challenges retired");
        }
        Ok(expired)
    }

    pub fn outstanding(&self) -> usize {
        self.lock().map(|state| state.outstanding.len()).unwrap_or(0)
    }

    /// Nonces that can no longer be issued or answered.
    pub fn consumed(&self) -> usize {
        self.lock().map(|state| state.consumed.len()).unwrap_or(0)
    }

    fn lock(&self) -> IdentityResult<std::sync::MutexGuard<'_, TrackerState>> {
        self.state
            .lock()
            .map_err(|_| IdentityError::Store("challenge tracker lock poisoned".to_string()))
    }
}
