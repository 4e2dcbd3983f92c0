//! Trust chain resolution.
//!
//! Walks from a leaf credential to a self-issued CA credential held in a
//! [`CertificateStore`], linking each certificate to its issuer by authority
//! key identifier (matched against the issuer's subject key identifier) or,
//! when that finds nothing, by issuer name.
//!
//! The search is an explicit depth-first walk. Every certificate on the
//! current path is tracked by content hash; meeting one again is a cycle.
//! When a certificate has several candidate issuers they are tried in
//! content-hash order and the first one that reaches an anchor wins.
//! A certificate whose issuers all failed is remembered with the depth it
//! had left and is not expanded again with that much depth or less.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use attestca_core::ChainConfig;

use crate::ca_credential::CaCredential;
use crate::certificate::{AuthorityMaterial, Certificate};
use crate::error::{IdentityError, IdentityResult};
use crate::store::CertificateStore;

/// Default bound on the number of certificates in a chain.
pub const DEFAULT_MAX_DEPTH: usize = 10;

/// Certificates ordered from leaf to trust anchor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedChain {
    certificates: Vec<Certificate>,
}

impl ResolvedChain {
    pub fn certificates(&self) -> &[Certificate] {
        &self.certificates
    }

    pub fn leaf(&self) -> &Certificate {
        &self.certificates[0]
    }

    pub fn anchor(&self) -> &Certificate {
        &self.certificates[self.certificates.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Certificate> {
        self.certificates.iter()
    }

    pub fn into_certificates(self) -> Vec<Certificate> {
        self.certificates
    }
}

impl<'a> IntoIterator for &'a ResolvedChain {
    type Item = &'a Certificate;
    type IntoIter = std::slice::Iter<'a, Certificate>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// One level of the search: the untried issuers of the certificate at the
/// same position on the path.
struct Frame {
    candidates: std::vec::IntoIter<CaCredential>,
    branching: bool,
    /// Some failure below this level met a certificate on the path.
    cyclic: bool,
}

/// Resolves trust chains against a store. Holds no mutable state, so one
/// resolver can serve concurrent resolutions.
#[derive(Clone, Copy)]
pub struct ChainResolver<'s> {
    store: &'s dyn CertificateStore,
    max_depth: usize,
    timeout: Option<Duration>,
}

impl<'s> ChainResolver<'s> {
    pub fn new(store: &'s dyn CertificateStore) -> Self {
        Self {
            store,
            max_depth: DEFAULT_MAX_DEPTH,
            timeout: None,
        }
    }

    pub fn from_config(store: &'s dyn CertificateStore, config: &ChainConfig) -> Self {
        Self {
            store,
            max_depth: config.max_depth,
            timeout: config.timeout_ms.map(Duration::from_millis),
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn resolve(&self, leaf: &Certificate) -> IdentityResult<ResolvedChain> {
        self.resolve_with_cancel(leaf, &AtomicBool::new(false))
    }

    /// Resolve, aborting with [`IdentityError::Cancelled`] once `cancel` is set.
    pub fn resolve_with_cancel(&self, leaf: &Certificate, cancel: &AtomicBool) -> IdentityResult<ResolvedChain> {
        let started = Instant::now();
        let result = self.search(leaf, cancel, started);
        match &result {
            Ok(chain) => info!(
                leaf = %leaf.subject(),
                anchor = %chain.anchor().subject(),
                length = chain.len(),
                "Trust chain resolved"
            ),
            Err(e) => warn!(leaf = %leaf.subject(), error = %e, "Trust chain rejected"),
        }
        result
    }

    fn search(&self, leaf: &Certificate, cancel: &AtomicBool, started: Instant) -> IdentityResult<ResolvedChain> {
        if self.max_depth == 0 {
            return Err(IdentityError::ChainTooLong { max_depth: 0 });
        }
        if self.is_trust_anchor(leaf)? {
            return Ok(ResolvedChain {
                certificates: vec![leaf.clone()],
            });
        }

        let mut path = vec![leaf.clone()];
        let mut on_path: HashSet<[u8; 32]> = HashSet::from([*leaf.content_hash()]);
        // content hash -> depth left when every issuer was found to fail
        let mut dead: HashMap<[u8; 32], usize> = HashMap::new();
        let mut frames = vec![self.expand(leaf)?];
        let mut failure: Option<IdentityError> = None;

        while let Some(frame) = frames.last_mut() {
            self.check_abort(cancel, started)?;

            let Some(candidate) = frame.candidates.next() else {
                // Every issuer of the certificate at this level failed.
                let exhausted = frames.pop();
                let certificate = path.pop();
                if let (Some(exhausted), Some(certificate)) = (exhausted, certificate) {
                    on_path.remove(certificate.content_hash());
                    if exhausted.branching {
                        failure = Some(untrusted(&certificate));
                    }
                    if exhausted.cyclic {
                        // The failure depended on the path; another path may succeed.
                        if let Some(parent) = frames.last_mut() {
                            parent.cyclic = true;
                        }
                    } else {
                        let remaining = self.max_depth.saturating_sub(path.len());
                        dead.insert(*certificate.content_hash(), remaining);
                    }
                }
                continue;
            };

            let candidate = Certificate::from(candidate);
            let hash = *candidate.content_hash();
            if on_path.contains(&hash) {
                debug!(subject = %candidate.subject(), "Issuer already on path");
                frame.cyclic = true;
                failure = Some(IdentityError::CyclicChain {
                    subject: candidate.subject().to_string(),
                });
                continue;
            }
            let remaining = self.max_depth.saturating_sub(path.len());
            if remaining == 0 {
                failure = Some(IdentityError::ChainTooLong {
                    max_depth: self.max_depth,
                });
                continue;
            }
            if dead.get(&hash).is_some_and(|&left| left >= remaining) {
                debug!(subject = %candidate.subject(), "Issuer already ruled out");
                continue;
            }

            if candidate.is_self_issued() {
                path.push(candidate);
                return Ok(ResolvedChain { certificates: path });
            }

            match self.expand(&candidate) {
                Ok(next) => {
                    on_path.insert(hash);
                    path.push(candidate);
                    frames.push(next);
                }
                Err(e @ IdentityError::UntrustedIssuer { .. }) => {
                    dead.insert(hash, usize::MAX);
                    failure = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(failure.unwrap_or_else(|| untrusted(leaf)))
    }

    /// Issuers of `certificate`, or `UntrustedIssuer` when there are none.
    fn expand(&self, certificate: &Certificate) -> IdentityResult<Frame> {
        let mut candidates: Vec<CaCredential> = self.issuers_of(certificate)?;
        if candidates.is_empty() {
            return Err(untrusted(certificate));
        }
        candidates.sort_by(|a, b| a.data().content_hash().cmp(b.data().content_hash()));
        debug!(
            subject = %certificate.subject(),
            candidates = candidates.len(),
            "Issuer candidates found"
        );
        Ok(Frame {
            branching: candidates.len() > 1,
            candidates: candidates.into_iter(),
            cyclic: false,
        })
    }

    /// CA credentials whose subject key identifier equals the authority key
    /// identifier. Without one, or when none matches, CAs named by the
    /// issuer DN; a CA with a key identifier must match it to qualify.
    fn issuers_of(&self, certificate: &Certificate) -> IdentityResult<Vec<CaCredential>> {
        let selector = CaCredential::select(self.store);
        match certificate.authority_material() {
            AuthorityMaterial::KeyIdentifier(aki) => {
                let found = selector.clone().by_subject_key_identifier(aki).execute()?;
                if !found.is_empty() || certificate.issuer().is_empty() {
                    return Ok(found.into_iter().collect());
                }
                let by_name = selector.by_subject(certificate.issuer()).execute()?;
                Ok(by_name
                    .into_iter()
                    .filter(|ca| ca.subject_key_identifier_ref().is_none())
                    .collect())
            }
            AuthorityMaterial::IssuerName(issuer) => {
                Ok(selector.by_subject(issuer).execute()?.into_iter().collect())
            }
            AuthorityMaterial::None => Ok(Vec::new()),
        }
    }

    /// The same bytes are stored as a self-issued CA credential.
    fn is_trust_anchor(&self, certificate: &Certificate) -> IdentityResult<bool> {
        let stored = CaCredential::select(self.store)
            .by_certificate_hash(certificate.content_hash())
            .execute_one()?;
        Ok(stored.is_some_and(|ca| ca.is_self_issued()))
    }

    fn check_abort(&self, cancel: &AtomicBool, started: Instant) -> IdentityResult<()> {
        if cancel.load(Ordering::Relaxed) {
            return Err(IdentityError::Cancelled);
        }
        if let Some(timeout) = self.timeout {
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Err(IdentityError::ResolutionTimeout {
                    elapsed_ms: elapsed.as_millis() as u64,
                });
            }
        }
        Ok(())
    }
}

fn untrusted(certificate: &Certificate) -> IdentityError {
    IdentityError::UntrustedIssuer {
        subject: certificate.subject().to_string(),
        authority: certificate.authority_material().to_string(),
    }
}
