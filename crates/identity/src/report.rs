//! TPM report structures returned by an attested device.
//!
//! Signature material is carried but not verified here.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Number of PCRs addressable by a 32-bit selection mask.
pub const PCR_MASK_BITS: u8 = 32;

/// Kind of report a challenge asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportType {
    Tpm,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PcrValue {
    pub index: u8,
    pub value: Vec<u8>,
}

/// Quote produced by a device in answer to an attestation challenge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TpmReport {
    /// Nonce echoed from the challenge
    pub nonce: Vec<u8>,
    pub pcrs: Vec<PcrValue>,
    /// Quote signature (DER)
    pub signature: Vec<u8>,
    /// Unix seconds at which the device produced the quote
    pub timestamp: u64,
}

impl TpmReport {
    /// Indices of the PCRs present in the report.
    pub fn included_pcrs(&self) -> BTreeSet<u8> {
        self.pcrs.iter().map(|pcr| pcr.index).collect()
    }

    /// Mask equivalent of [`included_pcrs`](Self::included_pcrs), `None` if
    /// an index does not fit a 32-bit mask.
    pub fn pcr_mask(&self) -> Option<u32> {
        pcr_mask_from_indices(self.pcrs.iter().map(|pcr| pcr.index))
    }

    pub fn pcr(&self, index: u8) -> Option<&PcrValue> {
        self.pcrs.iter().find(|pcr| pcr.index == index)
    }
}

/// Build a selection mask from PCR indices.
pub fn pcr_mask_from_indices<I: IntoIterator<Item = u8>>(indices: I) -> Option<u32> {
    indices.into_iter().try_fold(0u32, |mask, index| {
        (index < PCR_MASK_BITS).then(|| mask | (1u32 << index))
    })
}

/// PCR indices selected by `mask`, ascending.
pub fn pcr_indices(mask: u32) -> Vec<u8> {
    (0..PCR_MASK_BITS).filter(|i| mask & (1u32 << i) != 0).collect()
}
