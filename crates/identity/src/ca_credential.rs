//! Certificate authority credentials.
//!
//! A CA credential is a certificate that additionally carries the subject key
//! identifier (extension 2.5.29.14). The identifier is the linking key used
//! when walking from an issued certificate up to the CA that issued it.

use std::path::Path;

use x509_parser::certificate::X509Certificate;
use x509_parser::der_parser::der::parse_der_octetstring;
use x509_parser::extensions::ParsedExtension;
use x509_parser::oid_registry::OID_X509_EXT_SUBJECT_KEY_IDENTIFIER;

use crate::certificate::{decode_pem, read_credential_file, CertificateData, BYTES_SOURCE};
use crate::error::IdentityResult;

/// Dotted OID of the subject key identifier extension.
pub const SUBJECT_KEY_IDENTIFIER_OID: &str = "2.5.29.14";

/// Name of the subject key identifier selector field.
pub const SUBJECT_KEY_IDENTIFIER_FIELD: &str = "subjectKeyIdentifier";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CaCredential {
    data: CertificateData,
    subject_key_identifier: Option<Vec<u8>>,
}

impl CaCredential {
    pub fn from_der(der: &[u8]) -> IdentityResult<Self> {
        Self::from_der_named(der, BYTES_SOURCE)
    }

    fn from_der_named(der: &[u8], source_name: &str) -> IdentityResult<Self> {
        let (data, subject_key_identifier) =
            CertificateData::parse_with(der, source_name, extract_subject_key_identifier)?;
        Ok(Self {
            data,
            subject_key_identifier,
        })
    }

    pub fn from_pem(pem: &str) -> IdentityResult<Self> {
        let der = decode_pem(pem.as_bytes(), BYTES_SOURCE)?;
        Self::from_der(&der)
    }

    pub fn from_path(path: impl AsRef<Path>) -> IdentityResult<Self> {
        let path = path.as_ref();
        let der = read_credential_file(path)?;
        Self::from_der_named(&der, &path.display().to_string())
    }

    pub fn data(&self) -> &CertificateData {
        &self.data
    }

    pub fn raw_bytes(&self) -> Vec<u8> {
        self.data.raw_bytes()
    }

    pub fn subject(&self) -> &str {
        self.data.subject()
    }

    /// Copy of the identifier value, `None` when the extension is absent.
    /// A present but empty identifier is `Some(vec![])`.
    pub fn subject_key_identifier(&self) -> Option<Vec<u8>> {
        self.subject_key_identifier.clone()
    }

    pub(crate) fn subject_key_identifier_ref(&self) -> Option<&[u8]> {
        self.subject_key_identifier.as_deref()
    }

    pub fn is_self_issued(&self) -> bool {
        let key_match = matches!(
            (self.subject_key_identifier_ref(), self.data.authority_key_identifier()),
            (Some(ski), Some(aki)) if ski == aki
        );
        key_match || self.data.subject() == self.data.issuer()
    }
}

/// Pull the identifier value out of its OCTET STRING wrapper.
fn extract_subject_key_identifier(x509: &X509Certificate<'_>) -> Result<Option<Vec<u8>>, String> {
    let ext = x509
        .tbs_certificate
        .get_extension_unique(&OID_X509_EXT_SUBJECT_KEY_IDENTIFIER)
        .map_err(|e| e.to_string())?;
    let Some(ext) = ext else {
        return Ok(None);
    };
    match ext.parsed_extension() {
        ParsedExtension::SubjectKeyIdentifier(id) => Ok(Some(id.0.to_vec())),
        _ => {
            let (_, octets) = parse_der_octetstring(ext.value)
                .map_err(|e| format!("malformed subject key identifier: {e}"))?;
            octets
                .as_slice()
                .map(|id| Some(id.to_vec()))
                .map_err(|e| format!("malformed subject key identifier: {e}"))
        }
    }
}
