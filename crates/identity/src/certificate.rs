//! Parsed, immutable X.509 credentials with content-based identity.
//!
//! A [`Certificate`] is either a plain credential or a [`CaCredential`]; both
//! share a [`CertificateData`] core holding the DER bytes and the fields that
//! were extracted once at parse time. Two credentials are equal exactly when
//! their DER bytes are equal (and, for CA credentials, their subject key
//! identifiers are equal, which the bytes already imply).

use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::Arc;

use tracing::debug;
use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::ParsedExtension;
use x509_parser::oid_registry::OID_X509_EXT_AUTHORITY_KEY_IDENTIFIER;
use x509_parser::prelude::FromDer;

use crate::ca_credential::CaCredential;
use crate::error::{IdentityError, IdentityResult};
use crate::selector::{Field, FieldValue};

/// Source label used in errors for in-memory input.
pub(crate) const BYTES_SOURCE: &str = "<bytes>";

const PEM_ARMOR: &[u8] = b"-----BEGIN";

/// Fields shared by every credential variant.
#[derive(Clone)]
pub struct CertificateData {
    der: Arc<[u8]>,
    content_hash: [u8; 32],
    subject: String,
    issuer: String,
    serial_number: Vec<u8>,
    not_before: i64,
    not_after: i64,
    authority_key_identifier: Option<Vec<u8>>,
}

impl CertificateData {
    /// Parse `der` and hand the decoded certificate to `extract` for
    /// variant-specific fields. Nothing is returned unless both succeed.
    pub(crate) fn parse_with<E, F>(der: &[u8], source_name: &str, extract: F) -> IdentityResult<(Self, E)>
    where
        F: FnOnce(&X509Certificate<'_>) -> Result<E, String>,
    {
        let (rest, x509) = X509Certificate::from_der(der)
            .map_err(|e| IdentityError::parse(source_name, e))?;
        if !rest.is_empty() {
            return Err(IdentityError::parse(
                source_name,
                format!("{} trailing bytes after certificate", rest.len()),
            ));
        }

        let authority_key_identifier =
            extract_authority_key_identifier(&x509).map_err(|e| IdentityError::parse(source_name, e))?;
        let extra = extract(&x509).map_err(|e| IdentityError::parse(source_name, e))?;

        let validity = x509.validity();
        let data = Self {
            der: Arc::from(der),
            content_hash: *blake3::hash(der).as_bytes(),
            subject: x509.subject().to_string(),
            issuer: x509.issuer().to_string(),
            serial_number: x509.tbs_certificate.raw_serial().to_vec(),
            not_before: validity.not_before.timestamp(),
            not_after: validity.not_after.timestamp(),
            authority_key_identifier,
        };
        debug!(
            subject = %data.subject,
            issuer = %data.issuer,
            hash = %hex::encode(data.content_hash),
            "Parsed certificate"
        );
        Ok((data, extra))
    }

    /// Copy of the DER encoding this credential was parsed from.
    pub fn raw_bytes(&self) -> Vec<u8> {
        self.der.to_vec()
    }

    /// BLAKE3 digest of the DER encoding.
    pub fn content_hash(&self) -> &[u8; 32] {
        &self.content_hash
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Serial number as big-endian bytes.
    pub fn serial_number(&self) -> &[u8] {
        &self.serial_number
    }

    /// Start of the validity window (Unix seconds).
    pub fn not_before(&self) -> i64 {
        self.not_before
    }

    /// End of the validity window (Unix seconds).
    pub fn not_after(&self) -> i64 {
        self.not_after
    }

    pub fn is_valid_at(&self, unix_secs: i64) -> bool {
        self.not_before <= unix_secs && unix_secs <= self.not_after
    }

    /// Key identifier from the authority key identifier extension, if any.
    pub fn authority_key_identifier(&self) -> Option<&[u8]> {
        self.authority_key_identifier.as_deref()
    }

    /// Raw `extnValue` octets of the extension with dotted `oid`, or `None`
    /// when the certificate does not carry it.
    pub fn extension_value(&self, oid: &str) -> Option<Vec<u8>> {
        // The bytes were validated at construction, a failure here cannot occur.
        let (_, x509) = X509Certificate::from_der(&self.der).ok()?;
        x509.extensions()
            .iter()
            .find(|ext| ext.oid.to_id_string() == oid)
            .map(|ext| ext.value.to_vec())
    }
}

impl PartialEq for CertificateData {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}

impl Eq for CertificateData {}

impl Hash for CertificateData {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.der.hash(state);
    }
}

impl fmt::Debug for CertificateData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateData")
            .field("subject", &self.subject)
            .field("issuer", &self.issuer)
            .field("serial_number", &hex::encode(&self.serial_number))
            .field("content_hash", &hex::encode(self.content_hash))
            .finish()
    }
}

fn extract_authority_key_identifier(x509: &X509Certificate<'_>) -> Result<Option<Vec<u8>>, String> {
    let ext = x509
        .tbs_certificate
        .get_extension_unique(&OID_X509_EXT_AUTHORITY_KEY_IDENTIFIER)
        .map_err(|e| e.to_string())?;
    let Some(ext) = ext else {
        return Ok(None);
    };
    match ext.parsed_extension() {
        ParsedExtension::AuthorityKeyIdentifier(aki) => {
            Ok(aki.key_identifier.as_ref().map(|id| id.0.to_vec()))
        }
        _ => Err("malformed authority key identifier extension".to_string()),
    }
}

/// Read a credential file, decoding PEM armour when present.
pub(crate) fn read_credential_file(path: &Path) -> IdentityResult<Vec<u8>> {
    let content = std::fs::read(path).map_err(|source| IdentityError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let trimmed = content.trim_ascii_start();
    if trimmed.starts_with(PEM_ARMOR) {
        decode_pem(trimmed, &path.display().to_string())
    } else {
        Ok(content)
    }
}

pub(crate) fn decode_pem(input: &[u8], source_name: &str) -> IdentityResult<Vec<u8>> {
    let (_, pem) = x509_parser::pem::parse_x509_pem(input)
        .map_err(|e| IdentityError::parse(source_name, e))?;
    if pem.label != "CERTIFICATE" {
        return Err(IdentityError::parse(
            source_name,
            format!("unexpected PEM label '{}'", pem.label),
        ));
    }
    Ok(pem.contents)
}

/// Data on a certificate that names its issuer, strongest form first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorityMaterial<'a> {
    KeyIdentifier(&'a [u8]),
    IssuerName(&'a str),
    None,
}

impl fmt::Display for AuthorityMaterial<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyIdentifier(id) => write!(f, "keyid:{}", hex::encode(id)),
            Self::IssuerName(name) => write!(f, "issuer:{name}"),
            Self::None => f.write_str("<none>"),
        }
    }
}

/// A parsed credential, tagged by variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Certificate {
    Plain(CertificateData),
    CaCredential(CaCredential),
}

impl Certificate {
    /// Parse a DER-encoded certificate.
    pub fn from_der(der: &[u8]) -> IdentityResult<Self> {
        Self::from_der_named(der, BYTES_SOURCE)
    }

    fn from_der_named(der: &[u8], source_name: &str) -> IdentityResult<Self> {
        let (data, ()) = CertificateData::parse_with(der, source_name, |_| Ok(()))?;
        Ok(Self::Plain(data))
    }

    /// Parse a PEM-armoured certificate; raw bytes are the decoded DER.
    pub fn from_pem(pem: &str) -> IdentityResult<Self> {
        let der = decode_pem(pem.as_bytes(), BYTES_SOURCE)?;
        Self::from_der(&der)
    }

    /// Read and parse the certificate file at `path` (DER or PEM).
    pub fn from_path(path: impl AsRef<Path>) -> IdentityResult<Self> {
        let path = path.as_ref();
        let der = read_credential_file(path)?;
        Self::from_der_named(&der, &path.display().to_string())
    }

    pub fn data(&self) -> &CertificateData {
        match self {
            Self::Plain(data) => data,
            Self::CaCredential(ca) => ca.data(),
        }
    }

    pub fn kind(&self) -> crate::selector::CertificateKind {
        match self {
            Self::Plain(_) => crate::selector::CertificateKind::Certificate,
            Self::CaCredential(_) => crate::selector::CertificateKind::CaCredential,
        }
    }

    pub fn as_ca_credential(&self) -> Option<&CaCredential> {
        match self {
            Self::CaCredential(ca) => Some(ca),
            Self::Plain(_) => None,
        }
    }

    pub fn raw_bytes(&self) -> Vec<u8> {
        self.data().raw_bytes()
    }

    pub fn content_hash(&self) -> &[u8; 32] {
        self.data().content_hash()
    }

    pub fn subject(&self) -> &str {
        self.data().subject()
    }

    pub fn issuer(&self) -> &str {
        self.data().issuer()
    }

    /// Subject key identifier; only CA credentials carry one.
    pub fn subject_key_identifier(&self) -> Option<Vec<u8>> {
        self.as_ca_credential()
            .and_then(CaCredential::subject_key_identifier)
    }

    pub fn authority_material(&self) -> AuthorityMaterial<'_> {
        let data = self.data();
        if let Some(id) = data.authority_key_identifier() {
            AuthorityMaterial::KeyIdentifier(id)
        } else if !data.issuer().is_empty() {
            AuthorityMaterial::IssuerName(data.issuer())
        } else {
            AuthorityMaterial::None
        }
    }

    /// Self-issued: own key identifier matches own authority key identifier,
    /// or subject equals issuer.
    pub fn is_self_issued(&self) -> bool {
        match self {
            Self::Plain(data) => data.subject() == data.issuer(),
            Self::CaCredential(ca) => ca.is_self_issued(),
        }
    }

    /// Value of an indexed field, typed the way selectors compare it.
    pub fn field_value(&self, field: Field) -> Option<FieldValue> {
        let data = self.data();
        match field {
            Field::Subject => Some(FieldValue::Text(data.subject().to_string())),
            Field::Issuer => Some(FieldValue::Text(data.issuer().to_string())),
            Field::SerialNumber => Some(FieldValue::Bytes(data.serial_number().to_vec())),
            Field::AuthorityKeyIdentifier => data
                .authority_key_identifier()
                .map(|id| FieldValue::Bytes(id.to_vec())),
            Field::SubjectKeyIdentifier => self.subject_key_identifier().map(FieldValue::Bytes),
            Field::CertificateHash => Some(FieldValue::Bytes(data.content_hash().to_vec())),
        }
    }
}

impl From<CaCredential> for Certificate {
    fn from(ca: CaCredential) -> Self {
        Self::CaCredential(ca)
    }
}
