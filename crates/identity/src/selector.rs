//! Attribute-based certificate queries.
//!
//! A [`Selector`] accumulates `field = value` predicates (AND semantics) for
//! one certificate kind and hands them to a [`CertificateStore`]. Each
//! predicate call consumes the selector and returns a new one, so a
//! half-built query can be cloned and extended in different directions.
//!
//! ```no_run
//! # use attestca_identity::{CaCredential, MemoryCertificateStore};
//! # fn demo(store: &MemoryCertificateStore, ski: &[u8]) -> attestca_identity::IdentityResult<()> {
//! let issuers = CaCredential::select(store)
//!     .by_subject_key_identifier(ski)
//!     .execute()?;
//! # Ok(()) }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;

use tracing::debug;

use crate::ca_credential::CaCredential;
use crate::certificate::Certificate;
use crate::error::{IdentityError, IdentityResult};
use crate::store::CertificateStore;

/// Indexed certificate fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Subject,
    Issuer,
    SerialNumber,
    AuthorityKeyIdentifier,
    SubjectKeyIdentifier,
    CertificateHash,
}

/// Value type a field compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Text,
    Bytes,
}

impl Field {
    pub const ALL: [Field; 6] = [
        Field::Subject,
        Field::Issuer,
        Field::SerialNumber,
        Field::AuthorityKeyIdentifier,
        Field::SubjectKeyIdentifier,
        Field::CertificateHash,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Field::Subject => "subject",
            Field::Issuer => "issuer",
            Field::SerialNumber => "serialNumber",
            Field::AuthorityKeyIdentifier => "authorityKeyIdentifier",
            Field::SubjectKeyIdentifier => crate::ca_credential::SUBJECT_KEY_IDENTIFIER_FIELD,
            Field::CertificateHash => "certificateHash",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|field| field.name() == name)
    }

    pub fn value_type(self) -> ValueType {
        match self {
            Field::Subject | Field::Issuer => ValueType::Text,
            _ => ValueType::Bytes,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldValue {
    Text(String),
    Bytes(Vec<u8>),
}

impl FieldValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            FieldValue::Text(_) => ValueType::Text,
            FieldValue::Bytes(_) => ValueType::Bytes,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<&[u8]> for FieldValue {
    fn from(value: &[u8]) -> Self {
        FieldValue::Bytes(value.to_vec())
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(value: Vec<u8>) -> Self {
        FieldValue::Bytes(value)
    }
}

impl<const N: usize> From<[u8; N]> for FieldValue {
    fn from(value: [u8; N]) -> Self {
        FieldValue::Bytes(value.to_vec())
    }
}

/// Conjunctive predicates, one value per field.
pub type Predicates = BTreeMap<Field, FieldValue>;

/// Certificate variants a query can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CertificateKind {
    /// Every stored credential, CA credentials included
    Certificate,
    CaCredential,
}

const CERTIFICATE_FIELDS: &[Field] = &[
    Field::Subject,
    Field::Issuer,
    Field::SerialNumber,
    Field::AuthorityKeyIdentifier,
    Field::CertificateHash,
];

const CA_CREDENTIAL_FIELDS: &[Field] = &[
    Field::Subject,
    Field::Issuer,
    Field::SerialNumber,
    Field::AuthorityKeyIdentifier,
    Field::CertificateHash,
    Field::SubjectKeyIdentifier,
];

impl CertificateKind {
    pub fn name(self) -> &'static str {
        match self {
            CertificateKind::Certificate => "Certificate",
            CertificateKind::CaCredential => "CaCredential",
        }
    }

    /// Fields a selector for this kind may filter on.
    pub fn fields(self) -> &'static [Field] {
        match self {
            CertificateKind::Certificate => CERTIFICATE_FIELDS,
            CertificateKind::CaCredential => CA_CREDENTIAL_FIELDS,
        }
    }

    pub fn supports(self, field: Field) -> bool {
        self.fields().contains(&field)
    }

    /// Whether a stored certificate belongs to this kind.
    pub fn includes(self, certificate: &Certificate) -> bool {
        match self {
            CertificateKind::Certificate => true,
            CertificateKind::CaCredential => matches!(certificate, Certificate::CaCredential(_)),
        }
    }

    /// Check that `field` is indexed for this kind and `value` has its type.
    pub fn check(self, field: Field, value: &FieldValue) -> IdentityResult<()> {
        if !self.supports(field) {
            return Err(self.invalid_field(field.name(), "field is not indexed for this kind"));
        }
        if field.value_type() != value.value_type() {
            return Err(self.invalid_field(
                field.name(),
                format!("expected {:?} value", field.value_type()),
            ));
        }
        Ok(())
    }

    /// Resolve a field by name and check it against this kind.
    pub fn resolve(self, name: &str, value: &FieldValue) -> IdentityResult<Field> {
        let field = Field::from_name(name)
            .ok_or_else(|| self.invalid_field(name, "unknown field"))?;
        self.check(field, value)?;
        Ok(field)
    }

    fn invalid_field(self, field: &str, reason: impl Into<String>) -> IdentityError {
        IdentityError::InvalidField {
            field: field.to_string(),
            kind: self.name().to_string(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for CertificateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// True when `certificate` satisfies every predicate.
pub fn matches(certificate: &Certificate, predicates: &Predicates) -> bool {
    predicates
        .iter()
        .all(|(field, value)| certificate.field_value(*field).as_ref() == Some(value))
}

/// Rust type a selector yields for its certificate kind.
pub trait CertificateType: Clone + Eq + Hash {
    const KIND: CertificateKind;

    fn from_certificate(certificate: Certificate) -> Option<Self>;
}

impl CertificateType for Certificate {
    const KIND: CertificateKind = CertificateKind::Certificate;

    fn from_certificate(certificate: Certificate) -> Option<Self> {
        Some(certificate)
    }
}

impl CertificateType for CaCredential {
    const KIND: CertificateKind = CertificateKind::CaCredential;

    fn from_certificate(certificate: Certificate) -> Option<Self> {
        match certificate {
            Certificate::CaCredential(ca) => Some(ca),
            Certificate::Plain(_) => None,
        }
    }
}

/// Immutable query builder bound to a store and a certificate type.
pub struct Selector<'s, T> {
    store: &'s dyn CertificateStore,
    predicates: Predicates,
    _kind: PhantomData<fn() -> T>,
}

impl<'s, T: CertificateType> Selector<'s, T> {
    pub fn new(store: &'s dyn CertificateStore) -> Self {
        Self {
            store,
            predicates: Predicates::new(),
            _kind: PhantomData,
        }
    }

    pub fn kind(&self) -> CertificateKind {
        T::KIND
    }

    pub fn predicates(&self) -> &Predicates {
        &self.predicates
    }

    /// Add a predicate by field name; fails with `InvalidField` when the name
    /// is unknown, not indexed for `T`, or the value has the wrong type.
    pub fn with_field(self, name: &str, value: impl Into<FieldValue>) -> IdentityResult<Self> {
        let value = value.into();
        let field = T::KIND.resolve(name, &value)?;
        Ok(self.push(field, value))
    }

    /// Add a predicate on a typed field.
    pub fn with(self, field: Field, value: impl Into<FieldValue>) -> IdentityResult<Self> {
        let value = value.into();
        T::KIND.check(field, &value)?;
        Ok(self.push(field, value))
    }

    fn push(mut self, field: Field, value: FieldValue) -> Self {
        self.predicates.insert(field, value);
        self
    }

    pub fn by_subject(self, subject: &str) -> Self {
        self.push(Field::Subject, subject.into())
    }

    pub fn by_issuer(self, issuer: &str) -> Self {
        self.push(Field::Issuer, issuer.into())
    }

    pub fn by_serial_number(self, serial: &[u8]) -> Self {
        self.push(Field::SerialNumber, serial.into())
    }

    pub fn by_authority_key_identifier(self, aki: &[u8]) -> Self {
        self.push(Field::AuthorityKeyIdentifier, aki.into())
    }

    pub fn by_certificate_hash(self, hash: &[u8; 32]) -> Self {
        self.push(Field::CertificateHash, (*hash).into())
    }

    /// Run the query. An empty result is not an error.
    pub fn execute(&self) -> IdentityResult<HashSet<T>> {
        let found: HashSet<T> = self
            .store
            .find(T::KIND, &self.predicates)?
            .into_iter()
            .filter_map(T::from_certificate)
            .collect();
        debug!(
            kind = %T::KIND,
            predicates = self.predicates.len(),
            matches = found.len(),
            "Selector executed"
        );
        Ok(found)
    }

    /// Run the query expecting at most one match.
    pub fn execute_one(&self) -> IdentityResult<Option<T>> {
        let found = self.execute()?;
        if found.len() > 1 {
            return Err(IdentityError::AmbiguousResult { count: found.len() });
        }
        Ok(found.into_iter().next())
    }
}

impl<'s> Selector<'s, CaCredential> {
    pub fn by_subject_key_identifier(self, ski: &[u8]) -> Self {
        self.push(Field::SubjectKeyIdentifier, ski.into())
    }
}

impl<T> Clone for Selector<'_, T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store,
            predicates: self.predicates.clone(),
            _kind: PhantomData,
        }
    }
}

impl<T: CertificateType> fmt::Debug for Selector<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selector")
            .field("kind", &T::KIND)
            .field("predicates", &self.predicates)
            .finish()
    }
}

impl Certificate {
    /// Selector over every stored credential.
    pub fn select(store: &dyn CertificateStore) -> Selector<'_, Certificate> {
        Selector::new(store)
    }
}

impl CaCredential {
    /// Selector over stored CA credentials.
    pub fn select(store: &dyn CertificateStore) -> Selector<'_, CaCredential> {
        Selector::new(store)
    }
}
