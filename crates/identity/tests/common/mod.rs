//! Test PKI built with rcgen.

#![allow(dead_code)]

use attestca_identity::{CaCredential, Certificate};
use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyIdMethod, KeyPair};

/// A CA that can sign further certificates.
pub struct Authority {
    pub cert: rcgen::Certificate,
    pub key: KeyPair,
}

impl Authority {
    pub fn der(&self) -> Vec<u8> {
        self.cert.der().to_vec()
    }

    pub fn credential(&self) -> CaCredential {
        CaCredential::from_der(self.cert.der()).unwrap()
    }

    pub fn certificate(&self) -> Certificate {
        Certificate::from_der(self.cert.der()).unwrap()
    }

    pub fn pem(&self) -> String {
        self.cert.pem()
    }
}

/// Key identifier derived from a label so fixtures stay readable.
pub fn key_id(label: &str) -> Vec<u8> {
    blake3::hash(label.as_bytes()).as_bytes()[..20].to_vec()
}

fn ca_params(common_name: &str, ski: Vec<u8>) -> CertificateParams {
    let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
    params.distinguished_name.push(DnType::CommonName, common_name);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_identifier_method = KeyIdMethod::PreSpecified(ski);
    params.use_authority_key_identifier_extension = true;
    params
}

/// Self-signed CA whose subject key identifier is `key_id(common_name)`.
pub fn root(common_name: &str) -> Authority {
    root_with_ski(common_name, key_id(common_name))
}

pub fn root_with_ski(common_name: &str, ski: Vec<u8>) -> Authority {
    let key = KeyPair::generate().unwrap();
    let cert = ca_params(common_name, ski).self_signed(&key).unwrap();
    Authority { cert, key }
}

/// Self-signed CA certificate without a subject key identifier extension.
pub fn root_without_ski(common_name: &str) -> Authority {
    let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
    params.distinguished_name.push(DnType::CommonName, common_name);
    params.is_ca = IsCa::NoCa;
    let key = KeyPair::generate().unwrap();
    let cert = params.self_signed(&key).unwrap();
    Authority { cert, key }
}

/// CA signed by `issuer`; its authority key identifier is the issuer's SKI.
pub fn intermediate(common_name: &str, issuer: &Authority) -> Authority {
    intermediate_with_ski(common_name, key_id(common_name), issuer)
}

pub fn intermediate_with_ski(common_name: &str, ski: Vec<u8>, issuer: &Authority) -> Authority {
    let key = KeyPair::generate().unwrap();
    let cert = ca_params(common_name, ski)
        .signed_by(&key, &issuer.cert, &issuer.key)
        .unwrap();
    Authority { cert, key }
}

/// End-entity certificate signed by `issuer`, carrying an authority key
/// identifier.
pub fn leaf(common_name: &str, issuer: &Authority) -> Certificate {
    leaf_params(common_name, issuer, true)
}

/// End-entity certificate linked to `issuer` by name only.
pub fn leaf_without_aki(common_name: &str, issuer: &Authority) -> Certificate {
    leaf_params(common_name, issuer, false)
}

fn leaf_params(common_name: &str, issuer: &Authority, with_aki: bool) -> Certificate {
    let mut params = CertificateParams::new(vec![format!("{common_name}.example")]).unwrap();
    params.distinguished_name.push(DnType::CommonName, common_name);
    params.use_authority_key_identifier_extension = with_aki;
    let key = KeyPair::generate().unwrap();
    let cert = params.signed_by(&key, &issuer.cert, &issuer.key).unwrap();
    Certificate::from_der(cert.der()).unwrap()
}
