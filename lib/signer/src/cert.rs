//! X.509 certificate model
//!
//! A parsed certificate keeps its owned DER plus the handful of fields the
//! OCSP checks need, so it can be cloned freely and shared across tasks.

use crate::error::SignerError;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fmt;
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;
use x509_parser::x509::X509Name;

/// `id-kp-OCSPSigning`
pub const OCSP_SIGNING_OID: &str = "1.3.6.1.5.5.7.3.9";

#[derive(Clone)]
pub struct Certificate {
    der: Vec<u8>,
    subject: String,
    subject_der: Vec<u8>,
    issuer_der: Vec<u8>,
    subject_canonical: String,
    issuer_canonical: String,
    serial: Vec<u8>,
    public_key_algorithm: String,
    /// Named curve for EC keys
    public_key_curve: Option<String>,
    public_key_bits: Vec<u8>,
    ocsp_signing: bool,
}

impl Certificate {
    pub fn from_der(der: &[u8]) -> Result<Self, SignerError> {
        let (_, cert) = X509Certificate::from_der(der)?;

        let ocsp_signing = cert
            .extended_key_usage()
            .map_err(|e| SignerError::Certificate(format!("Invalid extended key usage: {}", e)))?
            .is_some_and(|eku| {
                eku.value.ocsp_signing
                    || eku
                        .value
                        .other
                        .iter()
                        .any(|oid| oid.to_id_string() == OCSP_SIGNING_OID)
            });

        let spki = cert.public_key();
        Ok(Self {
            der: der.to_vec(),
            subject: cert.subject().to_string(),
            subject_der: cert.subject().as_raw().to_vec(),
            issuer_der: cert.issuer().as_raw().to_vec(),
            subject_canonical: canonical_name(cert.subject()),
            issuer_canonical: canonical_name(cert.issuer()),
            serial: cert.raw_serial().to_vec(),
            public_key_algorithm: spki.algorithm.algorithm.to_id_string(),
            public_key_curve: spki
                .algorithm
                .parameters
                .as_ref()
                .and_then(|params| params.as_oid().ok())
                .map(|oid| oid.to_id_string()),
            public_key_bits: spki.subject_public_key.data.to_vec(),
            ocsp_signing,
        })
    }

    pub fn from_pem(pem: &[u8]) -> Result<Self, SignerError> {
        let (_, pem) = x509_parser::pem::parse_x509_pem(pem)
            .map_err(|e| SignerError::Certificate(format!("Invalid PEM: {:?}", e)))?;
        Self::from_der(&pem.contents)
    }

    /// Parse either encoding, picking PEM when the armor header is present.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SignerError> {
        if bytes.trim_ascii_start().starts_with(b"-----BEGIN") {
            Self::from_pem(bytes)
        } else {
            Self::from_der(bytes)
        }
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Subject distinguished name in RFC 4514 form.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn subject_der(&self) -> &[u8] {
        &self.subject_der
    }

    pub fn issuer_der(&self) -> &[u8] {
        &self.issuer_der
    }

    /// Serial number as encoded, big-endian.
    pub fn serial(&self) -> &[u8] {
        &self.serial
    }

    pub fn serial_hex(&self) -> String {
        format_serial(&self.serial)
    }

    pub fn public_key_algorithm(&self) -> &str {
        &self.public_key_algorithm
    }

    pub fn public_key_curve(&self) -> Option<&str> {
        self.public_key_curve.as_deref()
    }

    /// Contents of the SubjectPublicKeyInfo bit string.
    pub fn public_key_bits(&self) -> &[u8] {
        &self.public_key_bits
    }

    pub fn has_ocsp_signing_usage(&self) -> bool {
        self.ocsp_signing
    }

    /// Whether `issuer`'s subject names this certificate's issuer. Names are
    /// compared in canonical form, so the string types used to encode them
    /// do not matter.
    pub fn is_issued_by(&self, issuer: &Certificate) -> bool {
        self.issuer_canonical == issuer.subject_canonical
    }

    /// Whether the DER-encoded `name` is this certificate's subject.
    pub fn has_subject_name(&self, name: &[u8]) -> bool {
        match X509Name::from_der(name) {
            Ok((_, name)) => canonical_name(&name) == self.subject_canonical,
            Err(_) => name == self.subject_der.as_slice(),
        }
    }

    /// SHA-1 of the public key bits, as used in a by-key responder id.
    pub fn key_hash_sha1(&self) -> Vec<u8> {
        HashAlgorithm::Sha1.digest(&self.public_key_bits)
    }
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}

impl Eq for Certificate {}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.subject)
            .field("serial", &self.serial_hex())
            .finish()
    }
}

/// Comparable form of a distinguished name: attribute values lowercased with
/// whitespace collapsed, multi-valued RDNs sorted.
fn canonical_name(name: &X509Name<'_>) -> String {
    name.iter()
        .map(|rdn| {
            let mut attributes: Vec<String> = rdn
                .iter()
                .map(|attr| {
                    let value = match attr.as_str() {
                        Ok(value) => value
                            .split_whitespace()
                            .collect::<Vec<_>>()
                            .join(" ")
                            .to_lowercase(),
                        Err(_) => format!("#{}", hex::encode(attr.attr_value().data)),
                    };
                    format!("{}={}", attr.attr_type().to_id_string(), value)
                })
                .collect();
            attributes.sort();
            attributes.join("+")
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Render a serial as `0x` + lowercase hex without leading zeros.
pub fn format_serial(serial: &[u8]) -> String {
    let hex = hex::encode(serial);
    let trimmed = hex.trim_start_matches('0');
    if trimmed.is_empty() {
        "0x0".to_string()
    } else {
        format!("0x{}", trimmed)
    }
}

/// `id-sha1`
pub const SHA1_OID: &str = "1.3.14.3.2.26";
/// `id-sha256`
pub const SHA256_OID: &str = "2.16.840.1.101.3.4.2.1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
}

impl HashAlgorithm {
    pub fn from_oid(oid: &str) -> Option<Self> {
        match oid {
            SHA1_OID => Some(HashAlgorithm::Sha1),
            SHA256_OID => Some(HashAlgorithm::Sha256),
            _ => None,
        }
    }

    pub fn oid(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha1 => SHA1_OID,
            HashAlgorithm::Sha256 => SHA256_OID,
        }
    }

    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            HashAlgorithm::Sha1 => Sha1::digest(data).to_vec(),
            HashAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
        }
    }
}

/// Identifier an OCSP request or single response uses to reference a certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertId {
    pub hash_algorithm: HashAlgorithm,
    pub issuer_name_hash: Vec<u8>,
    pub issuer_key_hash: Vec<u8>,
    pub serial_number: Vec<u8>,
}

impl CertId {
    pub fn new(subject: &Certificate, issuer: &Certificate, hash_algorithm: HashAlgorithm) -> Self {
        Self {
            hash_algorithm,
            issuer_name_hash: hash_algorithm.digest(issuer.subject_der()),
            issuer_key_hash: hash_algorithm.digest(issuer.public_key_bits()),
            serial_number: subject.serial().to_vec(),
        }
    }
}
