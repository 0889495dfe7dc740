//! OCSP trust verification
//!
//! [`OcspResponse`] decodes a DER response as sent by a responder; every field
//! the checks look at comes from the signed `tbsResponseData`. [`OcspVerifier`]
//! decides whether such a response can be trusted for a `(subject, issuer)`
//! pair (RFC 2560 §3.2) and whether the status it carries is GOOD.

pub mod asn1;
mod signature;
mod trust;
mod verifier;

pub use signature::SignatureAlgorithm;
pub use trust::{StaticTrustStore, TrustStore};
pub use verifier::{MIN_FRESHNESS_SECONDS, OcspVerifier};

use crate::cert::{CertId, Certificate, HashAlgorithm};
use crate::error::OcspError;
use chrono::{DateTime, Utc};
use der::asn1::GeneralizedTime;
use der::{Decode, Encode};

/// How the response identifies its signer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponderId {
    /// DER of the responder's subject name
    ByName(Vec<u8>),
    /// SHA-1 of the responder's public key bits
    ByKey(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertStatus {
    Good,
    Revoked {
        revocation_time: DateTime<Utc>,
        reason: Option<u8>,
    },
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SingleResponse {
    pub cert_id: CertId,
    pub cert_status: CertStatus,
    pub this_update: DateTime<Utc>,
    pub next_update: Option<DateTime<Utc>>,
}

/// A decoded basic OCSP response.
#[derive(Debug, Clone)]
pub struct OcspResponse {
    responder_id: ResponderId,
    produced_at: DateTime<Utc>,
    /// DER of `tbsResponseData`, the signed bytes
    tbs_response_data: Vec<u8>,
    signature_algorithm: String,
    signature: Vec<u8>,
    certs: Vec<Certificate>,
    responses: Vec<SingleResponse>,
}

impl OcspResponse {
    /// Decode an `OCSPResponse` as returned by a responder. Only successful
    /// responses of the basic type are accepted.
    pub fn from_der(der: &[u8]) -> Result<Self, OcspError> {
        let response = asn1::OcspResponse::from_der(der)?;
        if response.response_status != asn1::OcspResponseStatus::Successful {
            return Err(OcspError::MalformedResponse(format!(
                "Responder returned status {:?}",
                response.response_status
            )));
        }
        let bytes = response.response_bytes.ok_or_else(|| {
            OcspError::MalformedResponse("Response carries no response bytes".to_string())
        })?;
        if bytes.response_type != asn1::ID_PKIX_OCSP_BASIC {
            return Err(OcspError::MalformedResponse(format!(
                "Unsupported response type {}",
                bytes.response_type
            )));
        }
        Self::from_basic_der(bytes.response.as_bytes())
    }

    /// Decode a `BasicOCSPResponse`.
    pub fn from_basic_der(der: &[u8]) -> Result<Self, OcspError> {
        let basic = asn1::BasicOcspResponse::from_der(der)?;
        let tbs_response_data = basic.tbs_response_data.to_der()?;
        let data = asn1::ResponseData::from_der(&tbs_response_data)?;

        let responder_id = match data.responder_id {
            asn1::ResponderId::ByName(name) => ResponderId::ByName(name.to_der()?),
            asn1::ResponderId::ByKey(hash) => ResponderId::ByKey(hash.as_bytes().to_vec()),
        };

        let certs = basic
            .certs
            .unwrap_or_default()
            .iter()
            .map(|cert| {
                Certificate::from_der(&cert.to_der()?).map_err(|e| {
                    OcspError::MalformedResponse(format!("Invalid responder certificate: {}", e))
                })
            })
            .collect::<Result<Vec<_>, OcspError>>()?;

        let responses = data
            .responses
            .into_iter()
            .map(single_response)
            .collect::<Result<Vec<_>, OcspError>>()?;

        Ok(Self {
            responder_id,
            produced_at: to_datetime(&data.produced_at)?,
            tbs_response_data,
            signature_algorithm: basic.signature_algorithm.oid.to_string(),
            signature: basic.signature.raw_bytes().to_vec(),
            certs,
            responses,
        })
    }

    pub fn responder_id(&self) -> &ResponderId {
        &self.responder_id
    }

    pub fn produced_at(&self) -> DateTime<Utc> {
        self.produced_at
    }

    /// Signature algorithm OID
    pub fn signature_algorithm(&self) -> &str {
        &self.signature_algorithm
    }

    /// Certificates carried in the response
    pub fn certs(&self) -> &[Certificate] {
        &self.certs
    }

    pub fn responses(&self) -> &[SingleResponse] {
        &self.responses
    }

    /// The single response the checks apply to. Requests carry one
    /// certificate, so only the first entry is consulted.
    pub fn single_response(&self) -> Result<&SingleResponse, OcspError> {
        self.responses
            .first()
            .ok_or_else(|| OcspError::MalformedResponse("response has no entries".to_string()))
    }
}

fn single_response(single: asn1::SingleResponse) -> Result<SingleResponse, OcspError> {
    let hash_oid = single.cert_id.hash_algorithm.oid.to_string();
    let hash_algorithm = HashAlgorithm::from_oid(&hash_oid).ok_or_else(|| {
        OcspError::MalformedResponse(format!("Unsupported CertID hash algorithm {}", hash_oid))
    })?;

    let cert_status = match single.cert_status {
        asn1::CertStatus::Good(_) => CertStatus::Good,
        asn1::CertStatus::Revoked(info) => CertStatus::Revoked {
            revocation_time: to_datetime(&info.revocation_time)?,
            reason: info.revocation_reason.map(|reason| reason as u8),
        },
        asn1::CertStatus::Unknown(_) => CertStatus::Unknown,
    };

    Ok(SingleResponse {
        cert_id: CertId {
            hash_algorithm,
            issuer_name_hash: single.cert_id.issuer_name_hash.as_bytes().to_vec(),
            issuer_key_hash: single.cert_id.issuer_key_hash.as_bytes().to_vec(),
            serial_number: single.cert_id.serial_number.as_bytes().to_vec(),
        },
        cert_status,
        this_update: to_datetime(&single.this_update)?,
        next_update: single.next_update.as_ref().map(to_datetime).transpose()?,
    })
}

fn to_datetime(time: &GeneralizedTime) -> Result<DateTime<Utc>, OcspError> {
    let since_epoch = time.to_unix_duration();
    i64::try_from(since_epoch.as_secs())
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, since_epoch.subsec_nanos()))
        .ok_or_else(|| OcspError::MalformedResponse("Time out of range".to_string()))
}
