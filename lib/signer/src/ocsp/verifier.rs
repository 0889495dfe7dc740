use super::{CertStatus, OcspResponse, ResponderId, TrustStore, signature};
use crate::cert::{CertId, Certificate};
use crate::error::{OcspError, ValidationStep};
use crate::token::CertificateStatus;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::debug;

/// A cached response is refetched unless it stays fresh for this long.
pub const MIN_FRESHNESS_SECONDS: i64 = 60;

pub struct OcspVerifier {
    trust: Arc<dyn TrustStore>,
}

impl OcspVerifier {
    pub fn new(trust: Arc<dyn TrustStore>) -> Self {
        Self { trust }
    }

    pub fn verify_validity(
        &self,
        response: &OcspResponse,
        subject: &Certificate,
        issuer: &Certificate,
    ) -> Result<(), OcspError> {
        self.verify_validity_at(response, subject, issuer, Utc::now())
    }

    /// Apply the RFC 2560 §3.2 acceptance checks in order, failing at the
    /// first one violated.
    pub fn verify_validity_at(
        &self,
        response: &OcspResponse,
        subject: &Certificate,
        issuer: &Certificate,
        at: DateTime<Utc>,
    ) -> Result<(), OcspError> {
        let single = response.single_response()?;

        let expected = CertId::new(subject, issuer, single.cert_id.hash_algorithm);
        if single.cert_id != expected {
            return Err(OcspError::validation(
                ValidationStep::CertificateId,
                format!(
                    "OCSP response does not apply to certificate (sn = {})",
                    subject.serial_hex()
                ),
            ));
        }

        let responder = self.find_responder_certificate(response).ok_or_else(|| {
            OcspError::validation(
                ValidationStep::ResponderCertificate,
                "Could not find OCSP certificate for responder ID",
            )
        })?;

        if !signature::verify(
            &response.signature_algorithm,
            &response.tbs_response_data,
            &response.signature,
            &responder,
        ) {
            return Err(OcspError::validation(
                ValidationStep::Signature,
                "Signature on OCSP response is not valid",
            ));
        }

        if !self.is_authorized_responder(&responder, issuer) {
            return Err(OcspError::validation(
                ValidationStep::ResponderAuthorization,
                format!(
                    "OCSP responder is not authorized for given CA (responder = {})",
                    responder.subject()
                ),
            ));
        }

        let oldest_allowed = at - Duration::minutes(self.trust.validation_freshness_minutes());
        if single.this_update < oldest_allowed {
            return Err(OcspError::validation(
                ValidationStep::ThisUpdate,
                "OCSP response is too old",
            ));
        }

        if let Some(next_update) = single.next_update
            && next_update < at
        {
            return Err(OcspError::validation(
                ValidationStep::NextUpdate,
                "OCSP response is too old: newer information is available",
            ));
        }

        Ok(())
    }

    /// Fails unless the first single response reports GOOD.
    pub fn verify_status(&self, response: &OcspResponse) -> Result<(), OcspError> {
        let single = response.single_response()?;
        match &single.cert_status {
            CertStatus::Good => Ok(()),
            status => Err(OcspError::CertValidation {
                status: status_string(status),
            }),
        }
    }

    pub fn verify_validity_and_status(
        &self,
        response: &OcspResponse,
        subject: &Certificate,
        issuer: &Certificate,
    ) -> Result<(), OcspError> {
        self.verify_validity_and_status_at(response, subject, issuer, Utc::now())
    }

    pub fn verify_validity_and_status_at(
        &self,
        response: &OcspResponse,
        subject: &Certificate,
        issuer: &Certificate,
        at: DateTime<Utc>,
    ) -> Result<(), OcspError> {
        self.verify_validity_at(response, subject, issuer, at)?;
        self.verify_status(response)
    }

    /// Whether a cached response should be refetched before reuse.
    pub fn is_expired(&self, response: &OcspResponse) -> Result<bool, OcspError> {
        self.is_expired_at(response, Utc::now())
    }

    pub fn is_expired_at(
        &self,
        response: &OcspResponse,
        at: DateTime<Utc>,
    ) -> Result<bool, OcspError> {
        let single = response.single_response()?;
        Ok(single.this_update < at - Duration::seconds(MIN_FRESHNESS_SECONDS))
    }

    /// Locate the certificate that signed the response among the configured
    /// responders, all CA certificates and the certificates it carries.
    pub fn find_responder_certificate(&self, response: &OcspResponse) -> Option<Certificate> {
        let mut candidates = self.trust.ocsp_responder_certificates();
        candidates.extend(self.trust.all_ca_certs());
        candidates.extend(response.certs.iter().cloned());

        match &response.responder_id {
            ResponderId::ByName(name) => candidates.into_iter().find(|c| c.has_subject_name(name)),
            ResponderId::ByKey(hash) => candidates
                .into_iter()
                .find(|c| c.key_hash_sha1() == *hash),
        }
    }

    /// Verification outcome as a registry certificate status. Anything that
    /// fails validity is `Unverifiable`.
    pub fn certificate_status(
        &self,
        response: &OcspResponse,
        subject: &Certificate,
        issuer: &Certificate,
        at: DateTime<Utc>,
    ) -> CertificateStatus {
        if let Err(e) = self.verify_validity_at(response, subject, issuer, at) {
            debug!("OCSP response for {} is unverifiable: {}", subject.serial_hex(), e);
            return CertificateStatus::Unverifiable;
        }
        match response.single_response().map(|s| &s.cert_status) {
            Ok(CertStatus::Good) => CertificateStatus::Good,
            Ok(CertStatus::Revoked { .. }) => CertificateStatus::Revoked,
            Ok(CertStatus::Unknown) => CertificateStatus::Unknown,
            Err(_) => CertificateStatus::Unverifiable,
        }
    }

    fn is_authorized_responder(&self, responder: &Certificate, issuer: &Certificate) -> bool {
        self.trust.is_ocsp_responder_cert(issuer, responder)
            || responder == issuer
            || (responder.is_issued_by(issuer) && responder.has_ocsp_signing_usage())
    }
}

fn status_string(status: &CertStatus) -> String {
    match status {
        CertStatus::Good => "GOOD".to_string(),
        CertStatus::Unknown => "UNKNOWN".to_string(),
        CertStatus::Revoked {
            revocation_time, ..
        } => format!(
            "REVOKED (date: {})",
            revocation_time.format("%Y-%m-%d %H:%M:%S")
        ),
    }
}

#[cfg(test)]
mod tests {
    use crate::ocsp::{SignatureAlgorithm, StaticTrustStore, asn1};
    use super::*;
    use crate::cert::HashAlgorithm;
    use chrono::TimeZone;
    use der::asn1::{BitString, GeneralizedTime, Int, Null, ObjectIdentifier, OctetString};
    use der::{Any, Decode, Encode};
    use p256::ecdsa::signature::Signer;
    use p256::ecdsa::{Signature, SigningKey};
    use p256::pkcs8::DecodePrivateKey;
    use rcgen::{
        BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose,
        IsCa, KeyPair, SerialNumber,
    };
    use spki::AlgorithmIdentifierOwned;

    struct Party {
        cert: Certificate,
        rcgen: rcgen::Certificate,
        key: KeyPair,
    }

    impl Party {
        fn sign(&self, message: &[u8]) -> Vec<u8> {
            let key = SigningKey::from_pkcs8_der(&self.key.serialize_der()).unwrap();
            let signature: Signature = key.sign(message);
            signature.to_der().as_bytes().to_vec()
        }
    }

    fn params(cn: &str, serial: u8) -> CertificateParams {
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, cn);
        params.distinguished_name = dn;
        params.serial_number = Some(SerialNumber::from_slice(&[0x10, serial]));
        params
    }

    fn self_signed_ca(cn: &str) -> Party {
        let mut params = params(cn, 1);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let key = KeyPair::generate().unwrap();
        let rcgen = params.self_signed(&key).unwrap();
        Party {
            cert: Certificate::from_der(rcgen.der()).unwrap(),
            rcgen,
            key,
        }
    }

    fn issue(ca: &Party, cn: &str, serial: u8, usages: Vec<ExtendedKeyUsagePurpose>) -> Party {
        let mut params = params(cn, serial);
        params.extended_key_usages = usages;
        let key = KeyPair::generate().unwrap();
        let rcgen = params.signed_by(&key, &ca.rcgen, &ca.key).unwrap();
        Party {
            cert: Certificate::from_der(rcgen.der()).unwrap(),
            rcgen,
            key,
        }
    }

    struct Fixture {
        ca: Party,
        responder: Party,
        subject: Party,
    }

    fn fixture() -> Fixture {
        let ca = self_signed_ca("Test CA");
        let responder = issue(&ca, "OCSP Responder", 2, vec![ExtendedKeyUsagePurpose::OcspSigning]);
        let subject = issue(&ca, "Subject", 3, Vec::new());
        Fixture {
            ca,
            responder,
            subject,
        }
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn time(t: DateTime<Utc>) -> GeneralizedTime {
        GeneralizedTime::from_unix_duration(std::time::Duration::from_secs(t.timestamp() as u64))
            .unwrap()
    }

    fn by_name(cert: &Certificate) -> asn1::ResponderId {
        asn1::ResponderId::ByName(Any::from_der(cert.subject_der()).unwrap())
    }

    fn by_key(cert: &Certificate) -> asn1::ResponderId {
        asn1::ResponderId::ByKey(OctetString::new(cert.key_hash_sha1()).unwrap())
    }

    fn good() -> asn1::CertStatus {
        asn1::CertStatus::Good(Null)
    }

    fn single(
        subject: &Certificate,
        issuer: &Certificate,
        status: asn1::CertStatus,
    ) -> asn1::SingleResponse {
        let id = CertId::new(subject, issuer, HashAlgorithm::Sha1);
        asn1::SingleResponse {
            cert_id: asn1::CertId {
                hash_algorithm: AlgorithmIdentifierOwned {
                    oid: ObjectIdentifier::new(id.hash_algorithm.oid()).unwrap(),
                    parameters: None,
                },
                issuer_name_hash: OctetString::new(id.issuer_name_hash).unwrap(),
                issuer_key_hash: OctetString::new(id.issuer_key_hash).unwrap(),
                serial_number: Int::new(&id.serial_number).unwrap(),
            },
            cert_status: status,
            this_update: time(at() - Duration::minutes(5)),
            next_update: Some(time(at() + Duration::hours(1))),
            single_extensions: None,
        }
    }

    /// Unsigned response contents, edited by each test before signing.
    struct Draft {
        responder_id: asn1::ResponderId,
        responses: Vec<asn1::SingleResponse>,
        certs: Vec<Certificate>,
        algorithm: &'static str,
    }

    impl Draft {
        fn new(signer: &Party, subject: &Party, issuer: &Party, status: asn1::CertStatus) -> Self {
            Self {
                responder_id: by_name(&signer.cert),
                responses: vec![single(&subject.cert, &issuer.cert, status)],
                certs: vec![signer.cert.clone()],
                algorithm: SignatureAlgorithm::EcdsaP256Sha256.oid(),
            }
        }

        fn tbs(&self) -> Vec<u8> {
            asn1::ResponseData {
                version: None,
                responder_id: self.responder_id.clone(),
                produced_at: time(at()),
                responses: self.responses.clone(),
                response_extensions: None,
            }
            .to_der()
            .unwrap()
        }

        fn signed_by(&self, signer: &Party) -> OcspResponse {
            let tbs = self.tbs();
            let signature = signer.sign(&tbs);
            self.assemble(&tbs, &signature)
        }

        fn assemble(&self, tbs: &[u8], signature: &[u8]) -> OcspResponse {
            let certs = self
                .certs
                .iter()
                .map(|cert| Any::from_der(cert.der()).unwrap())
                .collect::<Vec<_>>();
            let basic = asn1::BasicOcspResponse {
                tbs_response_data: Any::from_der(tbs).unwrap(),
                signature_algorithm: AlgorithmIdentifierOwned {
                    oid: ObjectIdentifier::new(self.algorithm).unwrap(),
                    parameters: None,
                },
                signature: BitString::from_bytes(signature).unwrap(),
                certs: (!certs.is_empty()).then_some(certs),
            };
            let der = asn1::OcspResponse {
                response_status: asn1::OcspResponseStatus::Successful,
                response_bytes: Some(asn1::ResponseBytes {
                    response_type: asn1::ID_PKIX_OCSP_BASIC,
                    response: OctetString::new(basic.to_der().unwrap()).unwrap(),
                }),
            }
            .to_der()
            .unwrap();
            OcspResponse::from_der(&der).unwrap()
        }
    }

    fn verifier(trust: StaticTrustStore) -> OcspVerifier {
        OcspVerifier::new(Arc::new(trust))
    }

    fn default_verifier(f: &Fixture) -> OcspVerifier {
        verifier(StaticTrustStore::new(10).with_ca(f.ca.cert.clone()))
    }

    fn step_of(result: Result<(), OcspError>) -> Option<ValidationStep> {
        result.unwrap_err().step()
    }

    // ==================== Validity ====================

    #[test]
    fn test_delegated_responder_response_is_valid() {
        let f = fixture();
        let response = Draft::new(&f.responder, &f.subject, &f.ca, good()).signed_by(&f.responder);
        let verifier = default_verifier(&f);

        assert!(verifier.verify_validity_at(&response, &f.subject.cert, &f.ca.cert, at()).is_ok());
        assert!(
            verifier
                .verify_validity_and_status_at(&response, &f.subject.cert, &f.ca.cert, at())
                .is_ok()
        );
    }

    #[test]
    fn test_cert_id_mismatch_is_reported_first() {
        let f = fixture();
        let other = issue(&f.ca, "Other", 4, Vec::new());
        let mut draft = Draft::new(&f.responder, &other, &f.ca, good());
        draft.responses[0].this_update = time(at() - Duration::days(30));
        // Signed with the wrong key as well; the cert id check still wins
        let response = draft.signed_by(&f.subject);

        let err = default_verifier(&f)
            .verify_validity_at(&response, &f.subject.cert, &f.ca.cert, at())
            .unwrap_err();
        assert_eq!(err.step(), Some(ValidationStep::CertificateId));
        assert!(err.to_string().contains(&f.subject.cert.serial_hex()));
    }

    #[test]
    fn test_unknown_responder_is_rejected() {
        let f = fixture();
        let mut draft = Draft::new(&f.responder, &f.subject, &f.ca, good());
        draft.certs.clear();
        let response = draft.signed_by(&f.responder);

        assert_eq!(
            step_of(default_verifier(&f).verify_validity_at(
                &response,
                &f.subject.cert,
                &f.ca.cert,
                at()
            )),
            Some(ValidationStep::ResponderCertificate)
        );
    }

    #[test]
    fn test_responder_found_by_key_hash() {
        let f = fixture();
        let mut draft = Draft::new(&f.responder, &f.subject, &f.ca, good());
        draft.responder_id = by_key(&f.responder.cert);
        let response = draft.signed_by(&f.responder);
        let verifier = default_verifier(&f);

        assert_eq!(
            verifier.find_responder_certificate(&response),
            Some(f.responder.cert.clone())
        );
        assert!(verifier.verify_validity_at(&response, &f.subject.cert, &f.ca.cert, at()).is_ok());
    }

    #[test]
    fn test_responder_found_by_differently_encoded_name() {
        let f = fixture();
        let mut name = DistinguishedName::new();
        name.push(
            DnType::CommonName,
            rcgen::DnValue::Utf8String("ocsp   RESPONDER".to_string()),
        );
        let mut draft = Draft::new(&f.responder, &f.subject, &f.ca, good());
        draft.responder_id = asn1::ResponderId::ByName(Any::from_der(&name_der(&name)).unwrap());
        let response = draft.signed_by(&f.responder);

        assert_eq!(
            default_verifier(&f).find_responder_certificate(&response),
            Some(f.responder.cert.clone())
        );
    }

    fn name_der(name: &DistinguishedName) -> Vec<u8> {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::default();
        params.distinguished_name = name.clone();
        let cert = params.self_signed(&key).unwrap();
        Certificate::from_der(cert.der()).unwrap().subject_der().to_vec()
    }

    #[test]
    fn test_signature_from_wrong_key_is_rejected() {
        let f = fixture();
        let response = Draft::new(&f.responder, &f.subject, &f.ca, good()).signed_by(&f.subject);

        assert_eq!(
            step_of(default_verifier(&f).verify_validity_at(
                &response,
                &f.subject.cert,
                &f.ca.cert,
                at()
            )),
            Some(ValidationStep::Signature)
        );
    }

    #[test]
    fn test_status_is_bound_to_signature() {
        let f = fixture();
        let revoked = Draft::new(
            &f.responder,
            &f.subject,
            &f.ca,
            asn1::CertStatus::Revoked(asn1::RevokedInfo {
                revocation_time: time(at() - Duration::days(1)),
                revocation_reason: None,
            }),
        );
        let signature = f.responder.sign(&revoked.tbs());

        // Same signature, status rewritten to good
        let forged_draft = Draft::new(&f.responder, &f.subject, &f.ca, good());
        let forged = forged_draft.assemble(&forged_draft.tbs(), &signature);
        assert_eq!(forged.single_response().unwrap().cert_status, CertStatus::Good);

        let verifier = default_verifier(&f);
        let err = verifier
            .verify_validity_and_status_at(&forged, &f.subject.cert, &f.ca.cert, at())
            .unwrap_err();
        assert_eq!(err.step(), Some(ValidationStep::Signature));
        assert_eq!(
            verifier.certificate_status(&forged, &f.subject.cert, &f.ca.cert, at()),
            CertificateStatus::Unverifiable
        );

        let genuine = revoked.assemble(&revoked.tbs(), &signature);
        assert_eq!(
            verifier.certificate_status(&genuine, &f.subject.cert, &f.ca.cert, at()),
            CertificateStatus::Revoked
        );
    }

    #[test]
    fn test_algorithm_not_matching_key_is_rejected() {
        let f = fixture();
        let verifier = default_verifier(&f);
        for algorithm in [SignatureAlgorithm::RsaSha256.oid(), "1.3.101.112"] {
            let mut draft = Draft::new(&f.responder, &f.subject, &f.ca, good());
            draft.algorithm = algorithm;
            let response = draft.signed_by(&f.responder);
            assert_eq!(
                step_of(verifier.verify_validity_at(&response, &f.subject.cert, &f.ca.cert, at())),
                Some(ValidationStep::Signature)
            );
        }
    }

    // ==================== Authorization ====================

    #[test]
    fn test_responder_without_ocsp_signing_usage_is_not_authorized() {
        let f = fixture();
        let plain = issue(&f.ca, "Plain", 5, Vec::new());
        let response = Draft::new(&plain, &f.subject, &f.ca, good()).signed_by(&plain);

        let err = default_verifier(&f)
            .verify_validity_at(&response, &f.subject.cert, &f.ca.cert, at())
            .unwrap_err();
        assert_eq!(err.step(), Some(ValidationStep::ResponderAuthorization));
        assert!(err.to_string().contains("Plain"));
    }

    #[test]
    fn test_responder_from_other_ca_is_not_authorized() {
        let f = fixture();
        let other_ca = self_signed_ca("Other CA");
        let foreign = issue(&other_ca, "Foreign OCSP", 6, vec![ExtendedKeyUsagePurpose::OcspSigning]);
        let response = Draft::new(&foreign, &f.subject, &f.ca, good()).signed_by(&foreign);

        assert_eq!(
            step_of(default_verifier(&f).verify_validity_at(
                &response,
                &f.subject.cert,
                &f.ca.cert,
                at()
            )),
            Some(ValidationStep::ResponderAuthorization)
        );
    }

    #[test]
    fn test_issuer_may_sign_its_own_responses() {
        let f = fixture();
        let mut draft = Draft::new(&f.ca, &f.subject, &f.ca, good());
        draft.certs.clear();
        let response = draft.signed_by(&f.ca);

        assert!(
            default_verifier(&f)
                .verify_validity_at(&response, &f.subject.cert, &f.ca.cert, at())
                .is_ok()
        );
    }

    #[test]
    fn test_configured_responder_is_authorized() {
        let f = fixture();
        let plain = issue(&f.ca, "Configured", 7, Vec::new());
        let mut draft = Draft::new(&plain, &f.subject, &f.ca, good());
        draft.certs.clear();
        let response = draft.signed_by(&plain);

        let trust = StaticTrustStore::new(10)
            .with_ca(f.ca.cert.clone())
            .with_responder(f.ca.cert.clone(), plain.cert.clone());
        assert!(
            verifier(trust)
                .verify_validity_at(&response, &f.subject.cert, &f.ca.cert, at())
                .is_ok()
        );
    }

    // ==================== Freshness ====================

    fn response_with_updates(
        f: &Fixture,
        this_update: DateTime<Utc>,
        next_update: Option<DateTime<Utc>>,
    ) -> OcspResponse {
        let mut draft = Draft::new(&f.responder, &f.subject, &f.ca, good());
        draft.responses[0].this_update = time(this_update);
        draft.responses[0].next_update = next_update.map(time);
        draft.signed_by(&f.responder)
    }

    #[test]
    fn test_this_update_freshness_boundary() {
        let f = fixture();
        let verifier = default_verifier(&f);

        let at_limit = response_with_updates(&f, at() - Duration::minutes(10), None);
        assert!(verifier.verify_validity_at(&at_limit, &f.subject.cert, &f.ca.cert, at()).is_ok());

        let past_limit = response_with_updates(
            &f,
            at() - Duration::minutes(10) - Duration::seconds(1),
            None,
        );
        let err = verifier
            .verify_validity_at(&past_limit, &f.subject.cert, &f.ca.cert, at())
            .unwrap_err();
        assert_eq!(err.step(), Some(ValidationStep::ThisUpdate));
        assert!(err.to_string().ends_with("OCSP response is too old"));
    }

    #[test]
    fn test_next_update_in_past_is_rejected() {
        let f = fixture();
        let verifier = default_verifier(&f);

        let stale = response_with_updates(
            &f,
            at() - Duration::minutes(2),
            Some(at() - Duration::minutes(1)),
        );
        let err = verifier
            .verify_validity_at(&stale, &f.subject.cert, &f.ca.cert, at())
            .unwrap_err();
        assert_eq!(err.step(), Some(ValidationStep::NextUpdate));
        assert!(err.to_string().contains("newer information is available"));

        let open_ended = response_with_updates(&f, at() - Duration::minutes(2), None);
        assert!(verifier.verify_validity_at(&open_ended, &f.subject.cert, &f.ca.cert, at()).is_ok());
    }

    #[test]
    fn test_is_expired() {
        let f = fixture();
        let verifier = default_verifier(&f);

        let recent = response_with_updates(&f, at() - Duration::seconds(30), None);
        assert!(!verifier.is_expired_at(&recent, at()).unwrap());

        let old = response_with_updates(&f, at() - Duration::seconds(61), None);
        assert!(verifier.is_expired_at(&old, at()).unwrap());
    }

    // ==================== Status ====================

    #[test]
    fn test_only_first_single_response_is_consulted() {
        let f = fixture();
        let other = issue(&f.ca, "Other", 8, Vec::new());
        let mut draft = Draft::new(&f.responder, &f.subject, &f.ca, good());
        draft
            .responses
            .push(single(&other.cert, &f.ca.cert, asn1::CertStatus::Unknown(Null)));
        let response = draft.signed_by(&f.responder);

        assert!(
            default_verifier(&f)
                .verify_validity_and_status_at(&response, &f.subject.cert, &f.ca.cert, at())
                .is_ok()
        );
    }

    #[test]
    fn test_empty_response_is_malformed() {
        let f = fixture();
        let mut draft = Draft::new(&f.responder, &f.subject, &f.ca, good());
        draft.responses.clear();
        let response = draft.signed_by(&f.responder);

        assert!(matches!(
            default_verifier(&f).verify_validity_at(&response, &f.subject.cert, &f.ca.cert, at()),
            Err(OcspError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_status_messages() {
        let f = fixture();
        let verifier = default_verifier(&f);

        let unknown = Draft::new(&f.responder, &f.subject, &f.ca, asn1::CertStatus::Unknown(Null))
            .signed_by(&f.responder);
        assert_eq!(
            verifier.verify_status(&unknown).unwrap_err().to_string(),
            OcspError::CertValidation {
                status: "UNKNOWN".to_string()
            }
            .to_string()
        );

        let revoked = Draft::new(
            &f.responder,
            &f.subject,
            &f.ca,
            asn1::CertStatus::Revoked(asn1::RevokedInfo {
                revocation_time: time(Utc.with_ymd_and_hms(2024, 4, 30, 8, 15, 0).unwrap()),
                revocation_reason: Some(asn1::CrlReason::KeyCompromise),
            }),
        )
        .signed_by(&f.responder);
        match verifier.verify_status(&revoked) {
            Err(OcspError::CertValidation { status }) => {
                assert_eq!(status, "REVOKED (date: 2024-04-30 08:15:00)")
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_certificate_status_is_never_good_when_invalid() {
        let f = fixture();
        let verifier = default_verifier(&f);

        let good_response =
            Draft::new(&f.responder, &f.subject, &f.ca, good()).signed_by(&f.responder);
        assert_eq!(
            verifier.certificate_status(&good_response, &f.subject.cert, &f.ca.cert, at()),
            CertificateStatus::Good
        );

        let wrong_key = Draft::new(&f.responder, &f.subject, &f.ca, good()).signed_by(&f.subject);
        assert_eq!(
            verifier.certificate_status(&wrong_key, &f.subject.cert, &f.ca.cert, at()),
            CertificateStatus::Unverifiable
        );

        let unknown = Draft::new(&f.responder, &f.subject, &f.ca, asn1::CertStatus::Unknown(Null))
            .signed_by(&f.responder);
        assert_eq!(
            verifier.certificate_status(&unknown, &f.subject.cert, &f.ca.cert, at()),
            CertificateStatus::Unknown
        );
    }
}
