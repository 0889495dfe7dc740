use crate::cert::Certificate;

/// Trust configuration consulted while verifying OCSP responses.
pub trait TrustStore: Send + Sync {
    /// Responder certificates configured for any CA.
    fn ocsp_responder_certificates(&self) -> Vec<Certificate>;

    fn all_ca_certs(&self) -> Vec<Certificate>;

    /// Whether `candidate` is configured as an OCSP responder for `issuer`.
    fn is_ocsp_responder_cert(&self, issuer: &Certificate, candidate: &Certificate) -> bool;

    /// Maximum age of `thisUpdate`, in minutes.
    fn validation_freshness_minutes(&self) -> i64;
}

/// In-memory trust store.
#[derive(Debug, Clone)]
pub struct StaticTrustStore {
    ca_certs: Vec<Certificate>,
    /// Configured responders, paired with the CA they answer for
    responders: Vec<(Certificate, Certificate)>,
    freshness_minutes: i64,
}

impl StaticTrustStore {
    pub fn new(freshness_minutes: i64) -> Self {
        Self {
            ca_certs: Vec::new(),
            responders: Vec::new(),
            freshness_minutes,
        }
    }

    pub fn with_ca(mut self, ca: Certificate) -> Self {
        self.ca_certs.push(ca);
        self
    }

    pub fn with_responder(mut self, ca: Certificate, responder: Certificate) -> Self {
        self.responders.push((ca, responder));
        self
    }
}

impl TrustStore for StaticTrustStore {
    fn ocsp_responder_certificates(&self) -> Vec<Certificate> {
        self.responders.iter().map(|(_, r)| r.clone()).collect()
    }

    fn all_ca_certs(&self) -> Vec<Certificate> {
        self.ca_certs.clone()
    }

    fn is_ocsp_responder_cert(&self, issuer: &Certificate, candidate: &Certificate) -> bool {
        self.responders
            .iter()
            .any(|(ca, responder)| ca == issuer && responder == candidate)
    }

    fn validation_freshness_minutes(&self) -> i64 {
        self.freshness_minutes
    }
}
