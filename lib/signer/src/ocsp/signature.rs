use crate::cert::Certificate;
use der::oid::AssociatedOid;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::signature::Verifier;
use rsa::RsaPublicKey;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};

const RSA_ENCRYPTION_OID: &str = "1.2.840.113549.1.1.1";
const EC_PUBLIC_KEY_OID: &str = "1.2.840.10045.2.1";
const SECP256R1_OID: &str = "1.2.840.10045.3.1.7";
const SECP384R1_OID: &str = "1.3.132.0.34";

/// Response signature algorithms the verifier can check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    RsaSha1,
    RsaSha256,
    RsaSha384,
    RsaSha512,
    EcdsaP256Sha256,
    EcdsaP384Sha384,
}

impl SignatureAlgorithm {
    pub fn from_oid(oid: &str) -> Option<Self> {
        match oid {
            "1.2.840.113549.1.1.5" => Some(SignatureAlgorithm::RsaSha1),
            "1.2.840.113549.1.1.11" => Some(SignatureAlgorithm::RsaSha256),
            "1.2.840.113549.1.1.12" => Some(SignatureAlgorithm::RsaSha384),
            "1.2.840.113549.1.1.13" => Some(SignatureAlgorithm::RsaSha512),
            "1.2.840.10045.4.3.2" => Some(SignatureAlgorithm::EcdsaP256Sha256),
            "1.2.840.10045.4.3.3" => Some(SignatureAlgorithm::EcdsaP384Sha384),
            _ => None,
        }
    }

    pub fn oid(&self) -> &'static str {
        match self {
            SignatureAlgorithm::RsaSha1 => "1.2.840.113549.1.1.5",
            SignatureAlgorithm::RsaSha256 => "1.2.840.113549.1.1.11",
            SignatureAlgorithm::RsaSha384 => "1.2.840.113549.1.1.12",
            SignatureAlgorithm::RsaSha512 => "1.2.840.113549.1.1.13",
            SignatureAlgorithm::EcdsaP256Sha256 => "1.2.840.10045.4.3.2",
            SignatureAlgorithm::EcdsaP384Sha384 => "1.2.840.10045.4.3.3",
        }
    }
}

/// Check `signature` over `message` with `signer`'s public key.
///
/// Unknown algorithms, and keys that do not fit the algorithm, never verify.
pub(crate) fn verify(
    algorithm_oid: &str,
    message: &[u8],
    signature: &[u8],
    signer: &Certificate,
) -> bool {
    let Some(algorithm) = SignatureAlgorithm::from_oid(algorithm_oid) else {
        return false;
    };
    match algorithm {
        SignatureAlgorithm::RsaSha1 => verify_rsa::<Sha1>(message, signature, signer),
        SignatureAlgorithm::RsaSha256 => verify_rsa::<Sha256>(message, signature, signer),
        SignatureAlgorithm::RsaSha384 => verify_rsa::<Sha384>(message, signature, signer),
        SignatureAlgorithm::RsaSha512 => verify_rsa::<Sha512>(message, signature, signer),
        SignatureAlgorithm::EcdsaP256Sha256 => {
            if !is_ec_key_on(signer, SECP256R1_OID) {
                return false;
            }
            let Ok(key) = p256::ecdsa::VerifyingKey::from_sec1_bytes(signer.public_key_bits())
            else {
                return false;
            };
            let Ok(signature) = p256::ecdsa::Signature::from_der(signature) else {
                return false;
            };
            key.verify(message, &signature).is_ok()
        }
        SignatureAlgorithm::EcdsaP384Sha384 => {
            if !is_ec_key_on(signer, SECP384R1_OID) {
                return false;
            }
            let Ok(key) = p384::ecdsa::VerifyingKey::from_sec1_bytes(signer.public_key_bits())
            else {
                return false;
            };
            let Ok(signature) = p384::ecdsa::Signature::from_der(signature) else {
                return false;
            };
            key.verify(message, &signature).is_ok()
        }
    }
}

fn is_ec_key_on(signer: &Certificate, curve_oid: &str) -> bool {
    signer.public_key_algorithm() == EC_PUBLIC_KEY_OID && signer.public_key_curve() == Some(curve_oid)
}

fn verify_rsa<D>(message: &[u8], signature: &[u8], signer: &Certificate) -> bool
where
    D: Digest + AssociatedOid,
{
    if signer.public_key_algorithm() != RSA_ENCRYPTION_OID {
        return false;
    }
    let Ok(key) = RsaPublicKey::from_pkcs1_der(signer.public_key_bits()) else {
        return false;
    };
    let Ok(signature) = rsa::pkcs1v15::Signature::try_from(signature) else {
        return false;
    };
    rsa::pkcs1v15::VerifyingKey::<D>::new(key)
        .verify(message, &signature)
        .is_ok()
}
