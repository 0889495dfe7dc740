//! Signer Error Types

use std::fmt;
use thiserror::Error;

/// Errors raised by module backends and the workers driving them.
///
/// These never escape a worker: they are logged and reported to the
/// supervisor as events, and the registry is left at its last-known-good state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModuleError {
    #[error("Module initialization failed: {0}")]
    Initialization(String),

    #[error("Token listing failed: {0}")]
    Listing(String),

    #[error("Token operation failed: {0}")]
    TokenOperation(String),

    #[error("Module not initialized")]
    NotInitialized,

    #[error("Token not found: {0}")]
    TokenNotFound(String),
}

/// The RFC 2560 §3.2 acceptance check that rejected an OCSP response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationStep {
    CertificateId,
    ResponderCertificate,
    Signature,
    ResponderAuthorization,
    ThisUpdate,
    NextUpdate,
}

impl fmt::Display for ValidationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValidationStep::CertificateId => "certificate id",
            ValidationStep::ResponderCertificate => "responder certificate",
            ValidationStep::Signature => "signature",
            ValidationStep::ResponderAuthorization => "responder authorization",
            ValidationStep::ThisUpdate => "thisUpdate",
            ValidationStep::NextUpdate => "nextUpdate",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OcspError {
    #[error("Incorrect validation info ({step}): {message}")]
    IncorrectValidationInfo {
        step: ValidationStep,
        message: String,
    },

    #[error("OCSP response indicates certificate status is {status}")]
    CertValidation { status: String },

    #[error("Malformed OCSP response: {0}")]
    MalformedResponse(String),
}

impl OcspError {
    pub(crate) fn validation(step: ValidationStep, message: impl Into<String>) -> Self {
        OcspError::IncorrectValidationInfo {
            step,
            message: message.into(),
        }
    }

    /// The failed acceptance check, if this is a validity error.
    pub fn step(&self) -> Option<ValidationStep> {
        match self {
            OcspError::IncorrectValidationInfo { step, .. } => Some(*step),
            _ => None,
        }
    }
}

impl From<der::Error> for OcspError {
    fn from(err: der::Error) -> Self {
        OcspError::MalformedResponse(format!("Invalid encoding: {}", err))
    }
}

#[derive(Error, Debug)]
pub enum SignerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error(transparent)]
    Module(#[from] ModuleError),

    #[error(transparent)]
    Ocsp(#[from] OcspError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<x509_parser::nom::Err<x509_parser::error::X509Error>> for SignerError {
    fn from(err: x509_parser::nom::Err<x509_parser::error::X509Error>) -> Self {
        SignerError::Certificate(format!("{:?}", err))
    }
}
