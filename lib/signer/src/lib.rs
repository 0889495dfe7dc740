//! Signer token supervision library
//!
//! Discovers tokens in configured cryptographic modules, keeps their keys and
//! certificates in a shared registry, and verifies OCSP responses for the
//! certificates they hold.

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result)
)]

pub mod cert;
pub mod config;
pub mod error;
pub mod module;
pub mod ocsp;
pub mod registry;
pub mod token;

pub use cert::{CertId, Certificate, HashAlgorithm};
pub use config::{ModuleConfig, ModuleKind, ModulesFile, RemovalPolicy, SupervisorConfig};
pub use error::{ModuleError, OcspError, SignerError, ValidationStep};
pub use module::{
    BackendFactory, ModuleBackend, ModuleSupervisor, SupervisorError, SupervisorHandle,
    create_backend, default_backend_factory,
};
pub use ocsp::{
    CertStatus, OcspResponse, OcspVerifier, ResponderId, SignatureAlgorithm, SingleResponse,
    StaticTrustStore, TrustStore,
};
pub use registry::TokenRegistry;
pub use token::{
    CertificateInfo, CertificateStatus, KeyInfo, KeyUsage, TokenDescriptor, TokenInfo,
};
