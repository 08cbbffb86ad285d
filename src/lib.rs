//! ISO/IEC 18013-5 mobile document (mdoc) verification.
//!
//! The crate decodes a `DeviceResponse`, checks the issuer's certificate chain and signature,
//! recomputes every disclosed element's digest against the mobile security object, and checks
//! the holder device's signature or MAC over the session. Each check is reported as a
//! [VerificationAssessment](presentation::authentication::VerificationAssessment); see
//! [Verifier](presentation::reader::Verifier) for the entry point.
//!
//! Cryptography and certificate handling are reached only through the traits in [capability].
//! [capability::software::SoftwareProvider] implements them with the RustCrypto crates.
//!
//! The [issuance] and [presentation::device] modules produce documents and responses, which is
//! mostly useful for testing verifiers.
pub mod capability;
pub mod cbor;
pub mod cose;
pub mod definitions;
pub mod issuance;
pub mod presentation;
