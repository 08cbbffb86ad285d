//! Capabilities the verification engine relies on but does not implement.
//!
//! Cryptographic primitives and certificate handling are reached only through these traits, so
//! callers can back them with hardware keys, remote signers or a PKI library of their choice.
//! Every operation may suspend. [software::SoftwareProvider] is a pure-Rust implementation of
//! all three.
pub mod software;

use std::future::Future;

use coset::CoseKey;
use serde::Serialize;
use strum_macros::{AsRefStr, Display, EnumString};
use time::OffsetDateTime;

use crate::cose::{CoseMac0, CoseSign1, PreparedCoseMac0, PreparedCoseSign1};
use crate::definitions::DigestAlgorithm;

/// Result is used for all collaborator errors.
pub type Result<T> = anyhow::Result<T>;

/// Randomness, hashing and key agreement.
pub trait CryptoProvider: Send + Sync {
    /// `length` bytes from a cryptographically secure source.
    fn random(&self, length: usize) -> impl Future<Output = Result<Vec<u8>>> + Send;

    fn digest(
        &self,
        algorithm: DigestAlgorithm,
        bytes: &[u8],
    ) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Derive the `EMacKey` shared by device and reader.
    ///
    /// Called with either the device private key and reader public key, or the reader private
    /// key and device public key; both yield the same symmetric key.
    fn calculate_ephemeral_mac_key(
        &self,
        private_key: &CoseKey,
        public_key: &CoseKey,
        session_transcript_bytes: &[u8],
    ) -> impl Future<Output = Result<CoseKey>> + Send;
}

/// Signing and MAC operations over COSE envelopes.
///
/// Verification reports a mismatch as `Ok(false)`. `Err` means the operation could not be
/// attempted, e.g. an unusable key or an unsupported algorithm.
pub trait CoseProvider: Send + Sync {
    fn sign1_sign(
        &self,
        sign1: &PreparedCoseSign1,
        key: &CoseKey,
    ) -> impl Future<Output = Result<Vec<u8>>> + Send;

    fn sign1_verify(
        &self,
        sign1: &CoseSign1,
        key: &CoseKey,
        detached_payload: Option<&[u8]>,
    ) -> impl Future<Output = Result<bool>> + Send;

    fn mac0_tag(
        &self,
        mac0: &PreparedCoseMac0,
        key: &CoseKey,
    ) -> impl Future<Output = Result<Vec<u8>>> + Send;

    fn mac0_verify(
        &self,
        mac0: &CoseMac0,
        key: &CoseKey,
        detached_payload: Option<&[u8]>,
    ) -> impl Future<Output = Result<bool>> + Send;
}

/// X.509 certificate handling. Certificates are DER encoded.
pub trait X509Provider: Send + Sync {
    /// Succeeds when `x5chain` (leaf first) chains up to one of `trusted_certificates`.
    fn validate_certificate_chain(
        &self,
        trusted_certificates: &[Vec<u8>],
        x5chain: &[Vec<u8>],
    ) -> impl Future<Output = Result<()>> + Send;

    /// The certificate's public key as a COSE_Key suitable for verifying `alg`.
    fn get_public_key(
        &self,
        certificate: &[u8],
        alg: i64,
    ) -> impl Future<Output = Result<CoseKey>> + Send;

    fn get_certificate_data(
        &self,
        certificate: &[u8],
    ) -> impl Future<Output = Result<CertificateData>> + Send;

    /// Values of `field` in the certificate's issuer name, in order of appearance.
    fn get_issuer_name_field(
        &self,
        certificate: &[u8],
        field: NameField,
    ) -> impl Future<Output = Result<Vec<String>>> + Send;
}

/// Everything the engine needs, in one bound.
pub trait Provider: CryptoProvider + CoseProvider + X509Provider {}
impl<T> Provider for T where T: CryptoProvider + CoseProvider + X509Provider {}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateData {
    pub issuer_name: String,
    pub subject_name: String,
    /// Hex encoded.
    pub serial_number: String,
    /// SHA-256 of the DER encoding, hex encoded.
    pub thumbprint: String,
    #[serde(with = "time::serde::rfc3339")]
    pub not_before: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub not_after: OffsetDateTime,
    pub pem: String,
}

impl CertificateData {
    pub fn is_valid_at(&self, at: OffsetDateTime) -> bool {
        self.not_before <= at && at <= self.not_after
    }
}

/// Distinguished name attributes by their short name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, EnumString, AsRefStr, Display)]
pub enum NameField {
    C,
    ST,
    O,
    OU,
    CN,
    L,
}
