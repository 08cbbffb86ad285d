use std::collections::BTreeMap;

use anyhow::{Context, Result};
use ciborium::Value;
use coset::{iana, CoseKey};
use time::{Duration, OffsetDateTime};

use mdoc_verifier::capability::software::{self, SoftwareProvider};
use mdoc_verifier::cbor;
use mdoc_verifier::definitions::{
    DeviceKeyInfo, DeviceResponse, DigestAlgorithm, SessionTranscript, ValidityInfo,
};
use mdoc_verifier::issuance::{Mdoc, Namespaces};
use mdoc_verifier::presentation::device::DeviceResponseBuilder;
use mdoc_verifier::presentation::reader::{Verifier, VerifyOptions};

pub const DOC_TYPE: &str = "org.iso.18013.5.1.mDL";
pub const NAMESPACE: &str = "org.iso.18013.5.1";

#[allow(dead_code)]
fn main() {}

fn der(pem: &str) -> Vec<u8> {
    pem_rfc7468::decode_vec(pem.as_bytes())
        .map(|(_, der)| der)
        .expect("fixture is a PEM document")
}

pub fn iaca_certificate() -> Vec<u8> {
    der(include_str!("data/iaca-cert.pem"))
}

#[allow(dead_code)]
pub fn other_iaca_certificate() -> Vec<u8> {
    der(include_str!("data/other-iaca-cert.pem"))
}

pub fn issuer_certificate() -> Vec<u8> {
    der(include_str!("data/issuer-cert.pem"))
}

pub fn issuer_key() -> Result<CoseKey> {
    software::p256_private_key_from_pem(include_str!("data/issuer-key.pem"))
}

/// `given_name` is the second element in identifier order, so it gets digest ID 1.
pub fn namespaces() -> Namespaces {
    BTreeMap::from([(
        NAMESPACE.to_string(),
        BTreeMap::from([
            ("age_over_18".to_string(), Value::Bool(true)),
            ("given_name".to_string(), Value::Text("ALICE".into())),
            ("issuing_country".to_string(), Value::Text("US".into())),
            ("issuing_jurisdiction".to_string(), Value::Text("NY".into())),
        ]),
    )])
}

pub fn session_transcript() -> SessionTranscript {
    SessionTranscript::new(
        Value::Null,
        Value::Null,
        Value::Text("integration handover".into()),
    )
}

/// A holder with an mdoc issued under the example IACA.
pub struct Holder {
    pub mdoc: Mdoc,
    pub device_private: CoseKey,
    #[allow(dead_code)]
    pub device_public: CoseKey,
}

impl Holder {
    pub async fn new() -> Result<Self> {
        Self::with_namespaces(namespaces()).await
    }

    pub async fn with_namespaces(namespaces: Namespaces) -> Result<Self> {
        Self::issue(namespaces, DigestAlgorithm::SHA256).await
    }

    #[allow(dead_code)]
    pub async fn with_digest_algorithm(digest_algorithm: DigestAlgorithm) -> Result<Self> {
        Self::issue(namespaces(), digest_algorithm).await
    }

    async fn issue(namespaces: Namespaces, digest_algorithm: DigestAlgorithm) -> Result<Self> {
        let (device_private, device_public) = SoftwareProvider::generate_p256_key_pair();
        let now = OffsetDateTime::now_utc();
        let mdoc = Mdoc::builder()
            .doc_type(DOC_TYPE)
            .namespaces(namespaces)
            .validity_info(ValidityInfo {
                signed: now,
                valid_from: now - Duration::hours(1),
                valid_until: now + Duration::days(365),
                expected_update: None,
            })
            .digest_algorithm(digest_algorithm)
            .device_key_info(DeviceKeyInfo {
                device_key: device_public.clone(),
                key_authorizations: None,
                key_info: None,
            })
            .x5chain(vec![issuer_certificate()])
            .issue(&SoftwareProvider, &issuer_key()?, iana::Algorithm::ES256)
            .await
            .context("failed to issue mdoc")?;
        Ok(Self {
            mdoc,
            device_private,
            device_public,
        })
    }

    /// A response whose document is authenticated with a device signature.
    pub async fn signed_response(&self) -> Result<Vec<u8>> {
        let response = DeviceResponseBuilder::new(self.mdoc.clone())
            .session_transcript(session_transcript())
            .authenticate_with_signature(self.device_private.clone(), iana::Algorithm::ES256)
            .build(&SoftwareProvider)
            .await
            .context("failed to build device response")?;
        encode(response)
    }

    /// A response without deviceSigned.
    #[allow(dead_code)]
    pub fn issuer_only_response(&self) -> Result<Vec<u8>> {
        encode(DeviceResponse::new(vec![self.mdoc.to_document()]))
    }
}

pub fn encode(response: DeviceResponse) -> Result<Vec<u8>> {
    cbor::to_vec(&response).context("failed to encode device response")
}

#[allow(dead_code)]
pub fn verifier() -> Verifier<SoftwareProvider> {
    Verifier::new(SoftwareProvider, vec![iaca_certificate()])
}

pub fn options() -> VerifyOptions {
    VerifyOptions::default().session_transcript(session_transcript())
}
