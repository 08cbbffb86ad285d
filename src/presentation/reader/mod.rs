//! Reader side: verifying a [DeviceResponse].
//!
//! Verification runs four phases per document, in order: DOCUMENT_FORMAT, ISSUER_AUTH,
//! DATA_INTEGRITY and DEVICE_AUTH. Every check emits a [VerificationAssessment] to the caller's
//! [VerificationCallback]. Phases do not short-circuit each other; only the callback can stop
//! verification early. The final decision is returned as a [VerificationOutcome].
use std::ops::{ControlFlow, Range};

use coset::{iana, iana::EnumI64, CoseKey};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{
    capability::Provider,
    cbor::CborError,
    cose,
    definitions::{
        device_response, device_signed,
        helpers::data_item,
        issuer_signed, DeviceResponse, DigestId, SessionTranscript,
    },
    presentation::authentication::{
        AuthenticationStatus, CollectAll, VerificationAssessment, VerificationCallback,
        VerificationCategory, VerificationStatus,
    },
};

mod data_integrity;
mod device_auth;
pub mod diagnostics;
mod document_format;
mod issuer_auth;

pub use diagnostics::DiagnosticInformation;

/// Stable names of the checks, as they appear in [VerificationAssessment::check].
pub mod checks {
    pub use super::data_integrity::{
        DIGEST_ALGORITHM_SUPPORTED, ELEMENT_DIGEST_MATCHES, ISSUING_COUNTRY_MATCHES,
        ISSUING_JURISDICTION_MATCHES,
    };
    pub use super::device_auth::{
        DEVICE_AUTH_DETACHED, DEVICE_AUTH_FORM, DEVICE_ELEMENTS_AUTHORIZED, DEVICE_KEY_PRESENT, DEVICE_MAC_ALGORITHM,
        DEVICE_MAC_VALID, DEVICE_SIGNATURE_ALGORITHM, DEVICE_SIGNATURE_VALID,
        DEVICE_SIGNED_PRESENT, READER_KEY_SUPPLIED, SESSION_TRANSCRIPT_SUPPLIED,
    };
    pub use super::document_format::{
        DOCUMENTS_PRESENT, DOC_TYPE_PRESENT, ISSUER_AUTH_ALGORITHM, ISSUER_NAMESPACES_PRESENT,
        ISSUER_NAMESPACES_WELL_FORMED, MSO_DECODES, MSO_DOC_TYPE_MATCHES, RESPONSE_DECODES,
        VERSION_SUPPORTED,
    };
    pub use super::issuer_auth::{
        CERTIFICATE_CHAIN_TRUSTED, ISSUER_COUNTRY_PRESENT, ISSUER_SIGNATURE_VALID,
        MSO_SIGNED_WITHIN_CERTIFICATE_VALIDITY, MSO_VALIDITY_PERIOD, X5CHAIN_PRESENT,
    };
}

/// Reasons attached to FAILED and WARNING assessments.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unable to decode the device response: {0}")]
    ResponseDecoding(CborError),
    #[error("version '{found}' is below the minimum '{minimum}'")]
    UnsupportedVersion { found: String, minimum: String },
    #[error("version '{0}' is not a dotted number")]
    MalformedVersion(String),
    #[error("the response carries no documents")]
    NoDocuments,
    #[error("docType is empty")]
    EmptyDocType,
    #[error(transparent)]
    IssuerSigned(#[from] issuer_signed::Error),
    #[error("namespace '{0}' has no elements")]
    EmptyNamespace(String),
    #[error("no algorithm in the protected headers")]
    MissingAlgorithm,
    #[error("algorithm {0} is not allowed")]
    AlgorithmNotAllowed(i64),
    #[error(transparent)]
    Cose(#[from] cose::Error),
    #[error(transparent)]
    Document(#[from] device_response::Error),
    #[error("MSO docType '{mso}' does not match document docType '{document}'")]
    DocTypeMismatch { mso: String, document: String },
    #[error("the mobile security object is unavailable")]
    MsoUnavailable,
    #[error("no x5chain in the issuerAuth headers")]
    MissingX5Chain,
    #[error("no trust anchors configured")]
    NoTrustAnchors,
    #[error("certificate chain validation is disabled")]
    ChainValidationDisabled,
    #[error("capability call failed: {0}")]
    Capability(anyhow::Error),
    #[error("signature does not match")]
    SignatureMismatch,
    #[error("the issuer certificate names no country")]
    MissingCountry,
    #[error("MSO signed at {signed} outside the certificate validity {not_before} to {not_after}")]
    SignedOutsideCertificateValidity {
        signed: OffsetDateTime,
        not_before: OffsetDateTime,
        not_after: OffsetDateTime,
    },
    #[error("MSO is not valid at {0}")]
    MsoNotValidAt(OffsetDateTime),
    #[error("unsupported digest algorithm '{0}'")]
    UnsupportedDigestAlgorithm(String),
    #[error("no digest with ID {0} for this namespace")]
    MissingDigest(DigestId),
    #[error("digest does not match")]
    DigestMismatch,
    #[error("{element} is {value:?} but the issuer certificate says {certificate:?}")]
    CertificateMismatch {
        element: &'static str,
        value: String,
        certificate: String,
    },
    #[error("the issuer certificate country is unknown")]
    UnknownCertificateCountry,
    #[error("{0} is not a text string")]
    NotText(&'static str),
    #[error("no session transcript supplied")]
    MissingSessionTranscript,
    #[error("deviceSigned is absent")]
    MissingDeviceSigned,
    #[error("element '{1}' of namespace '{0}' is not authorized for the device key")]
    UnauthorizedElement(String, String),
    #[error("deviceAuth must carry exactly one of deviceSignature and deviceMac")]
    DeviceAuthForm,
    #[error("deviceAuth embeds its payload instead of leaving DeviceAuthenticationBytes detached")]
    EmbeddedDevicePayload,
    #[error("no reader ephemeral key supplied")]
    MissingReaderKey,
    #[error("unable to derive the ephemeral MAC key: {0}")]
    KeyDerivation(anyhow::Error),
    #[error("MAC does not match")]
    MacMismatch,
    #[error(transparent)]
    DeviceAuthentication(#[from] device_signed::Error),
    #[error(transparent)]
    DataItem(#[from] data_item::Error),
}

/// Verifier policy. Deserializable, so it can be loaded from the embedding application's
/// configuration; absent fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    /// Report the certificate chain check as a WARNING instead of running it.
    pub disable_certificate_chain_validation: bool,
    pub minimum_version: String,
    /// COSE algorithm identifiers accepted for issuerAuth and deviceSignature.
    pub allowed_signature_algorithms: Vec<i64>,
    /// COSE algorithm identifiers accepted for deviceMac.
    pub allowed_mac_algorithms: Vec<i64>,
    /// A document without deviceSigned fails DEVICE_AUTH instead of skipping it.
    pub require_device_signed: bool,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            disable_certificate_chain_validation: false,
            minimum_version: "1.0".to_string(),
            allowed_signature_algorithms: vec![
                iana::Algorithm::ES256.to_i64(),
                iana::Algorithm::ES384.to_i64(),
                iana::Algorithm::ES512.to_i64(),
                iana::Algorithm::EdDSA.to_i64(),
            ],
            allowed_mac_algorithms: vec![iana::Algorithm::HMAC_256_256.to_i64()],
            require_device_signed: false,
        }
    }
}

/// Per-call inputs.
#[derive(Debug, Clone, Default)]
pub struct VerifyOptions {
    pub session_transcript: Option<SessionTranscript>,
    /// The reader's ephemeral private key, needed to check a deviceMac.
    pub ephemeral_reader_key: Option<CoseKey>,
    /// The verification instant. Defaults to now.
    pub now: Option<OffsetDateTime>,
}

impl VerifyOptions {
    pub fn session_transcript(mut self, session_transcript: impl Into<SessionTranscript>) -> Self {
        self.session_transcript = Some(session_transcript.into());
        self
    }

    pub fn ephemeral_reader_key(mut self, key: CoseKey) -> Self {
        self.ephemeral_reader_key = Some(key);
        self
    }

    pub fn at(mut self, now: OffsetDateTime) -> Self {
        self.now = Some(now);
        self
    }
}

#[derive(Debug, Clone)]
pub enum VerificationOutcome {
    Accepted(DeviceResponse),
    /// The assessment that stopped verification, or every FAILED assessment when the callback
    /// let verification run to the end.
    Rejected(Vec<VerificationAssessment>),
}

#[derive(Debug, Clone)]
pub struct VerificationReport {
    pub assessments: Vec<VerificationAssessment>,
    pub outcome: VerificationOutcome,
    documents: Vec<Range<usize>>,
}

/// A serializable view of a [VerificationReport].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary<'a> {
    pub accepted: bool,
    pub issuer_authentication: AuthenticationStatus,
    pub device_authentication: AuthenticationStatus,
    pub assessments: &'a [VerificationAssessment],
}

impl VerificationReport {
    pub fn is_accepted(&self) -> bool {
        matches!(self.outcome, VerificationOutcome::Accepted(_))
    }

    pub fn failures(&self) -> impl Iterator<Item = &VerificationAssessment> {
        self.assessments.iter().filter(|a| a.is_failed())
    }

    pub fn issuer_authentication(&self) -> AuthenticationStatus {
        self.category_status(VerificationCategory::IssuerAuth)
    }

    pub fn device_authentication(&self) -> AuthenticationStatus {
        self.category_status(VerificationCategory::DeviceAuth)
    }

    /// The assessments emitted for the document at `index`, in emission order.
    pub fn document_assessments(&self, index: usize) -> &[VerificationAssessment] {
        self.documents
            .get(index)
            .and_then(|range| self.assessments.get(range.clone()))
            .unwrap_or_default()
    }

    pub fn summary(&self) -> ReportSummary<'_> {
        ReportSummary {
            accepted: self.is_accepted(),
            issuer_authentication: self.issuer_authentication(),
            device_authentication: self.device_authentication(),
            assessments: &self.assessments,
        }
    }

    fn category_status(&self, category: VerificationCategory) -> AuthenticationStatus {
        AuthenticationStatus::from_assessments(
            self.assessments.iter().filter(|a| a.category == category),
        )
    }
}

/// Collects assessments and forwards each one to the callback.
pub(crate) struct Recorder<'c, C: ?Sized> {
    callback: &'c mut C,
    assessments: Vec<VerificationAssessment>,
    aborted: Option<VerificationAssessment>,
    doc_type: Option<String>,
    documents: Vec<Range<usize>>,
}

impl<'c, C> Recorder<'c, C>
where
    C: VerificationCallback + ?Sized,
{
    fn new(callback: &'c mut C) -> Self {
        Self {
            callback,
            assessments: vec![],
            aborted: None,
            doc_type: None,
            documents: vec![],
        }
    }

    pub(crate) fn emit(&mut self, assessment: VerificationAssessment) -> ControlFlow<()> {
        let assessment = match &self.doc_type {
            Some(doc_type) => assessment.for_doc_type(doc_type.clone()),
            None => assessment,
        };
        match assessment.status {
            VerificationStatus::Failed => {
                tracing::warn!("{assessment}")
            }
            VerificationStatus::Warning => {
                tracing::info!("{assessment}")
            }
            VerificationStatus::Passed => {
                tracing::debug!("{assessment}")
            }
        }
        let flow = self.callback.on_assessment(&assessment);
        if flow.is_break() {
            self.aborted = Some(assessment.clone());
        }
        self.assessments.push(assessment);
        flow
    }

    fn finish(self, response: Option<DeviceResponse>) -> VerificationReport {
        let outcome = match (self.aborted, response) {
            (Some(assessment), _) => VerificationOutcome::Rejected(vec![assessment]),
            (None, Some(response)) if self.callback.accepts(&self.assessments) => {
                VerificationOutcome::Accepted(response)
            }
            (None, _) => VerificationOutcome::Rejected(
                self.assessments
                    .iter()
                    .filter(|a| a.is_failed())
                    .cloned()
                    .collect(),
            ),
        };
        VerificationReport {
            assessments: self.assessments,
            outcome,
            documents: self.documents,
        }
    }
}

/// Emits PASSED for `Ok`, FAILED with the error as reason otherwise.
pub(crate) fn assess(
    category: VerificationCategory,
    check: &'static str,
    result: Result<(), Error>,
) -> VerificationAssessment {
    match result {
        Ok(()) => VerificationAssessment::passed(category, check),
        Err(e) => VerificationAssessment::failed(category, check, e),
    }
}

/// `algorithm` must be present and one of `allowed`.
pub(crate) fn check_algorithm(
    algorithm: Result<Option<i64>, cose::Error>,
    allowed: &[i64],
) -> Result<(), Error> {
    match algorithm? {
        None => Err(Error::MissingAlgorithm),
        Some(alg) if allowed.contains(&alg) => Ok(()),
        Some(alg) => Err(Error::AlgorithmNotAllowed(alg)),
    }
}

/// Verifies device responses against a fixed set of trust anchors.
#[derive(Debug, Clone)]
pub struct Verifier<P> {
    provider: P,
    trust_anchors: Vec<Vec<u8>>,
    config: VerifierConfig,
}

impl<P> Verifier<P>
where
    P: Provider,
{
    /// `trust_anchors` are DER encoded certificates.
    pub fn new(provider: P, trust_anchors: Vec<Vec<u8>>) -> Self {
        Self {
            provider,
            trust_anchors,
            config: VerifierConfig::default(),
        }
    }

    pub fn with_config(mut self, config: VerifierConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Decode and verify an encoded `DeviceResponse`.
    pub async fn verify<C>(
        &self,
        bytes: &[u8],
        options: &VerifyOptions,
        callback: &mut C,
    ) -> VerificationReport
    where
        C: VerificationCallback + ?Sized,
    {
        let mut recorder = Recorder::new(callback);
        let response = match document_format::decode(bytes, &mut recorder) {
            ControlFlow::Continue(Some(response)) => response,
            _ => return recorder.finish(None),
        };
        let _ = self.run(&response, options, &mut recorder).await;
        recorder.finish(Some(response))
    }

    /// Verify a response that has already been decoded.
    pub async fn verify_response<C>(
        &self,
        response: DeviceResponse,
        options: &VerifyOptions,
        callback: &mut C,
    ) -> VerificationReport
    where
        C: VerificationCallback + ?Sized,
    {
        let mut recorder = Recorder::new(callback);
        let _ = self.run(&response, options, &mut recorder).await;
        recorder.finish(Some(response))
    }

    /// Run every check and describe the response, its documents and their validity.
    pub async fn diagnostic_information(
        &self,
        bytes: &[u8],
        options: &VerifyOptions,
    ) -> DiagnosticInformation {
        let report = self.verify(bytes, options, &mut CollectAll).await;
        diagnostics::collect(self, bytes, report).await
    }

    async fn run<C>(
        &self,
        response: &DeviceResponse,
        options: &VerifyOptions,
        recorder: &mut Recorder<'_, C>,
    ) -> ControlFlow<()>
    where
        C: VerificationCallback + ?Sized,
    {
        let now = options.now.unwrap_or_else(OffsetDateTime::now_utc);
        if !document_format::check_response(response, &self.config, recorder)? {
            return ControlFlow::Continue(());
        }
        for document in response.documents() {
            let start = recorder.assessments.len();
            recorder.doc_type = Some(document.doc_type.clone());
            let flow = self.run_document(document, options, now, recorder).await;
            recorder.documents.push(start..recorder.assessments.len());
            recorder.doc_type = None;
            flow?;
        }
        ControlFlow::Continue(())
    }

    async fn run_document<C>(
        &self,
        document: &device_response::Document,
        options: &VerifyOptions,
        now: OffsetDateTime,
        recorder: &mut Recorder<'_, C>,
    ) -> ControlFlow<()>
    where
        C: VerificationCallback + ?Sized,
    {
        tracing::debug!(doc_type = %document.doc_type, "verifying document");
        let mso = document_format::check_document(document, &self.config, recorder)?;
        let issuer = issuer_auth::check(self, document, mso.as_ref(), now, recorder).await?;
        data_integrity::check(&self.provider, document, mso.as_ref(), &issuer, recorder).await?;
        device_auth::check(self, document, mso.as_ref(), options, recorder).await
    }
}

/// Dotted numeric version comparison; `None` if either side is not a dotted number.
fn version_at_least(found: &str, minimum: &str) -> Option<bool> {
    let parse = |v: &str| {
        v.split('.')
            .map(|part| part.parse::<u64>().ok())
            .collect::<Option<Vec<_>>>()
    };
    Some(parse(found)? >= parse(minimum)?)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn config_defaults_apply_to_missing_fields() {
        let config: VerifierConfig =
            serde_json::from_str(r#"{ "require_device_signed": true }"#).unwrap();
        assert!(config.require_device_signed);
        assert_eq!(config.minimum_version, "1.0");
        assert_eq!(config.allowed_signature_algorithms, vec![-7, -35, -36, -8]);
        assert_eq!(config.allowed_mac_algorithms, vec![5]);
    }

    #[test]
    fn versions() {
        assert_eq!(version_at_least("1.0", "1.0"), Some(true));
        assert_eq!(version_at_least("1.1", "1.0"), Some(true));
        assert_eq!(version_at_least("0.9", "1.0"), Some(false));
        assert_eq!(version_at_least("one", "1.0"), None);
    }

    #[test]
    fn algorithm_policy() {
        assert!(check_algorithm(Ok(Some(-7)), &[-7]).is_ok());
        assert!(matches!(
            check_algorithm(Ok(Some(-8)), &[-7]),
            Err(Error::AlgorithmNotAllowed(-8))
        ));
        assert!(matches!(
            check_algorithm(Ok(None), &[-7]),
            Err(Error::MissingAlgorithm)
        ));
    }
}
