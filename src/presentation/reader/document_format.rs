//! DOCUMENT_FORMAT: structural checks on the response and each document.
use std::ops::ControlFlow;

use super::{assess, check_algorithm, version_at_least, Error, Recorder, VerifierConfig};
use crate::{
    cbor,
    definitions::{device_response::Document, DeviceResponse, Mso},
    presentation::authentication::{
        VerificationAssessment, VerificationCallback, VerificationCategory,
    },
};

pub const RESPONSE_DECODES: &str = "response_decodes";
pub const VERSION_SUPPORTED: &str = "version_supported";
pub const DOCUMENTS_PRESENT: &str = "documents_present";
pub const DOC_TYPE_PRESENT: &str = "doc_type_present";
pub const ISSUER_NAMESPACES_PRESENT: &str = "issuer_namespaces_present";
pub const ISSUER_NAMESPACES_WELL_FORMED: &str = "issuer_namespaces_well_formed";
pub const ISSUER_AUTH_ALGORITHM: &str = "issuer_auth_algorithm_allowed";
pub const MSO_DECODES: &str = "mso_decodes";
pub const MSO_DOC_TYPE_MATCHES: &str = "mso_doc_type_matches";

const CATEGORY: VerificationCategory = VerificationCategory::DocumentFormat;

/// Parse the top-level bytes. `Continue(None)` means the bytes were not a response.
pub(super) fn decode<C>(
    bytes: &[u8],
    recorder: &mut Recorder<'_, C>,
) -> ControlFlow<(), Option<DeviceResponse>>
where
    C: VerificationCallback + ?Sized,
{
    match cbor::from_slice::<DeviceResponse>(bytes) {
        Ok(response) => {
            recorder.emit(VerificationAssessment::passed(CATEGORY, RESPONSE_DECODES))?;
            ControlFlow::Continue(Some(response))
        }
        Err(e) => {
            recorder.emit(VerificationAssessment::failed(
                CATEGORY,
                RESPONSE_DECODES,
                Error::ResponseDecoding(e),
            ))?;
            ControlFlow::Continue(None)
        }
    }
}

/// Response-level checks. Yields whether there are documents to verify.
pub(super) fn check_response<C>(
    response: &DeviceResponse,
    config: &VerifierConfig,
    recorder: &mut Recorder<'_, C>,
) -> ControlFlow<(), bool>
where
    C: VerificationCallback + ?Sized,
{
    let version = match version_at_least(&response.version, &config.minimum_version) {
        Some(true) => Ok(()),
        Some(false) => Err(Error::UnsupportedVersion {
            found: response.version.clone(),
            minimum: config.minimum_version.clone(),
        }),
        None => Err(Error::MalformedVersion(response.version.clone())),
    };
    recorder.emit(assess(CATEGORY, VERSION_SUPPORTED, version))?;

    let has_documents = !response.documents().is_empty();
    let documents = if has_documents {
        Ok(())
    } else {
        Err(Error::NoDocuments)
    };
    recorder.emit(assess(CATEGORY, DOCUMENTS_PRESENT, documents))?;
    ControlFlow::Continue(has_documents)
}

/// Per-document checks. Yields the MSO when it could be decoded.
pub(super) fn check_document<C>(
    document: &Document,
    config: &VerifierConfig,
    recorder: &mut Recorder<'_, C>,
) -> ControlFlow<(), Option<Mso>>
where
    C: VerificationCallback + ?Sized,
{
    let doc_type = if document.doc_type.is_empty() {
        Err(Error::EmptyDocType)
    } else {
        Ok(())
    };
    recorder.emit(assess(CATEGORY, DOC_TYPE_PRESENT, doc_type))?;

    let issuer_signed = &document.issuer_signed;
    match &issuer_signed.namespaces {
        None => {
            recorder.emit(assess(
                CATEGORY,
                ISSUER_NAMESPACES_PRESENT,
                Err(crate::definitions::issuer_signed::Error::MissingNamespaces.into()),
            ))?;
        }
        Some(namespaces) => {
            recorder.emit(VerificationAssessment::passed(
                CATEGORY,
                ISSUER_NAMESPACES_PRESENT,
            ))?;
            let well_formed = namespaces
                .iter()
                .find(|(_, items)| items.is_empty())
                .map_or(Ok(()), |(name, _)| Err(Error::EmptyNamespace(name.clone())))
                .and_then(|()| issuer_signed.all_namespaces().map(drop).map_err(Error::from));
            recorder.emit(assess(CATEGORY, ISSUER_NAMESPACES_WELL_FORMED, well_formed))?;
        }
    }

    let algorithm = check_algorithm(
        issuer_signed.issuer_auth.algorithm(),
        &config.allowed_signature_algorithms,
    );
    recorder.emit(assess(CATEGORY, ISSUER_AUTH_ALGORITHM, algorithm))?;

    let mso = match document.mso() {
        Ok(mso) => {
            recorder.emit(VerificationAssessment::passed(CATEGORY, MSO_DECODES))?;
            mso
        }
        Err(e) => {
            recorder.emit(assess(CATEGORY, MSO_DECODES, Err(e.into())))?;
            return ControlFlow::Continue(None);
        }
    };

    let doc_type = if mso.doc_type == document.doc_type {
        Ok(())
    } else {
        Err(Error::DocTypeMismatch {
            mso: mso.doc_type.clone(),
            document: document.doc_type.clone(),
        })
    };
    recorder.emit(assess(CATEGORY, MSO_DOC_TYPE_MATCHES, doc_type))?;
    ControlFlow::Continue(Some(mso))
}
