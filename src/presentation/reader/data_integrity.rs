//! DATA_INTEGRITY: every disclosed element against its digest in the MSO.
use std::ops::ControlFlow;

use ciborium::Value;

use super::{assess, issuer_auth::IssuerContext, Error, Recorder};
use crate::{
    capability::CryptoProvider,
    definitions::{device_response::Document, DigestAlgorithm, IssuerSignedItemBytes, Mso},
    presentation::authentication::{
        VerificationAssessment, VerificationCallback, VerificationCategory,
    },
};

pub const DIGEST_ALGORITHM_SUPPORTED: &str = "digest_algorithm_supported";
pub const ELEMENT_DIGEST_MATCHES: &str = "element_digest_matches";
pub const ISSUING_COUNTRY_MATCHES: &str = "issuing_country_matches_certificate";
pub const ISSUING_JURISDICTION_MATCHES: &str = "issuing_jurisdiction_matches_certificate";

const CATEGORY: VerificationCategory = VerificationCategory::DataIntegrity;

const MDL_NAMESPACE: &str = "org.iso.18013.5.1";
const ISSUING_COUNTRY: &str = "issuing_country";
const ISSUING_JURISDICTION: &str = "issuing_jurisdiction";

pub(super) async fn check<P, C>(
    provider: &P,
    document: &Document,
    mso: Option<&Mso>,
    issuer: &IssuerContext,
    recorder: &mut Recorder<'_, C>,
) -> ControlFlow<()>
where
    P: CryptoProvider,
    C: VerificationCallback + ?Sized,
{
    let Some(mso) = mso else {
        return recorder.emit(VerificationAssessment::failed(
            CATEGORY,
            DIGEST_ALGORITHM_SUPPORTED,
            Error::MsoUnavailable,
        ));
    };
    let Some(algorithm) = mso.digest_algorithm() else {
        return recorder.emit(VerificationAssessment::failed(
            CATEGORY,
            DIGEST_ALGORITHM_SUPPORTED,
            Error::UnsupportedDigestAlgorithm(mso.digest_algorithm.clone()),
        ));
    };
    recorder.emit(VerificationAssessment::passed(
        CATEGORY,
        DIGEST_ALGORITHM_SUPPORTED,
    ))?;

    for (namespace, items) in document.issuer_signed.namespaces.iter().flatten() {
        for (index, item) in items.iter().enumerate() {
            let element = match item.inner() {
                Ok(decoded) => decoded.element_identifier.clone(),
                Err(_) => format!("#{index}"),
            };
            let result = digest_matches(provider, mso, algorithm, namespace, item).await;
            recorder.emit(
                assess(CATEGORY, ELEMENT_DIGEST_MATCHES, result).for_element(namespace, element),
            )?;
        }

        if namespace == MDL_NAMESPACE {
            check_certificate_consistency(items, issuer, recorder)?;
        }
    }
    ControlFlow::Continue(())
}

async fn digest_matches<P: CryptoProvider>(
    provider: &P,
    mso: &Mso,
    algorithm: DigestAlgorithm,
    namespace: &str,
    item: &IssuerSignedItemBytes,
) -> Result<(), Error> {
    let digest_id = item.inner()?.digest_id;
    let expected = mso
        .digest(namespace, digest_id)
        .ok_or(Error::MissingDigest(digest_id))?;
    let actual = provider
        .digest(algorithm, &item.encoded()?)
        .await
        .map_err(Error::Capability)?;
    if actual == expected {
        Ok(())
    } else {
        Err(Error::DigestMismatch)
    }
}

/// `issuing_country` and `issuing_jurisdiction` must agree with the issuer certificate.
fn check_certificate_consistency<C>(
    items: &[IssuerSignedItemBytes],
    issuer: &IssuerContext,
    recorder: &mut Recorder<'_, C>,
) -> ControlFlow<()>
where
    C: VerificationCallback + ?Sized,
{
    let value_of = |id: &str| {
        items
            .iter()
            .filter_map(|item| item.inner().ok())
            .find(|item| item.element_identifier == id)
            .map(|item| &item.element_value)
    };

    if let Some(value) = value_of(ISSUING_COUNTRY) {
        let result = match &issuer.country {
            None => Err(Error::UnknownCertificateCountry),
            Some(country) => compare(ISSUING_COUNTRY, value, country),
        };
        recorder.emit(
            assess(CATEGORY, ISSUING_COUNTRY_MATCHES, result)
                .for_element(MDL_NAMESPACE, ISSUING_COUNTRY),
        )?;
    }

    if let (Some(value), Some(jurisdiction)) = (value_of(ISSUING_JURISDICTION), &issuer.jurisdiction)
    {
        let result = compare(ISSUING_JURISDICTION, value, jurisdiction);
        recorder.emit(
            assess(CATEGORY, ISSUING_JURISDICTION_MATCHES, result)
                .for_element(MDL_NAMESPACE, ISSUING_JURISDICTION),
        )?;
    }
    ControlFlow::Continue(())
}

fn compare(element: &'static str, value: &Value, certificate: &str) -> Result<(), Error> {
    let value = value.as_text().ok_or(Error::NotText(element))?;
    if value == certificate {
        Ok(())
    } else {
        Err(Error::CertificateMismatch {
            element,
            value: value.to_string(),
            certificate: certificate.to_string(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn country_comparison() {
        assert!(compare(ISSUING_COUNTRY, &Value::Text("US".into()), "US").is_ok());
        assert!(matches!(
            compare(ISSUING_COUNTRY, &Value::Text("FR".into()), "US"),
            Err(Error::CertificateMismatch { .. })
        ));
        assert!(matches!(
            compare(ISSUING_COUNTRY, &Value::Integer(1.into()), "US"),
            Err(Error::NotText(ISSUING_COUNTRY))
        ));
    }
}
