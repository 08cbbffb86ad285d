//! ISSUER_AUTH: the issuer's certificate chain and its signature over the MSO.
use std::ops::ControlFlow;

use time::OffsetDateTime;

use super::{assess, Error, Recorder, Verifier};
use crate::{
    capability::{NameField, Provider},
    definitions::{device_response::Document, Mso},
    presentation::authentication::{
        VerificationAssessment, VerificationCallback, VerificationCategory,
    },
};

pub const X5CHAIN_PRESENT: &str = "x5chain_present";
pub const CERTIFICATE_CHAIN_TRUSTED: &str = "certificate_chain_trusted";
pub const ISSUER_SIGNATURE_VALID: &str = "issuer_signature_valid";
pub const ISSUER_COUNTRY_PRESENT: &str = "issuer_country_present";
pub const MSO_SIGNED_WITHIN_CERTIFICATE_VALIDITY: &str = "mso_signed_within_certificate_validity";
pub const MSO_VALIDITY_PERIOD: &str = "mso_validity_period";

const CATEGORY: VerificationCategory = VerificationCategory::IssuerAuth;

/// What the issuer certificate says about where the document comes from.
#[derive(Debug, Clone, Default)]
pub(crate) struct IssuerContext {
    pub country: Option<String>,
    pub jurisdiction: Option<String>,
}

pub(super) async fn check<P, C>(
    verifier: &Verifier<P>,
    document: &Document,
    mso: Option<&Mso>,
    now: OffsetDateTime,
    recorder: &mut Recorder<'_, C>,
) -> ControlFlow<(), IssuerContext>
where
    P: Provider,
    C: VerificationCallback + ?Sized,
{
    let mut context = IssuerContext::default();
    let issuer_auth = &document.issuer_signed.issuer_auth;

    let chain = match issuer_auth.x5chain() {
        Ok(Some(chain)) if !chain.is_empty() => Ok(chain),
        Ok(_) => Err(Error::MissingX5Chain),
        Err(e) => Err(e.into()),
    };
    match chain {
        Err(e) => {
            recorder.emit(VerificationAssessment::failed(CATEGORY, X5CHAIN_PRESENT, e))?;
        }
        Ok(chain) => {
            recorder.emit(VerificationAssessment::passed(CATEGORY, X5CHAIN_PRESENT))?;
            recorder.emit(trust_chain(verifier, &chain).await)?;

            let provider = &verifier.provider;
            let leaf = &chain[0];
            let signature = verify_signature(provider, document, leaf).await;
            recorder.emit(assess(CATEGORY, ISSUER_SIGNATURE_VALID, signature))?;

            let country = match provider.get_issuer_name_field(leaf, NameField::C).await {
                Ok(values) => values.into_iter().find(|c| !c.is_empty()),
                Err(e) => {
                    tracing::warn!("unable to read the issuer country: {e:#}");
                    None
                }
            };
            let present = country.as_ref().map(drop).ok_or(Error::MissingCountry);
            recorder.emit(assess(CATEGORY, ISSUER_COUNTRY_PRESENT, present))?;
            context.country = country;
            context.jurisdiction = match provider.get_issuer_name_field(leaf, NameField::ST).await {
                Ok(values) => values.into_iter().find(|st| !st.is_empty()),
                Err(e) => {
                    tracing::warn!("unable to read the issuer jurisdiction: {e:#}");
                    None
                }
            };

            let signed = match mso {
                None => Err(Error::MsoUnavailable),
                Some(mso) => signed_within_certificate(provider, leaf, mso).await,
            };
            recorder.emit(assess(
                CATEGORY,
                MSO_SIGNED_WITHIN_CERTIFICATE_VALIDITY,
                signed,
            ))?;
        }
    }

    let validity = match mso {
        None => Err(Error::MsoUnavailable),
        Some(mso) if mso.validity_info.is_valid_at(now) => Ok(()),
        Some(_) => Err(Error::MsoNotValidAt(now)),
    };
    recorder.emit(assess(CATEGORY, MSO_VALIDITY_PERIOD, validity))?;
    ControlFlow::Continue(context)
}

async fn trust_chain<P: Provider>(
    verifier: &Verifier<P>,
    chain: &[Vec<u8>],
) -> VerificationAssessment {
    if verifier.config.disable_certificate_chain_validation {
        return VerificationAssessment::warning(
            CATEGORY,
            CERTIFICATE_CHAIN_TRUSTED,
            Error::ChainValidationDisabled,
        );
    }
    let result = if verifier.trust_anchors.is_empty() {
        Err(Error::NoTrustAnchors)
    } else {
        verifier
            .provider
            .validate_certificate_chain(&verifier.trust_anchors, chain)
            .await
            .map_err(Error::Capability)
    };
    assess(CATEGORY, CERTIFICATE_CHAIN_TRUSTED, result)
}

async fn verify_signature<P: Provider>(
    provider: &P,
    document: &Document,
    leaf: &[u8],
) -> Result<(), Error> {
    let issuer_auth = &document.issuer_signed.issuer_auth;
    let alg = issuer_auth.algorithm()?.ok_or(Error::MissingAlgorithm)?;
    let key = provider
        .get_public_key(leaf, alg)
        .await
        .map_err(Error::Capability)?;
    if issuer_auth.verify(provider, &key, None).await? {
        Ok(())
    } else {
        Err(Error::SignatureMismatch)
    }
}

async fn signed_within_certificate<P: Provider>(
    provider: &P,
    leaf: &[u8],
    mso: &Mso,
) -> Result<(), Error> {
    let certificate = provider
        .get_certificate_data(leaf)
        .await
        .map_err(Error::Capability)?;
    let signed = mso.validity_info.signed;
    if certificate.is_valid_at(signed) {
        Ok(())
    } else {
        Err(Error::SignedOutsideCertificateValidity {
            signed,
            not_before: certificate.not_before,
            not_after: certificate.not_after,
        })
    }
}
