//! A serialisable description of a response and the outcome of every check run on it.
use std::collections::BTreeMap;

use coset::{iana, iana::EnumI64, AsCborValue};
use serde::Serialize;
use time::OffsetDateTime;

use super::{checks, VerificationReport, Verifier};
use crate::{
    capability::{CertificateData, Provider},
    cbor::{self, extensions},
    definitions::{device_response::Document, DeviceAuthType, DeviceResponse, ValidityInfo},
    presentation::authentication::{
        VerificationAssessment, VerificationCategory, VerificationStatus,
    },
};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticInformation {
    pub general: General,
    pub documents: Vec<DocumentDiagnostics>,
    pub assessments: Vec<VerificationAssessment>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct General {
    pub version: Option<String>,
    pub status: Option<u64>,
    pub documents: usize,
    pub accepted: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentDiagnostics {
    pub doc_type: String,
    pub validity_info: Option<Validity>,
    pub issuer_certificate: Option<CertificateData>,
    pub issuer_signature: IssuerSignature,
    pub device_key: Option<serde_json::Value>,
    pub device_signature: Option<DeviceSignature>,
    pub data_integrity: DataIntegrity,
    pub attributes: Vec<Attribute>,
}

/// The MSO validity window as RFC 3339 strings.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Validity {
    #[serde(with = "time::serde::rfc3339")]
    pub signed: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub valid_from: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub valid_until: OffsetDateTime,
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub expected_update: Option<OffsetDateTime>,
}

impl From<ValidityInfo> for Validity {
    fn from(info: ValidityInfo) -> Self {
        Self {
            signed: info.signed,
            valid_from: info.valid_from,
            valid_until: info.valid_until,
            expected_update: info.expected_update,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuerSignature {
    pub alg: Option<String>,
    pub is_valid: bool,
    pub reasons: Vec<String>,
    /// Number of digests per namespace in the MSO.
    pub digests: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSignature {
    pub kind: DeviceAuthType,
    pub alg: Option<String>,
    pub is_valid: bool,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataIntegrity {
    /// "n of m" elements whose digest matched.
    pub disclosed_attributes: String,
    pub is_valid: bool,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Attribute {
    pub namespace: String,
    pub identifier: String,
    pub value: serde_json::Value,
    pub is_valid: bool,
}

pub(super) async fn collect<P: Provider>(
    verifier: &Verifier<P>,
    bytes: &[u8],
    report: VerificationReport,
) -> DiagnosticInformation {
    let response = cbor::from_slice::<DeviceResponse>(bytes).ok();
    let mut general = General {
        accepted: report.is_accepted(),
        ..Default::default()
    };
    let mut documents = vec![];
    if let Some(response) = &response {
        general.version = Some(response.version.clone());
        general.status = Some(response.status.into());
        general.documents = response.documents().len();
        for (index, document) in response.documents().iter().enumerate() {
            let assessments = report.document_assessments(index);
            documents.push(describe(verifier, document, assessments).await);
        }
    }
    DiagnosticInformation {
        general,
        documents,
        assessments: report.assessments,
    }
}

async fn describe<P: Provider>(
    verifier: &Verifier<P>,
    document: &Document,
    assessments: &[VerificationAssessment],
) -> DocumentDiagnostics {
    let mso = document.mso().ok();
    let issuer_auth = &document.issuer_signed.issuer_auth;

    let leaf = issuer_auth
        .x5chain()
        .ok()
        .flatten()
        .and_then(|chain| chain.into_iter().next());
    let issuer_certificate = match leaf {
        Some(leaf) => match verifier.provider.get_certificate_data(&leaf).await {
            Ok(data) => Some(data),
            Err(e) => {
                tracing::warn!("unable to describe the issuer certificate: {e:#}");
                None
            }
        },
        None => None,
    };

    let issuer_signature = IssuerSignature {
        alg: issuer_auth.algorithm().ok().flatten().map(algorithm_name),
        is_valid: !failed_in(assessments, VerificationCategory::IssuerAuth),
        reasons: reasons_in(assessments, VerificationCategory::IssuerAuth),
        digests: mso
            .iter()
            .flat_map(|mso| mso.value_digests.iter())
            .map(|(namespace, ids)| (namespace.clone(), ids.len()))
            .collect(),
    };

    let device_key = mso
        .as_ref()
        .and_then(|mso| mso.device_key_info.device_key.clone().to_cbor_value().ok())
        .map(|key| extensions::to_json(&key));

    let device_signature = document.device_signed.as_ref().and_then(|device_signed| {
        let device_auth = &device_signed.device_auth;
        let kind = device_auth.auth_type()?;
        let alg = match kind {
            DeviceAuthType::Sign1 => device_auth
                .device_signature
                .as_ref()
                .and_then(|s| s.algorithm().ok().flatten()),
            DeviceAuthType::Mac0 => device_auth
                .device_mac
                .as_ref()
                .and_then(|m| m.algorithm().ok().flatten()),
        };
        Some(DeviceSignature {
            kind,
            alg: alg.map(algorithm_name),
            is_valid: !failed_in(assessments, VerificationCategory::DeviceAuth),
            reasons: reasons_in(assessments, VerificationCategory::DeviceAuth),
        })
    });

    let element_checks: Vec<_> = assessments
        .iter()
        .filter(|a| a.check == checks::ELEMENT_DIGEST_MATCHES)
        .collect();
    let matched = element_checks
        .iter()
        .filter(|a| a.status == VerificationStatus::Passed)
        .count();
    let data_integrity = DataIntegrity {
        disclosed_attributes: format!("{matched} of {}", element_checks.len()),
        is_valid: !failed_in(assessments, VerificationCategory::DataIntegrity),
        reasons: reasons_in(assessments, VerificationCategory::DataIntegrity),
    };

    let attributes = document
        .issuer_signed
        .namespaces
        .iter()
        .flatten()
        .flat_map(|(namespace, items)| {
            items
                .iter()
                .filter_map(|item| item.inner().ok())
                .map(move |item| (namespace, item))
        })
        .map(|(namespace, item)| Attribute {
            namespace: namespace.clone(),
            identifier: item.element_identifier.clone(),
            value: extensions::to_json(&item.element_value),
            is_valid: element_checks.iter().any(|a| {
                a.status == VerificationStatus::Passed
                    && a.element.as_ref().is_some_and(|e| {
                        e.namespace == *namespace && e.element_identifier == item.element_identifier
                    })
            }),
        })
        .collect();

    DocumentDiagnostics {
        doc_type: document.doc_type.clone(),
        validity_info: mso.map(|mso| mso.validity_info.into()),
        issuer_certificate,
        issuer_signature,
        device_key,
        device_signature,
        data_integrity,
        attributes,
    }
}

fn failed_in(assessments: &[VerificationAssessment], category: VerificationCategory) -> bool {
    assessments
        .iter()
        .any(|a| a.category == category && a.is_failed())
}

fn reasons_in(assessments: &[VerificationAssessment], category: VerificationCategory) -> Vec<String> {
    assessments
        .iter()
        .filter(|a| a.category == category && a.status != VerificationStatus::Passed)
        .filter_map(|a| a.reason.as_ref().map(|r| format!("{}: {r}", a.check)))
        .collect()
}

fn algorithm_name(alg: i64) -> String {
    iana::Algorithm::from_i64(alg)
        .map(|alg| format!("{alg:?}"))
        .unwrap_or_else(|| alg.to_string())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn algorithm_names() {
        assert_eq!(algorithm_name(-7), "ES256");
        assert_eq!(algorithm_name(5), "HMAC_256_256");
        assert_eq!(algorithm_name(-70000), "-70000");
    }

    #[test]
    fn validity_renders_as_rfc3339() {
        use time::macros::datetime;

        let validity = Validity::from(ValidityInfo {
            signed: datetime!(2026-10-18 13:00:00 UTC),
            valid_from: datetime!(2026-10-18 13:00:00 UTC),
            valid_until: datetime!(2027-10-18 13:00:00 UTC),
            expected_update: None,
        });
        assert_eq!(
            serde_json::to_value(validity).unwrap(),
            serde_json::json!({
                "signed": "2026-10-18T13:00:00Z",
                "validFrom": "2026-10-18T13:00:00Z",
                "validUntil": "2027-10-18T13:00:00Z",
            })
        );
    }

    #[test]
    fn reasons_skip_passed_checks() {
        let assessments = vec![
            VerificationAssessment::passed(VerificationCategory::IssuerAuth, "a"),
            VerificationAssessment::warning(VerificationCategory::IssuerAuth, "b", "disabled"),
            VerificationAssessment::failed(VerificationCategory::DeviceAuth, "c", "mismatch"),
        ];
        assert_eq!(
            reasons_in(&assessments, VerificationCategory::IssuerAuth),
            vec!["b: disabled".to_string()]
        );
        assert!(!failed_in(&assessments, VerificationCategory::IssuerAuth));
        assert!(failed_in(&assessments, VerificationCategory::DeviceAuth));
    }
}
