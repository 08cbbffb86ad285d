//! Mdoc authentication outcomes.
//!
//! Verification is reported as a stream of [VerificationAssessment]s. Each one names the check
//! that ran, its category, and whether it passed. A [VerificationCallback] observes the stream as
//! it is produced and may stop verification early.
use std::fmt;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

pub mod callback;

pub use callback::{
    AbortOnCategories, CollectAll, DefaultCallback, OverrideCallback, VerificationCallback,
};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, AsRefStr, Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStatus {
    Passed,
    Failed,
    Warning,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    AsRefStr,
    Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationCategory {
    DocumentFormat,
    DeviceAuth,
    IssuerAuth,
    DataIntegrity,
}

/// The namespace element a check was about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementRef {
    pub namespace: String,
    pub element_identifier: String,
}

/// The result of a single check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationAssessment {
    pub status: VerificationStatus,
    pub category: VerificationCategory,
    pub check: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element: Option<ElementRef>,
}

impl VerificationAssessment {
    pub fn passed(category: VerificationCategory, check: impl Into<String>) -> Self {
        Self::new(VerificationStatus::Passed, category, check, None)
    }

    pub fn failed(
        category: VerificationCategory,
        check: impl Into<String>,
        reason: impl fmt::Display,
    ) -> Self {
        Self::new(
            VerificationStatus::Failed,
            category,
            check,
            Some(reason.to_string()),
        )
    }

    pub fn warning(
        category: VerificationCategory,
        check: impl Into<String>,
        reason: impl fmt::Display,
    ) -> Self {
        Self::new(
            VerificationStatus::Warning,
            category,
            check,
            Some(reason.to_string()),
        )
    }

    fn new(
        status: VerificationStatus,
        category: VerificationCategory,
        check: impl Into<String>,
        reason: Option<String>,
    ) -> Self {
        Self {
            status,
            category,
            check: check.into(),
            reason,
            doc_type: None,
            element: None,
        }
    }

    pub fn for_doc_type(mut self, doc_type: impl Into<String>) -> Self {
        self.doc_type = Some(doc_type.into());
        self
    }

    pub fn for_element(
        mut self,
        namespace: impl Into<String>,
        element_identifier: impl Into<String>,
    ) -> Self {
        self.element = Some(ElementRef {
            namespace: namespace.into(),
            element_identifier: element_identifier.into(),
        });
        self
    }

    pub fn is_failed(&self) -> bool {
        self.status == VerificationStatus::Failed
    }
}

impl fmt::Display for VerificationAssessment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.category, self.status, self.check)?;
        if let Some(element) = &self.element {
            write!(f, " [{}/{}]", element.namespace, element.element_identifier)?;
        }
        if let Some(reason) = &self.reason {
            write!(f, " ({reason})")?;
        }
        Ok(())
    }
}

/// The outcome of authenticity checks.
#[derive(Debug, Serialize, Deserialize, Default, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticationStatus {
    #[default]
    Unchecked,
    Invalid,
    Valid,
}

impl AuthenticationStatus {
    /// Summarise the assessments of one category.
    pub fn from_assessments<'a>(
        assessments: impl IntoIterator<Item = &'a VerificationAssessment>,
    ) -> Self {
        assessments
            .into_iter()
            .fold(Self::Unchecked, |status, assessment| {
                match (status, assessment.status) {
                    (Self::Invalid, _) | (_, VerificationStatus::Failed) => Self::Invalid,
                    _ => Self::Valid,
                }
            })
    }
}
