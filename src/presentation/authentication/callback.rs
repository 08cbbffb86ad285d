//! Observers of the assessment stream.
//!
//! A callback sees every assessment as it is produced. Returning [ControlFlow::Break] stops
//! verification and rejects the response with that assessment. Once verification completes,
//! [VerificationCallback::accepts] decides the outcome from everything that was emitted.
use std::ops::ControlFlow;

use super::{VerificationAssessment, VerificationCategory};

pub trait VerificationCallback {
    fn on_assessment(&mut self, assessment: &VerificationAssessment) -> ControlFlow<()>;

    /// Accept iff nothing failed.
    fn accepts(&self, assessments: &[VerificationAssessment]) -> bool {
        !assessments.iter().any(VerificationAssessment::is_failed)
    }
}

/// Stops at the first FAILED assessment.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultCallback;

impl DefaultCallback {
    pub fn decide(&self, assessment: &VerificationAssessment) -> ControlFlow<()> {
        if assessment.is_failed() {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }
}

impl VerificationCallback for DefaultCallback {
    fn on_assessment(&mut self, assessment: &VerificationAssessment) -> ControlFlow<()> {
        self.decide(assessment)
    }
}

/// Never stops, so the report lists every check. The response is still rejected if anything
/// failed.
#[derive(Debug, Default, Clone, Copy)]
pub struct CollectAll;

impl VerificationCallback for CollectAll {
    fn on_assessment(&mut self, _: &VerificationAssessment) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }
}

/// Stops on a FAILED assessment in one of the listed categories and tolerates failures in the
/// others.
#[derive(Debug, Clone)]
pub struct AbortOnCategories(pub Vec<VerificationCategory>);

impl AbortOnCategories {
    fn is_fatal(&self, assessment: &VerificationAssessment) -> bool {
        assessment.is_failed() && self.0.contains(&assessment.category)
    }
}

impl VerificationCallback for AbortOnCategories {
    fn on_assessment(&mut self, assessment: &VerificationAssessment) -> ControlFlow<()> {
        if self.is_fatal(assessment) {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }

    fn accepts(&self, assessments: &[VerificationAssessment]) -> bool {
        !assessments.iter().any(|a| self.is_fatal(a))
    }
}

/// Wraps a closure that receives each assessment together with the [DefaultCallback], so it can
/// defer to the default for the assessments it does not want to handle itself.
///
/// The closure is the whole policy: a run it lets finish is accepted, whatever it tolerated.
///
/// ```
/// use std::ops::ControlFlow;
/// use mdoc_verifier::presentation::authentication::{OverrideCallback, VerificationCategory};
///
/// // Only issuer and data integrity failures are fatal.
/// let callback = OverrideCallback(|assessment, default| match assessment.category {
///     VerificationCategory::IssuerAuth | VerificationCategory::DataIntegrity => {
///         default.decide(assessment)
///     }
///     _ => ControlFlow::Continue(()),
/// });
/// ```
pub struct OverrideCallback<F>(pub F)
where
    F: FnMut(&VerificationAssessment, &DefaultCallback) -> ControlFlow<()>;

impl<F> VerificationCallback for OverrideCallback<F>
where
    F: FnMut(&VerificationAssessment, &DefaultCallback) -> ControlFlow<()>,
{
    fn on_assessment(&mut self, assessment: &VerificationAssessment) -> ControlFlow<()> {
        (self.0)(assessment, &DefaultCallback)
    }

    fn accepts(&self, _: &[VerificationAssessment]) -> bool {
        true
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::presentation::authentication::VerificationStatus;

    fn assessment(status: VerificationStatus, category: VerificationCategory) -> VerificationAssessment {
        match status {
            VerificationStatus::Passed => VerificationAssessment::passed(category, "check"),
            VerificationStatus::Failed => VerificationAssessment::failed(category, "check", "no"),
            VerificationStatus::Warning => {
                VerificationAssessment::warning(category, "check", "hm")
            }
        }
    }

    #[test]
    fn default_breaks_on_failure_only() {
        let mut callback = DefaultCallback;
        for status in [VerificationStatus::Passed, VerificationStatus::Warning] {
            assert!(callback
                .on_assessment(&assessment(status, VerificationCategory::IssuerAuth))
                .is_continue());
        }
        assert!(callback
            .on_assessment(&assessment(
                VerificationStatus::Failed,
                VerificationCategory::DeviceAuth
            ))
            .is_break());
    }

    #[test]
    fn override_can_defer_to_default() {
        let mut seen = 0;
        let mut callback = OverrideCallback(|a: &VerificationAssessment, default: &DefaultCallback| {
            seen += 1;
            match a.category {
                VerificationCategory::DeviceAuth => ControlFlow::Continue(()),
                _ => default.decide(a),
            }
        });
        assert!(callback
            .on_assessment(&assessment(
                VerificationStatus::Failed,
                VerificationCategory::DeviceAuth
            ))
            .is_continue());
        assert!(callback
            .on_assessment(&assessment(
                VerificationStatus::Warning,
                VerificationCategory::IssuerAuth
            ))
            .is_continue());
        assert!(callback
            .on_assessment(&assessment(
                VerificationStatus::Failed,
                VerificationCategory::DataIntegrity
            ))
            .is_break());
        assert!(callback.accepts(&[assessment(
            VerificationStatus::Failed,
            VerificationCategory::DeviceAuth
        )]));
        drop(callback);
        assert_eq!(seen, 3);
    }

    #[test]
    fn abort_on_categories_tolerates_others() {
        let callback = AbortOnCategories(vec![VerificationCategory::IssuerAuth]);
        let device = assessment(VerificationStatus::Failed, VerificationCategory::DeviceAuth);
        let issuer = assessment(VerificationStatus::Failed, VerificationCategory::IssuerAuth);
        assert!(callback.accepts(&[device.clone()]));
        assert!(!callback.accepts(&[device, issuer]));
        assert!(!CollectAll.accepts(&[assessment(
            VerificationStatus::Failed,
            VerificationCategory::DeviceAuth
        )]));
    }
}
