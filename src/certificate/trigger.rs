use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use super::issuer::{CertificateIssuer, IssueOutcome};
use crate::error::{Error, Result};
use crate::progress::ProgressRecord;

/// Mean best score over the final assessments, or over the quizzes when the course has no final
/// assessment. `None` for a course with neither.
pub fn course_grade(progress: &ProgressRecord) -> Option<u8> {
    let finals: Vec<u8> = progress
        .chapters
        .iter()
        .filter_map(|chapter| chapter.final_assessment.as_ref().map(|a| a.best_score()))
        .collect();
    let scores = if finals.is_empty() {
        progress
            .chapters
            .iter()
            .flat_map(|chapter| chapter.quizzes.iter().map(|q| q.best_score()))
            .collect()
    } else {
        finals
    };
    if scores.is_empty() {
        return None;
    }
    let sum: u64 = scores.iter().map(|&s| u64::from(s)).sum();
    let count = scores.len() as u64;
    Some(((2 * sum + count) / (2 * count)) as u8)
}

/// Issues the course certificate the first time a record becomes complete.
pub struct CertificationTrigger {
    issuer: Arc<dyn CertificateIssuer>,
    timeout: Duration,
}

impl CertificationTrigger {
    pub fn new(issuer: Arc<dyn CertificateIssuer>, timeout: Duration) -> Self {
        Self { issuer, timeout }
    }

    pub fn issuer(&self) -> &Arc<dyn CertificateIssuer> {
        &self.issuer
    }

    pub fn should_issue(progress: &ProgressRecord) -> bool {
        progress.is_course_complete() && !progress.certificate_issued()
    }

    /// Issue if the record qualifies and merge the certificate into it. Issuer failures are
    /// logged and absorbed: the record stays uncertified and the next qualifying write retries.
    pub async fn maybe_issue(&self, progress: &mut ProgressRecord) -> Option<IssueOutcome> {
        if !Self::should_issue(progress) {
            return None;
        }
        match self.issue(progress).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(
                    "certificate for student {} in course {} not issued: {}",
                    progress.student_id, progress.course_id, e
                );
                None
            }
        }
    }

    /// Time-bounded issue call. Relies on the issuer being idempotent, so a call that timed out
    /// on our side but succeeded on the issuer's is merged on the next try.
    pub async fn issue(&self, progress: &mut ProgressRecord) -> Result<IssueOutcome> {
        let grade = course_grade(progress);
        let outcome = tokio::time::timeout(
            self.timeout,
            self.issuer.issue(progress.student_id, progress.course_id, grade),
        )
        .await
        .map_err(|_| {
            Error::ExternalDependency(format!("certificate issuer timed out after {:?}", self.timeout))
        })?
        .map_err(|e| match e {
            e if e.is_client_error() => e,
            other => Error::ExternalDependency(format!("certificate issuer: {other}")),
        })?;
        let certificate = outcome.certificate();
        progress.merge_certificate(certificate.certificate_id.clone(), certificate.completion_date);
        Ok(outcome)
    }
}
