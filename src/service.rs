//! Learner-facing operations.
//!
//! Every write goes through one pipeline: take the per-record lock, load (or enroll), apply the
//! action, recompute derived state, give the certification trigger its chance, then save with a
//! compare-and-set. Anything that fails before the save leaves the stored record as it was.

use std::sync::Arc;

use serde::Serialize;
use sqlx::SqlitePool;
use tracing::warn;
use utoipa::ToSchema;

use crate::certificate::{
    Certificate, CertificateIssuer, CertificationTrigger, IssueOutcome, SqliteCertificateIssuer,
};
use crate::config::Config;
use crate::course::{CourseOutline, CourseOutlineProvider, SqliteOutlineProvider};
use crate::error::{Error, Result};
use crate::progress::{AccessMap, ProgressRecord, ProgressStore, VersionedRecord};
use crate::progress::{aggregate, apply, gating};
use crate::student;
use crate::utils::now_utc;
use crate::watch::completion_eligible;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CompletionStatus {
    pub progress: ProgressRecord,
    pub course_completed: bool,
    /// Certificate issued by this very call, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<Certificate>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct QuizSubmission {
    pub score: u8,
    pub passed: bool,
    pub correct_count: usize,
    pub total_questions: usize,
    pub per_answer: Vec<bool>,
    pub progress: ProgressRecord,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FinalAssessmentSubmission {
    pub score: u8,
    pub passed: bool,
    pub correct_count: usize,
    pub total_questions: usize,
    pub progress: ProgressRecord,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct WatchTimeAck {
    /// Stored watched seconds of the lecture after this delta
    pub time_spent: u32,
    /// Whether enough of the lecture has been watched to offer completion. Reported only;
    /// lecture completion does not check it.
    pub completion_eligible: bool,
    pub progress: ProgressRecord,
}

struct Mutation<T> {
    record: ProgressRecord,
    value: T,
    certificate: Option<Certificate>,
}

pub struct ProgressService {
    store: ProgressStore,
    outlines: Arc<dyn CourseOutlineProvider>,
    trigger: CertificationTrigger,
    quiz_passing_score: u8,
    completion_ratio_percent: u8,
    max_write_retries: u32,
}

impl ProgressService {
    pub fn new(
        database: SqlitePool,
        outlines: Arc<dyn CourseOutlineProvider>,
        issuer: Arc<dyn CertificateIssuer>,
        config: &Config,
    ) -> Self {
        Self {
            store: ProgressStore::new(database, &config.store),
            outlines,
            trigger: CertificationTrigger::new(issuer, config.certificate.issuer_timeout()),
            quiz_passing_score: config.grading.quiz_passing_score,
            completion_ratio_percent: config.watch.completion_ratio_percent,
            max_write_retries: config.store.max_write_retries,
        }
    }

    /// Outlines, progress and certificates all in the one SQLite database.
    pub fn from_database(database: SqlitePool, config: &Config) -> Self {
        let outlines = Arc::new(SqliteOutlineProvider::new(database.clone(), &config.outline_cache));
        let issuer = Arc::new(SqliteCertificateIssuer::new(database.clone()));
        Self::new(database, outlines, issuer, config)
    }

    pub fn store(&self) -> &ProgressStore {
        &self.store
    }

    async fn mutate<T, F>(&self, student_id: i64, course_id: i64, mut action: F) -> Result<Mutation<T>>
    where
        F: FnMut(&mut ProgressRecord, &CourseOutline) -> Result<T>,
    {
        let outline = self.outlines.get(course_id).await?;
        let _guard = self.store.lock(student_id, course_id).await;
        // survives a lost compare-and-set: the retry then sees the certificate as already issued
        let mut issued = None;
        for attempt in 0..=self.max_write_retries {
            let VersionedRecord { mut record, version } =
                self.store.load_or_seed(student_id, &outline).await?;
            record.update_time = now_utc();
            let value = action(&mut record, &outline)?;
            aggregate::recompute(&mut record);
            if let Some(IssueOutcome::Issued(certificate)) = self.trigger.maybe_issue(&mut record).await {
                issued = Some(certificate);
            }
            if self.store.save(&record, version).await? {
                return Ok(Mutation { record, value, certificate: issued });
            }
            warn!(
                "progress of student {} in course {} was written concurrently, attempt {}",
                student_id, course_id, attempt
            );
        }
        Err(Error::Conflict(format!(
            "progress of student {student_id} in course {course_id} kept changing, gave up after {} attempts",
            self.max_write_retries + 1
        )))
    }

    /// The learner's record, enrolling them on first access.
    pub async fn get_progress(&self, student_id: i64, course_id: i64) -> Result<ProgressRecord> {
        let outline = self.outlines.get(course_id).await?;
        Ok(self.store.load_or_seed(student_id, &outline).await?.record)
    }

    pub async fn list_progress(&self, student_id: i64) -> Result<Vec<ProgressRecord>> {
        student::get_student(self.store.database(), student_id).await?;
        self.store.list_for_student(student_id).await
    }

    pub async fn access_map(&self, student_id: i64, course_id: i64) -> Result<AccessMap> {
        let progress = self.get_progress(student_id, course_id).await?;
        Ok(gating::access_map(&progress))
    }

    pub async fn complete_lecture(
        &self,
        student_id: i64,
        course_id: i64,
        chapter_index: usize,
        lecture_index: usize,
    ) -> Result<CompletionStatus> {
        let mutation = self
            .mutate(student_id, course_id, |record, _| {
                apply::complete_lecture(record, chapter_index, lecture_index)
            })
            .await?;
        Ok(completion_status(mutation))
    }

    pub async fn submit_quiz(
        &self,
        student_id: i64,
        course_id: i64,
        chapter_index: usize,
        answers: &[usize],
    ) -> Result<QuizSubmission> {
        let threshold = self.quiz_passing_score;
        let Mutation { record, value: grade, .. } = self
            .mutate(student_id, course_id, |record, outline| {
                let chapter = outline.chapter(chapter_index)?;
                apply::submit_quiz(record, chapter_index, chapter, answers, threshold)
            })
            .await?;
        Ok(QuizSubmission {
            score: grade.score,
            passed: grade.passed(threshold),
            correct_count: grade.correct_count,
            total_questions: grade.total_questions,
            per_answer: grade.per_answer,
            progress: record,
        })
    }

    pub async fn submit_final_assessment(
        &self,
        student_id: i64,
        course_id: i64,
        chapter_index: usize,
        answers: &[usize],
    ) -> Result<FinalAssessmentSubmission> {
        let Mutation { record, value: (grade, passed), .. } = self
            .mutate(student_id, course_id, |record, outline| {
                let chapter = outline.chapter(chapter_index)?;
                apply::submit_final_assessment(record, chapter_index, chapter, answers)
            })
            .await?;
        Ok(FinalAssessmentSubmission {
            score: grade.score,
            passed,
            correct_count: grade.correct_count,
            total_questions: grade.total_questions,
            progress: record,
        })
    }

    /// Additive: `time_spent += delta_seconds`, capped at the lecture's outline duration.
    pub async fn add_watch_time(
        &self,
        student_id: i64,
        course_id: i64,
        chapter_index: usize,
        lecture_index: usize,
        delta_seconds: u32,
    ) -> Result<WatchTimeAck> {
        let Mutation { record, value: (time_spent, duration), .. } = self
            .mutate(student_id, course_id, |record, outline| {
                let duration = outline
                    .lecture(chapter_index, lecture_index)
                    .ok()
                    .and_then(|lecture| lecture.duration_seconds);
                let time_spent =
                    apply::add_watch_time(record, chapter_index, lecture_index, delta_seconds, duration)?;
                Ok((time_spent, duration))
            })
            .await?;
        Ok(WatchTimeAck {
            time_spent,
            completion_eligible: completion_eligible(time_spent, duration, self.completion_ratio_percent),
            progress: record,
        })
    }

    pub async fn get_certificate(&self, student_id: i64, course_id: i64) -> Result<Certificate> {
        self.trigger
            .issuer()
            .find(student_id, course_id)
            .await?
            .ok_or_else(|| {
                Error::not_found(format!("certificate of student {student_id} in course {course_id}"))
            })
    }

    /// Re-run certification without a new learner action. Unlike the writes above, a failing
    /// issuer is reported to the caller.
    pub async fn retry_certification(&self, student_id: i64, course_id: i64) -> Result<CompletionStatus> {
        let mutation = self.mutate(student_id, course_id, |_, _| Ok(())).await?;
        let status = completion_status(mutation);
        if status.course_completed && !status.progress.certificate_issued() {
            return Err(Error::ExternalDependency(format!(
                "certificate of student {student_id} in course {course_id} could not be issued, try again later"
            )));
        }
        Ok(status)
    }
}

fn completion_status<T>(mutation: Mutation<T>) -> CompletionStatus {
    CompletionStatus {
        course_completed: mutation.record.is_course_complete(),
        progress: mutation.record,
        certificate: mutation.certificate,
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use pretty_assertions::assert_eq;

    use super::test_helpers::Fixture;
    use super::*;
    use crate::certificate::trigger::fakes::FakeIssuer;
    use crate::course::outline::fixtures::chapter;

    #[tokio::test]
    async fn two_chapter_course_round_trip_issues_certificate() {
        let fixture = Fixture::new().await;
        let service = fixture.sqlite_service();
        let student = fixture.student_id;

        let status = service.complete_lecture(student, 1, 0, 0).await.unwrap();
        assert_eq!(status.progress.overall_progress(), 25);
        service.complete_lecture(student, 1, 0, 1).await.unwrap();
        let quiz = service.submit_quiz(student, 1, 0, &[0]).await.unwrap();
        assert!(quiz.passed);
        assert_eq!(quiz.progress.overall_progress(), 75);
        let status = service.complete_lecture(student, 1, 1, 0).await.unwrap();

        assert!(status.course_completed);
        assert_eq!(status.progress.overall_progress(), 100);
        assert!(status.progress.certificate_issued());
        let certificate = status.certificate.unwrap();
        assert_eq!(certificate.grade, Some(100));
        assert_eq!(status.progress.certificate_id(), Some(certificate.certificate_id.as_str()));
        let stored = service.get_certificate(student, 1).await.unwrap();
        assert_eq!(stored.certificate_id, certificate.certificate_id);
        assert_eq!(stored.course_name, "Ownership in Practice");
        assert_eq!((status.progress.current_chapter_index, status.progress.current_lecture_index), (1, 0));
    }

    #[tokio::test]
    async fn out_of_order_lecture_is_forbidden_and_not_stored() {
        let fixture = Fixture::new().await;
        let service = fixture.sqlite_service();
        let before = service.get_progress(fixture.student_id, 1).await.unwrap();
        let result = service.complete_lecture(fixture.student_id, 1, 0, 1).await;
        assert!(matches!(result, Err(Error::Forbidden(_))));
        let after = service.get_progress(fixture.student_id, 1).await.unwrap();
        assert_eq!(after, before);
    }

    #[tokio::test]
    async fn short_answer_list_is_rejected_without_attempt() {
        let fixture = Fixture::new().await;
        fixture
            .outlines
            .put(
                &CourseOutline { course_id: 2, title: "quizzes".into(), chapters: vec![chapter(0, 3, None)] },
                None,
            )
            .await
            .unwrap();
        let service = fixture.sqlite_service();
        let result = service.submit_quiz(fixture.student_id, 2, 0, &[0, 1]).await;
        assert!(matches!(result, Err(Error::Validation(_))));
        let progress = service.get_progress(fixture.student_id, 2).await.unwrap();
        assert!(progress.chapters[0].quizzes.iter().all(|quiz| quiz.attempts().is_empty()));
    }

    #[tokio::test]
    async fn unknown_student_course_or_index_is_not_found() {
        let fixture = Fixture::new().await;
        let service = fixture.sqlite_service();
        assert!(matches!(service.get_progress(999, 1).await, Err(Error::NotFound(_))));
        assert!(matches!(service.get_progress(fixture.student_id, 999).await, Err(Error::NotFound(_))));
        assert!(matches!(service.list_progress(999).await, Err(Error::NotFound(_))));
        assert!(matches!(
            service.complete_lecture(fixture.student_id, 1, 7, 0).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            service.get_certificate(fixture.student_id, 1).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn repeated_watch_flush_stops_at_duration() {
        let fixture = Fixture::new().await;
        let service = fixture.sqlite_service();
        let ack = service.add_watch_time(fixture.student_id, 1, 0, 0, 75).await.unwrap();
        assert_eq!(ack.time_spent, 75);
        assert!(!ack.completion_eligible);
        let ack = service.add_watch_time(fixture.student_id, 1, 0, 0, 10).await.unwrap();
        assert_eq!(ack.time_spent, 85);
        assert!(ack.completion_eligible);
        // the fixture lecture lasts 100 seconds
        service.add_watch_time(fixture.student_id, 1, 0, 0, 10).await.unwrap();
        let ack = service.add_watch_time(fixture.student_id, 1, 0, 0, 10).await.unwrap();
        assert_eq!(ack.time_spent, 100);
        assert_eq!(ack.progress.overall_progress(), 0);
    }

    #[tokio::test]
    async fn final_assessment_waits_for_quizzes() {
        let fixture = Fixture::new().await;
        fixture
            .outlines
            .put(
                &CourseOutline { course_id: 3, title: "final".into(), chapters: vec![chapter(1, 1, Some(2))] },
                None,
            )
            .await
            .unwrap();
        let service = fixture.sqlite_service();
        let student = fixture.student_id;
        service.complete_lecture(student, 3, 0, 0).await.unwrap();
        let result = service.submit_final_assessment(student, 3, 0, &[0, 1]).await;
        assert!(matches!(result, Err(Error::Forbidden(_))));

        service.submit_quiz(student, 3, 0, &[0]).await.unwrap();
        let failed = service.submit_final_assessment(student, 3, 0, &[0, 0]).await.unwrap();
        assert_eq!(failed.score, 50);
        assert!(!failed.passed);
        assert!(!failed.progress.certificate_issued());
        let passed = service.submit_final_assessment(student, 3, 0, &[0, 1]).await.unwrap();
        assert!(passed.passed);
        assert!(passed.progress.certificate_issued());
        let access = service.access_map(student, 3).await.unwrap();
        assert_eq!(access.chapters[0].final_assessment, Some(true));
    }

    #[tokio::test]
    async fn concurrent_completing_writes_issue_one_certificate() {
        let fixture = Fixture::new().await;
        let issuer = Arc::new(FakeIssuer::default());
        let service = fixture.service(issuer.clone(), &Config::default());
        let student = fixture.student_id;
        service.complete_lecture(student, 1, 0, 0).await.unwrap();
        service.complete_lecture(student, 1, 0, 1).await.unwrap();
        service.submit_quiz(student, 1, 0, &[0]).await.unwrap();

        let (a, b) = tokio::join!(
            service.complete_lecture(student, 1, 1, 0),
            service.complete_lecture(student, 1, 1, 0)
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(issuer.issued_count(), 1);
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.progress.certificate_id(), b.progress.certificate_id());
        assert!(a.certificate.is_some() != b.certificate.is_some());
    }

    #[tokio::test]
    async fn services_sharing_a_database_do_not_lose_writes() {
        let fixture = Fixture::new().await;
        let mut config = Config::default();
        config.store.max_write_retries = 50;
        let issuer: Arc<dyn CertificateIssuer> = Arc::new(FakeIssuer::default());
        let first = fixture.service(issuer.clone(), &config);
        let second = fixture.service(issuer, &config);
        let student = fixture.student_id;
        first.get_progress(student, 1).await.unwrap();

        async fn flush(service: &ProgressService, student: i64) {
            for _ in 0..10 {
                service.add_watch_time(student, 1, 0, 0, 3).await.unwrap();
            }
        }
        tokio::join!(flush(&first, student), flush(&second, student));
        let progress = first.get_progress(student, 1).await.unwrap();
        assert_eq!(progress.chapters[0].lectures[0].time_spent(), 60);
    }

    #[tokio::test]
    async fn issuer_outage_does_not_block_progress() {
        let fixture = Fixture::new().await;
        let issuer = Arc::new(FakeIssuer::failing(2));
        let service = fixture.service(issuer.clone(), &Config::default());
        let student = fixture.student_id;
        service.complete_lecture(student, 1, 0, 0).await.unwrap();
        service.complete_lecture(student, 1, 0, 1).await.unwrap();
        service.submit_quiz(student, 1, 0, &[0]).await.unwrap();

        let status = service.complete_lecture(student, 1, 1, 0).await.unwrap();
        assert!(status.course_completed);
        assert!(!status.progress.certificate_issued());
        assert!(status.certificate.is_none());

        let retry = service.retry_certification(student, 1).await;
        assert!(matches!(retry, Err(Error::ExternalDependency(_))));

        let status = service.retry_certification(student, 1).await.unwrap();
        assert!(status.progress.certificate_issued());
        assert!(status.certificate.is_some());
        let stored = service.get_progress(student, 1).await.unwrap();
        assert_eq!(stored.certificate_id(), status.progress.certificate_id());
    }

    #[tokio::test]
    async fn certificate_from_an_earlier_write_is_not_reported_as_new() {
        let fixture = Fixture::new().await;
        let issuer = Arc::new(FakeIssuer::default());
        let service = fixture.service(issuer.clone(), &Config::default());
        let student = fixture.student_id;
        service.complete_lecture(student, 1, 0, 0).await.unwrap();
        service.complete_lecture(student, 1, 0, 1).await.unwrap();
        service.submit_quiz(student, 1, 0, &[0]).await.unwrap();
        // issued by a writer whose record update never landed
        let existing = issuer.issue(student, 1, None).await.unwrap().into_certificate();

        let status = service.complete_lecture(student, 1, 1, 0).await.unwrap();
        assert!(status.course_completed);
        assert_eq!(status.progress.certificate_id(), Some(existing.certificate_id.as_str()));
        assert!(status.certificate.is_none());
        assert_eq!(issuer.issued_count(), 1);
    }

    #[tokio::test]
    async fn list_progress_covers_enrolled_courses() {
        let fixture = Fixture::new().await;
        let service = fixture.sqlite_service();
        assert!(service.list_progress(fixture.student_id).await.unwrap().is_empty());
        service.complete_lecture(fixture.student_id, 1, 0, 0).await.unwrap();
        let records = service.list_progress(fixture.student_id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].overall_progress(), 25);
    }
}
