//! Learner progress through one course.
//!
//! A record is seeded from the course outline at enrollment and keeps that shape for its whole
//! life: chapter `i` of the record is chapter `i` of the outline as it was then. Derived fields
//! (`overall_progress`, chapter `completed`) are written only by [`super::aggregate::recompute`];
//! sticky fields (`passed`, `completed`, `certificate_issued`) only move from false to true.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;

use crate::course::CourseOutline;
use crate::error::{Error, Result};

/// Monotonic merge for sticky flags: once true, stays true.
pub fn merge_sticky(old: bool, computed: bool) -> bool {
    old || computed
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ProgressRecord {
    pub student_id: i64,
    pub course_id: i64,
    pub chapters: Vec<ChapterProgress>,
    pub(super) overall_progress: u8,
    /// Resume pointer, advanced on lecture completion
    pub current_chapter_index: usize,
    pub current_lecture_index: usize,
    certificate_issued: bool,
    certificate_id: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    completed_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub enrolled_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub update_time: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ChapterProgress {
    pub lectures: Vec<LectureProgress>,
    pub quizzes: Vec<QuizProgress>,
    /// Same shape as a quiz: attempts, sticky `passed`, best score
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_assessment: Option<QuizProgress>,
    pub(super) completed: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub(super) completed_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LectureProgress {
    pub lecture_id: String,
    completed: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    completed_at: Option<OffsetDateTime>,
    /// Watched seconds, only ever raised by additive deltas
    time_spent: u32,
}

/// Attempt history of a chapter quiz or a final assessment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct QuizProgress {
    attempts: Vec<Attempt>,
    passed: bool,
    best_score: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Attempt {
    pub score: u8,
    pub total_questions: usize,
    pub per_answer_correctness: Vec<bool>,
    #[serde(with = "time::serde::rfc3339")]
    pub attempted_at: OffsetDateTime,
}

impl ProgressRecord {
    /// A fresh record shaped like `outline`, with derived fields already computed.
    pub fn seed(student_id: i64, course_id: i64, outline: &CourseOutline, now: OffsetDateTime) -> Self {
        let chapters = outline
            .chapters
            .iter()
            .map(|chapter| ChapterProgress {
                lectures: chapter
                    .lectures
                    .iter()
                    .map(|lecture| LectureProgress::new(lecture.id.clone()))
                    .collect(),
                quizzes: vec![QuizProgress::default(); chapter.quizzes.len()],
                final_assessment: chapter.final_assessment.as_ref().map(|_| QuizProgress::default()),
                completed: false,
                completed_at: None,
            })
            .collect();
        let mut record = Self {
            student_id,
            course_id,
            chapters,
            overall_progress: 0,
            current_chapter_index: 0,
            current_lecture_index: 0,
            certificate_issued: false,
            certificate_id: None,
            completed_at: None,
            enrolled_at: now,
            update_time: now,
        };
        super::aggregate::recompute(&mut record);
        record
    }

    pub fn overall_progress(&self) -> u8 {
        self.overall_progress
    }

    pub fn certificate_issued(&self) -> bool {
        self.certificate_issued
    }

    pub fn certificate_id(&self) -> Option<&str> {
        self.certificate_id.as_deref()
    }

    pub fn completed_at(&self) -> Option<OffsetDateTime> {
        self.completed_at
    }

    /// Every item done: 100%, every chapter completed, every final assessment passed.
    pub fn is_course_complete(&self) -> bool {
        self.overall_progress == 100
            && self.chapters.iter().all(|chapter| {
                chapter.completed
                    && chapter.final_assessment.as_ref().is_none_or(|assessment| assessment.passed)
            })
    }

    pub fn chapter(&self, chapter_index: usize) -> Result<&ChapterProgress> {
        self.chapters
            .get(chapter_index)
            .ok_or_else(|| Error::not_found(format!("chapter {chapter_index}")))
    }

    pub(crate) fn chapter_mut(&mut self, chapter_index: usize) -> Result<&mut ChapterProgress> {
        self.chapters
            .get_mut(chapter_index)
            .ok_or_else(|| Error::not_found(format!("chapter {chapter_index}")))
    }

    pub fn lecture(&self, chapter_index: usize, lecture_index: usize) -> Result<&LectureProgress> {
        self.chapter(chapter_index)?.lectures.get(lecture_index).ok_or_else(|| {
            Error::not_found(format!("lecture {lecture_index} in chapter {chapter_index}"))
        })
    }

    pub(crate) fn lecture_mut(
        &mut self,
        chapter_index: usize,
        lecture_index: usize,
    ) -> Result<&mut LectureProgress> {
        self.chapter_mut(chapter_index)?.lectures.get_mut(lecture_index).ok_or_else(|| {
            Error::not_found(format!("lecture {lecture_index} in chapter {chapter_index}"))
        })
    }

    /// Move the resume pointer past a completed lecture. Never moves it backwards.
    pub(crate) fn advance_resume_pointer(&mut self, chapter_index: usize, lecture_index: usize) {
        let lecture_count = self.chapters.get(chapter_index).map_or(0, |c| c.lectures.len());
        let next = if lecture_index + 1 < lecture_count {
            (chapter_index, lecture_index + 1)
        } else if chapter_index + 1 < self.chapters.len() {
            (chapter_index + 1, 0)
        } else {
            (chapter_index, lecture_index)
        };
        if next > (self.current_chapter_index, self.current_lecture_index) {
            (self.current_chapter_index, self.current_lecture_index) = next;
        }
    }

    /// Record an issued certificate. The first id wins; later calls leave the record as is.
    pub(crate) fn merge_certificate(&mut self, certificate_id: String, completed_at: OffsetDateTime) {
        if self.certificate_issued {
            return;
        }
        self.certificate_issued = merge_sticky(self.certificate_issued, true);
        self.certificate_id = Some(certificate_id);
        self.completed_at = Some(completed_at);
    }
}

impl ChapterProgress {
    pub fn completed(&self) -> bool {
        self.completed
    }

    pub fn completed_at(&self) -> Option<OffsetDateTime> {
        self.completed_at
    }

    pub fn all_lectures_completed(&self) -> bool {
        self.lectures.iter().all(LectureProgress::completed)
    }

    pub fn all_quizzes_passed(&self) -> bool {
        self.quizzes.iter().all(QuizProgress::passed)
    }
}

impl LectureProgress {
    pub fn new(lecture_id: String) -> Self {
        Self { lecture_id, completed: false, completed_at: None, time_spent: 0 }
    }

    pub fn completed(&self) -> bool {
        self.completed
    }

    pub fn completed_at(&self) -> Option<OffsetDateTime> {
        self.completed_at
    }

    pub fn time_spent(&self) -> u32 {
        self.time_spent
    }

    /// Returns whether this call completed the lecture.
    pub(crate) fn mark_completed(&mut self, at: OffsetDateTime) -> bool {
        if self.completed {
            return false;
        }
        self.completed = merge_sticky(self.completed, true);
        self.completed_at = Some(at);
        true
    }

    /// `time_spent += delta`, bounded by `cap` when the duration is known. A cap below the
    /// stored value leaves the stored value alone.
    pub(crate) fn add_time(&mut self, delta: u32, cap: Option<u32>) -> u32 {
        let raised = self.time_spent.saturating_add(delta);
        let capped = cap.map_or(raised, |cap| raised.min(cap));
        self.time_spent = self.time_spent.max(capped);
        self.time_spent
    }
}

impl QuizProgress {
    pub fn attempts(&self) -> &[Attempt] {
        &self.attempts
    }

    pub fn passed(&self) -> bool {
        self.passed
    }

    pub fn best_score(&self) -> u8 {
        self.best_score
    }

    /// Append an attempt; `best_score` is a running max and `passed` is sticky.
    pub(crate) fn record_attempt(&mut self, attempt: Attempt, passed: bool) {
        self.best_score = self.best_score.max(attempt.score);
        self.passed = merge_sticky(self.passed, passed);
        self.attempts.push(attempt);
    }
}
