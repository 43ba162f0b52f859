//! Learner actions applied to an in-memory record.
//!
//! Each function validates first and mutates last, so an `Err` leaves the record untouched.
//! Callers stamp `update_time` before applying and run [`super::aggregate::recompute`] after.

use super::gating::{self, ItemKind};
use super::grading::{self, Grade};
use super::record::ProgressRecord;
use crate::course::Chapter;
use crate::error::{Error, Result};

fn outline_changed(chapter_index: usize) -> Error {
    Error::Conflict(format!("course outline of chapter {chapter_index} changed since enrollment"))
}

/// Returns whether this call completed the lecture; repeating it is a no-op.
pub fn complete_lecture(
    progress: &mut ProgressRecord,
    chapter_index: usize,
    lecture_index: usize,
) -> Result<bool> {
    gating::check_access(progress, chapter_index, lecture_index, ItemKind::Lecture)?;
    let now = progress.update_time;
    let newly_completed = progress.lecture_mut(chapter_index, lecture_index)?.mark_completed(now);
    progress.advance_resume_pointer(chapter_index, lecture_index);
    Ok(newly_completed)
}

/// Grade one submission covering every quiz of the chapter, in quiz order.
///
/// The same attempt is appended to each quiz; `passed` is sticky per quiz.
pub fn submit_quiz(
    progress: &mut ProgressRecord,
    chapter_index: usize,
    chapter: &Chapter,
    answers: &[usize],
    passing_score: u8,
) -> Result<Grade> {
    let current = progress.chapter(chapter_index)?;
    if current.quizzes.len() != chapter.quizzes.len() {
        return Err(outline_changed(chapter_index));
    }
    let grade = grading::score(&chapter.quiz_questions(), answers)?;
    if !gating::quizzes_unlocked(current) {
        return Err(Error::forbidden(format!(
            "quizzes in chapter {chapter_index} require every lecture of the chapter"
        )));
    }
    let passed = grade.passed(passing_score);
    let attempt = grade.to_attempt(progress.update_time);
    for quiz in &mut progress.chapter_mut(chapter_index)?.quizzes {
        quiz.record_attempt(attempt.clone(), passed);
    }
    Ok(grade)
}

/// Grade the chapter's final assessment against its own passing score.
pub fn submit_final_assessment(
    progress: &mut ProgressRecord,
    chapter_index: usize,
    chapter: &Chapter,
    answers: &[usize],
) -> Result<(Grade, bool)> {
    let assessment = chapter.final_assessment.as_ref().ok_or_else(|| {
        Error::not_found(format!("final assessment in chapter {chapter_index}"))
    })?;
    if progress.chapter(chapter_index)?.final_assessment.is_none() {
        return Err(outline_changed(chapter_index));
    }
    let grade = grading::score(&assessment.questions, answers)?;
    gating::check_access(progress, chapter_index, 0, ItemKind::FinalAssessment)?;
    let passed = grade.passed(assessment.passing_score);
    let attempt = grade.to_attempt(progress.update_time);
    if let Some(state) = progress.chapter_mut(chapter_index)?.final_assessment.as_mut() {
        state.record_attempt(attempt, passed);
    }
    Ok((grade, passed))
}

/// Add watched seconds to a lecture, bounded by its duration when known. Returns the new total.
pub fn add_watch_time(
    progress: &mut ProgressRecord,
    chapter_index: usize,
    lecture_index: usize,
    delta_seconds: u32,
    duration_seconds: Option<u32>,
) -> Result<u32> {
    Ok(progress.lecture_mut(chapter_index, lecture_index)?.add_time(delta_seconds, duration_seconds))
}
