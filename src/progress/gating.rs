//! Sequential unlocking rules.
//!
//! Accessibility is computed from the stored record on every read and never persisted.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::record::{ChapterProgress, ProgressRecord};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Lecture,
    Quiz,
    FinalAssessment,
}

/// Accessibility of every item of a course for one learner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct AccessMap {
    pub chapters: Vec<ChapterAccess>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ChapterAccess {
    pub lectures: Vec<bool>,
    pub quizzes: Vec<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_assessment: Option<bool>,
}

/// Quizzes of a chapter are unordered among themselves and open once every lecture is done.
pub fn quizzes_unlocked(chapter: &ChapterProgress) -> bool {
    chapter.all_lectures_completed()
}

pub fn final_assessment_unlocked(chapter: &ChapterProgress) -> bool {
    chapter.all_lectures_completed() && chapter.all_quizzes_passed()
}

fn lecture_unlocked(progress: &ProgressRecord, chapter_index: usize, lecture_index: usize) -> bool {
    if chapter_index == 0 && lecture_index == 0 {
        return true;
    }
    let earlier_chapters_done = progress.chapters[..chapter_index].iter().all(ChapterProgress::completed);
    earlier_chapters_done
        && progress.chapters[chapter_index].lectures[..lecture_index]
            .iter()
            .all(|lecture| lecture.completed())
}

/// Whether the item is reachable right now. Unknown items are never reachable. `item_index` is
/// ignored for [`ItemKind::FinalAssessment`], a chapter has at most one.
pub fn can_access(
    progress: &ProgressRecord,
    chapter_index: usize,
    item_index: usize,
    kind: ItemKind,
) -> bool {
    let Some(chapter) = progress.chapters.get(chapter_index) else {
        return false;
    };
    match kind {
        ItemKind::Lecture => {
            item_index < chapter.lectures.len()
                && lecture_unlocked(progress, chapter_index, item_index)
        }
        ItemKind::Quiz => item_index < chapter.quizzes.len() && quizzes_unlocked(chapter),
        ItemKind::FinalAssessment => {
            chapter.final_assessment.is_some() && final_assessment_unlocked(chapter)
        }
    }
}

/// Like [`can_access`], but tells an unknown item (`NotFound`) apart from a locked one (`Forbidden`).
pub fn check_access(
    progress: &ProgressRecord,
    chapter_index: usize,
    item_index: usize,
    kind: ItemKind,
) -> Result<()> {
    let chapter = progress.chapter(chapter_index)?;
    let exists = match kind {
        ItemKind::Lecture => item_index < chapter.lectures.len(),
        ItemKind::Quiz => item_index < chapter.quizzes.len(),
        ItemKind::FinalAssessment => chapter.final_assessment.is_some(),
    };
    if !exists {
        return Err(Error::not_found(match kind {
            ItemKind::Lecture => format!("lecture {item_index} in chapter {chapter_index}"),
            ItemKind::Quiz => format!("quiz {item_index} in chapter {chapter_index}"),
            ItemKind::FinalAssessment => format!("final assessment in chapter {chapter_index}"),
        }));
    }
    if can_access(progress, chapter_index, item_index, kind) {
        return Ok(());
    }
    Err(Error::forbidden(match kind {
        ItemKind::Lecture => format!(
            "lecture {item_index} in chapter {chapter_index} requires the previous lectures and chapters"
        ),
        ItemKind::Quiz => {
            format!("quizzes in chapter {chapter_index} require every lecture of the chapter")
        }
        ItemKind::FinalAssessment => format!(
            "final assessment in chapter {chapter_index} requires every lecture and passed quizzes"
        ),
    }))
}

pub fn access_map(progress: &ProgressRecord) -> AccessMap {
    let chapters = progress
        .chapters
        .iter()
        .enumerate()
        .map(|(c, chapter)| ChapterAccess {
            lectures: (0..chapter.lectures.len())
                .map(|l| can_access(progress, c, l, ItemKind::Lecture))
                .collect(),
            quizzes: (0..chapter.quizzes.len())
                .map(|q| can_access(progress, c, q, ItemKind::Quiz))
                .collect(),
            final_assessment: chapter
                .final_assessment
                .as_ref()
                .map(|_| can_access(progress, c, 0, ItemKind::FinalAssessment)),
        })
        .collect();
    AccessMap { chapters }
}
