//! Course structure as supplied by the authoring side.
//!
//! An outline is immutable per fetch. Progress records copy its shape at enrollment and address
//! every item by position, so nothing here carries learner state.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CourseOutline {
    pub course_id: i64,
    pub title: String,
    pub chapters: Vec<Chapter>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Chapter {
    pub title: String,
    #[serde(default)]
    pub lectures: Vec<Lecture>,
    /// Single-question quizzes, graded together as one chapter submission
    #[serde(default)]
    pub quizzes: Vec<Quiz>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_assessment: Option<FinalAssessment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Lecture {
    pub id: String,
    pub title: String,
    /// Known once the media host has processed the video
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Quiz {
    pub id: String,
    #[serde(flatten)]
    pub question: Question,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Question {
    pub prompt: String,
    pub options: Vec<String>,
    /// Index into `options`
    pub correct_option: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct FinalAssessment {
    pub questions: Vec<Question>,
    /// Minimum score (0..=100) to pass
    pub passing_score: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit_minutes: Option<u32>,
}

impl CourseOutline {
    pub fn chapter(&self, chapter_index: usize) -> Result<&Chapter> {
        self.chapters
            .get(chapter_index)
            .ok_or_else(|| Error::not_found(format!("chapter {chapter_index}")))
    }

    pub fn lecture(&self, chapter_index: usize, lecture_index: usize) -> Result<&Lecture> {
        self.chapter(chapter_index)?.lectures.get(lecture_index).ok_or_else(|| {
            Error::not_found(format!("lecture {lecture_index} in chapter {chapter_index}"))
        })
    }

    /// Item count used as the denominator of overall progress.
    pub fn total_items(&self) -> usize {
        self.chapters.iter().map(Chapter::item_count).sum()
    }

    /// Reject outlines that can never be completed or graded consistently.
    pub fn validate(&self) -> Result<()> {
        for (c, chapter) in self.chapters.iter().enumerate() {
            for (q, quiz) in chapter.quizzes.iter().enumerate() {
                quiz.question
                    .validate()
                    .map_err(|e| Error::validation(format!("chapter {c} quiz {q}: {e}")))?;
            }
            if let Some(assessment) = &chapter.final_assessment {
                if assessment.passing_score > 100 {
                    return Err(Error::validation(format!(
                        "chapter {c} final assessment passing score {} exceeds 100",
                        assessment.passing_score
                    )));
                }
                for (q, question) in assessment.questions.iter().enumerate() {
                    question.validate().map_err(|e| {
                        Error::validation(format!("chapter {c} final assessment question {q}: {e}"))
                    })?;
                }
            }
        }
        Ok(())
    }
}

impl Chapter {
    pub fn item_count(&self) -> usize {
        self.lectures.len() + self.quizzes.len() + usize::from(self.final_assessment.is_some())
    }

    /// The chapter's quiz questions in quiz order.
    pub fn quiz_questions(&self) -> Vec<&Question> {
        self.quizzes.iter().map(|quiz| &quiz.question).collect()
    }
}

impl Question {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.options.is_empty() {
            return Err("question has no options".to_string());
        }
        if self.correct_option >= self.options.len() {
            return Err(format!(
                "correct option {} out of {} options",
                self.correct_option,
                self.options.len()
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn question(correct_option: usize) -> Question {
        Question {
            prompt: format!("pick option {correct_option}"),
            options: vec!["a".into(), "b".into(), "c".into()],
            correct_option,
        }
    }

    pub fn lecture(id: &str, duration_seconds: Option<u32>) -> Lecture {
        Lecture { id: id.into(), title: format!("Lecture {id}"), duration_seconds }
    }

    pub fn chapter(lectures: usize, quizzes: usize, final_assessment: Option<usize>) -> Chapter {
        Chapter {
            title: "Chapter".into(),
            lectures: (0..lectures).map(|i| lecture(&format!("l{i}"), Some(100))).collect(),
            quizzes: (0..quizzes)
                .map(|i| Quiz { id: format!("q{i}"), question: question(i % 3) })
                .collect(),
            final_assessment: final_assessment.map(|n| FinalAssessment {
                questions: (0..n).map(|i| question(i % 3)).collect(),
                passing_score: 80,
                time_limit_minutes: Some(30),
            }),
        }
    }

    /// Chapter 0: 2 lectures + 1 quiz, chapter 1: 1 lecture.
    pub fn two_chapter_outline(course_id: i64) -> CourseOutline {
        CourseOutline {
            course_id,
            title: "Ownership in Practice".into(),
            chapters: vec![chapter(2, 1, None), chapter(1, 0, None)],
        }
    }
}
