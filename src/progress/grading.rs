use std::borrow::Borrow;

use serde::Serialize;
use time::OffsetDateTime;
use utoipa::ToSchema;

use super::record::Attempt;
use crate::course::Question;
use crate::error::{Error, Result};
use crate::utils::round_percent;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Grade {
    /// 0..=100
    pub score: u8,
    pub correct_count: usize,
    pub total_questions: usize,
    pub per_answer: Vec<bool>,
}

impl Grade {
    pub fn passed(&self, passing_score: u8) -> bool {
        self.score >= passing_score
    }

    pub fn to_attempt(&self, attempted_at: OffsetDateTime) -> Attempt {
        Attempt {
            score: self.score,
            total_questions: self.total_questions,
            per_answer_correctness: self.per_answer.clone(),
            attempted_at,
        }
    }
}

/// Score submitted option indices against the answer key.
///
/// The submission must answer every question; a length mismatch is rejected rather than
/// partially scored. An out-of-range option simply counts as wrong. Zero questions score 100.
pub fn score<Q: Borrow<Question>>(questions: &[Q], answers: &[usize]) -> Result<Grade> {
    if answers.len() != questions.len() {
        return Err(Error::validation(format!(
            "{} answers submitted for {} questions",
            answers.len(),
            questions.len()
        )));
    }
    if questions.is_empty() {
        return Ok(Grade { score: 100, correct_count: 0, total_questions: 0, per_answer: vec![] });
    }
    let per_answer: Vec<bool> = questions
        .iter()
        .zip(answers)
        .map(|(question, answer)| question.borrow().correct_option == *answer)
        .collect();
    let correct_count = per_answer.iter().filter(|correct| **correct).count();
    Ok(Grade {
        score: round_percent(correct_count, questions.len()),
        correct_count,
        total_questions: questions.len(),
        per_answer,
    })
}
