use super::record::{ChapterProgress, ProgressRecord};
use crate::utils::round_percent;

/// Recompute every derived field of the record in one pass.
///
/// The record's chapter arrays are the outline snapshot taken at enrollment, so the item totals
/// come from the record itself. Chapters do not depend on each other here; cross-chapter
/// ordering is the gating engine's concern. Newly completed chapters are stamped with
/// `update_time`.
pub fn recompute(progress: &mut ProgressRecord) {
    let now = progress.update_time;
    let mut total_items = 0;
    let mut completed_items = 0;
    for chapter in &mut progress.chapters {
        let completed = chapter_completed(chapter);
        if completed && chapter.completed_at.is_none() {
            chapter.completed_at = Some(now);
        }
        chapter.completed = completed;
        total_items += chapter_items(chapter);
        completed_items += chapter_completed_items(chapter);
    }
    progress.overall_progress = overall_percent(completed_items, total_items);
}

/// Rounded share of completed items. Only a fully completed course reads 100.
fn overall_percent(completed_items: usize, total_items: usize) -> u8 {
    let percent = round_percent(completed_items, total_items);
    if completed_items < total_items { percent.min(99) } else { percent }
}

fn chapter_completed(chapter: &ChapterProgress) -> bool {
    chapter.all_lectures_completed()
        && chapter.all_quizzes_passed()
        && chapter.final_assessment.as_ref().is_none_or(|assessment| assessment.passed())
}

fn chapter_items(chapter: &ChapterProgress) -> usize {
    chapter.lectures.len() + chapter.quizzes.len() + usize::from(chapter.final_assessment.is_some())
}

fn chapter_completed_items(chapter: &ChapterProgress) -> usize {
    let lectures = chapter.lectures.iter().filter(|lecture| lecture.completed()).count();
    let quizzes = chapter.quizzes.iter().filter(|quiz| quiz.passed()).count();
    let assessment = chapter.final_assessment.as_ref().is_some_and(|a| a.passed());
    lectures + quizzes + usize::from(assessment)
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::course::CourseOutline;
    use crate::course::outline::fixtures::{chapter, two_chapter_outline};
    use crate::progress::record::Attempt;

    fn passing_attempt() -> Attempt {
        Attempt {
            score: 100,
            total_questions: 1,
            per_answer_correctness: vec![true],
            attempted_at: datetime!(2025-03-01 10:00 UTC),
        }
    }

    #[test]
    fn two_chapter_course_counts_four_items() {
        let outline = two_chapter_outline(1);
        let mut progress = ProgressRecord::seed(1, 1, &outline, datetime!(2025-03-01 10:00 UTC));
        let now = progress.update_time;

        progress.lecture_mut(0, 0).unwrap().mark_completed(now);
        recompute(&mut progress);
        assert_eq!(progress.overall_progress(), 25);

        progress.lecture_mut(0, 1).unwrap().mark_completed(now);
        recompute(&mut progress);
        assert_eq!(progress.overall_progress(), 50);
        assert!(!progress.chapters[0].completed());

        progress.chapters[0].quizzes[0].record_attempt(passing_attempt(), true);
        recompute(&mut progress);
        assert_eq!(progress.overall_progress(), 75);
        assert!(progress.chapters[0].completed());
        assert_eq!(progress.chapters[0].completed_at(), Some(now));

        progress.lecture_mut(1, 0).unwrap().mark_completed(now);
        recompute(&mut progress);
        assert_eq!(progress.overall_progress(), 100);
        assert!(progress.is_course_complete());
    }

    #[test]
    fn one_missing_item_of_many_stays_below_full() {
        let outline = CourseOutline {
            course_id: 1,
            title: "long".into(),
            chapters: vec![chapter(200, 0, None)],
        };
        let mut progress = ProgressRecord::seed(1, 1, &outline, datetime!(2025-03-01 10:00 UTC));
        let now = progress.update_time;
        for l in 0..199 {
            progress.lecture_mut(0, l).unwrap().mark_completed(now);
        }
        recompute(&mut progress);
        assert_eq!(progress.overall_progress(), 99);
        assert!(!progress.is_course_complete());

        progress.lecture_mut(0, 199).unwrap().mark_completed(now);
        recompute(&mut progress);
        assert_eq!(progress.overall_progress(), 100);
        assert!(progress.is_course_complete());
    }

    #[test]
    fn empty_course_is_zero_percent() {
        let outline = CourseOutline { course_id: 1, title: "empty".into(), chapters: vec![] };
        let progress = ProgressRecord::seed(1, 1, &outline, datetime!(2025-03-01 10:00 UTC));
        assert_eq!(progress.overall_progress(), 0);
        assert!(!progress.is_course_complete());
    }

    #[test]
    fn final_assessment_counts_as_one_item() {
        let outline = CourseOutline {
            course_id: 1,
            title: "t".into(),
            chapters: vec![chapter(1, 0, Some(10))],
        };
        let mut progress = ProgressRecord::seed(1, 1, &outline, datetime!(2025-03-01 10:00 UTC));
        let now = progress.update_time;
        progress.lecture_mut(0, 0).unwrap().mark_completed(now);
        recompute(&mut progress);
        assert_eq!(progress.overall_progress(), 50);
        assert!(!progress.chapters[0].completed());

        progress.chapters[0].final_assessment.as_mut().unwrap().record_attempt(passing_attempt(), true);
        recompute(&mut progress);
        assert_eq!(progress.overall_progress(), 100);
        assert!(progress.chapters[0].completed());
    }

    #[test]
    fn chapter_without_items_is_completed_on_seed() {
        let outline = CourseOutline {
            course_id: 1,
            title: "t".into(),
            chapters: vec![chapter(0, 0, None), chapter(1, 0, None)],
        };
        let progress = ProgressRecord::seed(1, 1, &outline, datetime!(2025-03-01 10:00 UTC));
        assert!(progress.chapters[0].completed());
        assert!(!progress.chapters[1].completed());
    }
}
