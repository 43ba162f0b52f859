pub mod outline;
pub mod provider;

pub use outline::{Chapter, CourseOutline, FinalAssessment, Lecture, Question, Quiz};
pub use provider::{CourseMeta, CourseOutlineProvider, SqliteOutlineProvider};
