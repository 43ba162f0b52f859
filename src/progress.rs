pub mod aggregate;
pub mod apply;
pub mod gating;
pub mod grading;
pub mod record;
pub mod store;

pub use gating::{AccessMap, ChapterAccess, ItemKind};
pub use grading::Grade;
pub use record::{Attempt, ChapterProgress, LectureProgress, ProgressRecord, QuizProgress};
pub use store::{ProgressStore, VersionedRecord};
