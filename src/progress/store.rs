use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use sqlx::SqlitePool;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::record::ProgressRecord;
use crate::config::StoreConfig;
use crate::course::CourseOutline;
use crate::error::{Error, Result};
use crate::utils::now_utc;

type StudentCourseId = (i64, i64);

/// A stored record together with the version it was read at.
#[derive(Debug, Clone)]
pub struct VersionedRecord {
    pub record: ProgressRecord,
    pub version: i64,
}

/// Progress rows keyed by (student, course).
///
/// Writers inside one process serialize on a per-key mutex; writers in different processes are
/// kept apart by the compare-and-set on `version` in [`ProgressStore::save`]. Mutexes of keys
/// nobody touched for `lock_idle_secs` are dropped; the compare-and-set still guards a write
/// that outlives its evicted mutex.
pub struct ProgressStore {
    database: SqlitePool,
    locks: Cache<StudentCourseId, Arc<Mutex<()>>>,
}

impl ProgressStore {
    pub fn new(database: SqlitePool, config: &StoreConfig) -> Self {
        let locks = Cache::builder()
            .time_to_idle(Duration::from_secs(config.lock_idle_secs))
            .build();
        Self { database, locks }
    }

    pub fn database(&self) -> &SqlitePool {
        &self.database
    }

    /// Hold the write lock of one record for the duration of a read-modify-write.
    pub async fn lock(&self, student_id: i64, course_id: i64) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .get_with((student_id, course_id), async { Arc::new(Mutex::new(())) })
            .await;
        lock.lock_owned().await
    }

    pub async fn get(&self, student_id: i64, course_id: i64) -> Result<Option<VersionedRecord>> {
        let row: Option<(String, i64)> = sqlx::query_as(
            "select record, version from progress where student_id = ? and course_id = ?",
        )
        .bind(student_id)
        .bind(course_id)
        .fetch_optional(&self.database)
        .await?;
        row.map(|(record, version)| {
            Ok(VersionedRecord { record: serde_json::from_str(&record)?, version })
        })
        .transpose()
    }

    /// Read the record, enrolling the student with a fresh record shaped like `outline` on
    /// first access. Concurrent first accesses agree on a single row.
    pub async fn load_or_seed(
        &self,
        student_id: i64,
        outline: &CourseOutline,
    ) -> Result<VersionedRecord> {
        let course_id = outline.course_id;
        if let Some(found) = self.get(student_id, course_id).await? {
            return Ok(found);
        }
        let exists: Option<i64> = sqlx::query_scalar("select id from student where id = ?")
            .bind(student_id)
            .fetch_optional(&self.database)
            .await?;
        if exists.is_none() {
            return Err(Error::not_found(format!("student {student_id}")));
        }
        let now = now_utc();
        let record = ProgressRecord::seed(student_id, course_id, outline, now);
        sqlx::query(
            "insert or ignore into progress (student_id, course_id, record, version, update_time) \
             values (?, ?, ?, 0, ?)",
        )
        .bind(student_id)
        .bind(course_id)
        .bind(serde_json::to_string(&record)?)
        .bind(now)
        .execute(&self.database)
        .await?;
        self.get(student_id, course_id).await?.ok_or_else(|| {
            Error::Fatal(anyhow::anyhow!(
                "progress of student {student_id} in course {course_id} vanished after enrollment"
            ))
        })
    }

    /// Compare-and-set write. Returns `false` when the stored version moved on since
    /// `expected_version` was read; the caller reloads and retries.
    pub async fn save(&self, record: &ProgressRecord, expected_version: i64) -> Result<bool> {
        let result = sqlx::query(
            "update progress set record = ?, version = version + 1, update_time = ? \
             where student_id = ? and course_id = ? and version = ?",
        )
        .bind(serde_json::to_string(record)?)
        .bind(record.update_time)
        .bind(record.student_id)
        .bind(record.course_id)
        .bind(expected_version)
        .execute(&self.database)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn list_for_student(&self, student_id: i64) -> Result<Vec<ProgressRecord>> {
        let rows: Vec<String> = sqlx::query_scalar(
            "select record from progress where student_id = ? order by update_time desc",
        )
        .bind(student_id)
        .fetch_all(&self.database)
        .await?;
        rows.iter()
            .map(|record| Ok(serde_json::from_str(record)?))
            .collect()
    }
}
