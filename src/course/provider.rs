use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::info;
use utoipa::ToSchema;

use super::outline::CourseOutline;
use crate::config::OutlineCacheConfig;
use crate::error::{Error, Result};
use crate::utils::now_utc;

/// Read-only source of course outlines.
#[async_trait]
pub trait CourseOutlineProvider: Send + Sync {
    async fn get(&self, course_id: i64) -> Result<Arc<CourseOutline>>;
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CourseMeta {
    pub id: i64,
    pub title: String,
    pub chapter_count: usize,
}

/// Outlines stored as JSON in the `course` table, fronted by a TTL cache.
#[derive(Clone)]
pub struct SqliteOutlineProvider {
    database: SqlitePool,
    cache: Cache<i64, Arc<CourseOutline>>,
}

impl SqliteOutlineProvider {
    pub fn new(database: SqlitePool, config: &OutlineCacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.capacity)
            .time_to_live(Duration::from_secs(config.ttl_secs))
            .build();
        Self { database, cache }
    }

    /// Insert or replace a course outline. Authoring proper happens elsewhere; this is the
    /// import path used by operators and tests.
    pub async fn put(
        &self,
        outline: &CourseOutline,
        certificate_template: Option<&serde_json::Value>,
    ) -> Result<()> {
        outline.validate()?;
        let content = serde_json::to_string(outline)?;
        let template = certificate_template.map(serde_json::to_string).transpose()?;
        sqlx::query(
            "insert into course (id, title, outline, certificate_template, update_time) values (?, ?, ?, ?, ?) \
             on conflict(id) do update set title = excluded.title, outline = excluded.outline, \
             certificate_template = excluded.certificate_template, update_time = excluded.update_time",
        )
        .bind(outline.course_id)
        .bind(&outline.title)
        .bind(content)
        .bind(template)
        .bind(now_utc())
        .execute(&self.database)
        .await?;
        self.cache.invalidate(&outline.course_id).await;
        info!("import course {}-{} success", outline.course_id, outline.title);
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<CourseMeta>> {
        let rows: Vec<(i64, String, String)> =
            sqlx::query_as("select id, title, outline from course order by id")
                .fetch_all(&self.database)
                .await?;
        rows.into_iter()
            .map(|(id, title, outline)| {
                let outline = serde_json::from_str::<CourseOutline>(&outline)?;
                Ok(CourseMeta { id, title, chapter_count: outline.chapters.len() })
            })
            .collect()
    }

    async fn load(&self, course_id: i64) -> Result<Arc<CourseOutline>> {
        let content: Option<String> = sqlx::query_scalar("select outline from course where id = ?")
            .bind(course_id)
            .fetch_optional(&self.database)
            .await?;
        let content = content.ok_or_else(|| Error::not_found(format!("course {course_id}")))?;
        Ok(Arc::new(serde_json::from_str(&content)?))
    }
}

#[async_trait]
impl CourseOutlineProvider for SqliteOutlineProvider {
    async fn get(&self, course_id: i64) -> Result<Arc<CourseOutline>> {
        self.cache
            .try_get_with(course_id, self.load(course_id))
            .await
            .map_err(|e: Arc<Error>| match e.as_ref() {
                Error::NotFound(what) => Error::NotFound(what.clone()),
                other => Error::ExternalDependency(format!("course outline provider: {other}")),
            })
    }
}
