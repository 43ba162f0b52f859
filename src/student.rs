use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use utoipa::ToSchema;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct StudentInfo {
    pub id: i64,
    pub name: String,
    pub email: String,
}

pub async fn get_student_list(database: &SqlitePool) -> Result<Vec<StudentInfo>> {
    let students = sqlx::query_as::<_, StudentInfo>("SELECT id, name, email FROM student ORDER BY id")
        .fetch_all(database)
        .await?;
    Ok(students)
}

pub async fn get_student(database: &SqlitePool, id: i64) -> Result<StudentInfo> {
    sqlx::query_as::<_, StudentInfo>("SELECT id, name, email FROM student WHERE id = ?")
        .bind(id)
        .fetch_optional(database)
        .await?
        .ok_or_else(|| Error::not_found(format!("student {id}")))
}

pub async fn create_student(database: &SqlitePool, name: String, email: String) -> Result<i64> {
    let student = sqlx::query("INSERT INTO student (name, email) VALUES (?, ?)")
        .bind(name)
        .bind(email)
        .execute(database)
        .await?;
    Ok(student.last_insert_rowid())
}

/// Removes the student together with their progress rows. Issued certificates are kept.
pub async fn delete_student(database: &SqlitePool, id: i64) -> Result<()> {
    let result = sqlx::query("DELETE FROM student WHERE id = ?")
        .bind(id)
        .execute(database)
        .await?;
    if result.rows_affected() == 0 {
        return Err(Error::not_found(format!("student {id}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::memory_pool;

    #[tokio::test]
    async fn create_then_get() {
        let database = memory_pool().await;
        let id = create_student(&database, "Ferris".into(), "ferris@example.com".into())
            .await
            .unwrap();
        let student = get_student(&database, id).await.unwrap();
        assert_eq!(student.name, "Ferris");
        assert_eq!(get_student_list(&database).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let database = memory_pool().await;
        create_student(&database, "a".into(), "same@example.com".into()).await.unwrap();
        let result = create_student(&database, "b".into(), "same@example.com".into()).await;
        assert!(matches!(result, Err(Error::Database(_))));
    }

    #[tokio::test]
    async fn missing_student_is_not_found() {
        let database = memory_pool().await;
        assert!(matches!(get_student(&database, 1).await, Err(Error::NotFound(_))));
        assert!(matches!(delete_student(&database, 1).await, Err(Error::NotFound(_))));
    }
}
