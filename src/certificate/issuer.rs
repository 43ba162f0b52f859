use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use time::OffsetDateTime;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::student;
use crate::utils::now_utc;

/// Immutable proof of completion. `certificate_id` is globally unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Certificate {
    pub certificate_id: String,
    pub student_id: i64,
    pub course_id: i64,
    pub student_name: String,
    pub course_name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub completion_date: OffsetDateTime,
    pub grade: Option<u8>,
    /// Certificate template of the course at issue time
    #[schema(value_type = Option<Object>)]
    pub template_snapshot: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IssueOutcome {
    Issued(Certificate),
    AlreadyIssued(Certificate),
}

impl IssueOutcome {
    pub fn certificate(&self) -> &Certificate {
        match self {
            IssueOutcome::Issued(certificate) | IssueOutcome::AlreadyIssued(certificate) => {
                certificate
            }
        }
    }

    pub fn into_certificate(self) -> Certificate {
        match self {
            IssueOutcome::Issued(certificate) | IssueOutcome::AlreadyIssued(certificate) => {
                certificate
            }
        }
    }
}

#[async_trait]
pub trait CertificateIssuer: Send + Sync {
    /// Issue the certificate of (student, course). Repeated calls return the existing
    /// certificate as [`IssueOutcome::AlreadyIssued`].
    async fn issue(&self, student_id: i64, course_id: i64, grade: Option<u8>) -> Result<IssueOutcome>;

    async fn find(&self, student_id: i64, course_id: i64) -> Result<Option<Certificate>>;
}

#[derive(sqlx::FromRow)]
struct CertificateRow {
    certificate_id: String,
    student_id: i64,
    course_id: i64,
    student_name: String,
    course_name: String,
    completion_date: OffsetDateTime,
    grade: Option<i64>,
    template_snapshot: Option<String>,
}

impl TryFrom<CertificateRow> for Certificate {
    type Error = Error;

    fn try_from(row: CertificateRow) -> Result<Self> {
        Ok(Certificate {
            certificate_id: row.certificate_id,
            student_id: row.student_id,
            course_id: row.course_id,
            student_name: row.student_name,
            course_name: row.course_name,
            completion_date: row.completion_date,
            grade: row.grade.and_then(|grade| u8::try_from(grade).ok()),
            template_snapshot: row.template_snapshot.as_deref().map(serde_json::from_str).transpose()?,
        })
    }
}

/// Issues certificates into the local `certificate` table. The UNIQUE(student_id, course_id)
/// constraint decides which of two racing issuers wins.
#[derive(Clone)]
pub struct SqliteCertificateIssuer {
    database: SqlitePool,
}

impl SqliteCertificateIssuer {
    pub fn new(database: SqlitePool) -> Self {
        Self { database }
    }

    pub async fn list_for_student(&self, student_id: i64) -> Result<Vec<Certificate>> {
        let rows = sqlx::query_as::<_, CertificateRow>(
            "select * from certificate where student_id = ? order by completion_date",
        )
        .bind(student_id)
        .fetch_all(&self.database)
        .await?;
        rows.into_iter().map(Certificate::try_from).collect()
    }
}

#[async_trait]
impl CertificateIssuer for SqliteCertificateIssuer {
    async fn issue(&self, student_id: i64, course_id: i64, grade: Option<u8>) -> Result<IssueOutcome> {
        if let Some(existing) = self.find(student_id, course_id).await? {
            return Ok(IssueOutcome::AlreadyIssued(existing));
        }
        let student = student::get_student(&self.database, student_id).await?;
        let course: Option<(String, Option<String>)> =
            sqlx::query_as("select title, certificate_template from course where id = ?")
                .bind(course_id)
                .fetch_optional(&self.database)
                .await?;
        let (course_name, template) =
            course.ok_or_else(|| Error::not_found(format!("course {course_id}")))?;
        let certificate = Certificate {
            certificate_id: Uuid::new_v4().to_string(),
            student_id,
            course_id,
            student_name: student.name,
            course_name,
            completion_date: now_utc(),
            grade,
            template_snapshot: template.as_deref().map(serde_json::from_str).transpose()?,
        };
        let result = sqlx::query(
            "insert into certificate (certificate_id, student_id, course_id, student_name, course_name, \
             completion_date, grade, template_snapshot) values (?, ?, ?, ?, ?, ?, ?, ?) \
             on conflict(student_id, course_id) do nothing",
        )
        .bind(&certificate.certificate_id)
        .bind(student_id)
        .bind(course_id)
        .bind(&certificate.student_name)
        .bind(&certificate.course_name)
        .bind(certificate.completion_date)
        .bind(certificate.grade.map(i64::from))
        .bind(template)
        .execute(&self.database)
        .await?;
        if result.rows_affected() == 0 {
            // lost the race to another issuer
            let existing = self.find(student_id, course_id).await?.ok_or_else(|| {
                Error::Fatal(anyhow::anyhow!(
                    "certificate of student {student_id} in course {course_id} conflicted but is missing"
                ))
            })?;
            return Ok(IssueOutcome::AlreadyIssued(existing));
        }
        info!(
            "issue certificate {} to student {} for course {}",
            certificate.certificate_id, student_id, course_id
        );
        Ok(IssueOutcome::Issued(certificate))
    }

    async fn find(&self, student_id: i64, course_id: i64) -> Result<Option<Certificate>> {
        let row = sqlx::query_as::<_, CertificateRow>(
            "select * from certificate where student_id = ? and course_id = ?",
        )
        .bind(student_id)
        .bind(course_id)
        .fetch_optional(&self.database)
        .await?;
        row.map(Certificate::try_from).transpose()
    }
}
