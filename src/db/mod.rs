mod models;

pub use models::*;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

pub type DbPool = Arc<PgPool>;

pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    Ok(Arc::new(pool))
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

// ---- users & sessions ----

pub async fn create_user(
    pool: &PgPool,
    username: &str,
    email: &str,
    first_name: &str,
    last_name: &str,
    password_digest: &str,
) -> Result<User, sqlx::Error> {
    sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (username, email, first_name, last_name, password_digest)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(username)
    .bind(email)
    .bind(first_name)
    .bind(last_name)
    .bind(password_digest)
    .fetch_one(pool)
    .await
}

pub async fn find_user_by_username(
    pool: &PgPool,
    username: &str,
) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = $1")
        .bind(username)
        .fetch_optional(pool)
        .await
}

pub async fn create_session(
    pool: &PgPool,
    token: Uuid,
    user_id: i32,
    expires_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO sessions (token, user_id, expires_at) VALUES ($1, $2, $3)")
        .bind(token)
        .bind(user_id)
        .bind(expires_at)
        .execute(pool)
        .await?;
    Ok(())
}

/// Resolves a session token to its user; expired sessions are not honored.
pub async fn find_session_user(pool: &PgPool, token: Uuid) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(
        r#"
        SELECT u.* FROM users u
        JOIN sessions s ON s.user_id = u.id
        WHERE s.token = $1 AND s.expires_at > NOW()
        "#,
    )
    .bind(token)
    .fetch_optional(pool)
    .await
}

pub async fn delete_session(pool: &PgPool, token: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM sessions WHERE token = $1")
        .bind(token)
        .execute(pool)
        .await?;
    Ok(())
}

// ---- patients ----

pub async fn create_patient(
    pool: &PgPool,
    name: &str,
    birth_date: NaiveDate,
    record_number: Option<&str>,
) -> Result<Patient, sqlx::Error> {
    sqlx::query_as::<_, Patient>(
        r#"
        INSERT INTO patients (name, birth_date, record_number)
        VALUES ($1, $2, $3)
        RETURNING *
        "#,
    )
    .bind(name)
    .bind(birth_date)
    .bind(record_number)
    .fetch_one(pool)
    .await
}

pub async fn get_patient(pool: &PgPool, id: i32) -> Result<Option<Patient>, sqlx::Error> {
    sqlx::query_as::<_, Patient>("SELECT * FROM patients WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn list_patients(pool: &PgPool) -> Result<Vec<Patient>, sqlx::Error> {
    sqlx::query_as::<_, Patient>("SELECT * FROM patients ORDER BY name")
        .fetch_all(pool)
        .await
}

pub async fn count_patients(pool: &PgPool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM patients")
        .fetch_one(pool)
        .await
}

// ---- providers & prompts ----

pub async fn list_providers(pool: &PgPool) -> Result<Vec<AiProvider>, sqlx::Error> {
    sqlx::query_as::<_, AiProvider>("SELECT * FROM ai_providers ORDER BY name")
        .fetch_all(pool)
        .await
}

pub async fn get_provider(pool: &PgPool, id: i32) -> Result<Option<AiProvider>, sqlx::Error> {
    sqlx::query_as::<_, AiProvider>("SELECT * FROM ai_providers WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// The active prompt configured for a provider, if any. When several are
/// active the most recent one wins.
pub async fn active_prompt_for_provider(
    pool: &PgPool,
    provider_id: i32,
) -> Result<Option<Prompt>, sqlx::Error> {
    sqlx::query_as::<_, Prompt>(
        r#"
        SELECT * FROM prompts
        WHERE provider_id = $1 AND active = TRUE
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(provider_id)
    .fetch_optional(pool)
    .await
}

pub async fn has_configured_key(pool: &PgPool) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM ai_providers WHERE active = TRUE AND api_key <> '')",
    )
    .fetch_one(pool)
    .await
}

// ---- exams ----

pub async fn create_exam(
    pool: &PgPool,
    patient_id: i32,
    user_id: i32,
    image_path: &str,
    image_filename: &str,
) -> Result<Exam, sqlx::Error> {
    sqlx::query_as::<_, Exam>(
        r#"
        INSERT INTO exams (patient_id, user_id, image_path, image_filename)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(patient_id)
    .bind(user_id)
    .bind(image_path)
    .bind(image_filename)
    .fetch_one(pool)
    .await
}

pub async fn get_exam(pool: &PgPool, id: i32) -> Result<Option<Exam>, sqlx::Error> {
    sqlx::query_as::<_, Exam>("SELECT * FROM exams WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn recent_exams_for_user(
    pool: &PgPool,
    user_id: i32,
    limit: i64,
) -> Result<Vec<ExamSummary>, sqlx::Error> {
    sqlx::query_as::<_, ExamSummary>(
        r#"
        SELECT e.id, e.patient_id, p.name AS patient_name, e.exam_date, e.status
        FROM exams e
        JOIN patients p ON p.id = e.patient_id
        WHERE e.user_id = $1
        ORDER BY e.exam_date DESC
        LIMIT $2
        "#,
    )
    .bind(user_id)
    .bind(limit)
    .fetch_all(pool)
    .await
}

pub async fn count_exams(pool: &PgPool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM exams")
        .fetch_one(pool)
        .await
}

/// Conditionally claims an exam for analysis. The single-statement guard is
/// what prevents two concurrent requests from both starting an analysis:
/// only one of them sees a row come back.
pub async fn claim_exam_for_analysis(pool: &PgPool, exam_id: i32) -> Result<bool, sqlx::Error> {
    let claimed: Option<i32> = sqlx::query_scalar(
        r#"
        UPDATE exams
        SET status = 'analyzing', analysis_started_at = NOW()
        WHERE id = $1
          AND (diagnostic_text IS NULL OR diagnostic_text = '')
          AND status <> 'analyzing'
        RETURNING id
        "#,
    )
    .bind(exam_id)
    .fetch_optional(pool)
    .await?;

    Ok(claimed.is_some())
}

/// Reclassifies exams stuck in `analyzing` past the staleness threshold as
/// failed, restoring the manual retry path after a crash mid-call.
pub async fn reclaim_stale_analyzing(
    pool: &PgPool,
    older_than_minutes: i64,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE exams
        SET status = 'error'
        WHERE status = 'analyzing'
          AND analysis_started_at < NOW() - ($1 * INTERVAL '1 minute')
        "#,
    )
    .bind(older_than_minutes as f64)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

pub async fn mark_exam_error(pool: &PgPool, exam_id: i32) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE exams SET status = 'error' WHERE id = $1")
        .bind(exam_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Records a successful analysis: narrative, diagnosis timestamp, status and
/// the provider/prompt actually used are written in one statement.
pub async fn complete_exam_analysis(
    pool: &PgPool,
    exam_id: i32,
    diagnostic_text: &str,
    provider_id: i32,
    prompt_id: Option<i32>,
) -> Result<DateTime<Utc>, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        UPDATE exams
        SET diagnostic_text = $2,
            diagnosed_at = NOW(),
            status = 'completed',
            provider_id = $3,
            prompt_id = $4
        WHERE id = $1
        RETURNING diagnosed_at
        "#,
    )
    .bind(exam_id)
    .bind(diagnostic_text)
    .bind(provider_id)
    .bind(prompt_id)
    .fetch_one(pool)
    .await
}

pub async fn attach_report(
    pool: &PgPool,
    exam_id: i32,
    report_path: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE exams SET report_path = $2, report_generated_at = NOW() WHERE id = $1",
    )
    .bind(exam_id)
    .bind(report_path)
    .execute(pool)
    .await?;
    Ok(())
}
