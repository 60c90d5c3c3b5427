use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, warn};

use crate::auth::CurrentUser;
use crate::db;
use crate::state::AppState;
use crate::storage;

/// Exams stuck in `analyzing` longer than this are reclassified as failed
/// before a new claim is attempted.
const STALE_ANALYZING_MINUTES: i64 = 10;

const DATETIME_FORMAT: &str = "%d/%m/%Y %H:%M";

/// Runs the AI analysis for an exam. Status bookkeeping follows
/// `pending|error -> analyzing -> completed|error`; the `analyzing` claim is
/// persisted before the slow external call so a crash mid-call stays visible.
pub async fn analyze_exam(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(exam_id): Path<i32>,
) -> impl IntoResponse {
    let pool = state.pool.as_ref();

    let exam = match db::get_exam(pool, exam_id).await {
        Ok(Some(e)) => e,
        Ok(None) => {
            return (StatusCode::NOT_FOUND, Json(json!({ "error": "Exam not found" })))
                .into_response()
        }
        Err(e) => {
            error!("Exam lookup failed: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Database error" })),
            )
                .into_response();
        }
    };

    if exam.user_id != user.id {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({ "error": "You do not have permission to analyze this exam" })),
        )
            .into_response();
    }

    if exam.has_diagnostic() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "This exam has already been analyzed" })),
        )
            .into_response();
    }

    match db::reclaim_stale_analyzing(pool, STALE_ANALYZING_MINUTES).await {
        Ok(0) => {}
        Ok(reclaimed) => warn!("Reclassified {} stale analyzing exam(s) as failed", reclaimed),
        Err(e) => error!("Stale-analysis sweep failed: {}", e),
    }

    match db::claim_exam_for_analysis(pool, exam.id).await {
        Ok(true) => {}
        Ok(false) => {
            // Lost the claim: either a concurrent request is mid-analysis or
            // one just completed it.
            let raced_to_completion = db::get_exam(pool, exam.id)
                .await
                .ok()
                .flatten()
                .map_or(false, |e| e.has_diagnostic());
            let (code, message) = if raced_to_completion {
                (StatusCode::BAD_REQUEST, "This exam has already been analyzed")
            } else {
                (
                    StatusCode::CONFLICT,
                    "An analysis is already in progress for this exam",
                )
            };
            return (code, Json(json!({ "error": message }))).into_response();
        }
        Err(e) => {
            error!("Failed to claim exam {} for analysis: {}", exam.id, e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Database error" })),
            )
                .into_response();
        }
    }

    let image_path = state.config.media_root.join(&exam.image_path);
    if !image_path.exists() {
        let _ = db::mark_exam_error(pool, exam.id).await;
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Image file not found on storage" })),
        )
            .into_response();
    }

    match crate::ai::analyze_exam_image(pool, &image_path).await {
        Ok(analysis) => {
            let diagnosed_at = match db::complete_exam_analysis(
                pool,
                exam.id,
                &analysis.diagnostic,
                analysis.provider_id,
                analysis.prompt_id,
            )
            .await
            {
                Ok(ts) => ts,
                Err(e) => {
                    error!("Failed to record analysis for exam {}: {}", exam.id, e);
                    let _ = db::mark_exam_error(pool, exam.id).await;
                    return (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(json!({ "error": "Failed to save the analysis result" })),
                    )
                        .into_response();
                }
            };

            Json(json!({
                "success": true,
                "diagnostic": analysis.diagnostic,
                "provider": analysis.provider_name,
                "diagnosed_at": diagnosed_at.format(DATETIME_FORMAT).to_string(),
            }))
            .into_response()
        }
        Err(e) => {
            warn!("Analysis failed for exam {}: {}", exam.id, e);
            let _ = db::mark_exam_error(pool, exam.id).await;
            Json(json!({ "success": false, "error": e.to_string() })).into_response()
        }
    }
}

/// Builds the exam's PDF report in memory, stores it, and streams it back as
/// a download. Requires a diagnosed exam; produces no file otherwise.
pub async fn exam_report(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(exam_id): Path<i32>,
) -> impl IntoResponse {
    let pool = state.pool.as_ref();

    let exam = match db::get_exam(pool, exam_id).await {
        Ok(Some(e)) => e,
        Ok(None) => {
            return (StatusCode::NOT_FOUND, Json(json!({ "error": "Exam not found" })))
                .into_response()
        }
        Err(e) => {
            error!("Exam lookup failed: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Database error" })),
            )
                .into_response();
        }
    };

    if exam.user_id != user.id {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({ "error": "You do not have permission to access this exam" })),
        )
            .into_response();
    }

    if !exam.has_diagnostic() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "This exam has not been analyzed yet" })),
        )
            .into_response();
    }

    let patient = match db::get_patient(pool, exam.patient_id).await {
        Ok(Some(p)) => p,
        _ => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "Patient record not found" })),
            )
                .into_response()
        }
    };

    let provider_name = match exam.provider_id {
        Some(id) => db::get_provider(pool, id)
            .await
            .ok()
            .flatten()
            .map(|p| p.name),
        None => None,
    };

    let pdf = match crate::report::render_report(&patient, &exam, provider_name.as_deref()) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("Failed to render report for exam {}: {}", exam.id, e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": format!("Failed to generate PDF: {}", e) })),
            )
                .into_response();
        }
    };

    let filename = storage::report_filename(patient.id);
    let disk_path = state.config.report_dir().join(&filename);
    if let Err(e) = std::fs::write(&disk_path, &pdf) {
        error!("Failed to store report for exam {}: {}", exam.id, e);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "Failed to store the report" })),
        )
            .into_response();
    }

    let relative_path = format!("{}/{}", storage::REPORT_SUBDIR, filename);
    if let Err(e) = db::attach_report(pool, exam.id, &relative_path).await {
        error!("Failed to attach report to exam {}: {}", exam.id, e);
    }

    axum::response::Response::builder()
        .header("Content-Type", "application/pdf")
        .header(
            "Content-Disposition",
            format!("attachment; filename=\"{}\"", filename),
        )
        .body(axum::body::Body::from(pdf))
        .unwrap()
        .into_response()
}

/// Probe used by the exam page: does any active provider carry a key?
pub async fn check_ai_key(
    State(state): State<Arc<AppState>>,
    CurrentUser(_user): CurrentUser,
) -> impl IntoResponse {
    let configured = db::has_configured_key(state.pool.as_ref())
        .await
        .unwrap_or(false);
    Json(json!({ "key_configured": configured }))
}
