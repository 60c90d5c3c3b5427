use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue},
    response::{Html, IntoResponse, Redirect},
    Form,
};
use chrono::{Duration, NaiveDate, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tera::Context;
use uuid::Uuid;

use crate::auth::{self, CurrentUser};
use crate::db;
use crate::state::AppState;
use crate::storage;

const DATETIME_FORMAT: &str = "%d/%m/%Y %H:%M";

pub async fn index(State(state): State<Arc<AppState>>, CurrentUser(user): CurrentUser) -> impl IntoResponse {
    let pool = state.pool.as_ref();

    let recent = db::recent_exams_for_user(pool, user.id, 5)
        .await
        .unwrap_or_default();
    let patients_count = db::count_patients(pool).await.unwrap_or(0);
    let exams_count = db::count_exams(pool).await.unwrap_or(0);

    let recent: Vec<serde_json::Value> = recent
        .iter()
        .map(|e| {
            serde_json::json!({
                "id": e.id,
                "patient_name": e.patient_name,
                "exam_date": e.exam_date.format(DATETIME_FORMAT).to_string(),
                "status_label": e.status.label(),
                "status": e.status,
            })
        })
        .collect();

    let mut ctx = Context::new();
    ctx.insert("user", &user);
    ctx.insert("recent_exams", &recent);
    ctx.insert("patients_count", &patients_count);
    ctx.insert("exams_count", &exams_count);
    render_template("home.html", ctx)
}

// ---- registration & login ----

#[derive(Deserialize)]
pub struct RegisterForm {
    username: String,
    email: String,
    first_name: String,
    last_name: String,
    password: String,
    password_confirm: String,
}

pub async fn register_form() -> impl IntoResponse {
    render_template("register.html", Context::new())
}

pub async fn register_submit(
    State(state): State<Arc<AppState>>,
    Form(form): Form<RegisterForm>,
) -> impl IntoResponse {
    let pool = state.pool.as_ref();

    let error = if form.username.trim().is_empty() || form.password.is_empty() {
        Some("Username and password are required.".to_string())
    } else if form.password != form.password_confirm {
        Some("Passwords do not match.".to_string())
    } else {
        match db::find_user_by_username(pool, form.username.trim()).await {
            Ok(Some(_)) => Some("This username is already taken.".to_string()),
            Ok(None) => None,
            Err(e) => {
                tracing::error!("User lookup failed: {}", e);
                Some("Registration failed. Try again.".to_string())
            }
        }
    };

    if let Some(error) = error {
        let mut ctx = Context::new();
        ctx.insert("error", &error);
        return render_template("register.html", ctx).into_response();
    }

    let digest = auth::hash_password(&form.password);
    let user = match db::create_user(
        pool,
        form.username.trim(),
        form.email.trim(),
        form.first_name.trim(),
        form.last_name.trim(),
        &digest,
    )
    .await
    {
        Ok(u) => u,
        Err(e) => {
            tracing::error!("Failed to create user: {}", e);
            let mut ctx = Context::new();
            ctx.insert("error", "Registration failed. Try again.");
            return render_template("register.html", ctx).into_response();
        }
    };

    start_session(pool, user.id).await
}

#[derive(Deserialize)]
pub struct LoginForm {
    username: String,
    password: String,
}

pub async fn login_form() -> impl IntoResponse {
    render_template("login.html", Context::new())
}

pub async fn login_submit(
    State(state): State<Arc<AppState>>,
    Form(form): Form<LoginForm>,
) -> impl IntoResponse {
    let pool = state.pool.as_ref();

    let user = match db::find_user_by_username(pool, form.username.trim()).await {
        Ok(Some(user)) if auth::verify_password(&user.password_digest, &form.password) => user,
        Ok(_) => {
            let mut ctx = Context::new();
            ctx.insert("error", "Invalid username or password.");
            return render_template("login.html", ctx).into_response();
        }
        Err(e) => {
            tracing::error!("User lookup failed: {}", e);
            let mut ctx = Context::new();
            ctx.insert("error", "Login failed. Try again.");
            return render_template("login.html", ctx).into_response();
        }
    };

    start_session(pool, user.id).await
}

async fn start_session(pool: &sqlx::PgPool, user_id: i32) -> axum::response::Response {
    let token = Uuid::new_v4();
    let expires_at = Utc::now() + Duration::days(auth::SESSION_TTL_DAYS);

    if let Err(e) = db::create_session(pool, token, user_id, expires_at).await {
        tracing::error!("Failed to create session: {}", e);
        return Redirect::to("/login").into_response();
    }

    let mut response = Redirect::to("/").into_response();
    if let Ok(value) = HeaderValue::from_str(&auth::session_cookie(token)) {
        response.headers_mut().insert(header::SET_COOKIE, value);
    }
    response
}

pub async fn logout(State(state): State<Arc<AppState>>, headers: HeaderMap) -> impl IntoResponse {
    if let Some(token) = auth::session_token_from_headers(&headers) {
        let _ = db::delete_session(state.pool.as_ref(), token).await;
    }

    let mut response = Redirect::to("/login").into_response();
    if let Ok(value) = HeaderValue::from_str(&auth::clear_session_cookie()) {
        response.headers_mut().insert(header::SET_COOKIE, value);
    }
    response
}

// ---- patients ----

pub async fn patient_list(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> impl IntoResponse {
    let patients = db::list_patients(state.pool.as_ref())
        .await
        .unwrap_or_default();

    let patients: Vec<serde_json::Value> = patients
        .iter()
        .map(|p| {
            serde_json::json!({
                "id": p.id,
                "name": p.name,
                "birth_date": p.birth_date.format("%d/%m/%Y").to_string(),
                "record_number": p.record_number,
            })
        })
        .collect();

    let mut ctx = Context::new();
    ctx.insert("user", &user);
    ctx.insert("patients", &patients);
    render_template("patient_list.html", ctx)
}

#[derive(Deserialize)]
pub struct PatientForm {
    name: String,
    birth_date: String,
    record_number: Option<String>,
}

pub async fn patient_form(CurrentUser(user): CurrentUser) -> impl IntoResponse {
    let mut ctx = Context::new();
    ctx.insert("user", &user);
    render_template("patient_form.html", ctx)
}

pub async fn patient_create(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Form(form): Form<PatientForm>,
) -> impl IntoResponse {
    let birth_date = match NaiveDate::parse_from_str(form.birth_date.trim(), "%Y-%m-%d") {
        Ok(date) => date,
        Err(_) => {
            let mut ctx = Context::new();
            ctx.insert("user", &user);
            ctx.insert("error", "Invalid birth date.");
            return render_template("patient_form.html", ctx).into_response();
        }
    };

    let record_number = form
        .record_number
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty());

    match db::create_patient(state.pool.as_ref(), form.name.trim(), birth_date, record_number).await
    {
        Ok(_) => Redirect::to("/patients").into_response(),
        Err(e) => {
            tracing::error!("Failed to create patient: {}", e);
            let mut ctx = Context::new();
            ctx.insert("user", &user);
            ctx.insert("error", "Failed to save the patient.");
            render_template("patient_form.html", ctx).into_response()
        }
    }
}

// ---- exams ----

pub async fn exam_form(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> impl IntoResponse {
    let patients = db::list_patients(state.pool.as_ref())
        .await
        .unwrap_or_default();

    let mut ctx = Context::new();
    ctx.insert("user", &user);
    ctx.insert("patients", &patients);
    render_template("exam_form.html", ctx)
}

pub async fn exam_create(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    mut multipart: axum::extract::Multipart,
) -> impl IntoResponse {
    let mut patient_id: Option<i32> = None;
    let mut image_data: Option<Vec<u8>> = None;
    let mut image_filename = String::new();

    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or("").to_string();
        if name == "patient" {
            if let Ok(text) = field.text().await {
                patient_id = text.trim().parse().ok();
            }
        } else if name == "image" {
            image_filename = field.file_name().unwrap_or("scan.jpg").to_string();
            if let Ok(data) = field.bytes().await {
                image_data = Some(data.to_vec());
            }
        }
    }

    let (patient_id, image_data) = match (patient_id, image_data) {
        (Some(id), Some(data)) if !data.is_empty() => (id, data),
        _ => return Redirect::to("/exams/new").into_response(),
    };

    let patient = match db::get_patient(state.pool.as_ref(), patient_id).await {
        Ok(Some(p)) => p,
        _ => return Redirect::to("/exams/new").into_response(),
    };

    let stored_name =
        storage::oct_image_filename(patient.id, storage::file_extension(&image_filename));
    let disk_path = state.config.oct_dir().join(&stored_name);
    if let Err(e) = std::fs::write(&disk_path, &image_data) {
        tracing::error!("Failed to store exam image: {}", e);
        return Redirect::to("/exams/new").into_response();
    }

    let relative_path = format!("{}/{}", storage::OCT_SUBDIR, stored_name);
    match db::create_exam(
        state.pool.as_ref(),
        patient.id,
        user.id,
        &relative_path,
        &image_filename,
    )
    .await
    {
        Ok(exam) => Redirect::to(&format!("/exams/{}", exam.id)).into_response(),
        Err(e) => {
            tracing::error!("Failed to create exam: {}", e);
            Redirect::to("/exams/new").into_response()
        }
    }
}

pub async fn exam_detail(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(exam_id): Path<i32>,
) -> impl IntoResponse {
    let pool = state.pool.as_ref();

    let exam = match db::get_exam(pool, exam_id).await {
        Ok(Some(e)) => e,
        _ => return Redirect::to("/").into_response(),
    };
    let patient = match db::get_patient(pool, exam.patient_id).await {
        Ok(Some(p)) => p,
        _ => return Redirect::to("/").into_response(),
    };

    let mut ctx = Context::new();
    ctx.insert("user", &user);
    ctx.insert("patient", &patient);
    ctx.insert(
        "exam",
        &serde_json::json!({
            "id": exam.id,
            "status": exam.status,
            "status_label": exam.status.label(),
            "exam_date": exam.exam_date.format(DATETIME_FORMAT).to_string(),
            "diagnostic_text": exam.diagnostic_text,
            "diagnosed_at": exam
                .diagnosed_at
                .map(|d| d.format(DATETIME_FORMAT).to_string()),
            "has_diagnostic": exam.has_diagnostic(),
            "has_report": exam.report_path.is_some(),
            "is_owner": exam.user_id == user.id,
        }),
    );
    render_template("exam_detail.html", ctx).into_response()
}

fn render_template(name: &str, ctx: Context) -> Html<String> {
    let tera = crate::templates::get_tera();
    let rendered = tera
        .render(name, &ctx)
        .unwrap_or_else(|_| format!("Template error: {}", name));
    Html(rendered)
}
