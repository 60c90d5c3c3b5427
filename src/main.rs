mod ai;
mod auth;
mod config;
mod db;
mod report;
mod routes;
mod state;
mod storage;
mod templates;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "macula=info,tower_http=info".into()),
        )
        .init();

    let config = config::Config::from_env()?;
    let config = Arc::new(config);

    crate::storage::ensure_dirs(&config.media_root)?;

    let pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(pool.as_ref()).await?;

    let state = Arc::new(state::AppState {
        pool,
        config: config.clone(),
    });

    let app = Router::new()
        .route("/", get(routes::index))
        .route("/register", get(routes::register_form).post(routes::register_submit))
        .route("/login", get(routes::login_form).post(routes::login_submit))
        .route("/logout", post(routes::logout))
        .route("/patients", get(routes::patient_list))
        .route("/patients/new", get(routes::patient_form).post(routes::patient_create))
        .route("/exams/new", get(routes::exam_form).post(routes::exam_create))
        .route("/exams/:exam_id", get(routes::exam_detail))
        .route("/exams/:exam_id/analyze", post(routes::analyze_exam))
        .route("/exams/:exam_id/report", get(routes::exam_report))
        .route("/api/check-ai-key", get(routes::check_ai_key))
        .nest_service(
            "/media",
            tower_http::services::ServeDir::new(&config.media_root),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!("Macula listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
