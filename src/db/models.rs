use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing)]
    pub password_digest: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Patient {
    pub id: i32,
    pub name: String,
    pub birth_date: NaiveDate,
    pub record_number: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "provider_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    Openai,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AiProvider {
    pub id: i32,
    pub name: String,
    pub kind: ProviderKind,
    pub api_url: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Prompt {
    pub id: i32,
    pub provider_id: i32,
    pub name: String,
    pub template: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "exam_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ExamStatus {
    Pending,
    Analyzing,
    Completed,
    Error,
}

impl ExamStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ExamStatus::Pending => "Pending analysis",
            ExamStatus::Analyzing => "Analyzing",
            ExamStatus::Completed => "Completed",
            ExamStatus::Error => "Analysis failed",
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Exam {
    pub id: i32,
    pub patient_id: i32,
    pub user_id: i32,
    pub image_path: String,
    pub image_filename: String,
    pub exam_date: DateTime<Utc>,
    pub provider_id: Option<i32>,
    pub prompt_id: Option<i32>,
    pub diagnostic_text: Option<String>,
    pub diagnosed_at: Option<DateTime<Utc>>,
    pub report_path: Option<String>,
    pub report_generated_at: Option<DateTime<Utc>>,
    pub status: ExamStatus,
    pub analysis_started_at: Option<DateTime<Utc>>,
}

impl Exam {
    /// An exam counts as diagnosed once non-empty narrative text is stored.
    pub fn has_diagnostic(&self) -> bool {
        self.diagnostic_text
            .as_deref()
            .map_or(false, |t| !t.trim().is_empty())
    }
}

/// Exam row joined with its patient's name, for listings.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ExamSummary {
    pub id: i32,
    pub patient_id: i32,
    pub patient_name: String,
    pub exam_date: DateTime<Utc>,
    pub status: ExamStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exam_with(diagnostic: Option<&str>, status: ExamStatus) -> Exam {
        Exam {
            id: 1,
            patient_id: 1,
            user_id: 1,
            image_path: "exames_oct/oct_1_20250101_120000.jpg".into(),
            image_filename: "scan.jpg".into(),
            exam_date: Utc::now(),
            provider_id: None,
            prompt_id: None,
            diagnostic_text: diagnostic.map(str::to_string),
            diagnosed_at: None,
            report_path: None,
            report_generated_at: None,
            status,
            analysis_started_at: None,
        }
    }

    #[test]
    fn blank_diagnostic_counts_as_absent() {
        assert!(!exam_with(None, ExamStatus::Pending).has_diagnostic());
        assert!(!exam_with(Some("   "), ExamStatus::Pending).has_diagnostic());
        assert!(exam_with(Some("normal foveal contour"), ExamStatus::Completed).has_diagnostic());
    }
}
