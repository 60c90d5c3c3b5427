// Report PDF generation
// Uses genpdf - requires Liberation or similar fonts in standard paths
pub mod format;

use genpdf::elements::{Break, Paragraph};
use genpdf::fonts::{FontData, FontFamily};
use genpdf::{Alignment, Element};

use crate::db::{Exam, Patient};
use format::{format_diagnostic, Block};

const DISCLAIMER: &str = "This report was generated by an artificial intelligence system and \
must be reviewed by a specialist physician. It does not replace professional clinical \
assessment and correlation with the patient's clinical presentation.";

const DATE_FORMAT: &str = "%d/%m/%Y";
const DATETIME_FORMAT: &str = "%d/%m/%Y %H:%M";

fn load_font_family() -> Result<FontFamily<FontData>, String> {
    // Try common font paths - genpdf needs actual font files for metrics
    let font_paths = [
        "/usr/share/fonts/truetype/liberation",
        "/usr/share/fonts/TTF",
        "/System/Library/Fonts/Supplemental",
        "/Library/Fonts",
    ];

    font_paths
        .iter()
        .find(|p| std::path::Path::new(p).exists())
        .and_then(|path| {
            ["LiberationSans", "DejaVuSans", "Arial"]
                .iter()
                .find_map(|name| genpdf::fonts::from_files(*path, name, None).ok())
        })
        .ok_or_else(|| "No suitable fonts found. Install: apt install fonts-liberation".to_string())
}

/// Patient identity and exam metadata lines, in report order. Optional
/// fields only appear when present.
fn metadata_lines(patient: &Patient, exam: &Exam, provider_name: Option<&str>) -> Vec<String> {
    let mut lines = vec![
        format!("Name: {}", patient.name),
        format!("Birth date: {}", patient.birth_date.format(DATE_FORMAT)),
    ];
    if let Some(record) = &patient.record_number {
        lines.push(format!("Record number: {}", record));
    }
    lines.push(format!(
        "Exam date: {}",
        exam.exam_date.format(DATETIME_FORMAT)
    ));
    if let Some(diagnosed_at) = exam.diagnosed_at {
        lines.push(format!(
            "Analysis date: {}",
            diagnosed_at.format(DATETIME_FORMAT)
        ));
    }
    if let Some(provider) = provider_name {
        lines.push(format!("Analysis system: {}", provider));
    }
    lines
}

/// Builds the full report PDF in memory and returns its bytes.
pub fn render_report(
    patient: &Patient,
    exam: &Exam,
    provider_name: Option<&str>,
) -> Result<Vec<u8>, String> {
    let font_family = load_font_family()?;

    let mut doc = genpdf::Document::new(font_family);
    doc.set_title("OCT Report");

    let mut decorator = genpdf::SimplePageDecorator::new();
    decorator.set_margins(15);
    doc.set_page_decorator(decorator);

    let title_style = genpdf::style::Style::new().with_font_size(18).bold();
    let section_style = genpdf::style::Style::new().with_font_size(14).bold();
    let content_style = genpdf::style::Style::new().with_font_size(11);
    let heading_style = genpdf::style::Style::new().with_font_size(11).bold();
    let data_style = genpdf::style::Style::new().with_font_size(10);

    doc.push(
        Paragraph::new("OPTICAL COHERENCE TOMOGRAPHY (OCT) REPORT")
            .aligned(Alignment::Center)
            .styled(title_style),
    );
    doc.push(Break::new(1.5));

    doc.push(Paragraph::new("PATIENT INFORMATION").styled(section_style));
    doc.push(Break::new(0.5));
    for line in metadata_lines(patient, exam, provider_name) {
        doc.push(Paragraph::new(line).styled(data_style));
    }
    doc.push(Break::new(1.0));

    if let Some(diagnostic) = exam.diagnostic_text.as_deref() {
        doc.push(Paragraph::new("ARTIFICIAL INTELLIGENCE ANALYSIS").styled(section_style));
        doc.push(Break::new(0.5));

        for block in format_diagnostic(diagnostic) {
            match block {
                Block::Heading(text) => {
                    doc.push(Break::new(0.3));
                    doc.push(Paragraph::new(text).styled(heading_style));
                }
                Block::Bullet(text) => {
                    doc.push(Paragraph::new(format!("\u{2022} {}", text)).styled(content_style));
                }
                Block::Paragraph(text) => {
                    doc.push(Paragraph::new(text).styled(content_style));
                }
            }
        }
    }

    doc.push(Break::new(1.5));
    doc.push(Paragraph::new("IMPORTANT").styled(section_style));
    doc.push(Break::new(0.5));
    doc.push(Paragraph::new(DISCLAIMER).styled(content_style));

    doc.push(Break::new(1.0));
    doc.push(
        Paragraph::new(format!(
            "Report generated at: {}",
            chrono::Utc::now().format(DATETIME_FORMAT)
        ))
        .styled(data_style),
    );

    let mut buffer = Vec::new();
    doc.render(&mut buffer).map_err(|e| e.to_string())?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ExamStatus;
    use chrono::{NaiveDate, Utc};

    fn sample_patient(record: Option<&str>) -> Patient {
        Patient {
            id: 3,
            name: "Maria Souza".to_string(),
            birth_date: NaiveDate::from_ymd_opt(1960, 5, 20).unwrap(),
            record_number: record.map(str::to_string),
            created_at: Utc::now(),
        }
    }

    fn sample_exam() -> Exam {
        Exam {
            id: 9,
            patient_id: 3,
            user_id: 1,
            image_path: "exames_oct/oct_3_20250101_120000.jpg".to_string(),
            image_filename: "scan.jpg".to_string(),
            exam_date: Utc::now(),
            provider_id: Some(1),
            prompt_id: None,
            diagnostic_text: Some("### Findings\n- cyst present".to_string()),
            diagnosed_at: Some(Utc::now()),
            report_path: None,
            report_generated_at: None,
            status: ExamStatus::Completed,
            analysis_started_at: None,
        }
    }

    #[test]
    fn metadata_includes_record_number_and_provider_when_present() {
        let lines = metadata_lines(&sample_patient(Some("PR-123")), &sample_exam(), Some("Gemini"));
        assert!(lines.iter().any(|l| l == "Record number: PR-123"));
        assert!(lines.iter().any(|l| l == "Analysis system: Gemini"));
        assert!(lines.iter().any(|l| l.starts_with("Analysis date: ")));
    }

    #[test]
    fn metadata_omits_absent_fields() {
        let mut exam = sample_exam();
        exam.diagnosed_at = None;
        let lines = metadata_lines(&sample_patient(None), &exam, None);
        assert!(!lines.iter().any(|l| l.starts_with("Record number")));
        assert!(!lines.iter().any(|l| l.starts_with("Analysis system")));
        assert!(!lines.iter().any(|l| l.starts_with("Analysis date")));
    }
}
