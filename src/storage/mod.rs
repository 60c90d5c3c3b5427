use chrono::Utc;
use std::path::Path;

pub const OCT_SUBDIR: &str = "exames_oct";
pub const REPORT_SUBDIR: &str = "laudos_pdf";

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Filename for an uploaded OCT image: `oct_<patientId>_<YYYYMMDD_HHMMSS>.<ext>`.
pub fn oct_image_filename(patient_id: i32, extension: &str) -> String {
    format!(
        "oct_{}_{}.{}",
        patient_id,
        Utc::now().format(TIMESTAMP_FORMAT),
        extension.to_lowercase()
    )
}

/// Filename for a generated report: `laudo_<patientId>_<YYYYMMDD_HHMMSS>.pdf`.
pub fn report_filename(patient_id: i32) -> String {
    format!(
        "laudo_{}_{}.pdf",
        patient_id,
        Utc::now().format(TIMESTAMP_FORMAT)
    )
}

/// Extension of an uploaded filename, without the dot. Falls back to "jpg"
/// so the stored name always carries one.
pub fn file_extension(filename: &str) -> &str {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .unwrap_or("jpg")
}

pub fn ensure_dirs(media_root: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(media_root.join(OCT_SUBDIR))?;
    std::fs::create_dir_all(media_root.join(REPORT_SUBDIR))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oct_filename_pattern() {
        let name = oct_image_filename(42, "PNG");
        assert!(name.starts_with("oct_42_"));
        assert!(name.ends_with(".png"));
        // oct_<id>_YYYYMMDD_HHMMSS.ext
        assert_eq!(name.matches('_').count(), 3);
    }

    #[test]
    fn report_filename_pattern() {
        let name = report_filename(7);
        assert!(name.starts_with("laudo_7_"));
        assert!(name.ends_with(".pdf"));
    }

    #[test]
    fn extension_falls_back_to_jpg() {
        assert_eq!(file_extension("scan.jpeg"), "jpeg");
        assert_eq!(file_extension("scan"), "jpg");
        assert_eq!(file_extension(""), "jpg");
    }

    #[test]
    fn ensure_dirs_creates_both_subdirs() {
        let tmp = tempfile::tempdir().unwrap();
        ensure_dirs(tmp.path()).unwrap();
        assert!(tmp.path().join(OCT_SUBDIR).is_dir());
        assert!(tmp.path().join(REPORT_SUBDIR).is_dir());
    }
}
