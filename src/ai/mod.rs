mod gemini;
mod openai;

pub use gemini::GeminiClient;
pub use openai::OpenAiClient;

use async_trait::async_trait;
use sqlx::PgPool;
use std::path::Path;
use thiserror::Error;
use tracing::info;

use crate::db::{self, AiProvider, ProviderKind};

/// Structured clinical template sent with every OCT image unless the selected
/// provider has an active configured prompt of its own.
const OCT_REPORT_PROMPT: &str = r#"As a retina and vitreous specialist with expertise in optical coherence tomography, analyze this macular OCT image and produce a structured, objective, technical report.

STRUCTURE THE REPORT AS FOLLOWS:

## TECHNICAL ANALYSIS OF THE OCT IMAGE

### IMAGE QUALITY
- Technical quality (good/fair/limited)
- Foveal centration
- Presence of artifacts

### RETINAL ANATOMY
**Retinal Layers:**
- Internal limiting membrane
- Plexiform and nuclear layers
- Ellipsoid zone and external limiting membrane
- Retinal pigment epithelium (RPE)
- RPE/Bruch's membrane complex

**Foveal Morphology:**
- Foveal depression (present/absent/altered)
- Estimated foveal thickness
- Outer layer architecture

### PATHOLOGICAL FINDINGS
**Intraretinal Changes:**
- Cystoid edema (absent/mild/moderate/severe)
- Retinal thickening
- Disorganization of retinal inner layers (DRIL)

**Subretinal Changes:**
- Subretinal fluid
- Neurosensory detachment
- Subretinal material

**RPE Changes:**
- RPE detachment
- Drusenoid elevations
- RPE atrophy

### DIFFERENTIAL DIAGNOSIS
1. **Primary Hypothesis:** [most likely diagnosis]
2. **Differential Diagnoses:** [up to 2 alternatives]
3. **Classification:** [grade/stage when applicable]

### CLINICAL RECOMMENDATIONS
- Ophthalmologic follow-up
- Indicated complementary exams
- Suggested therapeutic management

IMPORTANT: Use precise medical terminology, be concise and avoid colloquial expressions. Keep a professional, scientific tone."#;

const SHORT_OCT_PROMPT: &str = r#"Analyze this OCT (optical coherence tomography) image and provide:

1. An anatomic description of the visible structures
2. Identification of pathological changes
3. The most likely diagnosis
4. Clinical recommendations

Write a detailed, professional medical report."#;

/// Returns a caller-supplied prompt verbatim, or the short default template.
pub fn build_prompt(custom: Option<&str>) -> String {
    match custom {
        Some(text) => text.to_string(),
        None => SHORT_OCT_PROMPT.to_string(),
    }
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("No active AI provider configured. Configure a provider before running analysis.")]
    NoActiveProvider,
    #[error("API key is not configured for provider {provider}.")]
    MissingApiKey { provider: String },
    #[error("Could not read exam image: {0}")]
    ImageUnreadable(#[from] std::io::Error),
    #[error("Provider lookup failed: {0}")]
    Db(#[from] sqlx::Error),
    #[error("AI analysis failed: {0}")]
    Api(String),
    #[error("Empty response from the AI service.")]
    EmptyResponse,
}

/// Outcome of a successful analysis: the narrative plus the provider and
/// prompt actually used, so the caller can record them on the exam.
#[derive(Debug)]
pub struct Analysis {
    pub diagnostic: String,
    pub provider_id: i32,
    pub provider_name: String,
    pub prompt_id: Option<i32>,
}

/// Capability every wired AI backend exposes: one image in, one free-text
/// clinical narrative out.
#[async_trait]
pub trait VisionProvider: Send + Sync {
    async fn analyze_image(
        &self,
        image: &[u8],
        mime_type: &str,
        prompt: &str,
    ) -> Result<String, String>;
}

/// First active provider in name order. Inactive rows are never eligible.
pub fn select_provider(providers: &[AiProvider]) -> Option<&AiProvider> {
    providers.iter().find(|p| p.active)
}

/// Builds the concrete client for a provider record, dispatching on its kind.
pub fn client_for(provider: &AiProvider) -> Result<Box<dyn VisionProvider>, AnalysisError> {
    if provider.api_key.trim().is_empty() {
        return Err(AnalysisError::MissingApiKey {
            provider: provider.name.clone(),
        });
    }

    Ok(match provider.kind {
        ProviderKind::Gemini => Box::new(GeminiClient::new(
            provider.api_key.clone(),
            &provider.api_url,
        )),
        ProviderKind::Openai => Box::new(OpenAiClient::new(
            provider.api_key.clone(),
            &provider.api_url,
        )),
    })
}

/// Sends an exam image to the active provider and returns the diagnostic
/// narrative. Every failure mode comes back as an `AnalysisError` value;
/// the exam record itself is never touched here.
pub async fn analyze_exam_image(
    pool: &PgPool,
    image_path: &Path,
) -> Result<Analysis, AnalysisError> {
    let providers = db::list_providers(pool).await?;
    let provider = select_provider(&providers).ok_or(AnalysisError::NoActiveProvider)?;
    let client = client_for(provider)?;

    let image = std::fs::read(image_path)?;
    let mime_type = mime_guess::from_path(image_path)
        .first_raw()
        .unwrap_or("image/jpeg");

    let configured = db::active_prompt_for_provider(pool, provider.id).await?;
    let prompt_id = configured.as_ref().map(|p| p.id);
    let prompt = configured
        .map(|p| p.template)
        .unwrap_or_else(|| OCT_REPORT_PROMPT.to_string());

    info!(
        "Analyzing OCT image {} with provider {} ({} bytes, {})",
        image_path.display(),
        provider.name,
        image.len(),
        mime_type
    );

    let diagnostic = client
        .analyze_image(&image, mime_type, &prompt)
        .await
        .map_err(AnalysisError::Api)?;

    if diagnostic.trim().is_empty() {
        return Err(AnalysisError::EmptyResponse);
    }

    info!("Analysis succeeded for {}", image_path.display());

    Ok(Analysis {
        diagnostic,
        provider_id: provider.id,
        provider_name: provider.name.clone(),
        prompt_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn provider(name: &str, kind: ProviderKind, active: bool, api_key: &str) -> AiProvider {
        AiProvider {
            id: 1,
            name: name.to_string(),
            kind,
            api_url: String::new(),
            api_key: api_key.to_string(),
            active,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn build_prompt_prefers_custom_text() {
        assert_eq!(build_prompt(Some("describe the fovea")), "describe the fovea");
        assert_eq!(build_prompt(None), SHORT_OCT_PROMPT);
    }

    #[test]
    fn inactive_providers_are_never_selected() {
        let providers = vec![
            provider("gemini-main", ProviderKind::Gemini, false, "k1"),
            provider("openai-backup", ProviderKind::Openai, true, "k2"),
        ];
        let selected = select_provider(&providers).unwrap();
        assert_eq!(selected.name, "openai-backup");

        assert!(select_provider(&[]).is_none());
        let all_inactive = vec![provider("g", ProviderKind::Gemini, false, "k")];
        assert!(select_provider(&all_inactive).is_none());
    }

    #[test]
    fn blank_api_key_fails_before_any_io() {
        let p = provider("gemini-main", ProviderKind::Gemini, true, "   ");
        match client_for(&p) {
            Err(AnalysisError::MissingApiKey { provider }) => assert_eq!(provider, "gemini-main"),
            other => panic!("expected MissingApiKey, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn each_kind_builds_a_client() {
        for kind in [ProviderKind::Gemini, ProviderKind::Openai] {
            let p = provider("any", kind, true, "real-key");
            assert!(client_for(&p).is_ok());
        }
    }
}
