use anyhow::Result;
use chrono::Utc;

use crate::config::Config;
use crate::handlers::OrangeAnalyzer;
use crate::models::{AnalysisReport, ImageUpload};
use crate::services::images::{prepare_uploads, UploadLimits};
use crate::services::{get_vision_service, Provider};

/// One "Analyze" click: provider choice, optional key and the raw uploads.
#[derive(Debug)]
pub struct AnalysisRequest {
    pub provider: Provider,
    /// Key typed by the user; falls back to the server's configured key when blank.
    pub api_key: Option<String>,
    pub files: Vec<(String, Vec<u8>)>,
}

/// Why a request could not be analyzed at all.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("Please enter your API key.")]
    MissingApiKey,
    #[error("Please upload orange photos.")]
    NoImages { warnings: Vec<String> },
}

impl AnalysisRequest {
    pub fn resolve_api_key(&self, config: &Config) -> Option<String> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .or_else(|| config.api_key_for(self.provider))
            .map(str::to_string)
    }
}

/// A finished analysis plus the accepted images its results refer to.
#[derive(Debug)]
pub struct AnalysisOutcome {
    pub report: AnalysisReport,
    pub images: Vec<ImageUpload>,
}

/// Validate the uploads, call the provider and collect everything the
/// front ends need to render.
pub async fn run_analysis(request: AnalysisRequest, config: &Config) -> Result<AnalysisOutcome> {
    let api_key = request
        .resolve_api_key(config)
        .ok_or(RequestError::MissingApiKey)?;

    let limits = UploadLimits {
        max_images: config.max_images,
        max_image_bytes: config.max_image_bytes,
    };
    let (images, warnings) = prepare_uploads(request.files, limits);
    if images.is_empty() {
        return Err(RequestError::NoImages { warnings }.into());
    }

    let vision = get_vision_service(request.provider, &api_key, config)?;
    let provider = vision.provider().id().to_string();
    let model = vision.model().to_string();
    let analyzer = OrangeAnalyzer::new(vision);

    log::info!("📤 Analyzing {} image(s) with {}", images.len(), provider);
    let results = analyzer.analyze_multiple(&images).await?;
    log::info!("✅ Analysis finished: {} result(s)", results.len());

    Ok(AnalysisOutcome {
        report: AnalysisReport {
            provider,
            model,
            analyzed_at: Utc::now(),
            warnings,
            results,
        },
        images,
    })
}

/// Request errors that are the user's to fix, as opposed to provider failures.
pub fn request_error(err: &anyhow::Error) -> Option<&RequestError> {
    err.downcast_ref::<RequestError>()
}
