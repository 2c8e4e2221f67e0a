use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::cmp::Ordering;
use std::sync::Arc;

use crate::handlers::prompts::{multi_comparison_prompt, SINGLE_ANALYSIS_PROMPT};
use crate::models::{brix_range, ImageUpload, OrangeAnalysisResult, RankedResult, SweetnessGrade};
use crate::services::ai_service::is_fatal;
use crate::services::VisionService;

pub const NOT_ORANGE_MESSAGE: &str = "This is not an orange image. Please upload an orange photo.";
pub const PARSE_FAILURE_MESSAGE: &str = "Could not parse analysis result. Please try again.";

static JSON_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```json\s*(.*?)\s*```").expect("valid regex"));

/// One entry of a model reply, before it is mapped onto the display schema.
#[derive(Debug, Default, Deserialize)]
struct RawAnalysis {
    #[serde(default)]
    is_orange: Option<bool>,
    #[serde(default, deserialize_with = "lenient_number")]
    image_index: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    rank: Option<f64>,
    #[serde(default)]
    sweetness_grade: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    brix_min: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    brix_max: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    sweetness_score: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    confidence_score: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    color_score: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    surface_score: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    ripeness_score: Option<f64>,
    #[serde(default)]
    analysis_reason: Option<String>,
    #[serde(default)]
    color_analysis: Option<String>,
    #[serde(default)]
    surface_analysis: Option<String>,
    #[serde(default)]
    ripeness_analysis: Option<String>,
    #[serde(default)]
    comparison_note: Option<String>,
}

/// Models sometimes quote numbers ("85"), add units ("12 Brix") or give a range ("12-14").
fn lenient_number<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => {
            // "12-14" keeps the leading bound; only a first-character '-' is a sign
            let cleaned: String = s
                .trim()
                .char_indices()
                .take_while(|(i, c)| c.is_ascii_digit() || *c == '.' || (*c == '-' && *i == 0))
                .map(|(_, c)| c)
                .collect();
            cleaned.parse::<f64>().ok()
        }
        _ => None,
    })
}

fn to_score(value: Option<f64>) -> Option<u32> {
    value.filter(|v| v.is_finite()).map(|v| v.round().clamp(0.0, 100.0) as u32)
}

impl RawAnalysis {
    fn into_result(self, comparison: bool) -> OrangeAnalysisResult {
        let mut analysis_reason = self.analysis_reason;
        if comparison {
            if let Some(note) = self.comparison_note.filter(|n| !n.trim().is_empty()) {
                let reason = analysis_reason.unwrap_or_default();
                analysis_reason = Some(format!("{} ({})", reason, note.trim()));
            }
        }

        OrangeAnalysisResult {
            is_orange: true,
            sweetness_grade: self.sweetness_grade.as_deref().map(SweetnessGrade::from_label),
            brix_range: brix_range(self.brix_min, self.brix_max),
            brix_min: self.brix_min,
            brix_max: self.brix_max,
            sweetness_score: to_score(self.sweetness_score),
            confidence_score: to_score(self.confidence_score),
            color_score: to_score(self.color_score),
            surface_score: to_score(self.surface_score),
            ripeness_score: to_score(self.ripeness_score),
            rank: self.rank.filter(|r| *r >= 1.0).map(|r| r.round() as u32),
            analysis_reason,
            color_analysis: self.color_analysis,
            surface_analysis: self.surface_analysis,
            ripeness_analysis: self.ripeness_analysis,
            error_message: None,
        }
    }
}

/// Pull the JSON payload out of a model reply.
///
/// Prefers a ```json fenced block, then the whole reply, then the outermost
/// `{...}` / `[...]` span.
pub fn extract_json(response: &str) -> Option<Value> {
    let candidate = match JSON_FENCE.captures(response) {
        Some(caps) => caps.get(1).map_or("", |m| m.as_str()),
        None => response.trim(),
    };

    if let Ok(value) = serde_json::from_str::<Value>(candidate) {
        return Some(value);
    }

    let start = candidate.find(|c: char| c == '{' || c == '[')?;
    let end = candidate.rfind(|c: char| c == '}' || c == ']')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&candidate[start..=end]).ok()
}

/// Orange sweetness analyzer
pub struct OrangeAnalyzer {
    vision: Arc<dyn VisionService>,
}

impl OrangeAnalyzer {
    pub fn new(vision: Arc<dyn VisionService>) -> Self {
        Self { vision }
    }

    /// Analyze a single orange photo.
    ///
    /// Only invalid-key and out-of-credit failures are returned as errors;
    /// everything else becomes a non-orange result carrying the message.
    pub async fn analyze(&self, image: &ImageUpload) -> Result<OrangeAnalysisResult> {
        log::info!("🍊 Analyzing {}", image.filename);

        match self.vision.analyze_image(image, SINGLE_ANALYSIS_PROMPT).await {
            Ok(response) => Ok(parse_single_response(&response)),
            Err(e) if is_fatal(&e) => Err(e),
            Err(e) => {
                log::error!("❌ Analysis of {} failed: {}", image.filename, e);
                Ok(OrangeAnalysisResult::not_orange(format!(
                    "Error during analysis: {}",
                    e
                )))
            }
        }
    }

    /// Rank several photos by expected sweetness.
    ///
    /// All images go to the model in one request so it can compare them
    /// directly; if that fails or the reply is unusable, every image is
    /// analyzed on its own and ranked by score.
    pub async fn analyze_multiple(&self, images: &[ImageUpload]) -> Result<Vec<RankedResult>> {
        if images.is_empty() {
            return Ok(Vec::new());
        }

        if images.len() == 1 {
            let mut result = self.analyze(&images[0]).await?;
            result.rank = Some(1);
            return Ok(vec![RankedResult {
                image_index: 0,
                filename: images[0].filename.clone(),
                result,
            }]);
        }

        log::info!("🏆 Comparing {} images", images.len());
        let prompt = multi_comparison_prompt(images.len());

        match self.vision.analyze_images(images, &prompt).await {
            Ok(response) => match parse_multi_response(&response, images) {
                Some(results) => Ok(results),
                None => {
                    log::warn!("⚠️ Could not parse comparison reply, falling back to individual analysis");
                    self.fallback_individual_analysis(images).await
                }
            },
            Err(e) if is_fatal(&e) => Err(e),
            Err(e) => {
                log::warn!("⚠️ Comparison request failed ({}), falling back to individual analysis", e);
                self.fallback_individual_analysis(images).await
            }
        }
    }

    async fn fallback_individual_analysis(&self, images: &[ImageUpload]) -> Result<Vec<RankedResult>> {
        let mut results = Vec::with_capacity(images.len());
        for (image_index, image) in images.iter().enumerate() {
            let result = self.analyze(image).await?;
            results.push(RankedResult {
                image_index,
                filename: image.filename.clone(),
                result,
            });
        }

        rank_by_score(&mut results);
        Ok(results)
    }
}

/// Sort descending by sweetness score (falling back to `brix_max`), non-oranges
/// last, then number the ranks from 1.
pub fn rank_by_score(results: &mut [RankedResult]) {
    fn sort_key(result: &OrangeAnalysisResult) -> f64 {
        if !result.is_orange {
            return -1.0;
        }
        result
            .sweetness_score
            .map(f64::from)
            .filter(|score| *score != 0.0)
            .or(result.brix_max)
            .unwrap_or(0.0)
    }

    results.sort_by(|a, b| {
        sort_key(&b.result)
            .partial_cmp(&sort_key(&a.result))
            .unwrap_or(Ordering::Equal)
    });

    for (idx, entry) in results.iter_mut().enumerate() {
        entry.result.rank = Some(idx as u32 + 1);
    }
}

pub fn parse_single_response(response: &str) -> OrangeAnalysisResult {
    let Some(value) = extract_json(response) else {
        log::warn!("⚠️ Reply is not JSON: {}", response);
        return OrangeAnalysisResult::not_orange(PARSE_FAILURE_MESSAGE);
    };

    let raw: RawAnalysis = match serde_json::from_value(value) {
        Ok(raw) => raw,
        Err(e) => {
            log::warn!("⚠️ Reply JSON has unexpected shape: {}", e);
            return OrangeAnalysisResult::not_orange(PARSE_FAILURE_MESSAGE);
        }
    };

    if !raw.is_orange.unwrap_or(false) {
        return OrangeAnalysisResult::not_orange(NOT_ORANGE_MESSAGE);
    }

    raw.into_result(false)
}

/// Map a comparison reply onto the uploaded images, ordered by rank.
///
/// Returns `None` when the reply is not a JSON array or no entry refers to an
/// uploaded image.
pub fn parse_multi_response(response: &str, images: &[ImageUpload]) -> Option<Vec<RankedResult>> {
    let value = extract_json(response)?;
    let entries: Vec<RawAnalysis> = match serde_json::from_value(value) {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("⚠️ Comparison reply has unexpected shape: {}", e);
            return None;
        }
    };

    let mut results = Vec::with_capacity(entries.len());
    for raw in entries {
        let position = raw.image_index.unwrap_or(1.0).round();
        if position < 1.0 || position > images.len() as f64 {
            log::warn!("⚠️ Dropping entry with out-of-range image_index {}", position);
            continue;
        }
        let image_index = position as usize - 1;
        results.push(RankedResult {
            image_index,
            filename: images[image_index].filename.clone(),
            result: raw.into_result(true),
        });
    }

    if results.is_empty() {
        return None;
    }

    results.sort_by_key(|entry| entry.result.rank.unwrap_or(999));
    Some(results)
}
