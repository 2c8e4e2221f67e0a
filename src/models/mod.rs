use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

/// Three-level sweetness grade reported by the vision model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweetnessGrade {
    High,
    Medium,
    Low,
    /// Label the model produced outside the three allowed grades
    Other(String),
}

impl SweetnessGrade {
    pub fn from_label(s: &str) -> Self {
        let trimmed = s.trim();
        match trimmed.to_lowercase().as_str() {
            "high" | "높음" => SweetnessGrade::High,
            "medium" | "중간" => SweetnessGrade::Medium,
            "low" | "낮음" => SweetnessGrade::Low,
            _ => SweetnessGrade::Other(trimmed.to_string()),
        }
    }
}

impl std::fmt::Display for SweetnessGrade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SweetnessGrade::High => "High",
            SweetnessGrade::Medium => "Medium",
            SweetnessGrade::Low => "Low",
            SweetnessGrade::Other(label) => label.as_str(),
        };
        write!(f, "{}", s)
    }
}

impl Serialize for SweetnessGrade {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OrangeAnalysisResult {
    pub is_orange: bool,
    pub sweetness_grade: Option<SweetnessGrade>,
    pub brix_range: Option<String>, // e.g. "12~14"
    pub brix_min: Option<f64>,
    pub brix_max: Option<f64>,
    pub sweetness_score: Option<u32>,  // 0-100
    pub confidence_score: Option<u32>, // 0-100
    pub color_score: Option<u32>,
    pub surface_score: Option<u32>,
    pub ripeness_score: Option<u32>,
    pub rank: Option<u32>, // only meaningful in comparisons
    pub analysis_reason: Option<String>,
    pub color_analysis: Option<String>,
    pub surface_analysis: Option<String>,
    pub ripeness_analysis: Option<String>,
    pub error_message: Option<String>,
}

impl OrangeAnalysisResult {
    pub fn not_orange(message: impl Into<String>) -> Self {
        Self {
            is_orange: false,
            error_message: Some(message.into()),
            ..Default::default()
        }
    }
}

/// Format a Brix bound the way people write it: `12` rather than `12.0`.
pub fn format_brix(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// `"{min}~{max}"` when both bounds are present and non-zero.
pub fn brix_range(min: Option<f64>, max: Option<f64>) -> Option<String> {
    match (min, max) {
        (Some(lo), Some(hi)) if lo != 0.0 && hi != 0.0 => {
            Some(format!("{}~{}", format_brix(lo), format_brix(hi)))
        }
        _ => None,
    }
}

/// One uploaded photograph, already validated.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub mime: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct RankedResult {
    /// Position in the upload list (0-based)
    pub image_index: usize,
    pub filename: String,
    pub result: OrangeAnalysisResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub provider: String,
    pub model: String,
    pub analyzed_at: DateTime<Utc>,
    pub warnings: Vec<String>,
    pub results: Vec<RankedResult>,
}

impl AnalysisReport {
    pub fn is_comparison(&self) -> bool {
        self.results.len() > 1
    }
}
