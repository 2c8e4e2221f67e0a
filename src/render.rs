//! Maps analysis results onto the display schema: grade, Brix range,
//! score, rationale and ranking.

use std::fmt::Write;

use crate::handlers::request::request_error;
use crate::models::{AnalysisReport, ImageUpload, OrangeAnalysisResult, RankedResult, SweetnessGrade};
use crate::services::ai_service::{failure_kind, FailureKind};
use crate::services::images::to_data_url;

pub const DISCLAIMER: &str =
    "This service uses AI to estimate orange sweetness based on appearance. Actual sweetness may differ. For reference only.";

pub fn rank_badge(rank: u32) -> String {
    match rank {
        1 => "🥇".to_string(),
        2 => "🥈".to_string(),
        3 => "🥉".to_string(),
        n => format!("#{}", n),
    }
}

pub fn rank_class(rank: u32) -> &'static str {
    match rank {
        1 => "rank-1",
        2 => "rank-2",
        3 => "rank-3",
        _ => "rank-other",
    }
}

pub fn grade_class(grade: Option<&SweetnessGrade>) -> &'static str {
    match grade {
        Some(SweetnessGrade::High) => "grade-high",
        Some(SweetnessGrade::Low) => "grade-low",
        _ => "grade-medium",
    }
}

fn grade_label(result: &OrangeAnalysisResult) -> String {
    result
        .sweetness_grade
        .as_ref()
        .map(|g| g.to_string())
        .unwrap_or_else(|| "Unknown".to_string())
}

fn or_dash(value: Option<&str>) -> &str {
    value.filter(|v| !v.trim().is_empty()).unwrap_or("-")
}

/// User-facing message for an analysis that could not run at all.
pub fn describe_failure(err: &anyhow::Error) -> String {
    if let Some(request_err) = request_error(err) {
        return request_err.to_string();
    }

    match failure_kind(err) {
        FailureKind::InsufficientCredits => {
            "Insufficient API credits. Please add credits on your API provider's website.".to_string()
        }
        FailureKind::InvalidApiKey => "Invalid API key. Please check and try again.".to_string(),
        FailureKind::Other => format!("An error occurred: {}", err),
    }
}

pub fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Plain-text report for the terminal.
pub fn render_text(report: &AnalysisReport) -> String {
    let mut out = String::new();
    let total = report.results.len();

    for warning in &report.warnings {
        let _ = writeln!(out, "⚠️  {}", warning);
    }

    if report.is_comparison() {
        let _ = writeln!(out, "🏆 Results (Ranked by Sweetness)\n");
    } else {
        let _ = writeln!(out, "📋 Analysis Result\n");
    }

    for entry in &report.results {
        render_text_entry(&mut out, entry, total);
        out.push('\n');
    }

    let _ = writeln!(out, "{}", DISCLAIMER);
    out
}

fn render_text_entry(out: &mut String, entry: &RankedResult, total: usize) {
    let result = &entry.result;
    let rank = result.rank.filter(|_| total > 1);

    match rank {
        Some(rank) => {
            let _ = writeln!(out, "{} {}", rank_badge(rank), entry.filename);
        }
        None => {
            let _ = writeln!(out, "{}", entry.filename);
        }
    }

    if !result.is_orange {
        let message = result
            .error_message
            .as_deref()
            .unwrap_or("This image does not appear to be an orange.");
        let _ = writeln!(out, "   ❌ {}", message);
        return;
    }

    if rank == Some(1) {
        let _ = writeln!(out, "   🏆 Expected Sweetest!");
    }
    let _ = writeln!(out, "   Sweetness Grade: {}", grade_label(result));
    let _ = writeln!(out, "   Est. Brix:       {}", or_dash(result.brix_range.as_deref()));
    if let Some(score) = result.sweetness_score {
        let _ = writeln!(out, "   Sweetness Score: {} / 100", score);
    }
    if let Some(confidence) = result.confidence_score {
        let _ = writeln!(out, "   Confidence:      {}%", confidence);
    }
    let _ = writeln!(out, "   🎨 Color:    {}", or_dash(result.color_analysis.as_deref()));
    let _ = writeln!(out, "   ✨ Surface:  {}", or_dash(result.surface_analysis.as_deref()));
    let _ = writeln!(out, "   🍊 Ripeness: {}", or_dash(result.ripeness_analysis.as_deref()));
    let _ = writeln!(out, "   💡 Summary:  {}", or_dash(result.analysis_reason.as_deref()));
}

/// HTML fragment for the results section of the upload page.
///
/// `images` is the accepted upload list; entries refer to it by index.
pub fn render_html(report: &AnalysisReport, images: &[ImageUpload]) -> String {
    let mut out = String::new();
    let total = report.results.len();

    for warning in &report.warnings {
        let _ = write!(out, r#"<div class="notice warning">⚠️ {}</div>"#, html_escape(warning));
    }

    if report.is_comparison() {
        out.push_str("<h2>🏆 Results (Ranked by Sweetness)</h2><p>AI compared all images and ranked them.</p>");
    } else {
        out.push_str("<h2>📋 Analysis Result</h2>");
    }

    for entry in &report.results {
        if report.is_comparison() {
            out.push_str("<hr>");
        }
        render_html_entry(&mut out, entry, images.get(entry.image_index), total);
    }

    out
}

fn render_html_entry(out: &mut String, entry: &RankedResult, image: Option<&ImageUpload>, total: usize) {
    let result = &entry.result;

    if !result.is_orange {
        let message = result
            .error_message
            .as_deref()
            .unwrap_or("This image does not appear to be an orange.");
        let _ = write!(
            out,
            r#"<div class="notice error">❌ <b>{}</b>: {}</div>"#,
            html_escape(&entry.filename),
            html_escape(message)
        );
        return;
    }

    let rank = result.rank.filter(|_| total > 1);
    if rank == Some(1) {
        out.push_str(r#"<div class="winner-banner">🏆 Expected Sweetest! 🏆</div>"#);
    }

    out.push_str(r#"<div class="result"><div class="result-image">"#);
    if let Some(image) = image {
        let _ = write!(
            out,
            r#"<img src="{}" alt="{}">"#,
            to_data_url(image),
            html_escape(&image.filename)
        );
    }
    if let Some(rank) = rank {
        let _ = write!(
            out,
            r#"<div class="rank-badge {}">{}</div>"#,
            rank_class(rank),
            rank_badge(rank)
        );
    }
    out.push_str("</div>");

    let _ = write!(
        out,
        r#"<div class="result-body"><div class="{}"><div class="grade-caption">Sweetness Grade</div><div class="grade-value">{}</div><div class="brix">Est. Brix: {}</div></div>"#,
        grade_class(result.sweetness_grade.as_ref()),
        html_escape(&grade_label(result)),
        html_escape(or_dash(result.brix_range.as_deref()))
    );

    if let Some(score) = result.sweetness_score {
        let _ = write!(
            out,
            r#"<div class="score">Sweetness Score: <span class="score-value">{}</span> / 100</div>"#,
            score
        );
    }
    if let Some(confidence) = result.confidence_score {
        let _ = write!(out, "<p><b>Confidence:</b> {}%</p>", confidence);
    }
    out.push_str("</div></div>");

    // Detail section starts open for the winner or a lone result
    let open = if rank.map_or(true, |r| r == 1) { " open" } else { "" };
    let _ = write!(
        out,
        r#"<details{}><summary>📊 View Detailed Analysis</summary><div class="details-grid"><div><b>🎨 Color</b><p>{}</p></div><div><b>✨ Surface</b><p>{}</p></div><div><b>🍊 Ripeness</b><p>{}</p></div></div><p><b>💡 Summary:</b> {}</p></details>"#,
        open,
        html_escape(or_dash(result.color_analysis.as_deref())),
        html_escape(or_dash(result.surface_analysis.as_deref())),
        html_escape(or_dash(result.ripeness_analysis.as_deref())),
        html_escape(or_dash(result.analysis_reason.as_deref()))
    );
}
