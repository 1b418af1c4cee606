//! Diagnostic plots rendered to SVG

use super::metrics::ConfusionMatrix;
use crate::{Error, Result};
use plotters::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

const WIDTH: u32 = 640;
const HEIGHT: u32 = 480;
/// Bars shown in the feature-importance plot
pub const TOP_FEATURES: usize = 15;

/// One rendered artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    name: String,
    content_type: String,
    bytes: Vec<u8>,
}

impl Artifact {
    /// Wrap an SVG document.
    #[must_use]
    pub fn svg(name: impl Into<String>, document: String) -> Self {
        Self {
            name: name.into(),
            content_type: "image/svg+xml".to_string(),
            bytes: document.into_bytes(),
        }
    }

    /// File name, e.g. `roc_curve_random_forest.svg`
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// MIME type
    #[must_use]
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Raw content
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Named artifacts for one candidate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactBundle {
    artifacts: Vec<Artifact>,
}

impl ArtifactBundle {
    /// Empty bundle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an artifact, replacing any with the same name.
    pub fn insert(&mut self, artifact: Artifact) {
        self.artifacts.retain(|a| a.name != artifact.name);
        self.artifacts.push(artifact);
    }

    /// Look up by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.name == name)
    }

    /// Artifact names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.artifacts.iter().map(|a| a.name.as_str())
    }

    /// All artifacts.
    pub fn iter(&self) -> impl Iterator<Item = &Artifact> {
        self.artifacts.iter()
    }

    /// Number of artifacts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    /// True when empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

fn draw_err(e: impl Display) -> Error {
    Error::Artifact(e.to_string())
}

/// ROC curve with the chance diagonal.
///
/// # Errors
///
/// `Error::Artifact` if drawing fails.
pub fn render_roc_curve(algorithm: &str, points: &[(f64, f64)], auc: f64) -> Result<Artifact> {
    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, (WIDTH, HEIGHT)).into_drawing_area();
        root.fill(&WHITE).map_err(draw_err)?;
        let mut chart = ChartBuilder::on(&root)
            .caption(format!("ROC curve - {algorithm} (AUC = {auc:.3})"), ("sans-serif", 20))
            .margin(10)
            .set_label_area_size(LabelAreaPosition::Left, 40)
            .set_label_area_size(LabelAreaPosition::Bottom, 40)
            .build_cartesian_2d(0.0..1.0, 0.0..1.0)
            .map_err(draw_err)?;
        chart
            .configure_mesh()
            .x_desc("False positive rate")
            .y_desc("True positive rate")
            .draw()
            .map_err(draw_err)?;
        chart
            .draw_series(LineSeries::new(vec![(0.0, 0.0), (1.0, 1.0)], &BLACK.mix(0.4)))
            .map_err(draw_err)?;
        chart
            .draw_series(LineSeries::new(points.iter().copied(), &BLUE))
            .map_err(draw_err)?;
        root.present().map_err(draw_err)?;
    }
    Ok(Artifact::svg(format!("roc_curve_{algorithm}.svg"), svg))
}

/// Confusion matrix as a shaded 2x2 grid with counts.
///
/// # Errors
///
/// `Error::Artifact` if drawing fails.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn render_confusion_matrix(algorithm: &str, matrix: &ConfusionMatrix) -> Result<Artifact> {
    let cells = [
        (0.0, 1.0, matrix.true_negatives),
        (1.0, 1.0, matrix.false_positives),
        (0.0, 0.0, matrix.false_negatives),
        (1.0, 0.0, matrix.true_positives),
    ];
    let peak = cells.iter().map(|c| c.2).max().unwrap_or(0).max(1) as f64;

    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, (WIDTH, HEIGHT)).into_drawing_area();
        root.fill(&WHITE).map_err(draw_err)?;
        let mut chart = ChartBuilder::on(&root)
            .caption(format!("Confusion matrix - {algorithm}"), ("sans-serif", 20))
            .margin(10)
            .set_label_area_size(LabelAreaPosition::Left, 40)
            .set_label_area_size(LabelAreaPosition::Bottom, 40)
            .build_cartesian_2d(0.0..2.0, 0.0..2.0)
            .map_err(draw_err)?;
        chart
            .configure_mesh()
            .disable_mesh()
            .x_desc("Predicted label")
            .y_desc("True label")
            .x_labels(3)
            .y_labels(3)
            .draw()
            .map_err(draw_err)?;

        chart
            .draw_series(cells.iter().map(|&(x, y, count)| {
                let shade = 255 - (200.0 * count as f64 / peak) as u8;
                Rectangle::new([(x, y), (x + 1.0, y + 1.0)], RGBColor(shade, shade, 255).filled())
            }))
            .map_err(draw_err)?;
        chart
            .draw_series(cells.iter().map(|&(x, y, count)| {
                Text::new(count.to_string(), (x + 0.45, y + 0.55), ("sans-serif", 24))
            }))
            .map_err(draw_err)?;
        root.present().map_err(draw_err)?;
    }
    Ok(Artifact::svg(format!("confusion_matrix_{algorithm}.svg"), svg))
}

/// Horizontal bars for the [`TOP_FEATURES`] most important features.
///
/// # Errors
///
/// `Error::Artifact` if drawing fails or the inputs disagree in length.
#[allow(clippy::cast_precision_loss)]
pub fn render_feature_importance(
    algorithm: &str,
    feature_names: &[String],
    importances: &[f64],
) -> Result<Artifact> {
    if feature_names.len() != importances.len() {
        return Err(Error::Artifact(format!(
            "{} feature names but {} importances",
            feature_names.len(),
            importances.len()
        )));
    }
    let mut ranked: Vec<(&str, f64)> = feature_names
        .iter()
        .map(String::as_str)
        .zip(importances.iter().copied())
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked.truncate(TOP_FEATURES);

    let peak = ranked.first().map_or(1.0, |r| r.1).max(f64::EPSILON);
    let rows = ranked.len().max(1) as f64;

    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, (WIDTH, HEIGHT)).into_drawing_area();
        root.fill(&WHITE).map_err(draw_err)?;
        let mut chart = ChartBuilder::on(&root)
            .caption(format!("Top feature importances - {algorithm}"), ("sans-serif", 20))
            .margin(10)
            .set_label_area_size(LabelAreaPosition::Bottom, 40)
            .build_cartesian_2d(-0.45 * peak..peak * 1.05, 0.0..rows)
            .map_err(draw_err)?;
        chart
            .configure_mesh()
            .disable_y_mesh()
            .x_desc("Importance")
            .draw()
            .map_err(draw_err)?;

        // most important at the top
        let bars = ranked.iter().enumerate().map(|(i, &(_, value))| {
            let y = rows - 1.0 - i as f64;
            Rectangle::new([(0.0, y + 0.1), (value, y + 0.9)], GREEN.mix(0.7).filled())
        });
        chart.draw_series(bars).map_err(draw_err)?;
        let labels = ranked.iter().enumerate().map(|(i, &(name, _))| {
            let y = rows - 1.0 - i as f64;
            Text::new(name.to_string(), (-0.43 * peak, y + 0.65), ("sans-serif", 12))
        });
        chart.draw_series(labels).map_err(draw_err)?;
        root.present().map_err(draw_err)?;
    }
    Ok(Artifact::svg(
        format!("feature_importance_{algorithm}.svg"),
        svg,
    ))
}
