use crate::config::InputConfig;
use crate::data::{Point, PointBuilder};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One detection as emitted by the upstream detector. Every field is optional
/// so that malformed records reach validation instead of failing the parse.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawDetection {
    #[serde(default)]
    pub x: Option<f64>,
    #[serde(default)]
    pub y: Option<f64>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default, alias = "class")]
    pub label: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DetectionFile {
    List(Vec<RawDetection>),
    Wrapped { detections: Vec<RawDetection> },
}

/// Convert raw detections into points under the configured validation mode.
///
/// Points without an id are named `{source}-{index}`.
pub fn detections_to_points(detections: &[RawDetection], source: &str, config: &InputConfig) -> crate::Result<Vec<Point>> {
    detections
        .iter()
        .enumerate()
        .map(|(i, d)| {
            let id = d.id.clone().unwrap_or_else(|| format!("{}-{}", source, i));
            PointBuilder::new()
                .x(d.x)
                .y(d.y)
                .confidence(d.confidence)
                .id(id)
                .source(source)
                .default_confidence(config.default_confidence)
                .mode(config.validation)
                .build()
        })
        .collect()
}

pub fn parse_detections(content: &str) -> crate::Result<Vec<RawDetection>> {
    let file: DetectionFile = serde_json::from_str(content)?;
    Ok(match file {
        DetectionFile::List(list) => list,
        DetectionFile::Wrapped { detections } => detections,
    })
}

/// Load a detection file (`[{x, y, confidence, class}]` or
/// `{"detections": [...]}`) into points. The file stem becomes the source.
pub fn load_points<P: AsRef<Path>>(path: P, config: &InputConfig) -> crate::Result<Vec<Point>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read detections {}: {}", path.display(), e))?;
    let detections = parse_detections(&content)?;
    let source = source_name(path);
    let points = detections_to_points(&detections, &source, config)?;

    tracing::debug!(path = %path.display(), points = points.len(), "Loaded detections");
    Ok(points)
}

pub fn source_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "input".to_string())
}

pub fn validate_point_count(points: &[Point], min_points: usize) -> crate::Result<()> {
    if points.len() < min_points {
        return Err(anyhow::anyhow!(
            "Too few points: {}, minimum: {}",
            points.len(),
            min_points
        ));
    }
    Ok(())
}
