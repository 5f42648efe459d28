use serde::{Deserialize, Serialize};

/// Confidence assigned to points whose detector did not report one.
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

/// A single detected feature of a sole impression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    /// Detector confidence, always within `[0, 1]`
    pub confidence: f64,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub source: String,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            confidence: DEFAULT_CONFIDENCE,
            id: String::new(),
            source: String::new(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = clamp_confidence(confidence, DEFAULT_CONFIDENCE);
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn xy(&self) -> (f64, f64) {
        (self.x, self.y)
    }

    pub fn distance_to(&self, other: &Point) -> f64 {
        distance(self.xy(), other.xy())
    }
}

/// Clamp a confidence into `[0, 1]`, substituting `fallback` for NaN.
pub fn clamp_confidence(value: f64, fallback: f64) -> f64 {
    if value.is_nan() {
        fallback.clamp(0.0, 1.0)
    } else {
        value.clamp(0.0, 1.0)
    }
}

pub fn distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    let dx = a.0 - b.0;
    let dy = a.1 - b.1;
    (dx * dx + dy * dy).sqrt()
}

pub fn centroid(points: &[Point]) -> (f64, f64) {
    if points.is_empty() {
        return (0.0, 0.0);
    }
    let n = points.len() as f64;
    let sx: f64 = points.iter().map(|p| p.x).sum();
    let sy: f64 = points.iter().map(|p| p.y).sum();
    (sx / n, sy / n)
}

/// Root-mean-square distance of the points from their centroid.
pub fn rms_radius(points: &[Point]) -> f64 {
    if points.is_empty() {
        return 0.0;
    }
    let c = centroid(points);
    let sum: f64 = points
        .iter()
        .map(|p| {
            let d = distance(p.xy(), c);
            d * d
        })
        .sum();
    (sum / points.len() as f64).sqrt()
}

/// How malformed detections are treated when building points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    /// Missing or non-finite coordinates default to the origin
    #[default]
    Lenient,
    /// Missing or non-finite coordinates are rejected
    Strict,
}

/// Validating builder for [`Point`].
#[derive(Debug, Clone, Default)]
pub struct PointBuilder {
    x: Option<f64>,
    y: Option<f64>,
    confidence: Option<f64>,
    id: Option<String>,
    source: Option<String>,
    default_confidence: Option<f64>,
    mode: ValidationMode,
}

impl PointBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn x(mut self, x: Option<f64>) -> Self {
        self.x = x;
        self
    }

    pub fn y(mut self, y: Option<f64>) -> Self {
        self.y = y;
        self
    }

    pub fn confidence(mut self, confidence: Option<f64>) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn default_confidence(mut self, confidence: f64) -> Self {
        self.default_confidence = Some(confidence);
        self
    }

    pub fn mode(mut self, mode: ValidationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn build(self) -> crate::Result<Point> {
        let x = self.coordinate("x", self.x)?;
        let y = self.coordinate("y", self.y)?;
        let fallback = self.default_confidence.unwrap_or(DEFAULT_CONFIDENCE);
        let confidence = clamp_confidence(self.confidence.unwrap_or(fallback), fallback);

        Ok(Point {
            x,
            y,
            confidence,
            id: self.id.unwrap_or_default(),
            source: self.source.unwrap_or_default(),
        })
    }

    fn coordinate(&self, axis: &str, value: Option<f64>) -> crate::Result<f64> {
        match value {
            Some(v) if v.is_finite() => Ok(v),
            other => match self.mode {
                ValidationMode::Strict => Err(anyhow::anyhow!(
                    "point {:?} has invalid {} coordinate: {:?}",
                    self.id.as_deref().unwrap_or("<unnamed>"),
                    axis,
                    other
                )),
                ValidationMode::Lenient => {
                    tracing::warn!(
                        point_id = self.id.as_deref().unwrap_or("<unnamed>"),
                        axis = axis,
                        value = ?other,
                        "Invalid coordinate defaulted to origin"
                    );
                    Ok(0.0)
                }
            },
        }
    }
}
