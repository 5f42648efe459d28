use crate::data::Point;
use crate::encoders::Encoder;
use serde::{Deserialize, Serialize};

/// Cells per side of the occupancy grid; 8 × 8 fills a `u64`.
pub const GRID_SIDE: usize = 8;
const CELL_COUNT: u32 = (GRID_SIDE * GRID_SIDE) as u32;

/// 8×8 occupancy grid of the point cloud's bounding box packed into 64 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BitmaskEncoder {
    mask: u64,
}

impl BitmaskEncoder {
    pub fn from_mask(mask: u64) -> Self {
        Self { mask }
    }

    pub fn mask(&self) -> u64 {
        self.mask
    }

    pub fn occupied_cells(&self) -> u32 {
        self.mask.count_ones()
    }

    pub fn is_occupied(&self, row: usize, col: usize) -> bool {
        row < GRID_SIDE && col < GRID_SIDE && self.mask & (1u64 << (row * GRID_SIDE + col)) != 0
    }

    /// Number of cells whose occupancy differs.
    pub fn distance(&self, other: &Self) -> u32 {
        (self.mask ^ other.mask).count_ones()
    }

    pub fn to_decimal_string(&self) -> String {
        self.mask.to_string()
    }

    pub fn from_decimal_string(value: &str) -> crate::Result<Self> {
        let mask = value
            .trim()
            .parse::<u64>()
            .map_err(|e| anyhow::anyhow!("invalid bitmask {:?}: {}", value, e))?;
        Ok(Self { mask })
    }

    fn cell(value: f64, min: f64, extent: f64) -> usize {
        if extent <= f64::EPSILON {
            return 0;
        }
        let normalized = (value - min) / extent;
        ((normalized * GRID_SIDE as f64).floor() as usize).min(GRID_SIDE - 1)
    }
}

impl Encoder for BitmaskEncoder {
    type Config = ();

    fn name(&self) -> &'static str {
        "bitmask"
    }

    fn encode(points: &[Point], _config: &()) -> Self {
        if points.is_empty() {
            return Self::default();
        }

        let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
        let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for p in points {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }

        let mut mask = 0u64;
        for p in points {
            let col = Self::cell(p.x, min_x, max_x - min_x);
            let row = Self::cell(p.y, min_y, max_y - min_y);
            mask |= 1u64 << (row * GRID_SIDE + col);
        }

        Self { mask }
    }

    fn similarity(&self, other: &Self) -> f64 {
        1.0 - self.distance(other) as f64 / CELL_COUNT as f64
    }

    fn is_valid(&self) -> bool {
        self.mask != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<Point> {
        vec![
            Point::new(0.0, 0.0),
            Point::new(100.0, 0.0),
            Point::new(0.0, 100.0),
            Point::new(100.0, 100.0),
        ]
    }

    #[test]
    fn test_corners_set_corner_bits() {
        let encoder = BitmaskEncoder::encode(&square(), &());
        assert_eq!(encoder.occupied_cells(), 4);
        assert!(encoder.is_occupied(0, 0));
        assert!(encoder.is_occupied(0, 7));
        assert!(encoder.is_occupied(7, 0));
        assert!(encoder.is_occupied(7, 7));
    }

    #[test]
    fn test_translation_and_scale_invariance() {
        let moved: Vec<Point> = square()
            .iter()
            .map(|p| Point::new(p.x * 3.0 + 50.0, p.y * 3.0 - 20.0))
            .collect();
        let a = BitmaskEncoder::encode(&square(), &());
        let b = BitmaskEncoder::encode(&moved, &());
        assert_eq!(a.distance(&b), 0);
        assert_eq!(a.similarity(&b), 1.0);
    }

    #[test]
    fn test_hamming_similarity() {
        let a = BitmaskEncoder::from_mask(0b1111);
        let b = BitmaskEncoder::from_mask(0b0011);
        assert_eq!(a.distance(&b), 2);
        assert!((a.similarity(&b) - (1.0 - 2.0 / 64.0)).abs() < 1e-12);
    }

    #[test]
    fn test_decimal_string_handles_high_bit() {
        let encoder = BitmaskEncoder::from_mask(u64::MAX - 5);
        let text = encoder.to_decimal_string();
        assert_eq!(text, "18446744073709551610");
        assert_eq!(BitmaskEncoder::from_decimal_string(&text).unwrap(), encoder);
        assert!(BitmaskEncoder::from_decimal_string("not a number").is_err());
    }

    #[test]
    fn test_empty_and_degenerate_inputs() {
        assert!(!BitmaskEncoder::encode(&[], &()).is_valid());
        let single = BitmaskEncoder::encode(&[Point::new(5.0, 5.0)], &());
        assert_eq!(single.mask(), 1);
    }
}
