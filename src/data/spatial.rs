//! K-d tree over point positions for nearest-neighbour and radius queries.

use crate::data::Point;
use kiddo::immutable::float::kdtree::ImmutableKdTree;
use kiddo::SquaredEuclidean;
use std::num::NonZeroUsize;

pub struct SpatialIndex {
    tree: Option<ImmutableKdTree<f64, u32, 2, 32>>,
    len: usize,
}

impl SpatialIndex {
    pub fn new(points: &[Point]) -> Self {
        Self::from_xy(points.iter().map(Point::xy))
    }

    pub fn from_xy(coords: impl IntoIterator<Item = (f64, f64)>) -> Self {
        let entries: Vec<[f64; 2]> = coords.into_iter().map(|(x, y)| [x, y]).collect();
        let tree = (!entries.is_empty()).then(|| ImmutableKdTree::new_from_slice(&entries));
        Self {
            tree,
            len: entries.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The `k` closest entries to `(x, y)` as `(index, distance)`, nearest first.
    pub fn nearest(&self, x: f64, y: f64, k: usize) -> Vec<(usize, f64)> {
        let (Some(tree), Some(qty)) = (self.tree.as_ref(), NonZeroUsize::new(k.min(self.len))) else {
            return Vec::new();
        };
        tree.nearest_n::<SquaredEuclidean>(&[x, y], qty)
            .into_iter()
            .map(|nn| (nn.item as usize, nn.distance.sqrt()))
            .collect()
    }

    /// Like [`nearest`](Self::nearest) for the entry at `index`, leaving
    /// that entry itself out.
    pub fn neighbors_of(&self, index: usize, x: f64, y: f64, k: usize) -> Vec<(usize, f64)> {
        let mut found: Vec<(usize, f64)> = self
            .nearest(x, y, k + 1)
            .into_iter()
            .filter(|(j, _)| *j != index)
            .collect();
        found.truncate(k);
        found
    }

    pub fn nearest_one(&self, x: f64, y: f64) -> Option<(usize, f64)> {
        let tree = self.tree.as_ref()?;
        let nn = tree.nearest_one::<SquaredEuclidean>(&[x, y]);
        Some((nn.item as usize, nn.distance.sqrt()))
    }

    /// Every entry within `radius` of `(x, y)`, nearest first.
    pub fn within(&self, x: f64, y: f64, radius: f64) -> Vec<(usize, f64)> {
        let Some(tree) = self.tree.as_ref() else {
            return Vec::new();
        };
        tree.within::<SquaredEuclidean>(&[x, y], radius * radius)
            .into_iter()
            .map(|nn| (nn.item as usize, nn.distance.sqrt()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::synthetic::grid_points;

    #[test]
    fn test_nearest_excludes_self() {
        let points = grid_points(4, 4, 10.0);
        let index = SpatialIndex::new(&points);
        let found = index.neighbors_of(5, points[5].x, points[5].y, 4);
        assert_eq!(found.len(), 4);
        assert!(found.iter().all(|(j, d)| *j != 5 && (d - 10.0).abs() < 1e-9));
    }

    #[test]
    fn test_within_radius_sorted() {
        let points = vec![Point::new(0.0, 0.0), Point::new(3.0, 0.0), Point::new(1.0, 0.0), Point::new(50.0, 0.0)];
        let index = SpatialIndex::new(&points);
        let found = index.within(0.0, 0.0, 5.0);
        assert_eq!(found.iter().map(|(j, _)| *j).collect::<Vec<_>>(), vec![0, 2, 1]);
        assert_eq!(index.nearest_one(49.0, 1.0).map(|(j, _)| j), Some(3));
    }

    #[test]
    fn test_empty_index() {
        let index = SpatialIndex::new(&[]);
        assert!(index.is_empty());
        assert!(index.nearest(0.0, 0.0, 3).is_empty());
        assert!(index.within(0.0, 0.0, 10.0).is_empty());
        assert!(index.nearest_one(0.0, 0.0).is_none());
    }
}
