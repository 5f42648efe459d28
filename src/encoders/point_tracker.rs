//! Incremental per-point confidence ratings across repeated observations.

use crate::config::TrackerConfig;
use crate::data::point::distance;
use crate::data::{Point, SpatialIndex};
use crate::encoders::Encoder;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingEvent {
    pub observation: u64,
    pub confidence: f64,
    pub rating: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedPoint {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub rating: f64,
    pub observations: u32,
    pub history: Vec<RatingEvent>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrackOutcome {
    Confirmed { id: String, rating: f64 },
    Added { id: String },
}

/// One rating per distinct real-world point.
///
/// `rating' = rating * decay + confidence * (1 - decay)`, clamped to the
/// configured bounds. Points not seen during an observation round decay
/// toward the minimum rating when the round is closed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointTracker {
    points: Vec<TrackedPoint>,
    observation: u64,
    next_id: u64,
    config: TrackerConfig,
}

impl PointTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            points: Vec::new(),
            observation: 0,
            next_id: 0,
            config,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[TrackedPoint] {
        &self.points
    }

    pub fn observation(&self) -> u64 {
        self.observation
    }

    pub fn get(&self, id: &str) -> Option<&TrackedPoint> {
        self.points.iter().find(|p| p.id == id)
    }

    fn clamp(&self, rating: f64) -> f64 {
        rating.clamp(self.config.min_rating, self.config.max_rating)
    }

    fn spatial_index(&self) -> SpatialIndex {
        SpatialIndex::from_xy(self.points.iter().map(|t| (t.x, t.y)))
    }

    /// Nearest tracked point within the match distance. Points at index
    /// `indexed` and beyond were added after `spatial` was built.
    fn nearest(&self, spatial: &SpatialIndex, indexed: usize, point: &Point) -> Option<usize> {
        let (x, y) = point.xy();
        let from_index = spatial.within(x, y, self.config.match_distance).into_iter().next();
        let from_round = self.points[indexed.min(self.points.len())..]
            .iter()
            .enumerate()
            .map(|(k, t)| (indexed + k, distance((t.x, t.y), (x, y))))
            .filter(|(_, d)| *d <= self.config.match_distance)
            .min_by(|a, b| a.1.total_cmp(&b.1));
        match (from_index, from_round) {
            (Some(a), Some(b)) => Some(if b.1 < a.1 { b.0 } else { a.0 }),
            (a, b) => a.or(b).map(|(i, _)| i),
        }
    }

    /// Confirm the nearest tracked point within the match distance, or start
    /// tracking a new one.
    pub fn observe(&mut self, point: &Point) -> TrackOutcome {
        let spatial = self.spatial_index();
        let indexed = self.points.len();
        self.observe_indexed(&spatial, indexed, point)
    }

    /// Distances to points confirmed earlier in the round are measured from
    /// their position when the round started.
    fn observe_indexed(&mut self, spatial: &SpatialIndex, indexed: usize, point: &Point) -> TrackOutcome {
        let decay = self.config.decay;
        let max_history = self.config.max_history;
        let observation = self.observation;

        if let Some(index) = self.nearest(spatial, indexed, point) {
            let rating = {
                let tracked = &self.points[index];
                tracked.rating * decay + point.confidence * (1.0 - decay)
            };
            let rating = self.clamp(rating);
            let tracked = &mut self.points[index];

            let weight = tracked.observations as f64;
            tracked.x = (tracked.x * weight + point.x) / (weight + 1.0);
            tracked.y = (tracked.y * weight + point.y) / (weight + 1.0);
            tracked.rating = rating;
            tracked.observations += 1;
            push_capped(
                &mut tracked.history,
                RatingEvent {
                    observation,
                    confidence: point.confidence,
                    rating,
                },
                max_history,
            );
            return TrackOutcome::Confirmed {
                id: tracked.id.clone(),
                rating,
            };
        }

        TrackOutcome::Added { id: self.add(point) }
    }

    /// Start tracking `point` without looking for an existing match.
    pub fn add(&mut self, point: &Point) -> String {
        let observation = self.observation;
        let id = if point.id.is_empty() || self.get(&point.id).is_some() {
            let id = format!("tp-{}", self.next_id);
            self.next_id += 1;
            id
        } else {
            point.id.clone()
        };
        let rating = self.clamp(point.confidence);
        self.points.push(TrackedPoint {
            id: id.clone(),
            x: point.x,
            y: point.y,
            rating,
            observations: 1,
            history: vec![RatingEvent {
                observation,
                confidence: point.confidence,
                rating,
            }],
        });
        id
    }

    /// Observe a full point set as one round, then close the round.
    pub fn observe_all(&mut self, points: &[Point]) -> Vec<TrackOutcome> {
        let spatial = self.spatial_index();
        let indexed = self.points.len();
        let outcomes: Vec<TrackOutcome> = points
            .iter()
            .map(|p| self.observe_indexed(&spatial, indexed, p))
            .collect();
        let seen: Vec<String> = outcomes
            .iter()
            .map(|o| match o {
                TrackOutcome::Confirmed { id, .. } | TrackOutcome::Added { id } => id.clone(),
            })
            .collect();
        self.end_observation(&seen);
        outcomes
    }

    /// Close an observation round, decaying every point not in `seen`.
    pub fn end_observation(&mut self, seen: &[String]) {
        let decay = self.config.decay;
        let (min, max) = (self.config.min_rating, self.config.max_rating);
        let max_history = self.config.max_history;
        let observation = self.observation;

        for tracked in self.points.iter_mut() {
            if seen.iter().any(|id| *id == tracked.id) {
                continue;
            }
            let rating = (tracked.rating * decay + min * (1.0 - decay)).clamp(min, max);
            tracked.rating = rating;
            push_capped(
                &mut tracked.history,
                RatingEvent {
                    observation,
                    confidence: 0.0,
                    rating,
                },
                max_history,
            );
        }
        self.observation += 1;
    }

    pub fn mean_rating(&self) -> f64 {
        if self.points.is_empty() {
            return 0.0;
        }
        self.points.iter().map(|p| p.rating).sum::<f64>() / self.points.len() as f64
    }

    /// `(id, point)` pairs in insertion order, for persistence.
    pub fn entries(&self) -> Vec<(String, TrackedPoint)> {
        self.points.iter().map(|p| (p.id.clone(), p.clone())).collect()
    }

    pub fn from_entries(entries: Vec<(String, TrackedPoint)>, observation: u64, config: TrackerConfig) -> Self {
        let points: Vec<TrackedPoint> = entries
            .into_iter()
            .map(|(id, mut point)| {
                point.id = id;
                point
            })
            .collect();
        let next_id = points.len() as u64;
        Self {
            points,
            observation,
            next_id,
            config,
        }
    }
}

fn push_capped(history: &mut Vec<RatingEvent>, event: RatingEvent, cap: usize) {
    history.push(event);
    if cap > 0 && history.len() > cap {
        let excess = history.len() - cap;
        history.drain(..excess);
    }
}

impl Encoder for PointTracker {
    type Config = TrackerConfig;

    fn name(&self) -> &'static str {
        "point_tracker"
    }

    fn encode(points: &[Point], config: &TrackerConfig) -> Self {
        let mut tracker = PointTracker::new(config.clone());
        let seen: Vec<String> = points.iter().map(|p| tracker.add(p)).collect();
        tracker.end_observation(&seen);
        tracker
    }

    /// Fraction of tracked points with a counterpart in `other`.
    fn similarity(&self, other: &Self) -> f64 {
        if self.is_empty() || other.is_empty() {
            return 0.0;
        }
        let spatial = other.spatial_index();
        let matched = self
            .points
            .iter()
            .filter(|p| other.nearest(&spatial, other.len(), &Point::new(p.x, p.y)).is_some())
            .count();
        matched as f64 / self.len().max(other.len()) as f64
    }

    fn is_valid(&self) -> bool {
        !self.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> PointTracker {
        PointTracker::new(TrackerConfig::default())
    }

    #[test]
    fn test_new_point_is_added() {
        let mut t = tracker();
        let outcome = t.observe(&Point::new(10.0, 10.0).with_confidence(0.9).with_id("a"));
        assert_eq!(outcome, TrackOutcome::Added { id: "a".to_string() });
        assert_eq!(t.get("a").unwrap().rating, 0.9);
    }

    #[test]
    fn test_nearby_point_confirms_with_decayed_rating() {
        let mut t = tracker();
        t.observe(&Point::new(10.0, 10.0).with_confidence(0.5).with_id("a"));
        let outcome = t.observe(&Point::new(14.0, 12.0).with_confidence(1.0));
        match outcome {
            TrackOutcome::Confirmed { id, rating } => {
                assert_eq!(id, "a");
                assert!((rating - (0.5 * 0.8 + 1.0 * 0.2)).abs() < 1e-12);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        let tracked = t.get("a").unwrap();
        assert_eq!(tracked.observations, 2);
        assert!((tracked.x - 12.0).abs() < 1e-12);
    }

    #[test]
    fn test_far_point_gets_generated_id() {
        let mut t = tracker();
        t.observe(&Point::new(0.0, 0.0));
        let outcome = t.observe(&Point::new(100.0, 0.0));
        assert!(matches!(outcome, TrackOutcome::Added { .. }));
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn test_round_matches_tracked_and_newly_added_points() {
        let mut t = tracker();
        t.observe_all(&[Point::new(0.0, 0.0).with_id("a")]);
        let outcomes = t.observe_all(&[
            Point::new(3.0, 0.0),
            Point::new(200.0, 0.0).with_id("b"),
            Point::new(203.0, 1.0),
        ]);
        assert!(matches!(&outcomes[0], TrackOutcome::Confirmed { id, .. } if id == "a"));
        assert!(matches!(&outcomes[1], TrackOutcome::Added { id } if id == "b"));
        assert!(matches!(&outcomes[2], TrackOutcome::Confirmed { id, .. } if id == "b"));
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn test_unobserved_points_decay_to_floor() {
        let mut t = tracker();
        t.observe_all(&[Point::new(0.0, 0.0).with_confidence(1.0).with_id("a")]);
        for _ in 0..200 {
            t.end_observation(&[]);
        }
        let tracked = t.get("a").unwrap();
        assert!((tracked.rating - 0.05).abs() < 1e-6);
        assert_eq!(tracked.history.len(), 16);
    }

    #[test]
    fn test_rating_never_exceeds_bounds() {
        let mut t = tracker();
        for _ in 0..50 {
            t.observe_all(&[Point::new(1.0, 1.0).with_confidence(1.0)]);
        }
        let rating = t.points()[0].rating;
        assert!(rating <= 1.0 && rating >= 0.05);
    }

    #[test]
    fn test_encode_keeps_close_points_distinct() {
        let t = PointTracker::encode(
            &[Point::new(0.0, 0.0), Point::new(5.0, 0.0), Point::new(0.0, 5.0)],
            &TrackerConfig::default(),
        );
        assert_eq!(t.len(), 3);
        assert_eq!(t.observation(), 1);
    }

    #[test]
    fn test_entries_round_trip() {
        let t = PointTracker::encode(
            &[Point::new(0.0, 0.0).with_id("p0"), Point::new(50.0, 0.0).with_id("p1")],
            &TrackerConfig::default(),
        );
        let restored = PointTracker::from_entries(t.entries(), t.observation(), TrackerConfig::default());
        assert_eq!(restored.points(), t.points());
        assert!((restored.mean_rating() - 0.5).abs() < 1e-12);
    }
}
