//! Zones of Interest
//!
//! A [`Zone`] is a rectangular region detected in a scene: bounding
//! rectangle, optional contour, a Kalman-style [`State`] (3D centre, 2D
//! size, 3D velocity), a descending-score list of [`Prediction`]s with the
//! top one cached as the zone context, and a validity flag.
//!
//! Zones keep their identity across frames: the UUID is assigned once when
//! the zone is first marked into a scene, and [`Zone::update`] transplants
//! it onto the newer observation of the same object.

use glam::{IVec2, Vec2, Vec3};

use crate::geometry::Rect;
use crate::view::View;

/// A classification candidate: score, dataset index, class index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub score: f32,
    pub dataset: i16,
    pub id: i16,
}

impl Default for Prediction {
    fn default() -> Self {
        Self { score: -1.0, dataset: -1, id: -1 }
    }
}

impl Prediction {
    #[must_use]
    pub const fn new(score: f32, dataset: i16, id: i16) -> Self {
        Self { score, dataset, id }
    }

    /// Global class id across datasets.
    #[must_use]
    pub const fn gid(&self) -> i32 {
        self.dataset as i32 * 65_536 + self.id as i32
    }

    #[must_use]
    pub const fn is_a(&self, dataset: i16, id: i16) -> bool {
        self.dataset == dataset && self.id == id
    }

    /// Whether this prediction holds an actual class.
    #[must_use]
    pub const fn assigned(&self) -> bool {
        self.id >= 0
    }
}

/// Estimated 3D state of a tracked zone.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct State {
    /// Centre position in meters.
    pub centre: Vec3,
    /// Width and height in meters.
    pub size: Vec2,
    /// Velocity in meters per second.
    pub velocity: Vec3,
}

impl State {
    /// Similarity of two states: size IoU over squared centre distance.
    #[must_use]
    pub fn similarity(&self, other: &Self) -> f32 {
        let a = Rect::new(0, 0, (self.size.x * 1000.0) as i32, (self.size.y * 1000.0) as i32);
        let b = Rect::new(0, 0, (other.size.x * 1000.0) as i32, (other.size.y * 1000.0) as i32);
        let s = a.iou(&b);
        if s <= 0.0 {
            return 0.0;
        }
        let d = self.centre.distance_squared(other.centre).max(1e-6);
        s / d
    }
}

/// Polygonal contour refinement of a zone.
pub type Contour = Vec<IVec2>;

/// A detected or tracked region of interest.
#[derive(Debug, Clone, Default)]
pub struct Zone {
    /// Bounding rectangle in pixels.
    pub rect: Rect,
    /// Unique id; 0 until the zone is first marked into a scene.
    pub uuid: u64,
    pub state: State,
    pub contour: Contour,
    predictions: Vec<Prediction>,
    /// Cache of the top prediction.
    pub context: Prediction,
    pub description: String,
    /// Update/merge counter.
    pub tag: u32,
    marked: bool,
}

impl Zone {
    #[must_use]
    pub fn new(rect: Rect) -> Self {
        Self { rect, marked: true, ..Self::default() }
    }

    #[must_use]
    pub fn with_prediction(rect: Rect, prediction: Prediction) -> Self {
        let mut zone = Self::new(rect);
        zone.predict(prediction);
        zone
    }

    #[must_use]
    pub fn with_predictions(rect: Rect, predictions: Vec<Prediction>) -> Self {
        let mut zone = Self::new(rect);
        zone.predict_many(predictions);
        zone
    }

    /// Builds a zone around a contour's bounding rectangle.
    #[must_use]
    pub fn from_contour(contour: Contour) -> Self {
        let mut zone = Self::new(Rect::bounding(&contour));
        zone.contour = contour;
        zone
    }

    #[must_use]
    pub const fn valid(&self) -> bool {
        self.marked && self.rect.width > 0 && self.rect.height > 0
    }

    #[must_use]
    pub const fn invalid(&self) -> bool {
        !self.valid()
    }

    pub fn invalidate(&mut self) {
        self.marked = false;
    }

    /// Sorted, descending-score prediction list.
    #[must_use]
    pub fn predictions(&self) -> &[Prediction] {
        &self.predictions
    }

    /// Adds one prediction, keeping the list sorted and the context cache
    /// on the top entry.
    pub fn predict(&mut self, prediction: Prediction) -> &mut Self {
        self.predictions.push(prediction);
        self.resort();
        self
    }

    /// Adds a batch of predictions.
    pub fn predict_many(&mut self, predictions: Vec<Prediction>) -> &mut Self {
        if !predictions.is_empty() {
            self.predictions.extend(predictions);
            self.resort();
        }
        self
    }

    fn resort(&mut self) {
        // Stable sort: on equal scores the earlier (newer) entry stays first.
        self.predictions
            .sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        if let Some(top) = self.predictions.first() {
            self.context = *top;
        }
    }

    /// Takes over an older observation of the same object: adopts its UUID,
    /// accumulates its tag and merges its predictions (the newer zone's
    /// entries win score ties), then invalidates the older zone.
    pub fn update(&mut self, older: &mut Zone) -> &mut Self {
        self.update_with_recall(older, 1.0)
    }

    /// Like [`Zone::update`], scaling the older zone's prediction scores by
    /// `recall` before the merge.
    pub fn update_with_recall(&mut self, older: &mut Zone, recall: f32) -> &mut Self {
        debug_assert!(self.valid(), "cannot update an invalid zone");

        self.uuid = older.uuid;
        self.tag += older.tag;

        let inherited: Vec<Prediction> = older
            .predictions
            .drain(..)
            .map(|p| Prediction::new(p.score * recall, p.dataset, p.id))
            .collect();
        self.predict_many(inherited);

        older.invalidate();
        self
    }

    /// Widens this zone to cover `other` and absorbs its predictions.
    pub fn merge(&mut self, other: &Zone) -> &mut Self {
        self.rect = self.rect.union(&other.rect);
        self.predict_many(other.predictions.clone());
        self
    }

    /// Merges a set of zones into a fresh one covering them all.
    #[must_use]
    pub fn merge_all(zones: &[Zone]) -> Self {
        let mut rect = Rect::default();
        let mut predictions = Vec::new();
        for zone in zones {
            rect = rect.union(&zone.rect);
            predictions.extend_from_slice(&zone.predictions);
        }
        let mut merged = Self::with_predictions(rect, predictions);
        if let Some(first) = zones.first() {
            merged.description.clone_from(&first.description);
        }
        merged
    }

    /// Copy carrying identity and geometry only, the shape tracker stacks
    /// work on, without duplicating predictions or contours.
    #[must_use]
    pub fn geometry_copy(&self) -> Self {
        Self {
            rect: self.rect,
            uuid: self.uuid,
            state: self.state,
            marked: self.marked,
            ..Self::default()
        }
    }

    /// Updates the rectangle from the 3D state through the view projector.
    pub fn project(&mut self, view: &View) {
        let c = self.state.centre;
        let s = Vec3::new(self.state.size.x / 2.0, self.state.size.y / 2.0, 0.0);

        let depth = view.depth();
        let tl = depth.project(c - s);
        let br = depth.project(c + s);

        self.rect = Rect::new(tl.x, tl.y, br.x - tl.x, br.y - tl.y);
    }

    /// Updates the 3D state (centre and size) from the rectangle through
    /// the view projector.
    pub fn deproject(&mut self, view: &View) {
        let depth = view.depth();
        let z = depth.at(self.rect.centre());

        let tl = depth.deproject_at(self.rect.top_left(), z);
        let br = depth.deproject_at(self.rect.bottom_right(), z);
        let size = br - tl;

        self.state.centre = (tl + br) / 2.0;
        self.state.size = Vec2::new(size.x, size.y);
    }

    pub fn describe(&mut self, description: impl Into<String>) -> &mut Self {
        self.description = description.into();
        self
    }

    /// Whether this zone lies (almost entirely) inside the other one.
    #[must_use]
    pub fn inside(&self, other: &Zone) -> bool {
        self.rect.intersection(&other.rect).area() as f32 > self.rect.area() as f32 * 0.95
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predictions_stay_sorted_and_context_tracks_top() {
        let mut zone = Zone::new(Rect::of_size(10, 10));
        zone.predict(Prediction::new(0.3, 0, 1));
        zone.predict(Prediction::new(0.9, 0, 2));
        zone.predict(Prediction::new(0.5, 0, 3));

        let scores: Vec<f32> = zone.predictions().iter().map(|p| p.score).collect();
        assert_eq!(scores, vec![0.9, 0.5, 0.3]);
        assert_eq!(zone.context.id, 2);
    }

    #[test]
    fn update_adopts_identity_and_recalls_predictions() {
        let mut older = Zone::with_prediction(Rect::of_size(10, 10), Prediction::new(0.8, 0, 7));
        older.uuid = 42;
        older.tag = 3;

        let mut newer = Zone::new(Rect::new(2, 2, 10, 10));
        newer.tag = 1;
        newer.update_with_recall(&mut older, 0.5);

        assert_eq!(newer.uuid, 42);
        assert_eq!(newer.tag, 4);
        assert!((newer.predictions()[0].score - 0.4).abs() < 1e-6);
        assert!(older.invalid());
    }

    #[test]
    fn newer_predictions_win_score_ties() {
        let mut older = Zone::with_prediction(Rect::of_size(10, 10), Prediction::new(0.6, 0, 1));
        let mut newer = Zone::with_prediction(Rect::of_size(10, 10), Prediction::new(0.6, 0, 2));
        newer.update(&mut older);

        assert_eq!(newer.predictions().len(), 2);
        assert_eq!(newer.predictions()[0].id, 2, "newer entry must rank first on ties");
        assert_eq!(newer.context.id, 2);
    }

    #[test]
    fn degenerate_zones_are_invalid() {
        assert!(Zone::new(Rect::new(0, 0, 0, 10)).invalid());
        assert!(Zone::new(Rect::new(0, 0, 10, 10)).valid());
    }

    #[test]
    fn merge_covers_both_rectangles() {
        let mut a = Zone::with_prediction(Rect::of_size(10, 10), Prediction::new(0.2, 0, 1));
        let b = Zone::with_prediction(Rect::new(20, 20, 10, 10), Prediction::new(0.7, 0, 2));
        a.merge(&b);
        assert_eq!(a.rect, Rect::of_size(30, 30));
        assert_eq!(a.context.id, 2);
    }

    #[test]
    fn geometry_copy_drops_payload() {
        let mut zone = Zone::with_prediction(Rect::of_size(5, 5), Prediction::new(0.9, 0, 1));
        zone.uuid = 9;
        zone.describe("label");
        let copy = zone.geometry_copy();
        assert_eq!(copy.uuid, 9);
        assert_eq!(copy.rect, zone.rect);
        assert!(copy.predictions().is_empty());
        assert!(copy.description.is_empty());
    }
}
