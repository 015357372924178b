//! Similarity Matching
//!
//! A [`Matcher`] scores every (source, destination) pair through a pluggable
//! measure function, producing an R×C score matrix, then greedily extracts
//! the best matches above a threshold. Measures live in a name-keyed
//! registry; the default is rectangle IoU over the candidates' bounds.
//!
//! Scoring runs on the task fan-out at one of three granularities: one task
//! for the whole matrix, one per source row, or one per cell.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::errors::{Fault, Result, Status};
use crate::geometry::Rect;
use crate::task::{Fanout, Mode};

/// Anything a default-IoU matcher can score.
pub trait Similar {
    /// Bounding rectangle the IoU measure compares.
    fn bounds(&self) -> Rect;
}

impl<T: Similar> Similar for &T {
    fn bounds(&self) -> Rect {
        (*self).bounds()
    }
}

/// Pluggable similarity measure.
pub type Measure<T> = Arc<dyn Fn(&T, &T) -> f32 + Send + Sync>;

/// Task granularity of the score estimation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Granularity {
    /// One task computes the whole matrix.
    Global,
    /// One task per source row.
    #[default]
    Row,
    /// One task per (source, destination) cell.
    Cell,
}

/// One extracted match.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Match {
    pub src: usize,
    pub dst: usize,
    pub score: f32,
}

/// Dense R×C score matrix.
#[derive(Debug, Clone, Default)]
pub struct Scores {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl Scores {
    fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    #[must_use]
    pub const fn rows(&self) -> usize {
        self.rows
    }

    #[must_use]
    pub const fn cols(&self) -> usize {
        self.cols
    }

    #[must_use]
    pub fn at(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.cols + col]
    }

    /// Scores of one source against every destination.
    #[must_use]
    pub fn row(&self, row: usize) -> &[f32] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    /// Scores of every source against one destination.
    #[must_use]
    pub fn column(&self, col: usize) -> Vec<f32> {
        (0..self.rows).map(|r| self.at(r, col)).collect()
    }

    /// Greedy best-first extraction.
    ///
    /// Repeatedly picks the highest cell at or above `threshold` (row-major
    /// order wins ties), recording the match and masking its row and/or
    /// column when the corresponding exclusivity flag is set. Deterministic
    /// for a given matrix.
    #[must_use]
    pub fn extract(&self, threshold: f32, exclusive_dst: bool, exclusive_src: bool) -> Vec<Match> {
        let mut matches = Vec::new();
        if self.data.is_empty() {
            return matches;
        }

        let mut masked = self.data.clone();
        loop {
            let mut best: Option<(usize, usize, f32)> = None;
            for r in 0..self.rows {
                for c in 0..self.cols {
                    let score = masked[r * self.cols + c];
                    if score.is_nan() {
                        continue;
                    }
                    // Strict comparison keeps the earliest cell on ties.
                    if best.is_none_or(|(_, _, s)| score > s) {
                        best = Some((r, c, score));
                    }
                }
            }

            let Some((r, c, score)) = best else {
                return matches;
            };
            if score < threshold {
                return matches;
            }

            matches.push(Match { src: r, dst: c, score });
            masked[r * self.cols + c] = f32::NAN;
            if exclusive_src {
                for cell in &mut masked[r * self.cols..(r + 1) * self.cols] {
                    *cell = f32::NAN;
                }
            }
            if exclusive_dst {
                for row in 0..self.rows {
                    masked[row * self.cols + c] = f32::NAN;
                }
            }
        }
    }
}

/// Similarity-matrix builder plus greedy match extraction.
pub struct Matcher<T> {
    measures: FxHashMap<String, Measure<T>>,
    active: String,
    /// Minimum score for a pair to be considered a match.
    pub threshold: f32,
    granularity: Granularity,
    single: Fanout,
    per_row: Fanout,
    per_cell: Fanout,
    scores: Mutex<Scores>,
}

impl<T> std::fmt::Debug for Matcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Matcher")
            .field("active", &self.active)
            .field("threshold", &self.threshold)
            .field("granularity", &self.granularity)
            .finish_non_exhaustive()
    }
}

impl<T: Similar + Sync> Default for Matcher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Similar + Sync> Matcher<T> {
    /// A matcher with the `none` and `iou` measures registered, `iou`
    /// active and the parallel row estimator.
    #[must_use]
    pub fn new() -> Self {
        let mut measures: FxHashMap<String, Measure<T>> = FxHashMap::default();
        measures.insert("none".to_owned(), Arc::new(|_: &T, _: &T| 0.0));
        measures.insert(
            "iou".to_owned(),
            Arc::new(|a: &T, b: &T| a.bounds().iou(&b.bounds())),
        );
        Self {
            measures,
            active: "iou".to_owned(),
            threshold: 0.5,
            granularity: Granularity::default(),
            single: Fanout::new(Mode::Sync),
            per_row: Fanout::new(Mode::Async(8)),
            per_cell: Fanout::new(Mode::Async(8)),
            scores: Mutex::new(Scores::default()),
        }
    }

    /// Registers a measure under a new name.
    pub fn define(&mut self, name: impl Into<String>, measure: Measure<T>) -> Result<()> {
        let name = name.into();
        if self.measures.contains_key(&name) {
            return Err(Fault::InvalidValue);
        }
        self.measures.insert(name, measure);
        Ok(())
    }

    /// Removes a registered measure.
    pub fn undefine(&mut self, name: &str) -> Result<()> {
        if self.active == name {
            return Err(Fault::InvalidRequest);
        }
        self.measures
            .remove(name)
            .map(|_| ())
            .ok_or(Fault::NotExisting)
    }

    /// Selects the active measure by name.
    pub fn select(&mut self, name: &str) -> Result<()> {
        if !self.measures.contains_key(name) {
            return Err(Fault::NotExisting);
        }
        name.clone_into(&mut self.active);
        Ok(())
    }

    pub fn set_granularity(&mut self, granularity: Granularity) {
        self.granularity = granularity;
    }

    /// Scores the Cartesian product of `src` × `dst` with the active
    /// measure, storing the matrix for extraction.
    ///
    /// Operands are taken through [`std::borrow::Borrow`], so both owned
    /// slices and reference subsets (`&[&T]`) can be scored.
    pub fn estimate<U>(&self, src: &[U], dst: &[U]) -> Status
    where
        U: std::borrow::Borrow<T> + Sync,
    {
        let measure = Arc::clone(&self.measures[&self.active]);
        let rows = src.len();
        let cols = dst.len();
        let shared = Mutex::new(Scores::new(rows, cols));

        let status = match self.granularity {
            Granularity::Global => self.single.launch(|| {
                let mut scores = Scores::new(rows, cols);
                for (r, s) in src.iter().enumerate() {
                    for (c, d) in dst.iter().enumerate() {
                        scores.data[r * cols + c] = measure(s.borrow(), d.borrow());
                    }
                }
                *shared.lock() = scores;
                Status::Ok
            }),
            Granularity::Row => {
                let mut row_iter = 0..rows;
                self.per_row.run(
                    move || row_iter.next(),
                    |r| {
                        let row: Vec<f32> = dst
                            .iter()
                            .map(|d| measure(src[r].borrow(), d.borrow()))
                            .collect();
                        shared.lock().data[r * cols..(r + 1) * cols].copy_from_slice(&row);
                        Status::Ok
                    },
                )
            }
            Granularity::Cell => {
                let mut cell_iter = 0..rows * cols;
                self.per_cell.run(
                    move || cell_iter.next(),
                    |i| {
                        let (r, c) = (i / cols, i % cols);
                        let score = measure(src[r].borrow(), dst[c].borrow());
                        shared.lock().data[i] = score;
                        Status::Ok
                    },
                )
            }
        };

        *self.scores.lock() = shared.into_inner();
        status
    }

    /// Extracts matches from the last estimate with the stored threshold,
    /// both-exclusive.
    #[must_use]
    pub fn extract(&self) -> Vec<Match> {
        self.extract_with(self.threshold, true, true)
    }

    /// Extraction with explicit threshold and exclusivity flags.
    #[must_use]
    pub fn extract_with(
        &self,
        threshold: f32,
        exclusive_dst: bool,
        exclusive_src: bool,
    ) -> Vec<Match> {
        self.scores
            .lock()
            .extract(threshold, exclusive_dst, exclusive_src)
    }

    /// Copy of the last score matrix.
    #[must_use]
    pub fn scores(&self) -> Scores {
        self.scores.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy)]
    struct Box2(Rect);

    impl Similar for Box2 {
        fn bounds(&self) -> Rect {
            self.0
        }
    }

    fn boxes(rects: &[Rect]) -> Vec<Box2> {
        rects.iter().copied().map(Box2).collect()
    }

    #[test]
    fn default_iou_measure_scores_overlap() {
        let matcher: Matcher<Box2> = Matcher::new();
        let src = boxes(&[Rect::new(0, 0, 10, 10)]);
        let dst = boxes(&[Rect::new(5, 0, 10, 10)]);
        assert_eq!(matcher.estimate(&src, &dst), Status::Ok);
        let scores = matcher.scores();
        assert!((scores.at(0, 0) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn granularities_agree() {
        let src = boxes(&[
            Rect::new(0, 0, 10, 10),
            Rect::new(30, 30, 12, 12),
            Rect::new(70, 70, 8, 8),
        ]);
        let dst = boxes(&[Rect::new(2, 2, 10, 10), Rect::new(31, 29, 12, 12)]);

        let mut reference: Option<Vec<f32>> = None;
        for granularity in [Granularity::Global, Granularity::Row, Granularity::Cell] {
            let mut matcher: Matcher<Box2> = Matcher::new();
            matcher.set_granularity(granularity);
            matcher.estimate(&src, &dst);
            let data: Vec<f32> = (0..src.len())
                .flat_map(|r| matcher.scores().row(r).to_vec())
                .collect();
            match &reference {
                None => reference = Some(data),
                Some(expected) => assert_eq!(&data, expected, "{granularity:?} differs"),
            }
        }
    }

    #[test]
    fn exclusive_extraction_masks_rows_and_columns() {
        // Two sources both overlapping one destination best.
        let src = boxes(&[Rect::new(0, 0, 10, 10), Rect::new(1, 1, 10, 10)]);
        let dst = boxes(&[Rect::new(0, 0, 10, 10)]);
        let matcher: Matcher<Box2> = Matcher::new();
        matcher.estimate(&src, &dst);

        let matches = matcher.extract_with(0.1, true, true);
        assert_eq!(matches.len(), 1);
        assert_eq!((matches[0].src, matches[0].dst), (0, 0));

        // Without source exclusivity the second source may also match.
        let matches = matcher.extract_with(0.1, false, false);
        assert_eq!(matches.len(), 2);
    }

    #[test]
    fn empty_operands_extract_nothing() {
        let matcher: Matcher<Box2> = Matcher::new();
        let empty: Vec<Box2> = Vec::new();
        matcher.estimate(&empty, &empty);
        assert!(matcher.extract().is_empty());
    }

    #[test]
    fn measure_registry_rules() {
        let mut matcher: Matcher<Box2> = Matcher::new();
        assert_eq!(
            matcher.define("iou", Arc::new(|_: &Box2, _: &Box2| 1.0)).unwrap_err(),
            Fault::InvalidValue
        );
        matcher.define("constant", Arc::new(|_: &Box2, _: &Box2| 0.7)).unwrap();
        matcher.select("constant").unwrap();
        assert_eq!(matcher.undefine("constant").unwrap_err(), Fault::InvalidRequest);
        matcher.select("iou").unwrap();
        matcher.undefine("constant").unwrap();
        assert_eq!(matcher.select("constant").unwrap_err(), Fault::NotExisting);
    }
}
