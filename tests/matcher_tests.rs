//! Matcher Integration Tests
//!
//! Tests for:
//! - IoU scoring over the default measure
//! - Greedy extraction: threshold, exclusivity, row-major tie-break
//! - Custom measures through the registry

use std::sync::Arc;

use percept::errors::Status;
use percept::geometry::Rect;
use percept::task::matcher::{Granularity, Matcher, Similar};

#[derive(Debug, Clone, Copy)]
struct Region(Rect);

impl Similar for Region {
    fn bounds(&self) -> Rect {
        self.0
    }
}

fn regions(rects: &[(i32, i32, i32, i32)]) -> Vec<Region> {
    rects
        .iter()
        .map(|&(x, y, w, h)| Region(Rect::new(x, y, w, h)))
        .collect()
}

// ============================================================================
// S4: IoU matching with a threshold
// ============================================================================

#[test]
fn overlapping_pair_matches_distant_pair_does_not() {
    let src = regions(&[(0, 0, 10, 10), (100, 100, 10, 10)]);
    let dst = regions(&[(1, 1, 10, 10), (200, 200, 10, 10)]);

    let matcher: Matcher<Region> = Matcher::new();
    assert_eq!(matcher.estimate(&src, &dst), Status::Ok);

    let matches = matcher.extract();
    assert_eq!(matches.len(), 1);
    assert_eq!((matches[0].src, matches[0].dst), (0, 0));
    assert!(matches[0].score > 0.5, "score {}", matches[0].score);
}

// ============================================================================
// P6: exclusivity
// ============================================================================

#[test]
fn both_exclusive_extraction_uses_each_index_once() {
    // Three sources crowding two destinations.
    let src = regions(&[(0, 0, 10, 10), (2, 2, 10, 10), (4, 4, 10, 10)]);
    let dst = regions(&[(1, 1, 10, 10), (3, 3, 10, 10)]);

    let matcher: Matcher<Region> = Matcher::new();
    matcher.estimate(&src, &dst);
    let matches = matcher.extract_with(0.1, true, true);

    let mut sources: Vec<usize> = matches.iter().map(|m| m.src).collect();
    let mut destinations: Vec<usize> = matches.iter().map(|m| m.dst).collect();
    sources.sort_unstable();
    destinations.sort_unstable();
    sources.dedup();
    destinations.dedup();
    assert_eq!(sources.len(), matches.len(), "source used twice");
    assert_eq!(destinations.len(), matches.len(), "destination used twice");
    assert_eq!(matches.len(), 2, "two destinations, two matches at most");
}

#[test]
fn non_exclusive_destination_can_serve_many_sources() {
    let src = regions(&[(0, 0, 10, 10), (1, 1, 10, 10)]);
    let dst = regions(&[(0, 0, 10, 10)]);

    let matcher: Matcher<Region> = Matcher::new();
    matcher.estimate(&src, &dst);
    assert_eq!(matcher.extract_with(0.1, false, true).len(), 2);
}

// ============================================================================
// Determinism
// ============================================================================

#[test]
fn equal_scores_resolve_in_row_major_order() {
    // Two identical sources: both score 1.0 against the destination; the
    // first row must win.
    let src = regions(&[(5, 5, 10, 10), (5, 5, 10, 10)]);
    let dst = regions(&[(5, 5, 10, 10)]);

    let matcher: Matcher<Region> = Matcher::new();
    matcher.estimate(&src, &dst);
    let matches = matcher.extract();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].src, 0);
}

#[test]
fn extraction_is_deterministic_across_granularities() {
    let src = regions(&[
        (0, 0, 20, 20),
        (10, 10, 20, 20),
        (40, 40, 20, 20),
        (42, 41, 20, 20),
    ]);
    let dst = regions(&[(2, 1, 20, 20), (41, 40, 20, 20), (80, 80, 20, 20)]);

    let mut reference = None;
    for granularity in [Granularity::Global, Granularity::Row, Granularity::Cell] {
        let mut matcher: Matcher<Region> = Matcher::new();
        matcher.set_granularity(granularity);
        matcher.estimate(&src, &dst);
        let matches = matcher.extract_with(0.3, true, true);
        let pairs: Vec<(usize, usize)> = matches.iter().map(|m| (m.src, m.dst)).collect();
        match &reference {
            None => reference = Some(pairs),
            Some(expected) => assert_eq!(&pairs, expected, "{granularity:?}"),
        }
    }
}

// ============================================================================
// Custom measures
// ============================================================================

#[test]
fn a_registered_measure_replaces_iou() {
    let src = regions(&[(0, 0, 10, 10)]);
    let dst = regions(&[(500, 500, 10, 10)]);

    let mut matcher: Matcher<Region> = Matcher::new();
    // Distance-based affinity instead of overlap.
    matcher
        .define(
            "proximity",
            Arc::new(|a: &Region, b: &Region| {
                let d = (a.0.centre() - b.0.centre()).abs();
                1.0 / (1.0 + (d.x + d.y) as f32 / 100.0)
            }),
        )
        .unwrap();
    matcher.select("proximity").unwrap();

    matcher.estimate(&src, &dst);
    let matches = matcher.extract_with(0.05, true, true);
    assert_eq!(matches.len(), 1, "distant regions still score by proximity");

    matcher.select("none").unwrap();
    matcher.estimate(&src, &dst);
    assert!(matcher.extract_with(0.05, true, true).is_empty());
}
