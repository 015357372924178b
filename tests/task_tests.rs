//! Task Fan-Out Integration Tests
//!
//! Tests for:
//! - Fan-out soundness: every item processed exactly once across workers
//! - Worst-status folding (lowest code, faults first)
//! - Tiled walking: full-tile emission, sync/async equivalence
//! - Cooperative cancellation through the pull iterator

use std::sync::atomic::{AtomicUsize, Ordering};

use percept::errors::{Fault, Status};
use percept::geometry::Rect;
use percept::task::tiled::Tiled;
use percept::task::{Fanout, Mode};

// ============================================================================
// Fan-out soundness
// ============================================================================

#[test]
fn every_item_is_processed_exactly_once() {
    for mode in [Mode::Sync, Mode::Lazy, Mode::Async(4), Mode::Async(16)] {
        let fanout = Fanout::new(mode);
        let hits: Vec<AtomicUsize> = (0..50).map(|_| AtomicUsize::new(0)).collect();
        let mut items = (0..50usize).collect::<Vec<_>>().into_iter();

        let status = fanout.run(
            move || items.next(),
            |i| {
                hits[i].fetch_add(1, Ordering::SeqCst);
                Status::Ok
            },
        );

        assert_eq!(status, Status::Ok, "{mode:?}");
        assert!(
            hits.iter().all(|h| h.load(Ordering::SeqCst) == 1),
            "{mode:?} missed or duplicated items"
        );
    }
}

#[test]
fn observed_status_is_the_minimum_code() {
    // Codes: Ok = 0, Retry = 1, NotReady = 2; the fold keeps the lowest.
    let fanout = Fanout::new(Mode::Async(4));
    let mut items = vec![
        Status::NotReady,
        Status::Retry,
        Status::Ok,
        Status::NotReady,
    ]
    .into_iter();
    let status = fanout.run(move || items.next(), |s| s);
    assert_eq!(status, Status::Ok);
    assert_eq!(fanout.wait(), Status::Ok);

    let fanout = Fanout::new(Mode::Async(4));
    let mut items = vec![Status::NotReady, Status::Retry].into_iter();
    assert_eq!(fanout.run(move || items.next(), |s| s), Status::Retry);
}

#[test]
fn any_fault_dominates_the_fold() {
    let fanout = Fanout::new(Mode::Async(8));
    let mut items = (0..64).collect::<Vec<i32>>().into_iter();
    let status = fanout.run(
        move || items.next(),
        |i| {
            if i == 63 {
                Status::Fault(Fault::InvalidRange)
            } else {
                Status::Ok
            }
        },
    );
    assert_eq!(status, Status::Fault(Fault::InvalidRange));
}

#[test]
fn empty_work_is_ok() {
    let fanout = Fanout::new(Mode::Async(4));
    let status = fanout.run(|| None::<u32>, |_| Status::Retry);
    assert_eq!(status, Status::Ok);
}

// ============================================================================
// Cooperative cancellation
// ============================================================================

#[test]
fn cancellation_drains_through_the_iterator() {
    let fanout = Fanout::new(Mode::Sync);
    let calls = AtomicUsize::new(0);
    let mut produced = 0;

    let status = fanout.run(
        move || {
            // The producer decides to stop after five items.
            if produced < 5 {
                produced += 1;
                Some(produced)
            } else {
                None
            }
        },
        |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            Status::Ok
        },
    );
    assert_eq!(status, Status::Ok);
    assert_eq!(calls.load(Ordering::SeqCst), 5);
}

// ============================================================================
// S6: tiled walking
// ============================================================================

#[test]
fn tiling_a_hundred_square_yields_thirty_six_tiles() {
    let tiled = Tiled::new(0);
    let calls = AtomicUsize::new(0);
    let status = tiled.start(Rect::of_size(100, 100), |roi| {
        assert_eq!((roi.width, roi.height), (16, 16));
        calls.fetch_add(1, Ordering::SeqCst);
        Status::Ok
    });
    assert_eq!(status, Status::Ok);
    assert_eq!(calls.load(Ordering::SeqCst), 36);
    assert_eq!(tiled.emitted(), 36);
}

#[test]
fn async_tiling_matches_sync_and_folds_statuses() {
    let tiled = Tiled::new(4);
    let calls = AtomicUsize::new(0);
    let status = tiled.start(Rect::of_size(100, 100), |roi| {
        calls.fetch_add(1, Ordering::SeqCst);
        if roi.x == 80 && roi.y == 80 {
            Status::Fault(Fault::Undefined)
        } else {
            Status::Ok
        }
    });
    assert_eq!(calls.load(Ordering::SeqCst), 36);
    assert_eq!(status, Status::Fault(Fault::Undefined));
    assert_eq!(tiled.wait(), Status::Fault(Fault::Undefined));
}

#[test]
fn stride_walks_overlapping_windows() {
    let tiled = Tiled::new(0).with_geometry(32, 32).with_stride(16, 16);
    let calls = AtomicUsize::new(0);
    tiled.start(Rect::of_size(64, 64), |_| {
        calls.fetch_add(1, Ordering::SeqCst);
        Status::Ok
    });
    // 3 positions per axis: 0, 16, 32.
    assert_eq!(calls.load(Ordering::SeqCst), 9);
}

#[test]
fn frames_smaller_than_a_tile_emit_nothing() {
    let tiled = Tiled::new(0);
    let calls = AtomicUsize::new(0);
    let status = tiled.start(Rect::of_size(10, 10), |_| {
        calls.fetch_add(1, Ordering::SeqCst);
        Status::Ok
    });
    assert_eq!(status, Status::Ok);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
