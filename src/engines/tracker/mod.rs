//! Tracker Engines
//!
//! The engines a tracker stage can run:
//!
//! - [`NoneTracker`]: pass-through; only snapshots the last scene.
//! - [`HistoryTracker`]: remembers each pass without predicting anything.
//! - [`KalmanTracker`]: motion flavour (constant-velocity prediction).
//! - [`CamShiftTracker`]: appearance flavour (histogram mean-shift).
//!
//! All flavours share one [`TrackerShared`] snapshot (the last scene plus
//! the `entering`/`leaving` zone lists), guarded by a single mutex the
//! owning stage hands out to its observers.

pub mod camshift;
pub mod kalman;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::Engine;
use crate::errors::Status;
use crate::scene::Scene;
use crate::zone::Zone;

pub use camshift::CamShiftTracker;
pub use kalman::KalmanTracker;

/// Snapshot state shared between a tracker stage and its engines.
#[derive(Debug, Default)]
pub struct TrackerShared {
    /// History copy of the last processed scene.
    pub latest: Scene,
    /// Zones that entered on the last pass.
    pub added: Vec<Zone>,
    /// Zones that left on the last pass.
    pub removed: Vec<Zone>,
}

/// Handle to the snapshot shared by one tracker stage.
pub type SharedState = Arc<Mutex<TrackerShared>>;

/// Pass-through tracker: no history, no prediction.
pub struct NoneTracker {
    shared: SharedState,
}

impl NoneTracker {
    #[must_use]
    pub fn new(shared: SharedState) -> Self {
        Self { shared }
    }
}

impl Engine for NoneTracker {
    fn process(&self, scene: &mut Scene, _extra: &mut ()) -> Status {
        let mut shared = self.shared.lock();
        shared.latest = scene.remember();
        shared.added.clear();
        shared.removed.clear();
        Status::Ok
    }
}

/// Snapshot-only tracker: keeps the last scene, predicts nothing.
pub struct HistoryTracker {
    shared: SharedState,
}

impl HistoryTracker {
    #[must_use]
    pub fn new(shared: SharedState) -> Self {
        Self { shared }
    }
}

impl Engine for HistoryTracker {
    fn setup(&self) -> crate::errors::Result<()> {
        *self.shared.lock() = TrackerShared::default();
        Ok(())
    }

    fn process(&self, scene: &mut Scene, _extra: &mut ()) -> Status {
        self.shared.lock().latest = scene.remember();
        Status::Ok
    }
}
