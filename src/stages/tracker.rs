//! Tracker Stage
//!
//! The stage maintaining temporal identity. Four engines are registered
//! (`"none"`, `"history"`, `"camshift"` and `"kalman"`, the default) and
//! the stage is runtime-updatable, so the flavour can be swapped while the
//! pipeline runs.
//!
//! After every pass the stage publishes a consistent snapshot (last scene,
//! entering and leaving zones) through [`Tracker::snapshot`] and signals
//! its event channel. Both work off the same mutex the engines fill, so
//! observers always see the state of one complete pass.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::{Engine, Stage};
use crate::engines::tracker::{
    CamShiftTracker, HistoryTracker, KalmanTracker, NoneTracker, SharedState, TrackerShared,
};
use crate::errors::{Result, Status};
use crate::notifier::Notifier;
use crate::scene::Scene;
use crate::zone::Zone;

/// Observer signature of the tracker event channel: scene, entering zones,
/// leaving zones, pass status.
pub type TrackerObserver = dyn Fn(&Scene, &[Zone], &[Zone], Status) + Send + Sync;

/// Identity-tracking stage with swappable flavours.
pub struct Tracker {
    stage: Arc<Stage>,
    shared: SharedState,
    /// Tracker event channel, signalled after every pass.
    pub event: Arc<Notifier<TrackerObserver>>,
    /// The motion-flavour engine, for direct configuration.
    pub kalman: Arc<KalmanTracker>,
    /// The appearance-flavour engine, for direct configuration.
    pub camshift: Arc<CamShiftTracker>,
}

impl Tracker {
    pub fn new() -> Result<Self> {
        let shared: SharedState = Arc::new(Mutex::new(TrackerShared::default()));
        let stage = Arc::new(Stage::new("tracker", true));

        let kalman = Arc::new(KalmanTracker::new(Arc::clone(&shared)));
        let camshift = Arc::new(CamShiftTracker::new(Arc::clone(&shared)));
        stage.register(
            "none",
            Arc::new(NoneTracker::new(Arc::clone(&shared))) as Arc<dyn Engine>,
        )?;
        stage.register(
            "history",
            Arc::new(HistoryTracker::new(Arc::clone(&shared))) as Arc<dyn Engine>,
        )?;
        stage.register("camshift", Arc::clone(&camshift) as Arc<dyn Engine>)?;
        stage.register("kalman", Arc::clone(&kalman) as Arc<dyn Engine>)?;

        let event: Arc<Notifier<TrackerObserver>> = Arc::new(Notifier::new());

        // Relay every pass result as a tracker event carrying the snapshot.
        let relay = Arc::clone(&event);
        let snapshot = Arc::clone(&shared);
        stage.broadcast.connect(Box::new(move |_scene, status| {
            let shared = snapshot.lock();
            relay.notify(|observer| {
                observer(&shared.latest, &shared.added, &shared.removed, status);
            });
        }));

        Ok(Self {
            stage,
            shared,
            event,
            kalman,
            camshift,
        })
    }

    /// The underlying stage, to append to a pipeline.
    #[must_use]
    pub fn stage(&self) -> &Arc<Stage> {
        &self.stage
    }

    /// Selects the tracker flavour by name.
    pub fn select(&self, flavour: &str) -> Result<()> {
        self.stage.select(flavour)
    }

    /// Consistent copy of the last pass: scene, entering and leaving
    /// zones.
    #[must_use]
    pub fn snapshot(&self) -> (Scene, Vec<Zone>, Vec<Zone>) {
        let shared = self.shared.lock();
        (
            shared.latest.remember(),
            shared.added.clone(),
            shared.removed.clone(),
        )
    }

    /// Copy of the last entering/leaving zone lists only.
    #[must_use]
    pub fn changes(&self) -> (Vec<Zone>, Vec<Zone>) {
        let shared = self.shared.lock();
        (shared.added.clone(), shared.removed.clone())
    }
}
