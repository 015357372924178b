//! Motion-Flavoured Tracker
//!
//! The Kalman tracker preserves zone identity through a constant-velocity
//! motion model. Per pass:
//!
//! 1. a fresh context is prepared for every newly-detected zone, seeding a
//!    [`KalmanModel`] from its state;
//! 2. every historic context predicts its state forward by the frame delta,
//!    re-projects it into a 2D zone stacked atop, and pays the delta out of
//!    its validity budget; an expired or unprojectable context is
//!    invalidated;
//! 3. fresh and historic contexts are matched (IoU of their latest zones,
//!    both-exclusive greedy extraction) and the pairs merged, the matched
//!    filter corrected with the fresh observation;
//! 4. cleanup transplants identities onto the scene and fills the shared
//!    `entering`/`leaving` snapshot.

use std::sync::Arc;

use parking_lot::Mutex;

use super::SharedState;
use crate::core::Engine;
use crate::errors::{Fault, Status};
use crate::params::{ParamSet, Parameter};
use crate::scene::Scene;
use crate::task::matcher::Matcher;
use crate::task::{Fanout, Mode};
use crate::tracker::kalman::{KalmanModel, KalmanParams};
use crate::tracker::{Context, Store};

struct TrackState {
    store: Store<KalmanModel>,
    matcher: Matcher<Context<KalmanModel>>,
    last_ts: u64,
}

/// Identity-preserving tracker with constant-velocity prediction.
pub struct KalmanTracker {
    shared: SharedState,
    config: Mutex<KalmanParams>,
    state: Mutex<TrackState>,
    predictor: Fanout,
}

impl KalmanTracker {
    #[must_use]
    pub fn new(shared: SharedState) -> Self {
        Self {
            shared,
            config: Mutex::new(KalmanParams::default()),
            state: Mutex::new(TrackState {
                store: Store::default(),
                matcher: Matcher::new(),
                last_ts: 0,
            }),
            predictor: Fanout::new(Mode::Async(8)),
        }
    }

    /// Replaces the motion-model tuning (before the pipeline is locked).
    pub fn configure(&self, params: KalmanParams) {
        *self.config.lock() = params;
    }

    /// Recall factor applied to propagated historic predictions.
    pub fn set_recall(&self, recall: f32) {
        self.state.lock().store.recall = recall.clamp(0.0, 1.0);
    }

    /// Minimum IoU for matching a fresh zone onto a historic context.
    pub fn set_match_threshold(&self, threshold: f32) {
        self.state.lock().matcher.threshold = threshold;
    }

    /// Configuration surface of this engine.
    #[must_use]
    pub fn params(self: &Arc<Self>) -> ParamSet {
        let mut set = ParamSet::new("kalman");

        let engine = Arc::clone(self);
        let _ = set.expose(
            Parameter::new("predictability", 10.0f32)
                .describe(
                    "The timeout after which a tracked object is no longer \
                     estimated if not seen again",
                )
                .settable()
                .on_update(move |v| {
                    let t = v.as_float().ok_or(Fault::TypeMismatch)?;
                    if t <= 0.0 {
                        return Err(Fault::InvalidValue);
                    }
                    engine.config.lock().predictability = t;
                    Ok(())
                }),
        );

        let engine = Arc::clone(self);
        let _ = set.expose(
            Parameter::new("tscale", 1.0f32)
                .describe("The scaling factor for the frame time delta")
                .settable()
                .on_update(move |v| {
                    engine.config.lock().tscale = v.as_float().ok_or(Fault::TypeMismatch)?;
                    Ok(())
                }),
        );

        let engine = Arc::clone(self);
        let _ = set.expose(
            Parameter::new("recall", 1.0f32)
                .describe(
                    "The factor to apply to all prediction scores of all \
                     historic contexts",
                )
                .settable()
                .saturating(0.0, 1.0)
                .on_update(move |v| {
                    engine.set_recall(v.as_float().ok_or(Fault::TypeMismatch)?);
                    Ok(())
                }),
        );

        let engine = Arc::clone(self);
        let _ = set.expose(
            Parameter::new("threshold", 0.5f32)
                .describe(
                    "The minimum score for considering a (source, destination) \
                     pair to be possibly similar and consider a match",
                )
                .settable()
                .saturating(0.0, 1.0)
                .on_update(move |v| {
                    engine.set_match_threshold(v.as_float().ok_or(Fault::TypeMismatch)?);
                    Ok(())
                }),
        );

        set
    }
}

impl Engine for KalmanTracker {
    fn setup(&self) -> crate::errors::Result<()> {
        let mut state = self.state.lock();
        state.store.reset();
        state.last_ts = 0;
        *self.shared.lock() = super::TrackerShared::default();
        Ok(())
    }

    fn process(&self, scene: &mut Scene, _extra: &mut ()) -> Status {
        let params = *self.config.lock();
        let mut state = self.state.lock();

        let dt = if state.last_ts == 0 {
            0.0
        } else {
            (scene.timestamp().saturating_sub(state.last_ts)) as f32 / 1000.0 * params.tscale
        };

        // 1. Fresh contexts for the newly-detected zones.
        state
            .store
            .prepare(scene, |zone| {
                (KalmanModel::new(params, &zone.state), params.predictability)
            });

        // 2. Advance the historic contexts.
        if dt > 0.0 {
            let view = &scene.view;
            let mut historic = state
                .store
                .contexts_mut()
                .iter_mut()
                .filter(|c| c.historic() && c.valid());
            self.predictor.run(
                move || historic.next(),
                |context| {
                    let predicted = context.payload.predict(dt);
                    let mut zone = context.top().geometry_copy();
                    zone.state = predicted;
                    zone.project(view);
                    if zone.rect.is_empty() {
                        // Projection failure: the object left the frame.
                        context.invalidate();
                        return Status::Ok;
                    }
                    context.stack_zone(&zone);
                    context.validity -= dt;
                    if context.validity <= 0.0 {
                        context.invalidate();
                    }
                    Status::Ok
                },
            );
        }

        // 3. Match fresh against historic contexts.
        let fresh = state.store.fresh_indices();
        let historic: Vec<usize> = state
            .store
            .historic_indices()
            .into_iter()
            .filter(|&i| state.store.contexts()[i].valid())
            .collect();

        let pairs: Vec<(usize, usize)> = if fresh.is_empty() || historic.is_empty() {
            Vec::new()
        } else {
            let contexts = state.store.contexts();
            let src: Vec<&Context<KalmanModel>> = fresh.iter().map(|&i| &contexts[i]).collect();
            let dst: Vec<&Context<KalmanModel>> =
                historic.iter().map(|&i| &contexts[i]).collect();
            let status = state.matcher.estimate(&src, &dst);
            if status.is_fault() {
                return status;
            }
            state
                .matcher
                .extract()
                .iter()
                .map(|m| (fresh[m.src], historic[m.dst]))
                .collect()
        };

        // 4. Merge the pairs and correct the matched filters with the
        //    fresh observation.
        state.store.merge_pairs(&pairs);
        for &(_, historic) in &pairs {
            let context = &mut state.store.contexts_mut()[historic];
            let observed = context.top().state;
            context.payload.correct(&observed);
            context.validity = params.predictability;

            // The matched scene zone carries the filtered state from now
            // on, velocity estimate included.
            let filtered = context.payload.state();
            if let Some(index) = context.origin() {
                if let Some(zone) = scene.zones_mut().get_mut(index) {
                    zone.state = filtered;
                }
                context.top_mut().state = filtered;
            }
        }

        // 5. Cleanup and snapshot.
        let mut shared = self.shared.lock();
        let super::TrackerShared {
            latest,
            added,
            removed,
        } = &mut *shared;
        state.store.cleanup(scene, added, removed);
        *latest = scene.remember();
        state.last_ts = scene.timestamp();

        Status::Ok
    }
}
