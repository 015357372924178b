//! Appearance-Flavoured Tracker
//!
//! The CamShift tracker preserves zone identity through colour
//! distributions. Per pass:
//!
//! 1. a fresh context is prepared for every newly-detected zone and its
//!    histogram signature computed;
//! 2. every historic context searches the new view: the stored signature
//!    is back-projected, mean-shift walks the window from the previous
//!    location, and the histogram correlations of both candidate locations
//!    against the stored signature decide which one to keep; only a
//!    shifted window scoring above the acceptance threshold is adopted.
//!    The winning score scales the context validity, so a fading match
//!    eventually expires the context;
//! 3. fresh and historic contexts are matched and merged as in the motion
//!    flavour, a match refreshing the stored signature and validity;
//! 4. cleanup fills the shared `entering`/`leaving` snapshot.

use std::sync::Arc;

use parking_lot::Mutex;

use super::SharedState;
use crate::core::Engine;
use crate::errors::{Fault, Status};
use crate::params::{ParamSet, Parameter};
use crate::scene::Scene;
use crate::task::matcher::Matcher;
use crate::task::{Fanout, Mode};
use crate::tracker::histogram::{
    Appearance, HistogramParams, Termination, back_project, correlation, mean_shift, signature_of,
};
use crate::tracker::{Context, Store};
use crate::view::View;

/// A context whose validity decayed below this is no longer trackable.
const VALIDITY_FLOOR: f32 = 0.05;

struct TrackState {
    store: Store<Appearance>,
    matcher: Matcher<Context<Appearance>>,
}

/// Identity-preserving tracker driven by histogram back-projection and
/// mean-shift.
pub struct CamShiftTracker {
    shared: SharedState,
    histogram: Mutex<HistogramParams>,
    term: Mutex<Termination>,
    /// Minimal correlation for accepting a shifted window.
    accept: Mutex<f32>,
    state: Mutex<TrackState>,
    estimator: Fanout,
}

impl CamShiftTracker {
    #[must_use]
    pub fn new(shared: SharedState) -> Self {
        Self {
            shared,
            histogram: Mutex::new(HistogramParams::default()),
            term: Mutex::new(Termination::default()),
            accept: Mutex::new(0.4),
            state: Mutex::new(TrackState {
                store: Store::default(),
                matcher: Matcher::new(),
            }),
            estimator: Fanout::new(Mode::Async(8)),
        }
    }

    /// Replaces the histogram configuration (before the pipeline is
    /// locked).
    pub fn configure(&self, params: HistogramParams) {
        *self.histogram.lock() = params;
    }

    pub fn set_recall(&self, recall: f32) {
        self.state.lock().store.recall = recall.clamp(0.0, 1.0);
    }

    pub fn set_match_threshold(&self, threshold: f32) {
        self.state.lock().matcher.threshold = threshold;
    }

    /// Configuration surface of this engine.
    #[must_use]
    pub fn params(self: &Arc<Self>) -> ParamSet {
        let mut set = ParamSet::new("camshift");

        let engine = Arc::clone(self);
        let _ = set.expose(
            Parameter::new("epsilon", 1.0f32)
                .describe(
                    "The desired accuracy in terms of mean-shift displacement \
                     under which the search algorithm stops",
                )
                .settable()
                .saturating(1e-3, 10.0)
                .on_update(move |v| {
                    engine.term.lock().epsilon = v.as_float().ok_or(Fault::TypeMismatch)?;
                    Ok(())
                }),
        );

        let engine = Arc::clone(self);
        let _ = set.expose(
            Parameter::new("iterations", 10i64)
                .describe(
                    "The maximal number of iterations after which the search \
                     algorithm stops",
                )
                .settable()
                .range(1.0, 1000.0)
                .on_update(move |v| {
                    engine.term.lock().iterations =
                        v.as_int().ok_or(Fault::TypeMismatch)? as usize;
                    Ok(())
                }),
        );

        let engine = Arc::clone(self);
        let _ = set.expose(
            Parameter::new("threshold", 0.4f32)
                .describe("The minimal threshold for accepting an histogram match")
                .settable()
                .saturating(0.001, 1.0)
                .on_update(move |v| {
                    *engine.accept.lock() = v.as_float().ok_or(Fault::TypeMismatch)?;
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

        set
    }

    /// One mean-shift search for a historic context.
    fn search(
        context: &mut Context<Appearance>,
        view: &View,
        params: &HistogramParams,
        term: Termination,
        accept: f32,
    ) -> Status {
        if !context.valid() || context.payload.signature.is_empty() {
            return Status::Ok;
        }
        let Some(image) = view.cached(params.mode) else {
            return Status::Fault(Fault::NotExisting);
        };

        let Ok(weights) = back_project(params, image, &context.payload.signature) else {
            context.invalidate();
            return Status::Ok;
        };

        let window = context.top().rect;
        let keep_score = view
            .image_roi(params.mode, window)
            .and_then(|roi| signature_of(params, &roi))
            .map_or(-1.0, |sig| correlation(&sig, &context.payload.signature));

        let shifted = mean_shift(&weights, image.frame(), window, term);
        let shift_score = view
            .image_roi(params.mode, shifted)
            .and_then(|roi| signature_of(params, &roi))
            .map_or(-1.0, |sig| correlation(&sig, &context.payload.signature));

        let score = if shift_score > keep_score && shift_score > accept && !shifted.is_empty() {
            let mut zone = context.top().geometry_copy();
            zone.rect = shifted;
            zone.deproject(view);
            context.stack_zone(&zone);
            shift_score
        } else {
            // The window stays put; a flawed search keeps the old position.
            keep_score
        };

        context.validity *= score.max(0.0);
        if context.validity < VALIDITY_FLOOR {
            context.invalidate();
        }
        Status::Ok
    }
}

impl Engine for CamShiftTracker {
    fn setup(&self) -> crate::errors::Result<()> {
        // Surface configuration mistakes before the pipeline runs.
        self.histogram.lock().resolve()?;
        self.state.lock().store.reset();
        *self.shared.lock() = super::TrackerShared::default();
        Ok(())
    }

    fn process(&self, scene: &mut Scene, _extra: &mut ()) -> Status {
        let params = self.histogram.lock().clone();
        let term = *self.term.lock();
        let accept = *self.accept.lock();

        // Materialise the histogram mode once; every search reads it.
        if let Err(fault) = scene.view.cache(params.mode) {
            log::error!("camshift: cannot build the {} view: {fault}", params.mode.name());
            return Status::Fault(fault);
        }

        let mut state = self.state.lock();

        // 1. Fresh contexts, with their signatures.
        state.store.prepare(scene, |_| (Appearance::default(), 1.0));
        {
            let view = &scene.view;
            let mut fresh = state
                .store
                .contexts_mut()
                .iter_mut()
                .filter(|c| !c.historic());
            let status = self.estimator.run(
                move || fresh.next(),
                |context| {
                    match view
                        .image_roi(params.mode, context.top().rect)
                        .and_then(|roi| signature_of(&params, &roi))
                    {
                        Ok(signature) => {
                            context.payload.signature = signature;
                            Status::Ok
                        }
                        Err(fault) => Status::Fault(fault),
                    }
                },
            );
            if status.is_fault() {
                return status;
            }
        }

        // 2. Re-locate the historic contexts in the new view.
        {
            let view = &scene.view;
            let mut historic = state
                .store
                .contexts_mut()
                .iter_mut()
                .filter(|c| c.historic());
            let status = self.estimator.run(
                move || historic.next(),
                |context| Self::search(context, view, &params, term, accept),
            );
            if status.is_fault() {
                return status;
            }
        }

        // 3. Match and merge, refreshing the signature of matched
        //    contexts from the fresh observation.
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
            let src: Vec<&Context<Appearance>> = fresh.iter().map(|&i| &contexts[i]).collect();
            let dst: Vec<&Context<Appearance>> =
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

        for &(fresh_idx, historic_idx) in &pairs {
            let signature = state.store.contexts()[fresh_idx].payload.signature.clone();
            let (fresh, historic) = state.store.pair_mut(fresh_idx, historic_idx);
            historic.merge(fresh);
            historic.payload.signature = signature;
            historic.validity = 1.0;
        }

        // 4. Cleanup and snapshot.
        let mut shared = self.shared.lock();
        let super::TrackerShared {
            latest,
            added,
            removed,
        } = &mut *shared;
        state.store.cleanup(scene, added, removed);
        *latest = scene.remember();

        Status::Ok
    }
}
