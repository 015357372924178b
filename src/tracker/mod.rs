//! Temporal Tracking
//!
//! The tracker maintains one [`Context`] per tracked object across pipeline
//! passes. A context couples the object's UUID with a short stack of recent
//! zones (`stack[0]` is the canonical zone, the last entry the most recent
//! prediction), a validity budget, and a tracker-specific payload: Kalman
//! filters for the motion flavour, a histogram signature for the appearance
//! flavour.
//!
//! Per pass the owning engine:
//!
//! 1. prepares a fresh context for every newly-detected zone (keeping the
//!    index of its *origin* zone in the scene),
//! 2. advances the historic contexts by stacking a predicted zone,
//! 3. matches fresh against historic contexts and merges the pairs,
//! 4. cleans up: invalid contexts are retired into `removed`, unmatched
//!    fresh ones are reported in `added`, and surviving histories re-enter
//!    the scene.
//!
//! The [`Store`] implements the flavour-independent part of that cycle.

pub mod histogram;
pub mod kalman;

use smallvec::SmallVec;

use crate::scene::Scene;
use crate::task::matcher::Similar;
use crate::zone::Zone;

/// Default bound of the per-context zone stack.
pub const STACK_DEPTH: usize = 4;

/// Per-object tracking state.
#[derive(Debug, Clone)]
pub struct Context<P> {
    /// UUID of the tracked object; 0 marks a merged/retired context.
    pub uuid: u64,
    /// Index of the originating zone in the current scene; `None` for a
    /// purely historic context. Only meaningful within a single pass.
    origin: Option<usize>,
    stack: SmallVec<[Zone; STACK_DEPTH]>,
    /// Remaining tracking budget; the flavour decides its unit (seconds
    /// for motion, a correlation product for appearance).
    pub validity: f32,
    /// Flavour-specific state.
    pub payload: P,
}

impl<P> Context<P> {
    /// Builds the context of a newly-detected zone.
    #[must_use]
    pub fn new(origin: usize, zone: &Zone, payload: P, validity: f32) -> Self {
        let mut stack = SmallVec::new();
        let mut copy = zone.geometry_copy();
        copy.tag = 1;
        stack.push(copy);
        Self {
            uuid: zone.uuid,
            origin: Some(origin),
            stack,
            validity,
            payload,
        }
    }

    /// Scene index of the originating zone, when this context was prepared
    /// in the current pass.
    #[must_use]
    pub const fn origin(&self) -> Option<usize> {
        self.origin
    }

    /// A historic context carries no origin.
    #[must_use]
    pub const fn historic(&self) -> bool {
        self.origin.is_none()
    }

    /// Severs the link to the originating zone (end of pass).
    pub fn clear_origin(&mut self) {
        self.origin = None;
    }

    #[must_use]
    pub fn valid(&self) -> bool {
        self.validity > 0.0 && self.stack.first().is_some_and(Zone::valid)
    }

    /// More than one stacked zone means the context advanced this pass.
    #[must_use]
    pub fn updated(&self) -> bool {
        self.stack.len() > 1
    }

    /// Number of predictions stacked since the canonical zone.
    #[must_use]
    pub fn computed(&self) -> usize {
        self.stack.len().saturating_sub(1)
    }

    /// The canonical current zone.
    #[must_use]
    pub fn zone(&self) -> &Zone {
        &self.stack[0]
    }

    pub fn zone_mut(&mut self) -> &mut Zone {
        &mut self.stack[0]
    }

    /// The most recent stacked zone.
    #[must_use]
    pub fn top(&self) -> &Zone {
        self.stack.last().expect("context stack is never empty")
    }

    pub fn top_mut(&mut self) -> &mut Zone {
        self.stack.last_mut().expect("context stack is never empty")
    }

    /// Stacks a geometry copy of `zone` atop and returns it.
    pub fn stack_zone(&mut self, zone: &Zone) -> &mut Zone {
        let mut copy = zone.geometry_copy();
        copy.tag = 1;
        self.stack.push(copy);
        self.stack.last_mut().expect("just pushed")
    }

    /// Replaces the canonical zone.
    pub fn rebase(&mut self, zone: Zone) {
        self.stack.clear();
        self.stack.push(zone);
    }

    /// Invalidates the context: the canonical zone is marked invalid and
    /// the origin link severed.
    pub fn invalidate(&mut self) {
        if let Some(front) = self.stack.first_mut() {
            front.invalidate();
        }
        self.validity = 0.0;
        self.origin = None;
    }

    /// Collapses the stack top-down: each newer zone takes over the one
    /// below through [`Zone::update`], until a single zone remains.
    pub fn flatten(&mut self) {
        while self.stack.len() > 1 {
            let mut latest = self.stack.pop().expect("stack length checked");
            let below = self.stack.last_mut().expect("stack length checked");
            latest.update(below);
            *below = latest;
        }
    }

    /// Merges a newer (fresh) context into this historic one: the newer
    /// context's flattened zone is stacked atop, the origin adopted when
    /// missing, and the newer context retired (invalid, UUID cleared).
    pub fn merge(&mut self, newer: &mut Self) {
        newer.flatten();
        self.stack_zone(newer.zone());
        if self.origin.is_none() {
            self.origin = newer.origin;
        }
        newer.invalidate();
        newer.uuid = 0;
    }
}

impl<P> Similar for Context<P> {
    fn bounds(&self) -> crate::geometry::Rect {
        self.top().rect
    }
}

/// The flavour-independent context pool of one tracker engine.
#[derive(Debug)]
pub struct Store<P> {
    contexts: Vec<Context<P>>,
    /// Factor applied to historic prediction scores when they propagate
    /// into a matched original zone.
    pub recall: f32,
}

impl<P> Default for Store<P> {
    fn default() -> Self {
        Self {
            contexts: Vec::new(),
            recall: 1.0,
        }
    }
}

impl<P> Store<P> {
    #[must_use]
    pub fn new(recall: f32) -> Self {
        Self {
            contexts: Vec::new(),
            recall,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    #[must_use]
    pub fn contexts(&self) -> &[Context<P>] {
        &self.contexts
    }

    pub fn contexts_mut(&mut self) -> &mut [Context<P>] {
        &mut self.contexts
    }

    pub fn reset(&mut self) {
        self.contexts.clear();
    }

    /// Appends a context for every valid zone of the scene.
    ///
    /// `seed` builds the flavour payload and initial validity budget for
    /// one zone.
    pub fn prepare(&mut self, scene: &Scene, mut seed: impl FnMut(&Zone) -> (P, f32)) {
        for (index, zone) in scene.zones().iter().enumerate() {
            if zone.invalid() {
                continue;
            }
            let (payload, validity) = seed(zone);
            self.contexts
                .push(Context::new(index, zone, payload, validity));
        }
    }

    /// Indices of the contexts prepared from the current scene.
    #[must_use]
    pub fn fresh_indices(&self) -> Vec<usize> {
        (0..self.contexts.len())
            .filter(|&i| self.contexts[i].origin.is_some())
            .collect()
    }

    /// Indices of the purely historic contexts.
    #[must_use]
    pub fn historic_indices(&self) -> Vec<usize> {
        (0..self.contexts.len())
            .filter(|&i| self.contexts[i].origin.is_none())
            .collect()
    }

    /// Distinct mutable borrows of two contexts.
    pub fn pair_mut(&mut self, a: usize, b: usize) -> (&mut Context<P>, &mut Context<P>) {
        debug_assert!(a != b);
        if a < b {
            let (left, right) = self.contexts.split_at_mut(b);
            (&mut left[a], &mut right[0])
        } else {
            let (left, right) = self.contexts.split_at_mut(a);
            (&mut right[0], &mut left[b])
        }
    }

    /// Merges matched (fresh, historic) context pairs, fresh into historic.
    pub fn merge_pairs(&mut self, pairs: &[(usize, usize)]) {
        for &(fresh, historic) in pairs {
            let (fresh, historic) = self.pair_mut(fresh, historic);
            historic.merge(fresh);
        }
    }

    /// End-of-pass cleanup.
    ///
    /// - Invalid contexts are erased; the ones still owning a UUID
    ///   contribute their canonical zone to `removed`.
    /// - A surviving context bound to an origin zone either transplants its
    ///   flattened history onto that zone (recall-scaled predictions) or,
    ///   when it never advanced, reports the origin in `added`. Its stack
    ///   is rebased on the origin zone and the link severed.
    /// - A surviving purely-historic context flattens and re-enters the
    ///   scene as a marked zone.
    ///
    /// Invalid zones are swept from the scene afterwards.
    pub fn cleanup(&mut self, scene: &mut Scene, added: &mut Vec<Zone>, removed: &mut Vec<Zone>) {
        added.clear();
        removed.clear();

        let recall = self.recall;
        let mut kept = Vec::with_capacity(self.contexts.len());

        for mut context in self.contexts.drain(..) {
            if !context.valid() {
                if context.uuid != 0 {
                    let mut zone = context.zone().clone();
                    zone.uuid = context.uuid;
                    removed.push(zone);
                }
                continue;
            }

            if let Some(index) = context.origin {
                if context.updated() {
                    context.flatten();
                    let mut history = context.zone().clone();
                    if let Some(original) = scene.zones_mut().get_mut(index) {
                        original.update_with_recall(&mut history, recall);
                    }
                } else if let Some(original) = scene.zones().get(index) {
                    added.push(original.clone());
                }
                if let Some(original) = scene.zones().get(index) {
                    context.rebase(original.clone());
                }
                context.origin = None;
            } else {
                context.flatten();
                scene.mark(context.zone().clone());
            }
            kept.push(context);
        }

        self.contexts = kept;
        scene.extract(Zone::invalid);
    }
}
