//! Scenes
//!
//! A [`Scene`] is the token flowing through the pipeline: the [`View`]
//! captured at one instant plus the ordered set of [`Zone`]s detected (or
//! tracked) in it. Scenes are created empty by an input engine, mutated by
//! each stage of a pass, then either broadcast (and possibly remembered as
//! tracker history) or discarded.
//!
//! Marking a zone into a scene assigns its UUID: ids are drawn from a
//! process-wide monotonic counter, so a zone keeps its identity for the
//! lifetime of the process no matter which pipeline touched it.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::view::View;
use crate::zone::Zone;

static NEXT_ZONE_UUID: AtomicU64 = AtomicU64::new(1);

/// The data unit of one pipeline pass.
#[derive(Debug, Clone, Default)]
pub struct Scene {
    /// The visual environment captured for this scene.
    pub view: View,
    zones: Vec<Zone>,
}

impl Scene {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Milliseconds since the epoch of the capture instant.
    #[must_use]
    pub const fn timestamp(&self) -> u64 {
        self.view.timestamp()
    }

    /// A scene without visual data cannot be processed.
    #[must_use]
    pub fn broken(&self) -> bool {
        self.view.empty()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.zones.len()
    }

    /// Marks a zone into the scene, cropping it to the view frame and
    /// assigning a UUID (and deprojecting its state) on first assignment.
    /// Degenerate zones are discarded.
    pub fn mark(&mut self, mut zone: Zone) -> Option<&mut Zone> {
        if !self.view.empty() {
            zone.rect = zone.rect.intersection(&self.view.frame());
        }
        if zone.rect.is_empty() {
            return None;
        }

        if zone.uuid == 0 {
            zone.uuid = NEXT_ZONE_UUID.fetch_add(1, Ordering::Relaxed);
            zone.deproject(&self.view);
        }

        self.zones.push(zone);
        self.zones.last_mut()
    }

    #[must_use]
    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn zones_mut(&mut self) -> &mut [Zone] {
        &mut self.zones
    }

    /// References to the zones passing a filter.
    pub fn zones_where<F>(&self, filter: F) -> Vec<&Zone>
    where
        F: Fn(&Zone) -> bool,
    {
        self.zones.iter().filter(|z| filter(z)).collect()
    }

    /// Removes and returns the zones passing a filter, preserving order.
    pub fn extract<F>(&mut self, filter: F) -> Vec<Zone>
    where
        F: Fn(&Zone) -> bool,
    {
        let mut taken = Vec::new();
        let mut kept = Vec::with_capacity(self.zones.len());
        for zone in self.zones.drain(..) {
            if filter(&zone) {
                taken.push(zone);
            } else {
                kept.push(zone);
            }
        }
        self.zones = kept;
        taken
    }

    /// Appends the other scene's valid zones to this scene, draining it.
    pub fn update(&mut self, other: &mut Scene) {
        self.zones
            .extend(other.zones.drain(..).filter(Zone::valid));
    }

    /// Shallow history copy: the view originals plus the current zones.
    #[must_use]
    pub fn remember(&self) -> Scene {
        Scene {
            view: self.view.clone(),
            zones: self.zones.clone(),
        }
    }
}
