//! Pipeline Interconnection
//!
//! A [`Bridge`] plugs one pipeline's output into another's input. The
//! producer side calls [`Bridge::forward`] from a `finished` hook or an
//! observer; the consumer side registers the bridge as the input engine of
//! its first stage.
//!
//! Two slots indexed by a (read, write) pair absorb rate mismatch: a
//! forward always lands in the write slot, swapping slots when the reader
//! has caught up, so the consumer always picks up the latest forwarded
//! scene. `prepare` returns `NotReady` until data is available.

use parking_lot::Mutex;

use crate::core::{Engine, Payload};
use crate::errors::Status;
use crate::scene::Scene;
use crate::zone::Zone;

struct Slots<X> {
    rd: usize,
    wr: usize,
    scenes: [Scene; 2],
    extras: [X; 2],
}

/// Double-buffered scene hand-off between pipelines.
pub struct Bridge<X: Payload = ()> {
    slots: Mutex<Slots<X>>,
}

impl<X: Payload> Default for Bridge<X> {
    fn default() -> Self {
        Self::new()
    }
}

impl<X: Payload> Bridge<X> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Slots {
                rd: 0,
                wr: 0,
                scenes: [Scene::new(), Scene::new()],
                extras: [X::default(), X::default()],
            }),
        }
    }

    /// Forwards a scene into the write slot, swapping slots when the
    /// reader is caught up.
    pub fn forward(&self, scene: Scene) {
        let mut slots = self.slots.lock();
        if slots.rd == slots.wr {
            slots.wr = (slots.wr + 1) % 2;
        }
        let wr = slots.wr;
        slots.scenes[wr] = scene;
    }

    /// Forwards the extra payload alongside the pending scene.
    pub fn forward_extra(&self, extra: X) {
        let mut slots = self.slots.lock();
        let wr = slots.wr;
        slots.extras[wr] = extra;
    }

    /// Latest forwarded scene (the write slot).
    #[must_use]
    pub fn scene(&self) -> Scene {
        let slots = self.slots.lock();
        slots.scenes[slots.wr].clone()
    }

    /// Whether nothing is pending for the reader.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let slots = self.slots.lock();
        slots.rd == slots.wr
    }

    fn reset(&self) {
        let mut slots = self.slots.lock();
        slots.rd = 0;
        slots.wr = 0;
        slots.scenes = [Scene::new(), Scene::new()];
        slots.extras = [X::default(), X::default()];
    }
}

impl Bridge<Vec<Zone>> {
    /// Queues a single zone for the next consumer pass.
    pub fn forward_zone(&self, zone: Zone) {
        let mut slots = self.slots.lock();
        let wr = slots.wr;
        slots.extras[wr].push(zone);
    }
}

impl<X: Payload> Engine<X> for Bridge<X> {
    fn setup(&self) -> crate::errors::Result<()> {
        self.reset();
        Ok(())
    }

    fn terminate(&self) {
        self.reset();
    }

    fn prepare(&self, scene: &mut Scene, extra: &mut X) -> Status {
        let mut slots = self.slots.lock();
        if slots.rd == slots.wr {
            return Status::NotReady;
        }

        // Release the consumed slot and move the reader to the latest
        // write.
        let rd = slots.rd;
        slots.scenes[rd] = Scene::new();
        slots.extras[rd] = X::default();
        slots.rd = slots.wr;

        let rd = slots.rd;
        *scene = slots.scenes[rd].clone();
        *extra = std::mem::take(&mut slots.extras[rd]);
        Status::Ok
    }

    fn process(&self, _scene: &mut Scene, _extra: &mut X) -> Status {
        Status::Ok
    }
}
