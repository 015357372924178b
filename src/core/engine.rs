//! Engine Contract

use crate::errors::{Result, Status};
use crate::scene::Scene;
use crate::zone::Zone;

/// Extra data carried through a pipeline pass alongside the scene.
///
/// Whole-scene pipelines carry nothing (`()`); zone pipelines carry the
/// zone list an upstream pipeline forwarded to them.
pub trait Payload: Default + Send + Sync + 'static {}

impl Payload for () {}
impl Payload for Vec<Zone> {}

/// A unit preparing and processing scenes within a stage.
///
/// Engines are shared between the configuration surface and the pipeline
/// worker thread; implementations guard their internal state themselves
/// (the trackers and the bridge keep a mutex, stateless filters need
/// nothing).
pub trait Engine<X: Payload = ()>: Send + Sync {
    /// One-time initialisation; a fault prevents the pipeline from
    /// entering `Running`.
    fn setup(&self) -> Result<()> {
        Ok(())
    }

    /// Releases whatever `setup` acquired.
    fn terminate(&self) {}

    /// Readies the pass; input engines produce the scene here.
    /// `NotReady` suspends the pass until `running` is toggled again.
    fn prepare(&self, scene: &mut Scene, extra: &mut X) -> Status {
        let _ = (scene, extra);
        Status::Ok
    }

    /// Processes the scene; must only be called after a successful
    /// `prepare`.
    fn process(&self, scene: &mut Scene, extra: &mut X) -> Status;
}
