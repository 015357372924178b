//! Scene Ingress
//!
//! An [`Input`] engine turns captured frames into scenes: every `prepare`
//! pulls one [`Frame`] from its [`FrameSource`] and registers the buffers
//! with the fresh scene's view. A source with nothing to deliver suspends
//! the pipeline with `NotReady` until `running` is toggled again.
//!
//! Capture devices, video files and synthetic generators all plug in behind
//! the same pull trait.

use std::sync::Arc;

use crate::core::{Engine, Payload};
use crate::errors::Status;
use crate::image::Image;
use crate::scene::Scene;
use crate::view::Projector;

/// One captured frame: the colour buffer, an optional depth map with its
/// projector, and an optional capture timestamp for replayed material.
pub struct Frame {
    pub colour: Image,
    pub depth: Option<(Image, Arc<dyn Projector>)>,
    pub timestamp_ms: Option<u64>,
}

/// Pull-based frame provider.
pub trait FrameSource: Send + Sync {
    /// The next frame, or `None` when no frame is available yet.
    fn grab(&self) -> Option<Frame>;
}

/// Engine producing one scene per pass from a frame source.
pub struct Input {
    source: Box<dyn FrameSource>,
}

impl Input {
    #[must_use]
    pub fn new(source: Box<dyn FrameSource>) -> Self {
        Self { source }
    }
}

impl<X: Payload> Engine<X> for Input {
    fn prepare(&self, scene: &mut Scene, _extra: &mut X) -> Status {
        let Some(frame) = self.source.grab() else {
            return Status::NotReady;
        };

        let mut fresh = Scene::new();
        if let Some(ts) = frame.timestamp_ms {
            fresh.view.stamp(ts);
        }
        if let Err(fault) = fresh.view.use_colour(frame.colour) {
            return Status::Fault(fault);
        }
        if let Some((depth, projector)) = frame.depth {
            if let Err(fault) = fresh.view.use_depth(depth, projector) {
                return Status::Fault(fault);
            }
        }

        *scene = fresh;
        Status::Ok
    }

    fn process(&self, _scene: &mut Scene, _extra: &mut X) -> Status {
        Status::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{Mode, Pixels};
    use parking_lot::Mutex;

    struct Replay {
        frames: Mutex<Vec<Frame>>,
    }

    impl FrameSource for Replay {
        fn grab(&self) -> Option<Frame> {
            self.frames.lock().pop()
        }
    }

    fn frame(ts: u64) -> Frame {
        Frame {
            colour: Image::new(Pixels::U8(vec![0; 12]), Mode::Bgr, 2, 2).unwrap(),
            depth: None,
            timestamp_ms: Some(ts),
        }
    }

    #[test]
    fn ingress_builds_scenes_until_the_source_runs_dry() {
        let input = Input::new(Box::new(Replay {
            frames: Mutex::new(vec![frame(123)]),
        }));

        let mut scene = Scene::new();
        assert_eq!(Engine::<()>::prepare(&input, &mut scene, &mut ()), Status::Ok);
        assert_eq!(scene.timestamp(), 123);
        assert!(!scene.broken());

        assert_eq!(
            Engine::<()>::prepare(&input, &mut scene, &mut ()),
            Status::NotReady
        );
    }
}
