//! Input Stage
//!
//! The first stage of a pipeline: either pulls frames from a
//! [`FrameSource`] (`"source"` engine) or consumes scenes forwarded by
//! another pipeline (`"bridge"` engine). The bridge handle is exposed so a
//! producer pipeline can be plugged in from its `finished` hook.

use std::sync::Arc;

use crate::core::{Engine, Stage};
use crate::engines::bridge::Bridge;
use crate::engines::input::{FrameSource, Input as InputEngine};
use crate::errors::Result;

/// Scene-ingress stage with selectable `"source"`/`"bridge"` engines.
pub struct Input {
    stage: Arc<Stage>,
    bridge: Arc<Bridge>,
}

impl Input {
    /// Builds the stage; with a frame source the `"source"` engine is
    /// selected, otherwise the stage starts on the bridge.
    pub fn new(source: Option<Box<dyn FrameSource>>) -> Result<Self> {
        let stage = Arc::new(Stage::new("input", true));
        let bridge = Arc::new(Bridge::new());
        stage.register("bridge", Arc::clone(&bridge) as Arc<dyn Engine>)?;
        if let Some(source) = source {
            stage.register(
                "source",
                Arc::new(InputEngine::new(source)) as Arc<dyn Engine>,
            )?;
        }
        Ok(Self { stage, bridge })
    }

    /// The underlying stage, to append to a pipeline.
    #[must_use]
    pub fn stage(&self) -> &Arc<Stage> {
        &self.stage
    }

    /// The bridge another pipeline forwards scenes into.
    #[must_use]
    pub fn bridge(&self) -> &Arc<Bridge> {
        &self.bridge
    }
}
