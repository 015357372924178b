//! Pipeline Core
//!
//! The three building blocks of the processing graph:
//!
//! - [`Engine`]: a polymorphic unit preparing and processing scenes.
//! - [`Stage`]: a named slot holding a registry of engines, one active at a
//!   time, with bypass/disable switches and a broadcast channel.
//! - [`Pipeline`]: an ordered list of stages driven by a dedicated worker
//!   thread with run/freeze/stop semantics.
//!
//! All three are generic over a [`Payload`] carried alongside the scene, so
//! the same machinery drives whole-scene pipelines (`X = ()`) and
//! zone-grained ones (`X = Vec<Zone>`).

mod engine;
mod pipeline;
mod stage;

pub use engine::{Engine, Payload};
pub use pipeline::{Finished, Pipeline, PipelineObserver, PipelineState};
pub use stage::{Filter, Stage, StageObserver};
