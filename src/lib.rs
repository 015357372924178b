#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

pub mod core;
pub mod dataset;
pub mod engines;
pub mod errors;
pub mod geometry;
pub mod image;
pub mod notifier;
pub mod params;
pub mod scene;
pub mod stages;
pub mod task;
pub mod tracker;
pub mod view;
pub mod zone;

pub use crate::core::{Engine, Payload, Pipeline, PipelineState, Stage};
pub use errors::{Fault, Status};
pub use geometry::Rect;
pub use image::{Channel, Image, Mode, Pixels};
pub use notifier::{Notifier, ObserverId};
pub use scene::Scene;
pub use view::{Projector, View};
pub use zone::{Prediction, State, Zone};
