//! Concrete Engines
//!
//! The engines the core ships with: scene ingress ([`Input`]), pipeline
//! interconnection ([`Bridge`]) and the tracker flavours
//! ([`tracker`]).

pub mod bridge;
pub mod input;
pub mod tracker;

pub use bridge::Bridge;
pub use input::{Frame, FrameSource, Input};
