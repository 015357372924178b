//! Assembled Stages
//!
//! Ready-made stages wiring the shipped engines together: [`Input`] for
//! scene ingress (live source or bridged pipeline) and [`Tracker`] for
//! temporal identity.

mod input;
mod tracker;

pub use input::Input;
pub use tracker::{Tracker, TrackerObserver};
