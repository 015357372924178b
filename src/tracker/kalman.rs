//! Constant-Velocity Kalman Model
//!
//! The motion flavour estimates each tracked object's 8-float state (3D
//! centre, 2D size, 3D velocity) with a constant-velocity Kalman filter.
//! The state decomposes into three independent position+velocity axis
//! filters plus two scalar size filters, which keeps the arithmetic to 2×2
//! covariance blocks.
//!
//! `predict(dt)` advances the state by the frame delta (scaled by
//! `tscale`); `correct(measure)` folds a new observation back in. A model
//! stays predictable for `predictability` seconds without observation;
//! the owning engine decrements the context validity by every predicted
//! delta and resets it on correction.

use glam::{Vec2, Vec3};

use crate::zone::State;

/// Tuning of the motion model.
#[derive(Debug, Clone, Copy)]
pub struct KalmanParams {
    /// Seconds an object stays predictable without being seen again.
    pub predictability: f32,
    /// Scale applied to the frame delta before it enters the transition.
    pub tscale: f32,
    /// Process noise on the position/size components.
    pub process_noise: f32,
    /// Process noise on the velocity components.
    pub velocity_noise: f32,
    /// Measurement noise.
    pub measurement_noise: f32,
}

impl Default for KalmanParams {
    fn default() -> Self {
        Self {
            predictability: 10.0,
            tscale: 1.0,
            process_noise: 1e-2,
            velocity_noise: 1.0,
            measurement_noise: 0.1,
        }
    }
}

/// Position + velocity filter over one axis.
#[derive(Debug, Clone, Copy)]
struct AxisFilter {
    x: f32,
    v: f32,
    // Symmetric 2×2 covariance.
    p00: f32,
    p01: f32,
    p11: f32,
}

impl AxisFilter {
    fn new(x: f32) -> Self {
        Self {
            x,
            v: 0.0,
            p00: 1.0,
            p01: 0.0,
            p11: 1.0,
        }
    }

    fn predict(&mut self, dt: f32, q_pos: f32, q_vel: f32) {
        self.x += self.v * dt;
        let p00 = self.p00 + dt * (2.0 * self.p01) + dt * dt * self.p11 + q_pos;
        let p01 = self.p01 + dt * self.p11;
        self.p00 = p00;
        self.p01 = p01;
        self.p11 += q_vel;
    }

    fn correct(&mut self, z: f32, r: f32) {
        let innovation = z - self.x;
        let s = self.p00 + r;
        let k0 = self.p00 / s;
        let k1 = self.p01 / s;

        self.x += k0 * innovation;
        self.v += k1 * innovation;

        let p00 = (1.0 - k0) * self.p00;
        let p01 = (1.0 - k0) * self.p01;
        let p11 = self.p11 - k1 * self.p01;
        self.p00 = p00;
        self.p01 = p01;
        self.p11 = p11;
    }
}

/// Position-only filter for the size components.
#[derive(Debug, Clone, Copy)]
struct ScalarFilter {
    x: f32,
    p: f32,
}

impl ScalarFilter {
    fn new(x: f32) -> Self {
        Self { x, p: 1.0 }
    }

    fn predict(&mut self, q: f32) {
        self.p += q;
    }

    fn correct(&mut self, z: f32, r: f32) {
        let k = self.p / (self.p + r);
        self.x += k * (z - self.x);
        self.p *= 1.0 - k;
    }
}

/// Per-object motion estimator.
#[derive(Debug, Clone)]
pub struct KalmanModel {
    params: KalmanParams,
    axes: [AxisFilter; 3],
    sizes: [ScalarFilter; 2],
}

impl KalmanModel {
    /// Seeds the model from the first observed state.
    #[must_use]
    pub fn new(params: KalmanParams, state: &State) -> Self {
        Self {
            params,
            axes: [
                AxisFilter::new(state.centre.x),
                AxisFilter::new(state.centre.y),
                AxisFilter::new(state.centre.z),
            ],
            sizes: [
                ScalarFilter::new(state.size.x),
                ScalarFilter::new(state.size.y),
            ],
        }
    }

    #[must_use]
    pub const fn params(&self) -> &KalmanParams {
        &self.params
    }

    /// Advances the state by `dt` seconds (already `tscale`-scaled by the
    /// caller) and returns the predicted state.
    pub fn predict(&mut self, dt: f32) -> State {
        for axis in &mut self.axes {
            axis.predict(dt, self.params.process_noise, self.params.velocity_noise);
        }
        for size in &mut self.sizes {
            size.predict(self.params.process_noise);
        }
        self.state()
    }

    /// Folds an observed centre/size measurement back into the estimate.
    pub fn correct(&mut self, measure: &State) {
        let r = self.params.measurement_noise;
        self.axes[0].correct(measure.centre.x, r);
        self.axes[1].correct(measure.centre.y, r);
        self.axes[2].correct(measure.centre.z, r);
        self.sizes[0].correct(measure.size.x, r);
        self.sizes[1].correct(measure.size.y, r);
    }

    /// Current state estimate, velocity included.
    #[must_use]
    pub fn state(&self) -> State {
        State {
            centre: Vec3::new(self.axes[0].x, self.axes[1].x, self.axes[2].x),
            size: Vec2::new(self.sizes[0].x, self.sizes[1].x),
            velocity: Vec3::new(self.axes[0].v, self.axes[1].v, self.axes[2].v),
        }
    }
}
