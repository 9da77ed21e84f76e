//! Kinematics of a four-wheel, independently steered robot.
//!
//! The robot is commanded with a path curvature and a forward velocity. Each
//! wheel is steered so that it is tangent to a circle around the instantaneous
//! center of rotation (ICR) implied by the curvature, and the pose is advanced
//! along the exact circular arc rather than with an Euler step.
//!
//! Wheel order is front-left, front-right, rear-left, rear-right everywhere in
//! this crate.

use std::f64::consts::{PI, TAU};

use crate::config::RobotParams;

/// Below this magnitude a commanded curvature is treated as straight motion.
pub const STRAIGHT_CURVATURE: f64 = 1e-6;
/// Below this front-left steering magnitude the ICR is at infinity.
pub const ICR_MIN_STEERING: f64 = 1e-3;

pub const WHEEL_NAMES: [&str; 4] = ["fl", "fr", "rl", "rr"];

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RobotState {
    pub x: f64,
    pub y: f64,
    /// Heading in `(-pi, pi]`
    pub theta: f64,
    /// Signed forward velocity
    pub v: f64,
    pub delta_fl: f64,
    pub delta_fr: f64,
    pub delta_rl: f64,
    pub delta_rr: f64,
}

impl RobotState {
    pub fn wheel_angles(&self) -> [f64; 4] {
        [self.delta_fl, self.delta_fr, self.delta_rl, self.delta_rr]
    }

    fn set_wheel_angles(&mut self, angles: [f64; 4]) {
        [self.delta_fl, self.delta_fr, self.delta_rl, self.delta_rr] = angles;
    }

    pub fn distance_to(&self, x: f64, y: f64) -> f64 {
        (self.x - x).hypot(self.y - y)
    }
}

/// Wraps an angle into `(-pi, pi]`.
pub fn normalize_angle(theta: f64) -> f64 {
    let wrapped = (theta + PI).rem_euclid(TAU) - PI;
    if wrapped <= -PI {
        wrapped + TAU
    } else {
        wrapped
    }
}

/// Moves `current` toward `desired` by at most `max_change`.
fn approach(current: f64, desired: f64, max_change: f64) -> f64 {
    current + (desired - current).clamp(-max_change, max_change)
}

fn rotate(theta: f64, (bx, by): (f64, f64)) -> (f64, f64) {
    let (sin_t, cos_t) = theta.sin_cos();
    (cos_t * bx - sin_t * by, sin_t * bx + cos_t * by)
}

#[derive(Clone, Debug)]
pub struct KinematicModel {
    params: RobotParams,
    state: RobotState,
}

impl KinematicModel {
    pub fn new(params: RobotParams) -> KinematicModel {
        KinematicModel {
            params,
            state: RobotState::default(),
        }
    }

    pub fn params(&self) -> &RobotParams {
        &self.params
    }

    pub fn state(&self) -> &RobotState {
        &self.state
    }

    /// `(x, y, theta, v)`
    pub fn pose(&self) -> (f64, f64, f64, f64) {
        (self.state.x, self.state.y, self.state.theta, self.state.v)
    }

    pub fn wheel_angles(&self) -> [f64; 4] {
        self.state.wheel_angles()
    }

    /// Places the robot at rest with straight wheels. The heading is stored as
    /// given; the next step normalizes it.
    pub fn reset(&mut self, x: f64, y: f64, theta: f64) {
        self.state = RobotState {
            x,
            y,
            theta,
            ..RobotState::default()
        };
    }

    /// Lateral ICR coordinate in the robot frame for a commanded curvature.
    pub fn icr_offset(curvature: f64) -> Option<f64> {
        (curvature.abs() >= STRAIGHT_CURVATURE).then(|| curvature.recip())
    }

    /// Steering angles that put every wheel tangent to the circle around the
    /// ICR of `curvature`, before any rate or angle limit.
    pub fn desired_wheel_angles(&self, curvature: f64) -> [f64; 4] {
        if curvature.abs() < STRAIGHT_CURVATURE {
            return [0.0; 4];
        }
        let radius = curvature.recip();
        let half_l = self.params.wheelbase / 2.0;
        let half_w = self.params.track_width / 2.0;
        [
            half_l.atan2(radius - half_w),
            half_l.atan2(radius + half_w),
            (-half_l).atan2(radius - half_w),
            (-half_l).atan2(radius + half_w),
        ]
    }

    fn limit_velocity(&self, desired: f64, dt: f64) -> f64 {
        let max_v = self.params.max_velocity;
        approach(self.state.v, desired, self.params.max_acceleration * dt).clamp(-max_v, max_v)
    }

    fn limit_steering(&self, desired: [f64; 4], dt: f64) -> [f64; 4] {
        let max_change = self.params.max_steering_rate * dt;
        let max_angle = self.params.max_steering_angle;
        let current = self.state.wheel_angles();
        std::array::from_fn(|i| {
            approach(current[i], desired[i], max_change).clamp(-max_angle, max_angle)
        })
    }

    /// Advances the robot by `dt` seconds toward the commanded curvature and
    /// velocity.
    ///
    /// Velocity and steering are rate limited first; the pose then follows the
    /// exact arc of `curvature` at the limited velocity, starting from the
    /// heading held before this call. A `dt` that is not positive (NaN
    /// included) leaves the state unchanged.
    pub fn step(&mut self, curvature: f64, velocity: f64, dt: f64) {
        if dt.is_nan() || dt <= 0.0 {
            return;
        }
        let v = self.limit_velocity(velocity, dt);
        let angles = self.limit_steering(self.desired_wheel_angles(curvature), dt);
        self.state.v = v;
        self.state.set_wheel_angles(angles);

        let theta = self.state.theta;
        let (dx, dy, dtheta) = if curvature.abs() < STRAIGHT_CURVATURE {
            (v * theta.cos() * dt, v * theta.sin() * dt, 0.0)
        } else {
            let dtheta = v * curvature * dt;
            let radius = curvature.recip();
            (
                radius * ((theta + dtheta).sin() - theta.sin()),
                -radius * ((theta + dtheta).cos() - theta.cos()),
                dtheta,
            )
        };

        self.state.x += dx;
        self.state.y += dy;
        self.state.theta = normalize_angle(theta + dtheta);
    }

    /// Global position of the ICR implied by the front-left wheel, or `None`
    /// while that wheel is (nearly) straight.
    pub fn icr_position(&self) -> Option<(f64, f64)> {
        let delta_fl = self.state.delta_fl;
        if delta_fl.abs() < ICR_MIN_STEERING {
            return None;
        }
        let lateral =
            self.params.wheelbase / 2.0 / delta_fl.tan() + self.params.track_width / 2.0;
        Some(self.to_global((0.0, lateral)))
    }

    fn body_offsets(&self) -> [(f64, f64); 4] {
        let half_l = self.params.wheelbase / 2.0;
        let half_w = self.params.track_width / 2.0;
        [
            (half_l, half_w),
            (half_l, -half_w),
            (-half_l, half_w),
            (-half_l, -half_w),
        ]
    }

    fn to_global(&self, body: (f64, f64)) -> (f64, f64) {
        let (rx, ry) = rotate(self.state.theta, body);
        (self.state.x + rx, self.state.y + ry)
    }

    /// Wheel contact points in global coordinates, FL, FR, RL, RR.
    pub fn wheel_positions(&self) -> [(f64, f64); 4] {
        self.body_offsets().map(|offset| self.to_global(offset))
    }

    /// Chassis outline FL, FR, RR, RL so consecutive corners share an edge.
    pub fn body_corners(&self) -> [(f64, f64); 4] {
        let [fl, fr, rl, rr] = self.wheel_positions();
        [fl, fr, rr, rl]
    }
}
