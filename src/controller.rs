//! Geometric pursuit driver used by the viewer and the headless runner.
//!
//! Reads only the observation vector, so it drives the environment the same
//! way an external policy would.

use std::f64::consts::FRAC_PI_2;

use crate::{env::ROBOT_OBS_SIZE, kinematics::normalize_angle};

#[derive(Clone, Copy, Debug)]
pub struct PursuitController {
    /// Top speed while far from the target (m/s)
    pub cruise_velocity: f64,
    /// Commanded speed per meter of remaining distance
    pub velocity_gain: f64,
    /// Speed while turning toward a target behind the robot
    pub turn_velocity: f64,
    pub max_curvature: f64,
}

impl Default for PursuitController {
    fn default() -> Self {
        Self {
            cruise_velocity: 1.5,
            velocity_gain: 0.5,
            turn_velocity: 0.5,
            max_curvature: 2.0,
        }
    }
}

impl PursuitController {
    /// `(curvature, velocity)` that steers along the arc through the target,
    /// given the robot heading and the vector to its target.
    pub fn command(&self, theta: f64, dx: f64, dy: f64) -> (f64, f64) {
        let distance = dx.hypot(dy);
        let bearing = normalize_angle(dy.atan2(dx) - theta);
        if bearing.abs() > FRAC_PI_2 {
            // Target behind: turn on the tightest arc first.
            return (
                self.max_curvature.copysign(bearing),
                self.turn_velocity,
            );
        }
        let curvature = (2.0 * bearing.sin() / distance.max(f64::EPSILON))
            .clamp(-self.max_curvature, self.max_curvature);
        let velocity = (self.velocity_gain * distance).min(self.cruise_velocity);
        (curvature, velocity)
    }

    /// Flat action for every robot block in `observation`.
    pub fn act(&self, observation: &[f64], num_robots: usize) -> Vec<f64> {
        let block = ROBOT_OBS_SIZE + 2 * num_robots.saturating_sub(1);
        observation
            .chunks_exact(block)
            .take(num_robots)
            .flat_map(|obs| {
                let (curvature, velocity) = self.command(obs[2], obs[8], obs[9]);
                [curvature, velocity]
            })
            .collect()
    }
}
