//! Construction-time configuration for robots and the navigation environment.
//!
//! Both structs carry the documented defaults through [`Default`] and can be
//! loaded from JSON, where any omitted field falls back to its default.

use std::{f64::consts::FRAC_PI_2, f64::consts::FRAC_PI_3, fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::error::{EnvError, Result};

/// Largest spawn range whose sampling span stays finite.
pub const MAX_INITIAL_RANGE: f64 = f64::MAX / 4.0;

/// Physical limits of one four-wheel-steered robot.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotParams {
    /// Distance between front and rear axles in meters
    pub wheelbase: f64,
    /// Distance between left and right wheels in meters
    pub track_width: f64,
    pub wheel_radius: f64,
    /// Steering angle limit of every wheel (radians)
    pub max_steering_angle: f64,
    /// rad/s
    pub max_steering_rate: f64,
    /// m/s^2
    pub max_acceleration: f64,
    /// m/s
    pub max_velocity: f64,
}

impl Default for RobotParams {
    fn default() -> Self {
        Self {
            wheelbase: 0.5,
            track_width: 0.4,
            wheel_radius: 0.1,
            max_steering_angle: FRAC_PI_3,
            max_steering_rate: 0.5,
            max_acceleration: 2.0,
            max_velocity: 2.0,
        }
    }
}

impl RobotParams {
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("wheelbase", self.wheelbase),
            ("track_width", self.track_width),
            ("wheel_radius", self.wheel_radius),
            ("max_steering_rate", self.max_steering_rate),
            ("max_acceleration", self.max_acceleration),
            ("max_velocity", self.max_velocity),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(EnvError::InvalidParams(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }
        if !(self.max_steering_angle > 0.0 && self.max_steering_angle <= FRAC_PI_2) {
            return Err(EnvError::InvalidParams(format!(
                "max_steering_angle must be in (0, pi/2], got {}",
                self.max_steering_angle
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvConfig {
    pub num_robots: usize,
    /// Episodes are truncated once this many steps have been taken
    pub max_episode_steps: usize,
    /// Distance to target (m) at which a robot counts as arrived
    pub success_threshold: f64,
    /// Robots and targets spawn in `[-initial_range, initial_range]^2`
    pub initial_range: f64,
    /// Shared by every robot in the environment
    pub robot: RobotParams,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            num_robots: 1,
            max_episode_steps: 500,
            success_threshold: 0.3,
            initial_range: 10.0,
            robot: RobotParams::default(),
        }
    }
}

impl EnvConfig {
    pub fn with_robots(num_robots: usize) -> Self {
        Self {
            num_robots,
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EnvConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| EnvError::ConfigFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_robots == 0 {
            return Err(EnvError::InvalidConfig("num_robots must be at least 1".into()));
        }
        if self.max_episode_steps == 0 {
            return Err(EnvError::InvalidConfig(
                "max_episode_steps must be at least 1".into(),
            ));
        }
        if !(self.success_threshold.is_finite() && self.success_threshold > 0.0) {
            return Err(EnvError::InvalidConfig(format!(
                "success_threshold must be positive, got {}",
                self.success_threshold
            )));
        }
        if !(self.initial_range > 0.0 && self.initial_range <= MAX_INITIAL_RANGE) {
            return Err(EnvError::InvalidConfig(format!(
                "initial_range must be in (0, {MAX_INITIAL_RANGE:e}], got {}",
                self.initial_range
            )));
        }
        self.robot.validate()
    }
}
