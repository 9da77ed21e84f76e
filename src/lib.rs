//! Simulation of four-wheel, independently steered robots driving to target
//! points, exposed as a step/reset environment.
//!
//! [`KinematicModel`] advances one robot from a commanded curvature and
//! velocity. [`NavigationEnv`] owns several of them, turns flat action vectors
//! into per-robot commands and reports observation, reward and episode flags.

pub mod config;
pub mod controller;
pub mod env;
pub mod error;
pub mod kinematics;

pub use config::{EnvConfig, RobotParams};
pub use controller::PursuitController;
pub use env::{NavigationEnv, Point, Step, StepInfo, ACTION_LIMIT, DT};
pub use error::{EnvError, Result};
pub use kinematics::{normalize_angle, KinematicModel, RobotState};
