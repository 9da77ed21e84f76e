use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnvError {
    #[error("action has {got} values, expected {expected} or a single (curvature, velocity) pair")]
    InvalidAction { expected: usize, got: usize },
    #[error("invalid environment config: {0}")]
    InvalidConfig(String),
    #[error("invalid robot params: {0}")]
    InvalidParams(String),
    #[error("could not place target for robot {robot} after {attempts} draws")]
    TargetPlacement { robot: usize, attempts: usize },
    #[error("robot index {0} out of range")]
    RobotIndex(usize),
    #[error("failed to read config {path}: {source}")]
    ConfigFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EnvError>;
