//! Multi-robot navigation environment.
//!
//! Every robot has its own target. An action is a flat list of
//! `(curvature, velocity)` pairs, one per robot, or a single pair that is
//! applied to all robots. After each step the environment reports an
//! observation vector, a scalar reward and the episode flags.

use std::f64::consts::PI;

use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::{debug, trace, warn};

use crate::{
    config::EnvConfig,
    error::{EnvError, Result},
    kinematics::{KinematicModel, RobotState},
};

/// Fixed simulation timestep in seconds.
pub const DT: f64 = 0.1;
/// Minimum distance between any two targets when several robots are present.
pub const MIN_TARGET_SEPARATION: f64 = 3.0;
/// Candidate draws allowed per target before a reset gives up.
pub const MAX_TARGET_ATTEMPTS: usize = 10_000;
/// Action components are expected in `[-ACTION_LIMIT, ACTION_LIMIT]`.
pub const ACTION_LIMIT: f64 = 2.0;
/// Observation values contributed by a robot before the relative positions.
pub const ROBOT_OBS_SIZE: usize = 10;

const SUCCESS_BONUS: f64 = 200.0;
const VELOCITY_PENALTY: f64 = 0.1;
const STEERING_PENALTY: f64 = 0.05;
const SHARED_DISTANCE_WEIGHT: f64 = 0.5;
const PROGRESS_WEIGHT: f64 = 2.0;
const PROGRESS_CLIP: f64 = 5.0;
const COLLISION_DISTANCE: f64 = 0.5;
const COLLISION_PENALTY: f64 = 50.0;
const NEAR_MISS_DISTANCE: f64 = 1.0;
const NEAR_MISS_PENALTY: f64 = 10.0;
const CLEARANCE_DISTANCE: f64 = 1.5;
const CLEARANCE_BONUS: f64 = 1.0;
const REWARD_LIMIT: f64 = 10_000.0;
const NON_FINITE_REWARD: f64 = -100.0;

pub type Point = (f64, f64);

#[derive(Debug, Clone, PartialEq)]
pub struct StepInfo {
    /// Distance from each robot to its own target
    pub distances: Vec<f64>,
    pub step: usize,
    /// Every robot is within the success threshold
    pub success: bool,
}

#[derive(Debug, Clone)]
pub struct Step {
    pub observation: Vec<f64>,
    pub reward: f64,
    pub terminated: bool,
    pub truncated: bool,
    pub info: StepInfo,
}

/// Robot poses `(x, y, theta)` and targets drawn for one episode.
struct Layout {
    poses: Vec<(f64, f64, f64)>,
    targets: Vec<Point>,
}

#[derive(Debug, Clone)]
pub struct NavigationEnv {
    config: EnvConfig,
    robots: Vec<KinematicModel>,
    targets: Vec<Point>,
    prev_distances: Vec<f64>,
    step_count: usize,
    rng: StdRng,
}

impl NavigationEnv {
    pub fn new(config: EnvConfig) -> Result<NavigationEnv> {
        config.validate()?;
        let n = config.num_robots;
        Ok(NavigationEnv {
            robots: (0..n).map(|_| KinematicModel::new(config.robot)).collect(),
            targets: vec![(0.0, 0.0); n],
            prev_distances: vec![f64::INFINITY; n],
            step_count: 0,
            rng: StdRng::from_entropy(),
            config,
        })
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    pub fn num_robots(&self) -> usize {
        self.robots.len()
    }

    pub fn robots(&self) -> &[KinematicModel] {
        &self.robots
    }

    pub fn robot(&self, index: usize) -> Option<&KinematicModel> {
        self.robots.get(index)
    }

    /// Direct access for placing a robot by hand, e.g. to build a scenario.
    pub fn robot_mut(&mut self, index: usize) -> Option<&mut KinematicModel> {
        self.robots.get_mut(index)
    }

    pub fn targets(&self) -> &[Point] {
        &self.targets
    }

    pub fn set_target(&mut self, index: usize, x: f64, y: f64) -> Result<()> {
        let target = self
            .targets
            .get_mut(index)
            .ok_or(EnvError::RobotIndex(index))?;
        *target = (x, y);
        Ok(())
    }

    pub fn step_count(&self) -> usize {
        self.step_count
    }

    pub fn observation_size(&self) -> usize {
        let n = self.robots.len();
        (ROBOT_OBS_SIZE + 2 * (n - 1)) * n
    }

    pub fn action_size(&self) -> usize {
        2 * self.robots.len()
    }

    /// Uniform random action inside the action bounds.
    pub fn sample_action<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<f64> {
        (0..self.action_size())
            .map(|_| rng.gen_range(-ACTION_LIMIT..=ACTION_LIMIT))
            .collect()
    }

    /// Starts a new episode. A seed reseeds the environment's generator so the
    /// episode layout is reproducible; without one the generator continues.
    pub fn reset(&mut self, seed: Option<u64>) -> Result<(Vec<f64>, StepInfo)> {
        if let Some(seed) = seed {
            self.rng = StdRng::seed_from_u64(seed);
        }
        let layout = Self::draw_layout(&self.config, &mut self.rng)?;
        Ok(self.start_episode(layout))
    }

    pub fn reset_with_rng<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
    ) -> Result<(Vec<f64>, StepInfo)> {
        let layout = Self::draw_layout(&self.config, rng)?;
        Ok(self.start_episode(layout))
    }

    fn draw_layout<R: Rng + ?Sized>(config: &EnvConfig, rng: &mut R) -> Result<Layout> {
        let range = config.initial_range;
        let poses = (0..config.num_robots)
            .map(|_| {
                (
                    rng.gen_range(-range..=range),
                    rng.gen_range(-range..=range),
                    rng.gen_range(-PI..=PI),
                )
            })
            .collect();

        let mut targets: Vec<Point> = Vec::with_capacity(config.num_robots);
        if config.num_robots == 1 {
            targets.push((rng.gen_range(-range..=range), rng.gen_range(-range..=range)));
        } else {
            for robot in 0..config.num_robots {
                let target = (0..MAX_TARGET_ATTEMPTS)
                    .map(|_| (rng.gen_range(-range..=range), rng.gen_range(-range..=range)))
                    .find(|&(x, y)| {
                        targets
                            .iter()
                            .all(|&(tx, ty)| (x - tx).hypot(y - ty) >= MIN_TARGET_SEPARATION)
                    })
                    .ok_or(EnvError::TargetPlacement {
                        robot,
                        attempts: MAX_TARGET_ATTEMPTS,
                    })?;
                targets.push(target);
            }
        }
        Ok(Layout { poses, targets })
    }

    fn start_episode(&mut self, layout: Layout) -> (Vec<f64>, StepInfo) {
        for (robot, &(x, y, theta)) in self.robots.iter_mut().zip(&layout.poses) {
            robot.reset(x, y, theta);
        }
        self.targets = layout.targets;
        self.prev_distances.fill(f64::INFINITY);
        self.step_count = 0;
        debug!(robots = self.robots.len(), targets = ?self.targets, "episode reset");
        (self.observation(), self.info())
    }

    /// Advances every robot by one timestep.
    ///
    /// `action` holds `2 * num_robots` values as consecutive
    /// `(curvature, velocity)` pairs, or exactly one pair that every robot
    /// follows. Any other length is rejected before the environment changes.
    pub fn step(&mut self, action: &[f64]) -> Result<Step> {
        let commands = self.split_action(action)?;
        for (robot, (curvature, velocity)) in self.robots.iter_mut().zip(commands) {
            robot.step(curvature, velocity, DT);
        }
        self.step_count += 1;

        let reward = self.compute_reward();
        let info = self.info();
        let terminated = info.success;
        let truncated = self.step_count >= self.config.max_episode_steps;
        trace!(step = self.step_count, reward, terminated, truncated, "env step");

        Ok(Step {
            observation: self.observation(),
            reward,
            terminated,
            truncated,
            info,
        })
    }

    /// [`step`](Self::step) with one `[curvature, velocity]` row per robot.
    pub fn step_pairs(&mut self, pairs: &[[f64; 2]]) -> Result<Step> {
        self.step(&pairs.concat())
    }

    fn split_action(&self, action: &[f64]) -> Result<Vec<(f64, f64)>> {
        let n = self.robots.len();
        match action.len() {
            len if len == 2 * n => Ok(action.chunks_exact(2).map(|c| (c[0], c[1])).collect()),
            2 => Ok(vec![(action[0], action[1]); n]),
            got => Err(EnvError::InvalidAction {
                expected: 2 * n,
                got,
            }),
        }
    }

    pub fn distances(&self) -> Vec<f64> {
        self.robots
            .iter()
            .zip(&self.targets)
            .map(|(robot, &(tx, ty))| robot.state().distance_to(tx, ty))
            .collect()
    }

    fn info(&self) -> StepInfo {
        let distances = self.distances();
        let success = distances
            .iter()
            .all(|&d| d <= self.config.success_threshold);
        StepInfo {
            distances,
            step: self.step_count,
            success,
        }
    }

    /// Per robot: pose, velocity, wheel angles and the vector to its target,
    /// followed by the offsets to every other robot in index order.
    pub fn observation(&self) -> Vec<f64> {
        let mut obs = Vec::with_capacity(self.observation_size());
        for (i, (robot, &(tx, ty))) in self.robots.iter().zip(&self.targets).enumerate() {
            let s = robot.state();
            obs.extend_from_slice(&[s.x, s.y, s.theta, s.v]);
            obs.extend_from_slice(&s.wheel_angles());
            obs.extend_from_slice(&[tx - s.x, ty - s.y]);
            for (_, other) in self.robots.iter().enumerate().filter(|&(j, _)| j != i) {
                let o = other.state();
                obs.extend_from_slice(&[o.x - s.x, o.y - s.y]);
            }
        }
        obs
    }

    fn compute_reward(&mut self) -> f64 {
        let threshold = self.config.success_threshold;
        let shared = self.robots.len() > 1;
        let distances = self.distances();

        let mut total = 0.0;
        for (state, (&distance, prev)) in self
            .robots
            .iter()
            .map(KinematicModel::state)
            .zip(distances.iter().zip(self.prev_distances.iter_mut()))
        {
            let distance_reward = if shared {
                let progress = if prev.is_finite() {
                    (*prev - distance).clamp(-PROGRESS_CLIP, PROGRESS_CLIP)
                } else {
                    0.0
                };
                *prev = distance;
                -SHARED_DISTANCE_WEIGHT * distance + PROGRESS_WEIGHT * progress
            } else {
                -distance
            };
            let bonus = if distance < threshold { SUCCESS_BONUS } else { 0.0 };
            total += distance_reward + bonus + effort_penalty(state);
        }

        if shared {
            total += self.separation_reward();
        }
        sanitize_reward(total)
    }

    /// Collision penalties over all robot pairs, plus a bonus when every pair
    /// keeps its distance.
    fn separation_reward(&self) -> f64 {
        let mut reward = 0.0;
        let mut min_distance = f64::INFINITY;
        for (i, a) in self.robots.iter().enumerate() {
            for b in &self.robots[i + 1..] {
                let (a, b) = (a.state(), b.state());
                let distance = a.distance_to(b.x, b.y);
                min_distance = min_distance.min(distance);
                reward -= collision_penalty(distance);
            }
        }
        if min_distance > CLEARANCE_DISTANCE {
            reward += CLEARANCE_BONUS;
        }
        reward
    }
}

fn effort_penalty(state: &RobotState) -> f64 {
    let steering: f64 = state.wheel_angles().iter().map(|a| a.abs()).sum();
    -VELOCITY_PENALTY * state.v.abs() - STEERING_PENALTY * steering
}

fn collision_penalty(distance: f64) -> f64 {
    if distance < COLLISION_DISTANCE {
        COLLISION_PENALTY
    } else if distance < NEAR_MISS_DISTANCE {
        NEAR_MISS_PENALTY * (1.0 - distance)
    } else {
        0.0
    }
}

fn sanitize_reward(total: f64) -> f64 {
    let clipped = total.clamp(-REWARD_LIMIT, REWARD_LIMIT);
    if clipped.is_finite() {
        clipped
    } else {
        warn!(reward = total, "non-finite reward replaced");
        NON_FINITE_REWARD
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MAX_INITIAL_RANGE;

    fn env_with(num_robots: usize) -> NavigationEnv {
        NavigationEnv::new(EnvConfig::with_robots(num_robots)).unwrap()
    }

    /// Places robot `i` at rest at `pos` with its target at `target`.
    fn place(env: &mut NavigationEnv, i: usize, pos: Point, target: Point) {
        env.robot_mut(i).unwrap().reset(pos.0, pos.1, 0.0);
        env.set_target(i, target.0, target.1).unwrap();
    }

    #[test]
    fn test_observation_size() {
        for n in 1..=5 {
            let mut env = env_with(n);
            let (obs, info) = env.reset(Some(n as u64)).unwrap();
            let expected = if n == 1 { 10 } else { (10 + 2 * (n - 1)) * n };
            assert_eq!(obs.len(), expected);
            assert_eq!(env.observation_size(), expected);
            assert_eq!(env.action_size(), 2 * n);
            assert_eq!(info.distances.len(), n);
            assert_eq!(info.step, 0);

            let step = env.step(&vec![0.1; 2 * n]).unwrap();
            assert_eq!(step.observation.len(), expected);
        }
    }

    #[test]
    fn test_observation_layout() {
        let mut env = env_with(2);
        env.reset(Some(1)).unwrap();
        place(&mut env, 0, (1.0, 2.0), (4.0, 6.0));
        place(&mut env, 1, (-1.0, 0.5), (0.0, 0.0));
        let obs = env.observation();
        assert_eq!(
            obs[..12],
            [1.0, 2.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 3.0, 4.0, -2.0, -1.5]
        );
        assert_eq!(obs[20..], [1.0, -0.5, 2.0, 1.5]);
    }

    #[test]
    fn test_reset_is_reproducible() {
        let mut a = env_with(3);
        let mut b = env_with(3);
        let (obs_a, _) = a.reset(Some(42)).unwrap();
        let (obs_b, _) = b.reset(Some(42)).unwrap();
        assert_eq!(obs_a, obs_b);
        assert_eq!(a.targets(), b.targets());

        let mut rng = StdRng::seed_from_u64(42);
        let (obs_c, _) = b.reset_with_rng(&mut rng).unwrap();
        assert_eq!(obs_a, obs_c);
    }

    #[test]
    fn test_reset_draws_inside_range() {
        let mut env = env_with(1);
        for seed in 0..50 {
            env.reset(Some(seed)).unwrap();
            let (x, y, theta, v) = env.robot(0).unwrap().pose();
            let (tx, ty) = env.targets()[0];
            for value in [x, y, tx, ty] {
                assert!(value.abs() <= 10.0);
            }
            assert!(theta.abs() <= PI);
            assert_eq!(v, 0.0);
        }
    }

    #[test]
    fn test_target_separation() {
        let mut env = env_with(4);
        for seed in 0..100 {
            env.reset(Some(seed)).unwrap();
            let targets = env.targets();
            for (i, a) in targets.iter().enumerate() {
                for b in &targets[i + 1..] {
                    assert!((a.0 - b.0).hypot(a.1 - b.1) >= MIN_TARGET_SEPARATION);
                }
            }
        }
    }

    #[test]
    fn test_impossible_target_layout_fails_without_changes() {
        let config = EnvConfig {
            num_robots: 10,
            initial_range: 1.0,
            ..EnvConfig::default()
        };
        let mut env = NavigationEnv::new(config).unwrap();
        env.step(&[0.0, 1.0]).unwrap();
        let before = env.observation();

        let err = env.reset(Some(3)).unwrap_err();
        assert!(matches!(err, EnvError::TargetPlacement { robot: 1, .. }));
        assert_eq!(env.step_count(), 1);
        assert_eq!(env.observation(), before);
    }

    #[test]
    fn test_invalid_action_is_rejected() {
        let mut env = env_with(2);
        env.reset(Some(0)).unwrap();
        let before = env.observation();
        let actions: [&[f64]; 3] = [&[], &[1.0], &[1.0, 1.0, 1.0]];
        for action in actions {
            let err = env.step(action).unwrap_err();
            assert!(matches!(err, EnvError::InvalidAction { expected: 4, .. }));
        }
        assert_eq!(env.step_count(), 0);
        assert_eq!(env.observation(), before);
    }

    #[test]
    fn test_single_pair_broadcasts() {
        let mut env = env_with(3);
        env.reset(Some(5)).unwrap();
        let mut full = env.clone();

        let a = env.step(&[0.5, 1.0]).unwrap();
        let b = full.step(&[0.5, 1.0, 0.5, 1.0, 0.5, 1.0]).unwrap();
        assert_eq!(a.observation, b.observation);
        assert_eq!(a.reward, b.reward);

        let c = env.step_pairs(&[[0.5, 1.0]; 3]).unwrap();
        let d = full.step(&[0.5, 1.0]).unwrap();
        assert_eq!(c.observation, d.observation);
        assert_eq!(env.step_count(), 2);
    }

    #[test]
    fn test_termination_needs_every_robot() {
        let mut env = env_with(2);
        env.reset(Some(0)).unwrap();
        place(&mut env, 0, (0.0, 0.0), (0.1, 0.1));
        place(&mut env, 1, (5.0, 5.0), (-5.0, 5.0));

        let step = env.step(&[0.0, 0.0]).unwrap();
        assert!(!step.terminated);
        assert!(!step.info.success);

        place(&mut env, 1, (-5.0, 5.2), (-5.0, 5.0));
        let step = env.step(&[0.0, 0.0]).unwrap();
        assert!(step.terminated);
        assert!(step.info.success);
        assert_eq!(step.info.step, 2);
    }

    #[test]
    fn test_truncation() {
        let config = EnvConfig {
            max_episode_steps: 3,
            ..EnvConfig::default()
        };
        let mut env = NavigationEnv::new(config).unwrap();
        env.reset(Some(9)).unwrap();
        place(&mut env, 0, (0.0, 0.0), (8.0, 8.0));
        let flags: Vec<bool> = (0..3)
            .map(|_| env.step(&[0.0, 0.0]).unwrap().truncated)
            .collect();
        assert_eq!(flags, [false, false, true]);

        env.reset(None).unwrap();
        assert_eq!(env.step_count(), 0);
    }

    #[test]
    fn test_single_robot_reward() {
        let mut env = env_with(1);
        env.reset(Some(0)).unwrap();
        place(&mut env, 0, (0.0, 0.0), (3.0, 4.0));
        let step = env.step(&[0.0, 0.0]).unwrap();
        assert!((step.reward + 5.0).abs() < 1e-12);

        place(&mut env, 0, (0.0, 0.0), (0.0, 0.0));
        let step = env.step(&[0.0, 1.0]).unwrap();
        // 0.02 m travelled at 0.2 m/s.
        let expected = -0.02 - VELOCITY_PENALTY * 0.2 + SUCCESS_BONUS;
        assert!((step.reward - expected).abs() < 1e-9);
        assert!(step.terminated);
    }

    #[test]
    fn test_progress_shaping() {
        let mut env = env_with(2);
        env.reset(Some(0)).unwrap();
        place(&mut env, 0, (0.0, 0.0), (4.0, 0.0));
        place(&mut env, 1, (0.0, 10.0), (0.0, 30.0));

        // No progress term right after a reset.
        let step = env.step(&[0.0, 0.0]).unwrap();
        assert!((step.reward - (-0.5 * 4.0 - 0.5 * 20.0 + 1.0)).abs() < 1e-12);

        place(&mut env, 0, (2.0, 0.0), (4.0, 0.0));
        place(&mut env, 1, (0.0, 25.0), (0.0, 30.0));
        let step = env.step(&[0.0, 0.0]).unwrap();
        // Robot 0 gains 2 m, robot 1 gains 15 m clipped to 5 m.
        let expected = -0.5 * 2.0 + 2.0 * 2.0 - 0.5 * 5.0 + 2.0 * 5.0 + 1.0;
        assert!((step.reward - expected).abs() < 1e-12);

        env.reset(Some(0)).unwrap();
        place(&mut env, 0, (0.0, 0.0), (4.0, 0.0));
        place(&mut env, 1, (0.0, 10.0), (0.0, 30.0));
        let step = env.step(&[0.0, 0.0]).unwrap();
        assert!((step.reward - (-12.0 + 1.0)).abs() < 1e-12);
    }

    #[test]
    fn test_collision_penalties() {
        assert_eq!(collision_penalty(0.3), COLLISION_PENALTY);
        assert!((collision_penalty(0.75) - 2.5).abs() < 1e-12);
        assert_eq!(collision_penalty(1.0), 0.0);

        let mut env = env_with(2);
        env.reset(Some(0)).unwrap();
        place(&mut env, 0, (0.0, 0.0), (0.0, 0.0));
        place(&mut env, 1, (0.3, 0.0), (0.3, 0.0));
        let step = env.step(&[0.0, 0.0]).unwrap();
        // Both robots sit on their targets but overlap.
        assert!((step.reward - (2.0 * SUCCESS_BONUS - COLLISION_PENALTY)).abs() < 1e-12);
        assert!(step.terminated);
    }

    #[test]
    fn test_reward_stays_bounded() {
        let mut env = env_with(1);
        env.reset(Some(0)).unwrap();
        place(&mut env, 0, (1e308, 1e308), (-1e308, -1e308));
        let step = env.step(&[0.0, 0.0]).unwrap();
        assert_eq!(step.reward, -REWARD_LIMIT);

        env.reset(Some(0)).unwrap();
        let step = env.step(&[f64::NAN, f64::NAN]).unwrap();
        assert_eq!(step.reward, NON_FINITE_REWARD);

        let mut env = env_with(3);
        let mut rng = StdRng::seed_from_u64(11);
        env.reset(Some(11)).unwrap();
        for _ in 0..200 {
            let mut action = env.sample_action(&mut rng);
            action.iter_mut().for_each(|a| *a *= 1e6);
            let reward = env.step(&action).unwrap().reward;
            assert!(reward.is_finite());
            assert!(reward.abs() <= REWARD_LIMIT);
        }
    }

    #[test]
    fn test_sample_action_bounds() {
        let env = env_with(4);
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..100 {
            let action = env.sample_action(&mut rng);
            assert_eq!(action.len(), 8);
            assert!(action.iter().all(|a| a.abs() <= ACTION_LIMIT));
        }
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        assert!(matches!(
            NavigationEnv::new(EnvConfig::with_robots(0)),
            Err(EnvError::InvalidConfig(_))
        ));
        assert!(matches!(
            NavigationEnv::new(EnvConfig {
                initial_range: 1e308,
                ..EnvConfig::default()
            }),
            Err(EnvError::InvalidConfig(_))
        ));
        let mut env = env_with(2);
        assert!(matches!(env.set_target(2, 0.0, 0.0), Err(EnvError::RobotIndex(2))));
    }

    #[test]
    fn test_reset_with_largest_range() {
        let mut env = NavigationEnv::new(EnvConfig {
            num_robots: 2,
            initial_range: MAX_INITIAL_RANGE,
            ..EnvConfig::default()
        })
        .unwrap();
        let (obs, info) = env.reset(Some(3)).unwrap();
        assert!(obs.iter().all(|v| v.is_finite()));
        assert!(info.distances.iter().all(|d| d.is_finite()));
        for &(x, y) in env.targets() {
            assert!(x.abs() <= MAX_INITIAL_RANGE && y.abs() <= MAX_INITIAL_RANGE);
        }
    }
}
