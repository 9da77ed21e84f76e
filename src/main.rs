use std::{collections::VecDeque, path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand};
use color_eyre::Result;
use quadsteer::{
    kinematics::WHEEL_NAMES, EnvConfig, KinematicModel, NavigationEnv, Point, PursuitController,
};
use ratatui::{
    crossterm::event::{self, Event, KeyCode},
    layout::{Constraint, Layout},
    style::Color,
    symbols::Marker,
    text::{Line, Span},
    widgets::{
        canvas::{Canvas, Circle, Line as CanvasLine, Points},
        Block, Paragraph, Widget,
    },
    DefaultTerminal,
};
use tracing::info;

#[derive(Parser, Debug)]
#[command(version, about = "Four-wheel-steering navigation simulator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch the pursuit controller drive in the terminal
    View(EnvArgs),
    /// Run episodes without a display and log a summary of each
    Run {
        #[command(flatten)]
        env: EnvArgs,
        #[arg(long, default_value_t = 10)]
        episodes: usize,
    },
}

#[derive(Args, Debug)]
struct EnvArgs {
    /// JSON file with environment and robot settings
    #[arg(long)]
    config: Option<PathBuf>,
    /// Overrides the robot count from the config
    #[arg(long)]
    robots: Option<usize>,
    #[arg(long)]
    seed: Option<u64>,
}

impl EnvArgs {
    fn build(&self) -> Result<NavigationEnv> {
        let mut config = match &self.config {
            Some(path) => EnvConfig::from_json_file(path)?,
            None => EnvConfig::default(),
        };
        if let Some(robots) = self.robots {
            config.num_robots = robots;
        }
        Ok(NavigationEnv::new(config)?)
    }
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    match cli.command {
        Command::View(args) => view(&args),
        Command::Run { env, episodes } => run(&env, episodes),
    }
}

fn run(args: &EnvArgs, episodes: usize) -> Result<()> {
    tracing_subscriber::fmt::init();

    let mut env = args.build()?;
    let controller = PursuitController::default();
    let num_robots = env.num_robots();
    let mut successes = 0;

    for episode in 0..episodes {
        let seed = if episode == 0 { args.seed } else { None };
        let (mut obs, _) = env.reset(seed)?;
        let mut total_reward = 0.0;
        loop {
            let step = env.step(&controller.act(&obs, num_robots))?;
            total_reward += step.reward;
            obs = step.observation;
            if step.terminated || step.truncated {
                successes += usize::from(step.terminated);
                info!(
                    episode,
                    steps = step.info.step,
                    reward = total_reward,
                    success = step.terminated,
                    distances = ?step.info.distances,
                    "episode finished"
                );
                break;
            }
        }
    }

    info!(episodes, successes, "done");
    Ok(())
}

/// Snapshots kept for scrubbing; older ones are dropped first.
const HISTORY_LIMIT: usize = 5_000;

enum UiState {
    Latest,
    Detach,
}

struct History<T> {
    items: VecDeque<T>,
    limit: usize,
}

impl<T> History<T> {
    fn new(limit: usize) -> History<T> {
        History {
            items: VecDeque::with_capacity(limit.min(1024)),
            limit: limit.max(1),
        }
    }

    /// Appends `item` and returns true when the oldest entry was evicted,
    /// which shifts every index down by one.
    fn push(&mut self, item: T) -> bool {
        let evicted = self.items.len() == self.limit;
        if evicted {
            self.items.pop_front();
        }
        self.items.push_back(item);
        evicted
    }

    fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    fn last_index(&self) -> usize {
        self.items.len().saturating_sub(1)
    }
}

#[derive(Clone, Debug)]
struct RobotView {
    corners: [Point; 4],
    wheels: [Point; 4],
    wheel_angles: [f64; 4],
    heading: f64,
    icr: Option<Point>,
}

impl RobotView {
    fn capture(robot: &KinematicModel) -> RobotView {
        RobotView {
            corners: robot.body_corners(),
            wheels: robot.wheel_positions(),
            wheel_angles: robot.wheel_angles(),
            heading: robot.state().theta,
            icr: robot.icr_position(),
        }
    }
}

#[derive(Clone, Debug)]
struct Snapshot {
    episode: usize,
    step: usize,
    reward: f64,
    distances: Vec<f64>,
    robots: Vec<RobotView>,
    targets: Vec<Point>,
}

impl Snapshot {
    fn capture(env: &NavigationEnv, episode: usize, reward: f64) -> Snapshot {
        Snapshot {
            episode,
            step: env.step_count(),
            reward,
            distances: env.distances(),
            robots: env.robots().iter().map(RobotView::capture).collect(),
            targets: env.targets().to_vec(),
        }
    }
}

fn view(args: &EnvArgs) -> Result<()> {
    let mut env = args.build()?;
    let (obs, _) = env.reset(args.seed)?;

    let mut term = ratatui::init();
    let result = view_loop(&mut term, &mut env, obs);
    ratatui::restore();
    result
}

fn view_loop(
    term: &mut DefaultTerminal,
    env: &mut NavigationEnv,
    mut obs: Vec<f64>,
) -> Result<()> {
    let controller = PursuitController::default();
    let num_robots = env.num_robots();
    let extent = env.config().initial_range + 2.0;
    let threshold = env.config().success_threshold;

    let mut episode = 0;
    let mut buffer = History::new(HISTORY_LIMIT);
    buffer.push(Snapshot::capture(env, episode, 0.0));

    let mut ui_state = UiState::Latest;
    let mut detach_step: usize = 0;
    let mut paused = false;

    loop {
        if !paused {
            let step = env.step(&controller.act(&obs, num_robots))?;
            obs = step.observation;
            if buffer.push(Snapshot::capture(env, episode, step.reward)) {
                detach_step = detach_step.saturating_sub(1);
            }
            if step.terminated || step.truncated {
                episode += 1;
                obs = env.reset(None)?.0;
            }
        }
        let index = match ui_state {
            UiState::Latest => buffer.last_index(),
            UiState::Detach => detach_step,
        };

        term.draw(|frame| {
            let [arena, status] =
                Layout::vertical([Constraint::Min(0), Constraint::Length(4)]).areas(frame.area());
            if let Some(snapshot) = buffer.get(index) {
                frame.render_widget(arena_canvas(snapshot, extent, threshold), arena);
                frame.render_widget(status_line(snapshot, paused), status);
            }
        })?;

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                match key.code {
                    KeyCode::Char('q') => break,
                    KeyCode::Char(' ') => paused = !paused,
                    KeyCode::Char('r') => {
                        episode += 1;
                        obs = env.reset(None)?.0;
                    }
                    KeyCode::Left => match ui_state {
                        UiState::Latest => {
                            ui_state = UiState::Detach;
                            detach_step = buffer.last_index();
                        }
                        UiState::Detach => {
                            detach_step = detach_step.saturating_sub(1);
                        }
                    },
                    KeyCode::Right => {
                        if let UiState::Detach = ui_state {
                            detach_step = (detach_step + 1).min(buffer.last_index());
                        }
                    }
                    KeyCode::Esc => {
                        ui_state = UiState::Latest;
                    }
                    KeyCode::Home => {
                        ui_state = UiState::Detach;
                        detach_step = 0;
                    }
                    KeyCode::End => {
                        ui_state = UiState::Detach;
                        detach_step = buffer.last_index();
                    }
                    _ => {}
                }
            }
        }
    }
    Ok(())
}

fn wheel_color(index: usize) -> Color {
    match index {
        0 => Color::Red,
        1 => Color::Green,
        2 => Color::Blue,
        _ => Color::Yellow,
    }
}

fn arena_canvas(snapshot: &Snapshot, extent: f64, threshold: f64) -> impl Widget + '_ {
    Canvas::default()
        .block(Block::bordered().title(" quadsteer "))
        .marker(Marker::Braille)
        .x_bounds([-extent, extent])
        .y_bounds([-extent, extent])
        .paint(move |ctx| {
            for (i, &(x, y)) in snapshot.targets.iter().enumerate() {
                ctx.draw(&Circle {
                    x,
                    y,
                    radius: threshold,
                    color: Color::LightGreen,
                });
                ctx.print(x, y, Span::styled(format!("T{i}"), Color::LightGreen));
            }
            for robot in &snapshot.robots {
                for (i, &(x1, y1)) in robot.corners.iter().enumerate() {
                    let (x2, y2) = robot.corners[(i + 1) % robot.corners.len()];
                    ctx.draw(&CanvasLine::new(x1, y1, x2, y2, Color::Cyan));
                }
                for (i, (&(x, y), angle)) in robot.wheels.iter().zip(robot.wheel_angles).enumerate()
                {
                    let (sin_w, cos_w) = (robot.heading + angle).sin_cos();
                    ctx.draw(&CanvasLine::new(
                        x,
                        y,
                        x + 0.3 * cos_w,
                        y + 0.3 * sin_w,
                        wheel_color(i),
                    ));
                }
                if let Some((x, y)) = robot.icr {
                    ctx.draw(&Points {
                        coords: &[(x, y)],
                        color: Color::Magenta,
                    });
                }
            }
        })
}

fn status_line(snapshot: &Snapshot, paused: bool) -> impl Widget {
    let distances: Vec<String> = snapshot.distances.iter().map(|d| format!("{d:.2}")).collect();
    let mut lines = vec![Line::from(format!(
        "Episode: {} Step: {} Reward: {:.2} Distances: [{}]{}",
        snapshot.episode,
        snapshot.step,
        snapshot.reward,
        distances.join(", "),
        if paused { " (paused)" } else { "" },
    ))];
    lines.push(Line::from_iter(WHEEL_NAMES.iter().enumerate().map(|(i, name)| {
        Span::styled(format!("{name} "), wheel_color(i))
    })));
    Paragraph::new(lines).block(Block::bordered())
}
