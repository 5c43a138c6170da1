//! A headless flappy-bird round driven entirely by tunable parameters.
//!
//! The bird sits at a fixed `x` while pipes scroll toward it. Every frame
//! reads `gravity`, `flap_strength`, `pipe_speed` and `gap_size` from the
//! guest, so host edits land on the very next tick.

use livetune::prelude::*;

pub const GAME_ID: &str = "flappy";
pub const BIRD_SPRITE: &str = "bird.png";

const SCHEMA_YAML: &str = include_str!("flappy.yaml");

const WIDTH: f64 = 160.0;
const HEIGHT: f64 = 100.0;
const BIRD_X: f64 = 20.0;
const BIRD_RADIUS: f64 = 2.0;
const PIPE_WIDTH: f64 = 10.0;
const PIPE_SPACING: f64 = 60.0;
const GAP_OFFSETS: [f64; 8] = [0.0, -12.0, 8.0, 15.0, -6.0, -18.0, 4.0, 12.0];

pub fn schema() -> Result<GameSchema, String> {
    GameSchema::from_yaml_str(SCHEMA_YAML)
}

#[derive(Clone, Debug, PartialEq)]
struct Pipe {
    x: f64,
    gap_center: f64,
    passed: bool,
}

impl Pipe {
    fn spawn(index: usize) -> Self {
        Self {
            x: WIDTH,
            gap_center: HEIGHT / 2.0 + GAP_OFFSETS[index % GAP_OFFSETS.len()],
            passed: false,
        }
    }

    fn overlaps_bird(&self) -> bool {
        self.x <= BIRD_X + BIRD_RADIUS
            && self.x + PIPE_WIDTH >= BIRD_X - BIRD_RADIUS
    }
}

struct Tuning {
    gravity: f64,
    flap_strength: f64,
    pipe_speed: f64,
    gap_size: f64,
    autopilot: bool,
}

impl Tuning {
    fn read(guest: &Guest) -> Self {
        Self {
            gravity: guest.number("gravity").unwrap_or(0.35),
            flap_strength: guest.number("flap_strength").unwrap_or(4.5),
            pipe_speed: guest.number("pipe_speed").unwrap_or(2.0),
            gap_size: guest.number("gap_size").unwrap_or(28.0),
            autopilot: guest.bool("autopilot").unwrap_or(true),
        }
    }
}

#[derive(Debug)]
pub struct Flappy {
    bird_y: f64,
    velocity: f64,
    pipes: Vec<Pipe>,
    spawned: usize,
    frame: u64,
}

impl Default for Flappy {
    fn default() -> Self {
        Self::new()
    }
}

impl Flappy {
    pub fn new() -> Self {
        Self {
            bird_y: HEIGHT / 2.0,
            velocity: 0.0,
            pipes: vec![Pipe::spawn(0)],
            spawned: 1,
            frame: 0,
        }
    }

    pub fn bird_y(&self) -> f64 {
        self.bird_y
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Advances one frame. An idle guest (fresh, or reset by the host)
    /// starts a new round; paused and finished rounds stand still.
    pub fn tick(&mut self, guest: &mut Guest) {
        match guest.state().status {
            GameStatus::Idle => {
                *self = Self::new();
                debug!("new round, bird sprite: {}", guest.asset_url(BIRD_SPRITE));
                guest.start();
            }
            GameStatus::Playing => {}
            GameStatus::Paused | GameStatus::Finished => return,
        }

        if guest.values_changed() {
            debug!("tuning changed: {:?}", guest.all_values());
            guest.mark_unchanged();
        }

        let tuning = Tuning::read(guest);
        self.frame += 1;
        self.advance_bird(&tuning);
        let passed = self.advance_pipes(&tuning);

        if passed > 0 {
            guest.add_score(passed as f64);
        }

        if self.crashed(&tuning) {
            debug!(
                "crashed on frame {} at y={:.1}",
                self.frame, self.bird_y
            );
            guest.finish(None);
        }
    }

    fn advance_bird(&mut self, tuning: &Tuning) {
        self.velocity += tuning.gravity;

        if tuning.autopilot && self.velocity > 0.0 {
            let target = self
                .next_pipe()
                .map_or(HEIGHT / 2.0, |pipe| pipe.gap_center);
            if self.bird_y > target + tuning.gap_size / 6.0 {
                self.velocity = -tuning.flap_strength;
            }
        }

        self.bird_y += self.velocity;
    }

    /// Returns how many pipes the bird cleared this frame
    fn advance_pipes(&mut self, tuning: &Tuning) -> usize {
        let mut passed = 0;

        for pipe in &mut self.pipes {
            pipe.x -= tuning.pipe_speed;
            if !pipe.passed && pipe.x + PIPE_WIDTH < BIRD_X {
                pipe.passed = true;
                passed += 1;
            }
        }

        self.pipes.retain(|pipe| pipe.x + PIPE_WIDTH >= 0.0);

        let needs_pipe = self
            .pipes
            .last()
            .is_none_or(|pipe| pipe.x < WIDTH - PIPE_SPACING);
        if needs_pipe {
            self.pipes.push(Pipe::spawn(self.spawned));
            self.spawned += 1;
        }

        passed
    }

    fn next_pipe(&self) -> Option<&Pipe> {
        self.pipes
            .iter()
            .find(|pipe| pipe.x + PIPE_WIDTH >= BIRD_X - BIRD_RADIUS)
    }

    fn crashed(&self, tuning: &Tuning) -> bool {
        if self.bird_y - BIRD_RADIUS < 0.0 || self.bird_y + BIRD_RADIUS > HEIGHT
        {
            return true;
        }

        let clearance = tuning.gap_size / 2.0 - BIRD_RADIUS;
        self.pipes.iter().any(|pipe| {
            pipe.overlaps_bird()
                && (self.bird_y - pipe.gap_center).abs() > clearance
        })
    }
}
