//! Run-state machine for a single guest session.
//!
//! ```md
//! idle --start--> playing --pause--> paused
//!                 playing <--resume- paused
//! playing|paused --finish--> finished
//! any --reset--> idle
//! ```
//! Transitions whose precondition does not hold are ignored and logged.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::control::{Observers, Subscription};
use crate::framework::util::now_ms;
use crate::protocol::{GameEnded, GuestMessage};

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Serialize, Eq, PartialEq, Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    #[default]
    Idle,
    Playing,
    Paused,
    Finished,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct GameState {
    pub status: GameStatus,
    pub score: f64,
    pub level: u32,
    pub timestamp: u64,
}

impl GameState {
    pub fn fresh(timestamp: u64) -> Self {
        Self {
            status: GameStatus::Idle,
            score: 0.0,
            level: 1,
            timestamp,
        }
    }
}

impl Default for GameState {
    fn default() -> Self {
        Self::fresh(0)
    }
}

pub struct LifecycleModule {
    state: GameState,
    start_time: Option<u64>,
    end_time: Option<u64>,
    clock: fn() -> u64,
    observers: Observers<GameState>,
}

impl Default for LifecycleModule {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleModule {
    pub fn new() -> Self {
        Self::with_clock(now_ms)
    }

    /// Uses `clock` for every timestamp instead of the wall clock
    pub fn with_clock(clock: fn() -> u64) -> Self {
        Self {
            state: GameState::fresh(clock()),
            start_time: None,
            end_time: None,
            clock,
            observers: Observers::new("lifecycle"),
        }
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn status(&self) -> GameStatus {
        self.state.status
    }

    pub fn start(&mut self) -> Option<GuestMessage> {
        if self.state.status == GameStatus::Playing {
            debug!("start ignored; already playing");
            return None;
        }

        let now = (self.clock)();
        self.start_time = Some(now);
        self.end_time = None;
        self.transition(GameStatus::Playing, now);
        info!("game started");

        Some(GuestMessage::GameStart)
    }

    pub fn pause(&mut self) -> Option<GuestMessage> {
        if self.state.status != GameStatus::Playing {
            debug!("pause ignored; status is {:?}", self.state.status);
            return None;
        }

        let now = (self.clock)();
        self.transition(GameStatus::Paused, now);
        Some(GuestMessage::GamePause)
    }

    pub fn resume(&mut self) -> Option<GuestMessage> {
        if self.state.status != GameStatus::Paused {
            debug!("resume ignored; status is {:?}", self.state.status);
            return None;
        }

        let now = (self.clock)();
        self.transition(GameStatus::Playing, now);
        Some(GuestMessage::GameResume)
    }

    /// Terminal transition. The first call wins; `final_score` falls back to
    /// the score already held in the state.
    pub fn finish(&mut self, final_score: Option<f64>) -> Option<GuestMessage> {
        if self.state.status == GameStatus::Finished {
            debug!("finish ignored; already finished");
            return None;
        }

        let now = (self.clock)();
        self.end_time = Some(now);
        self.state.score = final_score.unwrap_or(self.state.score);
        self.transition(GameStatus::Finished, now);

        let ended = GameEnded {
            final_score: self.state.score,
            duration: self.duration_ms(),
            level: self.state.level,
        };
        info!(
            "game finished: score {} after {}ms",
            ended.final_score, ended.duration
        );

        Some(GuestMessage::GameEnd(ended))
    }

    /// Legal from every state
    pub fn reset(&mut self) {
        self.start_time = None;
        self.end_time = None;
        self.state = GameState::fresh((self.clock)());
        debug!("lifecycle reset");
        self.observers.notify(&self.state);
    }

    /// Records progress reported by game code without changing status
    pub fn update_state(&mut self, level: Option<u32>, score: Option<f64>) {
        if let Some(level) = level {
            self.state.level = level;
        }
        if let Some(score) = score {
            self.state.score = score;
        }
        self.state.timestamp = (self.clock)();
        self.observers.notify(&self.state);
    }

    /// Frozen once finished, live while running, 0 before the first start
    pub fn duration_ms(&self) -> u64 {
        let Some(start_time) = self.start_time else {
            return 0;
        };

        let end_time = self.end_time.unwrap_or_else(|| (self.clock)());
        end_time.saturating_sub(start_time)
    }

    pub fn on_update<F>(&mut self, callback: F) -> Subscription
    where
        F: FnMut(&GameState) + Send + 'static,
    {
        self.observers.subscribe(callback)
    }

    pub fn off(&mut self, subscription: Subscription) -> bool {
        self.observers.unsubscribe(subscription)
    }

    pub fn take_faults(&mut self) -> Vec<String> {
        self.observers.take_faults()
    }

    fn transition(&mut self, status: GameStatus, now: u64) {
        self.state.status = status;
        self.state.timestamp = now;
        self.observers.notify(&self.state);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::sync::{Arc, Mutex};

    use super::*;

    thread_local! {
        static NOW: Cell<u64> = const { Cell::new(1_000) };
    }

    fn fake_clock() -> u64 {
        NOW.with(|now| now.get())
    }

    fn advance(ms: u64) {
        NOW.with(|now| now.set(now.get() + ms));
    }

    fn recorded(
        lifecycle: &mut LifecycleModule,
    ) -> Arc<Mutex<Vec<GameStatus>>> {
        let seen = Arc::new(Mutex::new(vec![]));
        let sink = seen.clone();
        lifecycle.on_update(move |state| {
            sink.lock().unwrap().push(state.status);
        });
        seen
    }

    #[test]
    fn test_double_start_emits_once() {
        let mut lifecycle = LifecycleModule::with_clock(fake_clock);
        let seen = recorded(&mut lifecycle);

        assert_eq!(lifecycle.start(), Some(GuestMessage::GameStart));
        assert_eq!(lifecycle.start(), None);

        assert_eq!(*seen.lock().unwrap(), vec![GameStatus::Playing]);
    }

    #[test]
    fn test_pause_and_resume_preconditions() {
        let mut lifecycle = LifecycleModule::with_clock(fake_clock);

        assert_eq!(lifecycle.pause(), None);
        assert_eq!(lifecycle.resume(), None);

        lifecycle.start();
        assert_eq!(lifecycle.resume(), None);
        assert_eq!(lifecycle.pause(), Some(GuestMessage::GamePause));
        assert_eq!(lifecycle.pause(), None);
        assert_eq!(lifecycle.resume(), Some(GuestMessage::GameResume));
        assert_eq!(lifecycle.status(), GameStatus::Playing);
    }

    #[test]
    fn test_first_finish_wins() {
        let mut lifecycle = LifecycleModule::with_clock(fake_clock);
        let seen = recorded(&mut lifecycle);

        lifecycle.start();
        advance(250);

        let Some(GuestMessage::GameEnd(ended)) = lifecycle.finish(Some(10.0))
        else {
            panic!("expected GAME_END");
        };
        assert_eq!(ended.final_score, 10.0);
        assert_eq!(ended.duration, 250);
        assert_eq!(ended.level, 1);

        advance(100);
        assert_eq!(lifecycle.finish(Some(20.0)), None);
        assert_eq!(lifecycle.state().score, 10.0);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![GameStatus::Playing, GameStatus::Finished]
        );
    }

    #[test]
    fn test_finish_falls_back_to_state_score() {
        let mut lifecycle = LifecycleModule::with_clock(fake_clock);
        lifecycle.start();
        lifecycle.update_state(Some(3), Some(42.0));

        let Some(GuestMessage::GameEnd(ended)) = lifecycle.finish(None) else {
            panic!("expected GAME_END");
        };
        assert_eq!(ended.final_score, 42.0);
        assert_eq!(ended.level, 3);
    }

    #[test]
    fn test_reset_from_every_state() {
        let drive: [fn(&mut LifecycleModule); 4] = [
            |_| {},
            |l| {
                l.start();
            },
            |l| {
                l.start();
                l.pause();
            },
            |l| {
                l.start();
                l.finish(Some(5.0));
            },
        ];

        for setup in drive {
            let mut lifecycle = LifecycleModule::with_clock(fake_clock);
            lifecycle.update_state(Some(4), Some(9.0));
            setup(&mut lifecycle);
            lifecycle.reset();

            let state = lifecycle.state();
            assert_eq!(state.status, GameStatus::Idle);
            assert_eq!(state.score, 0.0);
            assert_eq!(state.level, 1);
            assert_eq!(lifecycle.duration_ms(), 0);
        }
    }

    #[test]
    fn test_duration_is_live_then_frozen() {
        let mut lifecycle = LifecycleModule::with_clock(fake_clock);
        assert_eq!(lifecycle.duration_ms(), 0);

        lifecycle.start();
        advance(40);
        assert_eq!(lifecycle.duration_ms(), 40);
        advance(60);
        assert_eq!(lifecycle.duration_ms(), 100);

        lifecycle.finish(None);
        advance(500);
        assert_eq!(lifecycle.duration_ms(), 100);
    }

    #[test]
    fn test_start_after_finish_begins_a_new_run() {
        let mut lifecycle = LifecycleModule::with_clock(fake_clock);
        lifecycle.start();
        advance(10);
        lifecycle.finish(None);

        advance(1_000);
        assert_eq!(lifecycle.start(), Some(GuestMessage::GameStart));
        advance(5);
        assert_eq!(lifecycle.duration_ms(), 5);
    }

    #[test]
    fn test_off_releases_callback() {
        let mut lifecycle = LifecycleModule::with_clock(fake_clock);
        let seen = Arc::new(Mutex::new(0));
        let sink = seen.clone();
        let subscription = lifecycle.on_update(move |_| {
            *sink.lock().unwrap() += 1;
        });

        lifecycle.start();
        assert!(lifecycle.off(subscription));
        lifecycle.pause();

        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn test_wire_shape() {
        let state = GameState::fresh(7);
        let raw = serde_json::to_value(&state).unwrap();
        assert_eq!(raw["status"], "idle");
        assert_eq!(raw["level"], 1);
        assert_eq!(raw["timestamp"], 7);
    }
}
