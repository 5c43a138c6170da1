//! Current/high score bookkeeping and the submission handshake.
//!
//! `add` and `set` are local accumulation helpers and never touch the wire.
//! A submission is the only publish point: it emits `SCORE_SUBMIT` and then
//! waits, bounded by the ack timeout, for an optional `SCORE_ACK`. Whatever
//! ends the wait (ack, timeout, or a host that went away) counts as success.

use std::error::Error;
use std::fmt;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::{GuestMessage, ScoreSubmission};
use crate::runtime::storage::HighScoreCache;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScoreData {
    pub value: f64,
    pub metadata: Option<Value>,
}

impl ScoreData {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

impl From<f64> for ScoreData {
    fn from(value: f64) -> Self {
        Self::new(value)
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ScoreRecord {
    pub current: f64,
    pub high: f64,
}

/// How a submission's acknowledgment wait ended. Every variant is a
/// completed submission; the score was sent either way.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SubmitOutcome {
    Acknowledged,
    TimedOut,
    HostGone,
}

impl SubmitOutcome {
    /// Whether the host confirmed it received the score
    pub fn is_acknowledged(&self) -> bool {
        matches!(self, Self::Acknowledged)
    }
}

/// A second submission was attempted while one was still waiting
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SubmitInFlight;

impl fmt::Display for SubmitInFlight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("score submission already in progress")
    }
}

impl Error for SubmitInFlight {}

pub struct ScoreModule {
    record: ScoreRecord,
    saved_high: f64,
    ack_timeout: Duration,
    deadline: Option<Instant>,
    cache: Option<HighScoreCache>,
}

impl ScoreModule {
    pub fn new(ack_timeout: Duration, cache: Option<HighScoreCache>) -> Self {
        let high = cache.as_ref().map_or(0.0, load_high_score);

        Self {
            record: ScoreRecord { current: 0.0, high },
            saved_high: high,
            ack_timeout,
            deadline: None,
            cache,
        }
    }

    pub fn current(&self) -> f64 {
        self.record.current
    }

    pub fn high(&self) -> f64 {
        self.record.high
    }

    pub fn record(&self) -> ScoreRecord {
        self.record
    }

    pub fn ack_timeout(&self) -> Duration {
        self.ack_timeout
    }

    pub fn add(&mut self, delta: f64) -> f64 {
        if !delta.is_finite() {
            warn!("ignoring non-finite score delta {}", delta);
            return self.record.current;
        }

        self.record.current += delta;
        self.track_high();
        self.record.current
    }

    pub fn set(&mut self, value: f64) {
        if !value.is_finite() {
            warn!("ignoring non-finite score {}", value);
            return;
        }

        self.record.current = value;
        self.track_high();
    }

    /// Clears the current score; the high score survives
    pub fn reset(&mut self) {
        self.record.current = 0.0;
        debug!("score reset");
    }

    pub fn in_flight(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Records `data` as the current score and returns the `SCORE_SUBMIT` to
    /// send. The submission stays in flight until it is settled.
    pub fn begin_submit(
        &mut self,
        data: ScoreData,
        now: Instant,
    ) -> Result<GuestMessage, SubmitInFlight> {
        if self.in_flight() {
            debug!("score submission rejected; one is already in flight");
            return Err(SubmitInFlight);
        }

        if data.value.is_finite() {
            self.record.current = data.value;
            self.track_high();
        } else {
            warn!("submitting non-finite score {} as current", data.value);
        }
        self.persist_high_score();

        self.deadline = Some(now + self.ack_timeout);
        info!("score submitted: {}", self.record.current);

        Ok(GuestMessage::ScoreSubmit(ScoreSubmission {
            score: self.record.current,
            high_score: self.record.high,
            metadata: data.metadata,
        }))
    }

    /// Returns false when there was nothing waiting for the ack
    pub fn acknowledge(&mut self) -> bool {
        if self.deadline.take().is_some() {
            debug!("score acknowledged by host");
            true
        } else {
            debug!("ignoring SCORE_ACK with no submission in flight");
            false
        }
    }

    /// Settles an in-flight submission whose deadline has passed
    pub fn settle(&mut self, now: Instant) -> Option<SubmitOutcome> {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                debug!("score acknowledgment timed out; treating as success");
                Some(SubmitOutcome::TimedOut)
            }
            _ => None,
        }
    }

    /// Drops the in-flight submission without waiting any longer
    pub fn abandon(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    fn track_high(&mut self) {
        if self.record.current > self.record.high {
            self.record.high = self.record.current;
        }
    }

    fn persist_high_score(&mut self) {
        if self.record.high <= self.saved_high {
            return;
        }

        let Some(cache) = &self.cache else {
            return;
        };

        match cache.save(self.record.high) {
            Ok(()) => {
                self.saved_high = self.record.high;
                debug!("high score {} saved", self.record.high);
            }
            Err(err) => {
                warn!(
                    "failed to save high score to {}: {}",
                    cache.path().display(),
                    err
                );
            }
        }
    }
}

fn load_high_score(cache: &HighScoreCache) -> f64 {
    match cache.load() {
        Ok(Some(high)) => {
            debug!("high score {} loaded", high);
            high
        }
        Ok(None) => 0.0,
        Err(err) => {
            warn!(
                "ignoring unreadable high score at {}: {}",
                cache.path().display(),
                err
            );
            0.0
        }
    }
}
