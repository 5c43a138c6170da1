//! The guest half of the protocol.
//!
//! A [`Guest`] is constructed explicitly and handed to the game's entry
//! point; nothing here is a process-wide singleton, so a test can run
//! several guests side by side. All work happens on the caller's thread:
//! inbound host messages are applied when the game calls [`Guest::poll`]
//! (once per tick is typical), and the only operation that waits is the
//! bounded acknowledgment wait in [`Guest::send_score`].

pub mod assets;
pub mod lifecycle;
pub mod schema;
pub mod score;

pub use assets::*;
pub use lifecycle::*;
pub use schema::*;
pub use score::*;

use std::panic;
use std::sync::{Arc, Once};
use std::time::Instant;

use log::{debug, error, info, trace, warn};
use parking_lot::Mutex;

use crate::control::{
    ControlValue, GameSchema, Rejection, SchemaError, Subscription, ValueMap,
};
use crate::framework::config::GuestConfig;
use crate::framework::util::panic_message;
use crate::protocol::{
    ErrorReport, GuestMessage, HostMessage, PROTOCOL_VERSION, SdkReady,
    StateReport, decode_frame,
};
use crate::runtime::storage::HighScoreCache;
use crate::runtime::transport::{Inbox, Link, Port};

struct AnnounceRetry {
    next_at: Instant,
    remaining: u32,
}

pub struct Guest {
    port: Port,
    inbox: Inbox,
    config: GuestConfig,
    schema: SchemaModule,
    lifecycle: LifecycleModule,
    score: ScoreModule,
    assets: AssetsModule,
    host_seen: bool,
    announce_retry: Option<AnnounceRetry>,
    awaiting_ack: bool,
    settled: Vec<SubmitOutcome>,
    error_hook_installed: bool,
}

impl Guest {
    /// Wires the modules to `link` and announces `SDK_READY`
    pub fn new(link: Link, config: GuestConfig) -> Self {
        let Link { mut port, inbox } = link;
        port.set_verbose(config.debug);

        let cache = if config.persist_high_score {
            HighScoreCache::for_game(
                config.storage_dir.as_deref(),
                config.game_id.as_deref(),
            )
        } else {
            None
        };

        let guest = Self {
            port,
            inbox,
            schema: SchemaModule::new(),
            lifecycle: LifecycleModule::new(),
            score: ScoreModule::new(config.ack_timeout(), cache),
            assets: AssetsModule::new(Arc::new(FileLoader::default())),
            host_seen: false,
            announce_retry: None,
            awaiting_ack: false,
            settled: vec![],
            error_hook_installed: false,
            config,
        };

        guest.port.send(&GuestMessage::SdkReady(SdkReady {
            version: PROTOCOL_VERSION.to_string(),
            game_id: guest.config.game_id.clone(),
        }));
        info!(
            "guest ready (game: {})",
            guest.config.game_id.as_deref().unwrap_or("<unnamed>")
        );

        guest
    }

    /// Replaces where images are fetched from. Mappings made so far are kept
    /// only if this is called before any.
    pub fn with_asset_loader(mut self, loader: Arc<dyn AssetLoader>) -> Self {
        self.assets = AssetsModule::new(loader);
        self
    }

    pub fn config(&self) -> &GuestConfig {
        &self.config
    }

    /// False once the host side of the link has gone away
    pub fn is_connected(&self) -> bool {
        !self.inbox.is_disconnected()
    }

    /// Whether any host message has arrived yet
    pub fn host_seen(&self) -> bool {
        self.host_seen
    }

    // --- schema

    /// Declares the tunable surface, resets values to their defaults and
    /// announces `SCHEMA_DEFINED`. A malformed schema is returned as an
    /// error and also reported to the host as `SDK_ERROR`.
    pub fn define_schema(
        &mut self,
        schema: impl Into<GameSchema>,
    ) -> Result<(), SchemaError> {
        match self.schema.define(schema.into()) {
            Ok(announcement) => {
                self.port.send(&announcement);
                self.arm_announce_retry();
                Ok(())
            }
            Err(err) => {
                error!("schema rejected: {}", err);
                self.report_error(&format!("schema rejected: {}", err));
                Err(err)
            }
        }
    }

    pub fn update_value(
        &mut self,
        key: &str,
        value: impl Into<ControlValue>,
    ) -> Result<Applied, Rejection> {
        let result = self.schema.update_value(key, value.into());
        self.flush_faults();
        result
    }

    pub fn validate_value(
        &self,
        key: &str,
        value: &ControlValue,
    ) -> Result<(), Rejection> {
        self.schema.validate_value(key, value)
    }

    pub fn schema(&self) -> Option<&GameSchema> {
        self.schema.schema()
    }

    pub fn value(&self, key: &str) -> Option<&ControlValue> {
        self.schema.value(key)
    }

    pub fn all_values(&self) -> &ValueMap {
        self.schema.all_values()
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        self.schema.number(key)
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        self.schema.bool(key)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.schema.text(key)
    }

    /// Polling alternative to [`Self::on_update`]
    pub fn values_changed(&self) -> bool {
        self.schema.changed()
    }

    pub fn any_changed_in(&self, keys: &[&str]) -> bool {
        self.schema.any_changed_in(keys)
    }

    pub fn mark_unchanged(&mut self) {
        self.schema.mark_unchanged();
    }

    /// `callback` receives the full value map after every effective change
    pub fn on_update<F>(&mut self, callback: F) -> Subscription
    where
        F: FnMut(&ValueMap) + Send + 'static,
    {
        self.schema.on_update(callback)
    }

    pub fn off_update(&mut self, subscription: Subscription) -> bool {
        self.schema.off(subscription)
    }

    // --- lifecycle

    pub fn start(&mut self) {
        let message = self.lifecycle.start();
        self.emit(message);
    }

    pub fn pause(&mut self) {
        let message = self.lifecycle.pause();
        self.emit(message);
    }

    pub fn resume(&mut self) {
        let message = self.lifecycle.resume();
        self.emit(message);
    }

    /// Ends the run. Without `final_score` the current score is used.
    pub fn finish(&mut self, final_score: Option<f64>) {
        let final_score = final_score.unwrap_or(self.score.current());
        let message = self.lifecycle.finish(Some(final_score));
        self.emit(message);
    }

    /// Back to `idle` with a zeroed current score. The high score is kept.
    pub fn reset(&mut self) {
        self.lifecycle.reset();
        self.score.reset();
        self.flush_faults();
    }

    pub fn update_state(&mut self, level: Option<u32>, score: Option<f64>) {
        self.lifecycle.update_state(level, score);
        self.flush_faults();
    }

    pub fn state(&self) -> &GameState {
        self.lifecycle.state()
    }

    pub fn duration_ms(&self) -> u64 {
        self.lifecycle.duration_ms()
    }

    pub fn on_state_change<F>(&mut self, callback: F) -> Subscription
    where
        F: FnMut(&GameState) + Send + 'static,
    {
        self.lifecycle.on_update(callback)
    }

    pub fn off_state_change(&mut self, subscription: Subscription) -> bool {
        self.lifecycle.off(subscription)
    }

    // --- score

    pub fn add_score(&mut self, delta: f64) -> f64 {
        self.score.add(delta)
    }

    pub fn set_score(&mut self, value: f64) {
        self.score.set(value);
    }

    pub fn reset_score(&mut self) {
        self.score.reset();
    }

    pub fn score(&self) -> ScoreRecord {
        self.score.record()
    }

    pub fn score_in_flight(&self) -> bool {
        self.score.in_flight()
    }

    /// Publishes `data` and waits up to the configured ack timeout for
    /// `SCORE_ACK`, applying any other inbound traffic meanwhile. Every
    /// outcome is a success; only a concurrent submission is refused.
    pub fn send_score(
        &mut self,
        data: impl Into<ScoreData>,
    ) -> Result<SubmitOutcome, SubmitInFlight> {
        let message = self.score.begin_submit(data.into(), Instant::now())?;

        if !self.port.send(&message) {
            self.score.abandon();
            return Ok(SubmitOutcome::HostGone);
        }

        self.awaiting_ack = true;
        let outcome = self.wait_for_ack();
        self.awaiting_ack = false;
        self.flush_faults();

        Ok(outcome)
    }

    /// Publishes `data` without waiting. The outcome shows up in
    /// [`Self::take_settled`] after a later [`Self::poll`].
    pub fn submit_score(
        &mut self,
        data: impl Into<ScoreData>,
    ) -> Result<(), SubmitInFlight> {
        let message = self.score.begin_submit(data.into(), Instant::now())?;

        if !self.port.send(&message) {
            self.score.abandon();
            self.settled.push(SubmitOutcome::HostGone);
        }

        Ok(())
    }

    pub fn take_settled(&mut self) -> Vec<SubmitOutcome> {
        std::mem::take(&mut self.settled)
    }

    // --- assets

    pub fn map_assets(&mut self, mappings: Vec<AssetMapping>) {
        let manifest = self.assets.map_assets(mappings);
        self.port.send(&manifest);
    }

    pub fn asset_url<'a>(&'a self, original_id: &'a str) -> &'a str {
        self.assets.asset_url(original_id)
    }

    pub fn asset_mappings(&self) -> Vec<AssetMapping> {
        self.assets.mappings()
    }

    pub fn clear_mappings(&mut self) {
        self.assets.clear_mappings();
    }

    pub fn is_loaded(&self, original_id: &str) -> bool {
        self.assets.is_loaded(original_id)
    }

    pub fn load_image(
        &mut self,
        original_id: &str,
    ) -> Result<Arc<LoadedImage>, String> {
        let result = self.assets.load_image(original_id);
        self.flush_faults();
        result
    }

    pub fn load_images(
        &mut self,
        original_ids: &[&str],
    ) -> Vec<Result<Arc<LoadedImage>, String>> {
        let results = self.assets.load_images(original_ids);
        self.flush_faults();
        results
    }

    pub fn on_asset_load<F>(&mut self, callback: F) -> Subscription
    where
        F: FnMut(&AssetLoadEvent) + Send + 'static,
    {
        self.assets.on_asset_load(callback)
    }

    pub fn off_asset_load(&mut self, subscription: Subscription) -> bool {
        self.assets.off(subscription)
    }

    // --- errors

    pub fn report_error(&self, message: &str) {
        self.port.send(&GuestMessage::SdkError(ErrorReport {
            message: message.to_string(),
        }));
    }

    pub fn error_reporter(&self) -> ErrorReporter {
        ErrorReporter {
            port: Arc::new(Mutex::new(self.port.clone())),
        }
    }

    /// Forwards every panic on any thread to the host as `SDK_ERROR`. Caught
    /// callback panics are then reported by the hook alone. The hook is
    /// process-wide: installing again only retargets it to this guest.
    pub fn install_error_hook(&mut self) {
        install_error_hook(self.error_reporter());
        self.error_hook_installed = true;
    }

    // --- inbound

    /// Applies every queued host message, settles timed-out score
    /// submissions, lands finished preloads and retries the schema
    /// announcement when due. Returns the number of frames processed.
    pub fn poll(&mut self) -> usize {
        let frames = self.inbox.drain();
        let count = frames.len();

        for frame in frames {
            self.dispatch_frame(&frame);
        }

        self.assets.drain_preloaded();

        let now = Instant::now();
        if let Some(outcome) = self.score.settle(now) {
            self.settled.push(outcome);
        } else if self.inbox.is_disconnected() && self.score.abandon() {
            self.settled.push(SubmitOutcome::HostGone);
        }

        self.retry_announcement(now);
        self.flush_faults();

        count
    }

    fn wait_for_ack(&mut self) -> SubmitOutcome {
        loop {
            let Some(deadline) = self.score.deadline() else {
                return SubmitOutcome::Acknowledged;
            };

            let now = Instant::now();
            if self.score.settle(now).is_some() {
                return SubmitOutcome::TimedOut;
            }

            if self.inbox.is_disconnected() {
                self.score.abandon();
                return SubmitOutcome::HostGone;
            }

            if let Some(frame) = self.inbox.next_timeout(deadline - now) {
                self.dispatch_frame(&frame);
            }
        }
    }

    fn dispatch_frame(&mut self, frame: &str) {
        if self.config.debug {
            debug!("<- {}", frame);
        } else {
            trace!("<- {}", frame);
        }

        match decode_frame::<HostMessage>(frame) {
            Ok(Some(message)) => {
                if !self.host_seen {
                    debug!("host attached");
                }
                self.host_seen = true;
                self.announce_retry = None;
                self.handle(message);
            }
            Ok(None) => trace!("ignoring message outside the host vocabulary"),
            Err(err) => warn!("ignoring malformed host message: {}", err),
        }
    }

    fn handle(&mut self, message: HostMessage) {
        match message {
            HostMessage::UpdateVariable(update) => {
                let _ = self.schema.update_value(&update.key, update.value);
            }
            HostMessage::BulkUpdate(values) => {
                let outcome = self.schema.apply_bulk(values);
                for rejection in &outcome.rejected {
                    debug!("bulk update: {}", rejection);
                }
            }
            HostMessage::RequestSchema => self.announce_schema(),
            HostMessage::RequestState => {
                self.port.send(&GuestMessage::StateUpdate(StateReport {
                    lifecycle: self.lifecycle.state().clone(),
                    score: self.score.record(),
                }));
            }
            HostMessage::ResetGame => {
                info!("reset requested by host");
                self.lifecycle.reset();
                self.score.reset();
            }
            HostMessage::UpdateAssets(update) => {
                self.map_assets(update.mappings);
            }
            HostMessage::RequestAssets => {
                self.port.send(&self.assets.manifest());
            }
            HostMessage::ClearAssets => self.assets.clear_mappings(),
            HostMessage::ScoreAck => {
                if self.score.acknowledge() && !self.awaiting_ack {
                    self.settled.push(SubmitOutcome::Acknowledged);
                }
            }
            HostMessage::ParentReady => {
                info!("host announced ready");
                self.announce_schema();
            }
        }
    }

    fn announce_schema(&mut self) {
        match self.schema.announcement() {
            Some(announcement) => {
                self.port.send(&announcement);
            }
            None => debug!("no schema defined yet; nothing to announce"),
        }
    }

    fn arm_announce_retry(&mut self) {
        if self.host_seen || self.config.announce_retries == 0 {
            return;
        }

        self.announce_retry = Some(AnnounceRetry {
            next_at: Instant::now() + self.config.announce_retry(),
            remaining: self.config.announce_retries,
        });
    }

    fn retry_announcement(&mut self, now: Instant) {
        let Some(retry) = &mut self.announce_retry else {
            return;
        };

        if now < retry.next_at {
            return;
        }

        retry.remaining -= 1;
        retry.next_at = now + self.config.announce_retry();
        if retry.remaining == 0 {
            self.announce_retry = None;
        }

        debug!("no host message yet; re-announcing schema");
        self.announce_schema();
    }

    fn emit(&mut self, message: Option<GuestMessage>) {
        if let Some(message) = message {
            self.port.send(&message);
        }
        self.flush_faults();
    }

    /// Reports callback panics caught since the last flush
    fn flush_faults(&mut self) {
        let mut faults = self.schema.take_faults();
        faults.extend(self.lifecycle.take_faults());
        faults.extend(self.assets.take_faults());

        if self.error_hook_installed {
            return;
        }

        for fault in faults {
            self.report_error(&fault);
        }
    }
}

/// Cloneable, thread-safe handle that reports errors to the host
#[derive(Clone)]
pub struct ErrorReporter {
    port: Arc<Mutex<Port>>,
}

impl ErrorReporter {
    pub fn report(&self, message: &str) {
        self.port.lock().send(&GuestMessage::SdkError(ErrorReport {
            message: message.to_string(),
        }));
    }
}

static HOOK: Once = Once::new();
static HOOK_REPORTER: Mutex<Option<ErrorReporter>> =
    parking_lot::const_mutex(None);

/// Routes panics to `reporter`. The first call chains a panic hook in front
/// of the previously installed one; later calls only swap the reporter.
pub fn install_error_hook(reporter: ErrorReporter) {
    if HOOK_REPORTER.lock().replace(reporter).is_some() {
        debug!("error hook retargeted");
    }

    HOOK.call_once(|| {
        let previous = panic::take_hook();

        panic::set_hook(Box::new(move |info| {
            let reporter = HOOK_REPORTER.lock().clone();

            if let Some(reporter) = reporter {
                let location = info
                    .location()
                    .map(|location| {
                        format!(" at {}:{}", location.file(), location.line())
                    })
                    .unwrap_or_default();

                reporter.report(&format!(
                    "panic: {}{}",
                    panic_message(info.payload()),
                    location
                ));
            }

            previous(info);
        }));
    });
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::control::SchemaProperty;
    use crate::protocol::{Envelope, VariableUpdate, kind};
    use crate::runtime::transport::local_pair;

    fn config() -> GuestConfig {
        GuestConfig {
            ack_timeout_ms: 30,
            announce_retry_ms: 10,
            announce_retries: 2,
            persist_high_score: false,
            ..GuestConfig::default()
        }
    }

    fn kinds(host: &mut Link) -> Vec<String> {
        host.inbox
            .drain()
            .iter()
            .map(|frame| Envelope::from_frame(frame).unwrap().kind)
            .collect()
    }

    #[test]
    fn test_announces_ready_on_construction() {
        let (guest_link, mut host) = local_pair();
        let _guest = Guest::new(guest_link, config());
        assert_eq!(kinds(&mut host), vec![kind::SDK_READY]);
    }

    #[test]
    fn test_duplicate_schema_is_reported() {
        let (guest_link, mut host) = local_pair();
        let mut guest = Guest::new(guest_link, config());
        host.inbox.drain();

        let result = guest.define_schema(vec![
            SchemaProperty::number("gravity", 0.6),
            SchemaProperty::number("gravity", 0.7),
        ]);

        assert!(result.is_err());
        assert_eq!(kinds(&mut host), vec![kind::SDK_ERROR]);
    }

    #[test]
    fn test_host_update_is_applied_on_poll() {
        let (guest_link, host) = local_pair();
        let mut guest = Guest::new(guest_link, config());
        guest
            .define_schema(vec![SchemaProperty::number("gravity", 0.6)])
            .unwrap();

        host.port.send(&HostMessage::UpdateVariable(VariableUpdate {
            key: "gravity".into(),
            value: 1.2.into(),
        }));
        assert_eq!(guest.poll(), 1);
        assert_eq!(guest.number("gravity"), Some(1.2));
    }

    #[test]
    fn test_reannounces_until_host_speaks() {
        let (guest_link, mut host) = local_pair();
        let mut guest = Guest::new(guest_link, config());
        guest
            .define_schema(vec![SchemaProperty::number("gravity", 0.6)])
            .unwrap();
        assert_eq!(
            kinds(&mut host),
            vec![kind::SDK_READY, kind::SCHEMA_DEFINED]
        );

        for _ in 0..5 {
            std::thread::sleep(Duration::from_millis(15));
            guest.poll();
        }

        // announce_retries caps the resends
        assert_eq!(kinds(&mut host), vec![kind::SCHEMA_DEFINED; 2]);
    }

    #[test]
    fn test_parent_ready_triggers_announcement() {
        let (guest_link, mut host) = local_pair();
        let mut guest = Guest::new(guest_link, GuestConfig {
            announce_retries: 0,
            ..config()
        });
        guest
            .define_schema(vec![SchemaProperty::number("gravity", 0.6)])
            .unwrap();
        host.inbox.drain();

        host.port.send(&HostMessage::ParentReady);
        guest.poll();

        assert!(guest.host_seen());
        assert_eq!(kinds(&mut host), vec![kind::SCHEMA_DEFINED]);
    }

    #[test]
    fn test_reset_game_keeps_high_score() {
        let (guest_link, host) = local_pair();
        let mut guest = Guest::new(guest_link, config());
        guest.start();
        guest.add_score(40.0);

        host.port.send(&HostMessage::ResetGame);
        guest.poll();

        assert_eq!(guest.state().status, GameStatus::Idle);
        assert_eq!(guest.score(), ScoreRecord {
            current: 0.0,
            high: 40.0
        });
    }

    #[test]
    fn test_unknown_and_malformed_frames_are_ignored() {
        let (guest_link, host) = local_pair();
        let mut guest = Guest::new(guest_link, config());

        host.port.send_envelope(&Envelope::new(
            "SOMETHING_NEW",
            serde_json::json!({"x": 1}),
        ));
        host.port.send_envelope(&Envelope::new(
            kind::UPDATE_VARIABLE,
            serde_json::json!("not an object"),
        ));

        assert_eq!(guest.poll(), 2);
        assert!(!guest.host_seen());
    }

    #[test]
    fn test_blocking_send_resolves_on_timeout() {
        let (guest_link, _host) = local_pair();
        let mut guest = Guest::new(guest_link, config());

        let started = Instant::now();
        let outcome = guest.send_score(50.0).unwrap();

        assert_eq!(outcome, SubmitOutcome::TimedOut);
        assert!(!outcome.is_acknowledged());
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert!(!guest.score_in_flight());
    }

    #[test]
    fn test_blocking_send_resolves_on_ack() {
        let (guest_link, host) = local_pair();
        let mut guest = Guest::new(guest_link, GuestConfig {
            ack_timeout_ms: 5_000,
            ..config()
        });

        // Queued before the submission; picked up by the wait loop
        host.port.send(&HostMessage::ScoreAck);

        let started = Instant::now();
        assert_eq!(guest.send_score(5.0), Ok(SubmitOutcome::Acknowledged));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_submit_settles_on_poll_and_rejects_overlap() {
        let (guest_link, _host) = local_pair();
        let mut guest = Guest::new(guest_link, config());

        guest.submit_score(10.0).unwrap();
        assert_eq!(guest.submit_score(20.0), Err(SubmitInFlight));

        guest.poll();
        assert!(guest.take_settled().is_empty());

        std::thread::sleep(Duration::from_millis(40));
        guest.poll();
        assert_eq!(guest.take_settled(), vec![SubmitOutcome::TimedOut]);
        assert!(guest.submit_score(20.0).is_ok());
    }

    #[test]
    fn test_callback_panic_becomes_sdk_error() {
        let (guest_link, mut host) = local_pair();
        let mut guest = Guest::new(guest_link, config());
        guest.on_state_change(|_| panic!("listener blew up"));
        host.inbox.drain();

        guest.start();

        assert_eq!(
            kinds(&mut host),
            vec![kind::GAME_START, kind::SDK_ERROR]
        );
        assert_eq!(guest.state().status, GameStatus::Playing);
    }

    #[test]
    fn test_finish_uses_current_score() {
        let (guest_link, mut host) = local_pair();
        let mut guest = Guest::new(guest_link, config());
        guest.start();
        guest.add_score(12.0);
        guest.finish(None);
        guest.finish(Some(99.0));

        let frames = host.inbox.drain();
        let ends: Vec<_> = frames
            .iter()
            .filter_map(|frame| decode_frame::<GuestMessage>(frame).ok())
            .flatten()
            .filter_map(|message| match message {
                GuestMessage::GameEnd(ended) => Some(ended.final_score),
                _ => None,
            })
            .collect();
        assert_eq!(ends, vec![12.0]);
    }
}
