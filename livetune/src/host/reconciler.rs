use std::time::Instant;

use log::{debug, info, trace, warn};

use super::mirror::GuestMirror;
use crate::control::{ControlValue, GameSchema, Rejection, ValueMap};
use crate::framework::config::HostConfig;
use crate::guest::{AssetMapping, GameState, GameStatus, ScoreRecord};
use crate::protocol::{
    AssetUpdate, GameEnded, GuestMessage, HostMessage, ScoreSubmission,
    SdkReady, VariableUpdate, decode_frame,
};
use crate::runtime::transport::{Inbox, Link, Port};

/// What changed in the mirror, for the UI to react to
#[derive(Clone, Debug, PartialEq)]
pub enum HostEvent {
    GuestReady(SdkReady),
    SchemaChanged(GameSchema),
    StatusChanged(GameStatus),
    StateReported(GameState),
    ScoreSubmitted(ScoreSubmission),
    GameEnded(GameEnded),
    AssetsChanged(Vec<AssetMapping>),
    GuestError(String),
    Disconnected,
}

/// Host-side reconciler: mirrors what the guest announces and turns user
/// edits into partial updates.
///
/// Edits made before any schema has been mirrored are queued and sent, after
/// validation, as soon as the schema arrives.
pub struct Host {
    port: Port,
    inbox: Inbox,
    config: HostConfig,
    mirror: GuestMirror,
    attached_at: Instant,
    schema_requested: bool,
    queued_edits: ValueMap,
    disconnect_reported: bool,
}

impl Host {
    pub fn new(link: Link, config: HostConfig) -> Self {
        Self {
            port: link.port,
            inbox: link.inbox,
            config,
            mirror: GuestMirror::default(),
            attached_at: Instant::now(),
            schema_requested: false,
            queued_edits: ValueMap::new(),
            disconnect_reported: false,
        }
    }

    pub fn mirror(&self) -> &GuestMirror {
        &self.mirror
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        !self.inbox.is_disconnected()
    }

    /// Applies every queued guest message to the mirror and returns what
    /// changed, in arrival order.
    pub fn poll(&mut self) -> Vec<HostEvent> {
        let mut events = vec![];

        for frame in self.inbox.drain() {
            trace!("<- {}", frame);
            match decode_frame::<GuestMessage>(&frame) {
                Ok(Some(message)) => self.apply(message, &mut events),
                Ok(None) => trace!("ignoring message outside the guest vocabulary"),
                Err(err) => warn!("ignoring malformed guest message: {}", err),
            }
        }

        self.request_schema_if_overdue();

        if self.inbox.is_disconnected() && !self.disconnect_reported {
            self.disconnect_reported = true;
            info!("guest disconnected");
            events.push(HostEvent::Disconnected);
        }

        events
    }

    /// Sends one edit and records it in the mirror. With `validate_edits`
    /// the mirrored schema must accept it first; the guest validates again
    /// regardless and does not answer a refusal, so without validation the
    /// mirror can hold a value the guest dropped until the schema is
    /// re-announced.
    pub fn set_value(
        &mut self,
        key: &str,
        value: impl Into<ControlValue>,
    ) -> Result<(), Rejection> {
        let value = value.into();

        if self.mirror.schema.is_none() {
            debug!("queueing `{}` until the guest announces a schema", key);
            self.queued_edits.insert(key.to_string(), value);
            return Ok(());
        }

        self.check_edit(key, &value)?;
        self.mirror.values.insert(key.to_string(), value.clone());
        self.port.send(&HostMessage::UpdateVariable(VariableUpdate {
            key: key.to_string(),
            value,
        }));

        Ok(())
    }

    /// Sends every acceptable entry as one `BULK_UPDATE` and returns the
    /// rejected ones.
    pub fn set_values(&mut self, values: ValueMap) -> Vec<Rejection> {
        if self.mirror.schema.is_none() {
            debug!("queueing {} edits until a schema arrives", values.len());
            self.queued_edits.extend(values);
            return vec![];
        }

        let mut accepted = ValueMap::new();
        let mut rejected = vec![];

        for (key, value) in values {
            match self.check_edit(&key, &value) {
                Ok(()) => {
                    accepted.insert(key, value);
                }
                Err(rejection) => rejected.push(rejection),
            }
        }

        if !accepted.is_empty() {
            self.mirror.values.extend(accepted.clone());
            self.port.send(&HostMessage::BulkUpdate(accepted.into()));
        }

        rejected
    }

    pub fn request_schema(&mut self) {
        self.schema_requested = true;
        self.port.send(&HostMessage::RequestSchema);
    }

    pub fn request_state(&self) {
        self.port.send(&HostMessage::RequestState);
    }

    /// The mirror moves to idle right away. The guest honors a reset from
    /// any status, and `request_state` reads back what it actually holds.
    pub fn reset_game(&mut self) {
        self.mirror.state = GameState::fresh(self.mirror.state.timestamp);
        self.mirror.score.current = 0.0;
        self.port.send(&HostMessage::ResetGame);
    }

    pub fn update_assets(&self, mappings: Vec<AssetMapping>) {
        self.port
            .send(&HostMessage::UpdateAssets(AssetUpdate { mappings }));
    }

    pub fn request_assets(&self) {
        self.port.send(&HostMessage::RequestAssets);
    }

    pub fn clear_assets(&mut self) {
        self.mirror.assets.clear();
        self.port.send(&HostMessage::ClearAssets);
    }

    pub fn acknowledge_score(&self) {
        self.port.send(&HostMessage::ScoreAck);
    }

    /// Tells the guest a host is listening; it answers with its schema
    pub fn announce_ready(&self) {
        self.port.send(&HostMessage::ParentReady);
    }

    fn check_edit(
        &self,
        key: &str,
        value: &ControlValue,
    ) -> Result<(), Rejection> {
        if !self.config.validate_edits {
            return Ok(());
        }

        match &self.mirror.schema {
            Some(schema) => schema.validate(key, value).inspect_err(|err| {
                debug!("edit refused locally: {}", err);
            }),
            None => Ok(()),
        }
    }

    fn apply(&mut self, message: GuestMessage, events: &mut Vec<HostEvent>) {
        match message {
            GuestMessage::SdkReady(ready) => {
                info!(
                    "guest ready: protocol {} ({})",
                    ready.version,
                    ready.game_id.as_deref().unwrap_or("<unnamed>")
                );
                self.mirror.ready = Some(ready.clone());
                events.push(HostEvent::GuestReady(ready));
            }
            GuestMessage::SchemaDefined(announcement) => {
                info!(
                    "schema received: {} properties",
                    announcement.schema.properties.len()
                );
                self.mirror.values = announcement.current_values;
                self.mirror.schema = Some(announcement.schema.clone());
                events.push(HostEvent::SchemaChanged(announcement.schema));
                self.flush_queued_edits();
            }
            GuestMessage::ScoreSubmit(submission) => {
                self.mirror.score = ScoreRecord {
                    current: submission.score,
                    high: submission.high_score.max(self.mirror.score.high),
                };
                if self.config.auto_ack_scores {
                    self.acknowledge_score();
                }
                events.push(HostEvent::ScoreSubmitted(submission));
            }
            GuestMessage::GameStart => {
                self.mirror.last_result = None;
                self.set_status(GameStatus::Playing, events);
            }
            GuestMessage::GamePause => {
                self.set_status(GameStatus::Paused, events);
            }
            GuestMessage::GameResume => {
                self.set_status(GameStatus::Playing, events);
            }
            GuestMessage::GameEnd(ended) => {
                self.mirror.state.score = ended.final_score;
                self.mirror.state.level = ended.level;
                self.mirror.last_result = Some(ended.clone());
                self.set_status(GameStatus::Finished, events);
                events.push(HostEvent::GameEnded(ended));
            }
            GuestMessage::AssetsManifest(manifest) => {
                self.mirror.assets = manifest.assets.clone();
                events.push(HostEvent::AssetsChanged(manifest.assets));
            }
            GuestMessage::StateUpdate(report) => {
                self.mirror.state = report.lifecycle.clone();
                self.mirror.score = report.score;
                events.push(HostEvent::StateReported(report.lifecycle));
            }
            GuestMessage::SdkError(report) => {
                warn!("guest error: {}", report.message);
                self.mirror.last_error = Some(report.message.clone());
                events.push(HostEvent::GuestError(report.message));
            }
        }
    }

    /// Duplicate lifecycle messages (a guest replaying after a reconnect)
    /// leave the mirror as is and produce no event.
    fn set_status(&mut self, status: GameStatus, events: &mut Vec<HostEvent>) {
        if self.mirror.state.status == status {
            return;
        }
        self.mirror.state.status = status;
        events.push(HostEvent::StatusChanged(status));
    }

    fn flush_queued_edits(&mut self) {
        if self.queued_edits.is_empty() {
            return;
        }

        let queued = std::mem::take(&mut self.queued_edits);
        debug!("sending {} queued edits", queued.len());

        for rejection in self.set_values(queued) {
            warn!("dropping queued edit: {}", rejection);
        }
    }

    fn request_schema_if_overdue(&mut self) {
        if self.mirror.schema.is_some() || self.schema_requested {
            return;
        }

        if self.attached_at.elapsed() >= self.config.schema_request_after() {
            debug!("no schema announced yet; requesting one");
            self.request_schema();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::control::SchemaProperty;
    use crate::protocol::{SchemaAnnouncement, kind};
    use crate::runtime::transport::local_pair;

    fn announce(guest: &Link, schema: GameSchema) {
        guest.port.send(&GuestMessage::SchemaDefined(SchemaAnnouncement {
            current_values: schema.defaults(),
            schema,
        }));
    }

    fn sent(guest: &mut Link) -> Vec<HostMessage> {
        guest
            .inbox
            .drain()
            .iter()
            .filter_map(|frame| decode_frame::<HostMessage>(frame).ok())
            .flatten()
            .collect()
    }

    fn speed_schema() -> GameSchema {
        GameSchema::new(vec![SchemaProperty::range(
            "speed",
            5.0,
            (1.0, 10.0),
            1.0,
        )])
    }

    #[test]
    fn test_schema_is_mirrored() {
        let (guest, host_link) = local_pair();
        let mut host = Host::new(host_link, HostConfig::default());

        announce(&guest, speed_schema());
        let events = host.poll();

        assert_eq!(events, vec![HostEvent::SchemaChanged(speed_schema())]);
        assert_eq!(
            host.mirror().value("speed"),
            Some(&ControlValue::Number(5.0))
        );
        assert_eq!(host.mirror().controls().len(), 1);
    }

    #[test]
    fn test_edits_are_prevalidated() {
        let (mut guest, host_link) = local_pair();
        let mut host = Host::new(host_link, HostConfig::default());
        announce(&guest, speed_schema());
        host.poll();

        assert!(host.set_value("speed", 99.0).is_err());
        assert!(host.set_value("speed", 7.0).is_ok());

        assert_eq!(
            sent(&mut guest),
            vec![HostMessage::UpdateVariable(VariableUpdate {
                key: "speed".into(),
                value: 7.0.into(),
            })]
        );
    }

    #[test]
    fn test_unvalidated_edits_pass_through() {
        let (mut guest, host_link) = local_pair();
        let mut host = Host::new(host_link, HostConfig {
            validate_edits: false,
            ..HostConfig::default()
        });
        announce(&guest, speed_schema());
        host.poll();

        assert!(host.set_value("speed", 99.0).is_ok());
        assert_eq!(sent(&mut guest).len(), 1);
    }

    #[test]
    fn test_edits_before_schema_are_queued() {
        let (mut guest, host_link) = local_pair();
        let mut host = Host::new(host_link, HostConfig {
            schema_request_after_ms: 60_000,
            ..HostConfig::default()
        });

        host.set_value("speed", 3.0).unwrap();
        host.set_value("ghost", 1.0).unwrap();
        assert!(sent(&mut guest).is_empty());

        announce(&guest, speed_schema());
        host.poll();

        let mut expected = ValueMap::new();
        expected.insert("speed".into(), 3.0.into());
        assert_eq!(sent(&mut guest), vec![HostMessage::BulkUpdate(expected.into())]);
    }

    #[test]
    fn test_scores_are_auto_acknowledged() {
        let (mut guest, host_link) = local_pair();
        let mut host = Host::new(host_link, HostConfig::default());

        guest.port.send(&GuestMessage::ScoreSubmit(ScoreSubmission {
            score: 50.0,
            high_score: 80.0,
            metadata: None,
        }));
        host.poll();

        assert_eq!(host.mirror().score, ScoreRecord {
            current: 50.0,
            high: 80.0
        });
        assert_eq!(sent(&mut guest), vec![HostMessage::ScoreAck]);
    }

    #[test]
    fn test_duplicate_lifecycle_messages_are_quiet() {
        let (guest, host_link) = local_pair();
        let mut host = Host::new(host_link, HostConfig::default());

        guest.port.send(&GuestMessage::GameStart);
        guest.port.send(&GuestMessage::GameStart);
        let events = host.poll();

        assert_eq!(events, vec![HostEvent::StatusChanged(GameStatus::Playing)]);
    }

    #[test]
    fn test_requests_schema_when_none_arrives() {
        let (mut guest, host_link) = local_pair();
        let mut host = Host::new(host_link, HostConfig {
            schema_request_after_ms: 5,
            ..HostConfig::default()
        });

        host.poll();
        std::thread::sleep(Duration::from_millis(10));
        host.poll();
        host.poll();

        assert_eq!(sent(&mut guest), vec![HostMessage::RequestSchema]);
    }

    #[test]
    fn test_guest_errors_and_disconnect_surface() {
        let (guest, host_link) = local_pair();
        let mut host = Host::new(host_link, HostConfig::default());

        guest.port.send_envelope(&crate::protocol::Envelope::new(
            kind::SDK_ERROR,
            serde_json::json!({"message": "boom"}),
        ));
        drop(guest);

        let events = host.poll();
        assert_eq!(
            events,
            vec![
                HostEvent::GuestError("boom".into()),
                HostEvent::Disconnected
            ]
        );
        assert_eq!(host.mirror().last_error.as_deref(), Some("boom"));
        assert!(host.poll().is_empty());
    }
}
