//! The message vocabulary, one variant per envelope `type`.
//!
//! # Flow
//! ```md
//! guest                                   host
//! SDK_READY, SCHEMA_DEFINED  ---------->  mirror schema + values
//!                            <----------  UPDATE_VARIABLE / BULK_UPDATE
//! GAME_* , SCORE_SUBMIT      ---------->  mirror lifecycle + score
//!                            <----------  SCORE_ACK (optional)
//! ```
//! Decoding is two-step: the frame is parsed into an [`Envelope`], then the
//! `type` picks a payload shape. Unknown types decode to `Ok(None)` and are
//! dropped without side effects; a known type with a bad payload is an
//! `Err` that callers log and otherwise ignore.

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::envelope::Envelope;
use crate::control::{ControlValue, GameSchema, Rejection, ValueMap};
use crate::guest::assets::AssetMapping;
use crate::guest::lifecycle::GameState;
use crate::guest::score::ScoreRecord;

pub const PROTOCOL_VERSION: &str = "1.0.0";

pub mod kind {
    // guest -> host
    pub const SDK_READY: &str = "SDK_READY";
    pub const SCHEMA_DEFINED: &str = "SCHEMA_DEFINED";
    pub const SCORE_SUBMIT: &str = "SCORE_SUBMIT";
    pub const GAME_START: &str = "GAME_START";
    pub const GAME_PAUSE: &str = "GAME_PAUSE";
    pub const GAME_RESUME: &str = "GAME_RESUME";
    pub const GAME_END: &str = "GAME_END";
    pub const ASSETS_MANIFEST: &str = "ASSETS_MANIFEST";
    pub const STATE_UPDATE: &str = "STATE_UPDATE";
    pub const SDK_ERROR: &str = "SDK_ERROR";

    // host -> guest
    pub const UPDATE_VARIABLE: &str = "UPDATE_VARIABLE";
    pub const BULK_UPDATE: &str = "BULK_UPDATE";
    pub const REQUEST_SCHEMA: &str = "REQUEST_SCHEMA";
    pub const REQUEST_STATE: &str = "REQUEST_STATE";
    pub const RESET_GAME: &str = "RESET_GAME";
    pub const UPDATE_ASSETS: &str = "UPDATE_ASSETS";
    pub const REQUEST_ASSETS: &str = "REQUEST_ASSETS";
    pub const CLEAR_ASSETS: &str = "CLEAR_ASSETS";
    pub const SCORE_ACK: &str = "SCORE_ACK";
    pub const PARENT_READY: &str = "PARENT_READY";
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SdkReady {
    pub version: String,
    #[serde(default)]
    pub game_id: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SchemaAnnouncement {
    pub schema: GameSchema,
    pub current_values: ValueMap,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScoreSubmission {
    pub score: f64,
    #[serde(default)]
    pub high_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GameEnded {
    pub final_score: f64,
    /// Milliseconds between start and finish
    pub duration: u64,
    pub level: u32,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct AssetManifest {
    pub assets: Vec<AssetMapping>,
    #[serde(default)]
    pub timestamp: u64,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct StateReport {
    pub lifecycle: GameState,
    pub score: ScoreRecord,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct VariableUpdate {
    pub key: String,
    pub value: ControlValue,
}

/// `BULK_UPDATE` payload. Entries stay raw JSON until the receiver reads
/// them, so a malformed entry is rejected on its own and the rest of the
/// batch still applies.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(transparent)]
pub struct BulkValues(pub IndexMap<String, Value>);

impl BulkValues {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Splits into the well-formed values, in payload order, and a
    /// rejection for every entry that is not a scalar
    pub fn into_values(self) -> (ValueMap, Vec<Rejection>) {
        let mut values = ValueMap::new();
        let mut malformed = vec![];

        for (key, raw) in self.0 {
            match ControlValue::from_json(&raw) {
                Ok(value) => {
                    values.insert(key, value);
                }
                Err(found) => malformed.push(Rejection::Unsupported { key, found }),
            }
        }

        (values, malformed)
    }
}

impl From<ValueMap> for BulkValues {
    fn from(values: ValueMap) -> Self {
        Self(
            values
                .into_iter()
                .map(|(key, value)| (key, value.to_json()))
                .collect(),
        )
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct AssetUpdate {
    #[serde(default)]
    pub mappings: Vec<AssetMapping>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ErrorReport {
    pub message: String,
}

/// Anything that can be put in an [`Envelope`] and read back out of one
pub trait Message: Sized {
    fn kind(&self) -> &'static str;

    fn payload(&self) -> Result<Value, serde_json::Error>;

    /// `Ok(None)` for a type outside this direction's vocabulary
    fn decode(envelope: &Envelope) -> Result<Option<Self>, String>;

    fn to_envelope(&self) -> Result<Envelope, String> {
        let payload = self.payload().map_err(|err| {
            format!("failed to encode `{}` payload: {}", self.kind(), err)
        })?;
        Ok(Envelope::new(self.kind(), payload))
    }
}

/// Messages the guest sends to its host
#[derive(Clone, Debug, PartialEq)]
pub enum GuestMessage {
    SdkReady(SdkReady),
    SchemaDefined(SchemaAnnouncement),
    ScoreSubmit(ScoreSubmission),
    GameStart,
    GamePause,
    GameResume,
    GameEnd(GameEnded),
    AssetsManifest(AssetManifest),
    StateUpdate(StateReport),
    SdkError(ErrorReport),
}

impl Message for GuestMessage {
    fn kind(&self) -> &'static str {
        match self {
            GuestMessage::SdkReady(_) => kind::SDK_READY,
            GuestMessage::SchemaDefined(_) => kind::SCHEMA_DEFINED,
            GuestMessage::ScoreSubmit(_) => kind::SCORE_SUBMIT,
            GuestMessage::GameStart => kind::GAME_START,
            GuestMessage::GamePause => kind::GAME_PAUSE,
            GuestMessage::GameResume => kind::GAME_RESUME,
            GuestMessage::GameEnd(_) => kind::GAME_END,
            GuestMessage::AssetsManifest(_) => kind::ASSETS_MANIFEST,
            GuestMessage::StateUpdate(_) => kind::STATE_UPDATE,
            GuestMessage::SdkError(_) => kind::SDK_ERROR,
        }
    }

    fn payload(&self) -> Result<Value, serde_json::Error> {
        match self {
            GuestMessage::SdkReady(ready) => serde_json::to_value(ready),
            GuestMessage::SchemaDefined(announcement) => {
                serde_json::to_value(announcement)
            }
            GuestMessage::ScoreSubmit(submission) => {
                serde_json::to_value(submission)
            }
            GuestMessage::GameStart
            | GuestMessage::GamePause
            | GuestMessage::GameResume => Ok(json!({})),
            GuestMessage::GameEnd(ended) => serde_json::to_value(ended),
            GuestMessage::AssetsManifest(manifest) => {
                serde_json::to_value(manifest)
            }
            GuestMessage::StateUpdate(report) => serde_json::to_value(report),
            GuestMessage::SdkError(report) => serde_json::to_value(report),
        }
    }

    fn decode(envelope: &Envelope) -> Result<Option<Self>, String> {
        let message = match envelope.kind.as_str() {
            kind::SDK_READY => GuestMessage::SdkReady(parse(envelope)?),
            kind::SCHEMA_DEFINED => {
                GuestMessage::SchemaDefined(parse(envelope)?)
            }
            kind::SCORE_SUBMIT => GuestMessage::ScoreSubmit(parse(envelope)?),
            kind::GAME_START => GuestMessage::GameStart,
            kind::GAME_PAUSE => GuestMessage::GamePause,
            kind::GAME_RESUME => GuestMessage::GameResume,
            kind::GAME_END => GuestMessage::GameEnd(parse(envelope)?),
            kind::ASSETS_MANIFEST => {
                GuestMessage::AssetsManifest(parse(envelope)?)
            }
            kind::STATE_UPDATE => GuestMessage::StateUpdate(parse(envelope)?),
            kind::SDK_ERROR => GuestMessage::SdkError(parse(envelope)?),
            _ => return Ok(None),
        };

        Ok(Some(message))
    }
}

/// Messages the host sends to its guest
#[derive(Clone, Debug, PartialEq)]
pub enum HostMessage {
    UpdateVariable(VariableUpdate),
    BulkUpdate(BulkValues),
    RequestSchema,
    RequestState,
    ResetGame,
    UpdateAssets(AssetUpdate),
    RequestAssets,
    ClearAssets,
    ScoreAck,
    ParentReady,
}

impl Message for HostMessage {
    fn kind(&self) -> &'static str {
        match self {
            HostMessage::UpdateVariable(_) => kind::UPDATE_VARIABLE,
            HostMessage::BulkUpdate(_) => kind::BULK_UPDATE,
            HostMessage::RequestSchema => kind::REQUEST_SCHEMA,
            HostMessage::RequestState => kind::REQUEST_STATE,
            HostMessage::ResetGame => kind::RESET_GAME,
            HostMessage::UpdateAssets(_) => kind::UPDATE_ASSETS,
            HostMessage::RequestAssets => kind::REQUEST_ASSETS,
            HostMessage::ClearAssets => kind::CLEAR_ASSETS,
            HostMessage::ScoreAck => kind::SCORE_ACK,
            HostMessage::ParentReady => kind::PARENT_READY,
        }
    }

    fn payload(&self) -> Result<Value, serde_json::Error> {
        match self {
            HostMessage::UpdateVariable(update) => serde_json::to_value(update),
            HostMessage::BulkUpdate(values) => serde_json::to_value(values),
            HostMessage::UpdateAssets(update) => serde_json::to_value(update),
            HostMessage::RequestSchema
            | HostMessage::RequestState
            | HostMessage::ResetGame
            | HostMessage::RequestAssets
            | HostMessage::ClearAssets
            | HostMessage::ScoreAck
            | HostMessage::ParentReady => Ok(json!({})),
        }
    }

    fn decode(envelope: &Envelope) -> Result<Option<Self>, String> {
        let message = match envelope.kind.as_str() {
            kind::UPDATE_VARIABLE => {
                HostMessage::UpdateVariable(parse(envelope)?)
            }
            kind::BULK_UPDATE => HostMessage::BulkUpdate(parse_or_default(envelope)?),
            kind::REQUEST_SCHEMA => HostMessage::RequestSchema,
            kind::REQUEST_STATE => HostMessage::RequestState,
            kind::RESET_GAME => HostMessage::ResetGame,
            kind::UPDATE_ASSETS => {
                HostMessage::UpdateAssets(parse_or_default(envelope)?)
            }
            kind::REQUEST_ASSETS => HostMessage::RequestAssets,
            kind::CLEAR_ASSETS => HostMessage::ClearAssets,
            kind::SCORE_ACK => HostMessage::ScoreAck,
            kind::PARENT_READY => HostMessage::ParentReady,
            _ => return Ok(None),
        };

        Ok(Some(message))
    }
}

fn parse<T: DeserializeOwned>(envelope: &Envelope) -> Result<T, String> {
    T::deserialize(&envelope.payload).map_err(|err| {
        format!("invalid `{}` payload: {}", envelope.kind, err)
    })
}

/// Like [`parse`] but a missing payload reads as the empty value
fn parse_or_default<T: DeserializeOwned + Default>(
    envelope: &Envelope,
) -> Result<T, String> {
    if envelope.payload.is_null() {
        Ok(T::default())
    } else {
        parse(envelope)
    }
}

/// Parses a frame and decodes it in one go. Malformed frames and malformed
/// payloads both come back as `Err`.
pub fn decode_frame<M: Message>(frame: &str) -> Result<Option<M>, String> {
    let envelope = Envelope::from_frame(frame)?;
    M::decode(&envelope)
}

pub fn encode_frame<M: Message>(message: &M) -> Result<String, String> {
    message.to_envelope()?.to_frame()
}
