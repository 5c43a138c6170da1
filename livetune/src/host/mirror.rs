use crate::control::{ControlValue, GameSchema, SchemaProperty, ValueMap};
use crate::guest::{AssetMapping, GameState, GameStatus, ScoreRecord};
use crate::protocol::{GameEnded, SdkReady};

/// The host's advisory copy of guest state. Only inbound guest messages and
/// the host's own outbound edits touch it; the guest stays authoritative and
/// this may lag behind.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GuestMirror {
    pub ready: Option<SdkReady>,
    pub schema: Option<GameSchema>,
    pub values: ValueMap,
    pub state: GameState,
    pub score: ScoreRecord,
    pub last_result: Option<GameEnded>,
    pub assets: Vec<AssetMapping>,
    pub last_error: Option<String>,
}

impl GuestMirror {
    pub fn status(&self) -> GameStatus {
        self.state.status
    }

    pub fn property(&self, key: &str) -> Option<&SchemaProperty> {
        self.schema.as_ref().and_then(|schema| schema.property(key))
    }

    pub fn value(&self, key: &str) -> Option<&ControlValue> {
        self.values.get(key)
    }

    /// Controls to render, each paired with its last known value
    pub fn controls(&self) -> Vec<(&SchemaProperty, Option<&ControlValue>)> {
        self.schema
            .iter()
            .flat_map(|schema| schema.properties.iter())
            .map(|property| (property, self.values.get(&property.key)))
            .collect()
    }
}
