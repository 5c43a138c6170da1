//! Guest-side owner of the schema and the authoritative value map.

use log::{debug, info, warn};

use crate::control::{
    ControlValue, GameSchema, Observers, Rejection, SchemaError,
    SchemaProperty, Subscription, ValueMap,
};
use crate::protocol::{BulkValues, GuestMessage, SchemaAnnouncement};

/// What a validated update did to the value map
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Applied {
    Changed,
    /// Same value as before; listeners were not notified
    Unchanged,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BulkOutcome {
    pub changed: Vec<String>,
    pub rejected: Vec<Rejection>,
}

pub struct SchemaModule {
    schema: Option<GameSchema>,
    values: ValueMap,
    observers: Observers<ValueMap>,
    change_tracker: ChangeTracker,
}

impl Default for SchemaModule {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaModule {
    pub fn new() -> Self {
        Self {
            schema: None,
            values: ValueMap::new(),
            observers: Observers::new("schema update"),
            change_tracker: ChangeTracker::default(),
        }
    }

    /// Replaces the schema and resets every value to its default. A schema
    /// that fails its structural checks leaves the previous one in place.
    pub fn define(
        &mut self,
        schema: GameSchema,
    ) -> Result<GuestMessage, SchemaError> {
        schema.check()?;

        self.values = schema.defaults();
        info!(
            "schema defined with {} properties: {:?}",
            schema.properties.len(),
            schema.keys().collect::<Vec<_>>()
        );

        let announcement = GuestMessage::SchemaDefined(SchemaAnnouncement {
            schema: schema.clone(),
            current_values: self.values.clone(),
        });
        self.schema = Some(schema);
        self.change_tracker.mark_changed();

        Ok(announcement)
    }

    pub fn is_defined(&self) -> bool {
        self.schema.is_some()
    }

    /// `SCHEMA_DEFINED` for the current schema, if there is one
    pub fn announcement(&self) -> Option<GuestMessage> {
        self.schema.as_ref().map(|schema| {
            GuestMessage::SchemaDefined(SchemaAnnouncement {
                schema: schema.clone(),
                current_values: self.values.clone(),
            })
        })
    }

    pub fn validate_value(
        &self,
        key: &str,
        value: &ControlValue,
    ) -> Result<(), Rejection> {
        match &self.schema {
            Some(schema) => schema.validate(key, value),
            None => Err(Rejection::UnknownKey(key.to_string())),
        }
    }

    /// Validates and applies one update. Listeners receive the full value
    /// map, and only when something actually changed.
    pub fn update_value(
        &mut self,
        key: &str,
        value: ControlValue,
    ) -> Result<Applied, Rejection> {
        let applied = self.apply(key, value)?;
        if applied == Applied::Changed {
            self.observers.notify(&self.values);
        }
        Ok(applied)
    }

    /// Applies every entry in order. Entries that are not scalars are
    /// rejected without touching the rest of the batch. Listeners are
    /// notified once, after the whole batch, if any entry changed.
    pub fn apply_bulk(&mut self, values: BulkValues) -> BulkOutcome {
        let (values, malformed) = values.into_values();
        let mut outcome = BulkOutcome {
            changed: vec![],
            rejected: malformed,
        };

        for (key, value) in values {
            match self.apply(&key, value) {
                Ok(Applied::Changed) => outcome.changed.push(key),
                Ok(Applied::Unchanged) => {}
                Err(rejection) => outcome.rejected.push(rejection),
            }
        }

        if !outcome.changed.is_empty() {
            self.observers.notify(&self.values);
        }

        outcome
    }

    pub fn schema(&self) -> Option<&GameSchema> {
        self.schema.as_ref()
    }

    pub fn property(&self, key: &str) -> Option<&SchemaProperty> {
        self.schema.as_ref().and_then(|schema| schema.property(key))
    }

    pub fn value(&self, key: &str) -> Option<&ControlValue> {
        self.values.get(key)
    }

    pub fn all_values(&self) -> &ValueMap {
        &self.values
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        self.value(key).and_then(ControlValue::as_number)
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        self.value(key).and_then(ControlValue::as_bool)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.value(key).and_then(ControlValue::as_str)
    }

    pub fn on_update<F>(&mut self, callback: F) -> Subscription
    where
        F: FnMut(&ValueMap) + Send + 'static,
    {
        self.observers.subscribe(callback)
    }

    pub fn off(&mut self, subscription: Subscription) -> bool {
        self.observers.unsubscribe(subscription)
    }

    pub fn take_faults(&mut self) -> Vec<String> {
        self.observers.take_faults()
    }

    /// True until [`Self::mark_unchanged`] is called, and again after any
    /// value or schema change
    pub fn changed(&self) -> bool {
        self.change_tracker.changed()
    }

    pub fn any_changed_in(&self, keys: &[&str]) -> bool {
        self.change_tracker.any_changed_in(keys, &self.values)
    }

    pub fn mark_unchanged(&mut self) {
        self.change_tracker.mark_unchanged(&self.values);
    }

    fn apply(
        &mut self,
        key: &str,
        value: ControlValue,
    ) -> Result<Applied, Rejection> {
        if let Err(rejection) = self.validate_value(key, &value) {
            match &rejection {
                Rejection::UnknownKey(_) => {
                    debug!("ignoring update for unknown key `{}`", key)
                }
                _ => warn!("rejected update: {}", rejection),
            }
            return Err(rejection);
        }

        if self.values.get(key) == Some(&value) {
            debug!("`{}` already {:?}", key, value);
            return Ok(Applied::Unchanged);
        }

        debug!("`{}` -> {:?}", key, value);
        self.values.insert(key.to_string(), value);
        self.change_tracker.mark_changed();
        Ok(Applied::Changed)
    }
}

/// Lets a game loop poll for value changes once per tick instead of
/// subscribing.
struct ChangeTracker {
    changed: bool,
    previous_values: ValueMap,
}

impl Default for ChangeTracker {
    fn default() -> Self {
        Self {
            changed: true,
            previous_values: ValueMap::new(),
        }
    }
}

impl ChangeTracker {
    fn changed(&self) -> bool {
        self.changed
    }

    fn any_changed_in(&self, keys: &[&str], values: &ValueMap) -> bool {
        if self.previous_values.is_empty() {
            return keys.iter().any(|key| values.contains_key(*key));
        }

        keys.iter()
            .any(|key| values.get(*key) != self.previous_values.get(*key))
    }

    fn mark_unchanged(&mut self, latest_values: &ValueMap) {
        self.changed = false;
        self.previous_values = latest_values.clone();
    }

    fn mark_changed(&mut self) {
        self.changed = true;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    fn speed_schema() -> GameSchema {
        GameSchema::new(vec![
            SchemaProperty::range("speed", 5.0, (1.0, 10.0), 1.0),
            SchemaProperty::boolean("wrap", false),
            SchemaProperty::color("sky", "#87ceeb"),
        ])
    }

    fn recorded(schema: &mut SchemaModule) -> Arc<Mutex<Vec<ValueMap>>> {
        let seen = Arc::new(Mutex::new(vec![]));
        let sink = seen.clone();
        schema.on_update(move |values| {
            sink.lock().unwrap().push(values.clone());
        });
        seen
    }

    #[test]
    fn test_define_then_update_round_trip() {
        let mut schema = SchemaModule::new();
        schema.define(speed_schema()).unwrap();
        assert_eq!(schema.number("speed"), Some(5.0));

        assert_eq!(schema.update_value("speed", 7.0.into()), Ok(Applied::Changed));
        assert_eq!(schema.number("speed"), Some(7.0));

        let rejection = schema.update_value("speed", 999.0.into()).unwrap_err();
        assert!(matches!(rejection, Rejection::AboveMax { .. }));
        assert_eq!(schema.number("speed"), Some(7.0));
    }

    #[test]
    fn test_repeated_value_does_not_notify() {
        let mut schema = SchemaModule::new();
        schema.define(speed_schema()).unwrap();
        let seen = recorded(&mut schema);

        schema.update_value("speed", 3.0.into()).unwrap();
        for _ in 0..5 {
            assert_eq!(
                schema.update_value("speed", 3.0.into()),
                Ok(Applied::Unchanged)
            );
        }

        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_callback_receives_full_map() {
        let mut schema = SchemaModule::new();
        schema.define(speed_schema()).unwrap();
        let seen = recorded(&mut schema);

        schema.update_value("wrap", true.into()).unwrap();

        let seen = seen.lock().unwrap();
        let keys: Vec<_> = seen[0].keys().cloned().collect();
        assert_eq!(keys, vec!["speed", "wrap", "sky"]);
        assert_eq!(seen[0]["wrap"], ControlValue::Bool(true));
    }

    #[test]
    fn test_unknown_key_is_a_quiet_rejection() {
        let mut schema = SchemaModule::new();
        let seen = recorded(&mut schema);

        assert_eq!(
            schema.update_value("speed", 1.0.into()),
            Err(Rejection::UnknownKey("speed".to_string()))
        );

        schema.define(speed_schema()).unwrap();
        assert!(schema.update_value("nope", 1.0.into()).is_err());
        assert_eq!(schema.value("nope"), None);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_type_mismatch_is_rejected() {
        let mut schema = SchemaModule::new();
        schema.define(speed_schema()).unwrap();

        assert!(matches!(
            schema.update_value("wrap", "yes".into()),
            Err(Rejection::TypeMismatch { .. })
        ));
        assert!(matches!(
            schema.update_value("sky", "blue".into()),
            Err(Rejection::InvalidColor { .. })
        ));
        assert_eq!(schema.bool("wrap"), Some(false));
    }

    #[test]
    fn test_duplicate_keys_keep_previous_schema() {
        let mut schema = SchemaModule::new();
        schema.define(speed_schema()).unwrap();

        let result = schema.define(GameSchema::new(vec![
            SchemaProperty::number("gravity", 0.6),
            SchemaProperty::number("gravity", 0.8),
        ]));

        assert_eq!(result, Err(SchemaError::DuplicateKey("gravity".into())));
        assert!(schema.property("speed").is_some());
        assert!(schema.property("gravity").is_none());
    }

    #[test]
    fn test_redefine_resets_to_defaults() {
        let mut schema = SchemaModule::new();
        schema.define(speed_schema()).unwrap();
        schema.update_value("speed", 9.0.into()).unwrap();

        schema.define(speed_schema()).unwrap();
        assert_eq!(schema.number("speed"), Some(5.0));
    }

    #[test]
    fn test_bulk_notifies_once_and_reports_rejections() {
        let mut schema = SchemaModule::new();
        schema.define(speed_schema()).unwrap();
        let seen = recorded(&mut schema);

        let mut values = ValueMap::new();
        values.insert("speed".into(), 2.0.into());
        values.insert("wrap".into(), true.into());
        values.insert("ghost".into(), 1.0.into());
        values.insert("sky".into(), "#87ceeb".into());

        let outcome = schema.apply_bulk(values.into());

        assert_eq!(outcome.changed, vec!["speed", "wrap"]);
        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_bulk_applies_scalars_next_to_malformed_entries() {
        let mut schema = SchemaModule::new();
        schema.define(speed_schema()).unwrap();
        let seen = recorded(&mut schema);

        let values: BulkValues = serde_json::from_value(serde_json::json!({
            "speed": 3,
            "ghost": null,
            "sky": {"r": 1},
        }))
        .unwrap();
        let outcome = schema.apply_bulk(values);

        assert_eq!(outcome.changed, vec!["speed"]);
        assert_eq!(outcome.rejected, vec![
            Rejection::Unsupported {
                key: "ghost".into(),
                found: "null"
            },
            Rejection::Unsupported {
                key: "sky".into(),
                found: "object"
            },
        ]);
        assert_eq!(schema.number("speed"), Some(3.0));
        assert_eq!(schema.text("sky"), Some("#87ceeb"));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_change_tracking() {
        let mut schema = SchemaModule::new();
        schema.define(speed_schema()).unwrap();
        assert!(schema.changed());
        assert!(schema.any_changed_in(&["speed"]));

        schema.mark_unchanged();
        assert!(!schema.changed());
        assert!(!schema.any_changed_in(&["speed"]));

        schema.update_value("speed", 4.0.into()).unwrap();
        assert!(schema.changed());
        assert!(schema.any_changed_in(&["speed", "wrap"]));
        assert!(!schema.any_changed_in(&["wrap"]));
    }

    #[test]
    fn test_announcement_carries_current_values() {
        let mut schema = SchemaModule::new();
        assert_eq!(schema.announcement(), None);

        schema.define(speed_schema()).unwrap();
        schema.update_value("speed", 6.0.into()).unwrap();

        let Some(GuestMessage::SchemaDefined(announcement)) =
            schema.announcement()
        else {
            panic!("expected SCHEMA_DEFINED");
        };
        assert_eq!(
            announcement.current_values["speed"],
            ControlValue::Number(6.0)
        );
    }
}
