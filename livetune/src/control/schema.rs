//! Declarative description of the parameters a game exposes for live tuning.
//!
//! A [`GameSchema`] is plain data: it is what the guest announces, what the
//! host renders controls from, and what the generation service hands over as
//! the game's defaults (see [`GameSchema::from_yaml_str`] and
//! [`GameSchema::load`]).

use std::error::Error;
use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::value::{ControlValue, ValueMap};
use crate::framework::config::parse_yaml;
use crate::framework::util::HashSet;

pub const DEFAULT_SCHEMA_VERSION: &str = "1.0.0";

#[derive(Clone, Copy, Debug, Deserialize, Serialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PropertyKind {
    Number,
    String,
    Boolean,
    Color,
    Range,
}

impl PropertyKind {
    pub fn is_numeric(&self) -> bool {
        matches!(self, PropertyKind::Number | PropertyKind::Range)
    }
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PropertyKind::Number => "number",
            PropertyKind::String => "string",
            PropertyKind::Boolean => "boolean",
            PropertyKind::Color => "color",
            PropertyKind::Range => "range",
        })
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SchemaProperty {
    pub key: String,
    #[serde(rename = "type")]
    pub kind: PropertyKind,
    #[serde(default)]
    pub label: String,
    pub default_value: ControlValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl SchemaProperty {
    fn new(key: &str, kind: PropertyKind, default_value: ControlValue) -> Self {
        Self {
            key: key.to_string(),
            kind,
            label: key.to_string(),
            default_value,
            min: None,
            max: None,
            step: None,
            description: None,
        }
    }

    pub fn number(key: &str, default_value: f64) -> Self {
        Self::new(key, PropertyKind::Number, default_value.into())
    }

    pub fn range(
        key: &str,
        default_value: f64,
        range: (f64, f64),
        step: f64,
    ) -> Self {
        Self {
            min: Some(range.0),
            max: Some(range.1),
            step: Some(step),
            ..Self::new(key, PropertyKind::Range, default_value.into())
        }
    }

    pub fn boolean(key: &str, default_value: bool) -> Self {
        Self::new(key, PropertyKind::Boolean, default_value.into())
    }

    pub fn text(key: &str, default_value: &str) -> Self {
        Self::new(key, PropertyKind::String, default_value.into())
    }

    pub fn color(key: &str, default_value: &str) -> Self {
        Self::new(key, PropertyKind::Color, default_value.into())
    }

    pub fn label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    pub fn bounds(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    /// Checks `value` against the declared type and, for numeric kinds, the
    /// declared bounds. Out-of-range values are rejected, never clamped.
    pub fn validate(&self, value: &ControlValue) -> Result<(), Rejection> {
        let mismatch = || Rejection::TypeMismatch {
            key: self.key.clone(),
            expected: self.kind,
            found: value.type_name(),
        };

        match self.kind {
            PropertyKind::Number | PropertyKind::Range => {
                let number = value.as_number().ok_or_else(mismatch)?;

                if !number.is_finite() {
                    return Err(Rejection::NotFinite {
                        key: self.key.clone(),
                    });
                }

                if let Some(min) = self.min {
                    if number < min {
                        return Err(Rejection::BelowMin {
                            key: self.key.clone(),
                            value: number,
                            min,
                        });
                    }
                }

                if let Some(max) = self.max {
                    if number > max {
                        return Err(Rejection::AboveMax {
                            key: self.key.clone(),
                            value: number,
                            max,
                        });
                    }
                }

                Ok(())
            }
            PropertyKind::Boolean => value.as_bool().map(|_| ()).ok_or_else(mismatch),
            PropertyKind::String => value.as_str().map(|_| ()).ok_or_else(mismatch),
            PropertyKind::Color => {
                let text = value.as_str().ok_or_else(mismatch)?;
                if is_hex_color(text) {
                    Ok(())
                } else {
                    Err(Rejection::InvalidColor {
                        key: self.key.clone(),
                        value: text.to_string(),
                    })
                }
            }
        }
    }

    fn check(&self) -> Result<(), SchemaError> {
        if self.key.trim().is_empty() {
            return Err(SchemaError::EmptyKey);
        }

        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return Err(SchemaError::InvertedBounds {
                    key: self.key.clone(),
                    min,
                    max,
                });
            }
        }

        self.validate(&self.default_value).map_err(|rejection| {
            SchemaError::InvalidDefault {
                key: self.key.clone(),
                rejection,
            }
        })
    }
}

/// `#rgb`, `#rgba`, `#rrggbb` or `#rrggbbaa`
fn is_hex_color(text: &str) -> bool {
    let Some(digits) = text.strip_prefix('#') else {
        return false;
    };

    matches!(digits.len(), 3 | 4 | 6 | 8)
        && digits.chars().all(|c| c.is_ascii_hexdigit())
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct GameSchema {
    pub version: String,
    pub properties: Vec<SchemaProperty>,
}

impl Default for GameSchema {
    fn default() -> Self {
        Self {
            version: DEFAULT_SCHEMA_VERSION.to_string(),
            properties: vec![],
        }
    }
}

/// Accepts either a full `{version, properties}` document or the bare
/// property list the generator emits.
#[derive(Deserialize)]
#[serde(untagged)]
enum SchemaDocument {
    Full(GameSchema),
    Properties(Vec<SchemaProperty>),
}

impl From<SchemaDocument> for GameSchema {
    fn from(document: SchemaDocument) -> Self {
        match document {
            SchemaDocument::Full(schema) => schema,
            SchemaDocument::Properties(properties) => GameSchema::new(properties),
        }
    }
}

impl From<Vec<SchemaProperty>> for GameSchema {
    fn from(properties: Vec<SchemaProperty>) -> Self {
        GameSchema::new(properties)
    }
}

impl GameSchema {
    pub fn new(properties: Vec<SchemaProperty>) -> Self {
        Self {
            properties,
            ..Self::default()
        }
    }

    pub fn property(&self, key: &str) -> Option<&SchemaProperty> {
        self.properties.iter().find(|p| p.key == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.properties.iter().map(|p| p.key.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn defaults(&self) -> ValueMap {
        self.properties
            .iter()
            .map(|p| (p.key.clone(), p.default_value.clone()))
            .collect()
    }

    /// Structural checks a guest must pass before announcing: unique,
    /// non-empty keys, `min <= max`, and defaults that validate.
    pub fn check(&self) -> Result<(), SchemaError> {
        let mut seen: HashSet<&str> = HashSet::default();

        for property in &self.properties {
            property.check()?;
            if !seen.insert(property.key.as_str()) {
                return Err(SchemaError::DuplicateKey(property.key.clone()));
            }
        }

        Ok(())
    }

    pub fn validate(
        &self,
        key: &str,
        value: &ControlValue,
    ) -> Result<(), Rejection> {
        self.property(key)
            .ok_or_else(|| Rejection::UnknownKey(key.to_string()))?
            .validate(value)
    }

    pub fn from_json_str(source: &str) -> Result<Self, String> {
        serde_json::from_str::<SchemaDocument>(source)
            .map(Self::from)
            .map_err(|err| format!("invalid schema JSON: {}", err))
    }

    pub fn from_yaml_str(source: &str) -> Result<Self, String> {
        parse_yaml::<SchemaDocument>(source)
            .map(Self::from)
            .map_err(|err| format!("invalid schema YAML: {}", err))
    }

    /// Loads a schema document, picking the format from the file extension
    /// (`.json` is JSON, anything else is treated as YAML).
    pub fn load(path: &Path) -> Result<Self, String> {
        let source = fs::read_to_string(path).map_err(|err| {
            format!("failed to read schema '{}': {}", path.display(), err)
        })?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let result = if is_json {
            Self::from_json_str(&source)
        } else {
            Self::from_yaml_str(&source)
        };

        result.map_err(|err| format!("{} ('{}')", err, path.display()))
    }
}

/// Why a value update was refused. Rejections are ordinary results, not
/// faults: a stale host control produces them routinely.
#[derive(Clone, Debug, PartialEq)]
pub enum Rejection {
    UnknownKey(String),
    TypeMismatch {
        key: String,
        expected: PropertyKind,
        found: &'static str,
    },
    BelowMin {
        key: String,
        value: f64,
        min: f64,
    },
    AboveMax {
        key: String,
        value: f64,
        max: f64,
    },
    InvalidColor {
        key: String,
        value: String,
    },
    NotFinite {
        key: String,
    },
    /// A wire value that is not a boolean, number or string
    Unsupported {
        key: String,
        found: &'static str,
    },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::UnknownKey(key) => write!(f, "unknown key `{}`", key),
            Rejection::TypeMismatch {
                key,
                expected,
                found,
            } => write!(f, "`{}` expects a {} value, got {}", key, expected, found),
            Rejection::BelowMin { key, value, min } => {
                write!(f, "`{}` = {} is below min {}", key, value, min)
            }
            Rejection::AboveMax { key, value, max } => {
                write!(f, "`{}` = {} is above max {}", key, value, max)
            }
            Rejection::InvalidColor { key, value } => {
                write!(f, "`{}` = {:?} is not a hex color", key, value)
            }
            Rejection::NotFinite { key } => {
                write!(f, "`{}` must be a finite number", key)
            }
            Rejection::Unsupported { key, found } => {
                write!(f, "`{}` carries an unsupported {} value", key, found)
            }
        }
    }
}

impl Error for Rejection {}

/// A malformed schema declaration. This is a programming error in the game
/// and is surfaced loudly rather than merged.
#[derive(Clone, Debug, PartialEq)]
pub enum SchemaError {
    DuplicateKey(String),
    EmptyKey,
    InvertedBounds { key: String, min: f64, max: f64 },
    InvalidDefault { key: String, rejection: Rejection },
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaError::DuplicateKey(key) => {
                write!(f, "duplicate schema key `{}`", key)
            }
            SchemaError::EmptyKey => f.write_str("schema key must not be empty"),
            SchemaError::InvertedBounds { key, min, max } => {
                write!(f, "`{}` has min {} greater than max {}", key, min, max)
            }
            SchemaError::InvalidDefault { key, rejection } => {
                write!(f, "invalid default for `{}`: {}", key, rejection)
            }
        }
    }
}

impl Error for SchemaError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn speed() -> SchemaProperty {
        SchemaProperty::range("speed", 5.0, (1.0, 10.0), 1.0)
    }

    #[test]
    fn test_range_bounds_reject_instead_of_clamp() {
        let property = speed();
        assert!(property.validate(&7.0.into()).is_ok());
        assert!(property.validate(&1.0.into()).is_ok());
        assert!(property.validate(&10.0.into()).is_ok());

        assert_eq!(
            property.validate(&999.0.into()),
            Err(Rejection::AboveMax {
                key: "speed".into(),
                value: 999.0,
                max: 10.0,
            })
        );
        assert!(matches!(
            property.validate(&0.5.into()),
            Err(Rejection::BelowMin { .. })
        ));
    }

    #[test]
    fn test_type_checks() {
        let flag = SchemaProperty::boolean("trail", false);
        assert!(flag.validate(&true.into()).is_ok());
        assert!(matches!(
            flag.validate(&1.0.into()),
            Err(Rejection::TypeMismatch { found: "number", .. })
        ));

        let name = SchemaProperty::text("title", "Flappy");
        assert!(name.validate(&"Bird".into()).is_ok());
        assert!(name.validate(&false.into()).is_err());

        let gravity = SchemaProperty::number("gravity", 0.6);
        assert!(gravity.validate(&(-3.0).into()).is_ok());
        assert!(matches!(
            gravity.validate(&f64::NAN.into()),
            Err(Rejection::NotFinite { .. })
        ));
    }

    #[test]
    fn test_colors() {
        let tint = SchemaProperty::color("tint", "#fff");
        for ok in ["#fff", "#ffff", "#a1b2c3", "#A1B2C3FF"] {
            assert!(tint.validate(&ok.into()).is_ok(), "{}", ok);
        }
        for bad in ["fff", "#ff", "#ggg", "red", "#12345"] {
            assert!(matches!(
                tint.validate(&bad.into()),
                Err(Rejection::InvalidColor { .. })
            ));
        }
    }

    #[test]
    fn test_check_rejects_duplicate_keys() {
        let schema = GameSchema::new(vec![speed(), speed()]);
        assert_eq!(
            schema.check(),
            Err(SchemaError::DuplicateKey("speed".into()))
        );
    }

    #[test]
    fn test_check_rejects_default_outside_bounds() {
        let schema = GameSchema::new(vec![SchemaProperty::range(
            "speed",
            11.0,
            (1.0, 10.0),
            1.0,
        )]);
        assert!(matches!(
            schema.check(),
            Err(SchemaError::InvalidDefault { .. })
        ));

        let inverted = GameSchema::new(vec![
            SchemaProperty::number("x", 0.0).bounds(1.0, -1.0),
        ]);
        assert!(matches!(
            inverted.check(),
            Err(SchemaError::InvertedBounds { .. })
        ));
    }

    #[test]
    fn test_wire_shape_is_camel_case() {
        let json = serde_json::to_value(speed().label("Player Speed")).unwrap();
        assert_eq!(json["type"], "range");
        assert_eq!(json["defaultValue"], 5.0);
        assert_eq!(json["label"], "Player Speed");
        assert!(json.get("description").is_none());
    }

    #[test]
    fn test_loads_bare_property_list_from_json() {
        let schema = GameSchema::from_json_str(
            r#"[{"key":"gravity","type":"number","label":"Gravity","defaultValue":0.6}]"#,
        )
        .unwrap();

        assert_eq!(schema.version, DEFAULT_SCHEMA_VERSION);
        assert_eq!(schema.defaults()["gravity"], ControlValue::Number(0.6));
    }

    #[test]
    fn test_loads_full_document_from_yaml() {
        let schema = GameSchema::from_yaml_str(
            r##"
version: "2.0.0"
properties:
  - key: speed
    type: range
    label: Speed
    defaultValue: 5
    min: 1
    max: 10
    step: 1
  - key: tint
    type: color
    defaultValue: "#ff00ff"
"##,
        )
        .unwrap();

        assert_eq!(schema.version, "2.0.0");
        assert_eq!(schema.keys().collect::<Vec<_>>(), vec!["speed", "tint"]);
        assert_eq!(schema.property("speed").and_then(|p| p.max), Some(10.0));
        assert!(schema.check().is_ok());
    }
}
