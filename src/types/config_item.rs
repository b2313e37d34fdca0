use crate::error::{QueueError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigValueType {
    #[default]
    String,
    Int,
    Float,
    Bool,
    Json,
}

impl ConfigValueType {
    pub const ALL: [Self; 5] = [Self::String, Self::Int, Self::Float, Self::Bool, Self::Json];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::Json => "json",
        }
    }

    /// Interprets `raw` according to this type tag.
    ///
    /// # Errors
    /// Returns `QueueError::Validation` when `raw` does not parse as this type.
    pub fn parse(self, raw: &str) -> Result<ConfigValue> {
        let invalid = |detail: String| {
            QueueError::Validation(format!(
                "value {raw:?} is not a valid {}: {detail}",
                self.as_str()
            ))
        };

        match self {
            Self::String => Ok(ConfigValue::String(raw.to_string())),
            Self::Int => raw
                .trim()
                .parse::<i64>()
                .map(ConfigValue::Int)
                .map_err(|e| invalid(e.to_string())),
            Self::Float => raw
                .trim()
                .parse::<f64>()
                .map_err(|e| invalid(e.to_string()))
                .and_then(|value| {
                    if value.is_finite() {
                        Ok(ConfigValue::Float(value))
                    } else {
                        Err(invalid("not finite".to_string()))
                    }
                }),
            Self::Bool => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(ConfigValue::Bool(true)),
                "false" | "0" | "no" | "off" => Ok(ConfigValue::Bool(false)),
                _ => Err(invalid("expected true/false".to_string())),
            },
            Self::Json => serde_json::from_str::<serde_json::Value>(raw)
                .map(ConfigValue::Json)
                .map_err(|e| invalid(e.to_string())),
        }
    }
}

impl fmt::Display for ConfigValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for ConfigValueType {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, String> {
        Self::ALL
            .into_iter()
            .find(|value_type| value_type.as_str() == s)
            .ok_or_else(|| format!("Unknown config value type: {s}"))
    }
}

impl std::str::FromStr for ConfigValueType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, String> {
        Self::try_from(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Json(serde_json::Value),
}

impl ConfigValue {
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigItem {
    pub key: String,
    pub value: String,
    pub value_type: ConfigValueType,
    pub description: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ConfigItem {
    /// # Errors
    /// Returns `QueueError::Validation` when the stored text no longer
    /// matches its declared type.
    pub fn typed_value(&self) -> Result<ConfigValue> {
        self.value_type.parse(&self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_type_roundtrip_preserves_values() {
        for value_type in ConfigValueType::ALL {
            assert_eq!(ConfigValueType::try_from(value_type.as_str()), Ok(value_type));
        }
        assert!(ConfigValueType::try_from("integer").is_err());
    }

    #[test]
    fn parse_accepts_well_typed_values() {
        assert_eq!(ConfigValueType::Int.parse(" 42 ").ok(), Some(ConfigValue::Int(42)));
        assert_eq!(
            ConfigValueType::Float.parse("1.5").ok(),
            Some(ConfigValue::Float(1.5))
        );
        assert_eq!(
            ConfigValueType::Bool.parse("Yes").ok(),
            Some(ConfigValue::Bool(true))
        );
        assert_eq!(
            ConfigValueType::String.parse("anything").ok(),
            Some(ConfigValue::String("anything".to_string()))
        );
        assert_eq!(
            ConfigValueType::Json.parse(r#"{"a": [1]}"#).ok(),
            Some(ConfigValue::Json(serde_json::json!({"a": [1]})))
        );
    }

    #[test]
    fn parse_rejects_mismatched_values() {
        assert!(matches!(
            ConfigValueType::Int.parse("4.2"),
            Err(QueueError::Validation(_))
        ));
        assert!(ConfigValueType::Float.parse("NaN").is_err());
        assert!(ConfigValueType::Bool.parse("maybe").is_err());
        assert!(ConfigValueType::Json.parse("{not json").is_err());
    }

    #[test]
    fn typed_value_reads_stored_text() {
        let item = ConfigItem {
            key: "stale_threshold_minutes".to_string(),
            value: "15".to_string(),
            value_type: ConfigValueType::Int,
            description: None,
            updated_at: Utc::now(),
        };
        assert_eq!(item.typed_value().ok().and_then(|v| v.as_int()), Some(15));
    }
}
