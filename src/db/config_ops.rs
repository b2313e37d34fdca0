#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use super::mappers::{ConfigRow, CONFIG_COLUMNS};
use crate::db::QueueDb;
use crate::error::{QueueError, Result};
use crate::types::{ConfigItem, ConfigValueType};
use tracing::info;

/// Config key holding the reaper's staleness threshold in minutes.
pub const STALE_THRESHOLD_KEY: &str = "stale_threshold_minutes";

impl QueueDb {
    /// # Errors
    /// Returns an error if the database operation fails.
    pub async fn get_config(&self, key: &str) -> Result<Option<ConfigItem>> {
        sqlx::query_as::<_, ConfigRow>(&format!(
            "SELECT {CONFIG_COLUMNS} FROM queue_config WHERE key = $1"
        ))
        .bind(key)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| QueueError::from_sqlx("Failed to read config", &e))?
        .map(ConfigItem::try_from)
        .transpose()
    }

    /// Upserts `key`; an omitted description keeps the stored one.
    ///
    /// # Errors
    /// Returns `QueueError::Validation` if the key is blank or `value` does
    /// not parse as `value_type`, or an error if the database operation fails.
    pub async fn set_config(
        &self,
        key: &str,
        value: &str,
        value_type: ConfigValueType,
        description: Option<&str>,
    ) -> Result<ConfigItem> {
        if key.trim().is_empty() {
            return Err(QueueError::Validation(
                "config key must not be empty".to_string(),
            ));
        }
        value_type.parse(value)?;

        let item = sqlx::query_as::<_, ConfigRow>(&format!(
            "INSERT INTO queue_config (key, value, value_type, description, updated_at)
             VALUES ($1, $2, $3, $4, NOW())
             ON CONFLICT (key) DO UPDATE
             SET value = EXCLUDED.value,
                 value_type = EXCLUDED.value_type,
                 description = COALESCE(EXCLUDED.description, queue_config.description),
                 updated_at = NOW()
             RETURNING {CONFIG_COLUMNS}"
        ))
        .bind(key)
        .bind(value)
        .bind(value_type.as_str())
        .bind(description)
        .fetch_one(self.pool())
        .await
        .map_err(|e| QueueError::from_sqlx("Failed to write config", &e))
        .and_then(ConfigItem::try_from)?;

        info!(key, value_type = %value_type, "Config updated");
        Ok(item)
    }

    /// # Errors
    /// Returns an error if the database operation fails.
    pub async fn list_config(&self) -> Result<Vec<ConfigItem>> {
        sqlx::query_as::<_, ConfigRow>(&format!(
            "SELECT {CONFIG_COLUMNS} FROM queue_config ORDER BY key ASC"
        ))
        .fetch_all(self.pool())
        .await
        .map_err(|e| QueueError::from_sqlx("Failed to list config", &e))?
        .into_iter()
        .map(ConfigItem::try_from)
        .collect()
    }

    /// Reads the staleness threshold override, if one is stored.
    ///
    /// A stored value that is not a positive integer is ignored.
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    pub async fn stale_threshold_minutes(&self) -> Result<Option<u32>> {
        Ok(self
            .get_config(STALE_THRESHOLD_KEY)
            .await?
            .and_then(|item| item.typed_value().ok())
            .and_then(|value| value.as_int())
            .and_then(|minutes| u32::try_from(minutes).ok())
            .filter(|minutes| *minutes > 0))
    }
}
