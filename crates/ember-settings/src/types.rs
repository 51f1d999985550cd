//! Settings type definitions.
//!
//! All types use camelCase JSON keys and `#[serde(default)]`, so a partial
//! settings file only needs the keys it overrides.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "logging": { "level": "debug" },
///   "lifecycle": { "busCapacity": 4096 }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmberSettings {
    /// Logging configuration.
    pub logging: LoggingSettings,
    /// Run lifecycle dispatch configuration.
    pub lifecycle: LifecycleSettings,
}

impl EmberSettings {
    /// Reject values the runtime cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.lifecycle.bus_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "lifecycle.busCapacity must be greater than zero".into(),
            ));
        }
        if self.lifecycle.callback_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "lifecycle.callbackQueueCapacity must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level for the stderr subscriber when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

/// Lifecycle dispatch settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LifecycleSettings {
    /// Broadcast capacity of the process-wide event bus.
    pub bus_capacity: usize,
    /// Bound of each per-run sink queue.
    pub callback_queue_capacity: usize,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            bus_capacity: 1024,
            callback_queue_capacity: 256,
        }
    }
}
