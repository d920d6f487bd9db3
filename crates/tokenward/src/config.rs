//! Top-level configuration.

use serde::{Deserialize, Serialize};
use tokenward_schedule::ScheduleConfig;
use tokenward_session::{BridgeConfig, DEFAULT_EVENT_CAPACITY};

/// Everything a [`SessionLifecycle`](crate::SessionLifecycle) can be
/// tuned with.
///
/// Every field has a default, so a config file only needs the values it
/// changes:
///
/// ```
/// use tokenward::LifecycleConfig;
///
/// let cfg: LifecycleConfig =
///     serde_json::from_str(r#"{ "event_capacity": 16 }"#).unwrap();
/// assert_eq!(cfg.event_capacity, 16);
/// assert_eq!(cfg.schedule, Default::default());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Refresh timing.
    pub schedule: ScheduleConfig,
    /// Sign-out grace window, sign-in cancellation, public routes.
    pub bridge: BridgeConfig,
    /// Buffered session events per subscriber before it starts lagging.
    pub event_capacity: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            schedule: ScheduleConfig::default(),
            bridge: BridgeConfig::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl LifecycleConfig {
    /// Validates both nested configs and replaces a zero event capacity.
    pub fn validated(mut self) -> Self {
        self.schedule = self.schedule.validated();
        self.bridge = self.bridge.validated();
        if self.event_capacity == 0 {
            tracing::warn!(default = DEFAULT_EVENT_CAPACITY, "event_capacity of zero, using default");
            self.event_capacity = DEFAULT_EVENT_CAPACITY;
        }
        self
    }
}
