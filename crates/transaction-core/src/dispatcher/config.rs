use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::timer::TimerSettings;

const DEFAULT_EVENT_CAPACITY: usize = 100;

/// Dispatcher configuration.
///
/// ```rust
/// use siptx_transaction_core::DispatcherConfig;
///
/// let config: DispatcherConfig = serde_json::from_str(r#"{"timers": {"t1": 250}, "auto_trying": false}"#).unwrap();
/// assert_eq!(config.timers.t1.as_millis(), 250);
/// assert_eq!(config.event_capacity, 100);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub timers: TimerSettings,
    /// Capacity of the transport event channel created by `Dispatcher::bind_udp`
    pub event_capacity: usize,
    /// Send `100 Trying` as soon as an INVITE server transaction is created
    pub auto_trying: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            timers: TimerSettings::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            auto_trying: true,
        }
    }
}

impl DispatcherConfig {
    pub fn with_timers(mut self, timers: TimerSettings) -> Self {
        self.timers = timers;
        self
    }

    pub fn with_auto_trying(mut self, auto_trying: bool) -> Self {
        self.auto_trying = auto_trying;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.event_capacity == 0 {
            return Err(crate::Error::InvalidConfig("event capacity must be greater than zero".into()));
        }
        self.timers.validate()
    }
}
