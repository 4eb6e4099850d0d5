//! Timer identities and the RFC 3261 timer configuration.
//!
//! Retransmission timers (A, E, G) start at T1 and double on every firing,
//! capped at T2. Timeout timers (B, F, H) and the wait timers D and J use the
//! transaction timeout (64*T1 by default). Timer K waits T4. Wait timers are
//! skipped entirely on reliable transports.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The RFC 3261 timers driven by the transaction layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerType {
    /// INVITE client request retransmission
    A,
    /// INVITE client transaction timeout
    B,
    /// INVITE client wait for retransmitted final responses
    D,
    /// Non-INVITE client request retransmission
    E,
    /// Non-INVITE client transaction timeout
    F,
    /// INVITE server final response retransmission
    G,
    /// INVITE server wait for ACK
    H,
    /// Non-INVITE server wait for retransmitted requests
    J,
    /// Non-INVITE client wait for retransmitted responses
    K,
}

impl TimerType {
    /// True for the timers that drive retransmission with backoff.
    pub fn is_retransmission(&self) -> bool {
        matches!(self, TimerType::A | TimerType::E | TimerType::G)
    }
}

impl fmt::Display for TimerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TimerType::A => "A",
            TimerType::B => "B",
            TimerType::D => "D",
            TimerType::E => "E",
            TimerType::F => "F",
            TimerType::G => "G",
            TimerType::H => "H",
            TimerType::J => "J",
            TimerType::K => "K",
        };
        f.write_str(name)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Base timer values for SIP transactions.
///
/// Serialized with every duration in milliseconds:
///
/// ```rust
/// use siptx_transaction_core::timer::TimerSettings;
/// use std::time::Duration;
///
/// let settings = TimerSettings::default().with_t1(Duration::from_millis(250));
/// assert_eq!(settings.transaction_timeout, Duration::from_secs(32));
/// assert!(settings.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerSettings {
    /// RTT estimate and initial retransmission interval
    #[serde(with = "duration_ms")]
    pub t1: Duration,
    /// Retransmission interval cap
    #[serde(with = "duration_ms")]
    pub t2: Duration,
    /// Maximum time a message stays in the network
    #[serde(with = "duration_ms")]
    pub t4: Duration,
    /// Timers B, F, H, D and J
    #[serde(with = "duration_ms")]
    pub transaction_timeout: Duration,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            t1: Duration::from_millis(500),
            t2: Duration::from_secs(4),
            t4: Duration::from_secs(5),
            transaction_timeout: Duration::from_secs(32),
        }
    }
}

impl TimerSettings {
    pub fn with_t1(mut self, t1: Duration) -> Self {
        self.t1 = t1;
        self
    }

    pub fn with_t2(mut self, t2: Duration) -> Self {
        self.t2 = t2;
        self
    }

    pub fn with_t4(mut self, t4: Duration) -> Self {
        self.t4 = t4;
        self
    }

    pub fn with_transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = timeout;
        self
    }

    /// Rejects settings the state machines cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.t1.is_zero() {
            return Err(Error::InvalidConfig("T1 must be greater than zero".into()));
        }
        if self.t2 < self.t1 {
            return Err(Error::InvalidConfig(format!(
                "T2 ({:?}) must not be shorter than T1 ({:?})",
                self.t2, self.t1
            )));
        }
        if self.transaction_timeout.is_zero() {
            return Err(Error::InvalidConfig("transaction timeout must be greater than zero".into()));
        }
        Ok(())
    }

    /// Next retransmission interval after `current` fired.
    pub fn next_retransmit_interval(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.t2)
    }

    /// Duration of `timer` on the given kind of transport.
    ///
    /// Retransmission timers return their initial interval. Wait timers are
    /// zero on reliable transports.
    pub fn duration(&self, timer: TimerType, reliable: bool) -> Duration {
        match timer {
            TimerType::A | TimerType::E | TimerType::G => self.t1,
            TimerType::B | TimerType::F | TimerType::H => self.transaction_timeout,
            TimerType::D | TimerType::J if reliable => Duration::ZERO,
            TimerType::D | TimerType::J => self.transaction_timeout,
            TimerType::K if reliable => Duration::ZERO,
            TimerType::K => self.t4,
        }
    }
}
