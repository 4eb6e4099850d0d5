//! Transaction timers.
//!
//! - [`Timer`]: a cancellable one-shot scheduled callback, the building block
//!   for every RFC 3261 timer.
//! - [`TimerType`]: the lettered timers of RFC 3261 Section 17 used here.
//! - [`TimerSettings`]: T1, T2, T4 and the transaction timeout, from which
//!   every timer duration is derived.

pub mod handle;
pub mod types;

pub use handle::Timer;
pub use types::{TimerSettings, TimerType};
