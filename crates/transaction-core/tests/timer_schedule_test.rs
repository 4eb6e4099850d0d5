use std::time::Duration;

use proptest::prelude::*;

use siptx_transaction_core::{TimerSettings, TimerType};

proptest! {
    #[test]
    fn retransmit_intervals_double_up_to_t2(t1_ms in 1u64..2_000, extra_ms in 0u64..10_000) {
        let settings = TimerSettings::default()
            .with_t1(Duration::from_millis(t1_ms))
            .with_t2(Duration::from_millis(t1_ms + extra_ms));
        prop_assert!(settings.validate().is_ok());

        for timer in [TimerType::A, TimerType::E, TimerType::G] {
            let mut interval = settings.duration(timer, false);
            prop_assert_eq!(interval, settings.t1);
            for _ in 0..64 {
                let next = settings.next_retransmit_interval(interval);
                prop_assert!(next >= interval);
                prop_assert!(next <= settings.t2);
                prop_assert!(next == interval * 2 || next == settings.t2);
                interval = next;
            }
            prop_assert_eq!(interval, settings.t2);
        }
    }

    #[test]
    fn wait_timers_vanish_on_reliable_transports(t4_ms in 1u64..10_000, timeout_ms in 1u64..100_000) {
        let settings = TimerSettings::default()
            .with_t4(Duration::from_millis(t4_ms))
            .with_transaction_timeout(Duration::from_millis(timeout_ms));

        for timer in [TimerType::D, TimerType::J, TimerType::K] {
            prop_assert_eq!(settings.duration(timer, true), Duration::ZERO);
        }
        prop_assert_eq!(settings.duration(TimerType::K, false), settings.t4);
        prop_assert_eq!(settings.duration(TimerType::D, false), settings.transaction_timeout);
        for timer in [TimerType::B, TimerType::F, TimerType::H] {
            prop_assert_eq!(settings.duration(timer, true), settings.transaction_timeout);
        }
    }
}
