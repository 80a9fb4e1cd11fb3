//! Per-caller rate limiting using GCRA (Generic Cell Rate Algorithm).
//!
//! Each [`MethodClass`] has its own budget of `limit` calls per window,
//! tracked per caller IP. A caller that spends its whole budget is refused
//! until enough of the window has passed to replenish a call. Counters live
//! in memory only.

use botnet_types::config::RateLimitConfig;
use botnet_types::error::{BotNetError, BotNetResult};
use botnet_types::method::MethodClass;
use governor::clock::{Clock, DefaultClock};
use governor::state::keyed::DashMapStateStore;
use governor::{Quota, RateLimiter};
use std::collections::HashMap;
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::{debug, warn};

pub type KeyedRateLimiter = RateLimiter<IpAddr, DashMapStateStore<IpAddr>, DefaultClock>;

/// Budget for one class from the config.
pub fn class_limit(config: &RateLimitConfig, class: MethodClass) -> u32 {
    match class {
        MethodClass::Public => config.public,
        MethodClass::FriendshipRequest => config.friendship_request,
        MethodClass::Negotiation => config.negotiation,
        MethodClass::Login => config.login,
        MethodClass::MessageSend => config.message_send,
        MethodClass::SessionRead => config.session_read,
    }
}

/// `limit` calls per `window`, all available as a burst.
fn quota(limit: u32, window: Duration) -> Quota {
    let burst = NonZeroU32::new(limit).unwrap_or(NonZeroU32::MIN);
    let window = window.max(Duration::from_millis(1));
    let period = (window / burst.get()).max(Duration::from_nanos(1));
    match Quota::with_period(period) {
        Some(q) => q.allow_burst(burst),
        None => Quota::per_second(burst),
    }
}

/// One keyed limiter per method class.
pub struct ClassRateLimiter {
    limiters: HashMap<MethodClass, KeyedRateLimiter>,
}

impl ClassRateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let window = config.window();
        let limiters = MethodClass::ALL
            .into_iter()
            .map(|class| {
                let limit = class_limit(config, class);
                if limit == 0 {
                    warn!(%class, "Rate limit of 0 is not allowed, using 1");
                }
                (class, RateLimiter::keyed(quota(limit, window)))
            })
            .collect();
        Self { limiters }
    }

    /// Charge one call to `caller` in `class`.
    pub fn admit(&self, caller: IpAddr, class: MethodClass) -> BotNetResult<()> {
        let limiter = self.limiters.get(&class).ok_or_else(|| {
            BotNetError::Internal(format!("no rate limiter configured for class {class}"))
        })?;
        limiter.check_key(&caller).map_err(|not_until| {
            let retry_after = not_until.wait_time_from(limiter.clock().now());
            debug!(%caller, %class, retry_ms = retry_after.as_millis() as u64, "Rate limit exceeded");
            BotNetError::RateLimited { retry_after }
        })
    }

    /// Drop state for callers whose budgets are full again.
    pub fn prune(&self) {
        for limiter in self.limiters.values() {
            limiter.retain_recent();
            limiter.shrink_to_fit();
        }
    }

    /// Callers currently tracked across all classes.
    pub fn tracked_callers(&self) -> usize {
        self.limiters.values().map(|l| l.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(limit: u32, window_secs: u64) -> ClassRateLimiter {
        ClassRateLimiter::new(&RateLimitConfig {
            window_secs,
            public: limit,
            friendship_request: limit,
            negotiation: limit,
            login: limit,
            message_send: limit,
            session_read: limit,
        })
    }

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([10, 0, 0, last])
    }

    #[test]
    fn test_limit_admitted_then_refused() {
        let rl = limiter(3, 60);
        for _ in 0..3 {
            rl.admit(ip(1), MethodClass::Login).unwrap();
        }
        match rl.admit(ip(1), MethodClass::Login) {
            Err(BotNetError::RateLimited { retry_after }) => {
                assert!(retry_after > Duration::ZERO);
                assert!(retry_after <= Duration::from_secs(20));
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[test]
    fn test_callers_and_classes_are_independent() {
        let rl = limiter(1, 60);
        rl.admit(ip(1), MethodClass::Login).unwrap();
        assert!(rl.admit(ip(1), MethodClass::Login).is_err());
        rl.admit(ip(2), MethodClass::Login).unwrap();
        rl.admit(ip(1), MethodClass::Public).unwrap();
    }

    #[test]
    fn test_budget_recovers_after_window() {
        let rl = limiter(2, 1);
        rl.admit(ip(1), MethodClass::MessageSend).unwrap();
        rl.admit(ip(1), MethodClass::MessageSend).unwrap();
        assert!(rl.admit(ip(1), MethodClass::MessageSend).is_err());
        std::thread::sleep(Duration::from_millis(1100));
        rl.admit(ip(1), MethodClass::MessageSend).unwrap();
        rl.admit(ip(1), MethodClass::MessageSend).unwrap();
    }

    #[test]
    fn test_zero_limit_still_admits_one() {
        let rl = limiter(0, 60);
        rl.admit(ip(1), MethodClass::Public).unwrap();
        assert!(rl.admit(ip(1), MethodClass::Public).is_err());
    }

    #[test]
    fn test_missing_class_limiter_refuses() {
        let rl = ClassRateLimiter {
            limiters: HashMap::new(),
        };
        assert!(matches!(
            rl.admit(ip(1), MethodClass::Public),
            Err(BotNetError::Internal(_))
        ));
    }

    #[test]
    fn test_class_limits_come_from_config() {
        let config = RateLimitConfig::default();
        assert_eq!(class_limit(&config, MethodClass::FriendshipRequest), 5);
        assert_eq!(class_limit(&config, MethodClass::SessionRead), 120);
    }

    #[test]
    fn test_prune_keeps_exhausted_callers() {
        let rl = limiter(1, 60);
        rl.admit(ip(1), MethodClass::Login).unwrap();
        rl.prune();
        assert!(rl.admit(ip(1), MethodClass::Login).is_err());
    }
}
