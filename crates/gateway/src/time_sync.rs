//! Tracks the clock offset between this process and the exchange server,
//! refreshed by periodic sampling rather than trusted once at startup.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

#[derive(Clone, Default)]
pub struct TimeOffset(Arc<AtomicI64>);

impl TimeOffset {
    pub fn new() -> Self {
        Self(Arc::new(AtomicI64::new(0)))
    }

    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }

    fn set(&self, value: i64) {
        self.0.store(value, Ordering::Relaxed);
    }

    /// `now + offset`, the timestamp every signed request must carry.
    pub fn now_adjusted_millis(&self) -> i64 {
        local_millis() + self.get()
    }
}

fn local_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as i64
}

/// Samples the server clock once: `offset = serverTime - (afterLocal - roundTripTime/2)`.
pub fn compute_offset(before_local: i64, server_time: i64, after_local: i64) -> i64 {
    let round_trip = after_local - before_local;
    server_time - (after_local - round_trip / 2)
}

/// Spawns a task that refreshes `offset` every `interval` by calling
/// `sample`, which should perform the `getServerTime` round trip and return
/// `(before_local, server_time, after_local)`.
pub fn start_periodic_sync<F, Fut>(
    offset: TimeOffset,
    interval: std::time::Duration,
    sample: F,
) -> tokio::task::JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<(i64, i64, i64), crate::error::GatewayError>> + Send,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match sample().await {
                Ok((before, server_time, after)) => {
                    offset.set(compute_offset(before, server_time, after));
                }
                Err(err) => warn!(%err, "time offset sync sample failed, keeping previous offset"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_accounts_for_round_trip_latency() {
        let before = 1_000;
        let server_time = 1_050;
        let after = 1_020;
        assert_eq!(compute_offset(before, server_time, after), 40);
    }

    #[test]
    fn zero_latency_offset_equals_server_minus_local() {
        assert_eq!(compute_offset(1000, 1100, 1000), 100);
    }
}
