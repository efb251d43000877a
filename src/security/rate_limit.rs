//! Sliding-window rate limiting middleware.
//!
//! Each key keeps the instants of its admitted requests. A request is admitted
//! when fewer than `max_requests` instants remain inside the trailing window.
//! A timestamp `t` counts as expired once `t <= now - window`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time;

use crate::error::GatewayError;
use crate::http::request::RequestContext;
use crate::http::server::AppState;
use crate::observability::metrics;
use crate::security::identity::RateLimitKey;

type Window = Arc<Mutex<VecDeque<Instant>>>;

/// Outcome of a single admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Configured maximum per window.
    pub limit: usize,
    /// Requests still available in the current window.
    pub remaining: usize,
    /// Time until the oldest admitted request leaves the window (rejections only).
    pub retry_after: Option<Duration>,
}

/// Per-key sliding-window limiter.
///
/// The map is sharded and every key owns its own mutex, so unrelated keys
/// never wait on each other beyond a brief shard lookup.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    windows: DashMap<String, Window>,
    max_requests: usize,
    window: Duration,
}

impl SlidingWindowLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            max_requests,
            window,
        }
    }

    /// Admit or reject one request for `key` at `now`.
    pub fn allow(&self, key: &str, now: Instant) -> bool {
        self.check(key, now).allowed
    }

    /// Like [`allow`](Self::allow), with the numbers needed for response headers.
    pub fn check(&self, key: &str, now: Instant) -> RateLimitDecision {
        debug_assert!(!key.is_empty(), "rate limit key must not be empty");

        let slot = self.slot(key);
        let mut timestamps = slot.lock().unwrap_or_else(PoisonError::into_inner);
        prune(&mut timestamps, now, self.window);

        let count = timestamps.len();
        if count >= self.max_requests {
            let retry_after = timestamps
                .front()
                .map(|oldest| match oldest.checked_add(self.window) {
                    Some(expires) => expires.saturating_duration_since(now),
                    None => self.window,
                });
            return RateLimitDecision {
                allowed: false,
                limit: self.max_requests,
                remaining: 0,
                retry_after,
            };
        }

        insert_sorted(&mut timestamps, now);
        RateLimitDecision {
            allowed: true,
            limit: self.max_requests,
            remaining: self.max_requests - count - 1,
            retry_after: None,
        }
    }

    /// Drop keys with no timestamps left inside the window. Returns how many were removed.
    ///
    /// Slots currently held by an in-flight `check` are skipped.
    pub fn purge_idle(&self, now: Instant) -> usize {
        let mut removed = 0;
        self.windows.retain(|_, slot| {
            // Clones are only handed out under the shard lock `retain` holds now.
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            let mut timestamps = slot.lock().unwrap_or_else(PoisonError::into_inner);
            prune(&mut timestamps, now, self.window);
            let keep = !timestamps.is_empty();
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn slot(&self, key: &str) -> Window {
        if let Some(slot) = self.windows.get(key) {
            return Arc::clone(slot.value());
        }
        Arc::clone(self.windows.entry(key.to_string()).or_default().value())
    }
}

fn prune(timestamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    let Some(cutoff) = now.checked_sub(window) else {
        return;
    };
    while let Some(&oldest) = timestamps.front() {
        if oldest > cutoff {
            break;
        }
        timestamps.pop_front();
    }
}

// Callers racing for the same key may arrive with instants out of order.
fn insert_sorted(timestamps: &mut VecDeque<Instant>, now: Instant) {
    match timestamps.back() {
        Some(&last) if last > now => {
            let idx = timestamps.partition_point(|t| *t <= now);
            timestamps.insert(idx, now);
        }
        _ => timestamps.push_back(now),
    }
}

/// Periodically purge idle keys until shutdown.
pub fn spawn_sweeper(
    limiter: Arc<SlidingWindowLimiter>,
    every: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(every);
        // First tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = limiter.purge_idle(Instant::now());
                    if removed > 0 {
                        tracing::debug!(
                            removed,
                            tracked = limiter.tracked_keys(),
                            "Swept idle rate limit keys"
                        );
                    }
                }
                _ = shutdown.recv() => {
                    tracing::debug!("Rate limit sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    })
}

/// Middleware function for per-caller rate limiting.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    if !state.config.rate_limit.enabled {
        return next.run(request).await;
    }

    let key = request
        .extensions()
        .get::<RequestContext>()
        .map(RateLimitKey::for_context)
        .unwrap_or_else(RateLimitKey::anonymous);

    let decision = state.limiter.check(key.as_str(), Instant::now());

    if let Some(ctx) = request.extensions_mut().get_mut::<RequestContext>() {
        ctx.rate_limit_key = Some(key.clone());
    }

    if decision.allowed {
        return next.run(request).await;
    }

    tracing::debug!(client = %key, limit = decision.limit, "Rate limit exceeded");
    metrics::record_rate_limited(key.kind());

    GatewayError::RateLimited {
        limit: decision.limit,
        retry_after: decision.retry_after.unwrap_or(state.limiter.window()),
    }
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn clock() -> impl Fn(f64) -> Instant {
        let t0 = Instant::now();
        move |secs| t0 + Duration::from_secs_f64(secs)
    }

    #[test]
    fn test_window_correctness() {
        let at = clock();
        let limiter = SlidingWindowLimiter::new(3, Duration::from_secs(60));

        assert!(limiter.allow("ip:10.0.0.1", at(0.0)));
        assert!(limiter.allow("ip:10.0.0.1", at(0.0)));
        assert!(limiter.allow("ip:10.0.0.1", at(0.0)));
        assert!(!limiter.allow("ip:10.0.0.1", at(0.0)));

        assert!(limiter.allow("ip:10.0.0.1", at(61.0)));
    }

    #[test]
    fn test_window_boundary_is_exclusive() {
        let at = clock();
        let limiter = SlidingWindowLimiter::new(1, Duration::from_secs(60));

        assert!(limiter.allow("k", at(0.0)));
        assert!(!limiter.allow("k", at(59.999)));
        // Exactly `window` later the first timestamp has expired.
        assert!(limiter.allow("k", at(60.0)));
    }

    #[test]
    fn test_rejections_are_not_recorded() {
        let at = clock();
        let limiter = SlidingWindowLimiter::new(1, Duration::from_secs(60));

        assert!(limiter.allow("k", at(0.0)));
        assert!(!limiter.allow("k", at(30.0)));
        assert!(!limiter.allow("k", at(45.0)));
        // Had the rejected calls been recorded, this would still be over the limit.
        assert!(limiter.allow("k", at(61.0)));
    }

    #[test]
    fn test_huge_window_rejects_without_overflow() {
        let at = clock();
        let window = Duration::from_secs(u64::MAX / 2);
        let limiter = SlidingWindowLimiter::new(1, window);

        assert!(limiter.allow("k", at(0.0)));
        let decision = limiter.check("k", at(1.0));
        assert!(!decision.allowed);
        assert_eq!(decision.retry_after, Some(window));
    }

    #[test]
    fn test_keys_are_independent() {
        let at = clock();
        let limiter = SlidingWindowLimiter::new(2, Duration::from_secs(60));

        assert!(limiter.allow("user:a", at(0.0)));
        assert!(limiter.allow("user:a", at(0.0)));
        assert!(!limiter.allow("user:a", at(1.0)));

        assert!(limiter.allow("user:b", at(1.0)));
        assert!(limiter.allow("user:b", at(1.0)));
        assert!(!limiter.allow("user:b", at(1.0)));
        assert!(!limiter.allow("user:a", at(2.0)));
    }

    #[test]
    fn test_decision_numbers() {
        let at = clock();
        let limiter = SlidingWindowLimiter::new(2, Duration::from_secs(10));

        let first = limiter.check("k", at(0.0));
        assert_eq!((first.allowed, first.remaining), (true, 1));

        let second = limiter.check("k", at(4.0));
        assert_eq!((second.allowed, second.remaining), (true, 0));

        let rejected = limiter.check("k", at(5.0));
        assert!(!rejected.allowed);
        assert_eq!(rejected.limit, 2);
        assert_eq!(rejected.retry_after, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_out_of_order_instants_stay_sorted() {
        let at = clock();
        let limiter = SlidingWindowLimiter::new(3, Duration::from_secs(10));

        assert!(limiter.allow("k", at(5.0)));
        assert!(limiter.allow("k", at(2.0)));
        assert!(limiter.allow("k", at(8.0)));

        // At t=12.5 only the t=2 entry has expired; pruning from the front must find it.
        assert!(limiter.allow("k", at(12.5)));
        assert!(!limiter.allow("k", at(12.5)));
    }

    #[test]
    fn test_purge_idle() {
        let at = clock();
        let limiter = SlidingWindowLimiter::new(5, Duration::from_secs(10));

        limiter.allow("old", at(0.0));
        limiter.allow("fresh", at(8.0));
        assert_eq!(limiter.tracked_keys(), 2);

        assert_eq!(limiter.purge_idle(at(12.0)), 1);
        assert_eq!(limiter.tracked_keys(), 1);

        // The surviving key still carries its history.
        for _ in 0..4 {
            assert!(limiter.allow("fresh", at(12.0)));
        }
        assert!(!limiter.allow("fresh", at(12.0)));
    }

    #[test]
    fn test_purge_skips_slot_in_use() {
        let at = clock();
        let limiter = SlidingWindowLimiter::new(5, Duration::from_secs(10));
        limiter.allow("busy", at(0.0));

        let held = limiter.slot("busy");
        assert_eq!(limiter.purge_idle(at(30.0)), 0);
        assert_eq!(limiter.tracked_keys(), 1);

        drop(held);
        assert_eq!(limiter.purge_idle(at(30.0)), 1);
    }

    #[test]
    fn test_concurrent_admission_is_exact() {
        let limiter = Arc::new(SlidingWindowLimiter::new(50, Duration::from_secs(60)));
        let now = Instant::now();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                thread::spawn(move || (0..25).filter(|_| limiter.allow("shared", now)).count())
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 50);
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_shutdown() {
        let limiter = Arc::new(SlidingWindowLimiter::new(1, Duration::from_millis(10)));
        limiter.allow("k", Instant::now());

        let (tx, rx) = broadcast::channel(1);
        let handle = spawn_sweeper(limiter.clone(), Duration::from_millis(20), rx);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(limiter.tracked_keys(), 0);

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }
}
