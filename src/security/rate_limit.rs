//! Per-client token-bucket admission control.
//!
//! Every client key owns one bucket. Buckets start full, refill continuously
//! at `refill_rate_per_second` and never hold more than `capacity` tokens.
//! A periodic sweep evicts clients that have been idle too long.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::RateLimitConfig;
use crate::observability::metrics;

/// Errors deriving a client key from the transport.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("cannot derive client key from remote address {0:?}")]
    MalformedClientKey(String),

    #[error("transport supplied no peer address")]
    MissingPeerAddress,
}

/// Client key for a connected peer: its IP address without the port.
///
/// An unspecified address (`0.0.0.0`, `::`) names no particular client
/// and is rejected.
pub fn client_key(addr: &SocketAddr) -> Result<String, AdmissionError> {
    let ip = addr.ip();
    if ip.is_unspecified() {
        return Err(AdmissionError::MalformedClientKey(addr.to_string()));
    }
    Ok(ip.to_string())
}

/// Limiter parameters that may change while the service runs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimiterSettings {
    pub enabled: bool,
    pub capacity: u32,
    pub refill_rate_per_second: f64,
}

impl From<&RateLimitConfig> for LimiterSettings {
    fn from(config: &RateLimitConfig) -> Self {
        Self {
            enabled: config.enabled,
            capacity: config.capacity,
            refill_rate_per_second: config.refill_rate_per_second,
        }
    }
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn full(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
        }
    }

    fn try_acquire(&mut self, capacity: f64, refill_rate: f64, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();

        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_refill = now.max(self.last_refill);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Debug)]
struct ClientState {
    bucket: TokenBucket,
    last_seen: Instant,
}

/// Registry of per-client buckets behind a single lock.
pub struct RateLimiter {
    clients: Mutex<HashMap<String, ClientState>>,
    settings: ArcSwap<LimiterSettings>,
}

impl RateLimiter {
    pub fn new(settings: LimiterSettings) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            settings: ArcSwap::from_pointee(settings),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(LimiterSettings::from(config))
    }

    pub fn settings(&self) -> LimiterSettings {
        **self.settings.load()
    }

    /// Swap in new settings. Existing buckets are clamped to the new
    /// capacity on their next refill.
    pub fn update_settings(&self, settings: LimiterSettings) {
        self.settings.store(Arc::new(settings));
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.load().enabled
    }

    /// Admit or deny one request from `key`.
    pub fn admit(&self, key: &str) -> bool {
        self.admit_at(key, Instant::now())
    }

    pub fn admit_at(&self, key: &str, now: Instant) -> bool {
        let settings = self.settings();
        if !settings.enabled {
            return true;
        }
        let capacity = f64::from(settings.capacity);

        let mut clients = self.lock();
        let tracked_before = clients.len();
        let state = clients
            .entry(key.to_string())
            .or_insert_with(|| ClientState {
                bucket: TokenBucket::full(capacity, now),
                last_seen: now,
            });

        state.last_seen = now.max(state.last_seen);
        let allowed = state
            .bucket
            .try_acquire(capacity, settings.refill_rate_per_second, now);

        let tracked = clients.len();
        drop(clients);

        if tracked != tracked_before {
            metrics::record_tracked_clients(tracked);
        }
        metrics::record_admission(allowed);
        allowed
    }

    /// Number of clients currently held.
    pub fn tracked_clients(&self) -> usize {
        self.lock().len()
    }

    /// Evict every client idle for longer than `idle`. Returns how many
    /// were removed.
    pub fn sweep(&self, idle: Duration) -> usize {
        self.sweep_at(Instant::now(), idle)
    }

    pub fn sweep_at(&self, now: Instant, idle: Duration) -> usize {
        let mut clients = self.lock();
        let before = clients.len();
        clients.retain(|_, state| now.saturating_duration_since(state.last_seen) <= idle);
        let remaining = clients.len();
        drop(clients);

        let evicted = before - remaining;
        metrics::record_evicted_clients(evicted);
        metrics::record_tracked_clients(remaining);
        evicted
    }

    /// Run [`sweep`](Self::sweep) every `interval` until `shutdown` fires.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        idle: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = limiter.sweep(idle);
                        if evicted > 0 {
                            tracing::info!(evicted, remaining = limiter.tracked_clients(), "Evicted idle clients");
                        }
                    }
                    _ = shutdown.recv() => {
                        tracing::debug!("Client sweep stopped");
                        break;
                    }
                }
            }
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ClientState>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::from_config(&RateLimitConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn limiter(capacity: u32, rate: f64) -> RateLimiter {
        RateLimiter::new(LimiterSettings {
            enabled: true,
            capacity,
            refill_rate_per_second: rate,
        })
    }

    #[test]
    fn burst_then_deny_then_refill() {
        let limiter = limiter(4, 2.0);
        let start = Instant::now();

        let decisions: Vec<bool> = (0..5).map(|_| limiter.admit_at("10.0.0.1", start)).collect();
        assert_eq!(decisions, vec![true, true, true, true, false]);

        assert!(limiter.admit_at("10.0.0.1", start + Duration::from_millis(500)));
        assert!(!limiter.admit_at("10.0.0.1", start + Duration::from_millis(500)));
    }

    #[test]
    fn clients_are_independent() {
        let limiter = limiter(1, 1.0);
        let now = Instant::now();
        assert!(limiter.admit_at("a", now));
        assert!(!limiter.admit_at("a", now));
        assert!(limiter.admit_at("b", now));
        assert_eq!(limiter.tracked_clients(), 2);
    }

    #[test]
    fn bucket_never_exceeds_capacity() {
        let limiter = limiter(3, 100.0);
        let start = Instant::now();
        limiter.admit_at("k", start);

        let later = start + Duration::from_secs(3600);
        let allowed = (0..10).filter(|_| limiter.admit_at("k", later)).count();
        assert_eq!(allowed, 3);
    }

    #[test]
    fn disabled_limiter_admits_without_tracking() {
        let limiter = RateLimiter::new(LimiterSettings {
            enabled: false,
            capacity: 1,
            refill_rate_per_second: 1.0,
        });
        assert!((0..100).all(|_| limiter.admit("k")));
        assert_eq!(limiter.tracked_clients(), 0);
    }

    #[test]
    fn updated_capacity_applies_to_existing_buckets() {
        let limiter = limiter(10, 0.001);
        let now = Instant::now();
        assert!(limiter.admit_at("k", now));

        limiter.update_settings(LimiterSettings {
            enabled: true,
            capacity: 2,
            refill_rate_per_second: 0.001,
        });
        let allowed = (0..10).filter(|_| limiter.admit_at("k", now)).count();
        assert_eq!(allowed, 2);
    }

    #[test]
    fn concurrent_admits_never_exceed_capacity() {
        let limiter = Arc::new(limiter(5, 0.001));
        let allowed = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                let allowed = allowed.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        if limiter.admit("shared") {
                            allowed.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        // 0.001 tokens/s cannot add a whole token during the test
        assert_eq!(allowed.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn sweep_removes_exactly_idle_clients() {
        let limiter = limiter(4, 2.0);
        let start = Instant::now();
        limiter.admit_at("stale", start);
        limiter.admit_at("boundary", start + Duration::from_secs(20));
        limiter.admit_at("fresh", start + Duration::from_secs(150));

        let now = start + Duration::from_secs(200);
        let evicted = limiter.sweep_at(now, Duration::from_secs(180));

        assert_eq!(evicted, 1);
        assert_eq!(limiter.tracked_clients(), 2);
        // age exactly equal to the threshold is kept
        assert!(limiter.admit_at("boundary", now));
    }

    #[tokio::test]
    async fn sweeper_stops_on_shutdown() {
        let limiter = Arc::new(limiter(4, 2.0));
        let (tx, rx) = broadcast::channel(1);
        let handle = limiter.spawn_sweeper(Duration::from_millis(10), Duration::ZERO, rx);

        limiter.admit("10.0.0.9");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(limiter.tracked_clients(), 0);

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }

    #[test]
    fn client_key_strips_port() {
        let v4: SocketAddr = "192.168.1.7:51234".parse().unwrap();
        let v6: SocketAddr = "[::1]:8080".parse().unwrap();
        assert_eq!(client_key(&v4).unwrap(), "192.168.1.7");
        assert_eq!(client_key(&v6).unwrap(), "::1");
    }

    #[test]
    fn unspecified_peer_is_malformed() {
        let addr: SocketAddr = "0.0.0.0:4000".parse().unwrap();
        assert_eq!(
            client_key(&addr),
            Err(AdmissionError::MalformedClientKey("0.0.0.0:4000".into()))
        );
    }
}
