// Shared counter stores backing the fixed-window rate limiter

use async_trait::async_trait;
use redis::{aio::ConnectionManager, Script};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::auth::error::AuthError;
use crate::db::with_timeout;

/// Increment the counter and start the window on the first hit.
/// A key left without an expiry is given one so it cannot block forever.
const INCREMENT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 or redis.call('PTTL', KEYS[1]) < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return {count, redis.call('PTTL', KEYS[1])}
"#;

/// Counter value and time left in the current window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    pub count: u64,
    pub ttl: Duration,
}

/// Store holding per-key request counters
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Current window for `key`, or `None` if no window is open
    async fn current(&self, key: &str) -> Result<Option<WindowState>, AuthError>;

    /// Atomically count one request, opening a window of `window` if none exists
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowState, AuthError>;
}

/// Redis-backed counters shared by every process instance
#[derive(Clone)]
pub struct RedisCounterStore {
    conn: ConnectionManager,
    script: Script,
    timeout: Duration,
}

impl RedisCounterStore {
    pub fn new(conn: ConnectionManager, timeout: Duration) -> Self {
        Self {
            conn,
            script: Script::new(INCREMENT_SCRIPT),
            timeout,
        }
    }

    /// Open a managed connection to `redis_url`
    pub async fn connect(redis_url: &str, timeout: Duration) -> Result<Self, AuthError> {
        let client = redis::Client::open(redis_url)?;
        let conn = with_timeout(timeout, ConnectionManager::new(client)).await?;
        tracing::info!("Redis connection established");
        Ok(Self::new(conn, timeout))
    }
}

fn millis_to_ttl(pttl: i64) -> Duration {
    Duration::from_millis(pttl.max(0) as u64)
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn current(&self, key: &str) -> Result<Option<WindowState>, AuthError> {
        let mut conn = self.conn.clone();
        let (count, pttl): (Option<u64>, i64) = with_timeout(
            self.timeout,
            redis::pipe().get(key).pttl(key).query_async(&mut conn),
        )
        .await?;

        // PTTL is -2 for a missing key and -1 for a key without expiry
        Ok(match count {
            Some(count) if pttl > 0 => Some(WindowState {
                count,
                ttl: millis_to_ttl(pttl),
            }),
            _ => None,
        })
    }

    async fn increment(&self, key: &str, window: Duration) -> Result<WindowState, AuthError> {
        let mut conn = self.conn.clone();
        let window_ms = window.as_millis().max(1) as u64;
        let (count, pttl): (u64, i64) = with_timeout(
            self.timeout,
            self.script.key(key).arg(window_ms).invoke_async(&mut conn),
        )
        .await?;

        Ok(WindowState {
            count,
            ttl: millis_to_ttl(pttl),
        })
    }
}

/// Window count above which `increment` sweeps out closed windows
const PRUNE_THRESHOLD: usize = 1024;

/// Process-local counters for development and tests
pub struct MemoryCounterStore {
    windows: Mutex<HashMap<String, (u64, Instant)>>,
    prune_threshold: usize,
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::with_prune_threshold(PRUNE_THRESHOLD)
    }
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prune_threshold(prune_threshold: usize) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            prune_threshold,
        }
    }

    /// Number of windows currently held, open or not
    pub async fn tracked_keys(&self) -> usize {
        self.windows.lock().await.len()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn current(&self, key: &str) -> Result<Option<WindowState>, AuthError> {
        let windows = self.windows.lock().await;
        let now = Instant::now();

        Ok(windows
            .get(key)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(count, expires_at)| WindowState {
                count: *count,
                ttl: *expires_at - now,
            }))
    }

    async fn increment(&self, key: &str, window: Duration) -> Result<WindowState, AuthError> {
        let mut windows = self.windows.lock().await;
        let now = Instant::now();

        if windows.len() >= self.prune_threshold {
            windows.retain(|_, (_, expires_at)| *expires_at > now);
        }

        let entry = windows
            .entry(key.to_string())
            .or_insert((0, now + window));
        if entry.1 <= now {
            *entry = (0, now + window);
        }
        entry.0 += 1;

        Ok(WindowState {
            count: entry.0,
            ttl: entry.1 - now,
        })
    }
}
