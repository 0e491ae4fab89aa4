//! Per-client fixed-window rate limiting for the `/api` routes.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;

use crate::errors::AppError;

const WINDOW: Duration = Duration::from_secs(60);

/// Tracked clients above which stale windows are pruned.
const CLEANUP_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    /// Client -> (request count, window start)
    clients: Arc<DashMap<Option<IpAddr>, (u32, Instant)>>,
}

impl RateLimiter {
    /// `limit` requests per minute per client. Zero disables limiting.
    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit, WINDOW)
    }

    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            clients: Arc::new(DashMap::new()),
        }
    }

    /// Count one request from `client`. `Err` carries the seconds until the
    /// client's window resets.
    pub fn check(&self, client: Option<IpAddr>, now: Instant) -> Result<(), u64> {
        if self.limit == 0 {
            return Ok(());
        }

        let mut entry = self.clients.entry(client).or_insert((0, now));
        let (count, started) = entry.value_mut();
        if now.duration_since(*started) >= self.window {
            *count = 0;
            *started = now;
        }
        let result = if *count >= self.limit {
            let remaining = self.window.saturating_sub(now.duration_since(*started));
            Err(remaining.as_secs().max(1))
        } else {
            *count += 1;
            Ok(())
        };
        // Release the shard lock before pruning
        drop(entry);

        if self.clients.len() > CLEANUP_THRESHOLD {
            let window = self.window;
            self.clients
                .retain(|_, (_, started)| now.duration_since(*started) < window);
        }
        result
    }

    #[cfg(test)]
    fn tracked_clients(&self) -> usize {
        self.clients.len()
    }
}

/// Axum middleware enforcing the limiter. Clients are keyed by peer address;
/// requests without connection info share one bucket.
pub async fn rate_limit(
    State(limiter): State<RateLimiter>,
    request: Request,
    next: Next,
) -> Response {
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip());

    match limiter.check(client, Instant::now()) {
        Ok(()) => next.run(request).await,
        Err(retry_after_secs) => {
            tracing::warn!(
                "Rate limit exceeded for {}",
                client.map_or_else(|| "unknown client".to_string(), |ip| ip.to_string())
            );
            AppError::RateLimited { retry_after_secs }.into_response()
        }
    }
}
