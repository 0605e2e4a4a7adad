// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, warn};

const ACCEPT_DEADLINE: Duration = Duration::from_secs(1);
const STATS_FLUSH_INTERVAL: Duration = Duration::from_secs(10);
const LEASE_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Default)]
struct ListenerStats {
    accepted: AtomicU64,
    timed_out: AtomicU64,
    errored: AtomicU64,
}

/// Wraps a TCP listener with accept/timeout/error counters and a 1s accept
/// deadline, flushing stats on a 10s ticker via `emit`.
pub struct MeasuredListener {
    inner: TcpListener,
    stats: Arc<ListenerStats>,
}

impl MeasuredListener {
    pub fn new(inner: TcpListener) -> Self {
        MeasuredListener {
            inner,
            stats: Arc::new(ListenerStats::default()),
        }
    }

    /// Spawns the 10s stats-flush ticker. `emit(accepted, timed_out, errored)`
    /// is called with the deltas observed over the last interval.
    pub fn spawn_stats_flusher(
        &self,
        mut emit: impl FnMut(u64, u64, u64) + Send + 'static,
    ) -> tokio::task::JoinHandle<()> {
        let stats = self.stats.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(STATS_FLUSH_INTERVAL);
            let mut last = (0u64, 0u64, 0u64);
            loop {
                interval.tick().await;
                let current = (
                    stats.accepted.load(Ordering::Relaxed),
                    stats.timed_out.load(Ordering::Relaxed),
                    stats.errored.load(Ordering::Relaxed),
                );
                emit(
                    current.0.saturating_sub(last.0),
                    current.1.saturating_sub(last.1),
                    current.2.saturating_sub(last.2),
                );
                last = current;
            }
        })
    }

    /// Accepts one connection, applying the 1s handshake deadline and
    /// bumping the matching counter.
    pub async fn accept(&self) -> io::Result<(TcpStream, std::net::SocketAddr)> {
        match timeout(ACCEPT_DEADLINE, self.inner.accept()).await {
            Ok(Ok(conn)) => {
                self.stats.accepted.fetch_add(1, Ordering::Relaxed);
                Ok(conn)
            }
            Ok(Err(e)) => {
                self.stats.errored.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
            Err(_) => {
                self.stats.timed_out.fetch_add(1, Ordering::Relaxed);
                Err(io::Error::new(io::ErrorKind::TimedOut, "accept deadline exceeded"))
            }
        }
    }
}

/// Returned by [`ConnectionCappedListener::accept`] when the connection
/// lease is exhausted. Modeled after a temporary, non-timeout network error:
/// the accept loop should retry rather than treat this as fatal.
#[derive(Debug)]
pub struct LeaseExhausted;

impl std::fmt::Display for LeaseExhausted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "connection lease exhausted")
    }
}

impl std::error::Error for LeaseExhausted {}

/// Outcome of a capped-listener accept attempt.
#[derive(Debug)]
pub enum AcceptError {
    Io(io::Error),
    LeaseExhausted(LeaseExhausted),
}

/// Wraps a [`MeasuredListener`] with a token-bucket style connection lease:
/// `connection_limit` leases are available, refreshed fully every 30s.
pub struct ConnectionCappedListener {
    inner: MeasuredListener,
    connection_limit: i64,
    leases_remaining: AtomicI64,
}

impl ConnectionCappedListener {
    pub fn new(inner: MeasuredListener, connection_limit: usize) -> Arc<Self> {
        let connection_limit = connection_limit as i64;
        let this = Arc::new(ConnectionCappedListener {
            inner,
            connection_limit,
            leases_remaining: AtomicI64::new(connection_limit),
        });
        let refresher = this.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(LEASE_REFRESH_INTERVAL);
            loop {
                interval.tick().await;
                refresher
                    .leases_remaining
                    .store(refresher.connection_limit, Ordering::Relaxed);
                debug!("connection lease refreshed to {}", refresher.connection_limit);
            }
        });
        this
    }

    /// Accepts a connection if a lease is available, decrementing the count.
    /// Returns [`LeaseExhausted`] otherwise so callers can retry the loop
    /// instead of tearing the listener down.
    pub async fn accept(
        &self,
    ) -> Result<(TcpStream, std::net::SocketAddr), AcceptError> {
        if self.leases_remaining.fetch_sub(1, Ordering::Relaxed) <= 0 {
            self.leases_remaining.fetch_add(1, Ordering::Relaxed);
            return Err(AcceptError::LeaseExhausted(LeaseExhausted));
        }
        match self.inner.accept().await {
            Ok(conn) => Ok(conn),
            Err(e) => {
                self.leases_remaining.fetch_add(1, Ordering::Relaxed);
                Err(AcceptError::Io(e))
            }
        }
    }
}
