//! Prometheus metrics for database connection pool
//!
//! Gauges are fed from [`PoolState`] snapshots, which the consumer also
//! reports on its health endpoint.

use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, HistogramVec,
    IntCounterVec, IntGaugeVec,
};
use sqlx::{pool::PoolConnection, PgPool, Postgres};
use std::time::Instant;

lazy_static::lazy_static! {
    /// Database connection pool size by state (idle/active/max)
    static ref DB_POOL_CONNECTIONS: IntGaugeVec = register_int_gauge_vec!(
        "db_pool_connections",
        "Database pool connection count by state",
        &["service", "state"]
    ).expect("Prometheus metrics registration should succeed at startup");

    /// Time to acquire a connection from the pool
    static ref DB_POOL_ACQUIRE_DURATION: HistogramVec = register_histogram_vec!(
        "db_pool_acquire_duration_seconds",
        "Time to acquire connection from pool",
        &["service"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]
    ).expect("Prometheus metrics registration should succeed at startup");

    /// Connection acquisition errors by type
    static ref DB_POOL_CONNECTION_ERRORS: IntCounterVec = register_int_counter_vec!(
        "db_pool_connection_errors_total",
        "Connection acquisition errors",
        &["service", "error_type"]
    ).expect("Prometheus metrics registration should succeed at startup");
}

/// Point-in-time connection counts of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolState {
    pub size: u32,
    pub idle: u32,
    pub max: u32,
}

impl PoolState {
    pub fn of(pool: &PgPool) -> Self {
        let size = pool.size();
        Self {
            size,
            // num_idle is sampled separately and can briefly exceed size
            idle: (pool.num_idle() as u32).min(size),
            max: pool.options().get_max_connections(),
        }
    }

    /// Connections currently checked out
    pub fn active(&self) -> u32 {
        self.size - self.idle
    }

    /// Every connection is open and checked out, so the next write waits
    pub fn is_saturated(&self) -> bool {
        self.max > 0 && self.active() >= self.max
    }
}

/// Update connection pool gauges (called periodically)
pub(crate) fn update_pool_metrics(pool: &PgPool, service: &str) {
    let state = PoolState::of(pool);

    DB_POOL_CONNECTIONS
        .with_label_values(&[service, "idle"])
        .set(state.idle as i64);

    DB_POOL_CONNECTIONS
        .with_label_values(&[service, "active"])
        .set(state.active() as i64);

    DB_POOL_CONNECTIONS
        .with_label_values(&[service, "max"])
        .set(state.max as i64);
}

/// Label for a failed acquisition
fn acquire_error_type(err: &sqlx::Error) -> &'static str {
    match err {
        sqlx::Error::PoolTimedOut => "timeout",
        sqlx::Error::PoolClosed => "closed",
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) => "io",
        _ => "other",
    }
}

/// Acquire a connection from the pool and record metrics
///
/// Drop-in replacement for `pool.acquire().await`. The returned
/// `PoolConnection` goes back to the pool when dropped, on every exit path.
pub async fn acquire_with_metrics(
    pool: &PgPool,
    service: &str,
) -> Result<PoolConnection<Postgres>, sqlx::Error> {
    let start = Instant::now();
    let result = pool.acquire().await;

    DB_POOL_ACQUIRE_DURATION
        .with_label_values(&[service])
        .observe(start.elapsed().as_secs_f64());

    if let Err(e) = &result {
        DB_POOL_CONNECTION_ERRORS
            .with_label_values(&[service, acquire_error_type(e)])
            .inc();
    }

    result
}
