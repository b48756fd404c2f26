use crate::error::PersistenceError;
use crate::models::LoanEvent;
use async_trait::async_trait;
use db_pool::acquire_with_metrics;
use sqlx::PgPool;
use tracing::debug;

const INSERT_LOAN_EVENT: &str = r#"
    INSERT INTO loan_events (loan_id, user_id, amount, status, "timestamp")
    VALUES ($1, $2, ROUND($3::float8::numeric, 2), $4, $5)
"#;

const UPSERT_LOAN_EVENT: &str = r#"
    INSERT INTO loan_events (loan_id, user_id, amount, status, "timestamp")
    VALUES ($1, $2, ROUND($3::float8::numeric, 2), $4, $5)
    ON CONFLICT (loan_id) DO UPDATE SET
        user_id = EXCLUDED.user_id,
        amount = EXCLUDED.amount,
        status = EXCLUDED.status,
        "timestamp" = EXCLUDED."timestamp"
"#;

/// How a write treats an existing row with the same `loan_id`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Plain insert; an existing row surfaces as [`PersistenceError::Duplicate`]
    Insert,
    /// Insert or overwrite
    Upsert,
}

/// Durable destination for validated loan events
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn persist(&self, event: &LoanEvent) -> Result<(), PersistenceError>;
}

/// Postgres sink writing one row per event into `loan_events`
///
/// Holds the shared bounded pool. Each write checks a connection out and
/// returns it on every exit path.
#[derive(Clone)]
pub struct PgLoanEventSink {
    pool: PgPool,
    mode: WriteMode,
    service: String,
}

impl PgLoanEventSink {
    pub fn new(pool: PgPool, mode: WriteMode, service: &str) -> Self {
        Self {
            pool,
            mode,
            service: service.to_string(),
        }
    }
}

#[async_trait]
impl EventSink for PgLoanEventSink {
    async fn persist(&self, event: &LoanEvent) -> Result<(), PersistenceError> {
        let mut conn = acquire_with_metrics(&self.pool, &self.service)
            .await
            .map_err(|e| PersistenceError::from_sqlx(e, &event.loan_id))?;

        let statement = match self.mode {
            WriteMode::Insert => INSERT_LOAN_EVENT,
            WriteMode::Upsert => UPSERT_LOAN_EVENT,
        };

        let result = sqlx::query(statement)
            .bind(&event.loan_id)
            .bind(&event.user_id)
            .bind(event.amount)
            .bind(event.status.as_str())
            .bind(event.timestamp)
            .execute(&mut *conn)
            .await
            .map_err(|e| PersistenceError::from_sqlx(e, &event.loan_id))?;

        debug!(
            loan_id = %event.loan_id,
            rows_affected = result.rows_affected(),
            "Wrote loan event row"
        );

        Ok(())
    }
}
