//! Read-side queries over `loan_events` for reporting

use crate::models::{LoanEvent, LoanStatus};
use serde::Serialize;
use sqlx::{PgPool, Row};
use std::collections::BTreeMap;

/// Aggregate for one status value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusTotals {
    pub status: LoanStatus,
    pub loans: i64,
    pub total_amount: f64,
}

/// Portfolio overview
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoanSummary {
    pub total_loans: i64,
    pub total_amount: f64,
    pub average_amount: f64,
    /// Percentage of loans with status `approved`
    pub approval_rate: f64,
    pub by_status: BTreeMap<LoanStatus, StatusTotals>,
}

impl LoanSummary {
    /// Fold per-status totals. No rows gives an all-zero summary.
    pub fn from_totals(totals: &[StatusTotals]) -> Self {
        let mut by_status = BTreeMap::new();
        for status in LoanStatus::ALL {
            by_status.insert(
                status,
                StatusTotals {
                    status,
                    loans: 0,
                    total_amount: 0.0,
                },
            );
        }
        for row in totals {
            if let Some(entry) = by_status.get_mut(&row.status) {
                entry.loans += row.loans;
                entry.total_amount += row.total_amount;
            }
        }

        let total_loans: i64 = by_status.values().map(|t| t.loans).sum();
        let total_amount: f64 = by_status.values().map(|t| t.total_amount).sum();
        let approved = by_status
            .get(&LoanStatus::Approved)
            .map(|t| t.loans)
            .unwrap_or(0);

        let (average_amount, approval_rate) = if total_loans > 0 {
            (
                round_cents(total_amount / total_loans as f64),
                round_cents(approved as f64 * 100.0 / total_loans as f64),
            )
        } else {
            (0.0, 0.0)
        };

        Self {
            total_loans,
            total_amount: round_cents(total_amount),
            average_amount,
            approval_rate,
            by_status,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total_loans == 0
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Queries backing the report tooling
#[derive(Clone)]
pub struct LoanReadModel {
    pool: PgPool,
}

impl LoanReadModel {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn summary(&self) -> Result<LoanSummary, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS loans, COALESCE(SUM(amount), 0)::float8 AS total_amount
            FROM loan_events
            GROUP BY status
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut totals = Vec::with_capacity(rows.len());
        for row in rows {
            let status: String = row.try_get("status")?;
            totals.push(StatusTotals {
                status: parse_status(&status)?,
                loans: row.try_get("loans")?,
                total_amount: row.try_get("total_amount")?,
            });
        }

        Ok(LoanSummary::from_totals(&totals))
    }

    /// Latest events, newest first
    pub async fn recent_events(&self, limit: i64) -> Result<Vec<LoanEvent>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT loan_id, user_id, amount::float8 AS amount, status, "timestamp"
            FROM loan_events
            ORDER BY "timestamp" DESC, loan_id
            LIMIT $1
            "#,
        )
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let status: String = row.try_get("status")?;
                Ok(LoanEvent {
                    loan_id: row.try_get("loan_id")?,
                    user_id: row.try_get("user_id")?,
                    amount: row.try_get("amount")?,
                    status: parse_status(&status)?,
                    timestamp: row.try_get("timestamp")?,
                })
            })
            .collect()
    }
}

fn parse_status(raw: &str) -> Result<LoanStatus, sqlx::Error> {
    raw.parse::<LoanStatus>()
        .map_err(|e| sqlx::Error::Decode(e.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_table_is_all_zero() {
        let summary = LoanSummary::from_totals(&[]);
        assert!(summary.is_empty());
        assert_eq!(summary.total_amount, 0.0);
        assert_eq!(summary.average_amount, 0.0);
        assert_eq!(summary.approval_rate, 0.0);
        assert_eq!(summary.by_status.len(), 3);
        assert!(summary.by_status.values().all(|t| t.loans == 0));
    }

    #[test]
    fn test_summary_aggregates() {
        let summary = LoanSummary::from_totals(&[
            StatusTotals {
                status: LoanStatus::Approved,
                loans: 3,
                total_amount: 15000.0,
            },
            StatusTotals {
                status: LoanStatus::Pending,
                loans: 1,
                total_amount: 1000.5,
            },
        ]);

        assert_eq!(summary.total_loans, 4);
        assert_eq!(summary.total_amount, 16000.5);
        assert_eq!(summary.average_amount, 4000.13);
        assert_eq!(summary.approval_rate, 75.0);
        assert_eq!(summary.by_status[&LoanStatus::Rejected].loans, 0);
    }

    #[test]
    fn test_summary_serializes_status_keys() {
        let summary = LoanSummary::from_totals(&[StatusTotals {
            status: LoanStatus::Rejected,
            loans: 2,
            total_amount: 2500.0,
        }]);
        let json = serde_json::to_value(&summary).unwrap();

        assert_eq!(json["by_status"]["rejected"]["loans"], 2);
        assert_eq!(json["approval_rate"], 0.0);
    }
}
