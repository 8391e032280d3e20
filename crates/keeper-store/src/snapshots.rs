//! Price snapshot and AI evaluation persistence.
//!
//! Both tables are append-only; they feed the AI context window and the
//! external UI's charts and audit views.

use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use keeper_core::types::{PriceSnapshot, TradeEvaluation};
use sqlx::FromRow;
use tracing::instrument;

use crate::Store;
use crate::convert;
use crate::error::Result;

// ═══════════════════════════════════════════════════════════════════════════════
// ROWS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, FromRow)]
struct SnapshotRow {
    token: String,
    price: f64,
    source: String,
    created_at: String,
}

impl TryFrom<SnapshotRow> for PriceSnapshot {
    type Error = crate::error::StoreError;

    fn try_from(row: SnapshotRow) -> Result<Self> {
        Ok(PriceSnapshot {
            token: convert::text_to_address(&row.token)?,
            price: row.price,
            source: row.source,
            created_at: DateTime::parse_from_rfc3339(&row.created_at)
                .map_err(|e| crate::error::StoreError::corrupt(format!("bad created_at: {e}")))?
                .with_timezone(&Utc),
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// STORE METHODS
// ═══════════════════════════════════════════════════════════════════════════════

impl Store {
    /// Append a price observation.
    pub async fn append_price_snapshot(&self, snapshot: &PriceSnapshot) -> Result<()> {
        sqlx::query(
            "INSERT INTO price_snapshots (token, price, source, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(convert::address_to_text(snapshot.token))
        .bind(snapshot.price)
        .bind(&snapshot.source)
        .bind(snapshot.created_at.to_rfc3339())
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Most recent prices for a token, oldest first (ready for returns math).
    pub async fn recent_prices(&self, token: Address, limit: u32) -> Result<Vec<PriceSnapshot>> {
        let rows = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT token, price, source, created_at FROM (
                SELECT id, token, price, source, created_at
                FROM price_snapshots
                WHERE token = ?
                ORDER BY id DESC
                LIMIT ?
            ) ORDER BY id ASC
            "#,
        )
        .bind(convert::address_to_text(token))
        .bind(i64::from(limit))
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// The latest price for a token, if any snapshot exists.
    pub async fn latest_price(&self, token: Address) -> Result<Option<PriceSnapshot>> {
        let row = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT token, price, source, created_at
            FROM price_snapshots
            WHERE token = ?
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(convert::address_to_text(token))
        .fetch_optional(self.pool())
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    /// Append one AI evaluation record (fail-open results included).
    #[instrument(skip(self, evaluation), fields(eigen = %evaluation.eigen_id, approved = evaluation.approved))]
    pub async fn append_evaluation(&self, evaluation: &TradeEvaluation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ai_evaluations (
                eigen_id, proposed_action, approved, confidence, reason,
                adjusted_amount, suggested_wait_secs, model, latency_ms,
                tokens_used, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&evaluation.eigen_id)
        .bind(&evaluation.proposed_action)
        .bind(i64::from(evaluation.approved))
        .bind(i64::from(evaluation.confidence))
        .bind(&evaluation.reason)
        .bind(evaluation.adjusted_amount)
        .bind(evaluation.suggested_wait_secs.map(|s| {
            #[allow(clippy::cast_possible_wrap)]
            let s = s as i64;
            s
        }))
        .bind(&evaluation.model)
        .bind({
            #[allow(clippy::cast_possible_wrap)]
            let l = evaluation.latency_ms as i64;
            l
        })
        .bind(i64::from(evaluation.tokens_used))
        .bind(evaluation.created_at.to_rfc3339())
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Count of evaluations recorded for an eigen.
    pub async fn evaluation_count(&self, eigen_id: &str) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT count(*) FROM ai_evaluations WHERE eigen_id = ?")
                .bind(eigen_id)
                .fetch_one(self.pool())
                .await?;
        #[allow(clippy::cast_sign_loss)]
        Ok(count as u64)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(price: f64) -> PriceSnapshot {
        PriceSnapshot {
            token: Address::repeat_byte(0x11),
            price,
            source: "pool".into(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn snapshots_read_back_oldest_first() {
        let store = Store::open_in_memory().await.unwrap();

        for price in [1.0, 1.1, 1.2] {
            store.append_price_snapshot(&snapshot(price)).await.unwrap();
        }

        let prices = store
            .recent_prices(Address::repeat_byte(0x11), 10)
            .await
            .unwrap();
        let values: Vec<f64> = prices.iter().map(|s| s.price).collect();
        assert_eq!(values, vec![1.0, 1.1, 1.2]);

        // Limit keeps the newest
        let prices = store
            .recent_prices(Address::repeat_byte(0x11), 2)
            .await
            .unwrap();
        let values: Vec<f64> = prices.iter().map(|s| s.price).collect();
        assert_eq!(values, vec![1.1, 1.2]);
    }

    #[tokio::test]
    async fn latest_price_is_newest() {
        let store = Store::open_in_memory().await.unwrap();
        assert!(store
            .latest_price(Address::repeat_byte(0x11))
            .await
            .unwrap()
            .is_none());

        store.append_price_snapshot(&snapshot(1.0)).await.unwrap();
        store.append_price_snapshot(&snapshot(2.0)).await.unwrap();

        let latest = store
            .latest_price(Address::repeat_byte(0x11))
            .await
            .unwrap()
            .unwrap();
        assert!((latest.price - 2.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn evaluations_append() {
        let store = Store::open_in_memory().await.unwrap();

        let evaluation = TradeEvaluation {
            eigen_id: "e1".into(),
            proposed_action: "buy 0.1".into(),
            approved: true,
            confidence: 75,
            reason: "ai_unavailable".into(),
            adjusted_amount: None,
            suggested_wait_secs: None,
            model: "none".into(),
            latency_ms: 0,
            tokens_used: 0,
            created_at: Utc::now(),
        };
        store.append_evaluation(&evaluation).await.unwrap();
        store.append_evaluation(&evaluation).await.unwrap();

        assert_eq!(store.evaluation_count("e1").await.unwrap(), 2);
        assert_eq!(store.evaluation_count("e2").await.unwrap(), 0);
    }
}
