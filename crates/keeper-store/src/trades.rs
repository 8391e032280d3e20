//! Trade record persistence.
//!
//! Trades are append-only; readers observe them in insertion order.

use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use keeper_core::types::{PoolVersion, TradeKind, TradeRecord};
use sqlx::FromRow;
use tracing::instrument;

use crate::Store;
use crate::convert;
use crate::error::Result;

// ═══════════════════════════════════════════════════════════════════════════════
// ROWS
// ═══════════════════════════════════════════════════════════════════════════════

/// Database row for trades.
#[derive(Debug, FromRow)]
struct TradeRow {
    eigen_id: String,
    kind: String,
    wallet_index: i64,
    token: String,
    token_amount: String,
    quote_amount_eth: f64,
    execution_price: f64,
    realized_pnl: f64,
    gas_cost_eth: f64,
    tx_hash: Option<String>,
    router: Option<String>,
    pool_version: Option<String>,
    created_at: String,
}

impl TryFrom<TradeRow> for TradeRecord {
    type Error = crate::error::StoreError;

    fn try_from(row: TradeRow) -> Result<Self> {
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        Ok(TradeRecord {
            eigen_id: row.eigen_id,
            kind: TradeKind::parse(&row.kind)?,
            wallet_index: row.wallet_index as u32,
            token: convert::text_to_address(&row.token)?,
            token_amount: convert::text_to_u256(&row.token_amount)?,
            quote_amount_eth: row.quote_amount_eth,
            execution_price: row.execution_price,
            realized_pnl: row.realized_pnl,
            gas_cost_eth: row.gas_cost_eth,
            tx_hash: row
                .tx_hash
                .as_deref()
                .map(convert::text_to_tx_hash)
                .transpose()?,
            router: row
                .router
                .as_deref()
                .map(convert::text_to_address)
                .transpose()?,
            pool_version: row
                .pool_version
                .as_deref()
                .map(PoolVersion::parse)
                .transpose()?,
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
    /// Append one trade record.
    #[instrument(skip(self, trade), fields(eigen = %trade.eigen_id, kind = trade.kind.as_str()))]
    pub async fn append_trade(&self, trade: &TradeRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trades (
                eigen_id, kind, wallet_index, token, token_amount,
                quote_amount_eth, execution_price, realized_pnl, gas_cost_eth,
                tx_hash, router, pool_version, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&trade.eigen_id)
        .bind(trade.kind.as_str())
        .bind(i64::from(trade.wallet_index))
        .bind(convert::address_to_text(trade.token))
        .bind(convert::u256_to_text(trade.token_amount))
        .bind(trade.quote_amount_eth)
        .bind(trade.execution_price)
        .bind(trade.realized_pnl)
        .bind(trade.gas_cost_eth)
        .bind(trade.tx_hash.map(convert::b256_to_text))
        .bind(trade.router.map(convert::address_to_text))
        .bind(trade.pool_version.map(PoolVersion::as_str))
        .bind(trade.created_at.to_rfc3339())
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Most recent trades for an eigen, newest first.
    pub async fn recent_trades(&self, eigen_id: &str, limit: u32) -> Result<Vec<TradeRecord>> {
        let rows = sqlx::query_as::<_, TradeRow>(
            r#"
            SELECT eigen_id, kind, wallet_index, token, token_amount,
                   quote_amount_eth, execution_price, realized_pnl,
                   gas_cost_eth, tx_hash, router, pool_version, created_at
            FROM trades
            WHERE eigen_id = ?
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(eigen_id)
        .bind(i64::from(limit))
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// Timestamp of the most recent trade for an eigen.
    pub async fn last_trade_at(&self, eigen_id: &str) -> Result<Option<DateTime<Utc>>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT created_at FROM trades WHERE eigen_id = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(eigen_id)
        .fetch_optional(self.pool())
        .await?;

        row.map(|(t,)| {
            DateTime::parse_from_rfc3339(&t)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| crate::error::StoreError::corrupt(format!("bad created_at: {e}")))
        })
        .transpose()
    }

    /// Number of trades recorded for an eigen.
    pub async fn trade_count(&self, eigen_id: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT count(*) FROM trades WHERE eigen_id = ?")
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
    use alloy::primitives::{TxHash, U256};

    fn trade(eigen: &str, kind: TradeKind) -> TradeRecord {
        TradeRecord {
            eigen_id: eigen.into(),
            kind,
            wallet_index: 1,
            token: Address::repeat_byte(0x11),
            token_amount: U256::from(1_000_000_000_000_000_000_u128),
            quote_amount_eth: 0.5,
            execution_price: 0.5,
            realized_pnl: 0.05,
            gas_cost_eth: 0.001,
            tx_hash: Some(TxHash::repeat_byte(0xaa)),
            router: Some(Address::repeat_byte(0xbb)),
            pool_version: Some(PoolVersion::V3),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn append_and_read_back() {
        let store = Store::open_in_memory().await.unwrap();

        store.append_trade(&trade("e1", TradeKind::Buy)).await.unwrap();
        store
            .append_trade(&trade("e1", TradeKind::ProfitTake))
            .await
            .unwrap();

        let trades = store.recent_trades("e1", 10).await.unwrap();
        assert_eq!(trades.len(), 2);
        // Newest first
        assert_eq!(trades[0].kind, TradeKind::ProfitTake);
        assert_eq!(trades[1].kind, TradeKind::Buy);
        assert_eq!(trades[0].tx_hash, Some(TxHash::repeat_byte(0xaa)));
        assert_eq!(trades[0].pool_version, Some(PoolVersion::V3));
    }

    #[tokio::test]
    async fn last_trade_at_tracks_newest() {
        let store = Store::open_in_memory().await.unwrap();
        assert!(store.last_trade_at("e1").await.unwrap().is_none());

        let t = trade("e1", TradeKind::Buy);
        store.append_trade(&t).await.unwrap();

        let last = store.last_trade_at("e1").await.unwrap().unwrap();
        assert!((last - t.created_at).num_seconds().abs() <= 1);
    }

    #[tokio::test]
    async fn counts_are_per_eigen() {
        let store = Store::open_in_memory().await.unwrap();
        store.append_trade(&trade("e1", TradeKind::Buy)).await.unwrap();
        store.append_trade(&trade("e1", TradeKind::Sell)).await.unwrap();
        store.append_trade(&trade("e2", TradeKind::Buy)).await.unwrap();

        assert_eq!(store.trade_count("e1").await.unwrap(), 2);
        assert_eq!(store.trade_count("e2").await.unwrap(), 1);
        assert_eq!(store.trade_count("e3").await.unwrap(), 0);
    }
}
