//! Position persistence.
//!
//! Positions are keyed by `(eigen, token, wallet_index)`. The accounting
//! itself lives in `keeper_core::ledger`; the store persists whatever state
//! the ledger produced. Rows are reduced to zero on full close, never
//! deleted.

use keeper_core::types::Position;
use sqlx::FromRow;
use tracing::instrument;

use crate::Store;
use crate::convert;
use crate::error::Result;

use alloy::primitives::Address;
use chrono::Utc;

// ═══════════════════════════════════════════════════════════════════════════════
// ROWS
// ═══════════════════════════════════════════════════════════════════════════════

/// Database row for positions.
#[derive(Debug, FromRow)]
struct PositionRow {
    eigen_id: String,
    token: String,
    wallet_index: i64,
    amount_raw: String,
    entry_price: f64,
    total_cost: f64,
}

impl TryFrom<PositionRow> for Position {
    type Error = crate::error::StoreError;

    fn try_from(row: PositionRow) -> Result<Self> {
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        Ok(Position {
            eigen_id: row.eigen_id,
            token: convert::text_to_address(&row.token)?,
            wallet_index: row.wallet_index as u32,
            amount_raw: convert::text_to_u256(&row.amount_raw)?,
            entry_price: row.entry_price,
            total_cost: row.total_cost,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// STORE METHODS
// ═══════════════════════════════════════════════════════════════════════════════

impl Store {
    /// Upsert a position to its current ledger state.
    #[instrument(skip(self, position), fields(eigen = %position.eigen_id, wallet = position.wallet_index))]
    pub async fn upsert_position(&self, position: &Position) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO positions (eigen_id, token, wallet_index, amount_raw, entry_price, total_cost, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (eigen_id, token, wallet_index) DO UPDATE SET
                amount_raw = excluded.amount_raw,
                entry_price = excluded.entry_price,
                total_cost = excluded.total_cost,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&position.eigen_id)
        .bind(convert::address_to_text(position.token))
        .bind(i64::from(position.wallet_index))
        .bind(convert::u256_to_text(position.amount_raw))
        .bind(position.entry_price)
        .bind(position.total_cost)
        .bind(Utc::now().to_rfc3339())
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Fetch a position; returns an empty one when no row exists.
    pub async fn get_position(
        &self,
        eigen_id: &str,
        token: Address,
        wallet_index: u32,
    ) -> Result<Position> {
        let row = sqlx::query_as::<_, PositionRow>(
            r#"
            SELECT eigen_id, token, wallet_index, amount_raw, entry_price, total_cost
            FROM positions
            WHERE eigen_id = ? AND token = ? AND wallet_index = ?
            "#,
        )
        .bind(eigen_id)
        .bind(convert::address_to_text(token))
        .bind(i64::from(wallet_index))
        .fetch_optional(self.pool())
        .await?;

        match row {
            Some(row) => row.try_into(),
            None => Ok(Position::empty(eigen_id.to_string(), token, wallet_index)),
        }
    }

    /// All positions for one eigen and token, ordered by wallet index.
    pub async fn positions_for_eigen(
        &self,
        eigen_id: &str,
        token: Address,
    ) -> Result<Vec<Position>> {
        let rows = sqlx::query_as::<_, PositionRow>(
            r#"
            SELECT eigen_id, token, wallet_index, amount_raw, entry_price, total_cost
            FROM positions
            WHERE eigen_id = ? AND token = ?
            ORDER BY wallet_index
            "#,
        )
        .bind(eigen_id)
        .bind(convert::address_to_text(token))
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::U256;
    use keeper_core::ledger::{aggregate, apply_buy};

    const ONE: u128 = 1_000_000_000_000_000_000;

    #[tokio::test]
    async fn missing_position_is_empty() {
        let store = Store::open_in_memory().await.unwrap();
        let pos = store
            .get_position("e1", Address::repeat_byte(0x01), 0)
            .await
            .unwrap();

        assert!(!pos.is_open());
        assert_eq!(pos.wallet_index, 0);
    }

    #[tokio::test]
    async fn upsert_round_trips_ledger_state() {
        let store = Store::open_in_memory().await.unwrap();
        let token = Address::repeat_byte(0x01);

        let mut pos = Position::empty("e1".into(), token, 2);
        apply_buy(&mut pos, U256::from(ONE), 1.5).unwrap();
        store.upsert_position(&pos).await.unwrap();

        let fetched = store.get_position("e1", token, 2).await.unwrap();
        assert_eq!(fetched.amount_raw, U256::from(ONE));
        assert!((fetched.entry_price - 1.5).abs() < 1e-12);
        assert!((fetched.total_cost - 1.5).abs() < 1e-9);

        // Second upsert overwrites
        apply_buy(&mut pos, U256::from(ONE), 2.5).unwrap();
        store.upsert_position(&pos).await.unwrap();
        let fetched = store.get_position("e1", token, 2).await.unwrap();
        assert_eq!(fetched.amount_raw, U256::from(2 * ONE));
    }

    #[tokio::test]
    async fn positions_aggregate_across_wallets() {
        let store = Store::open_in_memory().await.unwrap();
        let token = Address::repeat_byte(0x01);

        for index in 0..3u32 {
            let mut pos = Position::empty("e1".into(), token, index);
            apply_buy(&mut pos, U256::from(ONE), 1.0).unwrap();
            store.upsert_position(&pos).await.unwrap();
        }

        let positions = store.positions_for_eigen("e1", token).await.unwrap();
        assert_eq!(positions.len(), 3);

        let total = aggregate(positions.iter());
        assert_eq!(total.amount_raw, U256::from(3 * ONE));
        assert!((total.entry_price - 1.0).abs() < 1e-9);
    }
}
