//! Schema creation and additive migrations.
//!
//! The schema is applied on every startup: `CREATE TABLE IF NOT EXISTS` for
//! the base tables, followed by additive `ALTER TABLE ... ADD COLUMN`
//! statements for columns introduced after the first release. An
//! "already exists" error from an additive column is a no-op, which keeps
//! the whole pass idempotent without a migration ledger.

use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::Result;

/// Base tables, applied unconditionally.
const CREATE_TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS eigens (
        id                       TEXT PRIMARY KEY,
        token                    TEXT NOT NULL,
        owner                    TEXT NOT NULL,
        vault                    TEXT,
        status                   TEXT NOT NULL DEFAULT 'active',
        status_changed_at        TEXT,
        status_reason            TEXT,
        pool_version             TEXT,
        pool_address             TEXT,
        pool_fee                 INTEGER NOT NULL DEFAULT 0,
        pool_tick_spacing        INTEGER NOT NULL DEFAULT 0,
        pool_hook                TEXT,
        pool_id                  TEXT,
        volume_target_eth        REAL NOT NULL DEFAULT 0,
        trade_frequency_per_hour REAL NOT NULL DEFAULT 6,
        order_size_min_pct       REAL NOT NULL DEFAULT 5,
        order_size_max_pct       REAL NOT NULL DEFAULT 10,
        spread_pct               REAL NOT NULL DEFAULT 2,
        profit_target_pct        REAL NOT NULL DEFAULT 50,
        stop_loss_pct            REAL NOT NULL DEFAULT 30,
        wallet_count             INTEGER NOT NULL DEFAULT 1,
        slippage_bps             INTEGER NOT NULL DEFAULT 100,
        reactive_sell_enabled    INTEGER NOT NULL DEFAULT 0,
        reactive_sell_pct        REAL NOT NULL DEFAULT 50,
        last_scanned_block       INTEGER,
        gas_budget_eth           REAL NOT NULL DEFAULT 0,
        gas_spent_eth            REAL NOT NULL DEFAULT 0,
        custom_prompt            TEXT,
        wallet_source            TEXT NOT NULL DEFAULT 'derived',
        chain_id                 INTEGER NOT NULL,
        created_at               TEXT NOT NULL DEFAULT (datetime('now'))
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS positions (
        eigen_id     TEXT NOT NULL,
        token        TEXT NOT NULL,
        wallet_index INTEGER NOT NULL,
        amount_raw   TEXT NOT NULL DEFAULT '0',
        entry_price  REAL NOT NULL DEFAULT 0,
        total_cost   REAL NOT NULL DEFAULT 0,
        updated_at   TEXT NOT NULL DEFAULT (datetime('now')),
        PRIMARY KEY (eigen_id, token, wallet_index)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS trades (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        eigen_id         TEXT NOT NULL,
        kind             TEXT NOT NULL,
        wallet_index     INTEGER NOT NULL,
        token            TEXT NOT NULL,
        token_amount     TEXT NOT NULL,
        quote_amount_eth REAL NOT NULL DEFAULT 0,
        execution_price  REAL NOT NULL DEFAULT 0,
        realized_pnl     REAL NOT NULL DEFAULT 0,
        gas_cost_eth     REAL NOT NULL DEFAULT 0,
        tx_hash          TEXT,
        router           TEXT,
        pool_version     TEXT,
        created_at       TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sub_wallets (
        eigen_id      TEXT NOT NULL,
        wallet_index  INTEGER NOT NULL,
        address       TEXT NOT NULL,
        last_trade_at TEXT,
        trade_count   INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (eigen_id, wallet_index)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS imported_wallets (
        eigen_id      TEXT NOT NULL,
        wallet_index  INTEGER NOT NULL,
        address       TEXT NOT NULL,
        encrypted_key BLOB NOT NULL,
        last_trade_at TEXT,
        trade_count   INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (eigen_id, wallet_index)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS price_snapshots (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        token      TEXT NOT NULL,
        price      REAL NOT NULL,
        source     TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ai_evaluations (
        id                  INTEGER PRIMARY KEY AUTOINCREMENT,
        eigen_id            TEXT NOT NULL,
        proposed_action     TEXT NOT NULL,
        approved            INTEGER NOT NULL,
        confidence          INTEGER NOT NULL,
        reason              TEXT NOT NULL,
        adjusted_amount     REAL,
        suggested_wait_secs INTEGER,
        model               TEXT NOT NULL,
        latency_ms          INTEGER NOT NULL,
        tokens_used         INTEGER NOT NULL,
        created_at          TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_trades_eigen_time ON trades (eigen_id, created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_snapshots_token_time ON price_snapshots (token, created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_evaluations_eigen ON ai_evaluations (eigen_id, created_at DESC)",
];

/// Additive columns introduced after the base schema. Applied every startup;
/// "duplicate column" errors are swallowed.
const ADDITIVE_COLUMNS: &[&str] = &[
    "ALTER TABLE eigens ADD COLUMN custom_prompt TEXT",
    "ALTER TABLE eigens ADD COLUMN last_scanned_block INTEGER",
    "ALTER TABLE eigens ADD COLUMN reactive_sell_pct REAL NOT NULL DEFAULT 50",
    "ALTER TABLE trades ADD COLUMN router TEXT",
    "ALTER TABLE trades ADD COLUMN pool_version TEXT",
];

/// Apply the schema: base tables plus additive columns.
///
/// # Errors
///
/// Returns an error on any failure other than an additive column that
/// already exists.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    for statement in CREATE_TABLES {
        sqlx::query(statement).execute(pool).await?;
    }

    for statement in ADDITIVE_COLUMNS {
        match sqlx::query(statement).execute(pool).await {
            Ok(_) => debug!(statement, "Additive column applied"),
            Err(e) if e.to_string().contains("duplicate column name") => {
                // Already migrated
            }
            Err(e) => return Err(e.into()),
        }
    }

    info!("Store schema applied");
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn schema_applies_cleanly() {
        let pool = pool().await;
        apply(&pool).await.unwrap();

        let count: i64 =
            sqlx::query_scalar("SELECT count(*) FROM sqlite_master WHERE type = 'table'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert!(count >= 7);
    }

    #[tokio::test]
    async fn schema_is_idempotent() {
        let pool = pool().await;

        // Second application must be a no-op, including the additive columns
        apply(&pool).await.unwrap();
        apply(&pool).await.unwrap();
    }
}
