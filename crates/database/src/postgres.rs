use crate::error::DbError;
use crate::store::{LedgerReader, LedgerStore, TradeStats, UnitOfWork, opening_balance};
use async_trait::async_trait;
use core_types::{Holding, InstrumentClass, NewHolding, NewTransaction, Side, Transaction, Wallet};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgRow, Postgres};
use sqlx::Row;
use std::time::Duration;

const WALLET_COLUMNS: &str = "id, user_id, balance, created_at, updated_at";
const HOLDING_COLUMNS: &str =
    "id, wallet_id, symbol, quantity, avg_buy_price, type, created_at, updated_at";
const TRANSACTION_COLUMNS: &str = "id, wallet_id, symbol, type, quantity, price_per_unit, total_amount, realized_pnl, created_at";

/// The PostgreSQL ledger store.
///
/// Row locks are taken with `SELECT ... FOR UPDATE`, so concurrent orders on
/// one wallet queue behind each other inside the database, and any number of
/// engine processes can share the same tables.
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
    lock_timeout: Duration,
    statement_timeout: Duration,
}

impl PgLedgerStore {
    /// Creates a new `PgLedgerStore` with a shared database connection pool.
    ///
    /// `lock_timeout` bounds how long an order waits for another order's row
    /// lock; `statement_timeout` bounds any single statement.
    pub fn new(pool: PgPool, lock_timeout: Duration, statement_timeout: Duration) -> Self {
        Self {
            pool,
            lock_timeout,
            statement_timeout,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, DbError> {
        let mut tx = self.pool.begin().await?;

        // Transaction-local: both settings reset on COMMIT/ROLLBACK.
        sqlx::query("SELECT set_config('lock_timeout', $1, true), set_config('statement_timeout', $2, true)")
            .bind(format!("{}ms", self.lock_timeout.as_millis()))
            .bind(format!("{}ms", self.statement_timeout.as_millis()))
            .execute(&mut *tx)
            .await?;

        Ok(Box::new(PgUnitOfWork { tx }))
    }

    async fn open_wallet(&self, owner_id: i64, initial_balance: Decimal) -> Result<Wallet, DbError> {
        let initial_balance = opening_balance(initial_balance)?;

        let inserted = sqlx::query(
            "INSERT INTO wallets (user_id, balance) VALUES ($1, $2) ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(owner_id)
        .bind(initial_balance)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 1 {
            tracing::info!(owner_id, %initial_balance, "Opened wallet.");
        }

        self.find_wallet(owner_id).await?.ok_or(DbError::NotFound)
    }
}

/// A unit of work backed by one PostgreSQL transaction.
///
/// Dropping it without calling `commit` rolls the transaction back.
pub struct PgUnitOfWork {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn lock_wallet_for_update(&mut self, owner_id: i64) -> Result<Option<Wallet>, DbError> {
        let row = sqlx::query(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets WHERE user_id = $1 FOR UPDATE"
        ))
        .bind(owner_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref().map(wallet_from_row).transpose()
    }

    async fn lock_holding_for_update(
        &mut self,
        wallet_id: i64,
        symbol: &str,
    ) -> Result<Option<Holding>, DbError> {
        let row = sqlx::query(&format!(
            "SELECT {HOLDING_COLUMNS} FROM holdings WHERE wallet_id = $1 AND symbol = $2 FOR UPDATE"
        ))
        .bind(wallet_id)
        .bind(symbol)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref().map(holding_from_row).transpose()
    }

    async fn set_wallet_balance(&mut self, wallet_id: i64, balance: Decimal) -> Result<(), DbError> {
        let result = sqlx::query("UPDATE wallets SET balance = $1, updated_at = NOW() WHERE id = $2")
            .bind(balance)
            .bind(wallet_id)
            .execute(&mut *self.tx)
            .await?;
        expect_one_row(result.rows_affected())
    }

    async fn insert_holding(&mut self, holding: &NewHolding) -> Result<Holding, DbError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO holdings (wallet_id, symbol, quantity, avg_buy_price, type)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {HOLDING_COLUMNS}
            "#
        ))
        .bind(holding.wallet_id)
        .bind(&holding.symbol)
        .bind(holding.quantity)
        .bind(holding.average_buy_price)
        .bind(holding.instrument_class.as_str())
        .fetch_one(&mut *self.tx)
        .await?;

        holding_from_row(&row)
    }

    async fn update_holding(
        &mut self,
        holding_id: i64,
        quantity: Decimal,
        average_buy_price: Decimal,
    ) -> Result<(), DbError> {
        let result = sqlx::query(
            "UPDATE holdings SET quantity = $1, avg_buy_price = $2, updated_at = NOW() WHERE id = $3",
        )
        .bind(quantity)
        .bind(average_buy_price)
        .bind(holding_id)
        .execute(&mut *self.tx)
        .await?;
        expect_one_row(result.rows_affected())
    }

    async fn delete_holding(&mut self, holding_id: i64) -> Result<(), DbError> {
        let result = sqlx::query("DELETE FROM holdings WHERE id = $1")
            .bind(holding_id)
            .execute(&mut *self.tx)
            .await?;
        expect_one_row(result.rows_affected())
    }

    async fn append_transaction(&mut self, transaction: &NewTransaction) -> Result<Transaction, DbError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO transactions (
                wallet_id, symbol, type, quantity, price_per_unit, total_amount, realized_pnl
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {TRANSACTION_COLUMNS}
            "#
        ))
        .bind(transaction.wallet_id)
        .bind(&transaction.symbol)
        .bind(transaction.side.as_str())
        .bind(transaction.quantity)
        .bind(transaction.price_per_unit)
        .bind(transaction.total_amount)
        .bind(transaction.realized_pnl)
        .fetch_one(&mut *self.tx)
        .await?;

        transaction_from_row(&row)
    }

    async fn commit(self: Box<Self>) -> Result<(), DbError> {
        let this = *self;
        this.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DbError> {
        let this = *self;
        this.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl LedgerReader for PgLedgerStore {
    async fn find_wallet(&self, owner_id: i64) -> Result<Option<Wallet>, DbError> {
        let row = sqlx::query(&format!("SELECT {WALLET_COLUMNS} FROM wallets WHERE user_id = $1"))
            .bind(owner_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(wallet_from_row).transpose()
    }

    async fn holdings(&self, wallet_id: i64) -> Result<Vec<Holding>, DbError> {
        let rows = sqlx::query(&format!(
            "SELECT {HOLDING_COLUMNS} FROM holdings WHERE wallet_id = $1 ORDER BY symbol ASC"
        ))
        .bind(wallet_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(holding_from_row).collect()
    }

    async fn transactions(&self, wallet_id: i64) -> Result<Vec<Transaction>, DbError> {
        let rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE wallet_id = $1 ORDER BY created_at ASC, id ASC"
        ))
        .bind(wallet_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(transaction_from_row).collect()
    }

    async fn transactions_page(
        &self,
        wallet_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Transaction>, DbError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {TRANSACTION_COLUMNS}
            FROM transactions
            WHERE wallet_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(wallet_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(transaction_from_row).collect()
    }

    async fn trade_stats(&self, wallet_id: i64) -> Result<TradeStats, DbError> {
        // COALESCE avoids NULL sums when the wallet has no history yet.
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total_trades,
                COALESCE(SUM(realized_pnl), 0) AS total_realized_pnl,
                COUNT(*) FILTER (WHERE realized_pnl > 0) AS winning_trades,
                COALESCE(SUM(total_amount), 0) AS total_volume
            FROM transactions
            WHERE wallet_id = $1
            "#,
        )
        .bind(wallet_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(TradeStats {
            total_trades: row.try_get("total_trades")?,
            total_realized_pnl: row.try_get("total_realized_pnl")?,
            winning_trades: row.try_get("winning_trades")?,
            total_volume: row.try_get("total_volume")?,
        })
    }
}

fn expect_one_row(rows_affected: u64) -> Result<(), DbError> {
    match rows_affected {
        1 => Ok(()),
        0 => Err(DbError::NotFound),
        n => Err(DbError::CorruptRow(format!("expected one row, touched {n}"))),
    }
}

fn wallet_from_row(row: &PgRow) -> Result<Wallet, DbError> {
    Ok(Wallet {
        id: row.try_get("id")?,
        owner_id: row.try_get("user_id")?,
        balance: row.try_get("balance")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn holding_from_row(row: &PgRow) -> Result<Holding, DbError> {
    let class: String = row.try_get("type")?;
    Ok(Holding {
        id: row.try_get("id")?,
        wallet_id: row.try_get("wallet_id")?,
        symbol: row.try_get("symbol")?,
        quantity: row.try_get("quantity")?,
        average_buy_price: row.try_get("avg_buy_price")?,
        instrument_class: class
            .parse::<InstrumentClass>()
            .map_err(|e| DbError::CorruptRow(e.to_string()))?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn transaction_from_row(row: &PgRow) -> Result<Transaction, DbError> {
    let side: String = row.try_get("type")?;
    Ok(Transaction {
        id: row.try_get("id")?,
        wallet_id: row.try_get("wallet_id")?,
        symbol: row.try_get("symbol")?,
        side: side
            .parse::<Side>()
            .map_err(|e| DbError::CorruptRow(e.to_string()))?,
        quantity: row.try_get("quantity")?,
        price_per_unit: row.try_get("price_per_unit")?,
        total_amount: row.try_get("total_amount")?,
        realized_pnl: row.try_get("realized_pnl")?,
        created_at: row.try_get("created_at")?,
    })
}
