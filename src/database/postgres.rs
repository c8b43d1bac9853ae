//! Postgres-backed ledger and intent storage
//!
//! Deposits and debits each run in one SQL transaction. The UNIQUE constraint
//! on `transactions.related_intent_id` is the storage-level at-most-once guard:
//! a violation maps to `LedgerError::AlreadyCredited`.

use super::error::{is_unique_violation, DatabaseError};
use super::intent_repository::{InsertOutcome, IntentRepository};
use super::ledger_repository::LedgerRepository;
use crate::domain::{
    normalize_amount, IntentStatus, PaymentIntent, ProvisionalOutcome, Transaction, Wallet,
};
use crate::error::LedgerError;
use crate::middleware::logging::log_database_query;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::time::Duration;
use tracing::{debug, info};

const INTENT_COLUMNS: &str = "intent_id, user_id, amount, status, idempotency_key, checkout_url, \
     raw_payload, provisional_status, provisional_since, created_at, updated_at";

const TRANSACTION_COLUMNS: &str =
    "transaction_id, user_id, type, amount, timestamp, related_intent_id, description";

fn db_err(err: sqlx::Error) -> LedgerError {
    LedgerError::Database(DatabaseError::from(err))
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and bring the schema up to date.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, DatabaseError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        info!(max_connections = max_connections, "Postgres store ready");

        Ok(Self::new(pool))
    }

    fn intent_from_row(row: &PgRow) -> Result<PaymentIntent, DatabaseError> {
        let status: String = row.try_get("status")?;
        let status = status
            .parse::<IntentStatus>()
            .map_err(|e| DatabaseError::corrupt("payment_intents", e))?;

        let provisional_status: Option<String> = row.try_get("provisional_status")?;
        let provisional_since: Option<DateTime<Utc>> = row.try_get("provisional_since")?;
        let provisional = match (provisional_status, provisional_since) {
            (Some(s), Some(observed_at)) => Some(ProvisionalOutcome {
                status: s
                    .parse::<IntentStatus>()
                    .map_err(|e| DatabaseError::corrupt("payment_intents", e))?,
                observed_at,
            }),
            _ => None,
        };

        Ok(PaymentIntent {
            intent_id: row.try_get("intent_id")?,
            user_id: row.try_get("user_id")?,
            requested_amount: row.try_get("amount")?,
            status,
            idempotency_key: row.try_get("idempotency_key")?,
            checkout_url: row.try_get("checkout_url")?,
            raw_gateway_payload: row.try_get("raw_payload")?,
            provisional,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn transaction_from_row(row: &PgRow) -> Result<Transaction, DatabaseError> {
        let tx_type: String = row.try_get("type")?;
        Ok(Transaction {
            transaction_id: row.try_get("transaction_id")?,
            user_id: row.try_get("user_id")?,
            tx_type: tx_type
                .parse()
                .map_err(|e: String| DatabaseError::corrupt("transactions", e))?,
            amount: row.try_get("amount")?,
            timestamp: row.try_get("timestamp")?,
            related_intent_id: row.try_get("related_intent_id")?,
            description: row.try_get("description")?,
        })
    }

    fn wallet_from_row(row: &PgRow) -> Result<Wallet, DatabaseError> {
        Ok(Wallet {
            user_id: row.try_get("user_id")?,
            balance: row.try_get("balance")?,
            version: row.try_get("version")?,
        })
    }

    async fn insert_transaction(
        conn: &mut sqlx::PgConnection,
        tx: &Transaction,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(&format!(
            "INSERT INTO transactions ({}) VALUES ($1, $2, $3, $4, $5, $6, $7)",
            TRANSACTION_COLUMNS
        ))
        .bind(tx.transaction_id)
        .bind(&tx.user_id)
        .bind(tx.tx_type.as_str())
        .bind(tx.amount)
        .bind(tx.timestamp)
        .bind(&tx.related_intent_id)
        .bind(&tx.description)
        .execute(conn)
        .await
        .map(|_| ())
    }

    async fn apply_credit(&self, tx: Transaction) -> Result<Transaction, LedgerError> {
        let mut db_tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query("INSERT INTO wallets (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(&tx.user_id)
            .execute(&mut *db_tx)
            .await
            .map_err(db_err)?;

        if let Err(e) = Self::insert_transaction(&mut db_tx, &tx).await {
            if is_unique_violation(&e) {
                if let Some(intent_id) = &tx.related_intent_id {
                    debug!(intent_id = %intent_id, "Deposit unique constraint hit");
                    return Err(LedgerError::AlreadyCredited {
                        intent_id: intent_id.clone(),
                    });
                }
            }
            return Err(db_err(e));
        }

        sqlx::query(
            "UPDATE wallets SET balance = balance + $2, version = version + 1 WHERE user_id = $1",
        )
        .bind(&tx.user_id)
        .bind(tx.amount)
        .execute(&mut *db_tx)
        .await
        .map_err(db_err)?;

        db_tx.commit().await.map_err(db_err)?;
        Ok(tx)
    }
}

#[async_trait]
impl LedgerRepository for PgStore {
    async fn append_deposit(
        &self,
        user_id: &str,
        amount: Decimal,
        intent_id: &str,
    ) -> Result<Transaction, LedgerError> {
        let amount = normalize_amount(amount)?;
        log_database_query(
            "append_deposit",
            self.apply_credit(Transaction::deposit(user_id, amount, intent_id)),
        )
        .await
    }

    async fn append_debit(
        &self,
        user_id: &str,
        amount: Decimal,
        reason: &str,
    ) -> Result<Transaction, LedgerError> {
        let amount = normalize_amount(amount)?;

        log_database_query("append_debit", async {
            let mut db_tx = self.pool.begin().await.map_err(db_err)?;

            let balance: Decimal =
                sqlx::query("SELECT balance FROM wallets WHERE user_id = $1 FOR UPDATE")
                    .bind(user_id)
                    .fetch_optional(&mut *db_tx)
                    .await
                    .map_err(db_err)?
                    .ok_or_else(|| LedgerError::WalletNotFound(user_id.to_string()))?
                    .try_get("balance")
                    .map_err(db_err)?;

            if balance < amount {
                return Err(LedgerError::InsufficientFunds {
                    user_id: user_id.to_string(),
                    available: balance,
                    requested: amount,
                });
            }

            sqlx::query(
                "UPDATE wallets SET balance = balance - $2, version = version + 1 WHERE user_id = $1",
            )
            .bind(user_id)
            .bind(amount)
            .execute(&mut *db_tx)
            .await
            .map_err(db_err)?;

            let tx = Transaction::purchase(user_id, amount, reason);
            Self::insert_transaction(&mut db_tx, &tx).await.map_err(db_err)?;

            db_tx.commit().await.map_err(db_err)?;
            Ok(tx)
        })
        .await
    }

    async fn append_refund(
        &self,
        user_id: &str,
        amount: Decimal,
        reason: &str,
    ) -> Result<Transaction, LedgerError> {
        let amount = normalize_amount(amount)?;
        self.get_wallet(user_id).await?;
        log_database_query(
            "append_refund",
            self.apply_credit(Transaction::refund(user_id, amount, reason)),
        )
        .await
    }

    async fn get_wallet(&self, user_id: &str) -> Result<Wallet, LedgerError> {
        let row = sqlx::query("SELECT user_id, balance, version FROM wallets WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| LedgerError::WalletNotFound(user_id.to_string()))?;
        Ok(Self::wallet_from_row(&row)?)
    }

    async fn open_wallet(&self, user_id: &str) -> Result<Wallet, LedgerError> {
        sqlx::query("INSERT INTO wallets (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        self.get_wallet(user_id).await
    }

    async fn list_transactions(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM transactions WHERE user_id = $1 ORDER BY timestamp DESC LIMIT $2",
            TRANSACTION_COLUMNS
        ))
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter()
            .map(|row| Self::transaction_from_row(row).map_err(LedgerError::from))
            .collect()
    }

    async fn find_deposit(&self, intent_id: &str) -> Result<Option<Transaction>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM transactions WHERE related_intent_id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(intent_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.as_ref().map(Self::transaction_from_row).transpose()?)
    }
}

#[async_trait]
impl IntentRepository for PgStore {
    async fn insert(&self, intent: PaymentIntent) -> Result<InsertOutcome, DatabaseError> {
        let inserted = sqlx::query(&format!(
            "INSERT INTO payment_intents ({}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, NULL, NULL, $8, $9) \
             ON CONFLICT DO NOTHING RETURNING {}",
            INTENT_COLUMNS, INTENT_COLUMNS
        ))
        .bind(&intent.intent_id)
        .bind(&intent.user_id)
        .bind(intent.requested_amount)
        .bind(intent.status.as_str())
        .bind(&intent.idempotency_key)
        .bind(&intent.checkout_url)
        .bind(&intent.raw_gateway_payload)
        .bind(intent.created_at)
        .bind(intent.updated_at)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok(InsertOutcome::Inserted(Self::intent_from_row(&row)?));
        }

        let existing = match self
            .find_by_idempotency_key(&intent.user_id, &intent.idempotency_key)
            .await?
        {
            Some(found) => Some(found),
            None => self.get(&intent.intent_id).await?,
        };

        existing
            .map(InsertOutcome::Existing)
            .ok_or_else(|| DatabaseError::corrupt("payment_intents", "conflicting row vanished"))
    }

    async fn get(&self, intent_id: &str) -> Result<Option<PaymentIntent>, DatabaseError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM payment_intents WHERE intent_id = $1",
            INTENT_COLUMNS
        ))
        .bind(intent_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::intent_from_row).transpose()
    }

    async fn find_by_idempotency_key(
        &self,
        user_id: &str,
        idempotency_key: &str,
    ) -> Result<Option<PaymentIntent>, DatabaseError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM payment_intents WHERE user_id = $1 AND idempotency_key = $2",
            INTENT_COLUMNS
        ))
        .bind(user_id)
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::intent_from_row).transpose()
    }

    async fn transition_status(
        &self,
        intent_id: &str,
        expected: IntentStatus,
        next: IntentStatus,
        raw_payload: Option<serde_json::Value>,
        at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let result = log_database_query(
            "transition_status",
            sqlx::query(
                r#"
                UPDATE payment_intents
                SET status = $3,
                    provisional_status = NULL,
                    provisional_since = NULL,
                    raw_payload = COALESCE($4, raw_payload),
                    updated_at = $5
                WHERE intent_id = $1 AND status = $2
                "#,
            )
            .bind(intent_id)
            .bind(expected.as_str())
            .bind(next.as_str())
            .bind(raw_payload)
            .bind(at)
            .execute(&self.pool),
        )
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_provisional(
        &self,
        intent_id: &str,
        expected: IntentStatus,
        outcome: ProvisionalOutcome,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE payment_intents
            SET provisional_status = $3,
                provisional_since = $4,
                updated_at = $4
            WHERE intent_id = $1 AND status = $2
            "#,
        )
        .bind(intent_id)
        .bind(expected.as_str())
        .bind(outcome.status.as_str())
        .bind(outcome.observed_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn record_snapshot(
        &self,
        intent_id: &str,
        payload: serde_json::Value,
    ) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE payment_intents SET raw_payload = $2 WHERE intent_id = $1")
            .bind(intent_id)
            .bind(payload)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_open_created_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<PaymentIntent>, DatabaseError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM payment_intents \
             WHERE status NOT IN ('SUCCEEDED', 'FAILED', 'CANCELLED', 'EXPIRED') \
             AND created_at < $1 ORDER BY created_at ASC LIMIT $2",
            INTENT_COLUMNS
        ))
        .bind(cutoff)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::intent_from_row).collect()
    }

    async fn list_provisional_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<PaymentIntent>, DatabaseError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM payment_intents \
             WHERE status NOT IN ('SUCCEEDED', 'FAILED', 'CANCELLED', 'EXPIRED') \
             AND provisional_since IS NOT NULL AND provisional_since <= $1 \
             ORDER BY provisional_since ASC LIMIT $2",
            INTENT_COLUMNS
        ))
        .bind(cutoff)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::intent_from_row).collect()
    }
}
