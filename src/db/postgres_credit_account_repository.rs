use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgArguments;
use sqlx::{PgConnection, PgPool, Postgres};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::credit_account_repository::CreditAccountRepository;
use crate::models::credit::{BucketBalance, CreditAccount, CreditCategory};
use crate::models::transaction::{CreditTransaction, TransactionType};

pub struct PostgresCreditAccountRepository {
    pub pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct CreditAccountRow {
    user_id: Uuid,
    words_plan_total: i64,
    words_used: i64,
    words_addon: i64,
    words_admin: i64,
    words_trial: i64,
    books_plan_total: i64,
    books_used: i64,
    books_addon: i64,
    books_admin: i64,
    books_trial: i64,
    offers_plan_total: i64,
    offers_used: i64,
    offers_addon: i64,
    offers_admin: i64,
    offers_trial: i64,
    cycle_start: OffsetDateTime,
    cycle_end: OffsetDateTime,
    allow_rollover: bool,
    trial_expires_at: Option<OffsetDateTime>,
    active_plan_id: Option<String>,
    version: i64,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<CreditAccountRow> for CreditAccount {
    fn from(row: CreditAccountRow) -> Self {
        CreditAccount {
            user_id: row.user_id,
            words: BucketBalance {
                plan_total_this_cycle: row.words_plan_total,
                used_this_cycle: row.words_used,
                remaining_addon: row.words_addon,
                remaining_admin: row.words_admin,
                remaining_trial: row.words_trial,
            },
            books: BucketBalance {
                plan_total_this_cycle: row.books_plan_total,
                used_this_cycle: row.books_used,
                remaining_addon: row.books_addon,
                remaining_admin: row.books_admin,
                remaining_trial: row.books_trial,
            },
            offers: BucketBalance {
                plan_total_this_cycle: row.offers_plan_total,
                used_this_cycle: row.offers_used,
                remaining_addon: row.offers_addon,
                remaining_admin: row.offers_admin,
                remaining_trial: row.offers_trial,
            },
            cycle_start: row.cycle_start,
            cycle_end: row.cycle_end,
            allow_rollover: row.allow_rollover,
            trial_expires_at: row.trial_expires_at,
            active_plan_id: row.active_plan_id,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const ACCOUNT_COLUMNS: &str = "user_id, \
     words_plan_total, words_used, words_addon, words_admin, words_trial, \
     books_plan_total, books_used, books_addon, books_admin, books_trial, \
     offers_plan_total, offers_used, offers_addon, offers_admin, offers_trial, \
     cycle_start, cycle_end, allow_rollover, trial_expires_at, active_plan_id, \
     version, created_at, updated_at";

/// Version-guarded write of the full account row. Shared with the payment
/// repository so settlement can join it into the claim transaction.
pub(crate) fn guarded_account_update(
    account: &CreditAccount,
    expected_version: i64,
) -> sqlx::query::Query<'_, Postgres, PgArguments> {
    sqlx::query(
        r#"
        UPDATE credit_accounts SET
            words_plan_total = $2, words_used = $3, words_addon = $4,
            words_admin = $5, words_trial = $6,
            books_plan_total = $7, books_used = $8, books_addon = $9,
            books_admin = $10, books_trial = $11,
            offers_plan_total = $12, offers_used = $13, offers_addon = $14,
            offers_admin = $15, offers_trial = $16,
            cycle_start = $17, cycle_end = $18, allow_rollover = $19,
            trial_expires_at = $20, active_plan_id = $21,
            version = version + 1, updated_at = $22
        WHERE user_id = $1 AND version = $23
        "#,
    )
    .bind(account.user_id)
    .bind(account.words.plan_total_this_cycle)
    .bind(account.words.used_this_cycle)
    .bind(account.words.remaining_addon)
    .bind(account.words.remaining_admin)
    .bind(account.words.remaining_trial)
    .bind(account.books.plan_total_this_cycle)
    .bind(account.books.used_this_cycle)
    .bind(account.books.remaining_addon)
    .bind(account.books.remaining_admin)
    .bind(account.books.remaining_trial)
    .bind(account.offers.plan_total_this_cycle)
    .bind(account.offers.used_this_cycle)
    .bind(account.offers.remaining_addon)
    .bind(account.offers.remaining_admin)
    .bind(account.offers.remaining_trial)
    .bind(account.cycle_start)
    .bind(account.cycle_end)
    .bind(account.allow_rollover)
    .bind(account.trial_expires_at)
    .bind(account.active_plan_id.as_deref())
    .bind(account.updated_at)
    .bind(expected_version)
}

pub(crate) fn insert_transaction_query(
    txn: &CreditTransaction,
) -> sqlx::query::Query<'_, Postgres, PgArguments> {
    sqlx::query(
        r#"
        INSERT INTO credit_transactions
            (id, user_id, txn_type, category, amount, description, metadata, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(txn.id)
    .bind(txn.user_id)
    .bind(txn.txn_type.as_str())
    .bind(txn.category.as_str())
    .bind(txn.amount)
    .bind(txn.description.as_str())
    .bind(&txn.metadata)
    .bind(txn.created_at)
}

#[derive(sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    user_id: Uuid,
    txn_type: String,
    category: String,
    amount: i64,
    description: String,
    metadata: Value,
    created_at: OffsetDateTime,
}

impl TryFrom<TransactionRow> for CreditTransaction {
    type Error = sqlx::Error;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let txn_type =
            TransactionType::parse(&row.txn_type).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        let category =
            CreditCategory::parse(&row.category).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        Ok(CreditTransaction {
            id: row.id,
            user_id: row.user_id,
            txn_type,
            category,
            amount: row.amount,
            description: row.description,
            metadata: row.metadata,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl CreditAccountRepository for PostgresCreditAccountRepository {
    async fn find_account(&self, user_id: Uuid) -> Result<Option<CreditAccount>, sqlx::Error> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM credit_accounts WHERE user_id = $1");
        let row = sqlx::query_as::<Postgres, CreditAccountRow>(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(CreditAccount::from))
    }

    async fn insert_account(&self, account: &CreditAccount) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO credit_accounts
                (user_id,
                 words_plan_total, words_used, words_addon, words_admin, words_trial,
                 books_plan_total, books_used, books_addon, books_admin, books_trial,
                 offers_plan_total, offers_used, offers_addon, offers_admin, offers_trial,
                 cycle_start, cycle_end, allow_rollover, trial_expires_at, active_plan_id,
                 version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18, $19, $20, $21, $22, $23, $24)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(account.user_id)
        .bind(account.words.plan_total_this_cycle)
        .bind(account.words.used_this_cycle)
        .bind(account.words.remaining_addon)
        .bind(account.words.remaining_admin)
        .bind(account.words.remaining_trial)
        .bind(account.books.plan_total_this_cycle)
        .bind(account.books.used_this_cycle)
        .bind(account.books.remaining_addon)
        .bind(account.books.remaining_admin)
        .bind(account.books.remaining_trial)
        .bind(account.offers.plan_total_this_cycle)
        .bind(account.offers.used_this_cycle)
        .bind(account.offers.remaining_addon)
        .bind(account.offers.remaining_admin)
        .bind(account.offers.remaining_trial)
        .bind(account.cycle_start)
        .bind(account.cycle_end)
        .bind(account.allow_rollover)
        .bind(account.trial_expires_at)
        .bind(account.active_plan_id.as_deref())
        .bind(account.version)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn commit_mutation(
        &self,
        account: &CreditAccount,
        expected_version: i64,
        txn: &CreditTransaction,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let conn: &mut PgConnection = &mut *tx;
        let updated = guarded_account_update(account, expected_version)
            .execute(conn)
            .await?
            .rows_affected();

        if updated == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        let conn: &mut PgConnection = &mut *tx;
        insert_transaction_query(txn).execute(conn).await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn list_transactions_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<CreditTransaction>, sqlx::Error> {
        let rows = sqlx::query_as::<Postgres, TransactionRow>(
            r#"
            SELECT id, user_id, txn_type, category, amount, description, metadata, created_at
            FROM credit_transactions
            WHERE user_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(CreditTransaction::try_from).collect()
    }
}
