use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Postgres};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::payment_repository::{GrantCommit, PaymentRepository};
use crate::db::postgres_credit_account_repository::{
    guarded_account_update, insert_transaction_query,
};
use crate::models::credit::CreditAccount;
use crate::models::payment::{ApprovalStatus, PaymentRecord, PaymentStatus};
use crate::models::plan::PlanKind;
use crate::models::transaction::CreditTransaction;

pub struct PostgresPaymentRepository {
    pub pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct PaymentRecordRow {
    order_id: String,
    user_id: Uuid,
    plan_id: String,
    plan_kind: String,
    expected_amount: f64,
    status: String,
    approval_status: String,
    invoice_id: Option<String>,
    charged_amount: Option<f64>,
    verified_charged_amount: Option<f64>,
    rejection_reason: Option<String>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<PaymentRecordRow> for PaymentRecord {
    type Error = sqlx::Error;

    fn try_from(row: PaymentRecordRow) -> Result<Self, Self::Error> {
        let plan_kind =
            PlanKind::parse(&row.plan_kind).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        let status =
            PaymentStatus::parse(&row.status).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        let approval_status = ApprovalStatus::parse(&row.approval_status)
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        Ok(PaymentRecord {
            order_id: row.order_id,
            user_id: row.user_id,
            plan_id: row.plan_id,
            plan_kind,
            expected_amount: row.expected_amount,
            status,
            approval_status,
            invoice_id: row.invoice_id,
            charged_amount: row.charged_amount,
            verified_charged_amount: row.verified_charged_amount,
            rejection_reason: row.rejection_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const RECORD_COLUMNS: &str = "order_id, user_id, plan_id, plan_kind, expected_amount, \
     status, approval_status, invoice_id, charged_amount, verified_charged_amount, \
     rejection_reason, created_at, updated_at";

#[async_trait]
impl PaymentRepository for PostgresPaymentRepository {
    async fn insert_record(&self, record: &PaymentRecord) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO payment_records
                (order_id, user_id, plan_id, plan_kind, expected_amount,
                 status, approval_status, invoice_id, charged_amount,
                 verified_charged_amount, rejection_reason, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(record.order_id.as_str())
        .bind(record.user_id)
        .bind(record.plan_id.as_str())
        .bind(record.plan_kind.as_str())
        .bind(record.expected_amount)
        .bind(record.status.as_str())
        .bind(record.approval_status.as_str())
        .bind(record.invoice_id.as_deref())
        .bind(record.charged_amount)
        .bind(record.verified_charged_amount)
        .bind(record.rejection_reason.as_deref())
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_order_id(
        &self,
        order_id: &str,
    ) -> Result<Option<PaymentRecord>, sqlx::Error> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM payment_records WHERE order_id = $1");
        let row = sqlx::query_as::<Postgres, PaymentRecordRow>(&sql)
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(PaymentRecord::try_from).transpose()
    }

    async fn find_by_invoice_id(
        &self,
        invoice_id: &str,
    ) -> Result<Option<PaymentRecord>, sqlx::Error> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM payment_records WHERE invoice_id = $1");
        let row = sqlx::query_as::<Postgres, PaymentRecordRow>(&sql)
            .bind(invoice_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(PaymentRecord::try_from).transpose()
    }

    async fn bind_invoice(
        &self,
        order_id: &str,
        invoice_id: &str,
        now: OffsetDateTime,
    ) -> Result<Option<String>, sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE payment_records
            SET invoice_id = $2, updated_at = $3
            WHERE order_id = $1 AND invoice_id IS NULL
            "#,
        )
        .bind(order_id)
        .bind(invoice_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let stored = sqlx::query_scalar::<Postgres, Option<String>>(
            "SELECT invoice_id FROM payment_records WHERE order_id = $1",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(stored.flatten())
    }

    async fn mark_processing(
        &self,
        order_id: &str,
        now: OffsetDateTime,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE payment_records
            SET status = 'processing', updated_at = $2
            WHERE order_id = $1 AND status = 'pending'
            "#,
        )
        .bind(order_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_rejected(
        &self,
        order_id: &str,
        reason: &str,
        now: OffsetDateTime,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE payment_records
            SET status = 'failed', approval_status = 'rejected',
                rejection_reason = $2, updated_at = $3
            WHERE order_id = $1 AND status NOT IN ('completed', 'failed', 'cancelled')
            "#,
        )
        .bind(order_id)
        .bind(reason)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_advisory_charge(
        &self,
        order_id: &str,
        charged_amount: f64,
        now: OffsetDateTime,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE payment_records
            SET charged_amount = $2, updated_at = $3
            WHERE order_id = $1
            "#,
        )
        .bind(order_id)
        .bind(charged_amount)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn complete_with_grant(
        &self,
        order_id: &str,
        verified_amount: f64,
        account: &CreditAccount,
        expected_version: i64,
        txn: &CreditTransaction,
        now: OffsetDateTime,
    ) -> Result<GrantCommit, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let conn: &mut PgConnection = &mut *tx;
        let claimed = sqlx::query(
            r#"
            UPDATE payment_records
            SET status = 'completed', approval_status = 'approved',
                verified_charged_amount = $2, updated_at = $3
            WHERE order_id = $1
              AND status IN ('pending', 'processing')
              AND approval_status = 'pending'
            "#,
        )
        .bind(order_id)
        .bind(verified_amount)
        .bind(now)
        .execute(conn)
        .await?
        .rows_affected();

        if claimed == 0 {
            tx.rollback().await?;
            return Ok(GrantCommit::RecordTerminal);
        }

        let conn: &mut PgConnection = &mut *tx;
        let updated = guarded_account_update(account, expected_version)
            .execute(conn)
            .await?
            .rows_affected();

        if updated == 0 {
            tx.rollback().await?;
            return Ok(GrantCommit::AccountConflict);
        }

        let conn: &mut PgConnection = &mut *tx;
        insert_transaction_query(txn).execute(conn).await?;

        tx.commit().await?;
        Ok(GrantCommit::Applied)
    }
}
