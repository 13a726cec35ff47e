use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::store::validate_commit;
use crate::{
    DueCursor, InventoryRecord, LedgerCommit, LedgerError, LedgerStore, LineItem, OrderId,
    RecordUpdate, Reservation, ReservationId, ReservationStatus, ReservationWrite, Result, Sku,
    Version,
};

const RESERVATION_COLUMNS: &str =
    "id, order_id, line_items, status, created_at, expires_at, updated_at";

/// PostgreSQL-backed ledger.
///
/// Record writes are `UPDATE ... WHERE version = $expected`; a commit runs
/// in one transaction and rolls back on the first update that matches no row.
/// Rows are always locked in SKU order, so two commits over the same SKUs
/// cannot wait on each other in a cycle.
#[derive(Clone)]
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    /// Creates a new PostgreSQL ledger.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_record(row: PgRow) -> Result<InventoryRecord> {
        Ok(InventoryRecord {
            sku: Sku::new(row.try_get::<String, _>("sku")?),
            quantity_on_hand: row.try_get("quantity_on_hand")?,
            quantity_reserved: row.try_get("quantity_reserved")?,
            version: Version::new(row.try_get("version")?),
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_reservation(row: PgRow) -> Result<Reservation> {
        let line_items: Vec<LineItem> =
            serde_json::from_value(row.try_get::<serde_json::Value, _>("line_items")?)?;
        let status: ReservationStatus =
            serde_json::from_value(serde_json::Value::String(row.try_get("status")?))?;

        Ok(Reservation {
            reservation_id: ReservationId::from_uuid(row.try_get::<Uuid, _>("id")?),
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            line_items,
            status,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    /// Maps CHECK constraint failures back to the ledger invariant.
    fn map_update_error(e: sqlx::Error, update: &RecordUpdate) -> LedgerError {
        if let sqlx::Error::Database(ref db_err) = e
            && db_err
                .constraint()
                .is_some_and(|name| name.starts_with("inventory_"))
        {
            return LedgerError::InvariantViolation {
                sku: update.sku.clone(),
                on_hand: update.quantity_on_hand,
                reserved: update.quantity_reserved,
            };
        }
        LedgerError::Database(e)
    }

    async fn apply_update(
        tx: &mut Transaction<'_, Postgres>,
        update: &RecordUpdate,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE inventory_records
            SET quantity_on_hand = $1, quantity_reserved = $2, version = version + 1, updated_at = $3
            WHERE sku = $4 AND version = $5
            "#,
        )
        .bind(update.quantity_on_hand)
        .bind(update.quantity_reserved)
        .bind(at)
        .bind(update.sku.as_str())
        .bind(update.expected_version.as_i64())
        .execute(&mut **tx)
        .await
        .map_err(|e| Self::map_update_error(e, update))?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let actual: Option<i64> =
            sqlx::query_scalar("SELECT version FROM inventory_records WHERE sku = $1")
                .bind(update.sku.as_str())
                .fetch_optional(&mut **tx)
                .await?;

        match actual {
            Some(actual) => Err(LedgerError::VersionConflict {
                sku: update.sku.clone(),
                expected: update.expected_version,
                actual: Version::new(actual),
            }),
            None => Err(LedgerError::RecordNotFound(update.sku.clone())),
        }
    }

    async fn apply_reservation_write(
        tx: &mut Transaction<'_, Postgres>,
        write: &ReservationWrite,
        at: DateTime<Utc>,
    ) -> Result<()> {
        match write {
            ReservationWrite::None => Ok(()),
            ReservationWrite::Insert(reservation) => {
                let line_items = serde_json::to_value(&reservation.line_items)?;
                sqlx::query(
                    r#"
                    INSERT INTO reservations (id, order_id, line_items, status, created_at, expires_at, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    "#,
                )
                .bind(reservation.reservation_id.as_uuid())
                .bind(reservation.order_id.as_uuid())
                .bind(line_items)
                .bind(reservation.status.as_str())
                .bind(reservation.created_at)
                .bind(reservation.expires_at)
                .bind(reservation.updated_at)
                .execute(&mut **tx)
                .await
                .map_err(|e| {
                    if let sqlx::Error::Database(ref db_err) = e
                        && db_err.is_unique_violation()
                    {
                        return LedgerError::ReservationExists(reservation.reservation_id);
                    }
                    LedgerError::Database(e)
                })?;
                Ok(())
            }
            ReservationWrite::Transition {
                reservation_id,
                from,
                to,
            } => {
                let result = sqlx::query(
                    "UPDATE reservations SET status = $1, updated_at = $2 WHERE id = $3 AND status = $4",
                )
                .bind(to.as_str())
                .bind(at)
                .bind(reservation_id.as_uuid())
                .bind(from.as_str())
                .execute(&mut **tx)
                .await?;

                if result.rows_affected() == 1 {
                    return Ok(());
                }

                let actual: Option<String> =
                    sqlx::query_scalar("SELECT status FROM reservations WHERE id = $1")
                        .bind(reservation_id.as_uuid())
                        .fetch_optional(&mut **tx)
                        .await?;

                match actual {
                    Some(actual) => Err(LedgerError::ReservationConflict {
                        reservation_id: *reservation_id,
                        expected: *from,
                        actual: serde_json::from_value(serde_json::Value::String(actual))?,
                    }),
                    None => Err(LedgerError::ReservationNotFound(*reservation_id)),
                }
            }
        }
    }
}

#[async_trait]
impl LedgerStore for PostgresLedger {
    async fn get_record(&self, sku: &Sku) -> Result<Option<InventoryRecord>> {
        let row = sqlx::query(
            r#"
            SELECT sku, quantity_on_hand, quantity_reserved, version, updated_at
            FROM inventory_records
            WHERE sku = $1
            "#,
        )
        .bind(sku.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_record).transpose()
    }

    async fn get_records(&self, skus: &[Sku]) -> Result<Vec<InventoryRecord>> {
        let keys: Vec<&str> = skus.iter().map(Sku::as_str).collect();
        let rows = sqlx::query(
            r#"
            SELECT sku, quantity_on_hand, quantity_reserved, version, updated_at
            FROM inventory_records
            WHERE sku = ANY($1)
            "#,
        )
        .bind(&keys)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn insert_record(&self, record: InventoryRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO inventory_records (sku, quantity_on_hand, quantity_reserved, version, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(record.sku.as_str())
        .bind(record.quantity_on_hand)
        .bind(record.quantity_reserved)
        .bind(record.version.as_i64())
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.is_unique_violation() {
                    return LedgerError::RecordExists(record.sku.clone());
                }
                if db_err.is_check_violation() {
                    return LedgerError::InvariantViolation {
                        sku: record.sku.clone(),
                        on_hand: record.quantity_on_hand,
                        reserved: record.quantity_reserved,
                    };
                }
            }
            LedgerError::Database(e)
        })?;

        Ok(())
    }

    async fn get_reservation(&self, reservation_id: ReservationId) -> Result<Option<Reservation>> {
        let row = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1"
        ))
        .bind(reservation_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_reservation).transpose()
    }

    async fn find_reservation_by_order(&self, order_id: OrderId) -> Result<Option<Reservation>> {
        let row = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE order_id = $1 ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(order_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_reservation).transpose()
    }

    async fn due_reservations(
        &self,
        now: DateTime<Utc>,
        after: Option<DueCursor>,
        limit: usize,
    ) -> Result<Vec<Reservation>> {
        let rows = match after {
            None => {
                sqlx::query(&format!(
                    r#"
                    SELECT {RESERVATION_COLUMNS} FROM reservations
                    WHERE status = 'Pending' AND expires_at <= $1
                    ORDER BY expires_at ASC, id ASC
                    LIMIT $2
                    "#
                ))
                .bind(now)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
            Some(cursor) => {
                sqlx::query(&format!(
                    r#"
                    SELECT {RESERVATION_COLUMNS} FROM reservations
                    WHERE status = 'Pending' AND expires_at <= $1 AND (expires_at, id) > ($2, $3)
                    ORDER BY expires_at ASC, id ASC
                    LIMIT $4
                    "#
                ))
                .bind(now)
                .bind(cursor.expires_at)
                .bind(cursor.reservation_id.as_uuid())
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(Self::row_to_reservation).collect()
    }

    #[tracing::instrument(skip(self, commit), fields(updates = commit.updates.len()))]
    async fn commit(&self, mut commit: LedgerCommit) -> Result<()> {
        validate_commit(&commit)?;
        commit.updates.sort_by(|a, b| a.sku.cmp(&b.sku));

        self.apply_commit(&commit).await.map_err(abort_as_conflict)
    }
}

impl PostgresLedger {
    async fn apply_commit(&self, commit: &LedgerCommit) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for update in &commit.updates {
            Self::apply_update(&mut tx, update, commit.at).await?;
        }
        Self::apply_reservation_write(&mut tx, &commit.reservation, commit.at).await?;

        tx.commit().await?;
        Ok(())
    }
}

/// Maps `deadlock_detected` (40P01) and `serialization_failure` (40001) to a
/// retryable conflict; the whole transaction was rolled back.
fn abort_as_conflict(err: LedgerError) -> LedgerError {
    if let LedgerError::Database(sqlx::Error::Database(db)) = &err
        && matches!(db.code().as_deref(), Some("40P01" | "40001"))
    {
        tracing::debug!(code = ?db.code(), "transaction aborted by the database");
        return LedgerError::TransactionAborted(db.message().to_string());
    }
    err
}
