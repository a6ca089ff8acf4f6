use async_trait::async_trait;
use busline_domain::booking::Booking;
use busline_domain::inventory::{HoldRecord, ScheduleInventory, SeatNumber};
use busline_domain::repository::{BookingStore, InventoryStore, StoreResult};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Pool, Postgres};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

#[derive(Clone)]
pub struct DbClient {
    pub pool: Pool<Postgres>,
}

impl DbClient {
    pub async fn new(connection_string: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(3))
            .connect(connection_string)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Migrations completed successfully.");
        Ok(())
    }
}

pub struct PgInventoryStore {
    pool: PgPool,
}

impl PgInventoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// Internal structs for type-safe querying
#[derive(sqlx::FromRow)]
struct ScheduleRow {
    id: Uuid,
    capacity: i32,
}

#[derive(sqlx::FromRow)]
struct BookedSeatRow {
    schedule_id: Uuid,
    seat_number: i32,
    booking_id: Uuid,
}

#[derive(sqlx::FromRow)]
struct HoldSeatRow {
    schedule_id: Uuid,
    booking_id: Uuid,
    seat_number: i32,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

#[async_trait]
impl InventoryStore for PgInventoryStore {
    async fn create_schedule(&self, inventory: &ScheduleInventory) -> StoreResult<()> {
        sqlx::query("INSERT INTO schedules (id, capacity) VALUES ($1, $2)")
            .bind(inventory.schedule_id)
            .bind(inventory.capacity as i32)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn load_all_schedules(&self) -> StoreResult<Vec<ScheduleInventory>> {
        let schedule_rows: Vec<ScheduleRow> =
            sqlx::query_as("SELECT id, capacity FROM schedules")
                .fetch_all(&self.pool)
                .await?;
        let booked_rows: Vec<BookedSeatRow> =
            sqlx::query_as("SELECT schedule_id, seat_number, booking_id FROM booked_seats")
                .fetch_all(&self.pool)
                .await?;
        let hold_rows: Vec<HoldSeatRow> = sqlx::query_as(
            "SELECT schedule_id, booking_id, seat_number, created_at, expires_at FROM seat_holds",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut schedules: HashMap<Uuid, ScheduleInventory> = schedule_rows
            .into_iter()
            .map(|row| (row.id, ScheduleInventory::new(row.id, row.capacity as u32)))
            .collect();

        for row in booked_rows {
            if let Some(inv) = schedules.get_mut(&row.schedule_id) {
                inv.booked.insert(row.seat_number as SeatNumber, row.booking_id);
            }
        }
        for row in hold_rows {
            if let Some(inv) = schedules.get_mut(&row.schedule_id) {
                let hold = inv.holds.entry(row.booking_id).or_insert_with(|| HoldRecord {
                    booking_id: row.booking_id,
                    seats: BTreeSet::new(),
                    created_at: row.created_at,
                    expires_at: row.expires_at,
                });
                hold.seats.insert(row.seat_number as SeatNumber);
            }
        }

        Ok(schedules.into_values().collect())
    }

    async fn insert_hold(&self, schedule_id: Uuid, hold: &HoldRecord) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        for seat in &hold.seats {
            sqlx::query(
                "INSERT INTO seat_holds (schedule_id, booking_id, seat_number, created_at, expires_at) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(schedule_id)
            .bind(hold.booking_id)
            .bind(*seat as i32)
            .bind(hold.created_at)
            .bind(hold.expires_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn remove_hold(&self, schedule_id: Uuid, booking_id: Uuid) -> StoreResult<()> {
        sqlx::query("DELETE FROM seat_holds WHERE schedule_id = $1 AND booking_id = $2")
            .bind(schedule_id)
            .bind(booking_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn commit_seats(
        &self,
        schedule_id: Uuid,
        booking_id: Uuid,
        seats: &BTreeSet<SeatNumber>,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM seat_holds WHERE schedule_id = $1 AND booking_id = $2")
            .bind(schedule_id)
            .bind(booking_id)
            .execute(&mut *tx)
            .await?;
        for seat in seats {
            sqlx::query(
                "INSERT INTO booked_seats (schedule_id, seat_number, booking_id) VALUES ($1, $2, $3)",
            )
            .bind(schedule_id)
            .bind(*seat as i32)
            .bind(booking_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn release_seats(
        &self,
        schedule_id: Uuid,
        booking_id: Uuid,
        seats: &BTreeSet<SeatNumber>,
    ) -> StoreResult<()> {
        let seat_numbers: Vec<i32> = seats.iter().map(|s| *s as i32).collect();
        sqlx::query(
            "DELETE FROM booked_seats \
             WHERE schedule_id = $1 AND booking_id = $2 AND seat_number = ANY($3)",
        )
        .bind(schedule_id)
        .bind(booking_id)
        .bind(&seat_numbers)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

pub struct PgBookingStore {
    pool: PgPool,
}

impl PgBookingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    schedule_id: Uuid,
    seats: Vec<i32>,
    transaction_reference: Option<String>,
    payment_status: String,
    status: String,
    payment_initiated_at: DateTime<Utc>,
    committed: bool,
    total_amount_cents: i64,
    passenger_name: String,
    passenger_phone: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl BookingRow {
    fn into_booking(self) -> StoreResult<Booking> {
        Ok(Booking {
            id: self.id,
            schedule_id: self.schedule_id,
            seats: self.seats.iter().map(|s| *s as SeatNumber).collect(),
            transaction_reference: self.transaction_reference,
            payment_status: self.payment_status.parse()?,
            status: self.status.parse()?,
            payment_initiated_at: self.payment_initiated_at,
            committed: self.committed,
            total_amount_cents: self.total_amount_cents,
            passenger_name: self.passenger_name,
            passenger_phone: self.passenger_phone,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const BOOKING_COLUMNS: &str = "id, schedule_id, seats, transaction_reference, payment_status, \
    status, payment_initiated_at, committed, total_amount_cents, passenger_name, \
    passenger_phone, created_at, updated_at";

#[async_trait]
impl BookingStore for PgBookingStore {
    async fn insert(&self, booking: &Booking) -> StoreResult<()> {
        let seats: Vec<i32> = booking.seats.iter().map(|s| *s as i32).collect();
        sqlx::query(
            "INSERT INTO bookings (id, schedule_id, seats, transaction_reference, payment_status, \
             status, payment_initiated_at, committed, total_amount_cents, passenger_name, \
             passenger_phone, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(booking.id)
        .bind(booking.schedule_id)
        .bind(&seats)
        .bind(&booking.transaction_reference)
        .bind(booking.payment_status.as_str())
        .bind(booking.status.as_str())
        .bind(booking.payment_initiated_at)
        .bind(booking.committed)
        .bind(booking.total_amount_cents)
        .bind(&booking.passenger_name)
        .bind(&booking.passenger_phone)
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, booking: &Booking) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE bookings SET transaction_reference = $2, payment_status = $3, status = $4, \
             payment_initiated_at = $5, committed = $6, updated_at = $7 WHERE id = $1",
        )
        .bind(booking.id)
        .bind(&booking.transaction_reference)
        .bind(booking.payment_status.as_str())
        .bind(booking.status.as_str())
        .bind(booking.payment_initiated_at)
        .bind(booking.committed)
        .bind(booking.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(format!("booking {} not found", booking.id).into());
        }
        Ok(())
    }

    async fn get(&self, booking_id: Uuid) -> StoreResult<Option<Booking>> {
        let row: Option<BookingRow> =
            sqlx::query_as(&format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1"))
                .bind(booking_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(BookingRow::into_booking).transpose()
    }

    async fn list_stale_in_flight(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<Booking>> {
        let rows: Vec<BookingRow> = sqlx::query_as(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings \
             WHERE payment_status IN ('PROCESSING', 'REDIRECTED') AND payment_initiated_at < $1 \
             ORDER BY payment_initiated_at",
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(BookingRow::into_booking).collect()
    }
}
