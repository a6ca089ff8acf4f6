use busline_api::{app, AppState};
use busline_domain::repository::{AvailabilityCache, BookingStore, InventoryStore};
use busline_inventory::SeatInventoryCoordinator;
use busline_ledger::BookingLedger;
use busline_recon::{MockGateway, PaymentGateway, ReconRules, ReconciliationScheduler};
use busline_store::memory::{MemoryBookingStore, MemoryInventoryStore};
use busline_store::{DbClient, PgBookingStore, PgInventoryStore, RedisClient};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "busline_api=debug,busline_recon=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = busline_store::app_config::Config::load().expect("Failed to load config");
    tracing::info!("Starting Busline API on port {}", config.server.port);

    // Stores: Postgres when configured, in-memory otherwise
    let (inventory_store, booking_store): (Arc<dyn InventoryStore>, Arc<dyn BookingStore>) =
        match &config.database {
            Some(database) => {
                let db = DbClient::new(&database.url)
                    .await
                    .expect("Failed to connect to Postgres");
                db.migrate().await.expect("Failed to run migrations");
                (
                    Arc::new(PgInventoryStore::new(db.pool.clone())),
                    Arc::new(PgBookingStore::new(db.pool.clone())),
                )
            }
            None => {
                tracing::warn!("No database configured, inventory and bookings are in-memory");
                (
                    Arc::new(MemoryInventoryStore::new()),
                    Arc::new(MemoryBookingStore::new()),
                )
            }
        };

    // Availability read-cache for schedule browsing
    let cache: Option<Arc<dyn AvailabilityCache>> = match &config.redis {
        Some(redis) => {
            let client = RedisClient::new(&redis.url)
                .await
                .expect("Failed to connect to Redis");
            Some(Arc::new(client))
        }
        None => None,
    };

    let inventory = Arc::new(
        SeatInventoryCoordinator::load(inventory_store, cache)
            .await
            .expect("Failed to load inventory"),
    );
    let ledger = Arc::new(BookingLedger::new(
        booking_store,
        inventory.clone(),
        chrono::Duration::seconds(config.recon.hold_ttl_seconds as i64),
    ));

    // Provider adapters live outside this engine; the mock keeps the
    // reconciliation loop exercisable end to end.
    let gateway: Arc<dyn PaymentGateway> = Arc::new(MockGateway::new());
    let scheduler = Arc::new(ReconciliationScheduler::new(
        ledger.clone(),
        inventory.clone(),
        gateway,
        ReconRules {
            stale_after: chrono::Duration::seconds(config.recon.stale_after_seconds as i64),
            cycle_interval: std::time::Duration::from_secs(config.recon.cycle_seconds),
            gateway_timeout: std::time::Duration::from_secs(config.recon.gateway_timeout_seconds),
        },
    ));
    tokio::spawn(scheduler.run());

    let app = app(AppState { ledger, inventory });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");
    axum::serve(listener, app).await.expect("Server error");
}
