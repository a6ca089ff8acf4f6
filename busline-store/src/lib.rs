pub mod app_config;
pub mod memory;
pub mod postgres;
pub mod redis_cache;

pub use app_config::Config;
pub use memory::{MemoryBookingStore, MemoryInventoryStore};
pub use postgres::{DbClient, PgBookingStore, PgInventoryStore};
pub use redis_cache::RedisClient;
