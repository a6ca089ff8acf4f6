use async_trait::async_trait;
use busline_domain::inventory::AvailabilitySnapshot;
use busline_domain::repository::{AvailabilityCache, StoreResult};
use redis::RedisResult;
use tracing::info;

/// Publishes the availability read model for the schedule-browsing side.
/// Keys: `schedule:{id}:availability` and `schedule:{id}:booked_seats`.
#[derive(Clone)]
pub struct RedisClient {
    client: redis::Client,
}

impl RedisClient {
    pub async fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self { client })
    }

    pub async fn set_schedule_availability(
        &self,
        schedule_id: &str,
        available: u32,
        booked_seats: &[u32],
    ) -> RedisResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let booked = booked_seats
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<String>>()
            .join(",");

        redis::pipe()
            .atomic()
            .set(format!("schedule:{}:availability", schedule_id), available)
            .set(format!("schedule:{}:booked_seats", schedule_id), booked)
            .query_async::<()>(&mut conn)
            .await?;

        info!("Availability published: {} -> {}", schedule_id, available);
        Ok(())
    }
}

#[async_trait]
impl AvailabilityCache for RedisClient {
    async fn publish_availability(&self, snapshot: &AvailabilitySnapshot) -> StoreResult<()> {
        self.set_schedule_availability(
            &snapshot.schedule_id.to_string(),
            snapshot.available,
            &snapshot.booked_seats,
        )
        .await?;
        Ok(())
    }
}
