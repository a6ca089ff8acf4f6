pub mod gateway;
pub mod scheduler;

pub use gateway::{map_gateway_status, GatewayError, GatewayVerification, MockGateway, PaymentGateway};
pub use scheduler::{CycleStats, ReconRules, ReconciliationScheduler};
