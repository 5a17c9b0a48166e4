pub mod batch;
pub mod publisher;
pub mod rate_limiter;

pub use batch::{BatchCoordinator, BatchRequest, BatchResult};
pub use publisher::{
    BrokerSender, ConnectionStatus, DeliveryFuture, DeliveryReceipt, KafkaBrokerSender,
    PendingOutcome, Publisher,
};
pub use rate_limiter::RateLimiter;
