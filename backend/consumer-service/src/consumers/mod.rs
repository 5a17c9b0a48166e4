pub mod dispatcher;
pub mod relay_messages;

pub use dispatcher::{Delivery, PartitionControl, PartitionDispatcher};
pub use relay_messages::{decode_delivery, KafkaPartitionControl, RelayMessageConsumer};
