pub mod consumer;
pub mod model;
pub mod producer;
pub mod repository;
pub mod repository_sqlx;

pub use consumer::{
    ConsumedHandoff, ConsumerConfig, ConsumerRouter, DeadLetterSink, HandoffSource,
    KafkaDeadLetterSink, KafkaHandoffSource, decode_message,
};
pub use model::{DeadLetter, Order, OrderHandoff, OrderStatus};
pub use producer::{HandoffProducer, OrderProducer};
pub use repository::{BatchInsertOutcome, OrderRepository, TimedOutOrder};
pub use repository_sqlx::SqlxOrderRepository;
