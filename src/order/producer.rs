use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use tracing::{instrument, warn};

use super::model::OrderHandoff;
use crate::error::AppError;
use crate::inventory::InventoryEngine;
use crate::logger::warn_if_slow;

/// Seam the request pipeline (C9) depends on, so tests can substitute a fake
/// producer instead of a live durable-log connection (mirrors the
/// teacher's `SwapExecutor` trait seam for its own side-effecting step).
#[async_trait]
pub trait HandoffProducer: Send + Sync {
    async fn handoff(&self, handoff: OrderHandoff) -> Result<(), AppError>;
}

/// Current `OrderHandoff` wire schema version (spec §6: "schema-versioned
/// binary format"). Bump this and branch on it in C7 when the shape changes.
const HANDOFF_SCHEMA_VERSION: u8 = 1;

const PRODUCE_TIMEOUT: Duration = Duration::from_secs(5);

pub fn encode_handoff(handoff: &OrderHandoff) -> anyhow::Result<Vec<u8>> {
    let mut buf = vec![HANDOFF_SCHEMA_VERSION];
    buf.extend(rmp_serde::to_vec(handoff)?);
    Ok(buf)
}

pub fn decode_handoff(bytes: &[u8]) -> anyhow::Result<OrderHandoff> {
    let (version, body) = bytes
        .split_first()
        .ok_or_else(|| anyhow::anyhow!("empty handoff payload"))?;

    match version {
        1 => Ok(rmp_serde::from_slice(body)?),
        other => anyhow::bail!("unsupported OrderHandoff schema version: {other}"),
    }
}

/// C6: builds an `OrderHandoff` and writes it to the durable log (C2),
/// partitioned by `hash(user id) mod N` via rdkafka's default key-based
/// partitioner.
pub struct OrderProducer {
    producer: FutureProducer,
    topic: String,
    inventory: Arc<dyn InventoryEngine>,
}

impl OrderProducer {
    pub fn new(producer: FutureProducer, topic: String, inventory: Arc<dyn InventoryEngine>) -> Self {
        Self {
            producer,
            topic,
            inventory,
        }
    }
}

#[async_trait]
impl HandoffProducer for OrderProducer {
    /// On success, the handoff is guaranteed to be eventually persisted or
    /// dead-lettered by C7. On failure, the inventory decrement that produced
    /// this handoff is rolled back and `SYSTEM_BUSY` is surfaced (spec §4.6).
    #[instrument(skip(self, handoff), target = "order_producer", fields(order_id = %handoff.order_id, sku_id = %handoff.sku_id))]
    async fn handoff(&self, handoff: OrderHandoff) -> Result<(), AppError> {
        let payload = encode_handoff(&handoff).map_err(AppError::from)?;

        let record = FutureRecord::to(&self.topic)
            .key(&handoff.user_id)
            .payload(&payload);

        let send_result = warn_if_slow("kafka_handoff_send", Duration::from_millis(200), async {
            self.producer.send(record, Timeout::After(PRODUCE_TIMEOUT)).await
        })
        .await;

        match send_result {
            Ok(_) => Ok(()),
            Err((kafka_err, _)) => {
                warn!(error = %kafka_err, order_id = %handoff.order_id, "handoff produce failed; rolling back decrement");

                if let Err(rollback_err) = self
                    .inventory
                    .rollback(&handoff.sku_id, &handoff.user_id, handoff.order_id, handoff.quantity)
                    .await
                {
                    warn!(error = ?rollback_err, order_id = %handoff.order_id, "compensating rollback also failed; audit ledger and dead-letter must reconcile");
                }

                Err(AppError::SystemBusy)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn handoff_round_trips_through_wire_format() {
        let handoff = OrderHandoff {
            order_id: Uuid::now_v7(),
            user_id: "u1".into(),
            sku_id: "sku1".into(),
            quantity: 2,
            client_ts_ms: 123,
            source_channel: "WEB".into(),
            trace_id: "trace1".into(),
        };

        let encoded = encode_handoff(&handoff).unwrap();
        assert_eq!(encoded[0], HANDOFF_SCHEMA_VERSION);

        let decoded = decode_handoff(&encoded).unwrap();
        assert_eq!(decoded, handoff);
    }

    #[test]
    fn unknown_schema_version_is_rejected() {
        let mut bytes = vec![99u8];
        bytes.extend_from_slice(b"garbage");
        assert!(decode_handoff(&bytes).is_err());
    }

    #[test]
    fn empty_payload_is_rejected() {
        assert!(decode_handoff(&[]).is_err());
    }
}
