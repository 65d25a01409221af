use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;
use tracing::{debug, error};

use tessera_core::{BoxError, EventTransport};

/// Kafka-backed notification transport. All notifications go to a single
/// topic with the channel as the record key, so per-channel ordering rides
/// on partition ordering.
#[derive(Clone)]
pub struct KafkaTransport {
    producer: FutureProducer,
    topic: String,
}

impl KafkaTransport {
    pub fn new(brokers: &str, topic: &str) -> Result<Self, rdkafka::error::KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self {
            producer,
            topic: topic.to_string(),
        })
    }
}

#[async_trait]
impl EventTransport for KafkaTransport {
    async fn emit(
        &self,
        channel: &str,
        event: &str,
        payload: serde_json::Value,
    ) -> Result<(), BoxError> {
        let body = serde_json::to_string(&serde_json::json!({
            "event": event,
            "payload": payload,
        }))?;
        let record = FutureRecord::to(&self.topic).key(channel).payload(&body);

        match self
            .producer
            .send(record, Timeout::After(Duration::from_secs(0)))
            .await
        {
            Ok(delivery) => {
                debug!(
                    channel,
                    event,
                    partition = delivery.partition,
                    offset = delivery.offset,
                    "notification sent"
                );
                Ok(())
            }
            Err((e, _msg)) => {
                error!(channel, event, error = %e, "failed to send notification");
                Err(Box::new(e))
            }
        }
    }
}
