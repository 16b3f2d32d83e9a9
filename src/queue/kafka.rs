use crate::config::KafkaConfig;
use crate::error::QueueError;
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{Offset, TopicPartitionList};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{Delivery, Receipt, TaskBroker, TaskEnvelope, TaskPublisher};

const PRODUCE_TIMEOUT: Duration = Duration::from_secs(5);

pub fn dead_letter_topic(queue: &str) -> String {
    format!("{}.dead-letter", queue)
}

/// Connection settings shared by producer and consumer. SASL settings are
/// only applied for SASL security protocols.
fn client_config(config: &KafkaConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.bootstrap_servers)
        .set("security.protocol", &config.security_protocol);

    if config.security_protocol.to_ascii_uppercase().starts_with("SASL") {
        client_config
            .set("sasl.mechanism", &config.sasl_mechanism)
            .set("sasl.username", &config.username)
            .set("sasl.password", &config.password);
    }

    client_config
}

/// Publishes task envelopes to the topic named after their queue.
pub struct KafkaPublisher {
    producer: FutureProducer,
}

impl KafkaPublisher {
    pub fn new(config: &KafkaConfig) -> Result<Self, QueueError> {
        let producer: FutureProducer = client_config(config)
            .set("message.timeout.ms", PRODUCE_TIMEOUT.as_millis().to_string())
            .set("enable.idempotence", "true")
            .create()?;
        Ok(Self { producer })
    }

    async fn send(&self, topic: &str, envelope: &TaskEnvelope) -> Result<(), QueueError> {
        let key = envelope.id.to_string();
        let payload = serde_json::to_vec(envelope)?;
        let record = FutureRecord::to(topic).key(&key).payload(&payload);

        let (partition, offset) = self
            .producer
            .send(record, PRODUCE_TIMEOUT)
            .await
            .map_err(|(e, _)| QueueError::Kafka(e))?;

        debug!(
            task_id = %envelope.id,
            topic,
            partition,
            offset,
            "Published task"
        );
        Ok(())
    }
}

#[async_trait]
impl TaskPublisher for KafkaPublisher {
    async fn publish(&self, envelope: &TaskEnvelope) -> Result<(), QueueError> {
        self.send(&envelope.queue, envelope).await
    }
}

/// Kafka-backed broker. Partition ownership within the consumer group gives
/// each task a single owner; offsets are stored only after the worker has
/// decided the task's outcome, so a crash mid-flight redelivers from the last
/// stored offset.
///
/// Workers finish out of order and `ack` stores `offset + 1` as each one
/// finishes. A later delivery that completes first can therefore move the
/// committed offset past an earlier one still in flight (for example,
/// sleeping until its `available_at`). If the process dies in that window,
/// the earlier task is not redelivered. An unacknowledged delivery is only
/// seen again after a restart or rebalance, and only if no later offset on
/// its partition was stored in the meantime.
pub struct KafkaBroker {
    publisher: KafkaPublisher,
    consumer: StreamConsumer,
}

impl KafkaBroker {
    pub fn new(config: &KafkaConfig, queues: &[&str]) -> Result<Self, QueueError> {
        info!("Initializing Kafka consumer for queues: {:?}", queues);

        let consumer: StreamConsumer = client_config(config)
            .set("group.id", &config.group_id)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false")
            .create()?;

        consumer.subscribe(queues)?;
        info!("Subscribed to topics: {:?}", queues);

        Ok(Self {
            publisher: KafkaPublisher::new(config)?,
            consumer,
        })
    }
}

#[async_trait]
impl TaskPublisher for KafkaBroker {
    async fn publish(&self, envelope: &TaskEnvelope) -> Result<(), QueueError> {
        self.publisher.publish(envelope).await
    }
}

#[async_trait]
impl TaskBroker for KafkaBroker {
    async fn next(&self) -> Result<Delivery, QueueError> {
        loop {
            let m = self.consumer.recv().await?;

            let payload = match m.payload() {
                None => {
                    warn!("Received empty payload from Kafka");
                    self.consumer.store_offset_from_message(&m)?;
                    continue;
                }
                Some(p) => p,
            };

            // An envelope that does not decode can never be handled; skip it
            // rather than block the partition.
            let envelope: TaskEnvelope = match serde_json::from_slice(payload) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(
                        topic = m.topic(),
                        partition = m.partition(),
                        offset = m.offset(),
                        "Dropping undecodable task envelope: {}",
                        e
                    );
                    self.consumer.store_offset_from_message(&m)?;
                    continue;
                }
            };

            return Ok(Delivery {
                envelope,
                receipt: Receipt {
                    topic: m.topic().to_string(),
                    partition: m.partition(),
                    offset: m.offset(),
                },
            });
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let receipt = &delivery.receipt;
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(
            &receipt.topic,
            receipt.partition,
            Offset::Offset(receipt.offset + 1),
        )?;
        self.consumer.store_offsets(&tpl)?;
        Ok(())
    }

    async fn dead_letter(&self, envelope: &TaskEnvelope) -> Result<(), QueueError> {
        self.publisher
            .send(&dead_letter_topic(&envelope.queue), envelope)
            .await
    }
}
