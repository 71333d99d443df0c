use std::time::Duration;

use health::HealthHandle;
use metrics::{counter, gauge};
use rdkafka::consumer::{Consumer, ConsumerContext, StreamConsumer};
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::producer::{FutureProducer, Producer};
use rdkafka::{ClientConfig, ClientContext, Statistics, TopicPartitionList};
use tracing::{debug, error, info, warn};

use crate::config::{ConsumerConfig, KafkaConfig};
use crate::metrics_consts::{
    KAFKA_BROKER_RX_ERRORS, KAFKA_BROKER_TX_ERRORS, KAFKA_CALLBACK_QUEUE_DEPTH,
    KAFKA_CONSUMER_LAG, KAFKA_PRODUCER_QUEUE_DEPTH, KAFKA_PRODUCER_QUEUE_DEPTH_LIMIT,
};

/// Shared by the producer and the consumer. librdkafka only calls `stats`
/// while its main loop is alive, which makes it a liveness signal.
pub struct KafkaContext {
    liveness: HealthHandle,
    client: &'static str,
}

impl KafkaContext {
    pub fn new(liveness: HealthHandle, client: &'static str) -> Self {
        Self { liveness, client }
    }
}

impl ClientContext for KafkaContext {
    fn stats(&self, stats: Statistics) {
        self.liveness.report_healthy();

        gauge!(KAFKA_CALLBACK_QUEUE_DEPTH, "client" => self.client).set(stats.replyq as f64);
        if self.client == "producer" {
            gauge!(KAFKA_PRODUCER_QUEUE_DEPTH).set(stats.msg_cnt as f64);
            gauge!(KAFKA_PRODUCER_QUEUE_DEPTH_LIMIT).set(stats.msg_max as f64);
        }

        if self.client == "consumer" {
            for (topic, topic_stats) in stats.topics {
                for (partition, partition_stats) in topic_stats.partitions {
                    // -1 is librdkafka's internal unassigned partition
                    if partition < 0 || partition_stats.consumer_lag < 0 {
                        continue;
                    }
                    gauge!(
                        KAFKA_CONSUMER_LAG,
                        "topic" => topic.clone(),
                        "partition" => partition.to_string()
                    )
                    .set(partition_stats.consumer_lag as f64);
                }
            }
        }

        for (_, broker) in stats.brokers {
            let id = broker.nodeid.to_string();
            counter!(KAFKA_BROKER_TX_ERRORS, "client" => self.client, "broker" => id.clone())
                .absolute(broker.txerrs);
            counter!(KAFKA_BROKER_RX_ERRORS, "client" => self.client, "broker" => id)
                .absolute(broker.rxerrs);
        }
    }
}

impl ConsumerContext for KafkaContext {
    fn commit_callback(&self, result: KafkaResult<()>, offsets: &TopicPartitionList) {
        match result {
            Ok(()) => debug!(partitions = offsets.count(), "offsets committed to broker"),
            Err(err) => warn!(error = %err, "offset commit to broker failed"),
        }
    }
}

fn base_client_config(config: &KafkaConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.kafka_hosts)
        .set("statistics.interval.ms", "10000");

    if config.kafka_tls {
        client_config
            .set("security.protocol", "ssl")
            .set("enable.ssl.certificate.verification", "false");
    };
    client_config
}

pub fn create_producer(
    config: &KafkaConfig,
    liveness: HealthHandle,
) -> Result<FutureProducer<KafkaContext>, KafkaError> {
    let mut client_config = base_client_config(config);
    client_config
        .set("linger.ms", config.kafka_producer_linger_ms.to_string())
        .set(
            "message.timeout.ms",
            config.kafka_message_timeout_ms.to_string(),
        )
        .set("compression.codec", &config.kafka_compression_codec)
        .set(
            "queue.buffering.max.kbytes",
            (config.kafka_producer_queue_mib * 1024).to_string(),
        );

    debug!("rdkafka producer configuration: {:?}", client_config);
    let producer: FutureProducer<KafkaContext> =
        client_config.create_with_context(KafkaContext::new(liveness, "producer"))?;

    // "Ping" the brokers by requesting metadata
    match producer
        .client()
        .fetch_metadata(None, Duration::from_secs(15))
    {
        Ok(metadata) => {
            info!(
                topics = metadata.topics().len(),
                "producer connected to Kafka brokers"
            );
        }
        Err(error) => {
            error!(error = %error, "failed to fetch metadata from Kafka brokers");
            return Err(error);
        }
    }

    Ok(producer)
}

/// Offsets are only ever stored explicitly, after the record they belong to
/// has been placed on its sink, and committed at batch boundaries.
pub fn create_consumer(
    config: &KafkaConfig,
    consumer_config: &ConsumerConfig,
    liveness: HealthHandle,
) -> Result<StreamConsumer<KafkaContext>, KafkaError> {
    let mut client_config = base_client_config(config);
    client_config
        .set("group.id", &consumer_config.kafka_consumer_group)
        .set(
            "auto.offset.reset",
            &consumer_config.kafka_consumer_offset_reset,
        )
        .set("enable.auto.commit", "false")
        .set("enable.auto.offset.store", "false");

    debug!("rdkafka consumer configuration: {:?}", client_config);
    let consumer: StreamConsumer<KafkaContext> =
        client_config.create_with_context(KafkaContext::new(liveness, "consumer"))?;
    consumer.subscribe(&[consumer_config.kafka_consumer_topic.as_str()])?;

    info!(
        topic = consumer_config.kafka_consumer_topic,
        group_id = consumer_config.kafka_consumer_group,
        "Kafka consumer subscribed"
    );
    Ok(consumer)
}
