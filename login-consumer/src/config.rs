use std::str::FromStr;
use std::time::Duration;

use envconfig::Envconfig;

use crate::error::ConfigError;
use crate::retry::RetryPolicy;
use crate::schema::SchemaSource;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "::")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3310")]
    pub port: u16,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(nested = true)]
    pub consumer: ConsumerConfig,

    #[envconfig(default = "user-login-processed")]
    pub output_topic: String,

    #[envconfig(default = "user-login-dlq")]
    pub dlq_topic: String,

    pub schema_registry_url: Option<String>,

    #[envconfig(default = "user-login-value")]
    pub schema_subject: String,

    pub schema_path: Option<String>,

    #[envconfig(default = "100")]
    pub batch_size: usize,

    #[envconfig(default = "1000")]
    pub batch_timeout_ms: EnvMsDuration,

    #[envconfig(default = "10")]
    pub max_poll_failures: u32,

    #[envconfig(default = "5")]
    pub emit_max_attempts: u32,

    // Must outlast KAFKA_MESSAGE_TIMEOUT_MS, so a write is never retried while still queued
    #[envconfig(default = "25000")]
    pub emit_timeout_ms: EnvMsDuration,

    #[envconfig(default = "100")]
    pub emit_backoff_initial_ms: EnvMsDuration,

    #[envconfig(default = "5000")]
    pub emit_backoff_max_ms: EnvMsDuration,

    #[envconfig(default = "true")]
    pub forward_undeclared_fields: bool,
}

#[derive(Envconfig, Clone, Debug)]
pub struct KafkaConfig {
    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32, // Maximum time between producer batches during low traffic

    #[envconfig(default = "400")]
    pub kafka_producer_queue_mib: u32, // Size of the in-memory producer queue in mebibytes

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32, // Time before the producer gives up on a message

    #[envconfig(default = "none")]
    pub kafka_compression_codec: String, // none, gzip, snappy, lz4, zstd

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,
}

#[derive(Envconfig, Clone, Debug)]
pub struct ConsumerConfig {
    #[envconfig(default = "user-login-consumer-group")]
    pub kafka_consumer_group: String,

    #[envconfig(default = "user-login")]
    pub kafka_consumer_topic: String,

    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: String, // earliest, latest
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Rejects settings the loop cannot run with. Called before anything connects.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.emit_max_attempts == 0 {
            return Err(ConfigError::ZeroEmitAttempts);
        }
        if self.batch_timeout_ms.0.is_zero() {
            return Err(ConfigError::ZeroDuration("BATCH_TIMEOUT_MS"));
        }
        if self.emit_timeout_ms.0.is_zero() {
            return Err(ConfigError::ZeroDuration("EMIT_TIMEOUT_MS"));
        }
        let delivery_timeout =
            Duration::from_millis(u64::from(self.kafka.kafka_message_timeout_ms));
        if self.emit_timeout_ms.0 <= delivery_timeout {
            return Err(ConfigError::EmitTimeoutWithinDelivery {
                emit_timeout_ms: self.emit_timeout_ms.0.as_millis(),
                message_timeout_ms: self.kafka.kafka_message_timeout_ms,
            });
        }
        Ok(())
    }

    /// Registry wins over a file; the built-in user-login schema is the fallback.
    pub fn schema_source(&self) -> SchemaSource {
        match (&self.schema_registry_url, &self.schema_path) {
            (Some(url), _) if !url.is_empty() => SchemaSource::Registry {
                url: url.clone(),
                subject: self.schema_subject.clone(),
            },
            (_, Some(path)) if !path.is_empty() => SchemaSource::File(path.clone()),
            _ => SchemaSource::BuiltinUserLogin,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.emit_max_attempts,
            self.emit_backoff_initial_ms.0,
            self.emit_backoff_max_ms.0,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvMsDuration(pub Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(Duration::from_millis(ms)))
    }
}
