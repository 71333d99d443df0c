use std::sync::Arc;
use std::time::Duration;

use health::HealthRegistry;
use login_consumer::consumer::{ConsumerLoop, LoopSettings};
use login_consumer::pipeline::Pipeline;
use login_consumer::retry::RetryPolicy;
use login_consumer::schema::Schema;
use login_consumer::sink::Emitter;
use login_consumer::test_utils::{MemorySink, MemorySource};
use serde_json::json;

pub const INPUT_TOPIC: &str = "user-login";
pub const OUTPUT_TOPIC: &str = "user-login-processed";
pub const DLQ_TOPIC: &str = "user-login-dlq";

#[allow(dead_code)]
pub fn settings() -> LoopSettings {
    LoopSettings {
        output_topic: OUTPUT_TOPIC.to_string(),
        dlq_topic: DLQ_TOPIC.to_string(),
        batch_size: 10,
        batch_timeout: Duration::from_millis(20),
        max_poll_failures: 3,
        poll_backoff_initial: Duration::from_millis(1),
        poll_backoff_max: Duration::from_millis(5),
    }
}

#[allow(dead_code)]
pub fn consumer_loop(source: MemorySource, sink: Arc<MemorySink>) -> ConsumerLoop<MemorySource> {
    consumer_loop_with(source, sink, settings())
}

#[allow(dead_code)]
pub fn consumer_loop_with(
    source: MemorySource,
    sink: Arc<MemorySink>,
    settings: LoopSettings,
) -> ConsumerLoop<MemorySource> {
    let registry = HealthRegistry::new("liveness");
    let liveness = registry.register("consumer_loop", Duration::from_secs(30));
    let emitter = Emitter::new(
        sink,
        RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5)),
        Duration::from_secs(1),
    );
    ConsumerLoop::new(
        source,
        Pipeline::new(Arc::new(Schema::user_login()), true),
        emitter,
        settings,
        liveness,
    )
}

/// A complete login event, minus the optional `locale`.
#[allow(dead_code)]
pub fn login_event(user_id: &str) -> serde_json::Value {
    json!({
        "user_id": user_id,
        "app_version": "1.0.0",
        "ip": "162.255.195.202",
        "device_id": "0bcbfec0-02c4-496c-99ac-35d0cc750f6b",
        "timestamp": 1742331926,
        "device_type": "android",
    })
}

#[allow(dead_code)]
pub fn payload(event: &serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(event).expect("failed to serialize event")
}
