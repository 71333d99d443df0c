pub mod config;
pub mod consumer;
pub mod decode;
pub mod dlq;
pub mod error;
pub mod kafka;
pub mod metrics_consts;
pub mod normalize;
pub mod pipeline;
pub mod record;
pub mod retry;
pub mod router;
pub mod schema;
pub mod sink;
pub mod source;
pub mod test_utils;
pub mod validate;
