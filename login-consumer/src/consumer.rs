use std::time::{Duration, Instant};

use health::HealthHandle;
use metrics::{counter, histogram};
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::dlq;
use crate::error::{LoopError, SinkError, SourceError};
use crate::metrics_consts::{
    BATCH_DURATION_MS, BATCH_SIZE, CHECKPOINT_ERRORS, COMMIT_ERRORS, LOOP_FATAL, POLL_ERRORS,
    RECORDS_ACCEPTED, RECORDS_COMMITTED, RECORDS_RECEIVED, RECORDS_REJECTED,
};
use crate::pipeline::Pipeline;
use crate::record::RawRecord;
use crate::retry::RetryPolicy;
use crate::router::{Decision, Rejection};
use crate::sink::{Emitter, OutboundMessage};
use crate::source::RecordSource;

#[derive(Clone, Debug)]
pub struct LoopSettings {
    pub output_topic: String,
    pub dlq_topic: String,
    pub batch_size: usize,
    pub batch_timeout: Duration,
    pub max_poll_failures: u32,
    pub poll_backoff_initial: Duration,
    pub poll_backoff_max: Duration,
}

impl From<&Config> for LoopSettings {
    fn from(config: &Config) -> Self {
        Self {
            output_topic: config.output_topic.clone(),
            dlq_topic: config.dlq_topic.clone(),
            batch_size: config.batch_size,
            batch_timeout: config.batch_timeout_ms.0,
            max_poll_failures: config.max_poll_failures,
            poll_backoff_initial: Duration::from_millis(100),
            poll_backoff_max: Duration::from_secs(5),
        }
    }
}

/// Per-batch tallies, returned by [`ConsumerLoop::run_batch`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub received: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub committed: usize,
    pub commit_errors: usize,
}

impl BatchReport {
    fn add(&mut self, other: &BatchReport) {
        self.received += other.received;
        self.accepted += other.accepted;
        self.rejected += other.rejected;
        self.committed += other.committed;
        self.commit_errors += other.commit_errors;
    }
}

/// Pulls batches from a [`RecordSource`], routes every record to the output
/// or dead-letter topic and commits each record once its write is acknowledged.
///
/// Records are handled one at a time in poll order, so commits within a
/// partition follow offset order. A record that cannot be written after the
/// emitter's retries stops the loop without being committed.
pub struct ConsumerLoop<S: RecordSource> {
    source: S,
    pipeline: Pipeline,
    emitter: Emitter,
    settings: LoopSettings,
    poll_backoff: RetryPolicy,
    poll_failures: u32,
    liveness: HealthHandle,
}

impl<S: RecordSource> ConsumerLoop<S> {
    pub fn new(
        source: S,
        pipeline: Pipeline,
        emitter: Emitter,
        settings: LoopSettings,
        liveness: HealthHandle,
    ) -> Self {
        let poll_backoff = RetryPolicy::new(
            settings.max_poll_failures,
            settings.poll_backoff_initial,
            settings.poll_backoff_max,
        );
        Self {
            source,
            pipeline,
            emitter,
            settings,
            poll_backoff,
            poll_failures: 0,
            liveness,
        }
    }

    /// Runs until `shutdown` flips or a fatal error. A pending poll is dropped
    /// on shutdown, a batch that was already received is always finished.
    /// Offsets are checkpointed and the sink flushed on the way out.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), LoopError> {
        info!(
            output_topic = self.settings.output_topic,
            dlq_topic = self.settings.dlq_topic,
            batch_size = self.settings.batch_size,
            "starting consumer loop"
        );
        let mut totals = BatchReport::default();

        let result = loop {
            if *shutdown.borrow() {
                break Ok(());
            }

            let polled = tokio::select! {
                biased;
                changed = shutdown.changed() => match changed {
                    Ok(()) => break Ok(()),
                    // Nothing can ask for a graceful stop anymore
                    Err(_) => break Err(LoopError::ShutdownChannelClosed),
                },
                polled = self.source.poll(self.settings.batch_size, self.settings.batch_timeout) => polled,
            };

            match self.handle_poll(polled).await {
                Ok(report) => totals.add(&report),
                Err(err) => break Err(err),
            }
        };

        self.finish().await;

        match &result {
            Ok(()) => info!(
                received = totals.received,
                accepted = totals.accepted,
                rejected = totals.rejected,
                committed = totals.committed,
                "consumer loop stopped"
            ),
            Err(err) => {
                counter!(LOOP_FATAL).increment(1);
                error!(error = %err, "consumer loop failed");
            }
        }
        result
    }

    /// Polls once and processes whatever came back.
    pub async fn run_batch(&mut self) -> Result<BatchReport, LoopError> {
        let polled = self
            .source
            .poll(self.settings.batch_size, self.settings.batch_timeout)
            .await;
        self.handle_poll(polled).await
    }

    async fn handle_poll(
        &mut self,
        polled: Result<Vec<RawRecord>, SourceError>,
    ) -> Result<BatchReport, LoopError> {
        match polled {
            Ok(records) => {
                self.poll_failures = 0;
                self.liveness.report_healthy();
                self.process_batch(records).await
            }
            Err(err) => {
                self.poll_failures += 1;
                counter!(POLL_ERRORS).increment(1);
                if !self.poll_backoff.should_retry(self.poll_failures) {
                    return Err(LoopError::SourceExhausted {
                        failures: self.poll_failures,
                        source: err,
                    });
                }
                let backoff = self.poll_backoff.retry_interval(self.poll_failures);
                warn!(
                    error = %err,
                    failures = self.poll_failures,
                    backoff_ms = backoff.as_millis() as u64,
                    "poll failed"
                );
                tokio::time::sleep(backoff).await;
                Ok(BatchReport::default())
            }
        }
    }

    async fn process_batch(&mut self, records: Vec<RawRecord>) -> Result<BatchReport, LoopError> {
        let mut report = BatchReport {
            received: records.len(),
            ..Default::default()
        };
        if records.is_empty() {
            return Ok(report);
        }

        let started = Instant::now();
        counter!(RECORDS_RECEIVED).increment(records.len() as u64);
        histogram!(BATCH_SIZE).record(records.len() as f64);

        for record in &records {
            self.handle_record(record, &mut report).await?;
        }
        self.checkpoint().await;

        histogram!(BATCH_DURATION_MS).record(started.elapsed().as_millis() as f64);
        debug!(
            received = report.received,
            accepted = report.accepted,
            rejected = report.rejected,
            "batch done"
        );
        Ok(report)
    }

    async fn handle_record(
        &mut self,
        raw: &RawRecord,
        report: &mut BatchReport,
    ) -> Result<(), LoopError> {
        let now = OffsetDateTime::now_utc();
        let routed = match self.pipeline.process(raw, now) {
            Decision::Accept(record) => match record.to_json() {
                Ok(payload) => Ok(OutboundMessage::new(raw.key.clone(), payload)),
                Err(err) => Err(Rejection::serialization_failure(&err, raw.payload.clone())),
            },
            Decision::Reject(rejection) => Err(rejection),
        };

        let (topic, message) = match routed {
            Ok(message) => {
                report.accepted += 1;
                counter!(RECORDS_ACCEPTED).increment(1);
                (&self.settings.output_topic, message)
            }
            Err(rejection) => {
                report.rejected += 1;
                counter!(RECORDS_REJECTED, "reason" => rejection.kind.as_str()).increment(1);
                info!(
                    topic = raw.topic,
                    partition = raw.partition,
                    offset = raw.offset,
                    reason = rejection.reason,
                    "routing record to dead-letter topic"
                );
                let envelope = dlq::build(
                    rejection.original_payload,
                    rejection.reason,
                    &raw.position(),
                    now,
                );
                match envelope.to_message(raw.key.clone()) {
                    Ok(message) => (&self.settings.dlq_topic, message),
                    Err(err) => {
                        return Err(LoopError::EmitExhausted {
                            topic: raw.topic.clone(),
                            partition: raw.partition,
                            offset: raw.offset,
                            sink_topic: self.settings.dlq_topic.clone(),
                            attempts: 0,
                            source: SinkError::Serialization(err.to_string()),
                        })
                    }
                }
            }
        };

        if let Err(failure) = self.emitter.emit(topic, &message).await {
            return Err(LoopError::EmitExhausted {
                topic: raw.topic.clone(),
                partition: raw.partition,
                offset: raw.offset,
                sink_topic: topic.clone(),
                attempts: failure.attempts,
                source: failure.error,
            });
        }

        // The write is acknowledged, only now may the offset move past it
        match self.source.commit(&raw.position()).await {
            Ok(()) => {
                report.committed += 1;
                counter!(RECORDS_COMMITTED).increment(1);
            }
            Err(err) => {
                report.commit_errors += 1;
                counter!(COMMIT_ERRORS).increment(1);
                warn!(error = %err, "offset commit failed, record will be redelivered");
            }
        }
        Ok(())
    }

    async fn checkpoint(&mut self) {
        if let Err(err) = self.source.checkpoint().await {
            counter!(CHECKPOINT_ERRORS).increment(1);
            warn!(error = %err, "failed to checkpoint offsets");
        }
    }

    async fn finish(&mut self) {
        self.checkpoint().await;
        if let Err(err) = self.emitter.flush().await {
            warn!(error = %err, "failed to flush sink on shutdown");
        }
    }
}
