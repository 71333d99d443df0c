//! In-memory source and sink for driving the consumer loop without a broker.
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{SinkError, SourceError};
use crate::record::{RawRecord, RecordPosition};
use crate::sink::{OutboundMessage, RecordSink};
use crate::source::RecordSource;

type PartitionKey = (String, i32);

#[derive(Default)]
struct LogState {
    partitions: BTreeMap<PartitionKey, Vec<RawRecord>>,
    /// Next offset to read per partition, as of the last checkpoint
    committed: HashMap<PartitionKey, i64>,
    commit_history: Vec<RecordPosition>,
    checkpoints: usize,
}

/// A partitioned topic log shared between successive consumers, like a broker
/// outliving consumer restarts.
#[derive(Clone, Default)]
pub struct MemoryLog {
    state: Arc<Mutex<LogState>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().expect("memory log lock poisoned")
    }

    /// Appends a record and returns its offset.
    pub fn append(&self, topic: &str, partition: i32, payload: impl Into<Bytes>) -> i64 {
        self.append_record(topic, partition, None, payload.into())
    }

    pub fn append_keyed(
        &self,
        topic: &str,
        partition: i32,
        key: impl Into<Bytes>,
        payload: impl Into<Bytes>,
    ) -> i64 {
        self.append_record(topic, partition, Some(key.into()), payload.into())
    }

    fn append_record(
        &self,
        topic: &str,
        partition: i32,
        key: Option<Bytes>,
        payload: Bytes,
    ) -> i64 {
        let mut state = self.state();
        let records = state
            .partitions
            .entry((topic.to_owned(), partition))
            .or_default();
        let offset = records.len() as i64;
        records.push(RawRecord {
            topic: topic.to_owned(),
            partition,
            offset,
            timestamp_ms: None,
            key,
            payload,
        });
        offset
    }

    /// Next offset a restarted consumer would read, if anything was checkpointed.
    pub fn committed(&self, topic: &str, partition: i32) -> Option<i64> {
        self.state()
            .committed
            .get(&(topic.to_owned(), partition))
            .copied()
    }

    /// Every successful `commit`, in call order.
    pub fn commit_history(&self) -> Vec<RecordPosition> {
        self.state().commit_history.clone()
    }

    pub fn checkpoints(&self) -> usize {
        self.state().checkpoints
    }

    /// A fresh consumer resuming from the checkpointed offsets.
    pub fn source(&self) -> MemorySource {
        let cursors = self.state().committed.clone();
        MemorySource {
            log: self.clone(),
            cursors,
            stored: HashMap::new(),
            fail_commits: false,
            failing_polls: 0,
        }
    }
}

pub struct MemorySource {
    log: MemoryLog,
    cursors: HashMap<PartitionKey, i64>,
    stored: HashMap<PartitionKey, i64>,
    fail_commits: bool,
    failing_polls: u32,
}

impl MemorySource {
    /// Every commit fails, as if the consumer lost its group membership.
    pub fn fail_commits(&mut self, fail: bool) {
        self.fail_commits = fail;
    }

    /// The next `count` polls fail.
    pub fn fail_polls(&mut self, count: u32) {
        self.failing_polls = count;
    }
}

#[async_trait]
impl RecordSource for MemorySource {
    async fn poll(
        &mut self,
        max_batch: usize,
        timeout: Duration,
    ) -> Result<Vec<RawRecord>, SourceError> {
        if self.failing_polls > 0 {
            self.failing_polls -= 1;
            return Err(SourceError::Unavailable("broker unreachable".to_string()));
        }

        let mut batch = Vec::new();
        {
            let state = self.log.state();
            for (key, records) in &state.partitions {
                let cursor = self.cursors.entry(key.clone()).or_insert(0);
                while batch.len() < max_batch {
                    match records.get(*cursor as usize) {
                        Some(record) => {
                            batch.push(record.clone());
                            *cursor += 1;
                        }
                        None => break,
                    }
                }
            }
        }

        if batch.is_empty() {
            tokio::time::sleep(timeout).await;
        }
        Ok(batch)
    }

    async fn commit(&mut self, position: &RecordPosition) -> Result<(), SourceError> {
        if self.fail_commits {
            return Err(SourceError::Commit {
                topic: position.topic.clone(),
                partition: position.partition,
                offset: position.offset,
                reason: "commit rejected".to_string(),
            });
        }

        self.stored.insert(
            (position.topic.clone(), position.partition),
            position.offset + 1,
        );
        self.log.state().commit_history.push(position.clone());
        Ok(())
    }

    async fn checkpoint(&mut self) -> Result<(), SourceError> {
        let mut state = self.log.state();
        state.checkpoints += 1;
        for (key, next) in self.stored.drain() {
            state.committed.insert(key, next);
        }
        Ok(())
    }
}

#[derive(Default)]
struct SinkState {
    written: Vec<(String, OutboundMessage)>,
    failures: VecDeque<SinkError>,
    failing_topic: Option<(String, SinkError)>,
    delay: Option<Duration>,
    flushes: usize,
}

/// Records every acknowledged write. Failures can be scripted.
#[derive(Default)]
pub struct MemorySink {
    state: Mutex<SinkState>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SinkState> {
        self.state.lock().expect("memory sink lock poisoned")
    }

    /// The next `count` writes fail with `error`.
    pub fn fail_next(&self, count: usize, error: SinkError) {
        let mut state = self.state();
        for _ in 0..count {
            state.failures.push_back(error.clone());
        }
    }

    /// Every write to `topic` fails with `error` until cleared.
    pub fn fail_topic(&self, topic: &str, error: SinkError) {
        self.state().failing_topic = Some((topic.to_owned(), error));
    }

    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.failures.clear();
        state.failing_topic = None;
    }

    /// Each write takes at least this long.
    pub fn set_delay(&self, delay: Duration) {
        self.state().delay = Some(delay);
    }

    pub fn messages(&self, topic: &str) -> Vec<OutboundMessage> {
        self.state()
            .written
            .iter()
            .filter(|(written_to, _)| written_to == topic)
            .map(|(_, message)| message.clone())
            .collect()
    }

    pub fn written(&self) -> Vec<(String, OutboundMessage)> {
        self.state().written.clone()
    }

    pub fn flushes(&self) -> usize {
        self.state().flushes
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn emit(&self, topic: &str, message: &OutboundMessage) -> Result<(), SinkError> {
        let delay = self.state().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }
        if let Some((failing, error)) = &state.failing_topic {
            if failing == topic {
                return Err(error.clone());
            }
        }
        state.written.push((topic.to_owned(), message.clone()));
        Ok(())
    }

    async fn flush(&self) -> Result<(), SinkError> {
        self.state().flushes += 1;
        Ok(())
    }
}
