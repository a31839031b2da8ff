//! Time-windowed subscription sampling
//!
//! A subscription captures a set of topics for a bounded duration. The first
//! [`Sample`] is a snapshot of every selected topic that has a value; every
//! later sample carries only the topics that changed since the previous one.
//! Changes that land within the coalescing window are merged, latest value
//! per topic wins.
//!
//! Sessions are incremental: [`SubscriptionEngine::open`] returns a
//! [`SamplingSession`] that yields samples through
//! [`SamplingSession::next_sample`] until it completes or the connection
//! goes away. [`SubscriptionEngine::subscribe`] drives a session to the end.
//!
//! ```rust,no_run
//! # async fn run(bridge: &ntbridge::Bridge) -> ntbridge::Result<()> {
//! let topics = vec!["/SmartDashboard/".to_string()];
//! let result = bridge.subscribe(&topics, 2.0).await?;
//! for sample in &result.samples {
//!     println!("{:?}: {} topics", sample.offset, sample.values.len());
//! }
//! # Ok(())
//! # }
//! ```

use futures::stream::{BoxStream, StreamExt};
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::{ConnectionManager, ConnectionStatus, TopicChange};
use crate::registry::TopicRegistry;
use crate::stream::{Coalesce, CoalesceExt};
use crate::types::{TimestampedValue, TopicFilter};
use crate::{BridgeError, Result};


/// Why a subscription session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    /// The requested duration elapsed
    Completed,
    /// `disconnect()` or a connection loss truncated the session
    Disconnected,
}

/// One captured snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    /// Time since the session started
    #[serde(rename = "offset_secs", serialize_with = "as_secs")]
    pub offset: Duration,
    pub values: BTreeMap<String, TimestampedValue>,
}

/// Outcome of a finished session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionResult {
    pub samples: Vec<Sample>,
    pub completion: CompletionReason,
    #[serde(rename = "requested_secs", serialize_with = "as_secs")]
    pub requested: Duration,
    #[serde(rename = "elapsed_secs", serialize_with = "as_secs")]
    pub elapsed: Duration,
    /// Topics captured by the initial snapshot
    pub topics: Vec<String>,
}

fn as_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Requested topic selection: exact paths plus patterns.
#[derive(Debug, Clone, Default)]
struct Selection {
    exact: BTreeSet<String>,
    patterns: Vec<TopicFilter>,
}

impl Selection {
    /// Entries of `topics` name exact paths unless they end in `/` or contain
    /// `*`; every entry of `prefixes` is a prefix filter.
    fn parse(topics: &[String], prefixes: &[String]) -> Result<Self> {
        if topics.is_empty() && prefixes.is_empty() {
            return Err(BridgeError::invalid_argument("topics", "at least one topic is required"));
        }

        let mut selection = Self::default();
        let entries = topics.iter().map(|t| (t, false)).chain(prefixes.iter().map(|p| (p, true)));
        for (entry, prefix) in entries {
            let entry = entry.trim();
            if entry.is_empty() {
                return Err(BridgeError::invalid_argument("topics", "topic paths must not be empty"));
            }
            let filter = TopicFilter::new(entry);
            match filter.exact_topic() {
                Some(path) if !prefix => {
                    selection.exact.insert(path.to_string());
                }
                _ => selection.patterns.push(filter),
            }
        }
        Ok(selection)
    }

    fn matches(&self, topic: &str) -> bool {
        self.exact.contains(topic) || self.patterns.iter().any(|p| p.matches(topic))
    }
}

type ChangeStream = Coalesce<BoxStream<'static, (String, TimestampedValue)>>;

/// Opens subscription sessions against the live connection
#[derive(Debug)]
pub struct SubscriptionEngine {
    manager: Arc<ConnectionManager>,
    registry: Arc<TopicRegistry>,
}

impl SubscriptionEngine {
    pub fn new(manager: Arc<ConnectionManager>, registry: Arc<TopicRegistry>) -> Self {
        Self { manager, registry }
    }

    /// Validate a requested duration in seconds
    pub fn validate_duration(&self, duration_secs: f64) -> Result<Duration> {
        let max = self.manager.config().max_subscription_duration;
        if !duration_secs.is_finite() || duration_secs <= 0.0 {
            return Err(BridgeError::invalid_argument(
                "duration",
                format!("must be a positive number of seconds, got {duration_secs}"),
            ));
        }
        let duration = Duration::from_secs_f64(duration_secs);
        if duration > max {
            return Err(BridgeError::invalid_argument(
                "duration",
                format!("{duration_secs}s exceeds the maximum of {}s", max.as_secs_f64()),
            ));
        }
        Ok(duration)
    }

    /// Start a session and take its initial snapshot
    pub async fn open(&self, topics: &[String], duration_secs: f64) -> Result<SamplingSession> {
        self.open_with_prefixes(topics, &[], duration_secs).await
    }

    /// Start a session that also captures every topic under `prefixes`
    pub async fn open_with_prefixes(
        &self,
        topics: &[String],
        prefixes: &[String],
        duration_secs: f64,
    ) -> Result<SamplingSession> {
        let requested = self.validate_duration(duration_secs)?;
        let selection = Arc::new(Selection::parse(topics, prefixes)?);
        self.manager.ensure_connected()?;

        let token = self.manager.lifecycle_token();
        let status = self.manager.subscribe_status();
        let generation = self.manager.generation();

        // Subscribe before the snapshot so no change can fall between the two
        let filter = Arc::clone(&selection);
        let changes = BroadcastStream::new(self.manager.subscribe_events())
            .filter_map(move |item| {
                let change = match item {
                    Ok(event) => match &event.change {
                        TopicChange::ValueChanged { topic, value } if filter.matches(topic) => {
                            Some((topic.clone(), value.clone()))
                        }
                        _ => None,
                    },
                    Err(lagged) => {
                        warn!(error = %lagged, "Subscription fell behind the event channel");
                        None
                    }
                };
                futures::future::ready(change)
            })
            .boxed()
            .coalesce(self.manager.config().coalesce_window);

        let started = Instant::now();
        let mut names = selection.exact.clone();
        for pattern in &selection.patterns {
            names.extend(self.registry.resolve(pattern).await);
        }

        let reads = futures::future::join_all(names.iter().map(|name| self.manager.read(name))).await;
        let mut snapshot = BTreeMap::new();
        for (name, read) in names.into_iter().zip(reads) {
            match read {
                Ok(value) => {
                    snapshot.insert(name, value);
                }
                Err(e) => debug!(topic = %name, error = %e, "Topic left out of initial snapshot"),
            }
        }

        info!(
            topics = snapshot.len(),
            patterns = selection.patterns.len(),
            ?requested,
            "Subscription session opened"
        );

        Ok(SamplingSession {
            started,
            deadline: started + requested,
            requested,
            token,
            status,
            generation,
            changes: Box::pin(changes),
            last_seen: snapshot.iter().map(|(name, v)| (name.clone(), v.last_change)).collect(),
            topics: snapshot.keys().cloned().collect(),
            initial: Some(Sample { offset: started.elapsed(), values: snapshot }),
            samples: Vec::new(),
            outcome: None,
            ended: None,
        })
    }

    /// Capture the selection for the requested duration
    pub async fn subscribe(&self, topics: &[String], duration_secs: f64) -> Result<SubscriptionResult> {
        Ok(self.open(topics, duration_secs).await?.finish().await)
    }

    /// Capture exact topics plus prefix selections for the requested duration
    pub async fn subscribe_with_prefixes(
        &self,
        topics: &[String],
        prefixes: &[String],
        duration_secs: f64,
    ) -> Result<SubscriptionResult> {
        Ok(self.open_with_prefixes(topics, prefixes, duration_secs).await?.finish().await)
    }
}

/// A running subscription session
pub struct SamplingSession {
    started: Instant,
    deadline: Instant,
    requested: Duration,
    token: CancellationToken,
    status: watch::Receiver<ConnectionStatus>,
    generation: u64,
    changes: Pin<Box<ChangeStream>>,
    last_seen: HashMap<String, u64>,
    topics: Vec<String>,
    initial: Option<Sample>,
    samples: Vec<Sample>,
    outcome: Option<CompletionReason>,
    ended: Option<Instant>,
}

impl std::fmt::Debug for SamplingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SamplingSession")
            .field("requested", &self.requested)
            .field("samples", &self.samples.len())
            .field("outcome", &self.outcome)
            .finish_non_exhaustive()
    }
}

impl SamplingSession {
    /// Wait for the next sample
    ///
    /// Returns `None` once the session has ended; [`Self::completion`] then
    /// tells why.
    pub async fn next_sample(&mut self) -> Option<Sample> {
        if let Some(initial) = self.initial.take() {
            return Some(self.record(initial));
        }

        while self.outcome.is_none() {
            let generation = self.generation;
            tokio::select! {
                biased;
                _ = self.token.cancelled() => return self.terminate(CompletionReason::Disconnected),
                _ = async {
                    let _ = self.status.wait_for(|s| !s.state.is_connected() || s.generation != generation).await;
                } => {
                    return self.terminate(CompletionReason::Disconnected);
                }
                _ = tokio::time::sleep_until(self.deadline) => {
                    return self.terminate(CompletionReason::Completed);
                }
                batch = self.changes.next() => match batch {
                    Some(batch) => {
                        if let Some(sample) = self.delta(batch) {
                            return Some(self.record(sample));
                        }
                    }
                    None => return self.terminate(CompletionReason::Disconnected),
                },
            }
        }
        None
    }

    /// Why the session ended, once it has
    pub fn completion(&self) -> Option<CompletionReason> {
        self.outcome
    }

    /// Samples recorded so far
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Drive the session to its end and collect the result
    pub async fn finish(mut self) -> SubscriptionResult {
        while self.next_sample().await.is_some() {}

        let completion = self.outcome.unwrap_or(CompletionReason::Completed);
        let elapsed = self.ended.unwrap_or_else(Instant::now) - self.started;
        info!(samples = self.samples.len(), ?completion, ?elapsed, "Subscription session finished");

        SubscriptionResult {
            samples: self.samples,
            completion,
            requested: self.requested,
            elapsed,
            topics: self.topics,
        }
    }

    fn record(&mut self, sample: Sample) -> Sample {
        self.samples.push(sample.clone());
        sample
    }

    /// Latest value per topic that actually moved since it was last sampled
    fn delta(&mut self, batch: Vec<(String, TimestampedValue)>) -> Option<Sample> {
        let mut values = BTreeMap::new();
        for (topic, value) in batch {
            values.insert(topic, value);
        }
        values.retain(|topic, value| {
            let newer = self.last_seen.get(topic).is_none_or(|seen| value.last_change > *seen);
            if newer {
                self.last_seen.insert(topic.clone(), value.last_change);
            }
            newer
        });

        if values.is_empty() {
            return None;
        }
        Some(Sample { offset: self.started.elapsed(), values })
    }

    /// End the session, emitting whatever was still being coalesced
    fn terminate(&mut self, reason: CompletionReason) -> Option<Sample> {
        let now = Instant::now();
        self.outcome = Some(reason);
        self.ended = Some(now.min(self.deadline));

        if reason == CompletionReason::Disconnected {
            debug!(offset = ?(now - self.started), "Subscription truncated");
        }

        let pending = self.changes.as_mut().flush();
        let sample = self.delta(pending)?;
        Some(self.record(sample))
    }
}
