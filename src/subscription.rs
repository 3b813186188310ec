//! Pause/resume bookkeeping for consumed topic-partitions.

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::Mutex;

use crate::error::{Error, Result};

/// A pause or resume instruction: a topic, optionally narrowed to specific
/// partitions. Without partitions the instruction covers the whole topic.
#[derive(Debug, Clone)]
pub struct TopicPartitions {
    pub topic: String,
    pub partitions: Option<Vec<i32>>,
}

/// Paused state of one topic as reported by [`SubscriptionState::paused`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PausedTopic {
    pub topic: String,
    pub partitions: Vec<i32>,
    pub all: bool,
}

#[derive(Debug, Default)]
struct TopicState {
    partitions: BTreeSet<i32>,
    all: bool,
}

/// Tracks paused topics and partitions.
///
/// `is_paused` sits on the consumer's fetch hot path, so state is one flat
/// map behind a mutex that is never held across a suspension point.
///
/// Invariant: when `all` is set for a topic its partition set is empty; a
/// whole-topic pause supersedes any per-partition bookkeeping.
#[derive(Debug, Default)]
pub struct SubscriptionState {
    topics: Mutex<BTreeMap<String, TopicState>>,
}

impl SubscriptionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pause the given topics, or just the named partitions of them.
    pub fn pause(&self, selections: &[TopicPartitions]) {
        let mut topics = self.topics.lock();
        for selection in selections {
            let state = topics.entry(selection.topic.clone()).or_default();
            match &selection.partitions {
                Some(partitions) => {
                    state.partitions.extend(partitions.iter().copied());
                }
                None => {
                    state.all = true;
                    state.partitions.clear();
                }
            }
        }
    }

    /// Resume the given topics, or just the named partitions of them.
    ///
    /// Resuming specific partitions of a topic that was paused as a whole
    /// fails: the originally subscribed partition set is not tracked here,
    /// so a selective resume would be ambiguous.
    pub fn resume(&self, selections: &[TopicPartitions]) -> Result<()> {
        let mut topics = self.topics.lock();
        for selection in selections {
            let state = topics.entry(selection.topic.clone()).or_default();
            match &selection.partitions {
                Some(partitions) => {
                    if state.all {
                        return Err(Error::NonRetriable(format!(
                            "cannot resume partitions of topic \"{}\": the topic was paused \
                             without an explicit partition list",
                            selection.topic
                        )));
                    }
                    for partition in partitions {
                        state.partitions.remove(partition);
                    }
                }
                None => {
                    state.all = false;
                    state.partitions.clear();
                }
            }
        }
        Ok(())
    }

    /// Snapshot of the paused state, ordered by topic.
    pub fn paused(&self) -> Vec<PausedTopic> {
        self.topics
            .lock()
            .iter()
            .map(|(topic, state)| PausedTopic {
                topic: topic.clone(),
                partitions: state.partitions.iter().copied().collect(),
                all: state.all,
            })
            .collect()
    }

    /// Whether fetches for this topic-partition are currently suppressed.
    pub fn is_paused(&self, topic: &str, partition: i32) -> bool {
        let topics = self.topics.lock();
        match topics.get(topic) {
            Some(state) => state.all || state.partitions.contains(&partition),
            None => false,
        }
    }
}
