//! Broker metric counters
//!
//! A fixed set of named signed 64-bit counters. Reads never block writers;
//! writers serialize per counter through atomic adds.

use std::sync::atomic::{AtomicI64, Ordering};

use serde::Serialize;

/// The closed set of counter names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Topics,
    StaticTopics,
    ActiveTopics,
    Subscribers,
    ActiveSubscribers,
    MessageReceived,
    MessageSent,
}

impl Metric {
    /// Every known counter, in reporting order
    pub const ALL: [Metric; 7] = [
        Metric::Topics,
        Metric::StaticTopics,
        Metric::ActiveTopics,
        Metric::Subscribers,
        Metric::ActiveSubscribers,
        Metric::MessageReceived,
        Metric::MessageSent,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Topics => "topics",
            Metric::StaticTopics => "static_topics",
            Metric::ActiveTopics => "active_topics",
            Metric::Subscribers => "subscribers",
            Metric::ActiveSubscribers => "active_subscribers",
            Metric::MessageReceived => "message_received",
            Metric::MessageSent => "message_sent",
        }
    }
}

/// One counter reading, as reported by the metrics endpoint
#[derive(Debug, Serialize)]
pub struct MetricValue {
    pub name: &'static str,
    pub value: i64,
}

/// The counter set; all counters initialize to 0
#[derive(Default)]
pub struct Counters {
    topics: AtomicI64,
    static_topics: AtomicI64,
    active_topics: AtomicI64,
    subscribers: AtomicI64,
    active_subscribers: AtomicI64,
    message_received: AtomicI64,
    message_sent: AtomicI64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically apply a signed delta to one counter.
    pub fn add(&self, metric: Metric, delta: i64) {
        self.cell(metric).fetch_add(delta, Ordering::SeqCst);
    }

    /// Read one counter.
    pub fn get(&self, metric: Metric) -> i64 {
        self.cell(metric).load(Ordering::SeqCst)
    }

    /// Read all counters in reporting order.
    pub fn snapshot(&self) -> Vec<MetricValue> {
        Metric::ALL
            .iter()
            .map(|&m| MetricValue {
                name: m.as_str(),
                value: self.get(m),
            })
            .collect()
    }

    fn cell(&self, metric: Metric) -> &AtomicI64 {
        match metric {
            Metric::Topics => &self.topics,
            Metric::StaticTopics => &self.static_topics,
            Metric::ActiveTopics => &self.active_topics,
            Metric::Subscribers => &self.subscribers,
            Metric::ActiveSubscribers => &self.active_subscribers,
            Metric::MessageReceived => &self.message_received,
            Metric::MessageSent => &self.message_sent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero() {
        let counters = Counters::new();
        for metric in Metric::ALL {
            assert_eq!(counters.get(metric), 0);
        }
    }

    #[test]
    fn test_add_and_get() {
        let counters = Counters::new();
        counters.add(Metric::Topics, 1);
        counters.add(Metric::Topics, 2);
        counters.add(Metric::ActiveTopics, -1);
        assert_eq!(counters.get(Metric::Topics), 3);
        assert_eq!(counters.get(Metric::ActiveTopics), -1);
        assert_eq!(counters.get(Metric::MessageSent), 0);
    }

    #[test]
    fn test_snapshot_covers_all_counters() {
        let counters = Counters::new();
        counters.add(Metric::MessageReceived, 5);
        let snapshot = counters.snapshot();
        assert_eq!(snapshot.len(), Metric::ALL.len());
        let received = snapshot
            .iter()
            .find(|m| m.name == "message_received")
            .unwrap();
        assert_eq!(received.value, 5);
    }

    #[test]
    fn test_metric_names() {
        assert_eq!(Metric::Topics.as_str(), "topics");
        assert_eq!(Metric::StaticTopics.as_str(), "static_topics");
        assert_eq!(Metric::ActiveSubscribers.as_str(), "active_subscribers");
    }
}
