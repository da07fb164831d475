//! Push Bus — §4.7.
//!
//! Topic-based fan-out to dashboard sessions over `tokio::sync::broadcast`.
//! Delivery is best-effort and at-most-once: a slow subscriber that falls
//! behind the channel's bounded capacity silently misses frames rather than
//! backpressuring the publisher, which is why every consumer-facing GET in
//! `api` exists for reconciliation on (re)connect.

use crate::models::{Case, StatsFrame};
use tokio::sync::broadcast;
use tracing::warn;

const CHANNEL_CAPACITY: usize = 1024;

/// The wire frame sent down `/ws-fraud`, tagging the payload with the
/// topic path a dashboard subscriber filters on.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "topic", content = "payload")]
pub enum PushFrame {
    #[serde(rename = "/topic/queue")]
    CaseEvents(Case),
    #[serde(rename = "/topic/stats")]
    Stats(StatsFrame),
}

/// Owns the two broadcast channels described in §4.7. Cloning is cheap —
/// every clone shares the same underlying senders.
#[derive(Clone)]
pub struct PushBus {
    case_events: broadcast::Sender<Case>,
    stats: broadcast::Sender<StatsFrame>,
}

impl PushBus {
    pub fn new() -> Self {
        let (case_events, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (stats, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { case_events, stats }
    }

    /// Publish the full current case to the `case-events` topic. Failure
    /// (no subscribers, or a lagging one) is logged and swallowed — a
    /// `PushFailure` never blocks the triage pipeline (§7).
    pub fn publish_case(&self, case: &Case) {
        if let Err(e) = self.case_events.send(case.clone()) {
            warn!(case_id = %case.case_id, error = %e, "push bus case-events publish dropped");
        }
    }

    pub fn publish_stats(&self, frame: StatsFrame) {
        if let Err(e) = self.stats.send(frame) {
            warn!(error = %e, "push bus stats publish dropped");
        }
    }

    pub fn subscribe_case_events(&self) -> broadcast::Receiver<Case> {
        self.case_events.subscribe()
    }

    pub fn subscribe_stats(&self) -> broadcast::Receiver<StatsFrame> {
        self.stats.subscribe()
    }
}

impl Default for PushBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CaseStatus, TriggeredBy};
    use chrono::Utc;
    use std::collections::HashMap;

    fn sample_case() -> Case {
        let now = Utc::now();
        Case {
            case_id: "CASE-1".into(),
            user_id: "u1".into(),
            trigger_transaction_id: "t1".into(),
            created_at: now,
            updated_at: now,
            resolved_at: None,
            status: CaseStatus::UnderInvestigation,
            confidence_score: None,
            fraud_probability: Some(0.4),
            triggered_by: TriggeredBy::RuleEngine,
            investigation_layers: vec![],
            detection_signals: HashMap::new(),
            transaction_summary: HashMap::new(),
            identity_flags: HashMap::new(),
            behavioral_flags: HashMap::new(),
            network_flags: HashMap::new(),
            ai_signals: HashMap::new(),
            ai_reasoning: None,
            ai_recommendations: None,
            assigned_to: None,
            human_decision: None,
            resolution_notes: None,
            related_accounts: vec![],
            fraud_ring_id: None,
        }
    }

    #[tokio::test]
    async fn subscriber_receives_published_case() {
        let bus = PushBus::new();
        let mut rx = bus.subscribe_case_events();
        bus.publish_case(&sample_case());
        let received = rx.recv().await.unwrap();
        assert_eq!(received.case_id, "CASE-1");
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let bus = PushBus::new();
        bus.publish_case(&sample_case());
    }
}
