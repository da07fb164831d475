//! Triage Pipeline — §4.3.
//!
//! The loop binding Event Source → Rule Engine → Case Store → AI Queue →
//! Push Bus. Owns idempotency, ack ordering, and error recovery. Ticks on a
//! fixed cadence (default ~100ms); each tick pulls one batch, evaluates
//! every record, and acks in order. One bad record never halts the batch
//! (§7): parse failures and store errors are caught per-record.

pub mod ai_queue;
pub mod traffic_meter;

use crate::error::CaseStoreError;
use crate::models::{Case, CaseStatus, Decision, TransactionEvent, TriggeredBy};
use crate::pipeline::ai_queue::AiQueueProducer;
use crate::pipeline::traffic_meter::TrafficMeter;
use crate::push::PushBus;
use crate::rules::{RuleEngine, VelocityTracker};
use crate::stream::StreamAdapter;
use crate::store::CaseStore;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

pub struct TriagePipeline {
    adapter: StreamAdapter,
    transactions_stream: String,
    consumer_group: String,
    consumer_name: String,
    batch_size: usize,
    poison_retry_limit: u32,

    rule_engine: RuleEngine,
    velocity: VelocityTracker,
    case_store: Arc<CaseStore>,
    ai_queue: AiQueueProducer,
    push_bus: PushBus,
    traffic_meter: Arc<TrafficMeter>,

    case_seq: AtomicU64,
}

impl TriagePipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        adapter: StreamAdapter,
        transactions_stream: String,
        consumer_group: String,
        consumer_name: String,
        batch_size: usize,
        poison_retry_limit: u32,
        case_store: Arc<CaseStore>,
        ai_queue: AiQueueProducer,
        push_bus: PushBus,
        traffic_meter: Arc<TrafficMeter>,
    ) -> Self {
        Self {
            adapter,
            transactions_stream,
            consumer_group,
            consumer_name,
            batch_size,
            poison_retry_limit,
            rule_engine: RuleEngine::new(),
            velocity: VelocityTracker::new(),
            case_store,
            ai_queue,
            push_bus,
            traffic_meter,
            case_seq: AtomicU64::new(0),
        }
    }

    /// Run forever on `tick_interval`, until `shutdown` resolves. Finishes
    /// the in-flight batch before returning, per §5.
    pub async fn run(self, tick_interval: Duration, mut shutdown: tokio::sync::oneshot::Receiver<()>) {
        let mut ticker = tokio::time::interval(tick_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "triage tick failed");
                    }
                }
                _ = &mut shutdown => {
                    info!("triage pipeline shutting down");
                    break;
                }
            }
        }
    }

    async fn tick(&self) -> Result<(), crate::error::StreamError> {
        // Reclaim pending-but-unacked records first so a poison record's
        // delivery count actually advances tick over tick (§4.1/§7); then
        // pull whatever is new. `read_batch`'s `>` id only ever returns
        // never-delivered records, so without this pass an unacked record
        // would sit in the PEL forever.
        let mut records = self
            .adapter
            .claim_pending(
                &self.transactions_stream,
                &self.consumer_group,
                &self.consumer_name,
                self.batch_size,
                0,
            )
            .await?;

        let new_records = self
            .adapter
            .read_batch(
                &self.transactions_stream,
                &self.consumer_group,
                &self.consumer_name,
                self.batch_size,
                200,
            )
            .await?;
        records.extend(new_records);

        if records.is_empty() {
            return Ok(());
        }

        self.traffic_meter.add(records.len() as i64);

        for record in records {
            let record_id = record.record_id.clone();
            match record.event_data {
                None => self.handle_poison(&record_id, "missing event_data").await,
                Some(raw) => match serde_json::from_str::<TransactionEvent>(&raw) {
                    Ok(event) => self.process_event(&record_id, event).await,
                    Err(e) => self.handle_poison(&record_id, &e.to_string()).await,
                },
            }
        }

        Ok(())
    }

    /// A record whose `event_data` is missing or unparseable. Per §7: do
    /// not ack on first occurrence; once delivery count exceeds
    /// `poison_retry_limit`, ack and write a synthetic
    /// `UNDER_INVESTIGATION` case carrying `poison=true`.
    async fn handle_poison(&self, record_id: &str, reason: &str) {
        error!(record_id, reason, "poison record");

        let delivery_count = self
            .adapter
            .delivery_count(&self.transactions_stream, &self.consumer_group, record_id)
            .await
            .unwrap_or(1);

        if delivery_count <= self.poison_retry_limit as u64 {
            warn!(record_id, delivery_count, "poison record left unacked for redelivery");
            return;
        }

        let mut signals = HashMap::new();
        signals.insert("poison".to_string(), json!(true));
        signals.insert("reason".to_string(), json!(reason));

        let now = Utc::now();
        let case = Case {
            case_id: self.next_case_id(),
            user_id: "unknown".into(),
            trigger_transaction_id: format!("poison-{}", record_id),
            created_at: now,
            updated_at: now,
            resolved_at: None,
            status: CaseStatus::UnderInvestigation,
            confidence_score: None,
            fraud_probability: None,
            triggered_by: TriggeredBy::RuleEngine,
            investigation_layers: vec!["RULE_BASED".into()],
            detection_signals: signals,
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
        };

        match self.case_store.create(case) {
            Ok(case) => {
                self.push_bus.publish_case(&case);
            }
            Err(CaseStoreError::DuplicateTrigger(_)) => {}
            Err(e) => error!(record_id, error = %e, "failed to persist poison case"),
        }

        if let Err(e) = self
            .adapter
            .ack(&self.transactions_stream, &self.consumer_group, record_id)
            .await
        {
            error!(record_id, error = %e, "failed to ack poison record after synthetic case");
        }
    }

    async fn process_event(&self, record_id: &str, event: TransactionEvent) {
        let history = self.velocity.recent_for(&event.user_id, event.timestamp);
        let result = self.rule_engine.evaluate(&event, &history);
        self.velocity
            .record(&event.user_id, event.transaction_type, event.timestamp);

        match self.persist_case(&event, &result).await {
            Ok(_case) => {}
            Err(e) => {
                error!(record_id, transaction_id = %event.transaction_id, error = %e, "case store unavailable, leaving unacked");
                return;
            }
        };

        if let Err(e) = self
            .adapter
            .ack(&self.transactions_stream, &self.consumer_group, record_id)
            .await
        {
            error!(record_id, error = %e, "ack failed after successful persist");
        }
    }

    /// Persist a new case for `event`, or — on `DuplicateTrigger` — fetch
    /// and return the existing one without re-enqueueing, per the §4.3
    /// idempotency rule.
    async fn persist_case(
        &self,
        event: &TransactionEvent,
        result: &crate::models::RuleResult,
    ) -> Result<Case, CaseStoreError> {
        let now = Utc::now();
        let is_gray = !result.decision.is_definitive();

        let status = match result.decision {
            Decision::Approve => CaseStatus::AutoApproved,
            Decision::Block => CaseStatus::AutoBlocked,
            Decision::Investigate => CaseStatus::UnderInvestigation,
        };

        let fraud_probability = if is_gray {
            result.risk_score
        } else {
            result.confidence
        };

        let case = Case {
            case_id: self.next_case_id(),
            user_id: event.user_id.clone(),
            trigger_transaction_id: event.transaction_id.clone(),
            created_at: now,
            updated_at: now,
            resolved_at: None,
            status,
            confidence_score: Some(result.confidence),
            fraud_probability: Some(fraud_probability.clamp(0.0, 1.0)),
            triggered_by: TriggeredBy::RuleEngine,
            investigation_layers: vec!["RULE_BASED".into()],
            detection_signals: result.signals.clone(),
            transaction_summary: transaction_summary(event),
            identity_flags: identity_flags(event),
            behavioral_flags: behavioral_flags(event),
            network_flags: network_flags(event),
            ai_signals: HashMap::new(),
            ai_reasoning: None,
            ai_recommendations: None,
            assigned_to: None,
            human_decision: None,
            resolution_notes: None,
            related_accounts: vec![],
            fraud_ring_id: None,
        };

        let case = match self.case_store.create(case) {
            Ok(case) => {
                self.push_bus.publish_case(&case);
                case
            }
            Err(CaseStoreError::DuplicateTrigger(existing_case_id)) => {
                info!(
                    transaction_id = %event.transaction_id,
                    case_id = %existing_case_id,
                    "duplicate trigger, treating redelivery as success"
                );
                return self
                    .case_store
                    .get_by_case_id(&existing_case_id)?
                    .ok_or(CaseStoreError::CaseNotFound(existing_case_id));
            }
            Err(e) => return Err(e),
        };

        if is_gray {
            self.ai_queue
                .enqueue(&case.case_id, &case.user_id, event)
                .await;
        }

        Ok(case)
    }

    /// `CASE-<monotonic-millis>-<seq>` per §4.3. `seq` is a per-worker
    /// atomic counter, sufficient to disambiguate records landing in the
    /// same millisecond within this consumer.
    fn next_case_id(&self) -> String {
        let millis = Utc::now().timestamp_millis();
        let seq = self.case_seq.fetch_add(1, Ordering::Relaxed);
        format!("CASE-{}-{}", millis, seq)
    }
}

fn transaction_summary(event: &TransactionEvent) -> HashMap<String, Value> {
    let mut m = HashMap::new();
    m.insert("amount".into(), json!(event.amount));
    m.insert("currency".into(), json!(event.currency));
    m.insert("transaction_type".into(), json!(event.transaction_type));
    m.insert("payment_method".into(), json!(event.payment_method));
    m.insert("payment_provider".into(), json!(event.payment_provider));
    m
}

fn identity_flags(event: &TransactionEvent) -> HashMap<String, Value> {
    let mut m = HashMap::new();
    m.insert("kyc_verified".into(), json!(event.user_profile.kyc_verified));
    m.insert(
        "account_age_days".into(),
        json!(event.user_profile.account_age_days),
    );
    m.insert(
        "document_confidence_score".into(),
        json!(event.document_profile.confidence_score),
    );
    m.insert("document_is_forged".into(), json!(event.document_profile.is_forged));
    m
}

fn behavioral_flags(event: &TransactionEvent) -> HashMap<String, Value> {
    let mut m = HashMap::new();
    m.insert("velocity_flag".into(), json!(event.flags.velocity_flag));
    m.insert("amount_anomaly".into(), json!(event.flags.amount_anomaly));
    m.insert("geo_anomaly".into(), json!(event.flags.geo_anomaly));
    m
}

fn network_flags(event: &TransactionEvent) -> HashMap<String, Value> {
    let mut m = HashMap::new();
    m.insert("ip_address".into(), json!(event.ip_address));
    m.insert("country_code".into(), json!(event.country_code));
    m.insert("device_id".into(), json!(event.device_id));
    m.insert(
        "device_shared_users".into(),
        json!(event.device_profile.total_users_count),
    );
    m.insert("vpn".into(), json!(event.ip_profile.vpn));
    m.insert("sanctioned_country".into(), json!(event.ip_profile.sanctioned_country));
    m
}
