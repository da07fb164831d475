//! Data model shared across the triage pipeline, case store, and API layer.
//!
//! `TransactionEvent` and its enrichment profiles are the immutable input;
//! `RuleResult` is the transient output of the rule engine; `Case` is the
//! persistent, authoritative record the rest of the system mutates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Clamp a score into the `[0,1]` range expected everywhere probabilities
/// and confidences are stored.
pub fn clamp_unit(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    Trade,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UserProfile {
    pub kyc_verified: bool,
    pub account_age_days: i64,
    pub declared_monthly_income: f64,
    pub country_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DeviceProfile {
    pub device_id: Option<String>,
    pub total_users_count: u32,
    pub is_emulator: bool,
    pub is_vpn: bool,
    pub is_proxy: bool,
    pub is_tor: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IpProfile {
    pub sanctioned_country: bool,
    pub high_risk_country: bool,
    pub is_datacenter: bool,
    pub vpn: bool,
    pub tor: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DocumentProfile {
    pub confidence_score: f64,
    pub is_forged: bool,
    pub is_ai_generated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EventFlags {
    pub velocity_flag: bool,
    pub amount_anomaly: bool,
    pub geo_anomaly: bool,
}

/// A single transaction arriving on the inbound stream, already joined with
/// its enrichment profiles. Immutable once constructed; owned by whichever
/// triage worker is processing it and discarded once the case is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionEvent {
    pub transaction_id: String,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub amount: f64,
    pub currency: String,
    pub transaction_type: TransactionType,
    pub payment_method: String,
    pub payment_provider: String,
    pub ip_address: String,
    pub country_code: String,
    pub device_id: String,
    pub user_profile: UserProfile,
    pub device_profile: DeviceProfile,
    pub ip_profile: IpProfile,
    pub document_profile: DocumentProfile,
    pub flags: EventFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Approve,
    Block,
    Investigate,
}

impl Decision {
    /// APPROVE and BLOCK are definitive; INVESTIGATE is gray-area.
    pub fn is_definitive(self) -> bool {
        matches!(self, Decision::Approve | Decision::Block)
    }
}

/// The transient output of one rule engine evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleResult {
    pub decision: Decision,
    pub confidence: f64,
    pub risk_score: f64,
    pub signals: HashMap<String, Value>,
}

impl RuleResult {
    pub fn is_definitive(&self) -> bool {
        self.decision.is_definitive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaseStatus {
    AutoApproved,
    AutoBlocked,
    UnderInvestigation,
    Escalated,
    Resolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggeredBy {
    RuleEngine,
    MlModel,
    PatternMatch,
    ManualFlag,
}

/// The persistent, authoritative record of one triage outcome.
///
/// `investigation_layers` is a set under string equality with insertion
/// order preserved — use [`Case::add_investigation_layer`] rather than
/// pushing to the `Vec` directly so callers don't reintroduce duplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Case {
    pub case_id: String,
    pub user_id: String,
    pub trigger_transaction_id: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,

    pub status: CaseStatus,

    pub confidence_score: Option<f64>,
    pub fraud_probability: Option<f64>,

    pub triggered_by: TriggeredBy,
    pub investigation_layers: Vec<String>,

    pub detection_signals: HashMap<String, Value>,
    pub transaction_summary: HashMap<String, Value>,
    pub identity_flags: HashMap<String, Value>,
    pub behavioral_flags: HashMap<String, Value>,
    pub network_flags: HashMap<String, Value>,
    pub ai_signals: HashMap<String, Value>,

    pub ai_reasoning: Option<String>,
    pub ai_recommendations: Option<String>,

    pub assigned_to: Option<String>,
    pub human_decision: Option<String>,
    pub resolution_notes: Option<String>,

    pub related_accounts: Vec<String>,
    pub fraud_ring_id: Option<String>,
}

impl Case {
    /// Insert `layer` if not already present, preserving insertion order.
    pub fn add_investigation_layer(&mut self, layer: impl Into<String>) {
        let layer = layer.into();
        if !self.investigation_layers.iter().any(|l| l == &layer) {
            self.investigation_layers.push(layer);
        }
    }

    pub fn union_investigation_layers(&mut self, layers: &[String]) {
        for layer in layers {
            self.add_investigation_layer(layer.clone());
        }
    }
}

/// Frame pushed on the `stats` Push Bus topic, once per second.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsFrame {
    pub total_cases: i64,
    pub auto_approved: i64,
    pub auto_blocked: i64,
    pub manual_cases: i64,
    pub tps: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_definitive_matches_approve_and_block() {
        assert!(Decision::Approve.is_definitive());
        assert!(Decision::Block.is_definitive());
        assert!(!Decision::Investigate.is_definitive());
    }

    #[test]
    fn investigation_layers_dedup_preserving_order() {
        let mut case = sample_case();
        case.add_investigation_layer("RULE_BASED");
        case.add_investigation_layer("ML_MODELS");
        case.add_investigation_layer("RULE_BASED");
        assert_eq!(case.investigation_layers, vec!["RULE_BASED", "ML_MODELS"]);
    }

    #[test]
    fn clamp_unit_bounds_values() {
        assert_eq!(clamp_unit(-0.5), 0.0);
        assert_eq!(clamp_unit(1.5), 1.0);
        assert_eq!(clamp_unit(0.42), 0.42);
    }

    fn sample_case() -> Case {
        let now = Utc::now();
        Case {
            case_id: "CASE-1-0".into(),
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
}
