//! End-to-end triage scenarios exercised against the Rule Engine and Case
//! Store directly (no live Redis): these two components, wired together,
//! are exactly what the Triage Pipeline does on each record.

use fraud_triage::models::{
    Case, CaseStatus, Decision, DeviceProfile, DocumentProfile, EventFlags, IpProfile,
    TransactionEvent, TransactionType, TriggeredBy, UserProfile,
};
use fraud_triage::rules::RuleEngine;
use fraud_triage::store::{AiUpdatePayload, CaseStore};
use chrono::Utc;
use std::collections::HashMap;

fn base_event(transaction_id: &str) -> TransactionEvent {
    TransactionEvent {
        transaction_id: transaction_id.into(),
        user_id: "user-42".into(),
        timestamp: Utc::now(),
        amount: 100.0,
        currency: "USD".into(),
        transaction_type: TransactionType::Deposit,
        payment_method: "card".into(),
        payment_provider: "visa".into(),
        ip_address: "1.2.3.4".into(),
        country_code: "US".into(),
        device_id: "device-1".into(),
        user_profile: UserProfile {
            declared_monthly_income: 5000.0,
            ..Default::default()
        },
        device_profile: DeviceProfile::default(),
        ip_profile: IpProfile::default(),
        document_profile: DocumentProfile {
            confidence_score: 0.95,
            ..Default::default()
        },
        flags: EventFlags::default(),
    }
}

fn case_from(event: &TransactionEvent, case_id: &str, status: CaseStatus, fraud_probability: f64) -> Case {
    let now = Utc::now();
    Case {
        case_id: case_id.into(),
        user_id: event.user_id.clone(),
        trigger_transaction_id: event.transaction_id.clone(),
        created_at: now,
        updated_at: now,
        resolved_at: None,
        status,
        confidence_score: Some(0.5),
        fraud_probability: Some(fraud_probability),
        triggered_by: TriggeredBy::RuleEngine,
        investigation_layers: vec!["RULE_BASED".into()],
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

fn temp_store() -> (CaseStore, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cases.db");
    (CaseStore::new(path.to_str().unwrap()).unwrap(), dir)
}

#[test]
fn scenario_sanctioned_country_blocks() {
    let engine = RuleEngine::new();
    let mut event = base_event("tx-1");
    event.ip_profile.sanctioned_country = true;
    event.amount = 50.0;

    let result = engine.evaluate(&event, &[]);
    assert_eq!(result.decision, Decision::Block);
    assert_eq!(result.confidence, 1.00);
    assert!(result.signals.contains_key("sanctions_match"));

    let (store, _dir) = temp_store();
    let case = case_from(&event, "CASE-1", CaseStatus::AutoBlocked, result.confidence);
    let created = store.create(case).unwrap();
    assert_eq!(created.fraud_probability, Some(1.00));
}

#[test]
fn scenario_income_mismatch_blocks() {
    let engine = RuleEngine::new();
    let mut event = base_event("tx-2");
    event.user_profile.declared_monthly_income = 1000.0;
    event.amount = 20000.0;

    let result = engine.evaluate(&event, &[]);
    assert_eq!(result.decision, Decision::Block);
    assert_eq!(result.confidence, 0.98);
    assert!(result.signals.contains_key("income_mismatch"));
}

#[test]
fn scenario_clean_transaction_approves() {
    let engine = RuleEngine::new();
    let event = base_event("tx-3");

    let result = engine.evaluate(&event, &[]);
    assert_eq!(result.decision, Decision::Approve);
    assert_eq!(result.confidence, 0.95);
}

#[test]
fn scenario_gray_area_escalates_then_ai_flips_to_block() {
    let engine = RuleEngine::new();
    let mut event = base_event("tx-4");
    event.ip_profile.vpn = true;
    event.ip_profile.high_risk_country = true;
    event.device_profile.total_users_count = 8;

    let result = engine.evaluate(&event, &[]);
    assert_eq!(result.decision, Decision::Investigate);
    assert!((result.risk_score - 0.40).abs() < 1e-9);

    let (store, _dir) = temp_store();
    let case = case_from(&event, "CASE-4", CaseStatus::UnderInvestigation, result.risk_score);
    let created = store.create(case).unwrap();
    assert_eq!(created.fraud_probability, Some(0.40));

    let update = AiUpdatePayload {
        decision: Some("AUTO_BLOCKED".into()),
        confidence_score: Some(0.92),
        investigation_layers: vec!["ML_MODELS".into(), "LLM_REASONING".into()],
        ..Default::default()
    };
    let updated = store.apply_ai_update(&created.case_id, update).unwrap();
    assert_eq!(updated.status, CaseStatus::AutoBlocked);
    assert_eq!(
        updated.investigation_layers,
        vec!["RULE_BASED", "ML_MODELS", "LLM_REASONING"]
    );
}

#[test]
fn scenario_human_resolution_closes_case() {
    let event = base_event("tx-6");
    let (store, _dir) = temp_store();
    let case = case_from(&event, "CASE-6", CaseStatus::UnderInvestigation, 0.4);
    store.create(case).unwrap();

    let resolved = store
        .resolve("CASE-6", "APPROVED".into(), Some("legit traveler".into()))
        .unwrap();
    assert_eq!(resolved.status, CaseStatus::Resolved);
    assert!(resolved.resolved_at.is_some());
    assert_eq!(resolved.human_decision, Some("APPROVED".into()));
}

#[test]
fn duplicate_trigger_is_idempotent_and_returns_existing_case() {
    let event = base_event("tx-dup");
    let (store, _dir) = temp_store();
    let first = case_from(&event, "CASE-dup-1", CaseStatus::AutoApproved, 0.95);
    store.create(first.clone()).unwrap();

    let mut retry = case_from(&event, "CASE-dup-2", CaseStatus::AutoApproved, 0.95);
    retry.trigger_transaction_id = first.trigger_transaction_id.clone();
    let err = store.create(retry).unwrap_err();
    match err {
        fraud_triage::error::CaseStoreError::DuplicateTrigger(existing) => {
            assert_eq!(existing, first.case_id);
        }
        other => panic!("expected DuplicateTrigger, got {other:?}"),
    }
}
