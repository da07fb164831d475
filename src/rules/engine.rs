//! Two-phase Rule Engine — §4.2.
//!
//! Phase A is a short-circuiting list of definitive rules; the first match
//! wins and later rules are not evaluated. Phase B only runs if Phase A
//! matched nothing, and accumulates an additive risk score that is then
//! thresholded into a decision. Pure given its inputs: the same event plus
//! the same velocity history always produces the same `RuleResult`.

use crate::models::{Decision, RuleResult, TransactionEvent, UserProfile};
use crate::rules::velocity::{is_rapid_churn, TxnPoint, CHURN_WINDOW};
use serde_json::json;
use std::collections::HashMap;

pub struct RuleEngine;

impl RuleEngine {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate `event`. `recent_user_txns` is the caller's snapshot of the
    /// user's transactions within [`CHURN_WINDOW`] of `event.timestamp`,
    /// used solely for the rapid-churn predicate.
    pub fn evaluate(&self, event: &TransactionEvent, recent_user_txns: &[TxnPoint]) -> RuleResult {
        if let Some(result) = self.phase_a(event) {
            return result;
        }
        self.phase_b(event, recent_user_txns)
    }

    fn phase_a(&self, event: &TransactionEvent) -> Option<RuleResult> {
        if event.ip_profile.sanctioned_country {
            let mut signals = HashMap::new();
            signals.insert("sanctions_match".to_string(), json!(true));
            return Some(RuleResult {
                decision: Decision::Block,
                confidence: 1.00,
                risk_score: 1.00,
                signals,
            });
        }

        if income_mismatch(&event.user_profile, event.amount) {
            let mut signals = HashMap::new();
            signals.insert(
                "income_mismatch".to_string(),
                json!({
                    "amount": event.amount,
                    "declared_monthly_income": event.user_profile.declared_monthly_income,
                }),
            );
            return Some(RuleResult {
                decision: Decision::Block,
                confidence: 0.98,
                risk_score: 0.98,
                signals,
            });
        }

        None
    }

    fn phase_b(&self, event: &TransactionEvent, recent_user_txns: &[TxnPoint]) -> RuleResult {
        let mut risk_score = 0.0;
        let mut signals = HashMap::new();

        if event.ip_profile.vpn && event.ip_profile.high_risk_country {
            risk_score += 0.25;
            signals.insert("vpn_detected".to_string(), json!(true));
        }

        if event.device_profile.total_users_count > 5 {
            risk_score += 0.15;
            signals.insert(
                "multiple_devices".to_string(),
                json!(event.device_profile.total_users_count),
            );
        }

        let current = TxnPoint {
            transaction_type: event.transaction_type,
            timestamp: event.timestamp,
        };
        if is_rapid_churn(current, recent_user_txns) {
            risk_score += 0.30;
            signals.insert("rapid_churn".to_string(), json!(true));
        }

        if event.document_profile.confidence_score < 0.70 {
            risk_score += 0.20;
            signals.insert(
                "document_issues".to_string(),
                json!(event.document_profile.confidence_score),
            );
        }

        risk_score = risk_score.clamp(0.0, 1.0);

        let (decision, confidence) = if risk_score < 0.15 {
            (Decision::Approve, 0.95)
        } else if risk_score > 0.75 {
            (Decision::Block, 0.96)
        } else {
            (Decision::Investigate, 0.50)
        };

        RuleResult {
            decision,
            confidence,
            risk_score,
            signals,
        }
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn income_mismatch(profile: &UserProfile, amount: f64) -> bool {
    profile.declared_monthly_income > 0.0 && amount > 15.0 * profile.declared_monthly_income
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeviceProfile, DocumentProfile, EventFlags, IpProfile, TransactionType};
    use chrono::Utc;

    fn base_event() -> TransactionEvent {
        TransactionEvent {
            transaction_id: "t1".into(),
            user_id: "u1".into(),
            timestamp: Utc::now(),
            amount: 100.0,
            currency: "USD".into(),
            transaction_type: TransactionType::Deposit,
            payment_method: "card".into(),
            payment_provider: "visa".into(),
            ip_address: "1.2.3.4".into(),
            country_code: "US".into(),
            device_id: "d1".into(),
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

    #[test]
    fn sanctioned_country_blocks_with_full_confidence() {
        let engine = RuleEngine::new();
        let mut event = base_event();
        event.ip_profile.sanctioned_country = true;
        event.amount = 50.0;

        let result = engine.evaluate(&event, &[]);
        assert_eq!(result.decision, Decision::Block);
        assert_eq!(result.confidence, 1.00);
        assert!(result.signals.contains_key("sanctions_match"));
    }

    #[test]
    fn income_mismatch_blocks() {
        let engine = RuleEngine::new();
        let mut event = base_event();
        event.user_profile.declared_monthly_income = 1000.0;
        event.amount = 20000.0;

        let result = engine.evaluate(&event, &[]);
        assert_eq!(result.decision, Decision::Block);
        assert_eq!(result.confidence, 0.98);
        assert!(result.signals.contains_key("income_mismatch"));
    }

    #[test]
    fn sanctioned_country_short_circuits_income_check() {
        let engine = RuleEngine::new();
        let mut event = base_event();
        event.ip_profile.sanctioned_country = true;
        event.user_profile.declared_monthly_income = 1000.0;
        event.amount = 20000.0;

        let result = engine.evaluate(&event, &[]);
        assert!(result.signals.contains_key("sanctions_match"));
        assert!(!result.signals.contains_key("income_mismatch"));
    }

    #[test]
    fn clean_low_risk_approves() {
        let engine = RuleEngine::new();
        let event = base_event();
        let result = engine.evaluate(&event, &[]);
        assert_eq!(result.decision, Decision::Approve);
        assert_eq!(result.confidence, 0.95);
        assert_eq!(result.risk_score, 0.0);
    }

    #[test]
    fn vpn_and_shared_device_is_gray_area() {
        let engine = RuleEngine::new();
        let mut event = base_event();
        event.ip_profile.vpn = true;
        event.ip_profile.high_risk_country = true;
        event.device_profile.total_users_count = 8;

        let result = engine.evaluate(&event, &[]);
        assert_eq!(result.decision, Decision::Investigate);
        assert!((result.risk_score - 0.40).abs() < 1e-9);
        assert_eq!(result.confidence, 0.50);
    }

    #[test]
    fn rapid_churn_contributes_and_is_detected() {
        let engine = RuleEngine::new();
        let mut event = base_event();
        event.transaction_type = TransactionType::Withdrawal;

        let history = vec![TxnPoint {
            transaction_type: TransactionType::Deposit,
            timestamp: event.timestamp - chrono::Duration::minutes(2),
        }];

        let result = engine.evaluate(&event, &history);
        assert!(result.signals.contains_key("rapid_churn"));
        assert!((result.risk_score - 0.30).abs() < 1e-9);
    }

    #[test]
    fn heavy_risk_blocks_via_phase_b() {
        let engine = RuleEngine::new();
        let mut event = base_event();
        event.ip_profile.vpn = true;
        event.ip_profile.high_risk_country = true;
        event.device_profile.total_users_count = 20;
        event.document_profile.confidence_score = 0.1;
        event.transaction_type = TransactionType::Withdrawal;

        let history = vec![TxnPoint {
            transaction_type: TransactionType::Deposit,
            timestamp: event.timestamp - chrono::Duration::minutes(1),
        }];

        let result = engine.evaluate(&event, &history);
        assert_eq!(result.decision, Decision::Block);
        assert_eq!(result.confidence, 0.96);
    }

    #[test]
    fn determinism_same_inputs_same_result() {
        let engine = RuleEngine::new();
        let event = base_event();
        let r1 = engine.evaluate(&event, &[]);
        let r2 = engine.evaluate(&event, &[]);
        assert_eq!(r1.decision, r2.decision);
        assert_eq!(r1.risk_score, r2.risk_score);
        assert_eq!(r1.confidence, r2.confidence);
    }
}
