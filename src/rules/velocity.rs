//! Per-user sliding window used to evaluate the rapid deposit/withdrawal
//! ("rapid churn") predicate in §4.2 Phase B.
//!
//! The source system's `hasRapidDepositWithdrawal` was a dead-coded stub
//! that always returned `false` (§9 REDESIGN FLAGS). This tracker gives the
//! rule engine a real, explicit input to decide on instead: the caller
//! (the Triage Pipeline) owns the tracker and hands the engine a snapshot
//! of recent transactions for the event's user, keeping the engine itself
//! a pure function of `(event, history)`.

use crate::models::TransactionType;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// Sliding window width for the rapid-churn predicate.
pub const CHURN_WINDOW: Duration = Duration::minutes(5);

/// How long a user's history is retained before being dropped to bound
/// memory use; comfortably wider than `CHURN_WINDOW`.
const RETENTION: Duration = Duration::minutes(30);

#[derive(Debug, Clone, Copy)]
pub struct TxnPoint {
    pub transaction_type: TransactionType,
    pub timestamp: DateTime<Utc>,
}

/// Tracks recent transactions per user so the rule engine can check for
/// rapid deposit+withdrawal churn without making network or store calls.
pub struct VelocityTracker {
    by_user: Mutex<HashMap<String, VecDeque<TxnPoint>>>,
}

impl VelocityTracker {
    pub fn new() -> Self {
        Self {
            by_user: Mutex::new(HashMap::new()),
        }
    }

    /// Snapshot of this user's history within `CHURN_WINDOW` of `now`,
    /// evicting anything older than `RETENTION` along the way.
    pub fn recent_for(&self, user_id: &str, now: DateTime<Utc>) -> Vec<TxnPoint> {
        let mut guard = self.by_user.lock();
        let Some(history) = guard.get_mut(user_id) else {
            return Vec::new();
        };
        while let Some(front) = history.front() {
            if now - front.timestamp > RETENTION {
                history.pop_front();
            } else {
                break;
            }
        }
        history
            .iter()
            .copied()
            .filter(|p| (now - p.timestamp).abs() <= CHURN_WINDOW)
            .collect()
    }

    /// Record this transaction after it has been evaluated.
    pub fn record(&self, user_id: &str, transaction_type: TransactionType, timestamp: DateTime<Utc>) {
        let mut guard = self.by_user.lock();
        guard
            .entry(user_id.to_string())
            .or_default()
            .push_back(TxnPoint {
                transaction_type,
                timestamp,
            });
    }
}

impl Default for VelocityTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// True if `history` contains a transaction of the opposite type to
/// `current` within `CHURN_WINDOW` of it — the "rapid deposit+withdrawal"
/// predicate from §4.2.
pub fn is_rapid_churn(current: TxnPoint, history: &[TxnPoint]) -> bool {
    history.iter().any(|p| {
        p.transaction_type != current.transaction_type
            && (current.timestamp - p.timestamp).abs() <= CHURN_WINDOW
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_opposite_type_within_window() {
        let tracker = VelocityTracker::new();
        let t0 = Utc::now();
        tracker.record("u1", TransactionType::Deposit, t0);

        let t1 = t0 + Duration::minutes(3);
        let history = tracker.recent_for("u1", t1);
        let current = TxnPoint {
            transaction_type: TransactionType::Withdrawal,
            timestamp: t1,
        };
        assert!(is_rapid_churn(current, &history));
    }

    #[test]
    fn ignores_same_type_and_out_of_window() {
        let tracker = VelocityTracker::new();
        let t0 = Utc::now();
        tracker.record("u1", TransactionType::Deposit, t0);

        // same type doesn't count
        let same_type = TxnPoint {
            transaction_type: TransactionType::Deposit,
            timestamp: t0 + Duration::minutes(1),
        };
        let history = tracker.recent_for("u1", same_type.timestamp);
        assert!(!is_rapid_churn(same_type, &history));

        // opposite type but outside the window doesn't count
        let later = t0 + Duration::minutes(10);
        let history = tracker.recent_for("u1", later);
        let opposite_late = TxnPoint {
            transaction_type: TransactionType::Withdrawal,
            timestamp: later,
        };
        assert!(!is_rapid_churn(opposite_late, &history));
    }
}
