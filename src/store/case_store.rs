//! Case Store — §4.4.
//!
//! Transactional, SQLite-backed persistence for `Case` records, keyed by
//! `case_id` with secondary lookups by `user_id` and `status`. Grounded in
//! the reference backend's `DbSignalStorage`: WAL mode, a single
//! `Arc<Mutex<Connection>>` guarding the handle (rusqlite connections
//! aren't `Sync`), a schema constant applied with `execute_batch`, and
//! free-form evidence maps serialized as JSON text columns rather than
//! relying on reflection.

use crate::error::CaseStoreError;
use crate::models::{Case, CaseStatus, TriggeredBy};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS cases (
    case_id                 TEXT PRIMARY KEY,
    user_id                 TEXT NOT NULL,
    trigger_transaction_id  TEXT NOT NULL UNIQUE,
    created_at              TEXT NOT NULL,
    updated_at              TEXT NOT NULL,
    resolved_at             TEXT,
    status                  TEXT NOT NULL,
    confidence_score        REAL,
    fraud_probability       REAL,
    triggered_by            TEXT NOT NULL,
    investigation_layers    TEXT NOT NULL DEFAULT '[]',
    detection_signals       TEXT NOT NULL DEFAULT '{}',
    transaction_summary     TEXT NOT NULL DEFAULT '{}',
    identity_flags          TEXT NOT NULL DEFAULT '{}',
    behavioral_flags        TEXT NOT NULL DEFAULT '{}',
    network_flags           TEXT NOT NULL DEFAULT '{}',
    ai_signals               TEXT NOT NULL DEFAULT '{}',
    ai_reasoning            TEXT,
    ai_recommendations      TEXT,
    assigned_to             TEXT,
    human_decision          TEXT,
    resolution_notes        TEXT,
    related_accounts        TEXT NOT NULL DEFAULT '[]',
    fraud_ring_id           TEXT
);

CREATE INDEX IF NOT EXISTS idx_cases_user ON cases(user_id);
CREATE INDEX IF NOT EXISTS idx_cases_status ON cases(status);
CREATE INDEX IF NOT EXISTS idx_cases_status_created ON cases(status, created_at DESC);
"#;

/// A partial update coming from the AI investigator, merged onto an
/// existing case under the §4.4 state machine. Field names mirror the
/// wire payload in §4.5.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct AiUpdatePayload {
    pub decision: Option<String>,
    pub confidence_score: Option<f64>,
    pub ai_reasoning: Option<String>,
    pub ai_recommendations: Option<String>,
    #[serde(default)]
    pub investigation_layers: Vec<String>,
    #[serde(default)]
    pub detection_signals: HashMap<String, Value>,
    #[serde(default)]
    pub ai_signals: HashMap<String, Value>,
}

pub struct CaseStore {
    conn: Arc<Mutex<Connection>>,
}

impl CaseStore {
    pub fn new(db_path: &str) -> Result<Self, CaseStoreError> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch(SCHEMA_SQL)?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM cases", [], |r| r.get(0))?;
        info!(db_path, existing_cases = count, "case store initialized");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against a single transaction, committing on `Ok` and rolling
    /// back on `Err`. Gives callers an atomic multi-step mutation scope
    /// without exposing the connection lock directly (design note §9).
    pub fn with_tx<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction) -> Result<T, CaseStoreError>,
    ) -> Result<T, CaseStoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    pub fn create(&self, case: Case) -> Result<Case, CaseStoreError> {
        self.with_tx(|tx| {
            if let Some(existing) =
                Self::find_by_trigger_tx(tx, &case.trigger_transaction_id)?
            {
                return Err(CaseStoreError::DuplicateTrigger(existing.case_id));
            }
            Self::insert_tx(tx, &case)?;
            Ok(case)
        })
    }

    pub fn get_by_case_id(&self, case_id: &str) -> Result<Option<Case>, CaseStoreError> {
        let conn = self.conn.lock();
        Self::find_by_case_id_conn(&conn, case_id)
    }

    pub fn get_by_trigger(
        &self,
        trigger_transaction_id: &str,
    ) -> Result<Option<Case>, CaseStoreError> {
        self.with_tx(|tx| Self::find_by_trigger_tx(tx, trigger_transaction_id))
    }

    pub fn list_by_user(&self, user_id: &str) -> Result<Vec<Case>, CaseStoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM cases WHERE user_id = ?1 ORDER BY created_at DESC",
            SELECT_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![user_id], row_to_case)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn list_by_status(&self, statuses: &[CaseStatus]) -> Result<Vec<Case>, CaseStoreError> {
        self.list_by_status_inner(statuses, false)
    }

    pub fn list_by_status_desc_created(
        &self,
        statuses: &[CaseStatus],
    ) -> Result<Vec<Case>, CaseStoreError> {
        self.list_by_status_inner(statuses, true)
    }

    fn list_by_status_inner(
        &self,
        statuses: &[CaseStatus],
        order_desc: bool,
    ) -> Result<Vec<Case>, CaseStoreError> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock();
        let placeholders = statuses.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let order = if order_desc {
            "ORDER BY created_at DESC"
        } else {
            ""
        };
        let sql = format!(
            "SELECT {} FROM cases WHERE status IN ({}) {}",
            SELECT_COLUMNS, placeholders, order
        );
        let mut stmt = conn.prepare(&sql)?;
        let params: Vec<String> = statuses.iter().map(|s| status_to_str(*s).to_string()).collect();
        let rows = stmt
            .query_map(rusqlite::params_from_iter(params), row_to_case)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn stats(&self) -> Result<HashMap<CaseStatus, i64>, CaseStoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT status, COUNT(*) FROM cases GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            let status: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok((status, count))
        })?;
        let mut out = HashMap::new();
        for row in rows {
            let (status, count) = row?;
            if let Some(status) = str_to_status(&status) {
                out.insert(status, count);
            }
        }
        Ok(out)
    }

    /// Generic mutation entry point: validates the state-machine transition
    /// from the row currently on disk to `case.status`, then persists the
    /// full record atomically. Touches `updated_at`.
    pub fn update(&self, mut case: Case) -> Result<Case, CaseStoreError> {
        self.with_tx(|tx| {
            let existing = Self::find_by_case_id_tx(tx, &case.case_id)?
                .ok_or_else(|| CaseStoreError::CaseNotFound(case.case_id.clone()))?;

            validate_transition(existing.status, case.status, &case.case_id)?;

            case.updated_at = Utc::now();
            if case.status == CaseStatus::Resolved && case.resolved_at.is_none() {
                case.resolved_at = Some(case.updated_at);
            }
            Self::replace_tx(tx, &case)?;
            Ok(case)
        })
    }

    /// Apply an AI verdict onto an existing case under the §4.4/§4.5 merge
    /// rules. Fails with `CaseNotFound` or `IllegalTransition`.
    pub fn apply_ai_update(
        &self,
        case_id: &str,
        payload: AiUpdatePayload,
    ) -> Result<Case, CaseStoreError> {
        self.with_tx(|tx| {
            let mut case = Self::find_by_case_id_tx(tx, case_id)?
                .ok_or_else(|| CaseStoreError::CaseNotFound(case_id.to_string()))?;

            let target_status = match payload.decision.as_deref() {
                Some("AUTO_APPROVED") => CaseStatus::AutoApproved,
                Some("AUTO_BLOCKED") => CaseStatus::AutoBlocked,
                // any other value (including ESCALATE, or absent) coerces
                // to UNDER_INVESTIGATION. An AI update against a case
                // that is already ESCALATED therefore fails transition
                // validation below, since ESCALATED's only legal
                // successor is RESOLVED.
                _ => CaseStatus::UnderInvestigation,
            };

            validate_transition(case.status, target_status, case_id)?;

            if let Some(score) = payload.confidence_score {
                case.confidence_score = Some(score.clamp(0.0, 1.0));
            }
            if let Some(reasoning) = payload.ai_reasoning {
                case.ai_reasoning = Some(reasoning);
            }
            if let Some(recommendations) = payload.ai_recommendations {
                case.ai_recommendations = Some(recommendations);
            }
            case.union_investigation_layers(&payload.investigation_layers);
            for (k, v) in payload.detection_signals {
                case.detection_signals.insert(k, v);
            }
            for (k, v) in payload.ai_signals {
                case.ai_signals.insert(k, v);
            }
            case.status = target_status;
            case.updated_at = Utc::now();

            Self::replace_tx(tx, &case)?;
            Ok(case)
        })
    }

    /// Close a case per §4.6.
    pub fn resolve(
        &self,
        case_id: &str,
        human_decision: String,
        resolution_notes: Option<String>,
    ) -> Result<Case, CaseStoreError> {
        self.with_tx(|tx| {
            let mut case = Self::find_by_case_id_tx(tx, case_id)?
                .ok_or_else(|| CaseStoreError::CaseNotFound(case_id.to_string()))?;

            validate_transition(case.status, CaseStatus::Resolved, case_id)?;

            let now = Utc::now();
            case.status = CaseStatus::Resolved;
            case.resolved_at = Some(now);
            case.updated_at = now;
            case.human_decision = Some(human_decision);
            case.resolution_notes = resolution_notes;

            Self::replace_tx(tx, &case)?;
            Ok(case)
        })
    }

    fn find_by_case_id_conn(
        conn: &Connection,
        case_id: &str,
    ) -> Result<Option<Case>, CaseStoreError> {
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM cases WHERE case_id = ?1",
            SELECT_COLUMNS
        ))?;
        Ok(stmt.query_row(params![case_id], row_to_case).optional()?)
    }

    fn find_by_case_id_tx(
        tx: &rusqlite::Transaction,
        case_id: &str,
    ) -> Result<Option<Case>, CaseStoreError> {
        let mut stmt = tx.prepare(&format!(
            "SELECT {} FROM cases WHERE case_id = ?1",
            SELECT_COLUMNS
        ))?;
        Ok(stmt.query_row(params![case_id], row_to_case).optional()?)
    }

    fn find_by_trigger_tx(
        tx: &rusqlite::Transaction,
        trigger_transaction_id: &str,
    ) -> Result<Option<Case>, CaseStoreError> {
        let mut stmt = tx.prepare(&format!(
            "SELECT {} FROM cases WHERE trigger_transaction_id = ?1",
            SELECT_COLUMNS
        ))?;
        Ok(stmt
            .query_row(params![trigger_transaction_id], row_to_case)
            .optional()?)
    }

    fn insert_tx(tx: &rusqlite::Transaction, case: &Case) -> Result<(), CaseStoreError> {
        tx.execute(
            "INSERT INTO cases (
                case_id, user_id, trigger_transaction_id, created_at, updated_at, resolved_at,
                status, confidence_score, fraud_probability, triggered_by, investigation_layers,
                detection_signals, transaction_summary, identity_flags, behavioral_flags,
                network_flags, ai_signals, ai_reasoning, ai_recommendations, assigned_to,
                human_decision, resolution_notes, related_accounts, fraud_ring_id
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22,?23,?24)",
            params![
                case.case_id,
                case.user_id,
                case.trigger_transaction_id,
                case.created_at.to_rfc3339(),
                case.updated_at.to_rfc3339(),
                case.resolved_at.map(|t| t.to_rfc3339()),
                status_to_str(case.status),
                case.confidence_score,
                case.fraud_probability,
                triggered_by_to_str(case.triggered_by),
                serde_json::to_string(&case.investigation_layers).unwrap_or_default(),
                serde_json::to_string(&case.detection_signals).unwrap_or_default(),
                serde_json::to_string(&case.transaction_summary).unwrap_or_default(),
                serde_json::to_string(&case.identity_flags).unwrap_or_default(),
                serde_json::to_string(&case.behavioral_flags).unwrap_or_default(),
                serde_json::to_string(&case.network_flags).unwrap_or_default(),
                serde_json::to_string(&case.ai_signals).unwrap_or_default(),
                case.ai_reasoning,
                case.ai_recommendations,
                case.assigned_to,
                case.human_decision,
                case.resolution_notes,
                serde_json::to_string(&case.related_accounts).unwrap_or_default(),
                case.fraud_ring_id,
            ],
        )?;
        Ok(())
    }

    fn replace_tx(tx: &rusqlite::Transaction, case: &Case) -> Result<(), CaseStoreError> {
        tx.execute(
            "UPDATE cases SET
                status = ?2, confidence_score = ?3, fraud_probability = ?4, triggered_by = ?5,
                investigation_layers = ?6, detection_signals = ?7, transaction_summary = ?8,
                identity_flags = ?9, behavioral_flags = ?10, network_flags = ?11, ai_signals = ?12,
                ai_reasoning = ?13, ai_recommendations = ?14, assigned_to = ?15,
                human_decision = ?16, resolution_notes = ?17, related_accounts = ?18,
                fraud_ring_id = ?19, updated_at = ?20, resolved_at = ?21
             WHERE case_id = ?1",
            params![
                case.case_id,
                status_to_str(case.status),
                case.confidence_score,
                case.fraud_probability,
                triggered_by_to_str(case.triggered_by),
                serde_json::to_string(&case.investigation_layers).unwrap_or_default(),
                serde_json::to_string(&case.detection_signals).unwrap_or_default(),
                serde_json::to_string(&case.transaction_summary).unwrap_or_default(),
                serde_json::to_string(&case.identity_flags).unwrap_or_default(),
                serde_json::to_string(&case.behavioral_flags).unwrap_or_default(),
                serde_json::to_string(&case.network_flags).unwrap_or_default(),
                serde_json::to_string(&case.ai_signals).unwrap_or_default(),
                case.ai_reasoning,
                case.ai_recommendations,
                case.assigned_to,
                case.human_decision,
                case.resolution_notes,
                serde_json::to_string(&case.related_accounts).unwrap_or_default(),
                case.fraud_ring_id,
                case.updated_at.to_rfc3339(),
                case.resolved_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }
}

const SELECT_COLUMNS: &str = "case_id, user_id, trigger_transaction_id, created_at, updated_at, \
    resolved_at, status, confidence_score, fraud_probability, triggered_by, investigation_layers, \
    detection_signals, transaction_summary, identity_flags, behavioral_flags, network_flags, \
    ai_signals, ai_reasoning, ai_recommendations, assigned_to, human_decision, resolution_notes, \
    related_accounts, fraud_ring_id";

fn row_to_case(row: &rusqlite::Row) -> rusqlite::Result<Case> {
    let parse_dt = |s: String| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    };
    let parse_json_map = |s: String| -> HashMap<String, Value> {
        serde_json::from_str(&s).unwrap_or_default()
    };
    let parse_json_vec = |s: String| -> Vec<String> { serde_json::from_str(&s).unwrap_or_default() };

    let status_str: String = row.get(6)?;
    let triggered_by_str: String = row.get(9)?;
    let resolved_at: Option<String> = row.get(5)?;

    Ok(Case {
        case_id: row.get(0)?,
        user_id: row.get(1)?,
        trigger_transaction_id: row.get(2)?,
        created_at: parse_dt(row.get(3)?),
        updated_at: parse_dt(row.get(4)?),
        resolved_at: resolved_at.map(parse_dt),
        status: str_to_status(&status_str).unwrap_or(CaseStatus::UnderInvestigation),
        confidence_score: row.get(7)?,
        fraud_probability: row.get(8)?,
        triggered_by: str_to_triggered_by(&triggered_by_str).unwrap_or(TriggeredBy::RuleEngine),
        investigation_layers: parse_json_vec(row.get(10)?),
        detection_signals: parse_json_map(row.get(11)?),
        transaction_summary: parse_json_map(row.get(12)?),
        identity_flags: parse_json_map(row.get(13)?),
        behavioral_flags: parse_json_map(row.get(14)?),
        network_flags: parse_json_map(row.get(15)?),
        ai_signals: parse_json_map(row.get(16)?),
        ai_reasoning: row.get(17)?,
        ai_recommendations: row.get(18)?,
        assigned_to: row.get(19)?,
        human_decision: row.get(20)?,
        resolution_notes: row.get(21)?,
        related_accounts: parse_json_vec(row.get(22)?),
        fraud_ring_id: row.get(23)?,
    })
}

fn status_to_str(status: CaseStatus) -> &'static str {
    match status {
        CaseStatus::AutoApproved => "AUTO_APPROVED",
        CaseStatus::AutoBlocked => "AUTO_BLOCKED",
        CaseStatus::UnderInvestigation => "UNDER_INVESTIGATION",
        CaseStatus::Escalated => "ESCALATED",
        CaseStatus::Resolved => "RESOLVED",
    }
}

fn str_to_status(s: &str) -> Option<CaseStatus> {
    Some(match s {
        "AUTO_APPROVED" => CaseStatus::AutoApproved,
        "AUTO_BLOCKED" => CaseStatus::AutoBlocked,
        "UNDER_INVESTIGATION" => CaseStatus::UnderInvestigation,
        "ESCALATED" => CaseStatus::Escalated,
        "RESOLVED" => CaseStatus::Resolved,
        _ => return None,
    })
}

fn triggered_by_to_str(t: TriggeredBy) -> &'static str {
    match t {
        TriggeredBy::RuleEngine => "RULE_ENGINE",
        TriggeredBy::MlModel => "ML_MODEL",
        TriggeredBy::PatternMatch => "PATTERN_MATCH",
        TriggeredBy::ManualFlag => "MANUAL_FLAG",
    }
}

fn str_to_triggered_by(s: &str) -> Option<TriggeredBy> {
    Some(match s {
        "RULE_ENGINE" => TriggeredBy::RuleEngine,
        "ML_MODEL" => TriggeredBy::MlModel,
        "PATTERN_MATCH" => TriggeredBy::PatternMatch,
        "MANUAL_FLAG" => TriggeredBy::ManualFlag,
        _ => return None,
    })
}

/// The case status transition table. `RESOLVED` is terminal: every
/// transition attempt out of it fails, including a no-op re-resolve.
fn validate_transition(
    from: CaseStatus,
    to: CaseStatus,
    case_id: &str,
) -> Result<(), CaseStoreError> {
    use CaseStatus::*;
    let allowed = match (from, to) {
        (Resolved, _) => false,
        (UnderInvestigation, AutoApproved) => true,
        (UnderInvestigation, AutoBlocked) => true,
        (UnderInvestigation, UnderInvestigation) => true,
        (UnderInvestigation, Escalated) => true,
        (UnderInvestigation, Resolved) => true,
        (AutoApproved, Resolved) => true,
        (AutoBlocked, Resolved) => true,
        (Escalated, Resolved) => true,
        _ => false,
    };

    if allowed {
        Ok(())
    } else {
        warn!(case_id, ?from, ?to, "illegal case transition rejected");
        Err(CaseStoreError::IllegalTransition {
            case_id: case_id.to_string(),
            from,
            attempted: to,
        })
    }
}
