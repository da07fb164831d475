//! AI Queue Producer — §4.4 of the overview (component 5).
//!
//! Writes one escalation record per gray-area case to the outbound stream
//! consumed by the external AI investigator. The source system called the
//! investigator inline and re-enqueued its entire accumulated gray-area
//! list per event (an accidental O(n²), §9 REDESIGN FLAGS); this producer
//! enqueues only the current event, once, via `XADD`.

use crate::error::StreamError;
use crate::models::TransactionEvent;
use crate::stream::StreamAdapter;
use tracing::warn;

pub struct AiQueueProducer {
    adapter: StreamAdapter,
    stream_name: String,
}

impl AiQueueProducer {
    pub fn new(adapter: StreamAdapter, stream_name: impl Into<String>) -> Self {
        Self {
            adapter,
            stream_name: stream_name.into(),
        }
    }

    /// Enqueue `{case_id, user_id, event_data}` per §6. Failure is logged
    /// and swallowed — per §5's backpressure note, an unreachable AI Queue
    /// still lets the triage loop persist the case and ack the record; the
    /// case simply remains `UNDER_INVESTIGATION` until a human acts.
    pub async fn enqueue(&self, case_id: &str, user_id: &str, event: &TransactionEvent) {
        if let Err(e) = self.try_enqueue(case_id, user_id, event).await {
            warn!(case_id, user_id, error = %e, "AI queue enqueue failed, case remains under investigation");
        }
    }

    async fn try_enqueue(
        &self,
        case_id: &str,
        user_id: &str,
        event: &TransactionEvent,
    ) -> Result<(), StreamError> {
        let event_data = serde_json::to_string(event)
            .map_err(|e| StreamError::Unavailable(e.to_string()))?;
        self.adapter
            .publish(
                &self.stream_name,
                &[
                    ("case_id", case_id),
                    ("user_id", user_id),
                    ("event_data", &event_data),
                ],
            )
            .await?;
        Ok(())
    }
}
