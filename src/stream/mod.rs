//! Event Source Adapter — §4.1.
//!
//! Wraps a durable, ordered, partitioned append-only stream (Redis Streams)
//! with consumer-group semantics: per-group offset, per-consumer pending
//! list, explicit ack. Grounded in the reference backend's scraper idiom
//! (a thin client struct wrapping a connection, `async fn`s returning
//! `anyhow`/domain errors, `tracing` on failure) generalized from HTTP
//! polling to a stream-native client.

use crate::error::StreamError;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, warn};

/// One record pulled from the stream: an opaque, strictly increasing
/// `record_id` and its raw field map (we only ever care about `event_data`).
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub record_id: String,
    pub event_data: Option<String>,
}

/// Client for a single named stream, used for both the inbound transaction
/// stream and the outbound AI queue.
#[derive(Clone)]
pub struct StreamAdapter {
    conn: ConnectionManager,
}

impl StreamAdapter {
    pub async fn connect(redis_url: &str) -> Result<Self, StreamError> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }

    /// Idempotent consumer-group creation at `$` (LATEST). A
    /// "group-already-exists" (`BUSYGROUP`) error is swallowed per §4.1.
    pub async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), StreamError> {
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(stream, group, "consumer group already exists");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Pull a batch (at most `count`) of pending-or-new records for
    /// `(group, consumer)`. Empty reads return an empty `Vec`, never an
    /// error (§4.1 failure policy).
    pub async fn read_batch(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: usize,
    ) -> Result<Vec<RawRecord>, StreamError> {
        let mut conn = self.conn.clone();
        let reply: redis::streams::StreamReadReply = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(group)
            .arg(consumer)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(stream)
            .arg(">")
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                warn!(stream, group, error = %e, "stream read failed");
                StreamError::from(e)
            })?;

        let mut records = Vec::new();
        for key in reply.keys {
            for id in key.ids {
                let event_data = id
                    .map
                    .get("event_data")
                    .and_then(|v| match v {
                        redis::Value::Data(bytes) => String::from_utf8(bytes.clone()).ok(),
                        redis::Value::Status(s) => Some(s.clone()),
                        _ => None,
                    });
                records.push(RawRecord {
                    record_id: id.id,
                    event_data,
                });
            }
        }
        Ok(records)
    }

    /// Reclaim up to `count` records from `group`'s pending entries list
    /// (delivered before but never acked) and reassign them to `consumer`.
    /// `XREADGROUP ... >` only ever returns never-delivered records, so
    /// without this pass an unacked record sits in the PEL forever and is
    /// never redelivered (§4.1/§7). `min_idle_ms = 0` reclaims every
    /// pending entry on each call, which is safe under this crate's
    /// single-consumer-per-partition model (§5).
    pub async fn claim_pending(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        min_idle_ms: usize,
    ) -> Result<Vec<RawRecord>, StreamError> {
        let mut conn = self.conn.clone();
        let reply: redis::Value = redis::cmd("XAUTOCLAIM")
            .arg(stream)
            .arg(group)
            .arg(consumer)
            .arg(min_idle_ms)
            .arg("0")
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                warn!(stream, group, error = %e, "stream claim failed");
                StreamError::from(e)
            })?;

        // XAUTOCLAIM replies with a 3-element array: [next_cursor,
        // [[id, [field, value, ...]], ...], [deleted_id, ...]]. The redis
        // crate has no typed reply for this command, so parse manually in
        // the same style as `read_batch`.
        let redis::Value::Bulk(top) = reply else {
            return Ok(Vec::new());
        };
        let Some(redis::Value::Bulk(entries)) = top.into_iter().nth(1) else {
            return Ok(Vec::new());
        };

        let mut records = Vec::new();
        for entry in entries {
            let redis::Value::Bulk(mut fields) = entry else {
                continue;
            };
            if fields.len() != 2 {
                continue;
            }
            let field_values = fields.pop().unwrap();
            let id_value = fields.pop().unwrap();

            let redis::Value::Data(id_bytes) = id_value else {
                continue;
            };
            let Ok(record_id) = String::from_utf8(id_bytes) else {
                continue;
            };

            let redis::Value::Bulk(kvs) = field_values else {
                continue;
            };
            let mut event_data = None;
            let mut iter = kvs.into_iter();
            while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
                let redis::Value::Data(k_bytes) = k else { continue };
                if k_bytes != b"event_data" {
                    continue;
                }
                event_data = match v {
                    redis::Value::Data(bytes) => String::from_utf8(bytes).ok(),
                    redis::Value::Status(s) => Some(s),
                    _ => None,
                };
            }

            records.push(RawRecord {
                record_id,
                event_data,
            });
        }
        Ok(records)
    }

    /// Remove `record_id` from the consumer's pending list.
    pub async fn ack(&self, stream: &str, group: &str, record_id: &str) -> Result<(), StreamError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.xack(stream, group, &[record_id]).await?;
        Ok(())
    }

    /// Number of delivery attempts recorded for `record_id` in `group`'s
    /// pending entries list (used for poison-record escalation, §7).
    pub async fn delivery_count(
        &self,
        stream: &str,
        group: &str,
        record_id: &str,
    ) -> Result<u64, StreamError> {
        let mut conn = self.conn.clone();
        let reply: redis::RedisResult<Vec<(String, String, i64, i64)>> = redis::cmd("XPENDING")
            .arg(stream)
            .arg(group)
            .arg("IDLE")
            .arg(0)
            .arg(record_id)
            .arg(record_id)
            .arg(1)
            .query_async(&mut conn)
            .await;

        match reply {
            Ok(entries) => Ok(entries
                .into_iter()
                .find(|(id, ..)| id == record_id)
                .map(|(_, _, _, count)| count as u64)
                .unwrap_or(1)),
            Err(_) => Ok(1),
        }
    }

    /// Append a new record with the given `(field, value)` pairs. Used by
    /// the AI Queue Producer to write escalation records.
    pub async fn publish(
        &self,
        stream: &str,
        fields: &[(&str, &str)],
    ) -> Result<String, StreamError> {
        let mut conn = self.conn.clone();
        let id: String = conn.xadd(stream, "*", fields).await?;
        Ok(id)
    }
}
