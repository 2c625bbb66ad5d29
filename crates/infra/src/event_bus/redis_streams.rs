//! Redis Streams-backed broker (durable, at-least-once delivery).
//!
//! ## Topology
//!
//! - **Stream**: the durable topic (`scrumai:standup_analysis`)
//! - **Consumer group**: the logical queue (`standup_analysis_queue`); every
//!   worker process joins it under its own consumer name
//! - **Dead-letter stream**: `scrumai:standup_analysis:dlq`
//!
//! ## Entry fields
//!
//! `payload` (message body), `attempt` (delivery counter, starts at 1),
//! `published_at` (RFC 3339).
//!
//! ## Delivery order for one consumer
//!
//! 1. Own pending entries left over from a previous incarnation (crash recovery)
//! 2. Entries idle in other consumers' pending lists longer than `claim_idle`
//!    (`XAUTOCLAIM`)
//! 3. New entries (`XREADGROUP ... >` with `BLOCK`)
//!
//! Streams have no native requeue, so a requeue appends a copy with
//! `attempt + 1` and acknowledges the original in the same `MULTI`.
//!
//! Entries taken from a pending list (steps 1 and 2) were already handed to a
//! consumer that never settled them, typically because it crashed. Their
//! `attempt` is raised by the extra deliveries `XPENDING` reports for the id,
//! so a message that keeps killing workers still reaches the retry limit.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{RedisError, Value};
use tracing::{debug, instrument, warn};

use scrumai_events::{BrokerError, Delivery, MessageConsumer, MessagePublisher};

/// Pending entries idle longer than this are claimed from other consumers.
const DEFAULT_CLAIM_IDLE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamTopology {
    pub stream: String,
    pub group: String,
    pub dead_letter_stream: String,
}

#[derive(Clone)]
pub struct RedisStreamsBroker {
    client: redis::Client,
    conn: MultiplexedConnection,
    topology: StreamTopology,
    claim_idle: Duration,
}

impl RedisStreamsBroker {
    /// Connect and ensure the stream and consumer group exist.
    pub async fn connect(
        redis_url: impl AsRef<str>,
        topology: StreamTopology,
    ) -> Result<Self, BrokerError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        let conn = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        let broker = Self {
            client,
            conn,
            topology,
            claim_idle: DEFAULT_CLAIM_IDLE,
        };
        broker.ensure_topology().await?;
        Ok(broker)
    }

    pub fn with_claim_idle(mut self, claim_idle: Duration) -> Self {
        self.claim_idle = claim_idle;
        self
    }

    pub fn topology(&self) -> &StreamTopology {
        &self.topology
    }

    /// Create the consumer group (and stream) if missing. Idempotent.
    #[instrument(skip(self), fields(stream = %self.topology.stream, group = %self.topology.group), err)]
    pub async fn ensure_topology(&self) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        let created: Result<Value, RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.topology.stream)
            .arg(&self.topology.group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match created {
            Ok(_) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(command_error("XGROUP CREATE", e)),
        }
    }

    /// A new group member on its own connection (blocking reads do not stall
    /// the publisher).
    pub async fn consumer(
        &self,
        consumer_name: impl Into<String>,
    ) -> Result<RedisStreamsConsumer, BrokerError> {
        let conn = self
            .client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        Ok(RedisStreamsConsumer {
            conn,
            topology: self.topology.clone(),
            name: consumer_name.into(),
            claim_idle: self.claim_idle,
            recovering: true,
            claim_cursor: "0-0".to_string(),
        })
    }
}

#[async_trait]
impl MessagePublisher for RedisStreamsBroker {
    #[instrument(skip(self, body), fields(stream = %self.topology.stream), err)]
    async fn publish(&self, body: Vec<u8>) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        let _id: String = redis::cmd("XADD")
            .arg(&self.topology.stream)
            .arg("*")
            .arg("payload")
            .arg(body)
            .arg("attempt")
            .arg(1u32)
            .arg("published_at")
            .arg(chrono::Utc::now().to_rfc3339())
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("XADD", e))?;
        Ok(())
    }
}

/// One named member of the consumer group.
pub struct RedisStreamsConsumer {
    conn: MultiplexedConnection,
    topology: StreamTopology,
    name: String,
    claim_idle: Duration,
    /// Still draining our own pending list from a previous run.
    recovering: bool,
    claim_cursor: String,
}

impl RedisStreamsConsumer {
    pub fn name(&self) -> &str {
        &self.name
    }

    async fn read_own_pending(&mut self) -> Result<Option<StreamEntry>, BrokerError> {
        loop {
            let reply: Value = redis::cmd("XREADGROUP")
                .arg("GROUP")
                .arg(&self.topology.group)
                .arg(&self.name)
                .arg("COUNT")
                .arg(1)
                .arg("STREAMS")
                .arg(&self.topology.stream)
                .arg("0")
                .query_async(&mut self.conn)
                .await
                .map_err(|e| command_error("XREADGROUP pending", e))?;

            let Some(entry) = parse_read_reply(reply)?.into_iter().next() else {
                return Ok(None);
            };
            if entry.fields.is_some() {
                return Ok(Some(entry));
            }
            // Trimmed or deleted while pending: nothing left to deliver.
            self.ack_id(&entry.id).await?;
        }
    }

    async fn claim_idle_entry(&mut self) -> Result<Option<StreamEntry>, BrokerError> {
        let reply: Value = redis::cmd("XAUTOCLAIM")
            .arg(&self.topology.stream)
            .arg(&self.topology.group)
            .arg(&self.name)
            .arg(u64::try_from(self.claim_idle.as_millis()).unwrap_or(u64::MAX))
            .arg(&self.claim_cursor)
            .arg("COUNT")
            .arg(1)
            .query_async(&mut self.conn)
            .await
            .map_err(|e| command_error("XAUTOCLAIM", e))?;

        let (next_cursor, entries) = parse_autoclaim_reply(reply)?;
        self.claim_cursor = next_cursor;
        Ok(entries.into_iter().find(|e| e.fields.is_some()))
    }

    /// Times the group has delivered `id`, per its pending-entries list.
    async fn delivery_count(&mut self, id: &str) -> Result<u64, BrokerError> {
        let reply: Value = redis::cmd("XPENDING")
            .arg(&self.topology.stream)
            .arg(&self.topology.group)
            .arg(id)
            .arg(id)
            .arg(1)
            .query_async(&mut self.conn)
            .await
            .map_err(|e| command_error("XPENDING", e))?;
        Ok(parse_pending_reply(reply)?.unwrap_or(1))
    }

    async fn recovered(&mut self, entry: StreamEntry) -> Result<Delivery, BrokerError> {
        let deliveries = self.delivery_count(&entry.id).await?;
        Ok(entry.into_delivery(deliveries))
    }

    async fn read_new(&mut self, wait: Duration) -> Result<Option<StreamEntry>, BrokerError> {
        // BLOCK 0 would wait forever.
        let block_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX).max(1);
        let reply: Value = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.topology.group)
            .arg(&self.name)
            .arg("COUNT")
            .arg(1)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(&self.topology.stream)
            .arg(">")
            .query_async(&mut self.conn)
            .await
            .map_err(|e| command_error("XREADGROUP", e))?;

        Ok(parse_read_reply(reply)?.into_iter().next())
    }

    async fn ack_id(&mut self, id: &str) -> Result<(), BrokerError> {
        let _: () = redis::pipe()
            .atomic()
            .cmd("XACK")
            .arg(&self.topology.stream)
            .arg(&self.topology.group)
            .arg(id)
            .ignore()
            .cmd("XDEL")
            .arg(&self.topology.stream)
            .arg(id)
            .ignore()
            .query_async(&mut self.conn)
            .await
            .map_err(|e| command_error("XACK", e))?;
        Ok(())
    }
}

#[async_trait]
impl MessageConsumer for RedisStreamsConsumer {
    async fn receive(&mut self, wait: Duration) -> Result<Option<Delivery>, BrokerError> {
        if self.recovering {
            match self.read_own_pending().await? {
                Some(entry) => {
                    debug!(consumer = %self.name, message_id = %entry.id, "redelivering own pending entry");
                    return self.recovered(entry).await.map(Some);
                }
                None => self.recovering = false,
            }
        }

        if let Some(entry) = self.claim_idle_entry().await? {
            debug!(consumer = %self.name, message_id = %entry.id, "claimed idle entry");
            return self.recovered(entry).await.map(Some);
        }

        Ok(self.read_new(wait).await?.map(|entry| entry.into_delivery(1)))
    }

    #[instrument(skip(self, delivery), fields(consumer = %self.name, message_id = %delivery.tag), err)]
    async fn ack(&mut self, delivery: &Delivery) -> Result<(), BrokerError> {
        self.ack_id(&delivery.tag).await
    }

    #[instrument(skip(self, delivery), fields(consumer = %self.name, message_id = %delivery.tag), err)]
    async fn nack(&mut self, delivery: &Delivery, requeue: bool) -> Result<(), BrokerError> {
        if !requeue {
            return self.ack_id(&delivery.tag).await;
        }

        let _: () = redis::pipe()
            .atomic()
            .cmd("XADD")
            .arg(&self.topology.stream)
            .arg("*")
            .arg("payload")
            .arg(delivery.body.as_slice())
            .arg("attempt")
            .arg(delivery.attempt.saturating_add(1))
            .arg("published_at")
            .arg(chrono::Utc::now().to_rfc3339())
            .ignore()
            .cmd("XACK")
            .arg(&self.topology.stream)
            .arg(&self.topology.group)
            .arg(&delivery.tag)
            .ignore()
            .cmd("XDEL")
            .arg(&self.topology.stream)
            .arg(&delivery.tag)
            .ignore()
            .query_async(&mut self.conn)
            .await
            .map_err(|e| command_error("requeue", e))?;
        Ok(())
    }

    #[instrument(skip(self, delivery), fields(consumer = %self.name, message_id = %delivery.tag), err)]
    async fn dead_letter(&mut self, delivery: &Delivery, reason: &str) -> Result<(), BrokerError> {
        let _: () = redis::pipe()
            .atomic()
            .cmd("XADD")
            .arg(&self.topology.dead_letter_stream)
            .arg("*")
            .arg("original_message_id")
            .arg(&delivery.tag)
            .arg("attempt")
            .arg(delivery.attempt)
            .arg("reason")
            .arg(reason)
            .arg("failed_at")
            .arg(chrono::Utc::now().to_rfc3339())
            .arg("payload")
            .arg(delivery.body.as_slice())
            .ignore()
            .cmd("XACK")
            .arg(&self.topology.stream)
            .arg(&self.topology.group)
            .arg(&delivery.tag)
            .ignore()
            .cmd("XDEL")
            .arg(&self.topology.stream)
            .arg(&delivery.tag)
            .ignore()
            .query_async(&mut self.conn)
            .await
            .map_err(|e| command_error("dead-letter", e))?;

        warn!(
            message_id = %delivery.tag,
            attempt = delivery.attempt,
            reason,
            "message sent to dead-letter stream"
        );
        Ok(())
    }
}

/// One stream entry. `fields` is `None` when the entry was deleted while pending.
#[derive(Debug, Clone, PartialEq, Eq)]
struct StreamEntry {
    id: String,
    fields: Option<HashMap<String, Vec<u8>>>,
}

impl StreamEntry {
    /// `deliveries` is how often this stream id has been handed out; every
    /// delivery past the first adds one to the stored attempt.
    ///
    /// A missing payload becomes an empty body, which fails decoding and is
    /// dropped by the consumer like any other malformed message.
    fn into_delivery(self, deliveries: u64) -> Delivery {
        let mut fields = self.fields.unwrap_or_default();
        let stored = fields
            .get("attempt")
            .and_then(|raw| std::str::from_utf8(raw).ok())
            .and_then(|s| s.parse::<u32>().ok())
            .filter(|a| *a > 0)
            .unwrap_or(1);
        let redeliveries = u32::try_from(deliveries.saturating_sub(1)).unwrap_or(u32::MAX);
        let attempt = stored.saturating_add(redeliveries);
        Delivery {
            tag: self.id,
            body: fields.remove("payload").unwrap_or_default(),
            attempt,
        }
    }
}

/// `XREADGROUP` reply: `[[stream, [entry, ...]], ...]` or nil on timeout.
fn parse_read_reply(reply: Value) -> Result<Vec<StreamEntry>, BrokerError> {
    let streams = match reply {
        Value::Nil => return Ok(vec![]),
        Value::Bulk(streams) => streams,
        other => return Err(malformed("XREADGROUP reply", &other)),
    };

    let mut entries = Vec::new();
    for stream in streams {
        let Value::Bulk(mut parts) = stream else {
            return Err(BrokerError::Malformed("stream section is not an array".to_string()));
        };
        if parts.len() != 2 {
            return Err(BrokerError::Malformed("stream section must be [name, entries]".to_string()));
        }
        match parts.pop() {
            Some(Value::Bulk(raw_entries)) => {
                for raw in raw_entries {
                    entries.push(parse_entry(raw)?);
                }
            }
            Some(Value::Nil) | None => {}
            Some(other) => return Err(malformed("stream entries", &other)),
        }
    }
    Ok(entries)
}

/// `XAUTOCLAIM` reply: `[next_cursor, [entry, ...], (deleted ids)]`.
fn parse_autoclaim_reply(reply: Value) -> Result<(String, Vec<StreamEntry>), BrokerError> {
    let mut parts = match reply {
        Value::Bulk(parts) => parts,
        other => return Err(malformed("XAUTOCLAIM reply", &other)),
    };
    if parts.len() < 2 {
        return Err(BrokerError::Malformed("XAUTOCLAIM reply too short".to_string()));
    }
    let raw_entries = parts.swap_remove(1);
    let cursor = bulk_string(&parts[0])
        .ok_or_else(|| BrokerError::Malformed("XAUTOCLAIM cursor".to_string()))?;

    let entries = match raw_entries {
        Value::Bulk(raw) => raw
            .into_iter()
            .filter(|v| !matches!(v, Value::Nil))
            .map(parse_entry)
            .collect::<Result<Vec<_>, _>>()?,
        Value::Nil => vec![],
        other => return Err(malformed("XAUTOCLAIM entries", &other)),
    };
    Ok((cursor, entries))
}

/// Extended `XPENDING` reply for one id: `[[id, consumer, idle_ms, deliveries]]`,
/// or an empty array once the entry is no longer pending.
fn parse_pending_reply(reply: Value) -> Result<Option<u64>, BrokerError> {
    let rows = match reply {
        Value::Bulk(rows) => rows,
        Value::Nil => return Ok(None),
        other => return Err(malformed("XPENDING reply", &other)),
    };
    let Some(row) = rows.into_iter().next() else {
        return Ok(None);
    };
    match row {
        Value::Bulk(fields) if fields.len() == 4 => match &fields[3] {
            Value::Int(n) => Ok(u64::try_from(*n).ok()),
            other => Err(malformed("XPENDING delivery count", other)),
        },
        other => Err(malformed("XPENDING row", &other)),
    }
}

/// Entry format: `[id, [field, value, field, value, ...]]`; fields may be nil.
fn parse_entry(raw: Value) -> Result<StreamEntry, BrokerError> {
    let parts = match raw {
        Value::Bulk(parts) => parts,
        other => return Err(malformed("stream entry", &other)),
    };
    let mut parts = parts.into_iter();
    let id = parts
        .next()
        .as_ref()
        .and_then(bulk_string)
        .ok_or_else(|| BrokerError::Malformed("stream entry id".to_string()))?;

    let fields = match parts.next() {
        Some(Value::Bulk(flat)) => {
            let mut map = HashMap::with_capacity(flat.len() / 2);
            let mut flat = flat.into_iter();
            while let (Some(k), Some(v)) = (flat.next(), flat.next()) {
                if let (Some(key), Value::Data(value)) = (bulk_string(&k), v) {
                    map.insert(key, value);
                }
            }
            Some(map)
        }
        Some(Value::Nil) | None => None,
        Some(other) => return Err(malformed("stream entry fields", &other)),
    };

    Ok(StreamEntry { id, fields })
}

fn bulk_string(value: &Value) -> Option<String> {
    match value {
        Value::Data(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        Value::Status(s) => Some(s.clone()),
        _ => None,
    }
}

fn malformed(what: &str, value: &Value) -> BrokerError {
    BrokerError::Malformed(format!("unexpected {what}: {value:?}"))
}

fn command_error(op: &str, err: RedisError) -> BrokerError {
    if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
        BrokerError::Connection(format!("{op}: {err}"))
    } else {
        BrokerError::Command(format!("{op} failed: {err}"))
    }
}
