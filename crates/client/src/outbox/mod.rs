// Outbox queue: mutations waiting for the server, with exponential backoff.
//
// Mutations flow through a state machine:
//   pending → sent → acked   (happy path)
//   pending → sent → pending  (retry on failure, with backoff)
//   sent → dead               (after MAX_ATTEMPTS failures)
//
// The row id doubles as the mutation id the server sees, so ids are strictly
// increasing per database. The server skips ids at or below its watermark,
// which means batches must always start at the oldest pending row.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use liqua_common::mutators::Mutation;
use liqua_common::protocol::push::MutationCall;
use liqua_common::types::Millis;

// ── Constants ───────────────────────────────────────────────────────

const BASE_DELAY_MS: u64 = 250;
const MAX_DELAY_MS: u64 = 30_000;
pub const MAX_ATTEMPTS: u32 = 8;
const MAX_PENDING_MUTATIONS: i64 = 10_000;
pub const MAX_BATCH: usize = 100;

// ── Types ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationState {
    Pending,
    Sent,
    Acked,
    Dead,
}

impl MutationState {
    fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Acked => "acked",
            Self::Dead => "dead",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "acked" => Some(Self::Acked),
            "dead" => Some(Self::Dead),
            _ => None,
        }
    }
}

/// A queued mutation call.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxMutation {
    pub id: i64,
    pub client_id: String,
    pub namespace: String,
    pub name: String,
    pub args: serde_json::Value,
    pub timestamp: Millis,
    pub retry_count: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub state: MutationState,
    pub created_at: DateTime<Utc>,
}

impl OutboxMutation {
    pub fn to_call(&self) -> MutationCall {
        MutationCall {
            id: self.id,
            namespace: self.namespace.clone(),
            name: self.name.clone(),
            args: self.args.clone(),
            timestamp: self.timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("OUTBOX_BACKPRESSURE: client {client_id} has {pending_count} unsent mutations")]
pub struct OutboxBackpressure {
    pub client_id: String,
    pub pending_count: i64,
}

// ── Backoff ─────────────────────────────────────────────────────────

/// Exponential backoff delay for a given attempt number (0-based).
pub fn backoff_delay(attempt: u32) -> Duration {
    let exp = attempt.min(7);
    let delay_ms = BASE_DELAY_MS.saturating_mul(1u64 << exp).min(MAX_DELAY_MS);
    Duration::from_millis(delay_ms)
}

// ── Queue operations ────────────────────────────────────────────────

/// Outbox queue backed by the `outbox_mutations` SQLite table.
pub struct OutboxQueue<'a> {
    conn: &'a Connection,
}

impl<'a> OutboxQueue<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Queue a mutation. Returns its id.
    pub fn enqueue(
        &self,
        client_id: &str,
        mutation: &Mutation,
        timestamp: Millis,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let pending_count = self.unsent_count(client_id)?;
        if pending_count >= MAX_PENDING_MUTATIONS {
            return Err(OutboxBackpressure { client_id: client_id.to_owned(), pending_count }.into());
        }

        let (namespace, name) = mutation.key();
        let args = mutation.args().context("failed to encode mutation arguments")?;
        self.conn
            .execute(
                "INSERT INTO outbox_mutations \
                 (client_id, namespace, name, args, timestamp, state, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    client_id,
                    namespace,
                    name,
                    args.to_string(),
                    timestamp,
                    MutationState::Pending.as_str(),
                    now.to_rfc3339(),
                ],
            )
            .context("failed to insert outbox mutation")?;

        Ok(self.conn.last_insert_rowid())
    }

    pub fn mark_sent(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "UPDATE outbox_mutations SET state = ?1 WHERE id = ?2 AND state = ?3",
                params![MutationState::Sent.as_str(), id, MutationState::Pending.as_str()],
            )
            .context("failed to mark outbox mutation as sent")?;
        Ok(rows > 0)
    }

    /// Everything the server reports as processed is acked, whatever its
    /// local state. Returns how many rows changed.
    pub fn acknowledge_through(&self, client_id: &str, last_mutation_id: i64) -> Result<usize> {
        self.conn
            .execute(
                "UPDATE outbox_mutations SET state = ?1 \
                 WHERE client_id = ?2 AND id <= ?3 AND state IN ('pending', 'sent')",
                params![MutationState::Acked.as_str(), client_id, last_mutation_id],
            )
            .context("failed to acknowledge outbox mutations")
    }

    /// Record a send failure. Either schedules a retry with backoff or marks
    /// the mutation `dead`.
    pub fn mark_failed(&self, id: i64, now: DateTime<Utc>) -> Result<bool> {
        let (current_retry_count, current_state): (u32, String) = self
            .conn
            .query_row(
                "SELECT retry_count, state FROM outbox_mutations WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .context("failed to read outbox mutation for failure handling")?;

        if current_state != MutationState::Sent.as_str() {
            return Ok(false);
        }

        let new_retry_count = current_retry_count + 1;
        if new_retry_count >= MAX_ATTEMPTS {
            tracing::warn!(id, attempts = new_retry_count, "giving up on outbox mutation");
            self.conn
                .execute(
                    "UPDATE outbox_mutations SET state = ?1, retry_count = ?2 WHERE id = ?3",
                    params![MutationState::Dead.as_str(), new_retry_count, id],
                )
                .context("failed to mark outbox mutation as dead")?;
        } else {
            let delay = backoff_delay(current_retry_count);
            let next_retry = now + chrono::Duration::from_std(delay).unwrap_or_default();
            self.conn
                .execute(
                    "UPDATE outbox_mutations SET state = ?1, retry_count = ?2, \
                     next_retry_at = ?3 WHERE id = ?4",
                    params![MutationState::Pending.as_str(), new_retry_count, next_retry.to_rfc3339(), id],
                )
                .context("failed to schedule outbox mutation retry")?;
        }

        Ok(true)
    }

    /// Put mutations left `sent` by an interrupted run back in the queue.
    pub fn requeue_in_flight(&self, client_id: &str) -> Result<usize> {
        self.conn
            .execute(
                "UPDATE outbox_mutations SET state = ?1 WHERE client_id = ?2 AND state = ?3",
                params![MutationState::Pending.as_str(), client_id, MutationState::Sent.as_str()],
            )
            .context("failed to requeue in-flight outbox mutations")
    }

    /// The next batch to push, oldest first.
    ///
    /// Empty while the oldest pending mutation is still backing off, so a
    /// newer id never overtakes an older one.
    pub fn ready_to_send(&self, client_id: &str, now: DateTime<Utc>) -> Result<Vec<OutboxMutation>> {
        let batch = self.query(
            "SELECT id, client_id, namespace, name, args, timestamp, retry_count, next_retry_at, state, created_at \
             FROM outbox_mutations WHERE client_id = ?1 AND state = ?2 ORDER BY id ASC LIMIT ?3",
            params![client_id, MutationState::Pending.as_str(), MAX_BATCH as i64],
        )?;

        match batch.first().and_then(|head| head.next_retry_at) {
            Some(retry_at) if retry_at > now => Ok(Vec::new()),
            _ => Ok(batch),
        }
    }

    /// Mutations the server has not confirmed yet, oldest first.
    pub fn unacked(&self, client_id: &str) -> Result<Vec<OutboxMutation>> {
        self.query(
            "SELECT id, client_id, namespace, name, args, timestamp, retry_count, next_retry_at, state, created_at \
             FROM outbox_mutations WHERE client_id = ?1 AND state IN ('pending', 'sent') ORDER BY id ASC",
            params![client_id],
        )
    }

    pub fn unsent_count(&self, client_id: &str) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM outbox_mutations WHERE client_id = ?1 AND state IN ('pending', 'sent')",
                params![client_id],
                |row| row.get(0),
            )
            .context("failed to count unsent outbox mutations")
    }

    fn query(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<OutboxMutation>> {
        let mut stmt = self.conn.prepare(sql).context("failed to prepare outbox query")?;
        let rows = stmt.query_map(params, row_to_mutation).context("failed to query outbox mutations")?;
        rows.collect::<std::result::Result<Vec<_>, _>>().context("failed to collect outbox mutations")
    }
}

fn row_to_mutation(row: &rusqlite::Row<'_>) -> rusqlite::Result<OutboxMutation> {
    let args_str: String = row.get(4)?;
    let args = serde_json::from_str(&args_str).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(error))
    })?;
    let next_retry_str: Option<String> = row.get(7)?;
    let state_str: String = row.get(8)?;
    let created_str: String = row.get(9)?;

    Ok(OutboxMutation {
        id: row.get(0)?,
        client_id: row.get(1)?,
        namespace: row.get(2)?,
        name: row.get(3)?,
        args,
        timestamp: row.get(5)?,
        retry_count: row.get(6)?,
        next_retry_at: next_retry_str.and_then(|s| s.parse::<DateTime<Utc>>().ok()),
        state: MutationState::parse(&state_str).unwrap_or(MutationState::Pending),
        created_at: created_str.parse::<DateTime<Utc>>().unwrap_or_else(|_| Utc::now()),
    })
}
