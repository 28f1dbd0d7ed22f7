// Sync engine: ties the outbox, the local replica and the transport together.
//
//   mutate ─▶ outbox row (id) ─▶ replica.apply(id)     local, immediate
//   flush  ─▶ push oldest pending batch ─▶ ack / backoff
//   pull   ─▶ replica snapshot ─▶ replica.rebase

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use tokio::sync::{broadcast, watch, Notify};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use liqua_common::mutators::Mutation;
use liqua_common::protocol::push::{GuestSession, MutationResult, PushRequest};
use liqua_common::types::{now_millis, ChatTree};

use crate::outbox::OutboxQueue;
use crate::replica::{LocalReplica, PendingMutation, ReplicaEvent};
use crate::store::meta_db::MetaDb;
use crate::transport::SyncTransport;

pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(2);

/// What one flush did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub sent: usize,
    pub acked: usize,
    /// Mutations the server processed but refused.
    pub rejected: Vec<MutationResult>,
}

pub struct SyncEngine<T> {
    transport: T,
    db: Mutex<MetaDb>,
    replica: Mutex<LocalReplica>,
    client_id: String,
    token: String,
    nudge: Notify,
}

fn lock<'a, X>(mutex: &'a Mutex<X>, what: &str) -> Result<MutexGuard<'a, X>> {
    mutex.lock().map_err(|_| anyhow!("{what} lock poisoned"))
}

impl<T: SyncTransport> SyncEngine<T> {
    /// Build an engine for `session`, restoring whatever the outbox still
    /// holds into the replica.
    pub fn new(db: MetaDb, transport: T, client_id: impl Into<String>, session: &GuestSession) -> Result<Self> {
        let client_id = client_id.into();
        let mut replica = LocalReplica::new(session.user.id);

        let queue = OutboxQueue::new(db.connection());
        let requeued = queue.requeue_in_flight(&client_id)?;
        let unacked = queue.unacked(&client_id)?;
        for row in &unacked {
            match row.to_call().decode() {
                Ok(mutation) => {
                    replica.apply(PendingMutation { id: row.id, mutation, applied_at: row.timestamp });
                }
                Err(error) => warn!(id = row.id, %error, "outbox row no longer decodes"),
            }
        }
        if !unacked.is_empty() {
            info!(restored = unacked.len(), requeued, "restored unsent mutations");
        }

        Ok(Self {
            transport,
            db: Mutex::new(db),
            replica: Mutex::new(replica),
            client_id,
            token: session.token.clone(),
            nudge: Notify::new(),
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn with_replica<R>(&self, f: impl FnOnce(&LocalReplica) -> R) -> Result<R> {
        let replica = lock(&self.replica, "replica")?;
        Ok(f(&replica))
    }

    pub fn user_id(&self) -> Result<Uuid> {
        self.with_replica(LocalReplica::user_id)
    }

    pub fn subscribe(&self) -> Result<broadcast::Receiver<ReplicaEvent>> {
        self.with_replica(LocalReplica::subscribe)
    }

    pub fn watch_tree(&self) -> Result<watch::Receiver<Option<ChatTree>>> {
        self.with_replica(|replica| replica.tree_cell().subscribe())
    }

    /// Queue `mutation` and apply it locally. Returns its mutation id.
    pub fn mutate(&self, mutation: Mutation) -> Result<i64> {
        let applied_at = now_millis();
        // Replica first, then db: ids and replay order must agree.
        let mut replica = lock(&self.replica, "replica")?;
        let id = {
            let db = lock(&self.db, "client db")?;
            OutboxQueue::new(db.connection()).enqueue(&self.client_id, &mutation, applied_at, Utc::now())?
        };
        let (namespace, name) = mutation.key();
        let applied = replica.apply(PendingMutation { id, mutation, applied_at });
        drop(replica);

        debug!(id, namespace, name, applied, "mutation queued");
        self.nudge.notify_one();
        Ok(id)
    }

    /// Push the oldest ready batch, if any.
    pub async fn flush(&self) -> Result<FlushReport> {
        let batch = {
            let db = lock(&self.db, "client db")?;
            let queue = OutboxQueue::new(db.connection());
            let batch = queue.ready_to_send(&self.client_id, Utc::now())?;
            for row in &batch {
                queue.mark_sent(row.id)?;
            }
            batch
        };
        if batch.is_empty() {
            return Ok(FlushReport::default());
        }

        let request = PushRequest {
            client_id: self.client_id.clone(),
            mutations: batch.iter().map(|row| row.to_call()).collect(),
        };
        let pushed = self.transport.push(&self.token, &request).await;

        let db = lock(&self.db, "client db")?;
        let queue = OutboxQueue::new(db.connection());
        match pushed {
            Ok(response) => {
                let acked = queue.acknowledge_through(&self.client_id, response.last_mutation_id)?;
                for row in batch.iter().filter(|row| row.id > response.last_mutation_id) {
                    queue.mark_failed(row.id, Utc::now())?;
                }
                let rejected: Vec<MutationResult> =
                    response.mutations.into_iter().filter(|result| !result.is_ok()).collect();
                for result in &rejected {
                    warn!(id = result.id, result = ?result.result, "server rejected mutation");
                }
                debug!(sent = batch.len(), acked, last_mutation_id = response.last_mutation_id, "push complete");
                Ok(FlushReport { sent: batch.len(), acked, rejected })
            }
            Err(error) => {
                for row in &batch {
                    queue.mark_failed(row.id, Utc::now())?;
                }
                Err(error).context("push to sync server failed")
            }
        }
    }

    /// Fetch the authoritative snapshot and rebase the replica onto it.
    pub async fn pull(&self) -> Result<()> {
        let snapshot = self
            .transport
            .pull(&self.token, &self.client_id)
            .await
            .context("pull from sync server failed")?;
        let last_mutation_id = snapshot.last_mutation_id;

        lock(&self.replica, "replica")?.rebase(snapshot);
        // Covers pushes whose response never arrived.
        let db = lock(&self.db, "client db")?;
        OutboxQueue::new(db.connection()).acknowledge_through(&self.client_id, last_mutation_id)?;
        Ok(())
    }

    pub async fn sync(&self) -> Result<FlushReport> {
        let report = self.flush().await?;
        self.pull().await?;
        Ok(report)
    }

    /// Sync on every tick and whenever a mutation is queued, until shutdown.
    pub async fn run(&self, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("sync loop stopping");
                    return;
                }
                _ = ticker.tick() => {}
                _ = self.nudge.notified() => {}
            }
            if let Err(error) = self.sync().await {
                warn!(?error, "sync round failed");
            }
        }
    }
}
