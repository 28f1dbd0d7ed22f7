// Authoritative processing of pushed mutation batches and replica pulls.
//
//   for each call, in order:
//     id <= watermark        ─▶ skipped (already processed)
//     execute ok             ─▶ watermark = id, same transaction, commit
//     execute err            ─▶ rollback; watermark = id in its own transaction
//
// Side effects declared by committed mutations are handed back to the
// caller; nothing here runs them.

use rusqlite::Connection;
use tracing::{debug, info, warn};
use uuid::Uuid;

use liqua_common::error::{MutatorError, StoreError};
use liqua_common::mutators::{execute, Mutation, MutationContext, SideEffect};
use liqua_common::protocol::push::{MutationCall, MutationResult, PushRequest, PushResponse, ReplicaSnapshot};

use crate::db::store::{self, SqliteTransaction};
use crate::db::{clients, users};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("user {0} does not exist")]
    UnknownUser(Uuid),
    #[error("client `{0}` belongs to another user")]
    ForeignClient(String),
    #[error("storage failure: {0}")]
    Storage(#[from] rusqlite::Error),
}

/// Outcome of one push batch.
#[derive(Debug)]
pub struct Processed {
    pub response: PushResponse,
    pub effects: Vec<SideEffect>,
    /// Storage failure that stopped the batch early. Mutations before it
    /// stay committed and their effects are still in `effects`.
    pub interrupted: Option<rusqlite::Error>,
}

fn ensure_user(conn: &Connection, user_id: Uuid) -> Result<(), GatewayError> {
    match users::find_user(conn, user_id)? {
        Some(_) => Ok(()),
        None => Err(GatewayError::UnknownUser(user_id)),
    }
}

/// The client's watermark, refusing clients registered to someone else.
fn watermark(conn: &Connection, client_id: &str, user_id: Uuid) -> Result<i64, GatewayError> {
    match clients::find_client(conn, client_id)? {
        Some(record) if record.user_id != user_id => Err(GatewayError::ForeignClient(client_id.to_owned())),
        Some(record) => Ok(record.last_mutation_id),
        None => Ok(0),
    }
}

pub fn process_push(
    conn: &mut Connection,
    user_id: Uuid,
    skew_ms: i64,
    request: &PushRequest,
) -> Result<Processed, GatewayError> {
    ensure_user(conn, user_id)?;
    let client_id = request.client_id.as_str();
    let mut last = watermark(conn, client_id, user_id)?;
    let mut results = Vec::with_capacity(request.mutations.len());
    let mut effects = Vec::new();
    let mut interrupted = None;

    for call in &request.mutations {
        if call.id <= last {
            debug!(client_id, id = call.id, last_mutation_id = last, "skipping already processed mutation");
            continue;
        }

        let ctx = MutationContext::server(user_id, skew_ms);
        match process_call(conn, &ctx, client_id, call) {
            Ok((result, declared)) => {
                effects.extend(declared);
                results.push(result);
                last = call.id;
            }
            Err(error) => {
                warn!(client_id, id = call.id, %error, "push interrupted by a storage failure");
                interrupted = Some(error);
                break;
            }
        }
    }

    Ok(Processed { response: PushResponse { last_mutation_id: last, mutations: results }, effects, interrupted })
}

/// Execute one call in its own transaction and advance the watermark to it.
fn process_call(
    conn: &mut Connection,
    ctx: &MutationContext,
    client_id: &str,
    call: &MutationCall,
) -> rusqlite::Result<(MutationResult, Vec<SideEffect>)> {
    let tx = conn.transaction()?;
    let outcome = call
        .decode()
        .map_err(MutatorError::from)
        .and_then(|mutation| execute(&mut SqliteTransaction::new(&tx), ctx, &mutation));

    match outcome {
        Ok(declared) => {
            clients::set_last_mutation_id(&tx, client_id, ctx.user_id, call.id)?;
            tx.commit()?;
            Ok((MutationResult::ok(call.id), declared))
        }
        Err(error) => {
            tx.rollback()?;
            info!(
                client_id,
                id = call.id,
                namespace = %call.namespace,
                name = %call.name,
                code = error.code().as_str(),
                %error,
                "mutation rejected"
            );
            let tx = conn.transaction()?;
            clients::set_last_mutation_id(&tx, client_id, ctx.user_id, call.id)?;
            tx.commit()?;
            Ok((MutationResult::error(call.id, &error), Vec::new()))
        }
    }
}

/// Run one mutation outside any client's batch, e.g. a server-generated chunk.
pub fn apply_mutation(
    conn: &mut Connection,
    ctx: &MutationContext,
    mutation: &Mutation,
) -> Result<Vec<SideEffect>, MutatorError> {
    let tx = conn.transaction().map_err(StoreError::new)?;
    let effects = execute(&mut SqliteTransaction::new(&tx), ctx, mutation)?;
    tx.commit().map_err(StoreError::new)?;
    Ok(effects)
}

pub fn replica_snapshot(conn: &Connection, user_id: Uuid, client_id: &str) -> Result<ReplicaSnapshot, GatewayError> {
    ensure_user(conn, user_id)?;
    Ok(ReplicaSnapshot {
        last_mutation_id: watermark(conn, client_id, user_id)?,
        chats: store::visible_chats(conn, user_id)?,
        messages: store::visible_messages(conn, user_id)?,
        chat_trees: store::owned_trees(conn, user_id)?,
    })
}
