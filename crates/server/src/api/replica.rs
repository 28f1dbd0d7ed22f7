use axum::{
    extract::{rejection::QueryRejection, Extension, Query, State},
    Json,
};

use liqua_common::protocol::push::{ReplicaQuery, ReplicaSnapshot};

use super::{gateway_error, AppState};
use crate::auth::middleware::AuthenticatedUser;
use crate::error::{ErrorCode, ServerError};
use crate::gateway::replica_snapshot;

pub async fn replica(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    query: Result<Query<ReplicaQuery>, QueryRejection>,
) -> Result<Json<ReplicaSnapshot>, ServerError> {
    let Query(ReplicaQuery { client_id }) =
        query.map_err(|rejection| ServerError::new(ErrorCode::ValidationFailed, rejection.body_text()))?;

    let user_id = user.user_id;
    let snapshot = state
        .db
        .call(move |conn| replica_snapshot(conn, user_id, &client_id))
        .await
        .map_err(ServerError::internal)?
        .map_err(gateway_error)?;

    tracing::debug!(
        %user_id,
        chats = snapshot.chats.len(),
        messages = snapshot.messages.len(),
        last_mutation_id = snapshot.last_mutation_id,
        "replica served"
    );
    Ok(Json(snapshot))
}
