use axum::{
    extract::{rejection::JsonRejection, Extension, State},
    Json,
};
use futures_util::future::join_all;
use tracing::{error, info, warn};
use uuid::Uuid;

use liqua_common::mutators::SideEffect;
use liqua_common::protocol::push::{PushRequest, PushResponse};

use super::{gateway_error, json_rejection, AppState};
use crate::auth::middleware::AuthenticatedUser;
use crate::error::{ErrorCode, ServerError};
use crate::gateway::process_push;

pub async fn push(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    request: Result<Json<PushRequest>, JsonRejection>,
) -> Result<Json<PushResponse>, ServerError> {
    let Json(request) = request.map_err(json_rejection)?;
    if request.client_id.trim().is_empty() {
        return Err(ServerError::new(ErrorCode::ValidationFailed, "clientId is required")
            .with_details(serde_json::json!({ "field": "clientId" })));
    }

    let user_id = user.user_id;
    let skew_ms = state.skew_ms;
    let mutation_count = request.mutations.len();
    let processed = state
        .db
        .call(move |conn| process_push(conn, user_id, skew_ms, &request))
        .await
        .map_err(ServerError::internal)?
        .map_err(gateway_error)?;

    info!(
        %user_id,
        mutations = mutation_count,
        last_mutation_id = processed.response.last_mutation_id,
        effects = processed.effects.len(),
        "push processed"
    );

    let fatal = run_side_effects(&state, user_id, processed.effects).await;
    if let Some(error) = processed.interrupted {
        return Err(ServerError::internal(anyhow::Error::new(error).context("push batch interrupted")));
    }
    if fatal > 0 {
        return Err(ServerError::new(
            ErrorCode::InternalError,
            format!("{fatal} fatal error(s) occurred while processing push request"),
        ));
    }

    Ok(Json(processed.response))
}

/// Run every task after commit, concurrently. Returns how many fatal tasks failed.
async fn run_side_effects(state: &AppState, user_id: Uuid, effects: Vec<SideEffect>) -> usize {
    let runs = effects.iter().map(|effect| async move {
        match effect {
            SideEffect::GenerateResponse { chat_id, message_id, model } => {
                state.generations.start(user_id, *chat_id, *message_id, model.clone()).await
            }
            SideEffect::CancelGeneration { chat_id } => state.generations.cancel(*chat_id).map(|_| ()),
        }
    });

    let mut fatal = 0;
    for (effect, result) in effects.iter().zip(join_all(runs).await) {
        let Err(error) = result else { continue };
        if effect.is_fatal() {
            error!(task = effect.name(), ?error, "side-effect task failed");
            fatal += 1;
        } else {
            warn!(task = effect.name(), ?error, "side-effect task failed");
        }
    }
    fatal
}
