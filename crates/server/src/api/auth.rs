use axum::{extract::State, Json};
use uuid::Uuid;

use liqua_common::protocol::push::GuestSession;
use liqua_common::types::{now_millis, User};

use super::AppState;
use crate::db::users::insert_user;
use crate::error::{ErrorCode, ServerError};

const GUEST_NAME: &str = "Guest";

/// Create a fresh guest user and hand back a bearer token for it.
pub async fn guest_sign_in(State(state): State<AppState>) -> Result<Json<GuestSession>, ServerError> {
    if !state.allow_guests {
        return Err(ServerError::new(ErrorCode::AuthForbidden, "guest sign-in is disabled"));
    }

    let user = User { id: Uuid::new_v4(), name: GUEST_NAME.to_owned(), created_at: now_millis() };
    let row = user.clone();
    state
        .db
        .call(move |conn| insert_user(conn, &row))
        .await
        .and_then(|inserted| inserted.map_err(anyhow::Error::from))
        .map_err(ServerError::internal)?;

    let token = state.jwt.issue_user_token(user.id).map_err(ServerError::internal)?;
    tracing::info!(user_id = %user.id, "guest signed in");
    Ok(Json(GuestSession { user, token }))
}
