// HTTP surface of the reconciliation gateway.

pub mod auth;
pub mod push;
pub mod replica;

use std::sync::Arc;

use axum::{
    extract::rejection::JsonRejection,
    middleware,
    routing::{get, post},
    Router,
};

use liqua_common::protocol::{API_GUEST_AUTH_PATH, API_PUSH_PATH, API_REPLICA_PATH};

use crate::{
    auth::{jwt::JwtAccessTokenService, middleware::require_bearer_auth},
    db::Database,
    error::{ErrorCode, ServerError},
    gateway::GatewayError,
    generation::Generations,
};

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub jwt: Arc<JwtAccessTokenService>,
    pub generations: Arc<Generations>,
    pub allow_guests: bool,
    pub skew_ms: i64,
}

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route(API_PUSH_PATH, post(push::push))
        .route(API_REPLICA_PATH, get(replica::replica))
        .route_layer(middleware::from_fn_with_state(Arc::clone(&state.jwt), require_bearer_auth));

    Router::new()
        .route(API_GUEST_AUTH_PATH, post(auth::guest_sign_in))
        .merge(protected)
        .with_state(state)
}

fn json_rejection(rejection: JsonRejection) -> ServerError {
    let code = if rejection.status() == axum::http::StatusCode::PAYLOAD_TOO_LARGE {
        ErrorCode::PayloadTooLarge
    } else {
        ErrorCode::ValidationFailed
    };
    ServerError::new(code, rejection.body_text())
}

fn gateway_error(error: GatewayError) -> ServerError {
    match error {
        GatewayError::UnknownUser(_) => ServerError::new(ErrorCode::AuthInvalidToken, "unknown user"),
        GatewayError::ForeignClient(_) => ServerError::new(ErrorCode::AuthForbidden, error.to_string()),
        GatewayError::Storage(_) => ServerError::internal(error.into()),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::{
        body::{to_bytes, Body},
        http::{header::AUTHORIZATION, Method, Request, StatusCode},
        Router,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use liqua_common::mutators::{
        AbortChatArgs, InitArgs, Mutation, RequestResponseArgs, SendUserMessageArgs,
    };
    use liqua_common::protocol::push::{GuestSession, MutationCall, PushRequest, ReplicaSnapshot};
    use liqua_common::types::{now_millis, MessageStatus};
    use liqua_llm::scripted::{ScriptStep, ScriptedGenerator};
    use liqua_llm::SharedGenerator;

    use super::*;

    const TEST_SECRET: &str = "liqua_test_secret_that_is_definitely_long_enough";

    fn state_with(generator: Option<SharedGenerator>, allow_guests: bool) -> AppState {
        let db = Database::open_in_memory().expect("db");
        AppState {
            generations: Arc::new(Generations::new(db.clone(), generator, 10_000)),
            db,
            jwt: Arc::new(JwtAccessTokenService::new(TEST_SECRET).expect("jwt")),
            allow_guests,
            skew_ms: 10_000,
        }
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.expect("request should return a response");
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.expect("body should be readable");
        let value = if body.is_empty() { Value::Null } else { serde_json::from_slice(&body).expect("json body") };
        (status, value)
    }

    async fn sign_in(app: &Router) -> GuestSession {
        let (status, body) = send(
            app,
            Request::builder().method(Method::POST).uri(API_GUEST_AUTH_PATH).body(Body::empty()).expect("request"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        serde_json::from_value(body).expect("guest session")
    }

    async fn push(app: &Router, token: &str, client_id: &str, mutations: Vec<(i64, Mutation)>) -> (StatusCode, Value) {
        let request = PushRequest {
            client_id: client_id.to_owned(),
            mutations: mutations
                .iter()
                .map(|(id, mutation)| MutationCall::new(*id, mutation, now_millis()).expect("encodes"))
                .collect(),
        };
        send(
            app,
            Request::builder()
                .method(Method::POST)
                .uri(API_PUSH_PATH)
                .header(AUTHORIZATION, format!("Bearer {token}"))
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&request).expect("serializes")))
                .expect("request"),
        )
        .await
    }

    async fn pull(app: &Router, token: &str, client_id: &str) -> ReplicaSnapshot {
        let (status, body) = send(
            app,
            Request::builder()
                .uri(format!("{API_REPLICA_PATH}?clientId={client_id}"))
                .header(AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        serde_json::from_value(body).expect("snapshot")
    }

    fn init(chat_id: Uuid) -> Mutation {
        Mutation::Init(InitArgs { id: chat_id, timestamp: now_millis(), chat_tree_id: None })
    }

    #[tokio::test]
    async fn guest_sessions_can_push_and_pull() {
        let app = router(state_with(None, true));
        let session = sign_in(&app).await;
        let chat_id = Uuid::new_v4();

        let empty = pull(&app, &session.token, "client-1").await;
        assert_eq!(empty, ReplicaSnapshot::default());

        let (status, body) = push(
            &app,
            &session.token,
            "client-1",
            vec![
                (1, init(chat_id)),
                (
                    2,
                    Mutation::SendUserMessage(SendUserMessageArgs {
                        id: Uuid::new_v4(),
                        chat_id,
                        content: "hello".into(),
                        timestamp: now_millis(),
                    }),
                ),
            ],
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "lastMutationId": 2, "mutations": [{ "id": 1, "result": {} }, { "id": 2, "result": {} }] }));

        let snapshot = pull(&app, &session.token, "client-1").await;
        assert_eq!(snapshot.last_mutation_id, 2);
        assert_eq!(snapshot.chats[0].owner_id, session.user.id);
        assert_eq!(snapshot.messages[0].content, "hello");
        assert_eq!(snapshot.chat_trees.len(), 1);
    }

    #[tokio::test]
    async fn rejected_mutations_are_reported_per_call() {
        let app = router(state_with(None, true));
        let session = sign_in(&app).await;

        let (status, body) = push(
            &app,
            &session.token,
            "client-1",
            vec![(
                5,
                Mutation::SendUserMessage(SendUserMessageArgs {
                    id: Uuid::new_v4(),
                    chat_id: Uuid::new_v4(),
                    content: "nowhere".into(),
                    timestamp: now_millis(),
                }),
            )],
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["lastMutationId"], 5);
        assert_eq!(body["mutations"][0]["result"]["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn protected_routes_require_a_valid_token() {
        let app = router(state_with(None, true));

        let (status, body) = push(&app, "not-a-token", "client-1", Vec::new()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "AUTH_INVALID_TOKEN");

        // Validly signed, but for a user the server never issued.
        let jwt = JwtAccessTokenService::new(TEST_SECRET).expect("jwt");
        let stranger = jwt.issue_user_token(Uuid::new_v4()).expect("token");
        let (status, _) = push(&app, &stranger, "client-1", Vec::new()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn guest_sign_in_can_be_disabled() {
        let app = router(state_with(None, false));
        let (status, body) = send(
            &app,
            Request::builder().method(Method::POST).uri(API_GUEST_AUTH_PATH).body(Body::empty()).expect("request"),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "AUTH_FORBIDDEN");
    }

    #[tokio::test]
    async fn client_ids_are_bound_to_their_first_user() {
        let app = router(state_with(None, true));
        let alice = sign_in(&app).await;
        let bob = sign_in(&app).await;

        let (status, _) = push(&app, &alice.token, "shared", vec![(1, init(Uuid::new_v4()))]).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = push(&app, &bob.token, "shared", vec![(2, init(Uuid::new_v4()))]).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "AUTH_FORBIDDEN");
    }

    #[tokio::test]
    async fn malformed_bodies_are_validation_errors() {
        let app = router(state_with(None, true));
        let session = sign_in(&app).await;

        let (status, body) = send(
            &app,
            Request::builder()
                .method(Method::POST)
                .uri(API_PUSH_PATH)
                .header(AUTHORIZATION, format!("Bearer {}", session.token))
                .header("content-type", "application/json")
                .body(Body::from(r#"{"mutations": "nope"}"#))
                .expect("request"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_FAILED");

        let (status, _) = push(&app, &session.token, "  ", Vec::new()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn failed_fatal_tasks_fail_the_request_but_keep_commits() {
        let app = router(state_with(None, true));
        let session = sign_in(&app).await;
        let chat_id = Uuid::new_v4();

        let (status, body) = push(
            &app,
            &session.token,
            "client-1",
            vec![
                (1, init(chat_id)),
                (
                    2,
                    Mutation::RequestResponse(RequestResponseArgs {
                        chat_id,
                        message_id: Uuid::new_v4(),
                        model: "llama3.2".into(),
                    }),
                ),
                (3, Mutation::AbortChat(AbortChatArgs::chat(chat_id))),
            ],
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["message"], "1 fatal error(s) occurred while processing push request");

        let snapshot = pull(&app, &session.token, "client-1").await;
        assert_eq!(snapshot.last_mutation_id, 3);
        assert_eq!(snapshot.chats.len(), 1);
    }

    #[tokio::test]
    async fn request_response_streams_a_server_reply() {
        let generator: SharedGenerator = Arc::new(ScriptedGenerator::tokens(["Hel", "lo ", "wor", "ld"]));
        let app = router(state_with(Some(generator), true));
        let session = sign_in(&app).await;
        let (chat_id, message_id) = (Uuid::new_v4(), Uuid::new_v4());

        let (status, _) = push(
            &app,
            &session.token,
            "client-1",
            vec![
                (1, init(chat_id)),
                (2, Mutation::RequestResponse(RequestResponseArgs { chat_id, message_id, model: "llama3.2".into() })),
            ],
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        for _ in 0..200 {
            let snapshot = pull(&app, &session.token, "client-1").await;
            if let Some(reply) = snapshot.messages.iter().find(|m| m.id == message_id) {
                if reply.status == MessageStatus::Complete {
                    assert_eq!(reply.content, "Hello world");
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("server reply never completed");
    }

    #[tokio::test]
    async fn interrupted_batches_still_start_committed_replies() {
        let generator: SharedGenerator = Arc::new(ScriptedGenerator::tokens(["done"]));
        let state = state_with(Some(generator), true);
        let db = state.db.clone();
        let app = router(state);
        let session = sign_in(&app).await;
        let (chat_id, message_id) = (Uuid::new_v4(), Uuid::new_v4());
        db.with_conn(|conn| {
            conn.execute_batch(
                "
                CREATE TRIGGER watermark_fault BEFORE UPDATE ON clients
                WHEN NEW.last_mutation_id >= 3
                BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END;
                ",
            )
        })
        .expect("connection")
        .expect("trigger");

        let (status, body) = push(
            &app,
            &session.token,
            "client-1",
            vec![
                (1, init(chat_id)),
                (2, Mutation::RequestResponse(RequestResponseArgs { chat_id, message_id, model: "llama3.2".into() })),
                (3, Mutation::AbortChat(AbortChatArgs::chat(chat_id))),
            ],
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["code"], "INTERNAL_ERROR");

        for _ in 0..200 {
            let snapshot = pull(&app, &session.token, "client-1").await;
            assert_eq!(snapshot.last_mutation_id, 2);
            if snapshot.messages.iter().any(|m| m.id == message_id && m.status == MessageStatus::Complete) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("reply for the committed request never completed");
    }

    #[tokio::test]
    async fn abort_chat_cancels_a_server_reply() {
        let generator: SharedGenerator =
            Arc::new(ScriptedGenerator::new(vec![ScriptStep::Token("partial".into()), ScriptStep::Stall]));
        let state = state_with(Some(generator), true);
        let generations = Arc::clone(&state.generations);
        let app = router(state);
        let session = sign_in(&app).await;
        let (chat_id, message_id) = (Uuid::new_v4(), Uuid::new_v4());

        push(
            &app,
            &session.token,
            "client-1",
            vec![
                (1, init(chat_id)),
                (2, Mutation::RequestResponse(RequestResponseArgs { chat_id, message_id, model: "llama3.2".into() })),
            ],
        )
        .await;
        for _ in 0..200 {
            if pull(&app, &session.token, "client-1").await.messages.iter().any(|m| m.id == message_id) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let (status, _) =
            push(&app, &session.token, "client-1", vec![(3, Mutation::AbortChat(AbortChatArgs::chat(chat_id)))]).await;
        assert_eq!(status, StatusCode::OK);
        assert!(!generations.is_running(chat_id).expect("registry"));

        let snapshot = pull(&app, &session.token, "client-1").await;
        let reply = snapshot.messages.iter().find(|m| m.id == message_id).expect("reply row");
        assert_eq!(reply.status, MessageStatus::Aborted);
        assert_eq!(reply.content, "partial");
    }
}
