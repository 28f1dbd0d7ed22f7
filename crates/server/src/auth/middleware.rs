use crate::{
    auth::jwt::JwtAccessTokenService,
    error::{ErrorCode, ServerError},
};
use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: uuid::Uuid,
}

pub async fn require_bearer_auth(
    State(jwt_service): State<Arc<JwtAccessTokenService>>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = match request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(extract_bearer_token)
    {
        Some(token) => token,
        None => return unauthorized_response("missing bearer token"),
    };

    let user_id = match jwt_service.validate_user_token(token) {
        Ok(user_id) => user_id,
        Err(error) => {
            tracing::debug!(?error, "bearer token rejected");
            return unauthorized_response("invalid bearer token");
        }
    };

    request.extensions_mut().insert(AuthenticatedUser { user_id });

    next.run(request).await
}

fn extract_bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;

    if !scheme.eq_ignore_ascii_case("Bearer") {
        return None;
    }

    let token = token.trim();
    if token.is_empty() {
        return None;
    }

    Some(token)
}

fn unauthorized_response(message: &'static str) -> Response {
    ServerError::new(ErrorCode::AuthInvalidToken, message).into_response()
}

#[cfg(test)]
mod tests {
    use super::{extract_bearer_token, require_bearer_auth, AuthenticatedUser};
    use crate::auth::jwt::JwtAccessTokenService;
    use axum::{
        body::{to_bytes, Body},
        extract::Extension,
        http::{header::AUTHORIZATION, Request, StatusCode},
        middleware,
        routing::get,
        Router,
    };
    use std::sync::Arc;
    use tower::ServiceExt;
    use uuid::Uuid;

    const TEST_SECRET: &str = "liqua_test_secret_that_is_definitely_long_enough";

    fn service() -> Arc<JwtAccessTokenService> {
        Arc::new(JwtAccessTokenService::new(TEST_SECRET).expect("service should initialize"))
    }

    fn protected_app(jwt_service: Arc<JwtAccessTokenService>) -> Router {
        Router::new()
            .route(
                "/protected",
                get(|Extension(user): Extension<AuthenticatedUser>| async move { user.user_id.to_string() }),
            )
            .layer(middleware::from_fn_with_state(jwt_service, require_bearer_auth))
    }

    async fn call(app: Router, authorization: Option<String>) -> (StatusCode, String) {
        let mut request = Request::builder().uri("/protected");
        if let Some(value) = authorization {
            request = request.header(AUTHORIZATION, value);
        }
        let response = app
            .oneshot(request.body(Body::empty()).expect("request should build"))
            .await
            .expect("request should return a response");
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.expect("body should be readable");
        (status, String::from_utf8_lossy(&body).into_owned())
    }

    #[tokio::test]
    async fn rejects_requests_without_bearer_token() {
        let (status, body) = call(protected_app(service()), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("AUTH_INVALID_TOKEN"));
    }

    #[tokio::test]
    async fn rejects_requests_with_invalid_bearer_token() {
        let (status, _) = call(protected_app(service()), Some("Bearer invalid-token".into())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn injects_authenticated_user_for_valid_bearer_token() {
        let service = service();
        let user_id = Uuid::new_v4();
        let token = service.issue_user_token(user_id).expect("token should be issued");

        let (status, body) = call(protected_app(service), Some(format!("bearer {token}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, user_id.to_string());
    }

    #[test]
    fn bearer_scheme_is_required() {
        assert_eq!(extract_bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(extract_bearer_token("Basic abc"), None);
        assert_eq!(extract_bearer_token("Bearer   "), None);
        assert_eq!(extract_bearer_token("abc"), None);
    }
}
