// CORS middleware configuration.
//
// Allowed origins come from `LIQUA_CORS_ORIGINS` (comma-separated). Falls
// back to localhost defaults in development.

use std::time::Duration;

use axum::http::{header, HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};

/// Default origins allowed when no origin list is configured.
const DEFAULT_DEV_ORIGINS: &[&str] = &[
    "http://localhost:3000",
    "http://localhost:5173",
    "http://127.0.0.1:3000",
    "http://127.0.0.1:5173",
];

/// Build a [`CorsLayer`] for the configured origin list.
///
/// - `"*"` allows any origin, without credentials.
/// - A comma-separated list allows exactly those origins.
/// - `None` allows the default development origins.
pub fn cors_layer(origins: Option<&str>) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-request-id"),
        ])
        .expose_headers([HeaderName::from_static("x-request-id")])
        .allow_credentials(true)
        .max_age(Duration::from_secs(3600));

    match origins {
        Some("*") => base.allow_origin(AllowOrigin::any()).allow_credentials(false),
        Some(origins) => base.allow_origin(parse_origins(origins)),
        None => base.allow_origin(parse_origins(&DEFAULT_DEV_ORIGINS.join(","))),
    }
}

fn parse_origins(comma_separated: &str) -> Vec<HeaderValue> {
    comma_separated
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| HeaderValue::from_str(s).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, routing::get, Router};
    use tower::ServiceExt;

    fn test_app(origins: Option<&str>) -> Router {
        Router::new().route("/test", get(|| async { "ok" })).layer(cors_layer(origins))
    }

    async fn preflight(app: Router, origin: &str) -> axum::response::Response {
        app.oneshot(
            Request::builder()
                .method(Method::OPTIONS)
                .uri("/test")
                .header("origin", origin)
                .header("access-control-request-method", "POST")
                .body(Body::empty())
                .expect("preflight request should build"),
        )
        .await
        .expect("preflight should return a response")
    }

    #[tokio::test]
    async fn default_origins_allow_local_dev_servers() {
        let response = preflight(test_app(None), "http://localhost:5173").await;
        assert_eq!(
            response.headers().get("access-control-allow-origin").expect("allow-origin header"),
            "http://localhost:5173"
        );
    }

    #[tokio::test]
    async fn unknown_origin_gets_no_cors_headers() {
        let response = preflight(test_app(None), "https://evil.example.com").await;
        assert!(response.headers().get("access-control-allow-origin").is_none());
    }

    #[tokio::test]
    async fn configured_origins_replace_the_defaults() {
        let app = test_app(Some("https://chat.liqua.dev, https://staging.liqua.dev"));
        let response = preflight(app, "https://staging.liqua.dev").await;
        assert_eq!(
            response.headers().get("access-control-allow-origin").expect("allow-origin header"),
            "https://staging.liqua.dev"
        );

        let app = test_app(Some("https://chat.liqua.dev"));
        let response = preflight(app, "http://localhost:3000").await;
        assert!(response.headers().get("access-control-allow-origin").is_none());
    }

    #[tokio::test]
    async fn wildcard_origin_disables_credentials() {
        let response = preflight(test_app(Some("*")), "https://anything.example.com").await;
        assert_eq!(response.headers().get("access-control-allow-origin").expect("allow-origin header"), "*");
        assert!(response.headers().get("access-control-allow-credentials").is_none());
    }
}
