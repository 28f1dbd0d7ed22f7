// Server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development.

use std::net::SocketAddr;
use std::path::PathBuf;

use liqua_common::mutators::DEFAULT_TIMESTAMP_SKEW_MS;

const DEV_JWT_SECRET: &str = "liqua_local_development_jwt_secret_must_be_32_chars";

/// Core server configuration.
///
/// Constructed via [`ServerConfig::from_env`] which reads environment
/// variables and falls back to development defaults.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// HS256 signing secret for bearer tokens.
    pub jwt_secret: String,
    /// SQLite database file.
    pub database_path: PathBuf,
    /// Comma-separated CORS origins (or `"*"` for any).
    pub cors_origins: Option<String>,
    /// Log filter directive (e.g. `info`, `liqua_server=debug`).
    pub log_filter: String,
    /// Whether `POST /api/auth/guest` issues sessions.
    pub allow_guests: bool,
    /// Tolerated distance between client timestamps and server time.
    pub timestamp_skew_ms: i64,
    /// Ollama endpoint for server-side generation; none disables it.
    pub ollama_url: Option<String>,
}

impl ServerConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `LIQUA_HOST` | `0.0.0.0` |
    /// | `LIQUA_PORT` | `8080` |
    /// | `LIQUA_JWT_SECRET` | dev-only placeholder |
    /// | `LIQUA_DATABASE_PATH` | `liqua.db` |
    /// | `LIQUA_CORS_ORIGINS` | *(none, cors.rs uses dev defaults)* |
    /// | `LIQUA_LOG_FILTER` | `info` |
    /// | `LIQUA_ALLOW_GUESTS` | `true` |
    /// | `LIQUA_TIMESTAMP_SKEW_MS` | `10000` |
    /// | `LIQUA_OLLAMA_URL` | *(none)* |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("LIQUA_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env("LIQUA_PORT").ok().and_then(|v| v.trim().parse().ok()).unwrap_or(8080);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let jwt_secret = env("LIQUA_JWT_SECRET").unwrap_or_else(|_| DEV_JWT_SECRET.into());
        let database_path =
            env("LIQUA_DATABASE_PATH").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("liqua.db"));
        let cors_origins = env("LIQUA_CORS_ORIGINS").ok();
        let log_filter = env("LIQUA_LOG_FILTER").unwrap_or_else(|_| "info".into());

        let allow_guests = env("LIQUA_ALLOW_GUESTS").ok().and_then(|v| parse_bool(&v)).unwrap_or(true);
        let timestamp_skew_ms = env("LIQUA_TIMESTAMP_SKEW_MS")
            .ok()
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|skew| *skew >= 0)
            .unwrap_or(DEFAULT_TIMESTAMP_SKEW_MS);

        let ollama_url = env("LIQUA_OLLAMA_URL").ok().map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());

        Self {
            listen_addr,
            jwt_secret,
            database_path,
            cors_origins,
            log_filter,
            allow_guests,
            timestamp_skew_ms,
            ollama_url,
        }
    }

    /// Returns true when using the development-only JWT secret.
    pub fn is_dev_jwt_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }
}

/// Case- and whitespace-insensitive boolean. Anything unrecognized is `None`.
fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from_map(
        map: HashMap<&'static str, &'static str>,
    ) -> impl Fn(&str) -> Result<String, std::env::VarError> {
        move |key: &str| map.get(key).map(|v| v.to_string()).ok_or(std::env::VarError::NotPresent)
    }

    fn with(pairs: &[(&'static str, &'static str)]) -> ServerConfig {
        ServerConfig::from_env_fn(env_from_map(pairs.iter().copied().collect()))
    }

    #[test]
    fn defaults_when_no_env_vars() {
        let cfg = with(&[]);
        assert_eq!(cfg.listen_addr.port(), 8080);
        assert_eq!(cfg.listen_addr.ip().to_string(), "0.0.0.0");
        assert!(cfg.is_dev_jwt_secret());
        assert_eq!(cfg.database_path, PathBuf::from("liqua.db"));
        assert!(cfg.cors_origins.is_none());
        assert_eq!(cfg.log_filter, "info");
        assert!(cfg.allow_guests);
        assert_eq!(cfg.timestamp_skew_ms, 10_000);
        assert!(cfg.ollama_url.is_none());
    }

    #[test]
    fn custom_host_and_port() {
        let cfg = with(&[("LIQUA_HOST", "127.0.0.1"), ("LIQUA_PORT", "3000")]);
        assert_eq!(cfg.listen_addr.to_string(), "127.0.0.1:3000");
    }

    #[test]
    fn invalid_port_uses_default() {
        let cfg = with(&[("LIQUA_PORT", "not_a_number")]);
        assert_eq!(cfg.listen_addr.port(), 8080);
    }

    #[test]
    fn custom_jwt_secret_is_not_dev() {
        let cfg = with(&[("LIQUA_JWT_SECRET", "production_secret_at_least_32_chars!!")]);
        assert!(!cfg.is_dev_jwt_secret());
    }

    #[test]
    fn allow_guests_tolerates_case_and_padding() {
        assert!(with(&[("LIQUA_ALLOW_GUESTS", "TRUE")]).allow_guests);
        assert!(with(&[("LIQUA_ALLOW_GUESTS", " true ")]).allow_guests);
        assert!(!with(&[("LIQUA_ALLOW_GUESTS", "false")]).allow_guests);
        assert!(!with(&[("LIQUA_ALLOW_GUESTS", " False\n")]).allow_guests);
        assert!(with(&[("LIQUA_ALLOW_GUESTS", "maybe")]).allow_guests);
    }

    #[test]
    fn skew_override_and_rejects_negative_values() {
        assert_eq!(with(&[("LIQUA_TIMESTAMP_SKEW_MS", "2500")]).timestamp_skew_ms, 2_500);
        assert_eq!(with(&[("LIQUA_TIMESTAMP_SKEW_MS", "-1")]).timestamp_skew_ms, 10_000);
    }

    #[test]
    fn blank_ollama_url_disables_generation() {
        assert!(with(&[("LIQUA_OLLAMA_URL", "  ")]).ollama_url.is_none());
        assert_eq!(
            with(&[("LIQUA_OLLAMA_URL", "http://gpu-box:11434")]).ollama_url.as_deref(),
            Some("http://gpu-box:11434")
        );
    }

    #[test]
    fn database_path_and_log_filter_overrides() {
        let cfg = with(&[("LIQUA_DATABASE_PATH", "/var/lib/liqua/db.sqlite"), ("LIQUA_LOG_FILTER", "debug")]);
        assert_eq!(cfg.database_path, PathBuf::from("/var/lib/liqua/db.sqlite"));
        assert_eq!(cfg.log_filter, "debug");
    }
}
