use anyhow::{anyhow, bail, Context};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Guest sessions are cached by clients, so tokens live for weeks.
pub const ACCESS_TOKEN_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccessTokenClaims {
    sub: String,
    iat: i64,
    exp: i64,
}

#[derive(Clone)]
pub struct JwtAccessTokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtAccessTokenService {
    pub fn new(secret: &str) -> anyhow::Result<Self> {
        if secret.len() < 32 {
            bail!("jwt secret must be at least 32 characters long");
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    pub fn issue_user_token(&self, user_id: Uuid) -> anyhow::Result<String> {
        self.issue_user_token_at(user_id, current_unix_timestamp()?)
    }

    fn issue_user_token_at(&self, user_id: Uuid, issued_at: i64) -> anyhow::Result<String> {
        let claims = AccessTokenClaims {
            sub: user_id.to_string(),
            iat: issued_at,
            exp: issued_at + ACCESS_TOKEN_TTL_SECONDS,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .context("failed to encode access token")
    }

    /// The user id a valid token was issued to.
    pub fn validate_user_token(&self, token: &str) -> anyhow::Result<Uuid> {
        let claims = decode::<AccessTokenClaims>(token, &self.decoding_key, &self.validation)
            .context("failed to decode access token")?
            .claims;

        Uuid::parse_str(&claims.sub)
            .with_context(|| format!("access token subject '{}' is not a UUID", claims.sub))
    }
}

fn current_unix_timestamp() -> anyhow::Result<i64> {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|error| anyhow!("system clock is before unix epoch: {error}"))?;

    i64::try_from(duration.as_secs()).context("unix timestamp overflow")
}

#[cfg(test)]
mod tests {
    use super::{current_unix_timestamp, JwtAccessTokenService, ACCESS_TOKEN_TTL_SECONDS};
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
    use serde::Serialize;
    use uuid::Uuid;

    const TEST_SECRET: &str = "liqua_test_secret_that_is_definitely_long_enough";

    #[test]
    fn short_secrets_are_refused() {
        assert!(JwtAccessTokenService::new("too-short").is_err());
    }

    #[test]
    fn issues_and_validates_user_tokens() {
        let service = JwtAccessTokenService::new(TEST_SECRET).expect("service should initialize");
        let user_id = Uuid::new_v4();

        let token = service.issue_user_token(user_id).expect("token should be issued");
        assert_eq!(service.validate_user_token(&token).expect("token should validate"), user_id);
    }

    #[test]
    fn rejects_tampered_tokens() {
        let service = JwtAccessTokenService::new(TEST_SECRET).expect("service should initialize");
        let token = service.issue_user_token(Uuid::new_v4()).expect("token should be issued");

        assert!(service.validate_user_token(&format!("{token}x")).is_err());
    }

    #[test]
    fn rejects_tokens_signed_with_another_secret() {
        let issuer = JwtAccessTokenService::new("another_secret_that_is_also_long_enough_ok")
            .expect("service should initialize");
        let verifier = JwtAccessTokenService::new(TEST_SECRET).expect("service should initialize");
        let token = issuer.issue_user_token(Uuid::new_v4()).expect("token should be issued");

        assert!(verifier.validate_user_token(&token).is_err());
    }

    #[test]
    fn rejects_expired_tokens() {
        let service = JwtAccessTokenService::new(TEST_SECRET).expect("service should initialize");
        let issued_at = current_unix_timestamp().expect("current timestamp should resolve")
            - ACCESS_TOKEN_TTL_SECONDS
            - 1;
        let token = service.issue_user_token_at(Uuid::new_v4(), issued_at).expect("token should be issued");

        assert!(service.validate_user_token(&token).is_err());
    }

    #[test]
    fn rejects_tokens_with_invalid_subject_claim() {
        #[derive(Serialize)]
        struct InvalidSubjectClaims {
            sub: &'static str,
            iat: i64,
            exp: i64,
        }

        let now = current_unix_timestamp().expect("current timestamp should resolve");
        let token = encode(
            &Header::new(Algorithm::HS256),
            &InvalidSubjectClaims { sub: "not-a-uuid", iat: now, exp: now + ACCESS_TOKEN_TTL_SECONDS },
            &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
        )
        .expect("token should encode");

        let service = JwtAccessTokenService::new(TEST_SECRET).expect("service should initialize");
        assert!(service.validate_user_token(&token).is_err());
    }
}
