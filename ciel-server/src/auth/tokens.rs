//! Bearer token issuance, parsing, and revocation
//!
//! Tokens are HMAC-SHA256-signed envelopes carrying the user identity, a
//! kind discriminator (`access` or `stepup`), and issued-at/expiry stamps.
//! Step-up tokens additionally carry a fresh `jti` so their single-use can be
//! enforced at consumption time.
//!
//! Revocation is epoch-based: `token:revoke:{userId}` in the cache holds an
//! RFC3339 timestamp, and any token issued strictly before it is rejected.

use std::ops::DerefMut;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use deadpool_redis::Pool as RedisPool;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cache;
use crate::config::AuthConfig;
use crate::error::{Error, Result};

/// Token kind discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Ordinary short-lived bearer credential
    Access,
    /// Single-use credential for sensitive mutations
    Stepup,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Stepup => "stepup",
        }
    }
}

/// Signed claims envelope (wire form)
#[derive(Debug, Serialize, Deserialize)]
struct TokenClaims {
    /// User id
    sub: String,
    /// Username at issuance time
    username: String,
    /// Token kind; absent means access (back-compat)
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    /// Token id, present on step-up tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    jti: Option<String>,
    /// Issued at (Unix timestamp)
    iat: i64,
    /// Expiration (Unix timestamp)
    exp: i64,
}

/// Identity resolved from a verified token
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub username: String,
    /// Issued-at of the presented token
    pub iat: i64,
    /// Expiration of the presented token
    pub exp: i64,
    /// Token id (step-up tokens only)
    pub jti: Option<String>,
}

/// A freshly issued token
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedToken {
    pub token: String,
    pub expires_in_seconds: u64,
}

/// Issues and verifies bearer tokens
#[derive(Clone)]
pub struct TokenManager {
    encoding_key: Arc<EncodingKey>,
    decoding_key: Arc<DecodingKey>,
    validation: Validation,
    access_ttl_secs: u64,
    stepup_ttl_secs: u64,
    redis: Option<RedisPool>,
    revocation_fail_open: bool,
}

impl TokenManager {
    /// Create a token manager from configuration
    pub fn new(config: &AuthConfig, redis: Option<RedisPool>) -> Self {
        let secret = config.token_secret.as_bytes();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        Self {
            encoding_key: Arc::new(EncodingKey::from_secret(secret)),
            decoding_key: Arc::new(DecodingKey::from_secret(secret)),
            validation,
            access_ttl_secs: config.access_ttl_secs,
            stepup_ttl_secs: config.stepup_ttl_secs,
            redis,
            revocation_fail_open: config.revocation_fail_open,
        }
    }

    /// Issue a token for a user
    pub fn issue(&self, user_id: Uuid, username: &str, kind: TokenKind) -> Result<IssuedToken> {
        self.issue_at(user_id, username, kind, Utc::now())
    }

    /// Issue a token with an explicit clock (internal; tests use this to
    /// produce expired or back-dated tokens)
    fn issue_at(
        &self,
        user_id: Uuid,
        username: &str,
        kind: TokenKind,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken> {
        if username.is_empty() {
            return Err(Error::Internal("refusing to issue token without username".to_string()));
        }

        let ttl = match kind {
            TokenKind::Access => self.access_ttl_secs,
            TokenKind::Stepup => self.stepup_ttl_secs,
        };

        let jti = match kind {
            TokenKind::Access => None,
            TokenKind::Stepup => Some(Uuid::new_v4().to_string()),
        };

        let claims = TokenClaims {
            sub: user_id.to_string(),
            username: username.to_string(),
            kind: Some(kind.as_str().to_string()),
            jti,
            iat: now.timestamp(),
            exp: now.timestamp() + ttl as i64,
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| Error::Internal(format!("token encode: {}", e)))?;

        Ok(IssuedToken {
            token,
            expires_in_seconds: ttl,
        })
    }

    /// Parse and verify a token of the expected kind
    ///
    /// Every failure collapses to the opaque `unauthorized` error; callers
    /// must not leak which check rejected the token.
    pub async fn parse(&self, token: &str, expected: TokenKind) -> Result<AuthUser> {
        let data = decode::<TokenClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|_| Error::Unauthorized)?;
        let claims = data.claims;

        // The library's exp validation is inclusive (it accepts a token in
        // its exact expiry second); the contract is strict `exp > now`.
        if claims.exp <= Utc::now().timestamp() {
            return Err(Error::Unauthorized);
        }

        // Absent kind is treated as access for back-compat.
        let kind = claims.kind.as_deref().unwrap_or("access");
        if kind != expected.as_str() {
            return Err(Error::Unauthorized);
        }

        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| Error::Unauthorized)?;
        if claims.username.is_empty() {
            return Err(Error::Unauthorized);
        }

        self.check_revocation(user_id, claims.iat).await?;

        Ok(AuthUser {
            user_id,
            username: claims.username,
            iat: claims.iat,
            exp: claims.exp,
            jti: claims.jti,
        })
    }

    /// Reject tokens issued strictly before the user's revocation epoch
    async fn check_revocation(&self, user_id: Uuid, iat: i64) -> Result<()> {
        let Some(pool) = &self.redis else {
            return Ok(());
        };

        let key = revocation_key(user_id);
        let lookup = cache::with_data_timeout(async {
            let mut conn = pool.get().await?;
            let epoch: Option<String> = redis::cmd("GET")
                .arg(&key)
                .query_async(conn.deref_mut())
                .await
                .map_err(Error::from)?;
            Ok(epoch)
        })
        .await;

        match lookup {
            Ok(Some(epoch)) => {
                if issued_before_epoch(iat, &epoch) {
                    return Err(Error::Unauthorized);
                }
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => {
                if self.revocation_fail_open {
                    tracing::warn!(
                        user_id = %user_id,
                        error = %e,
                        "revocation cache unreachable, accepting token (fail-open)"
                    );
                    Ok(())
                } else {
                    Err(Error::ServiceUnavailable(
                        "revocation state unavailable".to_string(),
                    ))
                }
            }
        }
    }

    /// Record a revocation epoch for the user: every token issued before now
    /// becomes invalid (while the cache is reachable)
    pub async fn invalidate_all(&self, user_id: Uuid) -> Result<()> {
        let Some(pool) = &self.redis else {
            tracing::warn!(
                user_id = %user_id,
                "no cache configured; existing tokens will only expire naturally"
            );
            return Ok(());
        };

        let key = revocation_key(user_id);
        let epoch = Utc::now().to_rfc3339();
        cache::with_data_timeout(async {
            let mut conn = pool.get().await?;
            // No TTL: the epoch stays until overwritten.
            redis::cmd("SET")
                .arg(&key)
                .arg(&epoch)
                .query_async::<()>(conn.deref_mut())
                .await
                .map_err(Error::from)?;
            Ok(())
        })
        .await
    }
}

fn revocation_key(user_id: Uuid) -> String {
    format!("token:revoke:{}", user_id)
}

/// Strict comparison against the revocation epoch: a token issued in the
/// same second as the epoch write survives, anything earlier does not.
/// An unparseable epoch means a writer we do not understand; treat it as
/// revoke-everything.
fn issued_before_epoch(iat: i64, epoch_rfc3339: &str) -> bool {
    let epoch_ts = DateTime::parse_from_rfc3339(epoch_rfc3339)
        .map(|t| t.with_timezone(&Utc).timestamp())
        .unwrap_or(i64::MAX);
    iat < epoch_ts
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn manager() -> TokenManager {
        let config = AuthConfig {
            token_secret: "0123456789abcdef0123456789abcdef".to_string(),
            access_ttl_secs: 3600,
            stepup_ttl_secs: 300,
            login_session_ttl_secs: 60,
            stepup_session_ttl_secs: 300,
            pbkdf2_iterations: 1000,
            invite_only: false,
            revocation_fail_open: true,
        };
        TokenManager::new(&config, None)
    }

    #[tokio::test]
    async fn issue_parse_round_trip() {
        let mgr = manager();
        let user_id = Uuid::new_v4();

        let issued = mgr.issue(user_id, "alice", TokenKind::Access).unwrap();
        assert_eq!(issued.expires_in_seconds, 3600);

        let parsed = mgr.parse(&issued.token, TokenKind::Access).await.unwrap();
        assert_eq!(parsed.user_id, user_id);
        assert_eq!(parsed.username, "alice");
        assert!(parsed.jti.is_none());
    }

    #[tokio::test]
    async fn stepup_tokens_carry_a_jti() {
        let mgr = manager();
        let issued = mgr
            .issue(Uuid::new_v4(), "alice", TokenKind::Stepup)
            .unwrap();
        assert_eq!(issued.expires_in_seconds, 300);

        let parsed = mgr.parse(&issued.token, TokenKind::Stepup).await.unwrap();
        let jti = parsed.jti.expect("step-up token must carry a jti");
        assert!(Uuid::parse_str(&jti).is_ok());
    }

    #[tokio::test]
    async fn kind_mismatch_is_rejected() {
        let mgr = manager();
        let stepup = mgr
            .issue(Uuid::new_v4(), "alice", TokenKind::Stepup)
            .unwrap();
        let access = mgr.issue(Uuid::new_v4(), "alice", TokenKind::Access).unwrap();

        assert!(matches!(
            mgr.parse(&stepup.token, TokenKind::Access).await,
            Err(Error::Unauthorized)
        ));
        assert!(matches!(
            mgr.parse(&access.token, TokenKind::Stepup).await,
            Err(Error::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let mgr = manager();
        let past = Utc::now() - ChronoDuration::hours(2);
        let issued = mgr
            .issue_at(Uuid::new_v4(), "alice", TokenKind::Access, past)
            .unwrap();

        assert!(matches!(
            mgr.parse(&issued.token, TokenKind::Access).await,
            Err(Error::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn token_in_its_expiry_second_is_rejected() {
        let mgr = manager();
        // Back-date issuance by exactly the access TTL, so exp lands on the
        // current second. Strict `exp > now` must refuse it (and if the
        // clock ticks over mid-test, the token is simply expired — the
        // outcome is rejection either way).
        let at_expiry = Utc::now() - ChronoDuration::seconds(3600);
        let issued = mgr
            .issue_at(Uuid::new_v4(), "alice", TokenKind::Access, at_expiry)
            .unwrap();

        assert!(matches!(
            mgr.parse(&issued.token, TokenKind::Access).await,
            Err(Error::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn tampered_token_is_rejected() {
        let mgr = manager();
        let issued = mgr.issue(Uuid::new_v4(), "alice", TokenKind::Access).unwrap();

        let mut tampered = issued.token.clone();
        // Flip a character in the signature segment.
        let last = tampered.pop().unwrap();
        tampered.push(if last == 'A' { 'B' } else { 'A' });

        assert!(matches!(
            mgr.parse(&tampered, TokenKind::Access).await,
            Err(Error::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn token_signed_with_other_secret_is_rejected() {
        let mgr = manager();

        let other = {
            let config = AuthConfig {
                token_secret: "another-secret-another-secret-ok".to_string(),
                access_ttl_secs: 3600,
                stepup_ttl_secs: 300,
                login_session_ttl_secs: 60,
                stepup_session_ttl_secs: 300,
                pbkdf2_iterations: 1000,
                invite_only: false,
                revocation_fail_open: true,
            };
            TokenManager::new(&config, None)
        };

        let foreign = other.issue(Uuid::new_v4(), "alice", TokenKind::Access).unwrap();
        assert!(matches!(
            mgr.parse(&foreign.token, TokenKind::Access).await,
            Err(Error::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn garbage_tokens_are_rejected() {
        let mgr = manager();
        for junk in ["", "a.b.c", "not-a-token", "eyJhbGciOiJub25lIn0..e30"] {
            assert!(matches!(
                mgr.parse(junk, TokenKind::Access).await,
                Err(Error::Unauthorized)
            ));
        }
    }

    #[test]
    fn revocation_key_layout() {
        let id = Uuid::parse_str("00000000-0000-0000-0000-000000000001").unwrap();
        assert_eq!(
            revocation_key(id),
            "token:revoke:00000000-0000-0000-0000-000000000001"
        );
    }

    #[test]
    fn revocation_epoch_comparison_is_strict() {
        let epoch = "2024-06-01T12:00:00+00:00";
        let epoch_ts = DateTime::parse_from_rfc3339(epoch).unwrap().timestamp();

        // Issued before the epoch: revoked.
        assert!(issued_before_epoch(epoch_ts - 1, epoch));
        // Issued in the epoch's own second: survives (strict less-than).
        assert!(!issued_before_epoch(epoch_ts, epoch));
        assert!(!issued_before_epoch(epoch_ts + 1, epoch));
    }

    #[test]
    fn unparseable_epoch_revokes_everything() {
        assert!(issued_before_epoch(i64::MAX - 1, "not-a-timestamp"));
        assert!(issued_before_epoch(0, ""));
    }
}
