/// JWT token generation and validation
///
/// Access and refresh tokens are HS256-signed with the same process-wide
/// secret, injected through [`JwtConfig`]. Claims carry the user's id, the
/// slug of the active role and the onboarding status of that role under the
/// `user-info` key, plus a unique `jti` used for blocklisting.
///
/// # Token Types
///
/// - **Access Token**: short-lived (default 1 hour)
/// - **Refresh Token**: long-lived (default 30 days)
///
/// An "expired" pair (already past `exp`) is minted on signout and account
/// deletion so that clients overwrite whatever they hold.
///
/// # Example
///
/// ```
/// use toq_shared::auth::jwt::{JwtConfig, TokenIssuer, UserInfos};
/// use toq_shared::models::{RoleSlug, RoleStatus};
///
/// let issuer = TokenIssuer::new(JwtConfig::for_secret("test-secret-key-at-least-32-bytes-long"));
/// let infos = UserInfos { id: 42, role: RoleSlug::Owner, profile_status: RoleStatus::Active };
///
/// let pair = issuer.mint_pair(&infos).unwrap();
/// let claims = issuer.validate_access(&pair.access_token).unwrap();
/// assert_eq!(claims.user_info.id, 42);
/// ```

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{RoleSlug, RoleStatus};

const ISSUER: &str = "toq";

/// JWT-related errors
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    /// Token creation failed
    #[error("Failed to create token: {0}")]
    CreateError(String),

    /// Token validation failed
    #[error("Failed to validate token: {0}")]
    ValidationError(String),

    /// Token has expired
    #[error("Token has expired")]
    Expired,

    /// Wrong token type presented
    #[error("Expected {expected} token")]
    WrongType { expected: &'static str },
}

/// Token type discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        }
    }
}

/// Identity embedded in every token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfos {
    pub id: i64,
    pub role: RoleSlug,
    pub profile_status: RoleStatus,
}

/// JWT claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "user-info")]
    pub user_info: UserInfos,

    /// Issuer (always "toq")
    pub iss: String,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    /// Expiration time (Unix timestamp)
    pub exp: i64,

    /// Unique token id, blocklisted on revocation
    pub jti: String,

    pub token_type: TokenType,
}

impl Claims {
    pub fn new(user_info: UserInfos, token_type: TokenType, expires_in: Duration) -> Self {
        let now = Utc::now();
        Self {
            user_info,
            iss: ISSUER.to_string(),
            iat: now.timestamp(),
            exp: (now + expires_in).timestamp(),
            jti: Uuid::new_v4().to_string(),
            token_type,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() >= self.exp
    }

    /// Seconds left before expiry, `None` once expired
    pub fn remaining_ttl(&self) -> Option<u64> {
        let left = self.exp - Utc::now().timestamp();
        if left > 0 {
            Some(left as u64)
        } else {
            None
        }
    }
}

/// Signing configuration
#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

impl JwtConfig {
    /// Default TTLs with the given secret
    pub fn for_secret(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            access_ttl: Duration::hours(1),
            refresh_ttl: Duration::days(30),
        }
    }
}

/// Access/refresh pair handed to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

/// Creates a signed token from claims
///
/// # Errors
///
/// Returns `JwtError::CreateError` if encoding fails.
pub fn create_token(claims: &Claims, secret: &str) -> Result<String, JwtError> {
    let header = Header::new(Algorithm::HS256);
    let key = EncodingKey::from_secret(secret.as_bytes());

    encode(&header, claims, &key)
        .map_err(|e| JwtError::CreateError(format!("Token encoding failed: {}", e)))
}

/// Validates signature, issuer and expiry of a token
///
/// # Errors
///
/// - `JwtError::Expired` if `exp` has passed
/// - `JwtError::ValidationError` for a bad signature or malformed token
pub fn validate_token(token: &str, secret: &str) -> Result<Claims, JwtError> {
    let key = DecodingKey::from_secret(secret.as_bytes());

    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[ISSUER]);
    validation.validate_exp = true;
    validation.leeway = 0;

    let token_data = decode::<Claims>(token, &key, &validation).map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::Expired,
        _ => JwtError::ValidationError(format!("Token validation failed: {}", e)),
    })?;

    Ok(token_data.claims)
}

/// Mints and validates tokens with an injected [`JwtConfig`]
#[derive(Debug, Clone)]
pub struct TokenIssuer {
    config: Arc<JwtConfig>,
}

impl TokenIssuer {
    pub fn new(config: JwtConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &JwtConfig {
        &self.config
    }

    /// Mints a fresh access/refresh pair
    pub fn mint_pair(&self, infos: &UserInfos) -> Result<TokenPair, JwtError> {
        self.mint_with_ttls(infos, self.config.access_ttl, self.config.refresh_ttl)
    }

    /// Mints a pair that is already expired
    pub fn mint_expired_pair(&self, infos: &UserInfos) -> Result<TokenPair, JwtError> {
        self.mint_with_ttls(infos, Duration::seconds(-1), Duration::seconds(-1))
    }

    fn mint_with_ttls(
        &self,
        infos: &UserInfos,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Result<TokenPair, JwtError> {
        let access = Claims::new(*infos, TokenType::Access, access_ttl);
        let refresh = Claims::new(*infos, TokenType::Refresh, refresh_ttl);

        Ok(TokenPair {
            access_token: create_token(&access, &self.config.secret)?,
            refresh_token: create_token(&refresh, &self.config.secret)?,
            access_expires_at: timestamp(access.exp),
            refresh_expires_at: timestamp(refresh.exp),
        })
    }

    pub fn validate_access(&self, token: &str) -> Result<Claims, JwtError> {
        self.validate_typed(token, TokenType::Access)
    }

    pub fn validate_refresh(&self, token: &str) -> Result<Claims, JwtError> {
        self.validate_typed(token, TokenType::Refresh)
    }

    fn validate_typed(&self, token: &str, expected: TokenType) -> Result<Claims, JwtError> {
        let claims = validate_token(token, &self.config.secret)?;
        if claims.token_type != expected {
            return Err(JwtError::WrongType {
                expected: expected.as_str(),
            });
        }
        Ok(claims)
    }
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-key-at-least-32-bytes-long";

    fn infos() -> UserInfos {
        UserInfos {
            id: 7,
            role: RoleSlug::Realtor,
            profile_status: RoleStatus::PendingImages,
        }
    }

    #[test]
    fn test_create_and_validate_token() {
        let claims = Claims::new(infos(), TokenType::Access, Duration::hours(1));
        let token = create_token(&claims, SECRET).expect("Should create token");

        let validated = validate_token(&token, SECRET).expect("Should validate token");
        assert_eq!(validated.user_info, infos());
        assert_eq!(validated.iss, "toq");
        assert_eq!(validated.jti, claims.jti);
    }

    #[test]
    fn test_claims_serialize_user_info_key() {
        let claims = Claims::new(infos(), TokenType::Access, Duration::hours(1));
        let json = serde_json::to_value(&claims).unwrap();
        assert_eq!(json["user-info"]["id"], 7);
        assert_eq!(json["user-info"]["role"], "realtor");
    }

    #[test]
    fn test_validate_with_wrong_secret() {
        let claims = Claims::new(infos(), TokenType::Access, Duration::hours(1));
        let token = create_token(&claims, SECRET).unwrap();
        assert!(validate_token(&token, "another-secret-key-at-least-32-bytes").is_err());
    }

    #[test]
    fn test_pair_types_are_enforced() {
        let issuer = TokenIssuer::new(JwtConfig::for_secret(SECRET));
        let pair = issuer.mint_pair(&infos()).unwrap();

        assert!(issuer.validate_access(&pair.access_token).is_ok());
        assert!(issuer.validate_refresh(&pair.refresh_token).is_ok());
        assert!(matches!(
            issuer.validate_refresh(&pair.access_token),
            Err(JwtError::WrongType { expected: "refresh" })
        ));
        assert!(pair.refresh_expires_at > pair.access_expires_at);
    }

    #[test]
    fn test_expired_pair_is_rejected() {
        let issuer = TokenIssuer::new(JwtConfig::for_secret(SECRET));
        let pair = issuer.mint_expired_pair(&infos()).unwrap();

        assert!(matches!(
            issuer.validate_access(&pair.access_token),
            Err(JwtError::Expired)
        ));
        assert!(pair.access_expires_at <= Utc::now());
    }

    #[test]
    fn test_remaining_ttl() {
        let live = Claims::new(infos(), TokenType::Access, Duration::minutes(10));
        let ttl = live.remaining_ttl().unwrap();
        assert!(ttl > 590 && ttl <= 600);

        let dead = Claims::new(infos(), TokenType::Access, Duration::seconds(-5));
        assert!(dead.remaining_ttl().is_none());
        assert!(dead.is_expired());
    }
}
