//! Bearer tokens: HMAC-SHA256 (HS256) over the claims below.

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use openpenpal_core::courier::CourierClaims;
use openpenpal_core::error::CoreError;
use openpenpal_core::identity::{permissions_for_role, Identity, Permission};
use openpenpal_core::user::{User, UserRole};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AuthConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: Uuid,
    pub username: String,
    pub email: String,
    pub role: UserRole,
    pub school_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub courier: Option<CourierClaims>,
    pub permissions: Vec<Permission>,
    pub iat: i64,
    pub exp: i64,
}

impl TokenClaims {
    pub fn for_user(
        user: &User,
        courier: Option<CourierClaims>,
        cfg: &AuthConfig,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            sub: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            role: user.role,
            school_code: user.school_code.clone(),
            courier,
            permissions: permissions_for_role(user.role).into_iter().collect(),
            iat: now.timestamp(),
            exp: (now + chrono::Duration::from_std(cfg.token_ttl).unwrap_or_default()).timestamp(),
        }
    }

    /// Seconds until expiry, negative once past.
    pub fn remaining(&self, now: DateTime<Utc>) -> i64 {
        self.exp - now.timestamp()
    }

    /// The verified identity carried by this token. Permissions are
    /// re-resolved from the role table so a stale token cannot smuggle
    /// capabilities its role no longer grants.
    pub fn identity(&self) -> Identity {
        Identity {
            user_id: self.sub,
            username: self.username.clone(),
            email: self.email.clone(),
            role: self.role,
            school_code: self.school_code.clone(),
            courier: self.courier.clone(),
            permissions: permissions_for_role(self.role),
        }
    }
}

pub fn mint(claims: &TokenClaims, cfg: &AuthConfig) -> Result<String, CoreError> {
    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(cfg.jwt_secret.as_bytes()),
    )
    .map_err(|e| CoreError::Internal(anyhow::anyhow!("token mint: {e}")))
}

pub fn verify(token: &str, cfg: &AuthConfig) -> Result<TokenClaims, CoreError> {
    let mut validation = Validation::default();
    validation.validate_exp = true;
    decode::<TokenClaims>(
        token,
        &DecodingKey::from_secret(cfg.jwt_secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| CoreError::Unauthorized(format!("invalid token: {e}")))
}
