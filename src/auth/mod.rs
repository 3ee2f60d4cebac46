//! Registration, login, and token refresh.

pub mod password;
pub mod token;

use std::sync::Arc;

use openpenpal_core::clock::Clock;
use openpenpal_core::courier::CourierClaims;
use openpenpal_core::error::CoreError;
use openpenpal_core::ports::{CourierStore, UserStore};
use openpenpal_core::user::{validate_school_code, User, UserRole};
use uuid::Uuid;

use crate::auth::token::TokenClaims;
use crate::config::AuthConfig;

pub struct AuthService {
    users: Arc<dyn UserStore>,
    couriers: Arc<dyn CourierStore>,
    clock: Arc<dyn Clock>,
    cfg: AuthConfig,
    school_codes: Vec<String>,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserStore>,
        couriers: Arc<dyn CourierStore>,
        clock: Arc<dyn Clock>,
        cfg: AuthConfig,
        school_codes: Vec<String>,
    ) -> Self {
        Self {
            users,
            couriers,
            clock,
            cfg,
            school_codes,
        }
    }

    /// Registration always lands on the base role; promotion to courier
    /// goes through the hierarchy service.
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
        school_code: &str,
    ) -> Result<User, CoreError> {
        if username.len() < 3 {
            return Err(CoreError::Validation(
                "username must be at least 3 characters".into(),
            ));
        }
        if !email.contains('@') {
            return Err(CoreError::Validation(format!("invalid email: {email}")));
        }
        if password.len() < 8 {
            return Err(CoreError::Validation(
                "password must be at least 8 characters".into(),
            ));
        }
        validate_school_code(school_code, &self.school_codes)?;

        let now = self.clock.now();
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: email.to_string(),
            password_hash: password::hash(password, self.cfg.bcrypt_cost)?,
            role: UserRole::User,
            school_code: school_code.to_string(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        self.users.create_user(&user).await?;
        tracing::info!("user {} registered ({})", user.username, user.school_code);
        Ok(user)
    }

    /// Credential failures are indistinguishable: no username probing.
    pub async fn login(&self, username: &str, password: &str) -> Result<(String, User), CoreError> {
        let invalid = || CoreError::Unauthorized("invalid credentials".into());
        let user = self
            .users
            .find_by_username(username)
            .await?
            .ok_or_else(invalid)?;
        if !user.is_active || !password::verify(password, &user.password_hash) {
            return Err(invalid());
        }
        let courier = self
            .couriers
            .find_by_user(user.id)
            .await?
            .map(|c| CourierClaims::from(&c));
        let claims = TokenClaims::for_user(&user, courier, &self.cfg, self.clock.now());
        let token = token::mint(&claims, &self.cfg)?;
        Ok((token, user))
    }

    pub fn verify(&self, bearer: &str) -> Result<TokenClaims, CoreError> {
        token::verify(bearer, &self.cfg)
    }

    /// Mint a replacement token when the presented one is close enough to
    /// expiry. Outside the window the old token is still good; keep it.
    pub fn refresh(&self, bearer: &str) -> Result<String, CoreError> {
        let claims = token::verify(bearer, &self.cfg)?;
        let now = self.clock.now();
        let window = self.cfg.refresh_window.as_secs() as i64;
        if claims.remaining(now) > window {
            return Err(CoreError::Validation(format!(
                "token not within refresh window ({window}s before expiry)"
            )));
        }
        let mut renewed = claims;
        renewed.iat = now.timestamp();
        renewed.exp =
            (now + chrono::Duration::from_std(self.cfg.token_ttl).unwrap_or_default()).timestamp();
        token::mint(&renewed, &self.cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use openpenpal_core::clock::SystemClock;
    use std::time::Duration;

    fn service(ttl_secs: u64, refresh_secs: u64) -> (Arc<MemoryStore>, AuthService) {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = Arc::new(MemoryStore::new(Arc::clone(&clock)));
        let svc = AuthService::new(
            Arc::clone(&store) as _,
            Arc::clone(&store) as _,
            clock,
            AuthConfig {
                jwt_secret: "test-secret".into(),
                token_ttl: Duration::from_secs(ttl_secs),
                refresh_window: Duration::from_secs(refresh_secs),
                bcrypt_cost: 4,
            },
            vec!["BJDX01".into()],
        );
        (store, svc)
    }

    #[tokio::test]
    async fn register_login_roundtrip() {
        let (_, svc) = service(3600, 600);
        let user = svc
            .register("alice", "alice@x.io", "s3cret-pass", "BJDX01")
            .await
            .unwrap();
        assert_eq!(user.role, UserRole::User);
        assert_ne!(user.password_hash, "s3cret-pass");

        let (token, logged_in) = svc.login("alice", "s3cret-pass").await.unwrap();
        assert_eq!(logged_in.id, user.id);
        let claims = svc.verify(&token).unwrap();
        assert_eq!(claims.sub, user.id);

        let err = svc.login("alice", "wrong-password").await.unwrap_err();
        assert_eq!(err.http_status(), 401);
        let err = svc.login("nobody", "s3cret-pass").await.unwrap_err();
        assert_eq!(err.http_status(), 401);
    }

    #[tokio::test]
    async fn registration_validation() {
        let (_, svc) = service(3600, 600);
        assert!(svc.register("al", "a@x.io", "longenough", "BJDX01").await.is_err());
        assert!(svc
            .register("alice", "not-an-email", "longenough", "BJDX01")
            .await
            .is_err());
        assert!(svc.register("alice", "a@x.io", "short", "BJDX01").await.is_err());
        assert!(svc
            .register("alice", "a@x.io", "longenough", "ZZZZ99")
            .await
            .is_err());
        assert!(svc
            .register("alice", "a@x.io", "longenough", "BJD")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn refresh_only_near_expiry() {
        // TTL inside the refresh window: immediately refreshable.
        let (_, svc) = service(300, 600);
        svc.register("alice", "a@x.io", "longenough", "BJDX01")
            .await
            .unwrap();
        let (old_token, _) = svc.login("alice", "longenough").await.unwrap();
        let renewed = svc.refresh(&old_token).unwrap();
        assert!(svc.verify(&renewed).is_ok());

        // Fresh long-lived token: refresh refused.
        let (_, svc) = service(86_400, 600);
        svc.register("bob", "b@x.io", "longenough", "BJDX01")
            .await
            .unwrap();
        let (token, _) = svc.login("bob", "longenough").await.unwrap();
        let err = svc.refresh(&token).unwrap_err();
        assert_eq!(err.http_status(), 400);
    }

    #[tokio::test]
    async fn login_embeds_courier_claims() {
        let (store, svc) = service(3600, 600);
        svc.register("c1", "c1@x.io", "longenough", "BJDX01")
            .await
            .unwrap();
        let user = store.find_by_username("c1").await.unwrap().unwrap();
        let now = chrono::Utc::now();
        let courier = openpenpal_core::courier::Courier {
            id: Uuid::new_v4(),
            user_id: user.id,
            level: 1,
            managed_prefix: openpenpal_core::opcode::Prefix::parse("PK5F").unwrap(),
            status: openpenpal_core::courier::CourierStatus::Approved,
            task_count: 0,
            points: 0,
            created_at: now,
            updated_at: now,
        };
        store.create_courier(&courier).await.unwrap();

        let (token, _) = svc.login("c1", "longenough").await.unwrap();
        let claims = svc.verify(&token).unwrap();
        let embedded = claims.courier.expect("courier claims embedded");
        assert_eq!(embedded.courier_id, courier.id);
        assert_eq!(embedded.managed_prefix.as_str(), "PK5F");
    }
}
