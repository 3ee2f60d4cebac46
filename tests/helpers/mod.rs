//! Shared test harness: the full application wired onto the in-memory
//! store and a manual clock, with helpers for seeding, tokens, HTTP
//! round-trips and async polling.

#![allow(dead_code)]

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use http_body_util::BodyExt;
use openpenpal::api::state::AppState;
use openpenpal::api::build_router;
use openpenpal::config::{
    AppConfig, AuthConfig, DispatchConfig, FraudConfig, StoreKind, WorkerConfig,
};
use openpenpal::ratelimit::rules;
use openpenpal::store::memory::MemoryStore;
use openpenpal::store::Stores;
use openpenpal_core::clock::{Clock, ManualClock};
use openpenpal_core::courier::{Courier, CourierStatus};
use openpenpal_core::opcode::Prefix;
use openpenpal_core::ports::{CourierStore, UserStore};
use openpenpal_core::ratelimit::RateRule;
use openpenpal_core::user::{User, UserRole};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

pub struct TestApp {
    pub state: Arc<AppState>,
    pub clock: Arc<ManualClock>,
    pub store: Arc<MemoryStore>,
    pub shutdown: Arc<AtomicBool>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_rules(rules::default_rules())
    }

    pub fn with_rules(rate_rules: Vec<RateRule>) -> Self {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(MemoryStore::new(Arc::clone(&clock) as Arc<dyn Clock>));
        let stores = Stores::from_store(Arc::clone(&store));
        let config = AppConfig {
            bind_addr: "127.0.0.1:0".into(),
            store: StoreKind::Memory,
            database_url: String::new(),
            auth: AuthConfig {
                jwt_secret: "integration-test-secret".into(),
                token_ttl: StdDuration::from_secs(3600),
                refresh_window: StdDuration::from_secs(600),
                bcrypt_cost: 4,
            },
            dispatch: DispatchConfig {
                sweep_interval: StdDuration::from_millis(20),
                assignment_timeout: StdDuration::from_secs(7200),
                reaper_interval: StdDuration::from_millis(20),
                max_reassignments: 3,
            },
            worker: WorkerConfig {
                pool_size: 4,
                poll_interval: StdDuration::from_millis(10),
                retry_max_age: chrono::Duration::hours(72),
                retry_interval: StdDuration::from_millis(50),
            },
            fraud: FraudConfig::default(),
            credit_expiry_window_days: 365,
            registered_school_codes: vec!["BJDX01".into(), "QHDX01".into()],
            bus_topic_capacity: 256,
        };
        let state = AppState::build_with_rules(
            config,
            stores,
            Arc::clone(&clock) as Arc<dyn Clock>,
            rate_rules,
        );
        Self {
            state,
            clock,
            store,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Spawn every background loop; they stop when `self.shutdown` flips.
    pub fn spawn_background(&self) -> Vec<tokio::task::JoinHandle<()>> {
        self.state.spawn_background(Arc::clone(&self.shutdown))
    }

    pub fn router(&self) -> Router {
        build_router(Arc::clone(&self.state))
    }

    // ── Seeding ───────────────────────────────────────────────

    pub async fn seed_user(&self, username: &str, role: UserRole) -> User {
        let now = self.clock.now();
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: format!("{username}@openpenpal.test"),
            password_hash: "seeded".into(),
            role,
            school_code: "BJDX01".into(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        self.store.create_user(&user).await.expect("seed user");
        user
    }

    pub async fn seed_courier(&self, username: &str, level: u8, prefix: &str) -> (User, Courier) {
        let role = UserRole::for_courier_level(level).expect("valid level");
        let user = self.seed_user(username, role).await;
        let now = self.clock.now();
        let courier = Courier {
            id: Uuid::new_v4(),
            user_id: user.id,
            level,
            managed_prefix: Prefix::parse(prefix).expect("valid prefix"),
            status: CourierStatus::Approved,
            task_count: 0,
            points: 0,
            created_at: now,
            updated_at: now,
        };
        self.store
            .create_courier(&courier)
            .await
            .expect("seed courier");
        (user, courier)
    }

    /// Register through the real endpoint-backing service and log in.
    pub async fn register_and_login(&self, username: &str) -> (String, User) {
        self.state
            .auth
            .register(
                username,
                &format!("{username}@openpenpal.test"),
                "integration-pass",
                "BJDX01",
            )
            .await
            .expect("register");
        self.state
            .auth
            .login(username, "integration-pass")
            .await
            .expect("login")
    }

    /// Mint a token for a seeded user (password bypass: re-hash).
    pub async fn login_as(&self, user: &User) -> String {
        use openpenpal_core::courier::CourierClaims;
        let courier = self
            .store
            .find_by_user(user.id)
            .await
            .expect("courier lookup")
            .map(|c| CourierClaims::from(&c));
        let claims = openpenpal::auth::token::TokenClaims::for_user(
            user,
            courier,
            &self.state.config.auth,
            self.clock.now(),
        );
        openpenpal::auth::token::mint(&claims, &self.state.config.auth).expect("mint")
    }

    // ── HTTP ──────────────────────────────────────────────────

    pub async fn request(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .expect("request"),
            None => builder.body(Body::empty()).expect("request"),
        };
        let response = self.router().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    pub async fn get(&self, path: &str, token: &str) -> (StatusCode, Value) {
        self.request(Method::GET, path, Some(token), None).await
    }

    pub async fn post(&self, path: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, path, Some(token), Some(body))
            .await
    }

    pub async fn put(&self, path: &str, token: &str) -> (StatusCode, Value) {
        self.request(Method::PUT, path, Some(token), None).await
    }
}

/// Poll an async condition until it holds or the timeout passes.
pub async fn wait_until<F, Fut>(mut condition: F, timeout: StdDuration) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = std::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if std::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }
}
