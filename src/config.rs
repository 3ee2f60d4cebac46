//! Application configuration, read from the environment.
//!
//! Every knob has a default good enough for local development; binaries
//! call `dotenvy::dotenv().ok()` before `AppConfig::from_env()`.

use std::time::Duration;

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreKind {
    Memory,
    Postgres,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub store: StoreKind,
    pub database_url: String,
    pub auth: AuthConfig,
    pub dispatch: DispatchConfig,
    pub worker: WorkerConfig,
    pub fraud: FraudConfig,
    pub credit_expiry_window_days: i64,
    pub registered_school_codes: Vec<String>,
    pub bus_topic_capacity: usize,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_ttl: Duration,
    /// A refresh within this window of expiry mints a new token.
    pub refresh_window: Duration,
    pub bcrypt_cost: u32,
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Pending-task sweep interval.
    pub sweep_interval: Duration,
    /// How long a task may sit in `assigned` before the reaper reverts it.
    pub assignment_timeout: Duration,
    pub reaper_interval: Duration,
    pub max_reassignments: i32,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub pool_size: usize,
    pub poll_interval: Duration,
    /// Failed tasks older than this are never retried.
    pub retry_max_age: chrono::Duration,
    pub retry_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct FraudConfig {
    /// Distinct actions within `burst_window` that trip the burst rule.
    pub burst_limit: usize,
    pub burst_window: chrono::Duration,
    /// Consecutive same-device different-user actions that trip the
    /// shared-device rule.
    pub shared_device_run: usize,
    /// History length consulted by the new-device rule.
    pub device_history: usize,
}

impl Default for FraudConfig {
    fn default() -> Self {
        Self {
            burst_limit: 10,
            burst_window: chrono::Duration::seconds(60),
            shared_device_run: 3,
            device_history: 20,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let store = match env_string("OPENPENPAL_STORE", "memory").as_str() {
            "postgres" => StoreKind::Postgres,
            _ => StoreKind::Memory,
        };
        Self {
            bind_addr: env_string("OPENPENPAL_BIND_ADDR", "0.0.0.0:8080"),
            store,
            database_url: env_string(
                "OPENPENPAL_DATABASE_URL",
                "postgresql://localhost/openpenpal",
            ),
            auth: AuthConfig {
                jwt_secret: env_string("OPENPENPAL_JWT_SECRET", "dev-secret-change-me"),
                token_ttl: Duration::from_secs(env_parse("OPENPENPAL_TOKEN_TTL_SECS", 86_400)),
                refresh_window: Duration::from_secs(env_parse(
                    "OPENPENPAL_REFRESH_WINDOW_SECS",
                    3_600,
                )),
                bcrypt_cost: env_parse("OPENPENPAL_BCRYPT_COST", 10),
            },
            dispatch: DispatchConfig {
                sweep_interval: Duration::from_secs(env_parse("OPENPENPAL_SWEEP_SECS", 30)),
                assignment_timeout: Duration::from_secs(env_parse(
                    "OPENPENPAL_ASSIGNMENT_TIMEOUT_SECS",
                    7_200,
                )),
                reaper_interval: Duration::from_secs(env_parse("OPENPENPAL_REAPER_SECS", 60)),
                max_reassignments: env_parse("OPENPENPAL_MAX_REASSIGNMENTS", 3),
            },
            worker: WorkerConfig {
                pool_size: env_parse("OPENPENPAL_WORKER_POOL_SIZE", 10),
                poll_interval: Duration::from_secs(env_parse("OPENPENPAL_WORKER_POLL_SECS", 30)),
                retry_max_age: chrono::Duration::hours(env_parse(
                    "OPENPENPAL_RETRY_MAX_AGE_HOURS",
                    72,
                )),
                retry_interval: Duration::from_secs(env_parse(
                    "OPENPENPAL_RETRY_INTERVAL_SECS",
                    300,
                )),
            },
            fraud: FraudConfig::default(),
            credit_expiry_window_days: env_parse("OPENPENPAL_CREDIT_EXPIRY_DAYS", 365),
            registered_school_codes: env_string("OPENPENPAL_SCHOOL_CODES", "BJDX01,QHDX01,PKU001")
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            bus_topic_capacity: env_parse("OPENPENPAL_BUS_CAPACITY", 256),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = AppConfig::from_env();
        assert_eq!(cfg.dispatch.assignment_timeout, Duration::from_secs(7_200));
        assert_eq!(cfg.worker.pool_size, 10);
        assert_eq!(cfg.worker.retry_max_age, chrono::Duration::hours(72));
        assert!(cfg.registered_school_codes.len() >= 3);
        assert_eq!(cfg.fraud.burst_limit, 10);
    }
}
