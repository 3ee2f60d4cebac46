//! Sliding-window rate limiter with fraud heuristics and a TTL block list.
//!
//! Windows live in process memory, one slot per `(user, action, period)`,
//! guarded per key so contention stays confined to the same slot. Windows
//! advance lazily on read. `check` is the advisory pre-filter used at
//! enqueue time; `record` is the enforcement point and consumes quota
//! atomically, so concurrent callers can never push a window past its cap.

mod fraud;
pub mod rules;

pub use fraud::{FraudAssessment, FraudDetector};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Duration, Utc};
use openpenpal_core::clock::Clock;
use openpenpal_core::error::CoreError;
use openpenpal_core::ratelimit::{ActionContext, RateDecision, RatePeriod, RateRule};
use openpenpal_core::user::UserRole;
use uuid::Uuid;

use crate::config::FraudConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct WindowKey {
    user_id: Uuid,
    action_hash: u64,
    period: RatePeriod,
}

fn action_hash(action: &str) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    action.hash(&mut hasher);
    hasher.finish()
}

#[derive(Debug, Clone, Copy)]
struct Window {
    window_start: DateTime<Utc>,
    count: u32,
    points: i64,
}

impl Window {
    fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            window_start: now,
            count: 0,
            points: 0,
        }
    }

    /// Lazy advance: when the window has fully elapsed, it restarts at
    /// the current instant.
    fn advanced(self, now: DateTime<Utc>, width: Duration) -> Self {
        if now - self.window_start >= width {
            Self::fresh(now)
        } else {
            self
        }
    }
}

pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    rules: HashMap<String, Vec<RateRule>>,
    windows: RwLock<HashMap<WindowKey, Arc<Mutex<Window>>>>,
    blocks: Mutex<HashMap<Uuid, DateTime<Utc>>>,
    fraud: FraudDetector,
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>, rules: Vec<RateRule>, fraud_cfg: FraudConfig) -> Self {
        // One rule per (action, period): a duplicate overrides its
        // predecessor, so `record` never locks the same window twice.
        let mut by_action: HashMap<String, Vec<RateRule>> = HashMap::new();
        for rule in rules {
            let slot = by_action.entry(rule.action.clone()).or_default();
            match slot.iter_mut().find(|r| r.period == rule.period) {
                Some(existing) => *existing = rule,
                None => slot.push(rule),
            }
        }
        Self {
            fraud: FraudDetector::new(Arc::clone(&clock), fraud_cfg),
            clock,
            rules: by_action,
            windows: RwLock::new(HashMap::new()),
            blocks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_default_rules(clock: Arc<dyn Clock>) -> Self {
        Self::new(clock, rules::default_rules(), FraudConfig::default())
    }

    fn slot(&self, key: WindowKey) -> Arc<Mutex<Window>> {
        if let Some(slot) = self.windows.read().expect("windows poisoned").get(&key) {
            return Arc::clone(slot);
        }
        let mut map = self.windows.write().expect("windows poisoned");
        Arc::clone(
            map.entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(Window::fresh(self.clock.now())))),
        )
    }

    /// Advisory check: would `points` worth of `action` fit every
    /// configured rule right now? Does not consume quota.
    pub fn check(&self, user_id: Uuid, role: UserRole, action: &str, points: i64) -> RateDecision {
        let now = self.clock.now();
        let Some(rules) = self.rules.get(action) else {
            return RateDecision::allow();
        };
        for rule in rules {
            let (max_count, max_points) = rule.caps_for(role);
            let key = WindowKey {
                user_id,
                action_hash: action_hash(action),
                period: rule.period,
            };
            let slot = self.slot(key);
            let window = slot.lock().expect("window poisoned");
            let current = window.advanced(now, rule.period.window());
            if current.count + 1 > max_count || current.points + points > max_points {
                return RateDecision {
                    allowed: false,
                    period: Some(rule.period),
                    current_count: current.count,
                    max_count,
                    current_points: current.points,
                    max_points,
                };
            }
        }
        RateDecision::allow()
    }

    /// Enforcing consume: re-checks every rule and increments all windows
    /// while the per-key locks are held, so concurrent recorders can
    /// never push a window past its cap.
    pub fn record(
        &self,
        user_id: Uuid,
        role: UserRole,
        action: &str,
        points: i64,
    ) -> Result<(), CoreError> {
        let now = self.clock.now();
        let Some(rules) = self.rules.get(action) else {
            return Ok(());
        };
        // Lock every involved window up front, in period order, so two
        // recorders cannot interleave between rules.
        let mut locked: Vec<(Arc<Mutex<Window>>, &RateRule)> = Vec::with_capacity(rules.len());
        for rule in rules {
            let key = WindowKey {
                user_id,
                action_hash: action_hash(action),
                period: rule.period,
            };
            locked.push((self.slot(key), rule));
        }
        let mut guards = Vec::with_capacity(locked.len());
        for (slot, rule) in &locked {
            guards.push((slot.lock().expect("window poisoned"), *rule));
        }
        for (guard, rule) in guards.iter_mut() {
            let (max_count, max_points) = rule.caps_for(role);
            let current = guard.advanced(now, rule.period.window());
            if current.count + 1 > max_count || current.points + points > max_points {
                return Err(CoreError::LimitExceeded {
                    period: rule.period,
                    current_count: current.count,
                    max_count,
                    current_points: current.points,
                    max_points,
                });
            }
            **guard = current;
        }
        for (guard, _) in guards.iter_mut() {
            guard.count += 1;
            guard.points += points;
        }
        Ok(())
    }

    /// Compensation for a consume whose downstream work failed.
    pub fn rollback(&self, user_id: Uuid, action: &str, points: i64) {
        let Some(rules) = self.rules.get(action) else {
            return;
        };
        for rule in rules {
            let key = WindowKey {
                user_id,
                action_hash: action_hash(action),
                period: rule.period,
            };
            let slot = self.slot(key);
            let mut window = slot.lock().expect("window poisoned");
            window.count = window.count.saturating_sub(1);
            window.points -= points;
        }
    }

    // ── Fraud ─────────────────────────────────────────────────

    /// Record the attempt in the fraud log and evaluate the heuristics.
    pub fn detect_anomalous(
        &self,
        user_id: Uuid,
        action: &str,
        ctx: &ActionContext,
    ) -> Option<FraudAssessment> {
        self.fraud.observe(user_id, action, ctx)
    }

    // ── Blocks ────────────────────────────────────────────────

    pub fn block_user(&self, user_id: Uuid, ttl: Duration) {
        let until = self.clock.now() + ttl;
        self.blocks
            .lock()
            .expect("blocks poisoned")
            .insert(user_id, until);
        tracing::warn!("user {user_id} blocked until {until}");
    }

    pub fn unblock_user(&self, user_id: Uuid) {
        self.blocks.lock().expect("blocks poisoned").remove(&user_id);
    }

    /// TTL entries expire lazily; an expired entry unblocks immediately.
    pub fn is_blocked(&self, user_id: Uuid) -> bool {
        let now = self.clock.now();
        let mut blocks = self.blocks.lock().expect("blocks poisoned");
        match blocks.get(&user_id) {
            Some(until) if *until > now => true,
            Some(_) => {
                blocks.remove(&user_id);
                false
            }
            None => false,
        }
    }
}
