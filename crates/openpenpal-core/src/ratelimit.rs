//! Rate-limit vocabulary shared between the engine, the error taxonomy
//! and the wire surface. The sliding-window engine itself lives in the
//! application crate.

use std::fmt;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::user::UserRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatePeriod {
    Daily,
    Weekly,
    Monthly,
}

impl RatePeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }

    pub fn window(&self) -> Duration {
        match self {
            Self::Daily => Duration::hours(24),
            Self::Weekly => Duration::days(7),
            Self::Monthly => Duration::days(30),
        }
    }
}

impl fmt::Display for RatePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FraudSeverity {
    Low,
    Medium,
    High,
}

impl fmt::Display for FraudSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        f.write_str(s)
    }
}

/// One configured quota on an action within one period. `role_overrides`
/// lets higher courier levels carry higher caps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateRule {
    pub action: String,
    pub period: RatePeriod,
    pub max_count: u32,
    pub max_points: i64,
    #[serde(default)]
    pub role_overrides: Vec<RoleOverride>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleOverride {
    pub role: UserRole,
    pub max_count: u32,
    pub max_points: i64,
}

impl RateRule {
    pub fn caps_for(&self, role: UserRole) -> (u32, i64) {
        self.role_overrides
            .iter()
            .find(|o| o.role == role)
            .map(|o| (o.max_count, o.max_points))
            .unwrap_or((self.max_count, self.max_points))
    }
}

/// Outcome of a `check` call, also serialized into 429 responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateDecision {
    pub allowed: bool,
    pub period: Option<RatePeriod>,
    pub current_count: u32,
    pub max_count: u32,
    pub current_points: i64,
    pub max_points: i64,
}

impl RateDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            period: None,
            current_count: 0,
            max_count: 0,
            current_points: 0,
            max_points: 0,
        }
    }
}

/// Request fingerprint fed to the fraud heuristics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionContext {
    pub ip: Option<String>,
    pub device_id: Option<String>,
    pub user_agent: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows() {
        assert_eq!(RatePeriod::Daily.window(), Duration::hours(24));
        assert_eq!(RatePeriod::Weekly.window(), Duration::days(7));
        assert_eq!(RatePeriod::Monthly.window(), Duration::days(30));
    }

    #[test]
    fn role_override_caps() {
        let rule = RateRule {
            action: "courier_delivery".into(),
            period: RatePeriod::Daily,
            max_count: 20,
            max_points: 200,
            role_overrides: vec![RoleOverride {
                role: UserRole::CourierLevel3,
                max_count: 100,
                max_points: 1000,
            }],
        };
        assert_eq!(rule.caps_for(UserRole::CourierLevel1), (20, 200));
        assert_eq!(rule.caps_for(UserRole::CourierLevel3), (100, 1000));
    }
}
