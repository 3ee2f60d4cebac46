use thiserror::Error;

use crate::ratelimit::{FraudSeverity, RatePeriod};

/// Error taxonomy for the whole backbone. Every variant maps to one HTTP
/// status and one application code; handlers never invent their own.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("scope violation: {0}")]
    ScopeViolation(String),

    #[error("level mismatch: expected level {expected}, got {actual}")]
    LevelMismatch { expected: u8, actual: u8 },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already bound: {0}")]
    AlreadyBound(String),

    #[error("stale transition: {0}")]
    StaleTransition(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("insufficient credit: balance {balance}, requested {requested}")]
    InsufficientCredit { balance: i64, requested: i64 },

    #[error(
        "limit exceeded: {period} window at {current_count}/{max_count} actions, \
         {current_points}/{max_points} points"
    )]
    LimitExceeded {
        period: RatePeriod,
        current_count: u32,
        max_count: u32,
        current_points: i64,
        max_points: i64,
    },

    #[error("suspicious activity ({severity}): {reason}")]
    SuspiciousActivity {
        severity: FraudSeverity,
        reason: String,
    },

    #[error("user blocked: {0}")]
    UserBlocked(String),

    #[error("internal: {0}")]
    Internal(#[from] anyhow::Error),
}

impl CoreError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::Unauthorized(_) => 401,
            Self::PermissionDenied(_)
            | Self::ScopeViolation(_)
            | Self::LevelMismatch { .. }
            | Self::SuspiciousActivity { .. }
            | Self::UserBlocked(_) => 403,
            Self::NotFound(_) => 404,
            Self::AlreadyBound(_)
            | Self::StaleTransition(_)
            | Self::Conflict(_)
            | Self::InsufficientCredit { .. } => 409,
            Self::LimitExceeded { .. } => 429,
            Self::Internal(_) => 500,
        }
    }

    /// Application code carried in the response envelope. The 403 family
    /// fans out so policy rejections are distinguishable from authorization
    /// failures without parsing the message.
    pub fn app_code(&self) -> u16 {
        match self {
            Self::PermissionDenied(_) => 4030,
            Self::ScopeViolation(_) => 4031,
            Self::LevelMismatch { .. } => 4032,
            Self::UserBlocked(_) => 4033,
            Self::SuspiciousActivity { .. } => 4034,
            other => other.http_status(),
        }
    }

    /// Transient persistence failures are retried once before surfacing.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Internal(e) => {
                let msg = e.to_string();
                msg.contains("connection reset") || msg.contains("deadlock detected")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_covers_taxonomy() {
        assert_eq!(CoreError::Validation("x".into()).http_status(), 400);
        assert_eq!(CoreError::Unauthorized("x".into()).http_status(), 401);
        assert_eq!(CoreError::ScopeViolation("x".into()).http_status(), 403);
        assert_eq!(CoreError::NotFound("x".into()).http_status(), 404);
        assert_eq!(CoreError::AlreadyBound("x".into()).http_status(), 409);
        assert_eq!(CoreError::StaleTransition("x".into()).http_status(), 409);
        assert_eq!(
            CoreError::LimitExceeded {
                period: RatePeriod::Daily,
                current_count: 3,
                max_count: 3,
                current_points: 0,
                max_points: 100,
            }
            .http_status(),
            429
        );
    }

    #[test]
    fn policy_codes_are_distinct() {
        let blocked = CoreError::UserBlocked("u1".into());
        let suspicious = CoreError::SuspiciousActivity {
            severity: FraudSeverity::High,
            reason: "burst".into(),
        };
        assert_eq!(blocked.http_status(), 403);
        assert_eq!(suspicious.http_status(), 403);
        assert_ne!(blocked.app_code(), suspicious.app_code());
        assert_ne!(
            blocked.app_code(),
            CoreError::PermissionDenied("x".into()).app_code()
        );
    }
}
