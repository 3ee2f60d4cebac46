//! Canonical reward amounts and per-type enqueue constraints. The source
//! of truth for "how many points is this action worth"; callers that
//! accept explicit points are validated against the per-award cap here.

use openpenpal_core::error::CoreError;

/// Default points granted for an action type.
pub fn default_points(action: &str) -> i64 {
    match action {
        "courier_delivery" => 10,
        "letter_delivered" => 7,
        "letter_read" => 3,
        "letter_created" => 5,
        "receive_letter" => 5,
        "public_letter_like" => 2,
        "ai_interaction" => 2,
        a if a.starts_with("museum_") => 4,
        "writing_challenge" => 8,
        "opcode_approval" => 5,
        "community_badge" => 10,
        "admin_reward" => 20,
        _ => 1,
    }
}

/// Largest single award an action type may carry. Requests above the cap
/// are rejected at enqueue time; unknown types get a conservative bound.
pub fn max_points_per_award(action: &str) -> i64 {
    match action {
        "admin_reward" => 500,
        "community_badge" => 100,
        "writing_challenge" => 50,
        "courier_delivery" => 20,
        _ => 30,
    }
}

pub fn validate_award(action: &str, points: i64) -> Result<(), CoreError> {
    if points <= 0 {
        return Err(CoreError::Validation(format!(
            "reward points must be positive, got {points}"
        )));
    }
    let cap = max_points_per_award(action);
    if points > cap {
        return Err(CoreError::Validation(format!(
            "{action} awards at most {cap} points, got {points}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_is_worth_ten() {
        assert_eq!(default_points("courier_delivery"), 10);
    }

    #[test]
    fn award_validation() {
        assert!(validate_award("courier_delivery", 10).is_ok());
        assert!(validate_award("courier_delivery", 0).is_err());
        assert!(validate_award("courier_delivery", -5).is_err());
        assert!(validate_award("courier_delivery", 21).is_err());
        assert!(validate_award("admin_reward", 500).is_ok());
        assert!(validate_award("unknown_action", 31).is_err());
    }
}
