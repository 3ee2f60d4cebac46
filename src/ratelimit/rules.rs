//! Canonical per-action window rules. This table is the single source of
//! truth; tests and deployments override by constructing the limiter with
//! their own vector, never by mutating this one.

use openpenpal_core::ratelimit::{RatePeriod, RateRule, RoleOverride};
use openpenpal_core::user::UserRole;

fn rule(action: &str, period: RatePeriod, max_count: u32, max_points: i64) -> RateRule {
    RateRule {
        action: action.into(),
        period,
        max_count,
        max_points,
        role_overrides: vec![],
    }
}

pub fn default_rules() -> Vec<RateRule> {
    let mut courier_delivery = rule("courier_delivery", RatePeriod::Daily, 100, 1_000);
    courier_delivery.role_overrides = vec![
        RoleOverride {
            role: UserRole::CourierLevel3,
            max_count: 200,
            max_points: 2_000,
        },
        RoleOverride {
            role: UserRole::CourierLevel4,
            max_count: 500,
            max_points: 5_000,
        },
    ];

    vec![
        rule("letter_created", RatePeriod::Daily, 20, 200),
        rule("receive_letter", RatePeriod::Daily, 50, 500),
        rule("letter_read", RatePeriod::Daily, 50, 300),
        rule("letter_delivered", RatePeriod::Daily, 50, 500),
        rule("public_letter_like", RatePeriod::Daily, 50, 100),
        rule("ai_interaction", RatePeriod::Daily, 30, 120),
        rule("writing_challenge", RatePeriod::Weekly, 5, 100),
        rule("museum_submit", RatePeriod::Weekly, 10, 60),
        rule("opcode_approval", RatePeriod::Daily, 50, 100),
        rule("admin_reward", RatePeriod::Monthly, 10, 1_000),
        courier_delivery,
    ]
}
