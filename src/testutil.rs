//! Shared fixtures for in-crate unit tests.

use std::sync::Arc;

use chrono::Utc;
use openpenpal_core::courier::{Courier, CourierStatus};
use openpenpal_core::opcode::Prefix;
use openpenpal_core::ports::{CourierStore, UserStore};
use openpenpal_core::user::{User, UserRole};
use uuid::Uuid;

use crate::store::memory::MemoryStore;

pub async fn seed_user(store: &Arc<MemoryStore>, username: &str, role: UserRole) -> User {
    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4(),
        username: username.to_string(),
        email: format!("{username}@openpenpal.test"),
        password_hash: "unused".into(),
        role,
        school_code: "BJDX01".into(),
        is_active: true,
        created_at: now,
        updated_at: now,
    };
    store.create_user(&user).await.expect("seed user");
    user
}

/// An approved courier plus its backing user, bypassing the sponsorship
/// chain. For flows that test the chain itself, register through the
/// service instead.
pub async fn seed_courier(
    store: &Arc<MemoryStore>,
    username: &str,
    level: u8,
    prefix: &str,
) -> (User, Courier) {
    let role = UserRole::for_courier_level(level).expect("valid level");
    let user = seed_user(store, username, role).await;
    let now = Utc::now();
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
    store.create_courier(&courier).await.expect("seed courier");
    (user, courier)
}
