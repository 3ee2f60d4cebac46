//! Smoke tests against a live database. Ignored by default; run with
//! `TEST_DATABASE_URL` pointing at a database that already carries the
//! openpenpal tables, then `cargo test -p openpenpal-postgres -- --ignored`.

use std::sync::Arc;

use chrono::Utc;
use openpenpal_core::ports::UserStore;
use openpenpal_core::user::{User, UserRole};
use openpenpal_postgres::PgStores;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

async fn stores() -> Option<openpenpal_core::ports::Stores> {
    let url = std::env::var("TEST_DATABASE_URL").ok()?;
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await
        .ok()?;
    Some(PgStores::new(pool).into_stores())
}

#[tokio::test]
#[ignore = "needs TEST_DATABASE_URL with provisioned schema"]
async fn user_roundtrip() {
    let Some(stores) = stores().await else {
        panic!("TEST_DATABASE_URL not set or unreachable");
    };
    let users: Arc<dyn UserStore> = stores.users;
    let now = Utc::now();
    let suffix = &Uuid::new_v4().to_string()[..8];
    let user = User {
        id: Uuid::new_v4(),
        username: format!("smoke_{suffix}"),
        email: format!("smoke_{suffix}@openpenpal.test"),
        password_hash: "x".into(),
        role: UserRole::User,
        school_code: "BJDX01".into(),
        is_active: true,
        created_at: now,
        updated_at: now,
    };
    users.create_user(&user).await.unwrap();
    let back = users.get_user(user.id).await.unwrap();
    assert_eq!(back.username, user.username);
    assert_eq!(back.role, UserRole::User);

    users.update_role(user.id, UserRole::CourierLevel1).await.unwrap();
    let promoted = users.get_user(user.id).await.unwrap();
    assert_eq!(promoted.role, UserRole::CourierLevel1);
}
