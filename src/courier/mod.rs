//! Courier hierarchy service.
//!
//! Registration and approval flow down the ladder: a courier at level N+1
//! (or a platform admin) vouches for a courier at level N whose prefix
//! sits inside its own. Subordinate listing and task visibility are
//! inferred from prefixes; there is no parent pointer.

use std::sync::Arc;

use openpenpal_core::clock::Clock;
use openpenpal_core::courier::{Courier, CourierStats, CourierStatus};
use openpenpal_core::error::CoreError;
use openpenpal_core::events::Event;
use openpenpal_core::identity::{Identity, Permission};
use openpenpal_core::opcode::Prefix;
use openpenpal_core::ports::{CourierStore, TaskStore, UserStore};
use openpenpal_core::task::TaskStatus;
use openpenpal_core::user::UserRole;
use uuid::Uuid;

use crate::bus::EventBus;

pub struct CourierService {
    users: Arc<dyn UserStore>,
    couriers: Arc<dyn CourierStore>,
    tasks: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    bus: Arc<EventBus>,
}

impl CourierService {
    pub fn new(
        users: Arc<dyn UserStore>,
        couriers: Arc<dyn CourierStore>,
        tasks: Arc<dyn TaskStore>,
        clock: Arc<dyn Clock>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            users,
            couriers,
            tasks,
            clock,
            bus,
        }
    }

    /// The courier record behind an identity, if any.
    pub async fn courier_for(&self, actor: &Identity) -> Result<Courier, CoreError> {
        self.couriers
            .find_by_user(actor.user_id)
            .await?
            .ok_or_else(|| {
                CoreError::PermissionDenied(format!("{} is not a courier", actor.username))
            })
    }

    /// Authority check shared by register/approve/suspend: platform and
    /// super admins act anywhere; otherwise the actor must hold an
    /// approved courier exactly one level above, whose prefix contains
    /// the target prefix.
    async fn require_authority_over(
        &self,
        actor: &Identity,
        level: u8,
        prefix: &Prefix,
    ) -> Result<(), CoreError> {
        if matches!(actor.role, UserRole::PlatformAdmin | UserRole::SuperAdmin) {
            return Ok(());
        }
        let sponsor = self.courier_for(actor).await?;
        if sponsor.status != CourierStatus::Approved {
            return Err(CoreError::PermissionDenied(format!(
                "courier {} is not approved",
                sponsor.id
            )));
        }
        if sponsor.level != level + 1 {
            return Err(CoreError::LevelMismatch {
                expected: level + 1,
                actual: sponsor.level,
            });
        }
        if !sponsor.managed_prefix.contains(prefix) {
            return Err(CoreError::ScopeViolation(format!(
                "prefix {prefix} is outside {}'s scope {}",
                actor.username, sponsor.managed_prefix
            )));
        }
        Ok(())
    }

    pub async fn register_courier(
        &self,
        actor: &Identity,
        user_id: Uuid,
        level: u8,
        prefix: Prefix,
    ) -> Result<Courier, CoreError> {
        actor.require_permission(Permission::RegisterCourier)?;
        if !(1..=4).contains(&level) {
            return Err(CoreError::Validation(format!("invalid courier level {level}")));
        }
        if !prefix.valid_for_level(level) {
            return Err(CoreError::Validation(format!(
                "prefix {prefix} has the wrong width for level {level}"
            )));
        }
        self.require_authority_over(actor, level, &prefix).await?;

        let user = self.users.get_user(user_id).await?;
        if !user.is_active {
            return Err(CoreError::Validation(format!(
                "user {} is deactivated",
                user.username
            )));
        }

        let now = self.clock.now();
        let courier = Courier {
            id: Uuid::new_v4(),
            user_id,
            level,
            managed_prefix: prefix,
            status: CourierStatus::Pending,
            task_count: 0,
            points: 0,
            created_at: now,
            updated_at: now,
        };
        self.couriers.create_courier(&courier).await?;
        let role = UserRole::for_courier_level(level).expect("level validated above");
        self.users.update_role(user_id, role).await?;
        tracing::info!(
            "courier {} registered at level {level} over {} (pending)",
            courier.id,
            courier.managed_prefix
        );
        Ok(courier)
    }

    pub async fn approve_courier(
        &self,
        actor: &Identity,
        courier_id: Uuid,
    ) -> Result<Courier, CoreError> {
        actor.require_permission(Permission::ApproveCourier)?;
        let courier = self.couriers.get_courier(courier_id).await?;
        self.require_authority_over(actor, courier.level, &courier.managed_prefix)
            .await?;
        if courier.status != CourierStatus::Pending {
            return Err(CoreError::Conflict(format!(
                "courier {courier_id} is {}, not pending",
                courier.status.as_str()
            )));
        }
        self.couriers
            .update_status(courier_id, CourierStatus::Approved)
            .await?;
        let approved = self.couriers.get_courier(courier_id).await?;
        self.bus.publish(Event::CourierApproved {
            courier_id,
            user_id: approved.user_id,
            level: approved.level,
            at: self.clock.now(),
        });
        tracing::info!("courier {courier_id} approved by {}", actor.username);
        Ok(approved)
    }

    pub async fn suspend_courier(
        &self,
        actor: &Identity,
        courier_id: Uuid,
    ) -> Result<(), CoreError> {
        let courier = self.couriers.get_courier(courier_id).await?;
        self.require_authority_over(actor, courier.level, &courier.managed_prefix)
            .await?;
        self.couriers
            .update_status(courier_id, CourierStatus::Suspended)
            .await
    }

    /// Couriers whose prefix strictly extends the caller's, exactly one
    /// level below.
    pub async fn list_subordinates(&self, actor: &Identity) -> Result<Vec<Courier>, CoreError> {
        actor.require_permission(Permission::ViewSubordinates)?;
        let courier = self.courier_for(actor).await?;
        if courier.level <= 1 {
            return Ok(Vec::new());
        }
        self.couriers
            .list_subordinates(&courier.managed_prefix, courier.level - 1)
            .await
    }

    pub async fn stats(&self, actor: &Identity) -> Result<CourierStats, CoreError> {
        let courier = self.courier_for(actor).await?;
        let tasks = self.tasks.list_for_couriers(&[courier.id]).await?;
        let active = tasks.iter().filter(|t| !t.status.is_terminal()).count() as i64;
        let delivered = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Delivered)
            .count() as i64;
        Ok(CourierStats {
            courier_id: courier.id,
            level: courier.level,
            managed_prefix: courier.managed_prefix,
            status: courier.status,
            task_count: courier.task_count,
            points: courier.points,
            active_tasks: active,
            delivered_tasks: delivered,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::testutil;
    use openpenpal_core::clock::SystemClock;
    use openpenpal_core::events::Topic;

    struct Fixture {
        store: Arc<MemoryStore>,
        bus: Arc<EventBus>,
        svc: CourierService,
    }

    fn fixture() -> Fixture {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = Arc::new(MemoryStore::new(Arc::clone(&clock)));
        let bus = Arc::new(EventBus::default());
        let svc = CourierService::new(
            Arc::clone(&store) as _,
            Arc::clone(&store) as _,
            Arc::clone(&store) as _,
            clock,
            Arc::clone(&bus),
        );
        Fixture { store, bus, svc }
    }

    #[tokio::test]
    async fn admin_registers_then_chain_extends() {
        let f = fixture();
        let admin = Identity::in_process(Uuid::new_v4(), "root", UserRole::PlatformAdmin);

        // Admin seeds a level-2 coordinator over school PK.
        let l2_user = testutil::seed_user(&f.store, "coord", UserRole::User).await;
        let l2 = f
            .svc
            .register_courier(&admin, l2_user.id, 2, Prefix::parse("PK").unwrap())
            .await
            .unwrap();
        assert_eq!(l2.status, CourierStatus::Pending);
        f.svc.approve_courier(&admin, l2.id).await.unwrap();

        // The approved coordinator can register a level-1 courier inside
        // its school, but not outside it.
        let coord_id = Identity::in_process(l2_user.id, "coord", UserRole::CourierLevel2);
        let l1_user = testutil::seed_user(&f.store, "runner", UserRole::User).await;
        let l1 = f
            .svc
            .register_courier(&coord_id, l1_user.id, 1, Prefix::parse("PK5F").unwrap())
            .await
            .unwrap();
        assert_eq!(l1.level, 1);

        let outsider = testutil::seed_user(&f.store, "outsider", UserRole::User).await;
        let err = f
            .svc
            .register_courier(&coord_id, outsider.id, 1, Prefix::parse("QH3B").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ScopeViolation(_)));
    }

    #[tokio::test]
    async fn non_adjacent_level_is_mismatch() {
        let f = fixture();
        let admin = Identity::in_process(Uuid::new_v4(), "root", UserRole::PlatformAdmin);
        let l3_user = testutil::seed_user(&f.store, "city", UserRole::User).await;
        let l3 = f
            .svc
            .register_courier(&admin, l3_user.id, 3, Prefix::parse("P").unwrap())
            .await
            .unwrap();
        f.svc.approve_courier(&admin, l3.id).await.unwrap();

        // A level-3 courier cannot directly sponsor level 1.
        let l3_id = Identity::in_process(l3_user.id, "city", UserRole::CourierLevel3);
        let target = testutil::seed_user(&f.store, "runner", UserRole::User).await;
        let err = f
            .svc
            .register_courier(&l3_id, target.id, 1, Prefix::parse("PK5F").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::LevelMismatch {
                expected: 2,
                actual: 3
            }
        ));
    }

    #[tokio::test]
    async fn approval_emits_event_and_is_single_shot() {
        let f = fixture();
        let mut rx = f.bus.subscribe(Topic::CourierApproved);
        let admin = Identity::in_process(Uuid::new_v4(), "root", UserRole::PlatformAdmin);
        let user = testutil::seed_user(&f.store, "coord", UserRole::User).await;
        let courier = f
            .svc
            .register_courier(&admin, user.id, 2, Prefix::parse("PK").unwrap())
            .await
            .unwrap();
        f.svc.approve_courier(&admin, courier.id).await.unwrap();

        match rx.try_recv().unwrap() {
            Event::CourierApproved { courier_id, .. } => assert_eq!(courier_id, courier.id),
            other => panic!("unexpected event {other:?}"),
        }

        let err = f.svc.approve_courier(&admin, courier.id).await.unwrap_err();
        assert_eq!(err.http_status(), 409);
    }

    #[tokio::test]
    async fn suspension_revokes_scope() {
        let f = fixture();
        let admin = Identity::in_process(Uuid::new_v4(), "root", UserRole::PlatformAdmin);
        let user = testutil::seed_user(&f.store, "runner", UserRole::User).await;
        let courier = f
            .svc
            .register_courier(&admin, user.id, 1, Prefix::parse("PK5F").unwrap())
            .await
            .unwrap();
        f.svc.approve_courier(&admin, courier.id).await.unwrap();
        let approved = f.store.get_courier(courier.id).await.unwrap();
        assert!(approved.can_act_on(&openpenpal_core::opcode::OpCode::parse("PK5F01").unwrap()));

        f.svc.suspend_courier(&admin, courier.id).await.unwrap();
        let suspended = f.store.get_courier(courier.id).await.unwrap();
        assert_eq!(suspended.status, CourierStatus::Suspended);
        assert!(!suspended.can_act_on(&openpenpal_core::opcode::OpCode::parse("PK5F01").unwrap()));
    }

    #[tokio::test]
    async fn subordinates_are_exactly_one_level_below() {
        let f = fixture();
        let admin = Identity::in_process(Uuid::new_v4(), "root", UserRole::PlatformAdmin);

        let l2_user = testutil::seed_user(&f.store, "coord", UserRole::User).await;
        let l2 = f
            .svc
            .register_courier(&admin, l2_user.id, 2, Prefix::parse("PK").unwrap())
            .await
            .unwrap();
        f.svc.approve_courier(&admin, l2.id).await.unwrap();

        let coord = Identity::in_process(l2_user.id, "coord", UserRole::CourierLevel2);
        for (name, prefix) in [("r1", "PK5F"), ("r2", "PK2A")] {
            let u = testutil::seed_user(&f.store, name, UserRole::User).await;
            f.svc
                .register_courier(&coord, u.id, 1, Prefix::parse(prefix).unwrap())
                .await
                .unwrap();
        }
        // A courier in another school is invisible.
        let other_user = testutil::seed_user(&f.store, "other", UserRole::User).await;
        f.svc
            .register_courier(&admin, other_user.id, 1, Prefix::parse("QH3B").unwrap())
            .await
            .unwrap();

        let subs = f.svc.list_subordinates(&coord).await.unwrap();
        assert_eq!(subs.len(), 2);
        assert!(subs.iter().all(|c| c.level == 1));
        assert!(subs
            .iter()
            .all(|c| c.managed_prefix.as_str().starts_with("PK")));
    }
}
