//! Identity injected into the request context by the auth middleware.
//!
//! Construct from validated token claims at the server boundary; core logic
//! never reads raw bearer tokens. There is no implicit or thread-local
//! identity anywhere in the codebase.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::courier::CourierClaims;
use crate::error::CoreError;
use crate::user::UserRole;

/// Fine-grained capabilities resolved from the role ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    CreateLetter,
    BindBarcode,
    ScanBarcode,
    AcceptTask,
    ViewSubordinates,
    RegisterCourier,
    ApproveCourier,
    ViewCredit,
    ManageCredit,
    ManageUsers,
}

/// Static role → permission resolution. Higher courier levels subsume the
/// lower ones; admins hold everything.
pub fn permissions_for_role(role: UserRole) -> HashSet<Permission> {
    use Permission::*;
    let base = [CreateLetter, ViewCredit];
    let courier = [BindBarcode, ScanBarcode, AcceptTask];
    let coordinator = [ViewSubordinates, RegisterCourier, ApproveCourier];
    let admin = [ManageCredit, ManageUsers];

    let mut set: HashSet<Permission> = base.into_iter().collect();
    match role {
        UserRole::User => {}
        UserRole::CourierLevel1 => {
            set.extend(courier);
        }
        UserRole::CourierLevel2 | UserRole::CourierLevel3 => {
            set.extend(courier);
            set.extend(coordinator);
        }
        UserRole::CourierLevel4 => {
            set.extend(courier);
            set.extend(coordinator);
            set.extend(admin);
        }
        UserRole::PlatformAdmin | UserRole::SuperAdmin => {
            set.extend(courier);
            set.extend(coordinator);
            set.extend(admin);
        }
    }
    set
}

/// The verified caller. Built by the JWT middleware (remote mode) or
/// `Identity::in_process` (engines, tests, CLI).
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
    pub role: UserRole,
    pub school_code: String,
    pub courier: Option<CourierClaims>,
    pub permissions: HashSet<Permission>,
}

impl Identity {
    pub fn in_process(user_id: Uuid, username: impl Into<String>, role: UserRole) -> Self {
        Self {
            user_id,
            username: username.into(),
            email: String::new(),
            role,
            school_code: String::new(),
            courier: None,
            permissions: permissions_for_role(role),
        }
    }

    pub fn with_courier(mut self, claims: CourierClaims) -> Self {
        self.courier = Some(claims);
        self
    }

    pub fn has_permission(&self, p: Permission) -> bool {
        self.permissions.contains(&p)
    }

    pub fn require_permission(&self, p: Permission) -> Result<(), CoreError> {
        if self.has_permission(p) {
            Ok(())
        } else {
            Err(CoreError::PermissionDenied(format!(
                "{} lacks {p:?}",
                self.username
            )))
        }
    }

    pub fn require_any_permission(&self, ps: &[Permission]) -> Result<(), CoreError> {
        if ps.iter().any(|p| self.has_permission(*p)) {
            Ok(())
        } else {
            Err(CoreError::PermissionDenied(format!(
                "{} lacks all of {ps:?}",
                self.username
            )))
        }
    }

    pub fn require_all_permissions(&self, ps: &[Permission]) -> Result<(), CoreError> {
        if ps.iter().all(|p| self.has_permission(*p)) {
            Ok(())
        } else {
            Err(CoreError::PermissionDenied(format!(
                "{} lacks some of {ps:?}",
                self.username
            )))
        }
    }

    pub fn require_role(&self, roles: &[UserRole]) -> Result<(), CoreError> {
        if roles.contains(&self.role) {
            Ok(())
        } else {
            Err(CoreError::PermissionDenied(format!(
                "{} has role {}, needs one of {roles:?}",
                self.username, self.role
            )))
        }
    }

    /// Platform/super admin or a level-4 courier.
    pub fn require_admin(&self) -> Result<(), CoreError> {
        if self.role.is_admin() {
            Ok(())
        } else {
            Err(CoreError::PermissionDenied(format!(
                "{} is not an admin",
                self.username
            )))
        }
    }

    pub fn require_courier(&self) -> Result<u8, CoreError> {
        self.role.courier_level().ok_or_else(|| {
            CoreError::PermissionDenied(format!("{} is not a courier", self.username))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_user_cannot_scan() {
        let id = Identity::in_process(Uuid::new_v4(), "alice", UserRole::User);
        assert!(id.has_permission(Permission::CreateLetter));
        assert!(id.require_permission(Permission::ScanBarcode).is_err());
        assert!(id.require_courier().is_err());
    }

    #[test]
    fn level_two_coordinates_but_does_not_administer() {
        let id = Identity::in_process(Uuid::new_v4(), "bob", UserRole::CourierLevel2);
        assert!(id.has_permission(Permission::ApproveCourier));
        assert!(!id.has_permission(Permission::ManageUsers));
        assert!(id.require_admin().is_err());
        assert_eq!(id.require_courier().unwrap(), 2);
    }

    #[test]
    fn any_and_all_permission_guards() {
        let id = Identity::in_process(Uuid::new_v4(), "c4", UserRole::CourierLevel4);
        assert!(id.require_admin().is_ok());
        assert!(id
            .require_all_permissions(&[Permission::ScanBarcode, Permission::ManageUsers])
            .is_ok());

        let user = Identity::in_process(Uuid::new_v4(), "u", UserRole::User);
        assert!(user
            .require_any_permission(&[Permission::ScanBarcode, Permission::ViewCredit])
            .is_ok());
        assert!(user
            .require_all_permissions(&[Permission::ScanBarcode, Permission::ViewCredit])
            .is_err());
    }
}
