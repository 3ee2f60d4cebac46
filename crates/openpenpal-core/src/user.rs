//! User entity and role ladder.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

/// Role ladder: plain users, the four courier levels, two admin tiers.
/// Legacy aliases (`senior_courier`, `courier_coordinator`) are not carried;
/// the ladder is the only vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    User,
    CourierLevel1,
    CourierLevel2,
    CourierLevel3,
    CourierLevel4,
    PlatformAdmin,
    SuperAdmin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::CourierLevel1 => "courier_level_1",
            Self::CourierLevel2 => "courier_level_2",
            Self::CourierLevel3 => "courier_level_3",
            Self::CourierLevel4 => "courier_level_4",
            Self::PlatformAdmin => "platform_admin",
            Self::SuperAdmin => "super_admin",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "courier_level_1" => Some(Self::CourierLevel1),
            "courier_level_2" => Some(Self::CourierLevel2),
            "courier_level_3" => Some(Self::CourierLevel3),
            "courier_level_4" => Some(Self::CourierLevel4),
            "platform_admin" => Some(Self::PlatformAdmin),
            "super_admin" => Some(Self::SuperAdmin),
            _ => None,
        }
    }

    pub fn for_courier_level(level: u8) -> Option<Self> {
        match level {
            1 => Some(Self::CourierLevel1),
            2 => Some(Self::CourierLevel2),
            3 => Some(Self::CourierLevel3),
            4 => Some(Self::CourierLevel4),
            _ => None,
        }
    }

    /// Courier level for courier roles, `None` otherwise.
    pub fn courier_level(&self) -> Option<u8> {
        match self {
            Self::CourierLevel1 => Some(1),
            Self::CourierLevel2 => Some(2),
            Self::CourierLevel3 => Some(3),
            Self::CourierLevel4 => Some(4),
            _ => None,
        }
    }

    pub fn is_courier(&self) -> bool {
        self.courier_level().is_some()
    }

    /// Platform/super admin, or a level-4 courier (city-wide authority).
    pub fn is_admin(&self) -> bool {
        matches!(
            self,
            Self::PlatformAdmin | Self::SuperAdmin | Self::CourierLevel4
        )
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User row. Never hard-deleted while referenced by letters or
/// transactions; deactivation flips `is_active`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: UserRole,
    pub school_code: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// School codes are exactly 6 characters, validated against the registered
/// set at registration time.
pub fn validate_school_code(code: &str, registered: &[String]) -> Result<(), CoreError> {
    if code.len() != 6 {
        return Err(CoreError::Validation(format!(
            "school code must be 6 characters, got {}",
            code.len()
        )));
    }
    if !registered.iter().any(|c| c == code) {
        return Err(CoreError::Validation(format!(
            "school code not registered: {code}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_roundtrip() {
        for role in [
            UserRole::User,
            UserRole::CourierLevel1,
            UserRole::CourierLevel4,
            UserRole::PlatformAdmin,
            UserRole::SuperAdmin,
        ] {
            assert_eq!(UserRole::from_str(role.as_str()), Some(role));
        }
        assert_eq!(UserRole::from_str("senior_courier"), None);
    }

    #[test]
    fn admin_includes_level_four() {
        assert!(UserRole::CourierLevel4.is_admin());
        assert!(UserRole::PlatformAdmin.is_admin());
        assert!(!UserRole::CourierLevel3.is_admin());
        assert!(!UserRole::User.is_admin());
    }

    #[test]
    fn school_code_validation() {
        let registered = vec!["BJDX01".to_string()];
        assert!(validate_school_code("BJDX01", &registered).is_ok());
        assert!(validate_school_code("BJDX0", &registered).is_err());
        assert!(validate_school_code("NOPE01", &registered).is_err());
    }
}
