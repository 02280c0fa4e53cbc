//! User identity entity.

use crate::domain::foundation::{Timestamp, UserId};
use serde::{Deserialize, Serialize};

/// Platform role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Student,
    Teacher,
    Admin,
}

impl UserRole {
    /// Database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Teacher => "teacher",
            Self::Admin => "admin",
        }
    }

    /// Parses the database representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "student" => Some(Self::Student),
            "teacher" => Some(Self::Teacher),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// A registered user, as the reconciliation engine sees one.
///
/// Registration, authentication and profile editing live elsewhere; the
/// engine reads users to derive entitlement and to resolve referral codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub role: UserRole,

    /// Unique code others use to register as this user's referrals.
    /// Immutable once assigned.
    pub referral_code: String,

    /// Grants entitlement unconditionally (staff, lifetime accounts).
    pub is_permanent_free: bool,

    /// Anchors the system trial length.
    pub created_at: Timestamp,
}
