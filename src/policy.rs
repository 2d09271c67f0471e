use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;

/// Role
///
/// Ordered role hierarchy. Authorization compares numeric levels only; the
/// names are labels for serialization and display.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ts_rs::TS,
    utoipa::ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
#[repr(i16)]
pub enum Role {
    #[default]
    User = 1,
    Moderator = 2,
    Admin = 3,
}

impl Role {
    pub fn level(self) -> i16 {
        self as i16
    }

    /// `at_least(r, r)` holds for every role; comparison is purely numeric.
    pub fn at_least(self, threshold: Role) -> bool {
        self.level() >= threshold.level()
    }
}

/// Identity
///
/// The resolved caller identity attached to every request by the gate.
/// `Anonymous` is a real identity with the lowest possible privilege, not an
/// error state — public and optional-mode endpoints serve it normally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Anonymous,
    Known { id: Uuid, role: Role },
}

impl Identity {
    pub fn id(&self) -> Option<Uuid> {
        match self {
            Identity::Anonymous => None,
            Identity::Known { id, .. } => Some(*id),
        }
    }

    pub fn role(&self) -> Option<Role> {
        match self {
            Identity::Anonymous => None,
            Identity::Known { role, .. } => Some(*role),
        }
    }

    pub fn is_owner(&self, resource_owner: Uuid) -> bool {
        self.id() == Some(resource_owner)
    }
}

/// AccessRule
///
/// The declarative per-operation authorization rule. Each handler states its
/// rule once instead of re-deriving role comparisons inline.
///
/// `RequireOwnerAndRole` is the conjunctive variant used by the answer-update
/// path; it is kept as-is even though it locks ordinary users out of editing
/// their own answers.
#[derive(Debug, Clone, Copy)]
pub enum AccessRule {
    Public,
    RequireRole(Role),
    /// Ownership of the target resource, or the role threshold as override.
    RequireOwnerOrRole(Role),
    /// Ownership of the target resource *and* the role threshold.
    RequireOwnerAndRole(Role),
}

/// Evaluates `rule` against the resolved identity and the target resource's
/// owner. Pure decision function: the two deny outcomes carry distinct
/// human-readable reasons so the HTTP layer can answer 401 vs 403.
pub fn authorize(
    identity: &Identity,
    rule: AccessRule,
    resource_owner: Option<Uuid>,
) -> Result<(), ApiError> {
    if matches!(rule, AccessRule::Public) {
        return Ok(());
    }

    let role = match identity.role() {
        Some(role) => role,
        None => {
            return Err(ApiError::Authentication(
                "authentication required for this operation".to_string(),
            ));
        }
    };

    let owns = resource_owner.is_some_and(|owner| identity.is_owner(owner));

    let allowed = match rule {
        AccessRule::Public => true,
        AccessRule::RequireRole(threshold) => role.at_least(threshold),
        AccessRule::RequireOwnerOrRole(threshold) => owns || role.at_least(threshold),
        AccessRule::RequireOwnerAndRole(threshold) => owns && role.at_least(threshold),
    };

    if allowed {
        Ok(())
    } else {
        Err(ApiError::Authorization(
            "the caller's role or ownership does not permit this operation".to_string(),
        ))
    }
}
