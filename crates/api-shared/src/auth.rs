//! Verified caller identity and role gates.
//!
//! Every core operation receives an [`AuthContext`] that an upstream layer
//! has already verified. The core only enforces *authorisation*: whether the
//! caller's role may perform the operation at hand.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Clinic staff roles recognised by the scheduling engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    /// Sebészorvos, the maxillofacial surgeon.
    Surgeon,
    /// Fogpótlástanász, the prosthodontist.
    Prosthodontist,
    Assistant,
}

/// Already-verified caller identity attached to every request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
}

impl AuthContext {
    pub fn new(user_id: Uuid, email: impl Into<String>, role: Role) -> Self {
        Self {
            user_id,
            email: email.into(),
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Clinician roles allowed to advance episode stages and create demand.
    pub fn is_treating_clinician(&self) -> bool {
        matches!(
            self.role,
            Role::Admin | Role::Surgeon | Role::Prosthodontist
        )
    }

    /// Roles allowed to move slots and appointments around.
    pub fn can_manage_scheduling(&self) -> bool {
        matches!(
            self.role,
            Role::Admin | Role::Surgeon | Role::Prosthodontist | Role::Assistant
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(role: Role) -> AuthContext {
        AuthContext::new(Uuid::new_v4(), "staff@clinic.example", role)
    }

    #[test]
    fn clinician_gate_excludes_assistants() {
        assert!(ctx(Role::Surgeon).is_treating_clinician());
        assert!(ctx(Role::Prosthodontist).is_treating_clinician());
        assert!(ctx(Role::Admin).is_treating_clinician());
        assert!(!ctx(Role::Assistant).is_treating_clinician());
    }

    #[test]
    fn scheduling_gate_includes_assistants() {
        assert!(ctx(Role::Assistant).can_manage_scheduling());
        assert!(!ctx(Role::Assistant).is_admin());
    }
}
