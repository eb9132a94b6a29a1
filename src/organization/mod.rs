/// Organization and membership records
///
/// Tenancy boundary for workflows, secrets and audit events. These rows are populated
/// by the identity/billing sync, which lives outside this crate; the control plane
/// only reads plan status and member roles from them.

use crate::entitlement::{PlanStatus, Role};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tenant owning workflows and secrets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    /// Identity-provider organization id
    pub id: String,
    pub name: String,
    /// Billing status mirrored from the billing provider
    pub plan_status: PlanStatus,
    pub created_at: DateTime<Utc>,
}

impl Organization {
    pub fn new(id: impl Into<String>, name: impl Into<String>, plan_status: PlanStatus) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            plan_status,
            created_at: Utc::now(),
        }
    }
}

/// A user's membership in an organization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    /// Identity-provider user id
    pub id: String,
    pub organization_id: String,
    pub email: String,
    pub role: Role,
}

/// The user on whose behalf an orchestrator call runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActingUser {
    pub id: String,
    pub organization_id: String,
    pub role: Role,
}

impl From<&Member> for ActingUser {
    fn from(member: &Member) -> Self {
        Self {
            id: member.id.clone(),
            organization_id: member.organization_id.clone(),
            role: member.role,
        }
    }
}
