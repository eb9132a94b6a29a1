/// Role x plan entitlement decisions
///
/// Pure table lookups. Deploying needs the admin role and a plan in good standing;
/// `past_due` stays entitled as a grace period.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Viewer,
    Developer,
    Approver,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Developer => "developer",
            Role::Approver => "approver",
            Role::Admin => "admin",
        }
    }

    /// Unknown strings map to the least privileged role
    pub fn parse(value: &str) -> Role {
        match value {
            "developer" => Role::Developer,
            "approver" => Role::Approver,
            "admin" => Role::Admin,
            _ => Role::Viewer,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Billing plan status as mirrored from the billing provider
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PlanStatus {
    Free,
    Trialing,
    Active,
    PastDue,
    Canceled,
    Unpaid,
    Incomplete,
    Other(String),
}

impl PlanStatus {
    pub fn as_str(&self) -> &str {
        match self {
            PlanStatus::Free => "free",
            PlanStatus::Trialing => "trialing",
            PlanStatus::Active => "active",
            PlanStatus::PastDue => "past_due",
            PlanStatus::Canceled => "canceled",
            PlanStatus::Unpaid => "unpaid",
            PlanStatus::Incomplete => "incomplete",
            PlanStatus::Other(value) => value,
        }
    }

    pub fn parse(value: &str) -> PlanStatus {
        match value {
            "free" => PlanStatus::Free,
            "trialing" => PlanStatus::Trialing,
            "active" => PlanStatus::Active,
            "past_due" => PlanStatus::PastDue,
            "canceled" | "cancelled" => PlanStatus::Canceled,
            "unpaid" => PlanStatus::Unpaid,
            "incomplete" => PlanStatus::Incomplete,
            other => PlanStatus::Other(other.to_string()),
        }
    }

    pub fn permits_deploy(&self) -> bool {
        matches!(self, PlanStatus::Trialing | PlanStatus::Active | PlanStatus::PastDue)
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for PlanStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PlanStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(|value| PlanStatus::parse(&value))
    }
}

/// Why a deploy was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Denial {
    Role(Role),
    Plan(PlanStatus),
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Denial::Role(role) => write!(
                f,
                "role '{}' is not permitted to deploy; ask an organization admin",
                role
            ),
            Denial::Plan(status) => write!(
                f,
                "plan status '{}' does not permit deployment; an active subscription is required",
                status
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitlementDecision {
    pub allowed: bool,
    pub reason: Option<Denial>,
}

impl EntitlementDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn deny(reason: Denial) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }

    /// Convert into a `Result`, surfacing the denial reason
    pub fn into_result(self) -> Result<(), Denial> {
        match self.reason {
            Some(reason) if !self.allowed => Err(reason),
            _ => Ok(()),
        }
    }
}

/// Deploy requires admin AND a plan in {trialing, active, past_due}
pub fn can_deploy(role: Role, plan: &PlanStatus) -> EntitlementDecision {
    if !can_perform(role, Capability::Deploy) {
        return EntitlementDecision::deny(Denial::Role(role));
    }
    if !plan.permits_deploy() {
        return EntitlementDecision::deny(Denial::Plan(plan.clone()));
    }
    EntitlementDecision::allow()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Edit,
    Approve,
    Deploy,
}

impl Capability {
    pub fn allowed_roles(&self) -> &'static [Role] {
        match self {
            Capability::Edit => &[Role::Developer, Role::Admin],
            Capability::Approve => &[Role::Approver, Role::Admin],
            Capability::Deploy => &[Role::Admin],
        }
    }
}

pub fn can_perform(role: Role, capability: Capability) -> bool {
    capability.allowed_roles().contains(&role)
}

/// Four-eyes rule: approvers cannot approve their own workflows
pub fn can_approve(user_id: &str, creator_id: Option<&str>, role: Role) -> bool {
    if !can_perform(role, Capability::Approve) {
        return false;
    }
    creator_id != Some(user_id)
}
