use rocket::serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use std::fmt;
use std::str::FromStr;

/// Closed set of roles carried in the access token.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, Eq, PartialEq, Hash, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    Admin,
    Manager,
    Driver,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Capability {
    /// List and revoke the caller's own sessions.
    ManageOwnSessions,
    /// Revoke sessions of users in the caller's tenant.
    RevokeTenantSessions,
    /// Revoke sessions of users in any tenant.
    RevokeAnyTenantSessions,
    ViewMetrics,
}

const SUPER_ADMIN_CAPABILITIES: &[Capability] = &[
    Capability::ManageOwnSessions,
    Capability::RevokeTenantSessions,
    Capability::RevokeAnyTenantSessions,
    Capability::ViewMetrics,
];
const ADMIN_CAPABILITIES: &[Capability] = &[Capability::ManageOwnSessions, Capability::RevokeTenantSessions, Capability::ViewMetrics];
const MANAGER_CAPABILITIES: &[Capability] = &[Capability::ManageOwnSessions];
const DRIVER_CAPABILITIES: &[Capability] = &[Capability::ManageOwnSessions];

impl Role {
    pub fn capabilities(self) -> &'static [Capability] {
        match self {
            Role::SuperAdmin => SUPER_ADMIN_CAPABILITIES,
            Role::Admin => ADMIN_CAPABILITIES,
            Role::Manager => MANAGER_CAPABILITIES,
            Role::Driver => DRIVER_CAPABILITIES,
        }
    }

    pub fn has(self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::SuperAdmin => "super_admin",
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Driver => "driver",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "super_admin" => Ok(Role::SuperAdmin),
            "admin" => Ok(Role::Admin),
            "manager" => Ok(Role::Manager),
            "driver" => Ok(Role::Driver),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
