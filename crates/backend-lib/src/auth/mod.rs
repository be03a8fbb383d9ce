// ============================
// fleet-backend-lib/src/auth/mod.rs
// ============================
//! Authentication module.
//!
//! Tokens are issued by the surrounding application; this crate only turns a
//! token into a [`Principal`] through a [`CredentialValidator`].

mod jwt;
mod service;

use serde::{Deserialize, Serialize};

pub use jwt::{Claims, JwtValidator};
pub use service::CredentialValidator;

/// Authenticated caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Display identity, echoed back in `auth_result`
    pub identity: String,
    pub role: Role,
}

impl Principal {
    pub fn new(identity: impl Into<String>, role: Role) -> Self {
        Self {
            identity: identity.into(),
            role,
        }
    }

    pub fn can_report_positions(&self) -> bool {
        self.role.can_report_positions()
    }
}

/// Caller role; anything unrecognised is kept verbatim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    /// Fleet operator
    Admin,
    /// Vehicle reporter
    Driver,
    Other(String),
}

impl Role {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "admin" | "fleet_operator" => Self::Admin,
            "driver" | "vehicle_reporter" => Self::Driver,
            _ => Self::Other(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Admin => "admin",
            Self::Driver => "driver",
            Self::Other(raw) => raw,
        }
    }

    /// Only operators and reporters may push positions
    pub fn can_report_positions(&self) -> bool {
        matches!(self, Self::Admin | Self::Driver)
    }
}

impl From<String> for Role {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
