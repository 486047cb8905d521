use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Account role. Assigned at account creation and never changed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    pub fn is_admin(&self) -> bool { matches!(self, Role::Admin) }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(format!("'{}' is not one of: user, admin", other)),
        }
    }
}

/// Verified caller identity derived from a session token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
    pub role: Role,
}

impl Principal {
    pub fn new<S: Into<String>>(id: S, role: Role) -> Self { Self { id: id.into(), role } }

    pub fn is_admin(&self) -> bool { self.role.is_admin() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parses_closed_set_only() {
        assert_eq!("user".parse::<Role>(), Ok(Role::User));
        assert_eq!(" admin ".parse::<Role>(), Ok(Role::Admin));
        assert!("root".parse::<Role>().is_err());
        assert!("Admin".parse::<Role>().is_err());
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"admin\"");
        let p: Principal = serde_json::from_str(r#"{"id":"a1","role":"user"}"#).unwrap();
        assert_eq!(p, Principal::new("a1", Role::User));
    }
}
