//! Remote action permissions.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// A capability carried by an auth token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "execute")]
    Execute,
    #[serde(rename = "history")]
    History,
    #[serde(rename = "ai")]
    Ai,
    /// Grants every permission.
    #[serde(rename = "*")]
    All,
}

impl Permission {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Execute => "execute",
            Self::History => "history",
            Self::Ai => "ai",
            Self::All => "*",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "execute" => Ok(Self::Execute),
            "history" => Ok(Self::History),
            "ai" => Ok(Self::Ai),
            "*" => Ok(Self::All),
            other => Err(format!("unknown permission: {other}")),
        }
    }
}

/// Whether `granted` allows `required`.
#[must_use]
pub fn allows(granted: &[Permission], required: Permission) -> bool {
    granted
        .iter()
        .any(|p| *p == Permission::All || *p == required)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_grants_everything() {
        let granted = [Permission::All];
        assert!(allows(&granted, Permission::Execute));
        assert!(allows(&granted, Permission::History));
        assert!(allows(&granted, Permission::Ai));
    }

    #[test]
    fn test_specific_grants() {
        let granted = [Permission::History];
        assert!(allows(&granted, Permission::History));
        assert!(!allows(&granted, Permission::Execute));
        assert!(!allows(&[], Permission::Ai));
    }

    #[test]
    fn test_serialized_names() {
        let json = serde_json::to_string(&[Permission::Execute, Permission::All]).unwrap();
        assert_eq!(json, r#"["execute","*"]"#);
        assert_eq!("ai".parse::<Permission>(), Ok(Permission::Ai));
        assert!("root".parse::<Permission>().is_err());
    }
}
