//! Fixed role hierarchy: Admin includes User and Public, User includes Public.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Admin,
    User,
    #[default]
    Public,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown role \"{0}\"")]
pub struct UnknownRole(pub String);

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "Admin",
            Self::User => "User",
            Self::Public => "Public",
        }
    }

    /// Whether holders of `self` may act as `other`.
    pub fn includes(self, other: Role) -> bool {
        match self {
            Self::Admin => true,
            Self::User => matches!(other, Self::User | Self::Public),
            Self::Public => other == Self::Public,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Admin" => Ok(Self::Admin),
            "User" => Ok(Self::User),
            "Public" => Ok(Self::Public),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}
