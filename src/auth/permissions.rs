//! Permission levels for route authorization

use serde::{Deserialize, Serialize};
use std::fmt;

/// Permission levels carried by tokens and API keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
#[repr(u8)]
pub enum PermissionLevel {
    /// Anonymous - read routes, heartbeats, realtime
    #[default]
    Public = 0,
    /// Signed-in user
    Authenticated = 1,
    /// Registry mutations and cache control
    Admin = 2,
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionLevel::Public => write!(f, "PUBLIC"),
            PermissionLevel::Authenticated => write!(f, "AUTHENTICATED"),
            PermissionLevel::Admin => write!(f, "ADMIN"),
        }
    }
}
