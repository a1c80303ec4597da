use serde::{Deserialize, Serialize};
use std::fmt;

/// Permission level granted on a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AccessPermission {
    #[default]
    Read,
    Write,
    Admin,
}

impl fmt::Display for AccessPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AccessPermission::Read => "Read",
            AccessPermission::Write => "Write",
            AccessPermission::Admin => "Admin",
        };
        write!(f, "{s}")
    }
}
