use serde::{Deserialize, Serialize};
use std::fmt;

/// An authenticated user.
///
/// Resolved once per request or connection by the auth layer and never
/// mutated afterwards. The numeric id keys the rate governor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub id: u64,
    #[serde(alias = "slug")]
    pub handle: String,
}

impl Identity {
    pub fn new(id: u64, handle: impl Into<String>) -> Self {
        Self {
            id,
            handle: handle.into(),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.handle, self.id)
    }
}
