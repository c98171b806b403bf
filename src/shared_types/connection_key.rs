use serde::Serialize;
use std::fmt;

// -----------------------------------------------------------------------------
// ----- ConnectionKey ---------------------------------------------------------

/// Composite identity of an agent session. At most one live Connection per
/// key is registered at any instant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConnectionKey {
    pub account: String,
    pub node_id: String,
}

// -----------------------------------------------------------------------------
// ----- ConnectionKey: Static -------------------------------------------------

impl ConnectionKey {
    pub fn new(account: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            node_id: node_id.into(),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- ConnectionKey: Public -------------------------------------------------

impl ConnectionKey {
    /// Both halves must be present for a key to address anything.
    pub fn is_complete(&self) -> bool {
        !self.account.trim().is_empty() && !self.node_id.trim().is_empty()
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.account, self.node_id)
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
