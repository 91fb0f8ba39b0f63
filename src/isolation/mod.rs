//! Tenant and entity isolation.
//!
//! Two stackable row-level policy families:
//!
//! - **Tenant**: every isolated table carries a `server_id` column defaulted
//!   from the session; rows are visible only to the matching tenant.
//! - **Entity**: rows are filtered by the bound entity, either directly or
//!   through room/channel participation, according to the table's
//!   [`TableTraits`].
//!
//! The installer and the transaction-scoped context live in `postgres`.

pub mod policy;
pub mod registry;

use serde::{Deserialize, Serialize};

pub use policy::QualifiedTable;
pub use registry::{EntityIsolation, ParticipantKind, TableRegistry, TableTraits};

/// Per-table result of an install or uninstall pass
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyReport {
    /// Tables where every statement succeeded
    pub applied: Vec<String>,
    /// Tables that failed, with the reason
    pub failed: Vec<(String, String)>,
}

impl PolicyReport {
    /// Whether every table succeeded
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Row-level security state of one table
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableIsolationStatus {
    /// Schema-qualified table
    pub table: String,
    /// Row-level security enabled
    pub rls_enabled: bool,
    /// Row-level security forced on the owner
    pub rls_forced: bool,
    /// Tenant policy installed
    pub tenant_policy: bool,
    /// Entity policy installed
    pub entity_policy: bool,
}
