use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// The full on-disk policy table.
///
/// Rewritten as a whole on every mutation (no partial updates), so a reader
/// never observes a half-written table. Ordered containers keep the file
/// diff-friendly across rewrites.
///
/// Enabled-set membership and prompt configuration are independent: a user
/// may have a `custom_prompt` on record while absent from `enabled_users`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyTable {
    #[serde(default)]
    pub user_config: BTreeMap<String, UserRecord>,
    #[serde(default)]
    pub enabled_users: BTreeSet<String>,
}

/// Per-user configuration record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(default)]
    pub custom_prompt: Option<String>,
}
