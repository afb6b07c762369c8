use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{info, warn};

use crate::error::{PolicyError, Result};
use crate::types::{PolicyTable, UserRecord};

/// Durable per-user policy: the auto-reply enabled set and custom prompts.
///
/// Every mutator rewrites the whole file synchronously before returning.
/// Durability is at-most-one-write: a crash between the in-memory change and
/// the rename loses that single mutation, never corrupts the file. The
/// interior mutex serializes writers so concurrent mutations cannot
/// interleave their rewrites.
pub struct PolicyStore {
    path: PathBuf,
    table: Mutex<PolicyTable>,
}

impl PolicyStore {
    /// Open the store at `path`.
    ///
    /// With no file present, the table is seeded from `bootstrap` ids and the
    /// seeded state is written immediately, so a restart no longer depends on
    /// the bootstrap configuration. An unreadable or malformed file is logged
    /// and treated as empty rather than refusing to start.
    pub fn open(path: impl Into<PathBuf>, bootstrap: &[String]) -> Result<Self> {
        let path = path.into();

        let table = if path.exists() {
            match fs::read_to_string(&path) {
                Ok(raw) => match serde_json::from_str::<PolicyTable>(&raw) {
                    Ok(table) => table,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "policy file malformed, starting empty");
                        PolicyTable::default()
                    }
                },
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "policy file unreadable, starting empty");
                    PolicyTable::default()
                }
            }
        } else {
            let mut table = PolicyTable::default();
            for id in bootstrap {
                table.enabled_users.insert(id.clone());
                table.user_config.entry(id.clone()).or_default();
            }
            if !bootstrap.is_empty() {
                info!(count = bootstrap.len(), "seeded policy from bootstrap list");
            }
            write_table(&path, &table)?;
            table
        };

        Ok(Self {
            path,
            table: Mutex::new(table),
        })
    }

    pub fn is_enabled(&self, user_id: &str) -> bool {
        self.table.lock().unwrap().enabled_users.contains(user_id)
    }

    /// Turn auto-reply on for the user. Idempotent.
    pub fn enable(&self, user_id: &str) -> Result<()> {
        let mut table = self.table.lock().unwrap();
        table.enabled_users.insert(user_id.to_string());
        table.user_config.entry(user_id.to_string()).or_default();
        write_table(&self.path, &table)
    }

    /// Turn auto-reply off. Returns whether the user was previously enabled.
    pub fn disable(&self, user_id: &str) -> Result<bool> {
        let mut table = self.table.lock().unwrap();
        if table.enabled_users.remove(user_id) {
            write_table(&self.path, &table)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Store the user's custom system prompt, verbatim.
    pub fn set_prompt(&self, user_id: &str, prompt: &str) -> Result<()> {
        let mut table = self.table.lock().unwrap();
        table
            .user_config
            .entry(user_id.to_string())
            .or_insert_with(UserRecord::default)
            .custom_prompt = Some(prompt.to_string());
        write_table(&self.path, &table)
    }

    pub fn prompt(&self, user_id: &str) -> Option<String> {
        self.table
            .lock()
            .unwrap()
            .user_config
            .get(user_id)
            .and_then(|record| record.custom_prompt.clone())
    }

    /// All user ids with auto-reply enabled, in stable order.
    pub fn enabled_users(&self) -> Vec<String> {
        self.table
            .lock()
            .unwrap()
            .enabled_users
            .iter()
            .cloned()
            .collect()
    }
}

/// Atomically replace the policy file: write a sibling temp file, then rename
/// over the target so the file is never observed half-written.
fn write_table(path: &Path, table: &PolicyTable) -> Result<()> {
    let io_err = |source| PolicyError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
    }

    let json = serde_json::to_string_pretty(table)?;

    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
    let mut tmp =
        tempfile::NamedTempFile::new_in(dir.unwrap_or(Path::new("."))).map_err(io_err)?;
    tmp.write_all(json.as_bytes()).map_err(io_err)?;
    tmp.flush().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store_at(dir: &Path) -> PolicyStore {
        PolicyStore::open(dir.join("policy.json"), &[]).unwrap()
    }

    #[test]
    fn enable_then_reload_survives_restart() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("policy.json");

        let store = PolicyStore::open(&path, &[]).unwrap();
        store.enable("wx_a").unwrap();
        drop(store);

        let reloaded = PolicyStore::open(&path, &[]).unwrap();
        assert!(reloaded.is_enabled("wx_a"));
    }

    #[test]
    fn bootstrap_seeds_and_persists_on_first_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("policy.json");

        let bootstrap = vec!["wx_a".to_string(), "wx_b".to_string()];
        let store = PolicyStore::open(&path, &bootstrap).unwrap();
        assert!(store.is_enabled("wx_a"));
        assert!(store.is_enabled("wx_b"));
        assert!(path.exists());
        drop(store);

        // The seeded state is durable even without the bootstrap list.
        let reloaded = PolicyStore::open(&path, &[]).unwrap();
        assert!(reloaded.is_enabled("wx_b"));
    }

    #[test]
    fn bootstrap_ignored_once_file_exists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("policy.json");

        let store = PolicyStore::open(&path, &[]).unwrap();
        store.enable("wx_a").unwrap();
        drop(store);

        let reloaded = PolicyStore::open(&path, &["wx_late".to_string()]).unwrap();
        assert!(reloaded.is_enabled("wx_a"));
        assert!(!reloaded.is_enabled("wx_late"));
    }

    #[test]
    fn disable_reports_prior_state() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());

        store.enable("wx_a").unwrap();
        assert!(store.disable("wx_a").unwrap());
        assert!(!store.disable("wx_a").unwrap());
        assert!(!store.disable("never_seen").unwrap());
    }

    #[test]
    fn enable_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());

        store.enable("wx_a").unwrap();
        store.enable("wx_a").unwrap();
        assert_eq!(store.enabled_users(), vec!["wx_a".to_string()]);
    }

    #[test]
    fn prompt_stored_verbatim() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());

        let prompt = "Hello <b>world</b>\n  with   spacing";
        store.set_prompt("wx_a", prompt).unwrap();
        assert_eq!(store.prompt("wx_a").as_deref(), Some(prompt));
    }

    #[test]
    fn prompt_is_independent_of_enabled_state() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());

        store.set_prompt("wx_a", "be brief").unwrap();
        assert!(!store.is_enabled("wx_a"));
        assert_eq!(store.prompt("wx_a").as_deref(), Some("be brief"));
    }

    #[test]
    fn malformed_file_starts_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("policy.json");
        fs::write(&path, "{not json").unwrap();

        let store = PolicyStore::open(&path, &[]).unwrap();
        assert!(store.enabled_users().is_empty());
    }

    #[test]
    fn file_shape_matches_wire_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("policy.json");

        let store = PolicyStore::open(&path, &[]).unwrap();
        store.enable("wx_a").unwrap();
        store.set_prompt("wx_a", "short").unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["enabled_users"], serde_json::json!(["wx_a"]));
        assert_eq!(value["user_config"]["wx_a"]["custom_prompt"], "short");
    }
}
