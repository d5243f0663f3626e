use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    io::Write,
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Up,
    Down,
}

/// Per-host debounce bookkeeping, persisted across invocations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostState {
    pub failure_count: u32,
    pub status: Status,
}

impl Default for HostState {
    fn default() -> Self {
        HostState {
            failure_count: 0,
            status: Status::Up,
        }
    }
}

pub type StateMap = BTreeMap<String, HostState>;

/// Durable address -> `HostState` mapping, stored as pretty-printed JSON.
///
/// Loading never fails: a missing or wholly unparseable file is treated as
/// "no hosts seen yet", and a malformed individual record is dropped without
/// affecting the others. Saving rewrites the whole file atomically.
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> StateStore {
        StateStore { path: path.into() }
    }

    pub fn load(&self) -> StateMap {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return StateMap::new(),
            Err(e) => {
                warn!(
                    "Failed to read state file {}, starting fresh: {e}",
                    self.path.display()
                );
                return StateMap::new();
            }
        };

        let records: BTreeMap<String, serde_json::Value> = match serde_json::from_str(&content) {
            Ok(records) => records,
            Err(e) => {
                warn!(
                    "State file {} is unparseable, starting fresh: {e}",
                    self.path.display()
                );
                return StateMap::new();
            }
        };

        let mut states = StateMap::new();
        for (address, record) in records {
            match serde_json::from_value::<HostState>(record) {
                Ok(state) => {
                    states.insert(address, state);
                }
                Err(e) => {
                    warn!("Dropping malformed state record for {address}: {e}");
                }
            }
        }
        states
    }

    /// Write-new-then-rename so a crash mid-save never leaves a file that
    /// `load` cannot parse. The file is owner-readable only.
    pub fn save(&self, states: &StateMap) -> Result<(), Error> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;

        let mut temp_file = NamedTempFile::new_in(dir)?;
        let content = serde_json::to_string_pretty(states)?;
        temp_file.write_all(content.as_bytes())?;
        temp_file.flush()?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(temp_file.path(), fs::Permissions::from_mode(0o600))?;
        }

        temp_file.persist(&self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_states() -> StateMap {
        let mut states = StateMap::new();
        states.insert(
            "192.168.1.1".to_string(),
            HostState {
                failure_count: 2,
                status: Status::Up,
            },
        );
        states.insert(
            "example.com".to_string(),
            HostState {
                failure_count: 5,
                status: Status::Down,
            },
        );
        states
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let store = StateStore::new(dir.path().join("state.json"));

        let states = sample_states();
        store.save(&states).expect("Failed to save state");
        assert_eq!(store.load(), states);
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let store = StateStore::new(dir.path().join("state.json"));
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_unparseable_file_loads_empty() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("state.json");
        fs::write(&path, "not json at all {{{").unwrap();
        assert!(StateStore::new(path).load().is_empty());
    }

    #[test]
    fn test_malformed_record_does_not_poison_others() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("state.json");
        fs::write(
            &path,
            r#"{
                "10.0.0.1": { "failure_count": 4, "status": "down" },
                "10.0.0.2": { "failure_count": "four", "status": "sideways" },
                "10.0.0.3": { "failure_count": 0, "status": "up" }
            }"#,
        )
        .unwrap();

        let states = StateStore::new(path).load();
        assert_eq!(states.len(), 2);
        assert_eq!(
            states["10.0.0.1"],
            HostState {
                failure_count: 4,
                status: Status::Down,
            }
        );
        assert!(!states.contains_key("10.0.0.2"));
        assert_eq!(states["10.0.0.3"], HostState::default());
    }

    #[test]
    fn test_save_overwrites_previous_contents() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let store = StateStore::new(dir.path().join("state.json"));

        store.save(&sample_states()).unwrap();
        let mut updated = StateMap::new();
        updated.insert("example.com".to_string(), HostState::default());
        store.save(&updated).unwrap();

        assert_eq!(store.load(), updated);
    }

    #[cfg(unix)]
    #[test]
    fn test_state_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("state.json");
        StateStore::new(&path).save(&sample_states()).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
