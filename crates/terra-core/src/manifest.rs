//! Sensor-file manifest.
//!
//! The manifest maps a sensor-capture id to the ordered list of files the
//! capture produced. Paths are relative to the data root and normally carry
//! the session folder, e.g. `100_2023-01-01/100_2023-01-01_rec.bag`. One
//! physical capture can serve two logical sensor channels, so identical path
//! lists under different ids are expected.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use rusqlite::types::Value;

use crate::dataflow::DataflowError;
use crate::ledger::{MANIFEST_ID_COLUMN, MANIFEST_PATHS_COLUMN};
use crate::store::{Table, json_value};

/// A bare recording name starting with its session, e.g.
/// `100_2023-01-01_10h-00m-00s_rec.bag`.
static SESSION_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+_[\d-]+)_.*").expect("session regex is valid"));

/// One manifest row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub id: String,
    pub paths: Vec<String>,
}

/// The manifest, ordered by id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SensorFileManifest {
    entries: Vec<ManifestEntry>,
}

impl SensorFileManifest {
    /// Builds a manifest from entries, ordering them by id.
    pub fn from_entries(mut entries: Vec<ManifestEntry>) -> Self {
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        Self { entries }
    }

    /// Reads every row of the manifest table.
    ///
    /// # Errors
    ///
    /// Returns [`DataflowError::Store`] if the query fails and
    /// [`DataflowError::Manifest`] if a path list is not a JSON array of
    /// strings.
    pub fn load(table: &Table) -> Result<Self, DataflowError> {
        let rows = table.query(Some(&[MANIFEST_ID_COLUMN, MANIFEST_PATHS_COLUMN]), None)?;
        let mut entries = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            let Some(id) = row.text(MANIFEST_ID_COLUMN) else {
                return Err(DataflowError::Manifest {
                    id: String::new(),
                    reason: "row without an id".into(),
                });
            };
            let paths = match row.get(MANIFEST_PATHS_COLUMN) {
                None | Some(Value::Null) => Vec::new(),
                Some(Value::Text(json)) => {
                    serde_json::from_str(json).map_err(|e| DataflowError::Manifest {
                        id: id.to_string(),
                        reason: e.to_string(),
                    })?
                },
                Some(other) => {
                    return Err(DataflowError::Manifest {
                        id: id.to_string(),
                        reason: format!("path list is not text: {other:?}"),
                    });
                },
            };
            entries.push(ManifestEntry {
                id: id.to_string(),
                paths,
            });
        }
        tracing::debug!(table_id = table.table_id(), entries = entries.len(), "loaded manifest");
        Ok(Self::from_entries(entries))
    }

    /// All entries, ordered by id.
    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    /// Entries with duplicate path lists removed, keeping the first id.
    pub fn deduplicated(&self) -> Vec<&ManifestEntry> {
        let mut seen: HashSet<&[String]> = HashSet::new();
        self.entries
            .iter()
            .filter(|entry| seen.insert(entry.paths.as_slice()))
            .collect()
    }

    /// The first id whose path list contains `path`.
    pub fn resolve(&self, path: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.paths.iter().any(|p| p == path))
            .map(|entry| entry.id.as_str())
    }

    /// Path to first id, for resolving many paths at once.
    pub fn path_index(&self) -> HashMap<&str, &str> {
        let mut index = HashMap::new();
        for entry in &self.entries {
            for path in &entry.paths {
                index.entry(path.as_str()).or_insert(entry.id.as_str());
            }
        }
        index
    }

    /// Prefixes bare recording names in the manifest table with their session
    /// folder.
    ///
    /// Returns the number of rows rewritten; rows already in normal form are
    /// left alone, so a second run returns 0.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest cannot be read or a row cannot be
    /// updated.
    pub fn normalize_session_prefixes(table: &Table) -> Result<usize, DataflowError> {
        let manifest = Self::load(table)?;
        let mut updated = 0;
        for entry in manifest.entries() {
            let paths: Vec<String> = entry
                .paths
                .iter()
                .map(|p| add_session_prefix(p).to_string())
                .collect();
            if paths == entry.paths {
                continue;
            }
            table.update_row(
                &Value::Text(entry.id.clone()),
                &[json_value(&paths)?],
                Some(&[MANIFEST_PATHS_COLUMN]),
            )?;
            tracing::debug!(id = %entry.id, "added session prefix");
            updated += 1;
        }
        tracing::info!(table_id = table.table_id(), updated, "normalized session prefixes");
        Ok(updated)
    }
}

/// Puts a bare recording name under its session folder.
///
/// `100_2023-01-01_rec.bag` becomes `100_2023-01-01/100_2023-01-01_rec.bag`.
/// Names that already contain a folder, or do not start with a session, are
/// returned unchanged.
pub fn add_session_prefix(fname: &str) -> std::borrow::Cow<'_, str> {
    if fname.contains('/') {
        return fname.into();
    }
    match SESSION_NAME.captures(fname).and_then(|c| c.get(1)) {
        Some(session) => format!("{}/{fname}", session.as_str()).into(),
        None => fname.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{LEDGER_TABLE, MANIFEST_TABLE, create_ledger_tables};
    use crate::store::{Database, InsertOptions};

    fn entry(id: &str, paths: &[&str]) -> ManifestEntry {
        ManifestEntry {
            id: id.into(),
            paths: paths.iter().map(|p| (*p).to_string()).collect(),
        }
    }

    fn manifest_table(rows: &[(&str, &str)]) -> (Database, Table) {
        let db = Database::in_memory().unwrap();
        let (_ledger, manifest) = create_ledger_tables(&db, LEDGER_TABLE, MANIFEST_TABLE).unwrap();
        let rows: Vec<Vec<Value>> = rows
            .iter()
            .map(|(id, json)| vec![Value::Text((*id).into()), Value::Text((*json).into())])
            .collect();
        manifest
            .insert_rows(&rows, &[MANIFEST_ID_COLUMN, MANIFEST_PATHS_COLUMN], &InsertOptions::new())
            .unwrap();
        (db, manifest)
    }

    #[test]
    fn test_add_session_prefix() {
        assert_eq!(
            add_session_prefix("100001_2022-02-28_08h-55m-00s_rec.bag"),
            "100001_2022-02-28/100001_2022-02-28_08h-55m-00s_rec.bag"
        );
        assert_eq!(add_session_prefix("100001_2022-02-28/x_rec.bag"), "100001_2022-02-28/x_rec.bag");
        assert_eq!(add_session_prefix("notes.txt"), "notes.txt");
        assert_eq!(add_session_prefix("100001_notes"), "100001_notes");
    }

    #[test]
    fn test_deduplicated_keeps_first() {
        let manifest = SensorFileManifest::from_entries(vec![
            entry("mock_obs_2", &["s/A.bag"]),
            entry("mock_obs_1", &["s/A.bag"]),
            entry("mock_obs_3", &["s/B.bag", "s/A.bag"]),
        ]);

        let ids: Vec<&str> = manifest.deduplicated().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["mock_obs_1", "mock_obs_3"]);
    }

    #[test]
    fn test_resolve() {
        let manifest = SensorFileManifest::from_entries(vec![
            entry("b", &["s/x.csv", "s/y.csv"]),
            entry("a", &["s/y.csv"]),
        ]);
        assert_eq!(manifest.resolve("s/y.csv"), Some("a"));
        assert_eq!(manifest.resolve("s/x.csv"), Some("b"));
        assert_eq!(manifest.resolve("x.csv"), None);

        let index = manifest.path_index();
        assert_eq!(index.get("s/y.csv"), Some(&"a"));
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_load_from_table() {
        let (_db, table) = manifest_table(&[
            ("mock_obs_1", "[\"s/A.bag\"]"),
            ("mock_obs_0", "[\"s/B.bag\", \"s/C.csv\"]"),
        ]);

        let manifest = SensorFileManifest::load(&table).unwrap();
        assert_eq!(manifest.entries().len(), 2);
        assert_eq!(manifest.entries()[0], entry("mock_obs_0", &["s/B.bag", "s/C.csv"]));
    }

    #[test]
    fn test_load_rejects_malformed_paths() {
        let (_db, table) = manifest_table(&[("bad", "{s/A.bag}")]);
        let err = SensorFileManifest::load(&table).unwrap_err();
        assert!(matches!(err, DataflowError::Manifest { ref id, .. } if id == "bad"), "got {err:?}");
    }

    #[test]
    fn test_normalize_session_prefixes() {
        let (_db, table) = manifest_table(&[
            ("mock_obs_1", "[\"100_2023-01-01_rec.bag\", \"100_2023-01-01/100_2023-01-01_eye.hdf5\"]"),
            ("mock_obs_2", "[\"100_2023-01-01/100_2023-01-01_mic.wav\"]"),
        ]);

        assert_eq!(SensorFileManifest::normalize_session_prefixes(&table).unwrap(), 1);
        assert_eq!(SensorFileManifest::normalize_session_prefixes(&table).unwrap(), 0);

        let manifest = SensorFileManifest::load(&table).unwrap();
        assert_eq!(
            manifest.entries()[0].paths,
            vec![
                "100_2023-01-01/100_2023-01-01_rec.bag".to_string(),
                "100_2023-01-01/100_2023-01-01_eye.hdf5".to_string(),
            ]
        );
    }
}
