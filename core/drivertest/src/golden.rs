//! Golden snapshots of what each conformance case observed.
//!
//! A snapshot is an ordered map of named JSON values (sizes, content types,
//! listed keys). Snapshots are stored as `<golden_dir>/<case>.json`, with the
//! case name percent-encoded, so a recorded run against a live provider can
//! be compared with later runs.

use anyhow::{bail, Context};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Bytes kept verbatim in golden file names.
const FILE_NAME: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_');

/// How the harness treats golden files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoldenMode {
    /// Compare against the golden file when one exists.
    #[default]
    Replay,
    /// Overwrite golden files with this run's observations.
    Record,
    /// Ignore golden files.
    Off,
}

/// Observations made by one case.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    values: BTreeMap<String, Value>,
}

impl Snapshot {
    pub fn record(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Golden files under one directory.
#[derive(Debug, Clone)]
pub struct GoldenStore {
    dir: PathBuf,
    mode: GoldenMode,
}

impl GoldenStore {
    pub fn new(dir: impl Into<PathBuf>, mode: GoldenMode) -> Self {
        Self {
            dir: dir.into(),
            mode,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding the snapshot of `case`.
    ///
    /// # Postconditions
    /// - Distinct case names map to distinct files
    pub fn path_for(&self, case: &str) -> PathBuf {
        let file = utf8_percent_encode(case, FILE_NAME);
        self.dir.join(format!("{}.json", file))
    }

    /// Record or compare `snapshot` according to the mode.
    pub async fn check(&self, case: &str, snapshot: &Snapshot) -> anyhow::Result<()> {
        let path = self.path_for(case);
        match self.mode {
            GoldenMode::Off => Ok(()),
            GoldenMode::Record => {
                fs::create_dir_all(&self.dir)
                    .await
                    .with_context(|| format!("create golden dir {}", self.dir.display()))?;
                let encoded = serde_json::to_vec_pretty(snapshot)?;
                fs::write(&path, encoded)
                    .await
                    .with_context(|| format!("write golden file {}", path.display()))?;
                debug!(case, path = %path.display(), "recorded golden snapshot");
                Ok(())
            }
            GoldenMode::Replay => {
                let raw = match fs::read(&path).await {
                    Ok(raw) => raw,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        debug!(case, path = %path.display(), "no golden snapshot, skipping");
                        return Ok(());
                    }
                    Err(e) => {
                        return Err(e)
                            .with_context(|| format!("read golden file {}", path.display()))
                    }
                };
                let golden: Snapshot = serde_json::from_slice(&raw)
                    .with_context(|| format!("parse golden file {}", path.display()))?;
                if &golden != snapshot {
                    bail!(
                        "golden mismatch for {} ({}): recorded {}, observed {}",
                        case,
                        path.display(),
                        serde_json::to_string(&golden)?,
                        serde_json::to_string(snapshot)?
                    );
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn snapshot(size: u64) -> Snapshot {
        let mut snap = Snapshot::default();
        snap.record("size", size);
        snap.record("keys", vec!["a", "b"]);
        snap
    }

    #[tokio::test]
    async fn test_record_then_replay() {
        let temp = TempDir::new().unwrap();
        let recorder = GoldenStore::new(temp.path(), GoldenMode::Record);
        recorder.check("write_read", &snapshot(3)).await.unwrap();
        assert!(recorder.path_for("write_read").is_file());

        let replayer = GoldenStore::new(temp.path(), GoldenMode::Replay);
        replayer.check("write_read", &snapshot(3)).await.unwrap();

        let err = replayer.check("write_read", &snapshot(4)).await.unwrap_err();
        assert!(err.to_string().contains("golden mismatch"));
    }

    #[tokio::test]
    async fn test_replay_without_file_is_skipped() {
        let temp = TempDir::new().unwrap();
        let store = GoldenStore::new(temp.path().join("missing"), GoldenMode::Replay);
        store.check("anything", &snapshot(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_off_never_touches_disk() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("golden");
        let store = GoldenStore::new(&dir, GoldenMode::Off);
        store.check("case", &snapshot(1)).await.unwrap();
        assert!(!dir.exists());
    }

    #[test]
    fn test_path_for_escapes_case_names() {
        let store = GoldenStore::new("/tmp/g", GoldenMode::Replay);
        assert_eq!(
            store.path_for("write_read"),
            PathBuf::from("/tmp/g/write_read.json")
        );
        assert_eq!(
            store.path_for("as/verify content language"),
            PathBuf::from("/tmp/g/as%2Fverify%20content%20language.json")
        );
    }

    #[test]
    fn test_path_for_keeps_similar_names_apart() {
        let store = GoldenStore::new("/tmp/g", GoldenMode::Replay);
        let names = ["as/a b", "as/a_b", "as_a b", "as/a%20b", "as/a-b"];
        let paths: std::collections::HashSet<_> =
            names.iter().map(|n| store.path_for(n)).collect();
        assert_eq!(paths.len(), names.len());
    }

    #[test]
    fn test_mode_serde() {
        let mode: GoldenMode = serde_json::from_str("\"record\"").unwrap();
        assert_eq!(mode, GoldenMode::Record);
    }
}
