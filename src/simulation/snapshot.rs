//! Persisted run state: one [`Snapshot`] per checkpoint, index 0 being the
//! initial state.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ClockState;
use crate::error::StoreError;
use crate::model::fields::FieldSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub index: usize,
    /// Simulated time (s).
    pub time: f64,
    pub state: ClockState,
    /// Every non-static field by path.
    pub fields: IndexMap<String, Vec<f64>>,
}

impl Snapshot {
    pub fn capture(index: usize, state: &ClockState, fields: &FieldSet) -> Self {
        Self {
            index,
            time: state.time,
            state: state.clone(),
            fields: fields
                .dynamic()
                .map(|(_, path, values)| (path.to_string(), values.iter().copied().collect()))
                .collect(),
        }
    }
}

pub trait SnapshotStore {
    /// Store `snapshot` at its index, dropping anything stored after it.
    fn save(&mut self, snapshot: &Snapshot) -> Result<(), StoreError>;
    fn load(&self, index: usize) -> Result<Option<Snapshot>, StoreError>;
    fn len(&self) -> usize;
    /// Keep only the first `len` snapshots.
    fn truncate(&mut self, len: usize) -> Result<(), StoreError>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshots: Vec<Snapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }
}

impl SnapshotStore for MemoryStore {
    fn save(&mut self, snapshot: &Snapshot) -> Result<(), StoreError> {
        self.snapshots.truncate(snapshot.index);
        self.snapshots.push(snapshot.clone());
        Ok(())
    }

    fn load(&self, index: usize) -> Result<Option<Snapshot>, StoreError> {
        Ok(self.snapshots.get(index).cloned())
    }

    fn len(&self) -> usize {
        self.snapshots.len()
    }

    fn truncate(&mut self, len: usize) -> Result<(), StoreError> {
        self.snapshots.truncate(len);
        Ok(())
    }
}

/// One pretty-printed JSON file per snapshot, `snapshot_000042.json`.
#[derive(Debug)]
pub struct JsonFileStore {
    dir: PathBuf,
    len: usize,
}

impl JsonFileStore {
    /// Open (or create) a store directory, picking up snapshots already
    /// written there.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let mut len = 0;
        while dir.join(Self::file_name(len)).is_file() {
            len += 1;
        }
        debug!(dir = %dir.display(), snapshots = len, "opened snapshot store");
        Ok(Self { dir, len })
    }

    fn file_name(index: usize) -> String {
        format!("snapshot_{index:06}.json")
    }

    pub fn path(&self, index: usize) -> PathBuf {
        self.dir.join(Self::file_name(index))
    }
}

impl SnapshotStore for JsonFileStore {
    fn save(&mut self, snapshot: &Snapshot) -> Result<(), StoreError> {
        self.truncate(snapshot.index)?;
        let mut writer = BufWriter::new(File::create(self.path(snapshot.index))?);
        serde_json::to_writer_pretty(&mut writer, snapshot)?;
        writer.flush()?;
        self.len = snapshot.index + 1;
        Ok(())
    }

    fn load(&self, index: usize) -> Result<Option<Snapshot>, StoreError> {
        if index >= self.len {
            return Ok(None);
        }
        let reader = BufReader::new(File::open(self.path(index))?);
        Ok(Some(serde_json::from_reader(reader)?))
    }

    fn len(&self) -> usize {
        self.len
    }

    fn truncate(&mut self, len: usize) -> Result<(), StoreError> {
        for index in len..self.len {
            let path = self.path(index);
            if path.exists() {
                fs::remove_file(path)?;
            }
        }
        self.len = self.len.min(len);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::Phase;
    use tempfile::tempdir;

    fn snapshot(index: usize) -> Snapshot {
        let mut fields = IndexMap::new();
        fields.insert("env.oxy".to_string(), vec![0.1 * index as f64, 0.2, 0.3]);
        Snapshot {
            index,
            time: 60.0 * index as f64,
            state: ClockState {
                time: 60.0 * index as f64,
                dt: 60.0,
                steps: index,
                phase: Phase::Running,
                stopped: false,
                history: Vec::new(),
            },
            fields,
        }
    }

    #[test]
    fn memory_store_overwrites_tail() {
        let mut store = MemoryStore::new();
        for i in 0..4 {
            store.save(&snapshot(i)).unwrap();
        }
        store.save(&snapshot(2)).unwrap();
        assert_eq!(store.len(), 3);
        assert_eq!(store.load(2).unwrap(), Some(snapshot(2)));
        assert_eq!(store.load(3).unwrap(), None);
    }

    #[test]
    fn json_store_round_trips_and_reopens() {
        let dir = tempdir().unwrap();
        {
            let mut store = JsonFileStore::open(dir.path()).unwrap();
            for i in 0..3 {
                store.save(&snapshot(i)).unwrap();
            }
            assert_eq!(store.load(1).unwrap(), Some(snapshot(1)));
        }
        let mut store = JsonFileStore::open(dir.path()).unwrap();
        assert_eq!(store.len(), 3);
        store.truncate(1).unwrap();
        assert_eq!(store.len(), 1);
        assert!(!dir.path().join("snapshot_000002.json").exists());
        assert_eq!(store.load(0).unwrap(), Some(snapshot(0)));
    }

    #[test]
    fn saved_files_are_complete_and_failures_surface() {
        let dir = tempdir().unwrap();
        let mut store = JsonFileStore::open(dir.path()).unwrap();
        store.save(&snapshot(0)).unwrap();
        let text = fs::read_to_string(store.path(0)).unwrap();
        let on_disk: Snapshot = serde_json::from_str(&text).unwrap();
        assert_eq!(on_disk, snapshot(0));

        fs::remove_dir_all(dir.path()).unwrap();
        assert!(matches!(store.save(&snapshot(1)), Err(StoreError::Io(_))));
        assert_eq!(store.len(), 1);
    }
}
