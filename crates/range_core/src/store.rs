//! Persisted environment records and per-environment locking.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use range_spec::record::SCHEMA_VERSION;
use range_spec::{EnvironmentRecord, EnvironmentType};

use crate::error::{CoreError, CoreResult};

/// Held for the duration of one command on one environment.
#[derive(Debug)]
pub struct EnvironmentLock {
    environment: EnvironmentType,
    _guard: OwnedMutexGuard<()>,
}

impl EnvironmentLock {
    pub fn environment(&self) -> EnvironmentType {
        self.environment
    }
}

/// One JSON record per environment under `<dir>/<environment>.json`.
///
/// Clones share the same lock table, so every command in the process that
/// goes through one store is serialized per environment.
#[derive(Clone)]
pub struct RecordStore {
    dir: PathBuf,
    locks: Arc<Mutex<HashMap<EnvironmentType, Arc<AsyncMutex<()>>>>>,
}

impl RecordStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, environment: EnvironmentType) -> PathBuf {
        self.dir.join(format!("{}.json", environment.as_str()))
    }

    /// Take the environment's lock, failing if another command holds it.
    pub fn lock(&self, environment: EnvironmentType) -> CoreResult<EnvironmentLock> {
        let mutex = self.locks.lock().entry(environment).or_default().clone();
        let guard = mutex.try_lock_owned().map_err(|_| {
            CoreError::precondition(format!(
                "another operation is in progress on the {} environment",
                environment
            ))
        })?;
        Ok(EnvironmentLock {
            environment,
            _guard: guard,
        })
    }

    pub fn load(&self, environment: EnvironmentType) -> CoreResult<Option<EnvironmentRecord>> {
        let path = self.path(environment);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)?;
        let record: EnvironmentRecord = serde_json::from_str(&content).map_err(|e| CoreError::Record {
            environment: environment.to_string(),
            message: format!("{} is not a valid record: {}", path.display(), e),
        })?;

        if record.schema_version > SCHEMA_VERSION {
            return Err(CoreError::Record {
                environment: environment.to_string(),
                message: format!(
                    "record version {} is newer than supported version {}",
                    record.schema_version, SCHEMA_VERSION
                ),
            });
        }
        if record.environment_type != environment {
            return Err(CoreError::Record {
                environment: environment.to_string(),
                message: format!("{} holds a {} record", path.display(), record.environment_type),
            });
        }
        Ok(Some(record))
    }

    pub fn load_or_new(&self, environment: EnvironmentType) -> CoreResult<EnvironmentRecord> {
        Ok(self
            .load(environment)?
            .unwrap_or_else(|| EnvironmentRecord::new(environment)))
    }

    /// Bump the revision and write the record atomically.
    pub fn save(&self, record: &mut EnvironmentRecord) -> CoreResult<()> {
        fs::create_dir_all(&self.dir)?;
        record.touch();

        let json = serde_json::to_string_pretty(record)?;
        let mut file = tempfile::NamedTempFile::new_in(&self.dir)?;
        file.write_all(json.as_bytes())?;
        file.flush()?;

        let path = self.path(record.environment_type);
        file.persist(&path).map_err(|e| CoreError::Io(e.error))?;
        debug!("Saved {} record revision {}", record.environment_type, record.revision);
        Ok(())
    }

    /// Environments that have a record on disk.
    pub fn list(&self) -> CoreResult<Vec<EnvironmentType>> {
        Ok(EnvironmentType::ALL
            .into_iter()
            .filter(|env| self.path(*env).exists())
            .collect())
    }
}
