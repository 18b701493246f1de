//! JSON file of counterparty ids that seeds the known set across restarts.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{bail, Context, Result};
use mentor_delivery::CounterpartyId;
use serde::{Deserialize, Serialize};

const KNOWN_COUNTERPARTIES_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct KnownCounterpartiesFile {
    schema_version: u32,
    counterparties: BTreeSet<CounterpartyId>,
}

/// Clones share one write lock, so concurrent writers never lose updates.
#[derive(Debug, Clone)]
pub struct KnownCounterpartyStore {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl KnownCounterpartyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ids recorded so far; a missing file is an empty set.
    pub fn load(&self) -> Result<BTreeSet<CounterpartyId>> {
        Ok(self.read_file()?.counterparties)
    }

    /// Adds `counterparty` and rewrites the file; returns false if already present.
    pub fn record(&self, counterparty: CounterpartyId) -> Result<bool> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = self.read_file()?;
        if !file.counterparties.insert(counterparty) {
            return Ok(false);
        }
        self.write_file(&file)?;
        Ok(true)
    }

    /// Removes `counterparty` and rewrites the file; returns false if it was absent.
    pub fn forget(&self, counterparty: CounterpartyId) -> Result<bool> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = self.read_file()?;
        if !file.counterparties.remove(&counterparty) {
            return Ok(false);
        }
        self.write_file(&file)?;
        Ok(true)
    }

    fn read_file(&self) -> Result<KnownCounterpartiesFile> {
        if !self.path.exists() {
            return Ok(KnownCounterpartiesFile {
                schema_version: KNOWN_COUNTERPARTIES_SCHEMA_VERSION,
                counterparties: BTreeSet::new(),
            });
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let parsed = serde_json::from_str::<KnownCounterpartiesFile>(&raw)
            .with_context(|| format!("failed to parse {}", self.path.display()))?;
        if parsed.schema_version != KNOWN_COUNTERPARTIES_SCHEMA_VERSION {
            bail!(
                "unsupported known counterparties schema version {} in {}",
                parsed.schema_version,
                self.path.display()
            );
        }
        Ok(parsed)
    }

    fn write_file(&self, file: &KnownCounterpartiesFile) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let mut payload =
            serde_json::to_string_pretty(file).context("failed to encode known counterparties")?;
        payload.push('\n');
        let temp_path = self.path.with_extension("json.tmp");
        std::fs::write(&temp_path, payload)
            .with_context(|| format!("failed to write {}", temp_path.display()))?;
        std::fs::rename(&temp_path, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }
}
