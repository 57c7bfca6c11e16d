//! File-backed checkpoint store: one pretty JSON document per run.
//!
//! Execution claims are `<id>.lock` files created with `create_new`, so they
//! exclude workers in other processes sharing the directory. A claim is a
//! lease: the holder refreshes it on every save, and one left untouched for
//! longer than the claim TTL (its process died) may be taken over.

use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::types::RunState;
use crate::io::store::{CheckpointStore, StoreError, StoreResult, check_save};

/// Claims untouched for this long are considered abandoned.
pub const DEFAULT_CLAIM_TTL: Duration = Duration::from_secs(900);

/// Contents of a `<id>.lock` file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct ClaimRecord {
    holder: String,
    pid: u32,
}

/// Stores each run at `<dir>/<id>.json`, replaced atomically on save.
pub struct FileStore {
    dir: PathBuf,
    /// Serializes read-check-write sequences within this process.
    write_lock: Mutex<()>,
    /// Identifies claims taken through this instance.
    holder: String,
    claim_ttl: Duration,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
            holder: uuid::Uuid::new_v4().to_string(),
            claim_ttl: DEFAULT_CLAIM_TTL,
        }
    }

    pub fn with_claim_ttl(mut self, claim_ttl: Duration) -> Self {
        self.claim_ttl = claim_ttl;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Ids become file names; refuse anything that could escape the directory.
    fn checked_id<'a>(&self, id: &'a str) -> StoreResult<&'a str> {
        if id.is_empty()
            || !id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(id)
    }

    fn path_for(&self, id: &str) -> StoreResult<PathBuf> {
        Ok(self.dir.join(format!("{}.json", self.checked_id(id)?)))
    }

    fn claim_path(&self, id: &str) -> StoreResult<PathBuf> {
        Ok(self.dir.join(format!("{}.lock", self.checked_id(id)?)))
    }

    fn read(&self, id: &str) -> StoreResult<Option<RunState>> {
        let path = self.path_for(id)?;
        debug!(path = %path.display(), "loading run state");
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(anyhow::Error::new(err)
                    .context(format!("read run state {}", path.display()))
                    .into());
            }
        };
        let state: RunState = serde_json::from_str(&contents)
            .with_context(|| format!("parse run state {}", path.display()))?;
        Ok(Some(state))
    }

    /// Current claim on `path` and when it was last refreshed.
    fn read_claim(path: &Path) -> StoreResult<Option<(ClaimRecord, SystemTime)>> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(anyhow::Error::new(err)
                    .context(format!("read claim {}", path.display()))
                    .into());
            }
        };
        let refreshed = fs::metadata(path)
            .and_then(|meta| meta.modified())
            .with_context(|| format!("stat claim {}", path.display()))?;
        // A holder that died between create and write leaves an empty file.
        let record = serde_json::from_str(&contents).unwrap_or_default();
        Ok(Some((record, refreshed)))
    }

    fn try_create_claim(&self, path: &Path) -> io::Result<()> {
        let record = ClaimRecord {
            holder: self.holder.clone(),
            pid: std::process::id(),
        };
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        file.write_all(&serde_json::to_vec(&record).map_err(io::Error::other)?)?;
        Ok(())
    }

    fn claimed_elsewhere(id: &str, record: &ClaimRecord) -> StoreError {
        StoreError::Claimed {
            id: id.to_string(),
            holder: format!("pid {}", record.pid),
        }
    }

    /// Fails when another holder's claim exists on the run.
    fn check_claim(&self, id: &str) -> StoreResult<()> {
        match Self::read_claim(&self.claim_path(id)?)? {
            Some((record, _)) if record.holder != self.holder => {
                Err(Self::claimed_elsewhere(id, &record))
            }
            _ => Ok(()),
        }
    }

    /// Extend our lease on `id` if we hold it.
    fn refresh_claim(&self, id: &str) -> StoreResult<()> {
        let path = self.claim_path(id)?;
        if let Some((record, _)) = Self::read_claim(&path)? {
            if record.holder == self.holder {
                OpenOptions::new()
                    .write(true)
                    .open(&path)
                    .and_then(|file| file.set_modified(SystemTime::now()))
                    .with_context(|| format!("refresh claim {}", path.display()))?;
            }
        }
        Ok(())
    }

    fn write(&self, state: &RunState) -> StoreResult<()> {
        let path = self.path_for(&state.id)?;
        debug!(path = %path.display(), steps = state.steps, status = %state.status, "writing run state");
        let mut buf = serde_json::to_string_pretty(state).context("serialize run state")?;
        buf.push('\n');
        super::write_atomic(&path, &buf)?;
        Ok(())
    }
}

impl CheckpointStore for FileStore {
    fn create(&self, state: &RunState) -> StoreResult<()> {
        check_save(None, state)?;
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        if self.read(&state.id)?.is_some() {
            return Err(StoreError::AlreadyExists(state.id.clone()));
        }
        self.write(state)
    }

    fn load(&self, id: &str) -> StoreResult<RunState> {
        self.read(id)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn save(&self, state: &mut RunState) -> StoreResult<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.check_claim(&state.id)?;
        let previous = self
            .read(&state.id)?
            .ok_or_else(|| StoreError::NotFound(state.id.clone()))?;
        check_save(Some(&previous), state)?;
        state.revision += 1;
        if let Err(err) = self.write(state) {
            state.revision -= 1;
            return Err(err);
        }
        self.refresh_claim(&state.id)
    }

    fn claim(&self, id: &str) -> StoreResult<()> {
        let path = self.claim_path(id)?;
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create directory {}", self.dir.display()))?;
        match self.try_create_claim(&path) {
            Ok(()) => {
                debug!(run_id = %id, "claimed run");
                return Ok(());
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {}
            Err(err) => {
                return Err(anyhow::Error::new(err)
                    .context(format!("create claim {}", path.display()))
                    .into());
            }
        }

        let Some((record, refreshed)) = Self::read_claim(&path)? else {
            // Released in between; one more attempt.
            return self
                .try_create_claim(&path)
                .map_err(|_| StoreError::Claimed {
                    id: id.to_string(),
                    holder: "another worker".to_string(),
                });
        };
        if record.holder == self.holder {
            return Ok(());
        }
        let idle = refreshed.elapsed().unwrap_or_default();
        if idle < self.claim_ttl {
            return Err(Self::claimed_elsewhere(id, &record));
        }

        info!(run_id = %id, pid = record.pid, idle_secs = idle.as_secs(), "taking over expired claim");
        // Only one contender can move the expired file aside.
        let expired = self.dir.join(format!("{id}.lock.{}.expired", self.holder));
        if fs::rename(&path, &expired).is_err() {
            return Err(Self::claimed_elsewhere(id, &record));
        }
        if let Err(err) = fs::remove_file(&expired) {
            warn!(path = %expired.display(), error = %err, "could not remove expired claim");
        }
        self.try_create_claim(&path)
            .map_err(|_| Self::claimed_elsewhere(id, &record))
    }

    fn release(&self, id: &str) {
        let Ok(path) = self.claim_path(id) else {
            return;
        };
        match Self::read_claim(&path) {
            Ok(Some((record, _))) if record.holder == self.holder => {
                if let Err(err) = fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %err, "could not remove claim");
                } else {
                    debug!(run_id = %id, "released claim");
                }
            }
            Ok(_) => {}
            Err(err) => warn!(run_id = %id, error = %err, "could not read claim"),
        }
    }
}
