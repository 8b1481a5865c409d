// src/lock/manager.rs

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::lock::record::{encode_task_id, LockRecord};

/// Outcome of [`LockManager::acquire`].
#[derive(Debug, Clone, PartialEq)]
pub enum AcquireOutcome {
    /// The caller now holds the lock. `previous` is set when an expired
    /// lock was taken over or a valid lock was forcibly stolen, so callers
    /// can log the displaced holder.
    Acquired { previous: Option<LockRecord> },

    /// The task is claimed by someone else; the caller must not proceed.
    Held(LockRecord),
}

impl AcquireOutcome {
    pub fn is_acquired(&self) -> bool {
        matches!(self, AcquireOutcome::Acquired { .. })
    }
}

/// Outcome of [`LockManager::release`].
#[derive(Debug, Clone, PartialEq)]
pub enum ReleaseOutcome {
    /// Lock removed, or there was nothing to release.
    Released,

    /// Lock is held by a different worker; nothing was deleted.
    Refused(LockRecord),
}

impl ReleaseOutcome {
    pub fn is_released(&self) -> bool {
        matches!(self, ReleaseOutcome::Released)
    }

    /// Human-readable refusal reason, for operator diagnostics.
    pub fn message(&self) -> String {
        match self {
            ReleaseOutcome::Released => "released".to_string(),
            ReleaseOutcome::Refused(rec) => format!("held by {}", rec.worker),
        }
    }
}

/// Manages per-task lock files in a single directory.
///
/// There is no hidden process-wide state: every manager is parameterized
/// by its directory, and all decisions are made against the files in it.
#[derive(Debug, Clone)]
pub struct LockManager {
    dir: PathBuf,
}

impl LockManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn lock_path(&self, task_id: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", encode_task_id(task_id)))
    }

    /// Claim `task_id` for `holder`.
    ///
    /// The existing-lock read, ownership check, and new-lock write happen as
    /// one critical section, guarded by an OS-level exclusive lock held on
    /// the lock file for the duration:
    ///
    /// 1. no existing lock: claim it
    /// 2. same holder: refresh the timestamp (extends the timeout window)
    /// 3. expired lock: take over, reporting the previous record
    /// 4. valid lock, other holder, `force`: steal, reporting the previous
    /// 5. valid lock, other holder: refuse
    pub fn acquire(
        &self,
        task_id: &str,
        holder: &str,
        timeout_hours: f64,
        force: bool,
    ) -> Result<AcquireOutcome> {
        fs::create_dir_all(&self.dir)?;

        let path = self.lock_path(task_id);
        let mut file = create_and_lock(&path)?;

        let existing = read_record(&mut file, &path);

        let outcome = match existing {
            None => {
                debug!(task = %task_id, holder = %holder, "acquired fresh lock");
                write_record(&mut file, &LockRecord::new(task_id, holder, timeout_hours))?;
                AcquireOutcome::Acquired { previous: None }
            }
            Some(rec) if rec.worker == holder => {
                debug!(task = %task_id, holder = %holder, "refreshing own lock");
                write_record(&mut file, &LockRecord::new(task_id, holder, timeout_hours))?;
                AcquireOutcome::Acquired { previous: None }
            }
            Some(rec) if rec.is_expired() => {
                warn!(
                    task = %task_id,
                    holder = %holder,
                    previous_holder = %rec.worker,
                    age_hours = rec.age_hours(),
                    "taking over expired lock"
                );
                write_record(&mut file, &LockRecord::new(task_id, holder, timeout_hours))?;
                AcquireOutcome::Acquired {
                    previous: Some(rec),
                }
            }
            Some(rec) if force => {
                warn!(
                    task = %task_id,
                    holder = %holder,
                    previous_holder = %rec.worker,
                    "forcibly stealing valid lock"
                );
                write_record(&mut file, &LockRecord::new(task_id, holder, timeout_hours))?;
                AcquireOutcome::Acquired {
                    previous: Some(rec),
                }
            }
            Some(rec) => {
                debug!(
                    task = %task_id,
                    holder = %holder,
                    current_holder = %rec.worker,
                    age_hours = rec.age_hours(),
                    "lock held by another worker"
                );
                AcquireOutcome::Held(rec)
            }
        };

        // Dropping `file` releases the advisory lock.
        Ok(outcome)
    }

    /// Release the lock on `task_id`.
    ///
    /// No-op success when no lock file exists. Requires the holder to match
    /// unless `force`. A lock file that fails to parse is deleted and the
    /// release succeeds (self-healing).
    pub fn release(&self, task_id: &str, holder: &str, force: bool) -> Result<ReleaseOutcome> {
        let path = self.lock_path(task_id);
        let Some(mut file) = open_and_lock(&path)? else {
            return Ok(ReleaseOutcome::Released);
        };

        match read_record(&mut file, &path) {
            None => {
                warn!(task = %task_id, "deleting unparseable lock file");
                fs::remove_file(&path)?;
                Ok(ReleaseOutcome::Released)
            }
            Some(rec) if rec.worker == holder || force => {
                debug!(task = %task_id, holder = %holder, "released lock");
                fs::remove_file(&path)?;
                Ok(ReleaseOutcome::Released)
            }
            Some(rec) => {
                debug!(
                    task = %task_id,
                    holder = %holder,
                    current_holder = %rec.worker,
                    "refusing release for non-holder"
                );
                Ok(ReleaseOutcome::Refused(rec))
            }
        }
    }

    /// Current lock record for a task, parseable or not at all.
    pub fn get(&self, task_id: &str) -> Result<Option<LockRecord>> {
        let path = self.lock_path(task_id);
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(read_record(&mut file, &path))
    }

    /// All parseable lock records, expired ones included.
    pub fn list(&self) -> Result<Vec<LockRecord>> {
        let mut records = Vec::new();
        for path in self.lock_files()? {
            let mut file = match File::open(&path) {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            if let Some(rec) = read_record(&mut file, &path) {
                records.push(rec);
            }
        }
        records.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        Ok(records)
    }

    /// Delete every expired lock file, returning the removed records.
    pub fn cleanup_expired(&self) -> Result<Vec<LockRecord>> {
        let mut removed = Vec::new();
        for path in self.lock_files()? {
            let Some(mut file) = open_and_lock(&path)? else {
                continue;
            };
            match read_record(&mut file, &path) {
                Some(rec) if rec.is_expired() => {
                    warn!(
                        task = %rec.task_id,
                        holder = %rec.worker,
                        age_hours = rec.age_hours(),
                        "removing expired lock"
                    );
                    fs::remove_file(&path)?;
                    removed.push(rec);
                }
                Some(_) => {}
                None => {
                    warn!(path = %path.display(), "removing unparseable lock file");
                    fs::remove_file(&path)?;
                }
            }
        }
        removed.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        Ok(removed)
    }

    /// Whether the task is currently claimed by a valid (non-expired) lock.
    ///
    /// `exclude_holder` lets a worker ask "is this locked by anyone else?".
    pub fn is_locked(&self, task_id: &str, exclude_holder: Option<&str>) -> Result<bool> {
        match self.get(task_id)? {
            Some(rec) if rec.is_expired() => Ok(false),
            Some(rec) => Ok(exclude_holder != Some(rec.worker.as_str())),
            None => Ok(false),
        }
    }

    fn lock_files(&self) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        if !self.dir.is_dir() {
            return Ok(paths);
        }
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|e| e == "lock") {
                paths.push(path);
            }
        }
        Ok(paths)
    }
}

/// Open (creating if needed) and exclusively lock the lock file at `path`.
///
/// The advisory lock keys on the file itself, and `release`/
/// `cleanup_expired` unlink lock files: a lock acquired on a handle whose
/// file was unlinked while we waited excludes nobody. After locking, the
/// handle is verified to still be the file at `path`; when it is not, the
/// open is retried against the current file.
fn create_and_lock(path: &Path) -> Result<File> {
    loop {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;
        file.lock_exclusive()?;
        if is_current(&file, path)? {
            return Ok(file);
        }
        debug!(path = %path.display(), "lock file unlinked while waiting; reopening");
    }
}

/// [`create_and_lock`] for an existing lock file. `None` when there is no
/// file to lock, including one unlinked while waiting and never recreated.
fn open_and_lock(path: &Path) -> Result<Option<File>> {
    loop {
        let file = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        file.lock_exclusive()?;
        if is_current(&file, path)? {
            return Ok(Some(file));
        }
        debug!(path = %path.display(), "lock file unlinked while waiting; reopening");
    }
}

/// Whether the locked handle still refers to the file at `path`.
#[cfg(unix)]
fn is_current(file: &File, path: &Path) -> Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let held = file.metadata()?;
    match fs::metadata(path) {
        Ok(on_disk) => Ok(held.dev() == on_disk.dev() && held.ino() == on_disk.ino()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Windows refuses to unlink a file with open handles, so the path's
/// presence is sufficient.
#[cfg(not(unix))]
fn is_current(_file: &File, path: &Path) -> Result<bool> {
    Ok(path.exists())
}

/// Read and parse the record in an open lock file.
///
/// Empty or corrupt content is reported as "no lock"; callers holding the
/// write lock overwrite or delete it.
fn read_record(file: &mut File, path: &Path) -> Option<LockRecord> {
    let mut contents = String::new();
    if let Err(e) = file.read_to_string(&mut contents) {
        warn!(path = %path.display(), error = %e, "failed to read lock file");
        return None;
    }
    if contents.trim().is_empty() {
        return None;
    }
    match serde_json::from_str(&contents) {
        Ok(rec) => Some(rec),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to parse lock file");
            None
        }
    }
}

/// Overwrite the open lock file with a new record.
fn write_record(file: &mut File, record: &LockRecord) -> Result<()> {
    file.seek(SeekFrom::Start(0))?;
    file.set_len(0)?;
    let json = serde_json::to_vec_pretty(record)?;
    file.write_all(&json)?;
    file.flush()?;
    Ok(())
}
