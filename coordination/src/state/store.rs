//! Durable job checkpointing
//!
//! The scheduler writes every job mutation through a [`JobStore`]. The file
//! store is an append-only JSON-lines log: each line is a full job snapshot and
//! the last snapshot for an id wins on load.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, warn};

use super::types::{Job, JobId};

/// Error type for job store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Lock poisoned")]
    LockPoisoned,
}

/// Result type for job store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Shared reference to a job store
pub type SharedJobStore = Arc<dyn JobStore>;

/// Durable job log used to rehydrate the scheduler after a restart
pub trait JobStore: Send + Sync {
    /// Persist the latest snapshot of a job
    fn save_job(&self, job: &Job) -> StoreResult<()>;

    /// Load the latest snapshot of every job ever saved
    fn load_jobs(&self) -> StoreResult<Vec<Job>>;
}

/// In-memory store for tests and ephemeral runs
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared reference to this store
    pub fn shared(self) -> SharedJobStore {
        Arc::new(self)
    }
}

impl JobStore for MemoryJobStore {
    fn save_job(&self, job: &Job) -> StoreResult<()> {
        let mut jobs = self.jobs.write().map_err(|_| StoreError::LockPoisoned)?;
        jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    fn load_jobs(&self) -> StoreResult<Vec<Job>> {
        let jobs = self.jobs.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut all: Vec<Job> = jobs.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(all)
    }
}

/// Append-only JSON-lines job log
pub struct FileJobStore {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileJobStore {
    /// Open or create a job log at the given path
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        truncate_torn_tail(&file, &path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Create a shared reference to this store
    pub fn shared(self) -> SharedJobStore {
        Arc::new(self)
    }

    /// Get the log path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrite the log so it holds exactly one snapshot per job
    pub fn compact(&self) -> StoreResult<usize> {
        let mut file = self.file.lock().map_err(|_| StoreError::LockPoisoned)?;
        let jobs = read_log(&self.path)?;

        let tmp_path = self.path.with_extension("compact");
        {
            let mut tmp = File::create(&tmp_path)?;
            for job in &jobs {
                serde_json::to_writer(&mut tmp, job)?;
                tmp.write_all(b"\n")?;
            }
            tmp.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;
        *file = OpenOptions::new().append(true).open(&self.path)?;

        debug!(path = %self.path.display(), jobs = jobs.len(), "Job log compacted");
        Ok(jobs.len())
    }
}

impl JobStore for FileJobStore {
    fn save_job(&self, job: &Job) -> StoreResult<()> {
        let mut line = serde_json::to_vec(job)?;
        line.push(b'\n');

        let mut file = self.file.lock().map_err(|_| StoreError::LockPoisoned)?;
        file.write_all(&line)?;
        file.flush()?;
        Ok(())
    }

    fn load_jobs(&self) -> StoreResult<Vec<Job>> {
        // Hold the writer lock so a concurrent append is never half-read.
        let _guard = self.file.lock().map_err(|_| StoreError::LockPoisoned)?;
        read_log(&self.path)
    }
}

/// Drop a partial final line left by a crash so the next append starts on a
/// fresh line.
fn truncate_torn_tail(file: &File, path: &Path) -> StoreResult<()> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(());
    }

    let mut reader = file;
    reader.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    reader.read_exact(&mut last)?;
    if last[0] == b'\n' {
        return Ok(());
    }

    let mut contents = Vec::with_capacity(len as usize);
    reader.seek(SeekFrom::Start(0))?;
    reader.read_to_end(&mut contents)?;
    let keep = contents
        .iter()
        .rposition(|b| *b == b'\n')
        .map_or(0, |pos| pos + 1);
    file.set_len(keep as u64)?;
    warn!(
        path = %path.display(),
        dropped_bytes = len - keep as u64,
        "Truncated torn job snapshot at end of log"
    );
    Ok(())
}

fn read_log(path: &Path) -> StoreResult<Vec<Job>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut order: Vec<JobId> = Vec::new();
    let mut latest: HashMap<JobId, Job> = HashMap::new();

    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Job>(&line) {
            Ok(job) => {
                if !latest.contains_key(&job.id) {
                    order.push(job.id.clone());
                }
                latest.insert(job.id.clone(), job);
            }
            Err(e) => {
                // A torn final line after a crash should not lose the rest of the log.
                warn!(line = line_no + 1, "Skipping unreadable job snapshot: {}", e);
            }
        }
    }

    let mut jobs: Vec<Job> = order
        .into_iter()
        .filter_map(|id| latest.remove(&id))
        .collect();
    jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(jobs)
}
