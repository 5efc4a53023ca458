//! Chunked upload assembly
//!
//! Large files arrive as numbered chunks, possibly out of order and in
//! parallel. Each chunk is staged as `{name}.part{index}` in a `__chunks__`
//! directory beside the destination. The assembler tracks which indices a
//! session has received and, when the last missing one lands, concatenates
//! the chunks in index order into a temporary file in the staging directory
//! and renames it over the destination.
//!
//! A session is keyed by the destination path and the declared chunk count.
//! Its mutex serializes chunk writes and doubles as the claim for assembly,
//! so a file is assembled at most once even when chunks race. Sessions are
//! only created under the assembler's creation lock, after any older session
//! for the same destination has been discarded, so the chunk files two
//! sessions share by name are never written and deleted concurrently.

use crate::sanitize::sanitize_upload_name;
use crate::{FsError, Result};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use walkdir::WalkDir;
use xxhash_rust::xxh3::Xxh3;

/// Name of the hidden staging directory
pub const STAGING_DIR: &str = "__chunks__";

/// Largest declared chunk count accepted unless configured otherwise
pub const DEFAULT_MAX_CHUNKS: u32 = 8192;

/// Stable identifier of an upload session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self> {
        u64::from_str_radix(s, 16)
            .map(SessionId)
            .map_err(|_| FsError::InvalidChunk(format!("invalid session id: {}", s)))
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for SessionId {
    type Error = FsError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

/// What happened to a received chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum ChunkOutcome {
    /// Stored; the session still misses chunks
    Waiting {
        session: SessionId,
        received: u32,
        total: u32,
    },
    /// This chunk completed the session and the file was assembled
    Assembled { session: SessionId, path: PathBuf },
}

struct SessionSlot {
    /// Immutable, readable without taking the state lock
    destination: PathBuf,
    state: Mutex<SessionState>,
}

struct SessionState {
    staging: PathBuf,
    safe_name: String,
    total: u32,
    received: Vec<bool>,
    received_count: u32,
    prepared: bool,
    closed: bool,
    last_touched: Instant,
}

impl SessionState {
    fn new(staging: PathBuf, safe_name: String, total: u32) -> Self {
        Self {
            staging,
            safe_name,
            total,
            received: vec![false; total as usize],
            received_count: 0,
            prepared: false,
            closed: false,
            last_touched: Instant::now(),
        }
    }

    fn chunk_path(&self, index: u32) -> PathBuf {
        chunk_path(&self.staging, &self.safe_name, index)
    }

    /// Drop chunk files of this name left behind by an earlier, dead upload
    fn prepare(&mut self) {
        let prefix = format!("{}.part", self.safe_name);
        if let Ok(dir) = fs::read_dir(&self.staging) {
            for entry in dir.flatten() {
                let name = entry.file_name();
                let is_part = name
                    .to_str()
                    .and_then(|n| n.strip_prefix(&prefix))
                    .is_some_and(|index| !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()));
                if is_part {
                    tracing::debug!("Removing leftover chunk {}", entry.path().display());
                    let _ = fs::remove_file(entry.path());
                }
            }
        }
        self.prepared = true;
    }

    fn mark(&mut self, index: u32) {
        let slot = &mut self.received[index as usize];
        if !*slot {
            *slot = true;
            self.received_count += 1;
        }
        self.last_touched = Instant::now();
    }

    fn is_complete(&self) -> bool {
        self.received_count == self.total
    }

    fn assembly_path(&self) -> PathBuf {
        self.staging.join(format!("{}.assembling", self.safe_name))
    }

    /// Concatenate chunks `0..total` in order, then move the result over
    /// `destination`. A failure leaves any existing destination untouched.
    fn assemble(&self, destination: &Path) -> Result<()> {
        let assembling = self.assembly_path();
        if let Err(e) = self.concatenate(&assembling) {
            let _ = fs::remove_file(&assembling);
            return Err(e);
        }
        if let Err(e) = fs::rename(&assembling, destination) {
            let _ = fs::remove_file(&assembling);
            return Err(e.into());
        }

        for index in 0..self.total {
            let _ = fs::remove_file(self.chunk_path(index));
        }
        remove_staging_dir(&self.staging);
        Ok(())
    }

    fn concatenate(&self, into: &Path) -> Result<()> {
        let mut output = BufWriter::new(fs::File::create(into)?);
        for index in 0..self.total {
            let mut input = fs::File::open(self.chunk_path(index))?;
            io::copy(&mut input, &mut output)?;
        }
        output.flush()?;
        output.get_ref().sync_all()?;
        Ok(())
    }

    /// Remove every chunk file of this session
    fn discard(&self) {
        for index in 0..self.total {
            let _ = fs::remove_file(self.chunk_path(index));
        }
        let _ = fs::remove_file(self.assembly_path());
        remove_staging_dir(&self.staging);
    }
}

/// Staging directory used for uploads into `target_dir`
pub fn staging_dir(target_dir: &Path) -> PathBuf {
    target_dir.join(STAGING_DIR)
}

fn chunk_path(staging: &Path, safe_name: &str, index: u32) -> PathBuf {
    staging.join(format!("{}.part{}", safe_name, index))
}

fn remove_staging_dir(staging: &Path) {
    // Fails while other uploads still stage files here; that is fine.
    if let Err(e) = fs::remove_dir(staging) {
        tracing::debug!("Staging directory kept {}: {}", staging.display(), e);
    }
}

/// Tracks in-flight upload sessions and assembles completed ones
pub struct ChunkedUploadAssembler {
    sessions: DashMap<SessionId, Arc<SessionSlot>>,
    /// Held while a session is created and its predecessors discarded
    creation: Mutex<()>,
    max_chunks: u32,
}

impl Default for ChunkedUploadAssembler {
    fn default() -> Self {
        Self::with_max_chunks(DEFAULT_MAX_CHUNKS)
    }
}

impl ChunkedUploadAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assembler refusing sessions that declare more than `max_chunks` chunks
    pub fn with_max_chunks(max_chunks: u32) -> Self {
        Self {
            sessions: DashMap::new(),
            creation: Mutex::new(()),
            max_chunks,
        }
    }

    pub fn max_chunks(&self) -> u32 {
        self.max_chunks
    }

    /// Session key for `total` chunks assembling into `destination`
    pub fn session_id(destination: &Path, total: u32) -> SessionId {
        let mut hasher = Xxh3::new();
        hasher.update(destination.as_os_str().as_encoded_bytes());
        hasher.update(&total.to_le_bytes());
        SessionId(hasher.digest())
    }

    /// Number of sessions still waiting for chunks
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Store chunk `index` of `total` for `file_name` in `target_dir`
    ///
    /// Re-sending an index replaces the earlier bytes. The chunk that
    /// completes the session triggers assembly, whatever its index. An
    /// existing file at the destination is replaced; a directory is not.
    pub fn save_chunk(
        &self,
        target_dir: &Path,
        file_name: &str,
        index: u32,
        total: u32,
        bytes: &[u8],
    ) -> Result<ChunkOutcome> {
        if total == 0 {
            return Err(FsError::InvalidChunk("total chunk count must be positive".to_string()));
        }
        if total > self.max_chunks {
            return Err(FsError::InvalidChunk(format!(
                "{} chunks exceed the limit of {}",
                total, self.max_chunks
            )));
        }
        if index >= total {
            return Err(FsError::InvalidChunk(format!(
                "chunk index {} is out of range for {} chunks",
                index, total
            )));
        }

        let safe_name = sanitize_upload_name(file_name);
        let destination = target_dir.join(&safe_name);
        if destination.is_dir() {
            return Err(FsError::NotAFile(safe_name));
        }
        let id = Self::session_id(&destination, total);

        loop {
            let slot = self.slot(id, &destination, target_dir, &safe_name, total);
            let mut state = slot.state.lock();
            if state.closed {
                // Assembled or abandoned while we waited; start over.
                continue;
            }
            if !state.prepared {
                state.prepare();
            }

            fs::create_dir_all(&state.staging)?;
            fs::write(state.chunk_path(index), bytes)?;
            state.mark(index);
            tracing::debug!(
                "Chunk {}/{} of {} stored ({} bytes)",
                index + 1,
                total,
                safe_name,
                bytes.len()
            );

            if !state.is_complete() {
                return Ok(ChunkOutcome::Waiting {
                    session: id,
                    received: state.received_count,
                    total,
                });
            }

            // Still holding the lock: late chunks for this id wait, then see
            // `closed` and start a fresh session once the map entry is gone.
            state.closed = true;
            let assembled = state.assemble(&destination);
            self.sessions.remove(&id);

            return match assembled {
                Ok(()) => {
                    tracing::info!("Assembled {} from {} chunks", destination.display(), total);
                    Ok(ChunkOutcome::Assembled {
                        session: id,
                        path: destination,
                    })
                }
                Err(e) => {
                    tracing::warn!("Assembly of {} failed: {}", destination.display(), e);
                    state.discard();
                    Err(e)
                }
            };
        }
    }

    /// Existing session `id`, or a new one once older sessions for the same
    /// destination are gone
    fn slot(&self, id: SessionId, destination: &Path, target_dir: &Path, safe_name: &str, total: u32) -> Arc<SessionSlot> {
        if let Some(slot) = self.sessions.get(&id) {
            return slot.clone();
        }

        // Never taken while a session lock is held.
        let _creating = self.creation.lock();
        if let Some(slot) = self.sessions.get(&id) {
            return slot.clone();
        }
        self.supersede(id, destination);

        let slot = Arc::new(SessionSlot {
            destination: destination.to_path_buf(),
            state: Mutex::new(SessionState::new(staging_dir(target_dir), safe_name.to_string(), total)),
        });
        self.sessions.insert(id, slot.clone());
        slot
    }

    /// A new declared chunk count for the same destination means the client
    /// restarted; the older session can never complete.
    fn supersede(&self, current: SessionId, destination: &Path) {
        let stale: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|e| *e.key() != current && e.value().destination == destination)
            .map(|e| *e.key())
            .collect();

        for id in stale {
            tracing::info!("Session {} superseded by {}", id, current);
            self.abandon(id);
        }
    }

    /// Forget a session and delete its staged chunks
    ///
    /// Returns `false` if no such session is active.
    pub fn abandon(&self, id: SessionId) -> bool {
        let Some((_, slot)) = self.sessions.remove(&id) else {
            return false;
        };

        let mut state = slot.state.lock();
        state.closed = true;
        state.discard();
        tracing::info!("Abandoned upload session {} ({})", id, slot.destination.display());
        true
    }

    /// Abandon sessions that received nothing for `ttl`
    pub fn sweep(&self, ttl: Duration) -> usize {
        let idle: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|e| {
                e.value()
                    .state
                    .try_lock()
                    .is_some_and(|state| state.last_touched.elapsed() >= ttl)
            })
            .map(|e| *e.key())
            .collect();

        let swept = idle.into_iter().filter(|id| self.abandon(*id)).count();
        if swept > 0 {
            tracing::info!("Swept {} idle upload sessions", swept);
        }
        swept
    }

    /// Delete chunk files under `root` untouched for `ttl`
    ///
    /// Catches staging left behind by a previous process, which no in-memory
    /// session knows about. Empty staging directories are removed.
    pub fn purge_stale_staging(&self, root: &Path, ttl: Duration) -> usize {
        let threshold = SystemTime::now().checked_sub(ttl).unwrap_or(SystemTime::UNIX_EPOCH);
        let staging_dirs: Vec<PathBuf> = WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_dir() && e.file_name() == STAGING_DIR)
            .map(|e| e.into_path())
            .collect();

        let mut removed = 0;
        for dir in staging_dirs {
            let Ok(entries) = fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let modified = entry.metadata().and_then(|m| m.modified());
                if matches!(modified, Ok(time) if time < threshold) && fs::remove_file(entry.path()).is_ok() {
                    removed += 1;
                }
            }
            remove_staging_dir(&dir);
        }

        if removed > 0 {
            tracing::info!("Purged {} stale chunk files under {}", removed, root.display());
        }
        removed
    }
}
