//! Named, sequentially versioned snapshot storage.
//!
//! Every snapshot name owns one namespace directory under the data root.
//! Each captured inventory becomes one immutable record file, numbered by a
//! per-name sequence that starts at 1 and only grows.
//!
//! # Directory Layout
//!
//! ```text
//! <data-dir>/
//!   mongodb/
//!     lock                  # namespace advisory lock
//!     0000000001.snapshot   # version #1
//!     0000000002.snapshot   # version #2 (latest)
//!     .tmp-a8F2kq           # in-flight write, never read
//! ```
//!
//! # Invariants
//!
//! - Records are published with a no-clobber link from a fsynced temporary
//!   file, so a torn write is never visible under a `.snapshot` name.
//! - Sequence allocation happens under the exclusive namespace lock; if a
//!   record with the chosen number still appears, allocation retries against
//!   the freshest directory listing.
//! - Content is stored byte-for-byte. A BLAKE3 digest in the header detects
//!   damage on read.
//! - `delete_before` never removes the highest sequence on disk.

use std::fs;
use std::io::{self, Write as IoWrite};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;

use crate::error::ErrorCode;
use crate::lock::{LockError, NamespaceLock};

/// Record file extension.
const RECORD_SUFFIX: &str = ".snapshot";

/// Prefix of in-flight temporary files.
const TEMP_PREFIX: &str = ".tmp-";

/// First line of every record file.
const RECORD_MAGIC: &str = "# mongodrift snapshot v1";

/// Allocation attempts before a save gives up with `PersistConflict`.
pub const MAX_SAVE_ATTEMPTS: u32 = 8;

/// Default wait for the namespace lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

const MAX_NAME_LEN: usize = 128;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur during version store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The data root or a namespace directory cannot be created or read.
    #[error("snapshot storage unavailable at {}: {source}", path.display())]
    Unavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The snapshot name is not a safe single path component.
    #[error("invalid snapshot name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    /// Every allocation attempt found its sequence number already taken.
    #[error("could not allocate a sequence for {name:?} after {attempts} attempts")]
    PersistConflict { name: String, attempts: u32 },

    /// A record file exists but its header or digest does not check out.
    #[error("corrupt snapshot record {}: {reason}", path.display())]
    CorruptRecord { path: PathBuf, reason: String },

    /// Lock acquisition failed.
    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    /// I/O error during a store operation.
    #[error("snapshot I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StoreError {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Unavailable { .. } | Self::Io(_) => ErrorCode::StorageUnavailable,
            Self::InvalidName { .. } => ErrorCode::ConfigInvalid,
            Self::PersistConflict { .. } => ErrorCode::PersistConflict,
            Self::CorruptRecord { .. } => ErrorCode::CorruptRecord,
            Self::Lock(err) => err.code(),
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One durably stored snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionRecord {
    pub name: String,
    pub sequence: u64,
    pub captured_at: DateTime<Utc>,
    pub content: String,
}

/// Header block written in front of the raw content of every record.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RecordHeader {
    sequence: u64,
    captured_at: DateTime<Utc>,
    content_len: u64,
    content_hash: String,
}

impl RecordHeader {
    fn for_content(sequence: u64, captured_at: DateTime<Utc>, content: &[u8]) -> Self {
        Self {
            sequence,
            captured_at,
            content_len: content.len() as u64,
            content_hash: content_digest(content),
        }
    }

    fn to_string_repr(&self) -> String {
        format!(
            "{RECORD_MAGIC}\nsequence: {}\ncaptured_at: {}\ncontent_len: {}\ncontent_hash: {}\n",
            self.sequence,
            format_timestamp(self.captured_at),
            self.content_len,
            self.content_hash
        )
    }

    /// Parse the header block (everything before the blank separator line).
    fn from_string_repr(s: &str) -> Option<Self> {
        let mut lines = s.lines();
        if lines.next()? != RECORD_MAGIC {
            return None;
        }

        let mut sequence = None;
        let mut captured_at = None;
        let mut content_len = None;
        let mut content_hash = None;

        for line in lines {
            if let Some(val) = line.strip_prefix("sequence: ") {
                sequence = val.parse().ok();
            } else if let Some(val) = line.strip_prefix("captured_at: ") {
                captured_at = DateTime::parse_from_rfc3339(val)
                    .ok()
                    .map(|ts| ts.with_timezone(&Utc));
            } else if let Some(val) = line.strip_prefix("content_len: ") {
                content_len = val.parse().ok();
            } else if let Some(val) = line.strip_prefix("content_hash: ") {
                content_hash = Some(val.to_string());
            }
        }

        Some(Self {
            sequence: sequence?,
            captured_at: captured_at?,
            content_len: content_len?,
            content_hash: content_hash?,
        })
    }
}

/// Result of a `delete_before` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteOutcome {
    /// Sequences removed by this call, ascending.
    pub deleted: Vec<u64>,
    /// Sequences that could not be removed, with the reason.
    pub failed: Vec<DeleteFailure>,
}

impl DeleteOutcome {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteFailure {
    pub sequence: u64,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// VersionStore
// ---------------------------------------------------------------------------

/// Filesystem-backed store of versioned snapshots.
#[derive(Debug, Clone)]
pub struct VersionStore {
    root: PathBuf,
    lock_timeout: Duration,
}

impl VersionStore {
    /// Open the store rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the root cannot be created or
    /// is not a directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| StoreError::Unavailable {
            path: root.clone(),
            source,
        })?;
        if !root.is_dir() {
            return Err(StoreError::Unavailable {
                path: root,
                source: io::Error::new(io::ErrorKind::NotADirectory, "data root is not a directory"),
            });
        }
        Ok(Self {
            root,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        })
    }

    /// Override how long operations wait for the namespace lock.
    #[must_use]
    pub const fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every record of `name`.
    #[must_use]
    pub fn namespace_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Path to the advisory lock file of `name`.
    #[must_use]
    pub fn lock_path(&self, name: &str) -> PathBuf {
        self.namespace_dir(name).join("lock")
    }

    /// Record filename for a sequence number.
    #[must_use]
    pub fn record_filename(sequence: u64) -> String {
        format!("{sequence:010}{RECORD_SUFFIX}")
    }

    /// Path to the record of `name` at `sequence`.
    #[must_use]
    pub fn record_path(&self, name: &str, sequence: u64) -> PathBuf {
        self.namespace_dir(name).join(Self::record_filename(sequence))
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Sequence numbers stored for `name`, ascending.
    ///
    /// A name that has never been written yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the name is invalid, the lock cannot be
    /// taken, or the namespace cannot be listed.
    pub fn sequences(&self, name: &str) -> Result<Vec<u64>, StoreError> {
        validate_name(name)?;
        let dir = self.namespace_dir(name);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let _lock = NamespaceLock::shared(&self.lock_path(name), self.lock_timeout)?;
        scan_sequences(&dir)
    }

    /// The highest-sequence record for `name`, or `None` on a first run.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the namespace cannot be read or the latest
    /// record is corrupt.
    pub fn latest(&self, name: &str) -> Result<Option<VersionRecord>, StoreError> {
        validate_name(name)?;
        let dir = self.namespace_dir(name);
        if !dir.exists() {
            return Ok(None);
        }
        let _lock = NamespaceLock::shared(&self.lock_path(name), self.lock_timeout)?;
        let Some(&sequence) = scan_sequences(&dir)?.last() else {
            return Ok(None);
        };
        read_record(&self.record_path(name, sequence), name, sequence).map(Some)
    }

    /// Fetch one specific version, or `None` if it is not stored.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the record exists but cannot be read.
    pub fn get(&self, name: &str, sequence: u64) -> Result<Option<VersionRecord>, StoreError> {
        validate_name(name)?;
        let dir = self.namespace_dir(name);
        if !dir.exists() {
            return Ok(None);
        }
        let _lock = NamespaceLock::shared(&self.lock_path(name), self.lock_timeout)?;
        let path = self.record_path(name, sequence);
        if !path.exists() {
            return Ok(None);
        }
        read_record(&path, name, sequence).map(Some)
    }

    /// Every record stored for `name`, ascending by sequence.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if any record cannot be read.
    pub fn list(&self, name: &str) -> Result<Vec<VersionRecord>, StoreError> {
        validate_name(name)?;
        let dir = self.namespace_dir(name);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let _lock = NamespaceLock::shared(&self.lock_path(name), self.lock_timeout)?;
        scan_sequences(&dir)?
            .into_iter()
            .map(|sequence| read_record(&self.record_path(name, sequence), name, sequence))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Persist `content` as the next version of `name`.
    ///
    /// 1. Creates the namespace directory and takes the exclusive lock.
    /// 2. Sweeps temporary files left behind by crashed writers.
    /// 3. Allocates `latest + 1` and writes header + content to a temp file.
    /// 4. fsyncs, then publishes with a no-clobber link.
    /// 5. If the number was taken meanwhile, re-lists and retries.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the namespace cannot be
    /// created, [`StoreError::PersistConflict`] once
    /// [`MAX_SAVE_ATTEMPTS`] allocations collided, or [`StoreError::Io`]
    /// on write failure.
    pub fn save(&self, name: &str, content: &str) -> Result<VersionRecord, StoreError> {
        validate_name(name)?;
        let dir = self.namespace_dir(name);
        fs::create_dir_all(&dir).map_err(|source| StoreError::Unavailable {
            path: dir.clone(),
            source,
        })?;

        let _lock = NamespaceLock::exclusive(&self.lock_path(name), self.lock_timeout)?;
        sweep_stale_temps(&dir)?;

        for attempt in 1..=MAX_SAVE_ATTEMPTS {
            let sequence = scan_sequences(&dir)?.last().map_or(1, |last| last + 1);
            let captured_at = Utc::now().trunc_subsecs(6);
            let header = RecordHeader::for_content(sequence, captured_at, content.as_bytes());

            let mut tmp = tempfile::Builder::new()
                .prefix(TEMP_PREFIX)
                .tempfile_in(&dir)?;
            tmp.write_all(header.to_string_repr().as_bytes())?;
            tmp.write_all(b"\n")?;
            tmp.write_all(content.as_bytes())?;
            tmp.flush()?;
            tmp.as_file().sync_all()?;

            let target = self.record_path(name, sequence);
            match tmp.persist_noclobber(&target) {
                Ok(_) => {
                    sync_dir(&dir);
                    tracing::debug!(name, sequence, bytes = content.len(), "snapshot saved");
                    return Ok(VersionRecord {
                        name: name.to_string(),
                        sequence,
                        captured_at,
                        content: content.to_string(),
                    });
                }
                Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => {
                    tracing::warn!(
                        name,
                        sequence,
                        attempt,
                        "sequence already taken by a concurrent writer, retrying"
                    );
                }
                Err(err) => return Err(StoreError::Io(err.error)),
            }
        }

        Err(StoreError::PersistConflict {
            name: name.to_string(),
            attempts: MAX_SAVE_ATTEMPTS,
        })
    }

    /// Remove every record of `name` with sequence strictly below `before`,
    /// oldest first.
    ///
    /// Records that are already gone are skipped. A record that cannot be
    /// removed is logged and listed in [`DeleteOutcome::failed`]; the pass
    /// keeps going. The newest record on disk is always kept.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] only when the namespace cannot be locked or
    /// listed. Nothing is deleted in that case.
    pub fn delete_before(&self, name: &str, before: u64) -> Result<DeleteOutcome, StoreError> {
        validate_name(name)?;
        let dir = self.namespace_dir(name);
        if !dir.exists() {
            return Ok(DeleteOutcome::default());
        }

        let _lock = NamespaceLock::exclusive(&self.lock_path(name), self.lock_timeout)?;
        let sequences = scan_sequences(&dir)?;
        let Some(&newest) = sequences.last() else {
            return Ok(DeleteOutcome::default());
        };

        let mut outcome = DeleteOutcome::default();
        for sequence in sequences
            .into_iter()
            .filter(|&seq| seq < before && seq != newest)
        {
            let path = self.record_path(name, sequence);
            match fs::remove_file(&path) {
                Ok(()) => outcome.deleted.push(sequence),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(
                        name,
                        sequence,
                        path = %path.display(),
                        error = %e,
                        "could not delete old snapshot"
                    );
                    outcome.failed.push(DeleteFailure {
                        sequence,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if !outcome.deleted.is_empty() {
            sync_dir(&dir);
        }
        Ok(outcome)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Check that `name` is usable as a namespace directory.
///
/// # Errors
///
/// Returns [`StoreError::InvalidName`] describing the first violated rule.
pub fn validate_name(name: &str) -> Result<(), StoreError> {
    let reason = if name.is_empty() {
        Some("name is empty")
    } else if name.len() > MAX_NAME_LEN {
        Some("name is longer than 128 bytes")
    } else if name.starts_with('.') {
        Some("name must not start with '.'")
    } else if name.contains(['/', '\\', '\0']) {
        Some("name must not contain path separators")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(StoreError::InvalidName {
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Content digest recorded in record headers.
#[must_use]
pub fn content_digest(content: &[u8]) -> String {
    format!("blake3:{}", blake3::hash(content).to_hex())
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// Parse a record filename like `"0000000042.snapshot"` into its sequence.
fn parse_record_filename(name: &str) -> Option<u64> {
    let stem = name.strip_suffix(RECORD_SUFFIX)?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok().filter(|&seq| seq > 0)
}

/// List record sequences in `dir`, ascending. Non-record files are skipped.
fn scan_sequences(dir: &Path) -> Result<Vec<u64>, StoreError> {
    let entries = fs::read_dir(dir).map_err(|source| StoreError::Unavailable {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut sequences = Vec::new();
    for entry in entries {
        let entry = entry?;
        if let Some(seq) = parse_record_filename(&entry.file_name().to_string_lossy()) {
            sequences.push(seq);
        }
    }
    sequences.sort_unstable();
    Ok(sequences)
}

/// Read and verify one record file.
fn read_record(path: &Path, name: &str, sequence: u64) -> Result<VersionRecord, StoreError> {
    let corrupt = |reason: &str| StoreError::CorruptRecord {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    let bytes = fs::read(path)?;
    let split = bytes
        .windows(2)
        .position(|w| w == b"\n\n")
        .ok_or_else(|| corrupt("missing header separator"))?;
    let header_str =
        std::str::from_utf8(&bytes[..=split]).map_err(|_| corrupt("header is not UTF-8"))?;
    let header =
        RecordHeader::from_string_repr(header_str).ok_or_else(|| corrupt("unreadable header"))?;
    let content = &bytes[split + 2..];

    if header.sequence != sequence {
        return Err(corrupt("header sequence does not match filename"));
    }
    if header.content_len != content.len() as u64 {
        return Err(corrupt("content length mismatch"));
    }
    if header.content_hash != content_digest(content) {
        return Err(corrupt("content digest mismatch"));
    }

    let content = String::from_utf8(content.to_vec()).map_err(|_| corrupt("content is not UTF-8"))?;
    Ok(VersionRecord {
        name: name.to_string(),
        sequence,
        captured_at: header.captured_at,
        content,
    })
}

/// Remove temp files left by writers that died mid-save.
///
/// The caller must hold the exclusive namespace lock, so no live writer owns
/// any of them.
fn sweep_stale_temps(dir: &Path) -> Result<(), StoreError> {
    let mut removed = 0usize;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::Io(e)),
            }
        }
    }
    if removed > 0 {
        tracing::warn!(dir = %dir.display(), removed, "removed stale temporary snapshot files");
    }
    Ok(())
}

/// Flush directory entries so a published rename survives power loss.
fn sync_dir(dir: &Path) {
    #[cfg(unix)]
    {
        if let Err(e) = fs::File::open(dir).and_then(|d| d.sync_all()) {
            tracing::debug!(dir = %dir.display(), error = %e, "directory fsync failed");
        }
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
