//! Persistent, content-addressed verification cache.
//!
//! ## Layout
//!
//! ```text
//! <root>/
//! +-- ab/
//! |   +-- ab12…ef.json     # one entry per contract hash
//! +-- c4/
//!     +-- c4…
//! ```
//!
//! Entries are validated on read (stored hash, format version, solver
//! version); anything stale or unreadable is deleted and reported as a miss.
//! Writes go through a temporary file in the target directory followed by a
//! rename. File-system mutation is serialized by one in-process mutex;
//! reads take no lock.

use super::VerificationStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, FileTimes};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

/// Bump when the entry layout changes.
pub const CACHE_FORMAT_VERSION: u32 = 1;

/// Default size budget: 64 MiB.
pub const DEFAULT_MAX_CACHE_BYTES: u64 = 64 * 1024 * 1024;

/// Eviction shrinks the cache to this share of the budget.
const EVICTION_TARGET_PERCENT: u64 = 80;

const ENTRY_EXTENSION: &str = "json";

// =============================================================================
// Entries and results
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub format_version: u32,
    pub solver_version: String,
    pub status: VerificationStatus,
    pub counterexample: Option<String>,
    /// Time the original solver run took.
    pub duration_ms: u64,
    pub created_at: DateTime<Utc>,
    /// Key the entry was stored under; re-checked on read.
    pub contract_hash: String,
}

/// Outcome of a cache read. Reads never fail the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheResult {
    Miss,
    Hit(CacheEntry),
    Error(io::ErrorKind),
}

/// Successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheWrite {
    pub path: PathBuf,
    pub bytes: u64,
    pub evicted: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("invalid cache key '{0}'")]
    InvalidKey(String),
    #[error("{0} results are never cached")]
    Uncacheable(VerificationStatus),
    #[error("cache I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot serialize cache entry: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl CacheError {
    pub fn kind(&self) -> io::ErrorKind {
        match self {
            CacheError::InvalidKey(_) | CacheError::Uncacheable(_) => io::ErrorKind::InvalidInput,
            CacheError::Io { source, .. } => source.kind(),
            CacheError::Serialize(_) => io::ErrorKind::InvalidData,
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Counters updated with relaxed atomics; readable from any thread.
#[derive(Debug, Default)]
pub struct CacheStatistics {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    errors: AtomicU64,
    evictions: AtomicU64,
}

/// Point-in-time copy of [`CacheStatistics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub errors: u64,
    pub evictions: u64,
}

impl CacheStatistics {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits(),
            misses: self.misses(),
            writes: self.writes(),
            errors: self.errors(),
            evictions: self.evictions(),
        }
    }

    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

// =============================================================================
// VerificationCache
// =============================================================================

#[derive(Debug)]
pub struct VerificationCache {
    root: PathBuf,
    max_bytes: u64,
    lock: Mutex<()>,
    stats: CacheStatistics,
}

/// Removes a temporary file when dropped, whether or not the write that
/// created it succeeded.
struct TempFileGuard(PathBuf);

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.0);
    }
}

struct StoredFile {
    path: PathBuf,
    bytes: u64,
    accessed: SystemTime,
}

impl VerificationCache {
    /// Cache rooted at `root`. Nothing touches the disk until the first
    /// write.
    pub fn new(root: PathBuf, max_bytes: u64) -> Self {
        Self {
            root,
            max_bytes,
            lock: Mutex::new(()),
            stats: CacheStatistics::default(),
        }
    }

    /// Pick the cache root: explicit override (relative paths resolve
    /// against the project), then `<project>/.tenet/verification-cache`,
    /// then the user cache directory.
    pub fn resolve_root(explicit: Option<&Path>, project_root: Option<&Path>) -> PathBuf {
        match (explicit, project_root) {
            (Some(dir), Some(project)) if dir.is_relative() => project.join(dir),
            (Some(dir), _) => dir.to_path_buf(),
            (None, Some(project)) => project.join(".tenet").join("verification-cache"),
            (None, None) => dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("tenet")
                .join("verification-cache"),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub fn statistics(&self) -> &CacheStatistics {
        &self.stats
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    /// `<root>/<first two hex chars>/<hash>.json`
    pub fn entry_path(&self, hash: &str) -> Result<PathBuf, CacheError> {
        if hash.len() < 3 || !hash.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
            return Err(CacheError::InvalidKey(hash.to_string()));
        }
        Ok(self
            .root
            .join(&hash[..2])
            .join(format!("{}.{}", hash, ENTRY_EXTENSION)))
    }

    // -- reads ---------------------------------------------------------------

    pub fn get(&self, hash: &str, solver_version: &str) -> CacheResult {
        let path = match self.entry_path(hash) {
            Ok(p) => p,
            Err(e) => {
                CacheStatistics::bump(&self.stats.errors, 1);
                return CacheResult::Error(e.kind());
            }
        };
        let text = match fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                CacheStatistics::bump(&self.stats.misses, 1);
                return CacheResult::Miss;
            }
            Err(e) => {
                log::debug!("cache read of {} failed: {}", path.display(), e);
                CacheStatistics::bump(&self.stats.errors, 1);
                return CacheResult::Error(e.kind());
            }
        };
        let entry = match serde_json::from_str::<CacheEntry>(&text) {
            Ok(entry) => entry,
            Err(e) => {
                log::debug!("discarding corrupt cache entry {}: {}", path.display(), e);
                self.discard(&path, &text);
                CacheStatistics::bump(&self.stats.misses, 1);
                return CacheResult::Miss;
            }
        };
        if entry.contract_hash != hash
            || entry.format_version != CACHE_FORMAT_VERSION
            || entry.solver_version != solver_version
        {
            log::debug!(
                "discarding stale cache entry {} (format {}, solver '{}')",
                path.display(),
                entry.format_version,
                entry.solver_version
            );
            self.discard(&path, &text);
            CacheStatistics::bump(&self.stats.misses, 1);
            return CacheResult::Miss;
        }
        touch(&path);
        CacheStatistics::bump(&self.stats.hits, 1);
        log::trace!("cache hit {}", hash);
        CacheResult::Hit(entry)
    }

    /// Remove `path` if it still holds `seen`. A writer may have renamed a
    /// fresh entry into place since it was read.
    fn discard(&self, path: &Path, seen: &str) {
        let _guard = self.lock();
        match fs::read_to_string(path) {
            Ok(current) if current == seen => {
                if let Err(e) = fs::remove_file(path) {
                    log::debug!("cannot remove stale entry {}: {}", path.display(), e);
                }
            }
            Ok(_) => log::debug!("keeping {}: replaced since it was read", path.display()),
            Err(_) => {}
        }
    }

    // -- writes --------------------------------------------------------------

    /// Persist a finished verification. Unsupported and skipped results are
    /// rejected. Failures are counted before being returned.
    pub fn store(
        &self,
        hash: &str,
        solver_version: &str,
        status: VerificationStatus,
        counterexample: Option<String>,
        duration: Duration,
    ) -> Result<CacheWrite, CacheError> {
        if !status.is_cacheable() {
            return Err(CacheError::Uncacheable(status));
        }
        let entry = CacheEntry {
            format_version: CACHE_FORMAT_VERSION,
            solver_version: solver_version.to_string(),
            status,
            counterexample,
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            created_at: Utc::now(),
            contract_hash: hash.to_string(),
        };
        let result = self.write_entry(&entry);
        match &result {
            Ok(write) => {
                CacheStatistics::bump(&self.stats.writes, 1);
                CacheStatistics::bump(&self.stats.evictions, write.evicted as u64);
                log::trace!("cached {} ({} bytes)", hash, write.bytes);
            }
            Err(e) => {
                CacheStatistics::bump(&self.stats.errors, 1);
                log::warn!("cannot cache verification result {}: {}", hash, e);
            }
        }
        result
    }

    fn write_entry(&self, entry: &CacheEntry) -> Result<CacheWrite, CacheError> {
        let path = self.entry_path(&entry.contract_hash)?;
        let bytes = serde_json::to_vec_pretty(entry)?;
        let size = bytes.len() as u64;

        let _guard = self.lock();
        let dir = path.parent().unwrap_or(&self.root).to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| CacheError::Io {
            path: dir.clone(),
            source,
        })?;

        let evicted = self.evict_for(size, &path);

        let tmp = TempFileGuard(dir.join(format!(
            ".{}.{}.{}.tmp",
            entry.contract_hash,
            std::process::id(),
            uuid::Uuid::new_v4().simple()
        )));
        let io_err = |source| CacheError::Io {
            path: tmp.0.clone(),
            source,
        };
        let mut file = File::create(&tmp.0).map_err(io_err)?;
        file.write_all(&bytes).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        drop(file);
        fs::rename(&tmp.0, &path).map_err(|source| CacheError::Io {
            path: path.clone(),
            source,
        })?;

        Ok(CacheWrite {
            path,
            bytes: size,
            evicted,
        })
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // -- eviction ------------------------------------------------------------

    /// Make room for `incoming` bytes. When the write would push the cache
    /// past its budget, least-recently-accessed entries go until the cache,
    /// new entry included, fits in 80% of the budget. Best-effort: files
    /// that cannot be removed are skipped. Caller holds the lock.
    fn evict_for(&self, incoming: u64, destination: &Path) -> usize {
        let mut files: Vec<StoredFile> = self
            .stored_files()
            .into_iter()
            .filter(|f| f.path != destination)
            .collect();
        let mut total: u64 = files.iter().map(|f| f.bytes).sum();
        if total.saturating_add(incoming) <= self.max_bytes {
            return 0;
        }
        let target = (u128::from(self.max_bytes) * u128::from(EVICTION_TARGET_PERCENT) / 100) as u64;
        files.sort_by(|a, b| a.accessed.cmp(&b.accessed).then_with(|| a.path.cmp(&b.path)));

        let mut evicted = 0;
        for file in files {
            if total.saturating_add(incoming) <= target {
                break;
            }
            match fs::remove_file(&file.path) {
                Ok(()) => {
                    total = total.saturating_sub(file.bytes);
                    evicted += 1;
                }
                Err(e) => log::debug!("eviction of {} failed: {}", file.path.display(), e),
            }
        }
        log::debug!(
            "evicted {} cache entries; {} bytes remain before write",
            evicted,
            total
        );
        evicted
    }

    /// Entry files currently on disk. Unreadable directories are skipped.
    fn stored_files(&self) -> Vec<StoredFile> {
        let mut out = Vec::new();
        let Ok(prefixes) = fs::read_dir(&self.root) else {
            return out;
        };
        for prefix in prefixes.flatten() {
            if !prefix.file_type().is_ok_and(|t| t.is_dir()) {
                continue;
            }
            let Ok(entries) = fs::read_dir(prefix.path()) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXTENSION) {
                    continue;
                }
                let Ok(meta) = entry.metadata() else {
                    continue;
                };
                if !meta.is_file() {
                    continue;
                }
                let accessed = meta
                    .accessed()
                    .or_else(|_| meta.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                out.push(StoredFile {
                    path,
                    bytes: meta.len(),
                    accessed,
                });
            }
        }
        out
    }

    // -- maintenance ---------------------------------------------------------

    /// Bytes used by entry files.
    pub fn total_size(&self) -> u64 {
        self.stored_files().iter().map(|f| f.bytes).sum()
    }

    pub fn entry_count(&self) -> usize {
        self.stored_files().len()
    }

    /// Delete every entry. Returns how many were removed.
    pub fn clear(&self) -> Result<usize, CacheError> {
        let _guard = self.lock();
        let mut removed = 0;
        for file in self.stored_files() {
            fs::remove_file(&file.path).map_err(|source| CacheError::Io {
                path: file.path.clone(),
                source,
            })?;
            removed += 1;
        }
        Ok(removed)
    }
}

/// Record an access for LRU ordering. Failures only degrade eviction order.
fn touch(path: &Path) {
    let result = fs::OpenOptions::new()
        .append(true)
        .open(path)
        .and_then(|f| f.set_times(FileTimes::new().set_accessed(SystemTime::now())));
    if let Err(e) = result {
        log::trace!("cannot update access time of {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "ab0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcd";

    fn cache(dir: &Path) -> VerificationCache {
        VerificationCache::new(dir.to_path_buf(), DEFAULT_MAX_CACHE_BYTES)
    }

    #[test]
    fn entries_live_under_their_prefix() {
        let tmp = tempfile::tempdir().unwrap();
        let c = cache(tmp.path());
        let path = c.entry_path(KEY).unwrap();
        assert_eq!(path, tmp.path().join("ab").join(format!("{}.json", KEY)));
        assert!(matches!(c.entry_path("../etc"), Err(CacheError::InvalidKey(_))));
        assert!(matches!(c.entry_path("AB12"), Err(CacheError::InvalidKey(_))));
    }

    #[test]
    fn miss_then_hit() {
        let tmp = tempfile::tempdir().unwrap();
        let c = cache(tmp.path());
        assert_eq!(c.get(KEY, "s1"), CacheResult::Miss);
        c.store(KEY, "s1", VerificationStatus::Proven, None, Duration::from_millis(12))
            .unwrap();
        match c.get(KEY, "s1") {
            CacheResult::Hit(entry) => {
                assert_eq!(entry.status, VerificationStatus::Proven);
                assert_eq!(entry.duration_ms, 12);
                assert_eq!(entry.contract_hash, KEY);
            }
            other => panic!("expected hit, got {:?}", other),
        }
        let stats = c.stats();
        assert_eq!((stats.hits, stats.misses, stats.writes), (1, 1, 1));
    }

    #[test]
    fn corrupt_and_mismatched_entries_are_deleted() {
        let tmp = tempfile::tempdir().unwrap();
        let c = cache(tmp.path());
        let path = c.entry_path(KEY).unwrap();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(c.get(KEY, "s1"), CacheResult::Miss);
        assert!(!path.exists());

        // Entry copied under the wrong key.
        c.store(KEY, "s1", VerificationStatus::Proven, None, Duration::ZERO)
            .unwrap();
        let other = format!("cd{}", &KEY[2..]);
        let other_path = c.entry_path(&other).unwrap();
        fs::create_dir_all(other_path.parent().unwrap()).unwrap();
        fs::copy(&path, &other_path).unwrap();
        assert_eq!(c.get(&other, "s1"), CacheResult::Miss);
        assert!(!other_path.exists());
    }

    #[test]
    fn discard_keeps_an_entry_replaced_after_the_read() {
        let tmp = tempfile::tempdir().unwrap();
        let c = cache(tmp.path());
        let path = c.entry_path(KEY).unwrap();
        c.store(KEY, "s1", VerificationStatus::Proven, None, Duration::ZERO)
            .unwrap();
        let stale = fs::read_to_string(&path).unwrap();

        // Another writer lands a newer verdict before the reader discards.
        c.store(KEY, "s2", VerificationStatus::Disproven, Some("x = 1".into()), Duration::ZERO)
            .unwrap();
        let fresh = fs::read_to_string(&path).unwrap();
        assert_ne!(stale, fresh);

        c.discard(&path, &stale);
        assert!(path.exists());
        assert!(matches!(c.get(KEY, "s2"), CacheResult::Hit(_)));

        c.discard(&path, &fresh);
        assert!(!path.exists());
    }

    #[test]
    fn skipped_and_unsupported_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let c = cache(tmp.path());
        for status in [VerificationStatus::Skipped, VerificationStatus::Unsupported] {
            let err = c.store(KEY, "s1", status, None, Duration::ZERO).unwrap_err();
            assert!(matches!(err, CacheError::Uncacheable(_)));
        }
        assert_eq!(c.entry_count(), 0);
        assert_eq!(c.stats().writes, 0);
    }

    #[test]
    fn no_temp_files_survive_a_write() {
        let tmp = tempfile::tempdir().unwrap();
        let c = cache(tmp.path());
        c.store(KEY, "s1", VerificationStatus::Disproven, Some("x = 0".into()), Duration::ZERO)
            .unwrap();
        let names: Vec<String> = fs::read_dir(tmp.path().join("ab"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![format!("{}.json", KEY)]);
    }

    #[test]
    fn clear_removes_everything() {
        let tmp = tempfile::tempdir().unwrap();
        let c = cache(tmp.path());
        c.store(KEY, "s1", VerificationStatus::Proven, None, Duration::ZERO)
            .unwrap();
        assert_eq!(c.entry_count(), 1);
        assert!(c.total_size() > 0);
        assert_eq!(c.clear().unwrap(), 1);
        assert_eq!(c.entry_count(), 0);
    }

    #[test]
    fn root_resolution_order() {
        let project = Path::new("/work/app");
        assert_eq!(
            VerificationCache::resolve_root(Some(Path::new("/abs/cache")), Some(project)),
            PathBuf::from("/abs/cache")
        );
        assert_eq!(
            VerificationCache::resolve_root(Some(Path::new("build/vc")), Some(project)),
            PathBuf::from("/work/app/build/vc")
        );
        assert_eq!(
            VerificationCache::resolve_root(None, Some(project)),
            PathBuf::from("/work/app/.tenet/verification-cache")
        );
        assert!(VerificationCache::resolve_root(None, None).ends_with("tenet/verification-cache"));
    }
}
