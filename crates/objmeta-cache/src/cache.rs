use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use objmeta_decorate::{Insert, ObjectHashTable};
use objmeta_types::ObjectId;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::{CacheConfig, ReadMode};
use crate::disk::DiskRecords;
use crate::error::{CacheError, CacheResult};
use crate::format::CacheHeader;
use crate::merge::merge_records;
use crate::records::{record_size, RecordBuffer, RecordSlice};
use crate::registry::{FlushOutcome, FlushRegistry, Flushable};
use crate::validity::{Fingerprint, ValidityProvider};
use crate::writer::write_cache_file;

/// Point-in-time counters for one cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Entries in the in-memory overlay.
    pub memory_records: usize,
    /// Validated records in the on-disk snapshot.
    pub disk_records: usize,
    /// Whether the overlay has additions not yet written back.
    pub dirty: bool,
    pub initialized: bool,
}

struct CacheState {
    validity: Option<Arc<dyn ValidityProvider>>,
    memory: ObjectHashTable,
    disk: DiskRecords,
    initialized: bool,
    dirty: bool,
}

impl CacheState {
    fn fingerprint(&self) -> Fingerprint {
        match &self.validity {
            Some(provider) => provider.fingerprint(),
            None => Fingerprint::zero(),
        }
    }
}

struct CacheShared {
    name: String,
    width: usize,
    path: PathBuf,
    read_mode: ReadMode,
    state: Mutex<CacheState>,
}

impl CacheShared {
    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().expect("cache lock poisoned")
    }

    fn flush_with<F, W>(&self, wrap: F) -> CacheResult<FlushOutcome>
    where
        F: FnOnce(File) -> W,
        W: Write,
    {
        let mut state = self.lock();
        if !state.dirty || state.memory.is_empty() {
            return Ok(FlushOutcome::Clean);
        }

        let header = CacheHeader::new(self.width as u32, state.fingerprint());
        let memory = RecordBuffer::from_table(&state.memory);
        let stats = write_cache_file(
            &self.path,
            &header,
            memory.as_slice(),
            state.disk.records(),
            wrap,
        )?;
        state.dirty = false;

        info!(
            cache = %self.name,
            records = stats.written,
            from_memory = stats.from_newer,
            superseded = stats.superseded,
            "wrote metadata cache"
        );
        Ok(FlushOutcome::Written {
            records: stats.written,
            superseded: stats.superseded,
        })
    }
}

impl Flushable for CacheShared {
    fn name(&self) -> &str {
        &self.name
    }

    fn flush(&self) -> CacheResult<FlushOutcome> {
        self.flush_with(BufWriter::new)
    }
}

/// A named, fixed-width key/value store keyed by [`ObjectId`].
///
/// Values added in this process live in an in-memory overlay; values from
/// earlier processes are read from a sorted record file under the cache
/// directory. Nothing touches disk until the first lookup or add, which
/// validates the file against the configured width and the validity
/// provider's fingerprint and registers the cache for flushing.
///
/// Handles are cheap to clone and share one underlying cache. Two caches
/// constructed with the same name and directory share one file; callers must
/// not do that.
#[derive(Clone)]
pub struct MetadataCache {
    shared: Arc<CacheShared>,
    registry: Arc<FlushRegistry>,
}

impl MetadataCache {
    /// A cache called `name` whose values are exactly `width` bytes.
    ///
    /// The name becomes the file name inside `config.cache_dir`, so it must be
    /// non-empty, must not be `.` or `..`, and must not contain a path
    /// separator.
    pub fn new(name: &str, width: usize, config: &CacheConfig) -> CacheResult<Self> {
        validate_name(name)?;
        if u32::try_from(width).is_err() {
            return Err(CacheError::WidthTooLarge(width));
        }

        let shared = CacheShared {
            name: name.to_string(),
            width,
            path: config.cache_path(name),
            read_mode: config.read_mode,
            state: Mutex::new(CacheState {
                validity: None,
                memory: ObjectHashTable::new(width),
                disk: DiskRecords::empty(width),
                initialized: false,
                dirty: false,
            }),
        };
        Ok(Self {
            shared: Arc::new(shared),
            registry: FlushRegistry::global(),
        })
    }

    /// Tie the on-disk contents to `provider`'s fingerprint.
    ///
    /// Must be called before the first lookup or add: the disk file is
    /// validated once, on first use.
    pub fn with_validity(self, provider: impl ValidityProvider + 'static) -> Self {
        let initialized = self.shared.lock().initialized;
        debug_assert!(
            !initialized,
            "validity provider set after cache {:?} was first used",
            self.shared.name
        );
        self.shared.lock().validity = Some(Arc::new(provider));
        self
    }

    /// Register with `registry` instead of the process-wide one.
    ///
    /// Must be called before the first lookup or add: the cache registers
    /// itself on first use.
    pub fn with_registry(mut self, registry: Arc<FlushRegistry>) -> Self {
        let initialized = self.shared.lock().initialized;
        debug_assert!(
            !initialized,
            "registry set after cache {:?} was first used",
            self.shared.name
        );
        self.registry = registry;
        self
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn width(&self) -> usize {
        self.shared.width
    }

    /// Bytes per on-disk record, id included.
    pub fn record_size(&self) -> usize {
        record_size(self.shared.width)
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        let mut state = self.shared.lock();
        if !state.initialized {
            self.initialize(&mut state);
        }
        state
    }

    fn initialize(&self, state: &mut CacheState) {
        let shared = &self.shared;
        let expected = state.fingerprint();
        state.disk = DiskRecords::open(&shared.path, shared.width, &expected, shared.read_mode);
        state.initialized = true;

        let flushable: Arc<dyn Flushable> = shared.clone();
        self.registry.register(flushable);
        debug!(
            cache = %shared.name,
            width = shared.width,
            disk_records = state.disk.len(),
            "initialized metadata cache"
        );
    }

    /// The value stored for `id`, preferring values added in this process.
    pub fn lookup(&self, id: &ObjectId) -> Option<Vec<u8>> {
        let state = self.state();
        state
            .memory
            .get(id)
            .or_else(|| state.disk.find(id))
            .map(<[u8]>::to_vec)
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        let state = self.state();
        state.memory.contains(id) || state.disk.find(id).is_some()
    }

    /// Store `payload` for `id` in memory, returning the value previously
    /// added in this process.
    ///
    /// # Panics
    ///
    /// If `payload` is not exactly [`MetadataCache::width`] bytes.
    pub fn add(&self, id: &ObjectId, payload: &[u8]) -> Option<Vec<u8>> {
        assert_eq!(
            payload.len(),
            self.shared.width,
            "payload width mismatch for cache {:?}",
            self.shared.name
        );
        let mut state = self.state();
        state.dirty = true;
        match state.memory.insert(id, payload) {
            Insert::Added => None,
            Insert::Replaced(previous) => Some(previous),
        }
    }

    fn assert_u32_records(&self) {
        assert_eq!(
            self.record_size(),
            24,
            "cache {:?} does not hold 24-byte records",
            self.shared.name
        );
    }

    /// [`MetadataCache::lookup`] for caches of big-endian `u32` values.
    ///
    /// # Panics
    ///
    /// Unless the cache width is 4.
    pub fn lookup_u32(&self, id: &ObjectId) -> Option<u32> {
        self.assert_u32_records();
        self.lookup(id).map(|bytes| {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&bytes);
            u32::from_be_bytes(raw)
        })
    }

    /// [`MetadataCache::add`] for caches of big-endian `u32` values.
    ///
    /// # Panics
    ///
    /// Unless the cache width is 4.
    pub fn add_u32(&self, id: &ObjectId, value: u32) -> Option<u32> {
        self.assert_u32_records();
        self.add(id, &value.to_be_bytes()).map(|bytes| {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&bytes);
            u32::from_be_bytes(raw)
        })
    }

    /// Write the overlay merged over the disk records back to the cache file.
    ///
    /// Does nothing if nothing was added since the last successful flush.
    /// On failure the previous file is left in place and the overlay stays
    /// dirty.
    pub fn flush(&self) -> CacheResult<FlushOutcome> {
        self.shared.flush()
    }

    #[cfg(test)]
    pub(crate) fn flush_with<F, W>(&self, wrap: F) -> CacheResult<FlushOutcome>
    where
        F: FnOnce(File) -> W,
        W: Write,
    {
        self.shared.flush_with(wrap)
    }

    /// Every record, sorted by id, with in-memory values replacing disk ones.
    pub fn records(&self) -> CacheResult<Vec<(ObjectId, Vec<u8>)>> {
        let state = self.state();
        let memory = RecordBuffer::from_table(&state.memory);
        let mut merged = Vec::new();
        merge_records(&mut merged, memory.as_slice(), state.disk.records())?;
        Ok(RecordSlice::new(&merged, self.shared.width)
            .iter()
            .map(|(id, payload)| (id, payload.to_vec()))
            .collect())
    }

    /// Counters for this cache. Does not trigger initialization.
    pub fn stats(&self) -> CacheStats {
        let state = self.shared.lock();
        CacheStats {
            memory_records: state.memory.len(),
            disk_records: state.disk.len(),
            dirty: state.dirty,
            initialized: state.initialized,
        }
    }
}

impl std::fmt::Debug for MetadataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataCache")
            .field("name", &self.shared.name)
            .field("width", &self.shared.width)
            .field("path", &self.shared.path)
            .finish()
    }
}

fn validate_name(name: &str) -> CacheResult<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if invalid {
        return Err(CacheError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validity::FINGERPRINT_LEN;
    use std::fs;
    use std::io;

    fn id(byte: u8) -> ObjectId {
        ObjectId::from_hash([byte; 20])
    }

    fn open(dir: &Path, name: &str, width: usize) -> MetadataCache {
        MetadataCache::new(name, width, &CacheConfig::new(dir))
            .unwrap()
            .with_registry(Arc::new(FlushRegistry::new()))
    }

    fn dir_entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn cold_start_misses() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path(), "gen", 4);
        assert!(!cache.stats().initialized);
        assert!(cache.lookup(&id(1)).is_none());
        assert!(!cache.contains(&id(1)));

        let stats = cache.stats();
        assert!(stats.initialized);
        assert_eq!(stats.disk_records, 0);
        assert_eq!(stats.memory_records, 0);
    }

    #[test]
    fn add_is_memory_only() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path(), "gen", 2);
        assert_eq!(cache.add(&id(1), &[1, 2]), None);
        assert_eq!(cache.add(&id(1), &[3, 4]), Some(vec![1, 2]));
        assert_eq!(cache.lookup(&id(1)), Some(vec![3, 4]));
        assert!(cache.stats().dirty);
        assert!(!cache.path().exists());
    }

    #[test]
    fn newer_values_win_on_write_back() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b, c) = (id(0xa), id(0xb), id(0xc));

        let first = open(dir.path(), "gen", 1);
        first.add(&a, &[10]);
        first.add(&b, &[20]);
        first.flush().unwrap();

        let second = open(dir.path(), "gen", 1);
        assert_eq!(second.lookup(&b), Some(vec![20]));
        second.add(&b, &[99]);
        second.add(&c, &[30]);
        let outcome = second.flush().unwrap();
        assert_eq!(
            outcome,
            FlushOutcome::Written {
                records: 3,
                superseded: 1,
            }
        );

        let third = open(dir.path(), "gen", 1);
        assert_eq!(
            third.records().unwrap(),
            vec![(a, vec![10]), (b, vec![99]), (c, vec![30])]
        );
        assert_eq!(third.stats().disk_records, 3);
    }

    #[test]
    fn records_merges_overlay_over_disk() {
        let dir = tempfile::tempdir().unwrap();
        let first = open(dir.path(), "gen", 1);
        first.add(&id(1), &[1]);
        first.add(&id(3), &[3]);
        first.flush().unwrap();

        let second = open(dir.path(), "gen", 1);
        second.add(&id(2), &[2]);
        second.add(&id(3), &[33]);
        assert_eq!(
            second.records().unwrap(),
            vec![(id(1), vec![1]), (id(2), vec![2]), (id(3), vec![33])]
        );
    }

    #[test]
    fn untouched_cache_does_no_io() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path(), "gen", 4);
        assert_eq!(cache.flush().unwrap(), FlushOutcome::Clean);
        cache.lookup(&id(1));
        assert_eq!(cache.flush().unwrap(), FlushOutcome::Clean);
        assert!(!cache.path().exists());
    }

    #[test]
    fn repeated_flush_leaves_file_identical() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path(), "gen", 4);
        cache.add(&id(7), &[0, 0, 0, 7]);
        cache.add(&id(2), &[0, 0, 0, 2]);
        cache.flush().unwrap();
        let before = fs::read(cache.path()).unwrap();

        assert_eq!(cache.flush().unwrap(), FlushOutcome::Clean);
        let reopened = open(dir.path(), "gen", 4);
        reopened.lookup(&id(7));
        assert_eq!(reopened.flush().unwrap(), FlushOutcome::Clean);

        assert_eq!(fs::read(cache.path()).unwrap(), before);
    }

    #[test]
    fn fingerprint_change_invalidates() {
        let dir = tempfile::tempdir().unwrap();
        let old = Fingerprint::from_bytes([1; FINGERPRINT_LEN]);
        let new = Fingerprint::from_bytes([2; FINGERPRINT_LEN]);

        let cache = open(dir.path(), "gen", 1).with_validity(old);
        cache.add(&id(1), &[1]);
        cache.flush().unwrap();

        let stale = open(dir.path(), "gen", 1).with_validity(move || new);
        assert!(stale.lookup(&id(1)).is_none());
        assert_eq!(stale.stats().disk_records, 0);

        let unprotected = open(dir.path(), "gen", 1);
        assert!(unprotected.lookup(&id(1)).is_none());

        let current = open(dir.path(), "gen", 1).with_validity(old);
        assert_eq!(current.lookup(&id(1)), Some(vec![1]));
    }

    #[test]
    fn corrupt_file_starts_cold_and_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path(), "gen", 1);
        fs::write(cache.path(), b"definitely not a cache file, too").unwrap();

        assert!(cache.lookup(&id(1)).is_none());
        cache.add(&id(1), &[5]);
        cache.flush().unwrap();

        let reopened = open(dir.path(), "gen", 1);
        assert_eq!(reopened.lookup(&id(1)), Some(vec![5]));
    }

    #[test]
    fn width_mismatch_starts_cold() {
        let dir = tempfile::tempdir().unwrap();
        let narrow = open(dir.path(), "gen", 1);
        narrow.add(&id(1), &[1]);
        narrow.flush().unwrap();

        let wide = open(dir.path(), "gen", 2);
        assert!(wide.lookup(&id(1)).is_none());
        assert_eq!(wide.stats().disk_records, 0);
    }

    struct FailAfter<W> {
        inner: W,
        remaining: usize,
    }

    impl<W: Write> Write for FailAfter<W> {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if buf.len() > self.remaining {
                return Err(io::Error::new(io::ErrorKind::Other, "injected failure"));
            }
            self.remaining -= buf.len();
            self.inner.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.inner.flush()
        }
    }

    #[test]
    fn failed_flush_keeps_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let first = open(dir.path(), "gen", 1);
        first.add(&id(1), &[1]);
        first.flush().unwrap();
        let before = fs::read(first.path()).unwrap();

        let second = open(dir.path(), "gen", 1);
        for k in 2..10 {
            second.add(&id(k), &[k]);
        }
        let err = second
            .flush_with(|file| FailAfter {
                inner: file,
                remaining: 40,
            })
            .unwrap_err();
        assert!(matches!(err, CacheError::Io(_)));
        assert_eq!(fs::read(second.path()).unwrap(), before);
        assert_eq!(dir_entries(dir.path()), vec!["gen".to_string()]);
        assert!(second.stats().dirty);

        assert!(matches!(second.flush().unwrap(), FlushOutcome::Written { records: 9, .. }));
    }

    #[test]
    fn failed_rename_keeps_previous_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path(), "gen", 1);
        fs::create_dir(cache.path()).unwrap();
        fs::write(cache.path().join("occupant"), b"x").unwrap();

        cache.add(&id(1), &[1]);
        let err = cache.flush().unwrap_err();
        assert!(matches!(err, CacheError::Persist { .. }), "{err}");
        assert_eq!(dir_entries(dir.path()), vec!["gen".to_string()]);
        assert_eq!(dir_entries(cache.path()), vec!["occupant".to_string()]);
        assert!(cache.stats().dirty);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "registry set after cache")]
    fn registry_after_first_use_panics() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path(), "gen", 1);
        cache.lookup(&id(1));
        let _ = cache.with_registry(Arc::new(FlushRegistry::new()));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "validity provider set after cache")]
    fn validity_after_first_use_panics() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path(), "gen", 1);
        cache.add(&id(1), &[1]);
        let _ = cache.with_validity(Fingerprint::zero());
    }

    #[test]
    fn u32_wrappers_roundtrip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path(), "generations", 4);
        assert_eq!(cache.record_size(), 24);
        assert_eq!(cache.add_u32(&id(1), 0xdead_beef), None);
        assert_eq!(cache.add_u32(&id(1), 7), Some(0xdead_beef));
        cache.add_u32(&id(2), 1 << 20);
        cache.flush().unwrap();

        let reopened = open(dir.path(), "generations", 4);
        assert_eq!(reopened.lookup_u32(&id(1)), Some(7));
        assert_eq!(reopened.lookup_u32(&id(2)), Some(1 << 20));
        assert_eq!(reopened.lookup(&id(2)), Some(vec![0, 0x10, 0, 0]));
        assert_eq!(reopened.lookup_u32(&id(3)), None);
    }

    #[test]
    #[should_panic(expected = "does not hold 24-byte records")]
    fn u32_wrapper_on_wrong_width_panics() {
        let dir = tempfile::tempdir().unwrap();
        open(dir.path(), "gen", 8).lookup_u32(&id(1));
    }

    #[test]
    #[should_panic(expected = "payload width mismatch")]
    fn add_with_wrong_width_panics() {
        let dir = tempfile::tempdir().unwrap();
        open(dir.path(), "gen", 4).add(&id(1), &[1, 2]);
    }

    #[test]
    fn buffered_mode_reads_the_same() {
        let dir = tempfile::tempdir().unwrap();
        let writer = open(dir.path(), "gen", 2);
        writer.add(&id(4), &[4, 4]);
        writer.add(&id(8), &[8, 8]);
        writer.flush().unwrap();

        let config = CacheConfig {
            cache_dir: dir.path().to_path_buf(),
            read_mode: ReadMode::Buffered,
        };
        let reader = MetadataCache::new("gen", 2, &config)
            .unwrap()
            .with_registry(Arc::new(FlushRegistry::new()));
        assert_eq!(reader.lookup(&id(8)), Some(vec![8, 8]));
        assert_eq!(reader.records().unwrap().len(), 2);
    }

    #[test]
    fn zero_width_cache_is_a_set() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path(), "seen", 0);
        cache.add(&id(3), &[]);
        cache.flush().unwrap();
        assert_eq!(fs::metadata(cache.path()).unwrap().len(), 32 + 20);

        let reopened = open(dir.path(), "seen", 0);
        assert!(reopened.contains(&id(3)));
        assert!(!reopened.contains(&id(4)));
    }

    #[test]
    fn invalid_names_are_rejected() {
        let config = CacheConfig::default();
        for name in ["", ".", "..", "a/b", "a\\b"] {
            let err = MetadataCache::new(name, 4, &config).unwrap_err();
            assert!(matches!(err, CacheError::InvalidName(_)), "{name:?}");
        }
        assert!(MetadataCache::new("..hidden", 4, &config).is_ok());
    }

    #[test]
    fn registers_on_first_use_and_flushes_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(FlushRegistry::new());
        let config = CacheConfig::new(dir.path());
        let a = MetadataCache::new("a", 1, &config)
            .unwrap()
            .with_registry(Arc::clone(&registry));
        let b = MetadataCache::new("b", 1, &config)
            .unwrap()
            .with_registry(Arc::clone(&registry));
        assert!(registry.is_empty());
        assert!(!registry.hook_installed());

        b.add(&id(2), &[2]);
        a.add(&id(1), &[1]);
        a.lookup(&id(1));
        assert_eq!(registry.len(), 2);
        assert!(registry.hook_installed());

        let report = registry.flush_all();
        assert!(report.is_ok());
        let order: Vec<&str> = report.outcomes.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(order, vec!["b", "a"]);
        assert_eq!(dir_entries(dir.path()), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn guard_writes_back_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(FlushRegistry::new());
        {
            let _guard = registry.guard();
            let cache = MetadataCache::new("gen", 1, &CacheConfig::new(dir.path()))
                .unwrap()
                .with_registry(Arc::clone(&registry));
            cache.add(&id(9), &[9]);
        }
        assert_eq!(open(dir.path(), "gen", 1).lookup(&id(9)), Some(vec![9]));
    }
}
