use std::sync::{Arc, Mutex, OnceLock};

use tracing::{debug, info, warn};

use crate::error::{CacheError, CacheResult};

/// Result of flushing one cache.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was added since the last flush; no I/O happened.
    Clean,
    /// The cache file was replaced.
    Written {
        /// Records in the new file.
        records: usize,
        /// Disk records replaced by newer in-memory values.
        superseded: usize,
    },
}

/// Something the [`FlushRegistry`] writes back at shutdown.
pub trait Flushable: Send + Sync {
    fn name(&self) -> &str;

    fn flush(&self) -> CacheResult<FlushOutcome>;
}

/// What [`FlushRegistry::flush_all`] did, per cache, in registration order.
#[derive(Debug, Default)]
pub struct FlushReport {
    pub outcomes: Vec<(String, FlushOutcome)>,
    pub failures: Vec<(String, CacheError)>,
}

impl FlushReport {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }

    /// Number of cache files that were rewritten.
    pub fn written(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| matches!(outcome, FlushOutcome::Written { .. }))
            .count()
    }
}

struct RegistryState {
    caches: Vec<Arc<dyn Flushable>>,
    hook_installed: bool,
}

/// Ordered list of initialized caches, flushed together at shutdown.
///
/// Caches register themselves on first use. The first registration arms the
/// registry's shutdown hook; the host runs it by calling
/// [`FlushRegistry::flush_all`] or by holding a [`FlushGuard`].
pub struct FlushRegistry {
    state: Mutex<RegistryState>,
}

static GLOBAL: OnceLock<Arc<FlushRegistry>> = OnceLock::new();

impl FlushRegistry {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState {
                caches: Vec::new(),
                hook_installed: false,
            }),
        }
    }

    /// The process-wide registry used by caches that were not given one.
    pub fn global() -> Arc<FlushRegistry> {
        GLOBAL.get_or_init(|| Arc::new(FlushRegistry::new())).clone()
    }

    /// Append `cache` to the flush order.
    ///
    /// Returns `true` if this registration installed the shutdown hook, which
    /// happens exactly once per registry.
    pub fn register(&self, cache: Arc<dyn Flushable>) -> bool {
        let mut state = self.state.lock().expect("registry lock poisoned");
        debug!(cache = cache.name(), position = state.caches.len(), "registered cache for flush");
        state.caches.push(cache);
        if state.hook_installed {
            return false;
        }
        state.hook_installed = true;
        true
    }

    pub fn hook_installed(&self) -> bool {
        self.state.lock().expect("registry lock poisoned").hook_installed
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("registry lock poisoned").caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flush every registered cache in registration order.
    ///
    /// A failing cache is logged and recorded; the remaining caches are still
    /// flushed. Does nothing until the hook has been installed.
    pub fn flush_all(&self) -> FlushReport {
        let caches = {
            let state = self.state.lock().expect("registry lock poisoned");
            if !state.hook_installed {
                return FlushReport::default();
            }
            state.caches.clone()
        };

        let mut report = FlushReport::default();
        for cache in caches {
            let name = cache.name().to_string();
            match cache.flush() {
                Ok(outcome) => report.outcomes.push((name, outcome)),
                Err(e) => {
                    warn!(cache = %name, error = %e, "cache flush failed; keeping previous file");
                    report.failures.push((name, e));
                }
            }
        }
        info!(
            written = report.written(),
            failed = report.failures.len(),
            "flushed metadata caches"
        );
        report
    }

    /// A guard that runs [`FlushRegistry::flush_all`] when dropped.
    pub fn guard(self: &Arc<Self>) -> FlushGuard {
        FlushGuard {
            registry: Some(Arc::clone(self)),
        }
    }
}

impl Default for FlushRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FlushRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().expect("registry lock poisoned");
        f.debug_struct("FlushRegistry")
            .field("caches", &state.caches.len())
            .field("hook_installed", &state.hook_installed)
            .finish()
    }
}

/// Flushes its registry on drop. Hold one for the lifetime of `main`.
#[must_use = "the registry is flushed when the guard is dropped"]
pub struct FlushGuard {
    registry: Option<Arc<FlushRegistry>>,
}

impl FlushGuard {
    /// Flush now and consume the guard, returning the report.
    pub fn finish(mut self) -> FlushReport {
        match self.registry.take() {
            Some(registry) => registry.flush_all(),
            None => FlushReport::default(),
        }
    }
}

impl Drop for FlushGuard {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.take() {
            registry.flush_all();
        }
    }
}
