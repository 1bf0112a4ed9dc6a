//! PluginManager - discovery, dependency-ordered lifecycle, request routing

use std::any::TypeId;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use jackplug_plugin_api::{Plugin, PluginMetadata, RequestProxy};

use crate::error::{IncidentCallback, Reporter, ReturnCode};
use crate::graph::DependencyGraph;
use crate::library::{
    FACTORY_SYMBOL, ImageLoader, METADATA_SYMBOL, NAME_SYMBOL, PluginImage, SystemLoader,
};
use crate::metadata;
use crate::registry::{DependencyState, PluginRecord, Registry};
use crate::resolver;
use crate::router::Router;
use crate::version;

/// Host-side handler for requests addressed to the manager itself
/// (receiver `None`). Dispatches on the request code; the manager defines
/// no codes of its own and answers 0 without a handler installed.
pub type HostRequestHandler = Arc<dyn Fn(&str, u16, &mut [u8]) -> u16 + Send + Sync>;

/// Search-time configuration for [`PluginManager::search_configured`].
#[derive(Debug, Clone, Default)]
pub struct ManagerConfig {
    /// Directories scanned by `search_configured`, in order.
    pub plugin_dirs: Vec<PathBuf>,
    /// Whether configured directories are scanned recursively.
    pub recursive: bool,
}

/// Shared mutable state behind every manager handle and request proxy.
pub(crate) struct ManagerState {
    pub registry: Registry,
    pub load_order: Vec<String>,
    pub locations: Vec<PathBuf>,
    pub host_handler: Option<HostRequestHandler>,
}

/// The plugin manager.
///
/// Discovers plugin libraries, validates their descriptors, orders them by
/// their declared dependencies, loads them in that order, routes requests
/// between them while they are live, and unloads them in reverse.
///
/// A manager is a cheap handle; clones share state. Operations run on the
/// caller's thread and complete synchronously. Callers that share one
/// manager across threads must serialise search/load/unload themselves.
#[derive(Clone)]
pub struct PluginManager {
    state: Arc<Mutex<ManagerState>>,
    loader: Arc<dyn ImageLoader>,
    config: ManagerConfig,
}

impl Default for PluginManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginManager {
    /// A manager over the real filesystem and dynamic linker.
    pub fn new() -> Self {
        Self::with_loader(Arc::new(SystemLoader))
    }

    /// A manager over a caller-supplied loader. This is the seam the mock
    /// loader plugs into.
    pub fn with_loader(loader: Arc<dyn ImageLoader>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ManagerState {
                registry: Registry::default(),
                load_order: Vec::new(),
                locations: Vec::new(),
                host_handler: None,
            })),
            loader,
            config: ManagerConfig::default(),
        }
    }

    /// A manager with preconfigured search directories.
    pub fn with_config(config: ManagerConfig) -> Self {
        let mut manager = Self::new();
        manager.config = config;
        manager
    }

    /// The process-wide manager. A convenience only; managers constructed
    /// with [`PluginManager::new`] are fully independent.
    pub fn global() -> &'static PluginManager {
        static GLOBAL: OnceLock<PluginManager> = OnceLock::new();
        GLOBAL.get_or_init(PluginManager::new)
    }

    /// Install the handler for requests addressed to the host.
    pub fn set_host_request_handler(
        &self,
        handler: impl Fn(&str, u16, &mut [u8]) -> u16 + Send + Sync + 'static,
    ) {
        self.state.lock().unwrap().host_handler = Some(Arc::new(handler));
    }

    // ─── Discovery ───────────────────────────────────────────────────

    /// Scan `dir` for plugin libraries and admit every well-formed one into
    /// the registry.
    ///
    /// Discovery is additive: records accumulate across calls. Files that
    /// are not loadable libraries, or that lack the plugin exports, are
    /// skipped silently. Name collisions and rejected descriptors are
    /// reported per item through `callback`, with the candidate's path as
    /// detail.
    pub fn search(
        &self,
        dir: impl AsRef<Path>,
        recursive: bool,
        callback: Option<IncidentCallback<'_>>,
    ) -> ReturnCode {
        let mut reporter = Reporter::new(callback);
        self.search_inner(dir.as_ref(), recursive, &mut reporter)
    }

    /// Scan every directory in the manager's [`ManagerConfig`].
    ///
    /// The aggregate outcome is success if any directory admitted a plugin,
    /// otherwise the first hard failure, otherwise nothing-found.
    pub fn search_configured(&self, callback: Option<IncidentCallback<'_>>) -> ReturnCode {
        let mut reporter = Reporter::new(callback);
        let dirs = self.config.plugin_dirs.clone();

        let mut outcome = ReturnCode::SearchNothingFound;
        for dir in dirs {
            let code = self.search_inner(&dir, self.config.recursive, &mut reporter);
            if code == ReturnCode::Success {
                outcome = ReturnCode::Success;
            } else if outcome == ReturnCode::SearchNothingFound
                && code != ReturnCode::SearchNothingFound
            {
                outcome = code;
            }
        }
        outcome
    }

    fn search_inner(&self, dir: &Path, recursive: bool, reporter: &mut Reporter<'_>) -> ReturnCode {
        let candidates = match self.loader.list_libraries(dir, recursive) {
            Ok(candidates) => candidates,
            Err(error) => {
                reporter.emit(ReturnCode::SearchListFilesError, &error.to_string());
                return ReturnCode::SearchListFilesError;
            }
        };

        let mut admitted = false;
        for path in candidates {
            let Ok(image) = self.loader.open(&path) else {
                // Not a loadable image; not our file.
                continue;
            };
            if !(image.has_symbol(NAME_SYMBOL)
                && image.has_symbol(METADATA_SYMBOL)
                && image.has_symbol(FACTORY_SYMBOL))
            {
                discard(image, &path);
                continue;
            }
            tracing::debug!(path = %path.display(), "found plugin library");

            let Ok(name) = image.plugin_name() else {
                discard(image, &path);
                continue;
            };
            if self.state.lock().unwrap().registry.contains(&name) {
                reporter.emit(
                    ReturnCode::SearchNameAlreadyExists,
                    &path.display().to_string(),
                );
                discard(image, &path);
                continue;
            }

            let Ok(raw) = image.raw_metadata() else {
                discard(image, &path);
                continue;
            };
            let Some(meta) = metadata::parse_descriptor(&raw) else {
                reporter.emit(
                    ReturnCode::SearchCannotParseMetadata,
                    &path.display().to_string(),
                );
                discard(image, &path);
                continue;
            };

            tracing::info!(plugin = %name, version = %meta.version, "plugin discovered");
            let record = PluginRecord::new(path.clone(), meta, image);
            let rejected = self.state.lock().unwrap().registry.insert(name, record);
            match rejected {
                Ok(()) => admitted = true,
                Err(record) => {
                    reporter.emit(
                        ReturnCode::SearchNameAlreadyExists,
                        &path.display().to_string(),
                    );
                    drop(record);
                }
            }
        }

        if admitted {
            let mut state = self.state.lock().unwrap();
            if !state.locations.iter().any(|existing| existing == dir) {
                state.locations.push(dir.to_path_buf());
            }
            return ReturnCode::Success;
        }
        ReturnCode::SearchNothingFound
    }

    // ─── Lifecycle ───────────────────────────────────────────────────

    /// Check dependencies, compute a load order, and bring every eligible
    /// record live in that order.
    ///
    /// Eligibility is recomputed from scratch on every call. With
    /// `try_to_continue`, records failing the dependency check are reported
    /// and excluded while the rest proceed; without it the first failure
    /// aborts the pass. A dependency cycle always aborts without touching
    /// the previous load order or creating any instance.
    ///
    /// Already-live records are left alone, which makes a repeated call
    /// with an unchanged registry a no-op.
    pub fn load_all(
        &self,
        try_to_continue: bool,
        callback: Option<IncidentCallback<'_>>,
    ) -> ReturnCode {
        let mut reporter = Reporter::new(callback);

        let order = {
            let mut guard = self.state.lock().unwrap();
            let state = &mut *guard;

            // Fresh pass: forget every earlier verdict.
            for (_, record) in state.registry.iter_mut() {
                record.dependencies = DependencyState::Unknown;
            }

            let names: Vec<String> = state.registry.names().map(str::to_string).collect();
            let mut visiting = HashSet::new();
            for name in &names {
                let code = resolver::check(&mut state.registry, name, &mut visiting, &mut reporter);
                if !try_to_continue && !code.is_success() {
                    return code;
                }
            }

            let mut graph = DependencyGraph::new();
            for (name, record) in state.registry.iter() {
                if record.dependencies == DependencyState::Satisfied {
                    graph.add_plugin(name);
                }
            }
            for (name, record) in state.registry.iter() {
                if record.dependencies == DependencyState::Satisfied {
                    for dep in &record.metadata.dependencies {
                        graph.add_dependency(name, &dep.name);
                    }
                }
            }

            let Some(order) = graph.load_order() else {
                reporter.emit(ReturnCode::LoadDependencyCycle, "");
                return ReturnCode::LoadDependencyCycle;
            };
            tracing::debug!(eligible = graph.len(), order = ?order, "resolved load order");
            state.load_order = order.clone();
            order
        };

        let proxy = self.request_proxy();
        for name in &order {
            let step = {
                let mut state = self.state.lock().unwrap();
                match state.registry.get_mut(name) {
                    Some(record) if record.instance().is_none() => Some(
                        record
                            .instantiate(proxy.clone())
                            .map_err(|error| (record.path.display().to_string(), error)),
                    ),
                    _ => None,
                }
            };
            match step {
                Some(Ok(instance)) => {
                    tracing::info!(plugin = %name, "plugin loaded");
                    instance.loaded();
                }
                Some(Err((path, error))) => {
                    tracing::error!(plugin = %name, %error, "plugin factory failed");
                    reporter.emit(ReturnCode::UnknownError, &path);
                    return ReturnCode::UnknownError;
                }
                None => {}
            }
        }

        ReturnCode::Success
    }

    /// Unload every plugin, walking the load order in reverse, then drain
    /// whatever never made it into the order. Teardown continues through
    /// failures; a partial unload is not an option.
    pub fn unload_all(&self, callback: Option<IncidentCallback<'_>>) -> ReturnCode {
        let mut reporter = Reporter::new(callback);
        let order = {
            let mut state = self.state.lock().unwrap();
            std::mem::take(&mut state.load_order)
        };

        let mut all_unloaded = true;
        for name in order.iter().rev() {
            let record = self.state.lock().unwrap().registry.remove(name);
            if let Some(mut record) = record {
                if let Err(error) = record.shutdown() {
                    tracing::warn!(plugin = %name, %error, "plugin library failed to unload");
                    reporter.emit(ReturnCode::UnloadNotAll, &record.path.display().to_string());
                    all_unloaded = false;
                }
            }
        }

        // Records never loaded (ineligible, or discovered after the last
        // pass); order among these is unspecified.
        loop {
            let entry = self.state.lock().unwrap().registry.pop_first();
            let Some((name, mut record)) = entry else {
                break;
            };
            if let Err(error) = record.shutdown() {
                tracing::warn!(plugin = %name, %error, "plugin library failed to unload");
                reporter.emit(ReturnCode::UnloadNotAll, &record.path.display().to_string());
                all_unloaded = false;
            }
        }

        self.state.lock().unwrap().locations.clear();

        if all_unloaded {
            ReturnCode::Success
        } else {
            ReturnCode::UnloadNotAll
        }
    }

    fn request_proxy(&self) -> RequestProxy {
        RequestProxy::new(Arc::new(Router::new(Arc::downgrade(&self.state))))
    }

    // ─── Queries ─────────────────────────────────────────────────────

    /// Number of registered plugins, loaded or not.
    pub fn plugins_count(&self) -> usize {
        self.state.lock().unwrap().registry.len()
    }

    /// Registered plugin names, sorted.
    pub fn plugins_list(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .registry
            .names()
            .map(str::to_string)
            .collect()
    }

    /// Directories in which at least one plugin was discovered, in first-hit
    /// order.
    pub fn plugins_locations(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().locations.clone()
    }

    /// Whether a plugin with this name is registered.
    pub fn has_plugin(&self, name: &str) -> bool {
        self.state.lock().unwrap().registry.contains(name)
    }

    /// Whether a plugin with this name is registered at a version
    /// compatible with `min_version`.
    pub fn has_plugin_version(&self, name: &str, min_version: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .registry
            .get(name)
            .is_some_and(|record| version::compatible(&record.metadata.version, min_version))
    }

    /// Whether the plugin's library is loaded and its instance live.
    pub fn is_plugin_loaded(&self, name: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .registry
            .get(name)
            .is_some_and(PluginRecord::is_live)
    }

    /// Owning snapshot of a plugin's metadata; stable across later registry
    /// mutations.
    pub fn plugin_info(&self, name: &str) -> Option<PluginMetadata> {
        self.state
            .lock()
            .unwrap()
            .registry
            .get(name)
            .map(|record| record.metadata.clone())
    }

    /// Typed handle to a live plugin instance, or `None` when the plugin is
    /// absent, not loaded, or does not register `T` through its
    /// capability probe.
    pub fn plugin_object<T: Plugin>(&self, name: &str) -> Option<Arc<T>> {
        let instance = self
            .state
            .lock()
            .unwrap()
            .registry
            .get(name)
            .and_then(|record| record.instance().cloned());
        instance
            .and_then(|instance| instance.capability(TypeId::of::<T>()))
            .and_then(|capability| capability.downcast::<T>().ok())
    }
}

fn discard(image: Box<dyn PluginImage>, path: &Path) {
    if let Err(error) = image.close() {
        tracing::warn!(path = %path.display(), %error, "failed to unload rejected library");
    }
}
