//! Plugin records and the name-keyed registry

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use jackplug_plugin_api::{Plugin, PluginMetadata, RequestProxy};

use crate::error::ImageError;
use crate::library::PluginImage;

/// Tri-state memo of the dependency checker. Reset to `Unknown` at the top
/// of every load pass so eligibility is always recomputed against the
/// current registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum DependencyState {
    /// Not checked during the current load pass.
    #[default]
    Unknown,
    /// Every declared dependency transitively exists at a compatible version.
    Satisfied,
    /// A directly declared dependency is missing or incompatible.
    Unsatisfied,
}

/// One discovered plugin library and everything the manager owns for it.
///
/// The record owns the loaded image and, once loaded, the live instance.
/// Teardown order is fixed on every path: notify the instance, drop it,
/// then release the image.
pub(crate) struct PluginRecord {
    pub path: PathBuf,
    pub metadata: PluginMetadata,
    pub dependencies: DependencyState,
    instance: Option<Arc<dyn Plugin>>,
    library: Option<Box<dyn PluginImage>>,
}

impl std::fmt::Debug for PluginRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRecord")
            .field("path", &self.path)
            .field("metadata", &self.metadata)
            .field("dependencies", &self.dependencies)
            .field("instance", &self.instance.is_some())
            .field("library", &self.library.is_some())
            .finish()
    }
}

impl PluginRecord {
    pub fn new(path: PathBuf, metadata: PluginMetadata, library: Box<dyn PluginImage>) -> Self {
        Self {
            path,
            metadata,
            dependencies: DependencyState::Unknown,
            instance: None,
            library: Some(library),
        }
    }

    /// True while the library is loaded and an instance is live.
    pub fn is_live(&self) -> bool {
        self.library.is_some() && self.instance.is_some()
    }

    pub fn instance(&self) -> Option<&Arc<dyn Plugin>> {
        self.instance.as_ref()
    }

    /// Bind the factory symbol and construct the instance. The caller
    /// delivers the `loaded` notification once dependencies have had
    /// theirs.
    pub fn instantiate(&mut self, proxy: RequestProxy) -> Result<Arc<dyn Plugin>, ImageError> {
        let library = self.library.as_ref().ok_or(ImageError::Closed)?;
        let instance = library.create_instance(proxy)?;
        self.instance = Some(Arc::clone(&instance));
        Ok(instance)
    }

    /// Notify the instance, drop it, then release the image.
    pub fn shutdown(&mut self) -> Result<(), ImageError> {
        if let Some(instance) = self.instance.take() {
            instance.about_to_be_unloaded();
            drop(instance);
        }
        match self.library.take() {
            Some(library) => library.close(),
            None => Ok(()),
        }
    }
}

impl Drop for PluginRecord {
    fn drop(&mut self) {
        // Records normally leave through unload_all; this covers every
        // other exit path with the same teardown order.
        if self.library.is_some() {
            if let Err(error) = self.shutdown() {
                tracing::warn!(
                    plugin = %self.metadata.name,
                    %error,
                    "library did not unload cleanly"
                );
            }
        }
    }
}

/// Name-keyed record store.
///
/// Names are unique. Iteration is in sorted name order, which keeps every
/// load pass deterministic for a fixed set of records.
#[derive(Default)]
pub(crate) struct Registry {
    records: BTreeMap<String, PluginRecord>,
}

impl Registry {
    pub fn contains(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    /// Insert under a unique name; a duplicate is handed back untouched and
    /// the existing record is preserved.
    pub fn insert(&mut self, name: String, record: PluginRecord) -> Result<(), PluginRecord> {
        if self.records.contains_key(&name) {
            return Err(record);
        }
        self.records.insert(name, record);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&PluginRecord> {
        self.records.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut PluginRecord> {
        self.records.get_mut(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<PluginRecord> {
        self.records.remove(name)
    }

    pub fn pop_first(&mut self) -> Option<(String, PluginRecord)> {
        self.records.pop_first()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PluginRecord)> {
        self.records.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut PluginRecord)> {
        self.records.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockImage;

    struct Inert;
    impl Plugin for Inert {}

    fn record(name: &str) -> PluginRecord {
        let metadata = PluginMetadata {
            api: "1.0.0".into(),
            name: name.into(),
            pretty_name: name.into(),
            version: "1.0.0".into(),
            author: "tests".into(),
            url: "https://example.com".into(),
            license: "MIT".into(),
            copyright: "tests".into(),
            dependencies: Vec::new(),
        };
        let image = MockImage::new(name, "{}", |_proxy| Arc::new(Inert) as Arc<dyn Plugin>);
        PluginRecord::new(
            PathBuf::from(format!("/plugins/{name}.so")),
            metadata,
            Box::new(image),
        )
    }

    #[test]
    fn test_insert_enforces_name_uniqueness() {
        let mut registry = Registry::default();
        assert!(registry.insert("a".into(), record("a")).is_ok());
        assert!(registry.insert("a".into(), record("a")).is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_names_iterate_in_sorted_order() {
        let mut registry = Registry::default();
        registry.insert("zeta".into(), record("zeta")).unwrap();
        registry.insert("alpha".into(), record("alpha")).unwrap();
        registry.insert("mid".into(), record("mid")).unwrap();

        let names: Vec<&str> = registry.names().collect();
        assert_eq!(names, ["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_record_starts_unknown_and_not_live() {
        let rec = record("a");
        assert_eq!(rec.dependencies, DependencyState::Unknown);
        assert!(!rec.is_live());
        assert!(rec.instance().is_none());
    }

    #[test]
    fn test_instantiate_then_shutdown() {
        let mut rec = record("a");
        let instance = rec
            .instantiate(jackplug_plugin_api::RequestProxy::disconnected())
            .unwrap();
        assert!(rec.is_live());
        drop(instance);

        rec.shutdown().unwrap();
        assert!(!rec.is_live());
        // A second shutdown is a no-op.
        rec.shutdown().unwrap();
    }

    #[test]
    fn test_remove_returns_record() {
        let mut registry = Registry::default();
        registry.insert("a".into(), record("a")).unwrap();
        assert!(registry.remove("a").is_some());
        assert!(registry.remove("a").is_none());
        assert_eq!(registry.len(), 0);
    }
}
