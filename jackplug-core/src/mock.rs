//! In-memory loader and image doubles
//!
//! Scriptable stand-ins for the filesystem and dynamic-linker collaborators.
//! The crate's own suites run on them, and downstream hosts can use them to
//! exercise plugin wiring without building cdylibs.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use jackplug_plugin_api::{Plugin, RequestProxy};

use crate::error::ImageError;
use crate::library::{FACTORY_SYMBOL, ImageLoader, METADATA_SYMBOL, NAME_SYMBOL, PluginImage};

/// Factory closure carried by a [`MockImage`].
pub type MockFactory = Arc<dyn Fn(RequestProxy) -> Arc<dyn Plugin> + Send + Sync>;

/// Description of one fake library known to a [`MockLoader`].
#[derive(Clone)]
pub struct MockImage {
    name: String,
    metadata: String,
    factory: Option<MockFactory>,
    fail_unload: bool,
    closed: Option<Arc<AtomicUsize>>,
}

impl MockImage {
    /// A well-formed plugin library exporting all three required symbols.
    pub fn new(
        name: impl Into<String>,
        metadata: impl Into<String>,
        factory: impl Fn(RequestProxy) -> Arc<dyn Plugin> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            metadata: metadata.into(),
            factory: Some(Arc::new(factory)),
            fail_unload: false,
            closed: None,
        }
    }

    /// A loadable library that exports none of the plugin symbols.
    pub fn opaque() -> Self {
        Self {
            name: String::new(),
            metadata: String::new(),
            factory: None,
            fail_unload: false,
            closed: None,
        }
    }

    /// Make `close` fail, for exercising the not-all-unloaded path.
    pub fn with_failing_unload(mut self) -> Self {
        self.fail_unload = true;
        self
    }
}

impl PluginImage for MockImage {
    fn has_symbol(&self, symbol: &str) -> bool {
        match symbol {
            NAME_SYMBOL | METADATA_SYMBOL | FACTORY_SYMBOL => self.factory.is_some(),
            _ => false,
        }
    }

    fn plugin_name(&self) -> Result<String, ImageError> {
        Ok(self.name.clone())
    }

    fn raw_metadata(&self) -> Result<String, ImageError> {
        Ok(self.metadata.clone())
    }

    fn create_instance(&self, proxy: RequestProxy) -> Result<Arc<dyn Plugin>, ImageError> {
        let factory = self.factory.as_ref().ok_or(ImageError::Closed)?;
        Ok(factory(proxy))
    }

    fn close(self: Box<Self>) -> Result<(), ImageError> {
        if let Some(closed) = &self.closed {
            closed.fetch_add(1, Ordering::SeqCst);
        }
        if self.fail_unload {
            return Err(ImageError::Unload("mock image refuses to unload".into()));
        }
        Ok(())
    }
}

/// In-memory [`ImageLoader`]: a path-keyed table of [`MockImage`]s.
///
/// Tracks how many images were handed out and how many came back through
/// `close`, so tests can assert that the manager leaks no handles.
#[derive(Clone, Default)]
pub struct MockLoader {
    images: BTreeMap<PathBuf, MockImage>,
    unreadable: Vec<PathBuf>,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl MockLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fake library at `path`.
    pub fn insert(&mut self, path: impl Into<PathBuf>, image: MockImage) {
        self.images.insert(path.into(), image);
    }

    /// Make listings of `dir` fail with an I/O error.
    pub fn fail_listing(&mut self, dir: impl Into<PathBuf>) {
        self.unreadable.push(dir.into());
    }

    /// Number of images handed out through `open`.
    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Number of images given back through `close`.
    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl ImageLoader for MockLoader {
    fn list_libraries(&self, dir: &Path, recursive: bool) -> io::Result<Vec<PathBuf>> {
        if self.unreadable.iter().any(|blocked| blocked == dir) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{} is not readable", dir.display()),
            ));
        }

        Ok(self
            .images
            .keys()
            .filter(|path| {
                if recursive {
                    path.starts_with(dir)
                } else {
                    path.parent() == Some(dir)
                }
            })
            .cloned()
            .collect())
    }

    fn open(&self, path: &Path) -> Result<Box<dyn PluginImage>, ImageError> {
        let image = self
            .images
            .get(path)
            .ok_or_else(|| ImageError::NotLoadable(path.to_path_buf()))?;
        self.opened.fetch_add(1, Ordering::SeqCst);

        let mut image = image.clone();
        image.closed = Some(Arc::clone(&self.closed));
        Ok(Box::new(image))
    }
}
