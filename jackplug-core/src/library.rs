//! Loaded-library abstraction and the default filesystem loader
//!
//! The manager never touches raw symbol pointers; it consumes loaded images
//! through [`PluginImage`] and obtains them through [`ImageLoader`]. The
//! shipped implementations wrap the platform dynamic linker; the doubles in
//! [`crate::mock`] implement the same traits in memory.

use std::ffi::{CStr, c_char};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use jackplug_plugin_api::{Plugin, RequestProxy};
use libloading::{Library, Symbol};
use walkdir::WalkDir;

use crate::error::ImageError;

/// Export naming the plugin; read as the registry key.
pub const NAME_SYMBOL: &str = "jp_name";
/// Export carrying the JSON descriptor.
pub const METADATA_SYMBOL: &str = "jp_metadata";
/// Export constructing the plugin instance.
pub const FACTORY_SYMBOL: &str = "jp_createPlugin";

/// Signature of the factory symbol generated by `export_plugin!`.
pub type CreateFn = extern "C" fn(RequestProxy) -> *mut dyn Plugin;

/// An opaque loaded library image.
///
/// Owning one keeps the image mapped; [`PluginImage::close`] (or dropping
/// the box) releases it. Instances constructed from an image must be dropped
/// before the image is closed - the manager's record teardown guarantees
/// that ordering.
pub trait PluginImage: Send + Sync {
    /// Whether the image exports `symbol`.
    fn has_symbol(&self, symbol: &str) -> bool;

    /// Read the `jp_name` export.
    fn plugin_name(&self) -> Result<String, ImageError>;

    /// Read the `jp_metadata` export.
    fn raw_metadata(&self) -> Result<String, ImageError>;

    /// Bind the factory symbol and construct the plugin instance, handing
    /// it the host's request proxy.
    fn create_instance(&self, proxy: RequestProxy) -> Result<Arc<dyn Plugin>, ImageError>;

    /// Release the image, reporting failure instead of swallowing it.
    fn close(self: Box<Self>) -> Result<(), ImageError>;
}

/// The filesystem collaborator discovery talks to.
pub trait ImageLoader: Send + Sync {
    /// Every library-shaped file under `dir`, sorted for determinism.
    /// An `Err` means no candidate list could be produced at all.
    fn list_libraries(&self, dir: &Path, recursive: bool) -> std::io::Result<Vec<PathBuf>>;

    /// Map the file at `path` into the process.
    fn open(&self, path: &Path) -> Result<Box<dyn PluginImage>, ImageError>;
}

/// Default loader: walks the directory tree for files with the platform
/// library extension and opens them with the dynamic linker.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLoader;

fn is_library_file(path: &Path) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    if cfg!(target_os = "macos") {
        matches!(ext, "dylib" | "so")
    } else if cfg!(target_os = "windows") {
        ext == "dll"
    } else {
        ext == "so"
    }
}

impl ImageLoader for SystemLoader {
    fn list_libraries(&self, dir: &Path, recursive: bool) -> std::io::Result<Vec<PathBuf>> {
        if !dir.is_dir() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} is not a directory", dir.display()),
            ));
        }

        let max_depth = if recursive { usize::MAX } else { 1 };
        let mut found = Vec::new();
        for entry in WalkDir::new(dir)
            .max_depth(max_depth)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if path.is_file() && is_library_file(path) {
                found.push(path.to_path_buf());
            }
        }
        found.sort();
        Ok(found)
    }

    fn open(&self, path: &Path) -> Result<Box<dyn PluginImage>, ImageError> {
        // SAFETY: loading a library runs its initializers. Candidates come
        // from directories the host explicitly asked to search.
        let library = unsafe { Library::new(path)? };
        Ok(Box::new(DynamicImage {
            library: Some(library),
        }))
    }
}

/// A library image backed by the platform dynamic linker.
pub struct DynamicImage {
    library: Option<Library>,
}

impl DynamicImage {
    fn library(&self) -> Result<&Library, ImageError> {
        self.library.as_ref().ok_or(ImageError::Closed)
    }

    fn c_str_export(&self, symbol: &str) -> Result<String, ImageError> {
        let library = self.library()?;
        // SAFETY: the export is a `const char*` pointing at nul-terminated
        // string data that lives as long as the mapped image.
        let slot: Symbol<*const *const c_char> = unsafe { library.get(symbol.as_bytes())? };
        let chars = unsafe { **slot };
        if chars.is_null() {
            return Err(ImageError::MalformedExport(symbol.to_string()));
        }
        unsafe { CStr::from_ptr(chars) }
            .to_str()
            .map(str::to_string)
            .map_err(|_| ImageError::MalformedExport(symbol.to_string()))
    }
}

impl PluginImage for DynamicImage {
    fn has_symbol(&self, symbol: &str) -> bool {
        let Some(library) = self.library.as_ref() else {
            return false;
        };
        // SAFETY: only the presence of the symbol is probed.
        unsafe { library.get::<*const ()>(symbol.as_bytes()).is_ok() }
    }

    fn plugin_name(&self) -> Result<String, ImageError> {
        self.c_str_export(NAME_SYMBOL)
    }

    fn raw_metadata(&self) -> Result<String, ImageError> {
        self.c_str_export(METADATA_SYMBOL)
    }

    fn create_instance(&self, proxy: RequestProxy) -> Result<Arc<dyn Plugin>, ImageError> {
        let library = self.library()?;
        // SAFETY: the factory is generated by `export_plugin!` and returns
        // an owning pointer to a freshly constructed instance.
        let factory: Symbol<CreateFn> = unsafe { library.get(FACTORY_SYMBOL.as_bytes())? };
        let raw = factory(proxy);
        Ok(Arc::from(unsafe { Box::from_raw(raw) }))
    }

    fn close(mut self: Box<Self>) -> Result<(), ImageError> {
        match self.library.take() {
            Some(library) => library
                .close()
                .map_err(|e| ImageError::Unload(e.to_string())),
            None => Ok(()),
        }
    }
}
