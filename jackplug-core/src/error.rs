//! Outcome codes and the incident callback channel

use thiserror::Error;

/// Closed set of outcome codes returned by manager operations and delivered
/// through the incident callback channel.
///
/// The message table lives in the `#[error]` attributes; `Display` is the
/// lookup.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnCode {
    /// The operation completed.
    #[error("success")]
    Success,

    /// A failure that fits no other code.
    #[error("unknown error")]
    UnknownError,

    /// No plugin library was admitted from the searched directory.
    #[error("no plugins were found in the directory")]
    SearchNothingFound,

    /// A candidate's metadata descriptor was rejected.
    #[error("plugin metadata could not be parsed")]
    SearchCannotParseMetadata,

    /// A candidate's name collides with an already registered plugin.
    #[error("a plugin with the same name is already registered")]
    SearchNameAlreadyExists,

    /// The directory listing itself failed and produced no candidates.
    #[error("the plugin directory could not be scanned")]
    SearchListFilesError,

    /// A dependency exists but at an incompatible version.
    #[error("a dependency is present at an incompatible version")]
    LoadDependencyBadVersion,

    /// A declared dependency is not in the registry.
    #[error("a required dependency was not found")]
    LoadDependencyNotFound,

    /// The dependency graph contains a cycle; no load order exists.
    #[error("the dependency graph contains a cycle")]
    LoadDependencyCycle,

    /// At least one library failed to unload during teardown.
    #[error("not all plugins could be unloaded")]
    UnloadNotAll,
}

impl ReturnCode {
    /// True exactly for [`ReturnCode::Success`]; callers branch on this.
    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(self, ReturnCode::Success)
    }
}

/// Per-incident reporting channel for search/load/unload operations.
///
/// Receives the incident code and a detail string, usually the offending
/// library path. Successful items produce no callback; the operation's
/// aggregate outcome is its return value. The callback must not call back
/// into the manager that invoked it.
pub type IncidentCallback<'a> = &'a mut dyn FnMut(ReturnCode, &str);

/// Wraps the optional callback so call sites don't branch on `None`.
pub(crate) struct Reporter<'a> {
    callback: Option<IncidentCallback<'a>>,
}

impl<'a> Reporter<'a> {
    pub fn new(callback: Option<IncidentCallback<'a>>) -> Self {
        Self { callback }
    }

    pub fn emit(&mut self, code: ReturnCode, detail: &str) {
        if let Some(callback) = self.callback.as_mut() {
            callback(code, detail);
        }
    }
}

/// Faults raised by the loaded-library layer.
#[derive(Error, Debug)]
pub enum ImageError {
    /// The dynamic linker rejected the file or a symbol lookup failed.
    #[error("library error: {0}")]
    Library(#[from] libloading::Error),

    /// The path does not refer to a loadable library image.
    #[error("not a loadable library: {0}")]
    NotLoadable(std::path::PathBuf),

    /// A string export is null or not valid UTF-8.
    #[error("string export `{0}` is malformed")]
    MalformedExport(String),

    /// The image was already closed.
    #[error("library image already closed")]
    Closed,

    /// The image could not be unloaded.
    #[error("failed to unload library: {0}")]
    Unload(String),
}
