//! Descriptor types embedded in plugin libraries

use serde::{Deserialize, Serialize};

/// The JSON descriptor every plugin embeds through its `jp_metadata` export.
///
/// Field names are camelCase on the wire. Every field is required; a
/// descriptor missing any of them (or carrying a wrong-typed value) is
/// rejected as a whole at discovery time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginMetadata {
    /// Plugin API version this plugin was built against.
    pub api: String,
    /// Unique plugin name; the registry key.
    pub name: String,
    /// Human-readable display name.
    pub pretty_name: String,
    /// Plugin version (semver).
    pub version: String,
    /// Plugin author.
    pub author: String,
    /// Project or documentation URL.
    pub url: String,
    /// License identifier.
    pub license: String,
    /// Copyright line.
    pub copyright: String,
    /// Direct dependencies, in declaration order.
    pub dependencies: Vec<DependencySpec>,
}

/// One declared dependency: a plugin name and the minimum version the
/// dependent is compatible with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySpec {
    /// Name of the required plugin.
    pub name: String,
    /// Minimum required version.
    pub version: String,
}
