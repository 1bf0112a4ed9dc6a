//! Descriptor parsing and validation

use jackplug_plugin_api::{PLUGIN_API, PluginMetadata};

use crate::version;

/// Parse the raw `jp_metadata` descriptor into a validated record.
///
/// Rejection is silent here; the caller reports it through the discovery
/// result code. A descriptor is rejected when:
/// - it is not valid JSON, or any required field is missing or wrong-typed
///   (serde fails the whole parse; no partial records),
/// - the name is empty,
/// - the declared `api` is not compatible with the host's [`PLUGIN_API`].
pub(crate) fn parse_descriptor(raw: &str) -> Option<PluginMetadata> {
    let meta: PluginMetadata = serde_json::from_str(raw).ok()?;
    if meta.name.is_empty() {
        return None;
    }
    if !version::compatible(&meta.api, PLUGIN_API) {
        return None;
    }
    Some(meta)
}
