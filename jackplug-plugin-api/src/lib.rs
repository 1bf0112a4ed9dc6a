//! jackplug-plugin-api - Plugin API for the jackplug plugin manager
//!
//! This crate provides the traits and types needed to write plugins for a
//! jackplug host. Plugins are native Rust dynamic libraries that embed a JSON
//! descriptor, receive lifecycle notifications, and exchange addressed
//! requests with other plugins and the host.
//!
//! # Example
//!
//! ```ignore
//! use std::any::{Any, TypeId};
//! use std::sync::Arc;
//!
//! use jackplug_plugin_api::{export_plugin, Plugin, PluginFactory, RequestProxy};
//!
//! pub struct MyPlugin {
//!     proxy: RequestProxy,
//! }
//!
//! impl PluginFactory for MyPlugin {
//!     fn create(proxy: RequestProxy) -> Self {
//!         Self { proxy }
//!     }
//! }
//!
//! impl Plugin for MyPlugin {
//!     fn loaded(&self) {
//!         // Dependencies are already live at this point.
//!     }
//!
//!     fn handle_request(&self, _sender: &str, code: u16, _data: &mut [u8]) -> u16 {
//!         code
//!     }
//!
//!     // Let the host hand out typed handles to this plugin.
//!     fn capability(self: Arc<Self>, id: TypeId) -> Option<Arc<dyn Any + Send + Sync>> {
//!         if id == TypeId::of::<MyPlugin>() { Some(self) } else { None }
//!     }
//! }
//!
//! export_plugin!(
//!     MyPlugin,
//!     c"my-plugin",
//!     cr#"{
//!         "api": "1.0.0",
//!         "name": "my-plugin",
//!         "prettyName": "My Plugin",
//!         "version": "0.1.0",
//!         "author": "me",
//!         "url": "https://example.com",
//!         "license": "MIT",
//!         "copyright": "me",
//!         "dependencies": []
//!     }"#
//! );
//! ```

use std::any::{Any, TypeId};
use std::ffi::{CStr, c_char};
use std::sync::Arc;

pub mod proxy;
pub mod types;

pub use proxy::{RequestBroker, RequestProxy};
pub use types::{DependencySpec, PluginMetadata};

/// Plugin API version the host is compiled against.
///
/// Descriptors declare the API they were built for in their `api` field;
/// plugins with an incompatible API are rejected at discovery time.
pub const PLUGIN_API: &str = "1.0.0";

/// Storage for the `jp_name`/`jp_metadata` exports: a thin `const char*`
/// pointing at nul-terminated string data, the layout a C host reads.
///
/// A raw-pointer static is not `Sync`; this transparent wrapper carries the
/// pointer for [`export_plugin!`].
#[repr(transparent)]
pub struct StaticCStr(*const c_char);

// SAFETY: the pointer targets immutable 'static string data.
unsafe impl Sync for StaticCStr {}

impl StaticCStr {
    /// Wrap a C string literal (`c"..."` / `cr#"..."#`).
    pub const fn new(value: &'static CStr) -> Self {
        Self(value.as_ptr())
    }

    /// The wrapped `const char*`.
    pub const fn as_ptr(&self) -> *const c_char {
        self.0
    }
}

/// The core plugin trait - implement this to create a jackplug plugin.
///
/// All notifications have default no-op implementations, so plugins only
/// need to override the ones they care about. Every method takes `&self`;
/// plugins that carry mutable state use interior mutability, which is what
/// lets the host route a request into an instance while another request is
/// already in flight.
pub trait Plugin: Send + Sync + 'static {
    /// Notification delivered after construction, strictly after every
    /// dependency has received its own `loaded`.
    fn loaded(&self) {}

    /// Notification delivered before the instance is dropped and its
    /// library released.
    fn about_to_be_unloaded(&self) {}

    /// Inbound request handler. `sender` is the name of the plugin (or
    /// host) that sent the request. Return 0 for "not handled".
    fn handle_request(&self, _sender: &str, _code: u16, _data: &mut [u8]) -> u16 {
        0
    }

    /// Capability probe behind the host's typed instance accessor.
    ///
    /// A plugin that wants to be reachable as a concrete type overrides
    /// this and answers for the type ids it registers, typically just its
    /// own:
    ///
    /// ```ignore
    /// fn capability(self: Arc<Self>, id: TypeId) -> Option<Arc<dyn Any + Send + Sync>> {
    ///     if id == TypeId::of::<MyPlugin>() { Some(self) } else { None }
    /// }
    /// ```
    ///
    /// The default registers nothing, so plugins stay opaque unless they
    /// opt in.
    fn capability(self: Arc<Self>, _id: TypeId) -> Option<Arc<dyn Any + Send + Sync>> {
        None
    }
}

/// Constructor invoked by the factory symbol that [`export_plugin!`]
/// generates. The proxy is the plugin's only channel back to the host;
/// keep it if the plugin ever sends requests.
pub trait PluginFactory: Plugin + Sized {
    /// Build the plugin instance.
    fn create(proxy: RequestProxy) -> Self;
}

/// Export a plugin type for dynamic loading.
///
/// Generates the three symbols a jackplug host requires of every plugin
/// library:
///
/// - `jp_name`: the plugin's unique name, a nul-terminated byte string
/// - `jp_metadata`: the JSON descriptor, a nul-terminated byte string
/// - `jp_createPlugin`: factory constructing the instance from a
///   [`RequestProxy`]
///
/// `$name` and `$metadata` must be C string literals (`c"..."`,
/// `cr#"..."#`), which are nul-terminated by construction.
///
/// # Usage
///
/// ```ignore
/// jackplug_plugin_api::export_plugin!(MyPlugin, c"my-plugin", METADATA_JSON);
/// ```
#[macro_export]
macro_rules! export_plugin {
    ($plugin_type:ty, $name:expr, $metadata:expr) => {
        #[allow(non_upper_case_globals)]
        #[unsafe(no_mangle)]
        pub static jp_name: $crate::StaticCStr = $crate::StaticCStr::new($name);

        #[allow(non_upper_case_globals)]
        #[unsafe(no_mangle)]
        pub static jp_metadata: $crate::StaticCStr = $crate::StaticCStr::new($metadata);

        #[allow(non_snake_case, improper_ctypes_definitions)]
        #[unsafe(no_mangle)]
        pub extern "C" fn jp_createPlugin(
            proxy: $crate::RequestProxy,
        ) -> *mut dyn $crate::Plugin {
            let plugin: Box<dyn $crate::Plugin> =
                Box::new(<$plugin_type as $crate::PluginFactory>::create(proxy));
            Box::into_raw(plugin)
        }
    };
}
