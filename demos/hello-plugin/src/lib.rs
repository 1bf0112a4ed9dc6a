//! Hello Plugin - a minimal example plugin for jackplug
//!
//! This plugin demonstrates:
//! - Basic plugin structure with the `export_plugin!` macro
//! - Keeping the [`RequestProxy`] for talking back to the host
//! - Answering requests from other plugins
//!
//! ## Building
//!
//! ```bash
//! cargo build --release
//! ```
//!
//! ## Installing
//!
//! Copy `target/release/libhello_plugin.so` into a directory your host
//! passes to `PluginManager::search`.

use std::any::{Any, TypeId};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use jackplug_plugin_api::{Plugin, PluginFactory, RequestProxy, export_plugin};

/// Request code answered by this plugin: replies with the number of pings
/// received so far (including the current one).
pub const PING: u16 = 1;

/// A plugin that counts the pings other plugins send it.
pub struct HelloPlugin {
    proxy: RequestProxy,
    pings: AtomicU32,
}

impl PluginFactory for HelloPlugin {
    fn create(proxy: RequestProxy) -> Self {
        Self {
            proxy,
            pings: AtomicU32::new(0),
        }
    }
}

impl Plugin for HelloPlugin {
    fn loaded(&self) {
        // Announce ourselves to the host; without a host handler installed
        // the answer is simply 0.
        let mut data = [0u8; 0];
        let _ = self.proxy.send("hello", None, 0, &mut data);
    }

    fn handle_request(&self, _sender: &str, code: u16, _data: &mut [u8]) -> u16 {
        match code {
            PING => (self.pings.fetch_add(1, Ordering::Relaxed) + 1) as u16,
            _ => 0,
        }
    }

    // Hosts may ask for a typed handle via `plugin_object::<HelloPlugin>`.
    fn capability(self: Arc<Self>, id: TypeId) -> Option<Arc<dyn Any + Send + Sync>> {
        if id == TypeId::of::<HelloPlugin>() {
            Some(self)
        } else {
            None
        }
    }
}

export_plugin!(
    HelloPlugin,
    c"hello",
    cr#"{
        "api": "1.0.0",
        "name": "hello",
        "prettyName": "Hello",
        "version": "0.1.0",
        "author": "jackplug contributors",
        "url": "https://example.com/jackplug",
        "license": "MIT",
        "copyright": "jackplug contributors",
        "dependencies": []
    }"#
);
