//! End-to-end lifecycle tests over the in-memory loader: discovery through
//! dependency-ordered load, request routing, and reverse teardown.

use std::any::{Any, TypeId};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use jackplug_core::mock::{MockImage, MockLoader};
use jackplug_core::{PluginManager, ReturnCode};
use jackplug_plugin_api::{Plugin, RequestProxy};

/// Shared record of lifecycle and request events, in delivery order.
#[derive(Clone, Default)]
struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// Test plugin that logs every notification and answers requests with
/// `code + 1`.
struct TracingPlugin {
    name: String,
    log: EventLog,
    proxy: RequestProxy,
}

impl TracingPlugin {
    fn send(&self, receiver: Option<&str>, code: u16) -> u16 {
        let mut data = [0u8; 0];
        self.proxy.send(&self.name, receiver, code, &mut data)
    }
}

impl Plugin for TracingPlugin {
    fn loaded(&self) {
        self.log.push(format!("loaded {}", self.name));
    }

    fn about_to_be_unloaded(&self) {
        self.log.push(format!("unloading {}", self.name));
    }

    fn handle_request(&self, sender: &str, code: u16, _data: &mut [u8]) -> u16 {
        self.log.push(format!("{sender}->{} code {code}", self.name));
        code.wrapping_add(1)
    }

    fn capability(self: Arc<Self>, id: TypeId) -> Option<Arc<dyn Any + Send + Sync>> {
        if id == TypeId::of::<TracingPlugin>() {
            Some(self)
        } else {
            None
        }
    }
}

fn descriptor(name: &str, version: &str, deps: &[(&str, &str)]) -> String {
    let deps: Vec<String> = deps
        .iter()
        .map(|(n, v)| format!(r#"{{"name": "{n}", "version": "{v}"}}"#))
        .collect();
    format!(
        r#"{{
            "api": "1.0.0",
            "name": "{name}",
            "prettyName": "{name} (pretty)",
            "version": "{version}",
            "author": "tests",
            "url": "https://example.com/{name}",
            "license": "MIT",
            "copyright": "tests",
            "dependencies": [{}]
        }}"#,
        deps.join(", ")
    )
}

fn tracing_image(name: &str, version: &str, deps: &[(&str, &str)], log: &EventLog) -> MockImage {
    let log = log.clone();
    let name = name.to_string();
    MockImage::new(
        name.clone(),
        descriptor(&name, version, deps),
        move |proxy| {
            Arc::new(TracingPlugin {
                name: name.clone(),
                log: log.clone(),
                proxy,
            }) as Arc<dyn Plugin>
        },
    )
}

fn collect(incidents: &mut Vec<(ReturnCode, String)>) -> impl FnMut(ReturnCode, &str) + '_ {
    move |code, detail| incidents.push((code, detail.to_string()))
}

// ─── Discovery ───────────────────────────────────────────────────────

#[test]
fn listing_failure_with_no_candidates_reports_listfiles_error() {
    let mut loader = MockLoader::new();
    loader.fail_listing("/locked");
    let manager = PluginManager::with_loader(Arc::new(loader));

    let mut incidents = Vec::new();
    let code = manager.search("/locked", false, Some(&mut collect(&mut incidents)));
    assert_eq!(code, ReturnCode::SearchListFilesError);
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0].0, ReturnCode::SearchListFilesError);
}

#[test]
fn non_plugin_libraries_are_skipped_silently() {
    let log = EventLog::default();
    let mut loader = MockLoader::new();
    loader.insert("/plugins/opaque.so", MockImage::opaque());
    loader.insert("/plugins/real.so", tracing_image("real", "1.0.0", &[], &log));
    let loader = Arc::new(loader);
    let manager = PluginManager::with_loader(loader.clone());

    let mut incidents = Vec::new();
    let code = manager.search("/plugins", false, Some(&mut collect(&mut incidents)));
    assert!(code.is_success());
    assert!(incidents.is_empty());
    assert_eq!(manager.plugins_list(), ["real"]);
    // The opaque image was opened for inspection and released again.
    assert_eq!(loader.open_count(), 2);
    assert_eq!(loader.close_count(), 1);
}

#[test]
fn bad_metadata_is_reported_with_the_candidate_path() {
    let mut loader = MockLoader::new();
    loader.insert(
        "/plugins/broken.so",
        MockImage::new("broken", "{ not json", |_proxy| {
            unreachable!("a rejected candidate is never instantiated")
        }),
    );
    let manager = PluginManager::with_loader(Arc::new(loader));

    let mut incidents = Vec::new();
    let code = manager.search("/plugins", false, Some(&mut collect(&mut incidents)));
    assert_eq!(code, ReturnCode::SearchNothingFound);
    assert_eq!(
        incidents,
        vec![(
            ReturnCode::SearchCannotParseMetadata,
            "/plugins/broken.so".to_string()
        )]
    );
}

#[test]
fn duplicate_name_is_rejected_and_prior_record_kept() {
    // S5: two libraries exporting the same name; first admitted, second
    // discarded (and its image released, not leaked).
    let log = EventLog::default();
    let mut loader = MockLoader::new();
    loader.insert("/plugins/one.so", tracing_image("x", "1.0.0", &[], &log));
    loader.insert("/plugins/two.so", tracing_image("x", "2.0.0", &[], &log));
    let loader = Arc::new(loader);
    let manager = PluginManager::with_loader(loader.clone());

    let mut incidents = Vec::new();
    let code = manager.search("/plugins", false, Some(&mut collect(&mut incidents)));
    assert!(code.is_success());
    assert_eq!(
        incidents,
        vec![(
            ReturnCode::SearchNameAlreadyExists,
            "/plugins/two.so".to_string()
        )]
    );
    assert_eq!(manager.plugins_count(), 1);
    // The admitted record is the first one, untouched by the collision.
    assert_eq!(manager.plugin_info("x").unwrap().version, "1.0.0");
    assert_eq!(loader.close_count(), 1);
}

#[test]
fn locations_accumulate_in_first_hit_order() {
    let log = EventLog::default();
    let mut loader = MockLoader::new();
    loader.insert("/user/a.so", tracing_image("a", "1.0.0", &[], &log));
    loader.insert("/system/b.so", tracing_image("b", "1.0.0", &[], &log));
    let manager = PluginManager::with_loader(Arc::new(loader));

    assert!(manager.search("/user", false, None).is_success());
    assert!(manager.search("/system", false, None).is_success());
    assert_eq!(
        manager.plugins_locations(),
        vec![PathBuf::from("/user"), PathBuf::from("/system")]
    );
}

// ─── Load order and lifecycle ────────────────────────────────────────

#[test]
fn linear_chain_loads_in_dependency_order_and_unloads_in_reverse() {
    // S1: a depends on b, b depends on c.
    let log = EventLog::default();
    let mut loader = MockLoader::new();
    loader.insert(
        "/plugins/a.so",
        tracing_image("a", "1.0.0", &[("b", "1.0.0")], &log),
    );
    loader.insert(
        "/plugins/b.so",
        tracing_image("b", "1.0.0", &[("c", "1.0.0")], &log),
    );
    loader.insert("/plugins/c.so", tracing_image("c", "1.0.0", &[], &log));
    let loader = Arc::new(loader);
    let manager = PluginManager::with_loader(loader.clone());

    assert!(manager.search("/plugins", false, None).is_success());
    assert!(manager.load_all(true, None).is_success());

    assert_eq!(log.events(), ["loaded c", "loaded b", "loaded a"]);
    for name in ["a", "b", "c"] {
        assert!(manager.is_plugin_loaded(name));
    }

    assert!(manager.unload_all(None).is_success());
    assert_eq!(
        log.events(),
        [
            "loaded c",
            "loaded b",
            "loaded a",
            "unloading a",
            "unloading b",
            "unloading c"
        ]
    );

    // Nothing is left behind: registry drained, locations cleared, every
    // image handed back.
    assert_eq!(manager.plugins_count(), 0);
    assert!(manager.plugins_locations().is_empty());
    assert_eq!(loader.open_count(), loader.close_count());
}

#[test]
fn missing_dependency_is_tolerated_unless_strict() {
    // S2: a depends on an absent b.
    let log = EventLog::default();
    let mut loader = MockLoader::new();
    loader.insert(
        "/plugins/a.so",
        tracing_image("a", "1.0.0", &[("b", "1.0.0")], &log),
    );
    let manager = PluginManager::with_loader(Arc::new(loader));
    assert!(manager.search("/plugins", false, None).is_success());

    let mut incidents = Vec::new();
    let code = manager.load_all(true, Some(&mut collect(&mut incidents)));
    assert!(code.is_success());
    assert!(!manager.is_plugin_loaded("a"));
    assert!(log.events().is_empty());
    assert_eq!(
        incidents,
        vec![(
            ReturnCode::LoadDependencyNotFound,
            "/plugins/a.so".to_string()
        )]
    );

    let strict = manager.load_all(false, None);
    assert_eq!(strict, ReturnCode::LoadDependencyNotFound);
    assert!(!manager.is_plugin_loaded("a"));
}

#[test]
fn version_mismatch_reports_bad_version() {
    // S3: a requires b >= 2.0.0, b is 1.0.0.
    let log = EventLog::default();
    let mut loader = MockLoader::new();
    loader.insert(
        "/plugins/a.so",
        tracing_image("a", "1.0.0", &[("b", "2.0.0")], &log),
    );
    loader.insert("/plugins/b.so", tracing_image("b", "1.0.0", &[], &log));
    let manager = PluginManager::with_loader(Arc::new(loader));
    assert!(manager.search("/plugins", false, None).is_success());

    let mut incidents = Vec::new();
    let code = manager.load_all(true, Some(&mut collect(&mut incidents)));
    assert!(code.is_success());
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0].0, ReturnCode::LoadDependencyBadVersion);
    assert!(incidents[0].1.contains("a.so"));

    // b has no dependencies of its own and loads fine.
    assert!(manager.is_plugin_loaded("b"));
    assert!(!manager.is_plugin_loaded("a"));

    assert_eq!(
        manager.load_all(false, None),
        ReturnCode::LoadDependencyBadVersion
    );
}

#[test]
fn dependency_cycle_aborts_the_pass_without_instantiating() {
    // S4: a and b require each other.
    let log = EventLog::default();
    let mut loader = MockLoader::new();
    loader.insert(
        "/plugins/a.so",
        tracing_image("a", "1.0.0", &[("b", "1.0.0")], &log),
    );
    loader.insert(
        "/plugins/b.so",
        tracing_image("b", "1.0.0", &[("a", "1.0.0")], &log),
    );
    let manager = PluginManager::with_loader(Arc::new(loader));
    assert!(manager.search("/plugins", false, None).is_success());

    let mut incidents = Vec::new();
    let code = manager.load_all(true, Some(&mut collect(&mut incidents)));
    assert_eq!(code, ReturnCode::LoadDependencyCycle);
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0].0, ReturnCode::LoadDependencyCycle);
    assert!(log.events().is_empty());
    assert!(!manager.is_plugin_loaded("a"));
    assert!(!manager.is_plugin_loaded("b"));
}

#[test]
fn reload_is_idempotent_and_picks_up_new_discoveries() {
    let log = EventLog::default();
    let mut loader = MockLoader::new();
    loader.insert("/plugins/a.so", tracing_image("a", "1.0.0", &[], &log));
    loader.insert(
        "/more/b.so",
        tracing_image("b", "1.0.0", &[("a", "1.0.0")], &log),
    );
    let manager = PluginManager::with_loader(Arc::new(loader));

    assert!(manager.search("/plugins", false, None).is_success());
    assert!(manager.load_all(true, None).is_success());
    assert_eq!(log.events(), ["loaded a"]);

    // Second pass with an unchanged registry: no new notifications.
    assert!(manager.load_all(true, None).is_success());
    assert_eq!(log.events(), ["loaded a"]);

    // A record discovered between passes is loaded; a stays untouched.
    assert!(manager.search("/more", false, None).is_success());
    assert!(manager.load_all(true, None).is_success());
    assert_eq!(log.events(), ["loaded a", "loaded b"]);
}

#[test]
fn ineligible_records_are_drained_on_unload() {
    let log = EventLog::default();
    let mut loader = MockLoader::new();
    loader.insert("/plugins/a.so", tracing_image("a", "1.0.0", &[], &log));
    loader.insert(
        "/plugins/orphan.so",
        tracing_image("orphan", "1.0.0", &[("ghost", "1.0.0")], &log),
    );
    let loader = Arc::new(loader);
    let manager = PluginManager::with_loader(loader.clone());

    assert!(manager.search("/plugins", false, None).is_success());
    assert!(manager.load_all(true, None).is_success());
    assert!(manager.is_plugin_loaded("a"));
    assert!(!manager.is_plugin_loaded("orphan"));

    assert!(manager.unload_all(None).is_success());
    assert_eq!(manager.plugins_count(), 0);
    assert_eq!(loader.open_count(), loader.close_count());
    // The orphan never had an instance, so only a's notifications exist.
    assert_eq!(log.events(), ["loaded a", "unloading a"]);
}

#[test]
fn failed_unload_is_reported_but_teardown_finishes() {
    let log = EventLog::default();
    let mut loader = MockLoader::new();
    loader.insert(
        "/plugins/stuck.so",
        tracing_image("stuck", "1.0.0", &[], &log).with_failing_unload(),
    );
    loader.insert("/plugins/fine.so", tracing_image("fine", "1.0.0", &[], &log));
    let manager = PluginManager::with_loader(Arc::new(loader));

    assert!(manager.search("/plugins", false, None).is_success());
    assert!(manager.load_all(true, None).is_success());

    let mut incidents = Vec::new();
    let code = manager.unload_all(Some(&mut collect(&mut incidents)));
    assert_eq!(code, ReturnCode::UnloadNotAll);
    assert_eq!(
        incidents,
        vec![(ReturnCode::UnloadNotAll, "/plugins/stuck.so".to_string())]
    );
    // The registry is drained regardless.
    assert_eq!(manager.plugins_count(), 0);
    assert!(manager.plugins_locations().is_empty());
}

#[test]
fn plugin_info_snapshot_matches_the_descriptor() {
    let log = EventLog::default();
    let mut loader = MockLoader::new();
    loader.insert(
        "/plugins/a.so",
        tracing_image("a", "3.2.1", &[("dep", "1.0.0")], &log),
    );
    let manager = PluginManager::with_loader(Arc::new(loader));
    assert!(manager.search("/plugins", false, None).is_success());

    let info = manager.plugin_info("a").unwrap();
    assert_eq!(info.name, "a");
    assert_eq!(info.pretty_name, "a (pretty)");
    assert_eq!(info.version, "3.2.1");
    assert_eq!(info.author, "tests");
    assert_eq!(info.url, "https://example.com/a");
    assert_eq!(info.license, "MIT");
    assert_eq!(info.copyright, "tests");
    assert_eq!(info.dependencies.len(), 1);
    assert_eq!(info.dependencies[0].name, "dep");
    assert_eq!(info.dependencies[0].version, "1.0.0");

    // The snapshot is an owning copy: it survives the record's removal.
    manager.unload_all(None);
    assert_eq!(info.version, "3.2.1");
}

// ─── Request routing ─────────────────────────────────────────────────

#[test]
fn requests_are_routed_between_live_plugins() {
    // S6: a sends to b; b's answer propagates back.
    let log = EventLog::default();
    let mut loader = MockLoader::new();
    loader.insert("/plugins/a.so", tracing_image("a", "1.0.0", &[], &log));
    loader.insert("/plugins/b.so", tracing_image("b", "1.0.0", &[], &log));
    let manager = PluginManager::with_loader(Arc::new(loader));
    assert!(manager.search("/plugins", false, None).is_success());
    assert!(manager.load_all(true, None).is_success());

    let a = manager.plugin_object::<TracingPlugin>("a").unwrap();
    assert_eq!(a.send(Some("b"), 7), 8);
    assert!(log.events().contains(&"a->b code 7".to_string()));

    // Unknown receivers answer 0 without touching anyone.
    let before = log.events().len();
    assert_eq!(a.send(Some("nonexistent"), 7), 0);
    assert_eq!(log.events().len(), before);
}

#[test]
fn requests_to_unloaded_plugins_answer_zero() {
    let log = EventLog::default();
    let mut loader = MockLoader::new();
    loader.insert("/plugins/a.so", tracing_image("a", "1.0.0", &[], &log));
    loader.insert(
        "/plugins/orphan.so",
        tracing_image("orphan", "1.0.0", &[("ghost", "1.0.0")], &log),
    );
    let manager = PluginManager::with_loader(Arc::new(loader));
    assert!(manager.search("/plugins", false, None).is_success());
    assert!(manager.load_all(true, None).is_success());

    // orphan is registered but was never instantiated.
    let a = manager.plugin_object::<TracingPlugin>("a").unwrap();
    assert_eq!(a.send(Some("orphan"), 3), 0);
}

#[test]
fn host_addressed_requests_use_the_installed_handler() {
    let log = EventLog::default();
    let mut loader = MockLoader::new();
    loader.insert("/plugins/a.so", tracing_image("a", "1.0.0", &[], &log));
    let manager = PluginManager::with_loader(Arc::new(loader));
    assert!(manager.search("/plugins", false, None).is_success());
    assert!(manager.load_all(true, None).is_success());

    let a = manager.plugin_object::<TracingPlugin>("a").unwrap();

    // Without a handler the host answers 0.
    assert_eq!(a.send(None, 40), 0);

    manager.set_host_request_handler(|sender, code, _data| {
        assert_eq!(sender, "a");
        code.wrapping_mul(2)
    });
    assert_eq!(a.send(None, 40), 80);
}

#[test]
fn plugin_object_answers_only_registered_capabilities() {
    // A plugin that never overrides the capability probe stays opaque.
    struct OpaquePlugin;
    impl Plugin for OpaquePlugin {}

    let log = EventLog::default();
    let mut loader = MockLoader::new();
    loader.insert("/plugins/a.so", tracing_image("a", "1.0.0", &[], &log));
    loader.insert(
        "/plugins/shy.so",
        MockImage::new("shy", descriptor("shy", "1.0.0", &[]), |_proxy| {
            Arc::new(OpaquePlugin) as Arc<dyn Plugin>
        }),
    );
    let manager = PluginManager::with_loader(Arc::new(loader));
    assert!(manager.search("/plugins", false, None).is_success());

    // Not loaded yet: no instance to hand out.
    assert!(manager.plugin_object::<TracingPlugin>("a").is_none());

    assert!(manager.load_all(true, None).is_success());
    assert!(manager.plugin_object::<TracingPlugin>("a").is_some());
    // TracingPlugin registers only its own type id.
    assert!(manager.plugin_object::<OpaquePlugin>("a").is_none());
    // OpaquePlugin registers nothing, not even itself.
    assert!(manager.plugin_object::<OpaquePlugin>("shy").is_none());
    assert!(manager.plugin_object::<TracingPlugin>("missing").is_none());
}
