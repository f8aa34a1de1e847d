//! Plugin lifecycle scenarios: dependency validation at load and hot
//! reload continuity.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use estateguard_graph::GraphError;
use estateguard_manifest::Version;
use estateguard_plugins::PluginError;

use common::*;

const PLUGIN_B: &str = r#"
id: plugin-processing-b
name: Plugin B
version: 1.5.0
kind: processing
api_version: "1.0"
description: dependency target
entrypoint:
  module: estateguard.testkit
  class: ScriptedProcessing
"#;

const PLUGIN_A: &str = r#"
id: plugin-detection-a
name: Plugin A
version: 1.0.0
kind: detection
api_version: "1.0"
description: depends on plugin B at a version that is not loaded
entrypoint:
  module: estateguard.testkit
  class: ScriptedDetection
dependencies:
  plugins:
    plugin-processing-b: "^2.0.0"
"#;

#[tokio::test]
async fn version_incompatibility_fails_only_the_dependent() {
    let root = tempfile::tempdir().unwrap();
    write_plugin(root.path(), "a", PLUGIN_A);
    write_plugin(root.path(), "b", PLUGIN_B);

    let manager = manager_for(root.path());
    let report = manager.load_all().await;

    // A reports the incompatibility with the exact versions involved.
    assert_eq!(report.failed.len(), 1);
    match &report.failed[0].1 {
        PluginError::Dependency(GraphError::VersionIncompatibility {
            dependent,
            dependency,
            required,
            actual,
        }) => {
            assert_eq!(dependent, "plugin-detection-a");
            assert_eq!(dependency, "plugin-processing-b");
            assert_eq!(required, "^2.0.0");
            assert_eq!(actual, "1.5.0");
        }
        other => panic!("unexpected failure: {other:?}"),
    }

    // B stays loaded; the graph omits A entirely.
    assert_eq!(report.loaded, vec!["plugin-processing-b".to_string()]);
    assert!(manager.get("plugin-processing-b").is_some());
    assert!(manager.get("plugin-detection-a").is_none());
    let graph = manager.graph().unwrap();
    assert!(graph.contains("plugin-processing-b"));
    assert!(!graph.contains("plugin-detection-a"));
}

#[tokio::test]
async fn hot_reload_swaps_without_a_gap() {
    let root = tempfile::tempdir().unwrap();
    let marker = root.path().join("shutdown-marker");
    let manifest = scripted_stage_manifest(
        "reloadable",
        5,
        &format!(
            "    marker: generation-one\n    shutdown_marker: \"{}\"\n",
            marker.display()
        ),
    );
    let manifest_path = write_plugin(root.path(), "reloadable", &manifest);

    let manager = Arc::new(manager_for(root.path()));
    let report = manager.load_all().await;
    assert_eq!(report.loaded, vec!["plugin-processing-reloadable".to_string()]);
    manager.enable("plugin-processing-reloadable").await.unwrap();
    let old_version = manager
        .get("plugin-processing-reloadable")
        .unwrap()
        .manifest
        .version
        .clone();
    assert_eq!(old_version, Version::new(1, 0, 0));

    // New implementation generation on disk.
    std::fs::write(
        &manifest_path,
        manifest
            .replace("version: 1.0.0", "version: 1.0.1")
            .replace("generation-one", "generation-two"),
    )
    .unwrap();

    // A reader hammering `get` for the whole duration of the reload; the
    // registry must never answer with an absence.
    let stop = Arc::new(AtomicBool::new(false));
    let observer = {
        let manager = Arc::clone(&manager);
        let stop = Arc::clone(&stop);
        tokio::spawn(async move {
            let mut observations = 0u64;
            while !stop.load(Ordering::Acquire) {
                assert!(
                    manager.get("plugin-processing-reloadable").is_some(),
                    "registry lost the plugin mid-reload"
                );
                observations += 1;
                tokio::task::yield_now().await;
            }
            observations
        })
    };

    let reloaded = manager.reload("plugin-processing-reloadable").await.unwrap();
    stop.store(true, Ordering::Release);
    let observations = observer.await.unwrap();
    assert!(observations > 0);

    // The old instance was shut down and the new one is live and enabled.
    assert_eq!(std::fs::read_to_string(&marker).unwrap(), "closed");
    assert_eq!(reloaded.manifest.version, Version::new(1, 0, 1));
    assert!(reloaded.is_enabled());
    let current = manager.get("plugin-processing-reloadable").unwrap();
    assert!(Arc::ptr_eq(&reloaded, &current));
}

#[tokio::test]
async fn reload_with_unsatisfied_dependencies_keeps_the_old_instance() {
    let root = tempfile::tempdir().unwrap();
    write_plugin(root.path(), "b", PLUGIN_B);
    let compatible = PLUGIN_A.replace("\"^2.0.0\"", "\"^1.0.0\"");
    let manifest_path = write_plugin(root.path(), "a", &compatible);

    let manager = manager_for(root.path());
    let report = manager.load_all().await;
    assert_eq!(report.loaded.len(), 2);

    // The new manifest generation demands a dependency version that is not
    // in the registry; reload must refuse and keep the old instance.
    std::fs::write(&manifest_path, PLUGIN_A).unwrap();
    let err = manager.reload("plugin-detection-a").await.unwrap_err();
    assert!(matches!(
        err,
        PluginError::Dependency(GraphError::VersionIncompatibility { .. })
    ));

    let kept = manager.get("plugin-detection-a").unwrap();
    assert_eq!(kept.manifest.version, Version::new(1, 0, 0));
    assert_eq!(
        kept.manifest.dependencies.plugins["plugin-processing-b"].to_string(),
        "^1.0.0"
    );
}
