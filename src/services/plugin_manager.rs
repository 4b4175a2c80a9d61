//! Plugin discovery and instantiation.
//!
//! Scans the configured plugin directories at startup, tracks per-plugin
//! weights, and hands out a fresh plugin instance per invocation. All
//! embedded-runtime plugins share one runtime, serialized by a
//! process-wide lock.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::domain::models::config::PluginsConfig;
use crate::domain::ports::{EmbeddedRuntime, Plugin, PluginSpawner};

/// The runtime's own bridge library, always first on the classpath.
const BRIDGE_JAR: &str = "adaptation-bridge.jar";

enum PluginEntry {
    Script { path: PathBuf, weight: i64 },
    Embedded { runtime: Arc<EmbeddedRuntime>, weight: i64 },
}

/// Inventory of discovered plugins.
pub struct PluginManager {
    entries: BTreeMap<String, PluginEntry>,
    spawner: Arc<dyn PluginSpawner>,
}

impl PluginManager {
    /// Scan the configured directories and build the plugin inventory.
    ///
    /// Script plugins live at `<dir>/<name>/<name>.py`; embedded-runtime
    /// plugins at `<dir>/<name>/<name>.jar`, with every other `.jar` in
    /// the plugin's directory appended to the shared classpath. A
    /// missing directory is logged and treated as empty.
    pub fn discover(config: &PluginsConfig, spawner: Arc<dyn PluginSpawner>) -> Self {
        let mut entries = BTreeMap::new();

        for (name, path) in scan_plugin_files(Path::new(&config.python), "py") {
            let weight = config.weight_for(&name);
            info!(plugin = %name, path = %path.display(), weight, "registered script plugin");
            entries.insert(name, PluginEntry::Script { path, weight });
        }

        let embedded = scan_plugin_files(Path::new(&config.java), "jar");
        if !embedded.is_empty() {
            let mut classpath = vec![Path::new(&config.java).join(BRIDGE_JAR)];
            for (_, main_jar) in &embedded {
                classpath.push(main_jar.clone());
                if let Some(dir) = main_jar.parent() {
                    classpath.extend(sibling_jars(dir, main_jar));
                }
            }
            let classpath = classpath
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(":");

            let runtime = Arc::new(EmbeddedRuntime::new(classpath));
            if runtime.mark_started() {
                info!(classpath = runtime.classpath(), "embedded plugin runtime started");
            }

            for (name, path) in embedded {
                let weight = config.weight_for(&name);
                info!(plugin = %name, path = %path.display(), weight, "registered embedded plugin");
                entries.insert(
                    name,
                    PluginEntry::Embedded {
                        runtime: runtime.clone(),
                        weight,
                    },
                );
            }
        }

        Self { entries, spawner }
    }

    /// Fresh plugin instances for the given names, preserving order.
    /// Unknown names are logged and skipped.
    pub fn instances(&self, names: &[String]) -> Vec<Box<dyn Plugin>> {
        let mut plugins = Vec::with_capacity(names.len());
        for name in names {
            match self.entries.get(name) {
                Some(PluginEntry::Script { path, weight }) => {
                    plugins.push(self.spawner.script(name, path, *weight));
                }
                Some(PluginEntry::Embedded { runtime, weight }) => {
                    plugins.push(self.spawner.embedded(name, runtime.clone(), *weight));
                }
                None => error!(plugin = %name, "could not get plugin"),
            }
        }
        plugins
    }

    /// Names of every discovered plugin.
    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Directories under `root` containing `<name>/<name>.<ext>`.
fn scan_plugin_files(root: &Path, ext: &str) -> Vec<(String, PathBuf)> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %root.display(), error = %e, "plugin directory doesn't seem to exist");
            return Vec::new();
        }
    };

    let mut found = Vec::new();
    for entry in entries.flatten() {
        let dir = entry.path();
        if !dir.is_dir() {
            warn!(path = %dir.display(), "not a directory, skipping");
            continue;
        }
        let Some(name) = dir.file_name().and_then(|n| n.to_str()).map(str::to_owned) else {
            continue;
        };
        let main_file = dir.join(format!("{name}.{ext}"));
        if main_file.is_file() {
            found.push((name, main_file));
        } else {
            warn!(
                plugin = %name,
                expected = %main_file.display(),
                "could not add plugin, main file doesn't exist"
            );
        }
    }
    found.sort();
    found
}

/// Every `.jar` in `dir` other than the main jar.
fn sibling_jars(dir: &Path, main_jar: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut jars: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|e| e == "jar") && p != main_jar)
        .collect();
    jars.sort();
    jars
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::PluginError;
    use crate::domain::models::action::Action;
    use crate::domain::models::plugin::PluginInput;
    use async_trait::async_trait;

    struct NamedStub {
        name: String,
        weight: i64,
    }

    #[async_trait]
    impl Plugin for NamedStub {
        fn name(&self) -> &str {
            &self.name
        }
        fn weight(&self) -> i64 {
            self.weight
        }
        async fn run(&self, _input: PluginInput) -> Result<Vec<Action>, PluginError> {
            Ok(vec![])
        }
    }

    struct StubSpawner;

    impl PluginSpawner for StubSpawner {
        fn script(&self, name: &str, _path: &Path, weight: i64) -> Box<dyn Plugin> {
            Box::new(NamedStub {
                name: name.into(),
                weight,
            })
        }
        fn embedded(
            &self,
            name: &str,
            _runtime: Arc<EmbeddedRuntime>,
            weight: i64,
        ) -> Box<dyn Plugin> {
            Box::new(NamedStub {
                name: name.into(),
                weight,
            })
        }
    }

    fn plugin_dirs() -> (tempfile::TempDir, tempfile::TempDir) {
        let python = tempfile::tempdir().unwrap();
        let java = tempfile::tempdir().unwrap();

        for name in ["alpha", "beta"] {
            let dir = python.path().join(name);
            std::fs::create_dir(&dir).unwrap();
            std::fs::write(dir.join(format!("{name}.py")), "# plugin").unwrap();
        }
        // A directory without its main file must be skipped.
        std::fs::create_dir(python.path().join("broken")).unwrap();

        let jdir = java.path().join("gamma");
        std::fs::create_dir(&jdir).unwrap();
        std::fs::write(jdir.join("gamma.jar"), b"jar").unwrap();
        std::fs::write(jdir.join("helper.jar"), b"jar").unwrap();

        (python, java)
    }

    fn config_for(python: &Path, java: &Path) -> PluginsConfig {
        PluginsConfig {
            python: python.display().to_string(),
            java: java.display().to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn discovers_script_and_embedded_plugins() {
        let (python, java) = plugin_dirs();
        let manager = PluginManager::discover(
            &config_for(python.path(), java.path()),
            Arc::new(StubSpawner),
        );

        assert_eq!(manager.names(), vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn missing_directories_yield_empty_inventory() {
        let config = PluginsConfig {
            python: "/definitely/not/here".into(),
            java: "/also/not/here".into(),
            ..Default::default()
        };
        let manager = PluginManager::discover(&config, Arc::new(StubSpawner));
        assert!(manager.is_empty());
    }

    #[test]
    fn instances_preserve_order_and_skip_unknown() {
        let (python, java) = plugin_dirs();
        let manager = PluginManager::discover(
            &config_for(python.path(), java.path()),
            Arc::new(StubSpawner),
        );

        let plugins = manager.instances(&[
            "beta".to_string(),
            "ghost".to_string(),
            "alpha".to_string(),
        ]);

        let names: Vec<&str> = plugins.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["beta", "alpha"]);
    }

    #[test]
    fn weights_come_from_config() {
        let (python, java) = plugin_dirs();
        let mut config = config_for(python.path(), java.path());
        config.default_weighting = 2;
        config.weightings = vec![crate::domain::models::config::PluginWeight {
            name: "alpha".into(),
            weight: 7,
        }];

        let manager = PluginManager::discover(&config, Arc::new(StubSpawner));
        let plugins = manager.instances(&["alpha".to_string(), "beta".to_string()]);

        assert_eq!(plugins[0].weight(), 7);
        assert_eq!(plugins[1].weight(), 2);
    }
}
