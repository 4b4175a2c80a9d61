//! Out-of-process plugin execution.
//!
//! Plugins speak JSON over stdio: the engine writes a single document
//! `{event, actions, agreement_map}` to stdin and reads a JSON array of
//! action dicts from stdout. API endpoints are handed over through the
//! process environment so plugins can query metrics / compute /
//! orchestration / SLA read-only.
//!
//! Script plugins run truly concurrently. Embedded-runtime plugins all
//! launch through the shared runtime and hold its process-wide lock for
//! the duration of the run, since that runtime is not re-entrant.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::domain::error::PluginError;
use crate::domain::models::action::Action;
use crate::domain::models::plugin::PluginInput;
use crate::domain::ports::{EmbeddedRuntime, Plugin, PluginSpawner};

/// The class launched inside the embedded runtime; it loads the plugin
/// named by its argument and bridges the stdio protocol.
const RUNTIME_LAUNCHER: &str = "adaptationengine.PluginRunner";

/// Spawns plugin processes with the engine's API environment.
pub struct ProcessPluginSpawner {
    /// `AE_*` variables describing the API endpoints.
    env: Vec<(String, String)>,
    /// Interpreter for script plugins.
    interpreter: String,
}

impl ProcessPluginSpawner {
    pub fn new(env: Vec<(String, String)>) -> Self {
        Self {
            env,
            interpreter: "python3".into(),
        }
    }

    /// Override the script interpreter. Used by tests.
    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = interpreter.into();
        self
    }
}

impl PluginSpawner for ProcessPluginSpawner {
    fn script(&self, name: &str, path: &Path, weight: i64) -> Box<dyn Plugin> {
        Box::new(ScriptPlugin {
            name: name.to_owned(),
            path: path.to_owned(),
            weight,
            interpreter: self.interpreter.clone(),
            env: self.env.clone(),
        })
    }

    fn embedded(
        &self,
        name: &str,
        runtime: Arc<EmbeddedRuntime>,
        weight: i64,
    ) -> Box<dyn Plugin> {
        Box::new(EmbeddedPlugin {
            name: name.to_owned(),
            runtime,
            weight,
            env: self.env.clone(),
        })
    }
}

/// Run a prepared command through the stdio protocol.
async fn run_process(
    mut command: Command,
    name: &str,
    input: &PluginInput,
) -> Result<Vec<Action>, PluginError> {
    let payload = serde_json::to_vec(input)
        .map_err(|e| PluginError::Protocol(format!("input not serializable: {e}")))?;

    let mut child = command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(false)
        .spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(&payload).await?;
        stdin.shutdown().await?;
    }

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PluginError::Failed(format!(
            "[{name}] exited with {}: {}",
            output.status,
            stderr.chars().take(300).collect::<String>()
        )));
    }

    let raw: Vec<Value> = serde_json::from_slice(&output.stdout)
        .map_err(|e| PluginError::Protocol(format!("[{name}] stdout not an action list: {e}")))?;

    let mut actions = Vec::with_capacity(raw.len());
    for value in &raw {
        actions.push(
            Action::from_value(value)
                .map_err(|e| PluginError::Protocol(format!("[{name}] bad action: {e}")))?,
        );
    }
    debug!(plugin = name, actions = actions.len(), "plugin produced results");
    Ok(actions)
}

/// A script plugin executed by the configured interpreter.
struct ScriptPlugin {
    name: String,
    path: PathBuf,
    weight: i64,
    interpreter: String,
    env: Vec<(String, String)>,
}

#[async_trait]
impl Plugin for ScriptPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn weight(&self) -> i64 {
        self.weight
    }

    async fn run(&self, input: PluginInput) -> Result<Vec<Action>, PluginError> {
        debug!(plugin = %self.name, "executing script plugin");
        let mut command = Command::new(&self.interpreter);
        command.arg(&self.path).envs(self.env.iter().cloned());
        run_process(command, &self.name, &input).await
    }
}

/// An embedded-runtime plugin, serialized on the shared runtime lock.
struct EmbeddedPlugin {
    name: String,
    runtime: Arc<EmbeddedRuntime>,
    weight: i64,
    env: Vec<(String, String)>,
}

#[async_trait]
impl Plugin for EmbeddedPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn weight(&self) -> i64 {
        self.weight
    }

    async fn run(&self, input: PluginInput) -> Result<Vec<Action>, PluginError> {
        info!(plugin = %self.name, "acquiring runtime lock");
        let _guard = self.runtime.exclusive().await;
        info!(plugin = %self.name, "runtime lock acquired, executing plugin");

        let mut command = Command::new("java");
        command
            .arg("-cp")
            .arg(self.runtime.classpath())
            .arg(RUNTIME_LAUNCHER)
            .arg(&self.name)
            .envs(self.env.iter().cloned());
        let result = run_process(command, &self.name, &input).await;

        info!(plugin = %self.name, "releasing runtime lock");
        result
    }
}

/// Build the `AE_*` environment handed to plugin processes.
pub fn plugin_environment(
    endpoints: &std::collections::HashMap<String, String>,
    sla_endpoint: &str,
) -> Vec<(String, String)> {
    let mut env = Vec::new();
    for (service, var) in [
        ("ceilometer", "AE_METRICS_ENDPOINT"),
        ("nova", "AE_COMPUTE_ENDPOINT"),
        ("heat", "AE_ORCHESTRATION_ENDPOINT"),
    ] {
        if let Some(url) = endpoints.get(service) {
            env.push((var.to_owned(), url.clone()));
        }
    }
    if !sla_endpoint.is_empty() {
        env.push(("AE_SLA_ENDPOINT".to_owned(), sla_endpoint.to_owned()));
    }
    env
}
