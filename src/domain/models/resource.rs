//! Active-resource registry records.
//!
//! One `ResourceEntry` exists per configured (stack, event name) pair
//! and describes what the engine is allowed to do when that event fires.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::models::action::Action;

/// Configuration for instantiating a new VM during horizontal scale-out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScaleOutTemplate {
    #[serde(default)]
    pub name_prefix: Option<String>,
    #[serde(default)]
    pub key_name: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub flavor: Option<String>,
    #[serde(default)]
    pub network_id: Option<String>,
    /// Overrides the entry-level embargo when present.
    #[serde(default)]
    pub extend_embargo: Option<u64>,
}

impl ScaleOutTemplate {
    /// Parse from the raw JSON carried by resource definitions. `None`
    /// and non-object values yield no template.
    pub fn from_json(value: Option<&Value>) -> Option<Self> {
        let value = value?;
        if value.is_null() {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }

    /// The prefix for generated VM resource names.
    pub fn name_prefix(&self) -> &str {
        self.name_prefix.as_deref().unwrap_or("adaptation")
    }
}

/// Where an SLA agreement points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgreementTarget {
    pub stack_id: String,
    pub event_name: String,
}

/// One registry record, keyed externally by its resource id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceEntry {
    pub stack_id: String,
    pub event_name: String,
    #[serde(default)]
    pub agreement_id: Option<String>,
    /// Whitelist of allowed actions for this (stack, event) pair, in
    /// configured order.
    pub actions: Vec<Action>,
    /// Post-enactment cool-down in seconds.
    #[serde(default)]
    pub embargo_secs: u64,
    /// Plugin names excluded from this entry's rounds.
    #[serde(default)]
    pub plugin_blacklist: Vec<String>,
    #[serde(default)]
    pub horizontal_scale_out: Option<ScaleOutTemplate>,
}

impl ResourceEntry {
    /// The effective embargo: a scale-out override wins over the
    /// entry-level value.
    pub fn effective_embargo_secs(&self) -> u64 {
        self.horizontal_scale_out
            .as_ref()
            .and_then(|t| t.extend_embargo)
            .unwrap_or(self.embargo_secs)
    }
}
