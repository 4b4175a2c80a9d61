//! Adaptation action model.
//!
//! An action is a typed request to perform one infrastructure operation
//! on a stack. Plugins re-score and re-order lists of these; the
//! consolidator elects one; the enactor carries it out.

use std::hash::{Hash, Hasher};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::domain::error::ActionError;
use crate::domain::models::event::Event;

/// The supported adaptation kinds, in ordinal order.
///
/// The ordinals are part of the wire contract: resource definitions and
/// plugins may refer to a kind by small integer or by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Migrate,
    VerticalScale,
    HorizontalScale,
    Developer,
    Combined,
    NoAction,
    Start,
    Stop,
    LowPower,
}

const KIND_NAMES: [&str; 9] = [
    "MigrateAction",
    "VerticalScaleAction",
    "HorizontalScaleAction",
    "DeveloperAction",
    "CombinedAction",
    "NoAction",
    "StartAction",
    "StopAction",
    "LowPowerAction",
];

const ALL_KINDS: [ActionKind; 9] = [
    ActionKind::Migrate,
    ActionKind::VerticalScale,
    ActionKind::HorizontalScale,
    ActionKind::Developer,
    ActionKind::Combined,
    ActionKind::NoAction,
    ActionKind::Start,
    ActionKind::Stop,
    ActionKind::LowPower,
];

impl ActionKind {
    /// Canonical capitalised name, used in logs and the dict form.
    pub fn as_str(self) -> &'static str {
        KIND_NAMES[self.ordinal() as usize]
    }

    /// Position of this kind in the ordinal table.
    pub fn ordinal(self) -> u8 {
        ALL_KINDS.iter().position(|k| *k == self).unwrap_or(0) as u8
    }

    /// Look a kind up by ordinal. Out-of-range values are rejected.
    pub fn from_ordinal(ordinal: u8) -> Result<Self, ActionError> {
        ALL_KINDS
            .get(ordinal as usize)
            .copied()
            .ok_or_else(|| ActionError::InvalidKind(ordinal.to_string()))
    }

    /// Look a kind up by case-insensitive name.
    pub fn from_name(name: &str) -> Result<Self, ActionError> {
        let normalised = name.to_lowercase();
        KIND_NAMES
            .iter()
            .position(|n| n.to_lowercase() == normalised)
            .map(|i| ALL_KINDS[i])
            .ok_or_else(|| ActionError::InvalidKind(name.to_string()))
    }

    /// Parse a kind from a JSON value that is either a small integer or
    /// a name string, as resource definitions supply them.
    pub fn from_json(value: &Value) -> Result<Self, ActionError> {
        match value {
            Value::Number(n) => {
                let ordinal = n
                    .as_u64()
                    .and_then(|v| u8::try_from(v).ok())
                    .ok_or_else(|| ActionError::InvalidKind(n.to_string()))?;
                Self::from_ordinal(ordinal)
            }
            Value::String(s) => Self::from_name(s),
            other => Err(ActionError::InvalidKind(other.to_string())),
        }
    }
}

impl Serialize for ActionKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ActionKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Self::from_name(&name).map_err(serde::de::Error::custom)
    }
}

/// A candidate adaptation action.
///
/// Identity (equality and hash) covers kind, target, destination,
/// scale_value, votes, candidate, and target_app. `score` and the
/// combined `actions` list are deliberately excluded, so a re-scored
/// action is still identified with its prior votes tally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: ActionKind,
    /// The VM the action applies to. May be empty until a plugin or the
    /// passthrough path fills it in.
    #[serde(default)]
    pub target: String,
    /// Destination host, for migrations.
    #[serde(default)]
    pub destination: String,
    /// Flavor name, for vertical scaling.
    #[serde(default)]
    pub scale_value: String,
    /// Plugin-assigned preference. -1 is the veto sentinel.
    #[serde(default)]
    pub score: i64,
    /// Filled in by the consolidator with the seat-0 tally.
    #[serde(default)]
    pub votes: i64,
    /// The plugin that contributed this action to the winning position.
    #[serde(default)]
    pub candidate: String,
    /// External stack id, for LowPower redirection.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target_app: String,
    /// Sub-actions, for the Combined kind.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<Action>,
}

impl Action {
    /// A fresh action of the given kind with all other fields empty.
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            target: String::new(),
            destination: String::new(),
            scale_value: String::new(),
            score: 0,
            votes: 0,
            candidate: String::new(),
            target_app: String::new(),
            actions: Vec::new(),
        }
    }

    /// Build an action from a JSON kind (ordinal or name).
    pub fn from_kind_json(value: &Value) -> Result<Self, ActionError> {
        Ok(Self::new(ActionKind::from_json(value)?))
    }

    /// The JSON dict form used by the journal and the heat query reply.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Parse the dict form back into an action.
    pub fn from_value(value: &Value) -> Result<Self, ActionError> {
        serde_json::from_value(value.clone())
            .map_err(|e| ActionError::InvalidKind(e.to_string()))
    }

    /// A stable identity token for the voting tally.
    pub fn identity(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }

    /// Build the outbound adaptation-request message for this action.
    ///
    /// Used by Developer enactment as-is, and by LowPower enactment with
    /// the event name rewritten and the stack redirected to the action's
    /// `target_app`.
    pub fn adaptation_request(
        &self,
        event: &Event,
        name: Option<&str>,
        stack_id: Option<&str>,
    ) -> String {
        let mut id = json!({
            "user_id": event.user_id,
            "tenant": event.tenant_id,
            "stack_id": stack_id.unwrap_or(&event.stack_id),
            "source": event.source,
            "instance": Uuid::new_v4().simple().to_string(),
            "context": "adaptation request",
            "machines": event.machines,
        });
        if let Some(severity) = &event.severity {
            id["severity"] = severity.clone();
        }
        if let Some(data_center) = &event.data_center {
            id["data_center"] = Value::String(data_center.clone());
        }

        let request = json!({
            "id": id,
            "timestamp": Utc::now().timestamp_millis() as f64 / 1000.0,
            "event": {
                "name": name.unwrap_or(&event.name),
                "value": event.value,
            },
            "data": event.data,
        });

        request.to_string()
    }
}

impl PartialEq for Action {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.target == other.target
            && self.destination == other.destination
            && self.scale_value == other.scale_value
            && self.votes == other.votes
            && self.candidate == other.candidate
            && self.target_app == other.target_app
    }
}

impl Eq for Action {}

impl Hash for Action {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.target.hash(state);
        self.destination.hash(state);
        self.scale_value.hash(state);
        self.votes.hash(state);
        self.candidate.hash(state);
        self.target_app.hash(state);
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Action(kind={}, target={}, destination={}, scale_value={}, score={}, votes={}, candidate={})",
            self.kind.as_str(),
            self.target,
            self.destination,
            self.scale_value,
            self.score,
            self.votes,
            self.candidate
        )
    }
}
