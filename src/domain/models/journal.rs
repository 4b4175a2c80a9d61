//! Journal entry types.

use serde::{Deserialize, Serialize};

/// Every lifecycle transition the journal records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalType {
    EventReceived,
    AdaptationResponseCreated,
    AdaptationResponseDeleted,
    PluginResult,
    Consolidation,
    AdaptationStarted,
    AdaptationCompleted,
    AdaptationFailed,
    StackCreated,
}

impl JournalType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EventReceived => "event_received",
            Self::AdaptationResponseCreated => "adaptation_response_created",
            Self::AdaptationResponseDeleted => "adaptation_response_deleted",
            Self::PluginResult => "plugin_result",
            Self::Consolidation => "consolidation",
            Self::AdaptationStarted => "adaptation_started",
            Self::AdaptationCompleted => "adaptation_completed",
            Self::AdaptationFailed => "adaptation_failed",
            Self::StackCreated => "stack_created",
        }
    }
}

impl std::fmt::Display for JournalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
