//! Domain models.

pub mod action;
pub mod config;
pub mod event;
pub mod journal;
pub mod plugin;
pub mod resource;

pub use action::{Action, ActionKind};
pub use event::Event;
pub use journal::JournalType;
pub use plugin::{PluginInput, PluginRoundResult, RoundResults};
pub use resource::{AgreementTarget, ResourceEntry, ScaleOutTemplate};
