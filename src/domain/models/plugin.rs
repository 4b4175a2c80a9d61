//! Plugin invocation data.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::domain::models::action::Action;
use crate::domain::models::event::Event;
use crate::domain::models::resource::AgreementTarget;

/// Everything a plugin gets to see for one invocation.
#[derive(Debug, Clone, Serialize)]
pub struct PluginInput {
    pub event: Event,
    /// The carry: the consolidated output of the previous round, or the
    /// whitelist on round zero.
    pub actions: Vec<Action>,
    pub agreement_map: HashMap<String, AgreementTarget>,
}

/// One plugin's contribution to a round.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginRoundResult {
    pub results: Vec<Action>,
    pub weight: i64,
}

/// Results of one round, keyed by plugin name.
///
/// A BTreeMap so every consumer iterates plugins in a deterministic
/// order regardless of worker completion order.
pub type RoundResults = BTreeMap<String, PluginRoundResult>;
