//! Round consolidation.
//!
//! Combines the per-plugin action lists of one round into a single
//! ordered list via the STV tally, enforcing the event's whitelist and
//! collecting plugin vetoes into the action blacklist.

use tracing::{debug, info};

use crate::domain::models::action::{Action, ActionKind};
use crate::domain::models::plugin::RoundResults;
use crate::services::stv;

/// Score value a plugin uses to veto an action.
pub const VETO_SCORE: i64 = -1;

/// Consolidate one round of results.
///
/// `whitelist` is the event's allowed action list (round-zero input);
/// only its kinds survive, with LowPower always permitted. Any action
/// scored -1 by any plugin joins the blacklist and is removed from
/// every plugin's list before the tally.
///
/// Returns the ordered action list and the updated blacklist.
pub fn consolidate(
    whitelist: &[Action],
    round_results: &RoundResults,
    mut blacklist: Vec<Action>,
) -> (Vec<Action>, Vec<Action>) {
    let mut whitelisted_kinds: Vec<ActionKind> = whitelist.iter().map(|a| a.kind).collect();
    whitelisted_kinds.push(ActionKind::LowPower);

    let mut filtered: RoundResults = round_results.clone();
    for plugin_results in filtered.values_mut() {
        plugin_results
            .results
            .retain(|action| whitelisted_kinds.contains(&action.kind));
    }

    // Collect vetoes, then strike them from every ballot. Identity
    // ignores score, so a veto removes the action at any score.
    for plugin_results in filtered.values() {
        for action in &plugin_results.results {
            if action.score == VETO_SCORE && !blacklist.contains(action) {
                info!(action = %action, "adding vetoed action to blacklist");
                blacklist.push(action.clone());
            }
        }
    }
    for plugin_results in filtered.values_mut() {
        plugin_results
            .results
            .retain(|action| !blacklist.contains(action));
    }

    debug!(?filtered, "valid round results");

    let output = stv::tally(&filtered);
    (output, blacklist)
}
