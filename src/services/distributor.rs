//! Per-event plugin round execution.
//!
//! A distributor owns the processing of exactly one event: it runs the
//! configured plugin rounds in order, joins each round's workers under
//! the plugin timeout, consolidates results, and threads the carry from
//! round to round.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::domain::models::action::Action;
use crate::domain::models::event::Event;
use crate::domain::models::journal::JournalType;
use crate::domain::models::plugin::{PluginInput, PluginRoundResult, RoundResults};
use crate::domain::models::resource::{AgreementTarget, ResourceEntry};
use crate::domain::ports::Journal;
use crate::services::consolidator;
use crate::services::plugin_manager::PluginManager;

/// What one distributor run produced.
#[derive(Debug, Clone, Default)]
pub struct DistributorOutcome {
    /// Final consolidated results; the chosen action is the head.
    pub results: Vec<Action>,
    /// The consolidated list of every non-empty round, in order.
    pub round_log: Vec<Vec<Action>>,
}

/// Runs the plugin rounds for one event.
pub struct Distributor {
    event: Event,
    initial_actions: Vec<Action>,
    agreement_map: HashMap<String, AgreementTarget>,
    plugin_manager: Arc<PluginManager>,
    journal: Arc<dyn Journal>,
    rounds: Vec<Vec<String>>,
    plugin_timeout: Duration,
}

impl Distributor {
    /// Plan the rounds for an event: copy the configured grouping, drop
    /// plugins blacklisted by the resource entry, and remove rounds that
    /// end up empty.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        event: Event,
        initial_actions: Vec<Action>,
        resource: Option<&ResourceEntry>,
        agreement_map: HashMap<String, AgreementTarget>,
        plugin_manager: Arc<PluginManager>,
        journal: Arc<dyn Journal>,
        grouping: &[Vec<String>],
        plugin_timeout: Duration,
    ) -> Self {
        let blacklist = resource.map(|r| r.plugin_blacklist.as_slice()).unwrap_or(&[]);
        let rounds: Vec<Vec<String>> = grouping
            .iter()
            .map(|round| {
                round
                    .iter()
                    .filter(|name| !blacklist.contains(name))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .filter(|round: &Vec<String>| !round.is_empty())
            .collect();

        Self {
            event,
            initial_actions,
            agreement_map,
            plugin_manager,
            journal,
            rounds,
            plugin_timeout,
        }
    }

    /// Execute all rounds and return the final results.
    ///
    /// Never panics outward: a failure inside the loop yields an empty
    /// result list so the caller can apply its fail-safe.
    pub async fn run(self) -> DistributorOutcome {
        let stack_id = self.event.stack_id.clone();
        let mut carry = self.initial_actions.clone();
        let mut blacklist: Vec<Action> = Vec::new();
        let mut round_log: Vec<Vec<Action>> = Vec::new();

        info!(
            stack_id = %stack_id,
            event = %self.event.name,
            rounds = self.rounds.len(),
            "distributor start"
        );

        let last_round = self.rounds.len().saturating_sub(1);
        for (round_num, round) in self.rounds.iter().enumerate() {
            info!(round_num, plugins = ?round, "starting plugin round");

            let results: Arc<Mutex<RoundResults>> = Arc::new(Mutex::new(RoundResults::new()));
            let mut workers = Vec::new();

            for plugin in self.plugin_manager.instances(round) {
                let name = plugin.name().to_owned();
                let weight = plugin.weight();
                let input = PluginInput {
                    event: self.event.clone(),
                    actions: carry.clone(),
                    agreement_map: self.agreement_map.clone(),
                };
                let results = results.clone();
                let worker_name = name.clone();
                let handle = tokio::spawn(async move {
                    match plugin.run(input).await {
                        Ok(actions) => {
                            results.lock().await.insert(
                                worker_name,
                                PluginRoundResult {
                                    results: actions,
                                    weight,
                                },
                            );
                        }
                        Err(e) => {
                            warn!(plugin = %worker_name, error = %e, "plugin failed, slot stays empty");
                        }
                    }
                });
                workers.push((name, handle));
            }

            // Join each worker under the timeout. Plugins that overrun
            // are abandoned, not killed; the barrier below means their
            // late results are never observed.
            for (name, handle) in workers {
                match tokio::time::timeout(self.plugin_timeout, handle).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!(plugin = %name, error = %e, "plugin worker aborted"),
                    Err(_) => warn!(plugin = %name, "plugin exceeded timeout, abandoning"),
                }
            }

            let round_results: RoundResults = std::mem::take(&mut *results.lock().await);

            for (name, result) in &round_results {
                self.journal
                    .append(
                        JournalType::PluginResult,
                        &stack_id,
                        json!({
                            "name": name,
                            "weight": result.weight,
                            "input": actions_to_values(&carry),
                            "output": actions_to_values(&result.results),
                        }),
                    )
                    .await;
            }

            if round_results.is_empty() {
                info!(round_num, "no plugin produced results, passing previous round along");
                continue;
            }

            let (mut new_carry, new_blacklist) =
                consolidator::consolidate(&self.initial_actions, &round_results, blacklist);
            blacklist = new_blacklist;

            self.journal
                .append(
                    JournalType::Consolidation,
                    &stack_id,
                    json!({ "output": actions_to_values(&new_carry) }),
                )
                .await;

            if round_num != last_round {
                // Keep the scores only on the last round.
                for action in &mut new_carry {
                    action.score = 0;
                }
            }

            round_log.push(new_carry.clone());
            carry = new_carry;
        }

        info!(stack_id = %stack_id, results = carry.len(), "distributor complete");
        DistributorOutcome {
            results: carry,
            round_log,
        }
    }
}

fn actions_to_values(actions: &[Action]) -> Vec<serde_json::Value> {
    actions.iter().map(Action::to_value).collect()
}
