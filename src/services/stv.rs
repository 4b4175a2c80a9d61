//! Single-transferable-vote tally.
//!
//! Collapses one round of per-plugin action rankings into a single
//! ordered list. Plugins are voters whose ballot is their submitted
//! ordering; actions are candidates identified by their identity hash.
//! Seats are filled against a Droop quota with surplus and exclusion
//! transfers.
//!
//! Determinism: every map is ordered and every sort uses insertion
//! order as the explicit secondary key, so equal-vote ties always break
//! the same way.

use std::collections::BTreeMap;

use tracing::debug;

use crate::domain::models::action::Action;
use crate::domain::models::plugin::RoundResults;

/// A plugin within one invocation, and who it voted for.
struct Voter {
    prefs: Vec<u64>,
}

/// An action wrapped with tally bookkeeping.
struct Candidate {
    action: Action,
    id: u64,
    /// Votes per seat. Grown on demand, pre-extended to the seat count
    /// before tallying.
    votes: Vec<i64>,
    /// The first plugin to put this action on a ballot.
    first_supporter: String,
    insertion: usize,
}

impl Candidate {
    fn add(&mut self, amount: i64, seat: usize) {
        if self.votes.len() <= seat {
            self.votes.resize(seat + 1, 0);
        }
        self.votes[seat] += amount;
    }

    fn votes_at(&self, seat: usize) -> i64 {
        self.votes.get(seat).copied().unwrap_or(0)
    }
}

/// Tally one round of plugin results into a single ordered action list.
///
/// Every action present in the (already whitelist- and veto-filtered)
/// inputs appears exactly once in the output. The seat-0 tally is
/// written into each returned action's `votes` field.
pub fn tally(round_results: &RoundResults) -> Vec<Action> {
    let mut candidates: Vec<Candidate> = Vec::new();
    let mut voters: Vec<Voter> = Vec::new();
    let mut total_votes: i64 = 0;

    let total_weight: i64 = round_results.values().map(|r| r.weight).sum();
    // A round of all-zero weights would zero every ballot; treat each
    // plugin as equally weighted instead.
    let total_weight = if total_weight > 0 {
        total_weight
    } else {
        round_results.len().max(1) as i64
    };

    for (plugin_name, plugin_results) in round_results {
        let mut voter = Voter { prefs: Vec::new() };

        // Deduplicate the plugin's list, preserving first occurrence.
        let mut seen: Vec<u64> = Vec::new();
        let deduped: Vec<&Action> = plugin_results
            .results
            .iter()
            .filter(|action| {
                let id = action.identity();
                if seen.contains(&id) {
                    false
                } else {
                    seen.push(id);
                    true
                }
            })
            .collect();

        let weight_share = plugin_results.weight.max(0) as f64 / total_weight as f64;

        for (preference, action) in deduped.into_iter().enumerate() {
            let votes = ((action.score * 1000) as f64 * weight_share) as i64;
            let id = action.identity();

            let index = match candidates.iter().position(|c| c.id == id) {
                Some(index) => index,
                None => {
                    candidates.push(Candidate {
                        action: action.clone(),
                        id,
                        votes: vec![0],
                        first_supporter: plugin_name.clone(),
                        insertion: candidates.len(),
                    });
                    candidates.len() - 1
                }
            };

            candidates[index].add(votes, preference);
            voter.prefs.push(id);
            total_votes += votes;
        }

        voters.push(voter);
    }

    let seats = candidates.len();
    for candidate in &mut candidates {
        if candidate.votes.len() < seats {
            candidate.votes.resize(seats, 0);
        }
    }

    // Droop quota.
    let quota = total_votes / (seats as i64 + 1) + 1;
    debug!(quota, seats, total_votes, "voting quota computed");

    let mut hopefuls = candidates;
    let mut winners: Vec<Candidate> = Vec::new();
    let mut excluded: Vec<Candidate> = Vec::new();

    for seat in 0..seats {
        let mut winner_found = false;
        while !winner_found && hopefuls.len() > 1 {
            hopefuls.sort_by(|a, b| {
                b.votes_at(seat)
                    .cmp(&a.votes_at(seat))
                    .then(a.insertion.cmp(&b.insertion))
            });

            if let Some(pos) = hopefuls.iter().position(|c| c.votes_at(seat) >= quota) {
                let elected = hopefuls.remove(pos);
                transfer(true, &elected, &mut hopefuls, &voters, seat, quota);
                debug!(candidate = %elected.action, seat, "candidate won the seat");
                winners.push(elected);
                winner_found = true;
            } else {
                // Nobody reaches the quota: exclude the lowest-ranked
                // candidate and transfer all of its votes at this seat.
                let lowest = hopefuls.pop().expect("hopefuls is non-empty");
                transfer(false, &lowest, &mut hopefuls, &voters, seat, 0);
                debug!(candidate = %lowest.action, seat, "candidate excluded");
                excluded.push(lowest);
            }
        }
    }

    // Winners in election order, hopefuls in last-tally order, then the
    // excluded in reverse exclusion order.
    excluded.reverse();

    winners
        .into_iter()
        .chain(hopefuls)
        .chain(excluded)
        .map(|candidate| {
            let seat0 = candidate.votes_at(0);
            let mut action = candidate.action;
            action.votes = seat0;
            if action.candidate.is_empty() {
                action.candidate = candidate.first_supporter;
            }
            action
        })
        .collect()
}

/// Transfer votes away from an elected or excluded candidate.
///
/// An elected candidate passes on only its surplus, into the next seat;
/// an excluded one passes on everything it ever had, at the current
/// seat. Votes go to the recipients' next valid preferences in ratio,
/// or are split evenly when no voter names a remaining hopeful.
fn transfer(
    elected: bool,
    transferer: &Candidate,
    hopefuls: &mut [Candidate],
    voters: &[Voter],
    seat: usize,
    quota: i64,
) {
    if hopefuls.is_empty() {
        return;
    }

    let transferrable = if elected {
        transferer.votes_at(seat) - quota
    } else {
        transferer.votes.iter().sum()
    };
    let target_seat = if elected { seat + 1 } else { seat };

    // Next valid preference of every voter who ranked the transferer.
    let mut recipients: BTreeMap<u64, i64> = BTreeMap::new();
    for voter in voters {
        let Some(rank) = voter.prefs.iter().position(|id| *id == transferer.id) else {
            continue;
        };
        for next in &voter.prefs[rank + 1..] {
            if hopefuls.iter().any(|h| h.id == *next) {
                *recipients.entry(*next).or_insert(0) += 1;
                break;
            }
        }
    }

    if recipients.is_empty() {
        let share = transferrable / hopefuls.len() as i64;
        for candidate in hopefuls.iter_mut() {
            candidate.add(share, target_seat);
        }
    } else {
        let total_preferences: i64 = recipients.values().sum();
        for candidate in hopefuls.iter_mut() {
            if let Some(count) = recipients.get(&candidate.id) {
                let ratio = *count as f64 / total_preferences as f64;
                let amount = (transferrable as f64 * ratio) as i64;
                candidate.add(amount, target_seat);
            }
        }
    }
}
