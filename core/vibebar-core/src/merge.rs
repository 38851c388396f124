//! Cross-detector dedup.
//!
//! Several channels can observe the same OS process at once. Per
//! `(tool, pid)` group exactly one snapshot survives, chosen by a fixed
//! priority over id prefixes (the prefix encodes the producing channel's
//! trust tier), with ties broken by field completeness.

use std::collections::HashMap;

use vibebar_protocol::{Snapshot, Tool};

/// Highest-fidelity channels first. Ids with no recognized prefix rank last.
const ID_PRIORITY: &[&str] = &[
    "opencode-http-",
    "claude-log-",
    "codex-rpc-",
    "plugin-",
    "wrap-",
    "ps-",
];

fn priority_rank(id: &str) -> usize {
    ID_PRIORITY
        .iter()
        .position(|prefix| id.starts_with(prefix))
        .unwrap_or(ID_PRIORITY.len())
}

/// More known fields means a more useful snapshot at equal trust.
fn completeness(snapshot: &Snapshot) -> u32 {
    snapshot.cwd.is_some() as u32 + snapshot.last_output_at.is_some() as u32
}

/// True when `challenger` should replace `incumbent` within a group.
fn outranks(challenger: &Snapshot, incumbent: &Snapshot) -> bool {
    let challenger_rank = priority_rank(&challenger.id);
    let incumbent_rank = priority_rank(&incumbent.id);
    if challenger_rank != incumbent_rank {
        return challenger_rank < incumbent_rank;
    }
    completeness(challenger) > completeness(incumbent)
}

#[derive(Clone, PartialEq, Eq, Hash)]
enum GroupKey {
    Process(Tool, u32),
    /// Snapshots without a real pid cannot be correlated across channels;
    /// they pass through keyed by id.
    Orphan(String),
}

fn group_key(snapshot: &Snapshot) -> GroupKey {
    if snapshot.pid == 0 {
        GroupKey::Orphan(snapshot.id.clone())
    } else {
        GroupKey::Process(snapshot.tool, snapshot.pid)
    }
}

/// Unions the produced snapshots and keeps exactly one per `(tool, pid)`
/// group. First-seen order is preserved for losers' groups, which keeps the
/// result deterministic for equal-priority duplicates.
pub fn merge_snapshots(snapshots: Vec<Snapshot>) -> Vec<Snapshot> {
    let mut winners: HashMap<GroupKey, Snapshot> = HashMap::new();
    let mut order: Vec<GroupKey> = Vec::new();

    for snapshot in snapshots {
        let key = group_key(&snapshot);
        match winners.get(&key) {
            None => {
                order.push(key.clone());
                winners.insert(key, snapshot);
            }
            Some(incumbent) => {
                if outranks(&snapshot, incumbent) {
                    winners.insert(key, snapshot);
                }
            }
        }
    }

    order
        .into_iter()
        .filter_map(|key| winners.remove(&key))
        .collect()
}
