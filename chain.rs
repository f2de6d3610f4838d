//! Chain store and propagation model (§4.2).
//!
//! Each fork is a single linear, append-only block sequence rooted at a
//! shared genesis — this simulator does not model intra-fork forking, only
//! the contest between the two named rule-sets. A node's tip is therefore
//! fully described by `(fork, height)`; switching which fork a node views
//! is the only kind of reorg this model needs, and its depth is always the
//! node's entire block count on the fork it is leaving, since the two
//! histories share no ancestor past genesis.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};
use crate::types::{Fork, ForkPreference, NodeId, PoolId, ReorgCause, SimTime};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Block {
    pub height: u64,
    pub fork: Fork,
    pub producer: PoolId,
    pub timestamp: SimTime,
    pub difficulty: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReorgEvent {
    pub timestamp: SimTime,
    pub fork: Fork,
    pub depth: u64,
    pub cause: ReorgCause,
    pub affected_nodes: Vec<NodeId>,
    pub affected_pool: Option<PoolId>,
    pub orphaned_block_ids: Vec<(Fork, u64)>,
}

#[derive(Clone, Debug)]
pub struct Node {
    pub id: NodeId,
    pub home_partition: Fork,
    pub accepts_foreign_blocks: bool,
    pub fork_preference: ForkPreference,
    pub peers: Vec<NodeId>,
    pub tip_fork: Fork,
    pub tip_height: u64,
    /// Blocks this node has stored but no longer considers its tip's
    /// ancestry, accumulated across reorgs.
    pub orphans: Vec<(Fork, u64)>,
}

/// Per-fork linear block history plus the set of nodes pinned to some tip.
pub struct ChainStore {
    blocks: HashMap<Fork, Vec<Block>>,
    nodes: HashMap<NodeId, Node>,
    reorg_log: Vec<ReorgEvent>,
}

impl ChainStore {
    pub fn new() -> Self {
        let mut blocks = HashMap::new();
        for fork in Fork::ALL {
            blocks.insert(fork, Vec::new());
        }
        Self { blocks, nodes: HashMap::new(), reorg_log: Vec::new() }
    }

    pub fn add_node(&mut self, node: Node) {
        self.nodes.insert(node.id.clone(), node);
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        // Stable, seed-independent order: §5 requires agents within a
        // phase to be visited in a fixed order keyed on id.
        let mut ids: Vec<&String> = self.nodes.keys().collect();
        ids.sort();
        ids.into_iter().map(move |id| &self.nodes[id])
    }

    pub fn nodes_on(&self, fork: Fork) -> impl Iterator<Item = &Node> {
        self.nodes().filter(move |n| n.tip_fork == fork)
    }

    pub fn blocks(&self, fork: Fork) -> &[Block] {
        &self.blocks[&fork]
    }

    pub fn height(&self, fork: Fork) -> u64 {
        self.blocks[&fork].len() as u64
    }

    pub fn difficulty_sum(&self, fork: Fork, up_to_height: u64) -> f64 {
        self.blocks[&fork]
            .iter()
            .take(up_to_height as usize)
            .map(|b| b.difficulty)
            .sum()
    }

    /// Cumulative work of a fork's current tip.
    pub fn cumulative_work(&self, fork: Fork) -> f64 {
        self.difficulty_sum(fork, self.height(fork))
    }

    pub fn reorg_log(&self) -> &[ReorgEvent] {
        &self.reorg_log
    }

    /// Unique `(fork, height)` blocks that appear in at least one node's
    /// orphan set, the fork-level rollup used for the terminal orphan rate.
    pub fn orphan_count(&self, fork: Fork) -> u64 {
        let set: HashSet<(Fork, u64)> = self
            .nodes
            .values()
            .flat_map(|n| n.orphans.iter().copied())
            .filter(|(f, _)| *f == fork)
            .collect();
        set.len() as u64
    }

    pub fn mined_count(&self, fork: Fork) -> u64 {
        self.height(fork)
    }

    /// Append a newly mined block to `fork`'s history. Returns the block.
    pub fn append_block(
        &mut self,
        fork: Fork,
        producer: PoolId,
        difficulty: f64,
        timestamp: SimTime,
    ) -> SimResult<Block> {
        if difficulty <= 0.0 {
            return Err(SimError::InvariantViolation {
                fork,
                detail: format!("attempted to append block with non-positive difficulty {difficulty}"),
            });
        }
        let height = self.height(fork);
        let block = Block { height, fork, producer, timestamp, difficulty };
        self.blocks.get_mut(&fork).unwrap().push(block.clone());
        Ok(block)
    }

    /// Deliver `block` to the nodes that should see it: every node whose
    /// home partition matches the block's fork advances its tip directly
    /// (no reorg — it's a pure extension of its own canonical chain).
    /// Nodes on the other partition with `accepts_foreign_blocks=true`
    /// additionally store the block and reorg onto it if it becomes
    /// strictly heavier than their current tip. Acceptance is asymmetric:
    /// only the stricter fork's blocks flow to the permissive side.
    pub fn propagate(&mut self, block: &Block) -> SimResult<Vec<ReorgEvent>> {
        let mut events = Vec::new();
        let mut ids: Vec<String> = self.nodes.keys().cloned().collect();
        ids.sort();

        for id in ids {
            let (home, accepts, tip_fork, tip_height) = {
                let n = &self.nodes[&id];
                (n.home_partition, n.accepts_foreign_blocks, n.tip_fork, n.tip_height)
            };

            if home == block.fork && tip_fork == block.fork {
                // Own canonical chain just grew by one block.
                self.nodes.get_mut(&id).unwrap().tip_height = block.height;
                continue;
            }

            let permissive_accepts_strict =
                accepts && home == Fork::V26 && block.fork == Fork::V27;
            if !permissive_accepts_strict {
                continue;
            }

            let candidate_work = self.difficulty_sum(block.fork, block.height + 1);
            let current_work = self.difficulty_sum(tip_fork, tip_height + 1);
            if candidate_work > current_work {
                if let Some(ev) = self.reorg(
                    &id,
                    block.fork,
                    block.height,
                    ReorgCause::ForeignAcceptance,
                    None,
                )? {
                    events.push(ev);
                }
            } else {
                // Retained locally but not yet adopted.
            }
        }
        Ok(events)
    }

    /// Switch `node_id`'s tip to `(new_fork, new_height)`. Depth is the
    /// node's full block count on the fork it is leaving when the switch
    /// crosses forks (the two histories share no ancestor past genesis);
    /// zero when the "switch" is actually just advancing within the same
    /// fork (defensive — normal propagation never routes through here for
    /// that case).
    pub fn reorg(
        &mut self,
        node_id: &str,
        new_fork: Fork,
        new_height: u64,
        cause: ReorgCause,
        affected_pool: Option<PoolId>,
    ) -> SimResult<Option<ReorgEvent>> {
        let node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| SimError::InvariantViolation {
                fork: new_fork,
                detail: format!("reorg referenced unknown node {node_id}"),
            })?;

        if node.tip_fork == new_fork && new_height <= node.tip_height {
            return Ok(None);
        }

        let depth = if node.tip_fork == new_fork {
            new_height.saturating_sub(node.tip_height)
        } else {
            node.tip_height + 1
        };

        let mut orphaned = Vec::new();
        if node.tip_fork != new_fork {
            for h in 0..=node.tip_height {
                orphaned.push((node.tip_fork, h));
            }
            node.orphans.extend(orphaned.iter().copied());
        }

        node.tip_fork = new_fork;
        node.tip_height = new_height;

        let event = ReorgEvent {
            timestamp: 0.0, // stamped by the caller, which knows the current tick time
            fork: new_fork,
            depth,
            cause,
            affected_nodes: vec![node_id.to_string()],
            affected_pool,
            orphaned_block_ids: orphaned,
        };
        self.reorg_log.push(event.clone());
        Ok(Some(event))
    }

    /// Stamp the timestamp on the most recently logged reorg (propagate/
    /// reorg above don't know the current tick time; the scheduler does).
    pub fn stamp_last_reorg(&mut self, timestamp: SimTime) {
        if let Some(last) = self.reorg_log.last_mut() {
            last.timestamp = timestamp;
        }
    }

    /// Stamp the timestamp on the last `n` logged reorgs, for calls like
    /// `propagate` that can log more than one event per invocation.
    pub fn stamp_last_n_reorgs(&mut self, n: usize, timestamp: SimTime) {
        let len = self.reorg_log.len();
        for ev in &mut self.reorg_log[len.saturating_sub(n)..] {
            ev.timestamp = timestamp;
        }
    }

    /// Establish bidirectional visibility between the two partitions and
    /// reorg every node on the lower-cumulative-work fork to the heavier
    /// tip. Used at scenario-end or UASF-expiry reunion; see `reunion.rs`
    /// for the timeout and convergence bookkeeping around this call.
    pub fn cross_link(&mut self, timestamp: SimTime) -> SimResult<Vec<ReorgEvent>> {
        let work_v27 = self.cumulative_work(Fork::V27);
        let work_v26 = self.cumulative_work(Fork::V26);
        let (winner, loser) = if work_v27 >= work_v26 {
            (Fork::V27, Fork::V26)
        } else {
            (Fork::V26, Fork::V27)
        };
        let winner_height = self.height(winner).saturating_sub(1);

        let mut events = Vec::new();
        let loser_ids: Vec<String> = self
            .nodes
            .values()
            .filter(|n| n.tip_fork == loser)
            .map(|n| n.id.clone())
            .collect();

        for id in loser_ids {
            if let Some(mut ev) =
                self.reorg(&id, winner, winner_height, ReorgCause::Reunion, None)?
            {
                ev.timestamp = timestamp;
                if let Some(last) = self.reorg_log.last_mut() {
                    last.timestamp = timestamp;
                }
                events.push(ev);
            }
        }
        Ok(events)
    }
}

impl Default for ChainStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, home: Fork, accepts_foreign: bool) -> Node {
        Node {
            id: id.to_string(),
            home_partition: home,
            accepts_foreign_blocks: accepts_foreign,
            fork_preference: ForkPreference::Neutral,
            peers: vec![],
            tip_fork: home,
            tip_height: 0,
            orphans: vec![],
        }
    }

    #[test]
    fn propagation_extends_home_partition_without_reorg() {
        let mut store = ChainStore::new();
        store.add_node(node("n1", Fork::V27, false));
        let b = store.append_block(Fork::V27, "poolA".into(), 1.0, 10.0).unwrap();
        store.propagate(&b).unwrap();
        assert_eq!(store.node("n1").unwrap().tip_height, 0);
        assert!(store.reorg_log().is_empty());
    }

    #[test]
    fn foreign_acceptance_only_flows_strict_to_permissive() {
        let mut store = ChainStore::new();
        store.add_node(node("permissive", Fork::V26, true));
        store.add_node(node("strict", Fork::V27, true));

        // v27 (strict) mines a block; permissive v26 node should adopt it
        // once it is heavier than the node's own (empty) v26 tip.
        let b27 = store.append_block(Fork::V27, "poolA".into(), 5.0, 1.0).unwrap();
        let events = store.propagate(&b27).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(store.node("permissive").unwrap().tip_fork, Fork::V27);

        // v26 mining a block must never flow to the strict v27 node.
        let b26 = store.append_block(Fork::V26, "poolB".into(), 5.0, 2.0).unwrap();
        let events = store.propagate(&b26).unwrap();
        assert!(events.is_empty());
        assert_eq!(store.node("strict").unwrap().tip_fork, Fork::V27);
    }

    #[test]
    fn cross_link_reorgs_every_loser_node_to_the_heavier_tip() {
        let mut store = ChainStore::new();
        store.add_node(node("loser1", Fork::V26, false));
        store.add_node(node("loser2", Fork::V26, false));
        store.add_node(node("winner", Fork::V27, false));

        for _ in 0..5 {
            let b = store.append_block(Fork::V27, "poolA".into(), 1.0, 0.0).unwrap();
            store.propagate(&b).unwrap();
        }
        for _ in 0..2 {
            let b = store.append_block(Fork::V26, "poolB".into(), 1.0, 0.0).unwrap();
            store.propagate(&b).unwrap();
        }

        let events = store.cross_link(100.0).unwrap();
        assert_eq!(events.len(), 2);
        for ev in &events {
            assert_eq!(ev.fork, Fork::V27);
            assert_eq!(ev.depth, 2);
        }
        assert_eq!(store.node("loser1").unwrap().tip_fork, Fork::V27);
        assert_eq!(store.node("loser2").unwrap().tip_fork, Fork::V27);

        // Idempotence: calling cross_link again must not produce new events.
        let events2 = store.cross_link(200.0).unwrap();
        assert!(events2.is_empty());
    }
}
