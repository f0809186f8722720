//! Adjacency-list walks: single-hop relationship iteration and variable-hop
//! breadth-first search.
//!
//! The variable-hop walk mirrors the original `query_ctx` BFS's queue shape -
//! `(relationship_id, hop_count)` pairs seeded from the start node's adjacency
//! head, re-enqueuing the next sibling at the same hop and the destination's
//! own adjacency head at `hop + 1` - but, per the visited-set invariant, never
//! re-emits or re-enqueues a relationship it has already seen, so a diamond
//! adjacency pattern (two distinct relationships converging on the same node
//! at the same depth) cannot duplicate its downstream chain. A label filter
//! only gates emission, never the walk itself, so labelled and unlabelled
//! variable-hop queries share one implementation.

use std::collections::VecDeque;

use rustc_hash::FxHashSet;

use crate::error::Result;
use crate::graph::store::GraphStore;
use crate::types::{DictCode, NodeId, RshipId, UNKNOWN_RECORD};
use crate::txn::TxId;

/// Which adjacency chain(s) to follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Follow `from_rship_head` / `next_src_rship`, landing on `dest_node_id`.
    Outgoing,
    /// Follow `to_rship_head` / `next_dest_rship`, landing on `src_node_id`.
    Incoming,
    /// Follow both chains. Only meaningful for [`foreach_rship`]; directional
    /// walks (`other_node`, `variable_hop`) need a single side to know which
    /// endpoint is "the other one".
    Both,
}

/// Invokes `consumer` with every visible relationship directly attached to
/// `node`, in the given direction(s). `Direction::Both` walks the outgoing
/// chain then the incoming chain, deduplicated against a single visited set
/// so a relationship that is somehow reachable from both never double-fires
/// (it can't be, today, but the guard costs nothing and keeps the invariant
/// honest if that ever changes).
pub fn foreach_rship(
    store: &GraphStore,
    txid: TxId,
    node: NodeId,
    direction: Direction,
    mut consumer: impl FnMut(RshipId) -> Result<()>,
) -> Result<()> {
    let Some(n) = store.get_node(txid, node)? else {
        return Ok(());
    };
    let legs: &[Direction] = match direction {
        Direction::Outgoing => &[Direction::Outgoing],
        Direction::Incoming => &[Direction::Incoming],
        Direction::Both => &[Direction::Outgoing, Direction::Incoming],
    };
    let mut seen: FxHashSet<RshipId> = FxHashSet::default();
    for leg in legs {
        let mut cur = match leg {
            Direction::Outgoing => n.from_rship_head,
            Direction::Incoming => n.to_rship_head,
            Direction::Both => unreachable!("legs never contains Both"),
        };
        while cur != UNKNOWN_RECORD {
            let Some(r) = store.get_rship(txid, cur)? else { break };
            if seen.insert(cur) {
                consumer(cur)?;
            }
            cur = match leg {
                Direction::Outgoing => r.next_src_rship,
                Direction::Incoming => r.next_dest_rship,
                Direction::Both => unreachable!("legs never contains Both"),
            };
        }
    }
    Ok(())
}

/// The node at the far end of `rship` from the direction it was reached in.
pub fn other_node(store: &GraphStore, txid: TxId, rship: RshipId, direction: Direction) -> Result<Option<NodeId>> {
    Ok(store.get_rship(txid, rship)?.and_then(|r| match direction {
        Direction::Outgoing => Some(r.dest_node_id),
        Direction::Incoming => Some(r.src_node_id),
        Direction::Both => None,
    }))
}

/// Breadth-first search over relationships reachable from `start` within
/// `[min_hops, max_hops]`, optionally filtered to a single relationship label.
/// `consumer` is called with each matching relationship id and its hop count.
/// A relationship already enqueued is never enqueued or emitted again, so a
/// diamond in the adjacency graph doesn't duplicate the subtree below it.
pub fn variable_hop(
    store: &GraphStore,
    txid: TxId,
    start: NodeId,
    direction: Direction,
    label: Option<DictCode>,
    min_hops: u32,
    max_hops: u32,
    mut consumer: impl FnMut(RshipId, u32) -> Result<()>,
) -> Result<()> {
    if direction == Direction::Both {
        // Both is only meaningful for `foreach_rship`; a hop walk needs a
        // single side to know which endpoint is "the other one".
        return Ok(());
    }

    let mut queue: VecDeque<(RshipId, u32)> = VecDeque::new();
    let mut seen: FxHashSet<RshipId> = FxHashSet::default();
    if let Some(n) = store.get_node(txid, start)? {
        let head = match direction {
            Direction::Outgoing => n.from_rship_head,
            Direction::Incoming => n.to_rship_head,
            Direction::Both => unreachable!(),
        };
        if head != UNKNOWN_RECORD {
            seen.insert(head);
        }
        queue.push_back((head, 1));
    }

    while let Some((rid, hops)) = queue.pop_front() {
        if rid == UNKNOWN_RECORD || hops > max_hops {
            continue;
        }
        let Some(r) = store.get_rship(txid, rid)? else {
            continue;
        };
        let label_matches = label.map_or(true, |l| l == r.label_code);
        if label_matches && hops >= min_hops {
            consumer(rid, hops)?;
        }

        let sibling = match direction {
            Direction::Outgoing => r.next_src_rship,
            Direction::Incoming => r.next_dest_rship,
            Direction::Both => unreachable!(),
        };
        if sibling != UNKNOWN_RECORD && seen.insert(sibling) {
            queue.push_back((sibling, hops));
        }

        let next_node = match direction {
            Direction::Outgoing => r.dest_node_id,
            Direction::Incoming => r.src_node_id,
            Direction::Both => unreachable!(),
        };
        if let Some(next) = store.get_node(txid, next_node)? {
            let next_head = match direction {
                Direction::Outgoing => next.from_rship_head,
                Direction::Incoming => next.to_rship_head,
                Direction::Both => unreachable!(),
            };
            if next_head != UNKNOWN_RECORD && seen.insert(next_head) {
                queue.push_back((next_head, hops + 1));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::store::GraphStore;
    use crate::storage::buffer_pool::BufferPool;
    use crate::txn::TransactionManager;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn open_store() -> (tempfile::TempDir, GraphStore) {
        let dir = tempdir().unwrap();
        let pool = Arc::new(BufferPool::new(1000));
        let store = GraphStore::open(dir.path().join("g"), pool).unwrap();
        (dir, store)
    }

    #[test]
    fn variable_hop_does_not_duplicate_diamond_downstream() {
        // A -> B -> D
        // A -> C -> D
        // D -> E
        // B and C converge on D at hop 2; D's own outgoing edge to E must
        // still only be visited once, not once per converging path.
        let (_dir, store) = open_store();
        let mgr = TransactionManager::new();
        let txn = store.begin_transaction(&mgr);
        let a = store.add_node(&txn, "N", &[]).unwrap();
        let b = store.add_node(&txn, "N", &[]).unwrap();
        let c = store.add_node(&txn, "N", &[]).unwrap();
        let d = store.add_node(&txn, "N", &[]).unwrap();
        let e = store.add_node(&txn, "N", &[]).unwrap();
        store.add_relationship(&txn, a, b, "to", &[]).unwrap();
        store.add_relationship(&txn, a, c, "to", &[]).unwrap();
        store.add_relationship(&txn, b, d, "to", &[]).unwrap();
        store.add_relationship(&txn, c, d, "to", &[]).unwrap();
        store.add_relationship(&txn, d, e, "to", &[]).unwrap();
        store.commit(txn).unwrap();

        let reader = mgr.begin();
        let mut hops_at_3 = 0;
        variable_hop(&store, reader.id(), a, Direction::Outgoing, None, 1, 3, |_, hops| {
            if hops == 3 {
                hops_at_3 += 1;
            }
            Ok(())
        })
        .unwrap();
        assert_eq!(hops_at_3, 1, "D->E must be emitted once, not once per path converging on D");
    }

    #[test]
    fn foreach_rship_both_walks_outgoing_and_incoming_once_each() {
        let (_dir, store) = open_store();
        let mgr = TransactionManager::new();
        let txn = store.begin_transaction(&mgr);
        let a = store.add_node(&txn, "N", &[]).unwrap();
        let b = store.add_node(&txn, "N", &[]).unwrap();
        let c = store.add_node(&txn, "N", &[]).unwrap();
        store.add_relationship(&txn, a, b, "to", &[]).unwrap();
        store.add_relationship(&txn, c, a, "to", &[]).unwrap();
        store.commit(txn).unwrap();

        let reader = mgr.begin();
        let mut seen = Vec::new();
        foreach_rship(&store, reader.id(), a, Direction::Both, |rid| {
            seen.push(rid);
            Ok(())
        })
        .unwrap();
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn variable_hop_respects_min_and_max_hops() {
        let (_dir, store) = open_store();
        let mgr = TransactionManager::new();
        let txn = store.begin_transaction(&mgr);
        let a = store.add_node(&txn, "N", &[]).unwrap();
        let b = store.add_node(&txn, "N", &[]).unwrap();
        let c = store.add_node(&txn, "N", &[]).unwrap();
        store.add_relationship(&txn, a, b, "to", &[]).unwrap();
        store.add_relationship(&txn, b, c, "to", &[]).unwrap();
        store.commit(txn).unwrap();

        let reader = mgr.begin();
        let mut hops_seen = Vec::new();
        variable_hop(&store, reader.id(), a, Direction::Outgoing, None, 2, 2, |_, hops| {
            hops_seen.push(hops);
            Ok(())
        })
        .unwrap();
        assert_eq!(hops_seen, vec![2]);
    }

    #[test]
    fn variable_hop_is_noop_for_both_direction() {
        let (_dir, store) = open_store();
        let mgr = TransactionManager::new();
        let txn = store.begin_transaction(&mgr);
        let a = store.add_node(&txn, "N", &[]).unwrap();
        let b = store.add_node(&txn, "N", &[]).unwrap();
        store.add_relationship(&txn, a, b, "to", &[]).unwrap();
        store.commit(txn).unwrap();

        let reader = mgr.begin();
        let mut count = 0;
        variable_hop(&store, reader.id(), a, Direction::Both, None, 1, 5, |_, _| {
            count += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(count, 0);
    }
}
