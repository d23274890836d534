// src/update/erasures.rs

//! Picking what a job erases
//!
//! A containment graph is built over every trove the job would remove plus
//! the installed collections containing them. Old sides of updates and
//! primary erases start out erased; installed containers that are not
//! part of the job start out kept, as do troves the job keeps or that a
//! surviving install references. KEEP then flows from each kept node down
//! its containment edges. Whatever is not kept is erased, except old sides
//! of updates, which the update itself removes.

use crate::source::InstalledState;
use crate::trove::TroveTuple;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Erase,
    Keep,
    Unknown,
}

#[derive(Debug, Clone)]
struct Node {
    tuple: TroveTuple,
    mark: Mark,
    /// Indices of contained nodes
    children: Vec<usize>,
    from_update: bool,
}

/// Inputs of [`find_erasures`]
#[derive(Debug, Clone, Default)]
pub struct ErasureInput {
    /// Erases the request named directly; always erased
    pub primary: Vec<TroveTuple>,
    /// Erases implied by collection changes
    pub implied: Vec<TroveTuple>,
    /// Old sides of updates in the job
    pub updated: Vec<TroveTuple>,
    /// Troves the job decided to keep
    pub kept: BTreeSet<TroveTuple>,
    /// Troves referenced by collections the job installs
    pub referenced: BTreeSet<TroveTuple>,
}

/// Outcome of [`find_erasures`]
#[derive(Debug, Clone, Default)]
pub struct ErasurePlan {
    /// Troves to erase with their own erase job
    pub erase: BTreeSet<TroveTuple>,
    /// Nodes that ended up kept
    pub keep: BTreeSet<TroveTuple>,
    /// Nodes that started out kept
    pub roots: BTreeSet<TroveTuple>,
    /// Containment edges of the graph, container to contained
    pub edges: BTreeMap<TroveTuple, BTreeSet<TroveTuple>>,
}

impl ErasurePlan {
    /// Everything reachable from the KEEP roots along containment edges
    pub fn reachable_from_roots(&self) -> BTreeSet<TroveTuple> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&TroveTuple> = self.roots.iter().collect();
        while let Some(tuple) = stack.pop() {
            if !seen.insert(tuple.clone()) {
                continue;
            }
            if let Some(children) = self.edges.get(tuple) {
                stack.extend(children.iter());
            }
        }
        seen
    }
}

/// Decide which of the removal candidates are erased
pub fn find_erasures(installed: &dyn InstalledState, input: &ErasureInput) -> ErasurePlan {
    let mut nodes: Vec<Node> = Vec::new();
    let mut index: BTreeMap<TroveTuple, usize> = BTreeMap::new();

    let candidates = input
        .updated
        .iter()
        .map(|t| (t, true, Mark::Erase))
        .chain(input.implied.iter().map(|t| (t, false, Mark::Unknown)))
        .chain(input.primary.iter().map(|t| (t, false, Mark::Unknown)));

    for (tuple, from_update, mark) in candidates {
        match index.get(tuple) {
            // an update already takes care of it
            Some(&i) if nodes[i].mark == Mark::Unknown && mark == Mark::Erase => {
                nodes[i].mark = Mark::Erase;
                nodes[i].from_update = from_update;
            }
            Some(_) => {}
            None => {
                index.insert(tuple.clone(), nodes.len());
                nodes.push(Node {
                    tuple: tuple.clone(),
                    mark,
                    children: Vec::new(),
                    from_update,
                });
            }
        }
    }

    for tuple in &input.primary {
        if let Some(&i) = index.get(tuple) {
            nodes[i].mark = Mark::Erase;
        }
    }

    // find the containers of everything undecided, up to the top
    let mut need_parents: Vec<usize> = (0..nodes.len()).filter(|&i| nodes[i].mark == Mark::Unknown).collect();
    while !need_parents.is_empty() {
        let tuples: Vec<TroveTuple> = need_parents.iter().map(|&i| nodes[i].tuple.clone()).collect();
        let containers = installed.get_trove_containers(&tuples);
        let mut next = Vec::new();
        for (&child, parents) in need_parents.iter().zip(containers) {
            for parent in parents {
                match index.get(&parent) {
                    Some(&p) => nodes[p].children.push(child),
                    None => {
                        let p = nodes.len();
                        index.insert(parent.clone(), p);
                        nodes.push(Node {
                            tuple: parent,
                            mark: Mark::Keep,
                            children: vec![child],
                            from_update: false,
                        });
                        next.push(p);
                    }
                }
            }
        }
        need_parents = next;
    }

    for tuple in input.referenced.iter().chain(input.kept.iter()) {
        if let Some(&i) = index.get(tuple)
            && nodes[i].mark == Mark::Unknown
        {
            nodes[i].mark = Mark::Keep;
        }
    }

    let roots: Vec<usize> = (0..nodes.len()).filter(|&i| nodes[i].mark == Mark::Keep).collect();
    let mut plan = ErasurePlan {
        roots: roots.iter().map(|&i| nodes[i].tuple.clone()).collect(),
        ..Default::default()
    };

    let mut seen = vec![false; nodes.len()];
    let mut stack = roots;
    while let Some(i) = stack.pop() {
        if seen[i] {
            continue;
        }
        seen[i] = true;
        nodes[i].mark = Mark::Keep;
        stack.extend(nodes[i].children.iter().copied());
    }

    for node in &nodes {
        if !node.children.is_empty() {
            plan.edges.insert(
                node.tuple.clone(),
                node.children.iter().map(|&c| nodes[c].tuple.clone()).collect(),
            );
        }
        match (node.mark, node.from_update) {
            (Mark::Keep, _) => {
                plan.keep.insert(node.tuple.clone());
            }
            (_, false) => {
                plan.erase.insert(node.tuple.clone());
            }
            (_, true) => {}
        }
    }

    debug!("erasure pass: {} erased, {} kept", plan.erase.len(), plan.keep.len());
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryDatabase;
    use crate::trove::{Trove, TroveRef};

    fn tup(s: &str) -> TroveTuple {
        TroveTuple::parse(s).unwrap()
    }

    fn group(name: &str, members: &[&str]) -> Trove {
        let mut trv = Trove::new(tup(name));
        for m in members {
            trv.references.push(TroveRef::strong(tup(m), true));
        }
        trv
    }

    fn db() -> MemoryDatabase {
        let mut db = MemoryDatabase::new();
        db.add(group("group-a=/repo@rpl:2/1.0-1-1", &["foo=/repo@rpl:2/1.0-1-1", "bar=/repo@rpl:2/1.0-1-1"]));
        db.add(group("group-b=/repo@rpl:2/1.0-1-1", &["bar=/repo@rpl:2/1.0-1-1"]));
        db.add(Trove::new(tup("foo=/repo@rpl:2/1.0-1-1")));
        db.add(Trove::new(tup("bar=/repo@rpl:2/1.0-1-1")));
        db.add(Trove::new(tup("baz=/repo@rpl:2/1.0-1-1")));
        db
    }

    // === Reachability tests ===

    #[test]
    fn test_surviving_container_keeps_member() {
        let db = db();
        // group-a is updated to a version without foo and bar
        let input = ErasureInput {
            updated: vec![tup("group-a=/repo@rpl:2/1.0-1-1")],
            implied: vec![tup("foo=/repo@rpl:2/1.0-1-1"), tup("bar=/repo@rpl:2/1.0-1-1")],
            ..Default::default()
        };
        let plan = find_erasures(&db, &input);
        assert_eq!(plan.erase, [tup("foo=/repo@rpl:2/1.0-1-1")].into_iter().collect());
        assert!(plan.keep.contains(&tup("bar=/repo@rpl:2/1.0-1-1")));
        assert!(plan.roots.contains(&tup("group-b=/repo@rpl:2/1.0-1-1")));
    }

    #[test]
    fn test_primary_erase_always_erased() {
        let db = db();
        let input = ErasureInput {
            primary: vec![tup("baz=/repo@rpl:2/1.0-1-1")],
            kept: [tup("baz=/repo@rpl:2/1.0-1-1")].into_iter().collect(),
            ..Default::default()
        };
        let plan = find_erasures(&db, &input);
        assert!(plan.erase.contains(&tup("baz=/repo@rpl:2/1.0-1-1")));
    }

    #[test]
    fn test_referenced_and_kept_survive() {
        let db = db();
        let input = ErasureInput {
            implied: vec![tup("baz=/repo@rpl:2/1.0-1-1"), tup("foo=/repo@rpl:2/1.0-1-1")],
            updated: vec![tup("group-a=/repo@rpl:2/1.0-1-1")],
            referenced: [tup("baz=/repo@rpl:2/1.0-1-1")].into_iter().collect(),
            kept: [tup("foo=/repo@rpl:2/1.0-1-1")].into_iter().collect(),
            ..Default::default()
        };
        let plan = find_erasures(&db, &input);
        assert!(plan.erase.is_empty());
    }

    #[test]
    fn test_erased_unreachable_from_roots() {
        let db = db();
        let input = ErasureInput {
            updated: vec![tup("group-a=/repo@rpl:2/1.0-1-1")],
            implied: vec![tup("foo=/repo@rpl:2/1.0-1-1"), tup("bar=/repo@rpl:2/1.0-1-1")],
            primary: vec![tup("baz=/repo@rpl:2/1.0-1-1")],
            ..Default::default()
        };
        let plan = find_erasures(&db, &input);
        let reachable = plan.reachable_from_roots();
        assert!(plan.erase.iter().all(|t| !reachable.contains(t)));
        assert!(reachable.iter().all(|t| !plan.erase.contains(t)));
    }
}
