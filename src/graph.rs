//! Adjacency structures over task ids: prerequisite edges and the hierarchy.
//!
//! Both are plain id-keyed adjacency sets. Cycle prevention is a reachability
//! query run before an edge is inserted; there is no incremental topological
//! order, which is fine at the thousands-of-tasks scale this engine targets.

use crate::types::Dependency;
use std::collections::{BTreeSet, HashMap, HashSet};

type Adjacency = HashMap<String, BTreeSet<String>>;

/// Iterative depth-first search: is `target` reachable from `start`?
fn reaches<'a>(adjacency: &'a Adjacency, start: &'a str, target: &str) -> bool {
    let mut visited: HashSet<&str> = HashSet::new();
    let mut stack = vec![start];

    while let Some(node) = stack.pop() {
        if node == target {
            return true;
        }
        if visited.insert(node)
            && let Some(next) = adjacency.get(node)
        {
            stack.extend(next.iter().map(String::as_str));
        }
    }

    false
}

fn link(adjacency: &mut Adjacency, from: &str, to: &str) -> bool {
    adjacency.entry(from.to_string()).or_default().insert(to.to_string())
}

fn unlink(adjacency: &mut Adjacency, from: &str, to: &str) -> bool {
    let Some(set) = adjacency.get_mut(from) else {
        return false;
    };
    let removed = set.remove(to);
    if set.is_empty() {
        adjacency.remove(from);
    }
    removed
}

fn neighbors<'a>(adjacency: &'a Adjacency, id: &str) -> impl Iterator<Item = &'a str> + use<'a> {
    adjacency.get(id).into_iter().flatten().map(String::as_str)
}

/// Directed prerequisite edges, indexed in both directions.
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    /// task -> tasks it depends on
    prerequisites: Adjacency,
    /// task -> tasks depending on it
    dependents: Adjacency,
}

impl DependencyGraph {
    pub fn contains(&self, edge: &Dependency) -> bool {
        self.prerequisites
            .get(&edge.task_id)
            .is_some_and(|set| set.contains(&edge.depends_on_id))
    }

    /// Returns true if adding `task_id -> depends_on_id` would close a cycle,
    /// i.e. `depends_on_id` already depends (transitively) on `task_id`.
    pub fn would_create_cycle(&self, task_id: &str, depends_on_id: &str) -> bool {
        reaches(&self.prerequisites, depends_on_id, task_id)
    }

    /// Insert an edge. Callers check `would_create_cycle` first.
    pub fn insert(&mut self, edge: &Dependency) -> bool {
        let added = link(&mut self.prerequisites, &edge.task_id, &edge.depends_on_id);
        link(&mut self.dependents, &edge.depends_on_id, &edge.task_id);
        added
    }

    pub fn remove(&mut self, edge: &Dependency) -> bool {
        let removed = unlink(&mut self.prerequisites, &edge.task_id, &edge.depends_on_id);
        unlink(&mut self.dependents, &edge.depends_on_id, &edge.task_id);
        removed
    }

    /// Direct prerequisites of a task.
    pub fn prerequisites<'a>(&'a self, id: &str) -> impl Iterator<Item = &'a str> + use<'a> {
        neighbors(&self.prerequisites, id)
    }

    /// Tasks that directly depend on `id`.
    pub fn dependents<'a>(&'a self, id: &str) -> impl Iterator<Item = &'a str> + use<'a> {
        neighbors(&self.dependents, id)
    }

    /// Every edge with `id` at either end.
    pub fn edges_touching(&self, id: &str) -> Vec<Dependency> {
        let outgoing = self.prerequisites(id).map(|dep| Dependency::new(id, dep));
        let incoming = self.dependents(id).map(|task| Dependency::new(task, id));
        outgoing.chain(incoming).collect()
    }

    pub fn edges(&self) -> impl Iterator<Item = Dependency> + '_ {
        self.prerequisites
            .iter()
            .flat_map(|(task, deps)| deps.iter().map(move |dep| Dependency::new(task.clone(), dep.clone())))
    }

    pub fn len(&self) -> usize {
        self.prerequisites.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.prerequisites.is_empty()
    }
}

/// Parent/child index. Parent pointers live on the task records; this keeps
/// the downward direction for subtree walks and descendant checks.
#[derive(Debug, Default, Clone)]
pub struct Hierarchy {
    children: Adjacency,
}

impl Hierarchy {
    /// Move `child` from `old_parent` to `new_parent`.
    pub fn set_parent(&mut self, child: &str, old_parent: Option<&str>, new_parent: Option<&str>) {
        if let Some(old) = old_parent {
            unlink(&mut self.children, old, child);
        }
        if let Some(new) = new_parent {
            link(&mut self.children, new, child);
        }
    }

    pub fn children<'a>(&'a self, id: &str) -> impl Iterator<Item = &'a str> + use<'a> {
        neighbors(&self.children, id)
    }

    /// Is `candidate` in the subtree rooted at `ancestor` (inclusive)?
    pub fn is_descendant(&self, ancestor: &str, candidate: &str) -> bool {
        reaches(&self.children, ancestor, candidate)
    }

    /// Drop the child list of a removed node.
    pub fn remove_node(&mut self, id: &str) {
        self.children.remove(id);
    }
}
