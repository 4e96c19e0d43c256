//! Registry of open aliases and the tree of equi-joins rooted at the target.
//!
//! Nodes live in an arena addressed through an alias index. A node refers to
//! its parent by alias only, and an alias can appear in the tree at most
//! once, so the join relation is always a tree: joining the same source
//! twice requires opening it again under a second alias.

use crate::error::JoinConfigError;
use indexmap::IndexSet;
use model::core::identifiers::Alias;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Edge joining `child.child_field` to `parent.parent_field`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Join {
    pub child: Alias,
    pub child_field: String,
    pub parent: Alias,
    pub parent_field: String,
    /// Inner join when set, left outer join otherwise.
    pub inner: bool,
}

#[derive(Debug, Clone)]
struct JoinNode {
    alias: Alias,
    /// Edge to the parent; `None` for the target.
    join: Option<Join>,
    children: Vec<Alias>,
}

#[derive(Debug, Clone, Default)]
pub struct JoinGraph {
    registered: IndexSet<Alias>,
    target: Option<Alias>,
    nodes: Vec<Option<JoinNode>>,
    index: HashMap<Alias, usize>,
}

impl JoinGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a freshly opened input table.
    pub fn register_alias(&mut self, alias: &Alias) -> Result<(), JoinConfigError> {
        if !self.registered.insert(alias.clone()) {
            return Err(JoinConfigError::AliasInUse(alias.to_string()));
        }
        Ok(())
    }

    /// Forgets a closed input table, dropping it and its subtree from the
    /// join tree. Returns the aliases removed from the tree.
    pub fn unregister_alias(&mut self, alias: &Alias) -> Vec<Alias> {
        let removed = self.remove_alias(alias);
        self.registered.shift_remove(alias);
        removed
    }

    pub fn is_registered(&self, alias: &str) -> bool {
        self.registered.contains(alias)
    }

    pub fn registered(&self) -> impl Iterator<Item = &Alias> {
        self.registered.iter()
    }

    /// First `base`, `base_2`, `base_3`, ... not registered yet.
    pub fn unique_alias(&self, base: &str) -> Alias {
        if !self.registered.contains(base) {
            return Alias::new(base);
        }
        (2..)
            .map(|n| format!("{base}_{n}"))
            .find(|candidate| !self.registered.contains(candidate.as_str()))
            .map(Alias::new)
            .unwrap_or_else(|| Alias::new(base))
    }

    pub fn target(&self) -> Option<&Alias> {
        self.target.as_ref()
    }

    /// Makes `alias` the root. Changing the target drops every join.
    pub fn set_target(&mut self, alias: &Alias) -> Result<(), JoinConfigError> {
        if !self.registered.contains(alias) {
            warn!(alias = %alias, "Rejected target: alias is not open");
            return Err(JoinConfigError::UnknownAlias(alias.to_string()));
        }
        if self.target.as_ref() == Some(alias) {
            return Ok(());
        }

        self.clear();
        self.insert_node(JoinNode {
            alias: alias.clone(),
            join: None,
            children: Vec::new(),
        });
        self.target = Some(alias.clone());
        debug!(alias = %alias, "Target set");
        Ok(())
    }

    /// Drops the target and every join.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.index.clear();
        self.target = None;
    }

    pub fn add_join(
        &mut self,
        child: &Alias,
        child_field: &str,
        parent: &Alias,
        parent_field: &str,
        inner: bool,
    ) -> Result<&Join, JoinConfigError> {
        if let Err(e) = self.check_join(child, parent) {
            warn!(child = %child, parent = %parent, error = %e, "Rejected join");
            return Err(e);
        }

        let join = Join {
            child: child.clone(),
            child_field: child_field.to_string(),
            parent: parent.clone(),
            parent_field: parent_field.to_string(),
            inner,
        };
        let slot = self.insert_node(JoinNode {
            alias: child.clone(),
            join: Some(join),
            children: Vec::new(),
        });
        if let Some(parent_node) = self.node_mut(parent) {
            parent_node.children.push(child.clone());
        }
        debug!(child = %child, parent = %parent, inner, "Join added");

        self.nodes[slot]
            .as_ref()
            .and_then(|node| node.join.as_ref())
            .ok_or_else(|| JoinConfigError::UnknownAlias(child.to_string()))
    }

    fn check_join(&self, child: &Alias, parent: &Alias) -> Result<(), JoinConfigError> {
        let target = self.target.as_ref().ok_or(JoinConfigError::NoTarget)?;
        if child == parent {
            return Err(JoinConfigError::SelfJoin(child.to_string()));
        }
        for alias in [child, parent] {
            if !self.registered.contains(alias) {
                return Err(JoinConfigError::UnknownAlias(alias.to_string()));
            }
        }
        if self.contains(child) {
            return Err(JoinConfigError::AliasInUse(child.to_string()));
        }
        if !self.is_reachable(target, parent) {
            return Err(JoinConfigError::ParentNotInTree(parent.to_string()));
        }
        Ok(())
    }

    /// Removes `alias` and everything joined beneath it. Returns the removed
    /// aliases in depth-first order; empty when `alias` was not in the tree.
    pub fn remove_alias(&mut self, alias: &Alias) -> Vec<Alias> {
        if !self.contains(alias) {
            return Vec::new();
        }

        let parent = self
            .join_for(alias)
            .map(|join| join.parent.clone());
        if let Some(parent) = parent
            && let Some(node) = self.node_mut(&parent)
        {
            node.children.retain(|c| c != alias);
        }

        let removed = self.joined_aliases_depth_first(Some(alias));
        for gone in &removed {
            if let Some(slot) = self.index.remove(gone) {
                self.nodes[slot] = None;
            }
        }
        if self.target.as_ref() == Some(alias) {
            self.clear();
        }

        debug!(alias = %alias, removed = removed.len(), "Alias removed from join tree");
        removed
    }

    /// `start` (the target by default) followed by its descendants in
    /// pre-order, children in the order they were joined.
    pub fn joined_aliases_depth_first(&self, start: Option<&Alias>) -> Vec<Alias> {
        let Some(start) = start.or(self.target.as_ref()) else {
            return Vec::new();
        };

        let mut order = Vec::new();
        let mut stack = vec![start.clone()];
        while let Some(alias) = stack.pop() {
            let Some(node) = self.node(&alias) else {
                continue;
            };
            stack.extend(node.children.iter().rev().cloned());
            order.push(alias);
        }
        order
    }

    /// Joins in the order the join query applies them.
    pub fn joins(&self) -> Vec<&Join> {
        self.joined_aliases_depth_first(None)
            .iter()
            .filter_map(|alias| self.join_for(alias))
            .collect()
    }

    /// Whether `to` sits in the subtree rooted at `from`.
    pub fn is_reachable(&self, from: &Alias, to: &Alias) -> bool {
        match self.node(from) {
            None => false,
            Some(_) if from == to => true,
            Some(node) => node.children.iter().any(|child| self.is_reachable(child, to)),
        }
    }

    /// Edge joining `alias` to its parent.
    pub fn join_for(&self, alias: &Alias) -> Option<&Join> {
        self.node(alias).and_then(|node| node.join.as_ref())
    }

    pub fn children(&self, alias: &Alias) -> Vec<&Join> {
        self.node(alias)
            .map(|node| {
                node.children
                    .iter()
                    .filter_map(|child| self.join_for(child))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether `alias` is the target or joined beneath it.
    pub fn contains(&self, alias: &Alias) -> bool {
        self.index.contains_key(alias)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    fn insert_node(&mut self, node: JoinNode) -> usize {
        let alias = node.alias.clone();
        let slot = match self.nodes.iter().position(Option::is_none) {
            Some(free) => {
                self.nodes[free] = Some(node);
                free
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        };
        self.index.insert(alias, slot);
        slot
    }

    fn node(&self, alias: &Alias) -> Option<&JoinNode> {
        self.index
            .get(alias)
            .and_then(|&slot| self.nodes.get(slot))
            .and_then(Option::as_ref)
    }

    fn node_mut(&mut self, alias: &Alias) -> Option<&mut JoinNode> {
        let slot = *self.index.get(alias)?;
        self.nodes.get_mut(slot).and_then(Option::as_mut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn a(name: &str) -> Alias {
        Alias::new(name)
    }

    fn graph(aliases: &[&str]) -> JoinGraph {
        let mut graph = JoinGraph::new();
        for alias in aliases {
            graph.register_alias(&a(alias)).unwrap();
        }
        graph
    }

    fn names(aliases: &[Alias]) -> Vec<&str> {
        aliases.iter().map(Alias::as_str).collect()
    }

    /// t -> (b -> d, c)
    fn sample() -> JoinGraph {
        let mut g = graph(&["t", "b", "c", "d"]);
        g.set_target(&a("t")).unwrap();
        g.add_join(&a("b"), "id", &a("t"), "b_id", false).unwrap();
        g.add_join(&a("c"), "id", &a("t"), "c_id", true).unwrap();
        g.add_join(&a("d"), "id", &a("b"), "d_id", false).unwrap();
        g
    }

    #[test]
    fn depth_first_order_starts_at_target() {
        let g = sample();
        assert_eq!(names(&g.joined_aliases_depth_first(None)), vec!["t", "b", "d", "c"]);
        assert_eq!(names(&g.joined_aliases_depth_first(Some(&a("b")))), vec!["b", "d"]);

        let joins: Vec<&str> = g.joins().iter().map(|j| j.child.as_str()).collect();
        assert_eq!(joins, vec!["b", "d", "c"]);
        assert!(g.join_for(&a("c")).unwrap().inner);
    }

    #[test]
    fn rejects_invalid_joins() {
        let mut g = sample();
        g.register_alias(&a("e")).unwrap();
        g.register_alias(&a("f")).unwrap();

        assert_eq!(
            g.add_join(&a("d"), "x", &a("c"), "y", false).unwrap_err(),
            JoinConfigError::AliasInUse("d".into())
        );
        assert_eq!(
            g.add_join(&a("e"), "x", &a("f"), "y", false).unwrap_err(),
            JoinConfigError::ParentNotInTree("f".into())
        );
        assert_eq!(
            g.add_join(&a("e"), "x", &a("e"), "y", false).unwrap_err(),
            JoinConfigError::SelfJoin("e".into())
        );
        assert_eq!(
            g.add_join(&a("zz"), "x", &a("t"), "y", false).unwrap_err(),
            JoinConfigError::UnknownAlias("zz".into())
        );
        assert_eq!(
            g.add_join(&a("t"), "x", &a("d"), "y", false).unwrap_err(),
            JoinConfigError::AliasInUse("t".into())
        );

        let mut empty = graph(&["x", "y"]);
        assert_eq!(
            empty.add_join(&a("x"), "k", &a("y"), "k", false).unwrap_err(),
            JoinConfigError::NoTarget
        );
    }

    #[test]
    fn removal_cascades_to_subtree() {
        let mut g = sample();
        assert_eq!(names(&g.remove_alias(&a("b"))), vec!["b", "d"]);
        assert_eq!(names(&g.joined_aliases_depth_first(None)), vec!["t", "c"]);
        assert!(g.remove_alias(&a("b")).is_empty());

        // the freed alias can be joined again
        g.add_join(&a("d"), "id", &a("c"), "d_id", false).unwrap();
        assert_eq!(names(&g.joined_aliases_depth_first(None)), vec!["t", "c", "d"]);

        assert_eq!(g.remove_alias(&a("t")).len(), 3);
        assert!(g.target().is_none());
        assert!(g.is_empty());
    }

    #[test]
    fn changing_target_drops_joins() {
        let mut g = sample();
        g.set_target(&a("t")).unwrap();
        assert_eq!(g.len(), 4);

        g.set_target(&a("c")).unwrap();
        assert_eq!(names(&g.joined_aliases_depth_first(None)), vec!["c"]);
        assert_eq!(
            g.set_target(&a("missing")).unwrap_err(),
            JoinConfigError::UnknownAlias("missing".into())
        );
    }

    #[test]
    fn unique_alias_skips_registered_names() {
        let g = graph(&["parcels", "parcels_2"]);
        assert_eq!(g.unique_alias("parcels").as_str(), "parcels_3");
        assert_eq!(g.unique_alias("owners").as_str(), "owners");
    }

    /// Replays pseudo-random add/remove sequences and checks the tree shape
    /// after every step.
    #[test]
    fn random_edits_keep_a_tree() {
        let aliases: Vec<Alias> = (0..8).map(|i| a(&format!("a{i}"))).collect();
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        let mut next = move |n: usize| {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            (seed % n as u64) as usize
        };

        for _ in 0..50 {
            let mut g = JoinGraph::new();
            for alias in &aliases {
                g.register_alias(alias).unwrap();
            }
            g.set_target(&aliases[0]).unwrap();

            for _ in 0..40 {
                let child = &aliases[next(aliases.len())];
                let parent = &aliases[next(aliases.len())];
                if next(4) == 0 {
                    g.remove_alias(child);
                } else {
                    let _ = g.add_join(child, "k", parent, "k", next(2) == 0);
                }

                let order = g.joined_aliases_depth_first(None);
                let unique: IndexSet<&Alias> = order.iter().collect();
                assert_eq!(unique.len(), order.len(), "alias listed twice");
                assert_eq!(order.len(), g.len(), "node not reachable from target");
                if let Some(target) = g.target() {
                    assert_eq!(&order[0], target);
                    assert!(g.is_reachable(target, target));
                }
                for join in g.joins() {
                    assert!(!g.is_reachable(&join.child, &join.parent), "cycle");
                }
            }
        }
    }
}
