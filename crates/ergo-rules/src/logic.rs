//! Boolean logic trees over gated rule results.
//!
//! ## Data form
//!
//! [`LogicNode`] is the serialised, recursive form stored with a transition.
//!
//! ## Editing form
//!
//! [`LogicTree`] keeps the same nodes in an index arena with parent links so
//! structural edits (re-parenting, removing, toggling) never rebuild the tree.
//! Node ids stay valid until their subtree is removed.
//!
//! Leaves read a [`Truth`]; Unknown counts as false. Empty groups are false
//! whatever their operator or negation.

use std::collections::BTreeSet;

use ergo_core::{Error, Result, RuleId};
use serde::{Deserialize, Serialize};

use crate::truth::Truth;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicOperator {
    And,
    Or,
    /// Exactly one child true
    Xor,
    Nand,
    Nor,
}

impl LogicOperator {
    pub fn reduce(&self, values: &[bool]) -> bool {
        if values.is_empty() {
            return false;
        }
        let trues = values.iter().filter(|v| **v).count();
        match self {
            LogicOperator::And => trues == values.len(),
            LogicOperator::Or => trues > 0,
            LogicOperator::Xor => trues == 1,
            LogicOperator::Nand => trues < values.len(),
            LogicOperator::Nor => trues == 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum LogicNode {
    Rule {
        #[serde(rename = "ruleId")]
        rule_id: RuleId,
        #[serde(default)]
        negate: bool,
    },
    Group {
        operator: LogicOperator,
        #[serde(default)]
        negate: bool,
        #[serde(default)]
        children: Vec<LogicNode>,
    },
}

impl LogicNode {
    pub fn rule(rule_id: impl Into<RuleId>) -> Self {
        LogicNode::Rule {
            rule_id: rule_id.into(),
            negate: false,
        }
    }

    pub fn group(operator: LogicOperator, children: Vec<LogicNode>) -> Self {
        LogicNode::Group {
            operator,
            negate: false,
            children,
        }
    }

    pub fn negated(self) -> Self {
        match self {
            LogicNode::Rule { rule_id, negate } => LogicNode::Rule {
                rule_id,
                negate: !negate,
            },
            LogicNode::Group {
                operator,
                negate,
                children,
            } => LogicNode::Group {
                operator,
                negate: !negate,
                children,
            },
        }
    }

    pub fn evaluate<F>(&self, leaf: &mut F) -> bool
    where
        F: FnMut(&RuleId) -> Truth,
    {
        match self {
            LogicNode::Rule { rule_id, negate } => leaf(rule_id).is_true() ^ negate,
            LogicNode::Group { children, .. } if children.is_empty() => false,
            LogicNode::Group {
                operator,
                negate,
                children,
            } => {
                let values: Vec<bool> = children.iter().map(|c| c.evaluate(leaf)).collect();
                operator.reduce(&values) ^ negate
            }
        }
    }

    /// Every rule id referenced by a leaf
    pub fn rule_ids(&self) -> BTreeSet<RuleId> {
        let mut ids = BTreeSet::new();
        self.collect_rule_ids(&mut ids);
        ids
    }

    fn collect_rule_ids(&self, ids: &mut BTreeSet<RuleId>) {
        match self {
            LogicNode::Rule { rule_id, .. } => {
                ids.insert(rule_id.clone());
            }
            LogicNode::Group { children, .. } => {
                for child in children {
                    child.collect_rule_ids(ids);
                }
            }
        }
    }
}

/// Index of a node in a [`LogicTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Rule(RuleId),
    Group {
        operator: LogicOperator,
        children: Vec<NodeId>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    pub kind: NodeKind,
    pub negate: bool,
    pub parent: Option<NodeId>,
}

/// Arena-backed logic tree
#[derive(Debug, Clone, PartialEq)]
pub struct LogicTree {
    nodes: Vec<Option<TreeNode>>,
    root: NodeId,
}

impl LogicTree {
    /// Tree with an empty root group
    pub fn new(operator: LogicOperator) -> Self {
        Self {
            nodes: vec![Some(TreeNode {
                kind: NodeKind::Group {
                    operator,
                    children: Vec::new(),
                },
                negate: false,
                parent: None,
            })],
            root: NodeId(0),
        }
    }

    /// AND of `rule_ids` in order; the tree a transition without one behaves as
    pub fn implicit_and<I>(rule_ids: I) -> Self
    where
        I: IntoIterator<Item = RuleId>,
    {
        let mut tree = Self::new(LogicOperator::And);
        let root = tree.root;
        for rule_id in rule_ids {
            tree.push(NodeKind::Rule(rule_id), false, Some(root));
        }
        tree
    }

    pub fn from_node(node: &LogicNode) -> Self {
        let mut tree = Self {
            nodes: Vec::new(),
            root: NodeId(0),
        };
        tree.root = tree.insert_node(node, None);
        tree
    }

    fn insert_node(&mut self, node: &LogicNode, parent: Option<NodeId>) -> NodeId {
        match node {
            LogicNode::Rule { rule_id, negate } => {
                self.push(NodeKind::Rule(rule_id.clone()), *negate, parent)
            }
            LogicNode::Group {
                operator,
                negate,
                children,
            } => {
                let id = self.push(
                    NodeKind::Group {
                        operator: *operator,
                        children: Vec::new(),
                    },
                    *negate,
                    parent,
                );
                for child in children {
                    self.insert_node(child, Some(id));
                }
                id
            }
        }
    }

    /// Allocate a node and link it under `parent`
    fn push(&mut self, kind: NodeKind, negate: bool, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Some(TreeNode {
            kind,
            negate,
            parent,
        }));
        if let Some(parent) = parent {
            if let Some(NodeKind::Group { children, .. }) = self.kind_mut(parent) {
                children.push(id);
            }
        }
        id
    }

    pub fn to_node(&self) -> LogicNode {
        self.node_at(self.root, 0)
            .unwrap_or_else(|| LogicNode::group(LogicOperator::And, Vec::new()))
    }

    fn node_at(&self, id: NodeId, depth: usize) -> Option<LogicNode> {
        if depth > self.nodes.len() {
            return None;
        }
        let node = self.get(id)?;
        Some(match &node.kind {
            NodeKind::Rule(rule_id) => LogicNode::Rule {
                rule_id: rule_id.clone(),
                negate: node.negate,
            },
            NodeKind::Group { operator, children } => LogicNode::Group {
                operator: *operator,
                negate: node.negate,
                children: children
                    .iter()
                    .filter_map(|c| self.node_at(*c, depth + 1))
                    .collect(),
            },
        })
    }

    /// The ordered rule list if the tree is a plain AND of rules
    pub fn as_rule_list(&self) -> Option<Vec<RuleId>> {
        let root = self.get(self.root)?;
        let NodeKind::Group {
            operator: LogicOperator::And,
            children,
        } = &root.kind
        else {
            return None;
        };
        if root.negate {
            return None;
        }
        children
            .iter()
            .map(|c| match self.get(*c) {
                Some(TreeNode {
                    kind: NodeKind::Rule(rule_id),
                    negate: false,
                    ..
                }) => Some(rule_id.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn get(&self, id: NodeId) -> Option<&TreeNode> {
        self.nodes.get(id.0)?.as_ref()
    }

    fn kind_mut(&mut self, id: NodeId) -> Option<&mut NodeKind> {
        self.nodes.get_mut(id.0)?.as_mut().map(|n| &mut n.kind)
    }

    fn require(&self, id: NodeId) -> Result<&TreeNode> {
        self.get(id)
            .ok_or_else(|| Error::InvalidLogicTree(format!("node {} does not exist", id.0)))
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.get(id)?.parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        match self.get(id).map(|n| &n.kind) {
            Some(NodeKind::Group { children, .. }) => children.as_slice(),
            _ => &[],
        }
    }

    /// Number of live nodes
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn require_group(&self, id: NodeId) -> Result<()> {
        match self.require(id)?.kind {
            NodeKind::Group { .. } => Ok(()),
            NodeKind::Rule(_) => Err(Error::InvalidLogicTree(format!(
                "node {} is a rule leaf, not a group",
                id.0
            ))),
        }
    }

    pub fn add_rule(&mut self, parent: NodeId, rule_id: impl Into<RuleId>) -> Result<NodeId> {
        self.require_group(parent)?;
        Ok(self.push(NodeKind::Rule(rule_id.into()), false, Some(parent)))
    }

    pub fn add_group(&mut self, parent: NodeId, operator: LogicOperator) -> Result<NodeId> {
        self.require_group(parent)?;
        Ok(self.push(
            NodeKind::Group {
                operator,
                children: Vec::new(),
            },
            false,
            Some(parent),
        ))
    }

    pub fn set_operator(&mut self, id: NodeId, operator: LogicOperator) -> Result<()> {
        self.require_group(id)?;
        if let Some(NodeKind::Group { operator: op, .. }) = self.kind_mut(id) {
            *op = operator;
        }
        Ok(())
    }

    pub fn toggle_negate(&mut self, id: NodeId) -> Result<()> {
        self.require(id)?;
        if let Some(Some(node)) = self.nodes.get_mut(id.0) {
            node.negate = !node.negate;
        }
        Ok(())
    }

    fn unlink(&mut self, id: NodeId) {
        if let Some(parent) = self.parent(id) {
            if let Some(NodeKind::Group { children, .. }) = self.kind_mut(parent) {
                children.retain(|c| *c != id);
            }
        }
    }

    /// Remove a node and everything below it. The root cannot be removed.
    pub fn remove_subtree(&mut self, id: NodeId) -> Result<()> {
        self.require(id)?;
        if id == self.root {
            return Err(Error::InvalidLogicTree("cannot remove the root".to_string()));
        }
        self.unlink(id);

        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.get_mut(current.0).and_then(Option::take) {
                if let NodeKind::Group { children, .. } = node.kind {
                    stack.extend(children);
                }
            }
        }
        Ok(())
    }

    /// Whether `ancestor` lies on the parent chain of `id` (or is `id`)
    pub fn is_ancestor(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut current = Some(id);
        let mut steps = 0;
        while let Some(node) = current {
            if node == ancestor {
                return true;
            }
            steps += 1;
            if steps > self.nodes.len() {
                return false;
            }
            current = self.parent(node);
        }
        false
    }

    /// Re-parent a subtree, appending it to `new_parent`'s children
    pub fn move_subtree(&mut self, id: NodeId, new_parent: NodeId) -> Result<()> {
        self.require(id)?;
        self.require_group(new_parent)?;
        if id == self.root {
            return Err(Error::InvalidLogicTree("cannot move the root".to_string()));
        }
        if self.is_ancestor(id, new_parent) {
            return Err(Error::InvalidLogicTree(format!(
                "node {} cannot move below its own descendant {}",
                id.0, new_parent.0
            )));
        }

        self.unlink(id);
        if let Some(Some(node)) = self.nodes.get_mut(id.0) {
            node.parent = Some(new_parent);
        }
        if let Some(NodeKind::Group { children, .. }) = self.kind_mut(new_parent) {
            children.push(id);
        }
        Ok(())
    }

    /// Check that every live node is reached exactly once from the root
    /// and that child and parent links agree
    pub fn validate(&self) -> Result<()> {
        let root = self.require(self.root)?;
        if root.parent.is_some() {
            return Err(Error::InvalidLogicTree("root has a parent".to_string()));
        }

        let mut seen = BTreeSet::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                return Err(Error::InvalidLogicTree(format!("node {} is reachable twice", id.0)));
            }
            for child in self.children(id) {
                let node = self.require(*child)?;
                if node.parent != Some(id) {
                    return Err(Error::InvalidLogicTree(format!(
                        "node {} has an inconsistent parent link",
                        child.0
                    )));
                }
                stack.push(*child);
            }
        }

        if seen.len() != self.len() {
            return Err(Error::InvalidLogicTree("tree has detached nodes".to_string()));
        }
        Ok(())
    }

    pub fn rule_ids(&self) -> BTreeSet<RuleId> {
        self.nodes
            .iter()
            .flatten()
            .filter_map(|n| match &n.kind {
                NodeKind::Rule(rule_id) => Some(rule_id.clone()),
                NodeKind::Group { .. } => None,
            })
            .collect()
    }

    pub fn evaluate<F>(&self, mut leaf: F) -> bool
    where
        F: FnMut(&RuleId) -> Truth,
    {
        self.evaluate_at(self.root, &mut leaf, 0)
    }

    fn evaluate_at<F>(&self, id: NodeId, leaf: &mut F, depth: usize) -> bool
    where
        F: FnMut(&RuleId) -> Truth,
    {
        let Some(node) = self.get(id) else {
            return false;
        };
        if depth > self.nodes.len() {
            return false;
        }
        match &node.kind {
            NodeKind::Rule(rule_id) => leaf(rule_id).is_true() ^ node.negate,
            NodeKind::Group { children, .. } if children.is_empty() => false,
            NodeKind::Group { operator, children } => {
                let values: Vec<bool> = children
                    .iter()
                    .map(|c| self.evaluate_at(*c, leaf, depth + 1))
                    .collect();
                operator.reduce(&values) ^ node.negate
            }
        }
    }
}
