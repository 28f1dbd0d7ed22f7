// Persistent ordered tree used for the folder/chat sidebar.
//
// Every edit returns a fresh `OrderedTree`; the receiver is never touched.
// Unknown ids are silent no-ops so that UI retries stay idempotent.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A node with a stable id, a payload and optional ordered children.
///
/// The payload is flattened into the node on the wire, so a
/// `TreeNode<ChatNodeKind>` serializes as
/// `{ "id": .., "kind": "chat", "chatId": .., "childItems": [..] }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", bound(deserialize = "D: Deserialize<'de>"))]
pub struct TreeNode<D> {
    pub id: String,
    #[serde(flatten)]
    pub data: D,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_items: Option<Vec<TreeNode<D>>>,
}

impl<D> TreeNode<D> {
    pub fn new(id: impl Into<String>, data: D) -> Self {
        Self { id: id.into(), data, child_items: None }
    }

    pub fn with_children(mut self, children: Vec<TreeNode<D>>) -> Self {
        self.child_items = Some(children);
        self
    }

    pub fn children(&self) -> &[TreeNode<D>] {
        self.child_items.as_deref().unwrap_or(&[])
    }

    pub fn has_children(&self) -> bool {
        !self.children().is_empty()
    }

    /// True if `id` is this node or one of its descendants.
    pub fn subtree_contains(&self, id: &str) -> bool {
        self.id == id || self.children().iter().any(|child| child.subtree_contains(id))
    }
}

/// A source for [`OrderedTree::move_before`] / [`OrderedTree::move_after`]:
/// either an id to look up, or a node value to place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeRef<D> {
    Id(String),
    Node(TreeNode<D>),
}

impl<D> From<&str> for NodeRef<D> {
    fn from(id: &str) -> Self {
        Self::Id(id.to_owned())
    }
}

impl<D> From<String> for NodeRef<D> {
    fn from(id: String) -> Self {
        Self::Id(id)
    }
}

impl<D> From<&String> for NodeRef<D> {
    fn from(id: &String) -> Self {
        Self::Id(id.clone())
    }
}

impl<D> From<TreeNode<D>> for NodeRef<D> {
    fn from(node: TreeNode<D>) -> Self {
        Self::Node(node)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Before,
    After,
}

/// An immutable forest of [`TreeNode`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderedTree<D> {
    nodes: Arc<Vec<TreeNode<D>>>,
}

impl<D> Default for OrderedTree<D> {
    fn default() -> Self {
        Self { nodes: Arc::new(Vec::new()) }
    }
}

impl<D: Clone> OrderedTree<D> {
    pub fn new(nodes: Vec<TreeNode<D>>) -> Self {
        Self { nodes: Arc::new(nodes) }
    }

    /// Top-level nodes, borrowed.
    pub fn nodes(&self) -> &[TreeNode<D>] {
        &self.nodes
    }

    /// Deep copy of the top-level nodes.
    pub fn to_vec(&self) -> Vec<TreeNode<D>> {
        self.nodes.as_ref().clone()
    }

    pub fn into_vec(self) -> Vec<TreeNode<D>> {
        Arc::try_unwrap(self.nodes).unwrap_or_else(|shared| shared.as_ref().clone())
    }

    /// Total node count at every depth.
    pub fn len(&self) -> usize {
        count(&self.nodes)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.find_node_by_id(id).is_some()
    }

    /// First node in depth-first pre-order that satisfies `predicate`.
    pub fn find_node<P>(&self, mut predicate: P) -> Option<&TreeNode<D>>
    where
        P: FnMut(&TreeNode<D>) -> bool,
    {
        find_where(&self.nodes, &mut predicate)
    }

    pub fn find_node_by_id(&self, id: &str) -> Option<&TreeNode<D>> {
        self.find_node(|node| node.id == id)
    }

    /// Every node satisfying `predicate`, parents before descendants.
    pub fn filter_nodes<P>(&self, mut predicate: P) -> Vec<&TreeNode<D>>
    where
        P: FnMut(&TreeNode<D>) -> bool,
    {
        let mut out = Vec::new();
        collect_where(&self.nodes, &mut predicate, &mut out);
        out
    }

    /// A node without children (or with an empty child list). Absent ids are not leaves.
    pub fn is_leaf(&self, id: &str) -> bool {
        self.find_node_by_id(id).is_some_and(|node| !node.has_children())
    }

    /// Apply `update` to a private copy of the node with `id`.
    pub fn update_node<F>(&self, id: &str, update: F) -> Self
    where
        F: FnOnce(&mut TreeNode<D>),
    {
        let mut nodes = self.to_vec();
        if let Some(node) = find_mut(&mut nodes, id) {
            update(node);
        }
        Self::new(nodes)
    }

    /// Detach the node with `id` together with its subtree.
    pub fn remove_node(&self, id: &str) -> Self {
        let mut nodes = self.to_vec();
        remove_in(&mut nodes, id);
        Self::new(nodes)
    }

    pub fn insert_before(&self, id: &str, node: TreeNode<D>) -> Self {
        self.insert_adjacent(id, node, Side::Before)
    }

    pub fn insert_after(&self, id: &str, node: TreeNode<D>) -> Self {
        self.insert_adjacent(id, node, Side::After)
    }

    /// Insert `node` as the first top-level entry.
    pub fn prepend(&self, node: TreeNode<D>) -> Self {
        let mut nodes = Vec::with_capacity(self.nodes.len() + 1);
        nodes.push(node);
        nodes.extend(self.nodes.iter().cloned());
        Self::new(nodes)
    }

    /// Move each source right before `anchor_id`, in iteration order.
    pub fn move_before<I, R>(&self, anchor_id: &str, sources: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<NodeRef<D>>,
    {
        self.move_adjacent(anchor_id, sources, Side::Before)
    }

    /// Move each source right after `anchor_id`, in iteration order.
    pub fn move_after<I, R>(&self, anchor_id: &str, sources: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<NodeRef<D>>,
    {
        self.move_adjacent(anchor_id, sources, Side::After)
    }

    /// Re-parent `id` as the last child of `target_id`.
    ///
    /// No-op when either id is missing or when the target sits inside the
    /// moved subtree. Whether the target may hold children is the caller's
    /// call to make.
    pub fn move_on(&self, id: &str, target_id: &str) -> Self {
        let Some(moving) = self.find_node_by_id(id) else {
            return self.clone();
        };
        if !self.contains(target_id) || moving.subtree_contains(target_id) {
            return self.clone();
        }

        let mut nodes = self.to_vec();
        let Some(moved) = remove_in(&mut nodes, id) else {
            return self.clone();
        };
        if let Some(target) = find_mut(&mut nodes, target_id) {
            target.child_items.get_or_insert_with(Vec::new).push(moved);
        }
        Self::new(nodes)
    }

    /// Every node with its children stripped, in pre-order.
    pub fn flatten(&self) -> Vec<TreeNode<D>> {
        let mut out = Vec::with_capacity(self.len());
        flatten_into(&self.nodes, &mut out);
        out
    }

    fn insert_adjacent(&self, id: &str, node: TreeNode<D>, side: Side) -> Self {
        let mut nodes = self.to_vec();
        let _ = insert_at(&mut nodes, id, node, side);
        Self::new(nodes)
    }

    fn move_adjacent<I, R>(&self, anchor_id: &str, sources: I, side: Side) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<NodeRef<D>>,
    {
        if !self.contains(anchor_id) {
            return self.clone();
        }

        let mut nodes = self.to_vec();
        for source in sources {
            // Ids resolve against the draft so that a parent moved after its
            // own (already moved) child does not carry a stale copy of it.
            let node = match source.into() {
                NodeRef::Id(id) => match find_where(&nodes, &mut |n: &TreeNode<D>| n.id == id) {
                    Some(node) => node.clone(),
                    None => continue,
                },
                NodeRef::Node(node) => node,
            };

            if node.subtree_contains(anchor_id) {
                continue;
            }
            if let Some(current) = find_where(&nodes, &mut |n: &TreeNode<D>| n.id == node.id) {
                if current.subtree_contains(anchor_id) {
                    continue;
                }
            }

            remove_in(&mut nodes, &node.id);
            if let Err(node) = insert_at(&mut nodes, anchor_id, node, side) {
                tracing::warn!(node_id = %node.id, anchor_id, "move anchor vanished mid-move");
            }
        }
        Self::new(nodes)
    }
}

impl<D: Clone> From<Vec<TreeNode<D>>> for OrderedTree<D> {
    fn from(nodes: Vec<TreeNode<D>>) -> Self {
        Self::new(nodes)
    }
}

fn count<D>(nodes: &[TreeNode<D>]) -> usize {
    nodes.iter().map(|node| 1 + count(node.children())).sum()
}

fn find_where<'a, D, P>(nodes: &'a [TreeNode<D>], predicate: &mut P) -> Option<&'a TreeNode<D>>
where
    P: FnMut(&TreeNode<D>) -> bool,
{
    for node in nodes {
        if predicate(node) {
            return Some(node);
        }
        if let Some(found) = find_where(node.children(), predicate) {
            return Some(found);
        }
    }
    None
}

fn collect_where<'a, D, P>(nodes: &'a [TreeNode<D>], predicate: &mut P, out: &mut Vec<&'a TreeNode<D>>)
where
    P: FnMut(&TreeNode<D>) -> bool,
{
    for node in nodes {
        if predicate(node) {
            out.push(node);
        }
        collect_where(node.children(), predicate, out);
    }
}

fn find_mut<'a, D>(nodes: &'a mut [TreeNode<D>], id: &str) -> Option<&'a mut TreeNode<D>> {
    for node in nodes.iter_mut() {
        if node.id == id {
            return Some(node);
        }
        if let Some(children) = node.child_items.as_deref_mut() {
            if let Some(found) = find_mut(children, id) {
                return Some(found);
            }
        }
    }
    None
}

fn remove_in<D>(nodes: &mut Vec<TreeNode<D>>, id: &str) -> Option<TreeNode<D>> {
    if let Some(index) = nodes.iter().position(|node| node.id == id) {
        return Some(nodes.remove(index));
    }
    nodes
        .iter_mut()
        .filter_map(|node| node.child_items.as_mut())
        .find_map(|children| remove_in(children, id))
}

/// Splice `node` next to `anchor_id`. Hands the node back if the anchor is missing.
fn insert_at<D>(
    nodes: &mut Vec<TreeNode<D>>,
    anchor_id: &str,
    node: TreeNode<D>,
    side: Side,
) -> Result<(), TreeNode<D>> {
    if let Some(index) = nodes.iter().position(|candidate| candidate.id == anchor_id) {
        let at = match side {
            Side::Before => index,
            Side::After => index + 1,
        };
        nodes.insert(at, node);
        return Ok(());
    }

    let mut node = node;
    for parent in nodes.iter_mut() {
        if let Some(children) = parent.child_items.as_mut() {
            match insert_at(children, anchor_id, node, side) {
                Ok(()) => return Ok(()),
                Err(returned) => node = returned,
            }
        }
    }
    Err(node)
}

fn flatten_into<D: Clone>(nodes: &[TreeNode<D>], out: &mut Vec<TreeNode<D>>) {
    for node in nodes {
        out.push(TreeNode { id: node.id.clone(), data: node.data.clone(), child_items: None });
        flatten_into(node.children(), out);
    }
}
