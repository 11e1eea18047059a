//! Red-black interval tree.
//!
//! Nodes live in an arena and are addressed by index, so rotations only swap
//! indices. Every node carries `max_edge`, the highest `high` endpoint found in
//! its subtree. Insertion refreshes it on the way up and every rotation
//! recomputes it for the two nodes whose subtrees changed, lower node first.

use super::range::{Endpoint, Range};

type NodeId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Red,
    Black,
}

#[derive(Debug, Clone)]
struct Node<K, V> {
    range: Range<K>,
    max_edge: K,
    value: V,
    color: Color,
    parent: Option<NodeId>,
    left: Option<NodeId>,
    right: Option<NodeId>,
}

#[derive(Debug, Clone)]
pub struct IntervalTree<K, V> {
    nodes: Vec<Node<K, V>>,
    root: Option<NodeId>,
}

impl<K, V> Default for IntervalTree<K, V> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            root: None,
        }
    }
}

impl<K: Endpoint, V> IntervalTree<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.root = None;
    }

    /// Highest endpoint stored in the tree.
    pub fn max_edge(&self) -> Option<K> {
        self.root.map(|root| self.nodes[root].max_edge)
    }

    /// Inserts `range` keyed by its low endpoint. Equal keys are kept side by
    /// side; nothing is deduplicated.
    pub fn insert(&mut self, range: Range<K>, value: V) {
        let id = self.nodes.len();

        let mut parent = None;
        let mut cursor = self.root;
        let mut go_left = false;
        while let Some(at) = cursor {
            parent = Some(at);
            go_left = range.low() < self.nodes[at].range.low();
            cursor = if go_left {
                self.nodes[at].left
            } else {
                self.nodes[at].right
            };
        }

        self.nodes.push(Node {
            range,
            max_edge: range.high(),
            value,
            color: Color::Red,
            parent,
            left: None,
            right: None,
        });

        match parent {
            None => self.root = Some(id),
            Some(p) if go_left => self.nodes[p].left = Some(id),
            Some(p) => self.nodes[p].right = Some(id),
        }

        self.propagate_max_edge(parent);
        self.rebalance_after_insert(id);
    }

    /// First stored range containing `point`.
    pub fn find_point(&self, point: K) -> Option<(&Range<K>, &V)> {
        self.find_interval(&Range::point(point))
    }

    /// First stored range overlapping `query`, or `None`.
    pub fn find_interval(&self, query: &Range<K>) -> Option<(&Range<K>, &V)> {
        let mut found = None;
        self.walk_overlaps(query, |id| {
            found = Some(id);
            false
        });
        found.map(|id| (&self.nodes[id].range, &self.nodes[id].value))
    }

    /// Every stored range overlapping `query`, ordered by low endpoint.
    pub fn find_all(&self, query: &Range<K>) -> Vec<(&Range<K>, &V)> {
        let mut ids = Vec::new();
        self.walk_overlaps(query, |id| {
            ids.push(id);
            true
        });
        ids.sort_by_key(|&id| self.nodes[id].range.low());
        ids.into_iter()
            .map(|id| (&self.nodes[id].range, &self.nodes[id].value))
            .collect()
    }

    /// In-order traversal.
    pub fn iter(&self) -> Iter<'_, K, V> {
        let mut iter = Iter {
            tree: self,
            stack: Vec::new(),
        };
        iter.push_left_spine(self.root);
        iter
    }

    /// Visits overlapping nodes until `visit` returns false.
    fn walk_overlaps<F>(&self, query: &Range<K>, mut visit: F)
    where
        F: FnMut(NodeId) -> bool,
    {
        let Some(root) = self.root else {
            return;
        };

        let mut stack = vec![root];
        while let Some(at) = stack.pop() {
            let node = &self.nodes[at];
            // nothing below reaches the query
            if query.low() > node.max_edge {
                continue;
            }
            if node.range.overlaps(query) && !visit(at) {
                return;
            }
            // right subtree keys are >= this key
            if let Some(right) = node.right
                && node.range.low() <= query.high()
            {
                stack.push(right);
            }
            if let Some(left) = node.left {
                stack.push(left);
            }
        }
    }

    fn subtree_edge(&self, at: NodeId) -> K {
        let node = &self.nodes[at];
        let mut edge = node.range.high();
        if let Some(left) = node.left {
            edge = edge.max(self.nodes[left].max_edge);
        }
        if let Some(right) = node.right {
            edge = edge.max(self.nodes[right].max_edge);
        }
        edge
    }

    fn propagate_max_edge(&mut self, mut cursor: Option<NodeId>) {
        while let Some(at) = cursor {
            let edge = self.subtree_edge(at);
            if edge == self.nodes[at].max_edge {
                break;
            }
            self.nodes[at].max_edge = edge;
            cursor = self.nodes[at].parent;
        }
    }

    fn is_red(&self, id: Option<NodeId>) -> bool {
        id.is_some_and(|id| self.nodes[id].color == Color::Red)
    }

    fn replace_child(&mut self, parent: Option<NodeId>, old: NodeId, new: NodeId) {
        match parent {
            None => self.root = Some(new),
            Some(p) if self.nodes[p].left == Some(old) => self.nodes[p].left = Some(new),
            Some(p) => self.nodes[p].right = Some(new),
        }
    }

    fn rotate_left(&mut self, x: NodeId) {
        let Some(y) = self.nodes[x].right else {
            return;
        };
        let inner = self.nodes[y].left;
        self.nodes[x].right = inner;
        if let Some(inner) = inner {
            self.nodes[inner].parent = Some(x);
        }
        let parent = self.nodes[x].parent;
        self.nodes[y].parent = parent;
        self.replace_child(parent, x, y);
        self.nodes[y].left = Some(x);
        self.nodes[x].parent = Some(y);

        self.nodes[x].max_edge = self.subtree_edge(x);
        self.nodes[y].max_edge = self.subtree_edge(y);
    }

    fn rotate_right(&mut self, x: NodeId) {
        let Some(y) = self.nodes[x].left else {
            return;
        };
        let inner = self.nodes[y].right;
        self.nodes[x].left = inner;
        if let Some(inner) = inner {
            self.nodes[inner].parent = Some(x);
        }
        let parent = self.nodes[x].parent;
        self.nodes[y].parent = parent;
        self.replace_child(parent, x, y);
        self.nodes[y].right = Some(x);
        self.nodes[x].parent = Some(y);

        self.nodes[x].max_edge = self.subtree_edge(x);
        self.nodes[y].max_edge = self.subtree_edge(y);
    }

    fn rebalance_after_insert(&mut self, mut node: NodeId) {
        while let Some(parent) = self.nodes[node].parent
            && self.nodes[parent].color == Color::Red
        {
            // a red node is never the root, so the grandparent exists
            let Some(grand) = self.nodes[parent].parent else {
                break;
            };
            let parent_is_left = self.nodes[grand].left == Some(parent);
            let uncle = if parent_is_left {
                self.nodes[grand].right
            } else {
                self.nodes[grand].left
            };

            if self.is_red(uncle) {
                self.nodes[parent].color = Color::Black;
                if let Some(uncle) = uncle {
                    self.nodes[uncle].color = Color::Black;
                }
                self.nodes[grand].color = Color::Red;
                node = grand;
                continue;
            }

            let mut pivot = parent;
            if parent_is_left && self.nodes[parent].right == Some(node) {
                self.rotate_left(parent);
                pivot = node;
            } else if !parent_is_left && self.nodes[parent].left == Some(node) {
                self.rotate_right(parent);
                pivot = node;
            }

            self.nodes[pivot].color = Color::Black;
            self.nodes[grand].color = Color::Red;
            if parent_is_left {
                self.rotate_right(grand);
            } else {
                self.rotate_left(grand);
            }
            break;
        }

        if let Some(root) = self.root {
            self.nodes[root].color = Color::Black;
        }
    }
}

pub struct Iter<'a, K, V> {
    tree: &'a IntervalTree<K, V>,
    stack: Vec<NodeId>,
}

impl<K, V> Iter<'_, K, V> {
    fn push_left_spine(&mut self, mut cursor: Option<NodeId>) {
        while let Some(at) = cursor {
            self.stack.push(at);
            cursor = self.tree.nodes[at].left;
        }
    }
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a Range<K>, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let at = self.stack.pop()?;
        let node = &self.tree.nodes[at];
        self.push_left_spine(node.right);
        Some((&node.range, &node.value))
    }
}
