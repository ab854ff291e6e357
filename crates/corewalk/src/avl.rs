//! AVL tree reader.
//!
//! Trees are point-lookup only: a search descends from the root using a
//! caller-supplied three-way comparator. Child links are tagged
//! self-relative words; the balance factor lives in the low bits.

use crate::algorithm::version::DEFAULT_VM_MINOR;
use crate::algorithm::{Algorithm, AlgorithmId};
use crate::error::{WalkError, WalkResult};
use crate::session::Session;
use crate::tagged::{resolve_tagged_relative, AVL_BALANCE_MASK};
use std::cmp::Ordering;
use std::collections::HashSet;
use tracing::debug;

const TREE_TYPE: &str = "J9AVLTree";
const NODE_TYPE: &str = "J9AVLTreeNode";

/// Deepest descent accepted before the tree is declared cyclic.
pub const MAX_SEARCH_DEPTH: usize = 256;

/// Known AVL tree layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvlTreeAlgorithm {
    V0,
}

impl AvlTreeAlgorithm {
    pub const CANDIDATES: [AvlTreeAlgorithm; 1] = [AvlTreeAlgorithm::V0];
}

impl Algorithm for AvlTreeAlgorithm {
    fn vm_minor(&self) -> u32 {
        DEFAULT_VM_MINOR
    }

    fn algorithm_version(&self) -> u32 {
        match self {
            AvlTreeAlgorithm::V0 => 0,
        }
    }
}

/// Snapshot of a tree header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvlTree {
    pub address: u64,
    /// Resolved root node, 0 for an empty tree.
    pub root: u64,
}

/// Reads AVL trees from a session's target.
pub struct AvlTreeReader<'s> {
    session: &'s Session,
    algorithm: AvlTreeAlgorithm,
    root_offset: u64,
    left_offset: u64,
    right_offset: u64,
    node_header_size: u64,
}

impl<'s> AvlTreeReader<'s> {
    pub fn new(session: &'s Session) -> WalkResult<Self> {
        let algorithm = session.pick(AlgorithmId::AvlTree, AvlTreeAlgorithm::CANDIDATES)?;
        Ok(AvlTreeReader {
            session,
            algorithm,
            root_offset: session.field_offset(TREE_TYPE, "rootNode")? as u64,
            left_offset: session.field_offset(NODE_TYPE, "leftChild")? as u64,
            right_offset: session.field_offset(NODE_TYPE, "rightChild")? as u64,
            node_header_size: session.type_size(NODE_TYPE)? as u64,
        })
    }

    pub fn algorithm(&self) -> AvlTreeAlgorithm {
        self.algorithm
    }

    /// Read the tree header at `address`. The root is a plain pointer.
    pub fn tree(&self, address: u64) -> WalkResult<AvlTree> {
        let root = self
            .session
            .read_pointer(address.wrapping_add(self.root_offset))
            .map_err(|e| e.context(TREE_TYPE))?;
        Ok(AvlTree { address, root })
    }

    /// Address of the element stored in `node`.
    pub fn node_data(&self, node: u64) -> u64 {
        node.wrapping_add(self.node_header_size)
    }

    /// Resolved `(left, right)` children of `node`; 0 means no child.
    pub fn children(&self, node: u64) -> WalkResult<(u64, u64)> {
        let left = self
            .read_link(node.wrapping_add(self.left_offset))
            .map_err(|e| e.context(NODE_TYPE))?;
        let right = self
            .read_link(node.wrapping_add(self.right_offset))
            .map_err(|e| e.context(NODE_TYPE))?;
        Ok((left, right))
    }

    fn read_link(&self, storage: u64) -> WalkResult<u64> {
        let stored = self.session.read_signed_pointer(storage)?;
        Ok(resolve_tagged_relative(stored, AVL_BALANCE_MASK, storage))
    }

    /// Binary search for `key`.
    ///
    /// `compare(tree, key, node)` orders `key` against the element held in
    /// `node`: `Less` descends left, `Greater` right, `Equal` is a hit.
    /// Any failed read or comparator error aborts the search.
    pub fn search<K: ?Sized, F>(
        &self,
        tree: &AvlTree,
        key: &K,
        mut compare: F,
    ) -> WalkResult<Option<u64>>
    where
        F: FnMut(&AvlTree, &K, u64) -> WalkResult<Ordering>,
    {
        let mut node = tree.root;
        let mut depth = 0;
        while node != 0 {
            if depth == MAX_SEARCH_DEPTH {
                return Err(WalkError::malformed(
                    TREE_TYPE,
                    tree.address,
                    format!("search deeper than {} nodes", MAX_SEARCH_DEPTH),
                ));
            }
            depth += 1;

            match compare(tree, key, node)? {
                Ordering::Equal => return Ok(Some(node)),
                Ordering::Less => node = self.children(node)?.0,
                Ordering::Greater => node = self.children(node)?.1,
            }
        }
        debug!("AVL search in tree {:#x} missed after {} nodes", tree.address, depth);
        Ok(None)
    }

    /// Depth-first walk returning the first node accepted by `predicate`.
    ///
    /// Used when only an equality test is available and the comparator
    /// cannot pick a direction. Nodes already visited are not revisited.
    pub fn find_first<F>(&self, tree: &AvlTree, mut predicate: F) -> WalkResult<Option<u64>>
    where
        F: FnMut(u64) -> WalkResult<bool>,
    {
        let mut stack = vec![tree.root];
        let mut visited = HashSet::new();
        while let Some(node) = stack.pop() {
            if node == 0 || !visited.insert(node) {
                continue;
            }
            if predicate(node)? {
                return Ok(Some(node));
            }
            let (left, right) = self.children(node)?;
            stack.push(right);
            stack.push(left);
        }
        Ok(None)
    }
}
