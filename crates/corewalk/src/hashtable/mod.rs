//! Hash table reader.
//!
//! A table is backed by one of three physical forms, decided once from its
//! header:
//!
//! * space-optimized: one open array of `tableSize` pointer-sized slots with
//!   linear probing;
//! * list-only: buckets chain list nodes drawn from a list-node pool;
//! * list-and-tree: as list-only, but a bucket whose word carries
//!   [`AVL_TREE_TAG_BIT`] points at an AVL tree whose nodes come from a
//!   second pool.
//!
//! Callers supply a decoder from element address to `T`, a hash, and
//! either an equality or a three-way comparison over decoded elements.

mod iter;

pub use iter::HashTableIter;

use crate::algorithm::version::DEFAULT_VM_MINOR;
use crate::algorithm::{Algorithm, AlgorithmId};
use crate::avl::{AvlTree, AvlTreeReader};
use crate::corrupt::{raise, Severity};
use crate::error::{WalkError, WalkResult};
use crate::pool::PoolReader;
use crate::session::Session;
use crate::tagged::{has_tag, strip_tag, AVL_TREE_TAG_BIT};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use tracing::debug;

const TABLE_TYPE: &str = "J9HashTable";

/// Header flag: the table is a single open array.
pub const HASH_TABLE_ALLOW_SIZE_OPTIMIZATION: u32 = 0x4;
/// Header flag: overflowing buckets are converted to AVL trees.
pub const HASH_TABLE_COLLISION_RESISTANT: u32 = 0x8;

/// Known hash table layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashTableAlgorithm {
    /// Backing form inferred from which pools are present.
    V0,
    /// Backing form inferred from the pools and confirmed by the flags.
    V1,
}

impl HashTableAlgorithm {
    pub const CANDIDATES: [HashTableAlgorithm; 2] = [HashTableAlgorithm::V0, HashTableAlgorithm::V1];
}

impl Algorithm for HashTableAlgorithm {
    fn vm_minor(&self) -> u32 {
        DEFAULT_VM_MINOR
    }

    fn algorithm_version(&self) -> u32 {
        match self {
            HashTableAlgorithm::V0 => 0,
            HashTableAlgorithm::V1 => 1,
        }
    }
}

/// Physical representation of one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackingStore {
    SpaceOptimized,
    ListOnly,
    ListAndTree,
}

/// Where a slot's element lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementStorage {
    /// The slot or node holds the element itself.
    Inline,
    /// The slot or node holds a pointer to the element.
    Boxed,
}

/// Table header snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashTableHeader {
    pub address: u64,
    pub table_size: u32,
    pub number_of_nodes: u32,
    pub number_of_tree_nodes: u32,
    pub flags: u32,
    pub entry_size: u64,
    pub list_node_size: u64,
    pub tree_node_size: u64,
    pub nodes: u64,
    pub list_node_pool: u64,
    pub tree_node_pool: u64,
    pub tree_pool: u64,
}

impl HashTableHeader {
    fn read(session: &Session, address: u64) -> WalkResult<Self> {
        let r = session.struct_reader(address, TABLE_TYPE)?;
        Ok(HashTableHeader {
            address,
            table_size: r.read_u32("tableSize")?,
            number_of_nodes: r.read_u32("numberOfNodes")?,
            number_of_tree_nodes: r.read_u32("numberOfTreeNodes")?,
            flags: r.read_u32("flags")?,
            entry_size: r.read_udata("entrySize")?,
            list_node_size: r.read_udata("listNodeSize")?,
            tree_node_size: r.read_udata("treeNodeSize")?,
            nodes: r.read_pointer("nodes")?,
            list_node_pool: r.read_pointer("listNodePool")?,
            tree_node_pool: r.read_pointer("treeNodePool")?,
            tree_pool: r.read_pointer("treePool")?,
        })
    }

    /// The backing form implied by which pools are present.
    fn inferred_backing(&self) -> WalkResult<BackingStore> {
        match (self.list_node_pool, self.tree_node_pool) {
            (0, 0) => Ok(BackingStore::SpaceOptimized),
            (0, _) => Err(WalkError::malformed(
                TABLE_TYPE,
                self.address,
                "tree node pool without a list node pool",
            )),
            (_, 0) => Ok(BackingStore::ListOnly),
            (_, _) => Ok(BackingStore::ListAndTree),
        }
    }

    /// Decide the backing form, validating the header against it.
    fn backing(&self, algorithm: HashTableAlgorithm, pointer_size: usize) -> WalkResult<BackingStore> {
        let backing = self.inferred_backing()?;

        if algorithm == HashTableAlgorithm::V1 {
            let size_optimized = self.flags & HASH_TABLE_ALLOW_SIZE_OPTIMIZATION != 0;
            let collision_resistant = self.flags & HASH_TABLE_COLLISION_RESISTANT != 0;
            if size_optimized != (backing == BackingStore::SpaceOptimized)
                || collision_resistant != (backing == BackingStore::ListAndTree)
            {
                return Err(WalkError::malformed(
                    TABLE_TYPE,
                    self.address,
                    format!("flags {:#x} disagree with {:?} pools", self.flags, backing),
                ));
            }
        }

        if self.table_size == 0 || self.nodes == 0 {
            return Err(WalkError::malformed(
                TABLE_TYPE,
                self.address,
                format!("{} buckets at {:#x}", self.table_size, self.nodes),
            ));
        }
        if backing == BackingStore::SpaceOptimized && self.entry_size != pointer_size as u64 {
            return Err(WalkError::malformed(
                TABLE_TYPE,
                self.address,
                format!("open array entry size {} is not a pointer", self.entry_size),
            ));
        }
        if backing != BackingStore::SpaceOptimized && self.list_node_size < pointer_size as u64 {
            return Err(WalkError::malformed(
                TABLE_TYPE,
                self.address,
                format!("list node size {} leaves no next pointer", self.list_node_size),
            ));
        }
        Ok(backing)
    }
}

type Decoder<'s, T> = Box<dyn Fn(&Session, u64) -> WalkResult<T> + 's>;
type HashFn<'s, T> = Box<dyn Fn(&T) -> WalkResult<u64> + 's>;

/// How a lookup recognizes its entry.
pub enum Matcher<'s, T> {
    Equal(Box<dyn Fn(&T, &T) -> WalkResult<bool> + 's>),
    Compare(Box<dyn Fn(&T, &T) -> WalkResult<Ordering> + 's>),
}

impl<T> fmt::Debug for Matcher<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Equal(_) => f.write_str("Matcher::Equal"),
            Matcher::Compare(_) => f.write_str("Matcher::Compare"),
        }
    }
}

/// Reads one hash table.
pub struct HashTableReader<'s, T> {
    session: &'s Session,
    algorithm: HashTableAlgorithm,
    header: HashTableHeader,
    backing: BackingStore,
    storage: ElementStorage,
    decode: Decoder<'s, T>,
    hash: HashFn<'s, T>,
    matcher: Matcher<'s, T>,
    list_pool: Option<PoolReader<'s>>,
    tree_node_pool: Option<PoolReader<'s>>,
    avl: Option<AvlTreeReader<'s>>,
}

impl<'s, T> HashTableReader<'s, T> {
    /// Reader whose lookups use an equality test.
    pub fn with_equal<D, H, E>(
        session: &'s Session,
        address: u64,
        storage: ElementStorage,
        decode: D,
        hash: H,
        equal: E,
    ) -> WalkResult<Self>
    where
        D: Fn(&Session, u64) -> WalkResult<T> + 's,
        H: Fn(&T) -> WalkResult<u64> + 's,
        E: Fn(&T, &T) -> WalkResult<bool> + 's,
    {
        Self::open(
            session,
            address,
            storage,
            Box::new(decode),
            Box::new(hash),
            Matcher::Equal(Box::new(equal)),
        )
    }

    /// Reader whose lookups use a three-way comparison.
    pub fn with_compare<D, H, C>(
        session: &'s Session,
        address: u64,
        storage: ElementStorage,
        decode: D,
        hash: H,
        compare: C,
    ) -> WalkResult<Self>
    where
        D: Fn(&Session, u64) -> WalkResult<T> + 's,
        H: Fn(&T) -> WalkResult<u64> + 's,
        C: Fn(&T, &T) -> WalkResult<Ordering> + 's,
    {
        Self::open(
            session,
            address,
            storage,
            Box::new(decode),
            Box::new(hash),
            Matcher::Compare(Box::new(compare)),
        )
    }

    fn open(
        session: &'s Session,
        address: u64,
        storage: ElementStorage,
        decode: Decoder<'s, T>,
        hash: HashFn<'s, T>,
        matcher: Matcher<'s, T>,
    ) -> WalkResult<Self> {
        let algorithm = session.pick(AlgorithmId::HashTable, HashTableAlgorithm::CANDIDATES)?;

        let read = || -> WalkResult<(HashTableHeader, BackingStore)> {
            let header = HashTableHeader::read(session, address).map_err(|e| e.context(TABLE_TYPE))?;
            let backing = header.backing(algorithm, session.pointer_size())?;
            Ok((header, backing))
        };
        let (header, backing) = match read() {
            Ok(found) => found,
            Err(e) => {
                if let Some(copy) = e.duplicate() {
                    raise(
                        session.reporter(),
                        format!("cannot use hash table at {:#x}", address),
                        copy,
                        Severity::Fatal,
                    );
                }
                return Err(e);
            }
        };
        debug!(
            "Hash table {:#x} ({:?}): {:?}, {} buckets, {} nodes",
            address, algorithm, backing, header.table_size, header.number_of_nodes
        );

        let (list_pool, tree_node_pool, avl) = match backing {
            BackingStore::SpaceOptimized => (None, None, None),
            BackingStore::ListOnly => (Some(PoolReader::new(session, header.list_node_pool)?), None, None),
            BackingStore::ListAndTree => (
                Some(PoolReader::new(session, header.list_node_pool)?),
                Some(PoolReader::new(session, header.tree_node_pool)?),
                Some(AvlTreeReader::new(session)?),
            ),
        };

        Ok(HashTableReader {
            session,
            algorithm,
            header,
            backing,
            storage,
            decode,
            hash,
            matcher,
            list_pool,
            tree_node_pool,
            avl,
        })
    }

    pub fn algorithm(&self) -> HashTableAlgorithm {
        self.algorithm
    }

    pub fn header(&self) -> &HashTableHeader {
        &self.header
    }

    pub fn backing(&self) -> BackingStore {
        self.backing
    }

    /// Live element count recorded in the header, tree nodes included.
    pub fn num_elements(&self) -> u64 {
        self.header.number_of_nodes as u64
    }

    /// The stored element equal to `entry`.
    pub fn find(&self, entry: &T) -> WalkResult<Option<T>> {
        Ok(self.lookup(entry)?.map(|(_, element)| element))
    }

    /// Address of the stored element equal to `entry`.
    pub fn find_address(&self, entry: &T) -> WalkResult<Option<u64>> {
        Ok(self.lookup(entry)?.map(|(address, _)| address))
    }

    /// Every element with its address, in storage order.
    pub fn entries(&self) -> HashTableIter<'_, 's, T> {
        HashTableIter::new(self)
    }

    /// Every element, in storage order.
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        self.entries().map(|(_, element)| element)
    }

    fn pointer_size(&self) -> u64 {
        self.session.pointer_size() as u64
    }

    fn report(&self, message: String, error: WalkError) {
        raise(self.session.reporter(), message, error, Severity::Recoverable);
    }

    fn bucket_address(&self, bucket: u64) -> u64 {
        self.header.nodes.wrapping_add(bucket * self.pointer_size())
    }

    /// Decode the element held at `holder`, following one hop when boxed.
    /// A boxed null is an empty holder.
    fn load(&self, holder: u64) -> WalkResult<Option<(u64, T)>> {
        let address = match self.storage {
            ElementStorage::Inline => holder,
            ElementStorage::Boxed => self.session.read_pointer(holder)?,
        };
        if address == 0 {
            return Ok(None);
        }
        Ok(Some((address, (self.decode)(self.session, address)?)))
    }

    /// Load the candidate at `holder` and test it against `entry`.
    /// Failures are reported and count as a mismatch.
    fn probe(&self, entry: &T, holder: u64) -> Option<(u64, T)> {
        let candidate = match self.load(holder) {
            Ok(Some(candidate)) => candidate,
            Ok(None) => return None,
            Err(e) => {
                self.report(format!("skipping unreadable element at {:#x}", holder), e);
                return None;
            }
        };
        let matched = match &self.matcher {
            Matcher::Equal(equal) => equal(entry, &candidate.1),
            Matcher::Compare(compare) => compare(entry, &candidate.1).map(Ordering::is_eq),
        };
        match matched {
            Ok(true) => Some(candidate),
            Ok(false) => None,
            Err(e) => {
                self.report(format!("cannot compare element at {:#x}", candidate.0), e);
                None
            }
        }
    }

    fn lookup(&self, entry: &T) -> WalkResult<Option<(u64, T)>> {
        let bucket = (self.hash)(entry)? % self.header.table_size as u64;
        match self.backing {
            BackingStore::SpaceOptimized => Ok(self.probe_open_array(entry, bucket)),
            BackingStore::ListOnly | BackingStore::ListAndTree => Ok(self.search_bucket(entry, bucket)),
        }
    }

    /// Linear probe from `start`, wrapping once around the array.
    fn probe_open_array(&self, entry: &T, start: u64) -> Option<(u64, T)> {
        let size = self.header.table_size as u64;
        for step in 0..size {
            let slot = self.bucket_address((start + step) % size);
            match self.session.read_pointer(slot) {
                Ok(0) => continue,
                Ok(_) => {}
                Err(e) => {
                    self.report(format!("skipping unreadable slot at {:#x}", slot), e);
                    continue;
                }
            }
            if let Some(hit) = self.probe(entry, slot) {
                return Some(hit);
            }
        }
        None
    }

    fn search_bucket(&self, entry: &T, bucket: u64) -> Option<(u64, T)> {
        let bucket_addr = self.bucket_address(bucket);
        let head = match self.session.read_pointer(bucket_addr) {
            Ok(head) => head,
            Err(e) => {
                self.report(format!("skipping unreadable bucket {}", bucket), e);
                return None;
            }
        };
        if head == 0 {
            return None;
        }
        if !has_tag(head, AVL_TREE_TAG_BIT) {
            return self.search_list(entry, head);
        }

        let Some(avl) = &self.avl else {
            self.report(
                format!("tree-tagged bucket {} in a table without trees", bucket),
                WalkError::malformed(TABLE_TYPE, self.header.address, format!("bucket word {:#x}", head)),
            );
            return None;
        };
        match avl.tree(strip_tag(head, AVL_TREE_TAG_BIT)) {
            Ok(tree) => self.search_tree(avl, &tree, entry),
            Err(e) => {
                self.report(format!("skipping unreadable tree of bucket {}", bucket), e);
                None
            }
        }
    }

    fn search_list(&self, entry: &T, head: u64) -> Option<(u64, T)> {
        let next_offset = self.header.list_node_size - self.pointer_size();
        let mut visited = HashSet::new();
        let mut node = head;
        while node != 0 {
            if !visited.insert(node) {
                self.report(
                    format!("bucket chain loops at {:#x}", node),
                    WalkError::malformed(TABLE_TYPE, self.header.address, "cyclic bucket chain"),
                );
                return None;
            }
            if let Some(hit) = self.probe(entry, node) {
                return Some(hit);
            }
            node = match self.session.read_pointer(node.wrapping_add(next_offset)) {
                Ok(next) => next,
                Err(e) => {
                    self.report(format!("bucket chain broken at {:#x}", node), e);
                    return None;
                }
            };
        }
        None
    }

    fn search_tree(&self, avl: &AvlTreeReader<'s>, tree: &AvlTree, entry: &T) -> Option<(u64, T)> {
        let mut hit = None;
        let result = match &self.matcher {
            Matcher::Compare(compare) => avl.search(tree, entry, |_, key, node| {
                let holder = avl.node_data(node);
                let Some((address, candidate)) = self.load(holder)? else {
                    return Err(WalkError::malformed("J9AVLTreeNode", node, "null element"));
                };
                let order = compare(key, &candidate)?;
                if order.is_eq() {
                    hit = Some((address, candidate));
                }
                Ok(order)
            }),
            // Equality gives no direction, so every node is a candidate.
            Matcher::Equal(_) => avl.find_first(tree, |node| {
                hit = self.probe(entry, avl.node_data(node));
                Ok(hit.is_some())
            }),
        };
        match result {
            Ok(Some(_)) => hit,
            Ok(None) => None,
            Err(e) => {
                self.report(format!("abandoning search of tree {:#x}", tree.address), e);
                None
            }
        }
    }
}
