//! Synthetic targets for tests: a structure blob generated for a given
//! pointer width and byte order, and builders that lay out pools, AVL trees
//! and hash tables in a [`SparseMemory`] the same way the runtime does.

use crate::algorithm::AlgorithmVersions;
use crate::corrupt::CollectingReporter;
use crate::hashtable::ElementStorage;
use crate::memory::SparseMemory;
use crate::session::Session;
use crate::tagged::{set_tag, AVL_TREE_TAG_BIT};
use std::collections::BTreeMap;
use std::sync::Arc;
use structinfo::{parse_blob_str, BlobSymbols};

/// Pointer width and byte order of a synthetic target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Target {
    pub pointer_size: u64,
    pub big_endian: bool,
}

impl Target {
    pub const LE64: Target = Target {
        pointer_size: 8,
        big_endian: false,
    };
    pub const BE32: Target = Target {
        pointer_size: 4,
        big_endian: true,
    };

    pub fn puddle_header_size(self) -> u64 {
        3 * self.pointer_size
    }

    pub fn avl_node_header_size(self) -> u64 {
        2 * self.pointer_size
    }

    /// Structure blob with every layout computed for this target.
    pub fn blob_json(self) -> String {
        let p = self.pointer_size;
        let endian = if self.big_endian { "big" } else { "little" };
        let h = |i: u64| 16 + i * p;
        format!(
            r#"{{
    "metadata": {{ "format": "1.0.0", "producer": {{ "name": "fixture" }}, "target": {{ "endian": "{endian}" }} }},
    "base_types": {{
        "pointer": {{ "size": {p}, "signed": false, "kind": "int", "endian": "{endian}" }},
        "U32": {{ "size": 4, "signed": false, "kind": "int", "endian": "{endian}" }},
        "UDATA": {{ "size": {p}, "signed": false, "kind": "int", "endian": "{endian}" }}
    }},
    "user_types": {{
        "J9HashTable": {{
            "size": {table_size},
            "fields": {{
                "tableSize": {{ "offset": 0, "type": {{ "kind": "base", "name": "U32" }} }},
                "numberOfNodes": {{ "offset": 4, "type": {{ "kind": "base", "name": "U32" }} }},
                "numberOfTreeNodes": {{ "offset": 8, "type": {{ "kind": "base", "name": "U32" }} }},
                "flags": {{ "offset": 12, "type": {{ "kind": "base", "name": "U32" }} }},
                "entrySize": {{ "offset": {h0}, "type": {{ "kind": "base", "name": "UDATA" }} }},
                "listNodeSize": {{ "offset": {h1}, "type": {{ "kind": "base", "name": "UDATA" }} }},
                "treeNodeSize": {{ "offset": {h2}, "type": {{ "kind": "base", "name": "UDATA" }} }},
                "nodes": {{ "offset": {h3}, "type": {{ "kind": "pointer" }} }},
                "listNodePool": {{ "offset": {h4}, "type": {{ "kind": "pointer" }} }},
                "treeNodePool": {{ "offset": {h5}, "type": {{ "kind": "pointer" }} }},
                "treePool": {{ "offset": {h6}, "type": {{ "kind": "pointer" }} }}
            }}
        }},
        "J9AVLTree": {{
            "size": {p},
            "fields": {{
                "rootNode": {{ "offset": 0, "type": {{ "kind": "pointer" }} }}
            }}
        }},
        "J9AVLTreeNode": {{
            "size": {p2},
            "fields": {{
                "leftChild": {{ "offset": 0, "type": {{ "kind": "wsrp" }} }},
                "rightChild": {{ "offset": {p}, "type": {{ "kind": "wsrp" }} }}
            }}
        }},
        "J9Pool": {{
            "size": {p4},
            "fields": {{
                "elementSize": {{ "offset": 0, "type": {{ "kind": "base", "name": "UDATA" }} }},
                "elementsPerPuddle": {{ "offset": {p}, "type": {{ "kind": "base", "name": "U32" }} }},
                "numElements": {{ "offset": {p2}, "type": {{ "kind": "base", "name": "UDATA" }} }},
                "puddleList": {{ "offset": {p3}, "type": {{ "kind": "wsrp" }} }}
            }}
        }},
        "J9PoolPuddleList": {{
            "size": {p2},
            "fields": {{
                "numElements": {{ "offset": 0, "type": {{ "kind": "base", "name": "UDATA" }} }},
                "nextPuddle": {{ "offset": {p}, "type": {{ "kind": "wsrp" }} }}
            }}
        }},
        "J9PoolPuddle": {{
            "size": {p3},
            "fields": {{
                "usedElements": {{ "offset": 0, "type": {{ "kind": "base", "name": "UDATA" }} }},
                "firstElementAddress": {{ "offset": {p}, "type": {{ "kind": "srp" }} }},
                "nextPuddle": {{ "offset": {p2}, "type": {{ "kind": "wsrp" }} }}
            }}
        }}
    }}
}}"#,
            table_size = h(7),
            h0 = h(0),
            h1 = h(1),
            h2 = h(2),
            h3 = h(3),
            h4 = h(4),
            h5 = h(5),
            h6 = h(6),
            p2 = 2 * p,
            p3 = 3 * p,
            p4 = 4 * p,
        )
    }

    pub fn blob(self) -> Arc<BlobSymbols> {
        Arc::new(parse_blob_str(&self.blob_json()).expect("fixture blob parses"))
    }
}

/// Header sizes on the default 64-bit little-endian target.
pub(crate) const PUDDLE_HEADER_SIZE: u64 = 24;
pub(crate) const AVL_NODE_HEADER_SIZE: u64 = 16;

/// Route `tracing` output through the test harness.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::new("debug"))
        .try_init();
}

/// Bump allocator and writer over a sparse target image.
pub(crate) struct TargetBuilder {
    pub mem: SparseMemory,
    target: Target,
    next: u64,
}

impl TargetBuilder {
    /// A 64-bit little-endian target.
    pub fn new(base: u64) -> Self {
        Self::for_target(Target::LE64, base)
    }

    pub fn for_target(target: Target, base: u64) -> Self {
        TargetBuilder {
            mem: SparseMemory::new("synthetic"),
            target,
            next: base,
        }
    }

    pub fn target(&self) -> Target {
        self.target
    }

    /// Map `len` zeroed bytes at the next 8-aligned address, with a gap after.
    pub fn alloc(&mut self, len: u64) -> u64 {
        let addr = (self.next + 7) & !7;
        self.mem.map_zeroed(addr, len.max(1) as usize);
        self.next = addr + len.max(1) + 0x40;
        addr
    }

    /// Store the low `width` bytes of `value` in target byte order.
    fn put_sized(&mut self, addr: u64, value: u64, width: u64) {
        let width = width as usize;
        let bytes = if self.target.big_endian {
            value.to_be_bytes()[8 - width..].to_vec()
        } else {
            value.to_le_bytes()[..width].to_vec()
        };
        self.mem.write(addr, &bytes);
    }

    pub fn put_u32(&mut self, addr: u64, value: u32) {
        self.put_sized(addr, value as u64, 4);
    }

    pub fn put_u64(&mut self, addr: u64, value: u64) {
        self.put_sized(addr, value, 8);
    }

    /// Store a pointer-width word, truncated to the target's width.
    pub fn put_word(&mut self, addr: u64, value: u64) {
        self.put_sized(addr, value, self.target.pointer_size);
    }

    /// Store a pointer-width self-relative link (0 stays null).
    pub fn put_wsrp(&mut self, field: u64, target: u64) {
        self.put_tagged_wsrp(field, target, 0);
    }

    /// Store a tagged pointer-width self-relative link.
    pub fn put_tagged_wsrp(&mut self, field: u64, target: u64, tag: u64) {
        let stored = if target == 0 { 0 } else { target.wrapping_sub(field) };
        self.put_word(field, set_tag(stored, tag));
    }

    /// Store a 32-bit self-relative link.
    pub fn put_srp(&mut self, field: u64, target: u64) {
        let stored = if target == 0 { 0 } else { target.wrapping_sub(field) };
        self.put_sized(field, stored, 4);
    }

    /// Make a range unreadable.
    pub fn punch(&mut self, addr: u64, len: u64) {
        self.mem.unmap(addr, len);
    }

    /// Finish the image and open a session with the given version constants.
    pub fn into_session(self, versions: &[(&str, i64)]) -> (Session, Arc<CollectingReporter>) {
        let reporter = Arc::new(CollectingReporter::new());
        let session = Session::new(Arc::new(self.mem), self.target.blob())
            .with_reporter(reporter.clone())
            .with_algorithm_versions(AlgorithmVersions::from_constants(versions.iter().copied()));
        (session, reporter)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PoolLayout {
    V0,
    V1,
}

impl PoolLayout {
    pub fn version_constant(self) -> (&'static str, i64) {
        match self {
            PoolLayout::V0 => ("POOL_VERSION", 0),
            PoolLayout::V1 => ("POOL_VERSION", 1),
        }
    }
}

/// A pool laid out by [`build_pool`].
pub(crate) struct BuiltPool {
    pub pool: u64,
    pub puddles: Vec<u64>,
    /// Every slot address, occupied or not, per puddle.
    pub slots: Vec<Vec<u64>>,
}

impl BuiltPool {
    /// Occupied slot addresses in puddle-then-slot order.
    pub fn live_slots(&self, occupancy: &[Vec<bool>]) -> Vec<u64> {
        self.slots
            .iter()
            .zip(occupancy)
            .flat_map(|(slots, occ)| {
                slots
                    .iter()
                    .zip(occ)
                    .filter(|&(_, &live)| live)
                    .map(|(&slot, _)| slot)
            })
            .collect()
    }
}

/// Lay out a pool with one puddle per `occupancy` entry.
pub(crate) fn build_pool(
    b: &mut TargetBuilder,
    layout: PoolLayout,
    element_size: u64,
    per_puddle: u32,
    occupancy: &[Vec<bool>],
) -> BuiltPool {
    let p = b.target().pointer_size;
    let header = b.target().puddle_header_size();
    let pool = b.alloc(4 * p);
    let bitmap_words = (per_puddle as u64 + 31) / 32;
    let bitmap_bytes = (bitmap_words * 4 + 7) & !7;

    let mut puddles = Vec::new();
    let mut slots = Vec::new();
    let mut total_used = 0u64;
    for occ in occupancy {
        let puddle = b.alloc(header + bitmap_bytes + per_puddle as u64 * element_size);
        let first = puddle + header + bitmap_bytes;
        let used = occ.iter().filter(|&&live| live).count() as u64;
        total_used += used;

        b.put_word(puddle, used);
        b.put_srp(puddle + p, first);
        for word in 0..bitmap_words {
            let mut bits = 0u32;
            for bit in 0..32 {
                let slot = (word * 32 + bit) as usize;
                if occ.get(slot).copied().unwrap_or(false) {
                    bits |= 1 << (31 - bit);
                }
            }
            b.put_u32(puddle + header + word * 4, bits);
        }

        slots.push(
            (0..per_puddle as u64)
                .map(|i| first + i * element_size)
                .collect(),
        );
        puddles.push(puddle);
    }
    for pair in puddles.windows(2) {
        b.put_wsrp(pair[0] + 2 * p, pair[1]);
    }

    b.put_word(pool, element_size);
    b.put_u32(pool + p, per_puddle);
    let head = puddles.first().copied().unwrap_or(0);
    match layout {
        PoolLayout::V0 => {
            b.put_word(pool + 2 * p, total_used);
            b.put_wsrp(pool + 3 * p, head);
        }
        PoolLayout::V1 => {
            let list = b.alloc(2 * p);
            b.put_word(list, total_used);
            b.put_wsrp(list + p, head);
            b.put_wsrp(pool + 3 * p, list);
        }
    }

    BuiltPool {
        pool,
        puddles,
        slots,
    }
}

/// Link the given nodes into a balanced AVL tree and write its header.
///
/// `nodes` holds `(key, node address)` sorted by key; each key is stored as
/// a word right after the node header. The tree header gets the absolute
/// root address. Returns the root node address.
pub(crate) fn link_avl(b: &mut TargetBuilder, tree: u64, nodes: &[(u64, u64)]) -> u64 {
    fn link(b: &mut TargetBuilder, nodes: &[(u64, u64)]) -> (u64, u32) {
        if nodes.is_empty() {
            return (0, 0);
        }
        let p = b.target().pointer_size;
        let mid = nodes.len() / 2;
        let (key, node) = nodes[mid];
        let (left, left_height) = link(b, &nodes[..mid]);
        let (right, right_height) = link(b, &nodes[mid + 1..]);
        // Balance factor goes into the low bits of the child links.
        let balance = match right_height as i64 - left_height as i64 {
            0 => 0,
            d if d > 0 => 1,
            _ => 2,
        };
        b.put_tagged_wsrp(node, left, balance);
        b.put_tagged_wsrp(node + p, right, balance);
        let data = node + b.target().avl_node_header_size();
        b.put_word(data, key);
        (node, left_height.max(right_height) + 1)
    }

    let (root, _) = link(b, nodes);
    b.put_word(tree, root);
    root
}

/// Allocate standalone nodes for `keys` and link them into a tree.
pub(crate) fn build_avl(b: &mut TargetBuilder, keys: &[u64]) -> (u64, BTreeMap<u64, u64>) {
    let p = b.target().pointer_size;
    let node_size = b.target().avl_node_header_size() + p;
    let tree = b.alloc(p);
    let mut sorted: Vec<u64> = keys.to_vec();
    sorted.sort_unstable();
    let nodes: Vec<(u64, u64)> = sorted
        .iter()
        .map(|&key| (key, b.alloc(node_size)))
        .collect();
    link_avl(b, tree, &nodes);
    (tree, nodes.into_iter().collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Backing {
    SpaceOptimized,
    ListOnly,
    ListAndTree,
}

/// Description of a synthetic table of `u64` keys hashed by identity.
pub(crate) struct TableShape {
    pub backing: Backing,
    pub storage: ElementStorage,
    pub pool_layout: PoolLayout,
    pub table_size: u32,
    pub keys: Vec<u64>,
    /// Buckets holding more keys than this become trees (ListAndTree only).
    pub tree_threshold: usize,
}

/// A table laid out by [`build_table`].
pub(crate) struct BuiltTable {
    pub table: u64,
    /// Node (list/tree) or slot address holding each key.
    pub holder: BTreeMap<u64, u64>,
    /// Address the decoder reads for each key.
    pub element: BTreeMap<u64, u64>,
    pub tree_buckets: Vec<u32>,
}

pub(crate) const FLAG_SIZE_OPTIMIZED: u32 = 0x4;
pub(crate) const FLAG_COLLISION_RESISTANT: u32 = 0x8;

/// Boxed elements live out of line as `{ key, key * 10 }` word records.
fn store_element(b: &mut TargetBuilder, storage: ElementStorage, at: u64, key: u64) -> u64 {
    let p = b.target().pointer_size;
    match storage {
        ElementStorage::Inline => {
            b.put_word(at, key);
            at
        }
        ElementStorage::Boxed => {
            let record = b.alloc(2 * p);
            b.put_word(record, key);
            b.put_word(record + p, key * 10);
            b.put_word(at, record);
            record
        }
    }
}

pub(crate) fn build_table(b: &mut TargetBuilder, shape: &TableShape) -> BuiltTable {
    let ptr = b.target().pointer_size;
    let node_header = b.target().avl_node_header_size();
    // Word-sized header fields follow the four U32 counters.
    let field = |index: u64| 16 + index * ptr;
    let table = b.alloc(field(7));
    let size = shape.table_size as u64;
    let nodes = b.alloc(size * ptr);
    let mut holder = BTreeMap::new();
    let mut element = BTreeMap::new();
    let mut tree_buckets = Vec::new();

    b.put_u32(table, shape.table_size);
    b.put_u32(table + 4, shape.keys.len() as u32);
    b.put_word(table + field(0), ptr);
    b.put_word(table + field(3), nodes);

    if shape.backing == Backing::SpaceOptimized {
        b.put_u32(table + 12, FLAG_SIZE_OPTIMIZED);
        let mut used = vec![false; shape.table_size as usize];
        for &key in &shape.keys {
            let mut slot = (key % size) as usize;
            while used[slot] {
                slot = (slot + 1) % used.len();
            }
            used[slot] = true;
            let slot_addr = nodes + slot as u64 * ptr;
            holder.insert(key, slot_addr);
            element.insert(key, store_element(b, shape.storage, slot_addr, key));
        }
        return BuiltTable {
            table,
            holder,
            element,
            tree_buckets,
        };
    }

    let mut buckets: BTreeMap<u64, Vec<u64>> = BTreeMap::new();
    for &key in &shape.keys {
        buckets.entry(key % size).or_default().push(key);
    }

    let tree_keys: Vec<u64> = if shape.backing == Backing::ListAndTree {
        buckets
            .values()
            .filter(|keys| keys.len() > shape.tree_threshold)
            .flatten()
            .copied()
            .collect()
    } else {
        Vec::new()
    };
    let list_count = shape.keys.len() - tree_keys.len();

    // List nodes: element word then next pointer.
    let list_node_size = 2 * ptr;
    let per_puddle = 4u32;
    let occupancy = |count: usize| -> Vec<Vec<bool>> {
        let puddles = count.div_ceil(per_puddle as usize).max(1);
        (0..puddles)
            .map(|p| {
                (0..per_puddle as usize)
                    .map(|s| p * per_puddle as usize + s < count)
                    .collect()
            })
            .collect()
    };
    let list_pool = build_pool(b, shape.pool_layout, list_node_size, per_puddle, &occupancy(list_count));
    let mut free_list_nodes = list_pool.live_slots(&occupancy(list_count)).into_iter();

    b.put_word(table + field(1), list_node_size);
    b.put_word(table + field(4), list_pool.pool);

    let tree_node_size = node_header + ptr;
    let mut free_tree_nodes = Vec::new().into_iter();
    if shape.backing == Backing::ListAndTree {
        let tree_node_pool = build_pool(
            b,
            shape.pool_layout,
            tree_node_size,
            per_puddle,
            &occupancy(tree_keys.len()),
        );
        free_tree_nodes = tree_node_pool
            .live_slots(&occupancy(tree_keys.len()))
            .into_iter();
        let tree_pool = build_pool(b, shape.pool_layout, ptr, per_puddle, &[vec![false; 4]]);
        b.put_u32(table + 8, tree_keys.len() as u32);
        b.put_u32(table + 12, FLAG_COLLISION_RESISTANT);
        b.put_word(table + field(2), tree_node_size);
        b.put_word(table + field(5), tree_node_pool.pool);
        b.put_word(table + field(6), tree_pool.pool);
    }

    for (&bucket, keys) in &buckets {
        let bucket_addr = nodes + bucket * ptr;
        if shape.backing == Backing::ListAndTree && keys.len() > shape.tree_threshold {
            let mut sorted = keys.clone();
            sorted.sort_unstable();
            let mut linked = Vec::new();
            for key in sorted {
                let node = free_tree_nodes.next().expect("tree node slot");
                holder.insert(key, node);
                let data = node + node_header;
                element.insert(key, store_element(b, shape.storage, data, key));
                linked.push((key, node));
            }
            let tree = b.alloc(ptr);
            // link_avl writes raw keys after each header; restore boxed pointers.
            link_avl(b, tree, &linked);
            if shape.storage == ElementStorage::Boxed {
                for &(key, node) in &linked {
                    b.put_word(node + node_header, element[&key]);
                }
            }
            b.put_word(bucket_addr, set_tag(tree, AVL_TREE_TAG_BIT));
            tree_buckets.push(bucket as u32);
        } else {
            let mut prev: Option<u64> = None;
            for &key in keys {
                let node = free_list_nodes.next().expect("list node slot");
                holder.insert(key, node);
                element.insert(key, store_element(b, shape.storage, node, key));
                match prev {
                    None => b.put_word(bucket_addr, node),
                    Some(p) => b.put_word(p + list_node_size - ptr, node),
                }
                prev = Some(node);
            }
        }
    }

    BuiltTable {
        table,
        holder,
        element,
        tree_buckets,
    }
}

/// Decoder for the synthetic elements: the key is the first word.
pub(crate) fn decode_key(session: &Session, address: u64) -> crate::error::WalkResult<u64> {
    session.read_pointer(address)
}
