use super::{BackingStore, HashTableReader};
use crate::pool::PoolSlotIter;

enum Cursor<'r, 's> {
    /// Next slot of the open array.
    Slots(u64),
    /// List-node pool first, then the tree-node pool.
    Nodes {
        list: Option<PoolSlotIter<'r, 's>>,
        tree: Option<PoolSlotIter<'r, 's>>,
    },
}

/// One-pass cursor over every element of a table, yielding
/// `(element address, element)`.
///
/// Pool-backed tables are drained pool by pool, so list elements come
/// before tree elements. Unreadable holders are reported and skipped.
pub struct HashTableIter<'r, 's, T> {
    reader: &'r HashTableReader<'s, T>,
    cursor: Cursor<'r, 's>,
}

impl<'r, 's, T> HashTableIter<'r, 's, T> {
    pub(super) fn new(reader: &'r HashTableReader<'s, T>) -> Self {
        let cursor = match reader.backing {
            BackingStore::SpaceOptimized => Cursor::Slots(0),
            BackingStore::ListOnly | BackingStore::ListAndTree => Cursor::Nodes {
                list: reader.list_pool.as_ref().map(|pool| pool.addresses()),
                tree: reader.tree_node_pool.as_ref().map(|pool| pool.addresses()),
            },
        };
        HashTableIter { reader, cursor }
    }

    /// Next element holder, or `None` once every source is drained.
    fn next_holder(&mut self) -> Option<u64> {
        let reader = self.reader;
        match &mut self.cursor {
            Cursor::Slots(next) => {
                while *next < reader.header.table_size as u64 {
                    let slot = reader.bucket_address(*next);
                    *next += 1;
                    match reader.session.read_pointer(slot) {
                        Ok(0) => {}
                        Ok(_) => return Some(slot),
                        Err(e) => reader.report(format!("skipping unreadable slot at {:#x}", slot), e),
                    }
                }
                None
            }
            Cursor::Nodes { list, tree } => {
                if let Some(node) = list.as_mut().and_then(Iterator::next) {
                    return Some(node);
                }
                *list = None;
                let node = tree.as_mut().and_then(Iterator::next)?;
                let avl = reader.avl.as_ref()?;
                Some(avl.node_data(node))
            }
        }
    }
}

impl<T> Iterator for HashTableIter<'_, '_, T> {
    type Item = (u64, T);

    fn next(&mut self) -> Option<(u64, T)> {
        loop {
            let holder = self.next_holder()?;
            match self.reader.load(holder) {
                Ok(Some(element)) => return Some(element),
                Ok(None) => continue,
                Err(e) => self
                    .reader
                    .report(format!("skipping unreadable element at {:#x}", holder), e),
            }
        }
    }
}
