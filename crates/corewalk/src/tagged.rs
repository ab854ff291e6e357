//! Tagged and self-relative pointer helpers.
//!
//! The runtime keeps small integers in the low bits of pointer-sized words:
//! AVL balance factors in tree links and the "this bucket is a tree" bit in
//! hash table buckets. Every reader masks through these functions.

/// Low bits of an AVL child link holding the balance factor.
pub const AVL_BALANCE_MASK: u64 = 0x3;

/// Bit set in a hash table bucket that points at an AVL tree.
pub const AVL_TREE_TAG_BIT: u64 = 0x1;

/// True when any bit of `mask` is set in `value`.
#[inline]
pub fn has_tag(value: u64, mask: u64) -> bool {
    value & mask != 0
}

/// `value` with the bits of `mask` cleared.
#[inline]
pub fn strip_tag(value: u64, mask: u64) -> u64 {
    value & !mask
}

/// `value` with the bits of `mask` set.
#[inline]
pub fn set_tag(value: u64, mask: u64) -> u64 {
    value | mask
}

pub use structinfo::apply_offset_relative_to_self;

/// Strip `mask` from a tagged self-relative link and resolve it.
#[inline]
pub fn resolve_tagged_relative(stored: u64, mask: u64, storage_address: u64) -> u64 {
    apply_offset_relative_to_self(strip_tag(stored, mask), storage_address)
}
