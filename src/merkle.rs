//! Flattened Merkle tree construction over transaction hashes

use crate::hash::{hash_multi, Hash};

/// Builds a Merkle tree and returns it flattened level by level: the leaves first,
/// then every internal level, with the root as the last element.
///
/// An odd node at the end of a level is paired with itself. A single leaf is
/// likewise paired with itself so that the root always differs from the leaf.
/// An empty leaf list yields `[Hash::NULL]`.
pub fn build_merkle_tree(leaves: &[Hash]) -> Vec<Hash> {
    if leaves.is_empty() {
        return vec![Hash::NULL];
    }

    let mut tree: Vec<Hash> = leaves.to_vec();
    if tree.len() == 1 {
        let root = hash_multi(&[&tree[0], &tree[0]]);
        tree.push(root);
        return tree;
    }

    let mut offset = 0;
    let mut length = tree.len();
    while length > 1 {
        for left in (0..length).step_by(2) {
            let right = (left + 1).min(length - 1);
            let node = hash_multi(&[&tree[offset + left], &tree[offset + right]]);
            tree.push(node);
        }
        offset += length;
        length = length.div_ceil(2);
    }
    tree
}

/// Root of a flattened tree, or `Hash::NULL` for an empty one.
pub fn merkle_root(tree: &[Hash]) -> Hash {
    tree.last().copied().unwrap_or(Hash::NULL)
}
