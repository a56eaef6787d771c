//! Fixed-depth, append-only Merkle tree holding the group's members.
//!
//! Nodes are combined with [`poseidon_hash`], the same function the membership
//! circuit evaluates, and unused leaves are zero.

use crate::error::{MembershipError, Result};
use crate::utils::{field_to_bytes, poseidon_hash};
use log::debug;
use pasta_curves::pallas;
use std::fmt;

/// Largest supported tree depth.
pub const MAX_TREE_DEPTH: usize = 32;

/// Inclusion witness for one leaf: sibling path from leaf to root.
///
/// The orientation at each level is read from `index`: bit `i` set means the
/// node at level `i` is a right child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleWitness {
    pub leaf: pallas::Base,
    pub root: pallas::Base,
    pub siblings: Vec<pallas::Base>,
    pub index: u64,
}

impl MerkleWitness {
    /// Orientation bits from leaf to root; `true` means the path node is the
    /// right child.
    #[must_use]
    pub fn path_bits(&self) -> Vec<bool> {
        (0..self.siblings.len())
            .map(|level| (self.index >> level) & 1 == 1)
            .collect()
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.siblings.len()
    }

    /// Recombines the leaf with its siblings.
    #[must_use]
    pub fn compute_root(&self) -> pallas::Base {
        self.siblings
            .iter()
            .zip(self.path_bits())
            .fold(self.leaf, |current, (sibling, is_right)| {
                if is_right {
                    poseidon_hash(*sibling, current)
                } else {
                    poseidon_hash(current, *sibling)
                }
            })
    }

    /// `true` if the path reproduces `root`.
    #[must_use]
    pub fn verify(&self) -> bool {
        self.compute_root() == self.root
    }
}

impl fmt::Display for MerkleWitness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MerkleWitness:\n  Leaf: {}\n  Root: {}\n  Index: {}\n  Siblings: {}",
            hex::encode(field_to_bytes(self.leaf)),
            hex::encode(field_to_bytes(self.root)),
            self.index,
            self.siblings.len()
        )
    }
}

/// Incremental Merkle tree of fixed depth.
///
/// Only filled nodes are stored; missing right-hand subtrees are taken from
/// the precomputed zero hashes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupTree {
    depth: usize,
    /// `zeros[l]` is the root of an empty subtree of height `l`.
    zeros: Vec<pallas::Base>,
    /// `levels[0]` holds the leaves, `levels[depth]` the root once non-empty.
    levels: Vec<Vec<pallas::Base>>,
}

impl GroupTree {
    /// Empty tree holding up to `2^depth` leaves.
    ///
    /// # Errors
    /// [`MembershipError::InvalidDepth`] if `depth` exceeds [`MAX_TREE_DEPTH`].
    pub fn new(depth: usize) -> Result<Self> {
        if depth > MAX_TREE_DEPTH {
            return Err(MembershipError::InvalidDepth {
                depth,
                max: MAX_TREE_DEPTH,
            });
        }

        let mut zeros = Vec::with_capacity(depth + 1);
        zeros.push(pallas::Base::zero());
        for level in 0..depth {
            zeros.push(poseidon_hash(zeros[level], zeros[level]));
        }

        Ok(Self {
            depth,
            zeros,
            levels: vec![Vec::new(); depth + 1],
        })
    }

    /// Builds a tree from an ordered roster of leaves.
    pub fn from_leaves<I>(depth: usize, leaves: I) -> Result<Self>
    where
        I: IntoIterator<Item = pallas::Base>,
    {
        leaves.into_iter().try_fold(Self::new(depth)?, |mut tree, leaf| {
            tree.insert(leaf)?;
            Ok(tree)
        })
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    #[must_use]
    pub fn capacity(&self) -> u64 {
        1u64 << self.depth
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.levels[0].len() as u64
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.levels[0].is_empty()
    }

    #[must_use]
    pub fn leaves(&self) -> &[pallas::Base] {
        &self.levels[0]
    }

    #[must_use]
    pub fn root(&self) -> pallas::Base {
        self.levels[self.depth]
            .first()
            .copied()
            .unwrap_or(self.zeros[self.depth])
    }

    /// Appends `leaf` at the next free index and returns that index.
    ///
    /// # Errors
    /// [`MembershipError::CapacityExceeded`] once `2^depth` leaves are stored.
    pub fn insert(&mut self, leaf: pallas::Base) -> Result<u64> {
        let index = self.len();
        if index >= self.capacity() {
            return Err(MembershipError::CapacityExceeded {
                capacity: self.capacity(),
            });
        }

        self.levels[0].push(leaf);

        let mut position = index as usize;
        let mut current = leaf;
        for level in 0..self.depth {
            // Appends only ever extend the right edge, so a left child's
            // sibling is always still empty.
            current = if position % 2 == 0 {
                poseidon_hash(current, self.zeros[level])
            } else {
                poseidon_hash(self.levels[level][position - 1], current)
            };
            position /= 2;

            let parent = &mut self.levels[level + 1];
            if position < parent.len() {
                parent[position] = current;
            } else {
                parent.push(current);
            }
        }

        debug!("Inserted leaf {index}, tree now holds {} members", self.len());
        Ok(index)
    }

    /// First index holding `leaf`.
    pub fn index_of(&self, leaf: &pallas::Base) -> Result<u64> {
        self.levels[0]
            .iter()
            .position(|candidate| candidate == leaf)
            .map(|index| index as u64)
            .ok_or(MembershipError::NotFound)
    }

    /// Sibling path for the leaf at `index`.
    ///
    /// # Errors
    /// [`MembershipError::IndexOutOfRange`] if no leaf was inserted there.
    pub fn create_witness(&self, index: u64) -> Result<MerkleWitness> {
        if index >= self.len() {
            return Err(MembershipError::IndexOutOfRange {
                index,
                len: self.len(),
            });
        }

        let mut position = index as usize;
        let siblings = (0..self.depth)
            .map(|level| {
                let sibling = self.levels[level]
                    .get(position ^ 1)
                    .copied()
                    .unwrap_or(self.zeros[level]);
                position /= 2;
                sibling
            })
            .collect();

        Ok(MerkleWitness {
            leaf: self.levels[0][index as usize],
            root: self.root(),
            siblings,
            index,
        })
    }
}
