#[cfg(test)]
mod tests {
    use crate::error::MembershipError;
    use crate::utils::poseidon_hash;
    use crate::GroupTree;
    use pasta_curves::pallas;

    fn leaves(count: u64) -> Vec<pallas::Base> {
        (1..=count).map(pallas::Base::from).collect()
    }

    #[test]
    fn test_empty_tree_root_is_zero_subtree() {
        let tree = GroupTree::new(2).unwrap();
        let zero = pallas::Base::zero();
        let level1 = poseidon_hash(zero, zero);
        assert_eq!(tree.root(), poseidon_hash(level1, level1));
        assert!(tree.is_empty());
    }

    #[test]
    fn test_root_matches_full_recomputation() {
        let tree = GroupTree::from_leaves(2, leaves(3)).unwrap();
        let zero = pallas::Base::zero();
        let left = poseidon_hash(pallas::Base::from(1), pallas::Base::from(2));
        let right = poseidon_hash(pallas::Base::from(3), zero);
        assert_eq!(tree.root(), poseidon_hash(left, right));
    }

    #[test]
    fn test_insert_returns_sequential_indices() {
        let mut tree = GroupTree::new(4).unwrap();
        for (expected, leaf) in leaves(10).into_iter().enumerate() {
            let index = tree.insert(leaf).unwrap();
            assert_eq!(index, expected as u64);
            assert_eq!(tree.index_of(&leaf).unwrap(), index);
        }
        assert_eq!(tree.len(), 10);
    }

    #[test]
    fn test_index_of_returns_first_match() {
        let mut tree = GroupTree::new(3).unwrap();
        let duplicate = pallas::Base::from(42);
        tree.insert(pallas::Base::from(1)).unwrap();
        tree.insert(duplicate).unwrap();
        tree.insert(duplicate).unwrap();
        assert_eq!(tree.index_of(&duplicate).unwrap(), 1);
    }

    #[test]
    fn test_index_of_missing_leaf() {
        let tree = GroupTree::from_leaves(3, leaves(4)).unwrap();
        assert!(matches!(
            tree.index_of(&pallas::Base::from(99)),
            Err(MembershipError::NotFound)
        ));
    }

    #[test]
    fn test_every_witness_reproduces_root() {
        let tree = GroupTree::from_leaves(5, leaves(19)).unwrap();
        for index in 0..tree.len() {
            let witness = tree.create_witness(index).unwrap();
            assert_eq!(witness.depth(), 5);
            assert_eq!(witness.compute_root(), tree.root());
            assert!(witness.verify());
        }
    }

    #[test]
    fn test_witness_path_bits_follow_index() {
        let tree = GroupTree::from_leaves(3, leaves(8)).unwrap();
        let witness = tree.create_witness(5).unwrap();
        assert_eq!(witness.path_bits(), vec![true, false, true]);
    }

    #[test]
    fn test_depth_twenty_witness() {
        let tree = GroupTree::from_leaves(20, leaves(5)).unwrap();
        assert_eq!(tree.capacity(), 1 << 20);
        let witness = tree.create_witness(4).unwrap();
        assert_eq!(witness.siblings.len(), 20);
        assert!(witness.verify());
    }

    #[test]
    fn test_witness_goes_stale_after_insert() {
        let mut tree = GroupTree::from_leaves(3, leaves(2)).unwrap();
        let witness = tree.create_witness(0).unwrap();
        tree.insert(pallas::Base::from(7)).unwrap();
        assert_ne!(witness.root, tree.root());
        assert_ne!(witness.compute_root(), tree.root());
    }

    #[test]
    fn test_capacity_exceeded() {
        let mut tree = GroupTree::from_leaves(2, leaves(4)).unwrap();
        let result = tree.insert(pallas::Base::from(5));
        assert!(matches!(
            result,
            Err(MembershipError::CapacityExceeded { capacity: 4 })
        ));
        assert_eq!(tree.len(), 4);
    }

    #[test]
    fn test_from_leaves_rejects_oversized_roster() {
        assert!(GroupTree::from_leaves(1, leaves(3)).is_err());
    }

    #[test]
    fn test_witness_index_out_of_range() {
        let tree = GroupTree::from_leaves(3, leaves(4)).unwrap();
        assert!(matches!(
            tree.create_witness(4),
            Err(MembershipError::IndexOutOfRange { index: 4, len: 4 })
        ));
        assert!(tree.create_witness(999).is_err());
    }

    #[test]
    fn test_tampered_witness_fails() {
        let tree = GroupTree::from_leaves(3, leaves(4)).unwrap();

        let mut witness = tree.create_witness(1).unwrap();
        witness.leaf = pallas::Base::from(1000);
        assert!(!witness.verify());

        let mut witness = tree.create_witness(1).unwrap();
        witness.siblings[0] = pallas::Base::from(1000);
        assert!(!witness.verify());

        let mut witness = tree.create_witness(1).unwrap();
        witness.index = 0;
        assert!(!witness.verify());
    }

    #[test]
    fn test_witness_from_other_tree_fails() {
        let tree1 = GroupTree::from_leaves(3, leaves(4)).unwrap();
        let tree2 = GroupTree::from_leaves(3, (5..=8).map(pallas::Base::from)).unwrap();
        let witness = tree1.create_witness(0).unwrap();
        assert_ne!(witness.compute_root(), tree2.root());
    }

    #[test]
    fn test_depth_zero_tree() {
        let mut tree = GroupTree::new(0).unwrap();
        tree.insert(pallas::Base::from(9)).unwrap();
        assert_eq!(tree.root(), pallas::Base::from(9));
        assert!(tree.insert(pallas::Base::from(10)).is_err());
        assert!(tree.create_witness(0).unwrap().verify());
    }

    #[test]
    fn test_depth_above_maximum_is_an_error() {
        assert!(matches!(
            GroupTree::new(crate::merkle::MAX_TREE_DEPTH + 1),
            Err(MembershipError::InvalidDepth { depth: 33, max: 32 })
        ));
        assert!(matches!(
            GroupTree::from_leaves(40, leaves(2)),
            Err(MembershipError::InvalidDepth { depth: 40, .. })
        ));
        assert!(GroupTree::new(crate::merkle::MAX_TREE_DEPTH).is_ok());
    }
}
