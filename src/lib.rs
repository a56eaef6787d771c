//! Anonymous group-membership proofs.
//!
//! A member proves, without revealing which member they are, that the key
//! behind a signature belongs to a fixed group of secp256k1 identities.
//!
//! # Components
//!
//! - [`ethereum`]: identity derivation (public keys, addresses, signatures)
//! - [`GroupTree`]: fixed-depth Poseidon Merkle tree holding the group
//! - [`ecdsa`]: the public and private halves of the in-circuit signature check
//! - [`MembershipCircuit`]: halo2 circuit proving that a signature verifies
//!   under a key whose leaf is in the group, built from the [`gadgets`]
//! - [`MembershipProver`] / [`MembershipVerifier`]: async prove and verify
//! - [`session`]: typestate session threading the artifacts between phases
//!
//! # Example
//!
//! ```no_run
//! use zkp_group_membership::{
//!     ethereum::{derive_signature, Identifier, SecretKey},
//!     GroupTree, MembershipConfig, MembershipProver, MembershipVerifier,
//! };
//!
//! # async fn run() -> zkp_group_membership::Result<()> {
//! let config = MembershipConfig::public_key();
//! let secret = SecretKey::from_tag("\u{1F9D9}")?;
//! let (signature, digest) = derive_signature(&secret, b"harry potter")?;
//!
//! let mut tree = GroupTree::new(config.tree_depth)?;
//! let index = tree.insert(Identifier::derive(&secret, config.variant)?.to_leaf())?;
//! let witness = tree.create_witness(index)?;
//!
//! let prover = MembershipProver::initialize(config).await?;
//! let proof = prover.prove(&signature, &digest, &witness).await?;
//!
//! let verifier = MembershipVerifier::initialize(config).await?;
//! assert!(verifier.verify(&proof.proof, &proof.public_input.serialize()).await?);
//! # Ok(())
//! # }
//! ```

pub mod circuit;
pub mod config;
pub mod ecdsa;
pub mod error;
pub mod ethereum;
pub mod gadgets;
pub mod merkle;
pub mod prover;
pub mod session;
pub mod types;
pub mod utils;
pub mod verifier;

#[cfg(test)]
mod merkle_tests;

pub use circuit::MembershipCircuit;
pub use config::{MembershipConfig, ProvingConfig, VerifyingConfig};
pub use ecdsa::{SignatureInstance, SignatureWitness};
pub use error::{MembershipError, Result};
pub use merkle::{GroupTree, MerkleWitness};
pub use prover::MembershipProver;
pub use types::{IdentifierVariant, MembershipProof, MessageDigest, PublicInput};
pub use utils::{bytes_to_field, field_to_bytes, poseidon_hash};
pub use verifier::MembershipVerifier;

/// Circuit parameter for the Halo2 proving system.
///
/// The circuit has `2^k` rows. The instance column alone needs
/// [`circuit::INSTANCE_ROWS`] (8203) rows for the signature table. The
/// windowed multiplication takes about 7,300 rows of range checks, Keccak
/// about 2,100, and each tree level one Poseidon permutation (about 40 rows),
/// so `k = 14` fits every depth up to [`merkle::MAX_TREE_DEPTH`].
///
/// Changing `CIRCUIT_K` changes the keys: prover and verifier must use the
/// same value.
pub const CIRCUIT_K: u32 = 14;

/// Tree depth used unless configured otherwise; holds up to 2^20 members.
pub const DEFAULT_TREE_DEPTH: usize = 20;
