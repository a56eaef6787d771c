//! One-shot proof sessions.
//!
//! A session moves `Idle → GroupBuilt → WitnessExtracted → Proving → Proved →
//! Verifying → Verified | Rejected`. Each stage is its own type and every
//! transition consumes the previous stage, so a group cannot be mutated after
//! a witness was taken from it and a failed proof cannot be retried against a
//! stale witness.

use crate::error::Result;
use crate::ethereum::{Identifier, RecoverableSignature};
use crate::merkle::{GroupTree, MerkleWitness};
use crate::prover::MembershipProver;
use crate::types::{IdentifierVariant, MembershipProof, MessageDigest, PublicInput};
use crate::verifier::MembershipVerifier;
use log::info;
use pasta_curves::pallas;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    GroupBuilt,
    WitnessExtracted,
    Proving,
    Proved,
    Verifying,
    Verified,
    Rejected,
}

/// Outcome of verifying a proved session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Verified,
    Rejected,
}

impl Verdict {
    #[must_use]
    pub fn is_verified(self) -> bool {
        self == Verdict::Verified
    }

    #[must_use]
    pub fn state(self) -> SessionState {
        match self {
            Verdict::Verified => SessionState::Verified,
            Verdict::Rejected => SessionState::Rejected,
        }
    }
}

/// Group built for one session; still open for inserts.
#[derive(Debug, Clone)]
pub struct GroupSession {
    variant: IdentifierVariant,
    tree: GroupTree,
}

impl GroupSession {
    /// Builds the group from an ordered list of identifiers.
    ///
    /// # Errors
    /// [`crate::MembershipError::InvalidDepth`] if `depth` is above the tree
    /// maximum, [`crate::MembershipError::CapacityExceeded`] if the roster
    /// does not fit in `2^depth` leaves.
    pub fn build<'a, I>(variant: IdentifierVariant, depth: usize, members: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a Identifier>,
    {
        let tree = GroupTree::from_leaves(depth, members.into_iter().map(Identifier::to_leaf))?;
        info!("Built {variant} group with {} members", tree.len());
        Ok(Self { variant, tree })
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        SessionState::GroupBuilt
    }

    #[must_use]
    pub fn variant(&self) -> IdentifierVariant {
        self.variant
    }

    #[must_use]
    pub fn tree(&self) -> &GroupTree {
        &self.tree
    }

    pub fn insert(&mut self, member: &Identifier) -> Result<u64> {
        self.tree.insert(member.to_leaf())
    }

    pub fn index_of(&self, member: &Identifier) -> Result<u64> {
        self.tree.index_of(&member.to_leaf())
    }

    /// Freezes the group and takes the witness for `index`.
    pub fn extract_witness(self, index: u64) -> Result<WitnessSession> {
        let witness = self.tree.create_witness(index)?;
        Ok(WitnessSession {
            variant: self.variant,
            root: self.tree.root(),
            witness,
        })
    }
}

/// Witness taken from a frozen group.
#[derive(Debug, Clone)]
pub struct WitnessSession {
    variant: IdentifierVariant,
    root: pallas::Base,
    witness: MerkleWitness,
}

impl WitnessSession {
    #[must_use]
    pub fn state(&self) -> SessionState {
        SessionState::WitnessExtracted
    }

    #[must_use]
    pub fn variant(&self) -> IdentifierVariant {
        self.variant
    }

    #[must_use]
    pub fn root(&self) -> pallas::Base {
        self.root
    }

    #[must_use]
    pub fn witness(&self) -> &MerkleWitness {
        &self.witness
    }

    /// Runs the prover to completion. The session is consumed either way.
    pub async fn prove(
        self,
        prover: &MembershipProver,
        signature: RecoverableSignature,
        digest: MessageDigest,
    ) -> Result<ProvedSession> {
        info!("Session state: {:?}", SessionState::Proving);
        let proof = prover.prove(&signature, &digest, &self.witness).await?;
        Ok(ProvedSession {
            digest,
            signature,
            witness: self.witness,
            proof,
        })
    }
}

/// Session holding a finished proof.
#[derive(Debug, Clone)]
pub struct ProvedSession {
    digest: MessageDigest,
    signature: RecoverableSignature,
    witness: MerkleWitness,
    proof: MembershipProof,
}

impl ProvedSession {
    #[must_use]
    pub fn state(&self) -> SessionState {
        SessionState::Proved
    }

    #[must_use]
    pub fn digest(&self) -> &MessageDigest {
        &self.digest
    }

    #[must_use]
    pub fn signature(&self) -> &RecoverableSignature {
        &self.signature
    }

    #[must_use]
    pub fn witness(&self) -> &MerkleWitness {
        &self.witness
    }

    #[must_use]
    pub fn proof(&self) -> &MembershipProof {
        &self.proof
    }

    #[must_use]
    pub fn public_input(&self) -> &PublicInput {
        &self.proof.public_input
    }

    /// Hands the transportable artifact over, dropping the private parts.
    #[must_use]
    pub fn into_proof(self) -> MembershipProof {
        self.proof
    }

    /// Verifies the stored proof against its serialized public input.
    pub async fn verify(&self, verifier: &MembershipVerifier) -> Result<Verdict> {
        info!("Session state: {:?}", SessionState::Verifying);
        let valid = verifier
            .verify(&self.proof.proof, &self.proof.public_input.serialize())
            .await?;
        Ok(if valid {
            Verdict::Verified
        } else {
            Verdict::Rejected
        })
    }
}
