//! Membership-proof orchestrator: turns a signature, a message digest and an
//! inclusion witness into a proof plus its public input.

use crate::circuit::{MembershipCircuit, ProvingEngine};
use crate::config::ProvingConfig;
use crate::ecdsa::{SignatureInstance, SignatureWitness};
use crate::error::{MembershipError, Result};
use crate::ethereum::{recover_public_key, Identifier, RecoverableSignature};
use crate::merkle::MerkleWitness;
use crate::types::{MembershipProof, MessageDigest, PublicInput};
use log::{debug, info};
use std::sync::Arc;
use std::time::Instant;

/// Prover holding a proving key for one identifier variant and tree depth.
#[derive(Debug, Clone)]
pub struct MembershipProver {
    config: ProvingConfig,
    engine: Arc<ProvingEngine>,
}

impl MembershipProver {
    /// Loads parameters and generates the proving key.
    ///
    /// # Errors
    /// [`MembershipError::EngineInit`] if the configuration is out of range or
    /// key generation fails (for instance when `2^k` rows cannot hold the
    /// circuit). Safe to retry.
    pub async fn initialize(config: ProvingConfig) -> Result<Self> {
        config.check_depth().map_err(MembershipError::EngineInit)?;

        let started = Instant::now();
        let engine = tokio::task::spawn_blocking(move || {
            ProvingEngine::setup(config.variant, config.tree_depth, config.circuit_k)
        })
        .await
        .map_err(|e| MembershipError::EngineInit(format!("setup task failed: {e}")))?
        .map_err(|e| MembershipError::EngineInit(format!("key generation failed: {e:?}")))?;

        if config.enable_profiler {
            info!(
                "Prover setup ({} variant, depth {}, k={}) took {:?}",
                config.variant,
                config.tree_depth,
                config.circuit_k,
                started.elapsed()
            );
        }

        Ok(Self {
            config,
            engine: Arc::new(engine),
        })
    }

    #[must_use]
    pub fn config(&self) -> &ProvingConfig {
        &self.config
    }

    /// Proves that the key behind `signature` owns the leaf `witness` opens.
    ///
    /// The signer's identifier is recovered from `signature` over `digest`
    /// and must be exactly the witnessed leaf. The circuit then proves that
    /// the signature verifies under a key whose leaf is included under
    /// `witness.root`, revealing `r` and `v` but not `s`.
    ///
    /// # Errors
    /// [`MembershipError::ProofGeneration`] if the signature does not recover,
    /// the recovered identifier is not the witnessed leaf, the witness does
    /// not match this prover's depth or does not reproduce its root, or the
    /// proving system fails.
    pub async fn prove(
        &self,
        signature: &RecoverableSignature,
        digest: &MessageDigest,
        witness: &MerkleWitness,
    ) -> Result<MembershipProof> {
        if witness.depth() != self.config.tree_depth {
            return Err(MembershipError::ProofGeneration(format!(
                "witness depth {} does not match circuit depth {}",
                witness.depth(),
                self.config.tree_depth
            )));
        }
        if !witness.verify() {
            return Err(MembershipError::ProofGeneration(
                "witness path does not reproduce its root".to_string(),
            ));
        }

        let public_key = recover_public_key(digest, signature).map_err(|e| {
            MembershipError::ProofGeneration(format!("signature does not recover: {e}"))
        })?;
        let identifier = Identifier::from_public_key(&public_key, self.config.variant);
        if identifier.to_leaf() != witness.leaf {
            return Err(MembershipError::ProofGeneration(
                "recovered identifier does not match the witnessed leaf".to_string(),
            ));
        }
        debug!("Signature recovers the witnessed {} leaf", self.config.variant);

        let signature_instance = SignatureInstance::derive(&signature.r, signature.v, digest)
            .map_err(|e| MembershipError::ProofGeneration(e.to_string()))?;
        let signature_witness = SignatureWitness::derive(&signature_instance, &signature.s)?;
        if signature_witness.output().map(|point| point.to_public_key()) != Some(public_key) {
            return Err(MembershipError::ProofGeneration(
                "signature chain does not end at the signer's key".to_string(),
            ));
        }

        let public_input = PublicInput::new(witness.root, *digest, signature);
        let instance = public_input
            .instance()
            .map_err(|e| MembershipError::ProofGeneration(e.to_string()))?;
        let circuit = MembershipCircuit::new(self.config.variant, witness, signature_witness);

        let started = Instant::now();
        let engine = Arc::clone(&self.engine);
        let proof = tokio::task::spawn_blocking(move || engine.create_proof(circuit, &instance))
            .await
            .map_err(|e| MembershipError::ProofGeneration(format!("proving task failed: {e}")))?
            .map_err(|e| MembershipError::ProofGeneration(format!("{e:?}")))?;

        if self.config.enable_profiler {
            info!("Full proving time: {:?}", started.elapsed());
            info!(
                "Raw proof size (excluding public input): {} bytes",
                proof.len()
            );
        }

        Ok(MembershipProof {
            proof,
            public_input,
        })
    }
}
