//! Membership-proof verification.

use crate::circuit::VerifyingEngine;
use crate::config::VerifyingConfig;
use crate::error::{MembershipError, Result};
use crate::types::PublicInput;
use halo2_proofs::plonk::Error as PlonkError;
use log::{debug, info};
use std::sync::Arc;
use std::time::Instant;

/// Verifier holding a verifying key for one identifier variant and tree depth.
#[derive(Debug, Clone)]
pub struct MembershipVerifier {
    config: VerifyingConfig,
    engine: Arc<VerifyingEngine>,
}

impl MembershipVerifier {
    /// # Errors
    /// [`MembershipError::EngineInit`] if the configuration is out of range or
    /// key generation fails.
    pub async fn initialize(config: VerifyingConfig) -> Result<Self> {
        config.check_depth().map_err(MembershipError::EngineInit)?;

        let started = Instant::now();
        let engine = tokio::task::spawn_blocking(move || {
            VerifyingEngine::setup(config.variant, config.tree_depth, config.circuit_k)
        })
        .await
        .map_err(|e| MembershipError::EngineInit(format!("setup task failed: {e}")))?
        .map_err(|e| MembershipError::EngineInit(format!("key generation failed: {e:?}")))?;

        if config.enable_profiler {
            info!("Verifier setup took {:?}", started.elapsed());
        }

        Ok(Self {
            config,
            engine: Arc::new(engine),
        })
    }

    #[must_use]
    pub fn config(&self) -> &VerifyingConfig {
        &self.config
    }

    /// Checks `proof` against the serialized public input.
    ///
    /// Returns `Ok(false)` for a well-formed proof that does not verify.
    ///
    /// # Errors
    /// [`MembershipError::MalformedInput`] if the public input does not parse
    /// or its `(r, v)` names no curve point, or the proof is empty, oversized,
    /// cannot be read as a proof, or is followed by trailing bytes.
    pub async fn verify(&self, proof: &[u8], serialized_public_input: &[u8]) -> Result<bool> {
        let public_input = PublicInput::deserialize(serialized_public_input)?;

        if proof.is_empty() {
            return Err(MembershipError::MalformedInput(
                "proof cannot be empty".to_string(),
            ));
        }
        if proof.len() > self.config.max_proof_size {
            return Err(MembershipError::MalformedInput(format!(
                "proof size {} exceeds limit of {} bytes",
                proof.len(),
                self.config.max_proof_size
            )));
        }

        let started = Instant::now();
        let engine = Arc::clone(&self.engine);
        let proof = proof.to_vec();
        let instance = public_input.instance()?;
        let outcome = tokio::task::spawn_blocking(move || engine.verify(&proof, &instance))
            .await
            .map_err(|e| MembershipError::EngineInit(format!("verification task failed: {e}")))?;

        if self.config.enable_profiler {
            info!("Verification time: {:?}", started.elapsed());
        }

        match outcome {
            Ok(()) => Ok(true),
            Err(PlonkError::Transcript(e)) => Err(MembershipError::MalformedInput(format!(
                "proof could not be read: {e}"
            ))),
            Err(e) => {
                debug!("Proof rejected: {e:?}");
                Ok(false)
            }
        }
    }
}
