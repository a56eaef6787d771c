//! Configuration for the membership prover and verifier.
//!
//! [`MembershipConfig`] is what the engines consume; [`Config`] is the TOML
//! file layout the binaries load it from.

use crate::merkle::MAX_TREE_DEPTH;
use crate::types::IdentifierVariant;
use crate::{CIRCUIT_K, DEFAULT_TREE_DEPTH};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const DEFAULT_MAX_ROSTER_FILE_SIZE: u64 = 10 * 1024 * 1024;
const DEFAULT_MAX_PROOF_FILE_SIZE: u64 = 1024 * 1024;
const DEFAULT_MAX_ZK_PROOF_SIZE: usize = 512 * 1024;
const DEFAULT_TIMESTAMP_TOLERANCE_SECS: u64 = 300;
const DEFAULT_TIMESTAMP_MAX_AGE_SECS: u64 = 86400;

/// Circuit and engine options shared by proving and verifying.
///
/// Prover and verifier must agree on `variant`, `tree_depth` and `circuit_k`;
/// anything else yields keys that cannot reconcile each other's proofs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipConfig {
    pub variant: IdentifierVariant,
    pub tree_depth: usize,
    pub circuit_k: u32,
    /// Log setup, proving and verifying times and proof sizes.
    pub enable_profiler: bool,
    /// Proofs above this size are rejected as malformed before verifying.
    pub max_proof_size: usize,
}

pub type ProvingConfig = MembershipConfig;
pub type VerifyingConfig = MembershipConfig;

impl Default for MembershipConfig {
    fn default() -> Self {
        Self::public_key()
    }
}

impl MembershipConfig {
    /// Public-key membership at the default depth.
    #[must_use]
    pub fn public_key() -> Self {
        Self {
            variant: IdentifierVariant::PublicKey,
            tree_depth: DEFAULT_TREE_DEPTH,
            circuit_k: CIRCUIT_K,
            enable_profiler: false,
            max_proof_size: DEFAULT_MAX_ZK_PROOF_SIZE,
        }
    }

    /// Address membership at the default depth.
    #[must_use]
    pub fn address() -> Self {
        Self {
            variant: IdentifierVariant::Address,
            ..Self::public_key()
        }
    }

    #[must_use]
    pub fn with_profiler(mut self, enabled: bool) -> Self {
        self.enable_profiler = enabled;
        self
    }

    #[must_use]
    pub fn with_tree_depth(mut self, depth: usize) -> Self {
        self.tree_depth = depth;
        self
    }

    #[must_use]
    pub fn with_circuit_k(mut self, k: u32) -> Self {
        self.circuit_k = k;
        self
    }

    /// Checks `tree_depth` against the range the engines accept.
    pub fn check_depth(&self) -> std::result::Result<(), String> {
        if self.tree_depth == 0 || self.tree_depth > MAX_TREE_DEPTH {
            return Err(format!(
                "tree depth must be between 1 and {MAX_TREE_DEPTH}, got {}",
                self.tree_depth
            ));
        }
        Ok(())
    }
}

/// File configuration for the binaries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub circuit: CircuitConfig,
    #[serde(default)]
    pub roster: RosterConfig,
    #[serde(default)]
    pub proof: ProofConfig,
    #[serde(default)]
    pub profiling: ProfilingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitConfig {
    #[serde(default)]
    pub variant: IdentifierVariant,
    #[serde(default = "default_tree_depth")]
    pub tree_depth: usize,
    #[serde(default = "default_circuit_k")]
    pub k: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterConfig {
    #[serde(default = "default_max_roster_file_size")]
    pub max_file_size: u64,
    #[serde(default)]
    pub default_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofConfig {
    #[serde(default = "default_max_proof_file_size")]
    pub max_file_size: u64,
    #[serde(default = "default_max_zk_proof_size")]
    pub max_zk_proof_size: usize,
    #[serde(default = "default_proof_output_file")]
    pub output_file: PathBuf,
    #[serde(default = "default_timestamp_tolerance_secs")]
    pub timestamp_tolerance_secs: u64,
    #[serde(default = "default_timestamp_max_age_secs")]
    pub timestamp_max_age_secs: u64,
    /// Root (hex) of the group a verifier accepts proofs for. Without it a
    /// proof only shows membership of whichever group its own root commits to.
    #[serde(default)]
    pub expected_root: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfilingConfig {
    #[serde(default)]
    pub enabled: bool,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            variant: IdentifierVariant::default(),
            tree_depth: DEFAULT_TREE_DEPTH,
            k: CIRCUIT_K,
        }
    }
}

impl Default for RosterConfig {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_ROSTER_FILE_SIZE,
            default_file: None,
        }
    }
}

impl Default for ProofConfig {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_PROOF_FILE_SIZE,
            max_zk_proof_size: DEFAULT_MAX_ZK_PROOF_SIZE,
            output_file: default_proof_output_file(),
            timestamp_tolerance_secs: DEFAULT_TIMESTAMP_TOLERANCE_SECS,
            timestamp_max_age_secs: DEFAULT_TIMESTAMP_MAX_AGE_SECS,
            expected_root: None,
        }
    }
}

fn default_tree_depth() -> usize {
    DEFAULT_TREE_DEPTH
}

fn default_circuit_k() -> u32 {
    CIRCUIT_K
}

fn default_max_roster_file_size() -> u64 {
    DEFAULT_MAX_ROSTER_FILE_SIZE
}

fn default_max_proof_file_size() -> u64 {
    DEFAULT_MAX_PROOF_FILE_SIZE
}

fn default_max_zk_proof_size() -> usize {
    DEFAULT_MAX_ZK_PROOF_SIZE
}

fn default_proof_output_file() -> PathBuf {
    PathBuf::from("proof.json")
}

fn default_timestamp_tolerance_secs() -> u64 {
    DEFAULT_TIMESTAMP_TOLERANCE_SECS
}

fn default_timestamp_max_age_secs() -> u64 {
    DEFAULT_TIMESTAMP_MAX_AGE_SECS
}

impl Config {
    pub fn load_from_file(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn load_from_file_or_default(path: &PathBuf) -> Self {
        Self::load_from_file(path).unwrap_or_default()
    }

    pub fn save_to_file(&self, path: &PathBuf) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Engine options described by this file.
    #[must_use]
    pub fn membership(&self) -> MembershipConfig {
        MembershipConfig {
            variant: self.circuit.variant,
            tree_depth: self.circuit.tree_depth,
            circuit_k: self.circuit.k,
            enable_profiler: self.profiling.enabled,
            max_proof_size: self.proof.max_zk_proof_size,
        }
    }
}
