//! Error taxonomy for the group-membership workflow.

use thiserror::Error;

/// Typed failures surfaced by every component of the workflow.
///
/// A well-formed proof that does not verify is not an error: verification
/// reports it as `Ok(false)`.
#[derive(Debug, Error)]
pub enum MembershipError {
    /// The secret key is malformed or not a valid secp256k1 scalar.
    #[error("invalid secret key: {0}")]
    InvalidKey(String),
    /// The group already holds `2^depth` members.
    #[error("group is full: capacity of {capacity} members exceeded")]
    CapacityExceeded { capacity: u64 },
    /// A tree was requested deeper than the supported maximum.
    #[error("tree depth {depth} exceeds maximum of {max}")]
    InvalidDepth { depth: usize, max: usize },
    /// A witness was requested for a leaf that was never inserted.
    #[error("leaf index {index} out of range (group holds {len} members)")]
    IndexOutOfRange { index: u64, len: u64 },
    /// Lookup miss.
    #[error("identifier not found in group")]
    NotFound,
    /// Hashing, proving or verifying runtime failed to come up.
    #[error("engine initialization failed: {0}")]
    EngineInit(String),
    /// The proving engine rejected the supplied inputs.
    #[error("proof generation failed: {0}")]
    ProofGeneration(String),
    /// A proof, public input, signature or hex value could not be parsed.
    #[error("malformed input: {0}")]
    MalformedInput(String),
}

pub type Result<T> = std::result::Result<T, MembershipError>;
