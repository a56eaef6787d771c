//! Type definitions for the group-membership workflow.

use crate::circuit::INSTANCE_ROWS;
use crate::ecdsa::SignatureInstance;
use crate::error::{MembershipError, Result};
use crate::ethereum::RecoverableSignature;
use crate::utils::{bytes_to_field, field_from_bytes, field_to_bytes};
use anyhow::Context;
use log::debug;
use pasta_curves::pallas;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const HASH_SIZE: usize = 32;

/// Length of a serialized [`PublicInput`].
pub const PUBLIC_INPUT_SIZE: usize = 3 * HASH_SIZE + 1;

/// Which public identifier a group is built from.
///
/// One variant is chosen per proof session; prover and verifier must agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierVariant {
    /// 64-byte uncompressed secp256k1 public key, hashed into a leaf.
    #[default]
    PublicKey,
    /// 20-byte Ethereum address, inserted as a leaf value directly.
    Address,
}

impl fmt::Display for IdentifierVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentifierVariant::PublicKey => f.write_str("public_key"),
            IdentifierVariant::Address => f.write_str("address"),
        }
    }
}

impl std::str::FromStr for IdentifierVariant {
    type Err = MembershipError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "public_key" | "publickey" | "pubkey" => Ok(IdentifierVariant::PublicKey),
            "address" => Ok(IdentifierVariant::Address),
            other => Err(MembershipError::MalformedInput(format!(
                "unknown identifier variant '{other}', expected 'public_key' or 'address'"
            ))),
        }
    }
}

/// EIP-191 personal-message digest of an application message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageDigest(pub [u8; HASH_SIZE]);

impl MessageDigest {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    /// Upper and lower 128 bits, each as a field element.
    ///
    /// Two halves keep every 256-bit digest distinct in the field, where a
    /// single element would identify `d` with `d + p`.
    #[must_use]
    pub fn halves(&self) -> [pallas::Base; 2] {
        let mut high = [0u8; HASH_SIZE];
        let mut low = [0u8; HASH_SIZE];
        high[HASH_SIZE / 2..].copy_from_slice(&self.0[..HASH_SIZE / 2]);
        low[HASH_SIZE / 2..].copy_from_slice(&self.0[HASH_SIZE / 2..]);
        [bytes_to_field(&high), bytes_to_field(&low)]
    }
}

impl fmt::Display for MessageDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Public values a verifier needs alongside a proof.
///
/// Serialization is fixed-width so the bytes produced at prove time are the
/// bytes checked at verify time: `repr(root) || digest || r || v`.
///
/// `r` and `v` are the public half of the member's signature; `s` stays with
/// the prover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicInput {
    /// Group tree root the prover's leaf was included under.
    pub root: pallas::Base,
    /// Digest of the signed message.
    pub digest: MessageDigest,
    /// x-coordinate of the signature nonce point, big-endian.
    pub r: [u8; HASH_SIZE],
    /// Recovery indicator, 27 or 28.
    pub v: u8,
}

impl PublicInput {
    #[must_use]
    pub fn new(root: pallas::Base, digest: MessageDigest, signature: &RecoverableSignature) -> Self {
        Self {
            root,
            digest,
            r: signature.r,
            v: signature.v,
        }
    }

    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(PUBLIC_INPUT_SIZE);
        out.extend_from_slice(&field_to_bytes(self.root));
        out.extend_from_slice(self.digest.as_bytes());
        out.extend_from_slice(&self.r);
        out.push(self.v);
        out
    }

    /// # Errors
    /// [`MembershipError::MalformedInput`] on a wrong length, a root that is
    /// not a canonical field encoding, or a recovery indicator other than 27
    /// or 28.
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != PUBLIC_INPUT_SIZE {
            return Err(MembershipError::MalformedInput(format!(
                "public input must be {} bytes, got {}",
                PUBLIC_INPUT_SIZE,
                bytes.len()
            )));
        }

        let mut root_bytes = [0u8; HASH_SIZE];
        root_bytes.copy_from_slice(&bytes[..HASH_SIZE]);
        let root = field_from_bytes(root_bytes).ok_or_else(|| {
            MembershipError::MalformedInput("root is not a canonical field element".to_string())
        })?;

        let mut digest = [0u8; HASH_SIZE];
        digest.copy_from_slice(&bytes[HASH_SIZE..2 * HASH_SIZE]);
        let mut r = [0u8; HASH_SIZE];
        r.copy_from_slice(&bytes[2 * HASH_SIZE..3 * HASH_SIZE]);

        let v = bytes[3 * HASH_SIZE];
        if v != 27 && v != 28 {
            return Err(MembershipError::MalformedInput(format!(
                "invalid recovery indicator {v}"
            )));
        }

        Ok(Self {
            root,
            digest: MessageDigest(digest),
            r,
            v,
        })
    }

    /// Instance column values, in row order: root, digest high, digest low,
    /// then the signature check's start point and window table.
    ///
    /// # Errors
    /// [`MembershipError::MalformedInput`] if `(r, v)` does not describe a
    /// signature nonce point.
    pub fn instance(&self) -> Result<Vec<pallas::Base>> {
        let signature = SignatureInstance::derive(&self.r, self.v, &self.digest)?;
        let mut instance = Vec::with_capacity(INSTANCE_ROWS);
        instance.push(self.root);
        instance.extend(self.digest.halves());
        instance.extend(signature.field_values());
        debug!("Built {} instance rows", instance.len());
        Ok(instance)
    }
}

/// A transportable membership proof: raw halo2 proof bytes plus the public
/// input they are committed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipProof {
    pub proof: Vec<u8>,
    pub public_input: PublicInput,
}

/// JSON artifact written by the prover binary and read by the verifier binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofOutput {
    /// Identifier variant the group was built from.
    pub variant: IdentifierVariant,
    /// Depth of the group tree (and of the circuit's sibling path).
    pub tree_depth: usize,
    /// Group root as hex of its canonical little-endian encoding.
    pub merkle_root: String,
    /// Message digest as hex.
    pub message_digest: String,
    /// Hex of [`PublicInput::serialize`]; this is what gets verified.
    pub public_input: String,
    /// Raw ZK-SNARK proof bytes
    pub zkp_proof: Vec<u8>,
    /// Unix timestamp when proof was generated
    pub timestamp: u64,
}

impl ProofOutput {
    pub fn new(
        variant: IdentifierVariant,
        tree_depth: usize,
        proof: &MembershipProof,
        timestamp: u64,
    ) -> Self {
        Self {
            variant,
            tree_depth,
            merkle_root: hex::encode(field_to_bytes(proof.public_input.root)),
            message_digest: hex::encode(proof.public_input.digest.as_bytes()),
            public_input: hex::encode(proof.public_input.serialize()),
            zkp_proof: proof.proof.clone(),
            timestamp,
        }
    }

    /// Decoded serialized public input.
    pub fn public_input_bytes(&self) -> anyhow::Result<Vec<u8>> {
        hex::decode(self.public_input.trim_start_matches("0x"))
            .with_context(|| format!("Invalid public input hex '{}'", self.public_input))
    }

    /// Validates the artifact structure before it is handed to the verifier.
    ///
    /// Checks non-empty fields, the timestamp window, hex encodings and that
    /// the serialized public input agrees with `merkle_root` and
    /// `message_digest`.
    pub fn validate(&self, tolerance_secs: u64, max_age_secs: u64) -> anyhow::Result<()> {
        debug!("Starting proof output validation");
        debug!("ZK proof size: {} bytes", self.zkp_proof.len());
        debug!("Timestamp: {}", self.timestamp);

        if self.merkle_root.is_empty() {
            return Err(anyhow::anyhow!(
                "Merkle root cannot be empty. Expected a {}-byte hex string.",
                HASH_SIZE
            ));
        }
        if self.message_digest.is_empty() {
            return Err(anyhow::anyhow!(
                "Message digest cannot be empty. Expected a {}-byte hex string.",
                HASH_SIZE
            ));
        }
        if self.zkp_proof.is_empty() {
            return Err(anyhow::anyhow!(
                "ZK proof cannot be empty. The proof data is missing."
            ));
        }

        let current_timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .map_err(|e| anyhow::anyhow!("System clock unavailable: {}", e))?;

        if self.timestamp > current_timestamp + tolerance_secs {
            return Err(anyhow::anyhow!(
                "Timestamp is too far in the future: {} (current: {}, tolerance: {}s).",
                self.timestamp,
                current_timestamp,
                tolerance_secs
            ));
        }
        if current_timestamp > self.timestamp + max_age_secs {
            return Err(anyhow::anyhow!(
                "Timestamp is too old: {} (current: {}, max age: {}s). Please generate a fresh proof.",
                self.timestamp,
                current_timestamp,
                max_age_secs
            ));
        }

        let root_bytes = hex::decode(&self.merkle_root)
            .with_context(|| format!("Invalid merkle root hex '{}'", self.merkle_root))?;
        if root_bytes.len() != HASH_SIZE {
            return Err(anyhow::anyhow!(
                "Root must be exactly {} bytes, but got {} bytes.",
                HASH_SIZE,
                root_bytes.len()
            ));
        }
        let digest_bytes = hex::decode(&self.message_digest)
            .with_context(|| format!("Invalid message digest hex '{}'", self.message_digest))?;
        if digest_bytes.len() != HASH_SIZE {
            return Err(anyhow::anyhow!(
                "Message digest must be exactly {} bytes, but got {} bytes.",
                HASH_SIZE,
                digest_bytes.len()
            ));
        }

        let public_input = self.public_input_bytes()?;
        if public_input.len() != PUBLIC_INPUT_SIZE
            || public_input[..HASH_SIZE] != root_bytes[..]
            || public_input[HASH_SIZE..2 * HASH_SIZE] != digest_bytes[..]
        {
            return Err(anyhow::anyhow!(
                "Public input does not match merkle_root and message_digest. This indicates corrupted or tampered proof data."
            ));
        }

        Ok(())
    }

    /// Fails unless the artifact's root is `expected` (hex, `0x` optional).
    ///
    /// A proof only shows membership of the group the root commits to, so a
    /// verifier that knows which group it expects must pin the root.
    pub fn check_root(&self, expected: &str) -> anyhow::Result<()> {
        let expected = expected.trim();
        let expected = expected
            .strip_prefix("0x")
            .or_else(|| expected.strip_prefix("0X"))
            .unwrap_or(expected);
        let expected = hex::decode(expected)
            .with_context(|| format!("Invalid expected root hex '{expected}'"))?;
        let actual = hex::decode(&self.merkle_root)
            .with_context(|| format!("Invalid merkle root hex '{}'", self.merkle_root))?;

        if expected != actual {
            return Err(anyhow::anyhow!(
                "Merkle root 0x{} does not match the expected group root 0x{}.",
                self.merkle_root,
                hex::encode(&expected)
            ));
        }
        Ok(())
    }
}
