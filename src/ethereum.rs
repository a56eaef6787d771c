//! Identity derivation over secp256k1.
//!
//! Turns a secret key into the public identifier a group is built from (a
//! public key or the Ethereum address derived from it) and signs application
//! messages under the EIP-191 personal-message convention.

use crate::error::{MembershipError, Result};
use crate::types::{IdentifierVariant, MessageDigest, HASH_SIZE};
use crate::utils::{bytes_to_field, decode_hex_array, poseidon_hash, validate_and_strip_hex};
use ethers::core::k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, VerifyingKey};
use ethers::signers::LocalWallet;
use ethers::types::Address;
use ethers::utils::{hash_message, keccak256};
use pasta_curves::pallas;
use rand::{CryptoRng, RngCore};
use std::fmt;

/// Expected length of an Ethereum address in hex characters (excluding 0x prefix)
pub const ADDRESS_HEX_LENGTH: usize = 40;

/// Expected length of an Ethereum private key in hex characters (excluding 0x prefix)
pub const PRIVATE_KEY_HEX_LENGTH: usize = 64;

/// Uncompressed public key length without the SEC1 `0x04` tag.
pub const PUBLIC_KEY_SIZE: usize = 64;

/// `r || s || v`
pub const SIGNATURE_SIZE: usize = 65;

const TAG_CODE_UNITS: usize = 16;

/// A secp256k1 secret scalar.
///
/// Construction validates the scalar, so every `SecretKey` can sign.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey([u8; HASH_SIZE]);

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

impl SecretKey {
    /// # Errors
    /// [`MembershipError::InvalidKey`] if `bytes` is not 32 bytes or is not a
    /// valid scalar (zero or at least the curve order).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != HASH_SIZE {
            return Err(MembershipError::InvalidKey(format!(
                "secret key must be {} bytes, got {}",
                HASH_SIZE,
                bytes.len()
            )));
        }
        LocalWallet::from_bytes(bytes).map_err(|e| MembershipError::InvalidKey(e.to_string()))?;

        let mut key = [0u8; HASH_SIZE];
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    /// Parses a hex private key, with or without `0x`.
    pub fn from_hex(private_key: &str) -> Result<Self> {
        validate_private_key(private_key)?;
        let bytes: [u8; HASH_SIZE] = decode_hex_array(private_key)
            .map_err(|e| MembershipError::InvalidKey(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// Deterministic demo key for a roster tag.
    ///
    /// The tag's UTF-16 code units are repeated, and truncated, to exactly 16
    /// units and encoded little-endian, giving 32 bytes.
    ///
    /// ```
    /// use zkp_group_membership::ethereum::SecretKey;
    ///
    /// assert_eq!(SecretKey::from_tag("ab").unwrap(), SecretKey::from_tag("abab").unwrap());
    /// assert!(SecretKey::from_tag("").is_err());
    /// ```
    pub fn from_tag(tag: &str) -> Result<Self> {
        let units: Vec<u16> = tag.encode_utf16().collect();
        if units.is_empty() {
            return Err(MembershipError::InvalidKey(
                "member tag cannot be empty".to_string(),
            ));
        }

        let bytes: Vec<u8> = units
            .iter()
            .cycle()
            .take(TAG_CODE_UNITS)
            .flat_map(|unit| unit.to_le_bytes())
            .collect();
        Self::from_bytes(&bytes)
    }

    /// Fresh random key.
    pub fn random<R: CryptoRng + RngCore>(rng: &mut R) -> Self {
        let wallet = LocalWallet::new(rng);
        let mut key = [0u8; HASH_SIZE];
        key.copy_from_slice(&wallet.signer().to_bytes());
        Self(key)
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    fn wallet(&self) -> Result<LocalWallet> {
        LocalWallet::from_bytes(&self.0).map_err(|e| MembershipError::InvalidKey(e.to_string()))
    }
}

/// Uncompressed secp256k1 public key, `x || y`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey(pub [u8; PUBLIC_KEY_SIZE]);

impl PublicKey {
    #[must_use]
    pub fn x(&self) -> [u8; 32] {
        let mut x = [0u8; 32];
        x.copy_from_slice(&self.0[..32]);
        x
    }

    #[must_use]
    pub fn y(&self) -> [u8; 32] {
        let mut y = [0u8; 32];
        y.copy_from_slice(&self.0[32..]);
        y
    }

    /// Parses 128 hex digits, optionally prefixed with `0x` and/or the SEC1
    /// uncompressed tag `04`.
    pub fn from_hex(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let stripped = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        let body = if stripped.len() == PUBLIC_KEY_SIZE * 2 + 2 && stripped.starts_with("04") {
            &stripped[2..]
        } else {
            stripped
        };
        decode_hex_array(body).map(Self)
    }

    fn from_verifying_key(key: &VerifyingKey) -> Self {
        let point = key.to_encoded_point(false);
        let mut bytes = [0u8; PUBLIC_KEY_SIZE];
        // skip the 0x04 tag
        bytes.copy_from_slice(&point.as_bytes()[1..]);
        Self(bytes)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey(0x{})", hex::encode(self.0))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Recoverable ECDSA signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoverableSignature {
    pub r: [u8; 32],
    pub s: [u8; 32],
    /// 27 or 28.
    pub v: u8,
}

impl RecoverableSignature {
    /// Wire format `0x || hex(r) || hex(s) || hex(v)`.
    #[must_use]
    pub fn to_hex(&self) -> String {
        format!("0x{}{}{:02x}", hex::encode(self.r), hex::encode(self.s), self.v)
    }

    pub fn from_hex(input: &str) -> Result<Self> {
        let bytes: [u8; SIGNATURE_SIZE] = decode_hex_array(input)?;
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..64]);
        Ok(Self { r, s, v: bytes[64] })
    }

    fn recovery_id(&self) -> Result<RecoveryId> {
        let id = if self.v >= 27 { self.v - 27 } else { self.v };
        RecoveryId::try_from(id).map_err(|_| {
            MembershipError::MalformedInput(format!("invalid recovery indicator {}", self.v))
        })
    }
}

impl TryFrom<ethers::types::Signature> for RecoverableSignature {
    type Error = MembershipError;

    fn try_from(signature: ethers::types::Signature) -> Result<Self> {
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        signature.r.to_big_endian(&mut r);
        signature.s.to_big_endian(&mut s);
        let v = u8::try_from(signature.v).map_err(|_| {
            MembershipError::MalformedInput(format!("invalid recovery indicator {}", signature.v))
        })?;
        Ok(Self { r, s, v })
    }
}

/// The identifier a member is known by inside a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Identifier {
    PublicKey(PublicKey),
    Address(Address),
}

impl Identifier {
    /// Derives the identifier of `variant` for a secret key.
    pub fn derive(secret_key: &SecretKey, variant: IdentifierVariant) -> Result<Self> {
        let public_key = derive_public_key(secret_key)?;
        Ok(Self::from_public_key(&public_key, variant))
    }

    #[must_use]
    pub fn from_public_key(public_key: &PublicKey, variant: IdentifierVariant) -> Self {
        match variant {
            IdentifierVariant::PublicKey => Identifier::PublicKey(*public_key),
            IdentifierVariant::Address => Identifier::Address(derive_address(public_key)),
        }
    }

    /// Parses a roster line for `variant`.
    pub fn parse(input: &str, variant: IdentifierVariant) -> Result<Self> {
        match variant {
            IdentifierVariant::PublicKey => PublicKey::from_hex(input).map(Identifier::PublicKey),
            IdentifierVariant::Address => {
                let normalized = normalize_address(input)?;
                let bytes: [u8; 20] = decode_hex_array(&normalized)?;
                Ok(Identifier::Address(Address::from(bytes)))
            }
        }
    }

    #[must_use]
    pub fn variant(&self) -> IdentifierVariant {
        match self {
            Identifier::PublicKey(_) => IdentifierVariant::PublicKey,
            Identifier::Address(_) => IdentifierVariant::Address,
        }
    }

    /// Field elements the circuit witnesses to recompute the leaf.
    #[must_use]
    pub fn preimage(&self) -> Vec<pallas::Base> {
        match self {
            Identifier::PublicKey(key) => {
                vec![bytes_to_field(&key.x()), bytes_to_field(&key.y())]
            }
            Identifier::Address(address) => vec![bytes_to_field(&address_to_bytes(address))],
        }
    }

    /// Leaf value inserted into the group tree.
    #[must_use]
    pub fn to_leaf(&self) -> pallas::Base {
        let preimage = self.preimage();
        match self {
            Identifier::PublicKey(_) => poseidon_hash(preimage[0], preimage[1]),
            Identifier::Address(_) => preimage[0],
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::PublicKey(key) => write!(f, "{key}"),
            Identifier::Address(address) => write!(f, "{address:?}"),
        }
    }
}

/// Hashes `message` under the personal-message convention and signs the
/// digest.
///
/// # Errors
/// [`MembershipError::InvalidKey`] if signing with `secret_key` fails.
pub fn derive_signature(
    secret_key: &SecretKey,
    message: &[u8],
) -> Result<(RecoverableSignature, MessageDigest)> {
    let digest = hash_message(message);
    let signature = secret_key
        .wallet()?
        .sign_hash(digest)
        .map_err(|e| MembershipError::InvalidKey(e.to_string()))?;
    Ok((
        RecoverableSignature::try_from(signature)?,
        MessageDigest(digest.to_fixed_bytes()),
    ))
}

pub fn derive_public_key(secret_key: &SecretKey) -> Result<PublicKey> {
    let wallet = secret_key.wallet()?;
    Ok(PublicKey::from_verifying_key(wallet.signer().verifying_key()))
}

/// Last 20 bytes of `keccak256(x || y)`.
#[must_use]
pub fn derive_address(public_key: &PublicKey) -> Address {
    let hash = keccak256(public_key.0);
    Address::from_slice(&hash[12..])
}

/// Recovers the signer's public key from a signature over `digest`.
///
/// # Errors
/// [`MembershipError::MalformedInput`] if the signature components are out of
/// range or no key recovers.
pub fn recover_public_key(
    digest: &MessageDigest,
    signature: &RecoverableSignature,
) -> Result<PublicKey> {
    let mut rs = [0u8; 64];
    rs[..32].copy_from_slice(&signature.r);
    rs[32..].copy_from_slice(&signature.s);
    let ecdsa = EcdsaSignature::from_slice(&rs)
        .map_err(|e| MembershipError::MalformedInput(format!("invalid signature: {e}")))?;
    let recovery_id = signature.recovery_id()?;

    let key = VerifyingKey::recover_from_prehash(digest.as_bytes(), &ecdsa, recovery_id)
        .map_err(|e| MembershipError::MalformedInput(format!("public key recovery failed: {e}")))?;
    Ok(PublicKey::from_verifying_key(&key))
}

/// Validates and normalizes a single Ethereum address.
///
/// Returns a lowercase hex string without the 0x prefix.
///
/// ```
/// use zkp_group_membership::ethereum::normalize_address;
///
/// let normalized = normalize_address("0x742d35Cc6634C0532925a3b844Bc454e4438f44e").unwrap();
/// assert_eq!(normalized, "742d35cc6634c0532925a3b844bc454e4438f44e");
/// ```
pub fn normalize_address(address: &str) -> Result<String> {
    validate_and_strip_hex(address, ADDRESS_HEX_LENGTH).map(|s| s.to_lowercase())
}

/// Validates an Ethereum private key's textual form.
///
/// # Errors
/// [`MembershipError::InvalidKey`] if it is not 64 hex characters or is all
/// zeros.
pub fn validate_private_key(private_key: &str) -> Result<()> {
    let stripped = validate_and_strip_hex(private_key, PRIVATE_KEY_HEX_LENGTH)
        .map_err(|e| MembershipError::InvalidKey(e.to_string()))?;

    if stripped.chars().all(|c| c == '0') {
        return Err(MembershipError::InvalidKey(
            "private key cannot be all zeros".to_string(),
        ));
    }

    Ok(())
}

/// Left-pads a 20-byte address to 32 bytes.
#[must_use]
pub fn address_to_bytes(address: &Address) -> [u8; HASH_SIZE] {
    let mut full_bytes = [0u8; HASH_SIZE];
    full_bytes[HASH_SIZE - 20..].copy_from_slice(address.as_bytes());
    full_bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::signers::Signer;

    const KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    #[test]
    fn test_secret_key_from_hex() {
        assert!(SecretKey::from_hex(KEY).is_ok());
        assert!(matches!(
            SecretKey::from_hex("0x0000000000000000000000000000000000000000000000000000000000000000"),
            Err(MembershipError::InvalidKey(_))
        ));
        assert!(matches!(
            SecretKey::from_hex("0xzzzz"),
            Err(MembershipError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_secret_key_rejects_scalar_above_order() {
        assert!(matches!(
            SecretKey::from_bytes(&[0xff; 32]),
            Err(MembershipError::InvalidKey(_))
        ));
        assert!(SecretKey::from_bytes(&[1u8; 31]).is_err());
    }

    #[test]
    fn test_secret_key_from_tag_matches_utf16_padding() {
        let key = SecretKey::from_tag("ab").unwrap();
        let mut expected = Vec::new();
        for _ in 0..8 {
            expected.extend_from_slice(&[b'a', 0, b'b', 0]);
        }
        assert_eq!(key, SecretKey::from_bytes(&expected).unwrap());
    }

    #[test]
    fn test_secret_key_from_tag_surrogate_pairs() {
        // two code units per emoji, eight repetitions
        let key = SecretKey::from_tag("\u{1F9D9}");
        assert!(key.is_ok());
        assert_ne!(key.unwrap(), SecretKey::from_tag("\u{1F977}").unwrap());
    }

    #[test]
    fn test_secret_key_debug_is_redacted() {
        let key = SecretKey::from_hex(KEY).unwrap();
        assert_eq!(format!("{key:?}"), "SecretKey(..)");
    }

    #[test]
    fn test_address_matches_wallet() {
        let key = SecretKey::from_hex(KEY).unwrap();
        let wallet: LocalWallet = KEY.parse().unwrap();
        let public_key = derive_public_key(&key).unwrap();
        assert_eq!(derive_address(&public_key), wallet.address());
    }

    #[test]
    fn test_signature_recovers_public_key() {
        let key = SecretKey::from_tag("\u{1F9D9}").unwrap();
        let (signature, digest) = derive_signature(&key, b"harry potter").unwrap();
        assert!(signature.v == 27 || signature.v == 28);
        assert_eq!(digest, MessageDigest(hash_message(b"harry potter").to_fixed_bytes()));

        let recovered = recover_public_key(&digest, &signature).unwrap();
        assert_eq!(recovered, derive_public_key(&key).unwrap());
    }

    #[test]
    fn test_recovery_with_other_digest_yields_other_key() {
        let key = SecretKey::random(&mut rand::thread_rng());
        let (signature, _) = derive_signature(&key, b"message one").unwrap();
        let (_, other_digest) = derive_signature(&key, b"message two").unwrap();
        let recovered = recover_public_key(&other_digest, &signature);
        assert!(recovered.map_or(true, |pk| pk != derive_public_key(&key).unwrap()));
    }

    #[test]
    fn test_signature_wire_format() {
        let key = SecretKey::from_hex(KEY).unwrap();
        let (signature, _) = derive_signature(&key, b"hello").unwrap();
        let wire = signature.to_hex();
        assert_eq!(wire.len(), 2 + SIGNATURE_SIZE * 2);
        assert!(wire.ends_with("1b") || wire.ends_with("1c"));
        assert_eq!(RecoverableSignature::from_hex(&wire).unwrap(), signature);
    }

    #[test]
    fn test_invalid_recovery_indicator() {
        let key = SecretKey::from_hex(KEY).unwrap();
        let (mut signature, digest) = derive_signature(&key, b"hello").unwrap();
        signature.v = 99;
        assert!(matches!(
            recover_public_key(&digest, &signature),
            Err(MembershipError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_identifier_leaves() {
        let key = SecretKey::from_hex(KEY).unwrap();
        let public_key = derive_public_key(&key).unwrap();

        let by_key = Identifier::derive(&key, IdentifierVariant::PublicKey).unwrap();
        assert_eq!(
            by_key.to_leaf(),
            poseidon_hash(bytes_to_field(&public_key.x()), bytes_to_field(&public_key.y()))
        );

        let by_address = Identifier::derive(&key, IdentifierVariant::Address).unwrap();
        assert_eq!(by_address.variant(), IdentifierVariant::Address);
        assert_eq!(by_address.preimage().len(), 1);
        assert_eq!(
            by_address.to_leaf(),
            bytes_to_field(&address_to_bytes(&derive_address(&public_key)))
        );
    }

    #[test]
    fn test_identifier_parse_roundtrip() {
        let key = SecretKey::random(&mut rand::thread_rng());
        let public_key = derive_public_key(&key).unwrap();

        let parsed = Identifier::parse(&public_key.to_string(), IdentifierVariant::PublicKey).unwrap();
        assert_eq!(parsed, Identifier::PublicKey(public_key));

        let tagged = format!("04{}", hex::encode(public_key.0));
        assert_eq!(
            Identifier::parse(&tagged, IdentifierVariant::PublicKey).unwrap(),
            parsed
        );

        let address = derive_address(&public_key);
        let parsed = Identifier::parse(&format!("{address:?}"), IdentifierVariant::Address).unwrap();
        assert_eq!(parsed, Identifier::Address(address));
    }

    #[test]
    fn test_normalize_address_invalid() {
        assert!(normalize_address("0x742d35Cc6634C0532925a3b844Bc454e4438").is_err());
        assert!(normalize_address("0x742d35Cc6634C0532925a3b844Bc454e4438f44g").is_err());
    }

    #[test]
    fn test_address_to_bytes_pads_left() {
        let address = Address::from([0x11u8; 20]);
        let bytes = address_to_bytes(&address);
        assert_eq!(bytes[..12], [0u8; 12]);
        assert_eq!(bytes[12..], [0x11u8; 20]);
    }
}
