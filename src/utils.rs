//! Hex validation and field-element helpers shared by the tree and the circuit.

use crate::error::{MembershipError, Result};
use halo2_gadgets::poseidon::primitives::{
    self as poseidon, ConstantLength, P128Pow5T3 as PoseidonSpec,
};
use pasta_curves::group::ff::PrimeField;
use pasta_curves::pallas;

fn is_valid_hex_string(s: &str) -> bool {
    s.chars().all(|c| c.is_ascii_hexdigit())
}

fn strip_hex_prefix(input: &str) -> &str {
    input
        .trim()
        .strip_prefix("0x")
        .or_else(|| input.trim().strip_prefix("0X"))
        .unwrap_or_else(|| input.trim())
}

/// Validates and strips hex prefix from a string.
///
/// # Errors
/// Returns [`MembershipError::MalformedInput`] if the stripped string does not
/// have `expected_len` characters or contains non-hex characters.
///
/// # Examples
///
/// ```
/// use zkp_group_membership::utils::validate_and_strip_hex;
///
/// let result = validate_and_strip_hex("0x1234abcd", 8).unwrap();
/// assert_eq!(result, "1234abcd");
/// ```
pub fn validate_and_strip_hex(input: &str, expected_len: usize) -> Result<String> {
    let stripped = strip_hex_prefix(input);

    if stripped.len() != expected_len {
        return Err(MembershipError::MalformedInput(format!(
            "invalid hex string: must be {} characters (got {})",
            expected_len,
            stripped.len()
        )));
    }

    if !is_valid_hex_string(stripped) {
        return Err(MembershipError::MalformedInput(
            "invalid hex string: contains non-hex characters".to_string(),
        ));
    }

    Ok(stripped.to_string())
}

/// Decodes a fixed-size hex value, with or without a `0x` prefix.
pub fn decode_hex_array<const N: usize>(input: &str) -> Result<[u8; N]> {
    let stripped = validate_and_strip_hex(input, N * 2)?;
    let mut out = [0u8; N];
    hex::decode_to_slice(stripped, &mut out)
        .map_err(|e| MembershipError::MalformedInput(format!("invalid hex string: {e}")))?;
    Ok(out)
}

/// Returns `true` if the string is non-empty hex, optionally `0x`-prefixed.
#[must_use]
pub fn validate_hex_string(input: &str) -> bool {
    let stripped = strip_hex_prefix(input);

    if stripped.is_empty() {
        return false;
    }

    is_valid_hex_string(stripped)
}

const BASE_U64: u64 = 256;

/// Converts 32 big-endian bytes to a Pallas base field element.
///
/// The input is read as a base-256 number and reduced modulo the field order,
/// so a 20-byte address left-padded with zeros maps to its integer value.
#[inline]
#[must_use]
pub fn bytes_to_field(bytes: &[u8; 32]) -> pallas::Base {
    let mut value = pallas::Base::zero();
    let base = pallas::Base::from(BASE_U64);

    for &byte in bytes.iter() {
        value = value * base + pallas::Base::from(byte as u64);
    }

    value
}

/// Canonical little-endian encoding of a field element.
#[inline]
#[must_use]
pub fn field_to_bytes(field: pallas::Base) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    let repr = field.to_repr();
    bytes.copy_from_slice(repr.as_ref());
    bytes
}

/// Inverse of [`field_to_bytes`]; `None` for a non-canonical encoding.
#[must_use]
pub fn field_from_bytes(bytes: [u8; 32]) -> Option<pallas::Base> {
    Option::from(pallas::Base::from_repr(bytes))
}

/// Poseidon hash of two field elements (`P128Pow5T3`, constant length 2).
///
/// This is the node combination function of the group tree and the exact
/// function the membership circuit evaluates in-circuit.
///
/// ```
/// use zkp_group_membership::utils::poseidon_hash;
/// use pasta_curves::pallas;
///
/// let left = pallas::Base::from(1);
/// let right = pallas::Base::from(2);
/// assert_ne!(poseidon_hash(left, right), poseidon_hash(right, left));
/// ```
#[inline]
#[must_use]
pub fn poseidon_hash(left: pallas::Base, right: pallas::Base) -> pallas::Base {
    let inputs = [left, right];
    poseidon::Hash::<_, PoseidonSpec, ConstantLength<2>, 3, 2>::init().hash(inputs)
}
