//! Native side of the in-circuit signature check.
//!
//! A recoverable signature `(r, s, v)` over digest `m` verifies under key `Q`
//! iff `s·R = m·G + r·Q`, where `R` is the curve point with x-coordinate `r`
//! and y-parity `v - 27`. Rearranged:
//!
//! ```text
//! Q = s·T + U,    T = r⁻¹·R,    U = -(r⁻¹·m)·G
//! ```
//!
//! `T` and `U` are computed by the verifier from public values, so the circuit
//! only has to show knowledge of a scalar `s` whose multiple of `T`, shifted by
//! `U`, is the member's key. Revealing `r` does not reveal the member.
//!
//! The scalar multiplication is windowed: `s = Σ wᵢ·16ⁱ` over 64 windows and
//! the verifier publishes, for every window `i` and digit `w`, the entry
//! `Eᵢ,w = (w·16ⁱ)·T + H` where `H` is an offset point nobody knows a discrete
//! log for. The chain starts at `A₀ = U - 64·H` and adds one selected entry per
//! window, so `A₆₄ = Q`. The offset keeps every addition away from the
//! doubling and identity cases, so the circuit only needs incomplete addition.

use crate::error::{MembershipError, Result};
use crate::ethereum::PublicKey;
use crate::types::{MessageDigest, HASH_SIZE};
use ethers::core::k256::elliptic_curve::ops::Reduce;
use ethers::core::k256::elliptic_curve::point::DecompressPoint;
use ethers::core::k256::elliptic_curve::sec1::ToEncodedPoint;
use ethers::core::k256::elliptic_curve::subtle::Choice;
use ethers::core::k256::elliptic_curve::PrimeField;
use ethers::core::k256::{AffinePoint, FieldBytes, FieldElement, ProjectivePoint, Scalar};
use ethers::types::{U256, U512};
use ethers::utils::keccak256;
use log::debug;
use pasta_curves::pallas;
use std::sync::OnceLock;

/// 64-bit little-endian limbs of a secp256k1 base field value.
pub const LIMBS: usize = 4;
/// Limbs of a relation quotient; quotients are below `2^259`.
pub const QUOTIENT_LIMBS: usize = 5;
pub const WINDOW_BITS: usize = 4;
pub const WINDOWS: usize = 64;
pub const TABLE_SIZE: usize = 1 << WINDOW_BITS;
/// Quotients are stored shifted by `2^258` so they are never negative.
pub const QUOTIENT_OFFSET_BITS: usize = 258;

/// secp256k1 base field modulus `2^256 - 2^32 - 977`.
pub const FIELD_MODULUS: Limbs = [
    0xFFFF_FFFE_FFFF_FC2F,
    0xFFFF_FFFF_FFFF_FFFF,
    0xFFFF_FFFF_FFFF_FFFF,
    0xFFFF_FFFF_FFFF_FFFF,
];

const OFFSET_DOMAIN: &[u8] = b"zkp-group-membership/offset";

pub type Limbs = [u64; LIMBS];
pub type Quotient = [u64; QUOTIENT_LIMBS];

#[must_use]
pub fn limbs_from_be_bytes(bytes: &[u8; HASH_SIZE]) -> Limbs {
    let mut limbs = [0u64; LIMBS];
    for (j, limb) in limbs.iter_mut().enumerate() {
        let end = HASH_SIZE - 8 * j;
        let mut word = [0u8; 8];
        word.copy_from_slice(&bytes[end - 8..end]);
        *limb = u64::from_be_bytes(word);
    }
    limbs
}

#[must_use]
pub fn limbs_to_be_bytes(limbs: &Limbs) -> [u8; HASH_SIZE] {
    let mut bytes = [0u8; HASH_SIZE];
    for (j, limb) in limbs.iter().enumerate() {
        let end = HASH_SIZE - 8 * j;
        bytes[end - 8..end].copy_from_slice(&limb.to_be_bytes());
    }
    bytes
}

/// Affine secp256k1 point as base field limbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointLimbs {
    pub x: Limbs,
    pub y: Limbs,
}

impl PointLimbs {
    fn from_affine(point: &AffinePoint) -> Result<Self> {
        let encoded = point.to_encoded_point(false);
        match (encoded.x(), encoded.y()) {
            (Some(x), Some(y)) => {
                let mut x_bytes = [0u8; HASH_SIZE];
                let mut y_bytes = [0u8; HASH_SIZE];
                x_bytes.copy_from_slice(x);
                y_bytes.copy_from_slice(y);
                Ok(Self {
                    x: limbs_from_be_bytes(&x_bytes),
                    y: limbs_from_be_bytes(&y_bytes),
                })
            }
            _ => Err(MembershipError::MalformedInput(
                "signature maps to the point at infinity".to_string(),
            )),
        }
    }

    fn from_projective(point: &ProjectivePoint) -> Result<Self> {
        Self::from_affine(&point.to_affine())
    }

    /// `x || y` as an uncompressed public key.
    #[must_use]
    pub fn to_public_key(&self) -> PublicKey {
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(&limbs_to_be_bytes(&self.x));
        bytes[32..].copy_from_slice(&limbs_to_be_bytes(&self.y));
        PublicKey(bytes)
    }

    /// Instance column values: x limbs then y limbs.
    #[must_use]
    pub fn field_limbs(&self) -> [pallas::Base; 2 * LIMBS] {
        let mut out = [pallas::Base::zero(); 2 * LIMBS];
        for (slot, limb) in out.iter_mut().zip(self.x.iter().chain(self.y.iter())) {
            *slot = pallas::Base::from(*limb);
        }
        out
    }
}

/// The offset point `H`.
///
/// Found by try-and-increment from a fixed domain string: the first
/// `keccak256(domain || counter)` that is a valid x-coordinate, taken with even
/// y.
pub fn offset_point() -> ProjectivePoint {
    static OFFSET: OnceLock<ProjectivePoint> = OnceLock::new();
    *OFFSET.get_or_init(|| {
        let mut counter = 0u32;
        loop {
            let mut preimage = OFFSET_DOMAIN.to_vec();
            preimage.extend_from_slice(&counter.to_be_bytes());
            let x = FieldBytes::clone_from_slice(&keccak256(preimage));
            let candidate: Option<AffinePoint> =
                AffinePoint::decompress(&x, Choice::from(0)).into();
            if let Some(point) = candidate {
                debug!("Offset point found after {} attempts", counter + 1);
                return point.into();
            }
            counter += 1;
        }
    })
}

/// Public values of the signature check, derived from `(r, v, digest)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureInstance {
    /// `A₀ = U - 64·H`
    pub start: PointLimbs,
    /// `table[i][w] = (w·16ⁱ)·T + H`
    pub table: Vec<[PointLimbs; TABLE_SIZE]>,
}

impl SignatureInstance {
    /// # Errors
    /// [`MembershipError::MalformedInput`] if `v` is not 27 or 28, `r` is zero
    /// or not below the group order, or no curve point has x-coordinate `r`.
    pub fn derive(r: &[u8; HASH_SIZE], v: u8, digest: &MessageDigest) -> Result<Self> {
        let parity = match v {
            27 => 0u8,
            28 => 1u8,
            other => {
                return Err(MembershipError::MalformedInput(format!(
                    "invalid recovery indicator {other}"
                )))
            }
        };

        let r_bytes = FieldBytes::clone_from_slice(r);
        let r_scalar: Option<Scalar> = Scalar::from_repr(r_bytes).into();
        let r_inverse: Option<Scalar> = r_scalar.and_then(|r| r.invert().into());
        let r_inverse = r_inverse.ok_or_else(|| {
            MembershipError::MalformedInput("signature r is not a valid scalar".to_string())
        })?;
        let nonce: Option<AffinePoint> =
            AffinePoint::decompress(&r_bytes, Choice::from(parity)).into();
        let nonce = nonce.ok_or_else(|| {
            MembershipError::MalformedInput("signature r is not a curve x-coordinate".to_string())
        })?;

        let m = <Scalar as Reduce<ethers::core::k256::U256>>::reduce_bytes(
            &FieldBytes::clone_from_slice(digest.as_bytes()),
        );
        let t = ProjectivePoint::from(nonce) * r_inverse;
        let u = -(ProjectivePoint::GENERATOR * (r_inverse * m));
        let offset = offset_point();

        let start = PointLimbs::from_projective(&(u - offset * Scalar::from(WINDOWS as u64)))?;

        let mut table = Vec::with_capacity(WINDOWS);
        let mut base = t;
        for _ in 0..WINDOWS {
            let mut entries = [PointLimbs {
                x: [0; LIMBS],
                y: [0; LIMBS],
            }; TABLE_SIZE];
            let mut entry = offset;
            for slot in entries.iter_mut() {
                *slot = PointLimbs::from_projective(&entry)?;
                entry += base;
            }
            table.push(entries);
            for _ in 0..WINDOW_BITS {
                base = base.double();
            }
        }

        Ok(Self { start, table })
    }

    /// Instance column values after the fixed header: `A₀` limbs, then every
    /// table entry's limbs in `(window, digit)` order.
    #[must_use]
    pub fn field_values(&self) -> Vec<pallas::Base> {
        let mut values = Vec::with_capacity(2 * LIMBS * (1 + WINDOWS * TABLE_SIZE));
        values.extend(self.start.field_limbs());
        for entries in &self.table {
            for entry in entries {
                values.extend(entry.field_limbs());
            }
        }
        values
    }
}

/// Operands of one `λ·(b - c) + d - v₀ - v₁ - v₂ ≡ 0 (mod q)` relation.
/// `None` stands for zero.
#[derive(Debug, Clone, Copy)]
pub struct Relation<T> {
    pub b: Option<T>,
    pub c: Option<T>,
    pub d: Option<T>,
    pub v: [Option<T>; 3],
}

/// The relations that make `sum` the chord addition of `acc` and `entry`
/// with slope `lambda`:
///
/// ```text
/// λ·(x₂ - x₁) + y₁ - y₂ ≡ 0
/// λ·λ - x₁ - x₂ - x₃    ≡ 0
/// λ·(x₁ - x₃) - y₁ - y₃ ≡ 0
/// ```
pub fn addition_relations<T: Copy>(
    acc: (T, T),
    entry: (T, T),
    lambda: T,
    sum: (T, T),
) -> [Relation<T>; 3] {
    [
        Relation {
            b: Some(entry.0),
            c: Some(acc.0),
            d: Some(acc.1),
            v: [Some(entry.1), None, None],
        },
        Relation {
            b: Some(lambda),
            c: None,
            d: None,
            v: [Some(acc.0), Some(entry.0), Some(sum.0)],
        },
        Relation {
            b: Some(acc.0),
            c: Some(sum.0),
            d: None,
            v: [Some(acc.1), Some(sum.1), None],
        },
    ]
}

fn wide(limbs: Option<&Limbs>) -> U512 {
    limbs.map_or_else(U512::zero, |limbs| U512::from(U256(*limbs)))
}

impl Relation<&Limbs> {
    /// Quotient `k'` with `λ·(b - c) + d - Σv = (k' - 2^258)·q` over the
    /// integers.
    ///
    /// # Errors
    /// [`MembershipError::ProofGeneration`] if the relation does not hold
    /// modulo `q`.
    pub fn quotient(&self, lambda: &Limbs) -> Result<Quotient> {
        let lambda = U256(*lambda);
        let product = |operand: Option<&Limbs>| {
            operand.map_or_else(U512::zero, |limbs| lambda.full_mul(U256(*limbs)))
        };
        let positive = product(self.b) + wide(self.d);
        let negative = self
            .v
            .iter()
            .fold(product(self.c), |acc, term| acc + wide(*term));

        let modulus = U512::from(U256(FIELD_MODULUS));
        let offset = U512::one() << QUOTIENT_OFFSET_BITS;
        let (quotient, remainder, shifted) = if positive >= negative {
            let (q, rem) = (positive - negative).div_mod(modulus);
            (q, rem, offset + q)
        } else {
            let (q, rem) = (negative - positive).div_mod(modulus);
            (q, rem, offset - q)
        };
        if !remainder.is_zero() {
            return Err(MembershipError::ProofGeneration(format!(
                "relation does not hold modulo q (quotient {quotient})"
            )));
        }

        let mut limbs = [0u64; QUOTIENT_LIMBS];
        limbs.copy_from_slice(&shifted.0[..QUOTIENT_LIMBS]);
        Ok(limbs)
    }
}

/// One chord addition `sum = acc + entry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddStep {
    pub lambda: Limbs,
    pub sum: PointLimbs,
    pub quotients: [Quotient; 3],
}

/// Private values of the signature check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureWitness {
    /// Base-16 digits of `s`, least significant first.
    pub windows: [u8; WINDOWS],
    pub steps: Vec<AddStep>,
}

fn field_element(limbs: &Limbs) -> Result<FieldElement> {
    let bytes = FieldBytes::clone_from_slice(&limbs_to_be_bytes(limbs));
    Option::from(FieldElement::from_bytes(&bytes)).ok_or_else(|| {
        MembershipError::ProofGeneration("coordinate is not a reduced field element".to_string())
    })
}

fn limbs_of(element: FieldElement) -> Limbs {
    let mut bytes = [0u8; HASH_SIZE];
    bytes.copy_from_slice(&element.normalize().to_bytes());
    limbs_from_be_bytes(&bytes)
}

impl SignatureWitness {
    /// Runs the windowed chain for scalar `s` over `instance`.
    ///
    /// # Errors
    /// [`MembershipError::ProofGeneration`] if an addition hits the
    /// exceptional case `x₁ = x₂`, which an honest signature never does.
    pub fn derive(instance: &SignatureInstance, s: &[u8; HASH_SIZE]) -> Result<Self> {
        let mut windows = [0u8; WINDOWS];
        for (i, window) in windows.iter_mut().enumerate() {
            let byte = s[HASH_SIZE - 1 - i / 2];
            *window = if i % 2 == 0 { byte & 0x0f } else { byte >> 4 };
        }

        let mut acc = instance.start;
        let mut steps = Vec::with_capacity(WINDOWS);
        for (i, &window) in windows.iter().enumerate() {
            let entry = instance.table[i][usize::from(window)];
            let step = add_step(&acc, &entry)?;
            acc = step.sum;
            steps.push(step);
        }

        Ok(Self { windows, steps })
    }

    /// The point the chain ends at; the signer's public key for an honest
    /// signature.
    #[must_use]
    pub fn output(&self) -> Option<PointLimbs> {
        self.steps.last().map(|step| step.sum)
    }
}

fn add_step(acc: &PointLimbs, entry: &PointLimbs) -> Result<AddStep> {
    let (x1, y1) = (field_element(&acc.x)?, field_element(&acc.y)?);
    let (x2, y2) = (field_element(&entry.x)?, field_element(&entry.y)?);

    let run = (x2 - x1).normalize();
    let run_inverse: Option<FieldElement> = run.invert().into();
    let run_inverse = run_inverse.ok_or_else(|| {
        MembershipError::ProofGeneration("exceptional point addition".to_string())
    })?;

    let lambda = ((y2 - y1).normalize() * run_inverse).normalize();
    let x3 = ((lambda.square() - x1).normalize() - x2).normalize();
    let y3 = ((lambda * (x1 - x3).normalize()).normalize() - y1).normalize();

    let lambda = limbs_of(lambda);
    let sum = PointLimbs {
        x: limbs_of(x3),
        y: limbs_of(y3),
    };
    let relations = addition_relations((&acc.x, &acc.y), (&entry.x, &entry.y), &lambda, (&sum.x, &sum.y));
    let mut quotients = [[0u64; QUOTIENT_LIMBS]; 3];
    for (slot, relation) in quotients.iter_mut().zip(relations.iter()) {
        *slot = relation.quotient(&lambda)?;
    }

    Ok(AddStep {
        lambda,
        sum,
        quotients,
    })
}
