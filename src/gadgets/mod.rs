//! Chips the membership circuit is assembled from.
//!
//! - [`nonnative`]: secp256k1 base field relations over 64-bit limbs
//! - [`scalar_mul`]: the windowed multiplication that recovers the signer's key
//! - [`keccak`]: Keccak-256 of a public key down to its address

pub mod keccak;
pub mod nonnative;
pub mod scalar_mul;

pub use keccak::KeccakConfig;
pub use nonnative::{Cell, LimbCells, NonNativeChip, NonNativeConfig, PointCells};
pub use scalar_mul::ScalarMulConfig;
