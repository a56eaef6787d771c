//! Halo2 circuit for group membership.
//!
//! The circuit proves that the key behind a public recoverable signature is
//! a leaf of the group tree. Its private witnesses are the signature scalar
//! `s` (as window digits with the chord additions they imply), the sibling
//! path and the orientation bits. It
//!
//! 1. recomputes the signer's key `Q = s·T + U` from the table in the
//!    instance column ([`ScalarMulConfig`]),
//! 2. derives the leaf from `Q`,
//! 3. hashes the leaf up the path with an in-circuit Poseidon chip and
//!    constrains the root to instance row [`ROOT_ROW`],
//! 4. range-checks the two 128-bit digest halves in rows
//!    [`DIGEST_HIGH_ROW`] and [`DIGEST_LOW_ROW`].
//!
//! Leaf derivation per variant:
//! - public key: `Poseidon(x, y)` over the two coordinates
//! - address: the low 20 bytes of `keccak256(x || y)`

use crate::ecdsa::{SignatureWitness, LIMBS, QUOTIENT_LIMBS, TABLE_SIZE, WINDOWS, WINDOW_BITS};
use crate::gadgets::keccak::KECCAK_COLUMNS;
use crate::gadgets::nonnative::RANGE_LANES;
use crate::gadgets::{Cell, KeccakConfig, LimbCells, NonNativeChip, NonNativeConfig, ScalarMulConfig};
use crate::merkle::MerkleWitness;
use crate::types::IdentifierVariant;
use halo2_gadgets::poseidon::{
    primitives::{ConstantLength, P128Pow5T3},
    Hash as PoseidonHash, Pow5Chip, Pow5Config,
};
use halo2_proofs::{
    circuit::{Layouter, SimpleFloorPlanner, Value},
    plonk::{
        create_proof, keygen_pk, keygen_vk, verify_proof, Advice, Circuit, Column,
        ConstraintSystem, Error, Expression, Instance, ProvingKey, Selector, SingleVerifier,
        VerifyingKey,
    },
    poly::{commitment::Params, Rotation},
    transcript::{Blake2bRead, Blake2bWrite, Challenge255},
};
use pasta_curves::group::ff::Field;
use pasta_curves::{pallas, vesta};
use rand::rngs::OsRng;
use std::io;

/// Instance row holding the group root.
pub const ROOT_ROW: usize = 0;
/// Instance row holding the upper 128 bits of the message digest.
pub const DIGEST_HIGH_ROW: usize = 1;
/// Instance row holding the lower 128 bits of the message digest.
pub const DIGEST_LOW_ROW: usize = 2;
/// First instance row of the chain start `A₀`.
pub const START_ROW: usize = 3;
/// First instance row of the window table.
pub const TABLE_ROW: usize = START_ROW + 2 * LIMBS;
/// Instance rows a proof is checked against.
pub const INSTANCE_ROWS: usize = TABLE_ROW + WINDOWS * TABLE_SIZE * 2 * LIMBS;

const DIGEST_HALF_WORDS: usize = 16;

const SELECT_COLUMNS: usize = TABLE_SIZE + WINDOW_BITS + 1;
const PATH_COLUMNS: usize = 5;

#[derive(Debug, Clone)]
pub struct MembershipCircuitConfig {
    /// current, sibling, bit, left, right; limbs and composed value for the
    /// key coordinates
    advice: [Column<Advice>; PATH_COLUMNS],
    s_swap: Selector,
    s_compose: Selector,
    instance: Column<Instance>,
    poseidon: Pow5Config<pallas::Base, 3, 2>,
    nonnative: NonNativeConfig,
    scalar_mul: ScalarMulConfig,
    keccak: KeccakConfig,
}

impl MembershipCircuitConfig {
    /// Orders `current` and `sibling` into `(left, right)` by `bit`.
    fn swap(
        &self,
        mut layouter: impl Layouter<pallas::Base>,
        current: &Cell,
        sibling: Value<pallas::Base>,
        bit: Value<bool>,
    ) -> Result<(Cell, Cell), Error> {
        layouter.assign_region(
            || "conditional swap",
            |mut region| {
                self.s_swap.enable(&mut region, 0)?;

                let current = current.copy_advice(|| "current", &mut region, self.advice[0], 0)?;
                let sibling =
                    region.assign_advice(|| "sibling", self.advice[1], 0, || sibling)?;
                let bit = bit.map(|b| {
                    if b {
                        pallas::Base::one()
                    } else {
                        pallas::Base::zero()
                    }
                });
                region.assign_advice(|| "bit", self.advice[2], 0, || bit)?;

                let pair = current
                    .value()
                    .copied()
                    .zip(sibling.value().copied())
                    .zip(bit);
                let left = pair.map(|((cur, sib), b)| cur + b * (sib - cur));
                let right = pair.map(|((cur, sib), b)| sib + b * (cur - sib));

                let left = region.assign_advice(|| "left", self.advice[3], 0, || left)?;
                let right = region.assign_advice(|| "right", self.advice[4], 0, || right)?;
                Ok((left, right))
            },
        )
    }

    /// Folds a 256-bit coordinate into one field element, reduced like
    /// [`crate::utils::bytes_to_field`].
    fn compose(
        &self,
        mut layouter: impl Layouter<pallas::Base>,
        limbs: &LimbCells,
    ) -> Result<Cell, Error> {
        layouter.assign_region(
            || "compose coordinate",
            |mut region| {
                self.s_compose.enable(&mut region, 0)?;
                let mut composed = Value::known(pallas::Base::zero());
                for (i, limb) in limbs.iter().enumerate() {
                    limb.copy_advice(|| "limb", &mut region, self.advice[i], 0)?;
                    composed = composed
                        .zip(limb.value().copied())
                        .map(|(acc, limb)| acc + limb * limb_weight(i));
                }
                region.assign_advice(|| "composed", self.advice[LIMBS], 0, || composed)
            },
        )
    }

    fn hash_pair(
        &self,
        mut layouter: impl Layouter<pallas::Base>,
        left: Cell,
        right: Cell,
    ) -> Result<Cell, Error> {
        let chip = Pow5Chip::construct(self.poseidon.clone());
        let hasher = PoseidonHash::<_, _, P128Pow5T3, ConstantLength<2>, 3, 2>::init(
            chip,
            layouter.namespace(|| "init"),
        )?;
        hasher.hash(layouter.namespace(|| "hash"), [left, right])
    }

    fn digest_halves(
        &self,
        layouter: &mut impl Layouter<pallas::Base>,
        chip: &mut NonNativeChip,
    ) -> Result<(), Error> {
        let halves = layouter.assign_region(
            || "digest halves",
            |mut region| {
                [DIGEST_HIGH_ROW, DIGEST_LOW_ROW]
                    .iter()
                    .enumerate()
                    .map(|(offset, row)| {
                        region.assign_advice_from_instance(
                            || "digest half",
                            self.instance,
                            *row,
                            self.advice[0],
                            offset,
                        )
                    })
                    .collect::<Result<Vec<_>, Error>>()
            },
        )?;
        for half in &halves {
            chip.range_check(layouter, half, DIGEST_HALF_WORDS)?;
        }
        Ok(())
    }
}

fn limb_weight(index: usize) -> pallas::Base {
    pallas::Base::from(2).pow_vartime([64 * index as u64])
}

/// Membership circuit for one identifier variant and one tree depth.
///
/// The shape (variant and `siblings.len()`) fixes the keys; witnesses are
/// `Value::unknown()` in the blank circuit used for key generation.
#[derive(Debug, Clone)]
pub struct MembershipCircuit {
    pub variant: IdentifierVariant,
    pub signature: Value<SignatureWitness>,
    pub siblings: Vec<Value<pallas::Base>>,
    pub path_bits: Vec<Value<bool>>,
}

impl MembershipCircuit {
    /// Witness-free circuit for key generation.
    #[must_use]
    pub fn blank(variant: IdentifierVariant, depth: usize) -> Self {
        Self {
            variant,
            signature: Value::unknown(),
            siblings: vec![Value::unknown(); depth],
            path_bits: vec![Value::unknown(); depth],
        }
    }

    /// Fully witnessed circuit.
    #[must_use]
    pub fn new(
        variant: IdentifierVariant,
        witness: &MerkleWitness,
        signature: SignatureWitness,
    ) -> Self {
        Self {
            variant,
            signature: Value::known(signature),
            siblings: witness.siblings.iter().copied().map(Value::known).collect(),
            path_bits: witness.path_bits().into_iter().map(Value::known).collect(),
        }
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.siblings.len()
    }
}

impl Circuit<pallas::Base> for MembershipCircuit {
    type Config = MembershipCircuitConfig;
    type FloorPlanner = SimpleFloorPlanner;

    fn without_witnesses(&self) -> Self {
        Self::blank(self.variant, self.depth())
    }

    fn configure(meta: &mut ConstraintSystem<pallas::Base>) -> Self::Config {
        let pool = [(); KECCAK_COLUMNS].map(|_| meta.advice_column());
        let instance = meta.instance_column();
        meta.enable_equality(instance);
        let constants = meta.fixed_column();
        meta.enable_constant(constants);
        let table = meta.lookup_table_column();

        let mut select = [pool[0]; SELECT_COLUMNS];
        select.copy_from_slice(&pool[..SELECT_COLUMNS]);
        let scalar_mul = ScalarMulConfig::configure(meta, select, instance);

        let mut limbs = [pool[0]; QUOTIENT_LIMBS];
        limbs.copy_from_slice(&pool[SELECT_COLUMNS..SELECT_COLUMNS + QUOTIENT_LIMBS]);
        let lanes_start = SELECT_COLUMNS + QUOTIENT_LIMBS;
        let mut running_sums = [pool[0]; RANGE_LANES];
        running_sums.copy_from_slice(&pool[lanes_start..lanes_start + RANGE_LANES]);
        let nonnative = NonNativeConfig::configure(meta, limbs, running_sums, table);

        let path_start = lanes_start + RANGE_LANES;
        let mut advice = [pool[0]; PATH_COLUMNS];
        advice.copy_from_slice(&pool[path_start..path_start + PATH_COLUMNS]);

        let s_swap = meta.selector();
        meta.create_gate("conditional swap", |meta| {
            let s = meta.query_selector(s_swap);
            let current = meta.query_advice(advice[0], Rotation::cur());
            let sibling = meta.query_advice(advice[1], Rotation::cur());
            let bit = meta.query_advice(advice[2], Rotation::cur());
            let left = meta.query_advice(advice[3], Rotation::cur());
            let right = meta.query_advice(advice[4], Rotation::cur());
            let one = Expression::Constant(pallas::Base::one());

            vec![
                s.clone() * bit.clone() * (one - bit.clone()),
                s.clone()
                    * (left - (current.clone() + bit.clone() * (sibling.clone() - current.clone()))),
                s * (right - (sibling.clone() + bit * (current - sibling))),
            ]
        });

        let s_compose = meta.selector();
        meta.create_gate("compose coordinate", |meta| {
            let s = meta.query_selector(s_compose);
            let composed = (0..LIMBS).fold(Expression::Constant(pallas::Base::zero()), |acc, i| {
                acc + meta.query_advice(advice[i], Rotation::cur()) * limb_weight(i)
            });
            vec![s * (meta.query_advice(advice[LIMBS], Rotation::cur()) - composed)]
        });

        let state_start = path_start + PATH_COLUMNS;
        let mut state = [pool[0]; 3];
        state.copy_from_slice(&pool[state_start..state_start + 3]);
        let partial_sbox = pool[state_start + 3];
        let rc_a = [(); 3].map(|_| meta.fixed_column());
        let rc_b = [(); 3].map(|_| meta.fixed_column());
        let poseidon = Pow5Chip::configure::<P128Pow5T3>(meta, state, partial_sbox, rc_a, rc_b);

        let keccak = KeccakConfig::configure(meta, pool);

        MembershipCircuitConfig {
            advice,
            s_swap,
            s_compose,
            instance,
            poseidon,
            nonnative,
            scalar_mul,
            keccak,
        }
    }

    fn synthesize(
        &self,
        config: Self::Config,
        mut layouter: impl Layouter<pallas::Base>,
    ) -> Result<(), Error> {
        if self.path_bits.len() != self.siblings.len() {
            return Err(Error::Synthesis);
        }

        config.nonnative.load_table(&mut layouter)?;
        let mut chip = NonNativeChip::construct(config.nonnative.clone());

        let key = config
            .scalar_mul
            .multiply(&mut layouter, &mut chip, self.signature.as_ref())?;

        let mut current = match self.variant {
            IdentifierVariant::PublicKey => {
                let x = config.compose(layouter.namespace(|| "compose x"), &key.x)?;
                let y = config.compose(layouter.namespace(|| "compose y"), &key.y)?;
                config.hash_pair(layouter.namespace(|| "hash public key"), x, y)?
            }
            IdentifierVariant::Address => config
                .keccak
                .address(layouter.namespace(|| "derive address"), &key)?,
        };

        for (level, (sibling, bit)) in self.siblings.iter().zip(&self.path_bits).enumerate() {
            let (left, right) = config.swap(
                layouter.namespace(|| format!("swap level {level}")),
                &current,
                *sibling,
                *bit,
            )?;
            current = config.hash_pair(
                layouter.namespace(|| format!("hash level {level}")),
                left,
                right,
            )?;
        }

        config.digest_halves(&mut layouter, &mut chip)?;
        layouter.constrain_instance(current.cell(), config.instance, ROOT_ROW)?;
        Ok(())
    }
}

/// Proving side of the engine: parameters plus a proving key for one circuit
/// shape.
#[derive(Debug)]
pub struct ProvingEngine {
    params: Params<vesta::Affine>,
    pk: ProvingKey<vesta::Affine>,
    variant: IdentifierVariant,
    depth: usize,
}

impl ProvingEngine {
    /// Generates parameters and keys for `variant` at `depth` in `2^k` rows.
    pub fn setup(variant: IdentifierVariant, depth: usize, k: u32) -> Result<Self, Error> {
        let params = Params::<vesta::Affine>::new(k);
        let circuit = MembershipCircuit::blank(variant, depth);
        let vk = keygen_vk(&params, &circuit)?;
        let pk = keygen_pk(&params, vk, &circuit)?;
        Ok(Self {
            params,
            pk,
            variant,
            depth,
        })
    }

    #[must_use]
    pub fn variant(&self) -> IdentifierVariant {
        self.variant
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Creates a proof for `circuit` against `instance`, laid out as
    /// [`crate::PublicInput::instance`] produces it.
    pub fn create_proof(
        &self,
        circuit: MembershipCircuit,
        instance: &[pallas::Base],
    ) -> Result<Vec<u8>, Error> {
        let mut transcript = Blake2bWrite::<_, vesta::Affine, Challenge255<_>>::init(vec![]);
        let instances: &[&[&[pallas::Base]]] = &[&[instance]];
        create_proof(
            &self.params,
            &self.pk,
            &[circuit],
            instances,
            OsRng,
            &mut transcript,
        )?;
        Ok(transcript.finalize())
    }
}

/// Verifying side of the engine.
///
/// Parameters are deterministic in `k`, so a verifier set up independently
/// derives the same verifying key as the prover.
#[derive(Debug)]
pub struct VerifyingEngine {
    params: Params<vesta::Affine>,
    vk: VerifyingKey<vesta::Affine>,
}

impl VerifyingEngine {
    pub fn setup(variant: IdentifierVariant, depth: usize, k: u32) -> Result<Self, Error> {
        let params = Params::<vesta::Affine>::new(k);
        let vk = keygen_vk(&params, &MembershipCircuit::blank(variant, depth))?;
        Ok(Self { params, vk })
    }

    /// `Ok(())` if `proof` is valid for `instance` and nothing follows it.
    pub fn verify(&self, proof: &[u8], instance: &[pallas::Base]) -> Result<(), Error> {
        let mut reader = proof;
        {
            let strategy = SingleVerifier::new(&self.params);
            let mut transcript = Blake2bRead::<_, vesta::Affine, Challenge255<_>>::init(&mut reader);
            let instances: &[&[&[pallas::Base]]] = &[&[instance]];
            verify_proof(&self.params, &self.vk, strategy, instances, &mut transcript)?;
        }

        if !reader.is_empty() {
            return Err(Error::Transcript(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} trailing bytes after proof", reader.len()),
            )));
        }
        Ok(())
    }
}
