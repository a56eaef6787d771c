//! Keccak-256 of a 64-byte public key, one bit per cell, producing the
//! Ethereum address as a field element.
//!
//! Every lane of the 1600-bit state occupies one row of 64 bit columns. A
//! round lays out as
//!
//! ```text
//! 0..25    state A[x + 5y]
//! 25       copy of C[4]
//! 26..31   column parities C[x]
//! 31       copy of C[0]
//! 32..37   D[x] = C[x - 1] ^ rot(C[x + 1], 1)
//! 37..62   A'[x + 5y] = A[x + 5y] ^ D[x]
//! 62..87   B = rho and pi of A', wired with copy constraints
//! 87       round constant
//! ```
//!
//! and chi with iota writes the next state at row 88. The message occupies
//! lanes 0..8 of the first state, each lane also carrying the 64-bit limb it
//! decomposes in the last column.

use super::nonnative::{Cell, PointCells};
use halo2_proofs::{
    circuit::{Layouter, Region, Value},
    plonk::{
        Advice, Column, ConstraintSystem, Constraints, Error, Expression, Selector, VirtualCells,
    },
    poly::Rotation,
};
use pasta_curves::group::ff::{Field, PrimeField};
use pasta_curves::pallas;

pub const LANE_BITS: usize = 64;
pub const LANES: usize = 25;
pub const ROUNDS: usize = 24;
/// Bit columns plus the limb column.
pub const KECCAK_COLUMNS: usize = LANE_BITS + 1;

const MESSAGE_LANES: usize = 8;
const PADDING_LANE: usize = 8;
const RATE_LANES: usize = 17;

const COLUMN_COPY_HIGH: usize = 25;
const PARITY: usize = 26;
const COLUMN_COPY_LOW: usize = 31;
const MIX: usize = 32;
const THETA: usize = 37;
const RHO_PI: usize = 62;
const ROUND_CONSTANT: usize = 87;
const ROUND_ROWS: usize = 88;

/// First row of the state after the last round.
pub const FINAL_STATE: usize = ROUNDS * ROUND_ROWS;
/// Row of the address gate; lanes 1..4 of the final state end here.
const ADDRESS_ROW: usize = FINAL_STATE + 3;
/// Rows of the region.
pub const KECCAK_ROWS: usize = FINAL_STATE + LANES;

const ROUND_CONSTANTS: [u64; ROUNDS] = [
    0x0000_0000_0000_0001,
    0x0000_0000_0000_8082,
    0x8000_0000_0000_808A,
    0x8000_0000_8000_8000,
    0x0000_0000_0000_808B,
    0x0000_0000_8000_0001,
    0x8000_0000_8000_8081,
    0x8000_0000_0000_8009,
    0x0000_0000_0000_008A,
    0x0000_0000_0000_0088,
    0x0000_0000_8000_8009,
    0x0000_0000_8000_000A,
    0x0000_0000_8000_808B,
    0x8000_0000_0000_008B,
    0x8000_0000_0000_8089,
    0x8000_0000_0000_8003,
    0x8000_0000_0000_8002,
    0x8000_0000_0000_0080,
    0x0000_0000_0000_800A,
    0x8000_0000_8000_000A,
    0x8000_0000_8000_8081,
    0x8000_0000_0000_8080,
    0x0000_0000_8000_0001,
    0x8000_0000_8000_8008,
];

/// Rho offsets in lane order `x + 5y`.
const RHO: [u32; LANES] = [
    0, 1, 62, 28, 27, 36, 44, 6, 55, 20, 3, 10, 43, 25, 39, 41, 45, 15, 21, 8, 18, 2, 61, 56, 14,
];

/// Lane `x + 5y` lands in lane `y + 5(2x + 3y)` after pi.
fn pi(lane: usize) -> usize {
    let (x, y) = (lane % 5, lane / 5);
    y + 5 * ((2 * x + 3 * y) % 5)
}

fn bit(value: u64, k: usize) -> pallas::Base {
    pallas::Base::from((value >> k) & 1)
}

fn pow2(exponent: usize) -> pallas::Base {
    pallas::Base::from(2).pow_vartime([exponent as u64])
}

/// Message lane `k`-th bit as a bit of the big-endian limb it came from.
fn limb_bit(k: usize) -> usize {
    8 * (7 - k / 8) + k % 8
}

fn xor(a: Expression<pallas::Base>, b: Expression<pallas::Base>) -> Expression<pallas::Base> {
    a.clone() + b.clone() - Expression::Constant(pallas::Base::from(2)) * a * b
}

/// `B[x] ^ (!B[x + 1] & B[x + 2])` queried from the output row, with the two
/// neighbours at row offsets `next` and `after` from `B[x]`.
fn chi(
    meta: &mut VirtualCells<'_, pallas::Base>,
    column: Column<Advice>,
    next: i32,
    after: i32,
) -> Expression<pallas::Base> {
    let offset = (ROUND_ROWS - RHO_PI) as i32;
    let one = Expression::Constant(pallas::Base::one());
    let a = meta.query_advice(column, Rotation(-offset));
    let b = meta.query_advice(column, Rotation(-offset + next));
    let c = meta.query_advice(column, Rotation(-offset + after));
    xor(a, (one - b) * c)
}

/// Intermediate lanes of one permutation round.
#[derive(Debug, Clone)]
struct RoundTrace {
    state: [u64; LANES],
    columns: [u64; 5],
    mix: [u64; 5],
    theta: [u64; LANES],
    rho_pi: [u64; LANES],
}

/// Every lane value the region assigns.
#[derive(Debug, Clone)]
pub struct KeccakTrace {
    rounds: Vec<RoundTrace>,
    output: [u64; LANES],
}

impl KeccakTrace {
    /// Absorbs one 64-byte message, given as little-endian lanes, and runs
    /// the permutation.
    #[must_use]
    pub fn compute(message: &[u64; MESSAGE_LANES]) -> Self {
        let mut state = [0u64; LANES];
        state[..MESSAGE_LANES].copy_from_slice(message);
        state[PADDING_LANE] ^= 0x01;
        state[RATE_LANES - 1] ^= 0x80 << 56;

        let mut rounds = Vec::with_capacity(ROUNDS);
        for round_constant in ROUND_CONSTANTS {
            let mut columns = [0u64; 5];
            for (x, column) in columns.iter_mut().enumerate() {
                *column = (0..5).fold(0, |acc, y| acc ^ state[x + 5 * y]);
            }
            let mut mix = [0u64; 5];
            for (x, d) in mix.iter_mut().enumerate() {
                *d = columns[(x + 4) % 5] ^ columns[(x + 1) % 5].rotate_left(1);
            }
            let mut theta = [0u64; LANES];
            for (lane, value) in theta.iter_mut().enumerate() {
                *value = state[lane] ^ mix[lane % 5];
            }
            let mut rho_pi = [0u64; LANES];
            for lane in 0..LANES {
                rho_pi[pi(lane)] = theta[lane].rotate_left(RHO[lane]);
            }

            let trace = RoundTrace {
                state,
                columns,
                mix,
                theta,
                rho_pi,
            };
            for lane in 0..LANES {
                let (x, y) = (lane % 5, lane / 5);
                state[lane] = rho_pi[lane]
                    ^ (!rho_pi[(x + 1) % 5 + 5 * y] & rho_pi[(x + 2) % 5 + 5 * y]);
            }
            state[0] ^= round_constant;
            rounds.push(trace);
        }

        Self {
            rounds,
            output: state,
        }
    }

    /// The 32-byte digest.
    #[must_use]
    pub fn digest(&self) -> [u8; 32] {
        let mut digest = [0u8; 32];
        for (i, byte) in digest.iter_mut().enumerate() {
            *byte = (self.output[i / 8] >> (8 * (i % 8))) as u8;
        }
        digest
    }
}

/// Message lanes of `x || y` from big-endian limbs, most significant first.
#[must_use]
pub fn message_lanes(x: &[u64; 4], y: &[u64; 4]) -> [u64; MESSAGE_LANES] {
    let mut lanes = [0u64; MESSAGE_LANES];
    for (j, lane) in lanes.iter_mut().enumerate() {
        let limb = if j < 4 { x[3 - j] } else { y[7 - j] };
        *lane = limb.swap_bytes();
    }
    lanes
}

fn limb_value(field: &pallas::Base) -> u64 {
    let repr = field.to_repr();
    let mut word = [0u8; 8];
    word.copy_from_slice(&repr.as_ref()[..8]);
    u64::from_le_bytes(word)
}

#[derive(Debug, Clone)]
pub struct KeccakConfig {
    bits: [Column<Advice>; LANE_BITS],
    limb: Column<Advice>,
    s_input: Selector,
    s_parity: Selector,
    s_mix: Selector,
    s_theta: [Selector; 5],
    /// chi for x in 0..3, x = 3 and x = 4
    s_chi: [Selector; 3],
    s_iota: Selector,
    s_address: Selector,
}

impl KeccakConfig {
    pub fn configure(
        meta: &mut ConstraintSystem<pallas::Base>,
        columns: [Column<Advice>; KECCAK_COLUMNS],
    ) -> Self {
        for column in columns {
            meta.enable_equality(column);
        }
        let mut bits = [columns[0]; LANE_BITS];
        bits.copy_from_slice(&columns[..LANE_BITS]);
        let limb = columns[LANE_BITS];

        let s_input = meta.selector();
        meta.create_gate("keccak message lane", |meta| {
            let s = meta.query_selector(s_input);
            let one = Expression::Constant(pallas::Base::one());
            let mut constraints = Vec::with_capacity(LANE_BITS + 1);
            let mut composed = Expression::Constant(pallas::Base::zero());
            for (k, column) in bits.iter().enumerate() {
                let b = meta.query_advice(*column, Rotation::cur());
                constraints.push(b.clone() * (one.clone() - b.clone()));
                composed = composed + b * pow2(limb_bit(k));
            }
            constraints.push(meta.query_advice(limb, Rotation::cur()) - composed);
            Constraints::with_selector(s, constraints)
        });

        // 15·p = s(s - 2)(s - 4)(2s² - 13s + 16) is the parity of s in 0..=5
        let s_parity = meta.selector();
        meta.create_gate("theta column parity", |meta| {
            let s = meta.query_selector(s_parity);
            let constant = |c: u64| Expression::Constant(pallas::Base::from(c));
            let constraints = bits
                .iter()
                .map(|column| {
                    let sum = (0..5)
                        .map(|y| meta.query_advice(*column, Rotation(5 * y - PARITY as i32)))
                        .fold(constant(0), |acc, b| acc + b);
                    let parity = meta.query_advice(*column, Rotation::cur());
                    constant(15) * parity
                        - sum.clone()
                            * (sum.clone() - constant(2))
                            * (sum.clone() - constant(4))
                            * (constant(2) * sum.clone() * sum.clone() - constant(13) * sum
                                + constant(16))
                })
                .collect::<Vec<_>>();
            Constraints::with_selector(s, constraints)
        });

        let s_mix = meta.selector();
        meta.create_gate("theta mix", |meta| {
            let s = meta.query_selector(s_mix);
            let low = (MIX - PARITY + 1) as i32;
            let high = (MIX - PARITY - 1) as i32;
            let constraints = (0..LANE_BITS)
                .map(|k| {
                    let left = meta.query_advice(bits[k], Rotation(-low));
                    let right =
                        meta.query_advice(bits[(k + LANE_BITS - 1) % LANE_BITS], Rotation(-high));
                    meta.query_advice(bits[k], Rotation::cur()) - xor(left, right)
                })
                .collect::<Vec<_>>();
            Constraints::with_selector(s, constraints)
        });

        let s_theta = [(); 5].map(|_| meta.selector());
        for (y, selector) in s_theta.iter().enumerate() {
            meta.create_gate("theta", |meta| {
                let s = meta.query_selector(*selector);
                let constraints = bits
                    .iter()
                    .map(|column| {
                        let a = meta.query_advice(*column, Rotation(-(THETA as i32)));
                        let d = meta.query_advice(*column, Rotation(-5 - 5 * y as i32));
                        meta.query_advice(*column, Rotation::cur()) - xor(a, d)
                    })
                    .collect::<Vec<_>>();
                Constraints::with_selector(s, constraints)
            });
        }

        // row offsets of B[x + 1] and B[x + 2] relative to B[x]
        let patterns = [(1, 2), (1, -3), (-4, -3)];
        let s_chi = [(); 3].map(|_| meta.selector());
        for (selector, (next, after)) in s_chi.iter().zip(patterns) {
            meta.create_gate("chi", |meta| {
                let s = meta.query_selector(*selector);
                let constraints = bits
                    .iter()
                    .map(|column| {
                        meta.query_advice(*column, Rotation::cur())
                            - chi(meta, *column, next, after)
                    })
                    .collect::<Vec<_>>();
                Constraints::with_selector(s, constraints)
            });
        }

        let s_iota = meta.selector();
        meta.create_gate("chi and iota", |meta| {
            let s = meta.query_selector(s_iota);
            let constraints = bits
                .iter()
                .map(|column| {
                    let round_constant = meta.query_advice(*column, Rotation::prev());
                    meta.query_advice(*column, Rotation::cur())
                        - xor(chi(meta, *column, 1, 2), round_constant)
                })
                .collect::<Vec<_>>();
            Constraints::with_selector(s, constraints)
        });

        // address = digest bytes 12..32 read big-endian, i.e. lanes 1..4
        let s_address = meta.selector();
        meta.create_gate("address", |meta| {
            let s = meta.query_selector(s_address);
            let mut address = Expression::Constant(pallas::Base::zero());
            for byte in 12..32 {
                let rotation = Rotation(byte as i32 / 8 - 3);
                for j in 0..8 {
                    let b = meta.query_advice(bits[8 * (byte % 8) + j], rotation);
                    address = address + b * pow2(8 * (31 - byte) + j);
                }
            }
            Constraints::with_selector(s, Some(meta.query_advice(limb, Rotation::cur()) - address))
        });

        Self {
            bits,
            limb,
            s_input,
            s_parity,
            s_mix,
            s_theta,
            s_chi,
            s_iota,
            s_address,
        }
    }

    fn assign_lane(
        &self,
        region: &mut Region<'_, pallas::Base>,
        row: usize,
        lane: Value<u64>,
    ) -> Result<Vec<Cell>, Error> {
        self.bits
            .iter()
            .enumerate()
            .map(|(k, column)| {
                region.assign_advice(|| "lane bit", *column, row, || lane.map(|v| bit(v, k)))
            })
            .collect()
    }

    fn assign_constant_lane(
        &self,
        region: &mut Region<'_, pallas::Base>,
        row: usize,
        lane: u64,
    ) -> Result<Vec<Cell>, Error> {
        self.bits
            .iter()
            .enumerate()
            .map(|(k, column)| {
                region.assign_advice_from_constant(|| "constant bit", *column, row, bit(lane, k))
            })
            .collect()
    }

    /// Hashes the uncompressed encoding of `key` and returns the address.
    pub fn address(
        &self,
        mut layouter: impl Layouter<pallas::Base>,
        key: &PointCells,
    ) -> Result<Cell, Error> {
        let limbs: [&Cell; MESSAGE_LANES] = [
            &key.x[3], &key.x[2], &key.x[1], &key.x[0], &key.y[3], &key.y[2], &key.y[1], &key.y[0],
        ];
        let message = limbs
            .iter()
            .map(|cell| cell.value().map(limb_value))
            .collect::<Value<Vec<u64>>>();
        let trace = message.map(|limbs| {
            let mut lanes = [0u64; MESSAGE_LANES];
            for (lane, limb) in lanes.iter_mut().zip(limbs) {
                *lane = limb.swap_bytes();
            }
            KeccakTrace::compute(&lanes)
        });

        layouter.assign_region(
            || "keccak-f",
            |mut region| {
                for (j, cell) in limbs.iter().enumerate() {
                    self.s_input.enable(&mut region, j)?;
                    cell.copy_advice(|| "message limb", &mut region, self.limb, j)?;
                    self.assign_lane(
                        &mut region,
                        j,
                        trace.as_ref().map(|t| t.rounds[0].state[j]),
                    )?;
                }
                let mut padding = [0u64; LANES];
                padding[PADDING_LANE] = 0x01;
                padding[RATE_LANES - 1] = 0x80 << 56;
                for (lane, value) in padding.iter().enumerate().skip(MESSAGE_LANES) {
                    self.assign_constant_lane(&mut region, lane, *value)?;
                }

                for (round, round_constant) in ROUND_CONSTANTS.iter().enumerate() {
                    let base = round * ROUND_ROWS;
                    let mut columns = Vec::with_capacity(5);
                    for x in 0..5 {
                        self.s_parity.enable(&mut region, base + PARITY + x)?;
                        columns.push(self.assign_lane(
                            &mut region,
                            base + PARITY + x,
                            trace.as_ref().map(|t| t.rounds[round].columns[x]),
                        )?);
                    }
                    for (row, source) in [(COLUMN_COPY_HIGH, &columns[4]), (COLUMN_COPY_LOW, &columns[0])] {
                        for (cell, column) in source.iter().zip(self.bits.iter()) {
                            cell.copy_advice(|| "column copy", &mut region, *column, base + row)?;
                        }
                    }

                    for x in 0..5 {
                        self.s_mix.enable(&mut region, base + MIX + x)?;
                        self.assign_lane(
                            &mut region,
                            base + MIX + x,
                            trace.as_ref().map(|t| t.rounds[round].mix[x]),
                        )?;
                    }

                    let mut theta = Vec::with_capacity(LANES);
                    for lane in 0..LANES {
                        self.s_theta[lane / 5].enable(&mut region, base + THETA + lane)?;
                        theta.push(self.assign_lane(
                            &mut region,
                            base + THETA + lane,
                            trace.as_ref().map(|t| t.rounds[round].theta[lane]),
                        )?);
                    }

                    for (lane, cells) in theta.iter().enumerate() {
                        let row = base + RHO_PI + pi(lane);
                        for (k, cell) in cells.iter().enumerate() {
                            let target = (k + RHO[lane] as usize) % LANE_BITS;
                            cell.copy_advice(|| "rho pi", &mut region, self.bits[target], row)?;
                        }
                    }

                    self.assign_constant_lane(&mut region, base + ROUND_CONSTANT, *round_constant)?;

                    let next = base + ROUND_ROWS;
                    for lane in 0..LANES {
                        let selector = match lane % 5 {
                            _ if lane == 0 => &self.s_iota,
                            0..=2 => &self.s_chi[0],
                            3 => &self.s_chi[1],
                            _ => &self.s_chi[2],
                        };
                        selector.enable(&mut region, next + lane)?;
                        let value = trace.as_ref().map(|t| {
                            t.rounds
                                .get(round + 1)
                                .map_or(t.output[lane], |r| r.state[lane])
                        });
                        self.assign_lane(&mut region, next + lane, value)?;
                    }
                }

                self.s_address.enable(&mut region, ADDRESS_ROW)?;
                let address = trace.as_ref().map(|t| {
                    let digest = t.digest();
                    digest[12..]
                        .iter()
                        .fold(pallas::Base::zero(), |acc, byte| {
                            acc * pallas::Base::from(256) + pallas::Base::from(u64::from(*byte))
                        })
                });
                region.assign_advice(|| "address", self.limb, ADDRESS_ROW, || address)
            },
        )
    }
}
