//! Arithmetic modulo the secp256k1 base field `q`, over 64-bit limbs.
//!
//! A relation `λ·(b - c) + d - v₀ - v₁ - v₂ ≡ 0 (mod q)` is proven as the
//! integer identity
//!
//! ```text
//! λ·(b - c) + d - Σv + 2^258·q - k'·q = 0
//! ```
//!
//! checked limb column by limb column with signed carries. Every witnessed
//! limb and quotient limb is range-checked to 64 bits and every carry, stored
//! shifted by `2^70`, to 72 bits. Column sums stay below `2^131` in absolute
//! value, so no constraint wraps around the native modulus.

use crate::ecdsa::{Limbs, Quotient, Relation, FIELD_MODULUS, LIMBS, QUOTIENT_LIMBS};
use halo2_gadgets::utilities::lookup_range_check::{LookupRangeCheck, LookupRangeCheckConfig};
use halo2_proofs::{
    circuit::{AssignedCell, Layouter, Region, Value},
    plonk::{Advice, Column, ConstraintSystem, Constraints, Error, Expression, Selector, TableColumn},
    poly::Rotation,
};
use pasta_curves::group::ff::{Field, PrimeField};
use pasta_curves::pallas;
use std::ops::{Add, Mul, Sub};

const RANGE_WORD_BITS: usize = 8;
pub type RangeCheck = LookupRangeCheckConfig<pallas::Base, RANGE_WORD_BITS>;
pub const RANGE_LANES: usize = 4;

pub const LIMB_WORDS: usize = 8;
const CARRIES: usize = 2 * LIMBS - 1;
const CARRY_OFFSET_BITS: u32 = 70;
const CARRY_WORDS: usize = 9;

const OPERAND_ROWS: usize = 6;
const QUOTIENT_ROW: usize = 1 + OPERAND_ROWS;
const CARRY_ROW: usize = QUOTIENT_ROW + 1;

pub type Cell = AssignedCell<pallas::Base, pallas::Base>;
pub type LimbCells = [Cell; LIMBS];

/// Affine point with limbed coordinates.
#[derive(Debug, Clone)]
pub struct PointCells {
    pub x: LimbCells,
    pub y: LimbCells,
}

fn carry_position(index: usize) -> (usize, usize) {
    (CARRY_ROW + index / QUOTIENT_LIMBS, index % QUOTIENT_LIMBS)
}

fn pow2(bits: u32) -> pallas::Base {
    pallas::Base::from(2).pow_vartime([u64::from(bits)])
}

/// Limb column sums `t₀..t₇` of the relation identity.
///
/// Shared by the gate (over expressions) and the witness (over field values).
fn column_sums<T>(
    lambda: &[T],
    operands: &[Vec<T>; OPERAND_ROWS],
    quotient: &[T],
    constant: impl Fn(pallas::Base) -> T,
) -> Vec<T>
where
    T: Clone + Add<Output = T> + Sub<Output = T> + Mul<Output = T>,
{
    let [b, c, d, v0, v1, v2] = operands;
    let modulus = FIELD_MODULUS.map(pallas::Base::from);

    (0..2 * LIMBS)
        .map(|k| {
            let mut t = if k >= LIMBS {
                constant(pallas::Base::from(4) * modulus[k - LIMBS])
            } else {
                constant(pallas::Base::zero())
            };
            for i in 0..=k.min(LIMBS - 1) {
                let j = k - i;
                if j < LIMBS {
                    t = t + lambda[i].clone() * (b[j].clone() - c[j].clone());
                }
            }
            if k < LIMBS {
                t = t + d[k].clone() - v0[k].clone() - v1[k].clone() - v2[k].clone();
            }
            for i in 0..=k.min(LIMBS - 1) {
                let j = k - i;
                if j < QUOTIENT_LIMBS {
                    t = t - constant(modulus[i]) * quotient[j].clone();
                }
            }
            t
        })
        .collect()
}

/// Signed carries out of each column, shifted by `2^70`.
fn shifted_carries(sums: &[pallas::Base]) -> Vec<pallas::Base> {
    let inverse_base = pallas::Base::TWO_INV.pow_vartime([64]);
    let offset = pow2(CARRY_OFFSET_BITS);
    let mut carry = pallas::Base::zero();
    sums[..CARRIES]
        .iter()
        .map(|t| {
            carry = (*t + carry) * inverse_base;
            carry + offset
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct NonNativeConfig {
    advice: [Column<Advice>; QUOTIENT_LIMBS],
    s_relation: Selector,
    range: [RangeCheck; RANGE_LANES],
    table: TableColumn,
}

impl NonNativeConfig {
    pub fn configure(
        meta: &mut ConstraintSystem<pallas::Base>,
        advice: [Column<Advice>; QUOTIENT_LIMBS],
        running_sums: [Column<Advice>; RANGE_LANES],
        table: TableColumn,
    ) -> Self {
        let range = running_sums.map(|column| RangeCheck::configure(meta, column, table));
        let s_relation = meta.selector();

        meta.create_gate("mod q relation", |meta| {
            let s = meta.query_selector(s_relation);

            let mut rows: Vec<Vec<Expression<pallas::Base>>> = Vec::with_capacity(QUOTIENT_ROW);
            for row in 0..QUOTIENT_ROW {
                let mut limbs = Vec::with_capacity(LIMBS);
                for column in &advice[..LIMBS] {
                    limbs.push(meta.query_advice(*column, Rotation(row as i32)));
                }
                rows.push(limbs);
            }
            let mut quotient = Vec::with_capacity(QUOTIENT_LIMBS);
            for column in &advice {
                quotient.push(meta.query_advice(*column, Rotation(QUOTIENT_ROW as i32)));
            }
            let offset = Expression::Constant(pow2(CARRY_OFFSET_BITS));
            let mut carries = Vec::with_capacity(CARRIES);
            for index in 0..CARRIES {
                let (row, column) = carry_position(index);
                carries.push(meta.query_advice(advice[column], Rotation(row as i32)) - offset.clone());
            }

            let lambda = rows.remove(0);
            let operands: [Vec<Expression<pallas::Base>>; OPERAND_ROWS] = [
                rows[0].clone(),
                rows[1].clone(),
                rows[2].clone(),
                rows[3].clone(),
                rows[4].clone(),
                rows[5].clone(),
            ];
            let sums = column_sums(&lambda, &operands, &quotient, Expression::Constant);

            let base = Expression::Constant(pow2(64));
            let mut constraints = Vec::with_capacity(2 * LIMBS);
            constraints.push(sums[0].clone() - carries[0].clone() * base.clone());
            for k in 1..CARRIES {
                constraints.push(
                    sums[k].clone() + carries[k - 1].clone() - carries[k].clone() * base.clone(),
                );
            }
            constraints.push(sums[CARRIES].clone() + carries[CARRIES - 1].clone());

            Constraints::with_selector(s, constraints)
        });

        Self {
            advice,
            s_relation,
            range,
            table,
        }
    }

    /// Loads `[0, 2^8)` into the lookup table.
    pub fn load_table(&self, layouter: &mut impl Layouter<pallas::Base>) -> Result<(), Error> {
        layouter.assign_table(
            || "range table",
            |mut table| {
                for index in 0..(1usize << RANGE_WORD_BITS) {
                    table.assign_cell(
                        || "range word",
                        self.table,
                        index,
                        || Value::known(pallas::Base::from(index as u64)),
                    )?;
                }
                Ok(())
            },
        )
    }
}

/// Chip over [`NonNativeConfig`] that spreads range checks across the
/// running-sum lanes.
#[derive(Debug)]
pub struct NonNativeChip {
    config: NonNativeConfig,
    next_lane: usize,
}

impl NonNativeChip {
    #[must_use]
    pub fn construct(config: NonNativeConfig) -> Self {
        Self {
            config,
            next_lane: 0,
        }
    }

    /// Constrains `cell` to `8 * words` bits.
    pub fn range_check(
        &mut self,
        layouter: &mut impl Layouter<pallas::Base>,
        cell: &Cell,
        words: usize,
    ) -> Result<(), Error> {
        let lane = self.next_lane;
        self.next_lane = (lane + 1) % RANGE_LANES;
        self.config.range[lane].copy_check(
            layouter.namespace(|| format!("range check lane {lane}")),
            cell.clone(),
            words,
            true,
        )?;
        Ok(())
    }

    /// Witnesses one limbed value per row and range-checks every limb.
    pub fn assign_limbs(
        &mut self,
        layouter: &mut impl Layouter<pallas::Base>,
        values: &[Value<Limbs>],
    ) -> Result<Vec<LimbCells>, Error> {
        let assigned = layouter.assign_region(
            || "limbed values",
            |mut region| {
                values
                    .iter()
                    .enumerate()
                    .map(|(row, value)| self.assign_row(&mut region, row, *value))
                    .collect::<Result<Vec<_>, Error>>()
            },
        )?;

        for cells in &assigned {
            for cell in cells {
                self.range_check(layouter, cell, LIMB_WORDS)?;
            }
        }
        Ok(assigned)
    }

    fn assign_row(
        &self,
        region: &mut Region<'_, pallas::Base>,
        row: usize,
        value: Value<Limbs>,
    ) -> Result<LimbCells, Error> {
        let cells = (0..LIMBS)
            .map(|i| {
                region.assign_advice(
                    || format!("limb {i}"),
                    self.config.advice[i],
                    row,
                    || value.map(|limbs| pallas::Base::from(limbs[i])),
                )
            })
            .collect::<Result<Vec<_>, Error>>()?;
        limb_array(cells)
    }

    fn copy_row(
        &self,
        region: &mut Region<'_, pallas::Base>,
        row: usize,
        operand: Option<&LimbCells>,
    ) -> Result<LimbCells, Error> {
        let cells = (0..LIMBS)
            .map(|i| match operand {
                Some(cells) => {
                    cells[i].copy_advice(|| "operand limb", region, self.config.advice[i], row)
                }
                None => region.assign_advice_from_constant(
                    || "zero limb",
                    self.config.advice[i],
                    row,
                    pallas::Base::zero(),
                ),
            })
            .collect::<Result<Vec<_>, Error>>()?;
        limb_array(cells)
    }

    /// Proves one relation with quotient `quotient`.
    pub fn relation(
        &mut self,
        layouter: &mut impl Layouter<pallas::Base>,
        lambda: &LimbCells,
        relation: &Relation<&LimbCells>,
        quotient: Value<Quotient>,
    ) -> Result<(), Error> {
        let (quotient_cells, carry_cells) = layouter.assign_region(
            || "mod q relation",
            |mut region| {
                self.config.s_relation.enable(&mut region, 0)?;

                let lambda = self.copy_row(&mut region, 0, Some(lambda))?;
                let operands = [
                    relation.b,
                    relation.c,
                    relation.d,
                    relation.v[0],
                    relation.v[1],
                    relation.v[2],
                ];
                let mut operand_cells = Vec::with_capacity(OPERAND_ROWS);
                for (offset, operand) in operands.iter().enumerate() {
                    operand_cells.push(self.copy_row(&mut region, 1 + offset, *operand)?);
                }

                let quotient_cells = (0..QUOTIENT_LIMBS)
                    .map(|j| {
                        region.assign_advice(
                            || format!("quotient limb {j}"),
                            self.config.advice[j],
                            QUOTIENT_ROW,
                            || quotient.map(|limbs| pallas::Base::from(limbs[j])),
                        )
                    })
                    .collect::<Result<Vec<_>, Error>>()?;

                let carries = row_values(&lambda)
                    .zip(
                        operand_cells
                            .iter()
                            .map(|cells| row_values(cells))
                            .collect::<Value<Vec<_>>>(),
                    )
                    .zip(row_values(&quotient_cells))
                    .map(|((lambda, operands), quotient)| {
                        let operands: [Vec<pallas::Base>; OPERAND_ROWS] = [
                            operands[0].clone(),
                            operands[1].clone(),
                            operands[2].clone(),
                            operands[3].clone(),
                            operands[4].clone(),
                            operands[5].clone(),
                        ];
                        shifted_carries(&column_sums(&lambda, &operands, &quotient, |c| c))
                    });

                let carry_cells = (0..CARRIES)
                    .map(|index| {
                        let (row, column) = carry_position(index);
                        region.assign_advice(
                            || format!("carry {index}"),
                            self.config.advice[column],
                            row,
                            || carries.as_ref().map(|carries| carries[index]),
                        )
                    })
                    .collect::<Result<Vec<_>, Error>>()?;

                Ok((quotient_cells, carry_cells))
            },
        )?;

        for cell in &quotient_cells {
            self.range_check(layouter, cell, LIMB_WORDS)?;
        }
        for cell in &carry_cells {
            self.range_check(layouter, cell, CARRY_WORDS)?;
        }
        Ok(())
    }
}

fn row_values(cells: &[Cell]) -> Value<Vec<pallas::Base>> {
    cells.iter().map(|cell| cell.value().copied()).collect()
}

fn limb_array(cells: Vec<Cell>) -> Result<LimbCells, Error> {
    cells.try_into().map_err(|_| Error::Synthesis)
}
