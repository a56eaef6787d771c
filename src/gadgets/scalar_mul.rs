//! Windowed multiplication `Q = s·T + U` over a verifier-supplied table.
//!
//! The start point and every table entry live in the instance column. Each
//! window selects one of its sixteen entries with four private digit bits and
//! adds it to the accumulator with one chord addition.

use super::nonnative::{Cell, LimbCells, NonNativeChip, PointCells};
use crate::circuit::{START_ROW, TABLE_ROW};
use crate::ecdsa::{addition_relations, SignatureWitness, LIMBS, TABLE_SIZE, WINDOWS, WINDOW_BITS};
use halo2_proofs::{
    circuit::{Layouter, Value},
    plonk::{Advice, Column, ConstraintSystem, Constraints, Error, Expression, Instance, Selector},
    poly::Rotation,
};
use pasta_curves::pallas;

const POINT_LIMBS: usize = 2 * LIMBS;

/// Instance row of limb `limb` of entry `digit` in window `window`.
#[must_use]
pub fn table_row(window: usize, digit: usize, limb: usize) -> usize {
    TABLE_ROW + (window * TABLE_SIZE + digit) * POINT_LIMBS + limb
}

fn split(cells: Vec<Cell>) -> Result<PointCells, Error> {
    let mut cells = cells.into_iter();
    let mut next = || -> Result<LimbCells, Error> {
        let limbs: Vec<Cell> = cells.by_ref().take(LIMBS).collect();
        limbs.try_into().map_err(|_| Error::Synthesis)
    };
    let x = next()?;
    let y = next()?;
    Ok(PointCells { x, y })
}

#[derive(Debug, Clone)]
pub struct ScalarMulConfig {
    entries: [Column<Advice>; TABLE_SIZE],
    digits: [Column<Advice>; WINDOW_BITS],
    selected: Column<Advice>,
    s_select: Selector,
    instance: Column<Instance>,
}

impl ScalarMulConfig {
    /// `columns`: sixteen entry columns, four digit bit columns, then the
    /// output column.
    pub fn configure(
        meta: &mut ConstraintSystem<pallas::Base>,
        columns: [Column<Advice>; TABLE_SIZE + WINDOW_BITS + 1],
        instance: Column<Instance>,
    ) -> Self {
        for column in columns {
            meta.enable_equality(column);
        }
        let mut entries = [columns[0]; TABLE_SIZE];
        entries.copy_from_slice(&columns[..TABLE_SIZE]);
        let mut digits = [columns[0]; WINDOW_BITS];
        digits.copy_from_slice(&columns[TABLE_SIZE..TABLE_SIZE + WINDOW_BITS]);
        let selected = columns[TABLE_SIZE + WINDOW_BITS];

        let s_select = meta.selector();
        meta.create_gate("window select", |meta| {
            let s = meta.query_selector(s_select);
            let one = Expression::Constant(pallas::Base::one());
            let bits = digits.map(|column| meta.query_advice(column, Rotation::cur()));

            let mut constraints: Vec<Expression<pallas::Base>> = bits
                .iter()
                .map(|b| b.clone() * (one.clone() - b.clone()))
                .collect();

            let mut chosen = Expression::Constant(pallas::Base::zero());
            for (digit, column) in entries.iter().enumerate() {
                let indicator = bits.iter().enumerate().fold(one.clone(), |acc, (i, b)| {
                    if (digit >> i) & 1 == 1 {
                        acc * b.clone()
                    } else {
                        acc * (one.clone() - b.clone())
                    }
                });
                chosen = chosen + indicator * meta.query_advice(*column, Rotation::cur());
            }
            constraints.push(meta.query_advice(selected, Rotation::cur()) - chosen);

            Constraints::with_selector(s, constraints)
        });

        Self {
            entries,
            digits,
            selected,
            s_select,
            instance,
        }
    }

    /// Copies `A₀` out of the instance column.
    fn load_start(&self, mut layouter: impl Layouter<pallas::Base>) -> Result<PointCells, Error> {
        let cells = layouter.assign_region(
            || "chain start",
            |mut region| {
                (0..POINT_LIMBS)
                    .map(|limb| {
                        region.assign_advice_from_instance(
                            || "start limb",
                            self.instance,
                            START_ROW + limb,
                            self.selected,
                            limb,
                        )
                    })
                    .collect::<Result<Vec<_>, Error>>()
            },
        )?;
        split(cells)
    }

    /// The table entry of `window` picked by `digit`.
    fn select(
        &self,
        mut layouter: impl Layouter<pallas::Base>,
        window: usize,
        digit: Value<u8>,
    ) -> Result<PointCells, Error> {
        let cells = layouter.assign_region(
            || format!("select window {window}"),
            |mut region| {
                let mut bits: Vec<Cell> = Vec::with_capacity(WINDOW_BITS);
                let mut selected = Vec::with_capacity(POINT_LIMBS);

                for limb in 0..POINT_LIMBS {
                    self.s_select.enable(&mut region, limb)?;

                    let mut row = Vec::with_capacity(TABLE_SIZE);
                    for (entry, column) in self.entries.iter().enumerate() {
                        row.push(region.assign_advice_from_instance(
                            || format!("entry {entry}"),
                            self.instance,
                            table_row(window, entry, limb),
                            *column,
                            limb,
                        )?);
                    }

                    for (i, column) in self.digits.iter().enumerate() {
                        if limb == 0 {
                            bits.push(region.assign_advice(
                                || format!("digit bit {i}"),
                                *column,
                                0,
                                || digit.map(|d| pallas::Base::from(u64::from((d >> i) & 1))),
                            )?);
                        } else {
                            bits[i].copy_advice(|| "digit bit", &mut region, *column, limb)?;
                        }
                    }

                    let value = digit.and_then(|d| {
                        row.get(usize::from(d))
                            .map_or_else(Value::unknown, |cell| cell.value().copied())
                    });
                    selected.push(region.assign_advice(
                        || "selected limb",
                        self.selected,
                        limb,
                        || value,
                    )?);
                }
                Ok(selected)
            },
        )?;
        split(cells)
    }

    /// Runs the chain and returns the point it ends at.
    ///
    /// `signature` must carry one digit and one addition per window.
    pub fn multiply(
        &self,
        layouter: &mut impl Layouter<pallas::Base>,
        chip: &mut NonNativeChip,
        signature: Value<&SignatureWitness>,
    ) -> Result<PointCells, Error> {
        signature.error_if_known_and(|s| s.steps.len() != WINDOWS)?;

        let mut acc = self.load_start(layouter.namespace(|| "start"))?;
        for window in 0..WINDOWS {
            let digit = signature.map(|s| s.windows[window]);
            let entry = self.select(layouter.namespace(|| format!("window {window}")), window, digit)?;

            let step = signature.map(|s| s.steps[window]);
            let mut cells = chip
                .assign_limbs(
                    layouter,
                    &[
                        step.map(|s| s.lambda),
                        step.map(|s| s.sum.x),
                        step.map(|s| s.sum.y),
                    ],
                )?
                .into_iter();
            let (Some(lambda), Some(x), Some(y)) = (cells.next(), cells.next(), cells.next()) else {
                return Err(Error::Synthesis);
            };
            let sum = PointCells { x, y };

            let relations = addition_relations(
                (&acc.x, &acc.y),
                (&entry.x, &entry.y),
                &lambda,
                (&sum.x, &sum.y),
            );
            for (index, relation) in relations.iter().enumerate() {
                chip.relation(
                    layouter,
                    &lambda,
                    relation,
                    step.map(|s| s.quotients[index]),
                )?;
            }
            acc = sum;
        }
        Ok(acc)
    }
}
