//! Sampled verification of the merge contract.
//!
//! A merge function that is not commutative and associative corrupts results
//! silently, so the executor checks it before trusting it: once against a
//! fixed grid of leaf values and again against the first real partial
//! aggregates the map phase produces. Every broken law is collected rather
//! than stopping at the first one.

use super::merge::MergeOperator;
use super::partial::{PartialAggregate, Tally};
use crate::error::{LawViolation, MergeContractViolation};
use stillwater::validation::Validation;
use stillwater::NonEmptyVec;

type LawCheck = Validation<(), NonEmptyVec<LawViolation>>;

/// Leaf values every operator is checked against.
const LEAF_VALUES: [Tally; 7] = [-7, -1, 0, 1, 2, 3, 1_000];

/// Upper bound on how many violations are kept in one report.
const MAX_REPORTED: usize = 16;

/// Contract checker for one merge operator.
pub struct ContractCheck<'a> {
    op: &'a MergeOperator,
}

impl<'a> ContractCheck<'a> {
    pub fn new(op: &'a MergeOperator) -> Self {
        Self { op }
    }

    /// Check the leaf function on the fixed value grid.
    pub fn leaf_laws(&self) -> Validation<(), NonEmptyVec<LawViolation>> {
        let mut checks: Vec<LawCheck> = Vec::new();
        for &a in &LEAF_VALUES {
            for &b in &LEAF_VALUES {
                let ab = self.op.combine(a, b);
                let ba = self.op.combine(b, a);
                checks.push(if ab == ba {
                    Validation::success(())
                } else {
                    Validation::fail(LawViolation::NotCommutative {
                        a: a.to_string(),
                        b: b.to_string(),
                        ab: ab.to_string(),
                        ba: ba.to_string(),
                    })
                });

                for &c in &LEAF_VALUES {
                    let left = self.op.combine(ab, c);
                    let right = self.op.combine(a, self.op.combine(b, c));
                    checks.push(if left == right {
                        Validation::success(())
                    } else {
                        Validation::fail(LawViolation::NotAssociative {
                            a: a.to_string(),
                            b: b.to_string(),
                            c: c.to_string(),
                            left: left.to_string(),
                            right: right.to_string(),
                        })
                    });
                }
            }
        }
        Validation::all_vec(checks).map(|_| ())
    }

    /// Check all three laws on every pair and triple drawn from `samples`.
    pub fn aggregate_laws(&self, samples: &[PartialAggregate]) -> Validation<(), NonEmptyVec<LawViolation>> {
        let mut checks: Vec<LawCheck> = Vec::new();
        for a in samples {
            let with_identity = self.op.merge(a.clone(), self.op.identity());
            checks.push(if &with_identity == a {
                Validation::success(())
            } else {
                Validation::fail(LawViolation::NotIdentity {
                    a: a.to_string(),
                    got: with_identity.to_string(),
                })
            });

            for b in samples {
                let ab = self.op.merge(a.clone(), b.clone());
                let ba = self.op.merge(b.clone(), a.clone());
                checks.push(if ab == ba {
                    Validation::success(())
                } else {
                    Validation::fail(LawViolation::NotCommutative {
                        a: a.to_string(),
                        b: b.to_string(),
                        ab: ab.to_string(),
                        ba: ba.to_string(),
                    })
                });

                for c in samples {
                    let left = self.op.merge(ab.clone(), c.clone());
                    let right = self.op.merge(a.clone(), self.op.merge(b.clone(), c.clone()));
                    checks.push(if left == right {
                        Validation::success(())
                    } else {
                        Validation::fail(LawViolation::NotAssociative {
                            a: a.to_string(),
                            b: b.to_string(),
                            c: c.to_string(),
                            left: left.to_string(),
                            right: right.to_string(),
                        })
                    });
                }
            }
        }
        Validation::all_vec(checks).map(|_| ())
    }

    /// Run the leaf check plus the aggregate laws over `samples`.
    pub fn verify(&self, samples: &[PartialAggregate]) -> Result<(), MergeContractViolation> {
        let outcome = Validation::all_vec(vec![self.leaf_laws(), self.aggregate_laws(samples)]);
        match outcome {
            Validation::Success(_) => Ok(()),
            Validation::Failure(violations) => Err(MergeContractViolation {
                merge_fn: self.op.id().to_string(),
                violations: violations.iter().take(MAX_REPORTED).cloned().collect(),
            }),
        }
    }
}
