// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use super::{majority, Commitment, CommitmentKind, CommitmentScheme, Share};
use crate::{
    errors::{InternalError, Result},
    polynomial::Polynomial,
    protocol::ShareholderId,
    utils::{interpolate_points_at, sha256, CurvePoint},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

const LEAF_LABEL: &[u8] = b"vssr constant commitment leaf";
const DIGEST_LABEL: &[u8] = b"vssr constant commitment digest";

/// Commitment to a single polynomial `P`.
///
/// `leaves[i] = H(i || g^{P(i)})` for every shareholder `i`, and `digest`
/// hashes the leaves. Shareholder `i` privately keeps `g^{P(i)}` as its
/// witness.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstantTerm {
    pub(crate) digest: [u8; 32],
    pub(crate) leaves: BTreeMap<ShareholderId, [u8; 32]>,
    pub(crate) witnesses: BTreeMap<ShareholderId, CurvePoint>,
}

/// A constant commitment, or the formal sum of several of them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstantCommitment {
    pub(crate) terms: Vec<ConstantTerm>,
}

fn leaf_hash(shareholder: ShareholderId, witness: &CurvePoint) -> [u8; 32] {
    sha256(&[
        LEAF_LABEL,
        shareholder.to_bytes().as_slice(),
        witness.to_bytes().as_slice(),
    ])
}

fn leaves_digest(leaves: &BTreeMap<ShareholderId, [u8; 32]>) -> [u8; 32] {
    let ids: Vec<[u8; 8]> = leaves.keys().map(|s| s.to_bytes()).collect();
    let mut parts: Vec<&[u8]> = vec![DIGEST_LABEL];
    for (id, leaf) in ids.iter().zip(leaves.values()) {
        parts.push(id);
        parts.push(leaf);
    }
    sha256(&parts)
}

impl ConstantTerm {
    fn is_well_formed(&self) -> bool {
        leaves_digest(&self.leaves) == self.digest
    }

    /// Whether `witness` is the committed value `g^{P(shareholder)}`.
    fn accepts(&self, shareholder: ShareholderId, witness: &CurvePoint) -> bool {
        self.leaves.get(&shareholder) == Some(&leaf_hash(shareholder, witness))
    }
}

impl ConstantCommitment {
    pub(crate) fn without_witnesses(&self) -> Self {
        Self {
            terms: self
                .terms
                .iter()
                .map(|t| ConstantTerm {
                    digest: t.digest,
                    leaves: t.leaves.clone(),
                    witnesses: BTreeMap::new(),
                })
                .collect(),
        }
    }

    pub(crate) fn single_witness(&self, shareholder: ShareholderId) -> Option<CurvePoint> {
        match self.terms.as_slice() {
            [term] => term.witnesses.get(&shareholder).copied(),
            _ => None,
        }
    }

    pub(crate) fn with_witness(mut self, shareholder: ShareholderId, witness: CurvePoint) -> Self {
        if let [term] = self.terms.as_mut_slice() {
            let _ = term.witnesses.insert(shareholder, witness);
        }
        self
    }
}

/// Evaluation-digest commitments.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConstantCommitmentScheme;

fn as_constant(commitment: &Commitment) -> Result<&ConstantCommitment> {
    match commitment {
        Commitment::Constant(c) => Ok(c),
        Commitment::Linear(_) => arg_err!("expected a constant commitment"),
    }
}

impl CommitmentScheme for ConstantCommitmentScheme {
    fn kind(&self) -> CommitmentKind {
        CommitmentKind::Constant
    }

    fn generate(&self, polynomial: &Polynomial, shareholders: &[ShareholderId]) -> Commitment {
        let witnesses: BTreeMap<ShareholderId, CurvePoint> = shareholders
            .iter()
            .map(|s| (*s, CurvePoint::commit(&polynomial.evaluate(&s.as_scalar()))))
            .collect();
        let leaves = witnesses
            .iter()
            .map(|(s, w)| (*s, leaf_hash(*s, w)))
            .collect();
        let digest = leaves_digest(&leaves);
        Commitment::Constant(ConstantCommitment {
            terms: vec![ConstantTerm {
                digest,
                leaves,
                witnesses,
            }],
        })
    }

    fn extract(&self, commitment: &Commitment, shareholder: ShareholderId) -> Result<Commitment> {
        let commitment = as_constant(commitment)?;
        let terms = commitment
            .terms
            .iter()
            .map(|t| {
                let witness = t.witnesses.get(&shareholder).ok_or_else(|| {
                    InternalError::InvalidArgument(format!(
                        "commitment carries no witness for {shareholder}"
                    ))
                })?;
                Ok(ConstantTerm {
                    digest: t.digest,
                    leaves: t.leaves.clone(),
                    witnesses: BTreeMap::from([(shareholder, *witness)]),
                })
            })
            .collect::<Result<_>>()?;
        Ok(Commitment::Constant(ConstantCommitment { terms }))
    }

    fn verify(&self, share: &Share, commitment: &Commitment) -> bool {
        let commitment = match as_constant(commitment) {
            Ok(c) => c,
            Err(_) => return false,
        };
        let mut sum = CurvePoint::IDENTITY;
        for term in &commitment.terms {
            if !term.is_well_formed() {
                debug!("Constant commitment digest does not match its leaves");
                return false;
            }
            let witness = match term.witnesses.get(&share.shareholder) {
                Some(w) => w,
                None => return false,
            };
            if !term.accepts(share.shareholder, witness) {
                return false;
            }
            sum = sum + *witness;
        }
        !commitment.terms.is_empty() && sum == CurvePoint::commit(&share.value)
    }

    fn sum(&self, lhs: &Commitment, rhs: &Commitment) -> Result<Commitment> {
        let mut terms = as_constant(lhs)?.terms.clone();
        terms.extend(as_constant(rhs)?.terms.iter().cloned());
        Ok(Commitment::Constant(ConstantCommitment { terms }))
    }

    fn recover(
        &self,
        target: ShareholderId,
        commitments: &BTreeMap<ShareholderId, Commitment>,
        threshold: usize,
    ) -> Result<Commitment> {
        let not_enough = |got| InternalError::NotEnoughContributions {
            needed: threshold,
            got,
        };
        let (_, supporters) =
            majority(commitments, threshold).ok_or_else(|| not_enough(commitments.len()))?;

        // Only supporters whose own witnesses open their leaves can be used
        // for interpolation.
        let mut usable = Vec::with_capacity(threshold);
        for (shareholder, commitment) in &supporters {
            let commitment = as_constant(commitment)?;
            let witnesses: Option<Vec<CurvePoint>> = commitment
                .terms
                .iter()
                .map(|t| {
                    t.witnesses
                        .get(shareholder)
                        .filter(|w| t.is_well_formed() && t.accepts(*shareholder, w))
                        .copied()
                })
                .collect();
            match witnesses {
                Some(witnesses) => usable.push((*shareholder, commitment, witnesses)),
                None => warn!(
                    "Ignoring constant commitment of {} with an invalid witness",
                    shareholder
                ),
            }
            if usable.len() == threshold {
                break;
            }
        }
        if usable.len() < threshold {
            return Err(not_enough(usable.len()));
        }

        let (_, reference, _) = usable
            .first()
            .ok_or(InternalError::InternalInvariantFailed)?;
        let mut terms = Vec::with_capacity(reference.terms.len());
        for (index, term) in reference.terms.iter().enumerate() {
            let points: Vec<_> = usable
                .iter()
                .map(|(s, _, w)| (s.as_scalar(), w[index]))
                .collect();
            let witness = interpolate_points_at(&points, &target.as_scalar())?;
            if !term.accepts(target, &witness) {
                warn!("Interpolated witness of {} does not open its leaf", target);
                return Err(InternalError::FailedToVerifyProof(format!(
                    "recovered constant commitment for {target} is inconsistent"
                )));
            }
            terms.push(ConstantTerm {
                digest: term.digest,
                leaves: term.leaves.clone(),
                witnesses: BTreeMap::from([(target, witness)]),
            });
        }
        Ok(Commitment::Constant(ConstantCommitment { terms }))
    }
}
