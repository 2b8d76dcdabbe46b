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
    utils::CurvePoint,
};
use k256::Scalar;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// Feldman commitment: `C_j = g^{a_j}` for every coefficient `a_j`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinearCommitment {
    pub(crate) coefficients: Vec<CurvePoint>,
}

impl LinearCommitment {
    /// `g^{P(x)}`, computed from the public coefficients.
    fn evaluate_in_exponent(&self, x: &Scalar) -> CurvePoint {
        self.coefficients
            .iter()
            .rev()
            .fold(CurvePoint::IDENTITY, |acc, c| acc.multiply_by_scalar(x) + *c)
    }
}

/// Feldman verifiable secret sharing commitments.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinearCommitmentScheme;

fn as_linear(commitment: &Commitment) -> Result<&LinearCommitment> {
    match commitment {
        Commitment::Linear(c) => Ok(c),
        Commitment::Constant(_) => arg_err!("expected a linear commitment"),
    }
}

impl CommitmentScheme for LinearCommitmentScheme {
    fn kind(&self) -> CommitmentKind {
        CommitmentKind::Linear
    }

    fn generate(&self, polynomial: &Polynomial, _shareholders: &[ShareholderId]) -> Commitment {
        Commitment::Linear(LinearCommitment {
            coefficients: polynomial
                .coefficients()
                .iter()
                .map(CurvePoint::commit)
                .collect(),
        })
    }

    fn extract(&self, commitment: &Commitment, _shareholder: ShareholderId) -> Result<Commitment> {
        Ok(Commitment::Linear(as_linear(commitment)?.clone()))
    }

    fn verify(&self, share: &Share, commitment: &Commitment) -> bool {
        match as_linear(commitment) {
            Ok(c) => {
                c.evaluate_in_exponent(&share.shareholder.as_scalar())
                    == CurvePoint::commit(&share.value)
            }
            Err(_) => false,
        }
    }

    fn sum(&self, lhs: &Commitment, rhs: &Commitment) -> Result<Commitment> {
        let (lhs, rhs) = (as_linear(lhs)?, as_linear(rhs)?);
        let len = lhs.coefficients.len().max(rhs.coefficients.len());
        let coefficient = |c: &LinearCommitment, i: usize| {
            c.coefficients.get(i).copied().unwrap_or(CurvePoint::IDENTITY)
        };
        Ok(Commitment::Linear(LinearCommitment {
            coefficients: (0..len)
                .map(|i| coefficient(lhs, i) + coefficient(rhs, i))
                .collect(),
        }))
    }

    fn recover(
        &self,
        target: ShareholderId,
        commitments: &BTreeMap<ShareholderId, Commitment>,
        threshold: usize,
    ) -> Result<Commitment> {
        let (_, supporters) = majority(commitments, threshold).ok_or_else(|| {
            warn!(
                "No linear commitment for {} is backed by {} shareholders",
                target, threshold
            );
            InternalError::NotEnoughContributions {
                needed: threshold,
                got: commitments.len(),
            }
        })?;
        let (_, commitment) = supporters
            .first()
            .ok_or(InternalError::InternalInvariantFailed)?;
        Ok((*commitment).clone())
    }
}
