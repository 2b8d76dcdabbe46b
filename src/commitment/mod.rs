// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Polynomial commitments used to make shares verifiable.
//!
//! Two schemes implement the [`CommitmentScheme`] capability:
//! - [`LinearCommitmentScheme`], Feldman commitments to every coefficient.
//!   They are homomorphic, so summing two commitments commits to the sum of
//!   the polynomials.
//! - [`ConstantCommitmentScheme`], a digest over per-shareholder evaluation
//!   leaves plus a per-shareholder witness. Its size does not grow with the
//!   degree of the polynomial.
//!
//! The scheme is picked once, from configuration, and injected everywhere as
//! an `Arc<dyn CommitmentScheme>`.

mod constant;
mod linear;

pub use constant::{ConstantCommitment, ConstantCommitmentScheme};
pub use linear::{LinearCommitment, LinearCommitmentScheme};

use crate::{
    errors::Result,
    polynomial::Polynomial,
    protocol::ShareholderId,
    utils::{sha256, CurvePoint},
};
use displaydoc::Display;
use k256::Scalar;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt::Debug, str::FromStr, sync::Arc};

/// A point on a shared polynomial, held by one shareholder.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Share {
    pub(crate) shareholder: ShareholderId,
    pub(crate) value: Scalar,
}

impl Share {
    /// Create a share of `shareholder` with the given value.
    pub fn new(shareholder: ShareholderId, value: Scalar) -> Self {
        Self { shareholder, value }
    }

    /// The owner of the share.
    pub fn shareholder(&self) -> ShareholderId {
        self.shareholder
    }

    /// The point `P(shareholder)`.
    pub fn value(&self) -> &Scalar {
        &self.value
    }
}

impl Debug for Share {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Share")
            .field("shareholder", &self.shareholder)
            .field("value", &"[redacted]")
            .finish()
    }
}

/// Selects one of the two commitment schemes.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitmentKind {
    /// linear
    Linear,
    /// constant
    Constant,
}

impl Default for CommitmentKind {
    fn default() -> Self {
        CommitmentKind::Linear
    }
}

impl FromStr for CommitmentKind {
    type Err = crate::errors::InternalError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "linear" | "1" => Ok(CommitmentKind::Linear),
            "constant" | "2" => Ok(CommitmentKind::Constant),
            other => Err(crate::errors::InternalError::Configuration(format!(
                "unknown commitment scheme `{other}`"
            ))),
        }
    }
}

impl CommitmentKind {
    /// Instantiate the selected scheme.
    pub fn scheme(self) -> Arc<dyn CommitmentScheme> {
        match self {
            CommitmentKind::Linear => Arc::new(LinearCommitmentScheme),
            CommitmentKind::Constant => Arc::new(ConstantCommitmentScheme),
        }
    }
}

/// A commitment to one polynomial, or to a sum of polynomials.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Commitment {
    /// Feldman commitment.
    Linear(LinearCommitment),
    /// Evaluation-digest commitment.
    Constant(ConstantCommitment),
}

impl Commitment {
    /// A digest that is equal for two commitments exactly when they commit to
    /// the same polynomial, independently of which shareholder-specific
    /// witness they carry.
    pub fn consistent_hash(&self) -> [u8; 32] {
        match self {
            Commitment::Linear(c) => {
                let bytes: Vec<Vec<u8>> = c.coefficients.iter().map(|p| p.to_bytes()).collect();
                let parts: Vec<&[u8]> = bytes.iter().map(|b| b.as_slice()).collect();
                sha256(&parts)
            }
            Commitment::Constant(c) => {
                let parts: Vec<&[u8]> = c.terms.iter().map(|t| t.digest.as_slice()).collect();
                sha256(&parts)
            }
        }
    }

    /// Whether both commitments bind the same secret.
    pub fn is_of_same_secret(&self, other: &Commitment) -> bool {
        self.consistent_hash() == other.consistent_hash()
    }

    /// The part of the commitment every shareholder may see.
    pub fn public_part(&self) -> Commitment {
        match self {
            Commitment::Linear(c) => Commitment::Linear(c.clone()),
            Commitment::Constant(c) => Commitment::Constant(c.without_witnesses()),
        }
    }

    /// The witness this commitment carries for `shareholder`, if any.
    /// Only constant commitments carry witnesses.
    pub fn witness_of(&self, shareholder: ShareholderId) -> Option<CurvePoint> {
        match self {
            Commitment::Linear(_) => None,
            Commitment::Constant(c) => c.single_witness(shareholder),
        }
    }

    /// Attach a private witness received separately from the public part.
    pub fn with_witness(self, shareholder: ShareholderId, witness: CurvePoint) -> Commitment {
        match self {
            Commitment::Linear(c) => Commitment::Linear(c),
            Commitment::Constant(c) => Commitment::Constant(c.with_witness(shareholder, witness)),
        }
    }
}

/// The operations the sharing and recovery protocols need from a commitment
/// scheme.
pub trait CommitmentScheme: Send + Sync + Debug {
    /// Which scheme this is.
    fn kind(&self) -> CommitmentKind;

    /// Commit to `polynomial`, producing the material every one of
    /// `shareholders` needs to verify its own evaluation.
    fn generate(&self, polynomial: &Polynomial, shareholders: &[ShareholderId]) -> Commitment;

    /// Reduce a dealer commitment to the form `shareholder` keeps.
    fn extract(&self, commitment: &Commitment, shareholder: ShareholderId) -> Result<Commitment>;

    /// Check that `share` is the evaluation of the committed polynomial.
    fn verify(&self, share: &Share, commitment: &Commitment) -> bool;

    /// A commitment to the sum of the two committed polynomials.
    fn sum(&self, lhs: &Commitment, rhs: &Commitment) -> Result<Commitment>;

    /// Rebuild a commitment usable at `target` from the commitments held by
    /// other shareholders. At least `threshold` of them must agree on the
    /// committed polynomial.
    fn recover(
        &self,
        target: ShareholderId,
        commitments: &BTreeMap<ShareholderId, Commitment>,
        threshold: usize,
    ) -> Result<Commitment>;
}

/// Group commitments by [`Commitment::consistent_hash`] and return the digest
/// reported most often, with its supporters, if at least `threshold`
/// commitments agree on it.
pub(crate) fn majority<'a>(
    commitments: &'a BTreeMap<ShareholderId, Commitment>,
    threshold: usize,
) -> Option<([u8; 32], Vec<(ShareholderId, &'a Commitment)>)> {
    let mut groups: BTreeMap<[u8; 32], Vec<(ShareholderId, &Commitment)>> = BTreeMap::new();
    for (shareholder, commitment) in commitments {
        groups
            .entry(commitment.consistent_hash())
            .or_default()
            .push((*shareholder, commitment));
    }
    groups
        .into_iter()
        .max_by_key(|(_, members)| members.len())
        .filter(|(_, members)| members.len() >= threshold)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{errors::InternalError, utils::random_scalar};
    use rand::rngs::OsRng;

    fn shareholders(n: u32) -> Vec<ShareholderId> {
        (0..n).map(ShareholderId::from_process).collect()
    }

    fn check_scheme(scheme: &dyn CommitmentScheme) -> Result<()> {
        let mut rng = OsRng;
        let holders = shareholders(4);
        let (a, b) = (random_scalar(&mut rng), random_scalar(&mut rng));
        let p = Polynomial::random(&mut rng, a, 1);
        let q = Polynomial::random(&mut rng, b, 1);
        let cp = scheme.generate(&p, &holders);
        let cq = scheme.generate(&q, &holders);

        for holder in &holders {
            let x = holder.as_scalar();
            let mine_p = scheme.extract(&cp, *holder)?;
            let mine_q = scheme.extract(&cq, *holder)?;
            assert!(scheme.verify(&Share::new(*holder, p.evaluate(&x)), &mine_p));
            assert!(!scheme.verify(&Share::new(*holder, q.evaluate(&x)), &mine_p));

            // Sums verify the sum of the evaluations.
            let sum = scheme.sum(&mine_p, &mine_q)?;
            let value = p.evaluate(&x) + q.evaluate(&x);
            assert!(scheme.verify(&Share::new(*holder, value), &sum));
            assert!(!scheme.verify(&Share::new(*holder, value + Scalar::ONE), &sum));
        }

        // Recover the commitment of shareholder 3 from the others.
        let target = holders[2];
        let others: BTreeMap<_, _> = [holders[0], holders[1], holders[3]]
            .iter()
            .map(|h| Ok((*h, scheme.extract(&cp, *h)?)))
            .collect::<Result<_>>()?;
        let recovered = scheme.recover(target, &others, 2)?;
        assert!(recovered.is_of_same_secret(&cp));
        let value = p.evaluate(&target.as_scalar());
        assert!(scheme.verify(&Share::new(target, value), &recovered));
        Ok(())
    }

    #[test]
    fn linear_scheme_operations() -> Result<()> {
        check_scheme(&LinearCommitmentScheme)
    }

    #[test]
    fn constant_scheme_operations() -> Result<()> {
        check_scheme(&ConstantCommitmentScheme)
    }

    #[test]
    fn recover_needs_agreement() -> Result<()> {
        let mut rng = OsRng;
        let holders = shareholders(4);
        for kind in [CommitmentKind::Linear, CommitmentKind::Constant] {
            let scheme = kind.scheme();
            let (a, b) = (random_scalar(&mut rng), random_scalar(&mut rng));
            let p = Polynomial::random(&mut rng, a, 1);
            let q = Polynomial::random(&mut rng, b, 1);
            let cp = scheme.generate(&p, &holders);
            let cq = scheme.generate(&q, &holders);
            let mut others = BTreeMap::new();
            let _ = others.insert(holders[0], scheme.extract(&cp, holders[0])?);
            let _ = others.insert(holders[1], scheme.extract(&cq, holders[1])?);
            let result = scheme.recover(holders[2], &others, 2);
            assert!(matches!(
                result,
                Err(InternalError::NotEnoughContributions { .. })
            ));
        }
        Ok(())
    }

    #[test]
    fn kinds_parse_from_configuration_names() {
        assert_eq!("linear".parse::<CommitmentKind>().ok(), Some(CommitmentKind::Linear));
        assert_eq!("constant".parse::<CommitmentKind>().ok(), Some(CommitmentKind::Constant));
        assert!("feldman".parse::<CommitmentKind>().is_err());
        assert_eq!(CommitmentKind::Constant.to_string(), "constant");
    }
}
