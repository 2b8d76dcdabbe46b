// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Polynomials over the scalar field of secp256k1.

use crate::{
    errors::{InternalError, Result},
    utils::{invert, random_scalar},
};
use k256::Scalar;
use rand::{CryptoRng, RngCore};

/// A polynomial `a_0 + a_1 x + ... + a_d x^d`.
///
/// Coefficients are secret material, so `Debug` only shows the degree.
#[derive(Clone, PartialEq, Eq)]
pub struct Polynomial {
    coefficients: Vec<Scalar>,
}

impl std::fmt::Debug for Polynomial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Polynomial")
            .field("degree", &self.degree())
            .finish_non_exhaustive()
    }
}

impl Polynomial {
    /// A random polynomial of the given degree with a fixed constant term.
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R, constant: Scalar, degree: usize) -> Self {
        let mut coefficients = Vec::with_capacity(degree + 1);
        coefficients.push(constant);
        coefficients.extend((0..degree).map(|_| random_scalar(rng)));
        Self { coefficients }
    }

    /// The unique polynomial of degree `< points.len()` passing through
    /// `points`. Fails if two points share an x-coordinate.
    pub fn fit(points: &[(Scalar, Scalar)]) -> Result<Self> {
        if points.is_empty() {
            return arg_err!("cannot fit a polynomial through no points");
        }
        let mut coefficients = vec![Scalar::ZERO; points.len()];
        for (i, (xi, yi)) in points.iter().enumerate() {
            let mut basis = vec![Scalar::ONE];
            let mut denominator = Scalar::ONE;
            for (j, (xj, _)) in points.iter().enumerate() {
                if i == j {
                    continue;
                }
                let mut next = vec![Scalar::ZERO; basis.len() + 1];
                for (k, b) in basis.iter().enumerate() {
                    next[k + 1] += *b;
                    next[k] -= *b * xj;
                }
                basis = next;
                denominator *= *xi - xj;
            }
            let scale = *yi * invert(&denominator)?;
            for (c, b) in coefficients.iter_mut().zip(basis.iter()) {
                *c += *b * scale;
            }
        }
        Ok(Self { coefficients })
    }

    /// Evaluate the polynomial at `x` (Horner's rule).
    pub fn evaluate(&self, x: &Scalar) -> Scalar {
        self.coefficients
            .iter()
            .rev()
            .fold(Scalar::ZERO, |acc, c| acc * x + c)
    }

    /// The constant term, `P(0)`.
    pub fn constant(&self) -> Result<Scalar> {
        self.coefficients
            .first()
            .copied()
            .ok_or(InternalError::InternalInvariantFailed)
    }

    /// Degree bound of the polynomial (the number of coefficients minus one).
    pub fn degree(&self) -> usize {
        self.coefficients.len().saturating_sub(1)
    }

    pub(crate) fn coefficients(&self) -> &[Scalar] {
        &self.coefficients
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn fit_recovers_random_polynomial() -> Result<()> {
        let mut rng = OsRng;
        let secret = random_scalar(&mut rng);
        let p = Polynomial::random(&mut rng, secret, 3);
        let points: Vec<_> = (1..=4u64)
            .map(|x| {
                let x = Scalar::from(x * 7);
                (x, p.evaluate(&x))
            })
            .collect();
        let q = Polynomial::fit(&points)?;
        assert_eq!(p, q);
        assert_eq!(q.constant()?, secret);
        Ok(())
    }

    #[test]
    fn fit_rejects_repeated_coordinates() {
        let points = vec![(Scalar::ONE, Scalar::ONE), (Scalar::ONE, Scalar::ZERO)];
        assert!(Polynomial::fit(&points).is_err());
        assert!(Polynomial::fit(&[]).is_err());
    }
}
