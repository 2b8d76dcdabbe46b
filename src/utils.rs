// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use crate::errors::{InternalError, Result};
use k256::{
    elliptic_curve::{
        group::GroupEncoding,
        hash2curve::{hash_to_field, ExpandMsgXmd, GroupDigest},
        ops::Reduce,
        Field, PrimeField,
    },
    AffinePoint, FieldBytes, ProjectivePoint, Scalar, Secp256k1, U256,
};
use merlin::Transcript;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// Wrapper around k256::ProjectivePoint so that we can define our own
/// serialization/deserialization for it
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub struct CurvePoint(pub k256::ProjectivePoint);

impl CurvePoint {
    /// The generator `g` of secp256k1.
    pub const GENERATOR: Self = CurvePoint(ProjectivePoint::GENERATOR);
    /// The identity point, used to initialize sums of points.
    pub const IDENTITY: Self = CurvePoint(ProjectivePoint::IDENTITY);

    /// `g^s`, in multiplicative notation.
    pub fn commit(s: &Scalar) -> Self {
        Self(ProjectivePoint::GENERATOR * s)
    }

    pub(crate) fn multiply_by_scalar(&self, s: &Scalar) -> Self {
        Self(self.0 * s)
    }

    /// Compressed SEC1 encoding of the point.
    pub fn to_bytes(self) -> Vec<u8> {
        self.0.to_affine().to_bytes().to_vec()
    }
}

impl std::ops::Add for CurvePoint {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl std::ops::Sub for CurvePoint {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl std::iter::Sum for CurvePoint {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(CurvePoint::IDENTITY, |acc, p| acc + p)
    }
}

impl From<k256::ProjectivePoint> for CurvePoint {
    fn from(p: k256::ProjectivePoint) -> Self {
        Self(p)
    }
}

impl Serialize for CurvePoint {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let afp = AffinePoint::from(self.0);
        afp.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CurvePoint {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let p = AffinePoint::deserialize(deserializer)?;
        Ok(Self(p.into()))
    }
}

/// Sample a non-zero scalar.
pub(crate) fn random_scalar<R: RngCore + CryptoRng>(rng: &mut R) -> Scalar {
    loop {
        let s = Scalar::random(&mut *rng);
        if s != Scalar::ZERO {
            return s;
        }
    }
}

/// Canonical big-endian encoding of a scalar.
pub(crate) fn scalar_to_bytes(s: &Scalar) -> Vec<u8> {
    s.to_bytes().to_vec()
}

/// Parse a canonical big-endian scalar, rejecting values `>= q`.
pub(crate) fn scalar_from_bytes(bytes: &[u8]) -> Result<Scalar> {
    if bytes.len() != 32 {
        return Err(InternalError::Serialization);
    }
    let repr = FieldBytes::clone_from_slice(bytes);
    Option::<Scalar>::from(Scalar::from_repr(repr)).ok_or(InternalError::Serialization)
}

pub(crate) fn invert(s: &Scalar) -> Result<Scalar> {
    Option::<Scalar>::from(s.invert()).ok_or(InternalError::CouldNotInvertScalar)
}

/// SHA-256 over the concatenation of `parts`.
pub(crate) fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Hash arbitrary bytes to a scalar with `expand_message_xmd` (RFC 9380).
pub(crate) fn hash_to_scalar(domain: &[u8], parts: &[&[u8]]) -> Result<Scalar> {
    let mut u = [Scalar::ZERO];
    hash_to_field::<ExpandMsgXmd<Sha256>, Scalar>(parts, &[domain], &mut u)
        .map_err(|_| InternalError::HashToCurve)?;
    Ok(u[0])
}

/// Hash arbitrary bytes to a point of secp256k1 (RFC 9380, `hash_to_curve`).
pub(crate) fn hash_to_curve(domain: &[u8], parts: &[&[u8]]) -> Result<CurvePoint> {
    let point = Secp256k1::hash_from_bytes::<ExpandMsgXmd<Sha256>>(parts, &[domain])
        .map_err(|_| InternalError::HashToCurve)?;
    Ok(CurvePoint(point))
}

/// Draw a Fiat-Shamir challenge from a transcript.
pub(crate) fn scalar_from_transcript(transcript: &mut Transcript, label: &'static [u8]) -> Scalar {
    let mut bytes = [0u8; 32];
    transcript.challenge_bytes(label, &mut bytes);
    <Scalar as Reduce<U256>>::reduce_bytes(&FieldBytes::from(bytes))
}

/// The Lagrange coefficient of `xs[index]` when interpolating at `at`.
pub(crate) fn lagrange_coefficient(xs: &[Scalar], index: usize, at: &Scalar) -> Result<Scalar> {
    let xi = xs.get(index).ok_or(InternalError::InternalInvariantFailed)?;
    let mut numerator = Scalar::ONE;
    let mut denominator = Scalar::ONE;
    for (j, xj) in xs.iter().enumerate() {
        if j == index {
            continue;
        }
        numerator *= *at - xj;
        denominator *= *xi - xj;
    }
    Ok(numerator * invert(&denominator)?)
}

/// Evaluate at `at` the unique polynomial of lowest degree passing through
/// `points`.
pub(crate) fn interpolate_at(points: &[(Scalar, Scalar)], at: &Scalar) -> Result<Scalar> {
    let xs: Vec<Scalar> = points.iter().map(|(x, _)| *x).collect();
    let mut acc = Scalar::ZERO;
    for (i, (_, y)) in points.iter().enumerate() {
        acc += *y * lagrange_coefficient(&xs, i, at)?;
    }
    Ok(acc)
}

/// Interpolation "in the exponent": given `g^{P(x_i)}`, compute `g^{P(at)}`.
pub(crate) fn interpolate_points_at(
    points: &[(Scalar, CurvePoint)],
    at: &Scalar,
) -> Result<CurvePoint> {
    let xs: Vec<Scalar> = points.iter().map(|(x, _)| *x).collect();
    let mut acc = CurvePoint::IDENTITY;
    for (i, (_, p)) in points.iter().enumerate() {
        acc = acc + p.multiply_by_scalar(&lagrange_coefficient(&xs, i, at)?);
    }
    Ok(acc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn curve_point_serialization_roundtrip() -> Result<()> {
        let mut rng = OsRng;
        let p = CurvePoint::commit(&random_scalar(&mut rng));
        let bytes = serialize!(&p)?;
        let q: CurvePoint = deserialize!(&bytes)?;
        assert_eq!(p, q);
        Ok(())
    }

    #[test]
    fn scalar_bytes_reject_non_canonical() {
        assert!(scalar_from_bytes(&[0xff; 32]).is_err());
        assert!(scalar_from_bytes(&[1u8; 31]).is_err());
        let s = Scalar::from(1024u64);
        assert_eq!(scalar_from_bytes(&scalar_to_bytes(&s)).ok(), Some(s));
    }

    #[test]
    fn interpolation_in_field_and_exponent_agree() -> Result<()> {
        let mut rng = OsRng;
        // P(x) = a + b x
        let a = random_scalar(&mut rng);
        let b = random_scalar(&mut rng);
        let eval = |x: u64| a + b * Scalar::from(x);
        let points = vec![(Scalar::from(2u64), eval(2)), (Scalar::from(5u64), eval(5))];
        assert_eq!(interpolate_at(&points, &Scalar::ZERO)?, a);
        assert_eq!(interpolate_at(&points, &Scalar::from(3u64))?, eval(3));

        let exponent: Vec<_> = points
            .iter()
            .map(|(x, y)| (*x, CurvePoint::commit(y)))
            .collect();
        assert_eq!(
            interpolate_points_at(&exponent, &Scalar::from(3u64))?,
            CurvePoint::commit(&eval(3))
        );
        Ok(())
    }

    #[test]
    fn duplicate_coordinates_fail_to_interpolate() {
        let points = vec![
            (Scalar::from(2u64), Scalar::ONE),
            (Scalar::from(2u64), Scalar::ONE),
        ];
        assert_eq!(
            interpolate_at(&points, &Scalar::ZERO),
            Err(InternalError::CouldNotInvertScalar)
        );
    }

    #[test]
    fn hash_to_curve_is_deterministic() -> Result<()> {
        let p = hash_to_curve(b"test", &[b"abc"])?;
        let q = hash_to_curve(b"test", &[b"abc"])?;
        let other = hash_to_curve(b"test", &[b"abd"])?;
        assert_eq!(p, q);
        assert_ne!(p, other);
        Ok(())
    }
}
