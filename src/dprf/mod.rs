// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! A (t, n)-threshold verifiable pseudo-random function.
//!
//! The evaluation key `α` is shared with a degree-`t` polynomial; shareholder
//! `i` holds `α_i` and everybody knows `g^{α_i}`. The function maps the pair
//! `(r, x)` to `Hash(H(r || x)^α)`, where `H` hashes onto the curve. Each
//! shareholder contributes `H(r || x)^{α_i}` along with a proof of discrete-log
//! equality, and any `t + 1` verified contributions combine to the output
//! through Lagrange interpolation in the exponent. The output does not depend
//! on which contributions are used.

mod contribution;
mod parameters;

pub use contribution::DprfContribution;
pub use parameters::{DprfParameters, DprfPrivateParameters, DprfPublicParameters, DprfSetup};

use crate::{
    errors::{InternalError, Result},
    parameters::{DPRF_INPUT_DST, DPRF_OUTPUT_DST},
    protocol::ShareholderId,
    utils::{hash_to_curve, hash_to_scalar, interpolate_points_at, random_scalar, CurvePoint},
};
use contribution::DleqProof;
use k256::Scalar;
use rand::{CryptoRng, RngCore};
use tracing::{instrument, warn};

/// The DPRF engine. It is stateless; the parameters are passed in.
#[derive(Debug, Clone, Copy, Default)]
pub struct Dprf;

impl Dprf {
    /// The curve point the function is evaluated on for `(r, shareholder)`.
    pub fn input_point(r: &Scalar, shareholder: ShareholderId) -> Result<CurvePoint> {
        hash_to_curve(
            DPRF_INPUT_DST,
            &[r.to_bytes().as_slice(), shareholder.to_bytes().as_slice()],
        )
    }

    /// Compute this shareholder's partial evaluation for `for_shareholder`
    /// under the blinding value `r`.
    pub fn contribute<R: RngCore + CryptoRng>(
        rng: &mut R,
        private: &DprfPrivateParameters,
        r: &Scalar,
        for_shareholder: ShareholderId,
    ) -> Result<DprfContribution> {
        let input = Self::input_point(r, for_shareholder)?;
        let partial = input.multiply_by_scalar(&private.alpha_share);
        let proof = DleqProof::prove(rng, &input, &partial, private);
        Ok(DprfContribution {
            of_shareholder: private.shareholder,
            for_shareholder,
            partial,
            proof,
        })
    }

    /// Check the proof of a contribution produced under the blinding value
    /// `r`.
    pub fn verify(
        public: &DprfPublicParameters,
        r: &Scalar,
        contribution: &DprfContribution,
    ) -> Result<()> {
        let input = Self::input_point(r, contribution.for_shareholder)?;
        contribution.verify_against(&input, public)
    }

    /// Combine contributions into the pseudo-random value for `(r, x)`.
    ///
    /// Contributions authored by `own` are trusted and not verified. Invalid
    /// contributions, duplicates and contributions for another point are
    /// skipped. Fails if fewer than `threshold + 1` remain.
    #[instrument(skip_all, err(Debug))]
    pub fn evaluate(
        public: &DprfPublicParameters,
        r: &Scalar,
        x: ShareholderId,
        contributions: &[DprfContribution],
        own: Option<ShareholderId>,
    ) -> Result<Scalar> {
        let input = Self::input_point(r, x)?;
        let needed = public.threshold + 1;

        let mut sorted: Vec<&DprfContribution> = contributions.iter().collect();
        sorted.sort_by_key(|c| c.of_shareholder);
        sorted.dedup_by_key(|c| c.of_shareholder);

        let mut valid = Vec::with_capacity(needed);
        for contribution in sorted {
            if contribution.for_shareholder != x {
                warn!(
                    "DPRF contribution of {} targets {} instead of {}",
                    contribution.of_shareholder, contribution.for_shareholder, x
                );
                continue;
            }
            if Some(contribution.of_shareholder) != own {
                if let Err(e) = contribution.verify_against(&input, public) {
                    warn!(
                        "Invalid DPRF contribution from {}: {:?}",
                        contribution.of_shareholder, e
                    );
                    continue;
                }
            }
            valid.push((
                contribution.of_shareholder.as_scalar(),
                contribution.partial,
            ));
            if valid.len() == needed {
                break;
            }
        }
        Self::combine(public, &valid)
    }

    /// Combine partial evaluations whose proofs were already checked.
    pub(crate) fn combine_verified(
        public: &DprfPublicParameters,
        contributions: &[&DprfContribution],
    ) -> Result<Scalar> {
        let partials: Vec<_> = contributions
            .iter()
            .take(public.threshold + 1)
            .map(|c| (c.of_shareholder.as_scalar(), c.partial))
            .collect();
        Self::combine(public, &partials)
    }

    fn combine(public: &DprfPublicParameters, partials: &[(Scalar, CurvePoint)]) -> Result<Scalar> {
        let needed = public.threshold + 1;
        if partials.len() < needed {
            return Err(InternalError::NotEnoughContributions {
                needed,
                got: partials.len(),
            });
        }
        let combined = interpolate_points_at(partials, &Scalar::ZERO)?;
        hash_to_scalar(DPRF_OUTPUT_DST, &[combined.to_bytes().as_slice()])
    }

    /// Draw a non-zero field element.
    pub fn random_number<R: RngCore + CryptoRng>(rng: &mut R) -> Scalar {
        random_scalar(rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn setup(n: u32, t: usize) -> Result<(Vec<ShareholderId>, DprfParameters)> {
        let shareholders: Vec<_> = (0..n).map(ShareholderId::from_process).collect();
        let params = DprfParameters::init(&mut OsRng, t, &shareholders)?;
        Ok((shareholders, params))
    }

    fn contributions(
        params: &DprfParameters,
        from: &[ShareholderId],
        r: &Scalar,
        x: ShareholderId,
    ) -> Result<Vec<DprfContribution>> {
        from.iter()
            .map(|s| Dprf::contribute(&mut OsRng, params.private_of(*s)?, r, x))
            .collect()
    }

    #[test]
    fn any_quorum_evaluates_to_the_same_value() -> Result<()> {
        let (holders, params) = setup(4, 1)?;
        let r = Dprf::random_number(&mut OsRng);
        let x = holders[2];

        let a = Dprf::evaluate(
            params.public(),
            &r,
            x,
            &contributions(&params, &holders[0..2], &r, x)?,
            None,
        )?;
        let b = Dprf::evaluate(
            params.public(),
            &r,
            x,
            &contributions(&params, &[holders[1], holders[3]], &r, x)?,
            None,
        )?;
        let all = Dprf::evaluate(
            params.public(),
            &r,
            x,
            &contributions(&params, &holders, &r, x)?,
            Some(holders[0]),
        )?;
        assert_eq!(a, b);
        assert_eq!(a, all);

        // Another blinding value gives another output.
        let r2 = Dprf::random_number(&mut OsRng);
        let c = Dprf::evaluate(
            params.public(),
            &r2,
            x,
            &contributions(&params, &holders[0..2], &r2, x)?,
            None,
        )?;
        assert_ne!(a, c);
        Ok(())
    }

    #[test]
    fn forged_contributions_are_skipped() -> Result<()> {
        let (holders, params) = setup(4, 1)?;
        let r = Dprf::random_number(&mut OsRng);
        let x = holders[0];
        let mut contribs = contributions(&params, &holders[1..4], &r, x)?;
        let expected = Dprf::evaluate(params.public(), &r, x, &contribs, None)?;

        // A well-formed but false partial value fails its proof.
        contribs[0].partial = contribs[0].partial + CurvePoint::GENERATOR;
        assert!(Dprf::verify(params.public(), &r, &contribs[0]).is_err());
        assert_eq!(
            Dprf::evaluate(params.public(), &r, x, &contribs, None)?,
            expected
        );

        // With two forgeries only one valid contribution remains.
        contribs[1].partial = contribs[1].partial + CurvePoint::GENERATOR;
        assert_eq!(
            Dprf::evaluate(params.public(), &r, x, &contribs, None),
            Err(InternalError::NotEnoughContributions { needed: 2, got: 1 })
        );
        Ok(())
    }

    #[test]
    fn contributions_are_bound_to_r() -> Result<()> {
        let (holders, params) = setup(4, 1)?;
        let r = Dprf::random_number(&mut OsRng);
        let other_r = Dprf::random_number(&mut OsRng);
        let contribution = Dprf::contribute(&mut OsRng, params.private_of(holders[1])?, &r, holders[0])?;
        assert!(Dprf::verify(params.public(), &r, &contribution).is_ok());
        assert!(Dprf::verify(params.public(), &other_r, &contribution).is_err());
        Ok(())
    }

    #[test]
    fn deterministic_setup_is_reproducible() -> Result<()> {
        let holders: Vec<_> = (0..4).map(ShareholderId::from_process).collect();
        let a = DprfParameters::from_setup(&DprfSetup::default(), 1, &holders)?;
        let b = DprfParameters::from_setup(&DprfSetup::default(), 1, &holders)?;
        assert_eq!(a.public(), b.public());
        let random = DprfParameters::from_setup(&DprfSetup::Random, 1, &holders)?;
        assert_ne!(a.public(), random.public());
        Ok(())
    }
}
