// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use crate::{
    errors::{InternalError, Result},
    parameters::DPRF_PLACEHOLDER_SEED,
    polynomial::Polynomial,
    protocol::ShareholderId,
    utils::{random_scalar, CurvePoint},
};
use k256::Scalar;
use rand::{rngs::StdRng, CryptoRng, RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// How the DPRF master secret and its shares come into existence.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DprfSetup {
    /// Sample the master secret from the supplied random number generator.
    Random,
    /// Derive everything from a public seed.
    ///
    /// Anybody knowing the seed, clients included, can recompute every
    /// shareholder's private parameters. This stands in for a distributed key
    /// generation and must not be used where the DPRF key is meant to stay
    /// secret.
    Deterministic {
        /// Seed of the generator.
        seed: [u8; 32],
    },
}

impl Default for DprfSetup {
    fn default() -> Self {
        DprfSetup::Deterministic {
            seed: DPRF_PLACEHOLDER_SEED,
        }
    }
}

/// Public verification material of the threshold PRF.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DprfPublicParameters {
    pub(crate) threshold: usize,
    pub(crate) master_commitment: CurvePoint,
    pub(crate) share_commitments: BTreeMap<ShareholderId, CurvePoint>,
}

impl DprfPublicParameters {
    /// Number of corrupted shareholders tolerated; `threshold + 1`
    /// contributions evaluate the function.
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// `g^{α_i}` for `shareholder`.
    pub fn share_commitment_of(&self, shareholder: ShareholderId) -> Option<&CurvePoint> {
        self.share_commitments.get(&shareholder)
    }

    /// `g^α`.
    pub fn master_commitment(&self) -> &CurvePoint {
        &self.master_commitment
    }
}

/// A shareholder's share `α_i` of the master secret.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DprfPrivateParameters {
    pub(crate) shareholder: ShareholderId,
    pub(crate) alpha_share: Scalar,
}

impl std::fmt::Debug for DprfPrivateParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DprfPrivateParameters")
            .field("shareholder", &self.shareholder)
            .field("alpha_share", &"[redacted]")
            .finish()
    }
}

impl DprfPrivateParameters {
    /// The owner of these parameters.
    pub fn shareholder(&self) -> ShareholderId {
        self.shareholder
    }
}

/// Output of the DPRF setup: the public parameters plus every private
/// parameter that was produced.
#[derive(Clone, Debug)]
pub struct DprfParameters {
    public: DprfPublicParameters,
    private: BTreeMap<ShareholderId, DprfPrivateParameters>,
}

impl DprfParameters {
    /// Build a degree-`threshold` polynomial whose constant term is the master
    /// secret, and hand out its evaluations to `shareholders`.
    pub fn init<R: RngCore + CryptoRng>(
        rng: &mut R,
        threshold: usize,
        shareholders: &[ShareholderId],
    ) -> Result<Self> {
        if shareholders.len() <= threshold {
            return Err(InternalError::InvalidArgument(format!(
                "{} shareholders cannot evaluate a DPRF of threshold {}",
                shareholders.len(),
                threshold
            )));
        }
        let alpha = random_scalar(rng);
        let polynomial = Polynomial::random(rng, alpha, threshold);
        let private: BTreeMap<_, _> = shareholders
            .iter()
            .map(|s| {
                (
                    *s,
                    DprfPrivateParameters {
                        shareholder: *s,
                        alpha_share: polynomial.evaluate(&s.as_scalar()),
                    },
                )
            })
            .collect();
        let share_commitments = private
            .iter()
            .map(|(s, p)| (*s, CurvePoint::commit(&p.alpha_share)))
            .collect();
        info!(
            "Initialized DPRF parameters for {} shareholders with threshold {}",
            shareholders.len(),
            threshold
        );
        Ok(Self {
            public: DprfPublicParameters {
                threshold,
                master_commitment: CurvePoint::commit(&alpha),
                share_commitments,
            },
            private,
        })
    }

    /// Run the given setup.
    pub fn from_setup(
        setup: &DprfSetup,
        threshold: usize,
        shareholders: &[ShareholderId],
    ) -> Result<Self> {
        match setup {
            DprfSetup::Random => Self::init(&mut rand::rngs::OsRng, threshold, shareholders),
            DprfSetup::Deterministic { seed } => {
                warn!("Using the deterministic DPRF setup; the DPRF key is public");
                Self::init(&mut StdRng::from_seed(*seed), threshold, shareholders)
            }
        }
    }

    /// The public parameters.
    pub fn public(&self) -> &DprfPublicParameters {
        &self.public
    }

    /// Private parameters of `shareholder`.
    pub fn private_of(&self, shareholder: ShareholderId) -> Result<&DprfPrivateParameters> {
        self.private.get(&shareholder).ok_or_else(|| {
            InternalError::InvalidArgument(format!("no DPRF parameters for {shareholder}"))
        })
    }

    /// Keep only the private parameters of `shareholder`.
    pub fn restrict_to(mut self, shareholder: ShareholderId) -> Self {
        self.private.retain(|s, _| *s == shareholder);
        self
    }
}
