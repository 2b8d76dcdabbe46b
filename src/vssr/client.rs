// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use super::{EncryptedShare, OpenPublishedShares, VssrPublishedShares, VssrScheme};
use crate::{
    cipher::{self, SymmetricKey},
    commitment::Share,
    dprf::Dprf,
    errors::{InternalError, Result},
    polynomial::Polynomial,
    protocol::ShareholderId,
    utils::{interpolate_at, random_scalar, scalar_to_bytes},
};
use k256::Scalar;
use rand::{CryptoRng, RngCore};
use std::ops::Deref;
use tracing::{debug, instrument, warn};

/// The client side: shares secrets and combines the shares servers return.
#[derive(Debug, Clone)]
pub struct ClientScheme {
    base: VssrScheme,
}

impl Deref for ClientScheme {
    type Target = VssrScheme;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

/// The key protecting a payload, derived from the shared scalar.
fn payload_key(secret: &Scalar) -> SymmetricKey {
    SymmetricKey::derive(&scalar_to_bytes(secret))
}

impl ClientScheme {
    /// Wrap a base scheme. The DPRF parameters must include every
    /// shareholder's private part.
    pub fn new(base: VssrScheme) -> Self {
        Self { base }
    }

    /// Share `secret` among the view.
    #[instrument(skip_all, err(Debug))]
    pub fn share<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
        secret: &[u8],
    ) -> Result<VssrPublishedShares> {
        let view = self.view();
        let f = view.f();
        let shareholders = view.shareholders();
        let scheme = self.commitment_scheme();
        let public = self.dprf().public();
        let r = Dprf::random_number(rng);

        // y_i = DPRF(r, i), evaluated locally from every shareholder's part.
        let mut masks = Vec::with_capacity(shareholders.len());
        for target in &shareholders {
            let contributions = shareholders
                .iter()
                .map(|s| Dprf::contribute(rng, self.dprf().private_of(*s)?, &r, *target))
                .collect::<Result<Vec<_>>>()?;
            masks.push(Dprf::evaluate(public, &r, *target, &contributions, None)?);
        }

        let blocks = view.blocks();
        let mut polynomials = Vec::with_capacity(blocks + 1);
        let main_secret = random_scalar(rng);
        polynomials.push(Polynomial::random(rng, main_secret, f));
        for block in 0..blocks {
            let mut points: Vec<(Scalar, Scalar)> = shareholders
                .iter()
                .zip(&masks)
                .skip(block * f)
                .take(f)
                .map(|(s, y)| (s.as_scalar(), *y))
                .collect();
            while points.len() <= f {
                points.push((random_scalar(rng), random_scalar(rng)));
            }
            polynomials.push(Polynomial::fit(&points)?);
        }

        let mut shares = Vec::with_capacity(polynomials.len());
        let mut commitments = Vec::with_capacity(polynomials.len());
        for polynomial in &polynomials {
            commitments.push(scheme.generate(polynomial, &shareholders));
            let row = shareholders
                .iter()
                .map(|s| {
                    Ok(EncryptedShare {
                        shareholder: *s,
                        encrypted: self.encrypt_share_for(
                            rng,
                            s.process(),
                            &polynomial.evaluate(&s.as_scalar()),
                        )?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            shares.push(row);
        }

        let shared_data = cipher::encrypt(
            rng,
            self.data_cipher(),
            &payload_key(&main_secret),
            secret,
        )?;
        debug!(
            "Shared a {} byte secret over {} polynomials",
            secret.len(),
            polynomials.len()
        );
        Ok(VssrPublishedShares {
            r,
            shares,
            commitments,
            shared_data,
        })
    }

    /// Reconstruct a secret from opened main shares.
    ///
    /// Shares failing their commitment are skipped; `f + 1` valid shares
    /// from distinct shareholders are needed.
    #[instrument(skip_all, err(Debug))]
    pub fn combine(&self, shares: &OpenPublishedShares) -> Result<Vec<u8>> {
        let needed = self.view().agreement();
        let scheme = self.commitment_scheme();
        let mut seen: Vec<ShareholderId> = Vec::with_capacity(needed);
        let mut points = Vec::with_capacity(needed);
        for (share, commitment) in &shares.shares {
            if seen.contains(&share.shareholder) {
                continue;
            }
            if !scheme.verify(share, commitment) {
                warn!("Ignoring invalid share of {}", share.shareholder);
                continue;
            }
            seen.push(share.shareholder);
            points.push((share.shareholder.as_scalar(), share.value));
            if points.len() == needed {
                break;
            }
        }
        if points.len() < needed {
            return Err(InternalError::NotEnoughContributions {
                needed,
                got: points.len(),
            });
        }
        let main_secret = interpolate_at(&points, &Scalar::ZERO)?;
        cipher::decrypt(
            self.data_cipher(),
            &payload_key(&main_secret),
            &shares.shared_data,
        )
    }

    /// Open the main shares of `published` as the given shareholders would.
    /// Only usable by a party holding every shareholder's key, such as a
    /// test harness.
    pub fn open(
        &self,
        published: &VssrPublishedShares,
        shareholders: &[ShareholderId],
    ) -> Result<OpenPublishedShares> {
        let scheme = self.commitment_scheme();
        let commitment = published
            .commitments
            .first()
            .ok_or(InternalError::InternalInvariantFailed)?;
        let row = published
            .shares
            .first()
            .ok_or(InternalError::InternalInvariantFailed)?;
        let shares = shareholders
            .iter()
            .map(|s| {
                let encrypted = row
                    .iter()
                    .find(|e| e.shareholder == *s)
                    .ok_or_else(|| InternalError::InvalidArgument(format!("no share for {s}")))?;
                let value = self.decrypt_share(s.process(), &encrypted.encrypted)?;
                Ok((Share::new(*s, value), scheme.extract(commitment, *s)?))
            })
            .collect::<Result<_>>()?;
        Ok(OpenPublishedShares::new(shares, published.shared_data.clone()))
    }
}
