// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use super::{
    recovery::{RecoveryContribution, RecoveryOutcome},
    VerifiableShare, VssrPublishedShares, VssrScheme, VssrShare,
};
use crate::{
    commitment::Share,
    dprf::{Dprf, DprfContribution},
    errors::{InternalError, Result},
    protocol::{ProcessId, ShareholderId},
    utils::{interpolate_at, sha256},
};
use k256::Scalar;
use rand::{CryptoRng, RngCore};
use std::{collections::BTreeMap, ops::Deref};
use tracing::{error, instrument, warn};

/// The replica side: extracts and verifies shares, contributes to the
/// recovery of other replicas and recovers its own shares.
#[derive(Debug, Clone)]
pub struct ServerScheme {
    base: VssrScheme,
    me: ShareholderId,
}

impl Deref for ServerScheme {
    type Target = VssrScheme;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

/// Contributions agree when these fields match.
fn agreement_key(contribution: &RecoveryContribution) -> [u8; 32] {
    let shared_data = contribution.shared_data.as_deref().unwrap_or_default();
    sha256(&[
        contribution.r.to_bytes().as_slice(),
        &[u8::from(contribution.shared_data.is_some())],
        sha256(&[shared_data]).as_slice(),
        contribution.share_commitment.consistent_hash().as_slice(),
        contribution.recovering_commitment.consistent_hash().as_slice(),
    ])
}

impl ServerScheme {
    /// Build the server side for `process`.
    pub fn new(base: VssrScheme, process: ProcessId) -> Result<Self> {
        let me = base.shareholder(process)?;
        let _ = base.dprf().private_of(me)?;
        Ok(Self { base, me })
    }

    /// This replica's shareholder id.
    pub fn me(&self) -> ShareholderId {
        self.me
    }

    /// Decrypt the shares `published` holds for this replica. `client` is
    /// the process that encrypted them.
    #[instrument(skip_all, err(Debug))]
    pub fn extract_share(
        &self,
        client: ProcessId,
        published: &VssrPublishedShares,
    ) -> Result<VssrShare> {
        let encrypted = published
            .share_of(self.me)
            .ok_or_else(|| InternalError::InvalidArgument(format!("no share for {}", self.me)))?;
        let expected = self.view().blocks() + 1;
        if published.commitments.len() != expected {
            return arg_err!(format!(
                "expected {expected} polynomials, got {}",
                published.commitments.len()
            ));
        }
        if encrypted.len() != published.commitments.len() {
            return arg_err!("published shares and commitments do not line up");
        }
        let scheme = self.commitment_scheme();
        let mut shares = Vec::with_capacity(encrypted.len());
        for (index, (encrypted, commitment)) in
            encrypted.iter().zip(&published.commitments).enumerate()
        {
            let value = self.decrypt_share(client, &encrypted.encrypted)?;
            let shared_data = (index == 0).then(|| published.shared_data.clone());
            shares.push(Some(VerifiableShare::new(
                Share::new(self.me, value),
                scheme.extract(commitment, self.me)?,
                shared_data,
            )));
        }
        Ok(VssrShare::new(published.r, shares))
    }

    /// Check every present share against its commitment.
    pub fn verify(&self, share: &VssrShare) -> bool {
        let scheme = self.commitment_scheme();
        share.shares.iter().flatten().all(|s| {
            let valid = scheme.verify(&s.share, &s.commitment);
            if !valid {
                warn!("Share of {} does not match its commitment", s.share.shareholder);
            }
            valid
        })
    }

    /// This replica's contribution towards recovering `recovering`'s share
    /// of the same secret.
    pub fn recovery_contribution<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
        share: &VssrShare,
        recovering: ShareholderId,
    ) -> Result<RecoveryContribution> {
        let block = self.view().block_of(recovering)?;
        let main = share.main()?;
        let witness = share.share_at(block).ok_or_else(|| {
            InternalError::InvalidArgument(format!(
                "share has no witness for block {block}; recovered shares cannot contribute"
            ))
        })?;
        let private = self.dprf().private_of(self.me)?;
        let dprf = Dprf::contribute(rng, private, &share.r, recovering)?;
        Ok(RecoveryContribution {
            r: share.r,
            shareholder: self.me,
            dprf,
            blinded_sum: main.share.value + witness.share.value,
            share_commitment: main.commitment.clone(),
            recovering_commitment: witness.commitment.clone(),
            shared_data: main.shared_data.clone(),
        })
    }

    /// Recover this replica's main share from peers' contributions.
    pub fn recover_share(&self, contributions: &[RecoveryContribution]) -> Result<VssrShare> {
        self.recover_share_detailed(contributions).map(|o| o.share)
    }

    /// Like [`ServerScheme::recover_share`], also reporting which
    /// contributors were excluded.
    #[instrument(skip_all, err(Debug))]
    pub fn recover_share_detailed(
        &self,
        contributions: &[RecoveryContribution],
    ) -> Result<RecoveryOutcome> {
        let needed = self.view().agreement();
        let scheme = self.commitment_scheme();
        let public = self.dprf().public();

        let mut unique: BTreeMap<ShareholderId, &RecoveryContribution> = BTreeMap::new();
        for contribution in contributions {
            if contribution.shareholder == self.me {
                warn!("Ignoring a recovery contribution claiming to come from myself");
                continue;
            }
            let _ = unique.entry(contribution.shareholder).or_insert(contribution);
        }

        // Agreement on r, the payload and the commitments comes first.
        let mut groups: BTreeMap<[u8; 32], Vec<&RecoveryContribution>> = BTreeMap::new();
        for contribution in unique.values().copied() {
            groups
                .entry(agreement_key(contribution))
                .or_default()
                .push(contribution);
        }
        let (key, agreeing) = groups
            .iter()
            .max_by_key(|(_, members)| members.len())
            .filter(|(_, members)| members.len() >= needed)
            .ok_or_else(|| {
                warn!("No {} recovery contributions agree with each other", needed);
                InternalError::NotEnoughContributions {
                    needed,
                    got: groups.values().map(Vec::len).max().unwrap_or(0),
                }
            })?;
        let mut excluded: Vec<ShareholderId> = groups
            .iter()
            .filter(|(k, _)| *k != key)
            .flat_map(|(_, members)| members.iter().map(|c| c.shareholder))
            .collect();
        for shareholder in &excluded {
            warn!(
                "Excluding recovery contribution of {}: disagrees with the majority",
                shareholder
            );
        }

        let mut valid: Vec<&RecoveryContribution> = Vec::with_capacity(agreeing.len());
        for contribution in agreeing.iter().copied() {
            let blinded = Share::new(contribution.shareholder, contribution.blinded_sum);
            let sum_is_valid = scheme
                .sum(
                    &contribution.share_commitment,
                    &contribution.recovering_commitment,
                )
                .map(|sum| scheme.verify(&blinded, &sum))
                .unwrap_or(false);
            if !sum_is_valid {
                warn!(
                    "Excluding recovery contribution of {}: blinded sum fails its commitment",
                    contribution.shareholder
                );
                excluded.push(contribution.shareholder);
                continue;
            }
            if let Err(e) =
                self.check_dprf(&contribution.r, &contribution.dprf, contribution.shareholder)
            {
                warn!(
                    "Excluding recovery contribution of {}: {:?}",
                    contribution.shareholder, e
                );
                excluded.push(contribution.shareholder);
                continue;
            }
            valid.push(contribution);
        }
        if valid.len() < needed {
            return Err(InternalError::NotEnoughContributions {
                needed,
                got: valid.len(),
            });
        }
        valid.truncate(needed);
        let reference = valid.first().ok_or(InternalError::InternalInvariantFailed)?;

        let commitments: BTreeMap<_, _> = valid
            .iter()
            .map(|c| (c.shareholder, c.share_commitment.clone()))
            .collect();
        let commitment = scheme.recover(self.me, &commitments, needed)?;

        let points: Vec<_> = valid
            .iter()
            .map(|c| (c.shareholder.as_scalar(), c.blinded_sum))
            .collect();
        let blinded = interpolate_at(&points, &self.me.as_scalar())?;
        let dprf: Vec<&DprfContribution> = valid.iter().map(|c| &c.dprf).collect();
        let mask = Dprf::combine_verified(public, &dprf)?;
        let recovered = Share::new(self.me, blinded - mask);

        if !scheme.verify(&recovered, &commitment) {
            error!(
                "Recovered share of {} fails its commitment; contributors {:?}",
                self.me,
                valid.iter().map(|c| c.shareholder).collect::<Vec<_>>()
            );
            return Err(InternalError::FatalRecovery(format!(
                "recovered share of {} does not match the recovered commitment",
                self.me
            )));
        }

        let mut shares = vec![None; self.view().blocks() + 1];
        shares[0] = Some(VerifiableShare::new(
            recovered,
            commitment,
            reference.shared_data.clone(),
        ));
        excluded.sort();
        Ok(RecoveryOutcome {
            share: VssrShare::new(reference.r, shares),
            excluded,
        })
    }

    fn check_dprf(
        &self,
        r: &Scalar,
        contribution: &DprfContribution,
        author: ShareholderId,
    ) -> Result<()> {
        if contribution.of_shareholder() != author {
            return verify_err!("DPRF contribution authored by somebody else");
        }
        if contribution.for_shareholder() != self.me {
            return verify_err!("DPRF contribution for another shareholder");
        }
        Dprf::verify(self.dprf().public(), r, contribution)
    }
}
