// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Contributions to the recovery of one shareholder's share, and the round
//! collecting them.

use super::{ServerScheme, VssrShare};
use crate::{
    commitment::Commitment,
    dprf::DprfContribution,
    errors::{InternalError, Result},
    protocol::ShareholderId,
};
use displaydoc::Display;
use k256::Scalar;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, error, info};

/// One peer's input to refreshing a target shareholder's share.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryContribution {
    pub(crate) r: Scalar,
    pub(crate) shareholder: ShareholderId,
    pub(crate) dprf: DprfContribution,
    /// `main(shareholder) + W_block(target)(shareholder)`.
    pub(crate) blinded_sum: Scalar,
    pub(crate) share_commitment: Commitment,
    pub(crate) recovering_commitment: Commitment,
    pub(crate) shared_data: Option<Vec<u8>>,
}

impl std::fmt::Debug for RecoveryContribution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryContribution")
            .field("shareholder", &self.shareholder)
            .field("for_shareholder", &self.dprf.for_shareholder())
            .field("share_commitment", &hex::encode(self.share_commitment.consistent_hash()))
            .field(
                "recovering_commitment",
                &hex::encode(self.recovering_commitment.consistent_hash()),
            )
            .finish_non_exhaustive()
    }
}

impl RecoveryContribution {
    /// The contributing shareholder.
    pub fn shareholder(&self) -> ShareholderId {
        self.shareholder
    }

    /// The shareholder being recovered.
    pub fn target(&self) -> ShareholderId {
        self.dprf.for_shareholder()
    }

    /// The blinding value of the sharing.
    pub fn r(&self) -> &Scalar {
        &self.r
    }

    /// The blinded share sum.
    pub fn blinded_sum(&self) -> &Scalar {
        &self.blinded_sum
    }

    /// The encrypted payload of the secret, if carried.
    pub fn shared_data(&self) -> Option<&[u8]> {
        self.shared_data.as_deref()
    }
}

/// A recovered share, and the contributors that were left out because their
/// data was invalid or disagreed with the majority.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecoveryOutcome {
    /// The recovered share.
    pub share: VssrShare,
    /// Contributors that were excluded.
    pub excluded: Vec<ShareholderId>,
}

/// Progress of one recovery round.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum RoundState {
    /// idle
    Idle,
    /// collecting contributions
    Collecting,
    /// combining contributions
    Combining,
    /// share recovered and verified
    Verified,
    /// recovered share failed its final check
    Fatal,
}

/// Collects the contributions for one recovery of this replica's share.
///
/// `Idle -> Collecting -> (f + 1 contributions) -> Combining -> Verified |
/// Fatal`. A combination that lacks valid contributions returns to
/// `Collecting`, waiting for more.
#[derive(Debug)]
pub struct RecoveryRound<'a> {
    scheme: &'a ServerScheme,
    state: RoundState,
    contributions: BTreeMap<ShareholderId, RecoveryContribution>,
    recovered: Option<RecoveryOutcome>,
}

impl<'a> RecoveryRound<'a> {
    /// An idle round.
    pub fn new(scheme: &'a ServerScheme) -> Self {
        Self {
            scheme,
            state: RoundState::Idle,
            contributions: BTreeMap::new(),
            recovered: None,
        }
    }

    /// The current state.
    pub fn state(&self) -> RoundState {
        self.state
    }

    /// Record a contribution. Later contributions of the same shareholder
    /// are ignored. Fails once the round has finished.
    pub fn offer(&mut self, contribution: RecoveryContribution) -> Result<RoundState> {
        match self.state {
            RoundState::Verified | RoundState::Fatal => {
                return arg_err!("the recovery round is over");
            }
            RoundState::Idle => self.state = RoundState::Collecting,
            RoundState::Collecting | RoundState::Combining => {}
        }
        if contribution.target() != self.scheme.me() {
            debug!(
                "Dropping contribution of {} for another target",
                contribution.shareholder
            );
            return Ok(self.state);
        }
        let _ = self
            .contributions
            .entry(contribution.shareholder)
            .or_insert(contribution);
        Ok(self.state)
    }

    /// Whether enough contributions arrived to attempt a combination.
    pub fn is_ready(&self) -> bool {
        self.contributions.len() >= self.scheme.view().agreement()
    }

    /// Try to combine the collected contributions.
    pub fn try_complete(&mut self) -> Result<&RecoveryOutcome> {
        if self.state == RoundState::Fatal {
            return Err(InternalError::FatalRecovery(
                "the round already failed".into(),
            ));
        }
        if self.recovered.is_none() {
            if !self.is_ready() {
                return Err(InternalError::NotEnoughContributions {
                    needed: self.scheme.view().agreement(),
                    got: self.contributions.len(),
                });
            }
            self.state = RoundState::Combining;
            let contributions: Vec<_> = self.contributions.values().cloned().collect();
            match self.scheme.recover_share_detailed(&contributions) {
                Ok(outcome) => {
                    info!(
                        "Recovered share of {} ({} contributors excluded)",
                        self.scheme.me(),
                        outcome.excluded.len()
                    );
                    self.state = RoundState::Verified;
                    self.recovered = Some(outcome);
                }
                Err(e) if e.is_fatal() => {
                    error!("Recovery round of {} failed: {}", self.scheme.me(), e);
                    self.state = RoundState::Fatal;
                    return Err(e);
                }
                Err(e) => {
                    self.state = RoundState::Collecting;
                    return Err(e);
                }
            }
        }
        self.recovered
            .as_ref()
            .ok_or(InternalError::InternalInvariantFailed)
    }
}
