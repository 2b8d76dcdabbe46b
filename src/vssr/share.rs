// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use crate::{
    commitment::{Commitment, Share},
    errors::{InternalError, Result},
    protocol::ShareholderId,
    utils::CurvePoint,
};
use k256::Scalar;
use serde::{Deserialize, Serialize};

/// A share together with the commitment it verifies against.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiableShare {
    pub(crate) share: Share,
    pub(crate) commitment: Commitment,
    /// The encrypted payload, carried by main shares only.
    pub(crate) shared_data: Option<Vec<u8>>,
}

impl VerifiableShare {
    /// Bundle a share with its commitment.
    pub fn new(share: Share, commitment: Commitment, shared_data: Option<Vec<u8>>) -> Self {
        Self {
            share,
            commitment,
            shared_data,
        }
    }

    /// The share.
    pub fn share(&self) -> &Share {
        &self.share
    }

    /// The shareholder-specific form of the commitment.
    pub fn commitment(&self) -> &Commitment {
        &self.commitment
    }

    /// The encrypted payload, if this is a main share.
    pub fn shared_data(&self) -> Option<&[u8]> {
        self.shared_data.as_deref()
    }

    pub(crate) fn set_shared_data(&mut self, shared_data: Option<Vec<u8>>) {
        self.shared_data = shared_data;
    }
}

/// Everything a shareholder holds for one secret: the blinding value `r`,
/// its main share at index 0 and one recovery-witness share per block at
/// indices `1..=l`.
///
/// A share produced by recovery only carries the main share; its witness
/// slots are empty and it cannot contribute to recovering anybody until the
/// secret is shared again.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VssrShare {
    pub(crate) r: Scalar,
    pub(crate) shares: Vec<Option<VerifiableShare>>,
}

impl VssrShare {
    pub(crate) fn new(r: Scalar, shares: Vec<Option<VerifiableShare>>) -> Self {
        Self { r, shares }
    }

    /// The blinding value of the sharing.
    pub fn r(&self) -> &Scalar {
        &self.r
    }

    /// The main share.
    pub fn main(&self) -> Result<&VerifiableShare> {
        self.share_at(0)
            .ok_or_else(|| InternalError::InvalidArgument("share has no main share".into()))
    }

    pub(crate) fn main_mut(&mut self) -> Result<&mut VerifiableShare> {
        self.shares
            .get_mut(0)
            .and_then(Option::as_mut)
            .ok_or_else(|| InternalError::InvalidArgument("share has no main share".into()))
    }

    /// The share at `index`, if present.
    pub fn share_at(&self, index: usize) -> Option<&VerifiableShare> {
        self.shares.get(index).and_then(Option::as_ref)
    }

    /// All slots, main share first.
    pub fn verifiable_shares(&self) -> &[Option<VerifiableShare>] {
        &self.shares
    }

    /// Number of slots, `l + 1`.
    pub fn len(&self) -> usize {
        self.shares.len()
    }

    /// Whether the share has no slot at all.
    pub fn is_empty(&self) -> bool {
        self.shares.is_empty()
    }
}

/// A share encrypted for its holder.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedShare {
    pub(crate) shareholder: ShareholderId,
    pub(crate) encrypted: Vec<u8>,
}

impl EncryptedShare {
    /// The intended holder.
    pub fn shareholder(&self) -> ShareholderId {
        self.shareholder
    }
}

/// What a client publishes for one secret.
///
/// `shares[k]` and `commitments[k]` belong to polynomial `k`: the main
/// polynomial for `k = 0`, the witness polynomial of block `k` otherwise.
/// Constant commitments still carry every shareholder's witness here; they
/// are split off per destination when the request is encoded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VssrPublishedShares {
    pub(crate) r: Scalar,
    pub(crate) shares: Vec<Vec<EncryptedShare>>,
    pub(crate) commitments: Vec<Commitment>,
    pub(crate) shared_data: Vec<u8>,
}

impl VssrPublishedShares {
    /// The blinding value.
    pub fn r(&self) -> &Scalar {
        &self.r
    }

    /// One commitment per polynomial.
    pub fn commitments(&self) -> &[Commitment] {
        &self.commitments
    }

    /// The encrypted payload.
    pub fn shared_data(&self) -> &[u8] {
        &self.shared_data
    }

    /// The encrypted shares addressed to `shareholder`, one per polynomial.
    /// `None` if any polynomial lacks one.
    pub fn share_of(&self, shareholder: ShareholderId) -> Option<Vec<&EncryptedShare>> {
        self.shares
            .iter()
            .map(|row| row.iter().find(|s| s.shareholder == shareholder))
            .collect()
    }

    /// The private witness `shareholder` needs for polynomial `index`, for
    /// constant commitments.
    pub(crate) fn witness_of(&self, index: usize, shareholder: ShareholderId) -> Option<CurvePoint> {
        match self.commitments.get(index)? {
            Commitment::Constant(c) => c
                .terms
                .first()
                .and_then(|t| t.witnesses.get(&shareholder))
                .copied(),
            Commitment::Linear(_) => None,
        }
    }
}

/// Opened main shares of one secret, ready to be combined.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpenPublishedShares {
    pub(crate) shares: Vec<(Share, Commitment)>,
    pub(crate) shared_data: Vec<u8>,
}

impl OpenPublishedShares {
    /// Build from shares and the payload they protect.
    pub fn new(shares: Vec<(Share, Commitment)>, shared_data: Vec<u8>) -> Self {
        Self {
            shares,
            shared_data,
        }
    }

    /// Collect main shares coming from different shareholders. They must all
    /// carry the same payload.
    pub fn from_main_shares(shares: &[VerifiableShare]) -> Result<Self> {
        let mut shared_data: Option<&[u8]> = None;
        for share in shares {
            match (shared_data, share.shared_data()) {
                (None, Some(data)) => shared_data = Some(data),
                (Some(known), Some(data)) if known != data => {
                    return Err(InternalError::Disagreement("shared data".into()))
                }
                _ => {}
            }
        }
        let shared_data = shared_data
            .ok_or_else(|| InternalError::InvalidArgument("no main share carries data".into()))?
            .to_vec();
        Ok(Self {
            shares: shares
                .iter()
                .map(|s| (s.share, s.commitment.clone()))
                .collect(),
            shared_data,
        })
    }
}
