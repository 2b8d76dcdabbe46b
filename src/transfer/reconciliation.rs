// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Deciding which commitments a recovering replica uses for each peer.
//!
//! With linear commitments every correct peer holds the same commitments,
//! so only the state sender ships them and the others send a digest; the
//! commitments are usable once more than `f` peers report the digest they
//! hash to. Constant commitments carry a per-shareholder witness, so every
//! peer ships its own and they are usable once `f + 1` peers have done so.

use super::wire::{commitments_digest, CommitmentMaterial};
use crate::{
    commitment::{Commitment, CommitmentKind},
    errors::Result,
    protocol::ProcessId,
};
use k256::Scalar;
use std::{collections::BTreeMap, fmt::Debug, sync::Arc};
use tracing::{debug, warn};

/// The commitments and blinding values a peer's contributions refer to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct PeerCommitments {
    /// Two per item: main share commitment, then witness commitment.
    pub(crate) commitments: Vec<Commitment>,
    pub(crate) rs: Vec<Scalar>,
}

impl PeerCommitments {
    /// Whether the material covers exactly `items` items.
    pub(crate) fn covers(&self, items: usize) -> bool {
        self.commitments.len() == 2 * items && self.rs.len() == items
    }
}

/// Collects commitment material from peers until it can be used.
pub(crate) trait CommitmentReconciliation: Send + Debug {
    /// Record what `from` sent.
    fn handle(&mut self, from: ProcessId, material: CommitmentMaterial) -> Result<()>;

    /// Whether commitments can be assigned to peers.
    fn is_ready(&self) -> bool;

    /// The material to use for each of `peers`. Peers whose material does
    /// not match the agreed one are left out.
    fn commitments_of(&self, peers: &[ProcessId]) -> BTreeMap<ProcessId, Arc<PeerCommitments>>;
}

/// The strategy for `kind`.
pub(crate) fn strategy(
    kind: CommitmentKind,
    f: usize,
    state_sender: ProcessId,
) -> Box<dyn CommitmentReconciliation> {
    match kind {
        CommitmentKind::Linear => Box::new(LinearReconciliation::new(f, state_sender)),
        CommitmentKind::Constant => Box::new(ConstantReconciliation::new(f)),
    }
}

#[derive(Debug)]
struct LinearReconciliation {
    f: usize,
    state_sender: ProcessId,
    digests: BTreeMap<ProcessId, [u8; 32]>,
    full: BTreeMap<[u8; 32], Arc<PeerCommitments>>,
}

impl LinearReconciliation {
    fn new(f: usize, state_sender: ProcessId) -> Self {
        Self {
            f,
            state_sender,
            digests: BTreeMap::new(),
            full: BTreeMap::new(),
        }
    }

    fn majority(&self) -> Option<[u8; 32]> {
        let mut votes: BTreeMap<[u8; 32], usize> = BTreeMap::new();
        for digest in self.digests.values() {
            *votes.entry(*digest).or_default() += 1;
        }
        votes
            .into_iter()
            .max_by_key(|(_, count)| *count)
            .filter(|(_, count)| *count > self.f)
            .map(|(digest, _)| digest)
    }
}

impl CommitmentReconciliation for LinearReconciliation {
    fn handle(&mut self, from: ProcessId, material: CommitmentMaterial) -> Result<()> {
        let digest = match material {
            CommitmentMaterial::Digest(digest) => digest,
            CommitmentMaterial::Full { commitments, rs } => {
                let digest = commitments_digest(&commitments, &rs)?;
                if from == self.state_sender {
                    debug!("State sender {} sent {} commitments", from, commitments.len());
                } else {
                    debug!("Replica {} sent commitments it was not asked for", from);
                }
                let _ = self
                    .full
                    .entry(digest)
                    .or_insert_with(|| Arc::new(PeerCommitments { commitments, rs }));
                digest
            }
        };
        let _ = self.digests.insert(from, digest);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.majority()
            .map_or(false, |digest| self.full.contains_key(&digest))
    }

    fn commitments_of(&self, peers: &[ProcessId]) -> BTreeMap<ProcessId, Arc<PeerCommitments>> {
        let agreed = match self.majority().and_then(|d| self.full.get(&d).map(|c| (d, c))) {
            Some(agreed) => agreed,
            None => return BTreeMap::new(),
        };
        peers
            .iter()
            .filter_map(|peer| match self.digests.get(peer) {
                Some(digest) if *digest == agreed.0 => Some((*peer, agreed.1.clone())),
                _ => {
                    warn!("Replica {} disagrees on the commitments", peer);
                    None
                }
            })
            .collect()
    }
}

#[derive(Debug)]
struct ConstantReconciliation {
    f: usize,
    received: BTreeMap<ProcessId, Arc<PeerCommitments>>,
}

impl ConstantReconciliation {
    fn new(f: usize) -> Self {
        Self {
            f,
            received: BTreeMap::new(),
        }
    }
}

impl CommitmentReconciliation for ConstantReconciliation {
    fn handle(&mut self, from: ProcessId, material: CommitmentMaterial) -> Result<()> {
        match material {
            CommitmentMaterial::Full { commitments, rs } => {
                let _ = self
                    .received
                    .insert(from, Arc::new(PeerCommitments { commitments, rs }));
                Ok(())
            }
            CommitmentMaterial::Digest(_) => {
                arg_err!("constant commitments must be sent in full")
            }
        }
    }

    fn is_ready(&self) -> bool {
        self.received.len() > self.f
    }

    fn commitments_of(&self, peers: &[ProcessId]) -> BTreeMap<ProcessId, Arc<PeerCommitments>> {
        peers
            .iter()
            .filter_map(|peer| self.received.get(peer).map(|c| (*peer, c.clone())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        commitment::CommitmentKind,
        vssr::testing::Fixture,
    };
    use rand::rngs::OsRng;

    fn material(fixture: &Fixture, secret: &[u8], from: usize) -> Result<(Vec<Commitment>, Vec<Scalar>)> {
        let shares = fixture.share(secret)?;
        let target = fixture.servers[0].me();
        let c = fixture.servers[from].recovery_contribution(&mut OsRng, &shares[from], target)?;
        Ok((vec![c.share_commitment, c.recovering_commitment], vec![c.r]))
    }

    #[test]
    fn linear_needs_a_majority_digest_and_full_commitments() -> Result<()> {
        let fixture = Fixture::new(1, CommitmentKind::Linear)?;
        let (commitments, rs) = material(&fixture, b"x", 1)?;
        let digest = commitments_digest(&commitments, &rs)?;
        let mut linear = strategy(CommitmentKind::Linear, 1, 1);

        linear.handle(2, CommitmentMaterial::Digest(digest))?;
        linear.handle(3, CommitmentMaterial::Digest([0u8; 32]))?;
        assert!(!linear.is_ready());
        linear.handle(1, CommitmentMaterial::Full { commitments, rs })?;
        assert!(linear.is_ready());

        let assigned = linear.commitments_of(&[1, 2, 3]);
        assert_eq!(assigned.keys().copied().collect::<Vec<_>>(), vec![1, 2]);
        assert!(assigned[&2].covers(1));
        Ok(())
    }

    #[test]
    fn constant_needs_f_plus_one_peers() -> Result<()> {
        let fixture = Fixture::new(1, CommitmentKind::Constant)?;
        let mut constant = strategy(CommitmentKind::Constant, 1, 1);
        let (commitments, rs) = material(&fixture, b"y", 1)?;
        constant.handle(1, CommitmentMaterial::Full { commitments, rs })?;
        assert!(!constant.is_ready());
        let (commitments, rs) = material(&fixture, b"y", 2)?;
        constant.handle(2, CommitmentMaterial::Full { commitments, rs })?;
        assert!(constant.is_ready());
        assert!(constant.handle(3, CommitmentMaterial::Digest([1u8; 32])).is_err());
        assert_eq!(constant.commitments_of(&[2, 3]).len(), 1);
        Ok(())
    }
}
