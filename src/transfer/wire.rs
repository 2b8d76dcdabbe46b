// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! What one peer sends a recovering replica, in wire order:
//!
//! 1. sender process id and round id
//! 2. `0 || len || common state` or `1 || len || common state hash`
//! 3. number of confidential items
//! 4. commitments. Linear scheme: `0 || count || commitments || r values`,
//!    or just `1` when only a digest is sent. Constant scheme: `count ||
//!    commitments || r values`.
//! 5. `count || encrypted blinded share` per item
//! 6. one DPRF contribution per item
//! 7. linear scheme with flag `1` only: the commitments digest
//! 8. the seal: `round || number of items`, encrypted for the recovering
//!    replica under the key it shares with the sender
//!
//! Commitments come in pairs per item: the main share commitment, then the
//! witness commitment of the recovering replica's block.

use super::hashing::HashWorker;
use crate::{
    commitment::{Commitment, CommitmentKind},
    dprf::DprfContribution,
    errors::{InternalError, Result},
    parameters::COMMON_STATE_CHUNK,
    protocol::ProcessId,
    serialization::{StreamReader, WireWriter},
    utils::scalar_from_bytes,
};
use k256::Scalar;
use std::io::{Read, Write};
use tracing::debug;

/// The structure part of a transfer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum CommonPart {
    Full(Vec<u8>),
    Hash([u8; 32]),
}

/// The commitments part of a transfer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum CommitmentMaterial {
    Full {
        commitments: Vec<Commitment>,
        rs: Vec<Scalar>,
    },
    Digest([u8; 32]),
}

/// Everything one peer sends to one recovering replica.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct BlindedPayload {
    pub(crate) round: u64,
    pub(crate) common: CommonPart,
    pub(crate) commitments: CommitmentMaterial,
    pub(crate) blinded_shares: Vec<Vec<u8>>,
    pub(crate) dprf: Vec<DprfContribution>,
    pub(crate) seal: Vec<u8>,
}

/// A payload as received, before any check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlindedData {
    pub(crate) from: ProcessId,
    pub(crate) round: u64,
    pub(crate) common_state: Option<Vec<u8>>,
    pub(crate) common_state_hash: [u8; 32],
    pub(crate) commitments: CommitmentMaterial,
    pub(crate) blinded_shares: Vec<Vec<u8>>,
    pub(crate) dprf: Vec<DprfContribution>,
    pub(crate) seal: Vec<u8>,
}

impl BlindedData {
    /// The sending peer.
    pub fn from(&self) -> ProcessId {
        self.from
    }

    /// The round the data was sent for.
    pub fn round(&self) -> u64 {
        self.round
    }

    /// The number of confidential items the peer claims.
    pub fn items(&self) -> usize {
        self.dprf.len()
    }
}

/// Digest of linear commitments and blinding values, as compared across
/// peers that did not send them in full.
pub(crate) fn commitments_digest(commitments: &[Commitment], rs: &[Scalar]) -> Result<[u8; 32]> {
    let worker = HashWorker::start()?;
    for commitment in commitments {
        worker.update(commitment.consistent_hash().to_vec())?;
    }
    for r in rs {
        worker.update(r.to_bytes().to_vec())?;
    }
    worker.finish()
}

fn digest_from(bytes: Vec<u8>) -> Result<[u8; 32]> {
    bytes
        .try_into()
        .map_err(|_| InternalError::Serialization)
}

pub(crate) fn write_payload<W: Write>(
    out: &mut W,
    from: ProcessId,
    kind: CommitmentKind,
    payload: &BlindedPayload,
) -> Result<()> {
    let mut head = WireWriter::new();
    head.u32(from).u64(payload.round);
    match &payload.common {
        CommonPart::Full(state) => {
            debug!("Sending {} bytes of common state", state.len());
            head.u8(0).count(state.len())?;
            out.write_all(&head.into_bytes())?;
            out.write_all(state)?;
        }
        CommonPart::Hash(hash) => {
            head.u8(1).bytes(hash)?;
            out.write_all(&head.into_bytes())?;
        }
    }

    let mut body = WireWriter::new();
    body.count(payload.dprf.len())?;
    let mut trailing_digest = None;
    match (kind, &payload.commitments) {
        (CommitmentKind::Linear, CommitmentMaterial::Digest(digest)) => {
            body.u8(1);
            trailing_digest = Some(digest);
        }
        (kind, CommitmentMaterial::Full { commitments, rs }) => {
            if kind == CommitmentKind::Linear {
                body.u8(0);
            }
            body.count(commitments.len())?;
            for commitment in commitments {
                body.bytes(&serialize!(commitment)?)?;
            }
            for r in rs {
                body.bytes(&r.to_bytes())?;
            }
        }
        (CommitmentKind::Constant, CommitmentMaterial::Digest(_)) => {
            return arg_err!("constant commitments are always sent in full");
        }
    }
    body.count(payload.blinded_shares.len())?;
    for share in &payload.blinded_shares {
        body.bytes(share)?;
    }
    for contribution in &payload.dprf {
        body.bytes(&serialize!(contribution)?)?;
    }
    if let Some(digest) = trailing_digest {
        body.bytes(digest)?;
    }
    body.bytes(&payload.seal)?;
    out.write_all(&body.into_bytes())?;
    out.flush()?;
    Ok(())
}

fn read_full_commitments<R: Read>(
    input: &mut StreamReader<R>,
    items: usize,
) -> Result<(Vec<Commitment>, Vec<Scalar>)> {
    let commitments = (0..input.count()?)
        .map(|_| deserialize!(&input.bytes()?))
        .collect::<Result<Vec<Commitment>>>()?;
    let rs = (0..items)
        .map(|_| scalar_from_bytes(&input.bytes()?))
        .collect::<Result<_>>()?;
    Ok((commitments, rs))
}

pub(crate) fn read_payload<R: Read>(input: R, kind: CommitmentKind) -> Result<BlindedData> {
    let mut input = StreamReader::new(input);
    let from = input.u32()?;
    let round = input.u64()?;
    let (common_state, common_state_hash) = match input.u8()? {
        0 => {
            let len = input.count()?;
            debug!("Receiving {} bytes of common state from {}", len, from);
            let hasher = HashWorker::start()?;
            let mut queued = true;
            let state = input.chunked(len, COMMON_STATE_CHUNK, |chunk| {
                queued &= hasher.update(chunk.to_vec()).is_ok();
            })?;
            if !queued {
                return Err(InternalError::InternalInvariantFailed);
            }
            (Some(state), hasher.finish()?)
        }
        1 => (None, digest_from(input.bytes()?)?),
        _ => return Err(InternalError::Serialization),
    };

    let items = input.count()?;
    let mut commitments = match kind {
        CommitmentKind::Linear => match input.u8()? {
            0 => {
                let (commitments, rs) = read_full_commitments(&mut input, items)?;
                Some(CommitmentMaterial::Full { commitments, rs })
            }
            1 => None,
            _ => return Err(InternalError::Serialization),
        },
        CommitmentKind::Constant => {
            let (commitments, rs) = read_full_commitments(&mut input, items)?;
            Some(CommitmentMaterial::Full { commitments, rs })
        }
    };

    let blinded_shares = (0..input.count()?)
        .map(|_| input.bytes())
        .collect::<Result<_>>()?;
    let dprf = (0..items)
        .map(|_| deserialize!(&input.bytes()?))
        .collect::<Result<Vec<DprfContribution>>>()?;
    if commitments.is_none() {
        commitments = Some(CommitmentMaterial::Digest(digest_from(input.bytes()?)?));
    }
    let seal = input.bytes()?;
    Ok(BlindedData {
        from,
        round,
        common_state,
        common_state_hash,
        commitments: commitments.ok_or(InternalError::InternalInvariantFailed)?,
        blinded_shares,
        dprf,
        seal,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        utils::sha256,
        vssr::testing::Fixture,
    };
    use rand::rngs::OsRng;

    fn payload(
        fixture: &Fixture,
        common: CommonPart,
        full: bool,
    ) -> Result<BlindedPayload> {
        let shares = fixture.share(b"wire")?;
        let target = fixture.servers[0].me();
        let contribution = fixture.servers[1].recovery_contribution(&mut OsRng, &shares[1], target)?;
        let commitments = vec![
            contribution.share_commitment.clone(),
            contribution.recovering_commitment.clone(),
        ];
        let rs = vec![contribution.r];
        let commitments = if full {
            CommitmentMaterial::Full { commitments, rs }
        } else {
            CommitmentMaterial::Digest(commitments_digest(&commitments, &rs)?)
        };
        Ok(BlindedPayload {
            round: 3,
            common,
            commitments,
            blinded_shares: vec![vec![9u8; 60]],
            dprf: vec![contribution.dprf],
            seal: vec![5u8; 44],
        })
    }

    #[test]
    fn state_sender_payload_is_read_back() -> Result<()> {
        for kind in [CommitmentKind::Linear, CommitmentKind::Constant] {
            let fixture = Fixture::new(1, kind)?;
            let state = vec![7u8; 200_000];
            let sent = payload(&fixture, CommonPart::Full(state.clone()), true)?;
            let mut bytes = Vec::new();
            write_payload(&mut bytes, 2, kind, &sent)?;

            let received = read_payload(bytes.as_slice(), kind)?;
            assert_eq!(received.from(), 2);
            assert_eq!(received.round(), 3);
            assert_eq!(received.items(), 1);
            assert_eq!(received.common_state, Some(state.clone()));
            assert_eq!(received.common_state_hash, sha256(&[&state]));
            assert_eq!(received.commitments, sent.commitments);
            assert_eq!(received.blinded_shares, sent.blinded_shares);
            assert_eq!(received.dprf, sent.dprf);
            assert_eq!(received.seal, sent.seal);
        }
        Ok(())
    }

    #[test]
    fn other_peers_send_digests() -> Result<()> {
        let fixture = Fixture::new(1, CommitmentKind::Linear)?;
        let sent = payload(&fixture, CommonPart::Hash([4u8; 32]), false)?;
        let mut bytes = Vec::new();
        write_payload(&mut bytes, 1, CommitmentKind::Linear, &sent)?;
        let received = read_payload(bytes.as_slice(), CommitmentKind::Linear)?;
        assert_eq!(received.common_state, None);
        assert_eq!(received.common_state_hash, [4u8; 32]);
        assert_eq!(received.commitments, sent.commitments);

        assert!(write_payload(&mut Vec::new(), 1, CommitmentKind::Constant, &sent).is_err());
        assert!(read_payload(&bytes[..bytes.len() - 1], CommitmentKind::Linear).is_err());
        Ok(())
    }
}
