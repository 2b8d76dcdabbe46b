// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use super::{
    hashing::HashWorker,
    wire::{commitments_digest, write_payload, BlindedPayload, CommitmentMaterial, CommonPart},
    PeerDirectory,
};
use crate::{
    commitment::CommitmentKind,
    errors::{InternalError, Result},
    parameters::COMMON_STATE_CHUNK,
    protocol::ProcessId,
    serialization::WireWriter,
    state::{separation, ApplicationState},
    utils::scalar_to_bytes,
    vssr::{ServerScheme, VssrShare},
};
use rand::{rngs::OsRng, CryptoRng, RngCore};
use std::{io::BufWriter, net::TcpStream, thread, time::Instant};
use tracing::{error, info, instrument};

fn common_part(common_state: &[u8], is_state_sender: bool) -> Result<CommonPart> {
    if is_state_sender {
        Ok(CommonPart::Full(common_state.to_vec()))
    } else {
        HashWorker::digest(common_state, COMMON_STATE_CHUNK).map(CommonPart::Hash)
    }
}

/// Blind every share for `to` and assemble what is sent to it.
fn blinded_payload<R: RngCore + CryptoRng>(
    rng: &mut R,
    scheme: &ServerScheme,
    shares: &[VssrShare],
    common: CommonPart,
    to: ProcessId,
    is_state_sender: bool,
    round: u64,
) -> Result<BlindedPayload> {
    let target = scheme.shareholder(to)?;
    let mut commitments = Vec::with_capacity(2 * shares.len());
    let mut rs = Vec::with_capacity(shares.len());
    let mut blinded_shares = Vec::with_capacity(shares.len());
    let mut dprf = Vec::with_capacity(shares.len());
    for (item, share) in shares.iter().enumerate() {
        let contribution = scheme
            .recovery_contribution(rng, share, target)
            .map_err(|e| {
                error!("Cannot blind item {} for replica {}: {}", item, to, e);
                InternalError::InvalidArgument(format!("item {item} cannot be blinded: {e}"))
            })?;
        blinded_shares.push(scheme.encrypt_data_for(
            rng,
            to,
            &scalar_to_bytes(&contribution.blinded_sum),
        )?);
        commitments.push(contribution.share_commitment);
        commitments.push(contribution.recovering_commitment);
        rs.push(contribution.r);
        dprf.push(contribution.dprf);
    }
    let mut seal = WireWriter::new();
    seal.u64(round).count(shares.len())?;
    let seal = scheme.encrypt_data_for(rng, to, &seal.into_bytes())?;
    let commitments = match scheme.commitment_scheme().kind() {
        CommitmentKind::Linear if !is_state_sender => {
            CommitmentMaterial::Digest(commitments_digest(&commitments, &rs)?)
        }
        _ => CommitmentMaterial::Full { commitments, rs },
    };
    Ok(BlindedPayload {
        round,
        common,
        commitments,
        blinded_shares,
        dprf,
        seal,
    })
}

#[cfg(test)]
pub(crate) fn payload_for<R: RngCore + CryptoRng>(
    rng: &mut R,
    scheme: &ServerScheme,
    separated: &separation::SeparatedState,
    to: ProcessId,
    is_state_sender: bool,
    round: u64,
) -> Result<BlindedPayload> {
    let common = common_part(&separated.common_state, is_state_sender)?;
    blinded_payload(rng, scheme, &separated.shares, common, to, is_state_sender, round)
}

/// Sends this replica's state, blinded, to recovering replicas.
#[derive(Debug)]
pub struct BlindedStateSender<'a> {
    scheme: &'a ServerScheme,
    directory: &'a PeerDirectory,
    base_port: u16,
}

impl<'a> BlindedStateSender<'a> {
    /// A sender reaching replica `p` on port `base_port + p`.
    pub fn new(scheme: &'a ServerScheme, directory: &'a PeerDirectory, base_port: u16) -> Self {
        Self {
            scheme,
            directory,
            base_port,
        }
    }

    /// Send `state` to every destination, one connection and thread each.
    /// Only the state sender ships the common state itself.
    #[instrument(skip_all, fields(round = round), err(Debug))]
    pub fn send(
        &self,
        state: &ApplicationState,
        is_state_sender: bool,
        round: u64,
        destinations: &[ProcessId],
    ) -> Result<()> {
        let started = Instant::now();
        let separated = separation::separate(state)?;
        let common = common_part(&separated.common_state, is_state_sender)?;
        info!(
            "Prepared {} shares for {} replicas in {} ms",
            separated.shares.len(),
            destinations.len(),
            started.elapsed().as_millis()
        );

        let me = self.scheme.me().process();
        let kind = self.scheme.commitment_scheme().kind();
        let results: Vec<(ProcessId, Result<()>)> = thread::scope(|scope| {
            let handles: Vec<_> = destinations
                .iter()
                .map(|&to| {
                    let common = common.clone();
                    let shares = &separated.shares;
                    let handle = scope.spawn(move || -> Result<()> {
                        let started = Instant::now();
                        let payload = blinded_payload(
                            &mut OsRng,
                            self.scheme,
                            shares,
                            common,
                            to,
                            is_state_sender,
                            round,
                        )?;
                        let stream = TcpStream::connect(self.directory.address_of(to, self.base_port)?)?;
                        let mut out = BufWriter::new(stream);
                        write_payload(&mut out, me, kind, &payload)?;
                        info!(
                            "Sent blinded state to replica {} in {} ms",
                            to,
                            started.elapsed().as_millis()
                        );
                        Ok(())
                    });
                    (to, handle)
                })
                .collect();
            handles
                .into_iter()
                .map(|(to, handle)| {
                    let result = handle
                        .join()
                        .unwrap_or(Err(InternalError::InternalInvariantFailed));
                    (to, result)
                })
                .collect()
        });

        let mut failure = None;
        for (to, result) in results {
            if let Err(e) = result {
                error!("Could not send blinded state to replica {}: {:?}", to, e);
                failure.get_or_insert(e);
            }
        }
        failure.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{state::testing, vssr::testing::Fixture};

    #[test]
    fn only_the_state_sender_ships_structure_and_linear_commitments() -> Result<()> {
        let fixture = Fixture::new(1, CommitmentKind::Linear)?;
        let states = testing::states(&fixture)?;
        let separated = separation::separate(&states[1])?;
        let server = &fixture.servers[1];

        let full = payload_for(&mut OsRng, server, &separated, 0, true, 1)?;
        assert_eq!(full.common, CommonPart::Full(separated.common_state.clone()));
        assert!(matches!(full.commitments, CommitmentMaterial::Full { ref rs, .. } if rs.len() == 3));
        assert_eq!(full.blinded_shares.len(), 3);

        let digest = payload_for(&mut OsRng, server, &separated, 0, false, 1)?;
        assert!(matches!(digest.common, CommonPart::Hash(_)));
        assert!(matches!(digest.commitments, CommitmentMaterial::Digest(_)));
        assert_eq!(digest.dprf.len(), 3);
        Ok(())
    }

    #[test]
    fn unblindable_item_is_named() -> Result<()> {
        let fixture = Fixture::new(1, CommitmentKind::Linear)?;
        let states = testing::states(&fixture)?;
        let mut separated = separation::separate(&states[1])?;
        // A share recovered earlier holds only its main part.
        let main = separated.shares[2].main()?.clone();
        separated.shares[2] = VssrShare::new(*separated.shares[2].r(), vec![Some(main)]);

        match payload_for(&mut OsRng, &fixture.servers[1], &separated, 0, false, 1) {
            Err(InternalError::InvalidArgument(message)) => {
                assert!(message.starts_with("item 2 "), "{message}")
            }
            other => panic!("expected the item to be named, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn constant_commitments_are_always_full() -> Result<()> {
        let fixture = Fixture::new(1, CommitmentKind::Constant)?;
        let states = testing::states(&fixture)?;
        let separated = separation::separate(&states[2])?;
        let payload = payload_for(&mut OsRng, &fixture.servers[2], &separated, 3, false, 1)?;
        assert!(matches!(
            payload.commitments,
            CommitmentMaterial::Full { ref commitments, .. } if commitments.len() == 6
        ));
        // Process 7 is not part of the view.
        assert!(payload_for(&mut OsRng, &fixture.servers[2], &separated, 7, false, 1).is_err());
        Ok(())
    }
}
