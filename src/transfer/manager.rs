// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use super::{BlindedDataReceiver, BlindedStateHandler, BlindedStateSender, PeerDirectory};
use crate::{
    config::VssrConfig,
    errors::{InternalError, Result},
    protocol::ProcessId,
    state::ApplicationState,
    vssr::ServerScheme,
};
use rand::{rngs::OsRng, seq::SliceRandom, RngCore};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, sync::mpsc, time::Duration};
use tracing::{error, info, instrument, warn};

/// Asks a peer for its blinded state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRequest {
    /// The recovering replica.
    pub requester: ProcessId,
    /// The consensus id the state should cover.
    pub consensus_id: i32,
    /// The peer that ships the common state.
    pub state_sender: ProcessId,
    /// Transfer round; data of other rounds is discarded.
    pub round: u64,
}

impl StateRequest {
    /// Serialize with bincode.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serialize!(self)
    }

    /// Inverse of [`StateRequest::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        deserialize!(bytes)
    }
}

/// How state requests reach peers. The ordering layer usually provides
/// this.
pub trait StateRequestTransport {
    /// Deliver `request` to `to`.
    fn request_state(&self, to: ProcessId, request: &StateRequest) -> Result<()>;
}

impl<F> StateRequestTransport for F
where
    F: Fn(ProcessId, &StateRequest) -> Result<()>,
{
    fn request_state(&self, to: ProcessId, request: &StateRequest) -> Result<()> {
        self(to, request)
    }
}

/// Runs state transfer rounds for a replica, in both directions.
#[derive(Debug)]
pub struct ConfidentialStateManager<T> {
    scheme: ServerScheme,
    config: VssrConfig,
    directory: PeerDirectory,
    transport: T,
    used_senders: BTreeSet<ProcessId>,
    round: u64,
    timeout: Duration,
}

impl<T: StateRequestTransport> ConfidentialStateManager<T> {
    /// A manager using the configured port base and timeout.
    pub fn new(
        scheme: ServerScheme,
        config: VssrConfig,
        directory: PeerDirectory,
        transport: T,
    ) -> Self {
        let timeout = config.state_timeout();
        Self {
            scheme,
            config,
            directory,
            transport,
            used_senders: BTreeSet::new(),
            round: OsRng.next_u64(),
            timeout,
        }
    }

    fn me(&self) -> ProcessId {
        self.scheme.me().process()
    }

    /// Fetch the state up to `consensus_id` from the peers.
    ///
    /// Each round picks a state sender that was not tried before. A round
    /// that times out is abandoned and the next one waits twice as long.
    /// Fails with [`InternalError::Timeout`] once every peer was tried.
    #[instrument(skip(self), err(Debug))]
    pub fn recover_state(&mut self, consensus_id: i32) -> Result<ApplicationState> {
        let me = self.me();
        let peers = self.scheme.view().others(me);
        loop {
            let candidates: Vec<ProcessId> = peers
                .iter()
                .copied()
                .filter(|p| !self.used_senders.contains(p))
                .collect();
            let state_sender = match candidates.choose(&mut OsRng) {
                Some(sender) => *sender,
                None => {
                    error!("Every peer was tried as state sender");
                    return Err(InternalError::Timeout);
                }
            };
            let _ = self.used_senders.insert(state_sender);
            self.round = self.round.wrapping_add(1);
            info!(
                "Requesting state up to {} in round {} with state sender {}",
                consensus_id, self.round, state_sender
            );

            let (forward, incoming) = mpsc::channel();
            let mut receiver = BlindedDataReceiver::start(
                self.scheme.view().clone(),
                me,
                self.scheme.commitment_scheme().kind(),
                &self.directory,
                self.config.recovery_port,
                self.round,
                self.timeout,
                forward,
            )?;
            let request = StateRequest {
                requester: me,
                consensus_id,
                state_sender,
                round: self.round,
            };
            for peer in &peers {
                if let Err(e) = self.transport.request_state(*peer, &request) {
                    warn!("Could not ask replica {} for state: {:?}", peer, e);
                }
            }

            let mut handler = BlindedStateHandler::new(
                &self.scheme,
                self.scheme.commitment_scheme().kind(),
                self.round,
                state_sender,
                self.config.share_processing_threads,
            );
            let result = handler.run(&incoming, self.timeout);
            receiver.stop()?;
            match result {
                Ok(state) => {
                    info!("Recovered state up to {}", state.last_cid());
                    self.used_senders.clear();
                    self.timeout = self.config.state_timeout();
                    return Ok(state);
                }
                Err(InternalError::Timeout) => {
                    warn!(
                        "Round {} timed out after {} ms",
                        self.round,
                        self.timeout.as_millis()
                    );
                    self.timeout = self.timeout.saturating_mul(2);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Answer a peer's request by sending it this replica's `state`.
    #[instrument(skip_all, fields(requester = request.requester, round = request.round), err(Debug))]
    pub fn on_state_request(&self, request: &StateRequest, state: &ApplicationState) -> Result<()> {
        if request.requester == self.me() || !self.scheme.view().contains(request.requester) {
            return arg_err!("state request from an unexpected replica");
        }
        BlindedStateSender::new(&self.scheme, &self.directory, self.config.recovery_port).send(
            state,
            request.state_sender == self.me(),
            request.round,
            &[request.requester],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        commitment::CommitmentKind, transfer::testing::free_port_base, vssr::testing::Fixture,
    };
    use std::{cell::RefCell, time::Instant};

    #[test]
    fn requests_survive_the_wire() -> Result<()> {
        let request = StateRequest {
            requester: 2,
            consensus_id: 40,
            state_sender: 1,
            round: u64::MAX,
        };
        assert_eq!(StateRequest::from_bytes(&request.to_bytes()?)?, request);
        Ok(())
    }

    #[test]
    fn gives_up_after_every_state_sender_was_tried() -> Result<()> {
        let fixture = Fixture::new(1, CommitmentKind::Linear)?;
        let config = VssrConfig {
            recovery_port: free_port_base(4)?,
            state_timeout: 50,
            ..fixture.config.clone()
        };
        let asked = RefCell::new(Vec::new());
        let transport = |to: ProcessId, request: &StateRequest| -> Result<()> {
            asked.borrow_mut().push((to, request.state_sender, request.round));
            Ok(())
        };
        let mut manager = ConfidentialStateManager::new(
            fixture.servers[0].clone(),
            config,
            PeerDirectory::default(),
            transport,
        );

        let started = Instant::now();
        assert_eq!(manager.recover_state(3), Err(InternalError::Timeout));
        // 50 + 100 + 200 ms.
        assert!(started.elapsed() >= Duration::from_millis(350));
        drop(manager);

        let asked = asked.into_inner();
        assert_eq!(asked.len(), 9);
        let senders: BTreeSet<_> = asked.iter().map(|(_, sender, _)| *sender).collect();
        assert_eq!(senders, BTreeSet::from([1, 2, 3]));
        let rounds: BTreeSet<_> = asked.iter().map(|(_, _, round)| *round).collect();
        assert_eq!(rounds.len(), 3);
        Ok(())
    }
}
