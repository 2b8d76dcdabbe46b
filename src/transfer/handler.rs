// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Rebuilding a state from the blinded data peers send.
//!
//! Reconstruction waits for three quorums, each of `f + 1` agreeing peers:
//! on the hash of the common state (and the state sender must have sent the
//! bytes matching it), on the commitments, and on the number of
//! confidential items. It then recovers every item in parallel and fills
//! the common state with the recovered shares.

use super::{
    reconciliation::{self, CommitmentReconciliation, PeerCommitments},
    wire::BlindedData,
};
use crate::{
    commitment::CommitmentKind,
    dprf::DprfContribution,
    errors::{InternalError, Result},
    protocol::ProcessId,
    serialization::WireReader,
    state::{separation, ApplicationState},
    utils::scalar_from_bytes,
    vssr::{RecoveryContribution, RecoveryOutcome, ServerScheme},
};
use k256::Scalar;
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc::{Receiver, RecvTimeoutError},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};
use tracing::{debug, error, info, instrument, warn};

/// The blinded shares and DPRF contributions of one peer, one per item.
#[derive(Debug)]
struct PeerItems {
    blinded_sums: Vec<Scalar>,
    dprf: Vec<DprfContribution>,
}

fn most_voted<K: Ord + Copy>(votes: impl Iterator<Item = K>) -> Option<(K, usize)> {
    let mut counts: BTreeMap<K, usize> = BTreeMap::new();
    for vote in votes {
        *counts.entry(vote).or_default() += 1;
    }
    counts.into_iter().max_by_key(|(_, count)| *count)
}

/// Check that `data` was sealed by its claimed sender for this round and
/// item count.
fn open_seal(scheme: &ServerScheme, data: &BlindedData) -> Result<()> {
    let opened = scheme.decrypt_data(data.from, &data.seal)?;
    let mut reader = WireReader::new(&opened);
    let round = reader.u64()?;
    let items = reader.count()?;
    reader.finish()?;
    if round != data.round || items != data.items() {
        return verify_err!(format!(
            "sealed for round {round} with {items} items, received round {} with {} items",
            data.round,
            data.items()
        ));
    }
    Ok(())
}

fn open_blinded_sums(
    scheme: &ServerScheme,
    from: ProcessId,
    blinded_shares: &[Vec<u8>],
    items: usize,
) -> Option<Vec<Scalar>> {
    if blinded_shares.len() != items {
        warn!(
            "Replica {} sent {} blinded shares for {} items",
            from,
            blinded_shares.len(),
            items
        );
        return None;
    }
    let mut blinded_sums = Vec::with_capacity(items);
    for (item, encrypted) in blinded_shares.iter().enumerate() {
        match scheme
            .decrypt_data(from, encrypted)
            .and_then(|bytes| scalar_from_bytes(&bytes))
        {
            Ok(sum) => blinded_sums.push(sum),
            Err(e) => {
                warn!(
                    "Blinded share of item {} from replica {} is unreadable: {:?}",
                    item, from, e
                );
                return None;
            }
        }
    }
    Some(blinded_sums)
}

/// What has been received in one round, and whether it is enough.
#[derive(Debug)]
pub(crate) struct QuorumTracker {
    f: usize,
    state_sender: ProcessId,
    common_state: Option<Vec<u8>>,
    common_state_hash: Option<[u8; 32]>,
    hash_votes: BTreeMap<ProcessId, [u8; 32]>,
    item_votes: BTreeMap<ProcessId, usize>,
    commitments: Box<dyn CommitmentReconciliation>,
    valid: BTreeMap<ProcessId, PeerItems>,
}

impl QuorumTracker {
    pub(crate) fn new(f: usize, kind: CommitmentKind, state_sender: ProcessId) -> Self {
        Self {
            f,
            state_sender,
            common_state: None,
            common_state_hash: None,
            hash_votes: BTreeMap::new(),
            item_votes: BTreeMap::new(),
            commitments: reconciliation::strategy(kind, f, state_sender),
            valid: BTreeMap::new(),
        }
    }

    /// Record the data of one peer. Nothing counts before the seal opens
    /// with the key shared with the claimed sender. An authenticated peer
    /// whose shares are inconsistent still votes but does not contribute
    /// shares.
    pub(crate) fn handle(&mut self, scheme: &ServerScheme, data: BlindedData) {
        let from = data.from;
        if self.hash_votes.contains_key(&from) {
            warn!("Ignoring repeated blinded data from replica {}", from);
            return;
        }
        if let Err(e) = open_seal(scheme, &data) {
            warn!("Dropping blinded data claiming to come from replica {}: {:?}", from, e);
            return;
        }
        let items = data.items();
        debug!("Replica {} sent {} confidential items", from, items);
        let _ = self.hash_votes.insert(from, data.common_state_hash);
        let _ = self.item_votes.insert(from, items);
        if from == self.state_sender {
            match data.common_state {
                Some(state) => {
                    self.common_state = Some(state);
                    self.common_state_hash = Some(data.common_state_hash);
                }
                None => warn!("State sender {} did not send the common state", from),
            }
        }
        if let Err(e) = self.commitments.handle(from, data.commitments) {
            warn!("Commitments of replica {} are unusable: {:?}", from, e);
            return;
        }
        if let Some(blinded_sums) = open_blinded_sums(scheme, from, &data.blinded_shares, items) {
            let _ = self.valid.insert(
                from,
                PeerItems {
                    blinded_sums,
                    dprf: data.dprf,
                },
            );
        }
    }

    fn agreed_hash(&self) -> Option<[u8; 32]> {
        most_voted(self.hash_votes.values().copied())
            .filter(|(_, count)| *count > self.f)
            .map(|(hash, _)| hash)
    }

    fn agreed_items(&self) -> Option<usize> {
        most_voted(self.item_votes.values().copied())
            .filter(|(_, count)| *count > self.f)
            .map(|(items, _)| items)
    }

    pub(crate) fn has_common_state(&self) -> bool {
        self.common_state.is_some() && self.common_state_hash.is_some()
            && self.common_state_hash == self.agreed_hash()
    }

    pub(crate) fn has_commitments(&self) -> bool {
        self.commitments.is_ready()
    }

    pub(crate) fn has_item_count(&self) -> bool {
        self.agreed_items().is_some()
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.has_common_state() && self.has_commitments() && self.has_item_count()
    }

    /// One contribution list per item, built from every usable peer.
    fn contributions(
        &self,
        scheme: &ServerScheme,
        items: usize,
    ) -> Result<Vec<Vec<RecoveryContribution>>> {
        let candidates: Vec<ProcessId> = self
            .valid
            .iter()
            .filter(|(from, peer)| {
                let agrees = peer.dprf.len() == items;
                if !agrees {
                    debug!("Replica {} disagrees on the number of items", from);
                }
                agrees
            })
            .map(|(from, _)| *from)
            .collect();
        let assigned: BTreeMap<ProcessId, Arc<PeerCommitments>> = self
            .commitments
            .commitments_of(&candidates)
            .into_iter()
            .filter(|(from, commitments)| {
                let covers = commitments.covers(items);
                if !covers {
                    warn!("Commitments for replica {} do not cover {} items", from, items);
                }
                covers
            })
            .collect();
        let needed = scheme.view().agreement();
        if assigned.len() < needed {
            return Err(InternalError::NotEnoughContributions {
                needed,
                got: assigned.len(),
            });
        }

        let mut per_item = vec![Vec::with_capacity(assigned.len()); items];
        for (from, commitments) in &assigned {
            let shareholder = scheme.shareholder(*from)?;
            let peer = self
                .valid
                .get(from)
                .ok_or(InternalError::InternalInvariantFailed)?;
            for (item, contributions) in per_item.iter_mut().enumerate() {
                contributions.push(RecoveryContribution {
                    r: commitments.rs[item],
                    shareholder,
                    dprf: peer.dprf[item].clone(),
                    blinded_sum: peer.blinded_sums[item],
                    share_commitment: commitments.commitments[2 * item].clone(),
                    recovering_commitment: commitments.commitments[2 * item + 1].clone(),
                    shared_data: None,
                });
            }
        }
        Ok(per_item)
    }

    /// Recover every item and rebuild the state. Peers excluded while
    /// recovering are dropped from the usable set.
    pub(crate) fn recover(&mut self, scheme: &ServerScheme, threads: usize) -> Result<ApplicationState> {
        let items = self
            .agreed_items()
            .ok_or(InternalError::InternalInvariantFailed)?;
        let common_state = self
            .common_state
            .as_deref()
            .ok_or(InternalError::InternalInvariantFailed)?;
        let contributions = self.contributions(scheme, items)?;

        let started = Instant::now();
        let outcomes = recover_items(scheme, &contributions, threads)?;
        info!(
            "Recovered {} shares in {} ms",
            items,
            started.elapsed().as_millis()
        );

        let mut shares = Vec::with_capacity(items);
        let mut failure = None;
        let mut excluded = Vec::new();
        for (item, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok(outcome) => {
                    for shareholder in &outcome.excluded {
                        warn!(
                            "Replica {} was excluded while recovering item {}",
                            shareholder.process(),
                            item
                        );
                        excluded.push(shareholder.process());
                    }
                    shares.push(outcome.share);
                }
                Err(e) if e.is_fatal() => {
                    error!("Recovering item {} failed: {}", item, e);
                    return Err(e);
                }
                Err(e) => {
                    warn!("Could not recover item {} yet: {}", item, e);
                    failure.get_or_insert(e);
                }
            }
        }
        for process in excluded {
            let _ = self.valid.remove(&process);
        }
        if let Some(e) = failure {
            return Err(e);
        }

        let started = Instant::now();
        let state = separation::reconstruct(common_state, shares)?;
        info!(
            "Rebuilt state up to consensus {} in {} ms",
            state.last_cid(),
            started.elapsed().as_millis()
        );
        Ok(state)
    }
}

/// Recover every item on `threads` workers. Results come back in item
/// order.
fn recover_items(
    scheme: &ServerScheme,
    contributions: &[Vec<RecoveryContribution>],
    threads: usize,
) -> Result<Vec<Result<RecoveryOutcome>>> {
    let next = AtomicUsize::new(0);
    let workers = threads.clamp(1, contributions.len().max(1));
    let mut done: Vec<(usize, Result<RecoveryOutcome>)> = thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                scope.spawn(|| {
                    let mut done = Vec::new();
                    loop {
                        let item = next.fetch_add(1, Ordering::Relaxed);
                        let Some(item_contributions) = contributions.get(item) else {
                            break;
                        };
                        done.push((item, scheme.recover_share_detailed(item_contributions)));
                    }
                    done
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().map_err(|_| InternalError::InternalInvariantFailed))
            .collect::<Result<Vec<_>>>()
    })?
    .into_iter()
    .flatten()
    .collect();
    done.sort_by_key(|(item, _)| *item);
    Ok(done.into_iter().map(|(_, outcome)| outcome).collect())
}

/// Drives one reconstruction round from the data forwarded by a
/// [`BlindedDataReceiver`](super::BlindedDataReceiver).
#[derive(Debug)]
pub struct BlindedStateHandler<'a> {
    scheme: &'a ServerScheme,
    round: u64,
    threads: usize,
    tracker: QuorumTracker,
}

impl<'a> BlindedStateHandler<'a> {
    /// A handler for `round`, using `state_sender`'s common state.
    pub fn new(
        scheme: &'a ServerScheme,
        kind: CommitmentKind,
        round: u64,
        state_sender: ProcessId,
        threads: usize,
    ) -> Self {
        Self {
            scheme,
            round,
            threads,
            tracker: QuorumTracker::new(scheme.view().f(), kind, state_sender),
        }
    }

    /// Wait for data until a state can be rebuilt or `timeout` passes.
    #[instrument(skip_all, fields(round = self.round), err(Debug))]
    pub fn run(
        &mut self,
        incoming: &Receiver<BlindedData>,
        timeout: Duration,
    ) -> Result<ApplicationState> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or(InternalError::Timeout)?;
            let data = match incoming.recv_timeout(remaining) {
                Ok(data) => data,
                Err(RecvTimeoutError::Timeout) => return Err(InternalError::Timeout),
                Err(RecvTimeoutError::Disconnected) => return Err(InternalError::Cancelled),
            };
            if data.round != self.round {
                debug!(
                    "Discarding data of round {} from replica {}",
                    data.round, data.from
                );
                continue;
            }
            self.tracker.handle(self.scheme, data);
            if !self.tracker.is_ready() {
                continue;
            }
            match self.tracker.recover(self.scheme, self.threads) {
                Ok(state) => return Ok(state),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => info!("Waiting for more blinded data: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        state::testing,
        transfer::{sender::payload_for, wire::read_payload, wire::write_payload},
        vssr::testing::Fixture,
    };
    use rand::rngs::OsRng;
    use std::sync::mpsc;

    /// What `from` would send to `to` for `state`, as read off the wire.
    fn blinded(
        fixture: &Fixture,
        state: &ApplicationState,
        from: ProcessId,
        to: ProcessId,
        state_sender: ProcessId,
        round: u64,
    ) -> Result<BlindedData> {
        let server = &fixture.servers[from as usize];
        let separated = separation::separate(state)?;
        let payload = payload_for(&mut OsRng, server, &separated, to, from == state_sender, round)?;
        let mut bytes = Vec::new();
        write_payload(&mut bytes, from, fixture.config.commitment_scheme, &payload)?;
        read_payload(bytes.as_slice(), fixture.config.commitment_scheme)
    }

    #[test]
    fn gates_open_only_with_f_plus_one_reports() -> Result<()> {
        for kind in [CommitmentKind::Linear, CommitmentKind::Constant] {
            let fixture = Fixture::new(1, kind)?;
            let states = testing::states(&fixture)?;
            let me = &fixture.servers[0];
            let mut tracker = QuorumTracker::new(1, kind, 1);

            tracker.handle(me, blinded(&fixture, &states[2], 2, 0, 1, 0)?);
            assert!(!tracker.has_common_state());
            assert!(!tracker.has_item_count());
            assert!(!tracker.is_ready());

            tracker.handle(me, blinded(&fixture, &states[1], 1, 0, 1, 0)?);
            assert!(tracker.has_common_state());
            assert!(tracker.has_commitments());
            assert!(tracker.has_item_count());
            let rebuilt = separation::separate(&tracker.recover(me, 2)?)?;
            let original = separation::separate(&states[0])?;
            assert_eq!(rebuilt.common_state, original.common_state);
            assert_eq!(rebuilt.shares.len(), original.shares.len());
            for (recovered, held) in rebuilt.shares.iter().zip(&original.shares) {
                assert_eq!(recovered.main()?.share(), held.main()?.share());
            }
        }
        Ok(())
    }

    #[test]
    fn relabelled_data_does_not_count() -> Result<()> {
        let fixture = Fixture::new(1, CommitmentKind::Linear)?;
        let states = testing::states(&fixture)?;
        let me = &fixture.servers[0];
        let mut tracker = QuorumTracker::new(1, CommitmentKind::Linear, 1);
        let honest = blinded(&fixture, &states[2], 2, 0, 1, 0)?;
        tracker.handle(me, honest.clone());

        // Replica 2 replays its own data under the names of 3 and of the
        // state sender.
        let mut as_peer = honest.clone();
        as_peer.from = 3;
        tracker.handle(me, as_peer);
        assert!(!tracker.has_item_count());
        let mut as_sender = blinded(&fixture, &states[2], 2, 0, 2, 0)?;
        as_sender.from = 1;
        tracker.handle(me, as_sender);
        assert!(!tracker.has_item_count());
        assert!(!tracker.has_common_state());

        // A payload sealed for another round is dropped as well.
        let mut replayed = blinded(&fixture, &states[3], 3, 0, 1, 7)?;
        replayed.round = 0;
        tracker.handle(me, replayed);
        assert!(!tracker.has_item_count());

        // The real replicas are not locked out by the forgeries.
        tracker.handle(me, blinded(&fixture, &states[3], 3, 0, 1, 0)?);
        assert!(tracker.has_item_count());
        assert!(!tracker.has_common_state());
        tracker.handle(me, blinded(&fixture, &states[1], 1, 0, 1, 0)?);
        assert!(tracker.is_ready());
        let rebuilt = separation::separate(&tracker.recover(me, 2)?)?;
        assert_eq!(
            rebuilt.common_state,
            separation::separate(&states[0])?.common_state
        );
        Ok(())
    }

    #[test]
    fn state_sender_bytes_are_required() -> Result<()> {
        let fixture = Fixture::new(1, CommitmentKind::Linear)?;
        let states = testing::states(&fixture)?;
        let me = &fixture.servers[0];
        let mut tracker = QuorumTracker::new(1, CommitmentKind::Linear, 3);
        tracker.handle(me, blinded(&fixture, &states[1], 1, 0, 3, 0)?);
        tracker.handle(me, blinded(&fixture, &states[2], 2, 0, 3, 0)?);
        assert!(tracker.has_item_count());
        assert!(!tracker.has_common_state());
        assert!(!tracker.has_commitments());
        Ok(())
    }

    #[test]
    fn stale_rounds_are_discarded() -> Result<()> {
        let fixture = Fixture::new(1, CommitmentKind::Linear)?;
        let states = testing::states(&fixture)?;
        let (tx, rx) = mpsc::channel();
        for from in 1..4u32 {
            tx.send(blinded(&fixture, &states[from as usize], from, 0, 1, 8)?)
                .map_err(|_| InternalError::InternalInvariantFailed)?;
        }
        let mut handler = BlindedStateHandler::new(&fixture.servers[0], CommitmentKind::Linear, 9, 1, 2);
        assert_eq!(
            handler.run(&rx, Duration::from_millis(200)),
            Err(InternalError::Timeout)
        );
        drop(tx);
        assert_eq!(
            handler.run(&rx, Duration::from_secs(5)),
            Err(InternalError::Cancelled)
        );
        Ok(())
    }
}
